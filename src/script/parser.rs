//! Token parser
//!
//! Binary and unary operators go through a pratt table, tightest last:
//! `??`, `||`, `&&`, equality, relational, additive, multiplicative, unary
//! prefixes, then member/index/call suffixes. Conditionals, assignment and
//! arrow functions sit above the table.

use std::sync::Arc;

use chumsky::input::{Stream, ValueInput};
use chumsky::pratt::*;
use chumsky::prelude::*;

use super::lexer::{syntax_error, tokenize, Span, Token};
use super::node::{
    ArrayItem, AssignOp, BinaryOp, DeclKind, Expr, FunctionBody, FunctionDef, Literal, LogicalOp,
    Pattern, Program, Property, Stmt, UnaryOp,
};
use super::value::number_to_string;
use super::ScriptError;

type ParserExtra<'tokens, 'src> = extra::Err<Rich<'tokens, Token<'src>, Span>>;

const RESERVED: &[&str] = &[
    "let", "const", "var", "function", "if", "else", "return", "throw", "typeof", "new", "true",
    "false", "null", "undefined", "await",
];

fn is_reserved(name: &str) -> bool {
    RESERVED.contains(&name)
}

/// Member, index or call applied to the expression on its left
enum Suffix {
    Member(Arc<str>, bool),
    Index(Expr, bool),
    Call(Vec<ArrayItem>),
}

fn apply_suffix(expr: Expr, suffix: Suffix) -> Expr {
    match suffix {
        Suffix::Member(property, optional) => Expr::Member {
            object: Box::new(expr),
            property,
            optional,
        },
        Suffix::Index(index, optional) => Expr::Index {
            object: Box::new(expr),
            index: Box::new(index),
            optional,
        },
        Suffix::Call(args) => Expr::Call {
            callee: Box::new(expr),
            args,
        },
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary(op, Box::new(left), Box::new(right))
}

fn logical(op: LogicalOp, left: Expr, right: Expr) -> Expr {
    Expr::Logical(op, Box::new(left), Box::new(right))
}

/// Statement list and single-expression parsers over one shared grammar
fn grammar<'tokens, 'src: 'tokens, I>() -> (
    impl Parser<'tokens, I, Vec<Stmt>, ParserExtra<'tokens, 'src>> + Clone,
    impl Parser<'tokens, I, Expr, ParserExtra<'tokens, 'src>> + Clone,
)
where
    I: ValueInput<'tokens, Token = Token<'src>, Span = Span>,
{
    let mut stmt = Recursive::declare();
    let mut expr = Recursive::declare();

    let punct = |p: &'static str| just(Token::Punct(p));
    let keyword = |kw: &'static str| just(Token::Ident(kw));

    let ident = select! { Token::Ident(name) if !is_reserved(name) => Arc::<str>::from(name) };

    // after `.` and in object literals: keywords allowed
    let property_name = select! {
        Token::Ident(name) => Arc::<str>::from(name),
        Token::Str(text) => Arc::<str>::from(text),
        Token::Number(n) => Arc::<str>::from(number_to_string(n)),
    };

    // ═══════════════════════════════════════════
    // SHARED PIECES
    // ═══════════════════════════════════════════

    let block = stmt
        .clone()
        .repeated()
        .collect::<Vec<_>>()
        .delimited_by(punct("{"), punct("}"));

    let items = choice((
        punct("...").ignore_then(expr.clone()).map(ArrayItem::Spread),
        expr.clone().map(ArrayItem::Item),
    ))
    .separated_by(punct(","))
    .allow_trailing()
    .collect::<Vec<_>>();

    let object_pattern = property_name
        .clone()
        .then(punct(":").ignore_then(ident.clone()).or_not())
        .then(punct("=").ignore_then(expr.clone()).or_not())
        .try_map(|((key, local), default), span| {
            let local = match local {
                Some(local) => local,
                None if is_reserved(&key) => return Err(Rich::custom(span, "expected identifier")),
                None => Arc::clone(&key),
            };
            Ok((key, local, default))
        })
        .separated_by(punct(","))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(punct("{"), punct("}"))
        .map(Pattern::Object);

    // `[a, , b]`: a comma after a name separates, a comma after a comma is a hole
    let array_pattern = choice((ident.clone().map(Some), punct(",").to(None)))
        .repeated()
        .collect::<Vec<_>>()
        .delimited_by(punct("["), punct("]"))
        .map(|parts| {
            let mut names = Vec::new();
            let mut after_name = false;
            for part in parts {
                match part {
                    Some(name) => {
                        names.push(Some(name));
                        after_name = true;
                    }
                    None if after_name => after_name = false,
                    None => names.push(None),
                }
            }
            Pattern::Array(names)
        });

    let pattern = choice((object_pattern, array_pattern, ident.clone().map(Pattern::Ident)));

    let params = pattern
        .clone()
        .then(punct("=").ignore_then(expr.clone()).or_not())
        .try_map(|(pattern, default), span| match (pattern, default) {
            (pattern, None) => Ok(pattern),
            (Pattern::Ident(name), Some(default)) => Ok(Pattern::Default(name, default)),
            (_, Some(_)) => Err(Rich::custom(span, "only plain parameters take defaults")),
        })
        .separated_by(punct(","))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(punct("("), punct(")"));

    // ═══════════════════════════════════════════
    // EXPRESSIONS
    // ═══════════════════════════════════════════

    let literal = select! {
        Token::Number(n) => Expr::Literal(Literal::Number(n)),
        Token::Str(text) => Expr::Literal(Literal::Str(Arc::from(text))),
        Token::Ident("true") => Expr::Literal(Literal::Bool(true)),
        Token::Ident("false") => Expr::Literal(Literal::Bool(false)),
        Token::Ident("null") => Expr::Literal(Literal::Null),
        Token::Ident("undefined") => Expr::Literal(Literal::Null),
    };

    let template = select! { Token::Template { quasis, exprs } => (quasis, exprs) }.try_map(
        |(quasis, exprs): (Vec<String>, Vec<&'src str>), span| {
            let exprs = exprs
                .into_iter()
                .map(parse_expression)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| Rich::custom(span, format!("in template: {}", err)))?;
            Ok(Expr::Template {
                quasis: quasis.into_iter().map(Arc::from).collect(),
                exprs,
            })
        },
    );

    let function = keyword("async")
        .or_not()
        .ignore_then(keyword("function"))
        .ignore_then(ident.clone().or_not())
        .then(params.clone())
        .then(block.clone())
        .map(|((name, params), body)| {
            Expr::Function(Arc::new(FunctionDef {
                name,
                params,
                body: FunctionBody::Block(body),
            }))
        });

    let method = property_name
        .clone()
        .then(params.clone())
        .then(block.clone())
        .map(|((key, params), body)| {
            let function = Expr::Function(Arc::new(FunctionDef {
                name: Some(Arc::clone(&key)),
                params,
                body: FunctionBody::Block(body),
            }));
            Property::KeyValue(key, function)
        });

    let property = choice((
        punct("...").ignore_then(expr.clone()).map(Property::Spread),
        method,
        property_name
            .clone()
            .then_ignore(punct(":"))
            .then(expr.clone())
            .map(|(key, value)| Property::KeyValue(key, value)),
        ident
            .clone()
            .map(|key| Property::KeyValue(Arc::clone(&key), Expr::Ident(key))),
    ));

    let object = property
        .separated_by(punct(","))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(punct("{"), punct("}"))
        .map(Expr::Object);

    let atom = choice((
        literal,
        template,
        function,
        ident.clone().map(Expr::Ident),
        expr.clone().delimited_by(punct("("), punct(")")),
        items.clone().delimited_by(punct("["), punct("]")).map(Expr::Array),
        object,
    ))
    .boxed();

    let suffix = choice((
        punct(".")
            .ignore_then(property_name.clone())
            .map(|property| Suffix::Member(property, false)),
        punct("?.").ignore_then(choice((
            expr.clone()
                .delimited_by(punct("["), punct("]"))
                .map(|index| Suffix::Index(index, true)),
            items.clone().delimited_by(punct("("), punct(")")).map(Suffix::Call),
            property_name.clone().map(|property| Suffix::Member(property, true)),
        ))),
        expr.clone()
            .delimited_by(punct("["), punct("]"))
            .map(|index| Suffix::Index(index, false)),
        items.clone().delimited_by(punct("("), punct(")")).map(Suffix::Call),
    ));

    // host calls resolve before returning, so await and new are plain prefixes
    let unary = select! {
        Token::Punct("!") => Some(UnaryOp::Not),
        Token::Punct("-") => Some(UnaryOp::Neg),
        Token::Punct("+") => Some(UnaryOp::Plus),
        Token::Ident("typeof") => Some(UnaryOp::Typeof),
        Token::Ident("await") => None,
        Token::Ident("new") => None,
    };

    let equality = select! {
        Token::Punct("===") => BinaryOp::StrictEq,
        Token::Punct("!==") => BinaryOp::StrictNe,
        Token::Punct("==") => BinaryOp::Eq,
        Token::Punct("!=") => BinaryOp::Ne,
    };
    let relational = select! {
        Token::Punct("<=") => BinaryOp::Le,
        Token::Punct(">=") => BinaryOp::Ge,
        Token::Punct("<") => BinaryOp::Lt,
        Token::Punct(">") => BinaryOp::Gt,
    };
    let additive = select! {
        Token::Punct("+") => BinaryOp::Add,
        Token::Punct("-") => BinaryOp::Sub,
    };
    let multiplicative = select! {
        Token::Punct("*") => BinaryOp::Mul,
        Token::Punct("/") => BinaryOp::Div,
        Token::Punct("%") => BinaryOp::Rem,
    };

    let operators = atom.pratt((
        infix(left(1), punct("??"), |l, _, r, _| logical(LogicalOp::Nullish, l, r)),
        infix(left(2), punct("||"), |l, _, r, _| logical(LogicalOp::Or, l, r)),
        infix(left(3), punct("&&"), |l, _, r, _| logical(LogicalOp::And, l, r)),
        infix(left(4), equality, |l, op, r, _| binary(op, l, r)),
        infix(left(5), relational, |l, op, r, _| binary(op, l, r)),
        infix(left(6), additive, |l, op, r, _| binary(op, l, r)),
        infix(left(7), multiplicative, |l, op, r, _| binary(op, l, r)),
        prefix(8, unary, |op: Option<UnaryOp>, operand, _| match op {
            Some(op) => Expr::Unary(op, Box::new(operand)),
            None => operand,
        }),
        postfix(9, suffix, |expr, suffix, _| apply_suffix(expr, suffix)),
    ));

    let conditional = operators
        .then(
            punct("?")
                .ignore_then(expr.clone())
                .then_ignore(punct(":"))
                .then(expr.clone())
                .or_not(),
        )
        .map(|(test, branches)| match branches {
            Some((then, otherwise)) => {
                Expr::Conditional(Box::new(test), Box::new(then), Box::new(otherwise))
            }
            None => test,
        });

    let assign_op = select! {
        Token::Punct("=") => AssignOp::Set,
        Token::Punct("+=") => AssignOp::Compound(BinaryOp::Add),
        Token::Punct("-=") => AssignOp::Compound(BinaryOp::Sub),
        Token::Punct("*=") => AssignOp::Compound(BinaryOp::Mul),
        Token::Punct("/=") => AssignOp::Compound(BinaryOp::Div),
    };

    let assignment = conditional
        .then(assign_op.then(expr.clone()).or_not())
        .try_map(|(target, assigned), span| match assigned {
            None => Ok(target),
            Some((op, value))
                if matches!(target, Expr::Ident(_) | Expr::Member { .. } | Expr::Index { .. }) =>
            {
                Ok(Expr::Assign {
                    op,
                    target: Box::new(target),
                    value: Box::new(value),
                })
            }
            Some(_) => Err(Rich::custom(span, "invalid assignment target")),
        });

    let arrow_body = choice((
        block.clone().map(FunctionBody::Block),
        expr.clone().map(FunctionBody::Expr),
    ));

    let arrow = keyword("async")
        .or_not()
        .ignore_then(choice((
            ident.clone().map(|name| vec![Pattern::Ident(name)]),
            params.clone(),
        )))
        .then_ignore(punct("=>"))
        .then(arrow_body)
        .map(|(params, body)| {
            Expr::Function(Arc::new(FunctionDef {
                name: None,
                params,
                body,
            }))
        });

    expr.define(choice((arrow, assignment)).boxed());

    // ═══════════════════════════════════════════
    // STATEMENTS
    // ═══════════════════════════════════════════

    let declaration = choice((
        keyword("let").to(DeclKind::Let),
        keyword("const").to(DeclKind::Const),
        keyword("var").to(DeclKind::Var),
    ))
    .then(
        pattern
            .then(punct("=").ignore_then(expr.clone()).or_not())
            .separated_by(punct(","))
            .at_least(1)
            .collect::<Vec<_>>(),
    )
    .try_map(|(kind, declarations), span| {
        if kind == DeclKind::Const && declarations.iter().any(|(_, init)| init.is_none()) {
            return Err(Rich::custom(span, "missing initializer in const declaration"));
        }
        Ok(Stmt::Decl { kind, declarations })
    });

    let function_decl = keyword("async")
        .or_not()
        .ignore_then(keyword("function"))
        .ignore_then(ident.clone())
        .then(params)
        .then(block.clone())
        .map(|((name, params), body)| {
            Stmt::Function(Arc::new(FunctionDef {
                name: Some(name),
                params,
                body: FunctionBody::Block(body),
            }))
        });

    let if_stmt = keyword("if")
        .ignore_then(expr.clone().delimited_by(punct("("), punct(")")))
        .then(stmt.clone())
        .then(keyword("else").ignore_then(stmt.clone()).or_not())
        .map(|((cond, then), otherwise)| Stmt::If {
            cond,
            then: Box::new(then),
            otherwise: otherwise.map(Box::new),
        });

    stmt.define(
        choice((
            block.map(Stmt::Block),
            punct(";").to(Stmt::Empty),
            declaration,
            function_decl,
            if_stmt,
            keyword("return")
                .ignore_then(expr.clone().or_not())
                .map(Stmt::Return),
            keyword("throw").ignore_then(expr.clone()).map(Stmt::Throw),
            expr.clone().map(Stmt::Expr),
        ))
        .then_ignore(punct(";").repeated())
        .boxed(),
    );

    (stmt.repeated().collect::<Vec<_>>(), expr)
}

/// Parse statements until end of input
pub fn parse_program(source: &str) -> Result<Program, ScriptError> {
    let tokens = tokenize(source)?;
    let eoi = Span::from(source.len()..source.len());
    let (program, _) = grammar();
    program
        .then_ignore(end())
        .parse(Stream::from_iter(tokens).map(eoi, |(token, span)| (token, span)))
        .into_result()
        .map(|body| Program { body })
        .map_err(syntax_error)
}

/// Parse exactly one expression
pub fn parse_expression(source: &str) -> Result<Expr, ScriptError> {
    let tokens = tokenize(source)?;
    let eoi = Span::from(source.len()..source.len());
    let (_, expression) = grammar();
    expression
        .then_ignore(end())
        .parse(Stream::from_iter(tokens).map(eoi, |(token, span)| (token, span)))
        .into_result()
        .map_err(syntax_error)
}
