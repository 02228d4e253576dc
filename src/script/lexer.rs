//! Tokenizer for script bodies, transforms and modules

use std::fmt;

use chumsky::prelude::*;

use super::ScriptError;

pub type Span = SimpleSpan;
pub type LexError<'src> = Rich<'src, char, Span>;

#[derive(Debug, Clone, PartialEq)]
pub enum Token<'src> {
    Number(f64),
    Str(String),
    /// Backtick string: literal chunks around the `${...}` sources
    Template {
        quasis: Vec<String>,
        exprs: Vec<&'src str>,
    },
    Ident(&'src str),
    Punct(&'static str),
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Str(text) => write!(f, "'{}'", text),
            Self::Template { .. } => write!(f, "template string"),
            Self::Ident(name) => write!(f, "{}", name),
            Self::Punct(p) => write!(f, "{}", p),
        }
    }
}

/// Longest first so `===` wins over `==` and `=`. `?.` is lexed separately.
const PUNCTUATORS: [&str; 35] = [
    "===", "!==", "...", "==", "!=", "<=", ">=", "&&", "||", "??", "=>", "+=", "-=", "*=", "/=",
    "(", ")", "{", "}", "[", "]", ",", ";", ":", ".", "?", "=", "<", ">", "+", "-", "*", "/",
    "%", "!",
];

enum TemplatePart<'src> {
    Char(char),
    Expr(&'src str),
}

fn assemble_template(parts: Vec<TemplatePart<'_>>) -> Token<'_> {
    let mut quasis = Vec::new();
    let mut exprs = Vec::new();
    let mut chunk = String::new();
    for part in parts {
        match part {
            TemplatePart::Char(c) => chunk.push(c),
            TemplatePart::Expr(source) => {
                quasis.push(std::mem::take(&mut chunk));
                exprs.push(source);
            }
        }
    }
    quasis.push(chunk);
    Token::Template { quasis, exprs }
}

fn escape<'src>() -> impl Parser<'src, &'src str, char, extra::Err<LexError<'src>>> + Clone {
    let unicode = just('u').ignore_then(
        any()
            .filter(char::is_ascii_hexdigit)
            .repeated()
            .exactly(4)
            .to_slice()
            .try_map(|digits: &str, span| {
                u32::from_str_radix(digits, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| Rich::custom(span, "invalid unicode escape"))
            }),
    );

    just('\\').ignore_then(choice((
        just('n').to('\n'),
        just('t').to('\t'),
        just('r').to('\r'),
        just('0').to('\0'),
        unicode,
        any(),
    )))
}

fn quoted<'src>(
    quote: char,
) -> impl Parser<'src, &'src str, String, extra::Err<LexError<'src>>> + Clone {
    just(quote)
        .ignore_then(
            choice((
                escape(),
                any().filter(move |c: &char| *c != quote && *c != '\\' && *c != '\n'),
            ))
            .repeated()
            .collect::<String>(),
        )
        .then_ignore(just(quote))
}

pub fn lexer<'src>(
) -> impl Parser<'src, &'src str, Vec<(Token<'src>, Span)>, extra::Err<LexError<'src>>> {
    let exponent = one_of("eE")
        .then(one_of("+-").or_not())
        .then(text::digits(10));

    let number = choice((
        text::digits(10)
            .then(just('.').then(text::digits(10).or_not()).or_not())
            .ignored(),
        just('.').then(text::digits(10)).ignored(),
    ))
    .then(exponent.or_not())
    .to_slice()
    .try_map(|slice: &str, span| {
        slice
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|_| Rich::custom(span, format!("invalid number '{}'", slice)))
    });

    let balanced = recursive(|balanced| {
        choice((
            just('{').then(balanced).then(just('}')).ignored(),
            none_of("{}").ignored(),
        ))
        .repeated()
    });

    let interpolation = just("${")
        .ignore_then(balanced.to_slice())
        .then_ignore(just('}'));

    let template = just('`')
        .ignore_then(
            choice((
                interpolation.map(TemplatePart::Expr),
                escape().map(TemplatePart::Char),
                none_of('`').map(TemplatePart::Char),
            ))
            .repeated()
            .collect::<Vec<_>>(),
        )
        .then_ignore(just('`'))
        .map(assemble_template);

    let string = choice((quoted('\''), quoted('"'))).map(Token::Str);

    let ident = any()
        .filter(|c: &char| c.is_alphabetic() || *c == '_' || *c == '$')
        .then(
            any()
                .filter(|c: &char| c.is_alphanumeric() || *c == '_' || *c == '$')
                .repeated(),
        )
        .to_slice()
        .map(Token::Ident);

    // `a?.5:1` is a conditional followed by a number
    let optional_chain = just("?.")
        .then_ignore(any().filter(char::is_ascii_digit).not())
        .to(Token::Punct("?."));

    let punct = choice(PUNCTUATORS.map(|p| just(p).to(Token::Punct(p))));

    let token = choice((number, template, string, ident, optional_chain, punct));

    let line_comment = just("//")
        .then(any().and_is(just('\n').not()).repeated())
        .ignored();
    let block_comment = just("/*")
        .then(any().and_is(just("*/").not()).repeated())
        .then(just("*/"))
        .ignored();
    let trivia = choice((line_comment, block_comment))
        .padded()
        .repeated()
        .padded();

    trivia
        .clone()
        .ignore_then(
            token
                .map_with(|token, extra| (token, extra.span()))
                .then_ignore(trivia)
                .repeated()
                .collect(),
        )
        .then_ignore(end())
}

/// First error as a [`ScriptError::Syntax`] carrying its byte offset
pub(super) fn syntax_error<'a, T>(errors: Vec<Rich<'a, T, Span>>) -> ScriptError
where
    Rich<'a, T, Span>: fmt::Display,
{
    match errors.into_iter().next() {
        Some(error) => ScriptError::Syntax {
            position: error.span().into_range().start,
            message: error.to_string(),
        },
        None => ScriptError::Syntax {
            position: 0,
            message: "invalid syntax".to_string(),
        },
    }
}

pub fn tokenize(source: &str) -> Result<Vec<(Token<'_>, Span)>, ScriptError> {
    lexer().parse(source).into_result().map_err(syntax_error)
}
