//! Binding map - indices rebuilt from a faceplate's binding list
//!
//! Built synchronously in one pass; the runtime swaps the whole map on every
//! (re)load and never mutates it afterwards.
//!
//! ```text
//! bindings ──► classify ──► ExpressionKey ──┬─► targets      key → [(component, property, transform)]
//!                                           ├─► metadata     key → {expression, mode, deps}
//!                                           └─► dependents   dep → {keys}
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::ast::{Binding, BindingMode};

use super::classify::{classify_and_normalize, make_expression_key, ExpressionKey};
use super::computed::{extract_identifiers, is_computed_expression};

/// Per-key metadata (dependencies are the union across sharing bindings)
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionMeta {
    pub expression: String,
    pub mode: BindingMode,
    pub dependencies: Vec<String>,
    pub description: Option<String>,
}

impl ExpressionMeta {
    pub fn new(expression: impl Into<String>, mode: BindingMode) -> Self {
        let expression = expression.into();
        let dependencies = compute_dependencies(&expression, mode, &[]);
        Self {
            expression,
            mode,
            dependencies,
            description: None,
        }
    }
}

/// One component property driven by an expression
#[derive(Debug, Clone, PartialEq)]
pub struct BindingTarget {
    pub component: Arc<str>,
    pub property: Arc<str>,
    pub transform: Option<String>,
}

impl BindingTarget {
    pub fn slot(&self) -> String {
        slot_key(&self.component, &self.property)
    }
}

/// Key of the bound-value map: `component:property`
pub fn slot_key(component: &str, property: &str) -> String {
    format!("{}:{}", component, property)
}

/// Dependencies of one binding by mode
///
/// - field: the identifiers of a computed expression, else the path itself
/// - script: the declared list, trimmed, blanks dropped
/// - literal: none
pub fn compute_dependencies(expression: &str, mode: BindingMode, declared: &[String]) -> Vec<String> {
    match mode {
        BindingMode::Field if is_computed_expression(expression) => extract_identifiers(expression),
        BindingMode::Field => vec![expression.trim().to_string()],
        BindingMode::Script => {
            let mut deps: Vec<String> = Vec::new();
            for dep in declared.iter().map(|d| d.trim()).filter(|d| !d.is_empty()) {
                if !deps.iter().any(|d| d == dep) {
                    deps.push(dep.to_string());
                }
            }
            deps
        }
        BindingMode::Literal => Vec::new(),
    }
}

/// Indices built from a binding list
#[derive(Debug, Clone, Default)]
pub struct BindingMap {
    /// Keys in first-seen order
    order: Vec<ExpressionKey>,
    metadata: FxHashMap<ExpressionKey, ExpressionMeta>,
    targets: FxHashMap<ExpressionKey, SmallVec<[BindingTarget; 2]>>,
    dependents: FxHashMap<String, BTreeSet<ExpressionKey>>,
    /// `component:property` → key driving it
    slots: FxHashMap<String, ExpressionKey>,
    slot_order: Vec<String>,
    components: Vec<Arc<str>>,
}

impl BindingMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build all indices from scratch
    ///
    /// Bindings missing a component, property or expression are skipped.
    pub fn build(bindings: &[Binding]) -> Self {
        let mut map = Self::new();

        for binding in bindings.iter().filter(|b| b.is_actionable()) {
            let (mode, expression) = classify_and_normalize(&binding.expression, binding.mode);
            let key = make_expression_key(&expression, mode);
            let dependencies = compute_dependencies(&expression, mode, &binding.dependencies);

            match map.metadata.get_mut(&key) {
                Some(meta) => {
                    for dep in &dependencies {
                        if !meta.dependencies.contains(dep) {
                            meta.dependencies.push(dep.clone());
                        }
                    }
                    if meta.description.is_none() {
                        meta.description = binding.description.clone();
                    }
                }
                None => {
                    map.order.push(key.clone());
                    map.metadata.insert(
                        key.clone(),
                        ExpressionMeta {
                            expression,
                            mode,
                            dependencies: dependencies.clone(),
                            description: binding.description.clone(),
                        },
                    );
                }
            }

            let component: Arc<str> = Arc::from(binding.component.trim());
            let property: Arc<str> = Arc::from(binding.property.trim());
            let transform = binding
                .transform
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string);

            let slot = slot_key(&component, &property);
            if !map.slots.contains_key(&slot) {
                map.slot_order.push(slot.clone());
            }
            map.slots.insert(slot, key.clone());
            if !map.components.contains(&component) {
                map.components.push(Arc::clone(&component));
            }

            map.targets.entry(key.clone()).or_default().push(BindingTarget {
                component,
                property,
                transform,
            });

            for dep in dependencies {
                map.dependents.entry(dep).or_default().insert(key.clone());
            }
        }

        map
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Expression keys in first-seen order
    pub fn keys(&self) -> &[ExpressionKey] {
        &self.order
    }

    pub fn contains(&self, key: &str) -> bool {
        self.metadata.contains_key(key)
    }

    pub fn meta(&self, key: &str) -> Option<&ExpressionMeta> {
        self.metadata.get(key)
    }

    pub fn targets(&self, key: &str) -> &[BindingTarget] {
        self.targets.get(key).map(|t| t.as_slice()).unwrap_or(&[])
    }

    /// Keys to re-evaluate when `dependency` changes
    pub fn dependents(&self, dependency: &str) -> Option<&BTreeSet<ExpressionKey>> {
        self.dependents.get(dependency).filter(|keys| !keys.is_empty())
    }

    /// Every distinct dependency across all expressions
    pub fn dependencies(&self) -> Vec<&str> {
        let mut deps: Vec<&str> = self.dependents.keys().map(String::as_str).collect();
        deps.sort_unstable();
        deps
    }

    /// Key driving a `component:property` slot
    pub fn key_for_target(&self, component: &str, property: &str) -> Option<&ExpressionKey> {
        self.slots.get(&slot_key(component, property))
    }

    /// `component:property` slots in first-seen order
    pub fn slots(&self) -> &[String] {
        &self.slot_order
    }

    pub fn components(&self) -> &[Arc<str>] {
        &self.components
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn field(component: &str, property: &str, expression: &str) -> Binding {
        Binding::new(component, property, expression)
    }

    #[test]
    fn skips_incomplete_bindings() {
        let map = BindingMap::build(&[
            field("", "value", "Level"),
            field("gauge", "", "Level"),
            field("gauge", "value", " "),
        ]);
        assert!(map.is_empty());
        assert!(map.slots().is_empty());
    }

    #[test]
    fn shared_expression_fans_out() {
        let map = BindingMap::build(&[
            field("a", "value", "Temperature"),
            field("b", "label", " Temperature "),
        ]);
        assert_eq!(map.len(), 1);
        let key = &map.keys()[0];
        assert_eq!(key.as_str(), "field::Temperature");
        let targets: Vec<String> = map.targets(key).iter().map(BindingTarget::slot).collect();
        assert_eq!(targets, vec!["a:value".to_string(), "b:label".to_string()]);
        assert_eq!(map.components().len(), 2);
    }

    #[test]
    fn field_dependency_is_the_path() {
        let map = BindingMap::build(&[field("a", "v", "Parent->Status")]);
        assert_eq!(map.dependencies(), vec!["Parent->Status"]);
        let dependents = map.dependents("Parent->Status").unwrap();
        assert!(dependents.contains("field::Parent->Status"));
    }

    #[test]
    fn computed_dependencies_are_identifiers() {
        let map = BindingMap::build(&[field("a", "v", "(Inlet + Outlet) / 2")]);
        assert_eq!(map.dependencies(), vec!["Inlet", "Outlet"]);
    }

    #[test]
    fn script_dependencies_merge_across_bindings() {
        let first = field("a", "v", "script: context.get('A')").with_dependencies(["A", " "]);
        let second = field("b", "v", "script: context.get('A')").with_dependencies([" B ", "A"]);
        let map = BindingMap::build(&[first, second]);
        assert_eq!(map.len(), 1);
        let meta = map.meta(&map.keys()[0]).unwrap();
        assert_eq!(meta.mode, BindingMode::Script);
        assert_eq!(meta.expression, "context.get('A')");
        assert_eq!(meta.dependencies, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn literal_has_no_dependencies() {
        let map = BindingMap::build(&[field("a", "v", "'Pump 1'")]);
        assert!(map.dependencies().is_empty());
        assert_eq!(map.meta(&map.keys()[0]).unwrap().mode, BindingMode::Literal);
    }

    #[test]
    fn key_for_target_and_transform() {
        let map = BindingMap::build(&[
            field("a", "v", "Level").with_transform("  "),
            field("b", "v", "Level").with_transform("value => value * 2"),
        ]);
        let key = map.key_for_target("b", "v").unwrap();
        assert_eq!(key.as_str(), "field::Level");
        let targets = map.targets(key);
        assert_eq!(targets[0].transform, None);
        assert_eq!(targets[1].transform.as_deref(), Some("value => value * 2"));
        assert!(map.key_for_target("c", "v").is_none());
    }

    #[test]
    fn explicit_field_mode_keeps_literal_looking_name() {
        let map = BindingMap::build(&[field("a", "v", "true").with_mode(BindingMode::Field)]);
        assert_eq!(map.keys()[0].as_str(), "field::true");
        assert_eq!(map.dependencies(), vec!["true"]);
    }
}
