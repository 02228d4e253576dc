//! Faceplate record types
//!
//! A faceplate is a saved layout of components plus the binding, script and
//! notification configuration instantiated against one entity at runtime.
//!
//! ```yaml
//! id: tank-overview
//! components:
//!   - name: level
//!     kind: gauge
//!     max: 100
//!     bindings:
//!       - property: value
//!         expression: Level
//!       - property: label
//!         expression: "script: context.get('Name') + ' level'"
//! ```

use std::fs;
use std::path::Path;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{FaceplateError, Result};

/// How a binding expression is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingMode {
    Literal,
    Field,
    Script,
}

impl BindingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Literal => "literal",
            Self::Field => "field",
            Self::Script => "script",
        }
    }
}

impl std::fmt::Display for BindingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A component property tracking an expression
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    /// Owning component (filled from the enclosing component when omitted)
    #[serde(default)]
    pub component: String,
    pub property: String,
    pub expression: String,
    /// Explicit mode; inferred from the expression when absent
    #[serde(default)]
    pub mode: Option<BindingMode>,
    #[serde(default)]
    pub transform: Option<String>,
    /// Field paths a script-mode binding depends on
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Binding {
    pub fn new(
        component: impl Into<String>,
        property: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            property: property.into(),
            expression: expression.into(),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: BindingMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_transform(mut self, transform: impl Into<String>) -> Self {
        self.transform = Some(transform.into());
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// A binding is only actionable when component, property and expression are set
    pub fn is_actionable(&self) -> bool {
        !self.component.trim().is_empty()
            && !self.property.trim().is_empty()
            && !self.expression.trim().is_empty()
    }
}

/// Closed set of widget kinds with their kind-specific geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComponentKind {
    Gauge {
        #[serde(default)]
        min: f64,
        #[serde(default = "default_gauge_max")]
        max: f64,
    },
    Toggle,
    Text {
        #[serde(default)]
        text: String,
    },
    Rectangle {
        width: f64,
        height: f64,
    },
    Circle {
        radius: f64,
    },
    Line {
        #[serde(default)]
        points: Vec<(f64, f64)>,
    },
    Image {
        #[serde(default)]
        source: String,
    },
}

fn default_gauge_max() -> f64 {
    100.0
}

impl ComponentKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Gauge { .. } => "gauge",
            Self::Toggle => "toggle",
            Self::Text { .. } => "text",
            Self::Rectangle { .. } => "rectangle",
            Self::Circle { .. } => "circle",
            Self::Line { .. } => "line",
            Self::Image { .. } => "image",
        }
    }

    /// Bounding size when the kind carries one
    pub fn size(&self) -> Option<(f64, f64)> {
        match self {
            Self::Rectangle { width, height } => Some((*width, *height)),
            Self::Circle { radius } => Some((radius * 2.0, radius * 2.0)),
            Self::Line { points } if !points.is_empty() => {
                let (min_x, max_x, min_y, max_y) = points.iter().fold(
                    (f64::MAX, f64::MIN, f64::MAX, f64::MIN),
                    |(a, b, c, d), (x, y)| (a.min(*x), b.max(*x), c.min(*y), d.max(*y)),
                );
                Some((max_x - min_x, max_y - min_y))
            }
            Self::Line { .. }
            | Self::Gauge { .. }
            | Self::Toggle
            | Self::Text { .. }
            | Self::Image { .. } => None,
        }
    }
}

/// Where a layout slot places a component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutEntry {
    pub slot: String,
    pub component: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub rotation: f64,
}

/// Comparison applied by an animation rule
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleOperator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[default]
    #[serde(rename = "truthy")]
    Truthy,
}

/// Adds a CSS class to a component while its expression satisfies a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationRule {
    pub expression: String,
    #[serde(default)]
    pub mode: Option<BindingMode>,
    #[serde(default)]
    pub operator: RuleOperator,
    #[serde(default)]
    pub value: Value,
    pub class: String,
}

/// Where a `write_field` action takes its value from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum ValueSource {
    /// The value supplied by the component that fired the event
    #[default]
    Component,
    Literal {
        value: Value,
    },
    Expression {
        expression: String,
    },
}

/// The 3 action kinds an event handler can run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    WriteField {
        field: String,
        #[serde(default)]
        source: ValueSource,
    },
    Script {
        code: String,
    },
    Navigate {
        faceplate: String,
        /// Expression yielding the target entity id
        #[serde(default)]
        entity: Option<String>,
        /// Pick the first entity of this type when no entity expression is set
        #[serde(default)]
        entity_type: Option<String>,
    },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WriteField { .. } => "write_field",
            Self::Script { .. } => "script",
            Self::Navigate { .. } => "navigate",
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_trigger() -> String {
    "click".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventHandler {
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_trigger")]
    pub trigger: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub action: Action,
}

impl EventHandler {
    pub fn new(id: impl Into<String>, action: Action) -> Self {
        Self {
            id: id.into(),
            trigger: default_trigger(),
            enabled: true,
            action,
        }
    }
}

/// Named block of reusable script code
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptModule {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub code: String,
}

impl ScriptModule {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
        }
    }
}

/// Extra fields whose changes should refresh the faceplate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    #[serde(flatten)]
    pub kind: ComponentKind,
    #[serde(default)]
    pub bindings: Vec<Binding>,
    #[serde(default)]
    pub animation_rules: Vec<AnimationRule>,
    #[serde(default)]
    pub event_handlers: Vec<EventHandler>,
}

impl Component {
    pub fn new(name: impl Into<String>, kind: ComponentKind) -> Self {
        Self {
            name: name.into(),
            kind,
            bindings: Vec::new(),
            animation_rules: Vec::new(),
            event_handlers: Vec::new(),
        }
    }

    pub fn with_binding(mut self, property: &str, expression: &str) -> Self {
        self.bindings
            .push(Binding::new(self.name.clone(), property, expression));
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Faceplate {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub layout: Vec<LayoutEntry>,
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(default)]
    pub script_modules: Vec<ScriptModule>,
    #[serde(default)]
    pub notification_channels: Vec<NotificationChannel>,
}

impl Faceplate {
    /// Parse a faceplate from YAML (JSON is valid YAML)
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| FaceplateError::ParseError {
            details: e.to_string(),
        })
    }

    /// Load a faceplate file (`.json`, `.yaml` or `.yml`)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FaceplateError::FaceplateNotFound {
                path: path.display().to_string(),
            });
        }
        let content = fs::read_to_string(path)?;
        if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content).map_err(|e| FaceplateError::ParseError {
                details: e.to_string(),
            })
        } else {
            Self::from_yaml(&content)
        }
    }

    /// Check named components are unique
    ///
    /// Unnamed components still load; their bindings are not actionable.
    pub fn validate(&self) -> Result<()> {
        let mut seen = FxHashSet::default();
        for component in &self.components {
            let name = component.name.trim();
            if name.is_empty() {
                warn!(faceplate = %self.id, "Component without a name; its bindings are skipped");
                continue;
            }
            if !seen.insert(name) {
                return Err(FaceplateError::ValidationError {
                    reason: format!("duplicate component '{}'", name),
                });
            }
        }
        Ok(())
    }

    /// Every binding of every component, owner name filled in
    pub fn all_bindings(&self) -> Vec<Binding> {
        self.components
            .iter()
            .flat_map(|component| {
                component.bindings.iter().map(move |binding| {
                    let mut binding = binding.clone();
                    if binding.component.trim().is_empty() {
                        binding.component = component.name.clone();
                    }
                    binding
                })
            })
            .collect()
    }

    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }

    /// Fields named by faceplate-level notification channels
    pub fn channel_fields(&self) -> Vec<String> {
        self.notification_channels
            .iter()
            .flat_map(|channel| channel.fields.iter())
            .map(|field| field.trim().to_string())
            .filter(|field| !field.is_empty())
            .collect()
    }
}
