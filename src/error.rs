// The #[error] attribute from thiserror uses struct fields via string interpolation,
// but Rust's unused_assignments lint doesn't recognize this.
#![allow(unused_assignments)]

//! Faceplate Error Types with Error Codes
//!
//! Error code ranges:
//! - FPL-000-009: Faceplate load errors
//! - FPL-010-019: Store errors
//! - FPL-020-029: Binding errors
//! - FPL-030-039: Script errors
//! - FPL-040-049: Action errors
//! - FPL-050-059: Configuration errors
//! - FPL-090-099: IO/serialization errors
//!
//! Binding evaluation itself never returns these: evaluation failures degrade
//! to a null value plus a diagnostic (see `runtime::diagnostics`).

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FaceplateError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// All error variants are part of the public API.
///
/// Implements both `thiserror::Error` for std error compatibility
/// and `miette::Diagnostic` for fancy terminal error display.
#[derive(Error, Debug, Diagnostic)]
pub enum FaceplateError {
    // ═══════════════════════════════════════════
    // LOAD ERRORS (000-009)
    // ═══════════════════════════════════════════
    #[error("[FPL-001] Failed to parse faceplate: {details}")]
    #[diagnostic(
        code(faceplate::parse_error),
        help("Check YAML syntax: indentation and quoting")
    )]
    ParseError { details: String },

    #[error("[FPL-002] Faceplate not found: {path}")]
    #[diagnostic(code(faceplate::not_found), help("Check the file path exists"))]
    FaceplateNotFound { path: String },

    #[error("[FPL-003] Faceplate validation failed: {reason}")]
    #[diagnostic(code(faceplate::validation_error))]
    ValidationError { reason: String },

    // ═══════════════════════════════════════════
    // STORE ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[FPL-010] Store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    #[error("[FPL-011] Entity '{entity_id}' not found")]
    EntityNotFound { entity_id: String },

    #[error("[FPL-012] Field '{field}' not found on entity '{entity_id}'")]
    FieldNotFound { entity_id: String, field: String },

    #[error("[FPL-013] Field '{field}' on entity '{entity_id}' is not an entity reference")]
    BrokenReference { entity_id: String, field: String },

    #[error("[FPL-014] Write to '{path}' on entity '{entity_id}' failed: {reason}")]
    WriteFailed {
        entity_id: String,
        path: String,
        reason: String,
    },

    #[error("[FPL-015] Notification {operation} failed: {reason}")]
    NotificationFailed { operation: String, reason: String },

    // ═══════════════════════════════════════════
    // BINDING ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error("[FPL-020] Field path '{expression}' cannot be resolved")]
    UnresolvablePath { expression: String },

    #[error("[FPL-021] No entity is bound to the runtime")]
    NoEntity,

    // ═══════════════════════════════════════════
    // SCRIPT ERRORS (030-039)
    // ═══════════════════════════════════════════
    #[error("[FPL-030] Script '{label}' failed to compile: {message}")]
    ScriptCompile { label: String, message: String },

    #[error("[FPL-031] Script '{label}' failed: {message}")]
    ScriptRuntime { label: String, message: String },

    // ═══════════════════════════════════════════
    // ACTION ERRORS (040-049)
    // ═══════════════════════════════════════════
    #[error("[FPL-040] Action '{handler}' failed: {reason}")]
    ActionFailed { handler: String, reason: String },

    #[error("[FPL-041] Navigation target could not be resolved: {reason}")]
    NavigationTarget { reason: String },

    // ═══════════════════════════════════════════
    // CONFIG ERRORS (050-059)
    // ═══════════════════════════════════════════
    #[error("[FPL-050] Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // ═══════════════════════════════════════════
    // IO/SERIALIZATION ERRORS (090-099)
    // ═══════════════════════════════════════════
    #[error("[FPL-090] IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("[FPL-091] JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("[FPL-092] YAML error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("[FPL-093] TOML error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl FaceplateError {
    /// Get the error code (e.g., "FPL-001")
    pub fn code(&self) -> &'static str {
        match self {
            Self::ParseError { .. } => "FPL-001",
            Self::FaceplateNotFound { .. } => "FPL-002",
            Self::ValidationError { .. } => "FPL-003",
            Self::StoreUnavailable { .. } => "FPL-010",
            Self::EntityNotFound { .. } => "FPL-011",
            Self::FieldNotFound { .. } => "FPL-012",
            Self::BrokenReference { .. } => "FPL-013",
            Self::WriteFailed { .. } => "FPL-014",
            Self::NotificationFailed { .. } => "FPL-015",
            Self::UnresolvablePath { .. } => "FPL-020",
            Self::NoEntity => "FPL-021",
            Self::ScriptCompile { .. } => "FPL-030",
            Self::ScriptRuntime { .. } => "FPL-031",
            Self::ActionFailed { .. } => "FPL-040",
            Self::NavigationTarget { .. } => "FPL-041",
            Self::InvalidConfig { .. } => "FPL-050",
            Self::IoError(_) => "FPL-090",
            Self::JsonError(_) => "FPL-091",
            Self::YamlParse(_) => "FPL-092",
            Self::TomlParse(_) => "FPL-093",
        }
    }

    /// Store-side failures that may succeed on retry
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. }
                | Self::NotificationFailed { .. }
                | Self::WriteFailed { .. }
        )
    }
}

impl FixSuggestion for FaceplateError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            FaceplateError::ParseError { .. } => Some("Check YAML syntax: indentation and quoting"),
            FaceplateError::FaceplateNotFound { .. } => Some("Check the file path exists"),
            FaceplateError::ValidationError { .. } => {
                Some("Give every component a unique, non-empty name")
            }
            FaceplateError::StoreUnavailable { .. } => Some("Check the store connection"),
            FaceplateError::EntityNotFound { .. } => {
                Some("Verify the entity id exists in the store snapshot")
            }
            FaceplateError::FieldNotFound { .. } => {
                Some("Check the field name against the store schema")
            }
            FaceplateError::BrokenReference { .. } => {
                Some("Every hop but the last in a 'A->B' path must be an entity reference")
            }
            FaceplateError::WriteFailed { .. } => Some("Check the field is writable"),
            FaceplateError::NotificationFailed { .. } => None,
            FaceplateError::UnresolvablePath { .. } => {
                Some("Use field names known to the store, separated by '->'")
            }
            FaceplateError::NoEntity => Some("Bind an entity before triggering actions"),
            FaceplateError::ScriptCompile { .. } => {
                Some("Check script syntax: statements, parentheses and quotes")
            }
            FaceplateError::ScriptRuntime { .. } => None,
            FaceplateError::ActionFailed { .. } => None,
            FaceplateError::NavigationTarget { .. } => {
                Some("Set a target faceplate id on the navigate action")
            }
            FaceplateError::InvalidConfig { .. } => Some("Check the runtime config TOML"),
            FaceplateError::IoError(_) => Some("Check file path and permissions"),
            FaceplateError::JsonError(_) => Some("Check JSON syntax"),
            FaceplateError::YamlParse(_) => Some("Check YAML syntax: indentation and quoting"),
            FaceplateError::TomlParse(_) => Some("Check TOML syntax"),
        }
    }
}
