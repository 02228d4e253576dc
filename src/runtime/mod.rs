//! Runtime Module - live binding evaluation
//!
//! Contains the per-faceplate runtime components:
//! - `engine`: expression evaluation with dedup, cycle and depth guards
//! - `resolver`: field path resolution with a per-map cache
//! - `transform`: per-target post-processing of expression values
//! - `notify`: store subscriptions driving re-evaluation
//! - `actions`: FIFO event/action executor
//! - `diagnostics`: compilation and runtime error records
//! - `faceplate`: the `FaceplateRuntime` facade hosts talk to
//!
//! For the static faceplate structure, see the `ast` module.

mod actions;
mod diagnostics;
mod engine;
mod faceplate;
mod notify;
mod resolver;
mod transform;

pub use actions::{ActionQueue, EventPayload};
pub use diagnostics::{CompilationError, Diagnostics, RuntimeError, RuntimeErrorKind};
pub use engine::Engine;
pub use faceplate::FaceplateRuntime;
pub use notify::NotificationManager;
pub use resolver::PathResolver;
