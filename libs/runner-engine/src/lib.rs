//! Sandboxed execution engine.
//!
//! A request flows through the components in a fixed order:
//! registry lookup, workspace materialization, sandbox launch under a deadline,
//! output classification, workspace release. [`Engine`] wires them together.

pub mod classifier;
pub mod deadline;
pub mod docker;
pub mod engine;
#[cfg(test)]
mod engine_tests;
pub mod error;
pub mod launcher;
pub mod registry;
pub mod workspace;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use engine::{Engine, EngineSettings};
pub use error::{LaunchError, RegistryError, RequestRejected, WorkspaceError};
pub use registry::{LanguageProfile, LanguageRegistry, Recipe};
