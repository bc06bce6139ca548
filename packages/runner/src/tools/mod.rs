// packages/runner/src/tools/mod.rs
//! Collaborator tools
//!
//! The runner only depends on operation shapes, never on tool identities:
//!
//! - **Template**: command lines with `{placeholder}` substitution
//! - **Shell**: runs a provisioning/networking command to completion
//! - **Host**: privilege, kernel log, boot hook, restart
//! - **Scripted**: recording stand-ins for tests

pub mod host;
pub mod scripted;
pub mod shell;
pub mod template;

// Re-export commonly used types
pub use host::{HostControl, SystemHost};
pub use scripted::{ScriptedHost, ScriptedShell};
pub use shell::{HostShell, SystemShell};
pub use template::{CommandTemplate, Vars};
