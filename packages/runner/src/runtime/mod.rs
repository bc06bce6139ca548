// packages/runner/src/runtime/mod.rs
//! Process runtime
//!
//! This module owns every OS process an experiment starts:
//!
//! - **Process Manager**: spawning into fresh process groups, signalling,
//!   and process-name queries via `/proc`
//! - **Supervisor**: the per-experiment process group (start, health check,
//!   terminate, reap)
//! - **Poll**: interval-driven readiness waits with optional deadlines
//!
//! # Architecture
//!
//! ```text
//! Runner
//!   │
//!   ├─ ProcessGroup ── container script 1..N   (lxc-attach ... sh script)
//!   │               ├─ controller             (stdout → controller.log)
//!   │               └─ generator              (stdout → generator.log)
//!   │
//!   └─ ProcessManager::kill_by_name(writer)   (processes inside containers)
//! ```

pub mod poll;
pub mod process_manager;
pub mod supervisor;

// Re-export commonly used types
pub use poll::{wait_until, Waiter};
pub use process_manager::{ProcessManager, SpawnConfig};
pub use supervisor::{Health, ProcessGroup};
