// packages/runner/src/provision/mod.rs
//! Container provisioning
//!
//! - **Container**: deterministic layout of a set (names, addresses,
//!   markers, mount targets) and host/container path translation
//! - **Provisioner**: all-or-nothing creation, idempotent teardown

pub mod container;
pub mod provisioner;

// Re-export commonly used types
pub use container::{Address, Container, ContainerSet, MountMap};
pub use provisioner::Provisioner;
