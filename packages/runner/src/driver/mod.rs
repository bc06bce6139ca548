// packages/runner/src/driver/mod.rs
//! Traffic drivers: the controller and the generator

pub mod launcher;

pub use launcher::{
    is_ready_line, raise_mtu, ControllerReady, TrafficDriverLauncher, CONTROLLER, GENERATOR,
    READY_TOKEN,
};
