//! API implementation submodules.
//!
//! Each submodule contains `impl AppCtrlApi` blocks that extend the public
//! API with domain-specific methods. The struct definition remains in
//! `lib.rs`.

mod apps;
mod builder;
mod system;

pub use builder::AppCtrlApiBuilder;
