//! Domain types and pure logic for grid generation runs.

pub mod axis;
pub mod backend;
pub mod error;
pub mod expander;
pub mod grid;
pub mod hooks;
pub mod layout;
pub mod naming;
pub mod params;
pub mod preset;
pub mod resolution;
pub mod types;
