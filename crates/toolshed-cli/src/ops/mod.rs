//! Wiring shared by the commands.

pub mod context;
pub mod settings;
pub mod ux;
