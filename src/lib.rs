// Core infrastructure modules
pub mod core;

// Query building blocks
pub mod geometry;
pub mod scope;
pub mod template;
pub mod value;

// Interactive shell
pub mod command_palette;
pub mod config;
pub mod interrupt;
pub mod repl;

pub use crate::core::{CancelReason, CancellationToken, Result, SqlcellError};
pub use crate::scope::Scope;
pub use crate::value::Value;
