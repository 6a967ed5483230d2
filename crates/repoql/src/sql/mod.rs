//! SQL layer: the engine, the virtual table adapter, and scalar functions.

pub mod engine;
pub mod functions;
mod module;

pub use engine::{CancelHandle, Engine, QueryResult};
pub use functions::detect_language;
