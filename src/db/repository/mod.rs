//! Repository layer — entity-scoped database operations over `&Connection`.

mod audit;
mod chunk;
mod document;

pub use audit::*;
pub use chunk::*;
pub use document::*;
