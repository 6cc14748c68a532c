//! namel3ss-ir: the immutable Program IR consumed by the flow engine.
//!
//! Flows, records, tools and AI declarations arrive as JSON from the
//! lowering pass. Statements and expressions are closed tagged enums so
//! every consumer matches exhaustively over node kinds.

pub mod deserialize;
pub mod expr;
pub mod stmt;
pub mod types;

pub use deserialize::{validate_orchestration, IrError};
pub use expr::*;
pub use stmt::*;
pub use types::*;
