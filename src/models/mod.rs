//! Data models for presence and typing.

pub mod presence;
pub mod typing;

pub use presence::*;
pub use typing::*;
