//! CLI command implementations.

pub mod chain;
pub mod inspect;
pub mod verify;
