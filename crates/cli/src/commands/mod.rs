//! CLI command implementations.

pub mod login;
pub mod path;
pub mod probe;
pub mod token;
pub mod user;
pub mod varint;
