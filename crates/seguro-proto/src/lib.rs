//! Wire format definitions for seguro.
//!
//! The relay never looks inside a blob; everything in this crate describes the
//! envelope *around* blobs: message records, HTTP bodies, the line protocol and
//! the push channel frames.

#![forbid(unsafe_code)]

pub mod records;
pub mod validate;
pub mod wire;

pub use records::{Meta, MessageKind, MessageRecord};
pub use validate::WireError;
