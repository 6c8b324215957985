//! Core types for the Z-Wave controller stack.
//!
//! This crate provides the foundational types shared by the controller core
//! and its test tooling: node and network identifiers, command classes, the
//! serial API surface (function types, status codes, typed payloads), the
//! association data model, the value store, and error handling.
//!
//! Framing and checksumming of serial messages, as well as the byte-level
//! encoding of individual payloads, are intentionally out of scope; the
//! types here describe messages at the level the controller reasons about.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod association;
mod cc;
mod device_class;
mod error;
mod function;
mod ids;
mod serial;
mod value;

pub use association::*;
pub use cc::*;
pub use device_class::*;
pub use error::*;
pub use function::*;
pub use ids::*;
pub use serial::*;
pub use value::*;
