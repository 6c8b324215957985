//! Test support for the Z-Wave controller stack.
//!
//! Provides a scriptable [`MockTransport`] that emulates a stick and the
//! simple command-class behavior of nodes, fixture helpers for decorating
//! nodes with capabilities and cached state, and tracing setup for tests.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod fixtures;
mod mock_transport;
mod tracing_config;

pub use fixtures::*;
pub use mock_transport::*;
pub use tracing_config::*;
