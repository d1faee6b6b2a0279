//! Test utilities shared across crate-level unit tests.

pub mod http;
pub mod memory;

pub use http::start_mock_server;
pub use memory::{at, memory_database};
