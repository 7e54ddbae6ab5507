//! Downstream transports.
//!
//! The resilience layer is transport-agnostic: anything that reports failures
//! as a `CallError` can be guarded. This module ships the HTTP/JSON adapter.

pub mod http;

pub use http::{extract_error_message, map_transport_error, HttpDependency, TransportBuildError};
