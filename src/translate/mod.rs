//! Translation between the client chat completions format and the upstream API.
//!
//! The core of the proxy: request policy, buffered response normalization and the
//! streaming relay. Everything except [`streaming::relay_stream`] is pure (no I/O).

pub mod request;
pub mod response;
pub mod streaming;
pub mod types;
pub mod vendor;
