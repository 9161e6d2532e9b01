//! Transport layer: the streamable HTTP endpoint and its framing.

pub mod framing;
pub mod http;
pub mod stream;

pub use http::{router, HttpTransport, ServerState};
