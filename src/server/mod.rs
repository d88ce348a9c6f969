//! Tool host: serves the tool registry over stdio or HTTP + SSE.
//!
//! - [`dispatcher`]: transport-agnostic JSON-RPC method handling
//! - [`stdio`]: newline-delimited JSON on stdin/stdout
//! - [`sse`]: `GET /sse` event stream plus `POST /messages/` inbox

pub mod dispatcher;
pub mod sse;
pub mod stdio;

pub use dispatcher::{ConnectionState, Dispatcher};
pub use sse::{serve_sse, sse_router};
pub use stdio::{serve_lines, serve_stdio};
