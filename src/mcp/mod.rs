//! Model Context Protocol (MCP) plumbing.
//!
//! Both ends of the protocol live here:
//!
//! - [`types`]: JSON-RPC envelopes and MCP payloads
//! - [`transport`]: stdio, SSE and in-memory message channels
//! - [`session`]: the client session and the [`ToolHost`] seam
//!
//! The host side (method dispatch and serving loops) is in [`crate::server`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use mcp_tool_loop::mcp::{McpSession, transport::SseTransport};
//!
//! # async fn run() -> Result<(), mcp_tool_loop::error::McpError> {
//! let transport = SseTransport::new("http://127.0.0.1:8000/sse", Duration::from_secs(10))?;
//! let session = McpSession::connect(&transport, Duration::from_secs(30)).await?;
//! for tool in session.list_tools().await? {
//!     println!("{}: {}", tool.name, tool.description);
//! }
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod session;
pub mod transport;
pub mod types;

pub use session::{McpSession, SessionState, ToolHost};
