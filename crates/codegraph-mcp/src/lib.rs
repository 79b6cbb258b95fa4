//! Tool dispatcher and JSON-RPC stdio transport for the code-intelligence
//! service. Every exposed tool routes through one `Conductor::dispatch`
//! call; this crate's job is schema validation, envelope shaping, cursor
//! pagination, and error-taxonomy translation around that single call.

pub mod envelope;
pub mod error;
pub mod server;
pub mod tools;

pub use envelope::ToolEnvelope;
pub use error::{McpError, Result};
pub use server::{serve_stdio, CodeGraphServer, ServerConfig};
