//! `mcp-browser-use` crate (library surface).
//!
//! The primary entrypoint is the `mcp-browser-use` binary (MCP stdio server + CLI). This module
//! re-exports the backend crates so embedders can build their own [`core::Session`].

pub use browser_use_core as core;
pub use browser_use_local as local;
