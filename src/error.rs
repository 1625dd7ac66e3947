//! Crate-wide error type and its JSON-RPC code mapping
//!
//! Subsystems keep their own error enums (`AuthError`, `LedgerError`,
//! `PaymentError`, `TreasuryError`, ...); this one covers startup and the
//! protocol shell.

use std::io;

use thiserror::Error;

/// Result with [`enum@Error`]
pub type Result<T> = std::result::Result<T, Error>;

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum Error {
    /// Rejected by [`Config::validate`](crate::config::Config::validate) or unreadable
    #[error("Configuration error: {0}")]
    Config(String),

    /// `tools/call` named a tool that is not registered
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// `resources/read` named a URI that is not configured
    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Code used when this error ends a JSON-RPC request
    #[must_use]
    pub fn to_rpc_code(&self) -> i32 {
        match self {
            Self::UnknownTool(_) | Self::UnknownResource(_) => rpc_codes::INVALID_PARAMS,
            Self::Json(_) => rpc_codes::PARSE_ERROR,
            Self::Config(_) | Self::Io(_) | Self::Internal(_) => rpc_codes::INTERNAL_ERROR,
        }
    }
}

/// JSON-RPC 2.0 error codes
#[allow(missing_docs)]
pub mod rpc_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}
