//! MCP Tollgate Library
//!
//! Protected, metered, pay-per-call Model Context Protocol (MCP) tool gateway.
//!
//! # Features
//!
//! - **OAuth protected resource**: bearer JWTs verified against the issuer's
//!   JWKS, discovered through RFC 8414 metadata; 401s point clients at the
//!   RFC 9728 metadata of the exact resource they asked for
//! - **API keys**: hashed at rest, created and revoked by the treasury owner
//! - **Payment gate**: priced tools are paid from caller allowances on an
//!   ICRC-2 style ledger before they run
//! - **Treasury**: single owner, balance queries, withdrawals, ownership handover
//! - **Usage beacon**: periodic cumulative usage reports to a tracker that
//!   only accepts approved binaries
//!
//! # Protocol Version
//!
//! Implements MCP protocol versions 2024-11-05 through 2025-06-18 over
//! Streamable HTTP (JSON responses).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod auth;
pub mod beacon;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod metrics;
pub mod oauth;
pub mod payment;
pub mod principal;
pub mod protocol;
pub mod resources;
pub mod tools;
pub mod treasury;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` wins over `level`. `format` `"json"` selects JSON lines.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
    }
}
