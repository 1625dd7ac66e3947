//! OAuth discovery documents
//!
//! The tollgate is an OAuth protected resource: it publishes RFC 9728
//! metadata naming its trusted authorization server, and consumes that
//! server's RFC 8414 metadata to locate the signing keys.

mod metadata;

pub use metadata::{AuthorizationServerMetadata, DiscoveryError, ProtectedResourceMetadata};
