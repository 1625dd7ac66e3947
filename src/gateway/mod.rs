//! Gateway server implementation

mod admin;
mod router;
mod rpc;
mod server;

pub use router::{AppState, Limits, create_router};
pub use server::Gateway;
