//! Provider protocol over JSON-RPC 2.0.
//!
//! `protocol` holds the wire contract, `server` and `client` adapt a local
//! [`switchboard_core::Provider`] to and from that contract, `transport`
//! moves envelopes, and `runtime` manages named providers on the runner side.

pub mod client;
pub mod protocol;
pub mod runtime;
pub mod server;
pub mod transport;

#[cfg(test)]
mod fixture;

pub use client::ProviderRpcClient;
pub use protocol::{ProviderErrorExt, MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE, PROTOCOL_VERSION};
pub use runtime::{ProviderRuntime, ProviderStatus, RuntimeError};
pub use server::{check_magic_cookie, Connection, ProviderRpcServer, ProviderState};
pub use transport::{LocalTransport, StreamTransport, Transport};
