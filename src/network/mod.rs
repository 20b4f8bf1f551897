//! The network boundary: challenge-response authentication, per-recipient RSA transport
//! wrapping, capability negotiation, the abstract request/response protocol, and the
//! server-/client-side adapters that implement it over a local `Cas`.

pub mod auth;
pub mod capabilities;
pub mod client;
pub mod envelope;
pub mod protocol;
pub mod rsa_wrap;
pub mod server;

pub use auth::AuthService;
pub use capabilities::Capabilities;
pub use client::{ClientCasAdapter, Transport};
pub use rsa_wrap::NetworkEncryptedEntry;
pub use server::ServerCasAdapter;
