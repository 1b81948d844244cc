//! Client implementations for talking to a running server.
mod client;
pub use client::Client;
