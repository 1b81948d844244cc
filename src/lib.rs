//! An in-memory key/value server speaking RESP.
//!
//! The keyspace holds strings, lists and streams. Commands are the usual
//! Redis shapes: `GET`/`SET` with expiration, `RPUSH`/`LPUSH`/`LRANGE`/
//! `LPOP`/`LLEN`/`BLPOP` over lists, and `XADD`/`XRANGE`/`XREAD` over
//! append-only streams with ordered `(ms, seq)` identifiers.

mod parse;
mod waiters;

pub mod clients;
pub mod cmd;
pub mod connection;
pub mod db;
pub mod error;
pub mod frame;
pub mod server;
pub mod stream;

pub use clients::Client;
pub use cmd::CommandVariant;
pub use connection::{Connection, ConnectionStream};
pub(crate) use db::Db;
pub use error::Error;
pub use frame::Frame;
pub(crate) use server::ShutdownSignal;

pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_HOST: &str = "0.0.0.0";

pub type Result<T> = std::result::Result<T, Error>;
