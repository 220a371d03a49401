//! Binary prepared statement and cursor wire protocol engine.
//!
//! The engine sits in a database proxy between client connections and the
//! sql execution layer. It decodes execute and fetch packets of Firebird,
//! MySQL and PostgreSQL, tracks statement and cursor lifecycle per connection,
//! and streams result rows back in bounded batches.
//!
//! # Examples
//!
//! ```no_run
//! use stmtwire::{Engine, firebird::FirebirdSession};
//!
//! # async fn app(backend: impl stmtwire::source::Backend, packet: bytes::Bytes) -> stmtwire::Result<()> {
//! let engine = Engine::from_env();
//!
//! // one session per accepted client connection
//! let mut session = FirebirdSession::new(engine.accept(), backend);
//!
//! // decode a framed request, reply with the returned bytes
//! let reply = session.handle(packet).await?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

pub mod common;
mod ext;

// Encoding
pub mod codec;
pub mod value;
pub mod temporal;

// Collaborator
pub mod source;
pub mod pool;

// Component
pub mod statement;
pub mod registry;
pub mod fetch;

// Dialect
pub mod firebird;
pub mod mysql;
pub mod postgres;

// Root
pub mod engine;
pub mod config;

mod error;


pub use value::{Value, ValueKind};
pub use statement::{ConnectionId, StatementId};
pub use registry::ConnectionRegistry;
pub use engine::{Engine, Connection};
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
