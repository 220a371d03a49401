//! PostgreSQL and openGauss extended query protocol.
//!
//! ## Messaging Overview
//!
//! All communication is through a stream of messages. The first byte of a message identifies the message type,
//! and the next four bytes specify the length of the rest of the message (this length count includes itself,
//! but not the message-type byte).
//!
//! ```text
//! ┏━━━━┳━━━━━━━━━━━━━━━━━━━┳━━━━━━┓
//! ┃ Ty ┃       Length      ┃ Body ┃
//! ┣━━━━╋━━━━━━━━━━━━━━━━━━━╋━━━━━━┫
//! ┃ u8 ┃        u32        ┃ [u8] ┃
//! ┗━━━━┻━━━━━━━━━━━━━━━━━━━┻━━━━━━┛
//! ```
//!
//! The front end handler splits incoming messages, [`PgSession::handle`]
//! takes the type and body of one message and returns complete messages.
//!
//! ## [`Format`][PgFormat] and Format Codes
//!
//! Parameters and result columns are each transmitted in text or binary
//! format, chosen by the client in Bind.
//!
//! <https://www.postgresql.org/docs/17/protocol-overview.html>

mod pg_type;
mod pg_format;

pub mod codec;
pub mod frontend;
pub mod backend;

mod session;

pub use pg_type::{Oid, PgType};
pub use pg_format::PgFormat;

pub use frontend::{FrontendMessage, FrontendProtocol};
pub use backend::{BackendProtocol, ErrorResponse, write};
pub use session::PgSession;
