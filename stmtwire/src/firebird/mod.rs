//! Firebird wire protocol.
//!
//! Values travel as XDR: big endian, every field padded to 4 bytes. Types of
//! parameters and output columns are described by a BLR message block, see
//! [`blr`].
mod column_type;
pub mod blr;
pub mod codec;
pub mod packet;
mod session;

pub use column_type::ColumnType;
pub use codec::{Codec, CodecContext, codec_for};
pub use packet::{Request, Response, Status};
pub use session::FirebirdSession;

/// Flag set on protocol versions negotiated by Firebird 3 and above.
pub const FB_PROTOCOL_FLAG: u32 = 0x8000;

/// Null bitmap replaces per value null indicators.
pub const PROTOCOL_VERSION13: u32 = 13;
/// Statement timeout in execute.
pub const PROTOCOL_VERSION16: u32 = 16;
/// Cursor flags in execute.
pub const PROTOCOL_VERSION18: u32 = 18;
/// Inline blob size in execute.
pub const PROTOCOL_VERSION19: u32 = 19;

/// Protocol version number without [`FB_PROTOCOL_FLAG`].
pub const fn protocol_version(raw: u32) -> u32 {
    raw & !FB_PROTOCOL_FLAG
}

pub const OP_RESPONSE: u32 = 9;
pub const OP_ALLOCATE_STATEMENT: u32 = 62;
pub const OP_EXECUTE: u32 = 63;
pub const OP_FETCH: u32 = 65;
pub const OP_FETCH_RESPONSE: u32 = 66;
pub const OP_FREE_STATEMENT: u32 = 67;
pub const OP_PREPARE_STATEMENT: u32 = 68;
pub const OP_EXECUTE2: u32 = 76;
pub const OP_SQL_RESPONSE: u32 = 78;

/// Close the cursor, keep the statement.
pub const DSQL_CLOSE: u32 = 1;
/// Drop the statement.
pub const DSQL_DROP: u32 = 2;
/// Release the prepared statement, keep the handle.
pub const DSQL_UNPREPARE: u32 = 4;

/// `op_fetch_response` status of a row.
pub const FETCH_OK: u32 = 0;
/// `op_fetch_response` status after the last row.
pub const FETCH_NO_MORE_ROWS: u32 = 100;

/// `isc_dsql_error`, generic dynamic sql error.
pub const ISC_DSQL_ERROR: u32 = 335_544_569;
