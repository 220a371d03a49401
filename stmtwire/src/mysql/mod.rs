//! MySQL binary protocol.
//!
//! Prepared statements use the binary protocol: little endian integers,
//! length encoded strings, and length prefixed temporal values.
//!
//! <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_command_phase_ps.html>
mod column_type;
pub mod codec;
pub mod packet;
mod session;

pub use column_type::{ColumnType, ParameterType};
pub use packet::{Request, write_packet};
pub use session::MySqlSession;

pub const COM_STMT_PREPARE: u8 = 0x16;
pub const COM_STMT_EXECUTE: u8 = 0x17;
pub const COM_STMT_CLOSE: u8 = 0x19;
pub const COM_STMT_RESET: u8 = 0x1a;
pub const COM_STMT_FETCH: u8 = 0x1c;

/// Execute flag asking for a read only cursor.
pub const CURSOR_TYPE_READ_ONLY: u8 = 0x01;

pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
/// A cursor is open, rows are sent on `COM_STMT_FETCH`.
pub const SERVER_STATUS_CURSOR_EXISTS: u16 = 0x0040;
/// The cursor ran out of rows.
pub const SERVER_STATUS_LAST_ROW_SENT: u16 = 0x0080;

/// Column definition flags.
pub const NOT_NULL_FLAG: u16 = 0x0001;
pub const UNSIGNED_FLAG: u16 = 0x0020;
pub const BINARY_FLAG: u16 = 0x0080;

/// `ER_UNKNOWN_STMT_HANDLER`
pub const ER_UNKNOWN_STMT_HANDLER: u16 = 1243;
/// `ER_UNKNOWN_ERROR`
pub const ER_UNKNOWN_ERROR: u16 = 1105;

/// Largest payload of one packet.
pub const MAX_PAYLOAD_LEN: usize = 0xff_ffff;
