//! Postgres Frontend Messages of the extended query protocol.
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>
use bytes::Bytes;

use super::{Oid, PgFormat};
use crate::{
    Result,
    codec::{FramingError, Payload},
    common::{ByteStr, verbose},
};
#[cfg(feature = "verbose")]
use crate::ext::FmtExt;

/// A type that can be decoded from a postgres frontend message.
pub trait FrontendProtocol: Sized {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self>;
}

/// Frontend messages handled by [`PgSession`][super::PgSession].
#[derive(Debug)]
pub enum FrontendMessage {
    Parse(Parse),
    Bind(Bind),
    Describe(Describe),
    Execute(Execute),
    Close(Close),
    Sync(Sync),
    Flush(Flush),
}

macro_rules! match_frontend {
    ($($name:ident,)*) => {
        impl FrontendMessage {
            pub fn msgtype(&self) -> u8 {
                match self {
                    $(Self::$name(_) => $name::MSGTYPE,)*
                }
            }

            /// Get message name from message type.
            ///
            /// Returns `"Unknown"` for unknown message type.
            pub fn message_name(msgtype: u8) -> &'static str {
                match msgtype {
                    $($name::MSGTYPE => stringify!($name),)*
                    _ => "Unknown",
                }
            }
        }

        impl FrontendProtocol for FrontendMessage {
            fn decode(msgtype: u8, body: Bytes) -> Result<Self> {
                verbose!(message = Self::message_name(msgtype), body = %body.lossy(), "postgres request");
                let message = match msgtype {
                    $($name::MSGTYPE => Self::$name(<$name as FrontendProtocol>::decode(msgtype, body)?),)*
                    code => {
                        return Err(FramingError::UnknownCommand { dialect: "postgres", code: code.into() }.into());
                    }
                };
                Ok(message)
            }
        }
    };
}

match_frontend! {
    Parse,
    Bind,
    Describe,
    Execute,
    Close,
    Sync,
    Flush,
}

macro_rules! assert_msgtype {
    ($typ:ident) => {
        if Self::MSGTYPE != $typ {
            return Err(FramingError::UnknownCommand { dialect: "postgres", code: $typ.into() }.into());
        }
    };
}

/// `'S'` or `'P'` of Describe and Close.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Statement,
    Portal,
}

impl Target {
    fn decode(body: &mut Payload) -> Result<Target> {
        match body.get_u8()? {
            b'S' => Ok(Target::Statement),
            b'P' => Ok(Target::Portal),
            other => Err(FramingError::UnknownCommand { dialect: "postgres", code: other.into() }.into()),
        }
    }
}

/// Identifies the message as a Parse command
#[derive(Debug)]
pub struct Parse {
    /// prepared statement name (an empty string selects the unnamed prepared statement).
    pub name: ByteStr,
    /// The query string to be parsed.
    pub sql: ByteStr,
    /// Prespecified parameter types, zero leaves the type unspecified.
    pub oids: Vec<Oid>,
}

impl Parse {
    pub const MSGTYPE: u8 = b'P';
}

impl FrontendProtocol for Parse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self> {
        assert_msgtype!(msgtype);
        let mut body = Payload::new(body);
        let name = body.get_nul_bytestr()?;
        let sql = body.get_nul_bytestr()?;
        let len = body.get_u16()?;
        let mut oids = Vec::with_capacity(len.into());
        for _ in 0..len {
            oids.push(body.get_u32()?);
        }
        Ok(Self { name, sql, oids })
    }
}

/// Identifies the message as a Bind command.
#[derive(Debug)]
pub struct Bind {
    /// The name of the destination portal (an empty string selects the unnamed portal).
    pub portal: ByteStr,
    /// The name of the source prepared statement (an empty string selects the unnamed prepared statement).
    pub statement: ByteStr,
    /// Parameter format codes, see [`PgFormat::expand`].
    pub param_formats: Vec<PgFormat>,
    /// Parameter values, `None` is NULL.
    pub params: Vec<Option<Bytes>>,
    /// Result column format codes, see [`PgFormat::expand`].
    pub result_formats: Vec<PgFormat>,
}

impl Bind {
    pub const MSGTYPE: u8 = b'B';
}

fn get_formats(body: &mut Payload) -> Result<Vec<PgFormat>> {
    let len = body.get_u16()?;
    let mut formats = Vec::with_capacity(len.into());
    for _ in 0..len {
        formats.push(PgFormat::from_code(body.get_u16()?)?);
    }
    Ok(formats)
}

impl FrontendProtocol for Bind {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self> {
        assert_msgtype!(msgtype);
        let mut body = Payload::new(body);
        let portal = body.get_nul_bytestr()?;
        let statement = body.get_nul_bytestr()?;
        let param_formats = get_formats(&mut body)?;

        let len = body.get_u16()?;
        let mut params = Vec::with_capacity(len.into());
        for _ in 0..len {
            // -1 for NULL
            let size = body.get_i32()?;
            let param = match usize::try_from(size) {
                Ok(size) => Some(body.get_bytes(size)?),
                Err(_) if size == -1 => None,
                Err(_) => return Err(FramingError::BadLength(size as u64).into()),
            };
            params.push(param);
        }

        let result_formats = get_formats(&mut body)?;
        Ok(Self { portal, statement, param_formats, params, result_formats })
    }
}

/// Identifies the message as a Describe command.
#[derive(Debug)]
pub struct Describe {
    pub target: Target,
    /// The name of the prepared statement or portal to describe.
    pub name: ByteStr,
}

impl Describe {
    pub const MSGTYPE: u8 = b'D';
}

impl FrontendProtocol for Describe {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self> {
        assert_msgtype!(msgtype);
        let mut body = Payload::new(body);
        Ok(Self { target: Target::decode(&mut body)?, name: body.get_nul_bytestr()? })
    }
}

/// Identifies the message as a Execute command
#[derive(Debug)]
pub struct Execute {
    /// The name of the portal to execute (an empty string selects the unnamed portal).
    pub portal: ByteStr,
    /// Maximum number of rows to return. Zero denotes “no limit”.
    pub max_rows: u32,
}

impl Execute {
    pub const MSGTYPE: u8 = b'E';
}

impl FrontendProtocol for Execute {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self> {
        assert_msgtype!(msgtype);
        let mut body = Payload::new(body);
        Ok(Self { portal: body.get_nul_bytestr()?, max_rows: body.get_u32()? })
    }
}

/// Identifies the message as a Close command
#[derive(Debug)]
pub struct Close {
    pub target: Target,
    /// The name of the prepared statement or portal to close.
    pub name: ByteStr,
}

impl Close {
    pub const MSGTYPE: u8 = b'C';
}

impl FrontendProtocol for Close {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self> {
        assert_msgtype!(msgtype);
        let mut body = Payload::new(body);
        Ok(Self { target: Target::decode(&mut body)?, name: body.get_nul_bytestr()? })
    }
}

/// Identifies the message as a Sync command
#[derive(Debug)]
pub struct Sync;

impl Sync {
    pub const MSGTYPE: u8 = b'S';
}

impl FrontendProtocol for Sync {
    fn decode(msgtype: u8, _: Bytes) -> Result<Self> {
        assert_msgtype!(msgtype);
        Ok(Self)
    }
}

/// Identifies the message as a Flush command
#[derive(Debug)]
pub struct Flush;

impl Flush {
    pub const MSGTYPE: u8 = b'H';
}

impl FrontendProtocol for Flush {
    fn decode(msgtype: u8, _: Bytes) -> Result<Self> {
        assert_msgtype!(msgtype);
        Ok(Self)
    }
}

#[cfg(test)]
mod test {
    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::codec::BufMutExt;

    #[test]
    fn decode_parse() {
        let mut body = BytesMut::new();
        body.put_nul_string("s1");
        body.put_nul_string("select $1");
        body.put_u16(1);
        body.put_u32(23);

        let FrontendMessage::Parse(parse) = FrontendMessage::decode(b'P', body.freeze()).unwrap() else {
            panic!("expected Parse");
        };
        assert_eq!(parse.name, "s1");
        assert_eq!(parse.sql, "select $1");
        assert_eq!(parse.oids, [23]);
    }

    #[test]
    fn decode_bind() {
        let mut body = BytesMut::new();
        body.put_nul_string("");
        body.put_nul_string("s1");
        body.put_u16(1);
        body.put_u16(1);
        body.put_u16(2);
        body.put_i32(4);
        body.put_i32(42);
        body.put_i32(-1);
        body.put_u16(0);

        let FrontendMessage::Bind(bind) = FrontendMessage::decode(b'B', body.freeze()).unwrap() else {
            panic!("expected Bind");
        };
        assert_eq!(bind.portal, "");
        assert_eq!(bind.statement, "s1");
        assert_eq!(bind.param_formats, [PgFormat::Binary]);
        assert_eq!(bind.params, [Some(Bytes::from_static(&[0, 0, 0, 42])), None]);
        assert!(bind.result_formats.is_empty());
    }

    #[test]
    fn decode_others() {
        let message = FrontendMessage::decode(b'E', Bytes::from_static(b"p1\0\0\0\0\x05")).unwrap();
        assert!(matches!(message, FrontendMessage::Execute(Execute { max_rows: 5, .. })));

        let message = FrontendMessage::decode(b'D', Bytes::from_static(b"Pp1\0")).unwrap();
        assert!(matches!(message, FrontendMessage::Describe(Describe { target: Target::Portal, .. })));

        let message = FrontendMessage::decode(b'C', Bytes::from_static(b"S\0")).unwrap();
        assert!(matches!(message, FrontendMessage::Close(Close { target: Target::Statement, .. })));

        assert!(matches!(FrontendMessage::decode(b'S', Bytes::new()).unwrap(), FrontendMessage::Sync(_)));
        assert_eq!(FrontendMessage::message_name(b'H'), "Flush");
    }

    #[test]
    fn malformed() {
        // simple query is not part of the engine
        let err = FrontendMessage::decode(b'Q', Bytes::from_static(b"select 1\0")).unwrap_err();
        assert!(err.is_connection_fatal());

        let err = FrontendMessage::decode(b'D', Bytes::from_static(b"Xname\0")).unwrap_err();
        assert!(err.is_connection_fatal());

        // missing nul
        assert!(FrontendMessage::decode(b'E', Bytes::from_static(b"p1")).is_err());
        // value longer than the message
        let body = Bytes::from_static(b"\0s\0\0\0\0\x01\0\0\0\x09\0");
        assert!(FrontendMessage::decode(b'B', body).is_err());
    }
}
