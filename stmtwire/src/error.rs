//! `stmtwire` error types.
use std::{backtrace::Backtrace, fmt, io, str::Utf8Error};

use crate::{
    codec::{CodecError, DescriptorError, FramingError},
    config::ParseError,
    source::BackendError,
    statement::{LookupError, StateError},
};

/// A specialized [`Result`] type for `stmtwire` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `stmtwire` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Prefix the error message with what was being done.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Returns `true` if the connection must be closed.
    ///
    /// Everything else is scoped to the current statement and is reported to
    /// the client as an error packet.
    pub fn is_connection_fatal(&self) -> bool {
        match &self.kind {
            ErrorKind::Framing(_) | ErrorKind::Io(_) | ErrorKind::Config(_) => true,
            ErrorKind::Lookup(e) => e.is_connection_fatal(),
            _ => false,
        }
    }

    /// SQLSTATE reported to the client.
    pub fn sqlstate(&self) -> &str {
        match &self.kind {
            ErrorKind::Framing(_) => "08P01",
            ErrorKind::Descriptor(_) => "HY004",
            ErrorKind::Codec(_) | ErrorKind::Utf8(_) => "22018",
            ErrorKind::Lookup(e) => e.sqlstate(),
            ErrorKind::State(_) => "24000",
            ErrorKind::Backend(e) => e.sqlstate(),
            ErrorKind::Config(_) | ErrorKind::Io(_) => "XX000",
        }
    }

    /// Message without context and backtrace, sent to the client.
    pub fn message(&self) -> String {
        self.kind.to_string()
    }
}

/// All possible error kind from `stmtwire` library.
pub enum ErrorKind {
    /// Truncated packet or bad length prefix.
    Framing(FramingError),
    /// Unknown type tag or malformed type descriptor.
    Descriptor(DescriptorError),
    /// A value that cannot be decoded or encoded for its type.
    Codec(CodecError),
    /// Unknown statement on execute.
    Lookup(LookupError),
    /// Request not valid in the current statement state.
    State(StateError),
    /// Error reported by the sql execution collaborator.
    Backend(BackendError),
    Config(ParseError),
    Utf8(Utf8Error),
    Io(io::Error),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<FramingError>e => ErrorKind::Framing(e));
from!(<DescriptorError>e => ErrorKind::Descriptor(e));
from!(<CodecError>e => ErrorKind::Codec(e));
from!(<LookupError>e => ErrorKind::Lookup(e));
from!(<StateError>e => ErrorKind::State(e));
from!(<BackendError>e => ErrorKind::Backend(e));
from!(<ParseError>e => ErrorKind::Config(e));
from!(<Utf8Error>e => ErrorKind::Utf8(e));
from!(<io::Error>e => ErrorKind::Io(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Framing(e) => fmt::Display::fmt(e, f),
            Self::Descriptor(e) => fmt::Display::fmt(e, f),
            Self::Codec(e) => fmt::Display::fmt(e, f),
            Self::Lookup(e) => fmt::Display::fmt(e, f),
            Self::State(e) => fmt::Display::fmt(e, f),
            Self::Backend(e) => fmt::Display::fmt(e, f),
            Self::Config(e) => fmt::Display::fmt(e, f),
            Self::Utf8(e) => fmt::Display::fmt(e, f),
            Self::Io(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classification() {
        let e = Error::from(FramingError::Truncated { needed: 4, remaining: 1 });
        assert!(e.is_connection_fatal());
        assert_eq!(e.sqlstate(), "08P01");

        let e = Error::from(DescriptorError::UnknownTypeTag { tag: 99 });
        assert!(!e.is_connection_fatal());
        assert_eq!(e.sqlstate(), "HY004");

        let e = Error::from(BackendError::new("42P01", "relation does not exist"));
        assert!(!e.is_connection_fatal());
        assert_eq!(e.sqlstate(), "42P01");
        assert_eq!(e.message(), "relation does not exist");
    }

    #[test]
    fn context_is_prefixed() {
        let e = Error::from(CodecError::unsupported("DECFLOAT")).context("decode parameter 2");
        assert!(e.to_string().starts_with("decode parameter 2: "));
    }
}
