//! Engine configuration.
use std::{borrow::Cow, env::var, fmt, str::FromStr};

use crate::codec::Charset;

/// Engine configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub(crate) fetch_size: u32,
    pub(crate) charset: Charset,
    pub(crate) firebird_protocol: u32,
    pub(crate) blob_buffer_size: usize,
    pub(crate) blob_pool_capacity: usize,
    pub(crate) max_blob_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fetch_size: 200,
            charset: Charset::Utf8,
            firebird_protocol: 19,
            blob_buffer_size: 8 * 1024,
            blob_pool_capacity: 64,
            max_blob_size: 16 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Retrieve configuration from environment variable.
    ///
    /// It reads:
    /// - `STMTWIRE_FETCH_SIZE`
    /// - `STMTWIRE_CHARSET`
    /// - `STMTWIRE_FB_PROTOCOL`
    /// - `STMTWIRE_BLOB_BUFFER`
    /// - `STMTWIRE_BLOB_POOL`
    /// - `STMTWIRE_MAX_BLOB`
    ///
    /// Additionally, it also read `DATABASE_CONFIG` as a query string to
    /// provide missing value from previous variables before fallback to
    /// default value. Invalid values fallback as well.
    pub fn from_env() -> Config {
        let base = var("DATABASE_CONFIG")
            .ok()
            .and_then(|e| Config::parse(&e).ok())
            .unwrap_or_default();

        macro_rules! env {
            ($name:literal,$field:ident) => {
                var($name)
                    .ok()
                    .and_then(|e| parse_value(stringify!($field), &e).ok())
                    .unwrap_or(base.$field)
            };
        }

        Self {
            fetch_size: env!("STMTWIRE_FETCH_SIZE", fetch_size),
            charset: var("STMTWIRE_CHARSET")
                .ok()
                .and_then(|e| Charset::from_name(&e))
                .unwrap_or(base.charset),
            firebird_protocol: env!("STMTWIRE_FB_PROTOCOL", firebird_protocol),
            blob_buffer_size: env!("STMTWIRE_BLOB_BUFFER", blob_buffer_size),
            blob_pool_capacity: env!("STMTWIRE_BLOB_POOL", blob_pool_capacity),
            max_blob_size: env!("STMTWIRE_MAX_BLOB", max_blob_size),
        }
    }

    /// Parse config from query string, e.g. `fetch_size=100&charset=latin1`.
    ///
    /// Missing keys keep their default value.
    pub fn parse(query: &str) -> Result<Config, ParseError> {
        let mut me = Config::default();

        for pair in query.split('&').filter(|e| !e.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(ParseError::new(format!("missing value of `{pair}`")));
            };
            match key {
                "fetch_size" => me.fetch_size = parse_value(key, value)?,
                "firebird_protocol" => me.firebird_protocol = parse_value(key, value)?,
                "blob_buffer_size" => me.blob_buffer_size = parse_value(key, value)?,
                "blob_pool_capacity" => me.blob_pool_capacity = parse_value(key, value)?,
                "max_blob_size" => me.max_blob_size = parse_value(key, value)?,
                "charset" => {
                    me.charset = Charset::from_name(value)
                        .ok_or_else(|| ParseError::new(format!("unknown charset `{value}`")))?
                }
                _ => return Err(ParseError::new(format!("unknown key `{key}`"))),
            }
        }

        Ok(me)
    }

    /// Default batch size when a client fetches 0 rows.
    pub fn fetch_size(mut self, fetch_size: u32) -> Self {
        self.fetch_size = fetch_size;
        self
    }

    /// Character set of text when the client did not declare one.
    pub fn charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    /// Firebird protocol version assumed until the handshake negotiates one.
    pub fn firebird_protocol(mut self, version: u32) -> Self {
        self.firebird_protocol = version;
        self
    }

    /// Initial capacity of pooled BLOB staging buffers.
    pub fn blob_buffer_size(mut self, size: usize) -> Self {
        self.blob_buffer_size = size;
        self
    }

    /// Number of idle BLOB staging buffers kept.
    pub fn blob_pool_capacity(mut self, capacity: usize) -> Self {
        self.blob_pool_capacity = capacity;
        self
    }

    /// Largest BLOB accepted as parameter.
    pub fn max_blob_size(mut self, size: usize) -> Self {
        self.max_blob_size = size;
        self
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ParseError> {
    value
        .trim()
        .parse()
        .map_err(|_| ParseError::new(format!("invalid value of `{key}`: `{value}`")))
}

impl FromStr for Config {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Error when parsing config.
pub struct ParseError {
    reason: Cow<'static, str>,
}

impl ParseError {
    fn new(reason: impl Into<Cow<'static, str>>) -> Self {
        Self { reason: reason.into() }
    }
}

impl std::error::Error for ParseError { }

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            return f.write_str(&self.reason)
        }
        write!(f, "failed to parse config: {}", self.reason)
    }
}

impl fmt::Debug for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_query() {
        let config: Config = "fetch_size=50&charset=latin1&max_blob_size=1024".parse().unwrap();
        assert_eq!(config.fetch_size, 50);
        assert_eq!(config.charset, Charset::Latin1);
        assert_eq!(config.max_blob_size, 1024);
        assert_eq!(config.firebird_protocol, 19);
    }

    #[test]
    fn parse_errors() {
        assert!(Config::parse("fetch_size=-1").is_err());
        assert!(Config::parse("fetch_size").is_err());
        assert!(Config::parse("charset=klingon").is_err());
        let err = Config::parse("color=red").unwrap_err();
        assert_eq!(format!("{err:#}"), "unknown key `color`");
        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[test]
    fn builder() {
        let config = Config::default().fetch_size(10).firebird_protocol(16).charset(Charset::Ascii);
        assert_eq!((config.fetch_size, config.firebird_protocol), (10, 16));
        assert_eq!(config.charset, Charset::Ascii);
    }
}
