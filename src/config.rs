use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::str::FromStr;

/// PEM certificate chain and private key for the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Server settings, read from `BEMANNING_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    pub tls: Option<TlsFiles>,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "bemanning".into(),
            max_connections: 256,
            compact_threshold: 1000,
            tls: None,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> io::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup. Unparsable numbers fall back to
    /// defaults. A TLS cert without a key (or the reverse) is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> io::Result<Self> {
        let defaults = Self::default();

        let tls = match (lookup("BEMANNING_TLS_CERT"), lookup("BEMANNING_TLS_KEY")) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some(TlsFiles {
                cert: cert.into(),
                key: key.into(),
            }),
            _ => {
                return Err(io::Error::new(
                    ErrorKind::InvalidInput,
                    "both BEMANNING_TLS_CERT and BEMANNING_TLS_KEY must be set, or neither",
                ));
            }
        };

        Ok(Self {
            bind: lookup("BEMANNING_BIND").unwrap_or(defaults.bind),
            port: parsed(&lookup, "BEMANNING_PORT").unwrap_or(defaults.port),
            data_dir: lookup("BEMANNING_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            password: lookup("BEMANNING_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(&lookup, "BEMANNING_MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "BEMANNING_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            tls,
            metrics_port: parsed(&lookup, "BEMANNING_METRICS_PORT"),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}
