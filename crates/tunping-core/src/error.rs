use std::io;

/// Error type for tunping operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Tunnel instance missing, not started or already closed
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// Malformed `network:address` destination
    #[error("invalid destination {input:?}: {reason}")]
    AddressParse { input: String, reason: String },
    /// Tunnel could not be launched or started
    #[error("{0}")]
    TunnelStart(String),
    /// Probe client could not be built
    #[error("{0}")]
    ClientConstruction(String),
    /// Tunnel failed to open an outbound connection
    #[error("dial {destination} failed: {reason}")]
    Dial { destination: String, reason: String },
    /// HTTP request failed
    #[error("{0}")]
    Request(String),
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for tunping operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn address(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::AddressParse {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

/// Flattens an error and its `source()` chain into one line, `outer: inner: root`.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        // hyper and reqwest often repeat the inner message verbatim
        if !message.ends_with(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Request(error_chain(&err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
