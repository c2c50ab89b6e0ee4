//! Error types for the IRC daemon core

use thiserror::Error;

/// Main error type for the IRC daemon core
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Message parsing error: {0}")]
    MessageParse(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("User error: {0}")]
    User(String),

    #[error("Nickname already in use: {0}")]
    NickInUse(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Hook error: {0}")]
    Hook(String),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Generic error: {0}")]
    Generic(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Generic(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Generic(s)
    }
}
