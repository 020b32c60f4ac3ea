//! Transport errors

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not connected")]
    NotConnected,

    #[error("Connection closed by remote")]
    ConnectionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Router or writer task ended abnormally
    #[error("Link task failed: {0}")]
    Task(String),
}

impl Error {
    /// Check if the link is gone and must be re-established
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::NotConnected | Self::ConnectionClosed | Self::Io(_))
    }
}
