use thiserror::Error;

use crate::alert::AlertDescription;
use crate::codec::CodecError;

/// Errors surfaced by tlshake.
///
/// Every variant maps to the alert that is sent to the peer when the error
/// terminates a connection, see [`Error::alert_description`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("decode error: {0}")]
    Codec(#[from] CodecError),

    #[error("{description}: {reason}")]
    Fatal {
        description: AlertDescription,
        reason: String,
    },

    #[error("received {description} alert from peer")]
    PeerAlert { description: AlertDescription },

    #[error("crypto error: {0}")]
    CryptoError(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("connection is not established")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("{0} timeout")]
    Timeout(&'static str),
}

impl Error {
    pub fn fatal(description: AlertDescription, reason: impl Into<String>) -> Self {
        Error::Fatal {
            description,
            reason: reason.into(),
        }
    }

    pub fn unexpected_message(reason: impl Into<String>) -> Self {
        Self::fatal(AlertDescription::UnexpectedMessage, reason)
    }

    pub fn handshake_failure(reason: impl Into<String>) -> Self {
        Self::fatal(AlertDescription::HandshakeFailure, reason)
    }

    pub fn illegal_parameter(reason: impl Into<String>) -> Self {
        Self::fatal(AlertDescription::IllegalParameter, reason)
    }

    pub fn decode_error(reason: impl Into<String>) -> Self {
        Self::fatal(AlertDescription::DecodeError, reason)
    }

    pub fn internal_error(reason: impl Into<String>) -> Self {
        Self::fatal(AlertDescription::InternalError, reason)
    }

    /// The alert to send to the peer for this error.
    pub fn alert_description(&self) -> AlertDescription {
        match self {
            Error::Codec(_) => AlertDescription::DecodeError,
            Error::Fatal { description, .. } => *description,
            Error::PeerAlert { description } => *description,
            Error::CryptoError(_) => AlertDescription::InternalError,
            Error::ConfigError(_) => AlertDescription::InternalError,
            Error::NotConnected => AlertDescription::UnexpectedMessage,
            Error::ConnectionClosed => AlertDescription::CloseNotify,
            Error::Timeout(_) => AlertDescription::UserCanceled,
        }
    }
}
