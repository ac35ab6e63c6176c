//! Alert protocol.
//!
//! An alert is exactly two bytes: level and description. Descriptions follow the
//! IANA TLS Alert Registry; each carries a flag telling whether it only makes
//! sense while a handshake is in progress.

use std::fmt;

use crate::buffer::Buf;
use crate::codec::{CodecError, Reader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Warning,
    Fatal,
    Unknown(u8),
}

impl AlertLevel {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => AlertLevel::Warning,
            2 => AlertLevel::Fatal,
            _ => AlertLevel::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            AlertLevel::Warning => 1,
            AlertLevel::Fatal => 2,
            AlertLevel::Unknown(value) => *value,
        }
    }
}

macro_rules! alert_descriptions {
    ($( $variant:ident = $code:literal, $name:literal, $hs_only:literal; )*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum AlertDescription {
            $( $variant, )*
            Unknown(u8),
        }

        impl AlertDescription {
            pub fn from_u8(value: u8) -> Self {
                match value {
                    $( $code => AlertDescription::$variant, )*
                    _ => AlertDescription::Unknown(value),
                }
            }

            pub fn as_u8(&self) -> u8 {
                match self {
                    $( AlertDescription::$variant => $code, )*
                    AlertDescription::Unknown(value) => *value,
                }
            }

            /// Registry name, e.g. `handshake_failure`.
            pub fn name(&self) -> &'static str {
                match self {
                    $( AlertDescription::$variant => $name, )*
                    AlertDescription::Unknown(_) => "unknown_alert",
                }
            }

            /// Whether this alert is only meaningful during a handshake.
            pub fn is_handshake_only(&self) -> bool {
                match self {
                    $( AlertDescription::$variant => $hs_only, )*
                    AlertDescription::Unknown(_) => false,
                }
            }
        }
    };
}

alert_descriptions! {
    CloseNotify = 0, "close_notify", false;
    UnexpectedMessage = 10, "unexpected_message", false;
    BadRecordMac = 20, "bad_record_mac", false;
    DecryptionFailed = 21, "decryption_failed", false;
    RecordOverflow = 22, "record_overflow", false;
    DecompressionFailure = 30, "decompression_failure", false;
    HandshakeFailure = 40, "handshake_failure", true;
    NoCertificate = 41, "no_certificate", true;
    BadCertificate = 42, "bad_certificate", true;
    UnsupportedCertificate = 43, "unsupported_certificate", true;
    CertificateRevoked = 44, "certificate_revoked", true;
    CertificateExpired = 45, "certificate_expired", true;
    CertificateUnknown = 46, "certificate_unknown", true;
    IllegalParameter = 47, "illegal_parameter", true;
    UnknownCa = 48, "unknown_ca", true;
    AccessDenied = 49, "access_denied", true;
    DecodeError = 50, "decode_error", true;
    DecryptError = 51, "decrypt_error", true;
    ExportRestriction = 60, "export_restriction", true;
    ProtocolVersion = 70, "protocol_version", true;
    InsufficientSecurity = 71, "insufficient_security", true;
    InternalError = 80, "internal_error", false;
    InappropriateFallback = 86, "inappropriate_fallback", false;
    UserCanceled = 90, "user_canceled", false;
    NoRenegotiation = 100, "no_renegotiation", true;
    MissingExtension = 109, "missing_extension", true;
    UnsupportedExtension = 110, "unsupported_extension", true;
    CertificateUnobtainable = 111, "certificate_unobtainable", true;
    UnrecognizedName = 112, "unrecognized_name", true;
    BadCertificateStatusResponse = 113, "bad_certificate_status_response", true;
    BadCertificateHashValue = 114, "bad_certificate_hash_value", true;
    UnknownPskIdentity = 115, "unknown_psk_identity", true;
    CertificateRequired = 116, "certificate_required", true;
    NoApplicationProtocol = 120, "no_application_protocol", true;
}

impl fmt::Display for AlertDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertDescription::Unknown(v) => write!(f, "unknown_alert({})", v),
            _ => f.write_str(self.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alert {
    pub level: AlertLevel,
    pub description: AlertDescription,
}

impl Alert {
    pub fn fatal(description: AlertDescription) -> Self {
        Alert {
            level: AlertLevel::Fatal,
            description,
        }
    }

    pub fn warning(description: AlertDescription) -> Self {
        Alert {
            level: AlertLevel::Warning,
            description,
        }
    }

    /// Parse an alert record body, which must be exactly two bytes.
    pub fn parse(input: &[u8]) -> Result<Alert, CodecError> {
        let mut r = Reader::new(input);
        let level = AlertLevel::from_u8(r.u8()?);
        let description = AlertDescription::from_u8(r.u8()?);
        r.finish()?;
        Ok(Alert { level, description })
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.push(self.level.as_u8());
        output.push(self.description.as_u8());
    }
}
