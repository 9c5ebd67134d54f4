//! Fehlertypen fuer das Frame-Kryptografie-Subsystem
//!
//! Jeder Fehler laesst sich auf eine der drei Kategorien aus [`ErrorReason`]
//! abbilden. Nur diese Kategorie (plus Nachricht) verlaesst den Worker als
//! Fehler-Event.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::VideoCodec;

/// Fehler im Kryptografie-Subsystem
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Kein Schluessel fuer Teilnehmer '{participant}' an Index {key_index}")]
    MissingKey { participant: String, key_index: usize },

    #[error("Kein gueltiger Schluessel fuer Teilnehmer '{participant}': {grund}")]
    InvalidKey { participant: String, grund: String },

    #[error("Codec {0} wird fuer E2EE nicht unterstuetzt")]
    NichtUnterstuetzterCodec(VideoCodec),

    #[error("Ungueltige KeyRing-Konfiguration: {0}")]
    UngueltigeKonfiguration(String),

    #[error("Ungueltiger Frame: {0}")]
    UngueltigerFrame(String),

    #[error("Verschluesselung fehlgeschlagen: {0}")]
    Verschluesselung(String),

    #[error("Entschluesselung fehlgeschlagen: {0}")]
    Entschluesselung(String),

    #[error("Key Derivation fehlgeschlagen: {0}")]
    KeyDerivation(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

impl CryptoError {
    /// Kategorie des Fehlers fuer das Fehler-Event an den Host
    pub fn reason(&self) -> ErrorReason {
        match self {
            Self::MissingKey { .. } => ErrorReason::MissingKey,
            Self::InvalidKey { .. } | Self::NichtUnterstuetzterCodec(_) => ErrorReason::InvalidKey,
            Self::UngueltigeKonfiguration(_)
            | Self::UngueltigerFrame(_)
            | Self::Verschluesselung(_)
            | Self::Entschluesselung(_)
            | Self::KeyDerivation(_) => ErrorReason::InternalError,
        }
    }
}

/// Fehler-Taxonomie des FrameCryptors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorReason {
    MissingKey,
    InvalidKey,
    InternalError,
}

impl std::fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorReason::MissingKey => write!(f, "MissingKey"),
            ErrorReason::InvalidKey => write!(f, "InvalidKey"),
            ErrorReason::InternalError => write!(f, "InternalError"),
        }
    }
}

/// Fehler-Payload wie er an den Host gemeldet wird
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptorError {
    pub reason: ErrorReason,
    pub message: String,
    pub participant_identity: Option<String>,
}

impl CryptorError {
    pub fn from_crypto(error: &CryptoError, participant_identity: Option<String>) -> Self {
        Self {
            reason: error.reason(),
            message: error.to_string(),
            participant_identity,
        }
    }
}

impl std::fmt::Display for CryptorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_kategorien() {
        let missing = CryptoError::MissingKey {
            participant: "alice".into(),
            key_index: 3,
        };
        assert_eq!(missing.reason(), ErrorReason::MissingKey);
        assert_eq!(
            CryptoError::NichtUnterstuetzterCodec(VideoCodec::Av1).reason(),
            ErrorReason::InvalidKey
        );
        assert_eq!(
            CryptoError::UngueltigerFrame("zu kurz".into()).reason(),
            ErrorReason::InternalError
        );
        assert_eq!(
            CryptoError::KeyDerivation("leer".into()).reason(),
            ErrorReason::InternalError
        );
    }

    #[test]
    fn cryptor_error_anzeige() {
        let e = CryptoError::MissingKey {
            participant: "bob".into(),
            key_index: 0,
        };
        let event = CryptorError::from_crypto(&e, Some("bob".into()));
        assert_eq!(event.reason, ErrorReason::MissingKey);
        assert!(event.to_string().starts_with("MissingKey: "));
        assert!(event.message.contains("Index 0"));
    }
}
