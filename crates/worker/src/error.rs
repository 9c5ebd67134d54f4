//! Fehlertypen fuer den E2EE-Worker

use framecrypt_crypto::{CryptoError, CryptorError, ErrorReason};
use thiserror::Error;

/// Fehlertyp fuer den E2EE-Worker
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Fehler aus dem Kryptografie-Subsystem
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// `setKey` / `ratchetRequest` ohne Teilnehmer bei deaktiviertem Shared Key
    #[error("Kein Teilnehmer angegeben und Shared Key deaktiviert")]
    KeinTeilnehmer,

    /// Ungueltige Konfiguration (Datei oder Init-Nachricht)
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    /// Worker-Task laeuft nicht mehr
    #[error("Worker beendet")]
    WorkerBeendet,
}

pub type WorkerResult<T> = Result<T, WorkerError>;

impl WorkerError {
    pub fn reason(&self) -> ErrorReason {
        match self {
            Self::Crypto(e) => e.reason(),
            Self::KeinTeilnehmer | Self::Konfiguration(_) | Self::WorkerBeendet => {
                ErrorReason::InternalError
            }
        }
    }

    /// Fehler-Payload fuer das Fehler-Event an den Host
    pub fn to_cryptor_error(&self, participant_identity: Option<String>) -> CryptorError {
        match self {
            Self::Crypto(e) => CryptorError::from_crypto(e, participant_identity),
            other => CryptorError {
                reason: other.reason(),
                message: other.to_string(),
                participant_identity,
            },
        }
    }
}
