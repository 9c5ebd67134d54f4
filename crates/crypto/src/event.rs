//! Ereignisse aus KeyRing und FrameCryptor an den Worker

use tokio::sync::mpsc;

use crate::error::CryptorError;
use crate::types::SecretBytes;

/// Sender fuer Cryptor-Ereignisse (unbounded, Frames duerfen nie blockieren)
pub type CryptorEventSender = mpsc::UnboundedSender<CryptorEvent>;

#[derive(Debug, Clone)]
pub enum CryptorEvent {
    /// Ein Frame konnte nicht ver- oder entschluesselt werden
    Error {
        track_id: Option<String>,
        error: CryptorError,
    },
    /// Ein Schluessel wurde weitergeratchet (Host soll das Material uebernehmen)
    KeyRatcheted {
        participant_identity: String,
        key_index: usize,
        material: SecretBytes,
    },
}

/// Sendet ein Ereignis, falls ein Empfaenger registriert ist
pub(crate) fn emit(sender: Option<&CryptorEventSender>, event: CryptorEvent) {
    if let Some(tx) = sender {
        if tx.send(event).is_err() {
            tracing::debug!("Cryptor-Ereignis verworfen, Empfaenger geschlossen");
        }
    }
}
