//! DataCryptor – Verschluesselung von Data-Channel-Payloads
//!
//! Im Gegensatz zu Media-Frames gibt es kein Klartext-Praefix und keinen
//! Trailer: IV und Key-Index werden separat uebertragen. Kein Ratchet, der
//! Aufrufer muss den richtigen Key-Index kennen.

use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::e2e::key_ring::KeyRing;
use crate::error::{CryptoError, CryptoResult};
use crate::types::IV_LENGTH;

/// Verschluesseltes Data-Channel-Paket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPacket {
    pub payload: Vec<u8>,
    pub iv: [u8; IV_LENGTH],
    pub key_index: u8,
}

#[derive(Debug, Default)]
pub struct DataCryptor {
    send_count: AtomicU32,
}

impl DataCryptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// IV: Zufall (4) | Zeitstempel in ms (4) | Sendezaehler mod 0xFFFF (4)
    fn make_iv(&self) -> [u8; IV_LENGTH] {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u32)
            .unwrap_or_default();
        let count = self.send_count.fetch_add(1, Ordering::Relaxed);

        let mut iv = [0u8; IV_LENGTH];
        iv[0..4].copy_from_slice(&OsRng.next_u32().to_be_bytes());
        iv[4..8].copy_from_slice(&timestamp.to_be_bytes());
        iv[8..12].copy_from_slice(&(count % 0xFFFF).to_be_bytes());
        iv
    }

    /// Verschluesselt mit dem aktuellen Schluessel des KeyRings
    pub fn encrypt(&self, data: &[u8], keys: &KeyRing) -> CryptoResult<EncryptedPacket> {
        let key_index = keys.current_key_index();
        let key_set = keys.get_key_set(Some(key_index)).ok_or_else(|| CryptoError::MissingKey {
            participant: keys.participant_identity().to_string(),
            key_index,
        })?;

        let iv = self.make_iv();
        let payload = key_set.encrypt(&iv, data, &[])?;

        Ok(EncryptedPacket {
            payload,
            iv,
            key_index: key_index as u8,
        })
    }

    /// Entschluesselt mit dem Schluessel an `key_index` (aktueller falls `None`)
    pub fn decrypt(
        &self,
        data: &[u8],
        iv: &[u8],
        keys: &KeyRing,
        key_index: Option<usize>,
    ) -> CryptoResult<Vec<u8>> {
        let index = key_index.unwrap_or_else(|| keys.current_key_index()) % keys.keyring_size();
        let key_set = keys.get_key_set(Some(index)).ok_or_else(|| CryptoError::MissingKey {
            participant: keys.participant_identity().to_string(),
            key_index: index,
        })?;

        key_set.decrypt(iv, data, &[]).map_err(|e| match e {
            CryptoError::Entschluesselung(grund) => CryptoError::InvalidKey {
                participant: keys.participant_identity().to_string(),
                grund,
            },
            other => other,
        })
    }
}
