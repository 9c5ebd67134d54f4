//! Schluessel-Ableitung und Ratchet
//!
//! Aus dem Roh-Material eines Teilnehmers wird via HKDF-SHA256 der
//! AES-128-GCM Schluessel abgeleitet. Der Ratchet leitet aus dem alten
//! Material (ebenfalls HKDF) neues Material ab, das alte laesst sich daraus
//! nicht zurueckrechnen.
//!
//! ```text
//! material ──HKDF(salt, "frame-encryption-key")──▶ AES-128-GCM Key
//!    │
//!    └──HKDF(salt, "frame-ratchet")──▶ material'
//! ```

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes128Gcm, Nonce,
};
use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::{CryptoError, CryptoResult};
use crate::types::{SecretBytes, IV_LENGTH};

const ENCRYPTION_KEY_INFO: &[u8] = b"frame-encryption-key";
const RATCHET_INFO: &[u8] = b"frame-ratchet";

/// AES-128-GCM
const ENCRYPTION_KEY_LENGTH: usize = 16;

/// Laenge des geratchetten Materials
const RATCHET_MATERIAL_LENGTH: usize = 32;

/// Ein Schluessel-Satz: Ratchet-Material und der daraus abgeleitete AEAD-Schluessel
///
/// Der Cipher wird immer frisch aus `material` abgeleitet und nie getrennt
/// vom Material gespeichert.
#[derive(Clone)]
pub struct KeySet {
    material: SecretBytes,
    cipher: Aes128Gcm,
}

impl std::fmt::Debug for KeySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySet")
            .field("material", &self.material)
            .finish_non_exhaustive()
    }
}

impl KeySet {
    /// Leitet einen Schluessel-Satz aus Roh-Material ab
    pub fn derive(material: SecretBytes, salt: &[u8]) -> CryptoResult<Self> {
        if material.is_empty() {
            return Err(CryptoError::KeyDerivation(
                "Leeres Schluessel-Material".to_string(),
            ));
        }

        let key = hkdf_derive(
            material.as_bytes(),
            salt,
            ENCRYPTION_KEY_INFO,
            ENCRYPTION_KEY_LENGTH,
        )?;
        let cipher = Aes128Gcm::new_from_slice(&key)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

        Ok(Self { material, cipher })
    }

    pub fn material(&self) -> &SecretBytes {
        &self.material
    }

    /// Leitet den naechsten Schluessel-Satz der Ratchet-Kette ab
    pub fn ratchet(&self, salt: &[u8]) -> CryptoResult<Self> {
        let next = ratchet_material(&self.material, salt)?;
        Self::derive(next, salt)
    }

    pub fn encrypt(
        &self,
        iv: &[u8; IV_LENGTH],
        plaintext: &[u8],
        aad: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        self.cipher
            .encrypt(Nonce::from_slice(iv), Payload { msg: plaintext, aad })
            .map_err(|e| CryptoError::Verschluesselung(e.to_string()))
    }

    pub fn decrypt(&self, iv: &[u8], ciphertext: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
        if iv.len() != IV_LENGTH {
            return Err(CryptoError::UngueltigerFrame(format!(
                "IV-Laenge {} statt {IV_LENGTH}",
                iv.len()
            )));
        }

        self.cipher
            .decrypt(Nonce::from_slice(iv), Payload { msg: ciphertext, aad })
            .map_err(|e| CryptoError::Entschluesselung(e.to_string()))
    }
}

/// Leitet aus dem aktuellen Material das naechste Material der Ratchet-Kette ab
pub fn ratchet_material(material: &SecretBytes, salt: &[u8]) -> CryptoResult<SecretBytes> {
    if material.is_empty() {
        return Err(CryptoError::KeyDerivation(
            "Leeres Schluessel-Material".to_string(),
        ));
    }
    let next = hkdf_derive(material.as_bytes(), salt, RATCHET_INFO, RATCHET_MATERIAL_LENGTH)?;
    Ok(SecretBytes::new(next))
}

/// HKDF-basierte Key Derivation (allgemein verwendbar)
pub fn hkdf_derive(ikm: &[u8], salt: &[u8], info: &[u8], len: usize) -> CryptoResult<Vec<u8>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(okm)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_RATCHET_SALT;

    const SALT: &[u8] = DEFAULT_RATCHET_SALT.as_bytes();

    #[test]
    fn hkdf_derive_deterministisch() {
        let key1 = hkdf_derive(b"material", b"salt", b"info", 32).unwrap();
        let key2 = hkdf_derive(b"material", b"salt", b"info", 32).unwrap();
        assert_eq!(key1, key2);
        assert_eq!(key1.len(), 32);
    }

    #[test]
    fn leeres_material_wird_abgelehnt() {
        let result = KeySet::derive(SecretBytes::new(Vec::new()), SALT);
        assert!(matches!(result, Err(CryptoError::KeyDerivation(_))));
    }

    #[test]
    fn ratchet_ist_deterministisch() {
        let start = SecretBytes::new(b"passwordA".to_vec());

        let mut kette_a = Vec::new();
        let mut kette_b = Vec::new();
        let (mut a, mut b) = (start.clone(), start);
        for _ in 0..10 {
            a = ratchet_material(&a, SALT).unwrap();
            b = ratchet_material(&b, SALT).unwrap();
            kette_a.push(a.clone());
            kette_b.push(b.clone());
        }

        assert_eq!(kette_a, kette_b);
    }

    #[test]
    fn ratchet_erzeugt_eindeutige_ciphertexte() {
        let mut key_set = KeySet::derive(SecretBytes::new(b"passwordA".to_vec()), SALT).unwrap();
        let iv = [7u8; IV_LENGTH];
        let plaintext = b"gleicher Klartext fuer jeden Ratchet-Schritt";

        let mut ciphertexte = vec![key_set.encrypt(&iv, plaintext, b"").unwrap()];
        for _ in 0..10 {
            key_set = key_set.ratchet(SALT).unwrap();
            ciphertexte.push(key_set.encrypt(&iv, plaintext, b"").unwrap());
        }

        for (i, a) in ciphertexte.iter().enumerate() {
            for b in &ciphertexte[i + 1..] {
                assert_ne!(a, b, "Ratchet-Stufen muessen verschiedene Ciphertexte liefern");
            }
        }
    }

    #[test]
    fn anderes_salt_anderer_schluessel() {
        let material = SecretBytes::new(b"passwordA".to_vec());
        let a = ratchet_material(&material, b"salt-a").unwrap();
        let b = ratchet_material(&material, b"salt-b").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn encrypt_decrypt_mit_aad() {
        let key_set = KeySet::derive(SecretBytes::new(b"passwordA".to_vec()), SALT).unwrap();
        let iv = [1u8; IV_LENGTH];

        let ciphertext = key_set.encrypt(&iv, b"payload", b"header").unwrap();
        assert_eq!(ciphertext.len(), b"payload".len() + 16);
        assert_eq!(key_set.decrypt(&iv, &ciphertext, b"header").unwrap(), b"payload");

        // Manipulierte AAD muss fehlschlagen
        assert!(key_set.decrypt(&iv, &ciphertext, b"Header").is_err());
    }

    #[test]
    fn falsche_iv_laenge_ist_frame_fehler() {
        let key_set = KeySet::derive(SecretBytes::new(b"k".to_vec()), SALT).unwrap();
        let result = key_set.decrypt(&[0u8; 8], &[0u8; 32], b"");
        assert!(matches!(result, Err(CryptoError::UngueltigerFrame(_))));
    }
}
