//! E2E Verschluesselung (End-to-End) fuer Media-Frames
//!
//! Der SFU leitet Frames weiter ohne sie entschluesseln zu koennen. Nur ein
//! kleines Codec-Praefix bleibt im Klartext, damit Routing-Logik weiter
//! funktioniert.
//!
//! ## Ablauf
//! 1. Der Host setzt Schluessel-Material pro Teilnehmer (oder einen Shared Key)
//! 2. Pro Track wird ein `FrameCryptor` zwischen Encoder und Transport gehaengt
//! 3. Frames werden mit AES-128-GCM verschluesselt, der Key-Index steht im Trailer
//! 4. Der Empfaenger ratchet bei Fehlschlag bis zu `ratchet_window_size` Mal weiter

pub mod codec;
pub mod data_cryptor;
pub mod derive;
pub mod frame_cryptor;
pub mod key_ring;
pub mod rbsp;
pub mod sif_guard;
pub mod transform;

pub use codec::{find_nalu_indices, unencrypted_prefix, FrameInfo, NaluType};
pub use data_cryptor::{DataCryptor, EncryptedPacket};
pub use derive::{hkdf_derive, ratchet_material, KeySet};
pub use frame_cryptor::{FrameCryptor, FrameCryptorStats, FrameTransform};
pub use key_ring::KeyRing;
pub use sif_guard::{SifGuard, MAX_SIF_COUNT, MAX_SIF_DURATION};
