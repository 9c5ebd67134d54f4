//! # framecrypt-crypto
//!
//! Ende-zu-Ende Verschluesselung kodierter Media-Frames (Insertable Streams).
//!
//! ## Module
//! - `e2e` - KeyRing, FrameCryptor, Transform-Pipe, DataCryptor
//! - `event` - Ereignisse an den Worker (Fehler, geratchette Schluessel)
//! - `types` - Gemeinsame Typen (KeyRingOptions, EncodedFrame, VideoCodec, etc.)
//! - `error` - Fehlertypen und Fehler-Taxonomie

pub mod e2e;
pub mod error;
pub mod event;
pub mod types;

// Bequeme Re-Exports
pub use error::{CryptoError, CryptoResult, CryptorError, ErrorReason};
pub use event::{CryptorEvent, CryptorEventSender};
pub use types::{
    EncodedFrame, FrameKind, FrameMetadata, KeyRingOptions, SecretBytes, TransformDirection,
    VideoCodec,
};

pub use e2e::{
    DataCryptor, EncryptedPacket, FrameCryptor, FrameCryptorStats, FrameTransform, KeyRing,
    KeySet, SifGuard,
};
