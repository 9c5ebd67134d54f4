//! Gemeinsame Typen fuer das Kryptografie-Subsystem

use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, CryptoResult};

/// Laenge des AES-GCM IV im Frame-Trailer
pub const IV_LENGTH: usize = 12;

/// Laenge des Trailers hinter dem IV: [iv_laenge(1)] [key_index(1)]
pub const FRAME_TRAILER_LENGTH: usize = 2;

pub const DEFAULT_RATCHET_SALT: &str = "LKFrameEncryptionKey";
pub const DEFAULT_RATCHET_WINDOW_SIZE: u32 = 8;
pub const DEFAULT_FAILURE_TOLERANCE: i32 = 10;
pub const DEFAULT_KEYRING_SIZE: usize = 16;

/// Obergrenze der KeyRing-Groesse (der Key-Index passt in ein Byte)
pub const MAX_KEYRING_SIZE: usize = 256;

/// Sicherer Schluessel-Container (wird beim Drop genullt)
#[derive(Clone, PartialEq, Eq)]
pub struct SecretBytes(pub Vec<u8>);

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes([REDACTED] {} bytes)", self.0.len())
    }
}

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for SecretBytes {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

// ---------------------------------------------------------------------------
// KeyRingOptions
// ---------------------------------------------------------------------------

/// Konfiguration eines KeyRings
///
/// - `ratchet_window_size = 0` deaktiviert das Ratcheting beim Entschluesseln
/// - `failure_tolerance = -1` markiert einen Schluessel nie als ungueltig
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyRingOptions {
    /// Ein gemeinsamer Schluessel fuer alle Teilnehmer
    pub shared_key: bool,
    /// Salt fuer Key-Ableitung und Ratchet
    pub ratchet_salt: String,
    /// Maximale Anzahl Ratchet-Versuche pro Frame
    pub ratchet_window_size: u32,
    /// Anzahl tolerierter Entschluesselungsfehler pro Key-Index
    pub failure_tolerance: i32,
    /// Anzahl der Slots im KeyRing (1..=256)
    pub keyring_size: usize,
}

impl Default for KeyRingOptions {
    fn default() -> Self {
        Self {
            shared_key: false,
            ratchet_salt: DEFAULT_RATCHET_SALT.into(),
            ratchet_window_size: DEFAULT_RATCHET_WINDOW_SIZE,
            failure_tolerance: DEFAULT_FAILURE_TOLERANCE,
            keyring_size: DEFAULT_KEYRING_SIZE,
        }
    }
}

impl KeyRingOptions {
    pub fn validate(&self) -> CryptoResult<()> {
        if self.keyring_size == 0 || self.keyring_size > MAX_KEYRING_SIZE {
            return Err(CryptoError::UngueltigeKonfiguration(format!(
                "keyring_size muss zwischen 1 und {MAX_KEYRING_SIZE} liegen, erhalten {}",
                self.keyring_size
            )));
        }
        if self.failure_tolerance < -1 {
            return Err(CryptoError::UngueltigeKonfiguration(format!(
                "failure_tolerance muss >= -1 sein, erhalten {}",
                self.failure_tolerance
            )));
        }
        Ok(())
    }

    pub fn ratchet_salt_bytes(&self) -> &[u8] {
        self.ratchet_salt.as_bytes()
    }
}

// ---------------------------------------------------------------------------
// Codecs und Frames
// ---------------------------------------------------------------------------

/// Video-Codec eines Tracks (Hinweis fuer die Praefix-Erkennung)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    Vp8,
    Vp9,
    H264,
    Av1,
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoCodec::Vp8 => write!(f, "vp8"),
            VideoCodec::Vp9 => write!(f, "vp9"),
            VideoCodec::H264 => write!(f, "h264"),
            VideoCodec::Av1 => write!(f, "av1"),
        }
    }
}

impl std::str::FromStr for VideoCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vp8" => Ok(Self::Vp8),
            "vp9" => Ok(Self::Vp9),
            "h264" => Ok(Self::H264),
            "av1" => Ok(Self::Av1),
            other => Err(format!("Unbekannter Video-Codec: '{}'", other)),
        }
    }
}

impl VideoCodec {
    /// Liest den Codec aus einem MIME-Typ wie `video/VP8`
    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        let (art, codec) = mime_type.split_once('/')?;
        if !art.eq_ignore_ascii_case("video") {
            return None;
        }
        codec.parse().ok()
    }
}

/// Art eines kodierten Frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    /// Video-Keyframe
    Key,
    /// Video-Delta-Frame
    Delta,
    /// Leerer Video-Frame
    Empty,
    /// Audio-Frame (Opus)
    Audio,
}

impl FrameKind {
    /// Unverschluesselte Bytes am Frame-Anfang ohne Codec-spezifische Analyse
    ///
    /// VP8: Keyframe-Header 10 Bytes, Delta-Header 3 Bytes. Opus: TOC-Byte.
    pub fn unencrypted_bytes(&self) -> usize {
        match self {
            FrameKind::Key => 10,
            FrameKind::Delta => 3,
            FrameKind::Audio => 1,
            FrameKind::Empty => 0,
        }
    }

    pub fn is_video(&self) -> bool {
        !matches!(self, FrameKind::Audio)
    }
}

/// RTP-Metadaten eines Frames
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Synchronization Source
    pub ssrc: u32,
    /// RTP Payload-Type (fuer die RTP-Map)
    pub payload_type: Option<u8>,
    /// MIME-Typ, falls vom Encoder geliefert (z.B. `video/H264`)
    pub mime_type: Option<String>,
}

/// Ein kodierter Media-Frame im Transform-Pipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub data: Vec<u8>,
    pub kind: FrameKind,
    /// RTP-Zeitstempel
    pub timestamp: u32,
    pub metadata: FrameMetadata,
}

impl EncodedFrame {
    pub fn new(data: Vec<u8>, kind: FrameKind, timestamp: u32, ssrc: u32) -> Self {
        Self {
            data,
            kind,
            timestamp,
            metadata: FrameMetadata {
                ssrc,
                ..FrameMetadata::default()
            },
        }
    }

    pub fn with_payload_type(mut self, payload_type: u8) -> Self {
        self.metadata.payload_type = Some(payload_type);
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.metadata.mime_type = Some(mime_type.into());
        self
    }
}

/// Richtung eines Transform-Pipes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformDirection {
    Encode,
    Decode,
}

impl std::fmt::Display for TransformDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformDirection::Encode => write!(f, "encode"),
            TransformDirection::Decode => write!(f, "decode"),
        }
    }
}
