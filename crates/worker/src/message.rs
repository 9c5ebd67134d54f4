//! Nachrichten zwischen Host und E2EE-Worker
//!
//! - [`WorkerMessage`]: Host -> Worker (Control-Kanal)
//! - [`WorkerEvent`]: Worker -> Host (serialisierbar, Binaerdaten als Base64)

use framecrypt_crypto::{
    CryptorError, CryptorEvent, EncodedFrame, KeyRingOptions, SecretBytes, VideoCodec,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Endpunkte eines Tracks fuer `encode` / `decode`
#[derive(Debug)]
pub struct TransformSetup {
    pub participant_identity: String,
    pub track_id: String,
    /// Eingehende Frames (vom Encoder bzw. aus dem Transport)
    pub readable: mpsc::Receiver<EncodedFrame>,
    /// Ausgehende Frames (zum Transport bzw. zum Decoder)
    pub writable: mpsc::Sender<EncodedFrame>,
    pub codec: Option<VideoCodec>,
}

/// Eingehende Nachricht auf dem Control-Kanal
#[derive(Debug)]
pub enum WorkerMessage {
    Init {
        options: KeyRingOptions,
    },
    Enable {
        participant_identity: String,
        enabled: bool,
    },
    SetKey {
        /// Ohne Teilnehmer nur im Shared-Key-Modus erlaubt
        participant_identity: Option<String>,
        key: Vec<u8>,
        key_index: Option<usize>,
    },
    RatchetRequest {
        participant_identity: Option<String>,
        key_index: Option<usize>,
    },
    Encode(TransformSetup),
    Decode(TransformSetup),
    RemoveTransform {
        participant_identity: String,
        track_id: String,
    },
    UpdateCodec {
        participant_identity: String,
        track_id: String,
        codec: VideoCodec,
    },
    SetRtpMap {
        participant_identity: String,
        map: HashMap<u8, VideoCodec>,
    },
    SetSifTrailer {
        trailer: Vec<u8>,
    },
    EncryptDataRequest {
        request_id: Uuid,
        participant_identity: String,
        payload: Vec<u8>,
    },
    DecryptDataRequest {
        request_id: Uuid,
        participant_identity: String,
        payload: Vec<u8>,
        iv: Vec<u8>,
        key_index: Option<usize>,
    },
}

impl WorkerMessage {
    /// Name der Nachricht fuer Logs
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerMessage::Init { .. } => "init",
            WorkerMessage::Enable { .. } => "enable",
            WorkerMessage::SetKey { .. } => "setKey",
            WorkerMessage::RatchetRequest { .. } => "ratchetRequest",
            WorkerMessage::Encode(_) => "encode",
            WorkerMessage::Decode(_) => "decode",
            WorkerMessage::RemoveTransform { .. } => "removeTransform",
            WorkerMessage::UpdateCodec { .. } => "updateCodec",
            WorkerMessage::SetRtpMap { .. } => "setRTPMap",
            WorkerMessage::SetSifTrailer { .. } => "setSifTrailer",
            WorkerMessage::EncryptDataRequest { .. } => "encryptDataRequest",
            WorkerMessage::DecryptDataRequest { .. } => "decryptDataRequest",
        }
    }
}

/// Ausgehendes Ereignis an den Host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WorkerEvent {
    InitAck {
        enabled: bool,
    },
    Enable {
        participant_identity: String,
        enabled: bool,
    },
    Error {
        error: CryptorError,
        track_id: Option<String>,
        request_id: Option<Uuid>,
    },
    RatchetKey {
        participant_identity: String,
        key_index: usize,
        #[serde(with = "secret_base64")]
        material: SecretBytes,
    },
    EncryptDataResponse {
        request_id: Uuid,
        participant_identity: String,
        #[serde(with = "bytes_base64")]
        payload: Vec<u8>,
        #[serde(with = "bytes_base64")]
        iv: Vec<u8>,
        key_index: u8,
    },
    DecryptDataResponse {
        request_id: Uuid,
        participant_identity: String,
        #[serde(with = "bytes_base64")]
        payload: Vec<u8>,
    },
}

impl WorkerEvent {
    pub fn als_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<CryptorEvent> for WorkerEvent {
    fn from(event: CryptorEvent) -> Self {
        match event {
            CryptorEvent::Error { track_id, error } => WorkerEvent::Error {
                error,
                track_id,
                request_id: None,
            },
            CryptorEvent::KeyRatcheted {
                participant_identity,
                key_index,
                material,
            } => WorkerEvent::RatchetKey {
                participant_identity,
                key_index,
                material,
            },
        }
    }
}

mod bytes_base64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(d: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(text)
            .map_err(serde::de::Error::custom)
    }
}

mod secret_base64 {
    use framecrypt_crypto::SecretBytes;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(secret: &SecretBytes, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        super::bytes_base64::serialize(secret.as_bytes(), s)
    }

    pub fn deserialize<'de, D>(d: D) -> Result<SecretBytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        super::bytes_base64::deserialize(d).map(SecretBytes::new)
    }
}
