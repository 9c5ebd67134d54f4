//! Transform-Pipe eines Tracks
//!
//! Pro Track laeuft ein Task, der Frames aus dem lesbaren Ende nimmt, durch
//! den FrameCryptor schickt und in das schreibbare Ende legt. Frames werden
//! strikt nacheinander verarbeitet, die Reihenfolge bleibt erhalten.

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::e2e::frame_cryptor::{FrameCryptor, FrameTransform};
use crate::error::CryptorError;
use crate::event::{emit, CryptorEvent, CryptorEventSender};
use crate::types::{EncodedFrame, TransformDirection, VideoCodec};

impl FrameCryptor {
    /// Haengt den Cryptor zwischen `readable` und `writable`
    ///
    /// Eine bereits laufende Pipe dieses Cryptors wird abgebrochen, ihre noch
    /// nicht verarbeiteten Frames verfallen.
    pub fn setup_transform(
        self: &Arc<Self>,
        direction: TransformDirection,
        mut readable: mpsc::Receiver<EncodedFrame>,
        writable: mpsc::Sender<EncodedFrame>,
        track_id: impl Into<String>,
        codec: Option<VideoCodec>,
        events: Option<CryptorEventSender>,
    ) {
        let track_id = track_id.into();
        if codec.is_some() {
            self.set_video_codec(codec);
        }
        self.set_track_id(track_id.clone());

        tracing::info!(
            track_id = %track_id,
            participant = ?self.participant_identity(),
            %direction,
            codec = ?codec,
            "Transform eingerichtet"
        );

        let cryptor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(frame) = readable.recv().await {
                let result = match direction {
                    TransformDirection::Encode => cryptor.encode(frame),
                    TransformDirection::Decode => cryptor.decode(frame),
                };

                match result {
                    Ok(Some(frame)) => {
                        if writable.send(frame).await.is_err() {
                            tracing::debug!(track_id = %track_id, "Schreibendes Ende geschlossen");
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::debug!(track_id = %track_id, %direction, fehler = %e, "Frame verworfen");
                        emit(
                            events.as_ref(),
                            CryptorEvent::Error {
                                track_id: Some(track_id.clone()),
                                error: CryptorError::from_crypto(&e, cryptor.participant_identity()),
                            },
                        );
                    }
                }
            }
            tracing::debug!(track_id = %track_id, %direction, "Transform beendet");
        });

        self.replace_pipe(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::e2e::key_ring::KeyRing;
    use crate::error::ErrorReason;
    use crate::types::{FrameKind, KeyRingOptions};
    use std::time::Duration;

    fn cryptor(set_key: bool) -> Arc<FrameCryptor> {
        let ring = Arc::new(KeyRing::new("alice", KeyRingOptions::default(), None).unwrap());
        if set_key {
            ring.set_key(b"passwordA", 0);
        }
        let cryptor = Arc::new(FrameCryptor::new(Some("alice".into()), ring));
        cryptor.set_enabled(true);
        cryptor
    }

    fn frame(i: u32) -> EncodedFrame {
        EncodedFrame::new(vec![i as u8 + 1; 32], FrameKind::Delta, i, 77)
    }

    #[tokio::test]
    async fn pipe_kette_erhaelt_reihenfolge() {
        let sender = cryptor(true);
        let empfaenger = cryptor(true);

        let (in_tx, in_rx) = mpsc::channel(16);
        let (mid_tx, mid_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);

        sender.setup_transform(TransformDirection::Encode, in_rx, mid_tx, "video-1", None, None);
        empfaenger.setup_transform(TransformDirection::Decode, mid_rx, out_tx, "video-1", None, None);

        for i in 0..10 {
            in_tx.send(frame(i)).await.unwrap();
        }
        for i in 0..10 {
            assert_eq!(out_rx.recv().await.unwrap(), frame(i));
        }
        assert_eq!(sender.track_id().as_deref(), Some("video-1"));
        assert!(sender.has_transform());
    }

    #[tokio::test]
    async fn fehler_werden_als_event_gemeldet() {
        let sender = cryptor(false);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);

        sender.setup_transform(TransformDirection::Encode, in_rx, out_tx, "audio-1", None, Some(events_tx));
        in_tx.send(frame(1)).await.unwrap();

        match events_rx.recv().await.unwrap() {
            CryptorEvent::Error { track_id, error } => {
                assert_eq!(track_id.as_deref(), Some("audio-1"));
                assert_eq!(error.reason, ErrorReason::MissingKey);
                assert_eq!(error.participant_identity.as_deref(), Some("alice"));
            }
            other => panic!("unerwartetes Ereignis: {other:?}"),
        }

        drop(in_tx);
        assert!(out_rx.recv().await.is_none(), "kein Frame darf das Pipe verlassen");
    }

    #[tokio::test]
    async fn neues_setup_bricht_alte_pipe_ab() {
        let cryptor = cryptor(true);

        let (alt_tx, alt_rx) = mpsc::channel::<EncodedFrame>(4);
        let (alt_out, _alt_out_rx) = mpsc::channel(4);
        cryptor.setup_transform(TransformDirection::Encode, alt_rx, alt_out, "video-1", None, None);

        let (neu_tx, neu_rx) = mpsc::channel(4);
        let (neu_out, mut neu_out_rx) = mpsc::channel(4);
        cryptor.setup_transform(TransformDirection::Encode, neu_rx, neu_out, "video-2", None, None);

        // Abgebrochene Pipe gibt ihr lesbares Ende frei
        tokio::time::timeout(Duration::from_secs(1), alt_tx.closed())
            .await
            .expect("alte Pipe wurde nicht beendet");

        neu_tx.send(frame(3)).await.unwrap();
        assert!(neu_out_rx.recv().await.is_some());
        assert_eq!(cryptor.track_id().as_deref(), Some("video-2"));
    }

    #[tokio::test]
    async fn abort_transform_beendet_pipe() {
        let cryptor = cryptor(true);
        let (tx, rx) = mpsc::channel::<EncodedFrame>(4);
        let (out, _out_rx) = mpsc::channel(4);
        cryptor.setup_transform(TransformDirection::Decode, rx, out, "video-1", None, None);

        cryptor.abort_transform();
        tokio::time::timeout(Duration::from_secs(1), tx.closed())
            .await
            .expect("Pipe wurde nicht beendet");
        assert!(!cryptor.has_transform());
    }
}
