//! Message-Dispatcher – Routet WorkerMessages an die Registry
//!
//! Jede Nachricht vom Control-Kanal wird genau einmal ausgewertet. Die
//! Antwort (falls vorhanden) geht als [`WorkerEvent`] zurueck an den Host.
//! Fehler werden nie an den Aufrufer geworfen, sondern als `Error`-Event
//! gemeldet.

use framecrypt_crypto::{EncryptedPacket, TransformDirection};

use crate::error::{WorkerError, WorkerResult};
use crate::message::{TransformSetup, WorkerEvent, WorkerMessage};
use crate::registry::CryptorRegistry;

/// Zentraler Message-Dispatcher
pub struct MessageDispatcher {
    registry: CryptorRegistry,
}

impl MessageDispatcher {
    /// Erstellt einen neuen Dispatcher
    pub fn neu(registry: CryptorRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &CryptorRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut CryptorRegistry {
        &mut self.registry
    }

    /// Verarbeitet eine eingehende Nachricht und gibt die Antwort zurueck
    ///
    /// Gibt `None` zurueck wenn keine Antwort gesendet werden soll.
    pub fn dispatch(&mut self, message: WorkerMessage) -> Option<WorkerEvent> {
        tracing::debug!(kind = message.kind(), "Nachricht empfangen");

        match message {
            // -------------------------------------------------------------------
            // Lebenszyklus
            // -------------------------------------------------------------------
            WorkerMessage::Init { options } => match self.registry.set_options(options) {
                Ok(()) => Some(WorkerEvent::InitAck {
                    enabled: self.registry.any_enabled(),
                }),
                Err(e) => Some(fehler_event(&e, None, None)),
            },

            WorkerMessage::Enable {
                participant_identity,
                enabled,
            } => {
                self.registry.set_enabled(&participant_identity, enabled);
                Some(WorkerEvent::Enable {
                    participant_identity,
                    enabled,
                })
            }

            // -------------------------------------------------------------------
            // Schluessel
            // -------------------------------------------------------------------
            WorkerMessage::SetKey {
                participant_identity,
                key,
                key_index,
            } => {
                let result = self.registry.set_key(
                    participant_identity.as_deref(),
                    &key,
                    key_index.unwrap_or(0),
                );
                match result {
                    Ok(slot) => {
                        tracing::info!(
                            participant = ?participant_identity,
                            key_index = slot,
                            shared_key = self.registry.uses_shared_key(),
                            "Schluessel gesetzt"
                        );
                        None
                    }
                    Err(e) => Some(fehler_event(&e, participant_identity, None)),
                }
            }

            WorkerMessage::RatchetRequest {
                participant_identity,
                key_index,
            } => {
                // Das RatchetKey-Event kommt ueber den Cryptor-Event-Kanal
                match self
                    .registry
                    .ratchet_key(participant_identity.as_deref(), key_index)
                {
                    Ok(()) => None,
                    Err(e) => Some(fehler_event(&e, participant_identity, None)),
                }
            }

            // -------------------------------------------------------------------
            // Transforms
            // -------------------------------------------------------------------
            WorkerMessage::Encode(setup) => {
                self.transform(TransformDirection::Encode, setup)
            }

            WorkerMessage::Decode(setup) => {
                self.transform(TransformDirection::Decode, setup)
            }

            WorkerMessage::RemoveTransform {
                participant_identity,
                track_id,
            } => {
                self.registry
                    .unset_cryptor_participant(&track_id, &participant_identity);
                None
            }

            WorkerMessage::UpdateCodec {
                participant_identity,
                track_id,
                codec,
            } => {
                tracing::debug!(track_id = %track_id, %codec, "Codec aktualisiert");
                match self
                    .registry
                    .update_codec(&participant_identity, &track_id, codec)
                {
                    Ok(()) => None,
                    Err(e) => Some(fehler_event(&e, Some(participant_identity), Some(track_id))),
                }
            }

            WorkerMessage::SetRtpMap {
                participant_identity,
                map,
            } => {
                self.registry.set_rtp_map(&participant_identity, &map);
                None
            }

            WorkerMessage::SetSifTrailer { trailer } => {
                self.registry.set_sif_trailer(trailer);
                None
            }

            // -------------------------------------------------------------------
            // Data-Channel
            // -------------------------------------------------------------------
            WorkerMessage::EncryptDataRequest {
                request_id,
                participant_identity,
                payload,
            } => {
                let result = self.encrypt_data(&participant_identity, &payload);
                Some(match result {
                    Ok(packet) => WorkerEvent::EncryptDataResponse {
                        request_id,
                        participant_identity,
                        payload: packet.payload,
                        iv: packet.iv.to_vec(),
                        key_index: packet.key_index,
                    },
                    Err(e) => WorkerEvent::Error {
                        error: e.to_cryptor_error(Some(participant_identity)),
                        track_id: None,
                        request_id: Some(request_id),
                    },
                })
            }

            WorkerMessage::DecryptDataRequest {
                request_id,
                participant_identity,
                payload,
                iv,
                key_index,
            } => {
                let result = self.decrypt_data(&participant_identity, &payload, &iv, key_index);
                Some(match result {
                    Ok(payload) => WorkerEvent::DecryptDataResponse {
                        request_id,
                        participant_identity,
                        payload,
                    },
                    Err(e) => WorkerEvent::Error {
                        error: e.to_cryptor_error(Some(participant_identity)),
                        track_id: None,
                        request_id: Some(request_id),
                    },
                })
            }
        }
    }

    fn transform(
        &mut self,
        direction: TransformDirection,
        setup: TransformSetup,
    ) -> Option<WorkerEvent> {
        let participant_identity = setup.participant_identity.clone();
        let track_id = setup.track_id.clone();
        match self.registry.setup_transform(direction, setup) {
            Ok(()) => None,
            Err(e) => Some(fehler_event(&e, Some(participant_identity), Some(track_id))),
        }
    }

    fn encrypt_data(
        &mut self,
        participant_identity: &str,
        payload: &[u8],
    ) -> WorkerResult<EncryptedPacket> {
        let keys = self.registry.key_handler(participant_identity)?;
        Ok(self.registry.data_cryptor().encrypt(payload, &keys)?)
    }

    fn decrypt_data(
        &mut self,
        participant_identity: &str,
        payload: &[u8],
        iv: &[u8],
        key_index: Option<usize>,
    ) -> WorkerResult<Vec<u8>> {
        let keys = self.registry.key_handler(participant_identity)?;
        Ok(self
            .registry
            .data_cryptor()
            .decrypt(payload, iv, &keys, key_index)?)
    }

    /// Bricht alle Transforms ab (Session-Ende)
    pub fn beenden(&mut self) {
        self.registry.beenden();
    }
}

fn fehler_event(
    error: &WorkerError,
    participant_identity: Option<String>,
    track_id: Option<String>,
) -> WorkerEvent {
    tracing::warn!(
        participant = ?participant_identity,
        track_id = ?track_id,
        fehler = %error,
        "Nachricht konnte nicht verarbeitet werden"
    );
    WorkerEvent::Error {
        error: error.to_cryptor_error(participant_identity),
        track_id,
        request_id: None,
    }
}
