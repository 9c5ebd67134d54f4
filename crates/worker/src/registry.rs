//! Cryptor-Registry – Zustand des E2EE-Workers
//!
//! Haelt alle KeyRings und FrameCryptoren einer Session:
//! - KeyRing pro Teilnehmer, im Shared-Key-Modus ein gemeinsamer KeyRing
//! - FrameCryptor pro Track (wird bei Transceiver-Wiederverwendung neu zugeordnet)
//! - Aktivierungs-Flags pro Teilnehmer
//! - SIF-Trailer fuer alle Cryptoren
//!
//! Die Registry gehoert dem Worker-Task. Nur die Aktivierungs-Flags werden
//! ueber eine `DashMap` mit dem [`crate::WorkerHandle`] geteilt.

use dashmap::DashMap;
use framecrypt_crypto::{
    CryptorEventSender, DataCryptor, FrameCryptor, FrameCryptorStats, KeyRing, KeyRingOptions,
    TransformDirection, VideoCodec,
};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{WorkerError, WorkerResult};
use crate::message::TransformSetup;

/// Identitaet des gemeinsamen KeyRings im Shared-Key-Modus
pub const SHARED_KEY_IDENTITY: &str = "shared-key";

/// FrameCryptor eines Tracks mit der Richtung der zuletzt eingerichteten Pipe
#[derive(Debug, Clone)]
pub struct TrackCryptor {
    pub cryptor: Arc<FrameCryptor>,
    pub direction: Option<TransformDirection>,
}

/// Momentaufnahme eines Tracks fuer die Metriken
#[derive(Debug, Clone)]
pub struct TrackStats {
    pub track_id: String,
    pub direction: TransformDirection,
    pub stats: FrameCryptorStats,
}

pub struct CryptorRegistry {
    options: KeyRingOptions,
    participant_keys: HashMap<String, Arc<KeyRing>>,
    shared_key_handler: Option<Arc<KeyRing>>,
    cryptors: HashMap<String, TrackCryptor>,
    enabled: Arc<DashMap<String, bool>>,
    sif_trailer: Option<Vec<u8>>,
    entfernte_tracks: Vec<(String, TransformDirection)>,
    data_cryptor: DataCryptor,
    events: CryptorEventSender,
}

impl CryptorRegistry {
    pub fn new(
        options: KeyRingOptions,
        sif_trailer: Option<Vec<u8>>,
        events: CryptorEventSender,
    ) -> WorkerResult<Self> {
        options.validate()?;
        Ok(Self {
            options,
            participant_keys: HashMap::new(),
            shared_key_handler: None,
            cryptors: HashMap::new(),
            enabled: Arc::new(DashMap::new()),
            sif_trailer,
            entfernte_tracks: Vec::new(),
            data_cryptor: DataCryptor::new(),
            events,
        })
    }

    pub fn options(&self) -> &KeyRingOptions {
        &self.options
    }

    /// Ersetzt die KeyRing-Optionen
    ///
    /// Gilt fuer alle danach erzeugten KeyRings. Bestehende KeyRings behalten
    /// ihre Optionen.
    pub fn set_options(&mut self, options: KeyRingOptions) -> WorkerResult<()> {
        options.validate()?;
        tracing::info!(
            shared_key = options.shared_key,
            keyring_size = options.keyring_size,
            ratchet_window_size = options.ratchet_window_size,
            failure_tolerance = options.failure_tolerance,
            "KeyRing-Optionen gesetzt"
        );
        self.options = options;
        Ok(())
    }

    pub fn uses_shared_key(&self) -> bool {
        self.options.shared_key
    }

    pub fn enabled_flags(&self) -> Arc<DashMap<String, bool>> {
        Arc::clone(&self.enabled)
    }

    // -----------------------------------------------------------------------
    // KeyRings
    // -----------------------------------------------------------------------

    pub fn shared_key_handler(&mut self) -> WorkerResult<Arc<KeyRing>> {
        if let Some(handler) = &self.shared_key_handler {
            return Ok(Arc::clone(handler));
        }
        let handler = Arc::new(KeyRing::new(
            SHARED_KEY_IDENTITY,
            self.options.clone(),
            Some(self.events.clone()),
        )?);
        self.shared_key_handler = Some(Arc::clone(&handler));
        Ok(handler)
    }

    /// KeyRing eines Teilnehmers (im Shared-Key-Modus der gemeinsame)
    pub fn key_handler(&mut self, participant_identity: &str) -> WorkerResult<Arc<KeyRing>> {
        if self.uses_shared_key() {
            return self.shared_key_handler();
        }
        if let Some(keys) = self.participant_keys.get(participant_identity) {
            return Ok(Arc::clone(keys));
        }

        let keys = Arc::new(KeyRing::new(
            participant_identity,
            self.options.clone(),
            Some(self.events.clone()),
        )?);
        tracing::debug!(participant = %participant_identity, "KeyRing angelegt");
        self.participant_keys
            .insert(participant_identity.to_string(), Arc::clone(&keys));
        Ok(keys)
    }

    /// KeyRing fuer `setKey` / `ratchetRequest`
    fn target_key_handler(
        &mut self,
        participant_identity: Option<&str>,
    ) -> WorkerResult<Arc<KeyRing>> {
        match participant_identity {
            _ if self.uses_shared_key() => self.shared_key_handler(),
            Some(identity) => self.key_handler(identity),
            None => Err(WorkerError::KeinTeilnehmer),
        }
    }

    pub fn set_key(
        &mut self,
        participant_identity: Option<&str>,
        key: &[u8],
        key_index: usize,
    ) -> WorkerResult<usize> {
        let keys = self.target_key_handler(participant_identity)?;
        Ok(keys.set_key(key, key_index))
    }

    /// Ratchet und setzt danach den Fehlerstatus aller Slots zurueck
    pub fn ratchet_key(
        &mut self,
        participant_identity: Option<&str>,
        key_index: Option<usize>,
    ) -> WorkerResult<()> {
        let keys = self.target_key_handler(participant_identity)?;
        keys.ratchet_key(key_index)?;
        keys.reset_key_status(None);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Aktivierung
    // -----------------------------------------------------------------------

    pub fn set_enabled(&mut self, participant_identity: &str, enabled: bool) {
        self.enabled.insert(participant_identity.to_string(), enabled);
        for entry in self.cryptors.values() {
            if entry.cryptor.participant_identity().as_deref() == Some(participant_identity) {
                entry.cryptor.set_enabled(enabled);
            }
        }
        tracing::info!(participant = %participant_identity, enabled, "Verschluesselung umgeschaltet");
    }

    pub fn is_enabled(&self, participant_identity: &str) -> bool {
        self.enabled
            .get(participant_identity)
            .is_some_and(|flag| *flag)
    }

    pub fn any_enabled(&self) -> bool {
        self.enabled.iter().any(|entry| *entry.value())
    }

    // -----------------------------------------------------------------------
    // FrameCryptoren
    // -----------------------------------------------------------------------

    /// FrameCryptor eines Tracks, wird bei Bedarf angelegt oder neu zugeordnet
    pub fn track_cryptor(
        &mut self,
        participant_identity: &str,
        track_id: &str,
    ) -> WorkerResult<Arc<FrameCryptor>> {
        let keys = self.key_handler(participant_identity)?;
        let enabled = self.is_enabled(participant_identity);

        let cryptor = match self.cryptors.get(track_id) {
            Some(entry) => {
                let cryptor = Arc::clone(&entry.cryptor);
                if cryptor.participant_identity().as_deref() != Some(participant_identity) {
                    tracing::debug!(
                        track_id = %track_id,
                        participant = %participant_identity,
                        "FrameCryptor wird neu zugeordnet"
                    );
                    cryptor.set_participant(participant_identity, keys);
                }
                cryptor
            }
            None => {
                let cryptor = Arc::new(FrameCryptor::new(Some(participant_identity.to_string()), keys));
                self.cryptors.insert(
                    track_id.to_string(),
                    TrackCryptor {
                        cryptor: Arc::clone(&cryptor),
                        direction: None,
                    },
                );
                cryptor
            }
        };

        cryptor.set_enabled(enabled);
        if let Some(trailer) = &self.sif_trailer {
            cryptor.set_sif_trailer(trailer.clone());
        }
        Ok(cryptor)
    }

    /// Richtet die Transform-Pipe eines Tracks ein
    pub fn setup_transform(
        &mut self,
        direction: TransformDirection,
        setup: TransformSetup,
    ) -> WorkerResult<()> {
        let cryptor = self.track_cryptor(&setup.participant_identity, &setup.track_id)?;
        cryptor.setup_transform(
            direction,
            setup.readable,
            setup.writable,
            setup.track_id.clone(),
            setup.codec,
            Some(self.events.clone()),
        );

        if let Some(entry) = self.cryptors.get_mut(&setup.track_id) {
            if let Some(alt) = entry.direction.replace(direction).filter(|alt| *alt != direction) {
                self.entfernte_tracks.push((setup.track_id.clone(), alt));
            }
        }
        Ok(())
    }

    /// Loest den Teilnehmer vom FrameCryptor des Tracks
    ///
    /// Gibt `false` zurueck wenn der Track nicht diesem Teilnehmer gehoert.
    pub fn unset_cryptor_participant(&mut self, track_id: &str, participant_identity: &str) -> bool {
        match self.cryptors.get_mut(track_id) {
            Some(entry)
                if entry.cryptor.participant_identity().as_deref() == Some(participant_identity) =>
            {
                entry.cryptor.unset_participant();
                if let Some(direction) = entry.direction.take() {
                    self.entfernte_tracks.push((track_id.to_string(), direction));
                }
                true
            }
            _ => {
                tracing::debug!(
                    track_id = %track_id,
                    participant = %participant_identity,
                    "Kein passender FrameCryptor zum Entfernen"
                );
                false
            }
        }
    }

    pub fn update_codec(
        &mut self,
        participant_identity: &str,
        track_id: &str,
        codec: VideoCodec,
    ) -> WorkerResult<()> {
        let cryptor = self.track_cryptor(participant_identity, track_id)?;
        cryptor.set_video_codec(Some(codec));
        Ok(())
    }

    pub fn set_rtp_map(&mut self, participant_identity: &str, map: &HashMap<u8, VideoCodec>) {
        for entry in self.cryptors.values() {
            if entry.cryptor.participant_identity().as_deref() == Some(participant_identity) {
                entry.cryptor.set_rtp_map(map.clone());
            }
        }
    }

    pub fn set_sif_trailer(&mut self, trailer: Vec<u8>) {
        for entry in self.cryptors.values() {
            entry.cryptor.set_sif_trailer(trailer.clone());
        }
        self.sif_trailer = (!trailer.is_empty()).then_some(trailer);
    }

    pub fn cryptor(&self, track_id: &str) -> Option<Arc<FrameCryptor>> {
        self.cryptors
            .get(track_id)
            .map(|entry| Arc::clone(&entry.cryptor))
    }

    pub fn data_cryptor(&self) -> &DataCryptor {
        &self.data_cryptor
    }

    /// Seit dem letzten Aufruf geloeste Tracks (fuer das Aufraeumen der Metriken)
    pub fn entfernte_tracks_abholen(&mut self) -> Vec<(String, TransformDirection)> {
        std::mem::take(&mut self.entfernte_tracks)
    }

    /// Statistiken aller Tracks mit eingerichteter Pipe
    pub fn track_stats(&self) -> Vec<TrackStats> {
        self.cryptors
            .iter()
            .filter_map(|(track_id, entry)| {
                entry.direction.map(|direction| TrackStats {
                    track_id: track_id.clone(),
                    direction,
                    stats: entry.cryptor.stats(),
                })
            })
            .collect()
    }

    pub fn active_transforms(&self) -> usize {
        self.cryptors
            .values()
            .filter(|entry| entry.cryptor.has_transform())
            .count()
    }

    /// Bricht alle Transform-Pipes ab
    pub fn beenden(&mut self) {
        for entry in self.cryptors.values() {
            entry.cryptor.abort_transform();
        }
        tracing::info!(tracks = self.cryptors.len(), "Alle Transforms beendet");
    }
}
