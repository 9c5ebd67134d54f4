//! KeyRing – rotierende Schluessel-Saetze eines Teilnehmers
//!
//! Verwaltet pro Teilnehmer (oder fuer den Shared Key):
//! - bis zu `keyring_size` Schluessel-Saetze, indexiert mit `index % keyring_size`
//! - den aktuellen Index fuer die Verschluesselung
//! - Fehlerzaehler pro Index (ungueltig sobald `failure_tolerance` ueberschritten)
//!
//! ## Nebenlaeufigkeit
//! Alle Slots liegen hinter einem `parking_lot::Mutex`, Schluessel-Saetze als
//! `Arc<KeySet>`. Aenderungen die auf einem vorher gelesenen Schluessel beruhen
//! (Ratchet) werden nur uebernommen wenn der Slot noch genau diesen `Arc`
//! enthaelt (Compare-and-Swap ueber `Arc::ptr_eq`). Die teure Ableitung laeuft
//! ausserhalb des Locks.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::e2e::derive::KeySet;
use crate::error::{CryptoError, CryptoResult};
use crate::event::{emit, CryptorEvent, CryptorEventSender};
use crate::types::{KeyRingOptions, SecretBytes};

/// Rotierende Schluessel-Saetze eines Teilnehmers
#[derive(Debug)]
pub struct KeyRing {
    participant_identity: String,
    options: KeyRingOptions,
    state: Mutex<KeyRingState>,
    /// Wird bei jedem `set_key` erhoeht
    generation: AtomicU64,
    events: Option<CryptorEventSender>,
}

#[derive(Debug)]
struct KeyRingState {
    key_sets: Vec<Option<Arc<KeySet>>>,
    failure_counts: Vec<u32>,
    current_key_index: usize,
}

impl KeyRing {
    /// Erstellt einen leeren KeyRing
    ///
    /// Schlaegt fehl wenn `keyring_size` ausserhalb von 1..=256 liegt.
    pub fn new(
        participant_identity: impl Into<String>,
        options: KeyRingOptions,
        events: Option<CryptorEventSender>,
    ) -> CryptoResult<Self> {
        options.validate()?;
        let size = options.keyring_size;

        Ok(Self {
            participant_identity: participant_identity.into(),
            options,
            state: Mutex::new(KeyRingState {
                key_sets: vec![None; size],
                failure_counts: vec![0; size],
                current_key_index: 0,
            }),
            generation: AtomicU64::new(0),
            events,
        })
    }

    pub fn participant_identity(&self) -> &str {
        &self.participant_identity
    }

    pub fn options(&self) -> &KeyRingOptions {
        &self.options
    }

    pub fn keyring_size(&self) -> usize {
        self.options.keyring_size
    }

    pub fn current_key_index(&self) -> usize {
        self.state.lock().current_key_index
    }

    /// Zaehlt installierte Schluessel, aendert sich nicht durch Ratchets
    pub fn key_generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    pub fn set_current_key_index(&self, key_index: usize) {
        self.state.lock().current_key_index = key_index % self.keyring_size();
    }

    /// Slot-Index fuer einen angefragten Index (aktueller Index falls `None`)
    fn slot(&self, state: &KeyRingState, key_index: Option<usize>) -> usize {
        key_index.unwrap_or(state.current_key_index) % self.keyring_size()
    }

    /// Installiert neues Roh-Material an `key_index % keyring_size`
    ///
    /// Setzt den aktuellen Index auf diesen Slot und den Fehlerstatus zurueck.
    /// Ungueltiges Material hinterlaesst einen leeren Slot, der erst bei der
    /// naechsten Verwendung als `MissingKey` auffaellt.
    pub fn set_key(&self, material: &[u8], key_index: usize) -> usize {
        let slot = key_index % self.keyring_size();
        let key_set = match KeySet::derive(SecretBytes::from(material), self.options.ratchet_salt_bytes()) {
            Ok(key_set) => Some(Arc::new(key_set)),
            Err(e) => {
                tracing::warn!(
                    participant = %self.participant_identity,
                    key_index = slot,
                    fehler = %e,
                    "Schluessel-Material unbrauchbar, Slot bleibt leer"
                );
                None
            }
        };

        let mut state = self.state.lock();
        state.key_sets[slot] = key_set;
        state.current_key_index = slot;
        state.failure_counts[slot] = 0;
        drop(state);
        self.generation.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            participant = %self.participant_identity,
            key_index = slot,
            "Schluessel gesetzt"
        );
        slot
    }

    pub fn get_key_set(&self, key_index: Option<usize>) -> Option<Arc<KeySet>> {
        let state = self.state.lock();
        let slot = self.slot(&state, key_index);
        state.key_sets[slot].clone()
    }

    /// Exportiert das aktuelle Material eines Slots (fuer Persistenz beim Host)
    pub fn export_key(&self, key_index: Option<usize>) -> Option<SecretBytes> {
        self.get_key_set(key_index)
            .map(|key_set| key_set.material().clone())
    }

    /// Prueft ob der Slot noch genau diesen Schluessel-Satz enthaelt
    pub fn holds_key_set(&self, key_index: usize, expected: &Arc<KeySet>) -> bool {
        let state = self.state.lock();
        let slot = self.slot(&state, Some(key_index));
        matches!(&state.key_sets[slot], Some(current) if Arc::ptr_eq(current, expected))
    }

    /// Ratchet den Schluessel an `key_index` (aktueller Index falls `None`)
    ///
    /// Installiert das neue Material im selben Slot, meldet `KeyRatcheted` und
    /// gibt das neue Material zurueck. Wird der Slot waehrend der Ableitung
    /// ersetzt, wird vom neuen Inhalt aus erneut geratchet.
    pub fn ratchet_key(&self, key_index: Option<usize>) -> CryptoResult<SecretBytes> {
        let slot = {
            let state = self.state.lock();
            self.slot(&state, key_index)
        };

        loop {
            let current = self.get_key_set(Some(slot)).ok_or_else(|| CryptoError::MissingKey {
                participant: self.participant_identity.clone(),
                key_index: slot,
            })?;
            let next = Arc::new(current.ratchet(self.options.ratchet_salt_bytes())?);

            if self.compare_and_swap(slot, &current, Arc::clone(&next)) {
                let material = next.material().clone();
                self.emit_ratcheted(slot, material.clone());
                return Ok(material);
            }

            tracing::debug!(
                participant = %self.participant_identity,
                key_index = slot,
                "Slot waehrend Ratchet ersetzt, neuer Versuch"
            );
        }
    }

    /// Uebernimmt einen beim Entschluesseln geratchetten Schluessel-Satz
    ///
    /// Nur wenn der Slot noch `expected` enthaelt. Bei Erfolg wird der Slot
    /// zum aktuellen Index und `KeyRatcheted` gemeldet.
    pub fn commit_ratcheted_key_set(
        &self,
        key_index: usize,
        expected: &Arc<KeySet>,
        next: Arc<KeySet>,
    ) -> bool {
        let slot = key_index % self.keyring_size();
        let material = next.material().clone();
        {
            let mut state = self.state.lock();
            match &state.key_sets[slot] {
                Some(current) if Arc::ptr_eq(current, expected) => {}
                _ => return false,
            }
            state.key_sets[slot] = Some(next);
            state.current_key_index = slot;
            state.failure_counts[slot] = 0;
        }

        self.emit_ratcheted(slot, material);
        true
    }

    fn compare_and_swap(&self, slot: usize, expected: &Arc<KeySet>, next: Arc<KeySet>) -> bool {
        let mut state = self.state.lock();
        match &state.key_sets[slot] {
            Some(current) if Arc::ptr_eq(current, expected) => {
                state.key_sets[slot] = Some(next);
                true
            }
            _ => false,
        }
    }

    fn emit_ratcheted(&self, key_index: usize, material: SecretBytes) {
        tracing::debug!(
            participant = %self.participant_identity,
            key_index,
            "Schluessel geratchet"
        );
        emit(
            self.events.as_ref(),
            CryptorEvent::KeyRatcheted {
                participant_identity: self.participant_identity.clone(),
                key_index,
                material,
            },
        );
    }

    // -----------------------------------------------------------------------
    // Fehlerstatus
    // -----------------------------------------------------------------------

    pub fn decryption_failure(&self, key_index: Option<usize>) {
        let tolerance = self.options.failure_tolerance;
        if tolerance < 0 {
            return;
        }

        let mut state = self.state.lock();
        let slot = self.slot(&state, key_index);
        state.failure_counts[slot] = state.failure_counts[slot].saturating_add(1);

        if state.failure_counts[slot] == tolerance as u32 + 1 {
            tracing::warn!(
                participant = %self.participant_identity,
                key_index = slot,
                tolerance,
                "Fehlertoleranz ueberschritten, Schluessel gilt als ungueltig"
            );
        }
    }

    pub fn decryption_success(&self, key_index: Option<usize>) {
        self.reset_key_status(Some(key_index.unwrap_or_else(|| self.current_key_index())));
    }

    /// Setzt den Fehlerstatus eines Slots zurueck (alle Slots falls `None`)
    pub fn reset_key_status(&self, key_index: Option<usize>) {
        let mut state = self.state.lock();
        match key_index {
            Some(index) => {
                let slot = self.slot(&state, Some(index));
                state.failure_counts[slot] = 0;
            }
            None => state.failure_counts.iter_mut().for_each(|c| *c = 0),
        }
    }

    pub fn has_invalid_key_at(&self, key_index: usize) -> bool {
        let tolerance = self.options.failure_tolerance;
        if tolerance < 0 {
            return false;
        }
        let state = self.state.lock();
        let slot = self.slot(&state, Some(key_index));
        state.failure_counts[slot] > tolerance as u32
    }

    /// Gueltigkeit des Schluessels am aktuellen Index
    pub fn has_valid_key(&self) -> bool {
        !self.has_invalid_key_at(self.current_key_index())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::e2e::derive::ratchet_material;
    use tokio::sync::mpsc;

    fn options(keyring_size: usize, failure_tolerance: i32) -> KeyRingOptions {
        KeyRingOptions {
            keyring_size,
            failure_tolerance,
            ..Default::default()
        }
    }

    fn key_ring(keyring_size: usize, failure_tolerance: i32) -> KeyRing {
        KeyRing::new("alice", options(keyring_size, failure_tolerance), None).unwrap()
    }

    #[test]
    fn keyring_groesse_ausserhalb_schlaegt_fehl() {
        assert!(KeyRing::new("a", options(0, 10), None).is_err());
        assert!(KeyRing::new("a", options(257, 10), None).is_err());
        assert!(KeyRing::new("a", options(1, 10), None).is_ok());
        assert!(KeyRing::new("a", options(256, 10), None).is_ok());
    }

    #[test]
    fn set_key_wickelt_index_um() {
        let ring = key_ring(16, 10);
        let slot = ring.set_key(b"passwordA", 16 + 3);

        assert_eq!(slot, 3);
        assert_eq!(ring.current_key_index(), 3);
        assert_eq!(ring.key_generation(), 1);
        assert!(ring.get_key_set(Some(3)).is_some());
        assert!(ring.get_key_set(Some(0)).is_none());
        assert!(ring.get_key_set(None).is_some());
    }

    #[test]
    fn leeres_material_hinterlaesst_leeren_slot() {
        let ring = key_ring(16, 10);
        ring.set_key(b"passwordA", 2);
        ring.set_key(b"", 2);

        assert!(ring.get_key_set(Some(2)).is_none());
        assert_eq!(ring.current_key_index(), 2);
    }

    #[test]
    fn fehlertoleranz_grenze() {
        let ring = key_ring(16, 2);
        ring.set_key(b"passwordA", 0);

        ring.decryption_failure(None);
        ring.decryption_failure(None);
        assert!(ring.has_valid_key(), "F Fehler duerfen den Schluessel nicht entwerten");

        ring.decryption_failure(None);
        assert!(!ring.has_valid_key(), "F+1 Fehler muessen den Schluessel entwerten");
        assert!(ring.has_invalid_key_at(0));
    }

    #[test]
    fn erfolg_setzt_zaehler_zurueck() {
        let ring = key_ring(16, 2);
        ring.set_key(b"passwordA", 0);

        ring.decryption_failure(Some(0));
        ring.decryption_failure(Some(0));
        ring.decryption_success(Some(0));
        ring.decryption_failure(Some(0));
        ring.decryption_failure(Some(0));

        assert!(ring.has_valid_key());
    }

    #[test]
    fn fehlerzaehler_pro_index() {
        let ring = key_ring(16, 0);
        ring.set_key(b"passwordA", 0);

        ring.decryption_failure(Some(5));
        assert!(ring.has_invalid_key_at(5));
        assert!(ring.has_valid_key(), "aktueller Index 0 bleibt gueltig");
    }

    #[test]
    fn toleranz_minus_eins_entwertet_nie() {
        let ring = key_ring(16, -1);
        ring.set_key(b"passwordA", 0);

        for _ in 0..1000 {
            ring.decryption_failure(None);
        }
        assert!(ring.has_valid_key());
    }

    #[test]
    fn set_key_stellt_gueltigkeit_wieder_her() {
        let ring = key_ring(16, 0);
        ring.set_key(b"passwordA", 1);
        ring.decryption_failure(None);
        assert!(!ring.has_valid_key());

        ring.set_key(b"passwordB", 1);
        assert!(ring.has_valid_key());
    }

    #[test]
    fn ratchet_key_meldet_neues_material() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ring = KeyRing::new("alice", KeyRingOptions::default(), Some(tx)).unwrap();
        ring.set_key(b"passwordA", 4);

        let material = ring.ratchet_key(None).unwrap();

        let salt = KeyRingOptions::default().ratchet_salt;
        let erwartet = ratchet_material(&SecretBytes::from(&b"passwordA"[..]), salt.as_bytes()).unwrap();
        assert_eq!(material, erwartet);
        assert_eq!(ring.export_key(Some(4)), Some(erwartet.clone()));

        match rx.try_recv().unwrap() {
            CryptorEvent::KeyRatcheted {
                participant_identity,
                key_index,
                material,
            } => {
                assert_eq!(participant_identity, "alice");
                assert_eq!(key_index, 4);
                assert_eq!(material, erwartet);
            }
            other => panic!("unerwartetes Ereignis: {other:?}"),
        }
    }

    #[test]
    fn ratchet_ohne_schluessel_ist_missing_key() {
        let ring = key_ring(16, 10);
        let result = ring.ratchet_key(Some(7));
        assert!(matches!(result, Err(CryptoError::MissingKey { key_index: 7, .. })));
    }

    #[test]
    fn commit_nur_wenn_slot_unveraendert() {
        let ring = key_ring(16, 10);
        ring.set_key(b"passwordA", 2);
        let gelesen = ring.get_key_set(Some(2)).unwrap();
        let geratchet = Arc::new(gelesen.ratchet(b"salt").unwrap());

        // Ein neuer Schluessel wird zwischenzeitlich gesetzt
        ring.set_key(b"passwordB", 2);
        let neu = ring.get_key_set(Some(2)).unwrap();

        assert!(!ring.commit_ratcheted_key_set(2, &gelesen, Arc::clone(&geratchet)));
        assert!(ring.holds_key_set(2, &neu), "neuerer Schluessel darf nicht ueberschrieben werden");

        assert!(ring.commit_ratcheted_key_set(2, &neu, Arc::clone(&geratchet)));
        assert!(ring.holds_key_set(2, &geratchet));
    }

    #[test]
    fn commit_setzt_aktuellen_index() {
        let ring = key_ring(16, 10);
        ring.set_key(b"passwordA", 5);
        ring.set_key(b"passwordB", 1);
        let gelesen = ring.get_key_set(Some(5)).unwrap();
        let geratchet = Arc::new(gelesen.ratchet(b"salt").unwrap());

        assert!(ring.commit_ratcheted_key_set(5, &gelesen, geratchet));
        assert_eq!(ring.current_key_index(), 5);
    }

    #[test]
    fn parallele_ratchets_gehen_nicht_verloren() {
        let ring = Arc::new(key_ring(16, 10));
        ring.set_key(b"passwordA", 0);

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let ring = Arc::clone(&ring);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        ring.ratchet_key(Some(0)).unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        // Jeder Ratchet wurde genau einmal angewendet
        let salt = ring.options().ratchet_salt.clone();
        let mut erwartet = SecretBytes::from(&b"passwordA"[..]);
        for _ in 0..40 {
            erwartet = ratchet_material(&erwartet, salt.as_bytes()).unwrap();
        }
        assert_eq!(ring.export_key(Some(0)), Some(erwartet));
    }
}
