//! FrameCryptor – Ver- und Entschluesselung kodierter Media-Frames
//!
//! Ein FrameCryptor gehoert zu genau einem Track und einer Richtung. Er
//! referenziert den KeyRing des Teilnehmers (bei Shared Key den gemeinsamen).
//!
//! ## Frame-Format
//! ```text
//! [Praefix (Klartext, AAD)] [Ciphertext + Tag] [IV (12)] [0x0C] [Key-Index]
//! ```
//! Bei H.264 wird alles hinter dem Praefix RBSP-escaped.
//!
//! ## Rueckgabe von `encode` / `decode`
//! - `Ok(Some(frame))` – Frame weiterleiten
//! - `Ok(None)` – Frame still verwerfen
//! - `Err(e)` – Frame verwerfen und Fehler-Event an den Host melden

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::e2e::codec::{unencrypted_prefix, FrameInfo};
use crate::e2e::derive::KeySet;
use crate::e2e::key_ring::KeyRing;
use crate::e2e::rbsp;
use crate::e2e::sif_guard::SifGuard;
use crate::error::{CryptoError, CryptoResult, ErrorReason};
use crate::types::{EncodedFrame, FrameMetadata, VideoCodec, FRAME_TRAILER_LENGTH, IV_LENGTH};

/// Transformation eines kodierten Frames in beide Richtungen
pub trait FrameTransform: Send + Sync {
    fn encode(&self, frame: EncodedFrame) -> CryptoResult<Option<EncodedFrame>>;
    fn decode(&self, frame: EncodedFrame) -> CryptoResult<Option<EncodedFrame>>;
}

/// Teilnehmer-Kontext, wird bei Wiederverwendung eines Transceivers getauscht
#[derive(Debug, Clone)]
struct CryptorContext {
    participant_identity: Option<String>,
    keys: Arc<KeyRing>,
}

#[derive(Debug, Default)]
struct CodecState {
    /// Letzter Hinweis aus `setup_transform` / `update_codec`
    video_codec: Option<VideoCodec>,
    /// RTP Payload-Type -> Codec
    rtp_map: HashMap<u8, VideoCodec>,
    /// Zuletzt aufgeloester Codec (nur fuer Logging bei Wechsel)
    detected: Option<VideoCodec>,
}

/// Zuletzt gemeldeter Fehler, identische Fehler werden nicht erneut gemeldet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ErrorLatch {
    reason: ErrorReason,
    key_index: usize,
    key_generation: u64,
}

/// Momentaufnahme der Zaehler eines FrameCryptors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameCryptorStats {
    pub frames_encrypted: u64,
    pub frames_decrypted: u64,
    pub frames_passed_through: u64,
    pub frames_dropped: u64,
    pub decrypt_attempts: u64,
    pub ratchets: u64,
    pub sif_accepted: u64,
    pub sif_rejected: u64,
}

#[derive(Debug, Default)]
struct StatsCounter {
    frames_encrypted: AtomicU64,
    frames_decrypted: AtomicU64,
    frames_passed_through: AtomicU64,
    frames_dropped: AtomicU64,
    decrypt_attempts: AtomicU64,
    ratchets: AtomicU64,
    sif_accepted: AtomicU64,
    sif_rejected: AtomicU64,
}

impl StatsCounter {
    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> FrameCryptorStats {
        FrameCryptorStats {
            frames_encrypted: self.frames_encrypted.load(Ordering::Relaxed),
            frames_decrypted: self.frames_decrypted.load(Ordering::Relaxed),
            frames_passed_through: self.frames_passed_through.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            decrypt_attempts: self.decrypt_attempts.load(Ordering::Relaxed),
            ratchets: self.ratchets.load(Ordering::Relaxed),
            sif_accepted: self.sif_accepted.load(Ordering::Relaxed),
            sif_rejected: self.sif_rejected.load(Ordering::Relaxed),
        }
    }
}

/// Ver-/Entschluesselung der Frames eines Tracks
pub struct FrameCryptor {
    context: RwLock<CryptorContext>,
    enabled: AtomicBool,
    track_id: RwLock<Option<String>>,
    codec: Mutex<CodecState>,
    sif_trailer: RwLock<Option<Vec<u8>>>,
    sif_guard: Mutex<SifGuard>,
    /// SSRC -> Sendezaehler fuer den IV
    send_counts: Mutex<HashMap<u32, u32>>,
    error_latch: Mutex<Option<ErrorLatch>>,
    stats: StatsCounter,
    pipe: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for FrameCryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCryptor")
            .field("participant_identity", &self.participant_identity())
            .field("track_id", &self.track_id())
            .field("enabled", &self.enabled.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl FrameCryptor {
    /// Erstellt einen (deaktivierten) FrameCryptor
    pub fn new(participant_identity: Option<String>, keys: Arc<KeyRing>) -> Self {
        Self {
            context: RwLock::new(CryptorContext {
                participant_identity,
                keys,
            }),
            enabled: AtomicBool::new(false),
            track_id: RwLock::new(None),
            codec: Mutex::new(CodecState::default()),
            sif_trailer: RwLock::new(None),
            sif_guard: Mutex::new(SifGuard::new()),
            send_counts: Mutex::new(HashMap::new()),
            error_latch: Mutex::new(None),
            stats: StatsCounter::default(),
            pipe: Mutex::new(None),
        }
    }

    // -----------------------------------------------------------------------
    // Teilnehmer und Konfiguration
    // -----------------------------------------------------------------------

    pub fn participant_identity(&self) -> Option<String> {
        self.context.read().participant_identity.clone()
    }

    pub fn key_ring(&self) -> Arc<KeyRing> {
        Arc::clone(&self.context.read().keys)
    }

    /// Ordnet den Cryptor einem (anderen) Teilnehmer zu
    ///
    /// Frames die bereits in Bearbeitung sind, laufen mit dem vorherigen
    /// Kontext zu Ende.
    pub fn set_participant(&self, participant_identity: impl Into<String>, keys: Arc<KeyRing>) {
        let participant_identity = participant_identity.into();
        tracing::debug!(
            participant = %participant_identity,
            track_id = ?self.track_id(),
            "FrameCryptor Teilnehmer gesetzt"
        );

        *self.context.write() = CryptorContext {
            participant_identity: Some(participant_identity),
            keys,
        };
        self.sif_guard.lock().reset();
        *self.error_latch.lock() = None;
    }

    /// Loest den Teilnehmer, Frames werden danach unveraendert durchgereicht
    pub fn unset_participant(&self) {
        tracing::debug!(track_id = ?self.track_id(), "FrameCryptor Teilnehmer entfernt");
        self.context.write().participant_identity = None;
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled_for(&self.context.read())
    }

    fn enabled_for(&self, ctx: &CryptorContext) -> bool {
        ctx.participant_identity.is_some() && self.enabled.load(Ordering::Relaxed)
    }

    pub fn track_id(&self) -> Option<String> {
        self.track_id.read().clone()
    }

    pub(crate) fn set_track_id(&self, track_id: impl Into<String>) {
        *self.track_id.write() = Some(track_id.into());
    }

    pub fn set_video_codec(&self, codec: Option<VideoCodec>) {
        self.codec.lock().video_codec = codec;
    }

    pub fn video_codec(&self) -> Option<VideoCodec> {
        self.codec.lock().video_codec
    }

    pub fn set_rtp_map(&self, map: HashMap<u8, VideoCodec>) {
        self.codec.lock().rtp_map = map;
    }

    /// Setzt den SIF-Trailer (leer deaktiviert die SIF-Erkennung)
    pub fn set_sif_trailer(&self, trailer: Vec<u8>) {
        *self.sif_trailer.write() = (!trailer.is_empty()).then_some(trailer);
    }

    pub fn stats(&self) -> FrameCryptorStats {
        self.stats.snapshot()
    }

    // -----------------------------------------------------------------------
    // Transform-Pipe
    // -----------------------------------------------------------------------

    /// Ersetzt die laufende Pipe, die vorherige wird abgebrochen
    pub(crate) fn replace_pipe(&self, handle: JoinHandle<()>) {
        if let Some(alt) = self.pipe.lock().replace(handle) {
            alt.abort();
        }
    }

    /// Bricht die laufende Pipe ab (noch nicht verarbeitete Frames verfallen)
    pub fn abort_transform(&self) {
        if let Some(handle) = self.pipe.lock().take() {
            handle.abort();
        }
    }

    pub fn has_transform(&self) -> bool {
        self.pipe
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    // -----------------------------------------------------------------------
    // Intern
    // -----------------------------------------------------------------------

    fn context(&self) -> CryptorContext {
        self.context.read().clone()
    }

    fn participant_label(ctx: &CryptorContext) -> String {
        ctx.participant_identity
            .clone()
            .unwrap_or_else(|| ctx.keys.participant_identity().to_string())
    }

    /// Codec eines Video-Frames: RTP-Map, dann MIME-Typ, dann Hinweis
    fn resolve_codec(&self, metadata: &FrameMetadata) -> Option<VideoCodec> {
        let mut state = self.codec.lock();
        let resolved = metadata
            .payload_type
            .and_then(|pt| state.rtp_map.get(&pt).copied())
            .or_else(|| metadata.mime_type.as_deref().and_then(VideoCodec::from_mime_type))
            .or(state.video_codec);

        if resolved != state.detected {
            tracing::debug!(
                track_id = ?self.track_id(),
                alt = ?state.detected,
                neu = ?resolved,
                "Video-Codec gewechselt"
            );
            state.detected = resolved;
        }
        resolved
    }

    fn frame_info(&self, frame: &EncodedFrame) -> CryptoResult<FrameInfo> {
        let codec = if frame.kind.is_video() {
            self.resolve_codec(&frame.metadata)
        } else {
            None
        };
        unencrypted_prefix(&frame.data, frame.kind, codec)
    }

    /// IV: SSRC (4) | RTP-Zeitstempel (4) | Sendezaehler mod 0xFFFF (4)
    ///
    /// Der Zaehler startet pro SSRC bei einem Zufallswert.
    fn make_iv(&self, ssrc: u32, timestamp: u32) -> [u8; IV_LENGTH] {
        let send_count = {
            let mut counts = self.send_counts.lock();
            let count = counts
                .entry(ssrc)
                .or_insert_with(|| rand::thread_rng().gen_range(0..0xFFFF));
            let current = *count;
            *count = count.wrapping_add(1);
            current
        };

        let mut iv = [0u8; IV_LENGTH];
        iv[0..4].copy_from_slice(&ssrc.to_be_bytes());
        iv[4..8].copy_from_slice(&timestamp.to_be_bytes());
        iv[8..12].copy_from_slice(&(send_count % 0xFFFF).to_be_bytes());
        iv
    }

    /// Meldet einen Fehler, sofern er nicht schon zuletzt gemeldet wurde
    fn surface(
        &self,
        ctx: &CryptorContext,
        key_index: usize,
        error: CryptoError,
    ) -> CryptoResult<Option<EncodedFrame>> {
        let latch = ErrorLatch {
            reason: error.reason(),
            key_index,
            key_generation: ctx.keys.key_generation(),
        };

        let mut last = self.error_latch.lock();
        if *last == Some(latch) {
            tracing::trace!(key_index, reason = %latch.reason, "Fehler bereits gemeldet");
            return Ok(None);
        }
        *last = Some(latch);
        Err(error)
    }

    fn drop_frame(&self) -> CryptoResult<Option<EncodedFrame>> {
        StatsCounter::inc(&self.stats.frames_dropped);
        Ok(None)
    }

    fn pass_through(&self, frame: EncodedFrame) -> CryptoResult<Option<EncodedFrame>> {
        StatsCounter::inc(&self.stats.frames_passed_through);
        Ok(Some(frame))
    }

    /// Endet der Frame mit dem SIF-Trailer? Liefert die Trailer-Laenge
    fn sif_trailer_len(&self, data: &[u8]) -> Option<usize> {
        self.sif_trailer
            .read()
            .as_ref()
            .filter(|trailer| data.ends_with(trailer))
            .map(Vec::len)
    }

    /// Entschluesselt einen Frame, bei Fehlschlag mit Ratchet-Versuchen
    ///
    /// Ein geratchetter Schluessel wird nur uebernommen wenn der Slot noch den
    /// Schluessel enthaelt, von dem aus geratchet wurde.
    fn decrypt_frame(
        &self,
        ctx: &CryptorContext,
        frame: &EncodedFrame,
        key_index: usize,
        key_set: Arc<KeySet>,
    ) -> CryptoResult<Vec<u8>> {
        let info = self.frame_info(frame)?;
        if frame.data.len() < info.unencrypted_bytes {
            return Err(CryptoError::UngueltigerFrame(format!(
                "Frame kuerzer als Praefix ({} < {})",
                frame.data.len(),
                info.unencrypted_bytes
            )));
        }

        let (header, rest) = frame.data.split_at(info.unencrypted_bytes);
        let payload: Cow<'_, [u8]> = if info.requires_nalu_processing && rbsp::needs_unescaping(rest) {
            Cow::Owned(rbsp::unescape(rest))
        } else {
            Cow::Borrowed(rest)
        };

        if payload.len() < FRAME_TRAILER_LENGTH {
            return Err(CryptoError::UngueltigerFrame("Trailer fehlt".to_string()));
        }
        let iv_length = payload[payload.len() - FRAME_TRAILER_LENGTH] as usize;
        let iv_end = payload.len() - FRAME_TRAILER_LENGTH;
        if iv_end < iv_length {
            return Err(CryptoError::UngueltigerFrame(format!(
                "IV-Laenge {iv_length} groesser als Frame"
            )));
        }
        let iv = &payload[iv_end - iv_length..iv_end];
        let ciphertext = &payload[..iv_end - iv_length];

        let options = ctx.keys.options();
        let window = options.ratchet_window_size;
        let salt = options.ratchet_salt_bytes();

        let mut initial = key_set;
        let mut candidate = Arc::clone(&initial);
        let mut ratchet_count = 0u32;

        loop {
            StatsCounter::inc(&self.stats.decrypt_attempts);

            match candidate.decrypt(iv, ciphertext, header) {
                Ok(plaintext) => {
                    if !Arc::ptr_eq(&candidate, &initial) {
                        if ctx.keys.commit_ratcheted_key_set(key_index, &initial, candidate) {
                            StatsCounter::inc(&self.stats.ratchets);
                        } else {
                            tracing::debug!(
                                key_index,
                                "Geratchetter Schluessel verworfen, Slot wurde zwischenzeitlich ersetzt"
                            );
                        }
                    }

                    let mut data = Vec::with_capacity(header.len() + plaintext.len());
                    data.extend_from_slice(header);
                    data.extend_from_slice(&plaintext);
                    return Ok(data);
                }
                Err(e @ CryptoError::UngueltigerFrame(_)) => return Err(e),
                Err(_) if ratchet_count < window => {
                    ratchet_count += 1;
                    tracing::debug!(key_index, ratchet_count, window, "Entschluesselung fehlgeschlagen, ratchet");

                    match ctx.keys.get_key_set(Some(key_index)) {
                        Some(current) if !Arc::ptr_eq(&current, &initial) => {
                            // Ein anderer Frame hat den Slot bereits weitergeschaltet
                            initial = Arc::clone(&current);
                            candidate = current;
                        }
                        _ => candidate = Arc::new(candidate.ratchet(salt)?),
                    }
                }
                Err(_) => {
                    return Err(CryptoError::InvalidKey {
                        participant: Self::participant_label(ctx),
                        grund: if window == 0 {
                            "Entschluesselung fehlgeschlagen, Ratchet deaktiviert".to_string()
                        } else {
                            format!("kein gueltiger Schluessel nach {ratchet_count} Ratchet-Versuchen")
                        },
                    });
                }
            }
        }
    }
}

impl FrameTransform for FrameCryptor {
    fn encode(&self, mut frame: EncodedFrame) -> CryptoResult<Option<EncodedFrame>> {
        let ctx = self.context();
        if !self.enabled_for(&ctx) || frame.data.is_empty() {
            return self.pass_through(frame);
        }

        let key_index = ctx.keys.current_key_index();
        let Some(key_set) = ctx.keys.get_key_set(Some(key_index)) else {
            StatsCounter::inc(&self.stats.frames_dropped);
            let error = CryptoError::MissingKey {
                participant: Self::participant_label(&ctx),
                key_index,
            };
            return self.surface(&ctx, key_index, error);
        };

        let info = match self.frame_info(&frame) {
            Ok(info) => info,
            Err(e) => {
                StatsCounter::inc(&self.stats.frames_dropped);
                return self.surface(&ctx, key_index, e);
            }
        };
        if info.unencrypted_bytes > frame.data.len() {
            tracing::error!(
                track_id = ?self.track_id(),
                praefix = info.unencrypted_bytes,
                laenge = frame.data.len(),
                "Frame kuerzer als unverschluesseltes Praefix"
            );
            return self.drop_frame();
        }

        let iv = self.make_iv(frame.metadata.ssrc, frame.timestamp);
        let (header, payload) = frame.data.split_at(info.unencrypted_bytes);
        let ciphertext = match key_set.encrypt(&iv, payload, header) {
            Ok(ciphertext) => ciphertext,
            Err(e) => {
                tracing::error!(track_id = ?self.track_id(), fehler = %e, "Verschluesselung fehlgeschlagen");
                return self.drop_frame();
            }
        };

        let mut body = Vec::with_capacity(ciphertext.len() + IV_LENGTH + FRAME_TRAILER_LENGTH);
        body.extend_from_slice(&ciphertext);
        body.extend_from_slice(&iv);
        body.push(IV_LENGTH as u8);
        body.push(key_index as u8);
        if info.requires_nalu_processing {
            body = rbsp::escape(&body);
        }

        let mut data = Vec::with_capacity(header.len() + body.len());
        data.extend_from_slice(header);
        data.extend_from_slice(&body);
        frame.data = data;

        StatsCounter::inc(&self.stats.frames_encrypted);
        Ok(Some(frame))
    }

    fn decode(&self, mut frame: EncodedFrame) -> CryptoResult<Option<EncodedFrame>> {
        let ctx = self.context();
        if !self.enabled_for(&ctx) || frame.data.is_empty() {
            self.sif_guard.lock().record_user_frame();
            return self.pass_through(frame);
        }

        if let Some(trailer_len) = self.sif_trailer_len(&frame.data) {
            let allowed = {
                let mut guard = self.sif_guard.lock();
                let allowed = guard.is_sif_allowed();
                guard.record_sif();
                allowed
            };

            if allowed {
                StatsCounter::inc(&self.stats.sif_accepted);
                frame.data.truncate(frame.data.len() - trailer_len);
                return Ok(Some(frame));
            }

            tracing::warn!(track_id = ?self.track_id(), "SIF-Limit erreicht, Frame verworfen");
            StatsCounter::inc(&self.stats.sif_rejected);
            return self.drop_frame();
        }
        self.sif_guard.lock().record_user_frame();

        let key_index = match frame.data.last() {
            Some(&byte) => byte as usize,
            None => return self.drop_frame(),
        };
        if ctx.keys.has_invalid_key_at(key_index) {
            return self.drop_frame();
        }

        let Some(key_set) = ctx.keys.get_key_set(Some(key_index)) else {
            ctx.keys.decryption_failure(Some(key_index));
            StatsCounter::inc(&self.stats.frames_dropped);
            let error = CryptoError::MissingKey {
                participant: Self::participant_label(&ctx),
                key_index,
            };
            return self.surface(&ctx, key_index, error);
        };

        match self.decrypt_frame(&ctx, &frame, key_index, key_set) {
            Ok(data) => {
                ctx.keys.decryption_success(Some(key_index));
                *self.error_latch.lock() = None;
                frame.data = data;
                StatsCounter::inc(&self.stats.frames_decrypted);
                Ok(Some(frame))
            }
            Err(e @ CryptoError::InvalidKey { .. }) => {
                let still_valid = !ctx.keys.has_invalid_key_at(key_index);
                ctx.keys.decryption_failure(Some(key_index));
                StatsCounter::inc(&self.stats.frames_dropped);
                if still_valid {
                    self.surface(&ctx, key_index, e)
                } else {
                    Ok(None)
                }
            }
            Err(e) => {
                tracing::warn!(
                    track_id = ?self.track_id(),
                    key_index,
                    fehler = %e,
                    "Frame konnte nicht entschluesselt werden"
                );
                StatsCounter::inc(&self.stats.frames_dropped);
                self.surface(&ctx, key_index, e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
