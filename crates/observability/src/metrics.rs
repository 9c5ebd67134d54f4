//! Prometheus-kompatible Metriken fuer framecrypt
//!
//! Registrierte Metriken (Labels `track_id`, `direction`):
//! - `framecrypt_frames_encrypted` – Verschluesselte Frames
//! - `framecrypt_frames_decrypted` – Entschluesselte Frames
//! - `framecrypt_frames_passed_through` – Unveraendert durchgereichte Frames
//! - `framecrypt_frames_dropped` – Verworfene Frames
//! - `framecrypt_decrypt_attempts` – Entschluesselungsversuche inkl. Ratchet
//! - `framecrypt_ratchets` – Beim Entschluesseln uebernommene Ratchets
//! - `framecrypt_sif_accepted` / `framecrypt_sif_rejected` – Server Injected Frames
//!
//! Ohne Labels:
//! - `framecrypt_active_transforms` – Laufende Transform-Pipes
//!
//! Die Werte sind Zaehlerstaende der FrameCryptoren und werden als Gauges
//! gesetzt, der Worker uebertraegt regelmaessig Momentaufnahmen.

use anyhow::Result;
use framecrypt_crypto::{FrameCryptorStats, TransformDirection};
use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

const LABELS: &[&str] = &["track_id", "direction"];

/// Alle framecrypt-Prometheus-Metriken
#[derive(Clone)]
pub struct CryptorMetrics {
    pub registry: Arc<Registry>,

    pub frames_encrypted: IntGaugeVec,
    pub frames_decrypted: IntGaugeVec,
    pub frames_passed_through: IntGaugeVec,
    pub frames_dropped: IntGaugeVec,
    pub decrypt_attempts: IntGaugeVec,
    pub ratchets: IntGaugeVec,
    pub sif_accepted: IntGaugeVec,
    pub sif_rejected: IntGaugeVec,

    pub active_transforms: IntGauge,
}

fn track_gauge(registry: &Registry, name: &str, hilfe: &str) -> Result<IntGaugeVec> {
    let gauge = IntGaugeVec::new(Opts::new(name, hilfe), LABELS)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn als_i64(wert: u64) -> i64 {
    i64::try_from(wert).unwrap_or(i64::MAX)
}

impl CryptorMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let frames_encrypted = track_gauge(
            &registry,
            "framecrypt_frames_encrypted",
            "Anzahl verschluesselter Frames",
        )?;
        let frames_decrypted = track_gauge(
            &registry,
            "framecrypt_frames_decrypted",
            "Anzahl entschluesselter Frames",
        )?;
        let frames_passed_through = track_gauge(
            &registry,
            "framecrypt_frames_passed_through",
            "Anzahl unveraendert durchgereichter Frames",
        )?;
        let frames_dropped = track_gauge(
            &registry,
            "framecrypt_frames_dropped",
            "Anzahl verworfener Frames",
        )?;
        let decrypt_attempts = track_gauge(
            &registry,
            "framecrypt_decrypt_attempts",
            "Entschluesselungsversuche inklusive Ratchet-Versuchen",
        )?;
        let ratchets = track_gauge(
            &registry,
            "framecrypt_ratchets",
            "Beim Entschluesseln uebernommene Ratchet-Schritte",
        )?;
        let sif_accepted = track_gauge(
            &registry,
            "framecrypt_sif_accepted",
            "Durchgelassene Server Injected Frames",
        )?;
        let sif_rejected = track_gauge(
            &registry,
            "framecrypt_sif_rejected",
            "Verworfene Server Injected Frames (Limit erreicht)",
        )?;

        let active_transforms = IntGauge::with_opts(Opts::new(
            "framecrypt_active_transforms",
            "Anzahl laufender Transform-Pipes",
        ))?;
        registry.register(Box::new(active_transforms.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            frames_encrypted,
            frames_decrypted,
            frames_passed_through,
            frames_dropped,
            decrypt_attempts,
            ratchets,
            sif_accepted,
            sif_rejected,
            active_transforms,
        })
    }

    /// Uebernimmt die Momentaufnahme eines FrameCryptors
    pub fn stats_erfassen(
        &self,
        track_id: &str,
        direction: TransformDirection,
        stats: &FrameCryptorStats,
    ) {
        let direction = direction.to_string();
        let labels = [track_id, direction.as_str()];

        self.frames_encrypted
            .with_label_values(&labels)
            .set(als_i64(stats.frames_encrypted));
        self.frames_decrypted
            .with_label_values(&labels)
            .set(als_i64(stats.frames_decrypted));
        self.frames_passed_through
            .with_label_values(&labels)
            .set(als_i64(stats.frames_passed_through));
        self.frames_dropped
            .with_label_values(&labels)
            .set(als_i64(stats.frames_dropped));
        self.decrypt_attempts
            .with_label_values(&labels)
            .set(als_i64(stats.decrypt_attempts));
        self.ratchets
            .with_label_values(&labels)
            .set(als_i64(stats.ratchets));
        self.sif_accepted
            .with_label_values(&labels)
            .set(als_i64(stats.sif_accepted));
        self.sif_rejected
            .with_label_values(&labels)
            .set(als_i64(stats.sif_rejected));
    }

    /// Entfernt alle Zeitreihen eines Tracks
    pub fn track_entfernen(&self, track_id: &str, direction: TransformDirection) {
        let direction = direction.to_string();
        let labels = [track_id, direction.as_str()];
        for gauge in [
            &self.frames_encrypted,
            &self.frames_decrypted,
            &self.frames_passed_through,
            &self.frames_dropped,
            &self.decrypt_attempts,
            &self.ratchets,
            &self.sif_accepted,
            &self.sif_rejected,
        ] {
            // Fehlt die Zeitreihe, gibt es nichts zu entfernen
            let _ = gauge.remove_label_values(&labels);
        }
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
