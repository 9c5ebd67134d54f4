//! Begrenzung von Server Injected Frames (SIF)
//!
//! Ein SFU kann unverschluesselte Platzhalter-Frames einschleusen, erkennbar
//! am konfigurierten SIF-Trailer. Damit ein Angreifer darueber keinen
//! dauerhaften Klartext-Kanal erhaelt, werden pro Sequenz hoechstens
//! [`MAX_SIF_COUNT`] Frames innerhalb von [`MAX_SIF_DURATION`] zugelassen.
//! Echte (verschluesselte) Frames beenden eine Sequenz sobald sie in der
//! Ueberzahl sind.

use std::time::Duration;
use tokio::time::Instant;

pub const MAX_SIF_COUNT: u32 = 100;
pub const MAX_SIF_DURATION: Duration = Duration::from_millis(2000);

#[derive(Debug, Default)]
pub struct SifGuard {
    consecutive_sif_count: u32,
    sif_sequence_started_at: Option<Instant>,
    last_sif_received_at: Option<Instant>,
    user_frames_since_sif: u32,
}

impl SifGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registriert einen SIF
    ///
    /// Liegt der letzte SIF laenger als [`MAX_SIF_DURATION`] zurueck, beginnt
    /// eine neue Sequenz.
    pub fn record_sif(&mut self) {
        let now = Instant::now();
        if self.last_sif_is_stale(now) {
            self.reset();
        }

        self.consecutive_sif_count += 1;
        self.sif_sequence_started_at.get_or_insert(now);
        self.last_sif_received_at = Some(now);
    }

    /// Registriert einen regulaeren Frame
    pub fn record_user_frame(&mut self) {
        if self.sif_sequence_started_at.is_none() {
            return;
        }

        self.user_frames_since_sif += 1;
        if self.user_frames_since_sif > self.consecutive_sif_count
            || self.last_sif_is_stale(Instant::now())
        {
            self.reset();
        }
    }

    /// Darf der naechste SIF noch durchgelassen werden?
    pub fn is_sif_allowed(&self) -> bool {
        let now = Instant::now();
        if self.last_sif_is_stale(now) {
            return true;
        }

        let innerhalb_zeitfenster = self
            .sif_sequence_started_at
            .map_or(true, |start| now.duration_since(start) < MAX_SIF_DURATION);

        self.consecutive_sif_count < MAX_SIF_COUNT && innerhalb_zeitfenster
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn consecutive_sif_count(&self) -> u32 {
        self.consecutive_sif_count
    }

    fn last_sif_is_stale(&self, now: Instant) -> bool {
        self.last_sif_received_at
            .is_some_and(|last| now.duration_since(last) > MAX_SIF_DURATION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// SIF-Ablauf wie im Decoder: erst pruefen, dann registrieren
    fn admit(guard: &mut SifGuard) -> bool {
        let allowed = guard.is_sif_allowed();
        guard.record_sif();
        allowed
    }

    #[tokio::test(start_paused = true)]
    async fn hoechstens_100_sifs_pro_sequenz() {
        let mut guard = SifGuard::new();

        let zugelassen = (0..150).filter(|_| admit(&mut guard)).count();
        assert_eq!(zugelassen, MAX_SIF_COUNT as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn sequenz_laeuft_nach_zwei_sekunden_ab() {
        let mut guard = SifGuard::new();

        assert!(admit(&mut guard));
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(admit(&mut guard));
        tokio::time::advance(Duration::from_millis(600)).await;

        // Sequenz laeuft seit 2100ms, letzter SIF vor 600ms
        assert!(!admit(&mut guard));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_startet_neue_sequenz() {
        let mut guard = SifGuard::new();
        for _ in 0..MAX_SIF_COUNT {
            assert!(admit(&mut guard));
        }
        assert!(!guard.is_sif_allowed());

        tokio::time::advance(MAX_SIF_DURATION + Duration::from_millis(1)).await;
        assert!(admit(&mut guard));
        assert_eq!(guard.consecutive_sif_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn echte_frames_beenden_sequenz() {
        let mut guard = SifGuard::new();
        for _ in 0..3 {
            admit(&mut guard);
        }

        for _ in 0..3 {
            guard.record_user_frame();
        }
        assert_eq!(guard.consecutive_sif_count(), 3);

        guard.record_user_frame();
        assert_eq!(guard.consecutive_sif_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn user_frames_ohne_sequenz_aendern_nichts() {
        let mut guard = SifGuard::new();
        for _ in 0..500 {
            guard.record_user_frame();
        }
        assert!(guard.is_sif_allowed());
        assert_eq!(guard.consecutive_sif_count(), 0);
    }
}
