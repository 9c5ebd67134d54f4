//! E2EE-Worker – Actor-Task fuer eine Session
//!
//! Der Worker besitzt die [`CryptorRegistry`] exklusiv. Alle Zugriffe laufen
//! ueber den Control-Kanal des [`WorkerHandle`], daher braucht die Registry
//! selbst keine Locks.
//!
//! ## Ablauf
//! - Control-Nachrichten werden in Eingangsreihenfolge dispatcht
//! - Cryptor-Ereignisse (Fehler, Ratchets) werden als [`WorkerEvent`] weitergereicht
//! - Optional werden Cryptor-Statistiken periodisch in die Metriken uebertragen
//!
//! Schliesst der Host den Control-Kanal, bricht der Worker alle Transforms ab
//! und beendet sich.

use dashmap::DashMap;
use framecrypt_crypto::CryptorEvent;
use framecrypt_observability::CryptorMetrics;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::WorkerConfig;
use crate::dispatcher::MessageDispatcher;
use crate::error::{WorkerError, WorkerResult};
use crate::message::{WorkerEvent, WorkerMessage};
use crate::registry::CryptorRegistry;

/// Empfaenger der ausgehenden Worker-Ereignisse
pub type WorkerEventReceiver = mpsc::UnboundedReceiver<WorkerEvent>;

/// Handle auf einen laufenden Worker
pub struct WorkerHandle {
    control_tx: mpsc::Sender<WorkerMessage>,
    enabled: Arc<DashMap<String, bool>>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Sendet eine Nachricht an den Worker (wartet bei voller Queue)
    pub async fn senden(&self, message: WorkerMessage) -> WorkerResult<()> {
        self.control_tx
            .send(message)
            .await
            .map_err(|_| WorkerError::WorkerBeendet)
    }

    /// Aktivierungs-Flag eines Teilnehmers (Stand der letzten `enable`-Nachricht)
    pub fn is_enabled(&self, participant_identity: &str) -> bool {
        self.enabled
            .get(participant_identity)
            .is_some_and(|flag| *flag)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Schliesst den Control-Kanal und wartet bis der Worker beendet ist
    pub async fn beenden(self) -> WorkerResult<()> {
        drop(self.control_tx);
        self.task.await.map_err(|e| {
            tracing::error!(fehler = %e, "Worker-Task abgebrochen");
            WorkerError::WorkerBeendet
        })
    }
}

/// Startet einen Worker mit der gegebenen Konfiguration
///
/// Gibt das Handle und den Empfaenger der ausgehenden Ereignisse zurueck.
pub fn spawn(
    config: &WorkerConfig,
    metrics: Option<Arc<CryptorMetrics>>,
) -> WorkerResult<(WorkerHandle, WorkerEventReceiver)> {
    config
        .validieren()
        .map_err(|e| WorkerError::Konfiguration(e.to_string()))?;
    let sif_trailer = config
        .sif
        .trailer_bytes()
        .map_err(|e| WorkerError::Konfiguration(e.to_string()))?;

    let (cryptor_tx, cryptor_rx) = mpsc::unbounded_channel();
    let (control_tx, control_rx) = mpsc::channel(config.worker.control_queue_groesse);
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let registry = CryptorRegistry::new(config.keyring.clone(), sif_trailer, cryptor_tx)?;
    let enabled = registry.enabled_flags();

    let worker = E2eeWorker {
        dispatcher: MessageDispatcher::neu(registry),
        control_rx,
        cryptor_rx,
        event_tx,
        metrics: if config.metriken.aktiviert { metrics } else { None },
        metrik_intervall: config.metriken.intervall(),
    };

    tracing::info!(
        shared_key = config.keyring.shared_key,
        keyring_size = config.keyring.keyring_size,
        "E2EE-Worker gestartet"
    );

    let task = tokio::spawn(worker.run());
    Ok((
        WorkerHandle {
            control_tx,
            enabled,
            task,
        },
        event_rx,
    ))
}

struct E2eeWorker {
    dispatcher: MessageDispatcher,
    control_rx: mpsc::Receiver<WorkerMessage>,
    cryptor_rx: mpsc::UnboundedReceiver<CryptorEvent>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
    metrics: Option<Arc<CryptorMetrics>>,
    metrik_intervall: std::time::Duration,
}

impl E2eeWorker {
    async fn run(mut self) {
        let mut intervall = tokio::time::interval(self.metrik_intervall);
        let metriken_aktiv = self.metrics.is_some();

        loop {
            tokio::select! {
                // Cryptor-Ereignisse vor der naechsten Control-Nachricht zustellen
                biased;

                // Ereignis aus KeyRing oder FrameCryptor
                Some(ereignis) = self.cryptor_rx.recv() => {
                    self.senden(WorkerEvent::from(ereignis));
                }

                // Control-Nachricht vom Host
                nachricht = self.control_rx.recv() => {
                    match nachricht {
                        Some(nachricht) => {
                            if let Some(antwort) = self.dispatcher.dispatch(nachricht) {
                                self.senden(antwort);
                            }
                            self.metriken_aufraeumen();
                        }
                        None => {
                            tracing::debug!("Control-Kanal geschlossen");
                            break;
                        }
                    }
                }

                // Metriken
                _ = intervall.tick(), if metriken_aktiv => {
                    self.metriken_uebertragen();
                }
            }
        }

        self.dispatcher.beenden();
        self.metriken_uebertragen();

        // Bereits erzeugte Ereignisse noch zustellen
        while let Ok(ereignis) = self.cryptor_rx.try_recv() {
            self.senden(WorkerEvent::from(ereignis));
        }
        tracing::info!("E2EE-Worker beendet");
    }

    fn senden(&self, event: WorkerEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::debug!("Worker-Ereignis verworfen, Host hoert nicht mehr zu");
        }
    }

    /// Entfernt die Zeitreihen geloester Tracks
    fn metriken_aufraeumen(&mut self) {
        let entfernt = self.dispatcher.registry_mut().entfernte_tracks_abholen();
        let Some(metrics) = &self.metrics else {
            return;
        };
        for (track_id, direction) in entfernt {
            metrics.track_entfernen(&track_id, direction);
        }
    }

    fn metriken_uebertragen(&self) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        let registry = self.dispatcher.registry();
        for track in registry.track_stats() {
            metrics.stats_erfassen(&track.track_id, track.direction, &track.stats);
        }
        metrics
            .active_transforms
            .set(i64::try_from(registry.active_transforms()).unwrap_or(i64::MAX));
    }
}
