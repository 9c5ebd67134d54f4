//! framecrypt-worker – E2EE-Worker einer Session
//!
//! Dieses Crate implementiert:
//! - WorkerMessage / WorkerEvent: Control-Kanal und Ereignisse an den Host
//! - CryptorRegistry: KeyRings pro Teilnehmer, FrameCryptor pro Track
//! - MessageDispatcher: eine Auswertung pro Nachricht
//! - E2eeWorker: Actor-Task, der die Registry besitzt
//!
//! # Beispiel
//!
//! ```no_run
//! use framecrypt_worker::{spawn, WorkerConfig, WorkerMessage};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = WorkerConfig::laden("framecrypt.toml")?;
//!     config.logging.initialisieren()?;
//!     let (worker, mut events) = spawn(&config, None)?;
//!
//!     worker
//!         .senden(WorkerMessage::SetKey {
//!             participant_identity: Some("alice".into()),
//!             key: b"geheim".to_vec(),
//!             key_index: None,
//!         })
//!         .await?;
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{}", event.als_json()?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod registry;
pub mod worker;


// Bequeme Re-Exporte
pub use config::WorkerConfig;
pub use dispatcher::MessageDispatcher;
pub use error::{WorkerError, WorkerResult};
pub use message::{TransformSetup, WorkerEvent, WorkerMessage};
pub use registry::{CryptorRegistry, TrackStats, SHARED_KEY_IDENTITY};
pub use worker::{spawn, WorkerEventReceiver, WorkerHandle};
