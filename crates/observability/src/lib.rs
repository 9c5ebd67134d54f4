//! # framecrypt-observability
//!
//! Observability-Crate fuer framecrypt:
//! - Prometheus-kompatible Metriken pro Track und Richtung
//! - Structured Logging (Text oder JSON) via tracing-subscriber

pub mod logging;
pub mod metrics;

pub use logging::logging_initialisieren;
pub use metrics::CryptorMetrics;
