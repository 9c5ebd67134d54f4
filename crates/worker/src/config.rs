//! Worker-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Worker ohne Konfigurationsdatei
//! lauffaehig ist. Eine `init`-Nachricht ersetzt spaeter nur die
//! KeyRing-Optionen.

use anyhow::Context;
use base64::Engine;
use framecrypt_crypto::KeyRingOptions;
use framecrypt_observability::logging::{log_format_gueltig, log_level_gueltig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Vollstaendige Worker-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// KeyRing-Optionen (Salt, Ratchet-Fenster, Fehlertoleranz, Groesse)
    pub keyring: KeyRingOptions,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Server Injected Frames
    pub sif: SifEinstellungen,
    /// Worker-Task
    pub worker: WorkerEinstellungen,
    /// Prometheus-Metriken
    pub metriken: MetrikEinstellungen,
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl LoggingEinstellungen {
    /// Richtet das Logging des Prozesses mit diesen Einstellungen ein
    pub fn initialisieren(&self) -> anyhow::Result<()> {
        framecrypt_observability::logging_initialisieren(&self.level, &self.format)
    }
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// SIF-Einstellungen
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SifEinstellungen {
    /// SIF-Trailer als Base64 (leer = keine SIF-Erkennung bis `setSifTrailer`)
    pub trailer: Option<String>,
}

impl SifEinstellungen {
    pub fn trailer_bytes(&self) -> anyhow::Result<Option<Vec<u8>>> {
        self.trailer
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(|t| {
                base64::engine::general_purpose::STANDARD
                    .decode(t)
                    .context("SIF-Trailer ist kein gueltiges Base64")
            })
            .transpose()
    }
}

/// Einstellungen des Worker-Tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerEinstellungen {
    /// Kapazitaet des Control-Kanals
    pub control_queue_groesse: usize,
}

impl Default for WorkerEinstellungen {
    fn default() -> Self {
        Self {
            control_queue_groesse: 64,
        }
    }
}

/// Metrik-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetrikEinstellungen {
    /// Uebertraegt Cryptor-Statistiken periodisch in die Metriken
    pub aktiviert: bool,
    /// Intervall der Uebertragung in Millisekunden
    pub intervall_ms: u64,
}

impl Default for MetrikEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: false,
            intervall_ms: 5000,
        }
    }
}

impl MetrikEinstellungen {
    pub fn intervall(&self) -> Duration {
        Duration::from_millis(self.intervall_ms.max(1))
    }
}

impl WorkerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        let config = match std::fs::read_to_string(pfad) {
            Ok(inhalt) => Self::aus_toml(&inhalt)
                .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
                ))
            }
        };
        Ok(config)
    }

    /// Parst und validiert eine Konfiguration im TOML-Format
    pub fn aus_toml(inhalt: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(inhalt)?;
        config.validieren()?;
        Ok(config)
    }

    pub fn validieren(&self) -> anyhow::Result<()> {
        self.keyring.validate()?;
        self.sif.trailer_bytes()?;
        if !log_level_gueltig(&self.logging.level) {
            anyhow::bail!("Ungueltiges Log-Level '{}'", self.logging.level);
        }
        if !log_format_gueltig(&self.logging.format) {
            anyhow::bail!("Ungueltiges Log-Format '{}'", self.logging.format);
        }
        if self.worker.control_queue_groesse == 0 {
            anyhow::bail!("control_queue_groesse muss groesser als 0 sein");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = WorkerConfig::default();
        assert!(cfg.validieren().is_ok());
        assert_eq!(cfg.keyring.ratchet_salt, "LKFrameEncryptionKey");
        assert_eq!(cfg.keyring.ratchet_window_size, 8);
        assert_eq!(cfg.keyring.failure_tolerance, 10);
        assert_eq!(cfg.keyring.keyring_size, 16);
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.metriken.aktiviert);
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [keyring]
            shared_key = true
            failure_tolerance = -1

            [sif]
            trailer = "3q2+7w=="
        "#;
        let cfg = WorkerConfig::aus_toml(toml).unwrap();
        assert!(cfg.keyring.shared_key);
        assert_eq!(cfg.keyring.failure_tolerance, -1);
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.keyring.keyring_size, 16);
        assert_eq!(
            cfg.sif.trailer_bytes().unwrap(),
            Some(vec![0xDE, 0xAD, 0xBE, 0xEF])
        );
    }

    #[test]
    fn ungueltige_keyring_groesse_wird_abgelehnt() {
        let toml = r#"
            [keyring]
            keyring_size = 257
        "#;
        assert!(WorkerConfig::aus_toml(toml).is_err());
    }

    #[test]
    fn ungueltiger_trailer_wird_abgelehnt() {
        let toml = r#"
            [sif]
            trailer = "kein base64!"
        "#;
        assert!(WorkerConfig::aus_toml(toml).is_err());
    }

    #[test]
    fn ungueltiges_log_format_wird_abgelehnt() {
        let toml = r#"
            [logging]
            level = "debug"
            format = "xml"
        "#;
        assert!(WorkerConfig::aus_toml(toml).is_err());
    }

    #[test]
    fn fehlende_datei_liefert_standardwerte() {
        let cfg = WorkerConfig::laden("/nicht/vorhanden/framecrypt.toml").unwrap();
        assert_eq!(cfg.keyring, KeyRingOptions::default());
    }

    #[test]
    fn laden_aus_datei() {
        let pfad = std::env::temp_dir().join(format!("framecrypt-{}.toml", uuid::Uuid::new_v4()));
        let mut datei = std::fs::File::create(&pfad).unwrap();
        writeln!(datei, "[keyring]\nratchet_window_size = 0\n[metriken]\naktiviert = true").unwrap();

        let cfg = WorkerConfig::laden(pfad.to_str().unwrap()).unwrap();
        assert_eq!(cfg.keyring.ratchet_window_size, 0);
        assert!(cfg.metriken.aktiviert);

        std::fs::remove_file(pfad).unwrap();
    }
}
