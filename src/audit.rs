//! Record of every script that reached the toolchain
//!
//! One JSON object per line in `<state dir>/kiln/audit.log`, keyed by the
//! content hash so an entry can be matched against the output cache:
//!
//! ```text
//! {"at":"2026-10-16T09:12:03Z","event":"generation.completed","hash":"9f2c..","elapsed_secs":1.8}
//! ```
//!
//! Audit trouble is logged and dropped; it never changes a request's outcome.

use crate::config::{schema::Config, ConfigManager};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Something worth a line in the audit trail
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event")]
pub enum AuditEvent {
    #[serde(rename = "generation.completed")]
    GenerationCompleted { hash: String, elapsed_secs: f64 },

    #[serde(rename = "generation.failed")]
    GenerationFailed {
        hash: String,
        error: String,
        elapsed_secs: f64,
    },

    #[serde(rename = "cache.cleared")]
    CacheCleared { dir: PathBuf },

    #[serde(rename = "template.built")]
    TemplateBuilt { root: PathBuf },

    #[serde(rename = "template.cleared")]
    TemplateCleared { root: PathBuf },
}

#[derive(Serialize)]
struct Line<'a> {
    at: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a AuditEvent,
}

/// Appends [`AuditEvent`]s to a JSON-lines file
#[derive(Debug, Clone)]
pub struct AuditLog {
    enabled: bool,
    path: PathBuf,
}

impl AuditLog {
    /// Audit trail at the default location, switched by `general.audit_log`
    pub fn new(config: &Config) -> Self {
        Self::with_path(config.general.audit_log, ConfigManager::audit_log_path())
    }

    pub fn with_path(enabled: bool, path: impl Into<PathBuf>) -> Self {
        Self {
            enabled,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn record(&self, event: AuditEvent) {
        if !self.enabled {
            return;
        }

        let line = Line {
            at: Utc::now(),
            event: &event,
        };
        let mut text = match serde_json::to_string(&line) {
            Ok(text) => text,
            Err(e) => {
                warn!(?event, "Unserializable audit event: {}", e);
                return;
            }
        };
        text.push('\n');

        if let Err(e) = self.append(text.as_bytes()).await {
            warn!(?event, "Audit entry lost, {}: {}", self.path.display(), e);
        }
    }

    async fn append(&self, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        // A single O_APPEND write keeps concurrent requests' lines whole
        file.write_all(bytes).await?;
        file.flush().await
    }
}
