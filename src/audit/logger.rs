//! Audit Trail
//!
//! Manages the append-only JSONL audit log: one entry per line, newest at the
//! tail. Writes go through a single mutex per file so physical order matches
//! logical order. When the active file grows past the configured size it is
//! renamed to `<log>.bak` (one generation kept) and a fresh file is started.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::audit::entry::AuditEntry;
use crate::audit::mirror::{MirrorStats, RemoteMirror};
use crate::audit::report::AuditReport;
use crate::config::AuditConfig;

const MIRROR_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Audit trail handle. Clones share the same file and mirror.
#[derive(Clone)]
pub struct AuditTrail {
    operator_id: Arc<str>,
    log_path: Arc<PathBuf>,
    backup_path: Arc<PathBuf>,
    max_log_size: u64,
    file: Arc<Mutex<Option<File>>>,
    entry_count: Arc<AtomicU64>,
    rotations: Arc<AtomicU64>,
    mirror: Option<Arc<RemoteMirror>>,
}

fn open_log(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| anyhow!("Failed to open audit log file {}: {}", path.display(), e))
}

fn backup_path_for(log_path: &Path) -> PathBuf {
    let mut raw = log_path.as_os_str().to_owned();
    raw.push(".bak");
    PathBuf::from(raw)
}

fn parse_lines(contents: &str) -> Vec<AuditEntry> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(n, line)| match serde_json::from_str::<AuditEntry>(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unparsable audit line {}: {}", n + 1, e);
                None
            }
        })
        .collect()
}

impl AuditTrail {
    /// Open (or create) the audit log described by `config`.
    ///
    /// Remote mirroring needs a Tokio runtime; outside one it is disabled
    /// with a warning.
    pub fn open(operator_id: impl Into<String>, config: &AuditConfig) -> Result<Self> {
        let log_path = config.log_path.clone();

        if let Some(parent) = log_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| anyhow!("Failed to create log directory: {}", e))?;
            }
        }

        let file = open_log(&log_path)?;
        let existing = std::fs::read_to_string(&log_path)
            .map_err(|e| anyhow!("Failed to read audit log: {}", e))?
            .lines()
            .filter(|line| !line.trim().is_empty())
            .count() as u64;

        let mirror = if config.enable_remote_sync {
            RemoteMirror::spawn(
                config.remote_audit_endpoint.clone(),
                config.remote_queue_size,
                Duration::from_secs(config.remote_timeout_secs),
            )
            .map(Arc::new)
        } else {
            None
        };

        info!(
            "Audit trail opened at {} ({} existing entries, remote sync {})",
            log_path.display(),
            existing,
            if mirror.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            operator_id: Arc::from(operator_id.into()),
            backup_path: Arc::new(backup_path_for(&log_path)),
            log_path: Arc::new(log_path),
            max_log_size: config.max_log_size,
            file: Arc::new(Mutex::new(Some(file))),
            entry_count: Arc::new(AtomicU64::new(existing)),
            rotations: Arc::new(AtomicU64::new(0)),
            mirror,
        })
    }

    /// Append an entry to the active log, rotating afterwards if the file
    /// has outgrown the size threshold, then hand it to the remote mirror.
    pub async fn append(&self, entry: &AuditEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)
            .map_err(|e| anyhow!("Failed to serialize entry: {}", e))?;
        line.push('\n');

        {
            let mut slot = self.file.lock().await;
            if slot.is_none() {
                *slot = Some(open_log(&self.log_path)?);
            }
            let file = slot
                .as_mut()
                .ok_or_else(|| anyhow!("Audit log file not available"))?;

            file.write_all(line.as_bytes())
                .map_err(|e| anyhow!("Failed to write to audit log: {}", e))?;
            file.flush()
                .map_err(|e| anyhow!("Failed to flush audit log: {}", e))?;
            self.entry_count.fetch_add(1, Ordering::SeqCst);

            let size = file.metadata().map(|m| m.len()).unwrap_or(0);
            if size > self.max_log_size {
                if let Err(e) = self.rotate(&mut slot) {
                    error!("Failed to rotate audit log: {}", e);
                }
            }
        }

        if let Some(mirror) = &self.mirror {
            mirror.enqueue(entry);
        }

        debug!("Appended audit entry: {}", entry.summary());
        Ok(())
    }

    /// Archive the active file to the backup path and start a new one.
    /// Caller holds the file lock.
    fn rotate(&self, slot: &mut Option<File>) -> Result<()> {
        if let Some(file) = slot.take() {
            if let Err(e) = file.sync_all() {
                warn!("Failed to sync audit log before rotation: {}", e);
            }
        }

        let renamed = std::fs::rename(self.log_path.as_path(), self.backup_path.as_path());
        *slot = Some(open_log(&self.log_path)?);
        renamed.map_err(|e| anyhow!("Failed to archive audit log: {}", e))?;

        self.entry_count.store(0, Ordering::SeqCst);
        let generation = self.rotations.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "Rotated audit log to {} (rotation #{})",
            self.backup_path.display(),
            generation
        );
        Ok(())
    }

    async fn read_active(&self) -> Result<String> {
        let _guard = self.file.lock().await;
        match std::fs::read_to_string(self.log_path.as_path()) {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(anyhow!("Failed to read audit log: {}", e)),
        }
    }

    /// Up to `limit` entries at or after `since`, newest first.
    /// Only the active log is consulted.
    pub async fn query(&self, since: Option<DateTime<Utc>>, limit: usize) -> Result<Vec<AuditEntry>> {
        let contents = self.read_active().await?;
        Ok(parse_lines(&contents)
            .into_iter()
            .rev()
            .filter(|entry| since.map_or(true, |since| entry.timestamp >= since))
            .take(limit)
            .collect())
    }

    /// All entries in the active log, oldest first.
    pub async fn entries(&self) -> Result<Vec<AuditEntry>> {
        let contents = self.read_active().await?;
        Ok(parse_lines(&contents))
    }

    /// Build a report of the entries in `[start, end]`, newest first.
    pub async fn report(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<AuditReport> {
        if end < start {
            return Err(anyhow!("Report end {} precedes start {}", end, start));
        }

        let contents = self.read_active().await?;
        let entries: Vec<AuditEntry> = parse_lines(&contents)
            .into_iter()
            .rev()
            .filter(|entry| entry.timestamp >= start && entry.timestamp <= end)
            .collect();

        info!("Generated audit report with {} entries", entries.len());
        Ok(AuditReport::new(&*self.operator_id, start, end, entries))
    }

    pub fn operator_id(&self) -> &str {
        &self.operator_id
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    /// Entries currently in the active log.
    pub fn entry_count(&self) -> u64 {
        self.entry_count.load(Ordering::SeqCst)
    }

    /// Rotations performed by this handle since it was opened.
    pub fn rotation_count(&self) -> u64 {
        self.rotations.load(Ordering::SeqCst)
    }

    pub fn mirror_stats(&self) -> Option<&MirrorStats> {
        self.mirror.as_deref().map(|m| m.stats())
    }

    /// Flush the log and drain the remote mirror.
    pub async fn close(&self) -> Result<()> {
        if let Some(file) = self.file.lock().await.as_mut() {
            file.flush()
                .map_err(|e| anyhow!("Failed to flush audit log on close: {}", e))?;
        }
        if let Some(mirror) = &self.mirror {
            mirror.close(MIRROR_DRAIN_GRACE).await;
        }
        Ok(())
    }
}
