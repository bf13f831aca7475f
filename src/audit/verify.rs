//! Audit Log Verification
//!
//! Offline checks of entry signatures in an audit log file.

use anyhow::{anyhow, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::audit::entry::AuditEntry;
use crate::crypto::SigningService;

/// Outcome of verifying a log file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationResult {
    pub entry_count: usize,
    pub signed: usize,
    pub unsigned: usize,
    /// 1-based line numbers whose signature did not verify.
    pub invalid_lines: Vec<usize>,
}

impl VerificationResult {
    pub fn is_valid(&self) -> bool {
        self.invalid_lines.is_empty()
    }
}

/// Load audit log from file, oldest first, keeping line numbers.
pub fn load_audit_log_from_file(path: &Path) -> Result<Vec<(usize, AuditEntry)>> {
    let file = File::open(path)
        .map_err(|e| anyhow!("Failed to open audit log file {}: {}", path.display(), e))?;

    let reader = BufReader::new(file);
    let mut entries = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| anyhow!("Failed to read line {}: {}", line_num + 1, e))?;

        if line.trim().is_empty() {
            continue;
        }

        let entry: AuditEntry = serde_json::from_str(&line)
            .map_err(|e| anyhow!("Failed to parse entry at line {}: {}", line_num + 1, e))?;

        entries.push((line_num + 1, entry));
    }

    debug!("Loaded {} entries from {}", entries.len(), path.display());
    Ok(entries)
}

/// Verify every signed entry in `path` against `public_key`.
///
/// Unsigned entries are counted but not treated as failures; a signature
/// that is malformed or does not match marks its line invalid.
pub fn verify_audit_log_file(path: &Path, public_key: &[u8]) -> Result<VerificationResult> {
    info!("Verifying audit log file: {}", path.display());

    if !path.exists() {
        return Err(anyhow!("Audit log file does not exist: {}", path.display()));
    }

    let signer = SigningService::new();
    let mut result = VerificationResult::default();

    for (line, entry) in load_audit_log_from_file(path)? {
        result.entry_count += 1;
        match entry.verify_signature(&signer, public_key) {
            Ok(None) => result.unsigned += 1,
            Ok(Some(true)) => result.signed += 1,
            Ok(Some(false)) => {
                result.signed += 1;
                warn!("Signature mismatch at line {}: {}", line, entry.summary());
                result.invalid_lines.push(line);
            }
            Err(e) => {
                result.signed += 1;
                warn!("Malformed signature at line {}: {}", line, e);
                result.invalid_lines.push(line);
            }
        }
    }

    info!(
        "Audit log verification finished: {} entries, {} signed, {} invalid",
        result.entry_count,
        result.signed,
        result.invalid_lines.len()
    );
    Ok(result)
}
