use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::entry::AuditEntry;
use crate::value::iso8601;

/// Point-in-time snapshot of the entries inside a closed interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    #[serde(with = "iso8601")]
    pub generated_at: DateTime<Utc>,
    #[serde(with = "iso8601")]
    pub start_date: DateTime<Utc>,
    #[serde(with = "iso8601")]
    pub end_date: DateTime<Utc>,
    pub total_entries: usize,
    pub operator: String,
    pub entries: Vec<AuditEntry>,
}

impl AuditReport {
    pub fn new(
        operator: impl Into<String>,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        entries: Vec<AuditEntry>,
    ) -> Self {
        Self {
            generated_at: Utc::now(),
            start_date,
            end_date,
            total_entries: entries.len(),
            operator: operator.into(),
            entries,
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }
}
