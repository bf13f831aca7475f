//! Audit Entry
//!
//! One record per state-changing action. Entries are appended once and never
//! mutated; the optional signature covers the canonical encoding of every
//! other field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::{canonical_bytes, SigningService};
use crate::error::CryptoError;
use crate::value::{iso8601, wire_precision, Metadata};

/// Action names written by the directive authority.
pub mod actions {
    pub const DIRECTIVE_CREATED: &str = "DIRECTIVE_CREATED";
    pub const DIRECTIVE_EXECUTED: &str = "DIRECTIVE_EXECUTED";
    pub const DIRECTIVE_REVOKED: &str = "DIRECTIVE_REVOKED";
    pub const DIRECTIVE_INGESTED: &str = "DIRECTIVE_INGESTED";
    pub const KEY_BOOTSTRAPPED: &str = "KEY_BOOTSTRAPPED";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(with = "iso8601")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "operator")]
    pub operator_id: String,
    pub action: String,
    /// Back-reference for lookups only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directive_id: Option<Uuid>,
    #[serde(default)]
    pub details: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl AuditEntry {
    pub fn new(
        operator_id: impl Into<String>,
        action: impl Into<String>,
        directive_id: Option<Uuid>,
        details: Metadata,
    ) -> Self {
        Self {
            timestamp: wire_precision(Utc::now()),
            operator_id: operator_id.into(),
            action: action.into(),
            directive_id,
            details,
            signature: None,
        }
    }

    pub fn canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        canonical_bytes(self, "signature")
    }

    /// Attach a hex signature over the canonical encoding.
    pub fn sign(
        mut self,
        signer: &SigningService,
        secret_key: &[u8],
    ) -> Result<Self, CryptoError> {
        let payload = self
            .canonical_bytes()
            .map_err(|e| CryptoError::SigningFailed(format!("Failed to encode entry: {}", e)))?;
        self.signature = Some(hex::encode(signer.sign(&payload, secret_key)?));
        Ok(self)
    }

    /// `Ok(None)` for unsigned entries, otherwise whether the signature matches.
    pub fn verify_signature(
        &self,
        signer: &SigningService,
        public_key: &[u8],
    ) -> Result<Option<bool>, CryptoError> {
        let Some(signature) = &self.signature else {
            return Ok(None);
        };
        let signature = hex::decode(signature)
            .map_err(|e| CryptoError::VerificationFailed(format!("Invalid signature hex: {}", e)))?;
        let payload = self.canonical_bytes().map_err(|e| {
            CryptoError::VerificationFailed(format!("Failed to encode entry: {}", e))
        })?;
        signer.verify(&signature, &payload, public_key).map(Some)
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        match &self.directive_id {
            Some(id) => format!("{} by {} ({})", self.action, self.operator_id, id),
            None => format!("{} by {}", self.action, self.operator_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::metadata;

    #[test]
    fn test_entry_json_omits_absent_fields() {
        let entry = AuditEntry::new("op", actions::KEY_BOOTSTRAPPED, None, Metadata::new());
        let value = serde_json::to_value(&entry).unwrap();
        let object = value.as_object().unwrap();
        assert!(!object.contains_key("directive_id"));
        assert!(!object.contains_key("signature"));
        assert_eq!(object["operator"], "op");
    }

    #[test]
    fn test_sign_and_verify_entry() {
        let signer = SigningService::new();
        let keys = signer.generate_keypair().unwrap();

        let entry = AuditEntry::new(
            "op",
            actions::DIRECTIVE_CREATED,
            Some(Uuid::new_v4()),
            metadata([("type", "RAW")]),
        )
        .sign(&signer, &keys.secret_key)
        .unwrap();

        assert_eq!(entry.verify_signature(&signer, &keys.public_key), Ok(Some(true)));

        let mut tampered = entry.clone();
        tampered.action = actions::DIRECTIVE_REVOKED.to_string();
        assert_eq!(tampered.verify_signature(&signer, &keys.public_key), Ok(Some(false)));
    }

    #[test]
    fn test_unsigned_entry_verifies_as_none() {
        let signer = SigningService::new();
        let keys = signer.generate_keypair().unwrap();
        let entry = AuditEntry::new("op", "TEST_ACTION", None, Metadata::new());
        assert_eq!(entry.verify_signature(&signer, &keys.public_key), Ok(None));
    }
}
