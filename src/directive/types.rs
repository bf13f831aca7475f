use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::crypto::canonical_bytes;
use crate::value::{iso8601, Metadata};

/// Fixed enumerated directive kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DirectiveType {
    ProtocolDefinition,
    EnforcementOrder,
    StateTransition,
    AuditRequest,
    Raw,
}

impl DirectiveType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DirectiveType::ProtocolDefinition => "PROTOCOL_DEFINITION",
            DirectiveType::EnforcementOrder => "ENFORCEMENT_ORDER",
            DirectiveType::StateTransition => "STATE_TRANSITION",
            DirectiveType::AuditRequest => "AUDIT_REQUEST",
            DirectiveType::Raw => "RAW",
        }
    }

    /// Kinds that have an execution handler.
    pub fn executable() -> [DirectiveType; 4] {
        [
            DirectiveType::ProtocolDefinition,
            DirectiveType::EnforcementOrder,
            DirectiveType::StateTransition,
            DirectiveType::AuditRequest,
        ]
    }
}

impl fmt::Display for DirectiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DirectiveType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROTOCOL_DEFINITION" => Ok(DirectiveType::ProtocolDefinition),
            "ENFORCEMENT_ORDER" => Ok(DirectiveType::EnforcementOrder),
            "STATE_TRANSITION" => Ok(DirectiveType::StateTransition),
            "AUDIT_REQUEST" => Ok(DirectiveType::AuditRequest),
            "RAW" => Ok(DirectiveType::Raw),
            _ => Err(format!("Unknown directive type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolDefinition {
    pub name: String,
    pub version: String,
    pub description: String,
    pub endpoints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Metadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcementOrder {
    pub target: String,
    pub action: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransition {
    pub from_state: String,
    pub to_state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Metadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRequest {
    pub scope: String,
    #[serde(with = "iso8601")]
    pub start_date: DateTime<Utc>,
    #[serde(default, with = "iso8601::option", skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    pub dimensions: Vec<String>,
}

/// Directive payload, encoded on the wire as `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DirectiveContent {
    ProtocolDefinition(ProtocolDefinition),
    EnforcementOrder(EnforcementOrder),
    StateTransition(StateTransition),
    AuditRequest(AuditRequest),
    Raw(Metadata),
}

impl DirectiveContent {
    pub fn directive_type(&self) -> DirectiveType {
        match self {
            DirectiveContent::ProtocolDefinition(_) => DirectiveType::ProtocolDefinition,
            DirectiveContent::EnforcementOrder(_) => DirectiveType::EnforcementOrder,
            DirectiveContent::StateTransition(_) => DirectiveType::StateTransition,
            DirectiveContent::AuditRequest(_) => DirectiveType::AuditRequest,
            DirectiveContent::Raw(_) => DirectiveType::Raw,
        }
    }
}

/// A signed administrative command.
///
/// The signature covers [`Directive::canonical_bytes`], i.e. every field
/// except the signature itself. Mutating any field after signing
/// invalidates the signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: DirectiveType,
    #[serde(rename = "operator")]
    pub operator_id: String,
    #[serde(with = "iso8601")]
    pub timestamp: DateTime<Utc>,
    pub nonce: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub content: DirectiveContent,
    pub dimensions: BTreeSet<String>,
    #[serde(default, with = "iso8601::option", skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
}

impl Directive {
    /// Fields excluded from the signed encoding.
    pub const SIGNATURE_FIELD: &'static str = "signature";

    pub fn canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        canonical_bytes(self, Self::SIGNATURE_FIELD)
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// True if the directive has expired at `as_of`.
    pub fn is_expired_at(&self, as_of: DateTime<Utc>) -> bool {
        matches!(self.expiration, Some(expiration) if expiration <= as_of)
    }

    pub fn summary(&self) -> String {
        format!("{} {} (nonce {})", self.kind, self.id, self.nonce)
    }
}
