#![allow(dead_code)]

use bark::audit::{AuditEntry, AuditTrail};
use bark::config::BarkConfig;
use bark::crypto::{KeyStore, MemoryKeyStore};
use bark::directive::{
    AuditRequest, Directive, DirectiveAuthority, DirectiveContent, DirectiveHandler,
    EnforcementOrder, LoggingHandler, ProtocolDefinition, StateTransition,
};
use chrono::Utc;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

pub const OPERATOR: &str = "axiomhive:operator:test";

/// Default configuration with every path moved under `dir`, permitting
/// {"technical", "regulatory"}.
pub fn test_config(dir: &Path) -> BarkConfig {
    let mut config = BarkConfig::default();
    config.operator_id = OPERATOR.to_string();
    config.dimensions = ["technical", "regulatory"].into_iter().map(String::from).collect();
    config.audit.log_path = dir.join("bark_audit_log.jsonl");
    config.keystore.path = dir.join("keys");
    config.directive.store_path = Some(dir.join("directives.json"));
    config.nonce_state_path = Some(dir.join("nonce.state"));
    config
}

pub struct TestAuthority {
    pub authority: DirectiveAuthority,
    pub audit: AuditTrail,
    pub keys: Arc<MemoryKeyStore>,
    pub dir: TempDir,
}

pub fn authority_with(config_fn: impl FnOnce(&mut BarkConfig), handler: Arc<dyn DirectiveHandler>) -> TestAuthority {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut config = test_config(dir.path());
    config_fn(&mut config);

    let keys = Arc::new(MemoryKeyStore::new(config.keystore.service.clone()));
    let audit = AuditTrail::open(&config.operator_id, &config.audit).expect("Failed to open audit trail");
    let authority = DirectiveAuthority::from_config(&config, keys.clone(), audit.clone(), handler)
        .expect("Failed to build authority");

    TestAuthority {
        authority,
        audit,
        keys,
        dir,
    }
}

pub fn test_authority() -> TestAuthority {
    authority_with(|_| {}, Arc::new(LoggingHandler))
}

pub fn state_transition() -> DirectiveContent {
    DirectiveContent::StateTransition(StateTransition {
        from_state: "idle".to_string(),
        to_state: "active".to_string(),
        conditions: None,
        metadata: None,
    })
}

pub fn enforcement_order() -> DirectiveContent {
    DirectiveContent::EnforcementOrder(EnforcementOrder {
        target: "test_target".to_string(),
        action: "test_action".to_string(),
        reason: "test_reason".to_string(),
        evidence: None,
    })
}

pub fn protocol_definition() -> DirectiveContent {
    DirectiveContent::ProtocolDefinition(ProtocolDefinition {
        name: "Test Protocol".to_string(),
        version: "1.0".to_string(),
        description: "Test protocol for unit testing".to_string(),
        endpoints: vec!["https://api.test.com".to_string()],
        constraints: None,
    })
}

pub fn audit_request() -> DirectiveContent {
    DirectiveContent::AuditRequest(AuditRequest {
        scope: "test_scope".to_string(),
        start_date: Utc::now(),
        end_date: None,
        dimensions: vec!["technical".to_string()],
    })
}

/// Entries in the active log with `action`, optionally for one directive.
pub async fn entries_for(audit: &AuditTrail, action: &str, directive_id: Option<Uuid>) -> Vec<AuditEntry> {
    audit
        .entries()
        .await
        .expect("Failed to read audit log")
        .into_iter()
        .filter(|e| e.action == action)
        .filter(|e| directive_id.map_or(true, |id| e.directive_id == Some(id)))
        .collect()
}

/// Flip one hex digit of the signature, keeping it well-formed.
pub fn tamper_signature(directive: &mut Directive) {
    let signature = directive.signature.as_mut().expect("directive is unsigned");
    let last = signature.pop().expect("empty signature");
    signature.push(if last == '0' { '1' } else { '0' });
}

/// Handler counting successful invocations.
#[derive(Default)]
pub struct CountingHandler {
    pub calls: AtomicUsize,
}

impl CountingHandler {
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl DirectiveHandler for CountingHandler {
    fn protocol_definition(&self, _: &Directive, _: &ProtocolDefinition) -> anyhow::Result<()> {
        self.hit()
    }

    fn enforcement_order(&self, _: &Directive, _: &EnforcementOrder) -> anyhow::Result<()> {
        self.hit()
    }

    fn state_transition(&self, _: &Directive, _: &StateTransition) -> anyhow::Result<()> {
        self.hit()
    }

    fn audit_request(&self, _: &Directive, _: &AuditRequest) -> anyhow::Result<()> {
        self.hit()
    }
}

/// Handler whose state transitions always fail.
pub struct FailingHandler;

impl DirectiveHandler for FailingHandler {
    fn protocol_definition(&self, _: &Directive, _: &ProtocolDefinition) -> anyhow::Result<()> {
        Ok(())
    }

    fn enforcement_order(&self, _: &Directive, _: &EnforcementOrder) -> anyhow::Result<()> {
        Ok(())
    }

    fn state_transition(&self, _: &Directive, transition: &StateTransition) -> anyhow::Result<()> {
        anyhow::bail!("transition {} -> {} refused", transition.from_state, transition.to_state)
    }

    fn audit_request(&self, _: &Directive, _: &AuditRequest) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Key store that cannot hold anything.
pub struct BrokenKeyStore;

impl KeyStore for BrokenKeyStore {
    fn service(&self) -> &str {
        "broken"
    }

    fn store(&self, name: &str, _: &[u8]) -> Result<(), bark::crypto::KeyStoreError> {
        Err(bark::crypto::KeyStoreError::StoreFailed {
            name: name.to_string(),
            reason: "device locked".to_string(),
        })
    }

    fn retrieve(&self, _: &str) -> Result<Option<Vec<u8>>, bark::crypto::KeyStoreError> {
        Ok(None)
    }

    fn delete(&self, _: &str) -> Result<(), bark::crypto::KeyStoreError> {
        Ok(())
    }
}
