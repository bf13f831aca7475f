//! Directive Authority
//!
//! Creates, signs, validates, executes and revokes directives, and writes an
//! audit entry for every state change. Validation always reports the first
//! failing check in the order signature, type, expiration, dimension.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::handlers::DirectiveHandler;
use super::store::DirectiveStore;
use super::types::{Directive, DirectiveContent, DirectiveType};
use crate::audit::{actions, AuditEntry, AuditTrail};
use crate::config::BarkConfig;
use crate::crypto::{KeyStore, NonceSource, SigningService};
use crate::error::{BarkError, CryptoError, Result, SignatureFault};
use crate::value::{metadata, wire_precision, Metadata};

const COMPACT_SIGNATURE_LEN: usize = 64;

/// Static policy the authority enforces.
#[derive(Debug, Clone)]
pub struct AuthorityPolicy {
    pub operator_id: String,
    pub permitted_dimensions: BTreeSet<String>,
    pub allowed_types: BTreeSet<DirectiveType>,
    pub max_expiration: Duration,
    pub private_key_name: String,
    pub public_key_name: String,
}

impl AuthorityPolicy {
    pub fn from_config(config: &BarkConfig) -> Result<Self> {
        let max_expiration = Duration::try_seconds(config.directive.max_expiration_secs)
            .ok_or_else(|| {
                BarkError::ConfigError(format!(
                    "directive.max_expiration_secs {} is out of range",
                    config.directive.max_expiration_secs
                ))
            })?;

        Ok(Self {
            operator_id: config.operator_id.clone(),
            permitted_dimensions: config.dimensions.clone(),
            allowed_types: config
                .directive
                .allowed_directive_types
                .iter()
                .copied()
                .filter(|kind| *kind != DirectiveType::Raw)
                .collect(),
            max_expiration,
            private_key_name: config.keystore.private_key_name.clone(),
            public_key_name: config.keystore.public_key_name.clone(),
        })
    }
}

pub struct DirectiveAuthority {
    policy: AuthorityPolicy,
    signer: SigningService,
    nonces: Arc<NonceSource>,
    keys: Arc<dyn KeyStore>,
    audit: AuditTrail,
    handler: Arc<dyn DirectiveHandler>,
    directives: RwLock<HashMap<Uuid, Directive>>,
    store: Option<DirectiveStore>,
    bootstrap_lock: Mutex<()>,
}

impl DirectiveAuthority {
    pub fn new(
        policy: AuthorityPolicy,
        keys: Arc<dyn KeyStore>,
        nonces: Arc<NonceSource>,
        audit: AuditTrail,
        handler: Arc<dyn DirectiveHandler>,
    ) -> Self {
        Self {
            policy,
            signer: SigningService::new(),
            nonces,
            keys,
            audit,
            handler,
            directives: RwLock::new(HashMap::new()),
            store: None,
            bootstrap_lock: Mutex::new(()),
        }
    }

    /// Build an authority from configuration, restoring persisted nonce and
    /// directive state where paths are configured.
    pub fn from_config(
        config: &BarkConfig,
        keys: Arc<dyn KeyStore>,
        audit: AuditTrail,
        handler: Arc<dyn DirectiveHandler>,
    ) -> Result<Self> {
        let nonces = match &config.nonce_state_path {
            Some(path) => NonceSource::persistent(path)
                .map_err(|e| BarkError::StorageError(e.to_string()))?,
            None => NonceSource::new(),
        };

        let authority = Self::new(
            AuthorityPolicy::from_config(config)?,
            keys,
            Arc::new(nonces),
            audit,
            handler,
        );

        match &config.directive.store_path {
            Some(path) => authority.with_store(DirectiveStore::new(path)),
            None => Ok(authority),
        }
    }

    /// Attach snapshot persistence, loading any directives already stored.
    pub fn with_store(mut self, store: DirectiveStore) -> Result<Self> {
        let loaded = store.load()?;
        let directives = self.directives.get_mut();
        for directive in loaded {
            directives.insert(directive.id, directive);
        }
        info!("Restored {} directives from {}", directives.len(), store.path().display());
        self.store = Some(store);
        Ok(self)
    }

    pub fn policy(&self) -> &AuthorityPolicy {
        &self.policy
    }

    pub fn audit_trail(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn nonce_source(&self) -> &NonceSource {
        &self.nonces
    }

    /// Key ceremony: generate and persist the operator key pair if none
    /// exists, recording `KEY_BOOTSTRAPPED`. Returns the public key.
    pub async fn bootstrap_keys(&self) -> Result<Vec<u8>> {
        let _ceremony = self.bootstrap_lock.lock().await;

        if let Some(secret_key) = self.keys.retrieve(&self.policy.private_key_name)? {
            if let Some(public_key) = self.keys.retrieve(&self.policy.public_key_name)? {
                return Ok(public_key);
            }
            warn!("Public key missing from key store, deriving it from the private key");
            let public_key = self
                .signer
                .public_key_from_secret(&secret_key)
                .map_err(|e| BarkError::KeyUnavailable(e.to_string()))?;
            self.keys.store(&self.policy.public_key_name, &public_key)?;
            return Ok(public_key);
        }

        let pair = self.signer.generate_keypair()?;
        self.keys.store(&self.policy.private_key_name, &pair.secret_key)?;
        self.keys.store(&self.policy.public_key_name, &pair.public_key)?;

        let public_hex = hex::encode(&pair.public_key);
        info!(
            "Bootstrapped signing key for {} in {} ({})",
            self.policy.operator_id,
            self.keys.service(),
            public_hex
        );

        self.record(
            actions::KEY_BOOTSTRAPPED,
            None,
            metadata([
                ("public_key", public_hex),
                ("hash_algorithm", SigningService::HASH_ALGORITHM.to_string()),
                ("signature_algorithm", SigningService::SIGNATURE_ALGORITHM.to_string()),
                ("key_store", self.keys.service().to_string()),
            ]),
        )
        .await;

        Ok(pair.public_key)
    }

    pub fn public_key(&self) -> Result<Vec<u8>> {
        self.keys
            .retrieve(&self.policy.public_key_name)?
            .ok_or_else(|| BarkError::KeyUnavailable("public key not found".to_string()))
    }

    fn existing_private_key(&self) -> Result<Vec<u8>> {
        self.keys
            .retrieve(&self.policy.private_key_name)?
            .ok_or_else(|| BarkError::KeyUnavailable("private key not found".to_string()))
    }

    /// Private key for signing, bootstrapping the pair on first use.
    async fn signing_key(&self) -> Result<Vec<u8>> {
        if let Some(secret_key) = self.keys.retrieve(&self.policy.private_key_name)? {
            return Ok(secret_key);
        }
        self.bootstrap_keys().await?;
        self.existing_private_key()
    }

    fn sign_directive(&self, directive: &mut Directive, secret_key: &[u8]) -> Result<()> {
        let payload = directive.canonical_bytes().map_err(|e| {
            CryptoError::SigningFailed(format!("Failed to canonicalize directive: {}", e))
        })?;
        let signature = self.signer.sign(&payload, secret_key)?;
        directive.signature = Some(hex::encode(signature));
        Ok(())
    }

    /// Create, sign and store a directive. `ttl` of `None` never expires; a
    /// negative `ttl` yields a directive that is already expired.
    pub async fn create<I, S>(
        &self,
        content: DirectiveContent,
        dimensions: I,
        ttl: Option<Duration>,
    ) -> Result<Directive>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(ttl) = ttl {
            if ttl > self.policy.max_expiration {
                return Err(BarkError::ExpirationTooLong {
                    requested: ttl.num_seconds(),
                    max: self.policy.max_expiration.num_seconds(),
                });
            }
        }

        let timestamp = wire_precision(Utc::now());
        let expiration = match ttl {
            Some(ttl) => Some(
                timestamp
                    .checked_add_signed(ttl)
                    .ok_or(BarkError::ExpirationOutOfRange(ttl.num_seconds()))?,
            ),
            None => None,
        };

        let secret_key = self.signing_key().await?;
        let nonce = self.nonces.generate().ok_or(BarkError::NonceExhausted)?;

        let mut directive = Directive {
            id: Uuid::new_v4(),
            kind: content.directive_type(),
            operator_id: self.policy.operator_id.clone(),
            timestamp,
            nonce,
            signature: None,
            content,
            dimensions: dimensions.into_iter().map(Into::into).collect(),
            expiration,
        };
        self.sign_directive(&mut directive, &secret_key)?;

        {
            let mut directives = self.directives.write().await;
            directives.insert(directive.id, directive.clone());
            self.persist(&directives);
        }

        self.record(
            actions::DIRECTIVE_CREATED,
            Some(directive.id),
            metadata([("type", directive.kind.as_str())]),
        )
        .await;

        info!("Created directive {}", directive.summary());
        Ok(directive)
    }

    fn verify_signature(&self, directive: &Directive) -> Result<()> {
        let encoded = directive
            .signature
            .as_deref()
            .ok_or(BarkError::InvalidSignature(SignatureFault::Missing))?;

        let signature = hex::decode(encoded)
            .map_err(|e| BarkError::InvalidSignature(SignatureFault::Malformed(e.to_string())))?;
        if signature.len() != COMPACT_SIGNATURE_LEN {
            return Err(BarkError::InvalidSignature(SignatureFault::Malformed(format!(
                "expected {} bytes, got {}",
                COMPACT_SIGNATURE_LEN,
                signature.len()
            ))));
        }

        let public_key = self.public_key()?;
        let payload = directive.canonical_bytes().map_err(|e| {
            CryptoError::VerificationFailed(format!("Failed to canonicalize directive: {}", e))
        })?;

        if self.signer.verify(&signature, &payload, &public_key)? {
            Ok(())
        } else {
            Err(BarkError::InvalidSignature(SignatureFault::Mismatch))
        }
    }

    /// The declared type must agree with the content it carries.
    fn check_kind(directive: &Directive) -> Result<()> {
        if directive.kind != directive.content.directive_type() {
            warn!(
                "Directive {} declares {} but carries {}",
                directive.id,
                directive.kind,
                directive.content.directive_type()
            );
            return Err(BarkError::UnsupportedType(directive.kind));
        }
        Ok(())
    }

    /// The earlier of the directive's own expiration and that of the stored
    /// record with the same id. Revocation only rewrites the stored record,
    /// so copies signed before revocation are caught here.
    async fn effective_expiration(&self, directive: &Directive) -> Option<DateTime<Utc>> {
        let stored = self
            .directives
            .read()
            .await
            .get(&directive.id)
            .and_then(|d| d.expiration);

        match (directive.expiration, stored) {
            (Some(own), Some(stored)) => Some(own.min(stored)),
            (own, stored) => own.or(stored),
        }
    }

    pub async fn validate(&self, directive: &Directive) -> Result<()> {
        self.verify_signature(directive)?;
        Self::check_kind(directive)?;

        if let Some(expiration) = self.effective_expiration(directive).await {
            if expiration <= Utc::now() {
                return Err(BarkError::Expired(expiration));
            }
        }

        if directive.dimensions.is_disjoint(&self.policy.permitted_dimensions) {
            return Err(BarkError::UnauthorizedDimension(
                directive.dimensions.iter().cloned().collect(),
            ));
        }

        debug!("Validated directive {}", directive.summary());
        Ok(())
    }

    /// Validate and dispatch to the handler for the content kind. A handler
    /// failure propagates and leaves no `DIRECTIVE_EXECUTED` entry.
    pub async fn execute(&self, directive: &Directive) -> Result<()> {
        self.validate(directive).await?;

        let kind = directive.content.directive_type();
        if !self.policy.allowed_types.contains(&kind) {
            return Err(BarkError::UnsupportedType(kind));
        }

        let outcome = match &directive.content {
            DirectiveContent::ProtocolDefinition(definition) => {
                self.handler.protocol_definition(directive, definition)
            }
            DirectiveContent::EnforcementOrder(order) => {
                self.handler.enforcement_order(directive, order)
            }
            DirectiveContent::StateTransition(transition) => {
                self.handler.state_transition(directive, transition)
            }
            DirectiveContent::AuditRequest(request) => self.handler.audit_request(directive, request),
            DirectiveContent::Raw(_) => return Err(BarkError::UnsupportedType(kind)),
        };

        if let Err(e) = outcome {
            warn!("Handler failed for directive {}: {:#}", directive.summary(), e);
            return Err(BarkError::HandlerFailed(format!("{:#}", e)));
        }

        self.record(
            actions::DIRECTIVE_EXECUTED,
            Some(directive.id),
            metadata([("type", kind.as_str())]),
        )
        .await;

        info!("Executed directive {}", directive.summary());
        Ok(())
    }

    /// Expire a stored directive now and re-sign the rewritten record.
    /// Revocation is terminal: an earlier expiration is never pushed later.
    pub async fn revoke(&self, id: Uuid) -> Result<Directive> {
        let revoked = {
            let mut directives = self.directives.write().await;
            let current = directives.get(&id).ok_or(BarkError::NotFound(id))?;

            let now = wire_precision(Utc::now());
            let mut revoked = current.clone();
            revoked.expiration = Some(match current.expiration {
                Some(expiration) if expiration <= now => expiration,
                _ => now,
            });
            self.sign_directive(&mut revoked, &self.existing_private_key()?)?;

            directives.insert(id, revoked.clone());
            self.persist(&directives);
            revoked
        };

        self.record(
            actions::DIRECTIVE_REVOKED,
            Some(id),
            metadata([("original_type", revoked.kind.as_str())]),
        )
        .await;

        info!("Revoked directive {}", revoked.summary());
        Ok(revoked)
    }

    /// Accept a directive produced elsewhere. Its nonce must be fresh for the
    /// operator, so a replayed directive is rejected.
    pub async fn ingest(&self, directive: Directive) -> Result<()> {
        if directive.operator_id != self.policy.operator_id {
            return Err(BarkError::UnknownOperator(directive.operator_id));
        }
        self.verify_signature(&directive)?;
        Self::check_kind(&directive)?;

        let (id, nonce, kind) = (directive.id, directive.nonce, directive.kind);
        {
            let mut directives = self.directives.write().await;
            if directives.contains_key(&id) || !self.nonces.validate(nonce) {
                warn!("Rejected replayed directive {} (nonce {})", id, nonce);
                return Err(BarkError::NonceReplay(nonce));
            }
            directives.insert(id, directive);
            self.persist(&directives);
        }

        self.record(
            actions::DIRECTIVE_INGESTED,
            Some(id),
            metadata([("type", kind.as_str().to_string()), ("nonce", nonce.to_string())]),
        )
        .await;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Option<Directive> {
        self.directives.read().await.get(&id).cloned()
    }

    /// Directives without expiration or expiring after `as_of` (default now),
    /// oldest first.
    pub async fn list_active(&self, as_of: Option<DateTime<Utc>>) -> Vec<Directive> {
        let as_of = as_of.unwrap_or_else(Utc::now);
        let mut active: Vec<Directive> = self
            .directives
            .read()
            .await
            .values()
            .filter(|d| !d.is_expired_at(as_of))
            .cloned()
            .collect();
        active.sort_by_key(|d| (d.timestamp, d.nonce));
        active
    }

    fn persist(&self, directives: &HashMap<Uuid, Directive>) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(directives.values()) {
                error!("Failed to persist directives: {}", e);
            }
        }
    }

    /// Append an audit entry, signed with the operator key when available.
    /// Audit failures are logged and never fail the calling action.
    async fn record(&self, action: &str, directive_id: Option<Uuid>, details: Metadata) {
        let mut entry = AuditEntry::new(&self.policy.operator_id, action, directive_id, details);

        match self.keys.retrieve(&self.policy.private_key_name) {
            Ok(Some(secret_key)) => match entry.clone().sign(&self.signer, &secret_key) {
                Ok(signed) => entry = signed,
                Err(e) => warn!("Writing unsigned audit entry for {}: {}", action, e),
            },
            Ok(None) => debug!("No signing key yet, writing unsigned audit entry for {}", action),
            Err(e) => warn!("Writing unsigned audit entry for {}: {}", action, e),
        }

        if let Err(e) = self.audit.append(&entry).await {
            error!("Failed to write audit entry {}: {:#}", entry.summary(), e);
        }
    }
}
