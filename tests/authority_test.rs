use bark::audit::actions;
use bark::crypto::SigningService;
use bark::directive::{DirectiveContent, DirectiveType, LoggingHandler};
use bark::error::{BarkError, SignatureFault};
use bark::value::metadata;
use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

mod common;
use common::*;

#[tokio::test]
async fn test_scenario_execute_then_revoke() {
    let t = test_authority();

    let directive = t
        .authority
        .create(state_transition(), ["technical"], Some(Duration::seconds(3600)))
        .await
        .unwrap();
    assert_eq!(directive.kind, DirectiveType::StateTransition);
    assert_eq!(directive.operator_id, OPERATOR);
    assert!(directive.is_signed());

    t.authority.execute(&directive).await.unwrap();
    assert_eq!(
        entries_for(&t.audit, actions::DIRECTIVE_EXECUTED, Some(directive.id)).await.len(),
        1
    );

    t.authority.revoke(directive.id).await.unwrap();

    let result = t.authority.execute(&directive).await;
    assert!(matches!(result, Err(BarkError::Expired(_))), "got {:?}", result);
    assert_eq!(
        entries_for(&t.audit, actions::DIRECTIVE_EXECUTED, Some(directive.id)).await.len(),
        1
    );
    assert_eq!(
        entries_for(&t.audit, actions::DIRECTIVE_REVOKED, Some(directive.id)).await.len(),
        1
    );
}

#[tokio::test]
async fn test_scenario_unauthorized_dimension() {
    let t = test_authority();

    let directive = t
        .authority
        .create(state_transition(), ["unknown_dim"], Some(Duration::seconds(3600)))
        .await
        .unwrap();

    let result = t.authority.execute(&directive).await;
    match result {
        Err(BarkError::UnauthorizedDimension(dims)) => assert_eq!(dims, vec!["unknown_dim".to_string()]),
        other => panic!("expected UnauthorizedDimension, got {:?}", other),
    }

    assert_eq!(
        entries_for(&t.audit, actions::DIRECTIVE_CREATED, Some(directive.id)).await.len(),
        1
    );
    assert!(entries_for(&t.audit, actions::DIRECTIVE_EXECUTED, Some(directive.id))
        .await
        .is_empty());
}

#[tokio::test]
async fn test_each_content_kind_executes() {
    let handler = Arc::new(CountingHandler::default());
    let t = authority_with(|_| {}, handler.clone());

    for content in [protocol_definition(), enforcement_order(), state_transition(), audit_request()] {
        let directive = t
            .authority
            .create(content, ["regulatory"], Some(Duration::seconds(600)))
            .await
            .unwrap();
        t.authority.execute(&directive).await.unwrap();
    }

    assert_eq!(handler.count(), 4);
    assert_eq!(entries_for(&t.audit, actions::DIRECTIVE_EXECUTED, None).await.len(), 4);
}

#[tokio::test]
async fn test_signature_faults_are_distinguishable() {
    let t = test_authority();
    let directive = t
        .authority
        .create(enforcement_order(), ["regulatory"], Some(Duration::seconds(600)))
        .await
        .unwrap();

    let mut missing = directive.clone();
    missing.signature = None;
    assert!(matches!(
        t.authority.validate(&missing).await,
        Err(BarkError::InvalidSignature(SignatureFault::Missing))
    ));

    let mut malformed = directive.clone();
    malformed.signature = Some("invalid_signature".to_string());
    assert!(matches!(
        t.authority.validate(&malformed).await,
        Err(BarkError::InvalidSignature(SignatureFault::Malformed(_)))
    ));

    let mut truncated = directive.clone();
    truncated.signature = Some("abcd".to_string());
    assert!(matches!(
        t.authority.validate(&truncated).await,
        Err(BarkError::InvalidSignature(SignatureFault::Malformed(_)))
    ));

    let mut tampered = directive.clone();
    tamper_signature(&mut tampered);
    assert!(matches!(
        t.authority.execute(&tampered).await,
        Err(BarkError::InvalidSignature(SignatureFault::Mismatch))
    ));
}

#[tokio::test]
async fn test_field_mutation_invalidates_signature() {
    let t = test_authority();
    let directive = t
        .authority
        .create(state_transition(), ["technical"], Some(Duration::seconds(600)))
        .await
        .unwrap();

    let mut widened = directive.clone();
    widened.dimensions.insert("economic".to_string());
    assert!(matches!(
        t.authority.validate(&widened).await,
        Err(BarkError::InvalidSignature(SignatureFault::Mismatch))
    ));

    let mut extended = directive.clone();
    extended.expiration = None;
    assert!(matches!(
        t.authority.validate(&extended).await,
        Err(BarkError::InvalidSignature(SignatureFault::Mismatch))
    ));

    t.authority.validate(&directive).await.unwrap();
}

#[tokio::test]
async fn test_expired_directive_rejected() {
    let t = test_authority();
    let directive = t
        .authority
        .create(audit_request(), ["technical"], Some(Duration::seconds(-60)))
        .await
        .unwrap();

    assert!(matches!(t.authority.execute(&directive).await, Err(BarkError::Expired(_))));
    assert!(entries_for(&t.audit, actions::DIRECTIVE_EXECUTED, None).await.is_empty());
}

#[tokio::test]
async fn test_failure_precedence() {
    let t = test_authority();

    let expired_and_foreign = t
        .authority
        .create(state_transition(), ["unknown_dim"], Some(Duration::seconds(-60)))
        .await
        .unwrap();
    assert!(matches!(
        t.authority.validate(&expired_and_foreign).await,
        Err(BarkError::Expired(_))
    ));

    let mut everything_wrong = expired_and_foreign.clone();
    tamper_signature(&mut everything_wrong);
    assert!(matches!(
        t.authority.validate(&everything_wrong).await,
        Err(BarkError::InvalidSignature(_))
    ));

    let foreign_only = t
        .authority
        .create(state_transition(), ["unknown_dim"], None)
        .await
        .unwrap();
    assert!(matches!(
        t.authority.validate(&foreign_only).await,
        Err(BarkError::UnauthorizedDimension(_))
    ));
}

#[tokio::test]
async fn test_raw_content_stored_but_never_executed() {
    let t = test_authority();
    let directive = t
        .authority
        .create(
            DirectiveContent::Raw(metadata([("opaque", "payload")])),
            ["technical"],
            Some(Duration::seconds(600)),
        )
        .await
        .unwrap();

    t.authority.validate(&directive).await.unwrap();
    assert!(t.authority.get(directive.id).await.is_some());

    let result = t.authority.execute(&directive).await;
    assert!(matches!(result, Err(BarkError::UnsupportedType(DirectiveType::Raw))));
    assert!(result.unwrap_err().is_authorization_failure());
}

#[tokio::test]
async fn test_disallowed_type_rejected() {
    let t = authority_with(
        |config| config.directive.allowed_directive_types = vec![DirectiveType::StateTransition],
        Arc::new(LoggingHandler),
    );

    let order = t
        .authority
        .create(enforcement_order(), ["technical"], Some(Duration::seconds(600)))
        .await
        .unwrap();
    assert!(matches!(
        t.authority.execute(&order).await,
        Err(BarkError::UnsupportedType(DirectiveType::EnforcementOrder))
    ));

    let transition = t
        .authority
        .create(state_transition(), ["technical"], Some(Duration::seconds(600)))
        .await
        .unwrap();
    t.authority.execute(&transition).await.unwrap();
}

#[tokio::test]
async fn test_handler_failure_writes_no_execution_entry() {
    let t = authority_with(|_| {}, Arc::new(FailingHandler));

    let directive = t
        .authority
        .create(state_transition(), ["technical"], Some(Duration::seconds(600)))
        .await
        .unwrap();

    match t.authority.execute(&directive).await {
        Err(BarkError::HandlerFailed(reason)) => assert!(reason.contains("refused")),
        other => panic!("expected HandlerFailed, got {:?}", other),
    }
    assert!(entries_for(&t.audit, actions::DIRECTIVE_EXECUTED, Some(directive.id))
        .await
        .is_empty());

    let order = t
        .authority
        .create(enforcement_order(), ["technical"], Some(Duration::seconds(600)))
        .await
        .unwrap();
    t.authority.execute(&order).await.unwrap();
    assert_eq!(entries_for(&t.audit, actions::DIRECTIVE_EXECUTED, None).await.len(), 1);
}

#[tokio::test]
async fn test_revocation_is_terminal() {
    let t = test_authority();
    let directive = t
        .authority
        .create(state_transition(), ["technical"], None)
        .await
        .unwrap();

    let revoked = t.authority.revoke(directive.id).await.unwrap();
    let first_expiration = revoked.expiration.expect("revocation sets expiration");
    assert!(first_expiration <= Utc::now());

    // The stored copy carries a fresh signature, so expiration is what fails.
    let stored = t.authority.get(directive.id).await.unwrap();
    assert_eq!(stored, revoked);
    assert!(matches!(t.authority.execute(&stored).await, Err(BarkError::Expired(_))));
    assert!(matches!(t.authority.execute(&directive).await, Err(BarkError::Expired(_))));

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let again = t.authority.revoke(directive.id).await.unwrap();
    assert_eq!(again.expiration, Some(first_expiration));

    assert!(t.authority.list_active(None).await.iter().all(|d| d.id != directive.id));
}

#[tokio::test]
async fn test_revoke_unknown_directive() {
    let t = test_authority();
    let id = Uuid::new_v4();
    assert!(matches!(t.authority.revoke(id).await, Err(BarkError::NotFound(missing)) if missing == id));
    assert!(entries_for(&t.audit, actions::DIRECTIVE_REVOKED, None).await.is_empty());
}

#[tokio::test]
async fn test_list_active_as_of() {
    let t = test_authority();
    let short = t
        .authority
        .create(state_transition(), ["technical"], Some(Duration::seconds(60)))
        .await
        .unwrap();
    let long = t
        .authority
        .create(state_transition(), ["technical"], Some(Duration::seconds(3600)))
        .await
        .unwrap();
    let forever = t
        .authority
        .create(state_transition(), ["technical"], None)
        .await
        .unwrap();

    let now: Vec<Uuid> = t.authority.list_active(None).await.iter().map(|d| d.id).collect();
    assert_eq!(now, vec![short.id, long.id, forever.id]);

    let later = Utc::now() + Duration::seconds(120);
    let ids: Vec<Uuid> = t.authority.list_active(Some(later)).await.iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![long.id, forever.id]);
}

#[tokio::test]
async fn test_ttl_above_maximum_rejected() {
    let t = test_authority();
    let result = t
        .authority
        .create(state_transition(), ["technical"], Some(Duration::seconds(3601)))
        .await;
    assert!(matches!(
        result,
        Err(BarkError::ExpirationTooLong { requested: 3601, max: 3600 })
    ));
    assert!(entries_for(&t.audit, actions::DIRECTIVE_CREATED, None).await.is_empty());
}

#[tokio::test]
async fn test_ttl_outside_time_range_rejected() {
    let t = test_authority();
    let result = t
        .authority
        .create(state_transition(), ["technical"], Some(Duration::seconds(-9_000_000_000_000)))
        .await;
    assert!(matches!(
        result,
        Err(BarkError::ExpirationOutOfRange(-9_000_000_000_000))
    ));
    assert!(t.authority.list_active(None).await.is_empty());
    assert!(entries_for(&t.audit, actions::DIRECTIVE_CREATED, None).await.is_empty());
}

#[tokio::test]
async fn test_declared_type_must_match_content() {
    let t = test_authority();
    let mut directive = t
        .authority
        .create(
            DirectiveContent::Raw(metadata([("opaque", "payload")])),
            ["technical"],
            None,
        )
        .await
        .unwrap();

    // Re-signed by the operator key, so only the type disagreement remains.
    directive.kind = DirectiveType::StateTransition;
    let secret_key = bark::crypto::KeyStore::retrieve(t.keys.as_ref(), "bark_private_key")
        .unwrap()
        .unwrap();
    let signature = SigningService::new()
        .sign(&directive.canonical_bytes().unwrap(), &secret_key)
        .unwrap();
    directive.signature = Some(hex::encode(signature));

    assert!(matches!(
        t.authority.validate(&directive).await,
        Err(BarkError::UnsupportedType(DirectiveType::StateTransition))
    ));
    assert!(matches!(
        t.authority.execute(&directive).await,
        Err(BarkError::UnsupportedType(_))
    ));

    let target = test_authority();
    for name in ["bark_private_key", "bark_public_key"] {
        let value = bark::crypto::KeyStore::retrieve(t.keys.as_ref(), name)
            .unwrap()
            .unwrap();
        bark::crypto::KeyStore::store(target.keys.as_ref(), name, &value).unwrap();
    }
    assert!(matches!(
        target.authority.ingest(directive.clone()).await,
        Err(BarkError::UnsupportedType(_))
    ));
    assert!(target.authority.get(directive.id).await.is_none());
    assert!(entries_for(&target.audit, actions::DIRECTIVE_INGESTED, None).await.is_empty());
}

#[tokio::test]
async fn test_key_bootstrap_happens_once_and_is_audited() {
    let t = test_authority();
    assert!(matches!(t.authority.public_key(), Err(BarkError::KeyUnavailable(_))));

    t.authority
        .create(state_transition(), ["technical"], None)
        .await
        .unwrap();
    t.authority
        .create(state_transition(), ["technical"], None)
        .await
        .unwrap();

    let public_key = t.authority.bootstrap_keys().await.unwrap();
    assert_eq!(public_key, t.authority.public_key().unwrap());

    let bootstraps = entries_for(&t.audit, actions::KEY_BOOTSTRAPPED, None).await;
    assert_eq!(bootstraps.len(), 1);
    assert_eq!(
        bootstraps[0].details["public_key"].as_str(),
        Some(hex::encode(&public_key).as_str())
    );

    // Every entry written after bootstrap is signed with the operator key.
    let result =
        bark::audit::verify_audit_log_file(t.audit.log_path(), &public_key).unwrap();
    assert!(result.is_valid());
    assert_eq!(result.entry_count, 3);
    assert_eq!(result.unsigned, 0);
}

#[tokio::test]
async fn test_missing_key_material() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let audit = bark::AuditTrail::open(&config.operator_id, &config.audit).unwrap();
    let authority = bark::DirectiveAuthority::from_config(
        &config,
        Arc::new(BrokenKeyStore),
        audit.clone(),
        Arc::new(LoggingHandler),
    )
    .unwrap();

    let result = authority.create(state_transition(), ["technical"], None).await;
    assert!(matches!(result, Err(BarkError::KeyUnavailable(_))));
    assert!(authority.list_active(None).await.is_empty());
    assert!(audit.entries().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_ingest_rejects_replay_and_foreign_operator() {
    let source = test_authority();
    let directive = source
        .authority
        .create(state_transition(), ["technical"], Some(Duration::seconds(600)))
        .await
        .unwrap();

    // A second authority trusting the same key pair.
    let target = test_authority();
    for name in ["bark_private_key", "bark_public_key"] {
        let value = bark::crypto::KeyStore::retrieve(source.keys.as_ref(), name)
            .unwrap()
            .unwrap();
        bark::crypto::KeyStore::store(target.keys.as_ref(), name, &value).unwrap();
    }

    target.authority.ingest(directive.clone()).await.unwrap();
    assert_eq!(target.authority.get(directive.id).await.as_ref(), Some(&directive));
    target.authority.execute(&directive).await.unwrap();

    assert!(matches!(
        target.authority.ingest(directive.clone()).await,
        Err(BarkError::NonceReplay(n)) if n == directive.nonce
    ));

    let mut foreign = directive.clone();
    foreign.operator_id = "someone:else".to_string();
    assert!(matches!(
        target.authority.ingest(foreign).await,
        Err(BarkError::UnknownOperator(_))
    ));

    let mut forged = directive.clone();
    forged.id = Uuid::new_v4();
    forged.nonce += 1_000_000;
    assert!(matches!(
        target.authority.ingest(forged).await,
        Err(BarkError::InvalidSignature(SignatureFault::Mismatch))
    ));

    assert_eq!(
        entries_for(&target.audit, actions::DIRECTIVE_INGESTED, Some(directive.id)).await.len(),
        1
    );
}

#[tokio::test]
async fn test_nonces_strictly_increase_across_creates() {
    let t = test_authority();
    let mut last = 0;
    for _ in 0..20 {
        let directive = t
            .authority
            .create(state_transition(), ["technical"], None)
            .await
            .unwrap();
        assert!(directive.nonce > last);
        last = directive.nonce;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates() {
    let t = test_authority();
    t.authority.bootstrap_keys().await.unwrap();
    let authority = Arc::new(t.authority);

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let authority = authority.clone();
            tokio::spawn(async move {
                authority
                    .create(state_transition(), ["technical"], Some(Duration::seconds(600)))
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut nonces = HashSet::new();
    let mut ids = HashSet::new();
    for handle in handles {
        let directive = handle.await.unwrap();
        assert!(nonces.insert(directive.nonce));
        assert!(ids.insert(directive.id));
        authority.execute(&directive).await.unwrap();
    }

    assert_eq!(authority.list_active(None).await.len(), 32);
    let created = entries_for(&t.audit, actions::DIRECTIVE_CREATED, None).await;
    assert_eq!(created.len(), 32);
    let created_ids: HashSet<Uuid> = created.iter().filter_map(|e| e.directive_id).collect();
    assert_eq!(created_ids, ids);
}
