// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Scenario tests for the reconciler, run against the in-memory store.

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::builder::build_certificates;
    use crate::constants::*;
    use crate::crd::{Certificate, CertificateSpec, IssuerRef, KeyUsage};
    use crate::duration::GoDuration;
    use crate::errors::{ShimError, StoreError};
    use crate::events::MemoryEventSink;
    use crate::resource::{ResourceKey, ResourceKind, TlsBlock, WatchedResource};
    use crate::store::MemoryStore;
    use chrono::{DateTime, Utc};
    use kube::api::ObjectMeta;
    use kube::ResourceExt;
    use std::collections::BTreeMap;
    use std::time::Duration;

    type TestReconciler = Reconciler<MemoryStore, MemoryStore, MemoryEventSink>;

    struct Harness {
        store: MemoryStore,
        events: MemoryEventSink,
        reconciler: TestReconciler,
    }

    fn harness() -> Harness {
        harness_with(ReconcilerConfig::default())
    }

    fn harness_with(config: ReconcilerConfig) -> Harness {
        let store = MemoryStore::new();
        let events = MemoryEventSink::new();
        let reconciler = Reconciler::new(store.clone(), store.clone(), events.clone(), config);
        Harness {
            store,
            events,
            reconciler,
        }
    }

    fn at(timestamp: &str) -> Option<DateTime<Utc>> {
        Some(timestamp.parse().unwrap())
    }

    fn ingress(name: &str, annotations: &[(&str, &str)], tls: Vec<TlsBlock>) -> WatchedResource {
        WatchedResource {
            key: ResourceKey::new(ResourceKind::Ingress, "default", name),
            uid: Some(format!("uid-{name}")),
            creation_timestamp: at("2025-01-01T00:00:00Z"),
            annotations: annotations
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            tls,
        }
    }

    fn example(name: &str) -> WatchedResource {
        ingress(
            name,
            &[(CLUSTER_ISSUER_NAME_ANNOTATION, "letsencrypt")],
            vec![TlsBlock::new("example-tls", &["www.example.com"])],
        )
    }

    fn key(name: &str) -> ResourceKey {
        ResourceKey::new(ResourceKind::Ingress, "default", name)
    }

    /// Store the certificate `resource` would produce, as if written earlier.
    fn seed_owned(store: &MemoryStore, resource: &WatchedResource) {
        for certificate in build_certificates(resource, &[], &BuilderConfig::default()).unwrap() {
            store.put_certificate(certificate);
        }
    }

    fn foreign_certificate(name: &str) -> Certificate {
        Certificate {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: CertificateSpec {
                secret_name: name.to_string(),
                dns_names: vec!["hand-made.example.com".to_string()],
                issuer_ref: IssuerRef::issuer("manual"),
                ..Default::default()
            },
            status: None,
        }
    }

    // ========================================================================
    // Create, update, idempotence
    // ========================================================================

    #[tokio::test]
    async fn test_creates_certificate_for_annotated_ingress() {
        let h = harness();
        h.store.put_resource(example("web"));

        let outcome = h.reconciler.reconcile(&key("web")).await.unwrap();

        assert_eq!(outcome.mutations, 1);
        assert_eq!(outcome.state_of("example-tls"), Some(SyncState::Synced));
        assert_eq!(outcome.state(), SyncState::Synced);

        let cert = h.store.certificate("default", "example-tls").unwrap();
        assert_eq!(cert.spec.secret_name, "example-tls");
        assert_eq!(cert.spec.dns_names, vec!["www.example.com"]);
        assert_eq!(cert.spec.issuer_ref, IssuerRef::cluster_issuer("letsencrypt"));
        assert_eq!(ResourceKey::controller_of(&cert), Some(key("web")));

        assert_eq!(h.events.reasons(), vec![REASON_CREATE_CERTIFICATE]);
        assert_eq!(h.events.events()[0].subject.uid.as_deref(), Some("uid-web"));
        assert_eq!(h.reconciler.requeue_for(&Ok(outcome)), Requeue::Forget);
    }

    #[tokio::test]
    async fn test_annotated_example_end_to_end() {
        let h = harness();
        h.store.put_resource(ingress(
            "web",
            &[
                (CLUSTER_ISSUER_NAME_ANNOTATION, "letsencrypt"),
                (COMMON_NAME_ANNOTATION, "www.example.com"),
                (DURATION_ANNOTATION, "168h"),
                (RENEW_BEFORE_ANNOTATION, "24h"),
                (USAGES_ANNOTATION, "server auth,signing"),
                (REVISION_HISTORY_LIMIT_ANNOTATION, "7"),
            ],
            vec![TlsBlock::new("example-tls", &["www.example.com"])],
        ));

        h.reconciler.reconcile(&key("web")).await.unwrap();

        let spec = h.store.certificate("default", "example-tls").unwrap().spec;
        assert_eq!(spec.common_name.as_deref(), Some("www.example.com"));
        assert_eq!(spec.duration, Some(GoDuration::from_hours(168)));
        assert_eq!(spec.renew_before, Some(GoDuration::from_hours(24)));
        assert_eq!(
            spec.usages,
            Some(vec![KeyUsage::ServerAuth, KeyUsage::Signing])
        );
        assert_eq!(spec.revision_history_limit, Some(7));
        assert_eq!(spec.dns_names, vec!["www.example.com"]);
        assert_eq!(spec.secret_name, "example-tls");

        let again = h.reconciler.reconcile(&key("web")).await.unwrap();
        assert_eq!(again.mutations, 0);
    }

    #[tokio::test]
    async fn test_second_reconcile_is_a_no_op() {
        let h = harness();
        h.store.put_resource(example("web"));
        h.reconciler.reconcile(&key("web")).await.unwrap();
        let before = h.store.mutations();
        h.events.clear();

        let outcome = h.reconciler.reconcile(&key("web")).await.unwrap();

        assert_eq!(outcome.mutations, 0);
        assert_eq!(outcome.state_of("example-tls"), Some(SyncState::Synced));
        assert_eq!(h.store.mutations(), before);
        assert!(h.events.events().is_empty());
    }

    #[tokio::test]
    async fn test_annotation_change_patches_certificate() {
        let h = harness();
        h.store.put_resource(example("web"));
        h.reconciler.reconcile(&key("web")).await.unwrap();

        h.store.put_resource(ingress(
            "web",
            &[
                (CLUSTER_ISSUER_NAME_ANNOTATION, "letsencrypt"),
                (COMMON_NAME_ANNOTATION, "www.example.com"),
            ],
            vec![TlsBlock::new("example-tls", &["www.example.com", "example.com"])],
        ));
        let outcome = h.reconciler.reconcile(&key("web")).await.unwrap();

        assert_eq!(outcome.mutations, 1);
        assert_eq!(h.store.mutations().patches, 1);
        let cert = h.store.certificate("default", "example-tls").unwrap();
        assert_eq!(cert.spec.common_name.as_deref(), Some("www.example.com"));
        assert_eq!(cert.spec.dns_names, vec!["www.example.com", "example.com"]);
        assert_eq!(
            h.events.reasons(),
            vec![REASON_CREATE_CERTIFICATE, REASON_UPDATE_CERTIFICATE]
        );
    }

    #[tokio::test]
    async fn test_gateway_listeners_get_certificates() {
        let h = harness();
        let gateway = WatchedResource {
            key: ResourceKey::new(ResourceKind::Gateway, "default", "edge"),
            ..ingress(
                "edge",
                &[(ISSUER_NAME_ANNOTATION, "ca")],
                vec![TlsBlock::new("edge-tls", &["a.example.com", "b.example.com"])],
            )
        };
        h.store.put_resource(gateway);

        let outcome = h
            .reconciler
            .reconcile(&ResourceKey::new(ResourceKind::Gateway, "default", "edge"))
            .await
            .unwrap();

        assert_eq!(outcome.mutations, 1);
        let cert = h.store.certificate("default", "edge-tls").unwrap();
        assert_eq!(cert.owner_references()[0].kind, "Gateway");
        assert_eq!(cert.spec.issuer_ref, IssuerRef::issuer("ca"));
    }

    #[tokio::test]
    async fn test_unannotated_resource_needs_no_action() {
        let h = harness();
        h.store.put_resource(ingress(
            "plain",
            &[],
            vec![TlsBlock::new("plain-tls", &["plain.example.com"])],
        ));

        let outcome = h.reconciler.reconcile(&key("plain")).await.unwrap();

        assert_eq!(outcome.state(), SyncState::NoAction);
        assert_eq!(h.store.mutations().total(), 0);
        assert!(h.events.events().is_empty());
    }

    // ========================================================================
    // Deletion
    // ========================================================================

    #[tokio::test]
    async fn test_removed_tls_block_deletes_certificate() {
        let h = harness();
        h.store.put_resource(ingress(
            "web",
            &[(CLUSTER_ISSUER_NAME_ANNOTATION, "letsencrypt")],
            vec![
                TlsBlock::new("example-tls", &["www.example.com"]),
                TlsBlock::new("api-tls", &["api.example.com"]),
            ],
        ));
        h.reconciler.reconcile(&key("web")).await.unwrap();
        assert_eq!(h.store.certificates().len(), 2);

        h.store.put_resource(example("web"));
        let outcome = h.reconciler.reconcile(&key("web")).await.unwrap();

        assert_eq!(outcome.deleted, vec!["api-tls"]);
        assert!(h.store.certificate("default", "api-tls").is_none());
        assert!(h.store.certificate("default", "example-tls").is_some());
        assert_eq!(h.events.reasons().last(), Some(&REASON_DELETE_CERTIFICATE));
    }

    #[tokio::test]
    async fn test_deleted_resource_releases_its_certificates() {
        let h = harness();
        h.store.put_resource(example("web"));
        h.reconciler.reconcile(&key("web")).await.unwrap();

        h.store.remove_resource(&key("web"));
        let outcome = h.reconciler.reconcile(&key("web")).await.unwrap();

        assert_eq!(outcome.deleted, vec!["example-tls"]);
        assert!(h.store.certificates().is_empty());
        assert_eq!(outcome.state(), SyncState::NoAction);
    }

    #[tokio::test]
    async fn test_deleted_resource_without_certificates_is_a_no_op() {
        let h = harness();

        let outcome = h.reconciler.reconcile(&key("gone")).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::default());
        assert_eq!(h.store.mutations().total(), 0);
    }

    #[tokio::test]
    async fn test_certificate_already_deleted_counts_as_deleted() {
        let h = harness();
        seed_owned(&h.store, &example("web"));
        h.store
            .fail_next_write(StoreError::NotFound("Certificate default/example-tls".to_string()));

        let outcome = h.reconciler.reconcile(&key("web")).await.unwrap();

        assert_eq!(outcome.deleted, vec!["example-tls"]);
        assert_eq!(outcome.mutations, 0);
    }

    #[tokio::test]
    async fn test_annotation_removed_deletes_owned_certificate() {
        let h = harness();
        h.store.put_resource(example("web"));
        h.reconciler.reconcile(&key("web")).await.unwrap();

        h.store.put_resource(ingress(
            "web",
            &[],
            vec![TlsBlock::new("example-tls", &["www.example.com"])],
        ));
        let outcome = h.reconciler.reconcile(&key("web")).await.unwrap();

        assert_eq!(outcome.deleted, vec!["example-tls"]);
        assert!(h.store.certificates().is_empty());
    }

    // ========================================================================
    // Ownership conflicts
    // ========================================================================

    fn contenders() -> (WatchedResource, WatchedResource) {
        let older = WatchedResource {
            creation_timestamp: at("2024-06-01T00:00:00Z"),
            ..example("older")
        };
        let younger = WatchedResource {
            creation_timestamp: at("2025-06-01T00:00:00Z"),
            ..example("younger")
        };
        (older, younger)
    }

    #[tokio::test]
    async fn test_oldest_resource_wins_shared_secret() {
        let h = harness();
        let (older, younger) = contenders();
        h.store.put_resource(older);
        h.store.put_resource(younger);

        let lost = h.reconciler.reconcile(&key("younger")).await.unwrap();
        let won = h.reconciler.reconcile(&key("older")).await.unwrap();

        assert_eq!(lost.state_of("example-tls"), Some(SyncState::Conflicted));
        assert_eq!(lost.mutations, 0);
        assert!(lost.conflicts[0].is_conflict());
        assert_eq!(
            h.reconciler.requeue_for(&Ok(lost)),
            Requeue::After(Duration::from_secs(DEFAULT_CONFLICT_REQUEUE_SECS))
        );

        assert_eq!(won.mutations, 1);
        let cert = h.store.certificate("default", "example-tls").unwrap();
        assert_eq!(ResourceKey::controller_of(&cert), Some(key("older")));
        assert_eq!(
            h.events.reasons(),
            vec![REASON_SECRET_CONFLICT, REASON_CREATE_CERTIFICATE]
        );
    }

    #[tokio::test]
    async fn test_conflict_outcome_is_independent_of_reconcile_order() {
        let (older, younger) = contenders();

        let first = harness();
        first.store.put_resource(older.clone());
        first.store.put_resource(younger.clone());
        first.reconciler.reconcile(&key("older")).await.unwrap();
        first.reconciler.reconcile(&key("younger")).await.unwrap();

        let second = harness();
        second.store.put_resource(older);
        second.store.put_resource(younger);
        second.reconciler.reconcile(&key("younger")).await.unwrap();
        second.reconciler.reconcile(&key("older")).await.unwrap();

        assert_eq!(first.store.certificates(), second.store.certificates());
        assert_eq!(first.store.mutations().total(), 1);
        assert_eq!(second.store.mutations().total(), 1);
    }

    #[tokio::test]
    async fn test_canonical_owner_adopts_certificate() {
        let h = harness();
        let (older, younger) = contenders();
        seed_owned(&h.store, &younger);
        h.store.put_resource(older);
        h.store.put_resource(younger);

        let outcome = h.reconciler.reconcile(&key("older")).await.unwrap();

        assert_eq!(outcome.mutations, 1);
        let cert = h.store.certificate("default", "example-tls").unwrap();
        assert_eq!(ResourceKey::controller_of(&cert), Some(key("older")));
        assert_eq!(cert.owner_references()[0].uid, "uid-older");

        let loser = h.reconciler.reconcile(&key("younger")).await.unwrap();
        assert_eq!(loser.state(), SyncState::Conflicted);
        assert!(loser.deleted.is_empty());
        assert!(h.store.certificate("default", "example-tls").is_some());
    }

    #[tokio::test]
    async fn test_foreign_certificate_is_left_alone() {
        let h = harness();
        h.store.put_certificate(foreign_certificate("example-tls"));
        h.store.put_resource(example("web"));

        let outcome = h.reconciler.reconcile(&key("web")).await.unwrap();

        assert_eq!(outcome.mutations, 0);
        assert_eq!(outcome.state_of("example-tls"), Some(SyncState::Conflicted));
        assert!(matches!(outcome.conflicts[0], ShimError::NotOwned { .. }));
        assert_eq!(h.events.reasons(), vec![REASON_NOT_OWNED]);

        let cert = h.store.certificate("default", "example-tls").unwrap();
        assert_eq!(cert.spec.issuer_ref, IssuerRef::issuer("manual"));
        assert!(cert.owner_references().is_empty());
    }

    // ========================================================================
    // Invalid input
    // ========================================================================

    #[tokio::test]
    async fn test_invalid_annotation_writes_nothing() {
        let h = harness();
        seed_owned(&h.store, &example("web"));
        h.store.put_resource(ingress(
            "web",
            &[
                (CLUSTER_ISSUER_NAME_ANNOTATION, "letsencrypt"),
                (DURATION_ANNOTATION, "forever"),
            ],
            vec![TlsBlock::new("other-tls", &["www.example.com"])],
        ));

        let result = h.reconciler.reconcile(&key("web")).await;

        let err = result.as_ref().unwrap_err();
        assert!(err.is_invalid_annotation());
        assert_eq!(h.store.mutations().total(), 0);
        assert!(h.store.certificate("default", "example-tls").is_some());
        assert_eq!(h.events.reasons(), vec![REASON_BAD_CONFIG]);
        assert_eq!(
            h.reconciler.requeue_for(&result),
            Requeue::After(Duration::from_secs(DEFAULT_INVALID_REQUEUE_SECS))
        );
    }

    #[tokio::test]
    async fn test_invalid_older_resource_does_not_block_shared_secret() {
        let h = harness();
        let (older, younger) = contenders();
        let mut broken = older.annotations.clone();
        broken.insert(DURATION_ANNOTATION.to_string(), "not a duration".to_string());
        h.store.put_resource(WatchedResource {
            annotations: broken,
            ..older
        });
        h.store.put_resource(younger);

        let invalid = h.reconciler.reconcile(&key("older")).await;
        let valid = h.reconciler.reconcile(&key("younger")).await.unwrap();

        assert!(invalid.unwrap_err().is_invalid_annotation());
        assert_eq!(valid.state_of("example-tls"), Some(SyncState::Synced));
        assert!(valid.conflicts.is_empty());
        let cert = h.store.certificate("default", "example-tls").unwrap();
        assert_eq!(ResourceKey::controller_of(&cert), Some(key("younger")));
    }

    #[tokio::test]
    async fn test_tls_block_without_hosts_is_invalid() {
        let h = harness();
        h.store.put_resource(ingress(
            "web",
            &[(CLUSTER_ISSUER_NAME_ANNOTATION, "letsencrypt")],
            vec![TlsBlock::new("example-tls", &[])],
        ));

        let err = h.reconciler.reconcile(&key("web")).await.unwrap_err();

        assert!(matches!(err, ShimError::InvalidTls { index: 0, .. }));
        assert_eq!(h.store.mutations().total(), 0);
    }

    // ========================================================================
    // Stale versions and transient failures
    // ========================================================================

    fn with_common_name(resource: WatchedResource) -> WatchedResource {
        let mut annotations: BTreeMap<String, String> = resource.annotations.clone();
        annotations.insert(
            COMMON_NAME_ANNOTATION.to_string(),
            "www.example.com".to_string(),
        );
        WatchedResource {
            annotations,
            ..resource
        }
    }

    #[tokio::test]
    async fn test_stale_version_is_retried() {
        let h = harness();
        seed_owned(&h.store, &example("web"));
        h.store.put_resource(with_common_name(example("web")));
        h.store.interleave_writes(2);

        let outcome = h.reconciler.reconcile(&key("web")).await.unwrap();

        assert_eq!(outcome.mutations, 1);
        assert_eq!(h.store.mutations().patches, 1);
        let cert = h.store.certificate("default", "example-tls").unwrap();
        assert_eq!(cert.spec.common_name.as_deref(), Some("www.example.com"));
    }

    #[tokio::test]
    async fn test_stale_version_retries_are_bounded() {
        let h = harness_with(ReconcilerConfig {
            max_update_retries: 2,
            ..ReconcilerConfig::default()
        });
        seed_owned(&h.store, &example("web"));
        h.store.put_resource(with_common_name(example("web")));
        h.store.interleave_writes(10);

        let result = h.reconciler.reconcile(&key("web")).await;

        assert!(matches!(
            result,
            Err(ShimError::UpdateConflict { attempts: 3, .. })
        ));
        assert_eq!(h.store.mutations().patches, 0);
        assert_eq!(h.reconciler.requeue_for(&result), Requeue::RateLimited);
    }

    #[tokio::test]
    async fn test_certificate_released_during_retry_is_a_conflict() {
        let h = harness();
        seed_owned(&h.store, &example("web"));
        h.store.put_resource(with_common_name(ingress(
            "web",
            &[(CLUSTER_ISSUER_NAME_ANNOTATION, "letsencrypt")],
            vec![
                TlsBlock::new("example-tls", &["www.example.com"]),
                TlsBlock::new("new-tls", &["new.example.com"]),
            ],
        )));
        h.store.interleave_release();

        let outcome = h.reconciler.reconcile(&key("web")).await.unwrap();

        assert_eq!(outcome.state_of("example-tls"), Some(SyncState::Conflicted));
        assert!(matches!(outcome.conflicts[0], ShimError::NotOwned { .. }));
        assert_eq!(outcome.state_of("new-tls"), Some(SyncState::Synced));
        assert!(h.store.certificate("default", "new-tls").is_some());
        assert!(h.events.reasons().contains(&REASON_NOT_OWNED));

        let released = h.store.certificate("default", "example-tls").unwrap();
        assert!(released.owner_references().is_empty());
        assert!(released.spec.common_name.is_none());
    }

    #[tokio::test]
    async fn test_transient_store_error_is_rate_limited() {
        let h = harness();
        h.store.put_resource(example("web"));
        h.store
            .fail_next_write(StoreError::Transient("connection reset".to_string()));

        let result = h.reconciler.reconcile(&key("web")).await;

        assert!(result.as_ref().unwrap_err().is_transient());
        assert_eq!(h.reconciler.requeue_for(&result), Requeue::RateLimited);

        let retried = h.reconciler.reconcile(&key("web")).await.unwrap();
        assert_eq!(retried.mutations, 1);
    }

    #[test]
    fn test_requeue_for_nil_target_never_retries() {
        let h = harness();

        assert_eq!(
            h.reconciler.requeue_for(&Err(ShimError::NilTarget)),
            Requeue::Never
        );
    }
}
