// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-resource certificate reconciliation.
//!
//! One call to [`Reconciler::reconcile`] brings the certificates of one
//! watched resource in line with its annotations and TLS blocks:
//!
//! 1. Fetch the resource. A missing resource desires nothing.
//! 2. List the certificates of its namespace and pick out the ones it owns.
//! 3. Build candidate certificates. Invalid input stops here: the problem is
//!    reported as an Event and nothing is written.
//! 4. Resolve secret claims across every watched resource of the namespace.
//!    Candidates whose secret belongs to another resource are reported and skipped.
//! 5. Create missing certificates, patch differing ones, adopt ones held by a
//!    non-canonical owner, and leave foreign ones alone.
//! 6. Delete owned certificates whose secret is no longer requested.
//!
//! Retry decisions are made in exactly one place, [`Reconciler::requeue_for`].
//!
//! # States
//!
//! Each candidate moves through [`SyncState`]: `Missing` and `OutOfSync`
//! candidates become `Synced` once written; `Conflicted` and `Invalid` are
//! terminal for the attempt and never cause a write.

use crate::builder::{build_certificates, BuilderConfig};
use crate::constants::{
    DEFAULT_CONFLICT_REQUEUE_SECS, DEFAULT_INVALID_REQUEUE_SECS, DEFAULT_MAX_UPDATE_RETRIES,
};
use crate::crd::Certificate;
use crate::errors::{ErrorKind, ShimError, StoreError};
use crate::events::{EventSink, ShimEvent};
use crate::metrics;
use crate::resolver::{resolve, Claim, Resolution};
use crate::resource::{ResourceKey, WatchedResource};
use crate::store::{CertificatePatch, CertificateStore, SourceStore};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::ResourceExt;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reconciler settings.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconcilerConfig {
    pub builder: BuilderConfig,

    /// Requeue interval after a lost ownership conflict.
    pub conflict_requeue: Duration,

    /// Requeue interval after invalid annotations or TLS blocks.
    pub invalid_requeue: Duration,

    /// Re-fetch and retry budget for stale-version patches.
    pub max_update_retries: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            builder: BuilderConfig::default(),
            conflict_requeue: Duration::from_secs(DEFAULT_CONFLICT_REQUEUE_SECS),
            invalid_requeue: Duration::from_secs(DEFAULT_INVALID_REQUEUE_SECS),
            max_update_retries: DEFAULT_MAX_UPDATE_RETRIES,
        }
    }
}

/// Synchronization state of one desired certificate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// The resource requests no certificates.
    NoAction,
    /// The stored certificate matches the desired spec.
    Synced,
    /// The stored certificate differs from the desired spec.
    OutOfSync,
    /// No certificate is stored yet.
    Missing,
    /// Another resource (or a foreign object) holds the secret.
    Conflicted,
    /// The resource's annotations or TLS blocks are invalid.
    Invalid,
}

/// Result of one successful reconcile.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReconcileOutcome {
    /// Final state per requested secret.
    pub states: BTreeMap<String, SyncState>,

    /// Store writes performed (creates, patches and deletes).
    pub mutations: usize,

    /// Conflicts reported for candidates that were not written.
    pub conflicts: Vec<ShimError>,

    /// Certificates removed because their secret is no longer requested.
    pub deleted: Vec<String>,
}

impl ReconcileOutcome {
    /// Aggregate state of the resource.
    #[must_use]
    pub fn state(&self) -> SyncState {
        if self.states.is_empty() {
            SyncState::NoAction
        } else if self.states.values().any(|s| *s == SyncState::Conflicted) {
            SyncState::Conflicted
        } else {
            SyncState::Synced
        }
    }

    #[must_use]
    pub fn state_of(&self, secret_name: &str) -> Option<SyncState> {
        self.states.get(secret_name).copied()
    }

    fn conflict(&mut self, secret_name: &str, error: ShimError) {
        self.states
            .insert(secret_name.to_string(), SyncState::Conflicted);
        self.conflicts.push(error);
    }
}

/// What to do with a key after a reconcile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requeue {
    /// Done; reset the key's backoff.
    Forget,
    /// Reconcile again after a fixed interval.
    After(Duration),
    /// Reconcile again after the key's exponential backoff.
    RateLimited,
    /// Do not reconcile again until the resource changes.
    Never,
}

/// Ownership of a stored certificate relative to the resource being reconciled.
enum Holder {
    Us,
    Other(ResourceKey),
    Foreign,
}

/// Result of patching a stored certificate.
enum Update {
    Written,
    InSync,
    Foreign,
}

fn holder_of(key: &ResourceKey, certificate: &Certificate) -> Holder {
    match ResourceKey::controller_of(certificate) {
        Some(owner) if owner == *key => Holder::Us,
        Some(owner) => Holder::Other(owner),
        None => Holder::Foreign,
    }
}

/// Keeps certificates in sync with watched resources.
pub struct Reconciler<S, C, E> {
    sources: S,
    certificates: C,
    events: E,
    config: ReconcilerConfig,
}

impl<S, C, E> Reconciler<S, C, E>
where
    S: SourceStore,
    C: CertificateStore,
    E: EventSink,
{
    pub fn new(sources: S, certificates: C, events: E, config: ReconcilerConfig) -> Self {
        Self {
            sources,
            certificates,
            events,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Reconcile the certificates of one watched resource.
    ///
    /// # Errors
    ///
    /// - [`ShimError::InvalidAnnotation`] / [`ShimError::InvalidTls`] when the
    ///   resource's configuration is invalid; nothing is written
    /// - [`ShimError::UpdateConflict`] when stale-version retries are exhausted
    /// - [`ShimError::Store`] for store failures
    ///
    /// Lost conflicts are not errors: they are listed in
    /// [`ReconcileOutcome::conflicts`].
    pub async fn reconcile(&self, key: &ResourceKey) -> Result<ReconcileOutcome, ShimError> {
        let resource = self.sources.get_resource(key).await?;
        let subject = key.object_reference(resource.as_ref().and_then(|r| r.uid.as_deref()));

        let stored = self.certificates.list_certificates(&key.namespace).await?;
        let owned: Vec<Certificate> = stored.iter().filter(|c| key.owns(c)).cloned().collect();

        let candidates = match &resource {
            Some(resource) => self.build(resource, &owned, &subject).await?,
            None => {
                debug!(resource = %key, "Resource is gone, releasing its certificates");
                Vec::new()
            }
        };

        let mut outcome = ReconcileOutcome::default();

        if let Some(resource) = &resource {
            if !candidates.is_empty() {
                let resolution = self.resolve_namespace(resource).await?;
                for desired in candidates.iter() {
                    self.sync_candidate(resource, desired, &stored, &resolution, &subject, &mut outcome)
                        .await?;
                }
            }
        }

        let requested: HashSet<&str> = candidates
            .iter()
            .map(|c| c.spec.secret_name.as_str())
            .collect();
        let released: Vec<&Certificate> = owned
            .iter()
            .filter(|c| !requested.contains(c.name_any().as_str()))
            .collect();
        for certificate in released {
            self.delete(key, certificate, &subject, &mut outcome).await?;
        }

        Ok(outcome)
    }

    /// The retry policy for a reconcile result.
    #[must_use]
    pub fn requeue_for(&self, result: &Result<ReconcileOutcome, ShimError>) -> Requeue {
        match result {
            Ok(outcome) if outcome.conflicts.is_empty() => Requeue::Forget,
            Ok(_) => Requeue::After(self.config.conflict_requeue),
            Err(err) => match err.kind() {
                ErrorKind::InvalidInput => Requeue::After(self.config.invalid_requeue),
                ErrorKind::Conflict => Requeue::After(self.config.conflict_requeue),
                ErrorKind::Transient => Requeue::RateLimited,
                ErrorKind::NilTarget => Requeue::Never,
            },
        }
    }

    async fn build(
        &self,
        resource: &WatchedResource,
        owned: &[Certificate],
        subject: &ObjectReference,
    ) -> Result<Vec<Certificate>, ShimError> {
        match build_certificates(resource, owned, &self.config.builder) {
            Ok(candidates) => Ok(candidates),
            Err(err) => {
                warn!(resource = %resource.key, error = %err, "Invalid certificate configuration");
                if err.is_invalid_input() {
                    self.events
                        .publish(
                            subject,
                            ShimEvent::BadConfig {
                                message: err.to_string(),
                            },
                        )
                        .await;
                }
                Err(err)
            }
        }
    }

    /// Resolve the secret claims of every watched resource in `resource`'s namespace.
    ///
    /// `resource` itself is taken from the fresh fetch, not from the listing.
    async fn resolve_namespace(&self, resource: &WatchedResource) -> Result<Resolution, ShimError> {
        let peers = self.sources.list_resources(&resource.key.namespace).await?;
        let builder = &self.config.builder;

        let claims = peers
            .iter()
            .filter(|peer| peer.key != resource.key)
            .chain(std::iter::once(resource))
            .flat_map(|r| Claim::for_resource(r, builder));
        Ok(resolve(claims))
    }

    async fn sync_candidate(
        &self,
        resource: &WatchedResource,
        desired: &Certificate,
        stored: &[Certificate],
        resolution: &Resolution,
        subject: &ObjectReference,
        outcome: &mut ReconcileOutcome,
    ) -> Result<(), ShimError> {
        let secret = desired.spec.secret_name.as_str();

        if let Err(conflict) = resolution.check(&Claim::new(resource, secret)) {
            let owner = resolution
                .winner(&resource.key.namespace, secret)
                .map(ToString::to_string)
                .unwrap_or_default();
            info!(resource = %resource.key, secret, owner = %owner, "Secret is owned by another resource");
            metrics::record_conflict(resource.key.kind.as_str());
            self.events
                .publish(
                    subject,
                    ShimEvent::Conflict {
                        secret_name: secret.to_string(),
                        owner,
                    },
                )
                .await;
            outcome.conflict(secret, conflict);
            return Ok(());
        }

        let Some(current) = stored.iter().find(|c| c.name_any() == secret) else {
            self.create(resource, desired, subject, outcome).await?;
            return Ok(());
        };

        let adopt = match holder_of(&resource.key, current) {
            Holder::Us => false,
            Holder::Other(previous) => {
                info!(
                    resource = %resource.key,
                    secret,
                    previous_owner = %previous,
                    "Adopting Certificate from non-canonical owner"
                );
                true
            }
            Holder::Foreign => {
                self.not_owned(resource, secret, subject, outcome).await;
                return Ok(());
            }
        };

        match self
            .update(resource, desired.clone(), current.clone(), adopt)
            .await?
        {
            Update::Written => {
                outcome.mutations += 1;
                metrics::record_certificate_updated(resource.key.kind.as_str());
                self.events
                    .publish(
                        subject,
                        ShimEvent::Updated {
                            name: secret.to_string(),
                        },
                    )
                    .await;
            }
            Update::InSync => {}
            Update::Foreign => {
                self.not_owned(resource, secret, subject, outcome).await;
                return Ok(());
            }
        }
        outcome
            .states
            .insert(secret.to_string(), SyncState::Synced);
        Ok(())
    }

    /// Record a certificate that exists without the certshim ownership marker.
    async fn not_owned(
        &self,
        resource: &WatchedResource,
        secret: &str,
        subject: &ObjectReference,
        outcome: &mut ReconcileOutcome,
    ) {
        warn!(resource = %resource.key, secret, "Certificate exists and is not managed by certshim");
        metrics::record_conflict(resource.key.kind.as_str());
        self.events
            .publish(
                subject,
                ShimEvent::NotOwned {
                    name: secret.to_string(),
                },
            )
            .await;
        outcome.conflict(
            secret,
            ShimError::NotOwned {
                namespace: resource.key.namespace.clone(),
                name: secret.to_string(),
            },
        );
    }

    async fn create(
        &self,
        resource: &WatchedResource,
        desired: &Certificate,
        subject: &ObjectReference,
        outcome: &mut ReconcileOutcome,
    ) -> Result<(), ShimError> {
        let secret = desired.spec.secret_name.as_str();
        debug!(resource = %resource.key, secret, state = ?SyncState::Missing, "Creating Certificate");

        self.certificates.create_certificate(desired).await?;

        info!(resource = %resource.key, secret, "Created Certificate");
        outcome.mutations += 1;
        outcome
            .states
            .insert(secret.to_string(), SyncState::Synced);
        metrics::record_certificate_created(resource.key.kind.as_str());
        self.events
            .publish(
                subject,
                ShimEvent::Created {
                    name: secret.to_string(),
                },
            )
            .await;
        Ok(())
    }

    /// Patch `current` towards `desired`.
    ///
    /// A stale resource version re-fetches the certificate, rebuilds the
    /// candidate on the fresh copy and tries again, up to
    /// `max_update_retries` times. A re-fetched copy that lost the ownership
    /// marker is reported as [`Update::Foreign`] and left untouched.
    async fn update(
        &self,
        resource: &WatchedResource,
        mut desired: Certificate,
        mut current: Certificate,
        mut adopt: bool,
    ) -> Result<Update, ShimError> {
        let namespace = resource.key.namespace.as_str();
        let name = desired.name_any();
        let attempts = self.config.max_update_retries.saturating_add(1);

        for attempt in 1..=attempts {
            let patch = if adopt {
                CertificatePatch::for_adoption(&current, &desired)
            } else {
                CertificatePatch::for_spec(&current, &desired.spec)
            };
            if patch.is_empty() {
                debug!(resource = %resource.key, secret = %name, "Certificate is in sync");
                return Ok(Update::InSync);
            }

            debug!(
                resource = %resource.key,
                secret = %name,
                state = ?SyncState::OutOfSync,
                attempt,
                "Patching Certificate"
            );
            match self
                .certificates
                .patch_certificate(namespace, &name, &patch)
                .await
            {
                Ok(_) => {
                    info!(resource = %resource.key, secret = %name, adopted = adopt, "Updated Certificate");
                    return Ok(Update::Written);
                }
                Err(err) if err.is_conflict() => {
                    debug!(resource = %resource.key, secret = %name, attempt, "Stale resource version, re-fetching");
                    let fresh = self
                        .certificates
                        .get_certificate(namespace, &name)
                        .await?
                        .ok_or_else(|| {
                            StoreError::NotFound(format!("Certificate {namespace}/{name}"))
                        })?;

                    adopt = match holder_of(&resource.key, &fresh) {
                        Holder::Us => false,
                        Holder::Other(_) => true,
                        Holder::Foreign => return Ok(Update::Foreign),
                    };
                    if let Some(rebuilt) = build_certificates(
                        resource,
                        std::slice::from_ref(&fresh),
                        &self.config.builder,
                    )?
                    .into_iter()
                    .find(|c| c.name_any() == name)
                    {
                        desired = rebuilt;
                    }
                    current = fresh;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(ShimError::UpdateConflict {
            namespace: namespace.to_string(),
            name,
            attempts,
        })
    }

    async fn delete(
        &self,
        key: &ResourceKey,
        certificate: &Certificate,
        subject: &ObjectReference,
        outcome: &mut ReconcileOutcome,
    ) -> Result<(), ShimError> {
        let name = certificate.name_any();

        match self
            .certificates
            .delete_certificate(&key.namespace, &name)
            .await
        {
            Ok(()) => {
                info!(resource = %key, secret = %name, "Deleted Certificate that is no longer requested");
                outcome.mutations += 1;
                metrics::record_certificate_deleted(key.kind.as_str());
                self.events
                    .publish(subject, ShimEvent::Deleted { name: name.clone() })
                    .await;
            }
            Err(err) if err.is_not_found() => {
                debug!(resource = %key, secret = %name, "Certificate already deleted");
            }
            Err(err) => return Err(err.into()),
        }
        outcome.deleted.push(name);
        Ok(())
    }
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod reconciler_tests;
