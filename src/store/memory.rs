// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory implementation of both store traits.
//!
//! Behaves like the API server where the reconciler can observe it: every
//! write bumps a resource version, patches are rejected when their resource
//! version is stale, creates fail on name clashes and deletes of missing
//! objects report not-found. Failures can be injected to drive retry paths.

use super::{apply_merge_patch, CertificatePatch, CertificateStore, SourceStore};
use crate::crd::Certificate;
use crate::errors::StoreError;
use crate::resource::{ResourceKey, WatchedResource};
use async_trait::async_trait;
use kube::ResourceExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// Number of successful writes performed against a [`MemoryStore`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MutationCounts {
    pub creates: usize,
    pub patches: usize,
    pub deletes: usize,
}

impl MutationCounts {
    #[must_use]
    pub fn total(&self) -> usize {
        self.creates + self.patches + self.deletes
    }
}

#[derive(Default)]
struct State {
    resources: BTreeMap<ResourceKey, WatchedResource>,
    certificates: BTreeMap<(String, String), Certificate>,
    version: u64,
    mutations: MutationCounts,
    injected: VecDeque<StoreError>,
    concurrent_writes: usize,
    concurrent_release: bool,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn take_injected(&mut self) -> Result<(), StoreError> {
        match self.injected.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Shared in-memory store; clones observe the same state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a watched resource.
    pub fn put_resource(&self, resource: WatchedResource) {
        self.state
            .lock()
            .resources
            .insert(resource.key.clone(), resource);
    }

    /// Remove a watched resource, as if it had been deleted.
    pub fn remove_resource(&self, key: &ResourceKey) {
        self.state.lock().resources.remove(key);
    }

    /// Store a certificate as-is, bypassing the write path and its counters.
    pub fn put_certificate(&self, mut certificate: Certificate) {
        let mut state = self.state.lock();
        certificate.metadata.resource_version = Some(state.next_version());
        let key = (
            certificate.namespace().unwrap_or_default(),
            certificate.name_any(),
        );
        state.certificates.insert(key, certificate);
    }

    /// Current copy of a certificate.
    #[must_use]
    pub fn certificate(&self, namespace: &str, name: &str) -> Option<Certificate> {
        self.state
            .lock()
            .certificates
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Every stored certificate, ordered by namespace and name.
    #[must_use]
    pub fn certificates(&self) -> Vec<Certificate> {
        self.state.lock().certificates.values().cloned().collect()
    }

    #[must_use]
    pub fn mutations(&self) -> MutationCounts {
        self.state.lock().mutations
    }

    /// Fail the next write (create, patch or delete) with `err`.
    pub fn fail_next_write(&self, err: StoreError) {
        self.state.lock().injected.push_back(err);
    }

    /// Simulate `count` concurrent writers: each of the next `count` patches
    /// finds the object modified since it was read.
    pub fn interleave_writes(&self, count: usize) {
        self.state.lock().concurrent_writes += count;
    }

    /// Simulate a concurrent writer that strips the ownership marker: the
    /// next patch finds the object without owner references or labels.
    pub fn interleave_release(&self) {
        self.state.lock().concurrent_release = true;
    }
}

#[async_trait]
impl SourceStore for MemoryStore {
    async fn get_resource(&self, key: &ResourceKey) -> Result<Option<WatchedResource>, StoreError> {
        Ok(self.state.lock().resources.get(key).cloned())
    }

    async fn list_resources(&self, namespace: &str) -> Result<Vec<WatchedResource>, StoreError> {
        Ok(self
            .state
            .lock()
            .resources
            .values()
            .filter(|resource| resource.key.namespace == namespace)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CertificateStore for MemoryStore {
    async fn get_certificate(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Certificate>, StoreError> {
        Ok(self.certificate(namespace, name))
    }

    async fn list_certificates(&self, namespace: &str) -> Result<Vec<Certificate>, StoreError> {
        Ok(self
            .state
            .lock()
            .certificates
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, cert)| cert.clone())
            .collect())
    }

    async fn create_certificate(
        &self,
        certificate: &Certificate,
    ) -> Result<Certificate, StoreError> {
        let mut state = self.state.lock();
        state.take_injected()?;

        let namespace = certificate.namespace().unwrap_or_default();
        let name = certificate.name_any();
        let key = (namespace.clone(), name.clone());
        if state.certificates.contains_key(&key) {
            return Err(StoreError::AlreadyExists(format!(
                "Certificate {namespace}/{name}"
            )));
        }

        let mut created = certificate.clone();
        created.metadata.resource_version = Some(state.next_version());
        state.certificates.insert(key, created.clone());
        state.mutations.creates += 1;
        Ok(created)
    }

    async fn patch_certificate(
        &self,
        namespace: &str,
        name: &str,
        patch: &CertificatePatch,
    ) -> Result<Certificate, StoreError> {
        let mut state = self.state.lock();
        state.take_injected()?;

        let object = format!("Certificate {namespace}/{name}");
        let key = (namespace.to_string(), name.to_string());

        if state.concurrent_writes > 0 {
            state.concurrent_writes -= 1;
            let version = state.next_version();
            if let Some(stored) = state.certificates.get_mut(&key) {
                stored.metadata.resource_version = Some(version);
            }
        }

        if std::mem::take(&mut state.concurrent_release) {
            let version = state.next_version();
            if let Some(stored) = state.certificates.get_mut(&key) {
                stored.metadata.owner_references = None;
                stored.metadata.labels = None;
                stored.metadata.resource_version = Some(version);
            }
        }

        let Some(stored) = state.certificates.get(&key) else {
            return Err(StoreError::NotFound(object));
        };
        if stored.metadata.resource_version.as_deref() != Some(patch.resource_version.as_str()) {
            return Err(StoreError::Conflict(object));
        }

        let mut document = serde_json::to_value(stored)
            .map_err(|e| StoreError::Invalid(object.clone(), e.to_string()))?;
        apply_merge_patch(&mut document, &patch.to_merge_patch());
        let mut patched: Certificate = serde_json::from_value(document)
            .map_err(|e| StoreError::Invalid(object.clone(), e.to_string()))?;

        patched.metadata.resource_version = Some(state.next_version());
        state.certificates.insert(key, patched.clone());
        state.mutations.patches += 1;
        Ok(patched)
    }

    async fn delete_certificate(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.take_injected()?;

        match state
            .certificates
            .remove(&(namespace.to_string(), name.to_string()))
        {
            Some(_) => {
                state.mutations.deletes += 1;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!(
                "Certificate {namespace}/{name}"
            ))),
        }
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod memory_tests;
