// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Object store seams used by the reconciler.
//!
//! The reconciler never talks to Kubernetes directly. It reads watched
//! resources through a [`SourceStore`] and reads and writes certificates
//! through a [`CertificateStore`]. Two families of implementations exist:
//!
//! - [`kubernetes`] - backed by a `kube::Client` and reflector caches
//! - [`memory`] - an in-memory store with resource versions, used by tests
//!
//! Updates are JSON merge patches (RFC 7386) that carry the observed
//! `resourceVersion`, so a concurrent write surfaces as [`StoreError::Conflict`].

pub mod kubernetes;
pub mod memory;

use crate::crd::{Certificate, CertificateSpec};
use crate::errors::StoreError;
use crate::resource::{ResourceKey, WatchedResource};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub use kubernetes::{ClusterSources, KubeStore};
pub use memory::{MemoryStore, MutationCounts};

/// Read access to watched resources.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Fetch one watched resource; `None` when it no longer exists.
    async fn get_resource(&self, key: &ResourceKey) -> Result<Option<WatchedResource>, StoreError>;

    /// Every watched resource in a namespace, of every watched kind.
    async fn list_resources(&self, namespace: &str) -> Result<Vec<WatchedResource>, StoreError>;
}

/// Read and write access to `Certificate` objects.
#[async_trait]
pub trait CertificateStore: Send + Sync {
    async fn get_certificate(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Certificate>, StoreError>;

    async fn list_certificates(&self, namespace: &str) -> Result<Vec<Certificate>, StoreError>;

    /// Create a certificate; fails with [`StoreError::AlreadyExists`] on a name clash.
    async fn create_certificate(&self, certificate: &Certificate)
        -> Result<Certificate, StoreError>;

    /// Apply a merge patch guarded by the patch's resource version.
    async fn patch_certificate(
        &self,
        namespace: &str,
        name: &str,
        patch: &CertificatePatch,
    ) -> Result<Certificate, StoreError>;

    /// Delete a certificate; fails with [`StoreError::NotFound`] when already gone.
    async fn delete_certificate(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}

/// A partial update of a certificate: changed spec fields, and optionally
/// replaced ownership metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct CertificatePatch {
    /// Resource version the patch was computed against.
    pub resource_version: String,

    /// Merge-patch fragment of the spec; `None` when the spec is unchanged.
    pub spec: Option<Value>,

    /// Labels to merge into the object.
    pub labels: Option<BTreeMap<String, String>>,

    /// Owner references replacing the current list.
    pub owner_references: Option<Vec<OwnerReference>>,
}

impl CertificatePatch {
    /// Patch that turns `current`'s spec into `desired`'s, touching only fields that differ.
    #[must_use]
    pub fn for_spec(current: &Certificate, desired: &CertificateSpec) -> Self {
        Self {
            resource_version: current.metadata.resource_version.clone().unwrap_or_default(),
            spec: spec_diff(&current.spec, desired),
            labels: None,
            owner_references: None,
        }
    }

    /// Patch that also transfers ownership of `current` to `desired`'s owner.
    #[must_use]
    pub fn for_adoption(current: &Certificate, desired: &Certificate) -> Self {
        Self {
            labels: desired.metadata.labels.clone(),
            owner_references: desired.metadata.owner_references.clone(),
            ..Self::for_spec(current, &desired.spec)
        }
    }

    /// Whether applying the patch would change nothing but the resource version.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spec.is_none() && self.labels.is_none() && self.owner_references.is_none()
    }

    /// Render the RFC 7386 document sent to the API server.
    #[must_use]
    pub fn to_merge_patch(&self) -> Value {
        let mut metadata = Map::new();
        metadata.insert(
            "resourceVersion".to_string(),
            Value::String(self.resource_version.clone()),
        );
        if let Some(labels) = &self.labels {
            metadata.insert("labels".to_string(), to_json(labels));
        }
        if let Some(owners) = &self.owner_references {
            metadata.insert("ownerReferences".to_string(), to_json(owners));
        }

        let mut patch = Map::new();
        patch.insert("metadata".to_string(), Value::Object(metadata));
        if let Some(spec) = &self.spec {
            patch.insert("spec".to_string(), spec.clone());
        }
        Value::Object(patch)
    }
}

/// Merge-patch fragment turning `current` into `desired`, or `None` when equal.
#[must_use]
pub fn spec_diff(current: &CertificateSpec, desired: &CertificateSpec) -> Option<Value> {
    if current == desired {
        return None;
    }
    merge_diff(&to_json(current), &to_json(desired))
}

// Serializing plain data types cannot fail.
fn to_json<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_default()
}

/// Compute the RFC 7386 merge patch that turns `current` into `desired`.
///
/// Objects are compared key by key: changed keys carry the desired value,
/// removed keys carry `null`. Any other change replaces the value wholesale.
/// Returns `None` when both documents are equal.
#[must_use]
pub fn merge_diff(current: &Value, desired: &Value) -> Option<Value> {
    match (current, desired) {
        (Value::Object(current), Value::Object(desired)) => {
            let mut patch = Map::new();
            for (key, desired_value) in desired {
                let changed = match current.get(key) {
                    Some(current_value) => merge_diff(current_value, desired_value),
                    None => Some(desired_value.clone()),
                };
                if let Some(changed) = changed {
                    patch.insert(key.clone(), changed);
                }
            }
            for key in current.keys().filter(|key| !desired.contains_key(*key)) {
                patch.insert(key.clone(), Value::Null);
            }
            (!patch.is_empty()).then_some(Value::Object(patch))
        }
        _ if current == desired => None,
        _ => Some(desired.clone()),
    }
}

/// Apply an RFC 7386 merge patch to `target` in place.
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                apply_merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}
