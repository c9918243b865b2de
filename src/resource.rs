// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Watched resources: the `Ingress` and `Gateway` objects that request certificates.
//!
//! Both kinds are reduced to a [`WatchedResource`]: an identity, its
//! annotations and a list of [`TlsBlock`]s (secret name + hostnames). The rest
//! of the pipeline never looks at the original Kubernetes types.

use crate::constants::{
    GATEWAY_API_VERSION, INGRESS_API_VERSION, KIND_GATEWAY, KIND_INGRESS, MANAGED_BY_LABEL,
    MANAGED_BY_VALUE,
};
use crate::crd::{Certificate, Gateway};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{OwnerReference, Time};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Kinds of resources certshim watches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Ingress,
    Gateway,
}

impl ResourceKind {
    /// Kubernetes kind name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Ingress => KIND_INGRESS,
            ResourceKind::Gateway => KIND_GATEWAY,
        }
    }

    /// Fully qualified API version.
    #[must_use]
    pub fn api_version(&self) -> &'static str {
        match self {
            ResourceKind::Ingress => INGRESS_API_VERSION,
            ResourceKind::Gateway => GATEWAY_API_VERSION,
        }
    }

    /// Resolve an owner reference's `(apiVersion, kind)` to a watched kind.
    #[must_use]
    pub fn from_type(api_version: &str, kind: &str) -> Option<Self> {
        [ResourceKind::Ingress, ResourceKind::Gateway]
            .into_iter()
            .find(|k| k.as_str() == kind && k.api_version() == api_version)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work queue key: identifies one watched resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    #[must_use]
    pub fn new(kind: ResourceKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Key of an `Ingress`.
    #[must_use]
    pub fn for_ingress(ingress: &Ingress) -> Self {
        Self::new(
            ResourceKind::Ingress,
            &ingress.namespace().unwrap_or_default(),
            &ingress.name_any(),
        )
    }

    /// Key of a `Gateway`.
    #[must_use]
    pub fn for_gateway(gateway: &Gateway) -> Self {
        Self::new(
            ResourceKind::Gateway,
            &gateway.namespace().unwrap_or_default(),
            &gateway.name_any(),
        )
    }

    /// The watched resource a certificate's controller owner reference points at.
    ///
    /// Returns `None` for certificates certshim does not manage: those without
    /// the managed-by label or without a controller reference to a watched kind.
    #[must_use]
    pub fn controller_of(certificate: &Certificate) -> Option<Self> {
        if certificate.labels().get(MANAGED_BY_LABEL).map(String::as_str) != Some(MANAGED_BY_VALUE)
        {
            return None;
        }
        let namespace = certificate.namespace().unwrap_or_default();
        certificate
            .owner_references()
            .iter()
            .filter(|owner| owner.controller == Some(true))
            .find_map(|owner| {
                ResourceKind::from_type(&owner.api_version, &owner.kind)
                    .map(|kind| Self::new(kind, &namespace, &owner.name))
            })
    }

    /// Whether `certificate` is managed by certshim on behalf of this resource.
    #[must_use]
    pub fn owns(&self, certificate: &Certificate) -> bool {
        Self::controller_of(certificate).as_ref() == Some(self)
    }

    /// Object reference used as the subject of events.
    #[must_use]
    pub fn object_reference(&self, uid: Option<&str>) -> ObjectReference {
        ObjectReference {
            api_version: Some(self.kind.api_version().to_string()),
            kind: Some(self.kind.as_str().to_string()),
            namespace: Some(self.namespace.clone()),
            name: Some(self.name.clone()),
            uid: uid.map(str::to_string),
            ..Default::default()
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// A secret name and the hostnames it must cover.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsBlock {
    pub secret_name: String,
    pub hosts: Vec<String>,
}

impl TlsBlock {
    #[must_use]
    pub fn new(secret_name: &str, hosts: &[&str]) -> Self {
        Self {
            secret_name: secret_name.to_string(),
            hosts: hosts.iter().map(|h| (*h).to_string()).collect(),
        }
    }
}

/// Snapshot of a watched resource, reduced to what certificate derivation needs.
#[derive(Clone, Debug, PartialEq)]
pub struct WatchedResource {
    pub key: ResourceKey,
    pub uid: Option<String>,
    pub creation_timestamp: Option<DateTime<Utc>>,
    pub annotations: BTreeMap<String, String>,
    pub tls: Vec<TlsBlock>,
}

impl WatchedResource {
    /// Reduce an `Ingress` to its TLS blocks.
    #[must_use]
    pub fn from_ingress(ingress: &Ingress) -> Self {
        let tls = ingress
            .spec
            .as_ref()
            .and_then(|spec| spec.tls.as_ref())
            .map(|blocks| {
                blocks
                    .iter()
                    .map(|block| TlsBlock {
                        secret_name: block.secret_name.clone().unwrap_or_default(),
                        hosts: block.hosts.clone().unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            key: ResourceKey::for_ingress(ingress),
            uid: ingress.uid(),
            creation_timestamp: ingress
                .meta()
                .creation_timestamp
                .as_ref()
                .and_then(parse_timestamp),
            annotations: ingress.annotations().clone(),
            tls,
        }
    }

    /// Reduce a `Gateway` to TLS blocks, one per referenced secret.
    ///
    /// Only terminating listeners with a hostname contribute. Listeners that
    /// share a secret merge their hostnames into one block, in listener order.
    #[must_use]
    pub fn from_gateway(gateway: &Gateway) -> Self {
        let key = ResourceKey::for_gateway(gateway);
        let mut tls: Vec<TlsBlock> = Vec::new();

        for listener in &gateway.spec.listeners {
            let Some(listener_tls) = &listener.tls else {
                continue;
            };
            if listener_tls.mode.as_deref() == Some("Passthrough") {
                continue;
            }
            let Some(hostname) = listener.hostname.as_deref().filter(|h| !h.is_empty()) else {
                debug!(
                    gateway = %key,
                    listener = %listener.name,
                    "Skipping TLS listener without hostname"
                );
                continue;
            };

            for cert_ref in &listener_tls.certificate_refs {
                if !is_local_secret_ref(cert_ref, &key.namespace) {
                    continue;
                }
                match tls.iter_mut().find(|b| b.secret_name == cert_ref.name) {
                    Some(block) => {
                        if !block.hosts.iter().any(|h| h == hostname) {
                            block.hosts.push(hostname.to_string());
                        }
                    }
                    None => tls.push(TlsBlock {
                        secret_name: cert_ref.name.clone(),
                        hosts: vec![hostname.to_string()],
                    }),
                }
            }
        }

        Self {
            uid: gateway.uid(),
            creation_timestamp: gateway
                .meta()
                .creation_timestamp
                .as_ref()
                .and_then(parse_timestamp),
            annotations: gateway.annotations().clone(),
            tls,
            key,
        }
    }

    /// Controller owner reference pointing back at this resource.
    #[must_use]
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.key.kind.api_version().to_string(),
            kind: self.key.kind.as_str().to_string(),
            name: self.key.name.clone(),
            uid: self.uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}

fn is_local_secret_ref(cert_ref: &crate::crd::SecretObjectReference, namespace: &str) -> bool {
    let kind_ok = cert_ref.kind.as_deref().is_none_or(|k| k == "Secret");
    let group_ok = cert_ref
        .group
        .as_deref()
        .is_none_or(|g| g.is_empty() || g == "core");
    let namespace_ok = cert_ref.namespace.as_deref().is_none_or(|ns| ns == namespace);
    kind_ok && group_ok && namespace_ok
}

/// Convert a Kubernetes `Time` into a `chrono` timestamp.
///
/// `Time` serializes as an RFC 3339 string regardless of the datetime crate
/// backing it, so the conversion goes through its wire form.
#[must_use]
pub fn parse_timestamp(time: &Time) -> Option<DateTime<Utc>> {
    let value = serde_json::to_value(time).ok()?;
    DateTime::parse_from_rfc3339(value.as_str()?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
#[path = "resource_tests.rs"]
mod resource_tests;
