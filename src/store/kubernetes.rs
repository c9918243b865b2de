// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes-backed stores.
//!
//! Certificates are read and written through the API server directly so that
//! every write is checked against a fresh resource version. Watched resources
//! are read from reflector caches fed by the controller's watchers, which
//! keeps the per-reconcile namespace scan off the API server.

use super::{CertificatePatch, CertificateStore, SourceStore};
use crate::constants::{CONTROLLER_NAME, KIND_CERTIFICATE};
use crate::crd::{Certificate, Gateway};
use crate::errors::StoreError;
use crate::resource::{ResourceKey, ResourceKind, WatchedResource};
use async_trait::async_trait;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Api, Client, ResourceExt};
use tracing::debug;

/// [`CertificateStore`] on top of the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Certificate> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn describe(namespace: &str, name: &str) -> String {
    format!("{KIND_CERTIFICATE} {namespace}/{name}")
}

#[async_trait]
impl CertificateStore for KubeStore {
    async fn get_certificate(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Certificate>, StoreError> {
        self.api(namespace)
            .get_opt(name)
            .await
            .map_err(|e| StoreError::from_kube(&describe(namespace, name), e))
    }

    async fn list_certificates(&self, namespace: &str) -> Result<Vec<Certificate>, StoreError> {
        let list = self
            .api(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| StoreError::from_kube(&format!("Certificates in {namespace}"), e))?;
        Ok(list.items)
    }

    async fn create_certificate(
        &self,
        certificate: &Certificate,
    ) -> Result<Certificate, StoreError> {
        let namespace = certificate.namespace().unwrap_or_default();
        let name = certificate.name_any();
        debug!(namespace = %namespace, name = %name, "Creating Certificate");

        self.api(&namespace)
            .create(&PostParams::default(), certificate)
            .await
            .map_err(|e| StoreError::from_kube(&describe(&namespace, &name), e))
    }

    async fn patch_certificate(
        &self,
        namespace: &str,
        name: &str,
        patch: &CertificatePatch,
    ) -> Result<Certificate, StoreError> {
        let body = patch.to_merge_patch();
        debug!(namespace = %namespace, name = %name, patch = %body, "Patching Certificate");

        self.api(namespace)
            .patch(
                name,
                &PatchParams {
                    field_manager: Some(CONTROLLER_NAME.to_string()),
                    ..Default::default()
                },
                &Patch::Merge(&body),
            )
            .await
            .map_err(|e| StoreError::from_kube(&describe(namespace, name), e))
    }

    async fn delete_certificate(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        debug!(namespace = %namespace, name = %name, "Deleting Certificate");

        self.api(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| StoreError::from_kube(&describe(namespace, name), e))
    }
}

/// [`SourceStore`] backed by the controller's reflector caches.
///
/// The Gateway cache is absent when Gateway API support is disabled; Gateway
/// keys then resolve to "not found".
#[derive(Clone)]
pub struct ClusterSources {
    ingresses: Store<Ingress>,
    gateways: Option<Store<Gateway>>,
}

impl ClusterSources {
    #[must_use]
    pub fn new(ingresses: Store<Ingress>, gateways: Option<Store<Gateway>>) -> Self {
        Self {
            ingresses,
            gateways,
        }
    }
}

#[async_trait]
impl SourceStore for ClusterSources {
    async fn get_resource(&self, key: &ResourceKey) -> Result<Option<WatchedResource>, StoreError> {
        let resource = match key.kind {
            ResourceKind::Ingress => self
                .ingresses
                .get(&ObjectRef::new(&key.name).within(&key.namespace))
                .map(|ingress| WatchedResource::from_ingress(&ingress)),
            ResourceKind::Gateway => self.gateways.as_ref().and_then(|gateways| {
                gateways
                    .get(&ObjectRef::new(&key.name).within(&key.namespace))
                    .map(|gateway| WatchedResource::from_gateway(&gateway))
            }),
        };
        Ok(resource)
    }

    async fn list_resources(&self, namespace: &str) -> Result<Vec<WatchedResource>, StoreError> {
        let in_namespace = |ns: Option<String>| ns.as_deref() == Some(namespace);

        let mut resources: Vec<WatchedResource> = self
            .ingresses
            .state()
            .iter()
            .filter(|ingress| in_namespace(ingress.namespace()))
            .map(|ingress| WatchedResource::from_ingress(ingress))
            .collect();

        if let Some(gateways) = &self.gateways {
            resources.extend(
                gateways
                    .state()
                    .iter()
                    .filter(|gateway| in_namespace(gateway.namespace()))
                    .map(|gateway| WatchedResource::from_gateway(gateway)),
            );
        }
        Ok(resources)
    }
}

#[cfg(test)]
#[path = "kubernetes_tests.rs"]
mod kubernetes_tests;
