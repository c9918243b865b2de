// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Desired-state builder: turns a watched resource into candidate certificates.
//!
//! A resource requests certificates by naming an issuer in its annotations.
//! Each of its TLS blocks then yields one candidate `Certificate`, named after
//! the block's secret, with the block's hosts as DNS names and the resource's
//! certificate annotations merged in by the translator.
//!
//! Candidates are seeded from the certificate this resource already owns so
//! that fields no annotation covers survive a rebuild.

use crate::annotations::translate_annotations;
use crate::constants::{
    CERT_MANAGER_GROUP, CLUSTER_ISSUER_NAME_ANNOTATION, ISSUER_GROUP_ANNOTATION,
    ISSUER_KIND_ANNOTATION, ISSUER_NAME_ANNOTATION, KIND_CLUSTER_ISSUER, KIND_ISSUER,
    MANAGED_BY_LABEL, MANAGED_BY_VALUE, TLS_ACME_ANNOTATION,
};
use crate::crd::{Certificate, CertificateSpec, IssuerRef};
use crate::errors::ShimError;
use crate::resource::{TlsBlock, WatchedResource};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

/// Builder settings that come from controller configuration rather than annotations.
#[derive(Clone, Debug, PartialEq)]
pub struct BuilderConfig {
    /// Issuer used for resources that opt in through an auto-certificate annotation.
    pub default_issuer: Option<IssuerRef>,

    /// Annotations that, set to `"true"`, request a certificate from
    /// [`Self::default_issuer`] when no issuer annotation is present.
    pub auto_certificate_annotations: Vec<String>,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            default_issuer: None,
            auto_certificate_annotations: vec![TLS_ACME_ANNOTATION.to_string()],
        }
    }
}

/// Determine the issuer a resource requests certificates from.
///
/// Returns `Ok(None)` when the resource does not request certificates.
///
/// # Errors
///
/// Returns [`ShimError::InvalidAnnotation`] when both issuer annotations are
/// set or when the issuer name is empty.
pub fn select_issuer(
    annotations: &BTreeMap<String, String>,
    config: &BuilderConfig,
) -> Result<Option<IssuerRef>, ShimError> {
    let issuer = annotations.get(ISSUER_NAME_ANNOTATION);
    let cluster_issuer = annotations.get(CLUSTER_ISSUER_NAME_ANNOTATION);

    match (issuer, cluster_issuer) {
        (Some(_), Some(cluster)) => Err(ShimError::invalid_annotation(
            CLUSTER_ISSUER_NAME_ANNOTATION,
            cluster,
            format!("cannot be combined with {ISSUER_NAME_ANNOTATION}"),
        )),
        (Some(name), None) => {
            require_name(ISSUER_NAME_ANNOTATION, name)?;
            Ok(Some(IssuerRef {
                name: name.clone(),
                kind: Some(
                    annotations
                        .get(ISSUER_KIND_ANNOTATION)
                        .cloned()
                        .unwrap_or_else(|| KIND_ISSUER.to_string()),
                ),
                group: Some(
                    annotations
                        .get(ISSUER_GROUP_ANNOTATION)
                        .cloned()
                        .unwrap_or_else(|| CERT_MANAGER_GROUP.to_string()),
                ),
            }))
        }
        (None, Some(name)) => {
            require_name(CLUSTER_ISSUER_NAME_ANNOTATION, name)?;
            Ok(Some(IssuerRef {
                name: name.clone(),
                kind: Some(KIND_CLUSTER_ISSUER.to_string()),
                group: Some(CERT_MANAGER_GROUP.to_string()),
            }))
        }
        (None, None) => {
            let opted_in = config
                .auto_certificate_annotations
                .iter()
                .any(|key| annotations.get(key).map(String::as_str) == Some("true"));
            Ok(config.default_issuer.clone().filter(|_| opted_in))
        }
    }
}

fn require_name(key: &str, name: &str) -> Result<(), ShimError> {
    if name.trim().is_empty() {
        return Err(ShimError::invalid_annotation(
            key,
            name,
            "issuer name must not be empty",
        ));
    }
    Ok(())
}

/// Secret names a resource claims, without building certificates.
///
/// Used to detect cross-resource conflicts. A resource claims nothing unless
/// it would build: ambiguous issuer annotations, an invalid certificate
/// annotation or an invalid TLS block all leave the claim set empty.
#[must_use]
pub fn requested_secrets(resource: &WatchedResource, config: &BuilderConfig) -> Vec<String> {
    match select_issuer(&resource.annotations, config) {
        Ok(Some(_)) => {}
        Ok(None) | Err(_) => return Vec::new(),
    }

    if resource
        .tls
        .iter()
        .enumerate()
        .any(|(index, block)| validate_block(index, block).is_err())
    {
        return Vec::new();
    }

    let mut scratch = CertificateSpec::default();
    if translate_annotations(Some(&mut scratch), Some(&resource.annotations)).is_err() {
        return Vec::new();
    }

    let mut seen = HashSet::new();
    resource
        .tls
        .iter()
        .filter(|block| seen.insert(block.secret_name.as_str()))
        .map(|block| block.secret_name.clone())
        .collect()
}

/// Build the candidate certificates a resource requests.
///
/// # Arguments
///
/// * `resource` - The watched resource
/// * `owned` - Certificates in the resource's namespace; only those owned by
///   `resource` are used as translation seeds
/// * `config` - Controller-level builder settings
///
/// # Errors
///
/// - [`ShimError::InvalidAnnotation`] for issuer or certificate annotation errors
/// - [`ShimError::InvalidTls`] for a TLS block without secret name or hosts
///
/// Any error invalidates the whole resource; no partial candidate set is returned.
pub fn build_certificates(
    resource: &WatchedResource,
    owned: &[Certificate],
    config: &BuilderConfig,
) -> Result<Vec<Certificate>, ShimError> {
    let Some(issuer) = select_issuer(&resource.annotations, config)? else {
        return Ok(Vec::new());
    };

    let mut candidates: Vec<Certificate> = Vec::with_capacity(resource.tls.len());
    for (index, block) in resource.tls.iter().enumerate() {
        let hosts = validate_block(index, block)?;

        if candidates
            .iter()
            .any(|c| c.spec.secret_name == block.secret_name)
        {
            warn!(
                resource = %resource.key,
                secret = %block.secret_name,
                tls_index = index,
                "Secret named by more than one TLS block, keeping the first"
            );
            continue;
        }

        let mut spec = owned
            .iter()
            .find(|cert| cert.name_any() == block.secret_name && resource.key.owns(cert))
            .map(|cert| cert.spec.clone())
            .unwrap_or_default();

        spec.secret_name.clone_from(&block.secret_name);
        spec.dns_names = hosts;
        spec.issuer_ref = issuer.clone();
        translate_annotations(Some(&mut spec), Some(&resource.annotations))?;

        candidates.push(new_certificate(resource, spec));
    }

    Ok(candidates)
}

/// Validate a TLS block and return its hosts, deduplicated in order.
fn validate_block(index: usize, block: &TlsBlock) -> Result<Vec<String>, ShimError> {
    if block.secret_name.is_empty() {
        return Err(ShimError::InvalidTls {
            index,
            reason: "secretName is empty".to_string(),
        });
    }

    let mut seen = HashSet::new();
    let hosts: Vec<String> = block
        .hosts
        .iter()
        .filter(|host| !host.is_empty())
        .filter(|host| seen.insert(host.as_str()))
        .cloned()
        .collect();

    if hosts.is_empty() {
        return Err(ShimError::InvalidTls {
            index,
            reason: format!("no hosts for secret {:?}", block.secret_name),
        });
    }
    Ok(hosts)
}

fn new_certificate(resource: &WatchedResource, spec: CertificateSpec) -> Certificate {
    Certificate {
        metadata: ObjectMeta {
            name: Some(spec.secret_name.clone()),
            namespace: Some(resource.key.namespace.clone()),
            labels: Some(BTreeMap::from([(
                MANAGED_BY_LABEL.to_string(),
                MANAGED_BY_VALUE.to_string(),
            )])),
            owner_references: Some(vec![resource.owner_reference()]),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

#[cfg(test)]
#[path = "builder_tests.rs"]
mod builder_tests;
