// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

// Common test utilities for integration tests

#![allow(dead_code)]

use certshim::crd::Certificate;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::client::Client;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Get a Kubernetes client or skip the test if not in a cluster
pub async fn get_kube_client_or_skip() -> Option<Client> {
    match Client::try_default().await {
        Ok(client) => {
            println!("✓ Successfully connected to Kubernetes cluster");
            Some(client)
        }
        Err(e) => {
            eprintln!("⊘ Skipping integration test: not running in Kubernetes cluster: {e}");
            None
        }
    }
}

/// Create a test namespace
pub async fn create_test_namespace(
    client: &Client,
    name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let namespaces: Api<Namespace> = Api::all(client.clone());

    let test_ns = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([
                ("test".to_string(), "integration".to_string()),
                ("managed-by".to_string(), "certshim-test".to_string()),
            ])),
            ..Default::default()
        },
        ..Default::default()
    };

    match namespaces.create(&PostParams::default(), &test_ns).await {
        Ok(_) => {
            println!("✓ Created test namespace: {name}");
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            println!("  Test namespace already exists: {name}");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

/// Delete a test namespace
pub async fn delete_test_namespace(client: &Client, name: &str) {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    match namespaces.delete(name, &DeleteParams::default()).await {
        Ok(_) => println!("✓ Deleted test namespace: {name}"),
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            println!("  Test namespace already deleted: {name}");
        }
        Err(e) => eprintln!("⚠ Failed to delete test namespace {name}: {e}"),
    }
}

/// An Ingress with one rule per host and a single TLS block.
pub fn ingress(
    namespace: &str,
    name: &str,
    annotations: &[(&str, &str)],
    secret_name: &str,
    hosts: &[&str],
) -> Ingress {
    let backend = IngressBackend {
        service: Some(IngressServiceBackend {
            name: "web".to_string(),
            port: Some(ServiceBackendPort {
                number: Some(80),
                ..Default::default()
            }),
        }),
        ..Default::default()
    };

    Ingress {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            annotations: Some(
                annotations
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            tls: Some(vec![IngressTLS {
                secret_name: Some(secret_name.to_string()),
                hosts: Some(hosts.iter().map(|h| (*h).to_string()).collect()),
            }]),
            rules: Some(
                hosts
                    .iter()
                    .map(|host| IngressRule {
                        host: Some((*host).to_string()),
                        http: Some(HTTPIngressRuleValue {
                            paths: vec![HTTPIngressPath {
                                path: Some("/".to_string()),
                                path_type: "Prefix".to_string(),
                                backend: backend.clone(),
                            }],
                        }),
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        status: None,
    }
}

/// Poll until a Certificate exists, or give up after `timeout`.
pub async fn wait_for_certificate(
    client: &Client,
    namespace: &str,
    name: &str,
    timeout: Duration,
) -> Option<Certificate> {
    let certificates: Api<Certificate> = Api::namespaced(client.clone(), namespace);
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline {
        if let Ok(Some(certificate)) = certificates.get_opt(name).await {
            return Some(certificate);
        }
        sleep(Duration::from_millis(500)).await;
    }
    None
}

/// Poll until a Certificate is gone, or give up after `timeout`.
pub async fn wait_for_certificate_deletion(
    client: &Client,
    namespace: &str,
    name: &str,
    timeout: Duration,
) -> bool {
    let certificates: Api<Certificate> = Api::namespaced(client.clone(), namespace);
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline {
        if let Ok(None) = certificates.get_opt(name).await {
            return true;
        }
        sleep(Duration::from_millis(500)).await;
    }
    false
}
