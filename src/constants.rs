// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the certshim controller.
//!
//! This module contains the annotation keys, API identifiers and timing
//! constants used throughout the codebase. Constants are organized by category
//! for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group of the cert-manager `Certificate` resource
pub const CERT_MANAGER_GROUP: &str = "cert-manager.io";

/// Kind name for the cert-manager `Certificate` resource
pub const KIND_CERTIFICATE: &str = "Certificate";

/// Kind name for namespaced cert-manager issuers
pub const KIND_ISSUER: &str = "Issuer";

/// Kind name for cluster-scoped cert-manager issuers
pub const KIND_CLUSTER_ISSUER: &str = "ClusterIssuer";

/// Fully qualified API version of `Ingress`
pub const INGRESS_API_VERSION: &str = "networking.k8s.io/v1";

/// Kind name for `Ingress`
pub const KIND_INGRESS: &str = "Ingress";

/// Fully qualified API version of the Gateway API `Gateway`
pub const GATEWAY_API_VERSION: &str = "gateway.networking.k8s.io/v1";

/// Kind name for `Gateway`
pub const KIND_GATEWAY: &str = "Gateway";

/// Controller name reported on Kubernetes events
pub const CONTROLLER_NAME: &str = "certshim";

/// Label carried by every Certificate certshim manages (the ownership marker)
pub const MANAGED_BY_LABEL: &str = "certshim.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY_VALUE: &str = "certshim";

// ============================================================================
// Certificate Annotations
// ============================================================================

/// Common name to place in the certificate subject
pub const COMMON_NAME_ANNOTATION: &str = "cert-manager.io/common-name";

/// Requested certificate lifetime (Go duration)
pub const DURATION_ANNOTATION: &str = "cert-manager.io/duration";

/// How long before expiry the certificate is renewed (Go duration)
pub const RENEW_BEFORE_ANNOTATION: &str = "cert-manager.io/renew-before";

/// Comma separated list of key usages
pub const USAGES_ANNOTATION: &str = "cert-manager.io/usages";

/// Number of `CertificateRequest` revisions to keep
pub const REVISION_HISTORY_LIMIT_ANNOTATION: &str = "cert-manager.io/revision-history-limit";

/// Private key algorithm (`RSA`, `ECDSA`, `Ed25519`)
pub const PRIVATE_KEY_ALGORITHM_ANNOTATION: &str = "cert-manager.io/private-key-algorithm";

/// Private key encoding (`PKCS1`, `PKCS8`)
pub const PRIVATE_KEY_ENCODING_ANNOTATION: &str = "cert-manager.io/private-key-encoding";

/// Private key size in bits (or curve size for ECDSA)
pub const PRIVATE_KEY_SIZE_ANNOTATION: &str = "cert-manager.io/private-key-size";

/// Private key rotation policy (`Never`, `Always`)
pub const PRIVATE_KEY_ROTATION_POLICY_ANNOTATION: &str =
    "cert-manager.io/private-key-rotation-policy";

// ============================================================================
// Issuer Annotations
// ============================================================================

/// Name of a namespaced issuer to request certificates from
pub const ISSUER_NAME_ANNOTATION: &str = "cert-manager.io/issuer";

/// Name of a cluster issuer to request certificates from
pub const CLUSTER_ISSUER_NAME_ANNOTATION: &str = "cert-manager.io/cluster-issuer";

/// Kind override for external issuers, used together with [`ISSUER_NAME_ANNOTATION`]
pub const ISSUER_KIND_ANNOTATION: &str = "cert-manager.io/issuer-kind";

/// API group override for external issuers, used together with [`ISSUER_NAME_ANNOTATION`]
pub const ISSUER_GROUP_ANNOTATION: &str = "cert-manager.io/issuer-group";

/// Legacy annotation requesting a certificate from the configured default issuer
pub const TLS_ACME_ANNOTATION: &str = "kubernetes.io/tls-acme";

// ============================================================================
// Event Reasons
// ============================================================================

/// A Certificate was created for a TLS block
pub const REASON_CREATE_CERTIFICATE: &str = "CreateCertificate";

/// An owned Certificate was brought back in sync
pub const REASON_UPDATE_CERTIFICATE: &str = "UpdateCertificate";

/// An owned Certificate was deleted because it is no longer requested
pub const REASON_DELETE_CERTIFICATE: &str = "DeleteCertificate";

/// The annotations or TLS blocks of a resource are invalid
pub const REASON_BAD_CONFIG: &str = "BadConfig";

/// Another resource is the canonical owner of a requested secret
pub const REASON_SECRET_CONFLICT: &str = "SecretConflict";

/// A Certificate with the requested name exists but is not managed by certshim
pub const REASON_NOT_OWNED: &str = "NotOwned";

// ============================================================================
// Reconciliation Timing
// ============================================================================

/// Requeue interval for resources whose candidates lost a conflict (5 minutes)
pub const DEFAULT_CONFLICT_REQUEUE_SECS: u64 = 300;

/// Requeue interval for resources with invalid annotations (10 minutes)
pub const DEFAULT_INVALID_REQUEUE_SECS: u64 = 600;

/// Base delay of the per-key failure rate limiter (5ms)
pub const DEFAULT_BACKOFF_BASE_MILLIS: u64 = 5;

/// Maximum delay of the per-key failure rate limiter (1000 seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 1000;

/// Growth factor of the per-key failure rate limiter
pub const BACKOFF_MULTIPLIER: u32 = 2;

/// Immediate retries after a stale-version update before escalating
pub const DEFAULT_MAX_UPDATE_RETRIES: u32 = 5;

/// Number of concurrent reconcile workers
pub const DEFAULT_WORKERS: usize = 5;

/// Default bind address of the metrics endpoint
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9402";
