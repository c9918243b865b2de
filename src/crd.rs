// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource types consumed and produced by certshim.
//!
//! Neither resource is owned by this crate: `Certificate` belongs to
//! [cert-manager](https://cert-manager.io/docs/reference/api-docs/) and
//! `Gateway` to the [Gateway API](https://gateway-api.sigs.k8s.io/). Only the
//! fields certshim reads or writes are modelled.
//!
//! # Resource Types
//!
//! - [`Certificate`] - the managed certificate request handed to the issuance engine
//! - [`Gateway`] - a watched resource whose listeners reference TLS secrets
//!
//! # Example: A Certificate Spec
//!
//! ```rust
//! use certshim::crd::{CertificateSpec, IssuerRef, KeyUsage};
//! use certshim::duration::GoDuration;
//!
//! let spec = CertificateSpec {
//!     common_name: Some("www.example.com".to_string()),
//!     dns_names: vec!["www.example.com".to_string()],
//!     secret_name: "example-tls".to_string(),
//!     issuer_ref: IssuerRef::cluster_issuer("letsencrypt-prod"),
//!     duration: Some(GoDuration::from_hours(168)),
//!     usages: Some(vec![KeyUsage::ServerAuth, KeyUsage::Signing]),
//!     ..Default::default()
//! };
//! assert_eq!(spec.issuer_ref.kind.as_deref(), Some("ClusterIssuer"));
//! ```

use crate::constants::{CERT_MANAGER_GROUP, KIND_CLUSTER_ISSUER, KIND_ISSUER};
use crate::duration::GoDuration;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Desired state of a cert-manager `Certificate`.
///
/// See <https://cert-manager.io/docs/reference/api-docs/#cert-manager.io/v1.CertificateSpec>.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "Certificate",
    namespaced,
    status = "CertificateStatus",
    shortname = "cert",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    /// Common name placed in the certificate subject.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,

    /// Subject alternative DNS names, in TLS block order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_names: Vec<String>,

    /// Secret the issuance engine writes the signed key pair into.
    pub secret_name: String,

    /// Issuer that signs the certificate.
    pub issuer_ref: IssuerRef,

    /// Requested lifetime. The issuance engine applies its own default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub duration: Option<GoDuration>,

    /// How long before expiry the certificate is renewed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub renew_before: Option<GoDuration>,

    /// Requested key usages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usages: Option<Vec<KeyUsage>>,

    /// Number of `CertificateRequest` revisions kept. Always positive when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 1))]
    pub revision_history_limit: Option<i32>,

    /// Private key options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<CertificatePrivateKey>,
}

/// Reference to the issuer of a certificate.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuerRef {
    /// Issuer name.
    pub name: String,

    /// Issuer kind (`Issuer`, `ClusterIssuer` or an external issuer kind).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Issuer API group. cert-manager assumes `cert-manager.io` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl IssuerRef {
    /// Reference a namespaced cert-manager `Issuer`.
    #[must_use]
    pub fn issuer(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: Some(KIND_ISSUER.to_string()),
            group: Some(CERT_MANAGER_GROUP.to_string()),
        }
    }

    /// Reference a cert-manager `ClusterIssuer`.
    #[must_use]
    pub fn cluster_issuer(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: Some(KIND_CLUSTER_ISSUER.to_string()),
            group: Some(CERT_MANAGER_GROUP.to_string()),
        }
    }
}

/// Private key options of a certificate.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificatePrivateKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<PrivateKeyAlgorithm>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<PrivateKeyEncoding>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 1))]
    pub size: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation_policy: Option<RotationPolicy>,
}

/// Observed state of a certificate, written by the issuance engine.
///
/// certshim never reads it back when diffing; it is modelled so that
/// objects round-trip without losing data.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificateStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<CertificateCondition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renewal_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<i32>,
}

/// A condition reported by the issuance engine.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificateCondition {
    pub r#type: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Declares an enum whose variants map one-to-one onto fixed strings, with
/// serde, `FromStr` and `Display` agreeing on the spelling.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $text)] $variant),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The wire spelling of this variant.
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(UnknownVariant(s.to_string())),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// A string did not match any variant of a fixed-vocabulary enum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown value {0:?}")]
pub struct UnknownVariant(pub String);

string_enum! {
    /// Key usage and extended key usage names understood by cert-manager.
    ///
    /// Spellings are case sensitive and match the cert-manager API.
    KeyUsage {
        Signing => "signing",
        DigitalSignature => "digital signature",
        ContentCommitment => "content commitment",
        KeyEncipherment => "key encipherment",
        KeyAgreement => "key agreement",
        DataEncipherment => "data encipherment",
        CertSign => "cert sign",
        CrlSign => "crl sign",
        EncipherOnly => "encipher only",
        DecipherOnly => "decipher only",
        Any => "any",
        ServerAuth => "server auth",
        ClientAuth => "client auth",
        CodeSigning => "code signing",
        EmailProtection => "email protection",
        SMime => "s/mime",
        IpsecEndSystem => "ipsec end system",
        IpsecTunnel => "ipsec tunnel",
        IpsecUser => "ipsec user",
        Timestamping => "timestamping",
        OcspSigning => "ocsp signing",
        MicrosoftSgc => "microsoft sgc",
        NetscapeSgc => "netscape sgc",
    }
}

string_enum! {
    /// Private key algorithm.
    PrivateKeyAlgorithm {
        Rsa => "RSA",
        Ecdsa => "ECDSA",
        Ed25519 => "Ed25519",
    }
}

string_enum! {
    /// Private key encoding.
    PrivateKeyEncoding {
        Pkcs1 => "PKCS1",
        Pkcs8 => "PKCS8",
    }
}

string_enum! {
    /// Whether the private key is regenerated on every issuance.
    RotationPolicy {
        Never => "Never",
        Always => "Always",
    }
}

// ============================================================================
// Gateway API
// ============================================================================

/// Minimal Gateway API `Gateway` spec: only listeners and their TLS config.
///
/// See <https://gateway-api.sigs.k8s.io/reference/spec/#gateway>.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1",
    kind = "Gateway",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    pub gateway_class_name: String,

    #[serde(default)]
    pub listeners: Vec<Listener>,
}

/// A Gateway listener.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    pub port: i32,

    pub protocol: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<GatewayTlsConfig>,
}

/// TLS configuration of a Gateway listener.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewayTlsConfig {
    /// `Terminate` (default) or `Passthrough`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    #[serde(default)]
    pub certificate_refs: Vec<SecretObjectReference>,
}

/// Reference from a listener to a certificate secret.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretObjectReference {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

#[cfg(test)]
#[path = "crd_tests.rs"]
mod crd_tests;
