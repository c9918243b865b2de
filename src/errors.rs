// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for certshim.
//!
//! Two enums cover the whole pipeline:
//!
//! - [`StoreError`] - failures reported by the object store (Kubernetes API)
//! - [`ShimError`] - every failure the translator, builder, resolver and
//!   reconciler can return
//!
//! Callers never match on message strings. [`ShimError::kind`] returns a
//! tagged [`ErrorKind`] and the `is_*` predicates answer "is this a
//! validation error" style questions. The reconciler's retry policy is built
//! entirely on [`ErrorKind`].

use thiserror::Error;

/// Errors reported by the declarative object store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The object does not exist (HTTP 404).
    #[error("{0} not found")]
    NotFound(String),

    /// An object with the same name already exists (HTTP 409, reason `AlreadyExists`).
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// The expected resource version is stale (HTTP 409, reason `Conflict`).
    #[error("{0} was modified concurrently (stale resource version)")]
    Conflict(String),

    /// The store rejected the object (HTTP 400/422, admission webhooks).
    #[error("{0} was rejected by the API server: {1}")]
    Invalid(String, String),

    /// Network, availability, throttling or any other failure expected to clear on its own.
    #[error("transient store error: {0}")]
    Transient(String),
}

impl StoreError {
    /// Whether the error reports a missing object.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Whether the error reports a stale resource version.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    /// Classify a Kubernetes API error.
    ///
    /// # Arguments
    ///
    /// * `object` - Human-readable identity of the object, used in messages
    /// * `err` - The error returned by `kube`
    #[must_use]
    pub fn from_kube(object: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(api_err) => match api_err.code {
                404 => StoreError::NotFound(object.to_string()),
                409 if api_err.reason == "AlreadyExists" => {
                    StoreError::AlreadyExists(object.to_string())
                }
                409 => StoreError::Conflict(object.to_string()),
                400 | 422 => StoreError::Invalid(object.to_string(), api_err.message.clone()),
                _ => StoreError::Transient(format!("{object}: {}", api_err.message)),
            },
            other => StoreError::Transient(format!("{object}: {other}")),
        }
    }
}

/// Coarse classification of a [`ShimError`], used for retry decisions and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller bug; never produced by user input.
    NilTarget,
    /// Invalid user input; permanent until the watched resource changes.
    InvalidInput,
    /// Another resource (or a foreign object) owns the requested secret.
    Conflict,
    /// Expected to clear without external change.
    Transient,
}

impl ErrorKind {
    /// Stable label for metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NilTarget => "nil_target",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Transient => "transient",
        }
    }
}

/// Errors produced while deriving and synchronizing managed certificates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShimError {
    /// Annotations were translated into a missing certificate spec.
    #[error("cannot translate annotations into a missing certificate spec")]
    NilTarget,

    /// An annotation carries a value that cannot be parsed or is out of range.
    #[error("invalid annotation {key}={value:?}: {reason}")]
    InvalidAnnotation {
        /// The annotation key
        key: String,
        /// The raw annotation value
        value: String,
        /// Why the value was rejected
        reason: String,
    },

    /// A TLS block cannot produce a certificate (missing secret name or hosts).
    #[error("invalid TLS block {index}: {reason}")]
    InvalidTls {
        /// Position of the TLS block on the resource
        index: usize,
        /// Why the block was rejected
        reason: String,
    },

    /// Another watched resource is the canonical owner of the secret.
    #[error("secret {namespace}/{secret_name} is claimed by canonical owner {owner}")]
    Conflict {
        namespace: String,
        secret_name: String,
        /// Identity of the winning resource, e.g. `Ingress/default/web`
        owner: String,
    },

    /// A Certificate with the requested name exists and is not managed by certshim.
    #[error("Certificate {namespace}/{name} exists and is not managed by certshim")]
    NotOwned { namespace: String, name: String },

    /// Concurrent updates kept invalidating the observed resource version.
    #[error("gave up updating Certificate {namespace}/{name} after {attempts} stale-version conflicts")]
    UpdateConflict {
        namespace: String,
        name: String,
        attempts: u32,
    },

    /// The object store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ShimError {
    /// Build an [`ShimError::InvalidAnnotation`].
    #[must_use]
    pub fn invalid_annotation(key: &str, value: &str, reason: impl Into<String>) -> Self {
        ShimError::InvalidAnnotation {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShimError::NilTarget => ErrorKind::NilTarget,
            ShimError::InvalidAnnotation { .. }
            | ShimError::InvalidTls { .. }
            | ShimError::Store(StoreError::Invalid(..)) => ErrorKind::InvalidInput,
            ShimError::Conflict { .. } | ShimError::NotOwned { .. } => ErrorKind::Conflict,
            ShimError::UpdateConflict { .. } | ShimError::Store(_) => ErrorKind::Transient,
        }
    }

    /// Whether this is an annotation validation error.
    #[must_use]
    pub fn is_invalid_annotation(&self) -> bool {
        matches!(self, ShimError::InvalidAnnotation { .. })
    }

    /// Whether the error is a permanent problem with user input.
    #[must_use]
    pub fn is_invalid_input(&self) -> bool {
        self.kind() == ErrorKind::InvalidInput
    }

    /// Whether the error is an ownership conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Whether the error is expected to clear on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
