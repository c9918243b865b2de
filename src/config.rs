// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Command-line and environment configuration.
//!
//! Every flag has a `CERTSHIM_*` environment fallback so the controller can
//! be configured from a Deployment manifest without touching its arguments.
//! Intervals are written as Go durations (`90s`, `5m`, `1h30m`).

use crate::builder::BuilderConfig;
use crate::constants::{
    CERT_MANAGER_GROUP, DEFAULT_BACKOFF_BASE_MILLIS, DEFAULT_BACKOFF_MAX_SECS,
    DEFAULT_CONFLICT_REQUEUE_SECS, DEFAULT_INVALID_REQUEUE_SECS, DEFAULT_MAX_UPDATE_RETRIES,
    DEFAULT_METRICS_ADDR, DEFAULT_WORKERS, KIND_ISSUER, TLS_ACME_ANNOTATION,
};
use crate::crd::IssuerRef;
use crate::duration::{parse_go_duration, GoDuration};
use crate::queue::ExponentialBackoff;
use crate::reconciler::ReconcilerConfig;
use clap::{ArgAction, Parser};
use std::net::SocketAddr;
use std::time::Duration;

fn parse_interval(input: &str) -> Result<GoDuration, String> {
    match parse_go_duration(input) {
        Ok(duration) if duration.is_zero() => Err("interval must be positive".to_string()),
        Ok(duration) => Ok(GoDuration(duration)),
        Err(e) => Err(e.to_string()),
    }
}

/// certshim runtime configuration.
#[derive(Parser, Clone, Debug, PartialEq)]
#[command(
    name = "certshim",
    version,
    about = "Keeps cert-manager Certificates in sync with annotated Ingress and Gateway resources"
)]
pub struct ShimConfig {
    /// Issuer used for resources that carry an auto-certificate annotation but no issuer annotation
    #[arg(long, env = "CERTSHIM_DEFAULT_ISSUER_NAME")]
    pub default_issuer_name: Option<String>,

    /// Kind of the default issuer
    #[arg(long, env = "CERTSHIM_DEFAULT_ISSUER_KIND", default_value = KIND_ISSUER)]
    pub default_issuer_kind: String,

    /// API group of the default issuer
    #[arg(long, env = "CERTSHIM_DEFAULT_ISSUER_GROUP", default_value = CERT_MANAGER_GROUP)]
    pub default_issuer_group: String,

    /// Annotations that request a certificate from the default issuer when set to "true"
    #[arg(
        long,
        env = "CERTSHIM_AUTO_CERTIFICATE_ANNOTATIONS",
        value_delimiter = ',',
        default_value = TLS_ACME_ANNOTATION
    )]
    pub auto_certificate_annotations: Vec<String>,

    /// Number of concurrent reconcile workers
    #[arg(
        long,
        env = "CERTSHIM_WORKERS",
        default_value_t = DEFAULT_WORKERS,
        value_parser = clap::value_parser!(usize)
    )]
    pub workers: usize,

    /// Requeue interval after losing an ownership conflict
    #[arg(
        long,
        env = "CERTSHIM_CONFLICT_REQUEUE",
        default_value_t = GoDuration(Duration::from_secs(DEFAULT_CONFLICT_REQUEUE_SECS)),
        value_parser = parse_interval
    )]
    pub conflict_requeue: GoDuration,

    /// Requeue interval after invalid annotations or TLS blocks
    #[arg(
        long,
        env = "CERTSHIM_INVALID_REQUEUE",
        default_value_t = GoDuration(Duration::from_secs(DEFAULT_INVALID_REQUEUE_SECS)),
        value_parser = parse_interval
    )]
    pub invalid_requeue: GoDuration,

    /// First retry delay after a transient failure
    #[arg(
        long,
        env = "CERTSHIM_BACKOFF_BASE",
        default_value_t = GoDuration(Duration::from_millis(DEFAULT_BACKOFF_BASE_MILLIS)),
        value_parser = parse_interval
    )]
    pub backoff_base: GoDuration,

    /// Upper bound on retry delays after transient failures
    #[arg(
        long,
        env = "CERTSHIM_BACKOFF_MAX",
        default_value_t = GoDuration(Duration::from_secs(DEFAULT_BACKOFF_MAX_SECS)),
        value_parser = parse_interval
    )]
    pub backoff_max: GoDuration,

    /// Re-fetch and retry budget for patches rejected with a stale resource version
    #[arg(long, env = "CERTSHIM_MAX_UPDATE_RETRIES", default_value_t = DEFAULT_MAX_UPDATE_RETRIES)]
    pub max_update_retries: u32,

    /// Watch a single namespace instead of the whole cluster
    #[arg(long, env = "CERTSHIM_NAMESPACE")]
    pub namespace: Option<String>,

    /// Watch gateway.networking.k8s.io Gateways in addition to Ingresses
    #[arg(
        long,
        env = "CERTSHIM_ENABLE_GATEWAY_API",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub enable_gateway_api: bool,

    /// Bind address of the Prometheus `/metrics` endpoint
    #[arg(long, env = "CERTSHIM_METRICS_ADDR", default_value = DEFAULT_METRICS_ADDR)]
    pub metrics_addr: SocketAddr,
}

impl ShimConfig {
    /// The default issuer, if a name is configured.
    #[must_use]
    pub fn default_issuer(&self) -> Option<IssuerRef> {
        let name = self.default_issuer_name.as_deref()?.trim();
        if name.is_empty() {
            return None;
        }
        Some(IssuerRef {
            name: name.to_string(),
            kind: Some(self.default_issuer_kind.clone()),
            group: Some(self.default_issuer_group.clone()),
        })
    }

    #[must_use]
    pub fn builder_config(&self) -> BuilderConfig {
        BuilderConfig {
            default_issuer: self.default_issuer(),
            auto_certificate_annotations: self
                .auto_certificate_annotations
                .iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect(),
        }
    }

    #[must_use]
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            builder: self.builder_config(),
            conflict_requeue: self.conflict_requeue.as_duration(),
            invalid_requeue: self.invalid_requeue.as_duration(),
            max_update_retries: self.max_update_retries,
        }
    }

    #[must_use]
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.backoff_base.as_duration(), self.backoff_max.as_duration())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
