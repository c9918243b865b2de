// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # certshim
//!
//! Keeps cert-manager `Certificate` objects in sync with annotated `Ingress`
//! and Gateway API `Gateway` resources.
//!
//! A resource opts in with an issuer annotation (`cert-manager.io/issuer` or
//! `cert-manager.io/cluster-issuer`), or with an auto-certificate annotation
//! when a default issuer is configured. Every TLS block of the resource then
//! yields one `Certificate` named after its secret, owned by the resource.
//!
//! ## Modules
//!
//! - [`annotations`] - Certificate annotations applied to a `Certificate` spec
//! - [`builder`] - Desired certificates of a resource
//! - [`resolver`] - Canonical owner of a secret claimed by several resources
//! - [`reconciler`] - Create, update, adopt and delete certificates
//! - [`queue`] - Deduplicating, rate-limited work queue
//! - [`controller`] - Watches and the worker pool
//! - [`store`] - Object store seams, Kubernetes and in-memory
//! - [`events`] - Kubernetes Events on watched resources
//! - [`crd`] - `Certificate` and `Gateway` types
//! - [`metrics`] - Prometheus metrics

pub mod annotations;
pub mod builder;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod duration;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod queue;
pub mod reconciler;
pub mod resolver;
pub mod resource;
pub mod store;
