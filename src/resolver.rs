// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Conflict and uniqueness resolution for secret names.
//!
//! Every watched resource claims the secrets its TLS blocks name. When more
//! than one resource in a namespace claims the same secret, exactly one of
//! them is canonical: the oldest by creation timestamp, then the smallest
//! name, then the smallest kind. Resources without a creation timestamp sort
//! after every resource that has one.
//!
//! The order is total, so any worker computing the winner of a secret from
//! the same set of claims reaches the same answer regardless of input order.

use crate::builder::{requested_secrets, BuilderConfig};
use crate::errors::ShimError;
use crate::resource::{ResourceKey, WatchedResource};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Sort key deciding which claimant of a secret is canonical.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerOrder {
    pub creation_timestamp: Option<DateTime<Utc>>,
    pub key: ResourceKey,
}

impl Ord for OwnerOrder {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_age = match (&self.creation_timestamp, &other.creation_timestamp) {
            (Some(a), Some(b)) => a.cmp(b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_age
            .then_with(|| self.key.name.cmp(&other.key.name))
            .then_with(|| self.key.kind.cmp(&other.key.kind))
            .then_with(|| self.key.namespace.cmp(&other.key.namespace))
    }
}

impl PartialOrd for OwnerOrder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One resource's claim on one secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Claim {
    pub secret_name: String,
    pub owner: OwnerOrder,
}

impl Claim {
    #[must_use]
    pub fn new(resource: &WatchedResource, secret_name: &str) -> Self {
        Self {
            secret_name: secret_name.to_string(),
            owner: OwnerOrder {
                creation_timestamp: resource.creation_timestamp,
                key: resource.key.clone(),
            },
        }
    }

    /// Every claim a resource makes.
    #[must_use]
    pub fn for_resource(resource: &WatchedResource, config: &BuilderConfig) -> Vec<Self> {
        requested_secrets(resource, config)
            .iter()
            .map(|secret| Self::new(resource, secret))
            .collect()
    }

    fn namespace(&self) -> &str {
        &self.owner.key.namespace
    }
}

/// Canonical owner of every claimed secret.
#[derive(Clone, Debug, Default)]
pub struct Resolution {
    winners: HashMap<(String, String), OwnerOrder>,
}

impl Resolution {
    /// Canonical owner of `secret_name` in `namespace`, if anything claims it.
    #[must_use]
    pub fn winner(&self, namespace: &str, secret_name: &str) -> Option<&ResourceKey> {
        self.winners
            .get(&(namespace.to_string(), secret_name.to_string()))
            .map(|owner| &owner.key)
    }

    /// Check whether `claim` is the canonical claim on its secret.
    ///
    /// A claim that was never resolved is accepted: nothing competes with it.
    ///
    /// # Errors
    ///
    /// Returns [`ShimError::Conflict`] naming the canonical owner when another
    /// resource wins the secret.
    pub fn check(&self, claim: &Claim) -> Result<(), ShimError> {
        match self.winner(claim.namespace(), &claim.secret_name) {
            Some(owner) if *owner != claim.owner.key => Err(ShimError::Conflict {
                namespace: claim.namespace().to_string(),
                secret_name: claim.secret_name.clone(),
                owner: owner.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Number of distinct secrets claimed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.winners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.winners.is_empty()
    }
}

/// Group claims by `(namespace, secret)` and pick the canonical owner of each group.
#[must_use]
pub fn resolve<I>(claims: I) -> Resolution
where
    I: IntoIterator<Item = Claim>,
{
    let mut winners: HashMap<(String, String), OwnerOrder> = HashMap::new();
    for claim in claims {
        let group = (claim.namespace().to_string(), claim.secret_name.clone());
        match winners.get_mut(&group) {
            Some(current) if claim.owner < *current => *current = claim.owner,
            Some(_) => {}
            None => {
                winners.insert(group, claim.owner);
            }
        }
    }
    Resolution { winners }
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod resolver_tests;
