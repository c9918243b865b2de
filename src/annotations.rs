// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Translation of resource annotations into certificate spec fields.
//!
//! Each recognized annotation is described by a row in a fixed table: the
//! annotation key and a parser that validates the raw value and returns the
//! assignment to perform. Rows are evaluated in table order and the first
//! invalid value short-circuits, so the reported error is deterministic.
//!
//! Translation is a merge: fields whose annotation is absent keep their
//! current value. It is also all-or-nothing: assignments run only after every
//! present annotation validated, so a failed translation leaves the spec
//! untouched.
//!
//! # Example
//!
//! ```rust
//! use certshim::annotations::translate_annotations;
//! use certshim::crd::{CertificateSpec, KeyUsage};
//! use std::collections::BTreeMap;
//!
//! let annotations = BTreeMap::from([
//!     ("cert-manager.io/common-name".to_string(), "www.example.com".to_string()),
//!     ("cert-manager.io/usages".to_string(), "server auth,signing".to_string()),
//! ]);
//!
//! let mut spec = CertificateSpec::default();
//! translate_annotations(Some(&mut spec), Some(&annotations)).unwrap();
//!
//! assert_eq!(spec.common_name.as_deref(), Some("www.example.com"));
//! assert_eq!(spec.usages, Some(vec![KeyUsage::ServerAuth, KeyUsage::Signing]));
//! ```

use crate::constants::{
    COMMON_NAME_ANNOTATION, DURATION_ANNOTATION, PRIVATE_KEY_ALGORITHM_ANNOTATION,
    PRIVATE_KEY_ENCODING_ANNOTATION, PRIVATE_KEY_ROTATION_POLICY_ANNOTATION,
    PRIVATE_KEY_SIZE_ANNOTATION, RENEW_BEFORE_ANNOTATION, REVISION_HISTORY_LIMIT_ANNOTATION,
    USAGES_ANNOTATION,
};
use crate::crd::{
    CertificatePrivateKey, CertificateSpec, KeyUsage, PrivateKeyAlgorithm, PrivateKeyEncoding,
    RotationPolicy,
};
use crate::duration::{parse_go_duration, GoDuration};
use crate::errors::ShimError;
use std::collections::BTreeMap;
use std::str::FromStr;

/// A validated value waiting to be written into the spec.
type Assignment = Box<dyn FnOnce(&mut CertificateSpec) + Send>;

/// Validates a raw annotation value and returns the assignment it implies.
type Parser = fn(&str) -> Result<Assignment, String>;

struct AnnotationRule {
    key: &'static str,
    parse: Parser,
}

/// Recognized annotations, in evaluation order.
const RULES: &[AnnotationRule] = &[
    AnnotationRule {
        key: COMMON_NAME_ANNOTATION,
        parse: parse_common_name,
    },
    AnnotationRule {
        key: DURATION_ANNOTATION,
        parse: parse_duration,
    },
    AnnotationRule {
        key: RENEW_BEFORE_ANNOTATION,
        parse: parse_renew_before,
    },
    AnnotationRule {
        key: USAGES_ANNOTATION,
        parse: parse_usages,
    },
    AnnotationRule {
        key: REVISION_HISTORY_LIMIT_ANNOTATION,
        parse: parse_revision_history_limit,
    },
    AnnotationRule {
        key: PRIVATE_KEY_ALGORITHM_ANNOTATION,
        parse: parse_private_key_algorithm,
    },
    AnnotationRule {
        key: PRIVATE_KEY_ENCODING_ANNOTATION,
        parse: parse_private_key_encoding,
    },
    AnnotationRule {
        key: PRIVATE_KEY_SIZE_ANNOTATION,
        parse: parse_private_key_size,
    },
    AnnotationRule {
        key: PRIVATE_KEY_ROTATION_POLICY_ANNOTATION,
        parse: parse_private_key_rotation_policy,
    },
];

/// Annotation keys understood by [`translate_annotations`], in evaluation order.
pub fn recognized_annotations() -> impl Iterator<Item = &'static str> {
    RULES.iter().map(|rule| rule.key)
}

/// Merge the certificate-related annotations of a resource into `spec`.
///
/// # Arguments
///
/// * `spec` - The spec to mutate; `None` is a caller error
/// * `annotations` - The resource's annotations; `None` and empty are no-ops
///
/// # Errors
///
/// - [`ShimError::NilTarget`] if `spec` is `None`
/// - [`ShimError::InvalidAnnotation`] for the first recognized annotation
///   (in evaluation order) whose value is invalid; `spec` is left unchanged
pub fn translate_annotations(
    spec: Option<&mut CertificateSpec>,
    annotations: Option<&BTreeMap<String, String>>,
) -> Result<(), ShimError> {
    let spec = spec.ok_or(ShimError::NilTarget)?;

    let Some(annotations) = annotations else {
        return Ok(());
    };

    let mut assignments = Vec::new();
    for rule in RULES {
        if let Some(value) = annotations.get(rule.key) {
            let assignment = (rule.parse)(value)
                .map_err(|reason| ShimError::invalid_annotation(rule.key, value, reason))?;
            assignments.push(assignment);
        }
    }

    for assign in assignments {
        assign(&mut *spec);
    }

    Ok(())
}

fn parse_common_name(value: &str) -> Result<Assignment, String> {
    let common_name = value.to_string();
    Ok(Box::new(move |spec: &mut CertificateSpec| spec.common_name = Some(common_name)))
}

fn parse_duration(value: &str) -> Result<Assignment, String> {
    let duration = parse_span(value)?;
    Ok(Box::new(move |spec: &mut CertificateSpec| spec.duration = Some(duration)))
}

fn parse_renew_before(value: &str) -> Result<Assignment, String> {
    let renew_before = parse_span(value)?;
    Ok(Box::new(move |spec: &mut CertificateSpec| spec.renew_before = Some(renew_before)))
}

fn parse_span(value: &str) -> Result<GoDuration, String> {
    parse_go_duration(value)
        .map(GoDuration)
        .map_err(|e| e.to_string())
}

fn parse_usages(value: &str) -> Result<Assignment, String> {
    let usages = value
        .split(',')
        .map(|token| {
            let token = token.trim();
            if token.is_empty() {
                return Err("empty key usage in list".to_string());
            }
            KeyUsage::from_str(token).map_err(|_| format!("invalid key usage name {token:?}"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Box::new(move |spec: &mut CertificateSpec| spec.usages = Some(usages)))
}

fn parse_revision_history_limit(value: &str) -> Result<Assignment, String> {
    let limit = parse_positive(value)?;
    Ok(Box::new(move |spec: &mut CertificateSpec| spec.revision_history_limit = Some(limit)))
}

fn parse_private_key_algorithm(value: &str) -> Result<Assignment, String> {
    let algorithm = PrivateKeyAlgorithm::from_str(value).map_err(|e| e.to_string())?;
    Ok(Box::new(move |spec: &mut CertificateSpec| {
        private_key(spec).algorithm = Some(algorithm);
    }))
}

fn parse_private_key_encoding(value: &str) -> Result<Assignment, String> {
    let encoding = PrivateKeyEncoding::from_str(value).map_err(|e| e.to_string())?;
    Ok(Box::new(move |spec: &mut CertificateSpec| {
        private_key(spec).encoding = Some(encoding);
    }))
}

fn parse_private_key_size(value: &str) -> Result<Assignment, String> {
    let size = parse_positive(value)?;
    Ok(Box::new(move |spec: &mut CertificateSpec| {
        private_key(spec).size = Some(size);
    }))
}

fn parse_private_key_rotation_policy(value: &str) -> Result<Assignment, String> {
    let policy = RotationPolicy::from_str(value).map_err(|e| e.to_string())?;
    Ok(Box::new(move |spec: &mut CertificateSpec| {
        private_key(spec).rotation_policy = Some(policy);
    }))
}

fn parse_positive(value: &str) -> Result<i32, String> {
    let parsed: i32 = value
        .parse()
        .map_err(|e| format!("not an integer: {e}"))?;
    if parsed < 1 {
        return Err(format!("must be a positive integer, got {parsed}"));
    }
    Ok(parsed)
}

fn private_key(spec: &mut CertificateSpec) -> &mut CertificatePrivateKey {
    spec.private_key.get_or_insert_with(CertificatePrivateKey::default)
}

#[cfg(test)]
#[path = "annotations_tests.rs"]
mod annotations_tests;
