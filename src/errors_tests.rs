// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for error classification.

#[cfg(test)]
mod tests {
    use crate::errors::*;

    /// Built from the wire format so the boxed `Status` gets every field.
    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(
            serde_json::from_value(serde_json::json!({
                "status": "Failure",
                "message": format!("{reason} message"),
                "reason": reason,
                "code": code,
            }))
            .unwrap(),
        )
    }

    #[test]
    fn test_invalid_annotation_display() {
        let error = ShimError::invalid_annotation(
            "cert-manager.io/duration",
            "forever",
            "unknown unit",
        );

        assert_eq!(
            error.to_string(),
            "invalid annotation cert-manager.io/duration=\"forever\": unknown unit"
        );
        assert!(error.is_invalid_annotation());
        assert!(error.is_invalid_input());
        assert!(!error.is_transient());
    }

    #[test]
    fn test_conflict_display_names_owner() {
        let error = ShimError::Conflict {
            namespace: "default".to_string(),
            secret_name: "example-tls".to_string(),
            owner: "Ingress/default/web".to_string(),
        };

        assert_eq!(
            error.to_string(),
            "secret default/example-tls is claimed by canonical owner Ingress/default/web"
        );
        assert_eq!(error.kind(), ErrorKind::Conflict);
        assert!(!error.is_invalid_annotation());
    }

    #[test]
    fn test_kinds() {
        assert_eq!(ShimError::NilTarget.kind(), ErrorKind::NilTarget);
        assert_eq!(
            ShimError::InvalidTls {
                index: 0,
                reason: "no hosts".to_string()
            }
            .kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            ShimError::NotOwned {
                namespace: "default".to_string(),
                name: "example-tls".to_string()
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            ShimError::UpdateConflict {
                namespace: "default".to_string(),
                name: "example-tls".to_string(),
                attempts: 5
            }
            .kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            ShimError::from(StoreError::Transient("boom".to_string())).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            ShimError::from(StoreError::Invalid(
                "Certificate default/x".to_string(),
                "renewBefore must be shorter than duration".to_string()
            ))
            .kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_store_error_from_kube() {
        let object = "Certificate default/example-tls";

        assert_eq!(
            StoreError::from_kube(object, api_error(404, "NotFound")),
            StoreError::NotFound(object.to_string())
        );
        assert_eq!(
            StoreError::from_kube(object, api_error(409, "AlreadyExists")),
            StoreError::AlreadyExists(object.to_string())
        );
        assert!(StoreError::from_kube(object, api_error(409, "Conflict")).is_conflict());
        assert!(matches!(
            StoreError::from_kube(object, api_error(422, "Invalid")),
            StoreError::Invalid(..)
        ));
        assert!(matches!(
            StoreError::from_kube(object, api_error(503, "ServiceUnavailable")),
            StoreError::Transient(_)
        ));
        assert!(matches!(
            StoreError::from_kube(object, api_error(429, "TooManyRequests")),
            StoreError::Transient(_)
        ));
    }

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(ErrorKind::InvalidInput.as_str(), "invalid_input");
        assert_eq!(ErrorKind::Transient.as_str(), "transient");
    }
}
