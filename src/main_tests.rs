// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `main.rs` - signal handling and the metrics endpoint

#[cfg(test)]
mod tests {
    use super::super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    /// Test that SIGTERM signal handler can be created on Unix platforms
    #[tokio::test]
    #[cfg(unix)]
    async fn test_sigterm_signal_handler_creation() {
        use tokio::signal::unix::{signal, SignalKind};

        let result = signal(SignalKind::terminate());
        assert!(
            result.is_ok(),
            "Should be able to create SIGTERM signal handler"
        );
    }

    #[tokio::test]
    async fn test_shutdown_signal_waits_for_a_signal() {
        let result = timeout(Duration::from_millis(100), shutdown_signal()).await;

        assert!(result.is_err(), "shutdown should not complete without a signal");
    }

    #[tokio::test]
    async fn test_metrics_handler_serves_text() {
        metrics::record_certificate_created("MainTest");

        let response = metrics_handler().await.into_response();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
