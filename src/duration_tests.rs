// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for Go duration parsing and formatting

#[cfg(test)]
mod tests {
    use super::super::{format_go_duration, parse_go_duration, GoDuration};
    use std::time::Duration;

    // ========================================================================
    // Parsing
    // ========================================================================

    #[test]
    fn test_parse_hours() {
        assert_eq!(
            parse_go_duration("168h").unwrap(),
            Duration::from_secs(7 * 24 * 3600),
            "168h should be exactly one week"
        );
        assert_eq!(
            parse_go_duration("24h").unwrap(),
            Duration::from_secs(86400)
        );
    }

    #[test]
    fn test_parse_compound() {
        assert_eq!(
            parse_go_duration("1h30m").unwrap(),
            Duration::from_secs(5400)
        );
        assert_eq!(
            parse_go_duration("2160h0m0s").unwrap(),
            Duration::from_secs(2160 * 3600)
        );
        assert_eq!(
            parse_go_duration("1m30s500ms").unwrap(),
            Duration::from_millis(90_500)
        );
    }

    #[test]
    fn test_parse_small_units() {
        assert_eq!(parse_go_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_go_duration("10us").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_go_duration("10µs").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_go_duration("7ns").unwrap(), Duration::from_nanos(7));
    }

    #[test]
    fn test_parse_fractions() {
        assert_eq!(parse_go_duration("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_go_duration(".5s").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_go_duration("1.s").unwrap(), Duration::from_secs(1));
    }

    #[test]
    fn test_parse_zero_and_sign() {
        assert_eq!(parse_go_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_go_duration("+5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_go_duration("-0").unwrap(), Duration::ZERO);
        assert_eq!(parse_go_duration("-0s").unwrap(), Duration::ZERO);
        assert_eq!(parse_go_duration("-0.0h").unwrap(), Duration::ZERO);
        assert!(parse_go_duration("-1ns").is_err());
        assert!(parse_go_duration("-").is_err());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for input in [
            "",
            "an un-parsable duration string",
            "10",
            "10x",
            "h",
            ".h",
            "1hh",
            "-1h",
            "1h 30m",
        ] {
            assert!(
                parse_go_duration(input).is_err(),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_rejects_overflow() {
        assert!(parse_go_duration("3000000h").is_err());
        assert!(parse_go_duration("99999999999999999999999999999999999999999h").is_err());
    }

    // ========================================================================
    // Formatting
    // ========================================================================

    #[test]
    fn test_format_canonical() {
        assert_eq!(format_go_duration(Duration::ZERO), "0s");
        assert_eq!(format_go_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_go_duration(Duration::from_secs(60)), "1m0s");
        assert_eq!(format_go_duration(Duration::from_secs(5400)), "1h30m0s");
        assert_eq!(format_go_duration(Duration::from_secs(86400)), "24h0m0s");
        assert_eq!(format_go_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_go_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_go_duration(Duration::from_micros(10)), "10µs");
        assert_eq!(format_go_duration(Duration::from_nanos(7)), "7ns");
    }

    #[test]
    fn test_format_parses_back() {
        let original = Duration::from_secs(2160 * 3600 + 61);
        let formatted = format_go_duration(original);
        assert_eq!(formatted, "2160h1m1s");
        assert_eq!(parse_go_duration(&formatted).unwrap(), original);
    }

    // ========================================================================
    // Serde
    // ========================================================================

    #[test]
    fn test_go_duration_serde() {
        let value = serde_json::to_value(GoDuration::from_hours(168)).unwrap();
        assert_eq!(value, serde_json::json!("168h0m0s"));

        let parsed: GoDuration = serde_json::from_value(serde_json::json!("24h")).unwrap();
        assert_eq!(parsed, GoDuration::from_hours(24));

        let invalid: Result<GoDuration, _> = serde_json::from_value(serde_json::json!("soon"));
        assert!(invalid.is_err());
    }
}
