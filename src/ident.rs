//! Boundary validation for externally scanned identifiers and the
//! date-sequenced number formats used across the engine.
//!
//! Badge and item barcodes arrive from hardware scanners as opaque strings;
//! they are checked for charset and length only, never for business meaning.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;
use uuid::Uuid;

use crate::error::{EngineError, Result};

static SCAN_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9][A-Z0-9\-]{1,31}$").expect("valid regex"));

/// Validate a scanned badge or item barcode: uppercase alphanumerics and
/// dashes, 2 to 32 characters.
pub fn validate_scan_code(code: &str) -> Result<()> {
    if SCAN_CODE.is_match(code) {
        Ok(())
    } else {
        Err(EngineError::validation(format!(
            "malformed scan code: {code:?}"
        )))
    }
}

/// `WO<YYYYMMDD><seq:04>`
pub fn order_number(now: DateTime<Utc>, seq: i64) -> String {
    format!("WO{}{:04}", now.format("%Y%m%d"), seq)
}

/// `C<YYYYMMDD>M<machine:02><seq:03>`
pub fn cycle_number(now: DateTime<Utc>, machine_id: i64, seq: i64) -> String {
    format!("C{}M{:02}{:03}", now.format("%Y%m%d"), machine_id, seq)
}

/// `SR<YYYYMMDD><seq:04>`
pub fn record_number(now: DateTime<Utc>, seq: i64) -> String {
    format!("SR{}{:04}", now.format("%Y%m%d"), seq)
}

/// Fresh work-order barcode: WO + 8 uppercase hex chars.
pub fn new_barcode() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("WO{}", hex[..8].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn accepts_scanner_shaped_codes() {
        assert!(validate_scan_code("B-1024").is_ok());
        assert!(validate_scan_code("WO20250101").is_ok());
        assert!(validate_scan_code("A1").is_ok());
    }

    #[test]
    fn rejects_malformed_codes() {
        assert!(validate_scan_code("").is_err());
        assert!(validate_scan_code("x").is_err());
        assert!(validate_scan_code("lower case").is_err());
        assert!(validate_scan_code("-LEADING").is_err());
        assert!(validate_scan_code(&"A".repeat(40)).is_err());
    }

    #[test]
    fn number_formats() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 7, 10, 0, 0).unwrap();
        assert_eq!(order_number(ts, 12), "WO202503070012");
        assert_eq!(cycle_number(ts, 3, 5), "C20250307M03005");
        assert_eq!(record_number(ts, 7), "SR202503070007");
    }

    #[test]
    fn barcodes_are_unique_and_shaped() {
        let a = new_barcode();
        let b = new_barcode();
        assert_ne!(a, b);
        assert!(validate_scan_code(&a).is_ok());
        assert_eq!(a.len(), 10);
    }
}
