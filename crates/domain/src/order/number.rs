//! Order number generation.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generates a human-facing order number such as `ORD-20260118-3F9A1C2B`.
///
/// The date prefix keeps numbers roughly sortable; the random suffix makes
/// collisions negligible. The store still enforces uniqueness.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "ORD-{}-{}",
        now.format("%Y%m%d"),
        suffix[..8].to_ascii_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format() {
        let now = Utc.with_ymd_and_hms(2026, 1, 18, 12, 0, 0).unwrap();
        let number = generate_order_number(now);
        assert!(number.starts_with("ORD-20260118-"));
        assert_eq!(number.len(), "ORD-20260118-".len() + 8);
    }

    #[test]
    fn test_numbers_differ() {
        let now = Utc::now();
        assert_ne!(generate_order_number(now), generate_order_number(now));
    }
}
