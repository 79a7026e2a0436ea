//! Mimicked ID mapping
//!
//! Each active custom collection is exposed to clients as a synthetic view
//! whose ID is a negative integer string outside the Library Server's ID
//! space: `-(900000 + db_id)`.

const MIMICKED_ID_BASE: i64 = 900_000;

#[must_use]
pub fn to_mimicked_id(db_id: i64) -> String {
    (-(MIMICKED_ID_BASE + db_id)).to_string()
}

#[must_use]
pub fn from_mimicked_id(mimicked_id: &str) -> Option<i64> {
    let value: i64 = mimicked_id.parse().ok()?;
    if value >= 0 {
        return None;
    }
    let db_id = -value - MIMICKED_ID_BASE;
    (db_id > 0).then_some(db_id)
}

#[must_use]
pub fn is_mimicked_id(item_id: &str) -> bool {
    item_id.len() > 1
        && item_id.starts_with('-')
        && item_id[1..].chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        assert_eq!(to_mimicked_id(7), "-900007");
        assert_eq!(from_mimicked_id("-900007"), Some(7));
        assert_eq!(from_mimicked_id(&to_mimicked_id(123)), Some(123));
    }

    #[test]
    fn test_detection() {
        assert!(is_mimicked_id("-900007"));
        assert!(!is_mimicked_id("900007"));
        assert!(!is_mimicked_id("abc"));
        assert!(!is_mimicked_id("-90a007"));
        assert!(!is_mimicked_id(""));
    }

    #[test]
    fn test_rejects_out_of_range() {
        // Negative IDs below the base are not ours.
        assert_eq!(from_mimicked_id("-1"), None);
        assert_eq!(from_mimicked_id("-900000"), None);
        assert_eq!(from_mimicked_id("0"), None);
    }
}
