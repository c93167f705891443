//! Id allocation and the lexicographic-id encoding trick.
//!
//! The store allocates ids from a monotonic counter (`ids`, see `spec.md`
//! §6). Ids are encoded as 12-digit zero-padded decimal strings derived
//! from `1_000_000_000_000 + counter`, then the leading digit is stripped.
//! This preserves lexicographic order aligned with numeric order for the
//! first trillion ids, which matters when a store's default ordering
//! primitive is string-based (e.g. `SORT ... ALPHA` or a `ZSET` member
//! comparison tiebreak) rather than numeric.

const ID_BASE: u64 = 1_000_000_000_000;

/// Encode a numeric id as its 12-digit zero-padded string form.
///
/// # Panics
///
/// Panics if `id >= ID_BASE`, i.e. beyond the first trillion ids, per the
/// documented bound on this encoding.
pub fn encode(id: u64) -> String {
    assert!(
        id < ID_BASE,
        "id {id} exceeds the 12-digit zero-padded encoding's range"
    );
    let padded = format!("{:013}", ID_BASE + id);
    // Strip the leading '1' that ID_BASE contributes.
    padded[1..].to_string()
}

/// Decode a 12-digit zero-padded string back to a numeric id.
pub fn decode(encoded: &str) -> Option<u64> {
    let with_base: u64 = format!("1{encoded}").parse().ok()?;
    with_base.checked_sub(ID_BASE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        for id in [0u64, 1, 42, 999_999, 123_456_789_012] {
            let encoded = encode(id);
            assert_eq!(encoded.len(), 12);
            assert_eq!(decode(&encoded), Some(id));
        }
    }

    #[test]
    fn lexicographic_order_matches_numeric_order() {
        let ids = [1u64, 2, 9, 10, 11, 99, 100, 999, 1000, 999_999];
        let mut encoded: Vec<String> = ids.iter().map(|&id| encode(id)).collect();
        let mut sorted = encoded.clone();
        sorted.sort();
        encoded.sort(); // no-op, just making the comparison explicit below
        assert_eq!(encoded, sorted);

        let mut sorted_ids = ids.to_vec();
        sorted_ids.sort_unstable();
        let expected: Vec<String> = sorted_ids.iter().map(|&id| encode(id)).collect();
        assert_eq!(sorted, expected);
    }
}
