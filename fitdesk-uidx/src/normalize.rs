//! Username canonicalization
//!
//! Canonical usernames are lower-case and use only `[a-z0-9_.-]`.

/// Characters allowed in a canonical username
fn is_allowed(c: char) -> bool {
    matches!(c, 'a'..='z' | '0'..='9' | '_' | '.' | '-')
}

/// Canonical form of a raw username
///
/// Lower-cases, drops every character outside `[a-z0-9_.-]`, then trims.
/// Total and idempotent: `normalize(&normalize(x)) == normalize(x)`.
pub fn normalize(raw: &str) -> String {
    let stripped: String = raw.to_lowercase().chars().filter(|&c| is_allowed(c)).collect();
    stripped.trim().to_string()
}

/// True when `raw` is non-empty and already canonical
pub fn is_canonical(raw: &str) -> bool {
    !raw.is_empty() && raw.chars().all(is_allowed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases_and_strips() {
        assert_eq!(normalize("Bob Smith"), "bobsmith");
        assert_eq!(normalize("bob_smith"), "bob_smith");
        assert_eq!(normalize("  Coach.Kim-99 "), "coach.kim-99");
        assert_eq!(normalize("J@ne!"), "jne");
    }

    #[test]
    fn test_total_on_edge_inputs() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
        assert_eq!(normalize("!!!"), "");
        assert_eq!(normalize("ÉMILIE"), "milie");
    }

    #[test]
    fn test_idempotent_for_all_printable_ascii() {
        let printable: String = (0x20u8..=0x7e).map(char::from).collect();
        let once = normalize(&printable);
        assert_eq!(
            once,
            "-.0123456789abcdefghijklmnopqrstuvwxyz_abcdefghijklmnopqrstuvwxyz"
        );
        assert_eq!(normalize(&once), once);

        for window in printable.as_bytes().windows(5) {
            let s = std::str::from_utf8(window).unwrap();
            let n = normalize(s);
            assert_eq!(normalize(&n), n, "not idempotent for {:?}", s);
            assert!(n.is_empty() || is_canonical(&n));
        }
    }

    #[test]
    fn test_is_canonical() {
        assert!(is_canonical("bob_smith"));
        assert!(is_canonical("a.b-c"));
        assert!(!is_canonical("Bob"));
        assert!(!is_canonical("bob "));
        assert!(!is_canonical(""));
    }

    #[test]
    fn test_canonical_iff_fixed_point() {
        for raw in ["bob", "Bob", "bob smith", "x_1", "", "-", "ÀB"] {
            let expected = !raw.is_empty() && normalize(raw) == raw;
            assert_eq!(is_canonical(raw), expected, "{:?}", raw);
        }
    }
}
