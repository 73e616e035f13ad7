//! Doublestar-style pattern matching for image allow-lists.
//!
//! Supports `*` (any run of characters except `/`), `**` (any run of
//! characters including `/`) and `?` (any single character except `/`).
//! Used by the image allow-lists and the privileged-image gating.

/// Returns true when `name` matches `pattern`.
pub fn pattern_matches(pattern: &str, name: &str) -> bool {
    matches_at(
        &pattern.chars().collect::<Vec<_>>(),
        &name.chars().collect::<Vec<_>>(),
    )
}

fn matches_at(pattern: &[char], name: &[char]) -> bool {
    match pattern.first() {
        None => name.is_empty(),
        Some('*') => {
            let double = pattern.get(1) == Some(&'*');
            let rest = if double { &pattern[2..] } else { &pattern[1..] };
            // Try every split point, longest tail first is not required;
            // a simple left-to-right scan terminates because `rest` shrinks.
            for i in 0..=name.len() {
                if matches_at(rest, &name[i..]) {
                    return true;
                }
                if i < name.len() && !double && name[i] == '/' {
                    return false;
                }
            }
            false
        }
        Some('?') => match name.first() {
            Some(&c) if c != '/' => matches_at(&pattern[1..], &name[1..]),
            _ => false,
        },
        Some(&p) => match name.first() {
            Some(&c) if c == p => matches_at(&pattern[1..], &name[1..]),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_match() {
        assert!(pattern_matches("alpine:latest", "alpine:latest"));
        assert!(!pattern_matches("alpine:latest", "alpine:3.19"));
    }

    #[test]
    fn test_single_star_within_segment() {
        assert!(pattern_matches("registry.example/*", "registry.example/foo"));
        assert!(pattern_matches("alpine:*", "alpine:latest"));
        assert!(!pattern_matches("registry.example/*", "other/bar"));
    }

    #[test]
    fn test_single_star_does_not_cross_slash() {
        assert!(!pattern_matches(
            "registry.example/*",
            "registry.example/group/image"
        ));
    }

    #[test]
    fn test_double_star_crosses_slash() {
        assert!(pattern_matches(
            "registry.example/**",
            "registry.example/group/image:tag"
        ));
        assert!(pattern_matches("**", "anything/at/all"));
    }

    #[test]
    fn test_question_mark() {
        assert!(pattern_matches("alpine:3.1?", "alpine:3.19"));
        assert!(!pattern_matches("alpine:3.1?", "alpine:3.1"));
        assert!(!pattern_matches("a?b", "a/b"));
    }

    #[test]
    fn test_empty_pattern_matches_only_empty() {
        assert!(pattern_matches("", ""));
        assert!(!pattern_matches("", "x"));
    }
}
