use crate::error::Error;

/// Validates a key against `[a-z0-9_-]{1,64}`.
///
/// Returns the exact error message the spec requires so callers can match on
/// it: `keys must match regex [a-z0-9_-]{1,64}: "<key>"`.
pub fn validate(key: &str) -> Result<(), Error> {
    let ok = !key.is_empty()
        && key.len() <= 64
        && key
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-');

    if ok {
        Ok(())
    } else {
        Err(Error::IllegalArgument(format!(
            "keys must match regex [a-z0-9_-]{{1,64}}: \"{}\"",
            key
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_keys() {
        assert!(validate("a").is_ok());
        assert!(validate(&"z".repeat(64)).is_ok());
        assert!(validate("key_with-dash_and_123").is_ok());
    }

    #[test]
    fn rejects_empty_and_oversize() {
        assert!(validate("").is_err());
        assert!(validate(&"a".repeat(65)).is_err());
    }

    #[test]
    fn rejects_disallowed_characters() {
        for bad in ["has space", "has\rcr", "has\nlf", "UPPER", "slash/key", "caf\u{e9}"] {
            assert!(validate(bad).is_err(), "expected {:?} to be rejected", bad);
        }
    }

    #[test]
    fn error_message_matches_spec() {
        let err = validate("BAD KEY").unwrap_err();
        assert_eq!(
            err.to_string(),
            "keys must match regex [a-z0-9_-]{1,64}: \"BAD KEY\""
        );
    }
}
