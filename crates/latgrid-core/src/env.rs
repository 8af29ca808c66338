//! Environment variable helpers
//!
//! Typed parsing with defaults, used by the logging setup and the
//! optional `LG_REDUCTION` policy override.

use std::str::FromStr;

/// Parse `key` as `T`, falling back to `default` when unset or malformed.
///
/// ```ignore
/// let depth: usize = env_get("LG_QUEUE_DEPTH", 1024);
/// ```
#[inline]
pub fn env_get<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Boolean variant: "1", "true", "yes", "on" (case-insensitive) are true;
/// any other set value is false; unset returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// `Some(T)` when set and parseable, `None` otherwise.
#[inline]
pub fn env_get_opt<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_returns_default() {
        let v: usize = env_get("__LG_TEST_UNSET__", 17);
        assert_eq!(v, 17);
        assert!(env_get_bool("__LG_TEST_UNSET__", true));
        assert_eq!(env_get_opt::<u32>("__LG_TEST_UNSET__"), None);
    }

    #[test]
    fn test_parse_and_bool_variants() {
        std::env::set_var("__LG_TEST_NUM__", "123");
        let v: u64 = env_get("__LG_TEST_NUM__", 0);
        assert_eq!(v, 123);
        std::env::remove_var("__LG_TEST_NUM__");

        std::env::set_var("__LG_TEST_BOOL__", "on");
        assert!(env_get_bool("__LG_TEST_BOOL__", false));
        std::env::set_var("__LG_TEST_BOOL__", "garbage");
        assert!(!env_get_bool("__LG_TEST_BOOL__", true));
        std::env::remove_var("__LG_TEST_BOOL__");
    }

    #[test]
    fn test_malformed_returns_default() {
        std::env::set_var("__LG_TEST_BAD__", "not-a-number");
        let v: usize = env_get("__LG_TEST_BAD__", 9);
        assert_eq!(v, 9);
        std::env::remove_var("__LG_TEST_BAD__");
    }
}
