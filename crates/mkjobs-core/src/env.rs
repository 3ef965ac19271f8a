//! Environment variable helpers
//!
//! Typed reads with defaults, used by the configuration layer.
//!
//! ```ignore
//! use mkjobs_core::env::{env_get, env_get_bool};
//!
//! let slots: usize = env_get("MKJOBS_JOB_SLOTS", 1);
//! let pin = env_get_bool("MKJOBS_PIN_WORKERS", false);
//! ```

use std::str::FromStr;

/// Read `key` parsed as `T`, or `default` when unset or unparsable
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Read `key` as a boolean
///
/// "1", "true", "yes", "on" (any case) are true, "0", "false", "no", "off"
/// are false; anything else, including unset, gives `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Read `key` parsed as `T` if set and valid
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Read `key` as a string, or `default`
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own variable; the process environment is shared
    // between test threads.

    #[test]
    fn test_unset_gives_default() {
        let v: usize = env_get("__MKJOBS_TEST_UNSET__", 42);
        assert_eq!(v, 42);
        assert!(env_get_bool("__MKJOBS_TEST_UNSET__", true));
        assert_eq!(env_get_opt::<i32>("__MKJOBS_TEST_UNSET__"), None);
        assert_eq!(env_get_str("__MKJOBS_TEST_UNSET__", "sh"), "sh");
    }

    #[test]
    fn test_parse_with_whitespace() {
        std::env::set_var("__MKJOBS_TEST_NUM__", " 12 ");
        let v: usize = env_get("__MKJOBS_TEST_NUM__", 0);
        assert_eq!(v, 12);
        std::env::remove_var("__MKJOBS_TEST_NUM__");
    }

    #[test]
    fn test_bool_variants() {
        let key = "__MKJOBS_TEST_BOOL__";
        for (val, expect) in [("YES", true), ("on", true), ("0", false), ("Off", false)] {
            std::env::set_var(key, val);
            assert_eq!(env_get_bool(key, !expect), expect, "value {}", val);
        }
        std::env::set_var(key, "garbage");
        assert!(env_get_bool(key, true));
        assert!(!env_get_bool(key, false));
        std::env::remove_var(key);
    }

    #[test]
    fn test_invalid_parse_gives_default() {
        std::env::set_var("__MKJOBS_TEST_BAD__", "nope");
        let v: i32 = env_get("__MKJOBS_TEST_BAD__", -5);
        assert_eq!(v, -5);
        std::env::remove_var("__MKJOBS_TEST_BAD__");
    }
}
