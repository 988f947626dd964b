//! Environment variable interpolation for config files.
//!
//! Supported forms:
//! - `$VAR` or `${VAR}` - value of VAR, error if unset
//! - `${VAR:-default}` - default when VAR is unset or empty
//! - `${VAR-default}` - default only when VAR is unset
//! - `$$` - a literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$
        |
        \$\{
            (?P<braced>[A-Za-z_][A-Za-z0-9_]*)
            (?:(?P<op>:?-)(?P<default>[^}]*))?
        \}
        |
        \$(?P<bare>[A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("Invalid regex pattern")
});

/// Result of environment variable interpolation.
#[derive(Debug)]
pub struct InterpolationResult {
    /// The interpolated text.
    pub text: String,
    /// Every problem found, so all missing variables are reported at once.
    pub errors: Vec<String>,
}

impl InterpolationResult {
    /// Returns true if there were no errors.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Interpolate environment variables in the given text.
pub fn interpolate(input: &str) -> InterpolationResult {
    let mut errors = Vec::new();
    let text = ENV_VAR_PATTERN
        .replace_all(input, |caps: &Captures| resolve(caps, &mut errors))
        .into_owned();

    InterpolationResult { text, errors }
}

fn resolve(caps: &Captures, errors: &mut Vec<String>) -> String {
    let whole = &caps[0];
    if whole == "$$" {
        return "$".to_string();
    }

    let Some(name) = caps.name("braced").or_else(|| caps.name("bare")) else {
        return whole.to_string();
    };
    let name = name.as_str();
    let op = caps.name("op").map(|m| m.as_str());
    let default = caps.name("default").map(|m| m.as_str());

    match (env::var(name), default) {
        (Ok(value), _) if value.contains(['\n', '\r']) => {
            errors.push(format!(
                "environment variable '{name}' contains newlines, which is not allowed"
            ));
            whole.to_string()
        }
        (Ok(value), Some(default)) if value.is_empty() && op == Some(":-") => default.to_string(),
        (Ok(value), _) => value,
        (Err(_), Some(default)) => default.to_string(),
        (Err(_), None) => {
            errors.push(format!("environment variable '{name}' is not set"));
            whole.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_env_vars<F, R>(vars: &[(&str, Option<&str>)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let originals: Vec<_> = vars.iter().map(|(k, _)| (*k, env::var(k).ok())).collect();

        // SAFETY: each test uses its own variable names and restores them afterwards
        for (key, value) in vars {
            match value {
                Some(v) => unsafe { env::set_var(key, v) },
                None => unsafe { env::remove_var(key) },
            }
        }

        let result = f();

        // SAFETY: restoring original environment state
        for (key, original) in originals {
            match original {
                Some(v) => unsafe { env::set_var(key, v) },
                None => unsafe { env::remove_var(key) },
            }
        }

        result
    }

    #[test]
    fn test_bare_and_braced_substitution() {
        with_env_vars(&[("PARCEL_TEST_BUCKET", Some("orders"))], || {
            let result = interpolate("s3://$PARCEL_TEST_BUCKET/in and s3://${PARCEL_TEST_BUCKET}/out");
            assert!(result.is_ok());
            assert_eq!(result.text, "s3://orders/in and s3://orders/out");
        });
    }

    #[test]
    fn test_missing_variables_are_all_reported() {
        with_env_vars(
            &[("PARCEL_TEST_MISSING_A", None), ("PARCEL_TEST_MISSING_B", None)],
            || {
                let result = interpolate("a: $PARCEL_TEST_MISSING_A\nb: ${PARCEL_TEST_MISSING_B}");
                assert_eq!(result.errors.len(), 2);
                assert!(result.errors[0].contains("PARCEL_TEST_MISSING_A"));
                assert!(result.errors[1].contains("not set"));
            },
        );
    }

    #[test]
    fn test_colon_default_applies_to_empty_values() {
        with_env_vars(&[("PARCEL_TEST_EMPTY", Some(""))], || {
            let result = interpolate("${PARCEL_TEST_EMPTY:-fallback}");
            assert!(result.is_ok());
            assert_eq!(result.text, "fallback");
        });
    }

    #[test]
    fn test_dash_default_keeps_empty_values() {
        with_env_vars(&[("PARCEL_TEST_EMPTY_DASH", Some(""))], || {
            let result = interpolate("[${PARCEL_TEST_EMPTY_DASH-fallback}]");
            assert!(result.is_ok());
            assert_eq!(result.text, "[]");
        });
    }

    #[test]
    fn test_default_used_when_unset() {
        with_env_vars(&[("PARCEL_TEST_UNSET", None)], || {
            let result = interpolate("retries: ${PARCEL_TEST_UNSET-4}");
            assert!(result.is_ok());
            assert_eq!(result.text, "retries: 4");
        });
    }

    #[test]
    fn test_newlines_are_rejected() {
        with_env_vars(&[("PARCEL_TEST_NEWLINE", Some("a\nb: c"))], || {
            let result = interpolate("key: $PARCEL_TEST_NEWLINE");
            assert!(!result.is_ok());
            assert!(result.errors[0].contains("newlines"));
        });
    }

    #[test]
    fn test_escape_sequence() {
        let result = interpolate("price: $$100");
        assert!(result.is_ok());
        assert_eq!(result.text, "price: $100");
    }
}
