//! Small shared helpers: epoch clocks, backoff math, filesystem plumbing.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}

/// Current wall-clock time in whole seconds since the Unix epoch.
pub fn now_secs() -> i64 {
    now_ms() / 1000
}

/// Calculate exponential backoff delay in milliseconds for a retry attempt.
///
/// Attempt 0 gets the base delay, each further attempt doubles it (or applies
/// `multiplier`), capped at `max_delay_ms`.
pub fn backoff_delay_ms(attempt: u32, base_delay_ms: u64, multiplier: f64, max_delay_ms: u64) -> u64 {
    let delay = (base_delay_ms as f64 * multiplier.powi(attempt as i32)) as u64;
    delay.min(max_delay_ms)
}

/// Sanitize a string for use as a filename: keep alphanumerics, `-`, `_`, `.`;
/// replace everything else with `_`.
pub fn safe_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Ensure a directory exists, returning its path.
pub fn ensure_dir(path: impl Into<PathBuf>) -> Result<PathBuf> {
    let path = path.into();
    std::fs::create_dir_all(&path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    Ok(path)
}

/// Write a file atomically: write to a `.tmp` sibling, then rename over the
/// target. Readers never observe a half-written file.
pub fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content)
        .with_context(|| format!("Failed to write temp file: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_doubles_per_attempt() {
        assert_eq!(backoff_delay_ms(0, 1000, 2.0, 10000), 1000);
        assert_eq!(backoff_delay_ms(1, 1000, 2.0, 10000), 2000);
        assert_eq!(backoff_delay_ms(2, 1000, 2.0, 10000), 4000);
    }

    #[test]
    fn test_backoff_delay_caps_at_max() {
        assert_eq!(backoff_delay_ms(10, 1000, 2.0, 10000), 10000);
    }

    #[test]
    fn test_safe_filename_replaces_separators() {
        assert_eq!(safe_filename("1101000001:79001@c.us"), "1101000001_79001_c.us");
        assert_eq!(safe_filename("plain-name_1.json"), "plain-name_1.json");
    }

    #[test]
    fn test_atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        atomic_write(&path, "first").unwrap();
        atomic_write(&path, "second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_now_ms_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
        assert!(a > 1_600_000_000_000);
    }
}
