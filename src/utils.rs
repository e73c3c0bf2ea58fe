use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::Path;

/// Create a directory (and parents) if it does not exist yet
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Current instant in the stored timestamp format
pub fn timestamp() -> String {
    format_instant(Utc::now())
}

/// Stored timestamps are second precision with a `Z` suffix, so string
/// comparison in SQL orders them chronologically.
pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a client-supplied RFC 3339 instant into the stored format
pub fn normalize_instant(value: &str) -> Option<String> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| format_instant(dt.with_timezone(&Utc)))
}
