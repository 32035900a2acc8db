use anyhow::{anyhow, Context, Result};
use std::path::Path;

/// Load a newline-delimited label list.
pub fn load_labels(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read label list {}", path.display()))?;
    let labels = parse_labels(&raw);
    if labels.is_empty() {
        return Err(anyhow!("label list {} is empty", path.display()));
    }
    Ok(labels)
}

/// Parse labels, one per line. Whitespace is trimmed and blank lines skipped.
pub fn parse_labels(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
