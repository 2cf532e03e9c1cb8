//! On-disk result artifacts

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

/// File-name stem for a rendered request path:
/// `/airports/lemd/flights/arrivals` → `airports_lemd_flights_arrivals`.
pub fn artifact_slug(path: &str) -> String {
    let slug: String = path
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c.to_ascii_lowercase() } else { '_' })
        .collect();
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        "fetch".to_string()
    } else {
        slug.to_string()
    }
}

/// Write `{resource_key: items}` to `{dir}/{slug}.json` via temp file + rename.
pub async fn write_atomic(
    dir: &Path,
    slug: &str,
    resource_key: &str,
    items: &[Value],
) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;

    let mut document = serde_json::Map::new();
    document.insert(resource_key.to_string(), Value::Array(items.to_vec()));
    let json = serde_json::to_string_pretty(&Value::Object(document))
        .map_err(std::io::Error::other)?;

    let path = dir.join(format!("{slug}.json"));
    let tmp_path = dir.join(format!(".{slug}.tmp.{}", std::process::id()));
    tokio::fs::write(&tmp_path, json.as_bytes()).await?;
    tokio::fs::rename(&tmp_path, &path).await?;

    debug!(path = %path.display(), items = items.len(), "wrote fetch artifact");
    Ok(path)
}
