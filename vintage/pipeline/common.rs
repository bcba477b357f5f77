use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;

use crate::telemetry::PipelineTelemetry;

/// Writes `data` as pretty-printed JSON, creating parent directories.
pub fn save_json<T: Serialize>(path: &Path, data: &T, telemetry: &PipelineTelemetry) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(data)?;
    fs::write(path, body).with_context(|| format!("writing {}", path.display()))?;
    telemetry.info("json file saved", json!({ "path": path }));
    Ok(())
}

/// Human-readable file size in kilobytes, e.g. `"12.5 KB"`.
pub fn get_size(path: &Path) -> Result<String> {
    let bytes = fs::metadata(path)
        .with_context(|| format!("reading metadata for {}", path.display()))?
        .len();
    #[allow(clippy::cast_precision_loss)]
    let kb = bytes as f64 / 1024.0;
    Ok(format!("{kb:.1} KB"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tempfile::tempdir;

    #[test]
    fn saves_pretty_json_under_new_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("eval/metrics.json");
        save_json(&path, &json!({ "rmse": 0.5 }), &PipelineTelemetry::disabled()).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains('\n'));
        let loaded: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(loaded["rmse"], 0.5);
    }

    #[test]
    fn sizes_are_reported_in_kilobytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        fs::write(&path, vec![0u8; 2048]).unwrap();
        assert_eq!(get_size(&path).unwrap(), "2.0 KB");
        assert!(get_size(&dir.path().join("absent")).is_err());
    }
}
