//! YAML config persistence.
//!
//! Every config document is read with [`load_yaml_at`] and written with
//! [`save_yaml_at`], which writes `<path>.tmp` and renames it into place so a
//! crashed write never leaves a truncated file behind.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{io_err, ConfigError};
use crate::types::StrategyConfig;

/// Load a YAML document from `path`.
///
/// Returns `ConfigError::NotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed.
pub fn load_yaml_at<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Save `value` as YAML at `path` atomically, creating parent directories.
pub fn save_yaml_at<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let yaml = serde_yaml::to_string(value)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

/// Load and validate a standalone strategy file.
pub fn load_strategy_at(path: &Path) -> Result<StrategyConfig, ConfigError> {
    let cfg: StrategyConfig = load_yaml_at(path)?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CacheMode, ErrorMode};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = load_strategy_at(&tmp.path().join("strategy.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }), "got: {err}");
    }

    #[test]
    fn roundtrip_save_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("strategy.yaml");
        let cfg = StrategyConfig::default()
            .with_parallelism(3)
            .with_retries(2, Duration::from_millis(250))
            .with_error_mode(ErrorMode::PartialSuccess)
            .with_cache_mode(CacheMode::None);

        save_yaml_at(&path, &cfg).unwrap();
        let loaded = load_strategy_at(&path).unwrap();
        assert_eq!(loaded, cfg);
        assert!(!path.with_extension("yaml.tmp").exists());
    }

    #[test]
    fn corrupt_yaml_reports_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("strategy.yaml");
        std::fs::write(&path, "parallel: [unclosed").unwrap();
        let err = load_strategy_at(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("strategy.yaml"));
    }

    #[test]
    fn invalid_values_fail_validation() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("strategy.yaml");
        std::fs::write(&path, "max_concurrent: 0\n").unwrap();
        let err = load_strategy_at(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
