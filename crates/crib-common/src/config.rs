//! User-facing configuration model.
//!
//! `crib run` reads a `crib.yaml` (or `crib.yml`) from the working
//! directory and forwards its resource limits to the daemon.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CribError, Result};

/// Root configuration parsed from `crib.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CribConfig {
    /// Image name the container is created from.
    pub image_name: String,
    /// Resource limit settings.
    pub settings: Settings,
}

/// Resource limits requested for the container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Memory limit string, e.g. `"100m"`.
    pub memory_limit: String,
    /// CPU weight percentage as an integer-valued string, e.g. `"50"`.
    pub cpu_limit: String,
}

impl CribConfig {
    /// Loads the configuration from the first existing candidate file
    /// in `dir`, trying `crib.yaml` then `crib.yml`.
    ///
    /// # Errors
    ///
    /// Returns [`CribError::NotFound`] when neither file exists and
    /// [`CribError::Yaml`] when the content does not parse.
    pub fn load_from(dir: &Path) -> Result<Self> {
        for name in ["crib.yaml", "crib.yml"] {
            let path = dir.join(name);
            if let Ok(content) = std::fs::read_to_string(&path) {
                return Ok(serde_yaml::from_str(&content)?);
            }
        }
        Err(CribError::NotFound {
            kind: "config file",
            id: dir.join("crib.yaml").display().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("crib.yaml"),
            "image_name: alpine\nsettings:\n  memory_limit: \"100m\"\n  cpu_limit: \"50\"\n",
        )
        .unwrap();
        let cfg = CribConfig::load_from(dir.path()).unwrap();
        assert_eq!(cfg.image_name, "alpine");
        assert_eq!(cfg.settings.memory_limit, "100m");
        assert_eq!(cfg.settings.cpu_limit, "50");
    }

    #[test]
    fn falls_back_to_yml_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("crib.yml"),
            "image_name: busybox\nsettings:\n  memory_limit: \"1g\"\n  cpu_limit: \"10\"\n",
        )
        .unwrap();
        let cfg = CribConfig::load_from(dir.path()).unwrap();
        assert_eq!(cfg.image_name, "busybox");
    }

    #[test]
    fn missing_config_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = CribConfig::load_from(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            CribError::NotFound {
                kind: "config file",
                ..
            }
        ));
    }
}
