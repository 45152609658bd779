//! Optional TOML solver configuration.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SolverConfig {
    #[serde(default = "default_step_limit")]
    pub step_limit: u64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_var_dir")]
    pub var_dir: PathBuf,
}

fn default_step_limit() -> u64 {
    100_000
}

fn default_seed() -> u64 {
    0
}

fn default_var_dir() -> PathBuf {
    PathBuf::from("var")
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            step_limit: default_step_limit(),
            seed: default_seed(),
            var_dir: default_var_dir(),
        }
    }
}

impl SolverConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: SolverConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = SolverConfig::load_from_file("does/not/exist.toml").unwrap();
        assert_eq!(config.step_limit, default_step_limit());
        assert_eq!(config.var_dir, PathBuf::from("var"));
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solver.toml");
        fs::write(&path, "step_limit = 500\n").unwrap();
        let config = SolverConfig::load_from_file(&path).unwrap();
        assert_eq!(config.step_limit, 500);
        assert_eq!(config.seed, 0);
    }
}
