//! Backend configuration.
//!
//! Searched for in the xdg config directories as `tpugen/backend_config.json`.
//! A missing or unparsable file falls back to defaults, environment variables
//! are applied on top.

use std::path::PathBuf;

use nanoserde::DeJson;
use tpugen_core::{BackendError, ErrorStatus};

/// Extra directory searched first for the cmodel runtime
pub const LIB_DIR_ENV: &str = "TPUGEN_LIB_DIR";
/// Set to `1` to bind the in-process dummy runtime
pub const DUMMY_ENV: &str = "TPUGEN_DUMMY";

/// Default capacity of one command buffer, in 32 bit words
pub const DEFAULT_CMD_BUFFER_WORDS: usize = 0x100_0000;

/// Configuration of the in-process dummy runtime
#[derive(Debug, Default, Clone, DeJson)]
pub struct DummyConfig {
    #[nserde(default)]
    pub enabled: bool,
}

/// Backend configuration
#[derive(Debug, Default, Clone, DeJson)]
pub struct BackendConfig {
    /// Directories searched for the cmodel runtime, before the system search path
    pub lib_dirs: Option<Vec<String>>,
    /// Overrides the global memory size handed to the simulator
    pub cmodel_gmem_size: Option<u64>,
    /// Profiling dump flag set at init, enabled when absent
    pub profile: Option<bool>,
    /// Capacity of each command buffer, in 32 bit words
    pub cmd_buffer_words: Option<usize>,
    /// Configuration of dummy runtime for testing
    #[nserde(default)]
    pub dummy: DummyConfig,
}

impl BackendConfig {
    /// Reads the config file from xdg config directories and applies
    /// environment overrides.
    pub fn load() -> BackendConfig {
        let mut config = xdg::BaseDirectories::new()
            .map_err(|e| log::debug!("Failed to find config directories for backend_config.json, {e}"))
            .ok()
            .map(|bd| {
                let mut dirs = bd.get_config_dirs();
                dirs.push(bd.get_config_home());
                dirs
            })
            .and_then(|paths| {
                paths.into_iter().find_map(|mut path| {
                    path.push("tpugen/backend_config.json");
                    std::fs::read_to_string(&path)
                        .map_err(|e| log::trace!("Failed to read backend_config.json at {path:?}, {e}"))
                        .ok()
                })
            })
            .and_then(|file| {
                BackendConfig::from_json(&file)
                    .map_err(|e| log::warn!("{e}, using defaults"))
                    .ok()
            })
            .unwrap_or_default();
        config.apply_overrides(std::env::var(LIB_DIR_ENV).ok(), std::env::var(DUMMY_ENV).ok());
        config
    }

    pub fn from_json(json: &str) -> Result<BackendConfig, BackendError> {
        BackendConfig::deserialize_json(json).map_err(|e| {
            BackendError::new(ErrorStatus::Config, format!("failed to parse backend_config.json, {e}"))
        })
    }

    /// Configuration binding the dummy runtime, used for dry runs.
    pub fn dummy() -> BackendConfig {
        BackendConfig { dummy: DummyConfig { enabled: true }, ..Default::default() }
    }

    fn apply_overrides(&mut self, lib_dir: Option<String>, dummy: Option<String>) {
        if let Some(dir) = lib_dir.filter(|dir| !dir.is_empty()) {
            self.lib_dirs.get_or_insert_with(Vec::new).insert(0, dir);
        }
        if let Some(dummy) = dummy {
            self.dummy.enabled = dummy.trim() == "1";
        }
    }

    pub fn profile(&self) -> bool {
        self.profile.unwrap_or(true)
    }

    pub fn cmd_buffer_words(&self) -> usize {
        self.cmd_buffer_words.unwrap_or(DEFAULT_CMD_BUFFER_WORDS)
    }

    /// Candidate paths of `lib_name`, configured directories first and the
    /// bare name, resolved by the system loader, last.
    pub fn lib_candidates(&self, lib_name: &str) -> Vec<PathBuf> {
        self.lib_dirs
            .iter()
            .flatten()
            .map(|dir| PathBuf::from(dir).join(lib_name))
            .chain(std::iter::once(PathBuf::from(lib_name)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let config = BackendConfig::from_json("{}").unwrap();
        assert!(config.lib_dirs.is_none());
        assert!(!config.dummy.enabled);
        assert!(config.profile());
        assert_eq!(config.cmd_buffer_words(), DEFAULT_CMD_BUFFER_WORDS);
    }

    #[test]
    fn full_config() {
        let config = BackendConfig::from_json(
            r#"{
                "lib_dirs": ["/opt/tpu/lib"],
                "cmodel_gmem_size": 1048576,
                "profile": false,
                "cmd_buffer_words": 256,
                "dummy": { "enabled": true }
            }"#,
        )
        .unwrap();
        assert_eq!(config.lib_dirs.as_deref(), Some(&["/opt/tpu/lib".to_string()][..]));
        assert_eq!(config.cmodel_gmem_size, Some(1 << 20));
        assert!(!config.profile());
        assert_eq!(config.cmd_buffer_words(), 256);
        assert!(config.dummy.enabled);
    }

    #[test]
    fn garbage_is_config_error() {
        let err = BackendConfig::from_json("{ lib_dirs: ").unwrap_err();
        assert_eq!(err.status, ErrorStatus::Config);
    }

    #[test]
    fn env_dir_is_searched_first() {
        let mut config = BackendConfig { lib_dirs: Some(vec!["/b".into()]), ..Default::default() };
        config.apply_overrides(Some("/a".into()), None);
        assert_eq!(
            config.lib_candidates("libcmodel_1684x.so"),
            [
                PathBuf::from("/a/libcmodel_1684x.so"),
                PathBuf::from("/b/libcmodel_1684x.so"),
                PathBuf::from("libcmodel_1684x.so"),
            ]
        );
    }

    #[test]
    fn dummy_override() {
        let mut config = BackendConfig::default();
        config.apply_overrides(None, Some("1".into()));
        assert!(config.dummy.enabled);
        config.apply_overrides(Some(String::new()), Some("0".into()));
        assert!(!config.dummy.enabled);
        assert!(config.lib_dirs.is_none());
    }
}
