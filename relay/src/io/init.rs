//! Scaffolding for `relay init`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use super::config::{RELAY_DIR, TOML_FILE};

const WORKFLOW_TEMPLATE: &str = include_str!("templates/workflow.toml");
const RELAY_GITIGNORE: &str = "logs/\nsession-state.json\n";

/// Canonical paths within `.relay/` for a project root.
#[derive(Debug, Clone)]
pub struct RelayPaths {
    pub relay_dir: PathBuf,
    pub config_path: PathBuf,
    pub gitignore_path: PathBuf,
    pub logs_dir: PathBuf,
}

impl RelayPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let relay_dir = root.join(RELAY_DIR);
        Self {
            config_path: relay_dir.join(TOML_FILE),
            gitignore_path: relay_dir.join(".gitignore"),
            logs_dir: relay_dir.join("logs"),
            relay_dir,
        }
    }
}

/// Options for `init_relay`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite an existing workflow config.
    pub force: bool,
}

/// Write the default workflow config and `.gitignore` into `root/.relay/`.
///
/// Fails if the config already exists unless `options.force` is set.
pub fn init_relay(root: &Path, options: &InitOptions) -> Result<RelayPaths> {
    let paths = RelayPaths::new(root);
    if paths.relay_dir.exists() && !paths.relay_dir.is_dir() {
        bail!("relay init: {RELAY_DIR} exists but is not a directory");
    }
    if paths.config_path.exists() && !options.force {
        bail!(
            "relay init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        );
    }

    fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("create directory {}", paths.logs_dir.display()))?;
    write_atomic(&paths.config_path, WORKFLOW_TEMPLATE)?;
    write_atomic(&paths.gitignore_path, RELAY_GITIGNORE)?;
    Ok(paths)
}

/// Write via a sibling temp file and rename, so readers never see a partial file.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("path missing file name {}", path.display()))?;
    let tmp_path = parent.join(format!(".{file_name}.tmp"));
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;

    /// Verifies init writes a config that loads and validates as-is.
    #[test]
    fn init_writes_loadable_default_config() {
        let temp = tempfile::tempdir().expect("tempdir");

        let paths = init_relay(temp.path(), &InitOptions { force: false }).expect("init");

        assert!(paths.config_path.is_file());
        assert!(paths.logs_dir.is_dir());
        assert_eq!(
            fs::read_to_string(&paths.gitignore_path).expect("read gitignore"),
            RELAY_GITIGNORE
        );
        let cfg = load_config(&paths.config_path).expect("load default config");
        assert_eq!(cfg.agents.len(), 7);
        assert!(cfg.rules.iter().any(|r| r.id == "start"));
    }

    /// Verifies init refuses to overwrite without --force.
    #[test]
    fn init_without_force_refuses_existing_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_relay(temp.path(), &InitOptions { force: false }).expect("init");

        let err = init_relay(temp.path(), &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    /// Verifies init with --force restores the default config.
    #[test]
    fn init_with_force_rewrites_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_relay(temp.path(), &InitOptions { force: false }).expect("init");
        fs::write(&paths.config_path, "custom").expect("write custom");

        init_relay(temp.path(), &InitOptions { force: true }).expect("re-init");

        let contents = fs::read_to_string(&paths.config_path).expect("read config");
        assert_eq!(contents, WORKFLOW_TEMPLATE);
        assert!(!paths.relay_dir.join(".workflow.toml.tmp").exists());
    }
}
