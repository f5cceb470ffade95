//! Plugin discovery: manifest loading and the name registry.
//!
//! A plugin is a directory containing a `visualizer.plugin` manifest (JSON
//! when the first non-whitespace byte is `{`, YAML otherwise) plus static
//! assets. Plugins contribute stylesheet/script entries to the index page
//! and get their directory served under `/plugins/<name>/`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const PLUGIN_MANIFEST_FILE: &str = "visualizer.plugin";

/// Page assets contributed by a plugin or built-in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageContext {
    #[serde(default)]
    pub stylesheets: Vec<String>,
    #[serde(default)]
    pub scripts: Vec<String>,
}

/// The parsed `visualizer.plugin` file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginManifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub visualizer: PageContext,
}

/// A page extension baked into the server itself. Built-in entries come
/// before plugin entries in the composed index page.
#[derive(Debug, Clone)]
pub struct Builtin {
    /// Web path prefix for the entries; empty means site root.
    pub path: String,
    pub visualizer: PageContext,
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("read error: {0}")]
    Read(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Loads the manifest from a plugin directory, sniffing JSON vs YAML by the
/// first non-whitespace byte.
pub fn load_manifest(dir: &Path) -> Result<PluginManifest, ManifestError> {
    let raw = std::fs::read_to_string(dir.join(PLUGIN_MANIFEST_FILE))?;
    if raw.trim_start().starts_with('{') {
        Ok(serde_json::from_str(&raw)?)
    } else {
        Ok(serde_yaml::from_str(&raw)?)
    }
}

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("{dir}: locate error: {source}")]
    Locate {
        dir: String,
        source: std::io::Error,
    },
    #[error("{dir}: load error: {source}")]
    Load {
        dir: String,
        source: ManifestError,
    },
    #[error("{dir}: name '{name}' conflicts with {existing}")]
    NameConflict {
        dir: String,
        name: String,
        existing: String,
    },
}

/// A registered plugin. `dir` is the registration string's directory part,
/// kept for log lines; `full_dir` is what gets served.
#[derive(Debug, Clone)]
pub struct Plugin {
    pub name: String,
    pub dir: String,
    pub full_dir: PathBuf,
}

/// Registration-ordered plugin list. Order is stable: the index page's
/// asset lists follow it and CSS cascade may depend on it.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: Vec<Plugin>,
}

impl PluginRegistry {
    /// Registers a plugin directory. A `name=dir` spec overrides the
    /// manifest's name; the fallbacks are the manifest name, then the
    /// directory's basename. A duplicate resolved name fails registration
    /// and the earlier plugin stays.
    pub fn load(&mut self, spec: &str) -> Result<(), PluginError> {
        let (mut name, dir) = match spec.split_once('=') {
            Some((n, d)) if !n.is_empty() => (n.to_owned(), d),
            _ => (String::new(), spec),
        };

        let full_dir = std::path::absolute(dir).map_err(|source| PluginError::Locate {
            dir: dir.to_owned(),
            source,
        })?;
        let manifest = load_manifest(&full_dir).map_err(|source| PluginError::Load {
            dir: dir.to_owned(),
            source,
        })?;

        if name.is_empty() {
            name = manifest.name;
        }
        if name.is_empty() {
            name = full_dir
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
        }

        if let Some(existing) = self.plugins.iter().find(|p| p.name == name) {
            return Err(PluginError::NameConflict {
                dir: dir.to_owned(),
                name,
                existing: existing.dir.clone(),
            });
        }

        self.plugins.push(Plugin {
            name,
            dir: dir.to_owned(),
            full_dir,
        });
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Plugin> {
        self.plugins.iter()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
