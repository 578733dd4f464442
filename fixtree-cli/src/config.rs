use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Update profiles, one per installed product:
///
/// ```toml
/// [profile.app]
/// source = "https://example.org/updates/app/"
/// manifest = "app.chk"
/// root = "app"
/// ```
///
/// A relative `root` is taken relative to the config file's directory.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub profile: BTreeMap<String, Profile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    pub source: String,
    pub manifest: String,
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

impl Config {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        let mut cfg = Self::parse(&text).with_context(|| format!("parse config {}", path.display()))?;
        let base = path.parent().unwrap_or(Path::new(""));
        for p in cfg.profile.values_mut() {
            if p.root.is_relative() {
                p.root = base.join(&p.root);
            }
        }
        Ok(cfg)
    }

    pub fn profile(&self, name: &str) -> Result<&Profile> {
        self.profile.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.profile.keys().map(String::as_str).collect();
            anyhow!("no profile {name:?} (known: {})", known.join(", "))
        })
    }
}
