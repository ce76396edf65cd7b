//! `package.json` access for the generated project.

use crate::error::LifecycleError;
use crate::Result;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

pub const PACKAGE_JSON: &str = "package.json";

/// Dependency declarations of a `package.json`. `peerDependencies` is not
/// read: a peer only counts once the project installs it directly.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub dev_dependencies: BTreeMap<String, String>,
}

impl PackageManifest {
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| LifecycleError::io(path, e))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Version declared in `dependencies` or `devDependencies`.
    pub fn declared(&self, name: &str) -> Option<&str> {
        self.dependencies
            .get(name)
            .or_else(|| self.dev_dependencies.get(name))
            .map(String::as_str)
    }

    /// Every declared package (runtime first, then dev), with its version.
    pub fn all_declared(&self) -> impl Iterator<Item = (&str, &str)> {
        self.dependencies
            .iter()
            .chain(self.dev_dependencies.iter())
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Set `devDependencies[name] = version`, keeping every other key and the
/// existing key order. The file is replaced atomically.
pub fn add_dev_dependency(path: &Path, name: &str, version: &str) -> Result<()> {
    let content = std::fs::read_to_string(path).map_err(|e| LifecycleError::io(path, e))?;
    let mut root: Value = serde_json::from_str(&content)?;

    let Some(object) = root.as_object_mut() else {
        return Err(invalid(path, "top level is not an object"));
    };
    let dev = object
        .entry("devDependencies")
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    let Some(dev) = dev.as_object_mut() else {
        return Err(invalid(path, "devDependencies is not an object"));
    };
    dev.insert(name.to_string(), Value::String(version.to_string()));

    let mut rendered = serde_json::to_string_pretty(&root)?;
    rendered.push('\n');
    write_atomic(path, rendered.as_bytes())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| LifecycleError::io(dir, e))?;
    tmp.write_all(bytes).map_err(|e| LifecycleError::io(path, e))?;
    tmp.persist(path)
        .map_err(|e| LifecycleError::io(path, e.error))?;
    Ok(())
}

fn invalid(path: &Path, reason: &str) -> LifecycleError {
    LifecycleError::io(
        path,
        std::io::Error::new(std::io::ErrorKind::InvalidData, reason.to_string()),
    )
}
