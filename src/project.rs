//! Generated project directories and their `package.json` manifests.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::ProjectError;

pub const MANIFEST_FILE: &str = "package.json";

/// The subset of `package.json` the deployment pipeline cares about.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
}

impl Manifest {
    pub fn script(&self, name: &str) -> Option<&str> {
        self.scripts.get(name).map(String::as_str)
    }

    /// The executable a script launches, e.g. `"vite"` for `"vite --open"`.
    ///
    /// Leading `VAR=value` environment assignments are skipped.
    pub fn script_binary(&self, name: &str) -> Option<String> {
        self.script(name)?
            .split_whitespace()
            .find(|token| !token.contains('='))
            .map(str::to_string)
    }
}

/// A directory believed to contain a complete, buildable front-end project.
///
/// Owned by the caller; the deployment pipeline only reads from it (apart
/// from the package manager populating the dependency directory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectHandle {
    root: PathBuf,
}

impl ProjectHandle {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Read and parse the manifest.
    pub fn manifest(&self) -> Result<Manifest, ProjectError> {
        if !self.root.is_dir() {
            return Err(ProjectError::MissingDirectory {
                path: self.root.clone(),
            });
        }
        let path = self.manifest_path();
        if !path.is_file() {
            return Err(ProjectError::MissingManifest { path });
        }
        let content =
            std::fs::read_to_string(&path).map_err(|source| ProjectError::UnreadableManifest {
                path: path.clone(),
                source,
            })?;
        serde_json::from_str(&content).map_err(|source| ProjectError::InvalidManifest { path, source })
    }

    /// Check the project is deployable: the manifest exists, parses, and
    /// declares `script`.
    pub fn validate(&self, script: &str) -> Result<Manifest, ProjectError> {
        self.validate_scripts(&[script])
    }

    /// Like [`validate`](Self::validate), for every script in `scripts`.
    /// The first missing one is reported.
    pub fn validate_scripts(&self, scripts: &[&str]) -> Result<Manifest, ProjectError> {
        let manifest = self.manifest()?;
        if let Some(missing) = scripts.iter().find(|s| manifest.script(s).is_none()) {
            return Err(ProjectError::MissingScript {
                script: missing.to_string(),
            });
        }
        Ok(manifest)
    }

    /// Path of an executable inside the installed dependency tree,
    /// e.g. `node_modules/.bin/vite`.
    pub fn dependency_binary(&self, dependency_dir: &str, binary: &str) -> PathBuf {
        self.root.join(dependency_dir).join(".bin").join(binary)
    }

    /// Structural install check: the dependency directory exists and holds
    /// the dev-server executable.
    pub fn dependencies_ready(&self, dependency_dir: &str, binary: &str) -> bool {
        if !self.root.join(dependency_dir).is_dir() {
            return false;
        }
        let bin = self.dependency_binary(dependency_dir, binary);
        if bin.exists() {
            return true;
        }
        // npm on Windows writes shims with an extension
        cfg!(windows)
            && ["cmd", "ps1"]
                .iter()
                .any(|ext| bin.with_extension(ext).exists())
    }

    pub fn display_name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.root.display().to_string())
    }
}

impl fmt::Display for ProjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root.display())
    }
}

/// Commands a user can run by hand when automatic hosting is not possible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManualInstructions {
    pub project_dir: PathBuf,
    pub commands: Vec<String>,
}

impl ManualInstructions {
    pub fn new(project: &ProjectHandle, package_manager: &str, dev_script: &str) -> Self {
        Self::from_scripts(project, package_manager, &[dev_script])
    }

    /// Install, then run each of `scripts` in order.
    pub fn from_scripts(project: &ProjectHandle, package_manager: &str, scripts: &[&str]) -> Self {
        let mut commands = vec![
            format!("cd {}", shell_quote(&project.root().display().to_string())),
            format!("{} install", package_manager),
        ];
        commands.extend(
            scripts
                .iter()
                .map(|script| format!("{} run {}", package_manager, script)),
        );
        Self {
            project_dir: project.root().to_path_buf(),
            commands,
        }
    }

    /// All commands chained into a single shell line.
    pub fn one_liner(&self) -> String {
        self.commands.join(" && ")
    }
}

impl fmt::Display for ManualInstructions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.one_liner())
    }
}

fn shell_quote(s: &str) -> String {
    if s.chars()
        .all(|c| c.is_ascii_alphanumeric() || "/._-~".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}
