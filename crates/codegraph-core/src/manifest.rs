//! Component/dependency extraction from manifest files.
//!
//! Unlike source files, manifests (`Cargo.toml`, `pyproject.toml`,
//! `package.json`, `go.mod`) are parsed with format-native tooling (`toml`
//! for TOML, `serde_json` for JSON, line-oriented matching for `go.mod`)
//! rather than tree-sitter — their structure is regular enough that a
//! grammar-based query buys nothing, and it keeps this crate's language list
//! limited to the ones actual source files use.

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("unrecognized manifest file: {0}")]
    UnrecognizedManifest(String),

    #[error("failed to parse manifest: {0}")]
    ParseFailed(String),
}

/// Manifest dialects this crate understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManifestLanguage {
    CargoToml,
    PyProjectToml,
    PackageJson,
    GoMod,
}

impl ManifestLanguage {
    pub fn from_filename(filename: &str) -> Option<Self> {
        match filename {
            "Cargo.toml" => Some(ManifestLanguage::CargoToml),
            "pyproject.toml" => Some(ManifestLanguage::PyProjectToml),
            "package.json" => Some(ManifestLanguage::PackageJson),
            "go.mod" => Some(ManifestLanguage::GoMod),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.file_name().and_then(|n| n.to_str()).and_then(Self::from_filename)
    }

    pub fn is_manifest_file(path: &Path) -> bool {
        Self::from_path(path).is_some()
    }

    pub fn ecosystem(&self) -> &'static str {
        match self {
            ManifestLanguage::CargoToml => "cargo",
            ManifestLanguage::PyProjectToml => "python",
            ManifestLanguage::PackageJson => "npm",
            ManifestLanguage::GoMod => "go",
        }
    }
}

/// How a local dependency was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyType {
    /// Path-based dependency (Cargo `{ path = "../sibling" }`, npm `file:../sibling`).
    Path,
    /// Workspace member reference.
    Workspace,
    /// Go `replace` directive pointing at a local path.
    Replace,
}

impl DependencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyType::Path => "path",
            DependencyType::Workspace => "workspace",
            DependencyType::Replace => "replace",
        }
    }
}

/// A single local (same-repository) dependency edge candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDependency {
    pub name: String,
    pub path: Option<String>,
    pub dep_type: DependencyType,
    pub is_dev: bool,
    pub version_spec: Option<String>,
}

impl LocalDependency {
    pub fn with_path(name: String, path: String, dep_type: DependencyType) -> Self {
        Self {
            name,
            path: Some(path),
            dep_type,
            is_dev: false,
            version_spec: None,
        }
    }

    pub fn as_dev(mut self) -> Self {
        self.is_dev = true;
        self
    }
}

/// Component metadata plus local dependency edges extracted from one
/// manifest file.
#[derive(Debug, Clone, Default)]
pub struct ManifestInfo {
    pub component_name: Option<String>,
    pub version: Option<String>,
    pub is_workspace_root: bool,
    pub workspace_members: Vec<String>,
    pub local_dependencies: Vec<LocalDependency>,
    pub ecosystem: Option<String>,
}

impl ManifestInfo {
    pub fn is_empty(&self) -> bool {
        self.component_name.is_none()
            && self.version.is_none()
            && !self.is_workspace_root
            && self.workspace_members.is_empty()
            && self.local_dependencies.is_empty()
    }
}

/// Stateless parser dispatching to the format-appropriate extraction routine.
#[derive(Debug, Default)]
pub struct ManifestParser;

impl ManifestParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, path: &Path, content: &str) -> Result<ManifestInfo, ManifestError> {
        let language = ManifestLanguage::from_path(path)
            .ok_or_else(|| ManifestError::UnrecognizedManifest(path.display().to_string()))?;
        self.parse_with_language(content, language)
    }

    pub fn parse_with_language(
        &self,
        content: &str,
        language: ManifestLanguage,
    ) -> Result<ManifestInfo, ManifestError> {
        let mut info = match language {
            ManifestLanguage::CargoToml => parse_cargo_toml(content)?,
            ManifestLanguage::PyProjectToml => parse_pyproject_toml(content)?,
            ManifestLanguage::PackageJson => parse_package_json(content)?,
            ManifestLanguage::GoMod => parse_go_mod(content),
        };
        info.ecosystem = Some(language.ecosystem().to_string());
        Ok(info)
    }
}

fn parse_cargo_toml(content: &str) -> Result<ManifestInfo, ManifestError> {
    let doc: toml::Value =
        toml::from_str(content).map_err(|e| ManifestError::ParseFailed(e.to_string()))?;
    let mut info = ManifestInfo::default();

    if let Some(package) = doc.get("package").and_then(|v| v.as_table()) {
        info.component_name = package.get("name").and_then(|v| v.as_str()).map(String::from);
        info.version = package.get("version").and_then(|v| v.as_str()).map(String::from);
    }

    if let Some(workspace) = doc.get("workspace").and_then(|v| v.as_table()) {
        info.is_workspace_root = true;
        if let Some(members) = workspace.get("members").and_then(|v| v.as_array()) {
            info.workspace_members = members
                .iter()
                .filter_map(|m| m.as_str().map(String::from))
                .collect();
        }
    }

    for section in ["dependencies", "dev-dependencies", "build-dependencies"] {
        let is_dev = section != "dependencies";
        if let Some(table) = doc.get(section).and_then(|v| v.as_table()) {
            for (name, spec) in table {
                if let Some(path) = spec.get("path").and_then(|v| v.as_str()) {
                    let mut dep =
                        LocalDependency::with_path(name.clone(), path.to_string(), DependencyType::Path);
                    if is_dev {
                        dep = dep.as_dev();
                    }
                    info.local_dependencies.push(dep);
                } else if spec.get("workspace").and_then(|v| v.as_bool()) == Some(true) {
                    let mut dep = LocalDependency {
                        name: name.clone(),
                        path: None,
                        dep_type: DependencyType::Workspace,
                        is_dev,
                        version_spec: None,
                    };
                    if is_dev {
                        dep = dep.as_dev();
                    }
                    info.local_dependencies.push(dep);
                }
            }
        }
    }

    Ok(info)
}

fn parse_pyproject_toml(content: &str) -> Result<ManifestInfo, ManifestError> {
    let doc: toml::Value =
        toml::from_str(content).map_err(|e| ManifestError::ParseFailed(e.to_string()))?;
    let mut info = ManifestInfo::default();

    if let Some(project) = doc.get("project").and_then(|v| v.as_table()) {
        info.component_name = project.get("name").and_then(|v| v.as_str()).map(String::from);
        info.version = project.get("version").and_then(|v| v.as_str()).map(String::from);
    }

    // Poetry path dependencies: [tool.poetry.dependencies] foo = { path = "../foo" }
    if let Some(deps) = doc
        .get("tool")
        .and_then(|v| v.get("poetry"))
        .and_then(|v| v.get("dependencies"))
        .and_then(|v| v.as_table())
    {
        for (name, spec) in deps {
            if let Some(path) = spec.get("path").and_then(|v| v.as_str()) {
                info.local_dependencies.push(LocalDependency::with_path(
                    name.clone(),
                    path.to_string(),
                    DependencyType::Path,
                ));
            }
        }
    }

    Ok(info)
}

fn parse_package_json(content: &str) -> Result<ManifestInfo, ManifestError> {
    let doc: serde_json::Value =
        serde_json::from_str(content).map_err(|e| ManifestError::ParseFailed(e.to_string()))?;
    let mut info = ManifestInfo::default();

    info.component_name = doc.get("name").and_then(|v| v.as_str()).map(String::from);
    info.version = doc.get("version").and_then(|v| v.as_str()).map(String::from);
    if doc.get("workspaces").is_some() {
        info.is_workspace_root = true;
        if let Some(members) = doc.get("workspaces").and_then(|v| v.as_array()) {
            info.workspace_members = members
                .iter()
                .filter_map(|m| m.as_str().map(String::from))
                .collect();
        }
    }

    for section in ["dependencies", "devDependencies"] {
        let is_dev = section == "devDependencies";
        if let Some(table) = doc.get(section).and_then(|v| v.as_object()) {
            for (name, spec) in table {
                if let Some(spec_str) = spec.as_str() {
                    if let Some(path) = spec_str.strip_prefix("file:") {
                        let mut dep = LocalDependency::with_path(
                            name.clone(),
                            path.to_string(),
                            DependencyType::Path,
                        );
                        if is_dev {
                            dep = dep.as_dev();
                        }
                        info.local_dependencies.push(dep);
                    } else if spec_str.starts_with("workspace:") {
                        let mut dep = LocalDependency {
                            name: name.clone(),
                            path: None,
                            dep_type: DependencyType::Workspace,
                            is_dev,
                            version_spec: Some(spec_str.to_string()),
                        };
                        if is_dev {
                            dep = dep.as_dev();
                        }
                        info.local_dependencies.push(dep);
                    }
                }
            }
        }
    }

    Ok(info)
}

/// `go.mod` isn't declarative enough to warrant a grammar: a handful of
/// line-oriented directives (`module`, `replace ... => <path>`) cover what
/// the Impact Analysis tool needs.
fn parse_go_mod(content: &str) -> ManifestInfo {
    let mut info = ManifestInfo::default();
    for line in content.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("module ") {
            info.component_name = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("replace ") {
            if let Some((module, target)) = rest.split_once("=>") {
                let target = target.trim();
                if target.starts_with('.') || target.starts_with('/') {
                    info.local_dependencies.push(LocalDependency::with_path(
                        module.trim().to_string(),
                        target.to_string(),
                        DependencyType::Replace,
                    ));
                }
            }
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_language_detects_known_filenames() {
        assert_eq!(
            ManifestLanguage::from_filename("Cargo.toml"),
            Some(ManifestLanguage::CargoToml)
        );
        assert_eq!(ManifestLanguage::from_filename("README.md"), None);
    }

    #[test]
    fn cargo_toml_extracts_name_and_path_dependencies() {
        let content = r#"
[package]
name = "codegraph-core"
version = "0.1.0"

[dependencies]
codegraph-graph = { path = "../codegraph-graph" }
serde = "1"
"#;
        let info = ManifestParser::new()
            .parse_with_language(content, ManifestLanguage::CargoToml)
            .unwrap();
        assert_eq!(info.component_name.as_deref(), Some("codegraph-core"));
        assert_eq!(info.local_dependencies.len(), 1);
        assert_eq!(info.local_dependencies[0].name, "codegraph-graph");
    }

    #[test]
    fn cargo_workspace_lists_members() {
        let content = r#"
[workspace]
members = ["crates/a", "crates/b"]
"#;
        let info = ManifestParser::new()
            .parse_with_language(content, ManifestLanguage::CargoToml)
            .unwrap();
        assert!(info.is_workspace_root);
        assert_eq!(info.workspace_members, vec!["crates/a", "crates/b"]);
    }

    #[test]
    fn package_json_extracts_file_dependencies() {
        let content = r#"{"name": "app", "dependencies": {"shared": "file:../shared"}}"#;
        let info = ManifestParser::new()
            .parse_with_language(content, ManifestLanguage::PackageJson)
            .unwrap();
        assert_eq!(info.component_name.as_deref(), Some("app"));
        assert_eq!(info.local_dependencies[0].path.as_deref(), Some("../shared"));
    }

    #[test]
    fn go_mod_extracts_module_name_and_replace_directives() {
        let content = "module example.com/app\n\nrequire foo v1.0.0\n\nreplace foo => ../foo\n";
        let info = parse_go_mod(content);
        assert_eq!(info.component_name.as_deref(), Some("example.com/app"));
        assert_eq!(info.local_dependencies.len(), 1);
        assert_eq!(info.local_dependencies[0].path.as_deref(), Some("../foo"));
    }
}
