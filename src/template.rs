use crate::error::{Error, Result};
use crate::model::GenerationConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A system tool a template needs before generation may proceed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequirement {
    /// Executable name probed with `--version`.
    pub tool: String,
    /// Minimum version, as a dotted numeric prefix ("18", "10.2").
    #[serde(default)]
    pub min_version: Option<String>,
}

/// Descriptor of a resolvable template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateInfo {
    pub id: String,
    pub name: String,
    /// Template category ("web-app", "api", "library", ...).
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub framework: Option<String>,
    /// Variables that must be present in the generation config.
    #[serde(default)]
    pub required_variables: Vec<String>,
    #[serde(default)]
    pub system_requirements: Vec<ToolRequirement>,
}

/// One file a template materializes, relative to the project root.
#[derive(Debug, Clone)]
pub struct RenderedFile {
    pub path: PathBuf,
    pub content: String,
}

/// Source of templates and their rendered files.
///
/// The pipeline treats this as an external collaborator: resolution
/// failures become `TemplateNotFound`, generation failures `Template`,
/// and neither is retried.
pub trait TemplateProvider {
    fn get_template(&self, id: &str) -> Result<TemplateInfo>;
    fn generate_files(&self, config: &GenerationConfig) -> Result<Vec<RenderedFile>>;
}

/// Substitute `{{key}}` placeholders from the variable map.
///
/// Unknown placeholders are left verbatim; required-variable presence is
/// checked during validation, not here.
pub fn render(input: &str, variables: &std::collections::BTreeMap<String, String>) -> String {
    let mut out = input.to_string();
    for (key, value) in variables {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

fn config_variables(config: &GenerationConfig) -> std::collections::BTreeMap<String, String> {
    let mut variables = config.variables.clone();
    variables
        .entry("project_name".to_string())
        .or_insert_with(|| config.project_name.clone());
    if let Some(framework) = &config.framework {
        variables
            .entry("framework".to_string())
            .or_insert_with(|| framework.clone());
    }
    variables
}

/// Templates stored on disk, one directory per template:
///
/// ```text
/// <root>/<id>/template.json   TemplateInfo descriptor
/// <root>/<id>/files/**        payload, rendered file by file
/// ```
pub struct DirProvider {
    root: PathBuf,
}

impl DirProvider {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn template_dir(&self, id: &str) -> Result<PathBuf> {
        // Template ids become path segments; refuse anything that could
        // escape the templates root.
        if id.is_empty()
            || id
                .chars()
                .any(|c| !c.is_ascii_alphanumeric() && c != '-' && c != '_')
        {
            return Err(Error::TemplateNotFound(id.to_string()));
        }
        let dir = self.root.join(id);
        if !dir.is_dir() {
            return Err(Error::TemplateNotFound(id.to_string()));
        }
        Ok(dir)
    }
}

impl TemplateProvider for DirProvider {
    fn get_template(&self, id: &str) -> Result<TemplateInfo> {
        let dir = self.template_dir(id)?;
        let descriptor = dir.join("template.json");
        let raw = std::fs::read_to_string(&descriptor)
            .map_err(|_| Error::TemplateNotFound(id.to_string()))?;
        let info: TemplateInfo = serde_json::from_str(&raw)
            .map_err(|e| Error::Template(format!("invalid descriptor for '{id}': {e}")))?;
        Ok(info)
    }

    fn generate_files(&self, config: &GenerationConfig) -> Result<Vec<RenderedFile>> {
        let dir = self.template_dir(&config.template)?;
        let files_root = dir.join("files");
        if !files_root.is_dir() {
            return Err(Error::Template(format!(
                "template '{}' has no files directory",
                config.template
            )));
        }

        let variables = config_variables(config);
        let mut rendered = Vec::new();
        for entry in walkdir::WalkDir::new(&files_root).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Template(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&files_root)
                .expect("walkdir yields paths under its root");
            let content = std::fs::read_to_string(entry.path())
                .map_err(|e| Error::fs(entry.path(), e))?;
            // Placeholders apply to file names too ("{{project_name}}.toml").
            let rel = PathBuf::from(render(&rel.to_string_lossy(), &variables));
            rendered.push(RenderedFile {
                path: rel,
                content: render(&content, &variables),
            });
        }
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn render_substitutes_known_placeholders() {
        let out = render(
            "# {{project_name}} ({{missing}})",
            &vars(&[("project_name", "demo")]),
        );
        assert_eq!(out, "# demo ({{missing}})");
    }

    #[test]
    fn dir_provider_resolves_and_renders() {
        let dir = tempdir().unwrap();
        let template = dir.path().join("basic");
        std::fs::create_dir_all(template.join("files/src")).unwrap();
        std::fs::write(
            template.join("template.json"),
            r#"{"id":"basic","name":"Basic","required_variables":["author"]}"#,
        )
        .unwrap();
        std::fs::write(
            template.join("files/README.md"),
            "# {{project_name}} by {{author}}",
        )
        .unwrap();
        std::fs::write(template.join("files/src/main.js"), "console.log(1)").unwrap();

        let provider = DirProvider::new(dir.path());
        let info = provider.get_template("basic").unwrap();
        assert_eq!(info.required_variables, vec!["author".to_string()]);

        let config: GenerationConfig = serde_json::from_str(
            r#"{"project_name":"demo","template":"basic","output":"/tmp/demo",
                "variables":{"author":"ada"}}"#,
        )
        .unwrap();
        let files = provider.generate_files(&config).unwrap();
        assert_eq!(files.len(), 2);
        let readme = files
            .iter()
            .find(|f| f.path == PathBuf::from("README.md"))
            .unwrap();
        assert_eq!(readme.content, "# demo by ada");
    }

    #[test]
    fn unknown_template_is_a_typed_error() {
        let dir = tempdir().unwrap();
        let provider = DirProvider::new(dir.path());
        assert!(matches!(
            provider.get_template("nope"),
            Err(Error::TemplateNotFound(_))
        ));
        assert!(matches!(
            provider.get_template("../escape"),
            Err(Error::TemplateNotFound(_))
        ));
    }
}
