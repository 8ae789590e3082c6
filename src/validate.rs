use crate::error::{Error, Result};
use crate::model::GenerationConfig;
use crate::runner::CommandRunner;
use crate::template::{TemplateInfo, ToolRequirement};
use path_absolutize::Absolutize;
use std::path::{Component, Path, PathBuf};

/// Validate the config against its resolved template and normalize the
/// output path. Nothing is mutated; failures here never need rollback.
pub fn validate_config(config: &GenerationConfig, template: &TemplateInfo) -> Result<PathBuf> {
    validate_project_name(&config.project_name)?;
    let output = validate_output_path(&config.output)?;

    for required in &template.required_variables {
        if !config.variables.contains_key(required) {
            return Err(Error::Validation(format!(
                "template '{}' requires variable '{}'",
                template.id, required
            )));
        }
    }

    if install_args(&config.package_manager).is_none() {
        return Err(Error::Validation(format!(
            "unknown package manager '{}'",
            config.package_manager
        )));
    }

    Ok(output)
}

fn validate_project_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation("project name must not be empty".into()));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid || name.starts_with('-') {
        return Err(Error::Validation(format!(
            "invalid project name '{name}': use letters, digits, '-' and '_'"
        )));
    }
    Ok(())
}

/// Normalize the output path without requiring it to exist yet, and
/// reject traversal or control characters before anything touches disk.
pub fn validate_output_path(path: &Path) -> Result<PathBuf> {
    let raw = path.to_string_lossy();
    if raw.chars().any(|c| c.is_control()) {
        return Err(Error::Validation(format!(
            "output path contains control characters: {raw:?}"
        )));
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(Error::Validation(format!(
            "output path must not contain '..': {}",
            path.display()
        )));
    }
    let absolute = path
        .absolutize()
        .map_err(|e| Error::fs(path, e))?
        .into_owned();
    Ok(absolute)
}

/// Probe each required tool with `--version` and compare against the
/// template's minimum.
pub fn check_tools(requirements: &[ToolRequirement], runner: &dyn CommandRunner) -> Result<()> {
    for requirement in requirements {
        let output = runner
            .capture(&requirement.tool, &["--version"], None)
            .map_err(|_| Error::Validation(format!("required tool not found: {}", requirement.tool)))?;
        if !output.success() {
            return Err(Error::Validation(format!(
                "required tool not usable: {} (exit {})",
                requirement.tool, output.code
            )));
        }
        if let Some(min) = &requirement.min_version {
            let found = extract_version(output.diagnostic()).unwrap_or_default();
            if version_lt(&found, min) {
                return Err(Error::UnsupportedToolVersion {
                    tool: requirement.tool.clone(),
                    required: min.clone(),
                    found: if found.is_empty() {
                        "unknown".to_string()
                    } else {
                        found
                    },
                });
            }
        }
    }
    Ok(())
}

/// Install command line for a known package manager.
pub fn install_args(package_manager: &str) -> Option<Vec<&'static str>> {
    match package_manager {
        "npm" | "pnpm" | "yarn" | "bun" => Some(vec!["install"]),
        "cargo" => Some(vec!["fetch"]),
        _ => None,
    }
}

/// Pull the first dotted number out of a `--version` banner
/// ("git version 2.43.0" -> "2.43.0").
fn extract_version(banner: &str) -> Option<String> {
    banner
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .find(|token| !token.is_empty() && token.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .map(|token| token.trim_matches('.').to_string())
}

/// Numeric segment-wise comparison; missing segments count as zero.
fn version_lt(found: &str, required: &str) -> bool {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|part| part.parse::<u64>().unwrap_or(0))
            .collect()
    };
    let found = parse(found);
    let required = parse(required);
    let len = found.len().max(required.len());
    for i in 0..len {
        let f = found.get(i).copied().unwrap_or(0);
        let r = required.get(i).copied().unwrap_or(0);
        if f != r {
            return f < r;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CommandOutput;

    struct FixedRunner {
        code: i32,
        stdout: String,
    }

    impl CommandRunner for FixedRunner {
        fn run(&self, _command: &str, _args: &[&str], _cwd: Option<&Path>) -> Result<i32> {
            Ok(self.code)
        }
        fn capture(
            &self,
            _command: &str,
            _args: &[&str],
            _cwd: Option<&Path>,
        ) -> Result<CommandOutput> {
            Ok(CommandOutput {
                code: self.code,
                stdout: self.stdout.clone(),
                stderr: String::new(),
            })
        }
    }

    #[test]
    fn rejects_traversal_in_output_path() {
        let err = validate_output_path(Path::new("/tmp/../etc/demo")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn relative_output_path_is_absolutized() {
        let path = validate_output_path(Path::new("projects/demo")).unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("projects/demo"));
    }

    #[test]
    fn rejects_bad_project_names() {
        assert!(validate_project_name("demo-app").is_ok());
        assert!(validate_project_name("").is_err());
        assert!(validate_project_name("has space").is_err());
        assert!(validate_project_name("-leading").is_err());
        assert!(validate_project_name("a/b").is_err());
    }

    #[test]
    fn extracts_versions_from_banners() {
        assert_eq!(
            extract_version("git version 2.43.0").as_deref(),
            Some("2.43.0")
        );
        assert_eq!(extract_version("v18.19.1").as_deref(), Some("18.19.1"));
        assert_eq!(extract_version("no digits here"), None);
    }

    #[test]
    fn compares_versions_numerically() {
        assert!(version_lt("9.9.9", "10.0"));
        assert!(!version_lt("10.0.1", "10"));
        assert!(!version_lt("2.43.0", "2.43"));
        assert!(version_lt("2.42", "2.43.1"));
    }

    #[test]
    fn old_tool_version_is_a_typed_error() {
        let runner = FixedRunner {
            code: 0,
            stdout: "v16.1.0".to_string(),
        };
        let reqs = [ToolRequirement {
            tool: "node".to_string(),
            min_version: Some("18".to_string()),
        }];
        let err = check_tools(&reqs, &runner).unwrap_err();
        match err {
            Error::UnsupportedToolVersion { tool, found, .. } => {
                assert_eq!(tool, "node");
                assert_eq!(found, "16.1.0");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_required_variable_fails_validation() {
        let config: GenerationConfig = serde_json::from_str(
            r#"{"project_name":"demo","template":"basic","output":"/tmp/demo"}"#,
        )
        .unwrap();
        let template = TemplateInfo {
            id: "basic".to_string(),
            name: "Basic".to_string(),
            kind: None,
            framework: None,
            required_variables: vec!["author".to_string()],
            system_requirements: vec![],
        };
        assert!(matches!(
            validate_config(&config, &template),
            Err(Error::Validation(_))
        ));
    }
}
