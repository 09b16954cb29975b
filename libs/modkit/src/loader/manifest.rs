use serde::{Deserialize, Serialize};

use crate::contracts::Capability;
use crate::error::ValidationError;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    name: Option<String>,
    /// Accepts `1.0.0` as well as unquoted scalars such as `2` or `1.5`.
    version: Option<serde_yaml::Value>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    provides: Vec<String>,
    entry: Option<String>,
}

/// Parsed `module.yaml`.
///
/// `name` and `version` may come out blank; completeness is judged later
/// together with the factory lookup, so one error can list every missing
/// field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleManifest {
    pub name: String,
    pub version: String,
    pub description: String,
    pub dependencies: Vec<String>,
    pub provides: Vec<Capability>,
    /// Catalog key of the factory building the module.
    pub entry: String,
}

impl ModuleManifest {
    /// Parse manifest text found in directory `dir_name`.
    pub fn parse(text: &str, dir_name: &str) -> Result<Self, ValidationError> {
        let raw: RawManifest = serde_yaml::from_str(text).map_err(|e| ValidationError::Manifest {
            module: dir_name.to_string(),
            reason: e.to_string(),
        })?;

        let name = raw.name.unwrap_or_default().trim().to_string();
        let label = if name.is_empty() { dir_name } else { name.as_str() };

        let version = match raw.version {
            None | Some(serde_yaml::Value::Null) => String::new(),
            Some(serde_yaml::Value::String(s)) => s.trim().to_string(),
            Some(serde_yaml::Value::Number(n)) => n.to_string(),
            Some(other) => {
                return Err(ValidationError::Manifest {
                    module: label.to_string(),
                    reason: format!("version must be a scalar, got {other:?}"),
                })
            }
        };

        let provides = raw
            .provides
            .iter()
            .map(|tag| {
                tag.parse::<Capability>()
                    .map_err(|_| ValidationError::UnknownCapability {
                        module: label.to_string(),
                        tag: tag.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let entry = raw
            .entry
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| label.to_string());

        Ok(Self {
            name,
            version,
            description: raw.description,
            dependencies: raw.dependencies,
            provides,
            entry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_manifest() {
        let m = ModuleManifest::parse(
            r#"
name: task_events
version: 1.0.0
description: Task activity counters
dependencies: [database]
provides: [Tasks, analytics]
entry: task-events
"#,
            "task_events",
        )
        .unwrap();
        assert_eq!(m.name, "task_events");
        assert_eq!(m.version, "1.0.0");
        assert_eq!(m.provides, vec![Capability::Tasks, Capability::Analytics]);
        assert_eq!(m.entry, "task-events");
    }

    #[test]
    fn numeric_version_and_default_entry() {
        let m = ModuleManifest::parse("name: team\nversion: 2\n", "dir").unwrap();
        assert_eq!(m.version, "2");
        assert_eq!(m.entry, "team");

        let unnamed = ModuleManifest::parse("version: 1.5\n", "dir").unwrap();
        assert!(unnamed.name.is_empty());
        assert_eq!(unnamed.entry, "dir");
    }

    #[test]
    fn unknown_capability_is_a_validation_error() {
        let err = ModuleManifest::parse("name: x\nversion: '1'\nprovides: [teleport]\n", "x")
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownCapability {
                module: "x".into(),
                tag: "teleport".into()
            }
        );
    }

    #[test]
    fn unknown_keys_and_bad_yaml_are_rejected() {
        assert!(matches!(
            ModuleManifest::parse("name: x\nhooks: {}\n", "x"),
            Err(ValidationError::Manifest { .. })
        ));
        assert!(matches!(
            ModuleManifest::parse("name: [", "x"),
            Err(ValidationError::Manifest { .. })
        ));
    }
}
