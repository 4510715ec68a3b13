// Filter definitions, pipeline steps, and the registry binding them.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    /// Consumes and emits the full multi-column record stream at once.
    Bilingual,
    /// Consumes and emits a single column's values, one per line, oblivious
    /// to the sibling columns. Wrapped by the column adapter at run time.
    Monolingual,
}

/// A typed parameter declared by a filter definition. The `type` tag in the
/// manifest selects the variant.
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FilterParameter {
    Float {
        #[serde(default)]
        help: Option<String>,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
        #[serde(default)]
        default: Option<f64>,
    },
    Int {
        #[serde(default)]
        help: Option<String>,
        #[serde(default)]
        min: Option<i64>,
        #[serde(default)]
        max: Option<i64>,
        #[serde(default)]
        default: Option<i64>,
    },
    Bool {
        #[serde(default)]
        help: Option<String>,
        #[serde(default)]
        default: Option<bool>,
    },
    Str {
        #[serde(default)]
        help: Option<String>,
        #[serde(default)]
        default: Option<String>,
        #[serde(default)]
        allowed_values: Option<Vec<String>>,
    },
}

impl FilterParameter {
    /// Render a concrete value for the process environment. Booleans become
    /// a non-empty marker when true and an empty string otherwise, so shell
    /// commands can test them with `[ -n "$FLAG" ]`. Strings pass through
    /// without JSON quoting; everything else stringifies directly.
    pub fn export(&self, value: &Value) -> String {
        match self {
            FilterParameter::Bool { .. } => {
                if value.as_bool().unwrap_or(false) {
                    "1".to_string()
                } else {
                    String::new()
                }
            }
            _ => match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            },
        }
    }
}

/// An external filter tool as declared by its JSON manifest. Immutable once
/// loaded.
#[derive(Deserialize, Debug, Clone)]
pub struct FilterDefinition {
    #[serde(rename = "type")]
    pub kind: FilterType,
    /// Defaults to the manifest's file stem when loaded from disk.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Shell command template; parameters arrive as environment variables.
    pub command: String,
    /// Working directory for the command; defaults to the manifest's
    /// directory when loaded from disk.
    #[serde(default)]
    pub basedir: Option<PathBuf>,
    #[serde(default)]
    pub parameters: HashMap<String, FilterParameter>,
}

impl FilterDefinition {
    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(PipelineError::ConfigError(format!(
                "Filter `{}` has an empty command",
                self.name
            )));
        }
        Ok(())
    }
}

/// One entry of a dataset's filter pipeline: a filter by name, concrete
/// parameter values, and the target language for monolingual filters.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct FilterStep {
    pub filter: String,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    #[serde(default)]
    pub language: Option<String>,
}

/// Explicit lookup table of filter definitions. Passed by value into the
/// executor rather than living as ambient global state, so pipelines stay
/// testable in isolation.
#[derive(Debug, Clone, Default)]
pub struct FilterRegistry {
    filters: HashMap<String, FilterDefinition>,
}

impl FilterRegistry {
    pub fn new(definitions: impl IntoIterator<Item = FilterDefinition>) -> Self {
        FilterRegistry {
            filters: definitions
                .into_iter()
                .map(|definition| (definition.name.clone(), definition))
                .collect(),
        }
    }

    /// Load every `*.json` manifest in a directory. Unparsable or invalid
    /// manifests are skipped with a warning instead of failing the whole
    /// registry, so one bad file does not take the tool down.
    pub fn from_dir<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut filters = HashMap::new();

        for entry in fs::read_dir(path).map_err(|e| {
            PipelineError::ConfigError(format!(
                "Failed to read filter directory '{}': {}",
                path.display(),
                e
            ))
        })? {
            let entry = entry?;
            let file_path = entry.path();
            if file_path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            match load_definition(&file_path) {
                Ok(definition) => {
                    debug!(filter = %definition.name, path = %file_path.display(), "Loaded filter definition");
                    filters.insert(definition.name.clone(), definition);
                }
                Err(e) => {
                    warn!(path = %file_path.display(), error = %e, "Could not parse filter definition, skipping");
                }
            }
        }

        Ok(FilterRegistry { filters })
    }

    pub fn get(&self, name: &str) -> Result<&FilterDefinition> {
        self.filters
            .get(name)
            .ok_or_else(|| PipelineError::UnknownFilter(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Validate a step against its definition before anything launches:
    /// every declared parameter supplied, no extras, and the `language`
    /// attribute present iff the filter is monolingual.
    pub fn validate_step(&self, step: &FilterStep) -> Result<&FilterDefinition> {
        let definition = self.get(&step.filter)?;

        let missing: Vec<&str> = definition
            .parameters
            .keys()
            .filter(|name| !step.parameters.contains_key(*name))
            .map(String::as_str)
            .sorted()
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::InvalidStep {
                filter: step.filter.clone(),
                reason: format!("missing filter parameters: {}", missing.iter().join(" ")),
            });
        }

        let unsupported: Vec<&str> = step
            .parameters
            .keys()
            .filter(|name| !definition.parameters.contains_key(*name))
            .map(String::as_str)
            .sorted()
            .collect();
        if !unsupported.is_empty() {
            return Err(PipelineError::InvalidStep {
                filter: step.filter.clone(),
                reason: format!(
                    "parameters not supported by the filter: {}",
                    unsupported.iter().join(" ")
                ),
            });
        }

        match definition.kind {
            FilterType::Bilingual if step.language.is_some() => Err(PipelineError::InvalidStep {
                filter: step.filter.clone(),
                reason: "cannot set `language` attribute for a bilingual filter".to_string(),
            }),
            FilterType::Monolingual if step.language.is_none() => Err(PipelineError::InvalidStep {
                filter: step.filter.clone(),
                reason: "`language` attribute required for a monolingual filter".to_string(),
            }),
            _ => Ok(definition),
        }
    }
}

fn load_definition(path: &Path) -> Result<FilterDefinition> {
    let content = fs::read_to_string(path)?;
    let mut definition: FilterDefinition = serde_json::from_str(&content)?;

    if definition.name.is_empty() {
        definition.name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
    }
    if definition.basedir.is_none() {
        definition.basedir = path.parent().map(Path::to_path_buf);
    }

    definition.validate()?;
    Ok(definition)
}

/// Loads and parses a pipeline steps JSON file (an ordered `FilterStep`
/// array).
pub fn load_steps<P: AsRef<Path>>(path: P) -> Result<Vec<FilterStep>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| {
        PipelineError::ConfigError(format!(
            "Failed to read pipeline steps file '{}': {}",
            path.display(),
            e
        ))
    })?;
    let steps: Vec<FilterStep> = serde_json::from_str(&content).map_err(|e| {
        PipelineError::ConfigError(format!(
            "Failed to parse pipeline steps from '{}': {}",
            path.display(),
            e
        ))
    })?;
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn definition(name: &str, kind: FilterType, parameters: &[(&str, FilterParameter)]) -> FilterDefinition {
        FilterDefinition {
            kind,
            name: name.to_string(),
            description: None,
            command: "cat".to_string(),
            basedir: None,
            parameters: parameters
                .iter()
                .map(|(key, parameter)| (key.to_string(), parameter.clone()))
                .collect(),
        }
    }

    fn int_parameter() -> FilterParameter {
        FilterParameter::Int {
            help: None,
            min: Some(0),
            max: None,
            default: Some(5),
        }
    }

    fn step(filter: &str, parameters: &[(&str, Value)], language: Option<&str>) -> FilterStep {
        FilterStep {
            filter: filter.to_string(),
            parameters: parameters
                .iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect(),
            language: language.map(str::to_string),
        }
    }

    #[test]
    fn validate_step_accepts_matching_parameters() {
        let registry = FilterRegistry::new(vec![definition(
            "limit",
            FilterType::Bilingual,
            &[("MAX_LINES", int_parameter())],
        )]);
        let result = registry.validate_step(&step("limit", &[("MAX_LINES", json!(3))], None));
        assert!(result.is_ok());
    }

    #[test]
    fn validate_step_rejects_unknown_filter() {
        let registry = FilterRegistry::new(vec![]);
        let result = registry.validate_step(&step("nope", &[], None));
        assert!(matches!(result, Err(PipelineError::UnknownFilter(name)) if name == "nope"));
    }

    #[test]
    fn validate_step_rejects_missing_parameter() {
        let registry = FilterRegistry::new(vec![definition(
            "limit",
            FilterType::Bilingual,
            &[("MAX_LINES", int_parameter())],
        )]);
        let result = registry.validate_step(&step("limit", &[], None));
        match result {
            Err(PipelineError::InvalidStep { reason, .. }) => {
                assert!(reason.contains("missing filter parameters"));
                assert!(reason.contains("MAX_LINES"));
            }
            other => panic!("expected InvalidStep, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn validate_step_rejects_unsupported_parameter() {
        let registry = FilterRegistry::new(vec![definition("identity", FilterType::Bilingual, &[])]);
        let result = registry.validate_step(&step("identity", &[("BOGUS", json!(1))], None));
        match result {
            Err(PipelineError::InvalidStep { reason, .. }) => {
                assert!(reason.contains("not supported"));
                assert!(reason.contains("BOGUS"));
            }
            other => panic!("expected InvalidStep, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn validate_step_requires_language_for_monolingual() {
        let registry =
            FilterRegistry::new(vec![definition("uppercase", FilterType::Monolingual, &[])]);
        assert!(registry.validate_step(&step("uppercase", &[], None)).is_err());
        assert!(registry
            .validate_step(&step("uppercase", &[], Some("en")))
            .is_ok());
    }

    #[test]
    fn validate_step_forbids_language_for_bilingual() {
        let registry = FilterRegistry::new(vec![definition("identity", FilterType::Bilingual, &[])]);
        assert!(registry
            .validate_step(&step("identity", &[], Some("en")))
            .is_err());
        assert!(registry.validate_step(&step("identity", &[], None)).is_ok());
    }

    #[test]
    fn export_bool_renders_marker() {
        let parameter = FilterParameter::Bool {
            help: None,
            default: None,
        };
        assert_eq!(parameter.export(&json!(true)), "1");
        assert_eq!(parameter.export(&json!(false)), "");
    }

    #[test]
    fn export_string_passes_through_unquoted() {
        let parameter = FilterParameter::Str {
            help: None,
            default: None,
            allowed_values: None,
        };
        assert_eq!(parameter.export(&json!("hello world")), "hello world");
    }

    #[test]
    fn export_numbers_stringify() {
        assert_eq!(int_parameter().export(&json!(42)), "42");
        let parameter = FilterParameter::Float {
            help: None,
            min: None,
            max: None,
            default: None,
        };
        assert_eq!(parameter.export(&json!(0.5)), "0.5");
    }

    #[test]
    fn from_dir_loads_manifests_and_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deescape-tsv.json");
        let mut file = fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"type": "bilingual", "command": "sed 's/\\\\t/ /g'", "parameters": {{}}}}"#
        )
        .unwrap();

        let registry = FilterRegistry::from_dir(dir.path()).unwrap();
        assert_eq!(registry.len(), 1);
        let definition = registry.get("deescape-tsv").unwrap();
        assert_eq!(definition.name, "deescape-tsv");
        assert_eq!(definition.basedir.as_deref(), Some(dir.path()));
    }

    #[test]
    fn from_dir_skips_unparsable_manifests() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.json"), b"{not json").unwrap();
        fs::write(
            dir.path().join("identity.json"),
            br#"{"type": "bilingual", "command": "cat"}"#,
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let registry = FilterRegistry::from_dir(dir.path()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("identity").is_ok());
    }

    #[test]
    fn parameter_manifest_round_trip() {
        let manifest = r#"{
            "type": "monolingual",
            "command": "grep -vE \"$PATTERN\"",
            "parameters": {
                "PATTERN": {"type": "str", "help": "lines to drop", "default": "^$"},
                "INVERT": {"type": "bool", "default": false},
                "MAX_LENGTH": {"type": "int", "min": 1, "max": 10000}
            }
        }"#;
        let definition: FilterDefinition = serde_json::from_str(manifest).unwrap();
        assert_eq!(definition.kind, FilterType::Monolingual);
        assert_eq!(definition.parameters.len(), 3);
        assert!(matches!(
            definition.parameters["PATTERN"],
            FilterParameter::Str { .. }
        ));
        assert!(matches!(
            definition.parameters["MAX_LENGTH"],
            FilterParameter::Int { min: Some(1), .. }
        ));
    }
}
