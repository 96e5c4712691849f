// =============================================================================
// Plugin manifests — discovery metadata + parameter validation
// =============================================================================
//
// Ported from `StrategyPluginManager.discover_plugins`/`_validate_config`/
// `validate_parameters`: each strategy plugin ships a `config.json` manifest
// next to it describing its name, version, and the parameters it accepts.
// The manifest is used to validate a `StrategyConfig.parameters` map before a
// strategy is ever loaded, so a typo'd or out-of-range parameter is caught at
// scheduling time rather than deep inside `on_tick`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    Int,
    Float,
    String,
    Bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

/// The `config.json` manifest a plugin directory must carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
}

impl PluginManifest {
    /// Mirrors `_validate_config`: every manifest must declare these four
    /// fields. `parameters` may legitimately be an empty list, but the key
    /// itself (enforced here by deserialization requiring the field) must be
    /// present.
    fn validate_shape(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::validation("plugin manifest missing name"));
        }
        if self.version.trim().is_empty() {
            return Err(CoreError::validation("plugin manifest missing version"));
        }
        if self.description.trim().is_empty() {
            return Err(CoreError::validation("plugin manifest missing description"));
        }
        Ok(())
    }

    fn from_json(text: &str) -> Result<Self, CoreError> {
        let manifest: PluginManifest = serde_json::from_str(text)
            .map_err(|e| CoreError::validation(format!("malformed plugin manifest: {e}")))?;
        manifest.validate_shape()?;
        Ok(manifest)
    }
}

/// Scans `plugin_dir` for one-level-deep subdirectories each carrying a
/// `config.json`, returning the manifests keyed by plugin name. A malformed
/// manifest is skipped with a warning rather than aborting the whole scan —
/// one bad plugin should not prevent the others from loading.
pub fn discover_plugins(plugin_dir: &Path) -> Vec<PluginManifest> {
    let mut manifests = Vec::new();

    let entries = match fs::read_dir(plugin_dir) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(dir = %plugin_dir.display(), error = %e, "could not read plugin directory");
            return manifests;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let manifest_path = path.join("config.json");
        let text = match fs::read_to_string(&manifest_path) {
            Ok(t) => t,
            Err(_) => continue,
        };
        match PluginManifest::from_json(&text) {
            Ok(manifest) => manifests.push(manifest),
            Err(e) => {
                tracing::warn!(path = %manifest_path.display(), error = %e, "skipping malformed plugin manifest");
            }
        }
    }

    manifests
}

/// Validates a strategy's configured `parameters` map against its manifest's
/// parameter specs. Ported from `validate_parameters`: checks required
/// presence, coarse type compatibility, and min/max bounds for numeric types.
pub fn validate_parameters(
    manifest: &PluginManifest,
    parameters: &BTreeMap<String, serde_json::Value>,
) -> Result<(), CoreError> {
    for spec in &manifest.parameters {
        let value = match parameters.get(&spec.name) {
            Some(v) => v,
            None => {
                if spec.required {
                    return Err(CoreError::validation(format!(
                        "missing required parameter '{}'",
                        spec.name
                    )));
                }
                continue;
            }
        };

        match spec.param_type {
            ParameterType::Int => {
                let n = value.as_i64().ok_or_else(|| {
                    CoreError::validation(format!("parameter '{}' must be an integer", spec.name))
                })?;
                check_bounds(&spec.name, n as f64, spec.min, spec.max)?;
            }
            ParameterType::Float => {
                let n = value.as_f64().ok_or_else(|| {
                    CoreError::validation(format!("parameter '{}' must be a number", spec.name))
                })?;
                check_bounds(&spec.name, n, spec.min, spec.max)?;
            }
            ParameterType::String => {
                if !value.is_string() {
                    return Err(CoreError::validation(format!(
                        "parameter '{}' must be a string",
                        spec.name
                    )));
                }
            }
            ParameterType::Bool => {
                if !value.is_boolean() {
                    return Err(CoreError::validation(format!(
                        "parameter '{}' must be a boolean",
                        spec.name
                    )));
                }
            }
        }
    }

    Ok(())
}

fn check_bounds(name: &str, value: f64, min: Option<f64>, max: Option<f64>) -> Result<(), CoreError> {
    if let Some(min) = min {
        if value < min {
            return Err(CoreError::validation(format!(
                "parameter '{name}' is below minimum {min}"
            )));
        }
    }
    if let Some(max) = max {
        if value > max {
            return Err(CoreError::validation(format!(
                "parameter '{name}' is above maximum {max}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> PluginManifest {
        PluginManifest {
            name: "macd_cross".into(),
            version: "1.0.0".into(),
            description: "MACD crossover strategy".into(),
            parameters: vec![
                ParameterSpec {
                    name: "fast_period".into(),
                    param_type: ParameterType::Int,
                    required: true,
                    min: Some(1.0),
                    max: Some(100.0),
                    default: None,
                },
                ParameterSpec {
                    name: "use_volume_filter".into(),
                    param_type: ParameterType::Bool,
                    required: false,
                    min: None,
                    max: None,
                    default: Some(serde_json::Value::Bool(false)),
                },
            ],
        }
    }

    #[test]
    fn missing_required_parameter_fails() {
        let params = BTreeMap::new();
        assert!(validate_parameters(&manifest(), &params).is_err());
    }

    #[test]
    fn missing_optional_parameter_is_fine() {
        let mut params = BTreeMap::new();
        params.insert("fast_period".to_string(), serde_json::json!(12));
        assert!(validate_parameters(&manifest(), &params).is_ok());
    }

    #[test]
    fn out_of_range_parameter_fails() {
        let mut params = BTreeMap::new();
        params.insert("fast_period".to_string(), serde_json::json!(500));
        assert!(validate_parameters(&manifest(), &params).is_err());
    }

    #[test]
    fn wrong_type_parameter_fails() {
        let mut params = BTreeMap::new();
        params.insert("fast_period".to_string(), serde_json::json!("twelve"));
        assert!(validate_parameters(&manifest(), &params).is_err());
    }

    #[test]
    fn bool_type_mismatch_fails() {
        let mut params = BTreeMap::new();
        params.insert("fast_period".to_string(), serde_json::json!(12));
        params.insert("use_volume_filter".to_string(), serde_json::json!("yes"));
        assert!(validate_parameters(&manifest(), &params).is_err());
    }

    #[test]
    fn manifest_with_missing_name_is_rejected() {
        let text = r#"{"name":"","version":"1.0.0","description":"x","parameters":[]}"#;
        assert!(PluginManifest::from_json(text).is_err());
    }

    #[test]
    fn well_formed_manifest_parses() {
        let text = r#"{"name":"macd_cross","version":"1.0.0","description":"x","parameters":[]}"#;
        assert!(PluginManifest::from_json(text).is_ok());
    }

    #[test]
    fn discover_plugins_on_missing_dir_returns_empty() {
        let manifests = discover_plugins(Path::new("/nonexistent/plugin/dir"));
        assert!(manifests.is_empty());
    }
}
