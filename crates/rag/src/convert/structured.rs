use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use configparser::ini::Ini;
use serde_json::{Map, Value};

use super::Extracted;

const CATEGORY_KEY: &str = "category";

pub fn convert_json(path: &Path) -> Result<Extracted> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read JSON file {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("invalid JSON payload in {}", path.display()))?;
    Ok(flatten_root(value))
}

pub fn convert_yaml(path: &Path) -> Result<Extracted> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read YAML file {}", path.display()))?;
    let yaml_value: serde_yaml::Value = serde_yaml::from_str(&raw)
        .with_context(|| format!("invalid YAML payload in {}", path.display()))?;
    let value = serde_json::to_value(yaml_value).context("failed to normalize YAML")?;
    Ok(flatten_root(value))
}

pub fn convert_toml(path: &Path) -> Result<Extracted> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read TOML file {}", path.display()))?;
    let toml_value: toml::Value = toml::from_str(&raw)
        .with_context(|| format!("invalid TOML payload in {}", path.display()))?;
    let value = serde_json::to_value(toml_value).context("failed to normalize TOML")?;
    Ok(flatten_root(value))
}

pub fn convert_ini(path: &Path) -> Result<Extracted> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read INI file {}", path.display()))?;
    let mut parser = Ini::new();
    let sections = parser
        .read(raw)
        .map_err(|e| anyhow!("invalid INI payload in {}: {}", path.display(), e))?;
    let mut root = Map::new();
    for (section, props) in sections {
        let section_name = if section.is_empty() {
            "default".to_string()
        } else {
            section
        };
        let section_map: Map<String, Value> = props
            .into_iter()
            .map(|(key, value)| (key, Value::String(value.unwrap_or_default())))
            .collect();
        root.insert(section_name, Value::Object(section_map));
    }
    // Sections are never document-level fields.
    Ok(Extracted::plain(flatten_text(&Value::Object(root))))
}

/// Top-level scalars become passthrough fields; `category` also steers filtering.
fn flatten_root(value: Value) -> Extracted {
    let mut fields = BTreeMap::new();
    let mut category = None;
    if let Value::Object(map) = &value {
        for (key, item) in map {
            let Some(scalar) = scalar_text(item) else {
                continue;
            };
            if key.eq_ignore_ascii_case(CATEGORY_KEY) {
                let trimmed = scalar.trim().to_lowercase();
                if !trimmed.is_empty() {
                    category = Some(trimmed);
                }
            } else {
                fields.insert(key.clone(), scalar);
            }
        }
    }
    Extracted {
        text: flatten_text(&value),
        fields,
        category,
    }
}

fn flatten_text(value: &Value) -> String {
    let mut lines = Vec::new();
    flatten_value("", value, &mut lines);
    lines.join("\n")
}

fn flatten_value(prefix: &str, value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_value(&path, &map[key.as_str()], out);
            }
        }
        Value::Array(items) => {
            for (idx, item) in items.iter().enumerate() {
                flatten_value(&format!("{prefix}[{idx}]"), item, out);
            }
        }
        Value::Null => {}
        other => {
            let text = scalar_text(other).unwrap_or_default();
            if text.is_empty() {
                return;
            }
            if prefix.is_empty() {
                out.push(text);
            } else {
                out.push(format!("{prefix}: {text}"));
            }
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Bool(v) => Some(v.to_string()),
        Value::Number(num) => Some(num.to_string()),
        Value::String(s) => Some(s.trim().to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    fn write(suffix: &str, body: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        write!(file, "{body}").unwrap();
        file
    }

    #[test]
    fn json_is_flattened_with_fields_and_category() {
        let file = write(
            ".json",
            r#"{"category": "Reference", "brand": "Acme", "tags": ["a", "b"], "meta": {"year": 2024}}"#,
        );
        let out = convert_json(file.path()).unwrap();
        assert_eq!(out.category.as_deref(), Some("reference"));
        assert_eq!(out.fields.get("brand").map(String::as_str), Some("Acme"));
        assert!(!out.fields.contains_key("tags"));
        assert!(out.text.contains("meta.year: 2024"));
        assert!(out.text.contains("tags[1]: b"));
    }

    #[test]
    fn yaml_without_category_keeps_none() {
        let file = write(".yaml", "service:\n  name: demo\n  enabled: true\nowner: ops\n");
        let out = convert_yaml(file.path()).unwrap();
        assert!(out.category.is_none());
        assert!(out.text.contains("service.name: demo"));
        assert_eq!(out.fields.get("owner").map(String::as_str), Some("ops"));
    }

    #[test]
    fn toml_and_ini_are_supported() {
        let file = write(".toml", "[app]\nname = 'demo'\nports = [80, 8080]\n");
        let out = convert_toml(file.path()).unwrap();
        assert!(out.text.contains("app.ports[1]: 8080"));

        let file = write(".ini", "[section]\nkey=value\n");
        let out = convert_ini(file.path()).unwrap();
        assert!(out.text.contains("section.key: value"));
        assert!(out.fields.is_empty());
    }

    #[test]
    fn invalid_json_is_an_error() {
        let file = write(".json", "{ nope");
        assert!(convert_json(file.path()).is_err());
    }
}
