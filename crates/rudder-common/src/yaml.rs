//! YAML parsing on top of yaml-rust2
//!
//! Manifest documents and release configs are parsed into `serde_json::Value`
//! so they can be inspected with JSON pointers or deserialized into typed structs.

use serde_json::{Map, Number, Value};
use yaml_rust2::{Yaml, YamlLoader};

/// Error produced when a YAML document cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YamlError {
    /// Human-readable description
    pub message: String,
    /// Line of the failure, when the scanner reported one
    pub line: Option<usize>,
}

impl YamlError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
        }
    }
}

impl std::fmt::Display for YamlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {}: {}", line, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for YamlError {}

impl From<yaml_rust2::ScanError> for YamlError {
    fn from(e: yaml_rust2::ScanError) -> Self {
        Self {
            message: e.to_string(),
            line: Some(e.marker().line()),
        }
    }
}

/// Parse a YAML string into a serde_json::Value.
///
/// Only the first document is returned; empty or comment-only input yields
/// `Value::Null`.
pub fn parse_yaml(input: &str) -> Result<Value, YamlError> {
    let docs = YamlLoader::load_from_str(input)?;
    docs.into_iter()
        .next()
        .map_or(Ok(Value::Null), yaml_to_json)
}

fn yaml_to_json(yaml: Yaml) -> Result<Value, YamlError> {
    Ok(match yaml {
        Yaml::Null => Value::Null,
        Yaml::Boolean(b) => Value::Bool(b),
        Yaml::Integer(i) => Value::Number(i.into()),
        Yaml::Real(s) => {
            let f: f64 = s
                .parse()
                .map_err(|e: std::num::ParseFloatError| YamlError::new(e.to_string()))?;
            Number::from_f64(f).map_or(Value::Null, Value::Number)
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Array(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Yaml::Hash(hash) => {
            let mut map = Map::with_capacity(hash.len());
            for (k, v) in hash {
                map.insert(key_to_string(k)?, yaml_to_json(v)?);
            }
            Value::Object(map)
        }
        Yaml::Alias(_) => return Err(YamlError::new("YAML aliases not supported")),
        Yaml::BadValue => return Err(YamlError::new("bad YAML value")),
    })
}

fn key_to_string(key: Yaml) -> Result<String, YamlError> {
    match key {
        Yaml::String(s) | Yaml::Real(s) => Ok(s),
        Yaml::Integer(i) => Ok(i.to_string()),
        Yaml::Boolean(b) => Ok(b.to_string()),
        Yaml::Null => Ok("null".to_string()),
        _ => Err(YamlError::new("unsupported YAML key type")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest_head() {
        let yaml = r#"
kind: PersistentVolumeClaim
apiVersion: v1
metadata:
  name: wp4-wordpress
spec:
  accessModes:
    - "ReadWriteOnce"
"#;
        let value = parse_yaml(yaml).unwrap();
        assert_eq!(value["kind"], "PersistentVolumeClaim");
        assert_eq!(value["apiVersion"], "v1");
        assert_eq!(value["metadata"]["name"], "wp4-wordpress");
        assert_eq!(value["spec"]["accessModes"][0], "ReadWriteOnce");
    }

    #[test]
    fn test_parse_empty_is_null() {
        assert_eq!(parse_yaml("").unwrap(), Value::Null);
        assert_eq!(parse_yaml("# only a comment").unwrap(), Value::Null);
    }

    #[test]
    fn test_parse_returns_first_document_only() {
        let value = parse_yaml("kind: Secret\n---\nkind: ConfigMap\n").unwrap();
        assert_eq!(value["kind"], "Secret");
    }

    #[test]
    fn test_parse_invalid_reports_line() {
        let err = parse_yaml("kind: Secret\nmetadata: {name: [broken\n").unwrap_err();
        assert!(err.line.is_some());
        assert!(err.to_string().starts_with("line "));
    }

    #[test]
    fn test_scalar_types() {
        let value = parse_yaml("replicas: 3\nratio: 1.5\nenabled: true\nnothing: null").unwrap();
        assert_eq!(value["replicas"], 3);
        assert!((value["ratio"].as_f64().unwrap() - 1.5).abs() < 0.0001);
        assert_eq!(value["enabled"], true);
        assert!(value["nothing"].is_null());
    }

    #[test]
    fn test_deserialize_release_config() {
        use serde::Deserialize;

        #[derive(Deserialize, Debug, PartialEq)]
        struct Rule {
            from: String,
            to: String,
        }

        #[derive(Deserialize, Debug, PartialEq)]
        struct Config {
            replace: Vec<Rule>,
        }

        let value = parse_yaml("replace:\n  - from: a\n    to: b\n").unwrap();
        let config: Config = serde_json::from_value(value).unwrap();
        assert_eq!(
            config.replace,
            vec![Rule {
                from: "a".to_string(),
                to: "b".to_string()
            }]
        );
    }
}
