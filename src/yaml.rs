//! YAML parsing utilities using yaml-rust2
//!
//! Catalog documents and rendered add-on manifests arrive as YAML. This module
//! bridges yaml-rust2 into `serde_json::Value` so the rest of the pipeline can
//! use typed serde deserialization, and serializes object lists back into
//! multi-document YAML for the apply engine.

use serde_json::{Map, Number, Value};
use yaml_rust2::{Yaml, YamlLoader};

/// Error type for YAML parsing
#[derive(Debug, Clone)]
pub struct YamlError(String);

impl std::fmt::Display for YamlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for YamlError {}

/// Parse a YAML string into a serde_json::Value.
///
/// For multi-document YAML, returns only the first document.
/// Returns `Value::Null` for empty input.
pub fn parse_yaml(input: &str) -> Result<Value, YamlError> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| YamlError(e.to_string()))?;
    match docs.into_iter().next() {
        Some(doc) => yaml_to_json(doc),
        None => Ok(Value::Null),
    }
}

/// Parse a multi-document YAML string into a Vec of serde_json::Values.
///
/// Each YAML document separated by `---` becomes a separate Value.
/// Empty documents come back as `Value::Null`; manifest handling skips them.
pub fn parse_yaml_multi(input: &str) -> Result<Vec<Value>, YamlError> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| YamlError(e.to_string()))?;
    docs.into_iter().map(yaml_to_json).collect()
}

/// Serialize a list of objects back into a multi-document YAML string.
///
/// Documents are separated by `---` lines, the format the apply engine and
/// kubectl both accept.
pub fn to_yaml_multi(objects: &[Value]) -> Result<String, YamlError> {
    let mut out = String::new();
    for (i, object) in objects.iter().enumerate() {
        if i > 0 {
            out.push_str("---\n");
        }
        let doc = serde_yaml::to_string(object).map_err(|e| YamlError(e.to_string()))?;
        out.push_str(&doc);
    }
    Ok(out)
}

/// Convert a yaml_rust2::Yaml value to serde_json::Value
fn yaml_to_json(yaml: Yaml) -> Result<Value, YamlError> {
    match yaml {
        Yaml::Null => Ok(Value::Null),
        Yaml::Boolean(b) => Ok(Value::Bool(b)),
        Yaml::Integer(i) => Ok(Value::Number(i.into())),
        Yaml::Real(s) => {
            let f: f64 = s
                .parse()
                .map_err(|e: std::num::ParseFloatError| YamlError(e.to_string()))?;
            Ok(Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null))
        }
        Yaml::String(s) => Ok(Value::String(s)),
        Yaml::Array(arr) => arr
            .into_iter()
            .map(yaml_to_json)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Yaml::Hash(map) => map
            .into_iter()
            .map(|(k, v)| {
                let key = match k {
                    Yaml::String(s) => s,
                    Yaml::Integer(i) => i.to_string(),
                    Yaml::Real(r) => r,
                    Yaml::Boolean(b) => b.to_string(),
                    Yaml::Null => "null".to_string(),
                    _ => return Err(YamlError("unsupported YAML key type".to_string())),
                };
                yaml_to_json(v).map(|v| (key, v))
            })
            .collect::<Result<Map<String, Value>, _>>()
            .map(Value::Object),
        Yaml::Alias(_) => Err(YamlError("YAML aliases not supported".to_string())),
        Yaml::BadValue => Err(YamlError("bad YAML value".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml_simple() {
        let yaml = "name: coredns\nversion: 1.9.3";
        let result = parse_yaml(yaml).unwrap();
        assert_eq!(result["name"], "coredns");
        assert_eq!(result["version"], "1.9.3");
    }

    #[test]
    fn test_parse_yaml_kubernetes_manifest() {
        let yaml = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: dns-controller
  namespace: kube-system
spec:
  replicas: 1
  selector:
    matchLabels:
      k8s-app: dns-controller
"#;
        let result = parse_yaml(yaml).unwrap();
        assert_eq!(result["apiVersion"], "apps/v1");
        assert_eq!(result["kind"], "Deployment");
        assert_eq!(result["metadata"]["name"], "dns-controller");
        assert_eq!(result["spec"]["replicas"], 1);
    }

    #[test]
    fn test_parse_yaml_multi_doc() {
        let yaml = r#"
kind: ServiceAccount
---
kind: Deployment
---
kind: Service
"#;
        let results = parse_yaml_multi(yaml).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0]["kind"], "ServiceAccount");
        assert_eq!(results[2]["kind"], "Service");
    }

    #[test]
    fn test_parse_yaml_empty() {
        let result = parse_yaml("").unwrap();
        assert_eq!(result, Value::Null);
    }

    #[test]
    fn test_parse_yaml_invalid() {
        let result = parse_yaml("not: valid: yaml: {{");
        assert!(result.is_err());
    }

    #[test]
    fn test_to_yaml_multi_round_trip() {
        let yaml = "kind: ServiceAccount\nmetadata:\n  name: a\n---\nkind: Service\nmetadata:\n  name: b\n";
        let objects = parse_yaml_multi(yaml).unwrap();
        let out = to_yaml_multi(&objects).unwrap();
        let reparsed = parse_yaml_multi(&out).unwrap();
        assert_eq!(objects, reparsed);
    }

    #[test]
    fn test_to_yaml_multi_single_document_has_no_separator() {
        let objects = vec![serde_json::json!({"kind": "Namespace"})];
        let out = to_yaml_multi(&objects).unwrap();
        assert!(!out.contains("---"));
        assert!(out.contains("kind: Namespace"));
    }

    #[test]
    fn test_deserialize_to_typed() {
        use serde::Deserialize;

        #[derive(Deserialize, Debug, PartialEq)]
        struct Record {
            name: String,
            version: String,
        }

        let yaml = "name: coredns\nversion: 1.9.3";
        let value = parse_yaml(yaml).unwrap();
        let record: Record = serde_json::from_value(value).unwrap();
        assert_eq!(record.name, "coredns");
        assert_eq!(record.version, "1.9.3");
    }
}
