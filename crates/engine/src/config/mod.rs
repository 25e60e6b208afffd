//! Configuration loading and resolution.

use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::error::ConfigError;

pub mod resolver;
pub mod settings;

pub use resolver::{ConfigOverrides, ResolvedConfig, SAMPLE_PLACEHOLDER, ensure_directories, resolve};
pub use settings::{GenomeSettings, InputSettings, OutputLayout, PipelineParameters, PipelineSteps, StepSettings};

/// Load a configuration document from YAML or JSON.
///
/// `.json` files are parsed as JSON; everything else (`.yaml`, `.yml`, or no extension)
/// is parsed as YAML, which also accepts JSON documents.
pub fn load_config_file(path: impl AsRef<Path>) -> Result<Value, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let is_json = path
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case("json"));
    let parsed = if is_json {
        serde_json::from_str::<Value>(&content).map_err(|error| error.to_string())
    } else {
        serde_yaml::from_str::<Value>(&content).map_err(|error| error.to_string())
    };
    parsed.map_err(|message| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn loads_yaml_preserving_backend_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            r#"
input:
  fastq_dir: data/raw
aligners:
  salmon:
    index: refs/salmon
  hisat2:
    index_prefix: refs/hisat2/genome
"#,
        )
        .unwrap();

        let value = load_config_file(&path).unwrap();
        let names: Vec<&str> = value["aligners"].as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(names, vec!["salmon", "hisat2"]);
        assert_eq!(value["input"]["fastq_dir"], json!("data/raw"));
    }

    #[test]
    fn loads_json_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "parameters": { "threads": 2 } }"#).unwrap();
        assert_eq!(load_config_file(&path).unwrap()["parameters"]["threads"], json!(2));
    }

    #[test]
    fn reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        let error = load_config_file(&path).unwrap_err();
        assert!(matches!(&error, ConfigError::Parse { path: reported, .. } if reported == &path));
    }

    #[test]
    fn missing_file_is_io_error() {
        let error = load_config_file("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(error, ConfigError::Io { .. }));
    }
}
