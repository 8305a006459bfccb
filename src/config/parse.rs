use super::types::*;
use crate::config::{expand_env_vars, expand_tilde, unexpanded_env_vars};
use chrono::FixedOffset;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })
}

/// Parse and validate a config from YAML text.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml)?;

    let mut config: Config = serde_yaml::from_str(&yaml)?;
    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

fn check_unexpanded_vars(yaml: &str) -> Result<(), ConfigError> {
    let names = unexpanded_env_vars(yaml);
    match names.len() {
        0 => Ok(()),
        1 => Err(ConfigError::Validation(format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=...\n\
             2. Replace $env{{{0}}} in the config file with an actual value",
            names[0]
        ))),
        _ => Err(ConfigError::Validation(format!(
            "Environment variables are not set: {}",
            names.join(", ")
        ))),
    }
}

fn expand_paths(config: &mut Config) {
    config.catalog.root = expand_tilde(&config.catalog.root);
    config.storage.path = expand_tilde(&config.storage.path);
    if let Some(dir) = config.results.export_dir.as_mut() {
        *dir = expand_tilde(dir);
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.catalog.extensions.is_empty() {
        errors.push("catalog.extensions must list at least one extension".to_string());
    }
    if config.catalog.cache_entries == 0 {
        errors.push("catalog.cache_entries must be at least 1".to_string());
    }

    validate_assignment(&config.assignment, &mut errors);
    validate_storage(&config.storage, &mut errors);

    if let Some(offset) = &config.results.utc_offset {
        if offset.parse::<FixedOffset>().is_err() {
            errors.push(format!(
                "results.utc_offset '{}' is not a valid offset (expected e.g. +01:00)",
                offset
            ));
        }
    }

    if config.web.listen.trim().is_empty() {
        errors.push("web.listen cannot be empty".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_assignment(assignment: &AssignmentConfig, errors: &mut Vec<String>) {
    if assignment.users_per_group == 0 {
        errors.push("assignment.users_per_group must be at least 1".to_string());
    }
    if assignment.target_per_dataset == 0 {
        errors.push("assignment.target_per_dataset must be at least 1".to_string());
    }
    if assignment.batch_size == Some(0) {
        errors.push("assignment.batch_size must be at least 1 when set".to_string());
    }
}

fn validate_storage(storage: &StorageConfig, errors: &mut Vec<String>) {
    for (field, name) in [
        ("batches_table", &storage.batches_table),
        ("results_table", &storage.results_table),
    ] {
        if name.trim().is_empty() {
            errors.push(format!("storage.{} cannot be empty", field));
        }
    }
    if storage.batches_table == storage.results_table {
        errors.push(format!(
            "storage.batches_table and storage.results_table must differ (both '{}')",
            storage.batches_table
        ));
    }

    if storage.submit_strategies.is_empty() {
        errors.push("storage.submit_strategies must list at least one strategy".to_string());
    }
    let mut seen = HashSet::new();
    for strategy in &storage.submit_strategies {
        if !seen.insert(*strategy) {
            errors.push(format!(
                "storage.submit_strategies lists '{}' more than once",
                strategy.as_str()
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
catalog:
  root: /srv/polyps
storage:
  path: /var/lib/imgrate/imgrate.duckdb
web:
  listen: 127.0.0.1:7104
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.assignment.users_per_group, 3);
        assert_eq!(config.assignment.target_per_dataset, 3);
        assert_eq!(config.assignment.batch_size, None);
        assert_eq!(config.storage.batches_table, "batches");
        assert_eq!(config.storage.results_table, "results");
        assert_eq!(
            config.storage.submit_strategies,
            vec![SubmitStrategy::AppendRows, SubmitStrategy::OverwriteAll]
        );
        assert_eq!(config.catalog.cache_entries, 64);
        assert_eq!(config.guidelines.len(), 5);
        assert_eq!(config.results.offset().local_minus_utc(), 0);
    }

    #[test]
    fn test_collects_all_validation_errors() {
        let yaml = r#"
catalog:
  root: /srv/polyps
  extensions: []
assignment:
  users_per_group: 0
  target_per_dataset: 0
storage:
  path: /tmp/db
  submit_strategies: [append_rows, append_rows]
results:
  utc_offset: "not-an-offset"
web:
  listen: ""
"#;
        match parse_config(yaml) {
            Err(ConfigError::ValidationList(errors)) => {
                assert_eq!(errors.len(), 6, "unexpected errors: {:?}", errors);
                assert!(errors.iter().any(|e| e.contains("users_per_group")));
                assert!(errors.iter().any(|e| e.contains("utc_offset")));
                assert!(errors.iter().any(|e| e.contains("more than once")));
            }
            other => panic!("expected validation list, got {:?}", other),
        }
    }

    #[test]
    fn test_offset_is_parsed() {
        let yaml = format!("{}results:\n  utc_offset: \"+02:00\"\n", MINIMAL);
        let config = parse_config(&yaml).unwrap();
        assert_eq!(config.results.offset().local_minus_utc(), 7200);
    }

    #[test]
    fn test_unset_env_var_is_reported() {
        let yaml = MINIMAL.replace("/srv/polyps", "$env{IMGRATE_SURELY_UNSET_ROOT}");
        match parse_config(&yaml) {
            Err(ConfigError::Validation(msg)) => {
                assert!(msg.contains("IMGRATE_SURELY_UNSET_ROOT"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_same_table_names_rejected() {
        let yaml = MINIMAL.replace(
            "  path: /var/lib/imgrate/imgrate.duckdb",
            "  path: /var/lib/imgrate/imgrate.duckdb\n  batches_table: data\n  results_table: data",
        );
        assert!(matches!(parse_config(&yaml), Err(ConfigError::ValidationList(_))));
    }
}
