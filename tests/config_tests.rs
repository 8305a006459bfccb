use imgrate::config::{generate::generate_starter_config, load_config, ConfigError, SubmitStrategy};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_generated_config_is_valid() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    let config_content = generate_starter_config();
    fs::write(&config_path, config_content).unwrap();

    let config = load_config(&config_path).expect("Generated config should be valid");

    assert_eq!(config.assignment.users_per_group, 3);
    assert_eq!(config.assignment.target_per_dataset, 3);
    assert_eq!(config.assignment.batch_size, None);
    assert_eq!(config.storage.batches_table, "batches");
    assert_eq!(config.storage.results_table, "results");
    assert_eq!(
        config.storage.submit_strategies,
        vec![SubmitStrategy::AppendRows, SubmitStrategy::OverwriteAll]
    );
    assert_eq!(config.results.offset().local_minus_utc(), 3600);
    assert_eq!(config.guidelines.len(), 5);
    assert_eq!(config.web.listen, "127.0.0.1:7104");
    // Tilde paths are expanded
    assert!(!config.catalog.root.starts_with("~"));
    assert!(!config.storage.path.starts_with("~"));
}

#[test]
fn test_env_var_reference_in_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");
    std::env::set_var("IMGRATE_IT_DATA", "/data/frames");

    let config_yaml = r#"
catalog:
  root: $env{IMGRATE_IT_DATA}
storage:
  path: /tmp/imgrate-it.duckdb
web:
  listen: 127.0.0.1:0
"#;
    fs::write(&config_path, config_yaml).unwrap();

    let config = load_config(&config_path).unwrap();
    assert_eq!(config.catalog.root.to_str(), Some("/data/frames"));
    assert_eq!(config.catalog.cache_entries, 64);
    std::env::remove_var("IMGRATE_IT_DATA");
}

#[test]
fn test_unset_env_var_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    let config_yaml = r#"
catalog:
  root: $env{IMGRATE_IT_SURELY_UNSET}
storage:
  path: /tmp/x.duckdb
web:
  listen: 127.0.0.1:0
"#;
    fs::write(&config_path, config_yaml).unwrap();

    let err = load_config(&config_path).unwrap_err();
    assert!(err.to_string().contains("IMGRATE_IT_SURELY_UNSET"));
}

#[test]
fn test_invalid_strategy_name_fails_to_parse() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    let config_yaml = r#"
catalog:
  root: /tmp
storage:
  path: /tmp/x.duckdb
  submit_strategies: [append_rows, carrier_pigeon]
web:
  listen: 127.0.0.1:0
"#;
    fs::write(&config_path, config_yaml).unwrap();

    assert!(load_config(&config_path).is_err());
}

#[test]
fn test_duplicate_strategies_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    let config_yaml = r#"
catalog:
  root: /tmp
storage:
  path: /tmp/x.duckdb
  submit_strategies: [overwrite_all, overwrite_all]
web:
  listen: 127.0.0.1:0
"#;
    fs::write(&config_path, config_yaml).unwrap();

    match load_config(&config_path) {
        Err(ConfigError::ValidationList(errors)) => {
            assert_eq!(errors.len(), 1);
            assert!(errors[0].contains("overwrite_all"));
        }
        other => panic!("expected validation errors, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_missing_file() {
    let temp_dir = TempDir::new().unwrap();
    let err = load_config(&temp_dir.path().join("absent.yml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}
