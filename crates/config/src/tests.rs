#[cfg(test)]
mod loading_tests {
    use crate::{AppConfig, DispatchStrategyKind, LogFormat};

    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("scheduler.toml");
        fs::write(
            &config_path,
            r#"
[dispatcher]
max_jobs_per_tick = 50
dispatch_strategy = "round_robin"

[observability]
log_format = "json"
"#,
        )
        .unwrap();

        let config = AppConfig::load(config_path.to_str()).unwrap();
        assert_eq!(config.dispatcher.max_jobs_per_tick, 50);
        assert_eq!(
            config.dispatcher.dispatch_strategy,
            DispatchStrategyKind::RoundRobin
        );
        assert_eq!(config.observability.log_format, LogFormat::Json);
        // 未出现在文件中的字段保持默认值
        assert_eq!(config.health_monitor.sweep_interval_seconds, 30);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.toml");
        assert!(AppConfig::load(missing.to_str()).is_err());
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("scheduler.toml");
        fs::write(
            &config_path,
            r#"
[health_monitor]
heartbeat_timeout_seconds = 0
"#,
        )
        .unwrap();

        assert!(AppConfig::load(config_path.to_str()).is_err());
    }

    #[test]
    fn test_environment_overrides_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("scheduler.toml");
        fs::write(
            &config_path,
            r#"
[retry]
default_max_attempts = 4
"#,
        )
        .unwrap();

        std::env::set_var("SCHEDULER_RETRY__DEFAULT_MAX_ATTEMPTS", "7");
        let config = AppConfig::load(config_path.to_str());
        std::env::remove_var("SCHEDULER_RETRY__DEFAULT_MAX_ATTEMPTS");

        assert_eq!(config.unwrap().retry.default_max_attempts, 7);
    }
}
