//! 日志配置的反序列化与初始化.

use std::time::Duration;

use tempfile::TempDir;
use ying::logging::{self, FileLogConfig, LoggingConfig};

#[test]
fn test_config_defaults_from_json() {
    let config: LoggingConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, LoggingConfig::default());
    assert_eq!(config.level, "info");
    assert!(config.file.is_none());

    let json = r#"{
        "level": "ying_codec=trace,warn",
        "ansi": false,
        "file": { "directory": "logs", "file_prefix": "ying" }
    }"#;
    let config: LoggingConfig = serde_json::from_str(json).unwrap();
    assert!(!config.ansi);
    assert_eq!(
        config.file,
        Some(FileLogConfig {
            directory: "logs".to_string(),
            file_prefix: "ying".to_string(),
            retention_days: 30,
        })
    );
}

#[test]
fn test_config_round_trips_through_json() {
    let config = LoggingConfig::console("debug").with_file("out/logs", "ying-cli");
    let text = serde_json::to_string(&config).unwrap();
    let back: LoggingConfig = serde_json::from_str(&text).unwrap();
    assert_eq!(back, config);
}

/// 全局订阅器只能安装一次, 初始化相关的断言集中在一个测试里
#[test]
fn test_init_writes_bridged_log_records_to_file() {
    let temp_dir = match TempDir::new() {
        Ok(temp_dir) => temp_dir,
        Err(err) => panic!("创建临时目录失败: {}", err),
    };
    let directory = temp_dir.path().join("logs");
    let config = LoggingConfig {
        level: "debug".to_string(),
        ansi: false,
        file: Some(FileLogConfig {
            directory: directory.to_string_lossy().to_string(),
            file_prefix: "ying-test".to_string(),
            retention_days: 7,
        }),
    };
    if std::env::var_os(logging::LOG_ENV).is_some() {
        return;
    }

    let result = logging::init(&config);
    assert!(result.is_ok(), "日志初始化失败: {:?}", result.err());
    assert!(logging::init(&config).is_err(), "重复初始化应当失败");

    // 解码库使用 log 门面, 记录应当经桥接写入文件
    log::warn!("H264: 集成测试日志");
    tracing::info!("tracing 日志");

    let mut content = String::new();
    for _ in 0..50 {
        std::thread::sleep(Duration::from_millis(20));
        content = std::fs::read_dir(&directory)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with("ying-test"))
            .map(|e| std::fs::read_to_string(e.path()).unwrap_or_default())
            .collect();
        if content.contains("tracing 日志") && content.contains("集成测试日志") {
            break;
        }
    }
    assert!(content.contains("H264: 集成测试日志"), "{content}");
    assert!(content.contains("WARN"));
}
