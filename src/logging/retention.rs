use anyhow::Result;
use chrono::{Duration as ChronoDuration, Local, NaiveDate};
use std::fs;
use std::path::Path;

/// 删除早于保留期的历史日志文件
///
/// 只处理 `{prefix}.{date}.log` 形式的文件, 其它文件原样保留.
pub(super) fn cleanup_logs(directory: &Path, prefix: &str, retention_days: i64) -> Result<()> {
    if !directory.exists() {
        return Ok(());
    }
    let today = Local::now().date_naive();
    cleanup_before(directory, prefix, today - ChronoDuration::days(retention_days))
}

fn cleanup_before(directory: &Path, prefix: &str, cutoff: NaiveDate) -> Result<()> {
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().to_string();
        let Some(date) = parse_log_name(&file_name, prefix) else {
            continue;
        };
        if date < cutoff {
            let _ = fs::remove_file(entry.path());
        }
    }
    Ok(())
}

fn parse_log_name(file_name: &str, prefix: &str) -> Option<NaiveDate> {
    let with_prefix = file_name.strip_prefix(prefix)?;
    let with_dot = with_prefix.strip_prefix('.')?;
    let date_part = with_dot.strip_suffix(".log")?;
    if date_part.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}
