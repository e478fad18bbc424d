use anyhow::Result;
use std::fs;
use std::path::Path;

/// Routes the `log` facade to stdout and to `<log_dir>/<app_name>_<timestamp>.log`.
///
/// Older log files of the same application are removed first, keeping the
/// most recent one.
pub fn setup_logging(log_dir: &Path, log_level: &str, app_name: &str) -> Result<()> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)?;
    }

    cleanup_old_logs(log_dir, app_name)?;

    let log_file_name = format!(
        "{}_{}.log",
        app_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = log_dir.join(log_file_name);

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(parse_level(log_level))
        .chain(std::io::stdout())
        .chain(fern::log_file(log_path)?)
        .apply()?;

    Ok(())
}

pub fn parse_level(log_level: &str) -> log::LevelFilter {
    match log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        "off" => log::LevelFilter::Off,
        _ => log::LevelFilter::Info,
    }
}

/// Deletes all `<app_name>_*.log` files but the newest.
///
/// File names carry a sortable timestamp, so the newest is the greatest name.
pub fn cleanup_old_logs(log_dir: &Path, app_name: &str) -> Result<()> {
    let prefix = format!("{}_", app_name);
    let mut entries: Vec<_> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.starts_with(&prefix) && name.ends_with(".log")
        })
        .collect();

    entries.sort_by_key(|e| std::cmp::Reverse(e.file_name()));

    for entry in entries.iter().skip(1) {
        if let Err(e) = fs::remove_file(entry.path()) {
            eprintln!("Failed to delete old log file {:?}: {}", entry.path(), e);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_newest_log_of_the_app_only() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "mirror_2024-01-01_00-00-00.log",
            "mirror_2025-03-01_12-00-00.log",
            "other_2020-01-01_00-00-00.log",
            "mirror_notes.txt",
        ] {
            fs::write(dir.path().join(name), "x").unwrap();
        }

        cleanup_old_logs(dir.path(), "mirror").unwrap();

        let mut left: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(
            left,
            vec![
                "mirror_2025-03-01_12-00-00.log",
                "mirror_notes.txt",
                "other_2020-01-01_00-00-00.log"
            ]
        );
    }

    #[test]
    fn unknown_level_defaults_to_info() {
        assert_eq!(parse_level("DEBUG"), log::LevelFilter::Debug);
        assert_eq!(parse_level("fatal"), log::LevelFilter::Info);
    }
}
