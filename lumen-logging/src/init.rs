use anyhow::Result;
use lumen_config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Filter from an explicit level, else `RUST_LOG`, else `info`
pub fn build_env_filter(log_level: Option<&str>) -> EnvFilter {
    match log_level {
        Some(level) => EnvFilter::try_new(level)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("info")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

/// Initialize logging from configuration
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_env_filter(Some(config.level.as_str()));
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);

    // try_init so a second call (or a test harness subscriber) is not fatal
    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
    };

    if installed.is_err() {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

/// Initialize simple tracing for basic console output
pub fn init_simple_tracing(log_level: &str) -> Result<()> {
    let env_filter = build_env_filter(Some(log_level));

    if tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

/// Initialize tracing for worker processes
///
/// Output goes to stderr; stdout carries IPC frames.
pub fn init_worker_tracing(log_level: Option<&str>) -> Result<()> {
    let env_filter = build_env_filter(log_level);

    if tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    tracing::debug!("Worker tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_config::LogLevel;

    #[test]
    fn test_repeated_initialization_is_harmless() {
        let config = LoggingConfig {
            level: LogLevel::Debug,
            format: LogFormat::Json,
        };
        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&LoggingConfig::default()).is_ok());
        assert!(init_simple_tracing("warn").is_ok());
        assert!(init_worker_tracing(None).is_ok());
    }

    #[test]
    fn test_filter_accepts_directives() {
        let filter = build_env_filter(Some("lumen_execution=trace,info"));
        assert!(filter.to_string().contains("lumen_execution=trace"));
    }
}
