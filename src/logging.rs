use anyhow::Result;
use std::path::Path;
use tracing_appender::non_blocking;
use tracing_subscriber::EnvFilter;

/// Initialize logging for the process.
///
/// Console logging goes to stderr so tables and prompts own stdout; passing
/// a log file adds a non-blocking file writer alongside.
pub fn init_logging(verbose: u8, log_file: Option<&Path>) -> Result<()> {
    let default_filter = if verbose > 0 { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .map_err(|e| anyhow::anyhow!("Failed to create log file: {}", e))?;
            let (file_writer, _file_guard) = non_blocking(file);

            // Store the guard to prevent it from being dropped
            std::mem::forget(_file_guard);

            use tracing_subscriber::fmt::writer::MakeWriterExt;
            let multi_writer = std::io::stderr.and(file_writer);

            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(multi_writer)
                .with_ansi(true)
                .with_target(false)
                .compact()
                .init();

            tracing::info!(log_file = %path.display(), "Logging initialized");
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_ansi(true)
                .with_target(false)
                .compact()
                .init();
        }
    }

    Ok(())
}

/// Log session end
pub fn log_session_end() {
    tracing::info!("Session ended");
}
