//! `aqc`: run audio QC over local files.
//!
//! Prints one response envelope per file as a JSON line, in argument order,
//! followed by the health report.

mod args;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use aqc_core::{handle_upload, load_config, ApiResponse, AppConfig, QcEngine};
use tracing::{info, warn};

use crate::args::{parse_args, Parsed, USAGE};

fn init_logging(fallback: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Config plus a label naming its source. Runs before the subscriber exists,
/// so the caller logs the label after `init_logging`.
fn load_host_config(path: Option<&Path>) -> anyhow::Result<(AppConfig, String)> {
    match path {
        Some(path) => {
            let config =
                load_config(path).with_context(|| format!("loading {}", path.display()))?;
            Ok((config, path.display().to_string()))
        }
        None => Ok((AppConfig::default(), "built-in defaults".to_owned())),
    }
}

async fn qc_file(engine: &QcEngine, path: &Path) -> anyhow::Result<ApiResponse> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
    Ok(handle_upload(engine, name.as_deref(), file).await)
}

fn main() -> anyhow::Result<()> {
    let cli = match parse_args(std::env::args().skip(1))? {
        Parsed::Help => {
            println!("{USAGE}");
            return Ok(());
        }
        Parsed::Run(cli) => cli,
    };

    let (config, source) = load_host_config(cli.config.as_deref())?;
    init_logging(&config.server.log_level);
    info!(
        version = %config.server.version,
        config = %source,
        files = cli.files.len(),
        "aqc starting"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(config.server.threadpool_workers)
        .thread_name("aqc-rt")
        .build()
        .context("building tokio runtime")?;

    let engine = Arc::new(QcEngine::builder(config).build().context("building qc engine")?);

    let responses = runtime.block_on(async {
        let tasks: Vec<_> = cli
            .files
            .iter()
            .cloned()
            .map(|path| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { qc_file(&engine, &path).await })
            })
            .collect();

        let mut out = Vec::with_capacity(tasks.len());
        for (task, path) in tasks.into_iter().zip(&cli.files) {
            match task.await {
                Ok(Ok(resp)) => out.push(resp),
                Ok(Err(e)) => warn!(file = %path.display(), error = %e, "skipped"),
                Err(e) => warn!(file = %path.display(), error = %e, "qc task failed"),
            }
        }
        out
    });

    for resp in &responses {
        println!("{}", serde_json::to_string(resp)?);
    }
    println!("{}", serde_json::to_string(&engine.health())?);

    engine.shutdown();
    info!("aqc finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_config_given() {
        let (config, source) = load_host_config(None).expect("defaults");
        assert_eq!(source, "built-in defaults");
        assert_eq!(config.server.infer_concurrency, 1);
    }

    #[test]
    fn config_file_is_loaded_and_named() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("qc.toml");
        std::fs::write(&path, "[server]\nlog_level = \"debug\"\ninfer_concurrency = 3\n")
            .expect("write config");

        let (config, source) = load_host_config(Some(&path)).expect("load");
        assert_eq!(source, path.display().to_string());
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.server.infer_concurrency, 3);
    }

    #[test]
    fn bad_config_names_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[server]\nthreadpool_workers = 0\n").expect("write config");

        let err = load_host_config(Some(&path)).expect_err("invalid config");
        assert!(format!("{err:#}").contains("broken.toml"), "{err:#}");
    }
}
