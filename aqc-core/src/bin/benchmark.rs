//! In-process load benchmark: runs every audio file in a directory through
//! the QC engine with bounded concurrency and reports latency percentiles
//! plus per-status counts as JSON.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use aqc_core::intake::new_request_id;
use aqc_core::{load_config, AppConfig, QcEngine};
use serde::Serialize;
use tokio::sync::Semaphore;

#[derive(Debug)]
struct Args {
    fixtures_dir: PathBuf,
    concurrency: usize,
    iterations: usize,
    config: Option<PathBuf>,
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
struct CaseResult {
    file: String,
    iteration: usize,
    latency_ms: f64,
    status_code: u16,
}

#[derive(Debug, Serialize)]
struct Summary {
    fixtures_dir: String,
    concurrency: usize,
    iterations: usize,
    count: usize,
    wall_ms: f64,
    avg_latency_ms: f64,
    p50_latency_ms: f64,
    p90_latency_ms: f64,
    p99_latency_ms: f64,
    status_counts: BTreeMap<u16, usize>,
    cases: Vec<CaseResult>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("benchmark failed: {e}");
        std::process::exit(1);
    }
}

fn parse_args() -> Result<Args, String> {
    let mut fixtures_dir: Option<PathBuf> = None;
    let mut concurrency: usize = 4;
    let mut iterations: usize = 1;
    let mut config: Option<PathBuf> = None;
    let mut output: Option<PathBuf> = None;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        let mut value = |flag: &str| it.next().ok_or_else(|| format!("missing value for {flag}"));
        match arg.as_str() {
            "--fixtures-dir" => fixtures_dir = Some(PathBuf::from(value("--fixtures-dir")?)),
            "--concurrency" => {
                concurrency = value("--concurrency")?
                    .parse::<usize>()
                    .map_err(|_| "invalid value for --concurrency".to_string())?
                    .max(1);
            }
            "--iterations" => {
                iterations = value("--iterations")?
                    .parse::<usize>()
                    .map_err(|_| "invalid value for --iterations".to_string())?
                    .clamp(1, 100);
            }
            "--config" => config = Some(PathBuf::from(value("--config")?)),
            "--output" => output = Some(PathBuf::from(value("--output")?)),
            "--help" | "-h" => {
                println!(
                    "Usage: cargo run -p aqc-core --bin benchmark -- \\
  --fixtures-dir <dir> [--concurrency <n>] [--iterations <n>] [--config <file.toml>] [--output <file.json>]"
                );
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    Ok(Args {
        fixtures_dir: fixtures_dir.unwrap_or_else(|| PathBuf::from("benchmarks/fixtures")),
        concurrency,
        iterations,
        config,
        output,
    })
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), String> {
    let entries = std::fs::read_dir(dir).map_err(|e| format!("{}: {e}", dir.display()))?;
    for entry in entries {
        let path = entry.map_err(|e| e.to_string())?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| ["wav", "mp3", "m4a", "flac", "ogg", "aac"].contains(&e.to_ascii_lowercase().as_str()))
        {
            out.push(path);
        }
    }
    Ok(())
}

/// Nearest-rank on the sorted sample: `round(p · (n-1))`.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p.clamp(0.0, 1.0)).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn run() -> Result<(), String> {
    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => load_config(path).map_err(|e| e.to_string())?,
        None => AppConfig::default(),
    };

    let mut files = Vec::new();
    collect_files(&args.fixtures_dir, &mut files)?;
    files.sort();
    if files.is_empty() {
        return Err(format!("no audio files under {}", args.fixtures_dir.display()));
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(config.server.threadpool_workers)
        .build()
        .map_err(|e| e.to_string())?;

    let engine = Arc::new(QcEngine::builder(config).build().map_err(|e| e.to_string())?);

    let (wall_ms, mut cases) = runtime.block_on(async {
        let limit = Arc::new(Semaphore::new(args.concurrency));
        let started = Instant::now();
        let mut handles = Vec::new();

        for iteration in 0..args.iterations {
            for file in &files {
                let engine = Arc::clone(&engine);
                let limit = Arc::clone(&limit);
                let file = file.clone();
                handles.push(tokio::spawn(async move {
                    let _slot = limit.acquire_owned().await.ok()?;
                    let size = tokio::fs::metadata(&file).await.ok()?.len();
                    let t0 = Instant::now();
                    let resp = engine.process(&new_request_id(), &file, size).await;
                    Some(CaseResult {
                        file: file.display().to_string(),
                        iteration,
                        latency_ms: t0.elapsed().as_secs_f64() * 1000.0,
                        status_code: resp.status_code,
                    })
                }));
            }
        }

        let mut cases = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Ok(Some(case)) = handle.await {
                cases.push(case);
            }
        }
        (started.elapsed().as_secs_f64() * 1000.0, cases)
    });
    engine.shutdown();

    cases.sort_by(|a, b| a.file.cmp(&b.file).then(a.iteration.cmp(&b.iteration)));
    let mut latencies: Vec<f64> = cases.iter().map(|c| c.latency_ms).collect();
    latencies.sort_by(|a, b| a.total_cmp(b));
    let mut status_counts = BTreeMap::new();
    for case in &cases {
        *status_counts.entry(case.status_code).or_insert(0) += 1;
    }

    let summary = Summary {
        fixtures_dir: args.fixtures_dir.display().to_string(),
        concurrency: args.concurrency,
        iterations: args.iterations,
        count: cases.len(),
        wall_ms,
        avg_latency_ms: if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        },
        p50_latency_ms: percentile(&latencies, 0.50),
        p90_latency_ms: percentile(&latencies, 0.90),
        p99_latency_ms: percentile(&latencies, 0.99),
        status_counts,
        cases,
    };

    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    println!("{json}");
    if let Some(out) = args.output {
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        std::fs::write(&out, json).map_err(|e| e.to_string())?;
    }
    Ok(())
}
