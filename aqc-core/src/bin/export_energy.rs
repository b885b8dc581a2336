//! Per-frame energy export used to calibrate the clarity references
//! (`hf_ref`, `flat_ref`).
//!
//! Decodes one file to 16 kHz mono, walks the clarity STFT frame by frame and
//! writes `<stem>.energy.csv` (one row per frame) plus `<stem>.summary.json`.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use aqc_core::audio::read_wav;
use aqc_core::metrics::{rms_dbfs, ClarityConfig, ClarityScorer, FrameEnergy, EPS};
use aqc_core::{AudioBuffer, AudioDecoder, FfmpegDecoder};
use serde::Serialize;

const CSV_HEADER: &str = "t_sec,e_0_8k,e_3_8k,hf_ratio,rms_dbfs";

#[derive(Debug)]
struct Args {
    input: PathBuf,
    out_dir: PathBuf,
    clarity: ClarityConfig,
    ffmpeg: String,
}

#[derive(Debug, Serialize)]
struct StftInfo {
    win_ms: u32,
    hop_ms: u32,
    nperseg: usize,
    hop_samples: usize,
    noverlap: usize,
    n_frames: usize,
}

#[derive(Debug, Serialize)]
struct Bands {
    base_band_hz: [f64; 2],
    hf_band_hz: [f64; 2],
}

#[derive(Debug, Serialize)]
struct EnergyStats {
    total_e_0_8k: f64,
    total_e_3_8k: f64,
    hf_ratio_total: f64,
    hf_ratio_p50: f64,
    hf_ratio_p90: f64,
    rms_dbfs_p50: f64,
    rms_dbfs_p90: f64,
}

#[derive(Debug, Serialize)]
struct Summary {
    sr: u32,
    duration_sec: f64,
    stft: StftInfo,
    bands: Bands,
    energy: EnergyStats,
}

#[derive(Debug, Clone, Copy)]
struct FrameRow {
    t_sec: f64,
    e_base: f64,
    e_hf: f64,
    hf_ratio: f64,
    rms_dbfs: f64,
}

impl FrameRow {
    fn from_frame(frame: &FrameEnergy, x: &[f32], window: usize, sample_rate: u32) -> Self {
        let end = (frame.start + window).min(x.len());
        Self {
            t_sec: (frame.start as f64 + window as f64 / 2.0) / f64::from(sample_rate),
            e_base: frame.base,
            e_hf: frame.band,
            hf_ratio: frame.band / (frame.base + EPS),
            rms_dbfs: rms_dbfs(&x[frame.start..end]),
        }
    }

    fn to_csv(self) -> String {
        format!(
            "{:.6},{:.10e},{:.10e},{:.6},{:.3}",
            self.t_sec, self.e_base, self.e_hf, self.hf_ratio, self.rms_dbfs
        )
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("export_energy failed: {e}");
        std::process::exit(1);
    }
}

fn parse_args() -> Result<Args, String> {
    let mut input: Option<PathBuf> = None;
    let mut out_dir = PathBuf::from("energy_out");
    let mut clarity = ClarityConfig::default();
    let mut ffmpeg = "ffmpeg".to_owned();

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        let mut value = |flag: &str| it.next().ok_or_else(|| format!("missing value for {flag}"));
        match arg.as_str() {
            "--in" => input = Some(PathBuf::from(value("--in")?)),
            "--out-dir" => out_dir = PathBuf::from(value("--out-dir")?),
            "--win-ms" => {
                clarity.win_ms = value("--win-ms")?
                    .parse::<u32>()
                    .map_err(|_| "invalid value for --win-ms".to_string())?
                    .max(1);
            }
            "--hop-ms" => {
                clarity.hop_ms = value("--hop-ms")?
                    .parse::<u32>()
                    .map_err(|_| "invalid value for --hop-ms".to_string())?
                    .max(1);
            }
            "--hf-lo" => {
                clarity.hf_lo_hz = value("--hf-lo")?
                    .parse::<f64>()
                    .map_err(|_| "invalid value for --hf-lo".to_string())?;
            }
            "--hf-hi" => {
                clarity.hf_hi_hz = value("--hf-hi")?
                    .parse::<f64>()
                    .map_err(|_| "invalid value for --hf-hi".to_string())?;
            }
            "--ffmpeg" => ffmpeg = value("--ffmpeg")?,
            "--help" | "-h" => {
                println!(
                    "Usage: cargo run -p aqc-core --bin export_energy -- \\
  --in <audio> [--out-dir <dir>] [--win-ms <n>] [--hop-ms <n>] [--hf-lo <hz>] [--hf-hi <hz>] [--ffmpeg <program>]"
                );
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    Ok(Args {
        input: input.ok_or_else(|| "--in is required".to_string())?,
        out_dir,
        clarity,
        ffmpeg,
    })
}

/// Linear interpolation between order statistics of a sorted sample.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (sorted.len() - 1) as f64 * p.clamp(0.0, 1.0);
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

fn export(audio: &AudioBuffer, clarity: &ClarityConfig, out_csv: &Path) -> Result<Summary, String> {
    let scorer = ClarityScorer::new(clarity.clone());
    let frames = scorer.frame_energies(audio);
    let (window, hop, (lo_hz, hi_hz)) = (frames.window(), frames.hop(), frames.band_hz());
    let sr = audio.sample_rate();

    let file = std::fs::File::create(out_csv).map_err(|e| format!("{}: {e}", out_csv.display()))?;
    let mut csv = BufWriter::new(file);
    writeln!(csv, "{CSV_HEADER}").map_err(|e| e.to_string())?;

    let (mut total_base, mut total_hf) = (0.0f64, 0.0f64);
    let mut ratios = Vec::with_capacity(frames.len());
    let mut levels = Vec::with_capacity(frames.len());
    for frame in frames {
        let row = FrameRow::from_frame(&frame, audio.samples(), window, sr);
        writeln!(csv, "{}", row.to_csv()).map_err(|e| e.to_string())?;
        total_base += row.e_base;
        total_hf += row.e_hf;
        ratios.push(row.hf_ratio);
        levels.push(row.rms_dbfs);
    }
    csv.flush().map_err(|e| e.to_string())?;

    let n_frames = ratios.len();
    ratios.sort_by(|a, b| a.total_cmp(b));
    levels.sort_by(|a, b| a.total_cmp(b));

    Ok(Summary {
        sr,
        duration_sec: audio.len() as f64 / f64::from(sr),
        stft: StftInfo {
            win_ms: clarity.win_ms,
            hop_ms: clarity.hop_ms,
            nperseg: window,
            hop_samples: hop,
            noverlap: window.saturating_sub(hop),
            n_frames,
        },
        bands: Bands {
            base_band_hz: [0.0, hi_hz],
            hf_band_hz: [lo_hz, hi_hz],
        },
        energy: EnergyStats {
            total_e_0_8k: total_base,
            total_e_3_8k: total_hf,
            hf_ratio_total: total_hf / (total_base + EPS),
            hf_ratio_p50: percentile(&ratios, 0.50),
            hf_ratio_p90: percentile(&ratios, 0.90),
            rms_dbfs_p50: percentile(&levels, 0.50),
            rms_dbfs_p90: percentile(&levels, 0.90),
        },
    })
}

fn run() -> Result<(), String> {
    let args = parse_args()?;
    std::fs::create_dir_all(&args.out_dir).map_err(|e| format!("{}: {e}", args.out_dir.display()))?;

    let stem = args
        .input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".to_owned());
    let out_csv = args.out_dir.join(format!("{stem}.energy.csv"));
    let out_json = args.out_dir.join(format!("{stem}.summary.json"));

    let scratch = tempfile::Builder::new()
        .prefix("aqc_energy_")
        .tempdir()
        .map_err(|e| e.to_string())?;
    let wav = scratch.path().join("decoded.wav");
    FfmpegDecoder::new(args.ffmpeg, Duration::from_secs(120))
        .decode(&args.input, &wav)
        .map_err(|e| e.to_string())?;

    let pcm = read_wav(&wav).map_err(|e| e.to_string())?;
    let audio = AudioBuffer::new(pcm.samples, pcm.sample_rate).map_err(|e| e.to_string())?;

    let summary = export(&audio, &args.clarity, &out_csv)?;
    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    std::fs::write(&out_json, json).map_err(|e| format!("{}: {e}", out_json.display()))?;

    println!("wrote:\n  {}\n  {}", out_csv.display(), out_json.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 16_000;

    fn tone(freq: f32, seconds: f32) -> AudioBuffer {
        let n = (SR as f32 * seconds) as usize;
        let x = (0..n)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
            .collect();
        AudioBuffer::new(x, SR).expect("buffer")
    }

    #[test]
    fn percentile_interpolates_between_ranks() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&sorted, 0.0), 1.0);
        assert_eq!(percentile(&sorted, 1.0), 4.0);
        assert!((percentile(&sorted, 0.5) - 2.5).abs() < 1e-12);
        assert!((percentile(&sorted, 0.9) - 3.7).abs() < 1e-12);
        assert_eq!(percentile(&[], 0.5), 0.0);
    }

    #[test]
    fn exports_one_row_per_frame() {
        let dir = tempfile::tempdir().expect("tempdir");
        let csv_path = dir.path().join("tone.energy.csv");
        let summary = export(&tone(4_000.0, 1.0), &ClarityConfig::default(), &csv_path).expect("export");

        let csv = std::fs::read_to_string(&csv_path).expect("read csv");
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER));
        let rows: Vec<&str> = lines.collect();
        assert_eq!(rows.len(), summary.stft.n_frames);
        assert_eq!(summary.stft.n_frames, 1 + (16_000 - 320) / 160);
        assert!(rows.iter().all(|r| r.split(',').count() == 5));
        // first frame is centred on its 320-sample window
        assert!(rows[0].starts_with("0.010000,"), "{}", rows[0]);

        assert_eq!(summary.stft.nperseg, 320);
        assert_eq!(summary.stft.hop_samples, 160);
        assert_eq!(summary.stft.noverlap, 160);
        assert_eq!(summary.bands.hf_band_hz, [3_000.0, 8_000.0]);
        assert!(summary.energy.hf_ratio_total > 0.99);
        assert!(summary.energy.hf_ratio_p50 > 0.99);
        assert!(summary.energy.rms_dbfs_p50 < 0.0);
    }

    #[test]
    fn low_tone_has_no_high_band_energy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let csv_path = dir.path().join("low.energy.csv");
        let summary = export(&tone(500.0, 0.5), &ClarityConfig::default(), &csv_path).expect("export");
        assert!(summary.energy.hf_ratio_total < 0.01);
        assert!(summary.energy.hf_ratio_p90 < 0.01);

        let json = serde_json::to_value(&summary).expect("json");
        assert_eq!(json["sr"], 16_000);
        assert!(json["energy"]["total_e_0_8k"].as_f64().is_some_and(|e| e > 0.0));
    }
}
