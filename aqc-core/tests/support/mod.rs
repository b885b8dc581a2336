//! Fakes shared by the integration tests.
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aqc_core::metrics::SpeechInterval;
use aqc_core::{AppConfig, AqcError, AudioDecoder, DetectorFactory, Result, SpeechDetector};

pub const SR: u32 = 16_000;

/// Writes a fixed float WAV instead of running ffmpeg.
pub struct FakeDecoder {
    samples: Vec<f32>,
    sample_rate: u32,
    pub calls: AtomicUsize,
}

impl FakeDecoder {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Arc<Self> {
        Arc::new(Self {
            samples,
            sample_rate,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AudioDecoder for FakeDecoder {
    fn decode(&self, _input: &Path, output: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        write_float_wav(output, &self.samples, self.sample_rate);
        Ok(())
    }
}

/// Writes raw bytes (not a WAV) to the output path.
pub struct JunkDecoder;

impl AudioDecoder for JunkDecoder {
    fn decode(&self, _input: &Path, output: &Path) -> Result<()> {
        std::fs::write(output, b"definitely not a riff header")?;
        Ok(())
    }
}

pub struct FailingDecoder;

impl AudioDecoder for FailingDecoder {
    fn decode(&self, _input: &Path, _output: &Path) -> Result<()> {
        Err(AqcError::Decode("moov atom not found".into()))
    }
}

pub fn write_float_wav(path: &Path, samples: &[f32], sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("wav writer");
    for &s in samples {
        writer.write_sample(s).expect("write sample");
    }
    writer.finalize().expect("finalize wav");
}

#[derive(Clone)]
pub enum Script {
    Intervals(Vec<SpeechInterval>),
    Fail,
    Sleep(Duration),
}

/// Returns scripted output and records how often and how concurrently it ran.
pub struct ScriptedDetector {
    script: Script,
    probe: Arc<Probe>,
}

#[derive(Default)]
pub struct Probe {
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub hold: parking_lot::Mutex<Duration>,
}

impl Probe {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl SpeechDetector for ScriptedDetector {
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    fn detect(&mut self, pcm_path: &Path) -> Result<Vec<SpeechInterval>> {
        assert!(pcm_path.exists(), "detector must see the decoded file");
        self.probe.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let hold = *self.probe.hold.lock();
        if !hold.is_zero() {
            std::thread::sleep(hold);
        }

        let out = match &self.script {
            Script::Intervals(v) => Ok(v.clone()),
            Script::Fail => Err(AqcError::Inference("cuda error: out of memory".into())),
            Script::Sleep(d) => {
                std::thread::sleep(*d);
                Ok(Vec::new())
            }
        };
        self.probe.in_flight.fetch_sub(1, Ordering::SeqCst);
        out
    }
}

pub fn scripted(script: Script) -> (DetectorFactory, Arc<Probe>) {
    let probe = Arc::new(Probe::default());
    let p = Arc::clone(&probe);
    let factory: DetectorFactory = Arc::new(move || {
        Ok(Box::new(ScriptedDetector {
            script: script.clone(),
            probe: Arc::clone(&p),
        }) as Box<dyn SpeechDetector>)
    });
    (factory, probe)
}

pub fn ivs(pairs: &[[u64; 2]]) -> Vec<SpeechInterval> {
    pairs.iter().copied().map(SpeechInterval::from).collect()
}

/// Durations 1–10 s accepted; everything else default.
pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.audio_qc.min_duration_ms = 1_000;
    cfg.audio_qc.max_duration_ms = 10_000;
    cfg.audio_qc.vad_timeout_ms = 5_000;
    cfg
}

pub fn sine(amplitude: f32, freq: f32, seconds: f32) -> Vec<f32> {
    let n = (SR as f32 * seconds) as usize;
    (0..n)
        .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
        .collect()
}

/// An upload file on disk; its contents are irrelevant to the fake decoders.
pub fn upload_file(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("upload.mp3");
    std::fs::write(&path, [0u8; 64]).expect("write upload");
    path
}
