//! Silero VAD neural speech detector.
//!
//! Wraps the Silero VAD ONNX model (<https://github.com/snakers4/silero-vad>).
//! Both the v3/v4 LSTM interface (separate `h`/`c` tensors) and the v5 GRU
//! interface (single `state` tensor) are supported; tensor names are
//! resolved from the session at load time.
//!
//! | Name            | Shape      | DType | Direction |
//! |-----------------|------------|-------|-----------|
//! | `input`         | `[1, 512]` | f32   | in        |
//! | `sr`            | `[1]`      | i64   | in        |
//! | `h`, `c` (v4)   | `[2,1,64]` | f32   | in/out    |
//! | `state` (v5)    | `[2,1,128]`| f32   | in/out    |
//! | `output`        | `[1, 1]`   | f32   | out       |

use std::path::Path;

use ndarray::{Array1, Array2, Array3};
use ort::session::builder::SessionBuilder;
use ort::session::{Session, SessionInputValue};
use ort::value::Value;
use tracing::{debug, info, warn};

use super::{decisions_to_intervals, SpeechDetector, VadDecision};
use crate::audio::{read_wav, TARGET_SAMPLE_RATE};
use crate::error::{AqcError, Result};
use crate::metrics::SpeechInterval;

/// Samples per model window (32 ms at 16 kHz).
const WINDOW: usize = 512;
/// v3/v4: 2 layers × 1 batch × 64 units, for each of h and c.
const LSTM_SIZE: usize = 128;
/// v5: 2 layers × 1 batch × 128 units.
const GRU_STATE_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StateLayout {
    Lstm,
    Gru,
    Stateless,
}

#[derive(Debug, Default)]
struct TensorNames {
    input: String,
    sr: Option<String>,
    output: String,
    h: Option<String>,
    c: Option<String>,
    hn: Option<String>,
    cn: Option<String>,
    state: Option<String>,
    state_out: Option<String>,
}

/// Neural speech detector backed by one ONNX session.
pub struct SileroDetector {
    session: Session,
    names: TensorNames,
    layout: StateLayout,
    h: Vec<f32>,
    c: Vec<f32>,
    state: Vec<f32>,
    threshold: f32,
    min_speech_ms: u64,
}

fn ort_err(e: impl std::fmt::Display) -> AqcError {
    AqcError::OnnxSession(e.to_string())
}

impl SileroDetector {
    /// Load the model from `path`. Windows with probability ≥ `threshold`
    /// count as speech.
    pub fn new(path: impl AsRef<Path>, threshold: f32, min_speech_ms: u64) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AqcError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }

        let session = SessionBuilder::new()
            .map_err(ort_err)?
            .commit_from_file(path)
            .map_err(ort_err)?;

        let inputs: Vec<String> = session.inputs().iter().map(|o| o.name().to_string()).collect();
        let outputs: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        let names = TensorNames {
            input: resolve_name(&inputs, &["input", "audio", "x"])
                .or_else(|| inputs.first().cloned())
                .ok_or_else(|| ort_err("silero model has no inputs"))?,
            sr: resolve_name(&inputs, &["sr", "sample_rate"]),
            output: resolve_name(&outputs, &["output", "speech_prob", "prob"])
                .or_else(|| outputs.first().cloned())
                .ok_or_else(|| ort_err("silero model has no outputs"))?,
            h: resolve_name(&inputs, &["h", "state_h"]),
            c: resolve_name(&inputs, &["c", "state_c"]),
            hn: resolve_name(&outputs, &["hn", "state_hn", "h_out"]),
            cn: resolve_name(&outputs, &["cn", "state_cn", "c_out"]),
            state: resolve_name(&inputs, &["state", "h_0", "hidden"]),
            state_out: resolve_name(&outputs, &["stateN", "state_out", "h_0_out", "hn_out"]),
        };

        let layout = if names.h.is_some() && names.c.is_some() && names.hn.is_some() && names.cn.is_some() {
            StateLayout::Lstm
        } else if names.state.is_some() {
            StateLayout::Gru
        } else {
            StateLayout::Stateless
        };

        info!(
            path = %path.display(),
            ?inputs,
            ?outputs,
            ?layout,
            threshold,
            "silero detector loaded"
        );

        Ok(Self {
            session,
            names,
            layout,
            h: vec![0.0; LSTM_SIZE],
            c: vec![0.0; LSTM_SIZE],
            state: vec![0.0; GRU_STATE_SIZE],
            threshold,
            min_speech_ms,
        })
    }

    fn reset(&mut self) {
        self.h.iter_mut().for_each(|v| *v = 0.0);
        self.c.iter_mut().for_each(|v| *v = 0.0);
        self.state.iter_mut().for_each(|v| *v = 0.0);
    }

    /// Run one window through the model, carrying recurrent state forward.
    fn run_window(&mut self, window: &[f32]) -> Result<f32> {
        debug_assert_eq!(window.len(), WINDOW);

        let input = Array2::<f32>::from_shape_vec((1, WINDOW), window.to_vec()).map_err(ort_err)?;
        let mut feeds: Vec<(String, SessionInputValue<'_>)> = vec![(
            self.names.input.clone(),
            Value::from_array(input).map_err(ort_err)?.into(),
        )];

        if let Some(sr_name) = &self.names.sr {
            let sr = Array1::<i64>::from_elem(1, i64::from(TARGET_SAMPLE_RATE));
            feeds.push((sr_name.clone(), Value::from_array(sr).map_err(ort_err)?.into()));
        }

        match self.layout {
            StateLayout::Lstm => {
                for (name, buf) in [(&self.names.h, &self.h), (&self.names.c, &self.c)] {
                    if let Some(name) = name {
                        let arr = Array3::<f32>::from_shape_vec((2, 1, 64), buf.clone())
                            .map_err(ort_err)?;
                        feeds.push((name.clone(), Value::from_array(arr).map_err(ort_err)?.into()));
                    }
                }
            }
            StateLayout::Gru => {
                if let Some(name) = &self.names.state {
                    let arr = Array3::<f32>::from_shape_vec((2, 1, 128), self.state.clone())
                        .map_err(ort_err)?;
                    feeds.push((name.clone(), Value::from_array(arr).map_err(ort_err)?.into()));
                }
            }
            StateLayout::Stateless => {}
        }

        let outputs = self.session.run(feeds).map_err(ort_err)?;

        let prob_output = outputs
            .get(self.names.output.as_str())
            .ok_or_else(|| ort_err(format!("missing output `{}`", self.names.output)))?;
        let (_, prob_data) = prob_output.try_extract_tensor::<f32>().map_err(ort_err)?;
        let prob = prob_data.first().copied().unwrap_or(0.0);

        match self.layout {
            StateLayout::Lstm => {
                let hn = self.names.hn.as_deref().and_then(|n| outputs.get(n));
                let cn = self.names.cn.as_deref().and_then(|n| outputs.get(n));
                if let (Some(hn), Some(cn)) = (hn, cn) {
                    self.h = hn.try_extract_tensor::<f32>().map_err(ort_err)?.1.to_vec();
                    self.c = cn.try_extract_tensor::<f32>().map_err(ort_err)?.1.to_vec();
                } else {
                    warn!("silero LSTM state outputs missing; switching to stateless");
                    self.layout = StateLayout::Stateless;
                }
            }
            StateLayout::Gru => {
                match self.names.state_out.as_deref().and_then(|n| outputs.get(n)) {
                    Some(out) => {
                        self.state = out.try_extract_tensor::<f32>().map_err(ort_err)?.1.to_vec();
                    }
                    None => {
                        warn!("silero GRU state output missing; switching to stateless");
                        self.layout = StateLayout::Stateless;
                    }
                }
            }
            StateLayout::Stateless => {}
        }

        Ok(prob)
    }
}

fn resolve_name(candidates: &[String], preferred: &[&str]) -> Option<String> {
    preferred.iter().find_map(|needle| {
        candidates
            .iter()
            .find(|name| name.eq_ignore_ascii_case(needle))
            .cloned()
    })
}

impl SpeechDetector for SileroDetector {
    fn warm_up(&mut self) -> Result<()> {
        self.run_window(&[0.0; WINDOW])?;
        self.reset();
        debug!("silero warm-up complete");
        Ok(())
    }

    fn detect(&mut self, pcm_path: &Path) -> Result<Vec<SpeechInterval>> {
        let pcm = read_wav(pcm_path)?;
        if pcm.sample_rate != TARGET_SAMPLE_RATE {
            return Err(AqcError::Inference(format!(
                "silero expects {TARGET_SAMPLE_RATE} Hz, got {}",
                pcm.sample_rate
            )));
        }

        self.reset();
        let mut decisions = Vec::with_capacity(pcm.samples.len() / WINDOW + 1);
        let mut padded = [0.0f32; WINDOW];
        for chunk in pcm.samples.chunks(WINDOW) {
            let window = if chunk.len() == WINDOW {
                chunk
            } else {
                padded[..chunk.len()].copy_from_slice(chunk);
                padded[chunk.len()..].fill(0.0);
                &padded[..]
            };
            let prob = self.run_window(window)?;
            decisions.push(if prob >= self.threshold {
                VadDecision::Speech
            } else {
                VadDecision::Silence
            });
        }

        Ok(decisions_to_intervals(
            &decisions,
            WINDOW,
            pcm.samples.len(),
            pcm.sample_rate,
            self.min_speech_ms,
        ))
    }
}
