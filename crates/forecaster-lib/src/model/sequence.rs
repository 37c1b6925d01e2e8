//! Recurrent sequence model
//!
//! A small Elman network (one tanh hidden layer, linear read-out) trained by
//! backpropagation through time with Adam. Inputs are min-max scaled with the
//! range of the training windows. Error metrics come from a chronological
//! holdout of the last windows, never from the data the weights were fitted on.

use super::{points_with_error_band, ForecastModel, TimeAxis};
use crate::error::{ForecastError, Result};
use crate::models::{ErrorMetrics, Evaluation, ForecastPoint, SeriesPoint};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Smallest usable window; a series needs `4 ×` this many points
const MIN_WINDOW: usize = 2;

/// Share of windows held out for evaluation
const HOLDOUT_FRACTION: f64 = 0.2;

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-8;

/// Training knobs for the sequence family
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceSettings {
    /// Upper bound on the look-back window
    pub window_cap: usize,
    pub hidden: usize,
    pub max_epochs: usize,
    pub learning_rate: f64,
    /// Minimum loss improvement that resets the patience counter
    pub tolerance: f64,
    pub patience: usize,
    pub seed: u64,
    /// Only the most recent windows are used for training
    pub max_windows: usize,
}

impl Default for SequenceSettings {
    fn default() -> Self {
        Self {
            window_cap: 24,
            hidden: 8,
            max_epochs: 200,
            learning_rate: 0.05,
            tolerance: 1e-6,
            patience: 10,
            seed: 42,
            max_windows: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceModel {
    pub window: usize,
    pub hidden: usize,
    /// `[w_in (h), w_rec (h×h, row-major), b_h (h), w_out (h), b_out]`
    pub weights: Vec<f64>,
    pub scale_min: f64,
    pub scale_max: f64,
    /// Last `window` raw costs of the series, oldest first
    pub recent: Vec<f64>,
    /// Loss on the final training epoch, in scaled units
    pub final_loss: f64,
    pub epochs: usize,
    pub axis: TimeAxis,
}

/// A fitted model plus its holdout scoring
#[derive(Debug, Clone)]
pub struct SequenceFit {
    pub model: SequenceModel,
    pub actual: Vec<f64>,
    pub predicted: Vec<f64>,
}

impl SequenceFit {
    pub fn metrics(&self) -> Result<ErrorMetrics> {
        ErrorMetrics::compute(&self.actual, &self.predicted, Evaluation::Holdout)
    }
}

/// Offsets into the flat weight vector
struct Layout {
    hidden: usize,
}

impl Layout {
    fn len(&self) -> usize {
        let h = self.hidden;
        h * h + 3 * h + 1
    }
    fn w_in(&self) -> usize {
        0
    }
    fn w_rec(&self) -> usize {
        self.hidden
    }
    fn b_h(&self) -> usize {
        self.hidden + self.hidden * self.hidden
    }
    fn w_out(&self) -> usize {
        self.b_h() + self.hidden
    }
    fn b_out(&self) -> usize {
        self.w_out() + self.hidden
    }
}

struct Window<'a> {
    inputs: &'a [f64],
    target: f64,
}

impl SequenceModel {
    pub fn fit(series: &[SeriesPoint], settings: &SequenceSettings) -> Result<SequenceFit> {
        let n = series.len();
        let window = settings.window_cap.min(n / 4);
        if window < MIN_WINDOW || n < 2 * window {
            return Err(ForecastError::InsufficientData {
                required: 4 * MIN_WINDOW,
                actual: n,
            });
        }
        if settings.hidden == 0 || settings.max_windows == 0 {
            return Err(ForecastError::training("sequence settings leave no capacity"));
        }

        let raw: Vec<f64> = series.iter().map(|p| p.cost).collect();
        let total_windows = n - window;
        let first = total_windows.saturating_sub(settings.max_windows);
        let count = total_windows - first;
        let holdout = ((count as f64 * HOLDOUT_FRACTION).floor() as usize).max(1);
        let train = count - holdout;
        if train == 0 {
            return Err(ForecastError::InsufficientData {
                required: 4 * MIN_WINDOW,
                actual: n,
            });
        }

        // Scale from the values the training windows can see
        let train_end = first + train + window;
        let (scale_min, scale_max) = raw[first..train_end]
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(*v), hi.max(*v))
            });
        let scaler = Scaler::new(scale_min, scale_max);
        let scaled: Vec<f64> = raw.iter().map(|v| scaler.scale(*v)).collect();

        let windows: Vec<Window<'_>> = (first..total_windows)
            .map(|i| Window {
                inputs: &scaled[i..i + window],
                target: scaled[i + window],
            })
            .collect();
        let (train_windows, holdout_windows) = windows.split_at(train);

        let layout = Layout {
            hidden: settings.hidden,
        };
        let mut rng = StdRng::seed_from_u64(settings.seed);
        let limit = 1.0 / (settings.hidden as f64).sqrt();
        let mut weights: Vec<f64> = (0..layout.len())
            .map(|_| rng.gen_range(-limit..limit))
            .collect();

        let mut adam = Adam::new(layout.len(), settings.learning_rate);
        let mut best_loss = f64::INFINITY;
        let mut stalled = 0;
        let mut final_loss = f64::INFINITY;
        let mut epochs = 0;
        for _ in 0..settings.max_epochs {
            let (loss, grad) = loss_and_gradient(&layout, &weights, train_windows);
            if !loss.is_finite() {
                return Err(ForecastError::training("sequence loss diverged"));
            }
            epochs += 1;
            final_loss = loss;
            if loss < best_loss - settings.tolerance {
                best_loss = loss;
                stalled = 0;
            } else {
                stalled += 1;
                if stalled >= settings.patience {
                    break;
                }
            }
            adam.step(&mut weights, &grad);
        }

        if weights.iter().any(|w| !w.is_finite()) {
            return Err(ForecastError::training("sequence weights are not finite"));
        }

        let actual: Vec<f64> = holdout_windows
            .iter()
            .map(|w| scaler.unscale(w.target))
            .collect();
        let predicted: Vec<f64> = holdout_windows
            .iter()
            .map(|w| scaler.unscale(forward(&layout, &weights, w.inputs).0))
            .collect();

        let model = SequenceModel {
            window,
            hidden: settings.hidden,
            weights,
            scale_min: scaler.min,
            scale_max: scaler.min + scaler.range,
            recent: raw[n - window..].to_vec(),
            final_loss,
            epochs,
            axis: TimeAxis::from_series(series)?,
        };
        Ok(SequenceFit {
            model,
            actual,
            predicted,
        })
    }

    fn check_shape(&self) -> Result<()> {
        let layout = Layout {
            hidden: self.hidden,
        };
        if self.hidden == 0 || self.weights.len() != layout.len() {
            return Err(ForecastError::inference(format!(
                "sequence weights have {} entries, expected {} for {} hidden units",
                self.weights.len(),
                layout.len(),
                self.hidden
            )));
        }
        if self.window == 0 || self.recent.len() != self.window {
            return Err(ForecastError::inference(format!(
                "sequence input has {} values for window {}",
                self.recent.len(),
                self.window
            )));
        }
        Ok(())
    }
}

impl ForecastModel for SequenceModel {
    fn forecast(&self, horizon: usize, metrics: &ErrorMetrics) -> Result<Vec<ForecastPoint>> {
        self.check_shape()?;
        let layout = Layout {
            hidden: self.hidden,
        };
        let scaler = Scaler::new(self.scale_min, self.scale_max);
        let mut buffer: Vec<f64> = self.recent.iter().map(|v| scaler.scale(*v)).collect();
        let mut values = Vec::with_capacity(horizon);
        for step in 1..=horizon {
            let start = buffer.len() - self.window;
            let (out, _) = forward(&layout, &self.weights, &buffer[start..]);
            let value = scaler.unscale(out);
            if !value.is_finite() {
                return Err(ForecastError::inference(format!(
                    "sequence produced {} at step {}",
                    value, step
                )));
            }
            buffer.push(out);
            values.push(value);
        }
        points_with_error_band(&self.axis, &values, metrics)
    }
}

#[derive(Debug, Clone, Copy)]
struct Scaler {
    min: f64,
    range: f64,
}

impl Scaler {
    fn new(min: f64, max: f64) -> Self {
        let range = max - min;
        Self {
            min,
            range: if range.is_finite() && range > f64::EPSILON {
                range
            } else {
                1.0
            },
        }
    }

    fn scale(&self, value: f64) -> f64 {
        (value - self.min) / self.range
    }

    fn unscale(&self, value: f64) -> f64 {
        value * self.range + self.min
    }
}

/// Run the network over one window; returns the output and hidden states
/// `h_0..=h_w` (with `h_0 = 0`) for backpropagation
fn forward(layout: &Layout, weights: &[f64], inputs: &[f64]) -> (f64, Vec<Vec<f64>>) {
    let h = layout.hidden;
    let mut states = Vec::with_capacity(inputs.len() + 1);
    states.push(vec![0.0; h]);
    for &x in inputs {
        let prev = &states[states.len() - 1];
        let next: Vec<f64> = (0..h)
            .map(|i| {
                let recurrent: f64 = (0..h)
                    .map(|j| weights[layout.w_rec() + i * h + j] * prev[j])
                    .sum();
                (weights[layout.w_in() + i] * x + recurrent + weights[layout.b_h() + i]).tanh()
            })
            .collect();
        states.push(next);
    }
    let last = &states[states.len() - 1];
    let out = weights[layout.b_out()]
        + (0..h)
            .map(|i| weights[layout.w_out() + i] * last[i])
            .sum::<f64>();
    (out, states)
}

/// Mean squared error over `windows` and its gradient by BPTT
fn loss_and_gradient(layout: &Layout, weights: &[f64], windows: &[Window<'_>]) -> (f64, Vec<f64>) {
    let h = layout.hidden;
    let n = windows.len() as f64;
    let mut grad = vec![0.0; layout.len()];
    let mut loss = 0.0;

    for window in windows {
        let (out, states) = forward(layout, weights, window.inputs);
        let err = out - window.target;
        loss += err * err;

        let d_out = 2.0 * err / n;
        let last = &states[states.len() - 1];
        for i in 0..h {
            grad[layout.w_out() + i] += d_out * last[i];
        }
        grad[layout.b_out()] += d_out;

        let mut dh: Vec<f64> = (0..h).map(|i| d_out * weights[layout.w_out() + i]).collect();
        for t in (0..window.inputs.len()).rev() {
            let current = &states[t + 1];
            let prev = &states[t];
            let da: Vec<f64> = (0..h).map(|i| dh[i] * (1.0 - current[i] * current[i])).collect();
            for i in 0..h {
                grad[layout.w_in() + i] += da[i] * window.inputs[t];
                grad[layout.b_h() + i] += da[i];
                for j in 0..h {
                    grad[layout.w_rec() + i * h + j] += da[i] * prev[j];
                }
            }
            dh = (0..h)
                .map(|j| {
                    (0..h)
                        .map(|i| weights[layout.w_rec() + i * h + j] * da[i])
                        .sum()
                })
                .collect();
        }
    }
    (loss / n, grad)
}

struct Adam {
    learning_rate: f64,
    m: Vec<f64>,
    v: Vec<f64>,
    t: i32,
}

impl Adam {
    fn new(size: usize, learning_rate: f64) -> Self {
        Self {
            learning_rate,
            m: vec![0.0; size],
            v: vec![0.0; size],
            t: 0,
        }
    }

    fn step(&mut self, weights: &mut [f64], grad: &[f64]) {
        self.t += 1;
        let bias1 = 1.0 - ADAM_BETA1.powi(self.t);
        let bias2 = 1.0 - ADAM_BETA2.powi(self.t);
        for k in 0..weights.len() {
            self.m[k] = ADAM_BETA1 * self.m[k] + (1.0 - ADAM_BETA1) * grad[k];
            self.v[k] = ADAM_BETA2 * self.v[k] + (1.0 - ADAM_BETA2) * grad[k] * grad[k];
            let m_hat = self.m[k] / bias1;
            let v_hat = self.v[k] / bias2;
            weights[k] -= self.learning_rate * m_hat / (v_hat.sqrt() + ADAM_EPSILON);
        }
    }
}
