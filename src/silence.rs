//! Two-threshold hysteresis silence / voice-activity detector for 8 kHz
//! PCMU frames.
//!
//! Calibration and measurement are kept as two distinct buffers — a
//! one-shot calibration buffer that is dropped once the thresholds are
//! derived, and a fixed-size sliding measurement window used for every
//! detection afterwards — rather than one buffer reused across both
//! phases.

use crate::codec::mu_law_to_linear;

/// Frames (20 ms each) to discard before calibration starts.
const WARMUP_FRAMES: u64 = 25;
/// Frames accumulated to derive the noise floor.
const CALIBRATION_FRAMES: u64 = 25;
/// Frames held in the sliding measurement window.
const WINDOW_FRAMES: u64 = 25;

/// Stateful detector; feed it one PCMU frame at a time via
/// [`SilenceDetector::add_frame_and_detect_silence`].
pub struct SilenceDetector {
    frames_seen: u64,
    calibration_buf: Vec<u8>,
    measurement_window: Vec<u8>,
    silence_upper: Option<f64>,
    signal_lower: f64,
    had_signal: bool,
}

impl SilenceDetector {
    pub fn new() -> Self {
        Self {
            frames_seen: 0,
            calibration_buf: Vec::new(),
            measurement_window: Vec::new(),
            silence_upper: None,
            signal_lower: 0.0,
            had_signal: false,
        }
    }

    /// Feed one PCMU frame. Returns `true` exactly when a signal-to-silence
    /// transition is detected (the end of a talkspurt).
    pub fn add_frame_and_detect_silence(&mut self, frame: &[u8]) -> bool {
        self.frames_seen += 1;

        if self.frames_seen <= WARMUP_FRAMES {
            return false;
        }

        if self.frames_seen <= WARMUP_FRAMES + CALIBRATION_FRAMES {
            self.calibration_buf.extend_from_slice(frame);
            return false;
        }

        if self.silence_upper.is_none() {
            let upper = rms_level(&self.calibration_buf) * 2.0;
            self.silence_upper = Some(upper);
            self.signal_lower = upper * 5.0;
            self.calibration_buf = Vec::new();
        }

        self.measurement_window.extend_from_slice(frame);

        if self.frames_seen <= WARMUP_FRAMES + CALIBRATION_FRAMES + WINDOW_FRAMES {
            return false;
        }

        let level = rms_level(&self.measurement_window);
        let upper = self.silence_upper.expect("threshold set above");
        let mut silence_detected = false;

        if level > self.signal_lower {
            self.had_signal = true;
        } else if self.had_signal && level < upper {
            self.had_signal = false;
            silence_detected = true;
        }

        if self.measurement_window.len() > frame.len() {
            self.measurement_window.drain(0..frame.len());
        }

        silence_detected
    }

    /// Clear the latch tracking whether a talkspurt has occurred since the
    /// last reset, without touching thresholds or the sliding window.
    pub fn reset_had_signal(&mut self) {
        self.had_signal = false;
    }
}

impl Default for SilenceDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// RMS energy of a PCMU buffer, computed over the decoded linear samples.
fn rms_level(samples: &[u8]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut total = 0.0f64;
    for &b in samples {
        let linear = mu_law_to_linear(b) as f64;
        total += linear * linear;
    }
    (total / samples.len() as f64).sqrt()
}
