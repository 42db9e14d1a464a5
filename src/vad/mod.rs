//! Voice activity gating.
//!
//! A [`VoiceClassifier`] labels fixed analysis windows as speech or silence
//! and holds no temporal state. [`VoiceActivityGate`] owns all the timing: it
//! labels each incoming frame from its windows, counts speech and silence runs
//! in whole-frame samples and reports when an utterance is complete.
//!
//! ```text
//! IDLE --speech >= speech_seconds--> SPEECH --silence--> SILENCE_RUN
//!                                      ^                    |
//!                                      +------speech--------+
//! SILENCE_RUN --silence >= silence_seconds--> SUCCESS (gate resets to IDLE)
//! any state --frames >= max_seconds--> TIMEOUT (gate resets to IDLE)
//! ```

use crate::audio::{AudioFrame, ms_to_samples, rms_energy, seconds_to_samples};
use crate::config::{GateConfig, VadConfig};
use crate::error::{Result, SpeechError};
use std::sync::Arc;
use tracing::{debug, info};

/// Stateless speech/silence classifier for one analysis window.
pub trait VoiceClassifier: Send + Sync {
    /// Whether `window` contains speech.
    ///
    /// `aggressiveness` is 0..=3; higher values are more sensitive to speech.
    ///
    /// # Errors
    ///
    /// Returns a VAD error if the window cannot be classified.
    fn classify(&self, window: &[i16], sample_rate: u32, aggressiveness: u8) -> Result<bool>;
}

/// RMS energy classifier with one threshold per aggressiveness level.
#[derive(Debug, Clone)]
pub struct EnergyClassifier {
    thresholds: [f32; 4],
}

impl EnergyClassifier {
    /// Build a classifier from the configured thresholds.
    ///
    /// # Errors
    ///
    /// Returns a VAD error if any threshold is not a positive finite number.
    pub fn new(config: &VadConfig) -> Result<Self> {
        if let Some(bad) = config
            .energy_thresholds
            .iter()
            .find(|t| !t.is_finite() || **t <= 0.0)
        {
            return Err(SpeechError::Vad(format!(
                "energy threshold must be positive, got {bad}"
            )));
        }
        info!(
            "energy VAD initialized: thresholds={:?}",
            config.energy_thresholds
        );
        Ok(Self {
            thresholds: config.energy_thresholds,
        })
    }

    fn threshold(&self, aggressiveness: u8) -> f32 {
        self.thresholds[usize::from(aggressiveness.min(3))]
    }
}

impl VoiceClassifier for EnergyClassifier {
    fn classify(&self, window: &[i16], _sample_rate: u32, aggressiveness: u8) -> Result<bool> {
        Ok(rms_energy(window) > self.threshold(aggressiveness))
    }
}

/// Gate state after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceCommandState {
    /// Waiting for enough continuous speech.
    Idle,
    /// Inside an utterance.
    Speech,
    /// Inside an utterance, currently in a pause.
    SilenceRun,
    /// The utterance ended with enough trailing silence.
    Success,
    /// The utterance exceeded the caller's cap.
    Timeout,
}

impl VoiceCommandState {
    /// Whether this state ends the current utterance.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Timeout)
    }
}

impl std::fmt::Display for VoiceCommandState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Speech => "speech",
            Self::SilenceRun => "silence_run",
            Self::Success => "success",
            Self::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Hysteresis state machine over classified windows.
pub struct VoiceActivityGate {
    classifier: Arc<dyn VoiceClassifier>,
    aggressiveness: u8,
    sample_rate: u32,
    window_samples: usize,
    speech_needed: usize,
    silence_needed: usize,
    max_samples: Option<usize>,

    state: VoiceCommandState,
    speech_run: usize,
    silence_run: usize,
    seen: usize,
    running: bool,
}

impl VoiceActivityGate {
    /// Create a stopped gate. Call [`VoiceActivityGate::start`] before feeding frames.
    ///
    /// # Errors
    ///
    /// Returns a config error if `profile` is invalid or the window is empty.
    pub fn new(
        classifier: Arc<dyn VoiceClassifier>,
        profile: &GateConfig,
        window_ms: u32,
        sample_rate: u32,
    ) -> Result<Self> {
        profile.validate()?;
        let window_samples = ms_to_samples(sample_rate, window_ms);
        if window_samples == 0 {
            return Err(SpeechError::Config(format!(
                "VAD window of {window_ms}ms at {sample_rate}Hz is empty"
            )));
        }
        Ok(Self {
            classifier,
            aggressiveness: profile.aggressiveness,
            sample_rate,
            window_samples,
            speech_needed: seconds_to_samples(sample_rate, profile.speech_seconds),
            silence_needed: seconds_to_samples(sample_rate, profile.silence_seconds).max(1),
            max_samples: profile
                .max_seconds
                .map(|s| seconds_to_samples(sample_rate, s).max(1)),
            state: VoiceCommandState::Idle,
            speech_run: 0,
            silence_run: 0,
            seen: 0,
            running: false,
        })
    }

    /// Reset to IDLE and accept frames.
    pub fn start(&mut self) {
        self.reset();
        self.running = true;
        debug!(
            "gate started: window={} speech>={} silence>={} max={:?} samples",
            self.window_samples, self.speech_needed, self.silence_needed, self.max_samples
        );
    }

    /// Stop accepting frames. Idempotent.
    pub fn stop(&mut self) {
        if self.running {
            self.running = false;
            self.reset();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn state(&self) -> VoiceCommandState {
        self.state
    }

    /// Classify `frame` and advance the state machine.
    ///
    /// The frame is split into analysis windows, the last one absorbing any
    /// remainder shorter than a window, and counts as speech when any window
    /// does. Speech and silence runs grow by the frame's full length, so
    /// `Success` arrives on exactly the frame whose cumulative silence first
    /// reaches `silence_seconds`. Returns `Success` or `Timeout` on the frame
    /// that ends an utterance; the gate is back in `Idle` for the next call.
    ///
    /// # Errors
    ///
    /// Returns a VAD error if the gate is stopped, the frame has the wrong
    /// sample rate, or the classifier fails.
    pub fn process_frame(&mut self, frame: &AudioFrame) -> Result<VoiceCommandState> {
        if !self.running {
            return Err(SpeechError::Vad("gate is stopped".into()));
        }
        if frame.sample_rate() != self.sample_rate {
            return Err(SpeechError::Vad(format!(
                "frame sample rate {}Hz does not match gate rate {}Hz",
                frame.sample_rate(),
                self.sample_rate
            )));
        }

        self.seen += frame.len();
        let is_speech = self.classify_frame(frame.samples())?;

        if self.advance(is_speech, frame.len()) {
            debug!("gate: utterance complete after {} samples", self.seen);
            self.reset();
            return Ok(VoiceCommandState::Success);
        }

        if let Some(max) = self.max_samples
            && self.seen >= max
        {
            debug!("gate: utterance cap of {max} samples reached");
            self.reset();
            return Ok(VoiceCommandState::Timeout);
        }

        Ok(self.state)
    }

    fn classify_frame(&self, samples: &[i16]) -> Result<bool> {
        let w = self.window_samples;
        let windows = (samples.len() / w).max(1);
        for i in 0..windows {
            let end = if i + 1 == windows {
                samples.len()
            } else {
                (i + 1) * w
            };
            let window = &samples[i * w..end];
            if !window.is_empty()
                && self
                    .classifier
                    .classify(window, self.sample_rate, self.aggressiveness)?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Apply one frame of `len` samples. Returns true when the silence run
    /// completes the utterance.
    fn advance(&mut self, is_speech: bool, len: usize) -> bool {
        match (self.state, is_speech) {
            (VoiceCommandState::Idle, true) => {
                self.speech_run += len;
                if self.speech_run >= self.speech_needed {
                    self.state = VoiceCommandState::Speech;
                }
            }
            (VoiceCommandState::Idle, false) => self.speech_run = 0,
            (VoiceCommandState::Speech, true) => {}
            (VoiceCommandState::Speech | VoiceCommandState::SilenceRun, false) => {
                self.state = VoiceCommandState::SilenceRun;
                self.silence_run += len;
                return self.silence_run >= self.silence_needed;
            }
            (VoiceCommandState::SilenceRun, true) => {
                self.silence_run = 0;
                self.state = VoiceCommandState::Speech;
            }
            (VoiceCommandState::Success | VoiceCommandState::Timeout, _) => {
                self.state = VoiceCommandState::Idle;
            }
        }
        false
    }

    fn reset(&mut self) {
        self.state = VoiceCommandState::Idle;
        self.speech_run = 0;
        self.silence_run = 0;
        self.seen = 0;
    }
}

impl std::fmt::Debug for VoiceActivityGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceActivityGate")
            .field("state", &self.state)
            .field("aggressiveness", &self.aggressiveness)
            .field("window_samples", &self.window_samples)
            .field("running", &self.running)
            .finish_non_exhaustive()
    }
}
