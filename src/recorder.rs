//! End-of-utterance recording.
//!
//! [`TurnRecorder::capture`] pulls frames from a capture stream through a
//! [`VoiceActivityGate`] until the user stops talking, the caller cancels, or
//! the optional utterance cap is hit. [`TurnRecorder::record`] runs that loop
//! on the blocking pool and hands completed audio to speech-to-text.

use crate::audio::{AudioDevice, AudioFrame, CaptureStream, StreamSpec, wav};
use crate::config::{FridayConfig, GateConfig, RecorderConfig};
use crate::error::{Result, SpeechError};
use crate::services::SpeechToText;
use crate::vad::{VoiceActivityGate, VoiceClassifier, VoiceCommandState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why an utterance ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceEnd {
    /// The gate saw speech followed by enough silence.
    Completed,
    /// The cancellation token fired.
    Interrupted,
    /// The utterance cap was reached before the speaker paused.
    TimedOut,
}

impl std::fmt::Display for UtteranceEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Interrupted => f.write_str("interrupted"),
            Self::TimedOut => f.write_str("timed_out"),
        }
    }
}

/// Captured frames plus the reason capture stopped.
#[derive(Debug, Clone)]
pub struct Utterance {
    frames: Vec<AudioFrame>,
    end: UtteranceEnd,
    sample_rate: u32,
}

impl Utterance {
    pub fn frames(&self) -> &[AudioFrame] {
        &self.frames
    }

    pub fn end(&self) -> UtteranceEnd {
        self.end
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sample_count(&self) -> usize {
        self.frames.iter().map(AudioFrame::len).sum()
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.sample_count() as f64 / f64::from(self.sample_rate))
    }

    /// All frames joined into one buffer.
    pub fn samples(&self) -> Vec<i16> {
        let mut out = Vec::with_capacity(self.sample_count());
        for frame in &self.frames {
            out.extend_from_slice(frame.samples());
        }
        out
    }
}

/// Result of one recording turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Text from speech-to-text. May be empty when nothing intelligible was said.
    Transcript(String),
    /// Cancelled before the utterance finished. Displays as `interrupted`.
    Interrupted,
    /// The utterance cap was reached.
    TimedOut,
}

impl std::fmt::Display for RecordOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transcript(text) => f.write_str(text),
            Self::Interrupted => f.write_str("interrupted"),
            Self::TimedOut => f.write_str("timed_out"),
        }
    }
}

/// A capture stream and the gate listening to it.
///
/// Dropping the session closes the stream and stops the gate, whichever way
/// the owning loop exits.
pub(crate) struct ListeningSession {
    pub(crate) stream: Box<dyn CaptureStream>,
    pub(crate) gate: VoiceActivityGate,
}

impl ListeningSession {
    /// Build and start a gate, then open the capture stream.
    pub(crate) fn open(
        device: &dyn AudioDevice,
        classifier: Arc<dyn VoiceClassifier>,
        profile: &GateConfig,
        window_ms: u32,
        spec: StreamSpec,
    ) -> Result<Self> {
        let mut gate = VoiceActivityGate::new(classifier, profile, window_ms, spec.sample_rate)?;
        let stream = device.open_capture(spec)?;
        gate.start();
        Ok(Self { stream, gate })
    }
}

impl Drop for ListeningSession {
    fn drop(&mut self) {
        self.stream.close();
        self.gate.stop();
    }
}

/// Records one user utterance per call.
#[derive(Clone)]
pub struct TurnRecorder {
    device: Arc<dyn AudioDevice>,
    classifier: Arc<dyn VoiceClassifier>,
    config: RecorderConfig,
    sample_rate: u32,
    window_ms: u32,
}

impl TurnRecorder {
    /// Create a recorder on `device`.
    ///
    /// # Errors
    ///
    /// Returns a config error if the recorder's gate profile is invalid.
    pub fn new(
        device: Arc<dyn AudioDevice>,
        classifier: Arc<dyn VoiceClassifier>,
        config: &FridayConfig,
    ) -> Result<Self> {
        config.recorder.gate.validate()?;
        if config.recorder.frame_samples == 0 {
            return Err(SpeechError::Config("recorder.frame_samples must be positive".into()));
        }
        Ok(Self {
            device,
            classifier,
            config: config.recorder.clone(),
            sample_rate: config.audio.input_sample_rate,
            window_ms: config.vad.window_ms,
        })
    }

    /// Capture one utterance, blocking the calling thread.
    ///
    /// The cancellation token is checked once per frame. Overflowed or late
    /// frames are skipped. The capture stream is closed and the gate stopped
    /// before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be opened, the device fails
    /// fatally, or the classifier fails.
    pub fn capture(&self, cancel: &CancellationToken) -> Result<Utterance> {
        let spec = StreamSpec::capture(self.sample_rate, self.config.frame_samples);
        let mut session = ListeningSession::open(
            self.device.as_ref(),
            Arc::clone(&self.classifier),
            &self.config.gate,
            self.window_ms,
            spec,
        )?;
        debug!("recording on {}", self.device.name());

        let mut frames = Vec::new();
        let end = loop {
            if cancel.is_cancelled() {
                break UtteranceEnd::Interrupted;
            }

            let frame = match session.stream.read_frame() {
                Ok(frame) => frame,
                Err(e) if e.is_recoverable_frame_error() => {
                    warn!("skipping capture frame: {e}");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let state = session.gate.process_frame(&frame)?;
            frames.push(frame);
            match state {
                VoiceCommandState::Success => break UtteranceEnd::Completed,
                VoiceCommandState::Timeout => break UtteranceEnd::TimedOut,
                _ => {}
            }
        };
        drop(session);

        let utterance = Utterance {
            frames,
            end,
            sample_rate: self.sample_rate,
        };
        info!(
            "utterance {}: {} frames, {:.2}s",
            utterance.end,
            utterance.frames.len(),
            utterance.duration().as_secs_f32()
        );
        Ok(utterance)
    }

    /// Record one utterance and transcribe it.
    ///
    /// Completed audio is written to a transient WAV file in the scratch
    /// directory, passed to `stt`, and removed afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if capture fails, the artifact cannot be written, or
    /// transcription fails.
    pub async fn record(
        &self,
        stt: &dyn SpeechToText,
        cancel: &CancellationToken,
    ) -> Result<RecordOutcome> {
        let recorder = self.clone();
        let token = cancel.clone();
        let utterance = tokio::task::spawn_blocking(move || recorder.capture(&token))
            .await
            .map_err(|e| SpeechError::Pipeline(format!("recorder task failed: {e}")))??;

        match utterance.end() {
            UtteranceEnd::Interrupted => return Ok(RecordOutcome::Interrupted),
            UtteranceEnd::TimedOut => return Ok(RecordOutcome::TimedOut),
            UtteranceEnd::Completed => {}
        }

        let path = self.artifact_path();
        wav::write_mono_i16(&path, &utterance.samples(), utterance.sample_rate())?;
        let transcript = stt.transcribe(&path).await;
        if let Err(e) = std::fs::remove_file(&path) {
            debug!("could not remove {}: {e}", path.display());
        }

        let text = transcript?;
        Ok(RecordOutcome::Transcript(text.trim().to_owned()))
    }

    fn artifact_path(&self) -> PathBuf {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.6f");
        self.config
            .scratch_dir
            .join(format!("utterance-{}-{stamp}.wav", std::process::id()))
    }
}

impl std::fmt::Debug for TurnRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnRecorder")
            .field("device", &self.device.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::audio::StreamDirection;
    use crate::audio::scripted::{CaptureEvent, ScriptedDevice, silence_frame, speech_frame};
    use crate::test_utils::{RecordingStt, energy_classifier, test_config};

    fn recorder(device: &ScriptedDevice, config: &FridayConfig) -> TurnRecorder {
        TurnRecorder::new(Arc::new(device.clone()), energy_classifier(), config).unwrap()
    }

    #[test]
    fn completes_after_speech_and_trailing_silence() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let device = ScriptedDevice::new();
        device.push_frames(&speech_frame(960), 10);
        device.push_frames(&silence_frame(960), 9);
        device.push_frames(&speech_frame(960), 3);

        let utterance = recorder(&device, &config)
            .capture(&CancellationToken::new())
            .unwrap();

        assert_eq!(utterance.end(), UtteranceEnd::Completed);
        assert_eq!(utterance.frames().len(), 19);
        assert_eq!(utterance.sample_count(), 19 * 960);
        assert_eq!(device.remaining_capture(), 3);
        assert_eq!(device.close_count(StreamDirection::Capture), 1);
        assert!(!device.is_open(StreamDirection::Capture));
    }

    #[test]
    fn overflow_is_skipped_without_ending_the_turn() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let device = ScriptedDevice::new();
        device.push_frames(&speech_frame(960), 5);
        device.push_capture([CaptureEvent::Overflow, CaptureEvent::Timeout]);
        device.push_frames(&speech_frame(960), 5);
        device.push_frames(&silence_frame(960), 9);

        let utterance = recorder(&device, &config)
            .capture(&CancellationToken::new())
            .unwrap();
        assert_eq!(utterance.end(), UtteranceEnd::Completed);
        assert_eq!(utterance.frames().len(), 19);
    }

    #[test]
    fn pre_cancelled_token_interrupts_and_still_closes_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let device = ScriptedDevice::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let utterance = recorder(&device, &config).capture(&cancel).unwrap();
        assert_eq!(utterance.end(), UtteranceEnd::Interrupted);
        assert!(utterance.frames().is_empty());
        assert_eq!(device.open_count(StreamDirection::Capture), 1);
        assert_eq!(device.close_count(StreamDirection::Capture), 1);
    }

    #[test]
    fn fatal_device_error_propagates_and_releases_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let device = ScriptedDevice::new();
        device.push_capture([CaptureEvent::Fault("unplugged".into())]);

        let err = recorder(&device, &config)
            .capture(&CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, SpeechError::Audio(_)));
        assert!(!device.is_open(StreamDirection::Capture));
    }

    #[test]
    fn cap_yields_timed_out() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.recorder.gate.max_seconds = Some(0.6);
        let device = ScriptedDevice::new();
        device.push_frames(&speech_frame(960), 50);

        let utterance = recorder(&device, &config)
            .capture(&CancellationToken::new())
            .unwrap();
        assert_eq!(utterance.end(), UtteranceEnd::TimedOut);
        assert_eq!(utterance.frames().len(), 10);
    }

    #[tokio::test]
    async fn record_transcribes_completed_audio_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let device = ScriptedDevice::new();
        device.push_frames(&speech_frame(960), 10);
        device.push_frames(&silence_frame(960), 9);
        let stt = RecordingStt::new(["  hello friday  "]);

        let outcome = recorder(&device, &config)
            .record(&stt, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, RecordOutcome::Transcript("hello friday".into()));
        let seen = stt.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].sample_rate(), 16_000);
        assert_eq!(seen[0].len(), 19 * 960);
        let leftovers = std::fs::read_dir(&config.recorder.scratch_dir)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn record_returns_interrupted_sentinel_without_calling_stt() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let device = ScriptedDevice::new();
        let stt = RecordingStt::new(["unused"]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = recorder(&device, &config).record(&stt, &cancel).await.unwrap();
        assert_eq!(outcome, RecordOutcome::Interrupted);
        assert_eq!(outcome.to_string(), "interrupted");
        assert!(stt.seen().is_empty());
    }
}
