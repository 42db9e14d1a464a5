//! Interruptible playback.
//!
//! Each loop iteration polls one capture frame through a barge-in gate and
//! then writes one playback chunk, so detection latency is bounded by one
//! chunk period on each side. When the gate completes, playback stops before
//! the pending chunk is written. After the last chunk the gate keeps polling
//! until the device has played out its queue.

use crate::audio::{AudioDevice, PlaybackStream, StreamSpec, Waveform};
use crate::config::{BargeInConfig, FridayConfig};
use crate::error::{Result, SpeechError};
use crate::recorder::ListeningSession;
use crate::vad::{VoiceClassifier, VoiceCommandState};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sleep between queue checks while draining without a listener.
const DRAIN_POLL: Duration = Duration::from_millis(5);

/// How a playback ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Every chunk was written and the device drained.
    Completed,
    /// The user talked over the assistant.
    Interrupted,
    /// The stop handle or the cancellation token ended playback.
    Stopped,
}

impl std::fmt::Display for PlaybackOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Interrupted => f.write_str("interrupted"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

/// Summary of one [`BargeInPlayer::play`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackReport {
    pub outcome: PlaybackOutcome,
    /// Chunks accepted by the playback stream.
    pub chunks_written: usize,
    /// Chunks the full waveform needs.
    pub total_chunks: usize,
}

/// Aborts the player's current playback from any thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

/// Closes the playback stream on every exit path.
struct PlaybackGuard(Box<dyn PlaybackStream>);

impl Drop for PlaybackGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Plays synthesized speech while listening for the user.
#[derive(Clone)]
pub struct BargeInPlayer {
    device: Arc<dyn AudioDevice>,
    classifier: Arc<dyn VoiceClassifier>,
    config: BargeInConfig,
    capture_rate: u32,
    window_ms: u32,
    drain_grace: Duration,
    stop: Arc<AtomicBool>,
}

impl BargeInPlayer {
    /// Create a player on `device`.
    ///
    /// # Errors
    ///
    /// Returns a config error if the barge-in gate profile is invalid.
    pub fn new(
        device: Arc<dyn AudioDevice>,
        classifier: Arc<dyn VoiceClassifier>,
        config: &FridayConfig,
    ) -> Result<Self> {
        config.barge_in.gate.validate()?;
        if config.barge_in.playback_chunk_samples == 0 || config.barge_in.capture_frame_samples == 0
        {
            return Err(SpeechError::Config("barge-in frame sizes must be positive".into()));
        }
        Ok(Self {
            device,
            classifier,
            config: config.barge_in.clone(),
            capture_rate: config.audio.input_sample_rate,
            window_ms: config.vad.window_ms,
            drain_grace: Duration::from_millis(config.audio.io_timeout_ms),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Handle that stops the playback in progress.
    ///
    /// The flag is cleared when the next playback starts.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop),
        }
    }

    /// Play `waveform`, blocking the calling thread.
    ///
    /// With `interruptible` set (and barge-in enabled), a capture stream and a
    /// barge-in gate are opened alongside playback. All streams are closed
    /// before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the playback stream cannot be opened or fails
    /// fatally. A capture failure only disables barge-in for this playback.
    pub fn play(
        &self,
        waveform: &Waveform,
        interruptible: bool,
        cancel: &CancellationToken,
    ) -> Result<PlaybackReport> {
        self.stop.store(false, Ordering::SeqCst);
        let chunk_samples = self.config.playback_chunk_samples;
        let total_chunks = waveform.chunk_count(chunk_samples);
        let report = |outcome, chunks_written| PlaybackReport {
            outcome,
            chunks_written,
            total_chunks,
        };

        let mut output = PlaybackGuard(
            self.device
                .open_playback(StreamSpec::playback(waveform.sample_rate(), chunk_samples))?,
        );

        let mut listener = if interruptible && self.config.enabled {
            match ListeningSession::open(
                self.device.as_ref(),
                Arc::clone(&self.classifier),
                &self.config.gate,
                self.window_ms,
                StreamSpec::capture(self.capture_rate, self.config.capture_frame_samples),
            ) {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!("barge-in unavailable, playing uninterruptibly: {e}");
                    None
                }
            }
        } else {
            None
        };

        debug!(
            "playing {:.2}s in {total_chunks} chunks, barge-in {}",
            waveform.duration().as_secs_f32(),
            if listener.is_some() { "on" } else { "off" }
        );

        let mut written = 0;
        for chunk in waveform.samples().chunks(chunk_samples) {
            if let Some(outcome) = self.interruption(&mut listener, cancel) {
                info!("playback {outcome} after {written}/{total_chunks} chunks");
                return Ok(report(outcome, written));
            }

            match output.0.write_frame(chunk) {
                Ok(()) => written += 1,
                Err(e) if e.is_recoverable_frame_error() => {
                    warn!("dropped playback chunk: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        // Queued audio is still audible: keep honouring stop and barge-in.
        let deadline = Instant::now() + output.0.pending()? + self.drain_grace;
        while !output.0.pending()?.is_zero() {
            if let Some(outcome) = self.interruption(&mut listener, cancel) {
                info!("playback {outcome} while draining {written}/{total_chunks} chunks");
                return Ok(report(outcome, written));
            }
            if listener.is_none() {
                std::thread::sleep(DRAIN_POLL);
            }
            if Instant::now() >= deadline {
                warn!("playback drain timed out");
                break;
            }
        }

        debug!("playback completed: {written}/{total_chunks} chunks");
        Ok(report(PlaybackOutcome::Completed, written))
    }

    /// Check the stop signals, then poll the barge-in gate for one frame.
    ///
    /// A fatal capture error drops the listener and playback carries on.
    fn interruption(
        &self,
        listener: &mut Option<ListeningSession>,
        cancel: &CancellationToken,
    ) -> Option<PlaybackOutcome> {
        if cancel.is_cancelled() || self.stop.load(Ordering::SeqCst) {
            return Some(PlaybackOutcome::Stopped);
        }
        let session = listener.as_mut()?;
        match poll_barge_in(session) {
            Ok(true) => Some(PlaybackOutcome::Interrupted),
            Ok(false) => None,
            Err(e) => {
                warn!("barge-in capture failed, continuing without it: {e}");
                *listener = None;
                None
            }
        }
    }

    /// Run [`BargeInPlayer::play`] on the blocking thread pool.
    ///
    /// # Errors
    ///
    /// Same as [`BargeInPlayer::play`].
    pub async fn play_async(
        &self,
        waveform: Waveform,
        interruptible: bool,
        cancel: &CancellationToken,
    ) -> Result<PlaybackReport> {
        let player = self.clone();
        let token = cancel.clone();
        tokio::task::spawn_blocking(move || player.play(&waveform, interruptible, &token))
            .await
            .map_err(|e| SpeechError::Pipeline(format!("playback task failed: {e}")))?
    }
}

/// Read one capture frame and report whether the user barged in.
///
/// Lost frames count as no barge-in.
fn poll_barge_in(session: &mut ListeningSession) -> Result<bool> {
    let frame = match session.stream.read_frame() {
        Ok(frame) => frame,
        Err(e) if e.is_recoverable_frame_error() => {
            debug!("skipping barge-in frame: {e}");
            return Ok(false);
        }
        Err(e) => return Err(e),
    };
    Ok(session.gate.process_frame(&frame)? == VoiceCommandState::Success)
}

impl std::fmt::Debug for BargeInPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BargeInPlayer")
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
    use crate::test_utils::{energy_classifier, test_config};

    fn player(device: &ScriptedDevice) -> BargeInPlayer {
        let dir = std::env::temp_dir();
        BargeInPlayer::new(
            Arc::new(device.clone()),
            energy_classifier(),
            &test_config(&dir),
        )
        .unwrap()
    }

    /// 40 chunks of 1536 samples at 24 kHz.
    fn long_reply() -> Waveform {
        Waveform::new(vec![1_000; 1536 * 40], 24_000)
    }

    #[test]
    fn uninterrupted_playback_writes_every_chunk() {
        let device = ScriptedDevice::new();
        let wave = Waveform::new(vec![1_000; 1536 * 3 + 10], 24_000);

        let report = player(&device)
            .play(&wave, true, &CancellationToken::new())
            .unwrap();

        assert_eq!(report.outcome, PlaybackOutcome::Completed);
        assert_eq!(report.chunks_written, 4);
        assert_eq!(report.total_chunks, 4);
        assert_eq!(device.played_samples(), wave.len());
        assert!(!device.is_open(StreamDirection::Playback));
        assert!(!device.is_open(StreamDirection::Capture));
    }

    #[test]
    fn user_speech_interrupts_mid_playback() {
        let device = ScriptedDevice::new();
        // 512-sample frames: speech leaves IDLE on the 7th read (4 x 512 >= 0.1 s)
        // and 8 x 512 silent samples cover 0.25 s on the 17th read.
        device.push_frames(&silence_frame(512), 3);
        device.push_frames(&speech_frame(512), 6);
        device.push_frames(&silence_frame(512), 8);

        let wave = long_reply();
        let report = player(&device)
            .play(&wave, true, &CancellationToken::new())
            .unwrap();

        assert_eq!(report.outcome, PlaybackOutcome::Interrupted);
        assert!(report.chunks_written < wave.chunk_count(1536));
        assert_eq!(report.chunks_written, 16);
        assert_eq!(device.played_chunks().len(), 16);
        assert_eq!(device.frames_read(), 17);
        assert_eq!(device.remaining_capture(), 0);
        assert!(!device.is_open(StreamDirection::Capture));
        assert!(!device.is_open(StreamDirection::Playback));
    }

    #[test]
    fn user_speech_while_the_queue_drains_interrupts() {
        let device = ScriptedDevice::new();
        device.push_frames(&speech_frame(512), 4);
        device.push_frames(&silence_frame(512), 8);
        device.hold_playback(30);

        let wave = Waveform::new(vec![1_000; 1536 * 2], 24_000);
        let report = player(&device)
            .play(&wave, true, &CancellationToken::new())
            .unwrap();

        // Both chunks were queued; the gate completed on the 12th read.
        assert_eq!(report.outcome, PlaybackOutcome::Interrupted);
        assert_eq!(report.chunks_written, 2);
        assert_eq!(report.total_chunks, 2);
        assert_eq!(device.frames_read(), 12);
        assert!(!device.is_open(StreamDirection::Capture));
        assert!(!device.is_open(StreamDirection::Playback));
    }

    #[test]
    fn non_interruptible_playback_ignores_speech() {
        let device = ScriptedDevice::new();
        device.push_frames(&speech_frame(512), 6);
        device.push_frames(&silence_frame(512), 8);

        let report = player(&device)
            .play(&long_reply(), false, &CancellationToken::new())
            .unwrap();
        assert_eq!(report.outcome, PlaybackOutcome::Completed);
        assert_eq!(report.chunks_written, 40);
        assert_eq!(device.open_count(StreamDirection::Capture), 0);
        assert_eq!(device.remaining_capture(), 14);
    }

    #[test]
    fn capture_overflow_does_not_stop_playback() {
        let device = ScriptedDevice::new();
        device.push_capture([CaptureEvent::Overflow, CaptureEvent::Overflow]);

        let report = player(&device)
            .play(&long_reply(), true, &CancellationToken::new())
            .unwrap();
        assert_eq!(report.outcome, PlaybackOutcome::Completed);
        assert_eq!(report.chunks_written, 40);
    }

    #[test]
    fn fatal_capture_error_disables_barge_in_only() {
        let device = ScriptedDevice::new();
        device.push_capture([CaptureEvent::Fault("mic gone".into())]);

        let report = player(&device)
            .play(&long_reply(), true, &CancellationToken::new())
            .unwrap();
        assert_eq!(report.outcome, PlaybackOutcome::Completed);
        assert_eq!(device.close_count(StreamDirection::Capture), 1);
    }

    #[test]
    fn cancellation_stops_before_the_first_chunk() {
        let device = ScriptedDevice::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = player(&device).play(&long_reply(), true, &cancel).unwrap();
        assert_eq!(report.outcome, PlaybackOutcome::Stopped);
        assert_eq!(report.chunks_written, 0);
        assert!(device.played_chunks().is_empty());
        assert!(!device.is_open(StreamDirection::Playback));
    }

    type Trigger = Arc<dyn Fn() + Send + Sync>;

    /// Playback device that runs a trigger from another thread after a
    /// number of writes.
    struct TriggerDevice {
        inner: ScriptedDevice,
        after: usize,
        trigger: std::sync::OnceLock<Trigger>,
    }

    struct TriggerStream {
        inner: Box<dyn PlaybackStream>,
        trigger: Option<Trigger>,
        remaining: usize,
    }

    impl PlaybackStream for TriggerStream {
        fn write_frame(&mut self, samples: &[i16]) -> Result<()> {
            self.inner.write_frame(samples)?;
            self.remaining = self.remaining.saturating_sub(1);
            if self.remaining == 0
                && let Some(trigger) = self.trigger.take()
            {
                std::thread::spawn(move || trigger()).join().unwrap();
            }
            Ok(())
        }

        fn pending(&self) -> Result<Duration> {
            self.inner.pending()
        }

        fn close(&mut self) {
            self.inner.close();
        }
    }

    impl AudioDevice for TriggerDevice {
        fn name(&self) -> &str {
            "trigger"
        }

        fn open_capture(&self, spec: StreamSpec) -> Result<Box<dyn crate::audio::CaptureStream>> {
            self.inner.open_capture(spec)
        }

        fn open_playback(&self, spec: StreamSpec) -> Result<Box<dyn PlaybackStream>> {
            Ok(Box::new(TriggerStream {
                inner: self.inner.open_playback(spec)?,
                trigger: self.trigger.get().cloned(),
                remaining: self.after,
            }))
        }
    }

    fn trigger_player(
        scripted: &ScriptedDevice,
        after: usize,
    ) -> (BargeInPlayer, Arc<TriggerDevice>) {
        let device = Arc::new(TriggerDevice {
            inner: scripted.clone(),
            after,
            trigger: std::sync::OnceLock::new(),
        });
        let player = BargeInPlayer::new(
            device.clone(),
            energy_classifier(),
            &test_config(&std::env::temp_dir()),
        )
        .unwrap();
        (player, device)
    }

    #[test]
    fn stop_handle_from_another_thread_ends_playback() {
        let scripted = ScriptedDevice::new();
        let (player, device) = trigger_player(&scripted, 5);
        let handle = player.stop_handle();
        assert!(device.trigger.set(Arc::new(move || handle.stop())).is_ok());

        let report = player
            .play(&long_reply(), true, &CancellationToken::new())
            .unwrap();
        assert_eq!(report.outcome, PlaybackOutcome::Stopped);
        assert_eq!(report.chunks_written, 5);
        assert_eq!(scripted.played_chunks().len(), 5);
        assert!(!scripted.is_open(StreamDirection::Playback));
        assert!(!scripted.is_open(StreamDirection::Capture));
    }

    #[test]
    fn cancellation_while_the_queue_drains_stops_playback() {
        let scripted = ScriptedDevice::new();
        scripted.hold_playback(1_000);
        let (player, device) = trigger_player(&scripted, 40);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        assert!(device.trigger.set(Arc::new(move || token.cancel())).is_ok());

        let report = player.play(&long_reply(), true, &cancel).unwrap();

        // Every chunk was queued before the token fired.
        assert_eq!(report.outcome, PlaybackOutcome::Stopped);
        assert_eq!(report.chunks_written, 40);
        assert_eq!(report.total_chunks, 40);
        assert!(!scripted.is_open(StreamDirection::Playback));
        assert!(!scripted.is_open(StreamDirection::Capture));
    }

    #[test]
    fn drain_without_a_listener_gives_up_after_the_grace_period() {
        let device = ScriptedDevice::new();
        device.hold_playback(usize::MAX);

        let wave = Waveform::new(vec![1_000; 1536], 24_000);
        let report = player(&device)
            .play(&wave, false, &CancellationToken::new())
            .unwrap();
        assert_eq!(report.outcome, PlaybackOutcome::Completed);
        assert_eq!(report.chunks_written, 1);
        assert!(!device.is_open(StreamDirection::Playback));
    }

    #[test]
    fn stale_stop_request_is_cleared_by_the_next_playback() {
        let device = ScriptedDevice::new();
        let player = player(&device);
        player.stop_handle().stop();

        let wave = Waveform::new(vec![1_000; 1536 * 2], 24_000);
        let report = player.play(&wave, false, &CancellationToken::new()).unwrap();
        assert_eq!(report.outcome, PlaybackOutcome::Completed);
        assert_eq!(report.chunks_written, 2);
    }

    #[tokio::test]
    async fn play_async_runs_on_the_blocking_pool() {
        let device = ScriptedDevice::new();
        let report = player(&device)
            .play_async(long_reply(), true, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.outcome, PlaybackOutcome::Completed);
        assert_eq!(device.played_chunks().len(), 40);
    }
}
