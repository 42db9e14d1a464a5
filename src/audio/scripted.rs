//! In-memory audio device driven by a script.
//!
//! Capture streams replay a shared queue of frames and injected faults; once
//! the script runs out they return silence. Playback streams record every
//! chunk written. Used by unit and integration tests.

use super::{
    AudioDevice, AudioFrame, CaptureStream, PlaybackStream, SlotLease, StreamDirection,
    StreamSlots, StreamSpec,
};
use crate::error::{Result, SpeechError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Amplitude of generated speech frames (about -6 dBFS).
const SPEECH_AMPLITUDE: f32 = 16_000.0;

/// Queued audio reported while playback is held.
const HELD_CHUNK: Duration = Duration::from_millis(64);

/// One scripted capture event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// Deliver these samples as the next frame.
    Frame(Vec<i16>),
    /// Fail the next read with an overflow.
    Overflow,
    /// Fail the next read with a frame timeout.
    Timeout,
    /// Fail the next read with a fatal device error.
    Fault(String),
}

#[derive(Debug, Default)]
struct Shared {
    script: Mutex<VecDeque<CaptureEvent>>,
    played: Mutex<Vec<Vec<i16>>>,
    frames_read: AtomicUsize,
    held_polls: AtomicUsize,
    capture_opens: AtomicUsize,
    playback_opens: AtomicUsize,
    capture_closes: AtomicUsize,
    playback_closes: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Poisoning only happens when a test thread panicked; the data is still usable.
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Scripted audio device. Clones share the same script and recordings.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDevice {
    shared: Arc<Shared>,
    slots: StreamSlots,
}

impl ScriptedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append capture events to the script.
    pub fn push_capture<I>(&self, events: I)
    where
        I: IntoIterator<Item = CaptureEvent>,
    {
        lock(&self.shared.script).extend(events);
    }

    /// Append `count` copies of `frame`.
    pub fn push_frames(&self, frame: &[i16], count: usize) {
        self.push_capture(std::iter::repeat_n(CaptureEvent::Frame(frame.to_vec()), count));
    }

    /// Capture events not yet consumed.
    pub fn remaining_capture(&self) -> usize {
        lock(&self.shared.script).len()
    }

    /// Every chunk written to playback, in order.
    pub fn played_chunks(&self) -> Vec<Vec<i16>> {
        lock(&self.shared.played).clone()
    }

    /// Total samples written to playback.
    pub fn played_samples(&self) -> usize {
        lock(&self.shared.played).iter().map(Vec::len).sum()
    }

    /// Keep reporting queued playback audio for the next `polls` calls to
    /// [`PlaybackStream::pending`], as a device with a deep buffer would.
    pub fn hold_playback(&self, polls: usize) {
        self.shared.held_polls.store(polls, Ordering::SeqCst);
    }

    /// Capture frames delivered successfully (scripted or silence).
    pub fn frames_read(&self) -> usize {
        self.shared.frames_read.load(Ordering::SeqCst)
    }

    pub fn open_count(&self, direction: StreamDirection) -> usize {
        match direction {
            StreamDirection::Capture => self.shared.capture_opens.load(Ordering::SeqCst),
            StreamDirection::Playback => self.shared.playback_opens.load(Ordering::SeqCst),
        }
    }

    pub fn close_count(&self, direction: StreamDirection) -> usize {
        match direction {
            StreamDirection::Capture => self.shared.capture_closes.load(Ordering::SeqCst),
            StreamDirection::Playback => self.shared.playback_closes.load(Ordering::SeqCst),
        }
    }

    /// Whether a stream in `direction` is currently open.
    pub fn is_open(&self, direction: StreamDirection) -> bool {
        self.slots.is_open(direction)
    }
}

impl AudioDevice for ScriptedDevice {
    fn name(&self) -> &str {
        "scripted"
    }

    fn open_capture(&self, spec: StreamSpec) -> Result<Box<dyn CaptureStream>> {
        let lease = self.slots.acquire(StreamDirection::Capture)?;
        self.shared.capture_opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedCapture {
            shared: Arc::clone(&self.shared),
            spec,
            lease: Some(lease),
        }))
    }

    fn open_playback(&self, _spec: StreamSpec) -> Result<Box<dyn PlaybackStream>> {
        let lease = self.slots.acquire(StreamDirection::Playback)?;
        self.shared.playback_opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedPlayback {
            shared: Arc::clone(&self.shared),
            lease: Some(lease),
        }))
    }
}

struct ScriptedCapture {
    shared: Arc<Shared>,
    spec: StreamSpec,
    lease: Option<SlotLease>,
}

impl CaptureStream for ScriptedCapture {
    fn read_frame(&mut self) -> Result<AudioFrame> {
        if self.lease.is_none() {
            return Err(SpeechError::Audio("capture stream is closed".into()));
        }
        let event = lock(&self.shared.script).pop_front();
        let samples = match event {
            Some(CaptureEvent::Frame(samples)) => samples,
            Some(CaptureEvent::Overflow) => {
                return Err(SpeechError::Overflow("scripted overflow".into()));
            }
            Some(CaptureEvent::Timeout) => {
                return Err(SpeechError::FrameTimeout("scripted timeout".into()));
            }
            Some(CaptureEvent::Fault(msg)) => return Err(SpeechError::Audio(msg)),
            None => vec![0; self.spec.frame_samples],
        };
        self.shared.frames_read.fetch_add(1, Ordering::SeqCst);
        Ok(AudioFrame::new(samples, self.spec.sample_rate))
    }

    fn close(&mut self) {
        if let Some(mut lease) = self.lease.take() {
            lease.release();
            self.shared.capture_closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for ScriptedCapture {
    fn drop(&mut self) {
        self.close();
    }
}

struct ScriptedPlayback {
    shared: Arc<Shared>,
    lease: Option<SlotLease>,
}

impl PlaybackStream for ScriptedPlayback {
    fn write_frame(&mut self, samples: &[i16]) -> Result<()> {
        if self.lease.is_none() {
            return Err(SpeechError::Audio("playback stream is closed".into()));
        }
        lock(&self.shared.played).push(samples.to_vec());
        Ok(())
    }

    fn pending(&self) -> Result<Duration> {
        let held = self
            .shared
            .held_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        Ok(if held.is_ok() {
            HELD_CHUNK
        } else {
            Duration::ZERO
        })
    }

    fn close(&mut self) {
        if let Some(mut lease) = self.lease.take() {
            lease.release();
            self.shared.playback_closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for ScriptedPlayback {
    fn drop(&mut self) {
        self.close();
    }
}

/// A loud 440 Hz tone at 16 kHz, classified as speech at every aggressiveness.
pub fn speech_frame(len: usize) -> Vec<i16> {
    (0..len)
        .map(|i| {
            let t = i as f32 / 16_000.0;
            (SPEECH_AMPLITUDE * (2.0 * std::f32::consts::PI * 440.0 * t).sin()) as i16
        })
        .collect()
}

/// Digital silence.
pub fn silence_frame(len: usize) -> Vec<i16> {
    vec![0; len]
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn capture_replays_script_then_silence() {
        let device = ScriptedDevice::new();
        device.push_frames(&speech_frame(4), 1);
        device.push_capture([CaptureEvent::Overflow]);

        let mut stream = device.open_capture(StreamSpec::capture(16_000, 8)).unwrap();
        assert_eq!(stream.read_frame().unwrap().len(), 4);
        assert!(stream.read_frame().unwrap_err().is_recoverable_frame_error());
        let tail = stream.read_frame().unwrap();
        assert_eq!(tail.samples(), &[0; 8]);
        assert_eq!(device.frames_read(), 2);
    }

    #[test]
    fn second_capture_open_fails_until_first_closes() {
        let device = ScriptedDevice::new();
        let mut first = device.open_capture(StreamSpec::capture(16_000, 8)).unwrap();
        assert!(device.open_capture(StreamSpec::capture(16_000, 8)).is_err());
        first.close();
        first.close();
        assert_eq!(device.close_count(StreamDirection::Capture), 1);
        assert!(device.open_capture(StreamSpec::capture(16_000, 8)).is_ok());
    }

    #[test]
    fn playback_records_chunks_and_rejects_writes_after_close() {
        let device = ScriptedDevice::new();
        let mut out = device.open_playback(StreamSpec::playback(24_000, 4)).unwrap();
        out.write_frame(&[1, 2, 3]).unwrap();
        out.close();
        assert!(out.write_frame(&[4]).is_err());
        assert_eq!(device.played_chunks(), vec![vec![1, 2, 3]]);
        assert!(!device.is_open(StreamDirection::Playback));
    }

    #[test]
    fn held_playback_reports_queued_audio_for_the_given_polls() {
        let device = ScriptedDevice::new();
        let out = device.open_playback(StreamSpec::playback(24_000, 4)).unwrap();
        assert_eq!(out.pending().unwrap(), Duration::ZERO);

        device.hold_playback(2);
        assert!(out.pending().unwrap() > Duration::ZERO);
        assert!(out.pending().unwrap() > Duration::ZERO);
        assert_eq!(out.pending().unwrap(), Duration::ZERO);
    }

    #[test]
    fn dropping_a_stream_releases_its_slot() {
        let device = ScriptedDevice::new();
        {
            let _out = device.open_playback(StreamSpec::playback(24_000, 4)).unwrap();
            assert!(device.is_open(StreamDirection::Playback));
        }
        assert!(!device.is_open(StreamDirection::Playback));
        assert_eq!(device.close_count(StreamDirection::Playback), 1);
    }
}
