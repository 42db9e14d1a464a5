//! Frame-level audio I/O.
//!
//! The turn-taking loops only see [`AudioDevice`], [`CaptureStream`] and
//! [`PlaybackStream`]. A device is an explicit manager object handed to the
//! recorder and player; it hands out at most one capture and one playback
//! stream at a time, and a stream gives its slot back when closed or dropped.

pub mod cpal_device;
pub mod scripted;
pub mod wav;

use crate::error::{Result, SpeechError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Full-scale value used to map 16-bit PCM to and from `f32`.
const I16_SCALE: f32 = 32_768.0;

/// A fixed-length block of mono 16-bit PCM samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }
}

/// Mono 16-bit PCM audio produced by speech synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Waveform {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }

    /// Number of playback chunks of `chunk_samples` needed to play the whole waveform.
    pub fn chunk_count(&self, chunk_samples: usize) -> usize {
        if chunk_samples == 0 {
            return 0;
        }
        self.samples.len().div_ceil(chunk_samples)
    }

    /// Linearly fade the last `ms` milliseconds to zero.
    #[must_use]
    pub fn with_fade_out(mut self, ms: u32) -> Self {
        let fade_len = ms_to_samples(self.sample_rate, ms).min(self.samples.len());
        if fade_len == 0 {
            return self;
        }
        let start = self.samples.len() - fade_len;
        for (i, sample) in self.samples[start..].iter_mut().enumerate() {
            let gain = 1.0 - (i as f32 + 1.0) / fade_len as f32;
            *sample = (f32::from(*sample) * gain) as i16;
        }
        self
    }

    /// Append `ms` milliseconds of silence.
    #[must_use]
    pub fn with_tail_padding(mut self, ms: u32) -> Self {
        let pad = ms_to_samples(self.sample_rate, ms);
        self.samples.resize(self.samples.len() + pad, 0);
        self
    }
}

/// Which way audio flows through a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    Capture,
    Playback,
}

impl std::fmt::Display for StreamDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Capture => f.write_str("capture"),
            Self::Playback => f.write_str("playback"),
        }
    }
}

/// Parameters for opening a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    pub direction: StreamDirection,
    pub sample_rate: u32,
    /// Always 1: the engine works on mono audio only.
    pub channels: u16,
    pub frame_samples: usize,
}

impl StreamSpec {
    pub fn capture(sample_rate: u32, frame_samples: usize) -> Self {
        Self {
            direction: StreamDirection::Capture,
            sample_rate,
            channels: 1,
            frame_samples,
        }
    }

    pub fn playback(sample_rate: u32, frame_samples: usize) -> Self {
        Self {
            direction: StreamDirection::Playback,
            sample_rate,
            channels: 1,
            frame_samples,
        }
    }
}

/// An open capture stream.
///
/// Streams are used from the thread that opened them, so they are not `Send`.
pub trait CaptureStream {
    /// Read exactly one frame of `frame_samples` samples.
    ///
    /// # Errors
    ///
    /// [`SpeechError::Overflow`] or [`SpeechError::FrameTimeout`] when a frame
    /// was lost; both are recoverable. Any other error is fatal for the stream.
    fn read_frame(&mut self) -> Result<AudioFrame>;

    /// Stop the stream and release the device slot. Idempotent.
    fn close(&mut self);
}

/// An open playback stream.
pub trait PlaybackStream {
    /// Queue one chunk of samples for playback.
    ///
    /// # Errors
    ///
    /// [`SpeechError::FrameTimeout`] when the device did not accept the chunk in time.
    fn write_frame(&mut self, samples: &[i16]) -> Result<()>;

    /// Audio written but not yet played. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns an error if the device queue cannot be inspected.
    fn pending(&self) -> Result<Duration>;

    /// Stop the stream immediately, discarding queued audio. Idempotent.
    fn close(&mut self);
}

/// A capture/playback device manager.
pub trait AudioDevice: Send + Sync {
    /// Human-readable device name for logs.
    fn name(&self) -> &str;

    /// Open a capture stream.
    ///
    /// # Errors
    ///
    /// Fails if a capture stream is already open on this device or the
    /// hardware stream cannot be built.
    fn open_capture(&self, spec: StreamSpec) -> Result<Box<dyn CaptureStream>>;

    /// Open a playback stream.
    ///
    /// # Errors
    ///
    /// Fails if a playback stream is already open on this device or the
    /// hardware stream cannot be built.
    fn open_playback(&self, spec: StreamSpec) -> Result<Box<dyn PlaybackStream>>;
}

/// Tracks which stream directions are currently open on a device.
#[derive(Debug, Clone, Default)]
pub struct StreamSlots {
    capture: Arc<AtomicBool>,
    playback: Arc<AtomicBool>,
}

impl StreamSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `direction`.
    ///
    /// # Errors
    ///
    /// Returns an audio error if a stream in that direction is already open.
    pub fn acquire(&self, direction: StreamDirection) -> Result<SlotLease> {
        let flag = match direction {
            StreamDirection::Capture => &self.capture,
            StreamDirection::Playback => &self.playback,
        };
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SpeechError::Audio(format!(
                "a {direction} stream is already open on this device"
            )));
        }
        Ok(SlotLease {
            flag: Some(Arc::clone(flag)),
        })
    }

    pub fn is_open(&self, direction: StreamDirection) -> bool {
        match direction {
            StreamDirection::Capture => self.capture.load(Ordering::Acquire),
            StreamDirection::Playback => self.playback.load(Ordering::Acquire),
        }
    }
}

/// Ownership of one open stream slot. Released on [`SlotLease::release`] or drop.
#[derive(Debug)]
pub struct SlotLease {
    flag: Option<Arc<AtomicBool>>,
}

impl SlotLease {
    pub fn release(&mut self) {
        if let Some(flag) = self.flag.take() {
            flag.store(false, Ordering::Release);
        }
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        self.release();
    }
}

pub(crate) fn ms_to_samples(sample_rate: u32, ms: u32) -> usize {
    (u64::from(sample_rate) * u64::from(ms) / 1000) as usize
}

pub(crate) fn seconds_to_samples(sample_rate: u32, seconds: f32) -> usize {
    (f64::from(seconds) * f64::from(sample_rate)).round().max(0.0) as usize
}

fn samples_to_duration(len: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(len as f64 / f64::from(sample_rate))
}

/// Inverse of [`i16_to_f32`]; `+1.0` saturates to `i16::MAX`.
pub(crate) fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * I16_SCALE).round() as i16
}

pub(crate) fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / I16_SCALE
}

/// RMS energy of 16-bit samples, on the \[-1, 1\] scale.
pub fn rms_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples
        .iter()
        .map(|&s| {
            let v = i16_to_f32(s);
            v * v
        })
        .sum();
    (sum_sq / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn frame_duration_follows_sample_rate() {
        let frame = AudioFrame::new(vec![0; 960], 16_000);
        assert_eq!(frame.duration(), Duration::from_millis(60));
    }

    #[test]
    fn chunk_count_rounds_up() {
        let wave = Waveform::new(vec![1; 1000], 24_000);
        assert_eq!(wave.chunk_count(300), 4);
        assert_eq!(wave.chunk_count(1000), 1);
        assert_eq!(wave.chunk_count(0), 0);
    }

    #[test]
    fn fade_out_ends_at_zero_and_keeps_head() {
        let wave = Waveform::new(vec![10_000; 2_000], 1_000).with_fade_out(500);
        assert_eq!(wave.samples()[0], 10_000);
        assert_eq!(wave.samples()[1_499], 10_000);
        assert_eq!(*wave.samples().last().unwrap(), 0);
        assert!(wave.samples()[1_750] < 10_000);
    }

    #[test]
    fn tail_padding_appends_silence() {
        let wave = Waveform::new(vec![5; 10], 1_000).with_tail_padding(100);
        assert_eq!(wave.len(), 110);
        assert!(wave.samples()[10..].iter().all(|&s| s == 0));
    }

    #[test]
    fn slots_allow_one_stream_per_direction() {
        let slots = StreamSlots::new();
        let lease = slots.acquire(StreamDirection::Capture).unwrap();
        assert!(slots.acquire(StreamDirection::Capture).is_err());
        let _playback = slots.acquire(StreamDirection::Playback).unwrap();
        drop(lease);
        assert!(!slots.is_open(StreamDirection::Capture));
        assert!(slots.acquire(StreamDirection::Capture).is_ok());
    }

    #[test]
    fn pcm_scaling_round_trips_every_sample() {
        for sample in i16::MIN..=i16::MAX {
            assert_eq!(f32_to_i16(i16_to_f32(sample)), sample);
        }
        assert_eq!(f32_to_i16(1.0), i16::MAX);
        assert_eq!(f32_to_i16(-1.5), i16::MIN);
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms_energy(&[0; 64]), 0.0);
        assert_eq!(rms_energy(&[]), 0.0);
        assert!(rms_energy(&[16_000; 64]) > 0.4);
    }
}
