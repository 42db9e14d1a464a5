//! System microphone and speakers via cpal.
//!
//! Capture runs at the device's native rate and channel count; the callback
//! downmixes to mono, resamples to the requested rate and hands 16-bit chunks
//! to the reader over a bounded channel. Playback works the other way round
//! through a shared sample queue drained by the output callback.

use super::{
    AudioDevice, AudioFrame, CaptureStream, PlaybackStream, SlotLease, StreamDirection,
    StreamSlots, StreamSpec, f32_to_i16, i16_to_f32, ms_to_samples,
};
use crate::config::AudioConfig;
use crate::error::{Result, SpeechError};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, RecvTimeoutError, TrySendError, bounded};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Callback chunks buffered between the input callback and the reader.
const CAPTURE_CHANNEL_SIZE: usize = 64;

/// Poll interval while waiting for the playback queue to make room.
const PLAYBACK_POLL: Duration = Duration::from_millis(5);

/// Audio device manager backed by the default cpal host.
pub struct CpalDevice {
    name: String,
    input: Option<cpal::Device>,
    output: Option<cpal::Device>,
    io_timeout: Duration,
    buffer_ms: u32,
    slots: StreamSlots,
}

impl CpalDevice {
    /// Resolve the configured input and output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if neither an input nor an output device is available,
    /// or a named device does not exist.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let input = match config.input_device {
            Some(ref name) => Some(find_device(host.input_devices(), name, "input")?),
            None => host.default_input_device(),
        };
        let output = match config.output_device {
            Some(ref name) => Some(find_device(host.output_devices(), name, "output")?),
            None => host.default_output_device(),
        };

        if input.is_none() && output.is_none() {
            return Err(SpeechError::Audio("no audio devices available".into()));
        }

        let input_name = input.as_ref().map(device_name);
        let output_name = output.as_ref().map(device_name);
        info!(
            "using input device: {}, output device: {}",
            input_name.as_deref().unwrap_or("<none>"),
            output_name.as_deref().unwrap_or("<none>")
        );

        Ok(Self {
            name: format!(
                "{} / {}",
                input_name.as_deref().unwrap_or("<none>"),
                output_name.as_deref().unwrap_or("<none>")
            ),
            input,
            output,
            io_timeout: Duration::from_millis(config.io_timeout_ms),
            buffer_ms: config.device_buffer_ms,
            slots: StreamSlots::new(),
        })
    }

    /// List available input devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_input_devices() -> Result<Vec<String>> {
        let devices = cpal::default_host()
            .input_devices()
            .map_err(|e| SpeechError::Audio(format!("cannot enumerate devices: {e}")))?;
        Ok(devices
            .filter_map(|d| d.description().ok().map(|desc| desc.name().to_owned()))
            .collect())
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let devices = cpal::default_host()
            .output_devices()
            .map_err(|e| SpeechError::Audio(format!("cannot enumerate devices: {e}")))?;
        Ok(devices
            .filter_map(|d| d.description().ok().map(|desc| desc.name().to_owned()))
            .collect())
    }
}

fn find_device<I>(
    devices: std::result::Result<I, cpal::DevicesError>,
    name: &str,
    kind: &str,
) -> Result<cpal::Device>
where
    I: Iterator<Item = cpal::Device>,
{
    devices
        .map_err(|e| SpeechError::Audio(format!("cannot enumerate devices: {e}")))?
        .find(|d| {
            d.description()
                .ok()
                .map(|desc| desc.name() == name)
                .unwrap_or(false)
        })
        .ok_or_else(|| SpeechError::Audio(format!("{kind} device '{name}' not found")))
}

fn device_name(device: &cpal::Device) -> String {
    device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into())
}

impl AudioDevice for CpalDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn open_capture(&self, spec: StreamSpec) -> Result<Box<dyn CaptureStream>> {
        let device = self
            .input
            .as_ref()
            .ok_or_else(|| SpeechError::Audio("no input device".into()))?;
        let lease = self.slots.acquire(StreamDirection::Capture)?;

        let default_config = device
            .default_input_config()
            .map_err(|e| SpeechError::Audio(format!("no default input config: {e}")))?;
        let native_rate = default_config.sample_rate();
        let native_channels = default_config.channels();
        let stream_config = StreamConfig {
            channels: native_channels,
            sample_rate: native_rate,
            buffer_size: cpal::BufferSize::Default,
        };
        let target_rate = spec.sample_rate;

        let (tx, rx) = bounded::<Vec<i16>>(CAPTURE_CHANNEL_SIZE);
        let overflowed = Arc::new(AtomicBool::new(false));
        let overflowed_cb = Arc::clone(&overflowed);

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    let mono = if native_channels > 1 {
                        to_mono(data, native_channels)
                    } else {
                        data.to_vec()
                    };
                    let samples = resample(&mono, native_rate, target_rate);
                    let chunk: Vec<i16> = samples.iter().map(|&s| f32_to_i16(s)).collect();
                    // Never block the audio thread; a full channel is an overflow.
                    match tx.try_send(chunk) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            overflowed_cb.store(true, Ordering::Relaxed);
                        }
                        Err(TrySendError::Disconnected(_)) => {}
                    }
                },
                move |err| {
                    error!("audio input stream error: {err}");
                },
                None,
            )
            .map_err(|e| SpeechError::Audio(format!("failed to build input stream: {e}")))?;

        stream
            .play()
            .map_err(|e| SpeechError::Audio(format!("failed to start input stream: {e}")))?;

        info!(
            "capture opened: native {}Hz x{} -> {}Hz, {} samples/frame",
            native_rate, native_channels, target_rate, spec.frame_samples
        );

        Ok(Box::new(CpalCaptureStream {
            stream: Some(stream),
            rx,
            pending: VecDeque::with_capacity(spec.frame_samples * 2),
            overflowed,
            frame_samples: spec.frame_samples,
            sample_rate: target_rate,
            timeout: self.io_timeout,
            lease,
        }))
    }

    fn open_playback(&self, spec: StreamSpec) -> Result<Box<dyn PlaybackStream>> {
        let device = self
            .output
            .as_ref()
            .ok_or_else(|| SpeechError::Audio("no output device".into()))?;
        let lease = self.slots.acquire(StreamDirection::Playback)?;

        let default_config = device
            .default_output_config()
            .map_err(|e| SpeechError::Audio(format!("no default output config: {e}")))?;
        let native_rate = default_config.sample_rate();
        let native_channels = default_config.channels();
        let stream_config = StreamConfig {
            channels: native_channels,
            sample_rate: native_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let queue = Arc::new(Mutex::new(VecDeque::<f32>::new()));
        let queue_cb = Arc::clone(&queue);
        let channels = usize::from(native_channels.max(1));

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let Ok(mut queue) = queue_cb.lock() else {
                        data.fill(0.0);
                        return;
                    };
                    for frame in data.chunks_mut(channels) {
                        let sample = queue.pop_front().unwrap_or(0.0);
                        frame.fill(sample);
                    }
                },
                move |err| {
                    error!("audio output stream error: {err}");
                },
                None,
            )
            .map_err(|e| SpeechError::Audio(format!("failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| SpeechError::Audio(format!("failed to start output stream: {e}")))?;

        info!(
            "playback opened: {}Hz source -> native {}Hz x{}",
            spec.sample_rate, native_rate, native_channels
        );

        Ok(Box::new(CpalPlaybackStream {
            stream: Some(stream),
            queue,
            source_rate: spec.sample_rate,
            native_rate,
            capacity: ms_to_samples(native_rate, self.buffer_ms).max(1),
            timeout: self.io_timeout,
            lease,
        }))
    }
}

struct CpalCaptureStream {
    stream: Option<cpal::Stream>,
    rx: Receiver<Vec<i16>>,
    pending: VecDeque<i16>,
    overflowed: Arc<AtomicBool>,
    frame_samples: usize,
    sample_rate: u32,
    timeout: Duration,
    lease: SlotLease,
}

impl CaptureStream for CpalCaptureStream {
    fn read_frame(&mut self) -> Result<AudioFrame> {
        if self.stream.is_none() {
            return Err(SpeechError::Audio("capture stream is closed".into()));
        }
        if self.overflowed.swap(false, Ordering::Relaxed) {
            // Samples were dropped; whatever is buffered is no longer contiguous.
            self.pending.clear();
            return Err(SpeechError::Overflow("input buffer overflowed".into()));
        }

        let deadline = Instant::now() + self.timeout;
        while self.pending.len() < self.frame_samples {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(SpeechError::FrameTimeout(format!(
                        "no capture frame within {}ms",
                        self.timeout.as_millis()
                    )));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SpeechError::Audio("capture stream disconnected".into()));
                }
            }
        }

        let samples: Vec<i16> = self.pending.drain(..self.frame_samples).collect();
        Ok(AudioFrame::new(samples, self.sample_rate))
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            self.pending.clear();
            debug!("capture stream closed");
        }
        self.lease.release();
    }
}

impl Drop for CpalCaptureStream {
    fn drop(&mut self) {
        self.close();
    }
}

struct CpalPlaybackStream {
    stream: Option<cpal::Stream>,
    queue: Arc<Mutex<VecDeque<f32>>>,
    source_rate: u32,
    native_rate: u32,
    capacity: usize,
    timeout: Duration,
    lease: SlotLease,
}

impl CpalPlaybackStream {
    fn queued(&self) -> Result<usize> {
        self.queue
            .lock()
            .map(|q| q.len())
            .map_err(|e| SpeechError::Audio(format!("playback queue lock poisoned: {e}")))
    }
}

impl PlaybackStream for CpalPlaybackStream {
    fn write_frame(&mut self, samples: &[i16]) -> Result<()> {
        if self.stream.is_none() {
            return Err(SpeechError::Audio("playback stream is closed".into()));
        }
        let mono: Vec<f32> = samples.iter().map(|&s| i16_to_f32(s)).collect();
        let converted = resample(&mono, self.source_rate, self.native_rate);

        let deadline = Instant::now() + self.timeout;
        while self.queued()? + converted.len() > self.capacity {
            if Instant::now() >= deadline {
                return Err(SpeechError::FrameTimeout(format!(
                    "playback queue still full after {}ms",
                    self.timeout.as_millis()
                )));
            }
            std::thread::sleep(PLAYBACK_POLL);
        }

        self.queue
            .lock()
            .map_err(|e| SpeechError::Audio(format!("playback queue lock poisoned: {e}")))?
            .extend(converted);
        Ok(())
    }

    fn pending(&self) -> Result<Duration> {
        let queued = self.queued()?;
        Ok(Duration::from_secs_f64(
            queued as f64 / f64::from(self.native_rate.max(1)),
        ))
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            if let Ok(mut queue) = self.queue.lock() {
                queue.clear();
            }
            debug!("playback stream closed");
        }
        self.lease.release();
    }
}

impl Drop for CpalPlaybackStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Linear-interpolation resampler.
///
/// Good enough for speech in both directions (48kHz capture down to 16kHz,
/// 24kHz synthesis up to the output device rate).
fn resample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() || src_rate == 0 || dst_rate == 0 {
        return samples.to_vec();
    }

    let ratio = src_rate as f64 / dst_rate as f64;
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            samples[idx] as f64 * (1.0 - frac) + samples[idx + 1] as f64 * frac
        } else {
            samples[idx.min(samples.len() - 1)] as f64
        };

        output.push(sample as f32);
    }

    output
}
