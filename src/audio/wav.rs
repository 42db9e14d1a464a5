//! WAV artifacts: utterances written for STT, synthesized speech read back.

use super::{Waveform, f32_to_i16};
use crate::error::{Result, SpeechError};
use std::io::{Cursor, Read, Seek};
use std::path::Path;

fn mono_i16_spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Write mono 16-bit samples to `path`, creating parent directories.
///
/// # Errors
///
/// Returns an audio error if the file cannot be created or written.
pub fn write_mono_i16(path: &Path, samples: &[i16], sample_rate: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = hound::WavWriter::create(path, mono_i16_spec(sample_rate)).map_err(|e| {
        SpeechError::Audio(format!("failed to create wav {}: {e}", path.display()))
    })?;
    for &s in samples {
        writer
            .write_sample(s)
            .map_err(|e| SpeechError::Audio(format!("failed to write wav sample: {e}")))?;
    }
    writer
        .finalize()
        .map_err(|e| SpeechError::Audio(format!("failed to finalize wav: {e}")))?;
    Ok(())
}

/// Encode mono 16-bit samples as an in-memory WAV file.
///
/// # Errors
///
/// Returns an audio error if encoding fails.
pub fn encode_mono_i16(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, mono_i16_spec(sample_rate))
            .map_err(|e| SpeechError::Audio(format!("failed to start wav encoding: {e}")))?;
        for &s in samples {
            writer
                .write_sample(s)
                .map_err(|e| SpeechError::Audio(format!("failed to encode wav sample: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| SpeechError::Audio(format!("failed to finalize wav: {e}")))?;
    }
    Ok(cursor.into_inner())
}

/// Read a WAV file into a mono waveform at its native sample rate.
///
/// # Errors
///
/// Returns an audio error if the file is missing or not a valid WAV.
pub fn read_waveform(path: &Path) -> Result<Waveform> {
    let reader = hound::WavReader::open(path)
        .map_err(|e| SpeechError::Audio(format!("cannot open wav {}: {e}", path.display())))?;
    collect_mono(reader)
}

/// Decode WAV bytes (e.g. an HTTP response body) into a mono waveform.
///
/// # Errors
///
/// Returns an audio error if the bytes are not a valid WAV.
pub fn decode_waveform(bytes: &[u8]) -> Result<Waveform> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| SpeechError::Audio(format!("invalid wav data: {e}")))?;
    collect_mono(reader)
}

fn collect_mono<R: Read + Seek>(mut reader: hound::WavReader<R>) -> Result<Waveform> {
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| {
                    s.map_err(|e| SpeechError::Audio(format!("wav read error: {e}")))
                        .map(|v| v as f32 / max)
                })
                .collect::<Result<Vec<f32>>>()?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map_err(|e| SpeechError::Audio(format!("wav read error: {e}"))))
            .collect::<Result<Vec<f32>>>()?,
    };

    let mono: Vec<i16> = if spec.channels > 1 {
        let ch = spec.channels as usize;
        samples
            .chunks(ch)
            .map(|frame| f32_to_i16(frame.iter().sum::<f32>() / ch as f32))
            .collect()
    } else {
        samples.into_iter().map(f32_to_i16).collect()
    };

    Ok(Waveform::new(mono, spec.sample_rate))
}
