//! The in-memory PCM buffer store (C1).
//!
//! Unlike a typical feature-extraction decoder, this one does not collapse
//! channels to mono or resample: the playback engine needs to schedule the
//! exact samples it plays, so [`Track`] keeps one `Vec<f32>` per channel at
//! the file's native sample rate.

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use rodio::Source;

use crate::errors::{AnalysisError, AnalysisResult};

/// A fully decoded audio source.
///
/// Invariants: all channel sequences have identical length; `sample_rate > 0`;
/// every sample is finite.
#[derive(Debug, Clone)]
pub struct Track {
    pub path: PathBuf,
    pub sample_rate: u32,
    /// One contiguous sample sequence per channel, each of length `frame_count`.
    pub channels: Vec<Vec<f32>>,
}

impl Track {
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    #[must_use]
    pub fn duration(&self) -> f64 {
        f64::from(self.frame_count() as u32) / f64::from(self.sample_rate)
    }

    /// Channel 0's samples, the channel all analysis stages operate on.
    #[must_use]
    pub fn mono(&self) -> &[f32] {
        self.channels.first().map_or(&[], Vec::as_slice)
    }
}

/// Decodes an audio file into a [`Track`].
///
/// Implementations should reject files with zero decoded frames with
/// [`AnalysisError::ErrEmpty`] and unsupported codecs with
/// [`AnalysisError::ErrFormat`].
pub trait Decoder {
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, the container is
    /// unsupported, the stream has no known length, or the decoded audio is
    /// empty.
    fn decode(path: &Path) -> AnalysisResult<Track>;

    /// Loads a track from `path`, replacing any previous track on success.
    ///
    /// # Errors
    ///
    /// Propagates [`Decoder::decode`] errors. Partial loads are never
    /// returned: either a fully populated `Track` or an error.
    fn load<P: AsRef<Path>>(path: P) -> AnalysisResult<Track> {
        Self::decode(path.as_ref())
    }
}

pub struct RodioDecoder;

impl Decoder for RodioDecoder {
    fn decode(path: &Path) -> AnalysisResult<Track> {
        let file = BufReader::new(File::open(path)?);
        let source = rodio::Decoder::new(file)
            .map_err(AnalysisError::from)?
            .convert_samples::<f32>();

        let num_channels = source.channels() as usize;
        if num_channels == 0 {
            return Err(AnalysisError::ErrFormat("no channel layout".into()));
        }
        let sample_rate = source.sample_rate();
        if sample_rate == 0 {
            return Err(AnalysisError::ErrFormat("zero sample rate".into()));
        }

        let mut channels: Vec<Vec<f32>> = vec![Vec::new(); num_channels];
        for (i, sample) in source.into_iter().enumerate() {
            if !sample.is_finite() {
                return Err(AnalysisError::ErrDecode("non-finite sample".into()));
            }
            channels[i % num_channels].push(sample);
        }

        if channels.iter().all(Vec::is_empty) {
            return Err(AnalysisError::ErrEmpty);
        }

        Ok(Track {
            path: path.to_owned(),
            sample_rate,
            channels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Writes a minimal mono 32-bit IEEE-float WAV file, so tests don't need
    /// a decoder-specific fixture asset.
    fn sine_wav(path: &Path, freq: f32, duration_secs: f32, sample_rate: u32) {
        let total = (duration_secs * sample_rate as f32) as u32;
        let data_len = total * 4;
        let mut buf = Vec::with_capacity(44 + data_len as usize);
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&(36 + data_len).to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&16u32.to_le_bytes());
        buf.extend_from_slice(&3u16.to_le_bytes()); // IEEE float
        buf.extend_from_slice(&1u16.to_le_bytes()); // mono
        buf.extend_from_slice(&sample_rate.to_le_bytes());
        buf.extend_from_slice(&(sample_rate * 4).to_le_bytes()); // byte rate
        buf.extend_from_slice(&4u16.to_le_bytes()); // block align
        buf.extend_from_slice(&32u16.to_le_bytes()); // bits per sample
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&data_len.to_le_bytes());
        for i in 0..total {
            let t = i as f32 / sample_rate as f32;
            let sample = (2.0 * std::f32::consts::PI * freq * t).sin();
            buf.extend_from_slice(&sample.to_le_bytes());
        }
        let mut f = File::create(path).unwrap();
        f.write_all(&buf).unwrap();
    }

    #[test]
    fn decodes_a_mono_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sine.wav");
        sine_wav(&path, 440.0, 1.0, 44100);

        let track = RodioDecoder::load(&path).unwrap();
        assert_eq!(track.sample_rate, 44100);
        assert_eq!(track.channel_count(), 1);
        assert!(track.frame_count() > 0);
        assert!(track.mono().iter().all(|s| s.is_finite()));
    }

    #[test]
    fn rejects_missing_file() {
        let err = RodioDecoder::load(Path::new("/nonexistent/path.wav"));
        assert!(err.is_err());
    }
}
