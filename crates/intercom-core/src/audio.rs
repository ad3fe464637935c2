//! Audio sources, gain snapshots and the two-stage mix.
//!
//! Microphone, TTS and media are each attenuated by their own gain and
//! summed; the sum is then trimmed by the master gain. Master is never a
//! peer of the other three.

use serde::{Deserialize, Serialize};

/// One of the four gain stages a volume directive can target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioSource {
    Microphone,
    #[serde(rename = "TTS", alias = "Tts", alias = "tts")]
    Tts,
    Media,
    Master,
}

impl AudioSource {
    pub const ALL: [AudioSource; 4] = [
        AudioSource::Microphone,
        AudioSource::Tts,
        AudioSource::Media,
        AudioSource::Master,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Microphone => "Microphone",
            Self::Tts => "TTS",
            Self::Media => "Media",
            Self::Master => "Master",
        }
    }
}

impl std::fmt::Display for AudioSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AudioSource {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "microphone" | "mic" => Ok(Self::Microphone),
            "tts" => Ok(Self::Tts),
            "media" => Ok(Self::Media),
            "master" => Ok(Self::Master),
            other => Err(format!("unknown audio source: {other}")),
        }
    }
}

/// Clamp a gain into [0, 1]. Non-finite input yields `None`.
pub fn clamp_gain(value: f32) -> Option<f32> {
    value.is_finite().then(|| value.clamp(0.0, 1.0))
}

/// An immutable set of the four gains. Swapped whole, never edited in place
/// while the mixing path may be reading it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GainSet {
    pub microphone: f32,
    pub tts: f32,
    pub media: f32,
    pub master: f32,
}

impl Default for GainSet {
    fn default() -> Self {
        Self {
            microphone: 1.0,
            tts: 1.0,
            media: 1.0,
            master: 1.0,
        }
    }
}

impl GainSet {
    pub fn get(&self, source: AudioSource) -> f32 {
        match source {
            AudioSource::Microphone => self.microphone,
            AudioSource::Tts => self.tts,
            AudioSource::Media => self.media,
            AudioSource::Master => self.master,
        }
    }

    /// Copy of `self` with one gain replaced (clamped into [0, 1]).
    #[must_use]
    pub fn with(mut self, source: AudioSource, value: f32) -> Self {
        let value = value.clamp(0.0, 1.0);
        match source {
            AudioSource::Microphone => self.microphone = value,
            AudioSource::Tts => self.tts = value,
            AudioSource::Media => self.media = value,
            AudioSource::Master => self.master = value,
        }
        self
    }
}

/// Mix one frame. All slices are interleaved samples of the same layout;
/// a shorter source slice contributes silence past its end.
///
/// The result is not clamped; saturation happens at encode time.
pub fn mix_frame(gains: &GainSet, mic: &[f32], tts: &[f32], media: &[f32], out: &mut [f32]) {
    for (i, slot) in out.iter_mut().enumerate() {
        let m = mic.get(i).copied().unwrap_or(0.0);
        let t = tts.get(i).copied().unwrap_or(0.0);
        let d = media.get(i).copied().unwrap_or(0.0);
        let sum = m * gains.microphone + t * gains.tts + d * gains.media;
        *slot = sum * gains.master;
    }
}

/// Frame geometry derived from a channel's sampling configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_ms: u32,
}

impl FrameFormat {
    /// Interleaved samples in one frame.
    pub fn samples_per_frame(&self) -> usize {
        let per_channel = (self.sample_rate as u64 * self.frame_ms as u64 / 1000) as usize;
        per_channel.max(1) * self.channels.max(1) as usize
    }

    pub fn frame_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.frame_ms.max(1) as u64)
    }

    /// Seconds represented by `samples` interleaved samples.
    pub fn seconds(&self, samples: u64) -> f64 {
        let per_second = self.sample_rate.max(1) as f64 * self.channels.max(1) as f64;
        samples as f64 / per_second
    }

    /// Interleaved sample offset for a position in seconds, aligned to a
    /// whole sample frame.
    pub fn sample_offset(&self, seconds: f64) -> u64 {
        let frames = (seconds.max(0.0) * self.sample_rate as f64).floor() as u64;
        frames * self.channels.max(1) as u64
    }
}

/// Encode f32 samples as little-endian PCM16, saturating out-of-range values.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        let scaled = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        out.extend_from_slice(&scaled.to_le_bytes());
    }
    out
}

/// Decode little-endian PCM16 into f32 samples. A trailing odd byte is ignored.
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / i16::MAX as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_parses_case_insensitively() {
        assert_eq!("tts".parse::<AudioSource>().unwrap(), AudioSource::Tts);
        assert_eq!("Microphone".parse::<AudioSource>().unwrap(), AudioSource::Microphone);
        assert_eq!("MASTER".parse::<AudioSource>().unwrap(), AudioSource::Master);
        assert!("speaker".parse::<AudioSource>().is_err());
    }

    #[test]
    fn source_serializes_with_wire_names() {
        assert_eq!(serde_json::to_string(&AudioSource::Tts).unwrap(), "\"TTS\"");
        let parsed: AudioSource = serde_json::from_str("\"Media\"").unwrap();
        assert_eq!(parsed, AudioSource::Media);
    }

    #[test]
    fn clamp_gain_bounds() {
        assert_eq!(clamp_gain(1.7), Some(1.0));
        assert_eq!(clamp_gain(-0.2), Some(0.0));
        assert_eq!(clamp_gain(0.25), Some(0.25));
        assert_eq!(clamp_gain(f32::NAN), None);
        assert_eq!(clamp_gain(f32::INFINITY), None);
    }

    #[test]
    fn with_replaces_single_gain() {
        let g = GainSet::default().with(AudioSource::Tts, 0.3);
        assert_eq!(g.tts, 0.3);
        assert_eq!(g.microphone, 1.0);
        assert_eq!(g.get(AudioSource::Tts), 0.3);
    }

    #[test]
    fn master_zero_silences_everything() {
        let gains = GainSet::default().with(AudioSource::Master, 0.0);
        let mut out = [1.0_f32; 4];
        mix_frame(&gains, &[0.5; 4], &[0.25; 4], &[0.75; 4], &mut out);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn unity_gains_reproduce_raw_sum() {
        let gains = GainSet::default();
        let mut out = [0.0_f32; 3];
        mix_frame(&gains, &[0.1, 0.2, 0.3], &[0.2, 0.2, 0.2], &[0.5, 0.6, 0.7], &mut out);
        let expected = [0.8, 1.0, 1.2];
        for (o, e) in out.iter().zip(expected) {
            assert!((o - e).abs() < 1e-6, "{o} != {e}");
        }
    }

    #[test]
    fn master_is_applied_after_sum() {
        let gains = GainSet {
            microphone: 0.5,
            tts: 1.0,
            media: 0.0,
            master: 0.5,
        };
        let mut out = [0.0_f32; 1];
        mix_frame(&gains, &[0.8], &[0.2], &[1.0], &mut out);
        // (0.8 * 0.5 + 0.2 * 1.0 + 1.0 * 0.0) * 0.5
        assert!((out[0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn short_sources_contribute_silence() {
        let mut out = [0.0_f32; 4];
        mix_frame(&GainSet::default(), &[0.1; 4], &[0.1; 2], &[], &mut out);
        assert!((out[1] - 0.2).abs() < 1e-6);
        assert!((out[3] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn frame_format_geometry() {
        let fmt = FrameFormat {
            sample_rate: 48_000,
            channels: 2,
            frame_ms: 20,
        };
        assert_eq!(fmt.samples_per_frame(), 1920);
        assert_eq!(fmt.sample_offset(1.5), 144_000);
        assert!((fmt.seconds(96_000) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn pcm16_saturates() {
        let bytes = encode_pcm16(&[2.0, -2.0, 0.0]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[4], bytes[5]]), 0);
    }

    #[test]
    fn pcm16_decode_ignores_trailing_byte() {
        let mut bytes = encode_pcm16(&[0.5, -0.5]);
        bytes.push(7);
        let samples = decode_pcm16(&bytes);
        assert_eq!(samples.len(), 2);
        assert!((samples[0] - 0.5).abs() < 1e-3);
    }
}
