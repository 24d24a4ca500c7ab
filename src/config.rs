//! Configuration for EchoPort

/// Output stream format requested when opening a playback device.
///
/// The default is the reference playback format: 44.1 kHz, stereo,
/// 32-bit float samples, with the backend choosing its own buffer size.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Requested hardware buffer size in frames (None = backend default)
    pub buffer_size: Option<u32>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            buffer_size: None,
        }
    }
}

impl OutputConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    pub fn buffer_size(mut self, frames: u32) -> Self {
        self.buffer_size = Some(frames);
        self
    }
}
