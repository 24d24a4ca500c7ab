//! Audio file decoding via Symphonia
//!
//! [`AudioDecoder`] turns a file or an in-memory buffer into interleaved
//! f32 PCM at the stream's native rate and channel count, with a
//! sequential read cursor and accurate random-access seek.

use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

use crate::error::{EchoPortError, Result};

pub struct AudioDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
    total_frames: u64,
    sample_buf: Option<SampleBuffer<f32>>,
    /// Next unread sample index into `sample_buf`
    buf_pos: usize,
    /// Frames to discard after an accurate seek landed early
    skip_frames: u64,
    finished: bool,
}

impl AudioDecoder {
    /// Open an audio file, detecting its container and codec.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        Self::from_media_source(Box::new(file), hint)
    }

    /// Open an encoded audio stream held entirely in memory.
    pub fn open_memory(data: Vec<u8>) -> Result<Self> {
        Self::from_media_source(Box::new(Cursor::new(data)), Hint::new())
    }

    fn from_media_source(source: Box<dyn MediaSource>, hint: Hint) -> Result<Self> {
        let mss = MediaSourceStream::new(source, Default::default());

        let probed = get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| EchoPortError::Decode(format!("failed to probe audio format: {}", e)))?;

        let format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| EchoPortError::Decode("no default audio track found".to_string()))?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| EchoPortError::Decode("sample rate not reported".to_string()))?;
        let channels = params
            .channels
            .ok_or_else(|| EchoPortError::Decode("channel layout not reported".to_string()))?
            .count() as u16;
        let total_frames = params.n_frames.unwrap_or(0);

        let decoder = get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| EchoPortError::Decode(format!("failed to create decoder: {}", e)))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
            total_frames,
            sample_buf: None,
            buf_pos: 0,
            skip_frames: 0,
            finished: false,
        })
    }

    /// Native sample rate of the decoded stream.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Native channel count of the decoded stream.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Total decodable PCM frames, from container metadata; 0 when the
    /// container does not report a length.
    pub fn length_in_frames(&self) -> u64 {
        self.total_frames
    }

    /// True once the stream is fully drained.
    pub fn is_at_end(&self) -> bool {
        self.finished && self.buffered() == 0
    }

    fn buffered(&self) -> usize {
        self.sample_buf
            .as_ref()
            .map_or(0, |b| b.samples().len().saturating_sub(self.buf_pos))
    }

    /// Decode up to `out.len() / channels` frames into `out`, advancing
    /// the cursor. Returns the number of frames produced: fewer than
    /// requested near the end of the stream, 0 once exhausted.
    /// Recoverable packet corruption is skipped; hard errors fail.
    pub fn read(&mut self, out: &mut [f32]) -> Result<usize> {
        let channels = self.channels as usize;
        let max_frames = out.len() / channels;
        let mut written = 0usize;

        while written < max_frames {
            if self.buffered() == 0 {
                if self.finished || !self.decode_next_packet()? {
                    break;
                }
            }

            if self.skip_frames > 0 {
                let drop_frames = (self.buffered() / channels).min(self.skip_frames as usize);
                if drop_frames == 0 {
                    break;
                }
                self.buf_pos += drop_frames * channels;
                self.skip_frames -= drop_frames as u64;
                continue;
            }

            let Some(buf) = self.sample_buf.as_ref() else {
                break;
            };
            let avail = (buf.samples().len() - self.buf_pos) / channels;
            let take = avail.min(max_frames - written);
            if take == 0 {
                break;
            }
            let src = &buf.samples()[self.buf_pos..self.buf_pos + take * channels];
            out[written * channels..(written + take) * channels].copy_from_slice(src);
            self.buf_pos += take * channels;
            written += take;
        }

        Ok(written)
    }

    /// Reposition the cursor to an absolute frame index for the next
    /// [`read`](AudioDecoder::read).
    pub fn seek(&mut self, frame: u64) -> Result<()> {
        if self.total_frames > 0 && frame > self.total_frames {
            return Err(EchoPortError::Seek(format!(
                "frame {} past end of stream ({} frames)",
                frame, self.total_frames
            )));
        }

        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: frame,
                    track_id: self.track_id,
                },
            )
            .map_err(|e| EchoPortError::Seek(format!("failed to seek to frame {}: {}", frame, e)))?;

        self.decoder.reset();
        self.sample_buf = None;
        self.buf_pos = 0;
        // The container seeks to a packet boundary at or before the
        // target; decode-and-discard covers the remainder.
        self.skip_frames = frame.saturating_sub(seeked.actual_ts);
        self.finished = false;
        Ok(())
    }

    /// Decode packets until one for our track fills the sample buffer.
    /// Returns false at end of stream.
    fn decode_next_packet(&mut self) -> Result<bool> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(Error::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    self.finished = true;
                    return Ok(false);
                }
                Err(e) => {
                    return Err(EchoPortError::Decode(format!("failed to read packet: {}", e)));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let frames = decoded.capacity() as u64;
                    let needed = decoded.capacity() * spec.channels.count();

                    if self.sample_buf.as_ref().map_or(true, |b| b.capacity() < needed) {
                        self.sample_buf = Some(SampleBuffer::new(frames, spec));
                    }
                    if let Some(buf) = self.sample_buf.as_mut() {
                        buf.copy_interleaved_ref(decoded);
                        self.buf_pos = 0;
                    }
                    return Ok(true);
                }
                // Corrupt packet: drop it and keep decoding.
                Err(Error::DecodeError(_)) => continue,
                Err(Error::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    self.finished = true;
                    return Ok(false);
                }
                Err(e) => {
                    return Err(EchoPortError::Decode(format!(
                        "failed to decode packet: {}",
                        e
                    )));
                }
            }
        }
    }
}
