//! Audio measurement and concatenation.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::error::DialogueError;

/// Audio operations the pipeline needs from outside.
pub trait AudioTools: Send + Sync {
    /// Playback length of an audio file, in seconds.
    fn duration(&self, path: &Path) -> Result<f64, DialogueError>;

    /// Write `clips`, in order, as one track at `dest`.
    fn concatenate(&self, clips: &[PathBuf], dest: &Path) -> Result<(), DialogueError>;
}

/// MP3 implementation backed by symphonia.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mp3Tools;

impl AudioTools for Mp3Tools {
    fn duration(&self, path: &Path) -> Result<f64, DialogueError> {
        let audio_err = |e: SymphoniaError| {
            DialogueError::Audio(format!("Failed to read {}: {}", path.display(), e))
        };

        let file = File::open(path).map_err(|e| DialogueError::io(path, e))?;
        let stream = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        hint.with_extension("mp3");

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                stream,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(audio_err)?;
        let mut format = probed.format;

        let track = format.default_track().ok_or_else(|| {
            DialogueError::Audio(format!("No audio track in {}", path.display()))
        })?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let to_seconds = |frames: u64| -> Result<f64, DialogueError> {
            if let Some(time_base) = params.time_base {
                let time = time_base.calc_time(frames);
                Ok(time.seconds as f64 + time.frac)
            } else if let Some(rate) = params.sample_rate.filter(|rate| *rate > 0) {
                Ok(frames as f64 / f64::from(rate))
            } else {
                Err(DialogueError::Audio(format!(
                    "Unknown sample rate in {}",
                    path.display()
                )))
            }
        };

        if let Some(frames) = params.n_frames {
            return to_seconds(frames);
        }

        // No frame count in the header: walk the packets.
        let mut frames: u64 = 0;
        loop {
            match format.next_packet() {
                Ok(packet) => {
                    if packet.track_id() == track_id {
                        frames += packet.dur;
                    }
                }
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(e) => return Err(audio_err(e)),
            }
        }
        to_seconds(frames)
    }

    fn concatenate(&self, clips: &[PathBuf], dest: &Path) -> Result<(), DialogueError> {
        if clips.is_empty() {
            return Err(DialogueError::Audio("No clips to concatenate".to_string()));
        }

        let mut parts = Vec::with_capacity(clips.len());
        for clip in clips {
            parts.push(fs::read(clip).map_err(|e| DialogueError::io(clip, e))?);
        }

        fs::write(dest, join_mp3(&parts)).map_err(|e| DialogueError::io(dest, e))?;
        debug!(clips = clips.len(), dest = %dest.display(), "concatenated clips");
        Ok(())
    }
}

/// Join MP3 streams frame-to-frame, dropping the ID3 tags of every part.
pub fn join_mp3(parts: &[Vec<u8>]) -> Vec<u8> {
    let mut joined = Vec::with_capacity(parts.iter().map(Vec::len).sum());
    for part in parts {
        joined.extend_from_slice(strip_id3(part));
    }
    joined
}

/// Slice of `data` without leading ID3v2 tags or a trailing ID3v1 tag.
fn strip_id3(data: &[u8]) -> &[u8] {
    let mut start = 0;
    while data.len() >= start + 10 && &data[start..start + 3] == b"ID3" {
        let header = &data[start..start + 10];
        let size = header[6..10]
            .iter()
            .fold(0usize, |acc, byte| (acc << 7) | usize::from(byte & 0x7f));
        let footer = if header[5] & 0x10 != 0 { 10 } else { 0 };
        start = (start + 10 + size + footer).min(data.len());
    }

    let mut end = data.len();
    if end >= start + 128 && &data[end - 128..end - 125] == b"TAG" {
        end -= 128;
    }

    &data[start..end]
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fake audio tools: one second per byte of clip.

    use super::*;

    pub struct ByteClockTools;

    impl AudioTools for ByteClockTools {
        fn duration(&self, path: &Path) -> Result<f64, DialogueError> {
            let len = fs::metadata(path).map_err(|e| DialogueError::io(path, e))?.len();
            if len == 0 {
                return Err(DialogueError::Audio("empty clip".to_string()));
            }
            Ok(len as f64)
        }

        fn concatenate(&self, clips: &[PathBuf], dest: &Path) -> Result<(), DialogueError> {
            let mut out = Vec::new();
            for clip in clips {
                out.extend(fs::read(clip).map_err(|e| DialogueError::io(clip, e))?);
            }
            fs::write(dest, out).map_err(|e| DialogueError::io(dest, e))
        }
    }
}
