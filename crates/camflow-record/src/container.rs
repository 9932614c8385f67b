//! Minimal framed container: a JSON track table followed by length-prefixed samples.
//!
//! Layout (little endian):
//! `MAGIC | u32 header_len | header json | { u32 track | u64 pts_us | u8 flags | u32 len | data }*`

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::{EncodedSample, MuxerWriter, TrackFormat};
use crate::error::RecordError;

pub const MAGIC: &[u8; 8] = b"CAMFLOW1";

const FLAG_KEY_FRAME: u8 = 0x01;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    tracks: Vec<TrackFormat>,
}

#[derive(Debug)]
pub struct FramedFileWriter {
    path: PathBuf,
    tracks: Vec<TrackFormat>,
    out: Option<BufWriter<File>>,
    samples: u64,
}

impl FramedFileWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tracks: Vec::new(),
            out: None,
            samples: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io(&self, source: std::io::Error) -> RecordError {
        RecordError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl MuxerWriter for FramedFileWriter {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, RecordError> {
        if self.out.is_some() {
            return Err(RecordError::MuxerAlreadyStarted);
        }
        self.tracks.push(format.clone());
        Ok(self.tracks.len() - 1)
    }

    fn start(&mut self) -> Result<(), RecordError> {
        if self.out.is_some() {
            return Err(RecordError::MuxerAlreadyStarted);
        }
        let header = serde_json::to_vec(&Header {
            tracks: self.tracks.clone(),
        })?;
        let file = File::create(&self.path).map_err(|e| self.io(e))?;
        let mut out = BufWriter::new(file);
        out.write_all(MAGIC)
            .and_then(|_| out.write_all(&(header.len() as u32).to_le_bytes()))
            .and_then(|_| out.write_all(&header))
            .map_err(|e| self.io(e))?;
        self.out = Some(out);
        debug!(path = %self.path.display(), tracks = self.tracks.len(), "container started");
        Ok(())
    }

    fn write_sample(&mut self, track: usize, sample: &EncodedSample) -> Result<(), RecordError> {
        let Some(out) = self.out.as_mut() else {
            return Err(RecordError::MuxerNotStarted);
        };
        let flags = if sample.key_frame { FLAG_KEY_FRAME } else { 0 };
        let res = out
            .write_all(&(track as u32).to_le_bytes())
            .and_then(|_| out.write_all(&sample.pts_us.to_le_bytes()))
            .and_then(|_| out.write_all(&[flags]))
            .and_then(|_| out.write_all(&(sample.data.len() as u32).to_le_bytes()))
            .and_then(|_| out.write_all(&sample.data));
        match res {
            Ok(()) => {
                self.samples += 1;
                Ok(())
            }
            Err(e) => Err(self.io(e)),
        }
    }

    fn stop(&mut self) -> Result<(), RecordError> {
        if let Some(mut out) = self.out.take() {
            out.flush().map_err(|e| self.io(e))?;
            debug!(path = %self.path.display(), samples = self.samples, "container finalized");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FramedSample {
    pub track: usize,
    pub pts_us: u64,
    pub key_frame: bool,
    pub data: Vec<u8>,
}

/// Reads back a file written by [`FramedFileWriter`].
pub fn read_framed(path: &Path) -> Result<(Vec<TrackFormat>, Vec<FramedSample>), RecordError> {
    let io = |source| RecordError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut r = BufReader::new(File::open(path).map_err(io)?);

    let mut magic = [0u8; 8];
    r.read_exact(&mut magic).map_err(io)?;
    if &magic != MAGIC {
        return Err(RecordError::Codec(format!("{}: not a framed container", path.display())));
    }
    let header_len = read_u32(&mut r).map_err(io)? as usize;
    let mut header = vec![0u8; header_len];
    r.read_exact(&mut header).map_err(io)?;
    let header: Header = serde_json::from_slice(&header)?;

    let mut samples = Vec::new();
    loop {
        let track = match read_u32(&mut r) {
            Ok(t) => t as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(io(e)),
        };
        let mut pts = [0u8; 8];
        r.read_exact(&mut pts).map_err(io)?;
        let mut flags = [0u8; 1];
        r.read_exact(&mut flags).map_err(io)?;
        let len = read_u32(&mut r).map_err(io)? as usize;
        let mut data = vec![0u8; len];
        r.read_exact(&mut data).map_err(io)?;
        samples.push(FramedSample {
            track,
            pts_us: u64::from_le_bytes(pts),
            key_frame: flags[0] & FLAG_KEY_FRAME != 0,
            data,
        });
    }
    Ok((header.tracks, samples))
}

fn read_u32(r: &mut impl Read) -> std::io::Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use camflow_core::Size;

    #[test]
    fn writes_tracks_then_samples() {
        let path = std::env::temp_dir().join(format!("camflow-framed-{}.bin", std::process::id()));
        let mut w = FramedFileWriter::new(&path);
        assert_eq!(w.add_track(&TrackFormat::video(Size::new(4, 2), 25, 1000)).unwrap(), 0);
        assert_eq!(w.add_track(&TrackFormat::audio(44_100, 64_000)).unwrap(), 1);
        assert!(w
            .write_sample(0, &EncodedSample::default())
            .is_err_and(|e| matches!(e, RecordError::MuxerNotStarted)));
        w.start().unwrap();
        assert!(w.add_track(&TrackFormat::audio(8_000, 1)).is_err());

        w.write_sample(
            1,
            &EncodedSample {
                data: vec![1, 2, 3],
                pts_us: 40,
                ..Default::default()
            },
        )
        .unwrap();
        w.write_sample(
            0,
            &EncodedSample {
                data: vec![9],
                pts_us: 41,
                key_frame: true,
                ..Default::default()
            },
        )
        .unwrap();
        w.stop().unwrap();
        w.stop().unwrap();

        let (tracks, samples) = read_framed(&path).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].size, Size::new(4, 2));
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].data, vec![1, 2, 3]);
        assert!(samples[1].key_frame);
        let _ = std::fs::remove_file(path);
    }
}
