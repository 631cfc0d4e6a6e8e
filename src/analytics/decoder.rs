use std::collections::VecDeque;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

use thiserror::Error;

use crate::config::DecoderConfig;

use super::frame::{Frame, FrameError, PixelFormat};

const FRAME_QUEUE_DEPTH: usize = 4;

#[derive(Debug, Error)]
pub enum OpenError {
    #[error("video not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to probe {path}: {reason}")]
    Probe { path: PathBuf, reason: String },
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("cannot decode {path}: {reason}")]
    Undecodable { path: PathBuf, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum FrameDecodeError {
    #[error("stream ended inside a frame ({got} of {expected} bytes)")]
    Truncated { expected: usize, got: usize },
    #[error("failed to read decoded frame: {0}")]
    Read(#[from] std::io::Error),
    #[error("decoder exited with {0}")]
    Decoder(ExitStatus),
    #[error("frame {got} delivered where {expected} was expected")]
    OutOfOrder { expected: u64, got: u64 },
    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),
    #[error("{0}")]
    Other(String),
}

/// Sequential supplier of decoded frames.
///
/// Implementations deliver frames with contiguous indices starting at 0.
/// `Ok(None)` marks a clean end of stream; an empty stream is not an error.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameDecodeError>;

    /// Releases the underlying decoder. Safe to call more than once.
    fn close(&mut self);
}

enum Chunk {
    Frame(Vec<u8>),
    Partial(usize),
    Failed(std::io::Error),
}

/// Decodes a local video file by piping raw frames out of an ffmpeg child.
pub struct FfmpegSource {
    path: PathBuf,
    width: u32,
    height: u32,
    format: PixelFormat,
    child: Option<Child>,
    frame_rx: Option<Receiver<Chunk>>,
    reader_handle: Option<JoinHandle<()>>,
    pending: Option<Vec<u8>>,
    next_index: u64,
}

impl FfmpegSource {
    pub fn open(path: &Path, config: &DecoderConfig) -> Result<Self, OpenError> {
        if !path.is_file() {
            return Err(OpenError::NotFound(path.to_path_buf()));
        }

        let (width, height) = probe_dimensions(path, &config.ffprobe)?;
        let format = config.pixel_format;

        let mut child = Command::new(&config.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-noautorotate", "-i"])
            .arg(path)
            .args(["-map", "0:v:0", "-an", "-f", "rawvideo", "-pix_fmt"])
            .args([format.ffmpeg_name(), "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| OpenError::Spawn {
                program: config.ffmpeg.clone(),
                source,
            })?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(OpenError::Io(std::io::Error::other("ffmpeg stdout not captured")));
        };

        let frame_size = format.frame_size(width, height);
        let (frame_tx, frame_rx) = mpsc::sync_channel::<Chunk>(FRAME_QUEUE_DEPTH);
        let reader_handle = thread::spawn(move || read_frames(stdout, frame_size, frame_tx));

        tracing::debug!(
            path = %path.display(),
            width,
            height,
            pixel_format = format.ffmpeg_name(),
            "decoder started"
        );

        let mut source = Self {
            path: path.to_path_buf(),
            width,
            height,
            format,
            child: Some(child),
            frame_rx: Some(frame_rx),
            reader_handle: Some(reader_handle),
            pending: None,
            next_index: 0,
        };
        source.prime()?;
        Ok(source)
    }

    /// Waits for the first frame so media ffmpeg cannot decode at all fails
    /// here rather than mid-run. A clean exit with no output is an empty
    /// stream.
    fn prime(&mut self) -> Result<(), OpenError> {
        let Some(rx) = self.frame_rx.as_ref() else {
            return Ok(());
        };

        let reason = match rx.recv() {
            Ok(Chunk::Frame(data)) => {
                self.pending = Some(data);
                return Ok(());
            }
            Ok(Chunk::Partial(got)) => format!(
                "first frame cut short ({got} of {} bytes)",
                self.format.frame_size(self.width, self.height)
            ),
            Ok(Chunk::Failed(e)) => format!("failed to read first frame: {e}"),
            Err(_) => match self.finish() {
                Ok(_) => {
                    tracing::debug!(path = %self.path.display(), "video has no frames");
                    return Ok(());
                }
                Err(e) => e.to_string(),
            },
        };

        self.close();
        Err(OpenError::Undecodable {
            path: self.path.clone(),
            reason,
        })
    }

    fn emit(&mut self, data: Vec<u8>) -> Result<Option<Frame>, FrameDecodeError> {
        let frame = Frame::new(self.next_index, self.width, self.height, self.format, data)?;
        self.next_index += 1;
        Ok(Some(frame))
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn finish(&mut self) -> Result<Option<Frame>, FrameDecodeError> {
        let status = match self.child.as_mut() {
            Some(child) => Some(child.wait()?),
            None => None,
        };
        self.close();

        match status {
            Some(status) if !status.success() => Err(FrameDecodeError::Decoder(status)),
            _ => Ok(None),
        }
    }
}

impl FrameSource for FfmpegSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameDecodeError> {
        if let Some(data) = self.pending.take() {
            return self.emit(data);
        }

        let Some(rx) = self.frame_rx.as_ref() else {
            return Ok(None);
        };

        let chunk = match rx.recv() {
            Ok(chunk) => chunk,
            // Reader hung up: clean EOF on ffmpeg's stdout.
            Err(_) => return self.finish(),
        };

        match chunk {
            Chunk::Frame(data) => self.emit(data),
            Chunk::Partial(got) => {
                self.close();
                Err(FrameDecodeError::Truncated {
                    expected: self.format.frame_size(self.width, self.height),
                    got,
                })
            }
            Chunk::Failed(e) => {
                self.close();
                Err(FrameDecodeError::Read(e))
            }
        }
    }

    fn close(&mut self) {
        // Drop the receiver first so a blocked reader thread can exit.
        self.frame_rx.take();
        self.pending = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
            tracing::debug!(
                path = %self.path.display(),
                frames = self.next_index,
                "decoder closed"
            );
        }
        if let Some(handle) = self.reader_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_frames(mut stdout: ChildStdout, frame_size: usize, frame_tx: SyncSender<Chunk>) {
    loop {
        let mut buf = vec![0u8; frame_size];
        let mut filled = 0;

        while filled < frame_size {
            match stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let _ = frame_tx.send(Chunk::Failed(e));
                    return;
                }
            }
        }

        let chunk = if filled == frame_size {
            Chunk::Frame(buf)
        } else if filled == 0 {
            return;
        } else {
            Chunk::Partial(filled)
        };

        let last = matches!(chunk, Chunk::Partial(_));
        if frame_tx.send(chunk).is_err() || last {
            return;
        }
    }
}

fn probe_dimensions(path: &Path, ffprobe: &str) -> Result<(u32, u32), OpenError> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=s=x:p=0",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| OpenError::Spawn {
            program: ffprobe.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(OpenError::Probe {
            path: path.to_path_buf(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    parse_dimensions(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| OpenError::Probe {
        path: path.to_path_buf(),
        reason: "no decodable video stream".to_string(),
    })
}

/// Parses ffprobe's `WIDTHxHEIGHT` csv output.
fn parse_dimensions(output: &str) -> Option<(u32, u32)> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let (w, h) = line.split_once('x')?;
    let width: u32 = w.trim().parse().ok()?;
    let height: u32 = h.trim().trim_end_matches('x').parse().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

/// Frame source backed by frames already in memory.
pub struct MemorySource {
    frames: VecDeque<Frame>,
    fail_at: Option<usize>,
    delivered: usize,
    closed: bool,
}

impl MemorySource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into(),
            fail_at: None,
            delivered: 0,
            closed: false,
        }
    }

    /// Builds frames from raw gray buffers, indexing them in order.
    pub fn from_gray(width: u32, height: u32, buffers: Vec<Vec<u8>>) -> Result<Self, FrameError> {
        let frames = buffers
            .into_iter()
            .enumerate()
            .map(|(i, data)| Frame::new(i as u64, width, height, PixelFormat::Gray, data))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(frames))
    }

    /// Report a decode failure instead of delivering the frame at `position`.
    pub fn fail_at(mut self, position: usize) -> Self {
        self.fail_at = Some(position);
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameDecodeError> {
        if self.closed {
            return Ok(None);
        }
        if self.fail_at == Some(self.delivered) {
            return Err(FrameDecodeError::Other(format!(
                "injected failure at frame {}",
                self.delivered
            )));
        }
        let frame = self.frames.pop_front();
        if frame.is_some() {
            self.delivered += 1;
        }
        Ok(frame)
    }

    fn close(&mut self) {
        self.closed = true;
        self.frames.clear();
    }
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameDecodeError> {
        (**self).next_frame()
    }

    fn close(&mut self) {
        (**self).close()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(unix)]
    use super::stub::StubDecoder;

    #[test]
    fn test_parse_dimensions() {
        assert_eq!(parse_dimensions("1920x1080\n"), Some((1920, 1080)));
        assert_eq!(parse_dimensions("\n640x480x\n"), Some((640, 480)));
        assert_eq!(parse_dimensions(""), None);
        assert_eq!(parse_dimensions("0x480"), None);
        assert_eq!(parse_dimensions("N/AxN/A"), None);
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.mp4");
        let err = FfmpegSource::open(&path, &DecoderConfig::default()).err().unwrap();
        assert!(matches!(err, OpenError::NotFound(p) if p == path));
    }

    #[test]
    fn test_open_with_missing_prober() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = DecoderConfig {
            ffprobe: "/nonexistent/ffprobe".to_string(),
            ..DecoderConfig::default()
        };
        let err = FfmpegSource::open(file.path(), &config).err().unwrap();
        assert!(matches!(err, OpenError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_ffmpeg_clean_eof_after_frames() {
        let stub = StubDecoder::new("printf 'AAAABBBBCCCC'");
        let mut source = FfmpegSource::open(&stub.video, &stub.config).unwrap();
        assert_eq!(source.dimensions(), (2, 2));

        for (i, byte) in [b'A', b'B', b'C'].into_iter().enumerate() {
            let frame = source.next_frame().unwrap().unwrap();
            assert_eq!(frame.index(), i as u64);
            assert_eq!(frame.data(), &[byte; 4]);
        }
        assert!(source.next_frame().unwrap().is_none());
        assert!(source.next_frame().unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_ffmpeg_decodes_first_video_stream_only() {
        let stub = StubDecoder::new(
            r#"case "$*" in *"-map 0:v:0"*) printf 'AAAA' ;; *) exit 9 ;; esac"#,
        );
        let mut source = FfmpegSource::open(&stub.video, &stub.config).unwrap();
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_ffmpeg_partial_trailing_frame_is_truncated() {
        let stub = StubDecoder::new("printf 'AAAABB'");
        let mut source = FfmpegSource::open(&stub.video, &stub.config).unwrap();
        assert!(source.next_frame().unwrap().is_some());
        let err = source.next_frame().unwrap_err();
        assert!(matches!(err, FrameDecodeError::Truncated { expected: 4, got: 2 }));
        assert!(source.next_frame().unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_ffmpeg_failure_after_frames_is_decoder_error() {
        let stub = StubDecoder::new("printf 'AAAA'; exit 3");
        let mut source = FfmpegSource::open(&stub.video, &stub.config).unwrap();
        assert!(source.next_frame().unwrap().is_some());
        let err = source.next_frame().unwrap_err();
        assert!(matches!(err, FrameDecodeError::Decoder(status) if status.code() == Some(3)));
    }

    #[cfg(unix)]
    #[test]
    fn test_ffmpeg_failure_before_first_frame_is_open_error() {
        let stub = StubDecoder::new("echo 'Decoder not found' >&2; exit 1");
        let err = FfmpegSource::open(&stub.video, &stub.config).err().unwrap();
        assert!(matches!(err, OpenError::Undecodable { ref path, .. } if *path == stub.video));
    }

    #[cfg(unix)]
    #[test]
    fn test_ffmpeg_partial_first_frame_is_open_error() {
        let stub = StubDecoder::new("printf 'AA'");
        let err = FfmpegSource::open(&stub.video, &stub.config).err().unwrap();
        assert!(matches!(err, OpenError::Undecodable { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_ffmpeg_empty_output_is_empty_stream() {
        let stub = StubDecoder::new("exit 0");
        let mut source = FfmpegSource::open(&stub.video, &stub.config).unwrap();
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_memory_source_in_order() {
        let mut source = MemorySource::from_gray(2, 1, vec![vec![0, 0], vec![1, 1]]).unwrap();
        assert_eq!(source.next_frame().unwrap().unwrap().index(), 0);
        assert_eq!(source.next_frame().unwrap().unwrap().index(), 1);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_memory_source_injected_failure() {
        let mut source = MemorySource::from_gray(1, 1, vec![vec![0], vec![1], vec![2]])
            .unwrap()
            .fail_at(1);
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().is_err());
    }

    #[test]
    fn test_memory_source_close() {
        let mut source = MemorySource::from_gray(1, 1, vec![vec![0]]).unwrap();
        source.close();
        assert!(source.is_closed());
        assert!(source.next_frame().unwrap().is_none());
    }
}
