//! Capture collaborator boundary and the raw-frame replay source.
//!
//! The camera itself lives outside this system; what the producer needs is a
//! source of pre-sized packed-RGB frames. For offline runs that source is a
//! flat file of concatenated frames replayed in a loop, which keeps the whole
//! pipeline runnable without any video hardware or decoder attached.

use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use chrono::Utc;
use crossbeam_channel::{Receiver, bounded};
use thiserror::Error;
use tracing::debug;

use crate::telemetry;

/// Raw packed-RGB frame handed to the producer loop.
pub(crate) struct RawFrame {
    pub(crate) data: Vec<u8>,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) timestamp_ms: i64,
}

/// Whether end-of-stream means "rewind and replay" or "the device died".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SourceKind {
    Finite,
    Live,
}

#[derive(Debug, Error)]
pub(crate) enum CaptureError {
    #[error("failed to open capture source {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("replay file {path:?} holds no complete frame")]
    Empty { path: PathBuf },
    #[error("capture stream ended unexpectedly")]
    Disconnected,
    #[error("capture device failed")]
    Device(#[from] io::Error),
}

/// Frame acquisition boundary.
///
/// `Ok(None)` signals end-of-stream; whether that is recoverable is decided
/// by `kind`, not by the source itself.
pub(crate) trait FrameSource: Send {
    fn kind(&self) -> SourceKind;
    fn next_frame(&mut self) -> Result<Option<RawFrame>, CaptureError>;
    fn rewind(&mut self) -> Result<(), CaptureError>;
}

/// Replays packed RGB24 frames from a flat file at a fixed cadence.
///
/// The source kind is supplied by the caller: a recording replayed as
/// `Finite` loops forever, while one replayed as `Live` emulates a camera
/// whose stream ending means the device is gone.
pub(crate) struct RawFileSource {
    file: File,
    path: PathBuf,
    width: u32,
    height: u32,
    frame_len: usize,
    pace: Option<Duration>,
    kind: SourceKind,
}

impl RawFileSource {
    pub(crate) fn open(
        path: &Path,
        width: u32,
        height: u32,
        replay_fps: f32,
        kind: SourceKind,
    ) -> Result<Self, CaptureError> {
        let file = File::open(path).map_err(|source| CaptureError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let frame_len = width as usize * height as usize * 3;
        let file_len = file
            .metadata()
            .map_err(|source| CaptureError::Open {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        if (file_len as usize) < frame_len {
            return Err(CaptureError::Empty {
                path: path.to_path_buf(),
            });
        }
        let pace = if replay_fps > 0.0 {
            Some(Duration::from_secs_f32(1.0 / replay_fps))
        } else {
            None
        };
        Ok(Self {
            file,
            path: path.to_path_buf(),
            width,
            height,
            frame_len,
            pace,
            kind,
        })
    }
}

impl FrameSource for RawFileSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>, CaptureError> {
        if let Some(interval) = self.pace {
            thread::sleep(interval);
        }
        let mut data = vec![0u8; self.frame_len];
        match self.file.read_exact(&mut data) {
            Ok(()) => Ok(Some(RawFrame {
                data,
                width: self.width,
                height: self.height,
                timestamp_ms: Utc::now().timestamp_millis(),
            })),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(err) => Err(CaptureError::Device(err)),
        }
    }

    fn rewind(&mut self) -> Result<(), CaptureError> {
        self.file.seek(SeekFrom::Start(0))?;
        debug!("replay source {:?} rewound", self.path);
        Ok(())
    }
}

/// Spawn a background thread that pulls frames from `source` and forwards
/// them over a small bounded channel.
///
/// A finite source rewinds transparently at end-of-stream; a live source
/// reporting end-of-stream is treated as a device failure. The thread ends
/// after forwarding an error, or once the receiver is dropped.
pub(crate) fn spawn_capture_reader(
    mut source: Box<dyn FrameSource>,
    stop: Arc<AtomicBool>,
) -> Receiver<Result<RawFrame, CaptureError>> {
    let (tx, rx) = bounded(2);

    telemetry::spawn_thread("capture-reader", move || {
        while !stop.load(Ordering::Relaxed) {
            match source.next_frame() {
                Ok(Some(frame)) => {
                    if tx.send(Ok(frame)).is_err() {
                        break;
                    }
                }
                Ok(None) => match source.kind() {
                    SourceKind::Finite => {
                        if let Err(err) = source.rewind() {
                            let _ = tx.send(Err(err));
                            break;
                        }
                    }
                    SourceKind::Live => {
                        let _ = tx.send(Err(CaptureError::Disconnected));
                        break;
                    }
                },
                Err(err) => {
                    let _ = tx.send(Err(err));
                    break;
                }
            }
        }
    })
    .expect("failed to spawn capture reader thread");

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    struct ScriptedSource {
        kind: SourceKind,
        frames_before_eos: usize,
        served: usize,
    }

    impl ScriptedSource {
        fn new(kind: SourceKind, frames_before_eos: usize) -> Self {
            Self {
                kind,
                frames_before_eos,
                served: 0,
            }
        }

        fn frame() -> RawFrame {
            RawFrame {
                data: vec![0u8; 12],
                width: 2,
                height: 2,
                timestamp_ms: 0,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn kind(&self) -> SourceKind {
            self.kind
        }

        fn next_frame(&mut self) -> Result<Option<RawFrame>, CaptureError> {
            if self.served < self.frames_before_eos {
                self.served += 1;
                Ok(Some(Self::frame()))
            } else {
                Ok(None)
            }
        }

        fn rewind(&mut self) -> Result<(), CaptureError> {
            self.served = 0;
            Ok(())
        }
    }

    fn scratch_file(name: &str, content: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("jetpilot-capture-{name}-{}", std::process::id()));
        let mut file = File::create(&path).expect("failed to create scratch file");
        file.write_all(content).expect("failed to write scratch file");
        path
    }

    #[test]
    fn raw_file_source_reads_frames_then_signals_eos() {
        let path = scratch_file("two-frames", &[7u8; 24]);
        let mut source =
            RawFileSource::open(&path, 2, 2, 0.0, SourceKind::Finite).expect("open failed");
        assert!(source.next_frame().expect("read failed").is_some());
        assert!(source.next_frame().expect("read failed").is_some());
        assert!(source.next_frame().expect("read failed").is_none());
        source.rewind().expect("rewind failed");
        assert!(source.next_frame().expect("read failed").is_some());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn undersized_replay_file_is_rejected_at_open() {
        let path = scratch_file("undersized", &[0u8; 5]);
        let result = RawFileSource::open(&path, 2, 2, 0.0, SourceKind::Finite);
        assert!(matches!(result, Err(CaptureError::Empty { .. })));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn finite_source_replays_past_end_of_stream() {
        let stop = Arc::new(AtomicBool::new(false));
        let rx = spawn_capture_reader(
            Box::new(ScriptedSource::new(SourceKind::Finite, 2)),
            stop.clone(),
        );
        // More frames than the script holds only arrive through rewinds.
        for _ in 0..6 {
            let frame = rx
                .recv_timeout(Duration::from_secs(2))
                .expect("reader stalled");
            assert!(frame.is_ok());
        }
        stop.store(true, Ordering::SeqCst);
    }

    #[test]
    fn live_source_end_of_stream_is_a_device_failure() {
        let stop = Arc::new(AtomicBool::new(false));
        let rx = spawn_capture_reader(Box::new(ScriptedSource::new(SourceKind::Live, 1)), stop);
        let first = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("reader stalled");
        assert!(first.is_ok());
        let second = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("reader stalled");
        assert!(matches!(second, Err(CaptureError::Disconnected)));
    }
}
