use std::fmt;
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use opencv::prelude::*;

use crate::error::Result;

pub const NO_FILE_MESSAGE: &str = "Please upload a video first.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceMode {
    Upload,
    Camera,
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceMode::Upload => write!(f, "upload"),
            SourceMode::Camera => write!(f, "camera"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayState {
    Playing,
    Paused,
    /// Play was pressed with nothing to play.
    Rejected,
}

/// A live camera stream. Stopping consumes the stream, so it can only
/// happen once.
pub trait CameraStream {
    fn read_frame(&mut self) -> Result<Option<Mat>>;
    fn stop(self) -> Result<()>;
}

/// An opened video file.
pub trait VideoFile {
    /// Next frame, or `None` once the file has ended.
    fn read_frame(&mut self) -> Result<Option<Mat>>;
    fn release(self) -> Result<()>;
}

/// Opens the hardware and files the controller switches between.
pub trait CaptureBackend {
    type Camera: CameraStream;
    type File: VideoFile;

    fn open_camera(&mut self) -> Result<Self::Camera>;
    fn open_file(&mut self, path: &Path) -> Result<Self::File>;
}

/// Keeps exactly one frame source active: an opened file or a live camera.
pub struct MediaController<B: CaptureBackend> {
    backend: B,
    mode: SourceMode,
    camera: Option<B::Camera>,
    file: Option<(PathBuf, B::File)>,
    playing: bool,
    message: Option<String>,
}

impl<B: CaptureBackend> MediaController<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            mode: SourceMode::Upload,
            camera: None,
            file: None,
            playing: false,
            message: None,
        }
    }

    pub fn mode(&self) -> SourceMode {
        self.mode
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn camera_live(&self) -> bool {
        self.camera.is_some()
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file.as_ref().map(|(path, _)| path.as_path())
    }

    /// User-facing message, e.g. play pressed without a file.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn set_mode(&mut self, mode: SourceMode) {
        if mode == self.mode && (mode == SourceMode::Upload || self.camera.is_some()) {
            return;
        }
        info!("Switching source to {}", mode);
        self.mode = mode;
        match mode {
            SourceMode::Camera => self.start_camera(),
            SourceMode::Upload => self.stop_camera(),
        }
    }

    pub fn toggle_mode(&mut self) {
        let next = match self.mode {
            SourceMode::Upload => SourceMode::Camera,
            SourceMode::Camera => SourceMode::Upload,
        };
        self.set_mode(next);
    }

    /// Opens `path` as the new upload source, replacing any earlier file.
    pub fn select_file(&mut self, path: &Path) -> Result<()> {
        let opened = self.backend.open_file(path)?;
        self.stop_camera();
        self.mode = SourceMode::Upload;
        if let Some((previous, file)) = self.file.replace((path.to_path_buf(), opened)) {
            if let Err(e) = file.release() {
                warn!("Error releasing {}: {}", previous.display(), e);
            }
        }
        self.message = None;
        info!("Opened {}", path.display());
        Ok(())
    }

    pub fn toggle_play(&mut self) -> PlayState {
        if self.file.is_none() {
            self.message = Some(NO_FILE_MESSAGE.to_string());
            return PlayState::Rejected;
        }
        self.message = None;
        self.playing = !self.playing;
        if self.playing {
            PlayState::Playing
        } else {
            PlayState::Paused
        }
    }

    /// Whether the annotator should be polling.
    ///
    /// A live camera counts as playing: the play toggle only gates the
    /// file source, so camera mode polls as soon as the stream is open.
    pub fn is_active(&self) -> bool {
        match self.mode {
            SourceMode::Camera => self.camera.is_some(),
            SourceMode::Upload => self.file.is_some() && self.playing,
        }
    }

    /// Reads the next frame of whichever source is active and playing.
    pub fn read_frame(&mut self) -> Result<Option<Mat>> {
        match self.mode {
            SourceMode::Camera => match self.camera.as_mut() {
                Some(camera) => camera.read_frame(),
                None => Ok(None),
            },
            SourceMode::Upload => {
                if !self.playing {
                    return Ok(None);
                }
                let Some((path, file)) = self.file.as_mut() else {
                    return Ok(None);
                };
                let frame = file.read_frame()?;
                if frame.is_none() {
                    info!("Reached end of {}", path.display());
                    self.playing = false;
                }
                Ok(frame)
            }
        }
    }

    /// Releases every source.
    pub fn shutdown(&mut self) {
        self.stop_camera();
        if let Some((path, file)) = self.file.take() {
            if let Err(e) = file.release() {
                warn!("Error releasing {}: {}", path.display(), e);
            }
        }
        self.playing = false;
    }

    fn start_camera(&mut self) {
        if self.camera.is_some() {
            return;
        }
        match self.backend.open_camera() {
            Ok(camera) => {
                info!("Camera started");
                self.camera = Some(camera);
            }
            Err(e) => error!("Error accessing camera: {}", e),
        }
    }

    fn stop_camera(&mut self) {
        if let Some(camera) = self.camera.take() {
            match camera.stop() {
                Ok(()) => info!("Camera stopped"),
                Err(e) => warn!("Error stopping camera: {}", e),
            }
        }
    }
}

impl<B: CaptureBackend> Drop for MediaController<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
