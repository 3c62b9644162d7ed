use std::path::Path;

use log::debug;
use opencv::prelude::*;
use opencv::videoio;

use crate::error::{AnnotatorError, Result};
use crate::media::{CameraStream, CaptureBackend, VideoFile};

/// Capture backend on top of `videoio::VideoCapture`.
pub struct OpenCvCapture {
    camera_index: i32,
}

impl OpenCvCapture {
    pub fn new(camera_index: i32) -> Self {
        Self { camera_index }
    }
}

impl CaptureBackend for OpenCvCapture {
    type Camera = OpenCvCamera;
    type File = OpenCvFile;

    fn open_camera(&mut self) -> Result<OpenCvCamera> {
        let mut cam = videoio::VideoCapture::new(self.camera_index, videoio::CAP_ANY)?;
        let opened = videoio::VideoCapture::is_opened(&cam)?;
        if !opened {
            return Err(AnnotatorError::CameraUnavailable(self.camera_index));
        }
        // keep latency low, not every backend supports it
        if !cam.set(videoio::CAP_PROP_BUFFERSIZE, 1.0)? {
            debug!("Camera {} ignores buffer size", self.camera_index);
        }
        Ok(OpenCvCamera { cam })
    }

    fn open_file(&mut self, path: &Path) -> Result<OpenCvFile> {
        let name = path.to_string_lossy();
        let cam = videoio::VideoCapture::from_file(&name, videoio::CAP_ANY)?;
        if !cam.is_opened()? {
            return Err(AnnotatorError::FileUnavailable(name.into_owned()));
        }
        Ok(OpenCvFile { cam })
    }
}

pub struct OpenCvCamera {
    cam: videoio::VideoCapture,
}

impl CameraStream for OpenCvCamera {
    fn read_frame(&mut self) -> Result<Option<Mat>> {
        read_next(&mut self.cam)
    }

    fn stop(mut self) -> Result<()> {
        self.cam.release()?;
        Ok(())
    }
}

pub struct OpenCvFile {
    cam: videoio::VideoCapture,
}

impl VideoFile for OpenCvFile {
    fn read_frame(&mut self) -> Result<Option<Mat>> {
        read_next(&mut self.cam)
    }

    fn release(mut self) -> Result<()> {
        self.cam.release()?;
        Ok(())
    }
}

fn read_next(cam: &mut videoio::VideoCapture) -> Result<Option<Mat>> {
    let mut frame = Mat::default();
    if !cam.read(&mut frame)? {
        return Ok(None);
    }
    if frame.size()?.width == 0 {
        return Ok(None);
    }
    Ok(Some(frame))
}
