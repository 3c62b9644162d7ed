pub mod annotator;
pub mod capture;
pub mod cli;
pub mod detection;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod media;
pub mod models;
pub mod overlay;

pub use annotator::{AnnotatorConfig, FaceMode, OverlayAnnotator, PollingHandle};
pub use capture::OpenCvCapture;
pub use detection::{Detection, Detector, Gender, ModelPaths, OpenCvDetector};
pub use error::{AnnotatorError, Result};
pub use frame::{Frame, FrameSlot};
pub use geometry::{map_region, Dimensions, DisplayRect, Region};
pub use media::{MediaController, PlayState, SourceMode};
pub use models::ModelSlot;
pub use overlay::{Overlay, Shape};

use opencv::core::Size;
use opencv::imgproc;
use opencv::prelude::*;

/// Scales a decoded frame to the displayed size.
pub fn resize_to_display(frame: &Mat, displayed: Dimensions) -> Result<Mat> {
    let mut resized = Mat::default();
    imgproc::resize(
        frame,
        &mut resized,
        Size::new(displayed.width as i32, displayed.height as i32),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;
    Ok(resized)
}

/// Blank canvas shown while no source has produced a frame.
pub fn blank_canvas(displayed: Dimensions) -> Result<Mat> {
    Ok(Mat::new_rows_cols_with_default(
        displayed.height as i32,
        displayed.width as i32,
        opencv::core::CV_8UC3,
        opencv::core::Scalar::all(0.0),
    )?)
}
