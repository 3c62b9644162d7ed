use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnnotatorError {
    #[error("OpenCV error {0:?}")]
    OpenCv(#[from] opencv::Error),
    #[error("Camera {0} unavailable")]
    CameraUnavailable(i32),
    #[error("Unable to open video file {0}")]
    FileUnavailable(String),
    #[error("Model load failed: {0}")]
    ModelLoad(String),
    #[error("Detection failed: {0}")]
    Detection(String),
    #[error("Lock poisoned: {0}")]
    Poisoned(&'static str),
}

pub type Result<T> = std::result::Result<T, AnnotatorError>;
