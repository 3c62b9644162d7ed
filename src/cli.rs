use std::path::PathBuf;

use clap::Args;

use crate::annotator::{AnnotatorConfig, FaceMode};
use crate::detection::ModelPaths;
use crate::geometry::Dimensions;

/// Model locations shared by every binary.
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// Haar cascade used to find faces. Looked up in the OpenCV data dir too.
    #[clap(
        long,
        env = "FACE_ANNOTATOR_CASCADE",
        default_value = "haarcascades/haarcascade_frontalface_alt.xml"
    )]
    pub cascade: PathBuf,

    #[clap(long, env = "FACE_ANNOTATOR_AGE_PROTO", default_value = "models/age_deploy.prototxt")]
    pub age_proto: PathBuf,

    #[clap(long, env = "FACE_ANNOTATOR_AGE_MODEL", default_value = "models/age_net.caffemodel")]
    pub age_model: PathBuf,

    #[clap(
        long,
        env = "FACE_ANNOTATOR_GENDER_PROTO",
        default_value = "models/gender_deploy.prototxt"
    )]
    pub gender_proto: PathBuf,

    #[clap(
        long,
        env = "FACE_ANNOTATOR_GENDER_MODEL",
        default_value = "models/gender_net.caffemodel"
    )]
    pub gender_model: PathBuf,
}

impl ModelArgs {
    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths {
            cascade: self.cascade.clone(),
            age_proto: self.age_proto.clone(),
            age_model: self.age_model.clone(),
            gender_proto: self.gender_proto.clone(),
            gender_model: self.gender_model.clone(),
        }
    }
}

/// Size and cadence of the overlay.
#[derive(Args, Debug, Clone)]
pub struct DisplayArgs {
    /// Displayed width of the video in pixels.
    #[clap(long, env = "FACE_ANNOTATOR_WIDTH", default_value_t = 640)]
    pub display_width: u32,

    /// Displayed height of the video in pixels.
    #[clap(long, env = "FACE_ANNOTATOR_HEIGHT", default_value_t = 360)]
    pub display_height: u32,

    /// Milliseconds between detector polls.
    #[clap(long, env = "FACE_ANNOTATOR_INTERVAL_MS", default_value_t = 1000)]
    pub interval_ms: u64,

    /// Annotate every face instead of only the largest one.
    #[clap(long)]
    pub multi_face: bool,
}

impl DisplayArgs {
    pub fn displayed(&self) -> Dimensions {
        Dimensions::new(self.display_width.max(1), self.display_height.max(1))
    }

    pub fn annotator_config(&self) -> AnnotatorConfig {
        AnnotatorConfig {
            interval: std::time::Duration::from_millis(self.interval_ms.max(1)),
            displayed: self.displayed(),
            face_mode: if self.multi_face {
                FaceMode::Multi
            } else {
                FaceMode::Single
            },
        }
    }
}
