use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;

use log::debug;
use opencv::core::{Point2f, Scalar, Size};
use opencv::prelude::*;
use opencv::types::VectorOfRect;
use opencv::{core, dnn, imgproc, objdetect, types};

use crate::error::{AnnotatorError, Result};
use crate::frame::Frame;
use crate::geometry::Region;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gender::Male => write!(f, "male"),
            Gender::Female => write!(f, "female"),
        }
    }
}

/// One face found in a frame. Coordinates are in source-frame pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub region: Region,
    pub age: f32,
    pub gender: Gender,
    pub landmarks: Option<Vec<Point2f>>,
}

impl Detection {
    pub fn new(region: Region, age: f32, gender: Gender) -> Self {
        Self {
            region,
            age,
            gender,
            landmarks: None,
        }
    }

    pub fn label(&self) -> String {
        format!(
            "Age: {} years, Gender: {}",
            self.age.round() as i32,
            self.gender
        )
    }
}

/// Anything that can find faces and estimate age and gender on a frame.
///
/// Implementations are called from the blocking pool, possibly while an
/// earlier call on the same instance is still running.
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>>;
}

pub fn largest_detection(detections: Vec<Detection>) -> Option<Detection> {
    detections.into_iter().max_by(|a, b| {
        a.region
            .area()
            .partial_cmp(&b.region.area())
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}

/// Locations of the cascade and the two Caffe estimation networks.
#[derive(Clone, Debug)]
pub struct ModelPaths {
    pub cascade: PathBuf,
    pub age_proto: PathBuf,
    pub age_model: PathBuf,
    pub gender_proto: PathBuf,
    pub gender_model: PathBuf,
}

// Levi & Hassner age buckets, represented by their midpoints.
const AGE_BUCKET_MIDPOINTS: [f32; 8] = [1.0, 5.0, 10.0, 17.5, 28.5, 40.5, 50.5, 80.0];
const GENDERS: [Gender; 2] = [Gender::Male, Gender::Female];
const NET_INPUT_SIZE: i32 = 227;

fn net_mean() -> Scalar {
    Scalar::new(78.426_337_760_3, 87.768_914_374_4, 114.895_847_746, 0.0)
}

struct Networks {
    faces: objdetect::CascadeClassifier,
    age: dnn::Net,
    gender: dnn::Net,
}

/// Cascade face finder plus DNN age and gender estimation.
pub struct OpenCvDetector {
    networks: Mutex<Networks>,
}

impl OpenCvDetector {
    pub fn load(paths: &ModelPaths) -> Result<Self> {
        let cascade = resolve(&paths.cascade)?;
        let faces = objdetect::CascadeClassifier::new(&cascade)?;
        if faces.empty()? {
            return Err(AnnotatorError::ModelLoad(format!(
                "cascade {} is empty",
                cascade
            )));
        }
        let age =
            dnn::read_net_from_caffe(&resolve(&paths.age_proto)?, &resolve(&paths.age_model)?)?;
        let gender = dnn::read_net_from_caffe(
            &resolve(&paths.gender_proto)?,
            &resolve(&paths.gender_model)?,
        )?;
        Ok(Self {
            networks: Mutex::new(Networks { faces, age, gender }),
        })
    }
}

impl Detector for OpenCvDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let mut networks = self
            .networks
            .lock()
            .map_err(|_| AnnotatorError::Poisoned("detector networks"))?;
        let grayscale = convert_to_grayscale(&frame.image)?;
        let faces = detect_faces(&mut networks.faces, &grayscale)?;
        debug!("cascade found {} faces", faces.len());

        let mut detections = Vec::with_capacity(faces.len());
        for face in &faces {
            let crop = Mat::roi(&frame.image, face)?.try_clone()?;
            let blob = dnn::blob_from_image(
                &crop,
                1.0,
                Size::new(NET_INPUT_SIZE, NET_INPUT_SIZE),
                net_mean(),
                false,
                false,
                core::CV_32F,
            )?;
            let gender = estimate_gender(&mut networks.gender, &blob)?;
            let age = estimate_age(&mut networks.age, &blob)?;
            detections.push(Detection::new(face.into(), age, gender));
        }
        Ok(detections)
    }
}

fn resolve(path: &std::path::Path) -> Result<String> {
    let path = path
        .to_str()
        .ok_or_else(|| AnnotatorError::ModelLoad(format!("non UTF-8 path {:?}", path)))?;
    Ok(core::find_file_def(path)?)
}

fn detect_faces(
    classifier: &mut objdetect::CascadeClassifier,
    image: &Mat,
) -> Result<VectorOfRect> {
    let mut faces = types::VectorOfRect::new();

    classifier.detect_multi_scale(
        &image,
        &mut faces,
        1.1,
        2,
        objdetect::CASCADE_SCALE_IMAGE,
        core::Size {
            width: 30,
            height: 30,
        },
        core::Size {
            width: 0,
            height: 0,
        },
    )?;
    Ok(faces)
}

fn class_scores(net: &mut dnn::Net, blob: &Mat, classes: usize) -> Result<Vec<f32>> {
    net.set_input(blob, "", 1.0, Scalar::default())?;
    let output = net.forward_single("")?;
    (0..classes)
        .map(|i| Ok(*output.at_2d::<f32>(0, i as i32)?))
        .collect()
}

fn estimate_gender(net: &mut dnn::Net, blob: &Mat) -> Result<Gender> {
    let scores = class_scores(net, blob, GENDERS.len())?;
    let best = scores
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0);
    Ok(GENDERS[best])
}

fn estimate_age(net: &mut dnn::Net, blob: &Mat) -> Result<f32> {
    let scores = class_scores(net, blob, AGE_BUCKET_MIDPOINTS.len())?;
    Ok(expected_age(&scores))
}

/// Probability-weighted bucket midpoint, so the estimate is continuous.
pub fn expected_age(scores: &[f32]) -> f32 {
    let total: f32 = scores.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    scores
        .iter()
        .zip(AGE_BUCKET_MIDPOINTS)
        .map(|(p, midpoint)| p * midpoint)
        .sum::<f32>()
        / total
}

pub fn convert_to_grayscale(image: &Mat) -> Result<Mat> {
    let mut gray: Mat = Mat::default();
    imgproc::cvt_color_def(&image, &mut gray, imgproc::COLOR_BGR2GRAY)?;
    Ok(gray)
}
