use std::path::PathBuf;

use clap::Parser;
use face_annotator::cli::{DisplayArgs, ModelArgs};
use face_annotator::{resize_to_display, Detector, Frame, OpenCvDetector, Overlay};
use opencv::highgui;

/// Annotates a single image, handy for checking the models.
#[derive(Parser, Debug)]
#[command()]
struct Args {
    /// Image to annotate.
    image: PathBuf,

    #[command(flatten)]
    display: DisplayArgs,

    #[command(flatten)]
    models: ModelArgs,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args: Args = Args::parse();
    let displayed = args.display.displayed();

    let image = opencv::imgcodecs::imread_def(&args.image.to_string_lossy())?;
    let frame = Frame::from_mat(image)?;
    if frame.intrinsic.is_empty() {
        anyhow::bail!("unable to read {}", args.image.display());
    }

    let detector = OpenCvDetector::load(&args.models.model_paths())?;
    let detections = detector.detect(&frame)?;
    println!("faces: {}", detections.len());
    for detection in &detections {
        println!("{:?} {}", detection.region, detection.label());
    }

    let mut overlay = Overlay::new();
    overlay.apply(1, &detections, frame.intrinsic, displayed);
    let mut canvas = resize_to_display(&frame.image, displayed)?;
    overlay.render(&mut canvas)?;

    let window = "face annotations";
    highgui::named_window_def(window)?;
    highgui::imshow(window, &canvas)?;
    highgui::wait_key(0)?;

    Ok(())
}
