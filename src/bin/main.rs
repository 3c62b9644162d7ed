use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use face_annotator::cli::{DisplayArgs, ModelArgs};
use face_annotator::media::NO_FILE_MESSAGE;
use face_annotator::overlay::{render_message, render_shapes};
use face_annotator::{
    blank_canvas, resize_to_display, Frame, FrameSlot, MediaController, ModelSlot, OpenCvCapture,
    OpenCvDetector, OverlayAnnotator, PlayState, SourceMode,
};
use log::{error, info};
use opencv::highgui;
use opencv::prelude::*;

const KEY_ESCAPE: i32 = 27;
const FRAME_DELAY_MS: i32 = 33;

#[derive(Parser, Debug)]
#[command(about = "Video player with face detection and age/gender overlay")]
struct Args {
    /// Video file to play.
    #[clap(short, long, env = "FACE_ANNOTATOR_FILE")]
    file: Option<PathBuf>,

    /// Start with the live camera.
    #[clap(long)]
    camera: bool,

    /// Camera device index.
    #[clap(long, env = "FACE_ANNOTATOR_CAMERA", default_value_t = 0)]
    camera_index: i32,

    /// Start playing the file right away.
    #[clap(long)]
    autoplay: bool,

    #[command(flatten)]
    display: DisplayArgs,

    #[command(flatten)]
    models: ModelArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args: Args = Args::parse();

    let config = args.display.annotator_config();
    let displayed = config.displayed;
    let paths = args.models.model_paths();
    let models = Arc::new(ModelSlot::new(move || OpenCvDetector::load(&paths)));
    let frames = FrameSlot::new();
    let mut annotator = OverlayAnnotator::new(models, frames.clone(), config);

    let mut media = MediaController::new(OpenCvCapture::new(args.camera_index));
    if let Some(path) = &args.file {
        media.select_file(path)?;
        if args.autoplay {
            media.toggle_play();
        }
    }
    if args.camera {
        media.set_mode(SourceMode::Camera);
    }

    let window = "Video Player with Face Detection";
    highgui::named_window_def(window)?;
    info!("space: play/pause, c: camera/upload, q: quit");

    let mut current_mode = media.mode();
    let mut shown: Option<Mat> = None;

    loop {
        if media.mode() != current_mode {
            current_mode = media.mode();
            shown = None;
            frames.clear()?;
            annotator.restart(media.is_active());
        }

        match media.read_frame() {
            Ok(Some(image)) => {
                shown = Some(resize_to_display(&image, displayed)?);
                frames.publish(Frame::from_mat(image)?)?;
            }
            Ok(None) => {}
            Err(e) => error!("Error reading frame: {}", e),
        }

        annotator.sync(media.is_active());

        let mut canvas = match &shown {
            Some(frame) => frame.try_clone()?,
            None => blank_canvas(displayed)?,
        };
        render_shapes(&annotator.shapes()?, &mut canvas)?;
        if let Some(message) = media.message() {
            render_message(&mut canvas, message)?;
        }
        highgui::imshow(window, &canvas)?;

        let key = highgui::wait_key(FRAME_DELAY_MS)?;
        if key == KEY_ESCAPE || key == 'q' as i32 {
            break;
        } else if key == ' ' as i32 {
            match media.toggle_play() {
                PlayState::Rejected => println!("{}", NO_FILE_MESSAGE),
                state => info!("Playback {:?}", state),
            }
        } else if key == 'c' as i32 {
            media.toggle_mode();
        }
    }

    annotator.stop();
    media.shutdown();
    highgui::destroy_all_windows()?;
    Ok(())
}
