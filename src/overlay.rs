use opencv::core::{Point, Scalar};
use opencv::imgproc;
use opencv::prelude::*;

use crate::detection::Detection;
use crate::error::Result;
use crate::geometry::{map_region, Dimensions, DisplayRect};

/// Vertical gap between a face box and its label.
pub const LABEL_OFFSET: f32 = 5.0;

const LABEL_FONT_SCALE: f64 = 0.5;
const STROKE_WIDTH: i32 = 2;

#[derive(Clone, Debug, PartialEq)]
pub enum Shape {
    Rect(DisplayRect),
    Label { text: String, left: f32, top: f32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Shapes replaced, with this many face boxes now drawn.
    Applied(usize),
    /// A newer poll has already been applied.
    Stale,
    /// The overlay was torn down while the poll was in flight.
    Detached,
}

/// The annotation shapes currently drawn over the video.
#[derive(Debug, Default)]
pub struct Overlay {
    shapes: Vec<Shape>,
    last_applied: u64,
    detached: bool,
}

impl Overlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the shape set with the results of poll `token`.
    ///
    /// Tokens increase with every poll issued; results from a poll older than
    /// the one already on screen are dropped.
    pub fn apply(
        &mut self,
        token: u64,
        detections: &[Detection],
        intrinsic: Dimensions,
        displayed: Dimensions,
    ) -> ApplyOutcome {
        if self.detached {
            return ApplyOutcome::Detached;
        }
        if token <= self.last_applied {
            return ApplyOutcome::Stale;
        }
        self.last_applied = token;
        self.shapes.clear();

        for detection in detections {
            let Some(rect) = map_region(&detection.region, intrinsic, displayed) else {
                continue;
            };
            self.shapes.push(Shape::Rect(rect));
            self.shapes.push(Shape::Label {
                text: detection.label(),
                left: rect.left,
                top: rect.bottom() + LABEL_OFFSET,
            });
        }
        ApplyOutcome::Applied(self.rect_count())
    }

    /// Clears the overlay and refuses every later update.
    pub fn detach(&mut self) {
        self.shapes.clear();
        self.detached = true;
    }

    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    pub fn rect_count(&self) -> usize {
        self.shapes
            .iter()
            .filter(|shape| matches!(shape, Shape::Rect(_)))
            .count()
    }

    /// Paints the shapes onto a frame already scaled to displayed size.
    pub fn render(&self, canvas: &mut Mat) -> Result<()> {
        render_shapes(&self.shapes, canvas)
    }
}

pub fn render_shapes(shapes: &[Shape], canvas: &mut Mat) -> Result<()> {
    let red = Scalar::new(0.0, 0.0, 255.0, 0.0);
    for shape in shapes {
        match shape {
            Shape::Rect(rect) => {
                imgproc::rectangle(
                    canvas,
                    rect.to_cv_rect(),
                    red,
                    STROKE_WIDTH,
                    imgproc::LINE_8,
                    0,
                )?;
            }
            Shape::Label { text, left, top } => {
                // put_text anchors at the baseline, labels are positioned by their top edge
                let mut baseline = 0;
                let size = imgproc::get_text_size(
                    text,
                    imgproc::FONT_HERSHEY_SIMPLEX,
                    LABEL_FONT_SCALE,
                    1,
                    &mut baseline,
                )?;
                let origin = Point::new(left.round() as i32, top.round() as i32 + size.height);
                imgproc::put_text(
                    canvas,
                    text,
                    origin,
                    imgproc::FONT_HERSHEY_SIMPLEX,
                    LABEL_FONT_SCALE,
                    red,
                    1,
                    imgproc::LINE_8,
                    false,
                )?;
            }
        }
    }
    Ok(())
}

/// Draws a user-facing message banner in the top-left corner.
pub fn render_message(canvas: &mut Mat, message: &str) -> Result<()> {
    imgproc::put_text(
        canvas,
        message,
        Point::new(10, 24),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.6,
        Scalar::new(0.0, 0.0, 255.0, 0.0),
        2,
        imgproc::LINE_8,
        false,
    )?;
    Ok(())
}
