use std::fmt;

/// Pixel width and height of a frame, either as decoded (intrinsic) or as
/// shown on screen (displayed).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Face bounding box in source-frame pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Region {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

impl From<opencv::core::Rect> for Region {
    fn from(rect: opencv::core::Rect) -> Self {
        Self::new(
            rect.x as f32,
            rect.y as f32,
            rect.width as f32,
            rect.height as f32,
        )
    }
}

/// Rectangle in displayed pixels, always inside the displayed bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayRect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl DisplayRect {
    pub fn right(&self) -> f32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }

    /// Pixel rect with each edge rounded, so it never reaches past an edge
    /// the float rect stays inside.
    pub fn to_cv_rect(&self) -> opencv::core::Rect {
        let left = self.left.round() as i32;
        let top = self.top.round() as i32;
        opencv::core::Rect::new(
            left,
            top,
            self.right().round() as i32 - left,
            self.bottom().round() as i32 - top,
        )
    }
}

/// Rescales a source-frame region into displayed coordinates.
///
/// Each axis is scaled on its own by `displayed / intrinsic`, then the
/// result is clipped to the displayed bounds. Returns `None` when the
/// intrinsic size is unknown (zero).
pub fn map_region(
    region: &Region,
    intrinsic: Dimensions,
    displayed: Dimensions,
) -> Option<DisplayRect> {
    if intrinsic.is_empty() {
        return None;
    }
    let (left, width) = map_axis(
        region.x,
        region.width,
        intrinsic.width as f32,
        displayed.width as f32,
    );
    let (top, height) = map_axis(
        region.y,
        region.height,
        intrinsic.height as f32,
        displayed.height as f32,
    );
    Some(DisplayRect {
        left,
        top,
        width,
        height,
    })
}

// Multiply before dividing so an edge at the intrinsic boundary lands
// exactly on the displayed boundary.
fn map_axis(origin: f32, length: f32, intrinsic: f32, displayed: f32) -> (f32, f32) {
    let (intrinsic, displayed) = (intrinsic as f64, displayed as f64);
    let scale = |v: f64| v * displayed / intrinsic;
    let start = scale(origin as f64).clamp(0.0, displayed);
    let end = scale(origin as f64 + (length as f64).max(0.0)).clamp(start, displayed);
    (start as f32, (end - start) as f32)
}
