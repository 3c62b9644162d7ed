use std::sync::{Arc, Mutex};

use opencv::prelude::*;

use crate::error::{AnnotatorError, Result};
use crate::geometry::Dimensions;

/// A single decoded frame together with its intrinsic size.
pub struct Frame {
    pub image: Mat,
    pub intrinsic: Dimensions,
}

impl Frame {
    pub fn new(image: Mat, intrinsic: Dimensions) -> Self {
        Self { image, intrinsic }
    }

    pub fn from_mat(image: Mat) -> Result<Self> {
        let size = image.size()?;
        let intrinsic = Dimensions::new(size.width.max(0) as u32, size.height.max(0) as u32);
        Ok(Self { image, intrinsic })
    }

    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            image: self.image.try_clone()?,
            intrinsic: self.intrinsic,
        })
    }
}

/// Shared handle to the most recent frame of the active source.
///
/// The viewer publishes into it at display rate, the annotator samples it
/// once per polling period.
#[derive(Clone, Default)]
pub struct FrameSlot {
    inner: Arc<Mutex<Option<Frame>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: Frame) -> Result<()> {
        let mut slot = self
            .inner
            .lock()
            .map_err(|_| AnnotatorError::Poisoned("frame slot"))?;
        *slot = Some(frame);
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        let mut slot = self
            .inner
            .lock()
            .map_err(|_| AnnotatorError::Poisoned("frame slot"))?;
        *slot = None;
        Ok(())
    }

    /// Copy of the current frame, if any source has produced one.
    pub fn current(&self) -> Result<Option<Frame>> {
        let slot = self
            .inner
            .lock()
            .map_err(|_| AnnotatorError::Poisoned("frame slot"))?;
        slot.as_ref().map(Frame::try_clone).transpose()
    }
}
