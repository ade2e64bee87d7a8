use image::DynamicImage;
use tracing::instrument;

use crate::{
    geometry::{distance, min_area_rect, warp_quad},
    CardOutline, LocateError, RotatedRect,
};

/// Turns card outlines into rectified, landscape card images.
#[derive(Debug, Clone, Copy, Default)]
pub struct CardLocator;

impl CardLocator {
    pub fn new() -> Self {
        Self
    }

    /// Minimal rotated rectangle around `outline`.
    ///
    /// Each side length is the longer of the two opposite edges, so jitter in
    /// the upstream vertices never shrinks the crop.
    pub fn compute_rectangle(&self, outline: &CardOutline) -> Result<RotatedRect, LocateError> {
        if outline.points.len() < 3 {
            return Err(LocateError::TooFewPoints(outline.points.len()));
        }
        if let Some(index) = outline
            .points
            .iter()
            .position(|p| !(p.x.is_finite() && p.y.is_finite()))
        {
            return Err(LocateError::NonFinitePoint(index));
        }
        let corners = min_area_rect(&outline.points).ok_or(LocateError::SingularTransform)?;

        let width = distance(corners[0], corners[1]).max(distance(corners[2], corners[3]));
        let height = distance(corners[1], corners[2]).max(distance(corners[3], corners[0]));
        let rect = RotatedRect {
            width: width as u32,
            height: height as u32,
            corners,
        };
        if rect.width < 2 || rect.height < 2 {
            return Err(LocateError::Degenerate {
                width: rect.width,
                height: rect.height,
            });
        }
        Ok(rect)
    }

    /// Warps the area under `rect.corners` into a `rect.width x rect.height` image.
    pub fn rectify(
        &self,
        image: &DynamicImage,
        rect: &RotatedRect,
    ) -> Result<DynamicImage, LocateError> {
        warp_quad(image, &rect.corners, rect.width, rect.height)
    }

    /// Rotates portrait images 90° clockwise so the long side is horizontal.
    pub fn normalize_orientation(&self, image: DynamicImage) -> DynamicImage {
        if image.height() > image.width() {
            image.rotate90()
        } else {
            image
        }
    }

    #[instrument(level = "debug", skip_all)]
    pub fn locate(
        &self,
        image: &DynamicImage,
        outline: &CardOutline,
    ) -> Result<DynamicImage, LocateError> {
        let rect = self.compute_rectangle(outline)?;
        log::trace!("Card rectangle: {rect:?}");
        let rectified = self.rectify(image, &rect)?;
        Ok(self.normalize_orientation(rectified))
    }

    /// Locates every outline, keeping the input order. Outlines that fail
    /// are logged and skipped; each returned image carries the index of its
    /// outline.
    #[instrument(level = "debug", skip_all, fields(outlines = outlines.len()))]
    pub fn locate_all(
        &self,
        image: &DynamicImage,
        outlines: &[CardOutline],
    ) -> Vec<(usize, DynamicImage)> {
        outlines
            .iter()
            .enumerate()
            .filter_map(|(index, outline)| match self.locate(image, outline) {
                Ok(card) => Some((index, card)),
                Err(err) => {
                    log::warn!("Failed to align card {index}: {err}");
                    None
                }
            })
            .collect()
    }
}
