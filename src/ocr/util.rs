use geo::{
    point, Area, BoundingRect, Contains, Coord, EuclideanLength, HasDimensions, LineString,
    MinimumRotatedRect, Polygon, Translate,
};
use geo_clipper::{Clipper, EndType, JoinType};
use image::{DynamicImage, GrayImage};
use imageproc::point::Point;
use ndarray::{s, Array3, ArrayView2, Axis};
use tracing::instrument;

use crate::geometry::{distance, warp_quad};

/// CHW tensor of `(pixel - mean) * norm` over the RGB channels in `[0, 1]`.
#[instrument(level = "trace", skip(image))]
pub(crate) fn normalize_chw(image: &DynamicImage, mean: &[f32; 3], norm: &[f32; 3]) -> Array3<f32> {
    let image = image.to_rgb32f();
    Array3::<f32>::from_shape_fn(
        (3, image.height() as usize, image.width() as usize),
        |(ch, y, x)| (image.get_pixel(x as u32, y as u32)[ch] - mean[ch]) * norm[ch],
    )
}

pub(crate) fn to_luma_image(data: ArrayView2<f32>) -> Option<GrayImage> {
    let height = data.len_of(Axis(0));
    let width = data.len_of(Axis(1));
    let pixels = data.iter().map(|p| (p * 255.0) as u8).collect::<Vec<u8>>();
    GrayImage::from_raw(width as u32, height as u32, pixels)
}

pub(crate) fn to_geo_poly(points: &[Point<i32>]) -> Polygon<f32> {
    let points = points
        .iter()
        .map(|point| Coord {
            x: point.x as f32,
            y: point.y as f32,
        })
        .collect::<Vec<_>>();
    Polygon::new(LineString::new(points), vec![])
}

pub(crate) fn max_side(rect: &Polygon<f32>) -> f32 {
    rect.exterior()
        .lines()
        .map(|it| it.euclidean_length())
        .fold(0.0, f32::max)
        .floor()
}

/// Mean probability inside `rect`, clipped to the map.
pub(crate) fn box_score_fast(rect: &Polygon<f32>, pred: ArrayView2<f32>) -> f32 {
    let Some(bounds) = rect.bounding_rect() else {
        return 0.0;
    };
    let (rows, cols) = pred.dim();
    let x0 = (bounds.min().x.floor().max(0.0) as usize).min(cols);
    let y0 = (bounds.min().y.floor().max(0.0) as usize).min(rows);
    let x1 = (bounds.max().x.ceil().max(0.0) as usize + 1).min(cols);
    let y1 = (bounds.max().y.ceil().max(0.0) as usize + 1).min(rows);
    if x0 >= x1 || y0 >= y1 {
        return 0.0;
    }

    let local = rect.translate(-(x0 as f32), -(y0 as f32));
    let (sum, count) = pred
        .slice(s![y0..y1, x0..x1])
        .indexed_iter()
        .filter(|((y, x), _)| local.contains(&point![x: *x as f32, y: *y as f32]))
        .fold((0.0, 0usize), |(sum, count), (_, value)| (sum + value, count + 1));

    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

/// Grows `rect` outward by `area * ratio / perimeter` and returns the minimal
/// rectangle around the result.
pub(crate) fn unclip(rect: &Polygon<f32>, unclip_ratio: f32) -> Option<Polygon<f32>> {
    let perimeter = rect.exterior().euclidean_length();
    if perimeter <= 0.0 {
        return None;
    }
    let distance = rect.unsigned_area() * unclip_ratio / perimeter;
    let grown = rect.offset(distance, JoinType::Round(0.25), EndType::ClosedPolygon, 1.0);

    if grown.is_empty() {
        None
    } else {
        grown.minimum_rotated_rect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Scale {
    pub factor_x: f32,
    pub factor_y: f32,
    pub target_width: u32,
    pub target_height: u32,
}

/// Input size for the detector: longest side capped at `max_side`, both
/// sides floored to a multiple of 32 (minimum 32).
pub fn scale_normalized(width: u32, height: u32, max_side: u32) -> Scale {
    let ratio = if width.max(height) > max_side {
        max_side as f32 / width.max(height) as f32
    } else {
        1.0
    };
    let snap = |side: u32| ((side as f32 * ratio) as u32 / 32 * 32).max(32);
    let (target_width, target_height) = (snap(width), snap(height));

    let scale = Scale {
        target_width,
        target_height,
        factor_x: width as f32 / target_width as f32,
        factor_y: height as f32 / target_height as f32,
    };
    log::debug!("Detector input resized from {width}x{height}: {scale:?}");
    scale
}

/// Perspective crop of one text box. Crops much taller than wide are turned
/// to read left to right.
pub(crate) fn crop_text(image: &DynamicImage, quad: &[Coord<f32>; 4]) -> Option<DynamicImage> {
    let width = distance(quad[0], quad[1]).max(distance(quad[2], quad[3])) as u32;
    let height = distance(quad[0], quad[3]).max(distance(quad[1], quad[2])) as u32;
    let crop = match warp_quad(image, quad, width, height) {
        Ok(crop) => crop,
        Err(err) => {
            log::trace!("Skipping text box {quad:?}: {err}");
            return None;
        }
    };
    if crop.height() as f32 / crop.width() as f32 >= 1.5 {
        Some(crop.rotate270())
    } else {
        Some(crop)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;

    #[test]
    fn detector_input_is_multiple_of_32() {
        let scale = scale_normalized(1000, 630, 960);
        assert_eq!(scale.target_width, 960);
        assert_eq!(scale.target_height, 576);
        assert!(scale.factor_x > 1.0);

        let small = scale_normalized(20, 10, 960);
        assert_eq!((small.target_width, small.target_height), (32, 32));
    }

    #[test]
    fn box_score_averages_inside_and_clips_to_map() {
        let mut pred = Array2::<f32>::zeros((20, 20));
        pred.slice_mut(s![5..10, 5..15]).fill(1.0);
        let inside = Polygon::new(
            LineString::from(vec![(6.0, 6.0), (13.0, 6.0), (13.0, 8.0), (6.0, 8.0)]),
            vec![],
        );
        assert!((box_score_fast(&inside, pred.view()) - 1.0).abs() < 1e-6);

        let outside = Polygon::new(
            LineString::from(vec![(15.0, 15.0), (40.0, 15.0), (40.0, 40.0), (15.0, 40.0)]),
            vec![],
        );
        assert_eq!(box_score_fast(&outside, pred.view()), 0.0);
    }

    #[test]
    fn unclip_grows_box() {
        let rect = Polygon::new(
            LineString::from(vec![(10.0, 10.0), (50.0, 10.0), (50.0, 20.0), (10.0, 20.0)]),
            vec![],
        );
        let grown = unclip(&rect, 1.6).expect("grown");
        assert!(grown.unsigned_area() > rect.unsigned_area());
    }
}
