use float_ord::FloatOrd;
use geo::{Coord, LineString, MinimumRotatedRect, Polygon};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use tracing::instrument;

use crate::LocateError;

/// Quads with less area than this (in px²) are treated as collinear.
const MIN_QUAD_AREA: f32 = 1.0;

/// Planar projective transform `dst ~ H * src`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography(Matrix3<f64>);

impl Homography {
    /// Solves the 8x8 DLT system for the transform taking each `src[i]` onto
    /// `dst[i]`. Points are Hartley-normalized first. Returns `None` when the
    /// system is singular, i.e. three of the points are collinear.
    pub fn from_correspondences(src: &[Coord<f32>; 4], dst: &[Coord<f32>; 4]) -> Option<Self> {
        let (src_n, t_src) = normalize(src);
        let (dst_n, t_dst) = normalize(dst);

        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();
        for k in 0..4 {
            let (x, y) = src_n[k];
            let (u, v) = dst_n[k];

            let r = 2 * k;
            a[(r, 0)] = x;
            a[(r, 1)] = y;
            a[(r, 2)] = 1.0;
            a[(r, 6)] = -u * x;
            a[(r, 7)] = -u * y;
            b[r] = u;

            a[(r + 1, 3)] = x;
            a[(r + 1, 4)] = y;
            a[(r + 1, 5)] = 1.0;
            a[(r + 1, 6)] = -v * x;
            a[(r + 1, 7)] = -v * y;
            b[r + 1] = v;
        }

        let lu = a.lu();
        if lu.determinant().abs() < 1e-10 {
            return None;
        }
        let h = lu.solve(&b)?;
        let h_n = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
        let h = t_dst.try_inverse()? * h_n * t_src;

        let scale = h[(2, 2)];
        if scale.abs() < 1e-12 || !h.iter().all(|v| v.is_finite()) {
            return None;
        }
        Some(Self(h / scale))
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.0
    }

    pub fn apply(&self, p: Coord<f32>) -> Coord<f32> {
        let v = self.0 * Vector3::new(p.x as f64, p.y as f64, 1.0);
        Coord {
            x: (v[0] / v[2]) as f32,
            y: (v[1] / v[2]) as f32,
        }
    }

    fn to_projection(self) -> Option<Projection> {
        let m = self.0;
        Projection::from_matrix([
            m[(0, 0)] as f32,
            m[(0, 1)] as f32,
            m[(0, 2)] as f32,
            m[(1, 0)] as f32,
            m[(1, 1)] as f32,
            m[(1, 2)] as f32,
            m[(2, 0)] as f32,
            m[(2, 1)] as f32,
            m[(2, 2)] as f32,
        ])
    }
}

// Translate to the centroid, scale so the mean distance is sqrt(2).
fn normalize(points: &[Coord<f32>; 4]) -> ([(f64, f64); 4], Matrix3<f64>) {
    let cx = points.iter().map(|p| p.x as f64).sum::<f64>() / 4.0;
    let cy = points.iter().map(|p| p.y as f64).sum::<f64>() / 4.0;
    let mean_dist = points
        .iter()
        .map(|p| (p.x as f64 - cx).hypot(p.y as f64 - cy))
        .sum::<f64>()
        / 4.0;
    let s = if mean_dist > 1e-12 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = (*points).map(|p| (s * (p.x as f64 - cx), s * (p.y as f64 - cy)));
    (normalized, t)
}

/// Shoelace area. Positive when the corners run clockwise on screen (y down).
pub(crate) fn signed_area(quad: &[Coord<f32>; 4]) -> f32 {
    (0..4)
        .map(|i| {
            let (p, q) = (quad[i], quad[(i + 1) % 4]);
            p.x * q.y - q.x * p.y
        })
        .sum::<f32>()
        / 2.0
}

/// Reorders `corners` to run clockwise on screen, starting from the corner
/// with the smallest `x + y`.
pub fn order_corners(mut corners: [Coord<f32>; 4]) -> [Coord<f32>; 4] {
    if signed_area(&corners) < 0.0 {
        corners.reverse();
    }
    let start = corners
        .iter()
        .enumerate()
        .min_by_key(|(_, p)| FloatOrd(p.x + p.y))
        .map_or(0, |(i, _)| i);
    corners.rotate_left(start);
    corners
}

pub(crate) fn distance(a: Coord<f32>, b: Coord<f32>) -> f32 {
    (a.x - b.x).hypot(a.y - b.y)
}

pub(crate) fn to_quad(rect: &Polygon<f32>) -> Option<[Coord<f32>; 4]> {
    match rect.exterior().0.as_slice() {
        [a, b, c, d, ..] => Some(order_corners([*a, *b, *c, *d])),
        _ => None,
    }
}

/// Minimal-area rotated rectangle around `points`, with ordered corners.
pub fn min_area_rect(points: &[Coord<f32>]) -> Option<[Coord<f32>; 4]> {
    let outline = Polygon::new(LineString::from(points.to_vec()), vec![]);
    to_quad(&outline.minimum_rotated_rect()?)
}

/// Resamples the region of `image` bounded by `quad` into a `width x height`
/// buffer, mapping the corners onto `(0,0)`, `(w-1,0)`, `(w-1,h-1)`, `(0,h-1)`.
#[instrument(level = "trace", skip(image))]
pub fn warp_quad(
    image: &DynamicImage,
    quad: &[Coord<f32>; 4],
    width: u32,
    height: u32,
) -> Result<DynamicImage, LocateError> {
    if width < 2 || height < 2 {
        return Err(LocateError::Degenerate { width, height });
    }
    if signed_area(quad).abs() < MIN_QUAD_AREA {
        return Err(LocateError::SingularTransform);
    }

    let (right, bottom) = ((width - 1) as f32, (height - 1) as f32);
    let target = [
        Coord { x: 0.0, y: 0.0 },
        Coord { x: right, y: 0.0 },
        Coord {
            x: right,
            y: bottom,
        },
        Coord { x: 0.0, y: bottom },
    ];
    let projection = Homography::from_correspondences(quad, &target)
        .and_then(Homography::to_projection)
        .ok_or(LocateError::SingularTransform)?;

    let source = image.to_rgb8();
    let mut warped = RgbImage::new(width, height);
    warp_into(
        &source,
        &projection,
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
        &mut warped,
    );
    Ok(DynamicImage::ImageRgb8(warped))
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn c(x: f32, y: f32) -> Coord<f32> {
        Coord { x, y }
    }

    #[test]
    fn homography_maps_corners_onto_targets() {
        let src = [c(12.0, 30.0), c(210.0, 5.0), c(230.0, 140.0), c(20.0, 160.0)];
        let dst = [c(0.0, 0.0), c(199.0, 0.0), c(199.0, 119.0), c(0.0, 119.0)];
        let h = Homography::from_correspondences(&src, &dst).expect("solvable");
        for (s, d) in src.iter().zip(dst.iter()) {
            let mapped = h.apply(*s);
            assert_abs_diff_eq!(mapped.x, d.x, epsilon = 1e-2);
            assert_abs_diff_eq!(mapped.y, d.y, epsilon = 1e-2);
        }
    }

    #[test]
    fn homography_rejects_collinear_points() {
        let src = [c(0.0, 0.0), c(10.0, 10.0), c(20.0, 20.0), c(30.0, 30.0)];
        let dst = [c(0.0, 0.0), c(9.0, 0.0), c(9.0, 9.0), c(0.0, 9.0)];
        assert!(Homography::from_correspondences(&src, &dst).is_none());
    }

    #[test]
    fn corners_are_ordered_clockwise_from_top_left() {
        let ccw = [c(0.0, 10.0), c(20.0, 10.0), c(20.0, 0.0), c(0.0, 0.0)];
        let ordered = order_corners(ccw);
        assert_eq!(
            ordered,
            [c(0.0, 0.0), c(20.0, 0.0), c(20.0, 10.0), c(0.0, 10.0)]
        );
        assert!(signed_area(&ordered) > 0.0);
    }

    #[test]
    fn min_area_rect_of_rotated_square() {
        let diamond = [c(50.0, 0.0), c(100.0, 50.0), c(50.0, 100.0), c(0.0, 50.0)];
        let quad = min_area_rect(&diamond).expect("rect");
        for i in 0..4 {
            assert_abs_diff_eq!(
                distance(quad[i], quad[(i + 1) % 4]),
                50.0 * std::f32::consts::SQRT_2,
                epsilon = 0.5
            );
        }
    }

    #[test]
    fn warp_rejects_collinear_quad() {
        let image = DynamicImage::new_rgb8(32, 32);
        let line = [c(0.0, 0.0), c(10.0, 0.0), c(20.0, 0.0), c(30.0, 0.0)];
        assert_eq!(
            warp_quad(&image, &line, 10, 10).unwrap_err(),
            LocateError::SingularTransform
        );
    }
}
