//! YOLOv8 instance segmentation turned into card outlines.

use std::path::Path;

use float_ord::FloatOrd;
use geo::Coord;
use image::{imageops::FilterType, DynamicImage, GrayImage, Luma};
use imageproc::{
    contours::{find_contours, BorderType},
    contrast::{threshold_mut, ThresholdType},
};
use ndarray::{ArrayView1, ArrayView2, ArrayView3, Axis, Ix2, Ix3};
use ort::{inputs, Session};
use tracing::instrument;

use crate::{
    ocr::{
        session::{build_session, SessionOptions, ShapeProfile},
        util::normalize_chw,
    },
    CardOutline, CardSegmenter, Error, Result,
};

#[derive(Debug, Clone, Copy)]
pub struct SegmentOptions {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Side of the square model input.
    pub input_size: u32,
    pub max_detections: usize,
    /// Mask probability above which a pixel belongs to the card.
    pub mask_threshold: f32,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            input_size: 640,
            max_detections: 300,
            mask_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    /// `[x0, y0, x1, y1]` in model input pixels.
    bbox: [f32; 4],
    score: f32,
    coeffs: Vec<f32>,
}

impl Candidate {
    fn area(&self) -> f32 {
        let [x0, y0, x1, y1] = self.bbox;
        (x1 - x0).max(0.0) * (y1 - y0).max(0.0)
    }

    fn iou(&self, other: &Candidate) -> f32 {
        let [ax0, ay0, ax1, ay1] = self.bbox;
        let [bx0, by0, bx1, by1] = other.bbox;
        let w = (ax1.min(bx1) - ax0.max(bx0)).max(0.0);
        let h = (ay1.min(by1) - ay0.max(by0)).max(0.0);
        let intersection = w * h;
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

pub struct YoloSegmenter {
    session: Session,
    options: SegmentOptions,
}

impl YoloSegmenter {
    pub fn init(
        path: impl AsRef<Path>,
        session: &SessionOptions,
        options: SegmentOptions,
    ) -> Result<Self> {
        let size = options.input_size;
        let shape = format!("images:1x3x{size}x{size}");
        let profile = ShapeProfile {
            min: shape.clone(),
            opt: shape.clone(),
            max: shape,
        };
        Ok(Self {
            session: build_session(path.as_ref(), session, profile)?,
            options,
        })
    }

    pub fn options(&self) -> &SegmentOptions {
        &self.options
    }

    #[instrument(level = "debug", skip(self, image))]
    pub fn detect(&self, image: &DynamicImage) -> Result<Vec<CardOutline>> {
        let size = self.options.input_size;
        let resized = image.resize_exact(size, size, FilterType::Triangle);
        let input = normalize_chw(&resized, &[0.0; 3], &[1.0; 3]).insert_axis(Axis(0));
        let outputs = self.session.run(inputs!["images" => input]?)?;

        let output = |name: &str| {
            outputs
                .get(name)
                .ok_or_else(|| Error::ModelOutput(format!("segmenter has no `{name}` output")))
        };
        let preds = output("output0")?.try_extract_tensor::<f32>()?;
        let protos = output("output1")?.try_extract_tensor::<f32>()?;

        // [1, 4 + classes + masks, anchors] and [1, masks, h, w]
        let preds = preds
            .remove_axis(Axis(0))
            .into_dimensionality::<Ix2>()
            .map_err(|err| Error::ModelOutput(format!("segmenter predictions: {err}")))?;
        let protos = protos
            .remove_axis(Axis(0))
            .into_dimensionality::<Ix3>()
            .map_err(|err| Error::ModelOutput(format!("segmenter prototypes: {err}")))?;

        let candidates = decode_candidates(preds, protos.len_of(Axis(0)), &self.options);
        let kept = non_max_suppression(candidates, &self.options);
        log::debug!("Segmenter kept {} candidates", kept.len());

        Ok(kept
            .iter()
            .filter_map(|candidate| {
                let points = mask_outline(
                    candidate,
                    protos,
                    size,
                    (image.width(), image.height()),
                    self.options.mask_threshold,
                )?;
                Some(CardOutline {
                    points,
                    score: candidate.score,
                })
            })
            .collect())
    }
}

impl CardSegmenter for YoloSegmenter {
    fn segment(&self, image: &DynamicImage) -> Result<Vec<CardOutline>> {
        self.detect(image)
    }
}

fn decode_candidates(
    preds: ArrayView2<f32>,
    num_masks: usize,
    options: &SegmentOptions,
) -> Vec<Candidate> {
    let features = preds.len_of(Axis(0));
    if features <= 4 + num_masks {
        log::warn!("Segmenter output has {features} features, expected more than {num_masks} + 4");
        return Vec::new();
    }
    let classes = 4..features - num_masks;

    preds
        .axis_iter(Axis(1))
        .filter_map(|anchor| {
            let score = anchor
                .slice(ndarray::s![classes.clone()])
                .iter()
                .copied()
                .max_by_key(|score| FloatOrd(*score))?;
            if score < options.confidence_threshold {
                return None;
            }
            let (cx, cy, w, h) = (anchor[0], anchor[1], anchor[2], anchor[3]);
            Some(Candidate {
                bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
                score,
                coeffs: anchor.slice(ndarray::s![classes.end..]).to_vec(),
            })
        })
        .collect()
}

fn non_max_suppression(mut candidates: Vec<Candidate>, options: &SegmentOptions) -> Vec<Candidate> {
    candidates.sort_by_key(|it| std::cmp::Reverse(FloatOrd(it.score)));

    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if kept.len() >= options.max_detections {
            break;
        }
        if kept.iter().all(|it| it.iou(&candidate) < options.iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// Largest outer contour of the candidate's mask, in image pixels.
fn mask_outline(
    candidate: &Candidate,
    protos: ArrayView3<f32>,
    input_size: u32,
    (width, height): (u32, u32),
    threshold: f32,
) -> Option<Vec<Coord<f32>>> {
    let (num_masks, mask_h, mask_w) = protos.dim();
    let protos = protos.to_shape((num_masks, mask_h * mask_w)).ok()?;
    let logits = ArrayView1::from(&candidate.coeffs).dot(&protos);

    let sx = mask_w as f32 / input_size as f32;
    let sy = mask_h as f32 / input_size as f32;
    let [x0, y0, x1, y1] = candidate.bbox;

    let mut mask = GrayImage::new(mask_w as u32, mask_h as u32);
    for (i, logit) in logits.iter().enumerate() {
        let (x, y) = (i % mask_w, i / mask_w);
        let (cx, cy) = (x as f32 + 0.5, y as f32 + 0.5);
        if cx < x0 * sx || cx > x1 * sx || cy < y0 * sy || cy > y1 * sy {
            continue;
        }
        let probability = 1.0 / (1.0 + (-logit).exp());
        mask.put_pixel(x as u32, y as u32, Luma([(probability * 255.0) as u8]));
    }

    let mut mask = image::imageops::resize(&mask, width, height, FilterType::Triangle);
    threshold_mut(&mut mask, (threshold * 255.0) as u8, ThresholdType::Binary);

    find_contours::<i32>(&mask)
        .into_iter()
        .filter(|contour| matches!(contour.border_type, BorderType::Outer))
        .max_by_key(|contour| contour.points.len())
        .map(|contour| {
            contour
                .points
                .iter()
                .map(|p| Coord {
                    x: p.x as f32,
                    y: p.y as f32,
                })
                .collect()
        })
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, Array3};

    use super::*;

    fn predictions(anchors: &[[f32; 6]]) -> Array2<f32> {
        // features: cx, cy, w, h, card score, one mask coefficient
        Array2::from_shape_fn((6, anchors.len()), |(feature, anchor)| {
            anchors[anchor][feature]
        })
    }

    #[test]
    fn decode_filters_by_confidence_and_suppresses_overlaps() {
        let preds = predictions(&[
            [32.0, 32.0, 20.0, 20.0, 0.9, 1.0],
            [33.0, 32.0, 20.0, 20.0, 0.8, 1.0],
            [100.0, 100.0, 10.0, 10.0, 0.1, 1.0],
            [200.0, 200.0, 40.0, 20.0, 0.6, -1.0],
        ]);
        let options = SegmentOptions::default();
        let candidates = decode_candidates(preds.view(), 1, &options);
        assert_eq!(candidates.len(), 3);

        let kept = non_max_suppression(candidates, &options);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[0].bbox, [22.0, 22.0, 42.0, 42.0]);
        assert_eq!(kept[1].coeffs, vec![-1.0]);
    }

    #[test]
    fn mask_is_cropped_to_box_and_scaled_to_image() {
        let protos = Array3::<f32>::from_elem((1, 16, 16), 10.0);
        let candidate = Candidate {
            bbox: [16.0, 16.0, 48.0, 48.0],
            score: 0.9,
            coeffs: vec![1.0],
        };
        let outline = mask_outline(&candidate, protos.view(), 64, (128, 128), 0.5)
            .expect("outline");

        let min_x = outline.iter().map(|p| p.x).fold(f32::INFINITY, f32::min);
        let max_x = outline.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max);
        assert!((28.0..=36.0).contains(&min_x), "min x {min_x}");
        assert!((92.0..=100.0).contains(&max_x), "max x {max_x}");
    }
}
