use std::path::Path;

use float_ord::FloatOrd;
use geo::{Coord, MinimumRotatedRect};
use image::{imageops::FilterType, DynamicImage, GrayImage};
use imageproc::{
    contours::find_contours,
    contrast::{threshold_mut, ThresholdType},
    distance_transform::Norm,
    morphology::dilate_mut,
};
use ndarray::{ArrayView2, Axis, Ix2};
use ort::{inputs, Session};
use tracing::instrument;

use super::{
    session::{build_session, SessionOptions, ShapeProfile},
    util::{box_score_fast, max_side, normalize_chw, to_geo_poly, to_luma_image, unclip, Scale},
    DetectionOptions,
};
use crate::{geometry::to_quad, result::TextBox, Error, Result};

const MEAN_VALUES: [f32; 3] = [0.485, 0.456, 0.406];
const NORM_VALUES: [f32; 3] = [1.0 / 0.229, 1.0 / 0.224, 1.0 / 0.225];

const MIN_SIDE: f32 = 3.0;
const MAX_CANDIDATES: usize = 1000;

/// DBNet text detector.
pub(crate) struct DbNet {
    session: Session,
}

impl DbNet {
    pub fn init(path: &Path, options: &SessionOptions, max_side_len: u32) -> Result<Self> {
        let profile = ShapeProfile {
            min: "x:1x3x32x32".into(),
            opt: format!("x:1x3x{max_side_len}x{max_side_len}"),
            max: format!("x:1x3x{max_side_len}x{max_side_len}"),
        };
        Ok(Self {
            session: build_session(path, options, profile)?,
        })
    }

    #[instrument(skip(self, image, options), level = "debug")]
    pub fn get_text_boxes(
        &self,
        image: &DynamicImage,
        scale: Scale,
        options: &DetectionOptions,
    ) -> Result<Vec<TextBox>> {
        let resized =
            image.resize_exact(scale.target_width, scale.target_height, FilterType::Triangle);
        let input = normalize_chw(&resized, &MEAN_VALUES, &NORM_VALUES).insert_axis(Axis(0));
        let outputs = self.session.run(inputs!["x" => input]?)?;
        let (_, output) = outputs
            .first_key_value()
            .ok_or_else(|| Error::ModelOutput("detector produced no output".into()))?;
        let pred = output.try_extract_tensor::<f32>()?;

        // [1, 1, H, W] probability map
        let pred = pred
            .remove_axis(Axis(0))
            .remove_axis(Axis(0))
            .into_dimensionality::<Ix2>()
            .map_err(|err| Error::ModelOutput(format!("detector map: {err}")))?;

        let mut mask = to_luma_image(pred.view())
            .ok_or_else(|| Error::ModelOutput("detector map has an invalid size".into()))?;
        threshold_mut(
            &mut mask,
            (options.box_threshold * 255.0) as u8,
            ThresholdType::Binary,
        );
        dilate_mut(&mut mask, Norm::L1, 2);

        let mut boxes = find_boxes(pred.view(), &mask, scale, options);
        boxes.sort_by_key(|it| (FloatOrd(it.quad[0].y), FloatOrd(it.quad[0].x)));
        log::debug!("Detected {} text boxes", boxes.len());
        Ok(boxes)
    }
}

#[instrument(skip(pred, mask, options), level = "trace")]
fn find_boxes(
    pred: ArrayView2<f32>,
    mask: &GrayImage,
    scale: Scale,
    options: &DetectionOptions,
) -> Vec<TextBox> {
    find_contours::<i32>(mask)
        .into_iter()
        .take(MAX_CANDIDATES)
        .filter(|it| it.points.len() > 2)
        .filter_map(|it| to_geo_poly(&it.points).minimum_rotated_rect())
        .filter(|rect| max_side(rect) >= MIN_SIDE)
        .map(|rect| {
            let score = box_score_fast(&rect, pred);
            (rect, score)
        })
        .filter(|(_, score)| *score >= options.box_score_threshold)
        .filter_map(|(rect, score)| Some((unclip(&rect, options.unclip_ratio)?, score)))
        .filter(|(rect, _)| max_side(rect) >= MIN_SIDE + 2.0)
        .filter_map(|(rect, score)| {
            let quad = to_quad(&rect)?.map(|p| Coord {
                x: p.x * scale.factor_x,
                y: p.y * scale.factor_y,
            });
            Some(TextBox { score, quad })
        })
        .collect()
}
