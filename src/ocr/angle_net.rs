use std::path::Path;

use float_ord::FloatOrd;
use image::{imageops::FilterType, DynamicImage};
use ndarray::Axis;
use ort::{inputs, Session};
use tracing::instrument;

use super::{
    session::{build_session, SessionOptions, ShapeProfile},
    util::normalize_chw,
};
use crate::{result::Angle, Error, Result};

const DEST_WIDTH: u32 = 192;
const DEST_HEIGHT: u32 = 48;

const MEAN_VALUES: [f32; 3] = [0.5, 0.5, 0.5];
const NORM_VALUES: [f32; 3] = [2.0, 2.0, 2.0];

/// Two-class text line orientation classifier (0° / 180°).
pub(crate) struct AngleNet {
    session: Session,
}

impl AngleNet {
    pub fn init(path: &Path, options: &SessionOptions) -> Result<Self> {
        let shape = format!("x:1x3x{DEST_HEIGHT}x{DEST_WIDTH}");
        let profile = ShapeProfile {
            min: shape.clone(),
            opt: shape.clone(),
            max: shape,
        };
        Ok(Self {
            session: build_session(path, options, profile)?,
        })
    }

    /// Rotates every crop the classifier is confident is upside down.
    #[instrument(level = "debug", skip(self, images), fields(images = images.len()))]
    pub fn correct_orientation(&self, images: &mut [DynamicImage], threshold: f32) -> Result<()> {
        for image in images.iter_mut() {
            let angle = self.get_angle(image)?;
            if angle.index == 1 && angle.score >= threshold {
                *image = image.rotate180();
            }
        }
        Ok(())
    }

    #[instrument(level = "trace", skip(self, image))]
    fn get_angle(&self, image: &DynamicImage) -> Result<Angle> {
        let image = image.resize_exact(DEST_WIDTH, DEST_HEIGHT, FilterType::Triangle);
        let input = normalize_chw(&image, &MEAN_VALUES, &NORM_VALUES).insert_axis(Axis(0));
        let outputs = self.session.run(inputs!["x" => input]?)?;
        let (_, output) = outputs
            .first_key_value()
            .ok_or_else(|| Error::ModelOutput("classifier produced no output".into()))?;
        let output = output.try_extract_tensor::<f32>()?;

        output
            .iter()
            .enumerate()
            .max_by_key(|(_, score)| FloatOrd(**score))
            .map(|(index, score)| Angle {
                index,
                score: *score,
            })
            .ok_or_else(|| Error::ModelOutput("classifier output is empty".into()))
    }
}
