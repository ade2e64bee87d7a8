use std::path::Path;

use float_ord::FloatOrd;
use image::{imageops::FilterType, DynamicImage};
use ndarray::{ArrayView2, Axis, Ix2};
use ort::{inputs, Session};
use tracing::instrument;

use super::{
    session::{build_session, SessionOptions, ShapeProfile},
    util::normalize_chw,
};
use crate::{result::TextLine, Error, Result};

const MEAN_VALUES: [f32; 3] = [0.5, 0.5, 0.5];
const NORM_VALUES: [f32; 3] = [2.0, 2.0, 2.0];
const DEST_HEIGHT: u32 = 48;

/// CRNN text recognizer with CTC output.
pub(crate) struct CrnnNet {
    session: Session,
    keys: Vec<String>,
}

impl CrnnNet {
    pub fn init(model_path: &Path, keys_path: &Path, options: &SessionOptions) -> Result<Self> {
        let keys = std::fs::read_to_string(keys_path).map_err(|source| Error::Keys {
            path: keys_path.to_path_buf(),
            source,
        })?;
        let profile = ShapeProfile {
            min: format!("x:1x3x{DEST_HEIGHT}x1"),
            opt: format!("x:1x3x{DEST_HEIGHT}x256"),
            max: format!("x:1x3x{DEST_HEIGHT}x{}", u16::MAX),
        };
        let session = build_session(model_path, options, profile)?;

        Ok(Self {
            session,
            keys: ctc_keys(&keys),
        })
    }

    #[instrument(level = "debug", skip(self, images), fields(images = images.len()))]
    pub fn get_text_lines(&self, images: &[DynamicImage]) -> Result<Vec<TextLine>> {
        images
            .iter()
            .map(|image| self.get_text_line(image))
            .collect()
    }

    #[instrument(level = "trace", skip(self, image))]
    fn get_text_line(&self, image: &DynamicImage) -> Result<TextLine> {
        let scale = DEST_HEIGHT as f32 / image.height() as f32;
        let dest_width = ((image.width() as f32 * scale) as u32).clamp(1, u16::MAX as u32);
        let image = image.resize_exact(dest_width, DEST_HEIGHT, FilterType::Triangle);

        let input = normalize_chw(&image, &MEAN_VALUES, &NORM_VALUES).insert_axis(Axis(0));
        let outputs = self.session.run(inputs!["x" => input]?)?;
        let (_, output) = outputs
            .first_key_value()
            .ok_or_else(|| Error::ModelOutput("recognizer produced no output".into()))?;
        let output = output.try_extract_tensor::<f32>()?;
        log::trace!("Recognizer output shape: {:?}", output.shape());

        // [1, T, C] class scores per time step
        let scores = output
            .remove_axis(Axis(0))
            .into_dimensionality::<Ix2>()
            .map_err(|err| Error::ModelOutput(format!("recognizer scores: {err}")))?;
        Ok(ctc_decode(scores, &self.keys))
    }
}

/// Index 0 is the CTC blank, the dictionary follows, then a trailing space.
fn ctc_keys(dictionary: &str) -> Vec<String> {
    std::iter::once("#".to_string())
        .chain(dictionary.lines().map(str::to_string))
        .chain(std::iter::once(" ".to_string()))
        .collect()
}

/// Greedy CTC: best class per step, repeats collapsed, blanks dropped.
fn ctc_decode(scores: ArrayView2<f32>, keys: &[String]) -> TextLine {
    let mut text = String::new();
    let mut character_scores = Vec::new();
    let mut previous = 0;

    for step in scores.outer_iter() {
        let Some((index, score)) = step
            .indexed_iter()
            .max_by_key(|(_, score)| FloatOrd(**score))
            .map(|(index, score)| (index, *score))
        else {
            continue;
        };
        if index != 0 && index != previous {
            if let Some(key) = keys.get(index) {
                text.push_str(key);
                character_scores.push(score);
            }
        }
        previous = index;
    }

    TextLine {
        text,
        character_scores,
    }
}
