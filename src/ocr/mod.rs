//! PaddleOCR-style text engine run through ONNX Runtime: DBNet detection,
//! optional angle classification and CRNN recognition.

use std::path::PathBuf;

use image::DynamicImage;
use tracing::instrument;

mod angle_net;
mod crnn_net;
mod dbnet;
pub(crate) mod session;
pub mod util;

use angle_net::AngleNet;
use crnn_net::CrnnNet;
use dbnet::DbNet;
pub use session::{ExecutionProvider, SessionOptions};
use util::{crop_text, scale_normalized};

use crate::{Result, TextFragment, TextRecognizer};

#[derive(Debug, Clone, Copy)]
pub struct DetectionOptions {
    /// Longest side of the detector input. `0` uses the engine's default.
    pub max_side_len: u32,
    pub box_score_threshold: f32,
    pub box_threshold: f32,
    pub unclip_ratio: f32,
    /// Minimum classifier score for turning a crop upside down.
    pub cls_threshold: f32,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            max_side_len: 0,
            box_score_threshold: 0.5,
            box_threshold: 0.3,
            unclip_ratio: 1.6,
            cls_threshold: 0.9,
        }
    }
}

pub struct RapidOcrBuilder {
    session: SessionOptions,
    det_path: Option<PathBuf>,
    cls_path: Option<PathBuf>,
    rec_paths: Option<(PathBuf, PathBuf)>,
    max_side_len: u32,
    options: DetectionOptions,
}

impl RapidOcrBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.session.threads = threads;
        self
    }

    pub fn det_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.det_path = Some(path.into());
        self
    }

    /// Enables the angle classifier.
    pub fn cls_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.cls_path = Some(path.into());
        self
    }

    pub fn rec_model(
        mut self,
        model_path: impl Into<PathBuf>,
        keys_path: impl Into<PathBuf>,
    ) -> Self {
        self.rec_paths = Some((model_path.into(), keys_path.into()));
        self
    }

    pub fn max_side_len(mut self, max_side_len: u32) -> Self {
        self.max_side_len = max_side_len;
        self
    }

    pub fn detection_options(mut self, options: DetectionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_engine_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.session.cache_path = Some(path.into());
        self
    }

    pub fn with_execution_providers(
        mut self,
        providers: impl IntoIterator<Item = ExecutionProvider>,
    ) -> Self {
        self.session.execution_providers = providers.into_iter().collect();
        self
    }

    #[instrument(skip(self))]
    pub fn build(self) -> Result<RapidOcr> {
        let det_path = self
            .det_path
            .unwrap_or_else(|| "models/en_PP-OCRv3_det_infer.onnx".into());
        let (rec_path, keys_path) = self.rec_paths.unwrap_or_else(|| {
            (
                "models/en_PP-OCRv4_rec_infer.onnx".into(),
                "models/en_dict.txt".into(),
            )
        });

        Ok(RapidOcr {
            det_model: DbNet::init(&det_path, &self.session, self.max_side_len)?,
            cls_model: self
                .cls_path
                .map(|path| AngleNet::init(&path, &self.session))
                .transpose()?,
            rec_model: CrnnNet::init(&rec_path, &keys_path, &self.session)?,
            max_side_len: self.max_side_len,
            options: self.options,
        })
    }
}

impl Default for RapidOcrBuilder {
    fn default() -> Self {
        Self {
            session: SessionOptions::default(),
            det_path: None,
            cls_path: None,
            rec_paths: None,
            max_side_len: 960,
            options: DetectionOptions::default(),
        }
    }
}

pub struct RapidOcr {
    det_model: DbNet,
    cls_model: Option<AngleNet>,
    rec_model: CrnnNet,
    max_side_len: u32,
    options: DetectionOptions,
}

impl RapidOcr {
    #[instrument(skip(self, image))]
    pub fn detect(
        &self,
        image: &DynamicImage,
        options: &DetectionOptions,
    ) -> Result<Vec<TextFragment>> {
        let max_side_len = match options.max_side_len {
            0 => self.max_side_len,
            len => len.min(self.max_side_len),
        };
        let scale = scale_normalized(image.width(), image.height(), max_side_len);
        let boxes = self.det_model.get_text_boxes(image, scale, options)?;

        let (boxes, mut crops): (Vec<_>, Vec<_>) = boxes
            .into_iter()
            .filter_map(|it| crop_text(image, &it.quad).map(|crop| (it, crop)))
            .unzip();
        #[cfg(feature = "debug")]
        for (i, crop) in crops.iter().enumerate() {
            if let Err(err) = crop.save(format!("part_images/{i}.png")) {
                log::warn!("Failed to save text crop {i}: {err}");
            }
        }

        if let Some(angle_net) = &self.cls_model {
            angle_net.correct_orientation(&mut crops, options.cls_threshold)?;
        }

        let lines = self.rec_model.get_text_lines(&crops)?;
        Ok(boxes
            .into_iter()
            .zip(lines)
            .map(|(bounds, line)| {
                log::trace!(
                    "{:?} ({:.3}) in box {:?} ({:.3})",
                    line.text,
                    line.confidence(),
                    bounds.quad,
                    bounds.score
                );
                TextFragment {
                    quad: bounds.quad,
                    confidence: line.confidence(),
                    text: line.text,
                }
            })
            .collect())
    }
}

impl TextRecognizer for RapidOcr {
    fn recognize(&self, image: &DynamicImage) -> Result<Option<Vec<TextFragment>>> {
        let fragments = self.detect(image, &self.options)?;
        Ok((!fragments.is_empty()).then_some(fragments))
    }
}
