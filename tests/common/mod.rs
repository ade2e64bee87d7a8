#![allow(dead_code)]

use std::cell::Cell;

use cardnum::{CardOutline, CardSegmenter, Error, Result, TextFragment, TextRecognizer};
use image::{DynamicImage, Rgb, RgbImage};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Fragment with an axis-aligned box of height 20.
pub fn fragment(text: &str, x: f32, y: f32, width: f32) -> TextFragment {
    TextFragment::new(
        [(x, y), (x + width, y), (x + width, y + 20.0), (x, y + 20.0)],
        text,
        0.95,
    )
}

/// Card image with a white marker in the top-left corner, so a recognizer
/// can tell whether it is looking at the upright or the flipped image.
pub fn marked_card(width: u32, height: u32) -> DynamicImage {
    let mut card = RgbImage::from_pixel(width, height, Rgb([40, 40, 40]));
    card.put_pixel(0, 0, Rgb([255, 255, 255]));
    DynamicImage::ImageRgb8(card)
}

pub fn is_upright(image: &DynamicImage) -> bool {
    image.to_rgb8().get_pixel(0, 0)[0] == 255
}

pub struct FixedSegmenter(pub Vec<CardOutline>);

impl CardSegmenter for FixedSegmenter {
    fn segment(&self, _image: &DynamicImage) -> Result<Vec<CardOutline>> {
        Ok(self.0.clone())
    }
}

/// Recognizer answering from a closure and counting its invocations.
pub struct StubRecognizer<F> {
    respond: F,
    calls: Cell<usize>,
}

impl<F> StubRecognizer<F>
where
    F: Fn(&DynamicImage) -> Option<Vec<TextFragment>>,
{
    pub fn new(respond: F) -> Self {
        Self {
            respond,
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl<F> TextRecognizer for StubRecognizer<F>
where
    F: Fn(&DynamicImage) -> Option<Vec<TextFragment>>,
{
    fn recognize(&self, image: &DynamicImage) -> Result<Option<Vec<TextFragment>>> {
        self.calls.set(self.calls.get() + 1);
        Ok((self.respond)(image))
    }
}

pub struct FailingRecognizer;

impl TextRecognizer for FailingRecognizer {
    fn recognize(&self, _image: &DynamicImage) -> Result<Option<Vec<TextFragment>>> {
        Err(Error::ModelOutput("recognizer unavailable".into()))
    }
}
