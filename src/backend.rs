use image::DynamicImage;

use crate::{CardOutline, Result, TextFragment};

/// Proposes one outline per card visible in an image.
pub trait CardSegmenter {
    fn segment(&self, image: &DynamicImage) -> Result<Vec<CardOutline>>;
}

/// Finds and reads text in an image.
///
/// `Ok(None)` means the engine found no text at all and is handled the same
/// way as an empty list.
pub trait TextRecognizer {
    fn recognize(&self, image: &DynamicImage) -> Result<Option<Vec<TextFragment>>>;
}

impl<T: CardSegmenter + ?Sized> CardSegmenter for &T {
    fn segment(&self, image: &DynamicImage) -> Result<Vec<CardOutline>> {
        (**self).segment(image)
    }
}

impl<T: CardSegmenter + ?Sized> CardSegmenter for Box<T> {
    fn segment(&self, image: &DynamicImage) -> Result<Vec<CardOutline>> {
        (**self).segment(image)
    }
}

impl<T: TextRecognizer + ?Sized> TextRecognizer for &T {
    fn recognize(&self, image: &DynamicImage) -> Result<Option<Vec<TextFragment>>> {
        (**self).recognize(image)
    }
}

impl<T: TextRecognizer + ?Sized> TextRecognizer for Box<T> {
    fn recognize(&self, image: &DynamicImage) -> Result<Option<Vec<TextFragment>>> {
        (**self).recognize(image)
    }
}
