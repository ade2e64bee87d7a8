use image::DynamicImage;
use tracing::instrument;

use crate::{
    CardLocator, CardNumber, CardReading, CardSegmenter, MergeOptions, NumberExtractor, Result,
    TextRecognizer,
};

/// Full pipeline: segment cards, rectify each one, read its number.
pub struct CardReader<S, R> {
    segmenter: S,
    recognizer: R,
    locator: CardLocator,
    extractor: NumberExtractor,
}

impl<S: CardSegmenter, R: TextRecognizer> CardReader<S, R> {
    pub fn new(segmenter: S, recognizer: R) -> Self {
        Self {
            segmenter,
            recognizer,
            locator: CardLocator::new(),
            extractor: NumberExtractor::default(),
        }
    }

    pub fn with_merge_options(mut self, options: MergeOptions) -> Self {
        self.extractor = NumberExtractor::new(options);
        self
    }

    pub fn segmenter(&self) -> &S {
        &self.segmenter
    }

    pub fn recognizer(&self) -> &R {
        &self.recognizer
    }

    /// Rectified card images in detection order, tagged with their outline index.
    #[instrument(skip_all)]
    pub fn locate_cards(&self, image: &DynamicImage) -> Result<Vec<(usize, DynamicImage)>> {
        let outlines = self.segmenter.segment(image)?;
        log::debug!("Segmenter proposed {} card outlines", outlines.len());
        Ok(self.locator.locate_all(image, &outlines))
    }

    /// One reading per card that could be rectified, in detection order.
    #[instrument(skip_all)]
    pub fn read_cards(&self, image: &DynamicImage) -> Result<Vec<CardReading>> {
        let cards = self.locate_cards(image)?;
        self.read_located(&cards)
    }

    /// Reads cards already returned by [`Self::locate_cards`].
    pub fn read_located(&self, cards: &[(usize, DynamicImage)]) -> Result<Vec<CardReading>> {
        cards
            .iter()
            .map(|&(index, ref card)| {
                let number = self.extractor.extract(&self.recognizer, card)?;
                match &number {
                    Some(number) => log::info!("Card {index}: {number}"),
                    None => log::info!("Card {index}: no number found"),
                }
                Ok(CardReading { index, number })
            })
            .collect()
    }

    /// Every card number that could be recovered, in detection order.
    pub fn extract_card_numbers(&self, image: &DynamicImage) -> Result<Vec<CardNumber>> {
        Ok(self
            .read_cards(image)?
            .into_iter()
            .filter_map(|reading| reading.number)
            .collect())
    }
}
