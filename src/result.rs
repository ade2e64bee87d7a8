use std::fmt;

use geo::Coord;

/// Outline of one detected card, as proposed by a [`CardSegmenter`](crate::CardSegmenter).
#[derive(Debug, Clone, PartialEq)]
pub struct CardOutline {
    pub points: Vec<Coord<f32>>,
    pub score: f32,
}

impl CardOutline {
    pub fn new(points: impl IntoIterator<Item = (f32, f32)>) -> Self {
        Self {
            points: points.into_iter().map(|(x, y)| Coord { x, y }).collect(),
            score: 1.0,
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }
}

/// Minimal-area rectangle enclosing an outline.
///
/// `corners` run clockwise on screen, starting from the corner closest to the
/// image origin. `width` is measured along `corners[0] -> corners[1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotatedRect {
    pub width: u32,
    pub height: u32,
    pub corners: [Coord<f32>; 4],
}

/// One text recognition result: a quadrilateral, its text and a confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct TextFragment {
    pub quad: [Coord<f32>; 4],
    pub text: String,
    pub confidence: f32,
}

impl TextFragment {
    pub fn new(quad: [(f32, f32); 4], text: impl Into<String>, confidence: f32) -> Self {
        Self {
            quad: quad.map(|(x, y)| Coord { x, y }),
            text: text.into(),
            confidence,
        }
    }

    pub fn min_x(&self) -> f32 {
        self.quad.iter().map(|p| p.x).fold(f32::INFINITY, f32::min)
    }

    pub fn max_x(&self) -> f32 {
        self.quad.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max)
    }

    pub fn mid_y(&self) -> f32 {
        self.quad.iter().map(|p| p.y).sum::<f32>() / 4.0
    }
}

/// A card number: exactly 16 ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CardNumber(String);

impl CardNumber {
    pub const LEN: usize = 16;

    /// Accepts `text` only if it is exactly [`CardNumber::LEN`] ASCII digits.
    pub fn parse(text: &str) -> Option<Self> {
        (text.len() == Self::LEN && text.bytes().all(|b| b.is_ascii_digit()))
            .then(|| Self(text.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CardNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CardNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Outcome for one rectified card. `index` is the position of the card's
/// outline in the segmenter output.
#[derive(Debug, Clone, PartialEq)]
pub struct CardReading {
    pub index: usize,
    pub number: Option<CardNumber>,
}

#[derive(Debug, Clone)]
pub(crate) struct TextBox {
    pub score: f32,
    pub quad: [Coord<f32>; 4],
}

#[derive(Debug, Clone)]
pub(crate) struct TextLine {
    pub text: String,
    pub character_scores: Vec<f32>,
}

impl TextLine {
    pub fn confidence(&self) -> f32 {
        if self.character_scores.is_empty() {
            return 0.0;
        }
        self.character_scores.iter().sum::<f32>() / self.character_scores.len() as f32
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Angle {
    pub index: usize,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_number_requires_sixteen_ascii_digits() {
        assert!(CardNumber::parse("1234567890123456").is_some());
        assert!(CardNumber::parse("123456789012345").is_none());
        assert!(CardNumber::parse("12345678901234567").is_none());
        assert!(CardNumber::parse("1234 5678 9012 34").is_none());
        assert!(CardNumber::parse("١٢٣٤٥٦٧٨٩٠١٢٣٤٥٦").is_none());
    }

    #[test]
    fn fragment_extents() {
        let fragment = TextFragment::new(
            [(10.0, 4.0), (50.0, 6.0), (52.0, 26.0), (8.0, 24.0)],
            "1234",
            0.9,
        );
        assert_eq!(fragment.min_x(), 8.0);
        assert_eq!(fragment.max_x(), 52.0);
        assert_eq!(fragment.mid_y(), 15.0);
    }
}
