use float_ord::FloatOrd;
use image::DynamicImage;
use tracing::instrument;

use crate::{CardNumber, Result, TextFragment, TextRecognizer};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeOptions {
    /// Largest gap, in px, between the right edge of one fragment and the
    /// left edge of the next for them to belong to the same number.
    pub x_threshold: f32,
    /// Largest difference, in px, between the vertical midpoints of two
    /// neighbouring fragments.
    pub y_threshold: f32,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            x_threshold: 30.0,
            y_threshold: 20.0,
        }
    }
}

/// Rebuilds a card number from possibly fragmented recognition output.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumberExtractor {
    options: MergeOptions,
}

impl NumberExtractor {
    pub fn new(options: MergeOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &MergeOptions {
        &self.options
    }

    /// Recognizes `card` upright and, if that yields nothing, once more rotated
    /// by 180°. Errors only come from the recognizer itself.
    #[instrument(level = "debug", skip_all)]
    pub fn extract<R>(&self, recognizer: &R, card: &DynamicImage) -> Result<Option<CardNumber>>
    where
        R: TextRecognizer + ?Sized,
    {
        let upright = recognizer.recognize(card)?.unwrap_or_default();
        if let Some(number) = self.find_number(&upright) {
            return Ok(Some(number));
        }

        log::debug!(
            "No card number in {} upright fragments, retrying upside down",
            upright.len()
        );
        let flipped = recognizer.recognize(&card.rotate180())?.unwrap_or_default();
        let number = self.find_number(&flipped);
        if number.is_none() {
            log::debug!("No card number in {} flipped fragments", flipped.len());
        }
        Ok(number)
    }

    /// Single pass over one recognition result: a fragment that already is a
    /// full number wins, otherwise the first merged group that validates.
    pub fn find_number(&self, fragments: &[TextFragment]) -> Option<CardNumber> {
        direct_hit(fragments).or_else(|| self.merge_candidates(fragments).into_iter().next())
    }

    /// All merged groups that form a valid number, in left-to-right order.
    #[instrument(level = "trace", skip_all, fields(fragments = fragments.len()))]
    pub fn merge_candidates(&self, fragments: &[TextFragment]) -> Vec<CardNumber> {
        let mut digits = fragments
            .iter()
            .filter_map(|fragment| {
                let text = strip_whitespace(&fragment.text);
                (is_numeric(&text) && text.len() <= CardNumber::LEN).then_some((text, fragment))
            })
            .collect::<Vec<_>>();
        // FIXME: rows are not separated, so fragments from two lines whose
        // midpoints happen to be close can end up in one group.
        digits.sort_by_key(|(_, fragment)| FloatOrd(fragment.min_x()));

        let mut groups: Vec<Vec<(String, &TextFragment)>> = Vec::new();
        for (text, fragment) in digits {
            let continues = groups
                .last()
                .and_then(|group| group.last())
                .is_some_and(|(_, prev)| self.are_close(prev, fragment));
            match groups.last_mut() {
                Some(group) if continues => group.push((text, fragment)),
                _ => groups.push(vec![(text, fragment)]),
            }
        }

        groups
            .iter()
            .filter_map(|group| {
                let merged = overlap_merge(group.iter().map(|(text, _)| text.as_str()));
                log::trace!("Merged group of {} fragments into {merged:?}", group.len());
                CardNumber::parse(&merged)
            })
            .collect()
    }

    /// Whether `next` continues the printed line of `prev`.
    pub fn are_close(&self, prev: &TextFragment, next: &TextFragment) -> bool {
        let gap = (next.min_x() - prev.max_x()).abs();
        let rise = (prev.mid_y() - next.mid_y()).abs();
        gap < self.options.x_threshold && rise < self.options.y_threshold
    }
}

fn direct_hit(fragments: &[TextFragment]) -> Option<CardNumber> {
    fragments
        .iter()
        .find_map(|fragment| CardNumber::parse(&strip_whitespace(&fragment.text)))
}

fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

fn is_numeric(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit())
}

/// Length of the longest suffix of `acc` that is also a prefix of `next`.
pub fn overlap_len(acc: &str, next: &str) -> usize {
    (1..=acc.len().min(next.len()))
        .filter(|&len| next.is_char_boundary(len) && acc.ends_with(&next[..len]))
        .last()
        .unwrap_or(0)
}

/// Concatenates `parts`, dropping from each part the prefix that repeats the
/// end of what has been merged so far.
pub fn overlap_merge<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts.into_iter().fold(String::new(), |mut acc, part| {
        let skip = overlap_len(&acc, part);
        acc.push_str(&part[skip..]);
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(text: &str, x: f32, y: f32, width: f32) -> TextFragment {
        TextFragment::new(
            [(x, y), (x + width, y), (x + width, y + 20.0), (x, y + 20.0)],
            text,
            0.9,
        )
    }

    #[test]
    fn merge_drops_overlap() {
        assert_eq!(overlap_merge(["1234", "3456"]), "123456");
        assert_eq!(overlap_merge(["1234", "789"]), "1234789");
        assert_eq!(overlap_merge(["1111", "1111"]), "1111");
        assert_eq!(overlap_merge(["12", "2", "234"]), "1234");
    }

    #[test]
    fn overlap_prefers_longest_match() {
        assert_eq!(overlap_len("1212", "1212"), 4);
        assert_eq!(overlap_len("0121", "1213"), 3);
        assert_eq!(overlap_len("0121", "2121"), 2);
        assert_eq!(overlap_len("", "12"), 0);
    }

    #[test]
    fn closeness_respects_both_thresholds() {
        let extractor = NumberExtractor::default();
        let left = fragment("1234", 0.0, 100.0, 60.0);
        assert!(extractor.are_close(&left, &fragment("5678", 70.0, 105.0, 60.0)));
        assert!(!extractor.are_close(&left, &fragment("5678", 110.0, 100.0, 60.0)));
        assert!(!extractor.are_close(&left, &fragment("5678", 70.0, 125.0, 60.0)));
    }

    #[test]
    fn whole_number_is_taken_directly() {
        let extractor = NumberExtractor::default();
        let fragments = [
            fragment("VALID THRU", 0.0, 0.0, 80.0),
            fragment("1234 5678 9012 3456", 0.0, 100.0, 400.0),
        ];
        assert_eq!(
            extractor.find_number(&fragments).unwrap().as_str(),
            "1234567890123456"
        );
    }

    #[test]
    fn spaced_fragments_are_merged() {
        let extractor = NumberExtractor::default();
        let fragments = [
            fragment("1234 5678", 0.0, 100.0, 100.0),
            fragment("9012 3456", 110.0, 101.0, 100.0),
        ];
        assert_eq!(
            extractor.merge_candidates(&fragments),
            [CardNumber::parse("1234567890123456").unwrap()]
        );
    }

    #[test]
    fn length_limit_applies_to_stripped_text() {
        let extractor = NumberExtractor::default();
        // 17 characters with spaces, 12 digits without.
        let fragments = [
            fragment("12 34 56 78 90 12", 0.0, 100.0, 200.0),
            fragment("3456", 215.0, 100.0, 60.0),
        ];
        assert_eq!(
            extractor.find_number(&fragments).unwrap().as_str(),
            "1234567890123456"
        );
    }

    #[test]
    fn fragments_are_ordered_before_grouping() {
        let extractor = NumberExtractor::default();
        let fragments = [
            fragment("9012", 140.0, 100.0, 60.0),
            fragment("1234", 0.0, 100.0, 60.0),
            fragment("3456", 210.0, 100.0, 60.0),
            fragment("5678", 70.0, 100.0, 60.0),
        ];
        assert_eq!(
            extractor.find_number(&fragments).unwrap().as_str(),
            "1234567890123456"
        );
    }

    #[test]
    fn separate_groups_are_validated_independently() {
        let extractor = NumberExtractor::default();
        let fragments = [
            fragment("12", 0.0, 0.0, 20.0),
            fragment("34", 25.0, 0.0, 20.0),
            fragment("12345678", 300.0, 100.0, 100.0),
            fragment("78901234", 410.0, 100.0, 100.0),
            fragment("3456", 520.0, 100.0, 40.0),
        ];
        let candidates = extractor.merge_candidates(&fragments);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].as_str(), "1234567890123456");
    }

    #[test]
    fn long_and_non_numeric_fragments_are_ignored() {
        let extractor = NumberExtractor::default();
        let fragments = [
            fragment("12345678901234567", 0.0, 0.0, 300.0),
            fragment("12/28", 310.0, 0.0, 50.0),
            fragment("", 370.0, 0.0, 10.0),
        ];
        assert!(extractor.merge_candidates(&fragments).is_empty());
        assert!(extractor.find_number(&fragments).is_none());
    }

    #[test]
    fn thresholds_are_configurable() {
        let extractor = NumberExtractor::new(MergeOptions {
            x_threshold: 60.0,
            y_threshold: 20.0,
        });
        let fragments = [
            fragment("12345678", 0.0, 0.0, 100.0),
            fragment("90123456", 150.0, 0.0, 100.0),
        ];
        assert!(extractor.find_number(&fragments).is_some());
        assert!(NumberExtractor::default().find_number(&fragments).is_none());
    }
}
