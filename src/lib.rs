//! Reads 16-digit card numbers from photos containing one or more payment cards.
//!
//! A [`CardSegmenter`] proposes card outlines, [`CardLocator`] rectifies each
//! one into a landscape card image, a [`TextRecognizer`] reads the text on it
//! and [`NumberExtractor`] rebuilds the number from the recognized fragments.
//! [`CardReader`] ties the steps together.

mod backend;
mod error;
mod extract;
pub mod geometry;
mod locate;
pub mod ocr;
mod reader;
mod result;
pub mod segment;

pub use backend::{CardSegmenter, TextRecognizer};
pub use error::{Error, LocateError, Result};
pub use extract::{overlap_len, overlap_merge, MergeOptions, NumberExtractor};
pub use locate::CardLocator;
pub use reader::CardReader;
pub use result::*;

pub use ort as runtime;
