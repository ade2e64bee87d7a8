mod common;

use cardnum::{Error, NumberExtractor};
use common::{fragment, init_logging, is_upright, marked_card, FailingRecognizer, StubRecognizer};

#[test]
fn direct_hit_skips_the_flipped_attempt() {
    init_logging();
    let recognizer =
        StubRecognizer::new(|_| Some(vec![fragment("1234567890123456", 20.0, 80.0, 300.0)]));

    let number = NumberExtractor::default()
        .extract(&recognizer, &marked_card(400, 250))
        .expect("recognizer works");

    assert_eq!(number.unwrap().as_str(), "1234567890123456");
    assert_eq!(recognizer.calls(), 1);
}

#[test]
fn split_number_is_merged() {
    init_logging();
    let recognizer = StubRecognizer::new(|_| {
        Some(vec![
            fragment("1234", 20.0, 120.0, 60.0),
            fragment("5678", 90.0, 121.0, 60.0),
            fragment("9012", 160.0, 119.0, 60.0),
            fragment("3456", 230.0, 120.0, 60.0),
            fragment("12/28", 160.0, 170.0, 50.0),
        ])
    });

    let number = NumberExtractor::default()
        .extract(&recognizer, &marked_card(400, 250))
        .unwrap();

    assert_eq!(number.unwrap().as_str(), "1234567890123456");
}

#[test]
fn overlapping_windows_are_merged() {
    init_logging();
    let recognizer = StubRecognizer::new(|_| {
        Some(vec![
            fragment("12345678", 20.0, 120.0, 120.0),
            fragment("56789012", 130.0, 120.0, 120.0),
            fragment("90123456", 240.0, 120.0, 120.0),
        ])
    });

    let number = NumberExtractor::default()
        .extract(&recognizer, &marked_card(400, 250))
        .unwrap();

    assert_eq!(number.unwrap().as_str(), "1234567890123456");
}

#[test]
fn text_without_numbers_yields_nothing() {
    init_logging();
    let recognizer = StubRecognizer::new(|_| {
        Some(vec![
            fragment("BANK", 20.0, 20.0, 80.0),
            fragment("JOHN DOE", 20.0, 200.0, 120.0),
        ])
    });

    let number = NumberExtractor::default()
        .extract(&recognizer, &marked_card(400, 250))
        .expect("a miss is not an error");

    assert!(number.is_none());
    assert_eq!(recognizer.calls(), 2);
}

#[test]
fn no_text_still_tries_flipped() {
    init_logging();
    let recognizer = StubRecognizer::new(|image| {
        if is_upright(image) {
            None
        } else {
            Some(vec![fragment("4000 1234 5678 9010", 20.0, 120.0, 300.0)])
        }
    });

    let number = NumberExtractor::default()
        .extract(&recognizer, &marked_card(400, 250))
        .unwrap();

    assert_eq!(number.unwrap().as_str(), "4000123456789010");
    assert_eq!(recognizer.calls(), 2);
}

#[test]
fn upside_down_card_is_read_from_flipped_image() {
    init_logging();
    let recognizer = StubRecognizer::new(|image| {
        if is_upright(image) {
            Some(vec![
                fragment("9559", 20.0, 100.0, 60.0),
                fragment("7382", 200.0, 100.0, 60.0),
            ])
        } else {
            Some(vec![fragment("5555444433332222", 80.0, 130.0, 300.0)])
        }
    });

    let number = NumberExtractor::default()
        .extract(&recognizer, &marked_card(400, 250))
        .unwrap();

    assert_eq!(number.unwrap().as_str(), "5555444433332222");
    assert_eq!(recognizer.calls(), 2);
}

#[test]
fn recognizer_failure_is_reported() {
    init_logging();
    let result = NumberExtractor::default().extract(&FailingRecognizer, &marked_card(400, 250));

    assert!(matches!(result, Err(Error::ModelOutput(_))));
}
