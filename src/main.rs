use std::path::PathBuf;

use anyhow::Context;
use cardnum::{
    ocr::{RapidOcrBuilder, SessionOptions},
    segment::{SegmentOptions, YoloSegmenter},
    CardReader, MergeOptions,
};
use clap::Parser;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// Read card numbers from photos of payment cards.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Images to scan
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// YOLOv8 segmentation model locating the cards
    #[arg(long)]
    seg_model: PathBuf,

    /// Text detection model
    #[arg(long)]
    det_model: PathBuf,

    /// Text recognition model
    #[arg(long)]
    rec_model: PathBuf,

    /// Character dictionary of the recognition model
    #[arg(long)]
    keys: PathBuf,

    /// Optional text angle classifier
    #[arg(long)]
    cls_model: Option<PathBuf>,

    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Longest side of the text detector input
    #[arg(long, default_value_t = 960)]
    max_side_len: u32,

    /// Horizontal gap (px) under which fragments are joined
    #[arg(long, default_value_t = 30.0)]
    x_threshold: f32,

    /// Vertical midpoint distance (px) under which fragments are joined
    #[arg(long, default_value_t = 20.0)]
    y_threshold: f32,

    /// Write the rectified card images into this directory
    #[arg(long)]
    save_crops: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let session = SessionOptions {
        threads: args.threads,
        ..Default::default()
    };
    let segmenter = YoloSegmenter::init(&args.seg_model, &session, SegmentOptions::default())
        .with_context(|| format!("loading {}", args.seg_model.display()))?;
    let mut ocr = RapidOcrBuilder::new()
        .threads(args.threads)
        .det_model(&args.det_model)
        .rec_model(&args.rec_model, &args.keys)
        .max_side_len(args.max_side_len);
    if let Some(cls_model) = &args.cls_model {
        ocr = ocr.cls_model(cls_model);
    }
    let ocr = ocr.build().context("loading text recognition models")?;

    let reader = CardReader::new(segmenter, ocr).with_merge_options(MergeOptions {
        x_threshold: args.x_threshold,
        y_threshold: args.y_threshold,
    });

    if let Some(dir) = &args.save_crops {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    for path in &args.images {
        let image = image::open(path).with_context(|| format!("opening {}", path.display()))?;

        let cards = reader
            .locate_cards(&image)
            .with_context(|| format!("segmenting {}", path.display()))?;

        if let Some(dir) = &args.save_crops {
            let stem = path
                .file_stem()
                .map_or_else(|| "image".into(), |stem| stem.to_string_lossy());
            for (index, card) in &cards {
                let target = dir.join(format!("{stem}_card{index}.png"));
                card.save(&target)
                    .with_context(|| format!("writing {}", target.display()))?;
            }
        }

        let readings = reader
            .read_located(&cards)
            .with_context(|| format!("reading {}", path.display()))?;
        let numbers = readings
            .iter()
            .filter_map(|reading| reading.number.as_ref())
            .map(|number| number.as_str())
            .collect::<Vec<_>>();
        println!("{}: {}", path.display(), numbers.join(" "));
    }

    Ok(())
}
