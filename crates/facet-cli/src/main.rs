mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facet_core::{
    CosineMatcher, DenseIndex, Descriptor, DescriptorBatch, DynamicIndex, ErrorKind, Index,
    IndexBuilder, IndexConfig, Matcher, MutableIndex, Settings,
};
use facet_track::{Callback, DetectionRecord, Frame, ReplayDetector, Stream, TrackerConfig};
use image::GrayImage;
use serde_json::json;
use std::path::{Path, PathBuf};

use config::Config;

#[derive(Parser)]
#[command(name = "facet", about = "Face descriptor index and tracking tool")]
struct Cli {
    /// Settings file (overrides FACET_SETTINGS)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an index from a JSON array of descriptors
    Build {
        /// Descriptors: [{"version": 59, "values": [...]}, ...]
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Write the immutable dense form instead of the dynamic one
        #[arg(long)]
        dense: bool,
        /// Positions to leave out of the index
        #[arg(long, value_delimiter = ',')]
        remove: Vec<usize>,
    },
    /// Search an index with a JSON descriptor
    Search {
        #[arg(short, long)]
        index: PathBuf,
        #[arg(short, long)]
        query: PathBuf,
        /// Maximum number of results (default: FACET_RESULTS)
        #[arg(short)]
        k: Option<usize>,
    },
    /// Show index version, dimension and counts
    Info {
        #[arg(short, long)]
        index: PathBuf,
    },
    /// Print the descriptor stored at a position
    Get {
        #[arg(short, long)]
        index: PathBuf,
        position: usize,
    },
    /// Compare a probe descriptor against a list of candidates
    Match {
        #[arg(short, long)]
        probe: PathBuf,
        /// JSON array of candidate descriptors
        #[arg(short, long)]
        candidates: PathBuf,
        /// Similarity needed for a best match (default: FACET_MATCH_THRESHOLD)
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// Write a dynamic index in dense form
    Convert {
        #[arg(short, long)]
        index: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Append descriptors to a dynamic index in place
    Append {
        #[arg(short, long)]
        index: PathBuf,
        #[arg(long)]
        input: PathBuf,
    },
    /// Remove positions from a dynamic index in place
    Remove {
        #[arg(short, long)]
        index: PathBuf,
        #[arg(required = true)]
        positions: Vec<usize>,
    },
    /// Replay a detection log through a tracking stream
    Track {
        /// JSON array of {"frame": n, "detections": [...]}
        #[arg(short, long)]
        detections: PathBuf,
        /// Number of frames to push (default: last recorded frame + 1)
        #[arg(long)]
        frames: Option<u64>,
        #[arg(long, default_value_t = 640)]
        width: u32,
        #[arg(long, default_value_t = 480)]
        height: u32,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    let settings = load_settings(cli.settings.as_deref().or(config.settings_path.as_deref()))?;

    match cli.command {
        Commands::Build {
            input,
            output,
            dense,
            remove,
        } => {
            let descriptors = read_descriptors(&input)?;
            let mut builder = IndexBuilder::new(IndexConfig::from_settings(&settings)?);
            for d in &descriptors {
                builder.append_descriptor(d)?;
            }
            for position in remove {
                builder.remove_descriptor(position)?;
            }
            let index = builder.build_index()?;
            let output = config.resolve_index(&output);
            if dense {
                index.save_to_dense_index(&output)?;
            } else {
                index.save_to_dynamic_index(&output)?;
            }
            println!("{}", summary(&index, &output));
        }
        Commands::Search { index, query, k } => {
            let index = open_index(&config.resolve_index(&index))?;
            let query = read_descriptor(&query)?;
            let hits = index.search(&query, k.unwrap_or(config.default_results))?;
            println!("{}", serde_json::to_string_pretty(&hits)?);
        }
        Commands::Info { index } => {
            let path = config.resolve_index(&index);
            let index = open_index(&path)?;
            println!("{}", summary(index.as_ref(), &path));
        }
        Commands::Get { index, position } => {
            let index = open_index(&config.resolve_index(&index))?;
            let descriptor = index.descriptor_by_index(position)?;
            println!("{}", serde_json::to_string(&descriptor)?);
        }
        Commands::Match {
            probe,
            candidates,
            threshold,
        } => {
            let probe = read_descriptor(&probe)?;
            let batch = to_batch(&read_descriptors(&candidates)?, probe.version())?;
            let matcher = CosineMatcher;
            let results = matcher.match_batch(&probe, &batch)?;
            let best = matcher.best_match(
                &probe,
                &batch,
                threshold.unwrap_or(config.match_threshold),
            )?;
            let report = json!({
                "results": results,
                "best": {
                    "matched": best.matched,
                    "similarity": best.similarity,
                    "index": best.index,
                },
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Convert { index, output } => {
            let index = DynamicIndex::load(&config.resolve_index(&index))?;
            let output = config.resolve_index(&output);
            index.save_to_dense_index(&output)?;
            println!("{}", summary(&index, &output));
        }
        Commands::Append { index, input } => {
            let path = config.resolve_index(&index);
            let mut index = DynamicIndex::load(&path)?;
            let descriptors = read_descriptors(&input)?;
            let Some(first) = descriptors.first() else {
                bail!("{} holds no descriptors", input.display());
            };
            let start = index.append_batch(&to_batch(&descriptors, first.version())?)?;
            index.save_to_dynamic_index(&path)?;
            println!(
                "appended {} descriptors at positions {start}..{}",
                descriptors.len(),
                start + descriptors.len()
            );
        }
        Commands::Remove { index, positions } => {
            let path = config.resolve_index(&index);
            let mut index = DynamicIndex::load(&path)?;
            for position in &positions {
                index.remove_descriptor(*position)?;
            }
            index.save_to_dynamic_index(&path)?;
            println!("{}", summary(&index, &path));
        }
        Commands::Track {
            detections,
            frames,
            width,
            height,
        } => {
            let records: Vec<DetectionRecord> = read_json(&detections)?;
            let frames = frames
                .or_else(|| records.iter().map(|r| r.frame + 1).max())
                .unwrap_or(0);
            let tracker_config = TrackerConfig::from_settings(&settings)?;
            replay(tracker_config, ReplayDetector::from_records(records), frames, width, height)?;
        }
    }

    Ok(())
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => Settings::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display())),
        None => Ok(Settings::new()),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

fn read_descriptor(path: &Path) -> Result<Descriptor> {
    read_json(path)
}

fn read_descriptors(path: &Path) -> Result<Vec<Descriptor>> {
    read_json(path)
}

fn to_batch(descriptors: &[Descriptor], version: u32) -> Result<DescriptorBatch> {
    let mut batch = DescriptorBatch::new(descriptors.len(), version);
    for (i, d) in descriptors.iter().enumerate() {
        batch
            .push(d)
            .with_context(|| format!("descriptor {i} does not fit the batch"))?;
    }
    Ok(batch)
}

/// Open an index file of either kind.
fn open_index(path: &Path) -> Result<Box<dyn Index>> {
    match DenseIndex::load(path) {
        Ok(index) => Ok(Box::new(index)),
        Err(err) if err.kind() == ErrorKind::InvalidSerializedObject => {
            let index = DynamicIndex::load(path)
                .with_context(|| format!("{} is neither a dense nor a dynamic index", path.display()))?;
            Ok(Box::new(index))
        }
        Err(err) => Err(err).with_context(|| format!("failed to open {}", path.display())),
    }
}

fn summary(index: &dyn Index, path: &Path) -> serde_json::Value {
    json!({
        "path": path.display().to_string(),
        "version": index.version(),
        "dimension": index.dimension(),
        "size": index.size(),
        "count": index.count_of_indexed_descriptors(),
    })
}

fn replay(
    config: TrackerConfig,
    detector: ReplayDetector,
    frames: u64,
    width: u32,
    height: u32,
) -> Result<()> {
    tracing::info!(frames, records = detector.len(), "replaying detection log");
    let stream = Stream::spawn(config, detector)?;
    let mut refused = 0u64;
    for id in 0..frames {
        let frame = Frame::new(id, GrayImage::new(width, height));
        while !stream.push_frame(frame.clone()) {
            refused += 1;
            print_callbacks(stream.get_callbacks());
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        print_callbacks(stream.get_callbacks());
    }
    stream.wait_stream();
    print_callbacks(stream.get_callbacks());
    print_callbacks(stream.finish());
    tracing::debug!(refused, "replay finished");
    Ok(())
}

fn print_callbacks(callbacks: Vec<Callback>) {
    for callback in callbacks {
        println!("{}", callback_json(&callback));
    }
}

fn callback_json(callback: &Callback) -> serde_json::Value {
    match callback {
        Callback::Visual { frame_id, tracks } => json!({
            "type": "visual",
            "frame": frame_id,
            "tracks": tracks
                .iter()
                .map(|t| json!({ "track": t.track_id, "rect": t.rect, "detected": t.detected }))
                .collect::<Vec<_>>(),
        }),
        Callback::TrackStart {
            frame_id,
            track_id,
            detection,
        } => json!({
            "type": "track_start",
            "frame": frame_id,
            "track": track_id,
            "detection": detection,
        }),
        Callback::BestShot(shot) => json!({
            "type": "best_shot",
            "frame": shot.frame_id,
            "track": shot.track_id,
            "detection": shot.detection,
            "crop": shot.crop.as_ref().map(|c| [c.width(), c.height()]),
        }),
        Callback::TrackEnd {
            frame_id,
            track_id,
            length,
            reached_minimal_length,
        } => json!({
            "type": "track_end",
            "frame": frame_id,
            "track": track_id,
            "length": length,
            "reached_minimal_length": reached_minimal_length,
        }),
    }
}
