//! inferd - demo inference daemon
//!
//! This daemon:
//! 1. Loads the engine configuration (file + environment overrides)
//! 2. Builds a classifier pipeline over the stub predictor
//! 3. Feeds a synthetic dual-path frame source through the synchronizer
//! 4. Logs every merge until interrupted

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use infermux::{
    ClassifierAdapter, EngineConfig, FrameRecord, FrameSynchronizer, LabelTable, PixelFormat,
    Resolution, StubPredictor, VideoFrame,
};

#[derive(Parser, Debug)]
#[command(name = "inferd", about = "dual-path inference demo daemon")]
struct Args {
    /// Source frame width.
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Source frame height.
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Frames per second to synthesize.
    #[arg(long, default_value_t = 10)]
    fps: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = EngineConfig::load()?;

    let labels = cfg
        .labels
        .as_deref()
        .map(|s| LabelTable::from_delimited(s, ';'));
    let model_resolution = Resolution::new(cfg.model_width, cfg.model_height);
    let adapter = ClassifierAdapter::new(model_resolution, labels);

    // Canned probabilities stand in for a real model; swap in the tract
    // backend (feature `backend-tract`) for actual ONNX inference.
    let predictor = StubPredictor::new(vec![0.05, 0.15, 0.80]);

    let sync = FrameSynchronizer::new(
        Box::new(adapter),
        Box::new(predictor),
        cfg.model_location.display().to_string(),
    );
    sync.subscribe(Box::new(|event| {
        if let Some(tree) = event.bypass_tree() {
            log::info!("merged tree: {}", tree.to_json());
        }
    }));

    sync.prepare()?;
    sync.start()?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })?;

    log::info!(
        "inferd running: source {}x{} at {} fps, model input {}",
        args.width,
        args.height,
        args.fps,
        model_resolution
    );

    let frame_interval = Duration::from_millis(1000 / args.fps.max(1) as u64);
    let mut frame_count = 0u64;
    while running.load(Ordering::SeqCst) {
        let frame = VideoFrame::blank(args.width, args.height, PixelFormat::Rgb);

        for forwarded in sync.push_model(FrameRecord::new(frame.clone()))? {
            log::debug!(
                "model port forwarded frame (tree: {})",
                forwarded.record().tree.is_some()
            );
        }
        for forwarded in sync.push_bypass(FrameRecord::new(frame))? {
            log::debug!(
                "bypass port forwarded frame (tree: {})",
                forwarded.record().tree.is_some()
            );
        }

        frame_count += 1;
        if frame_count % (args.fps.max(1) as u64 * 5) == 0 {
            log::info!("processed {} frames", frame_count);
        }
        std::thread::sleep(frame_interval);
    }

    log::info!("shutting down after {} frames", frame_count);
    sync.stop()?;
    sync.unprepare()?;
    Ok(())
}
