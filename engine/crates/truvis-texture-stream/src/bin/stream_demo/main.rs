//! 模拟一个渲染循环: 注册若干纹理，按帧驱动流式加载，中途取消和降级

use std::sync::Arc;
use std::time::{Duration, Instant};
use truvis_asset_update::manager::{FinishedUpdate, UpdateOutcome};
use truvis_asset_update::scheduler::{SchedulerConfig, TaskScheduler};
use truvis_texture_stream::mip_loader::MipLoaderConfig;
use truvis_texture_stream::mip_source::SyntheticMipSource;
use truvis_texture_stream::streamed_texture::TextureHandle;
use truvis_texture_stream::texture_streamer::{StreamStatus, TextureStreamer};

const FRAME: Duration = Duration::from_millis(16);

fn main() -> anyhow::Result<()> {
    truvis_crate_tools::init_log::init_log();

    let source = SyntheticMipSource::new(64)
        .with_latency(Duration::from_millis(30))
        .with_failing_level("brick", 3);
    let scheduler = TaskScheduler::new(SchedulerConfig::default().with_worker_threads(2))?;
    let mut streamer = TextureStreamer::new(scheduler, Arc::new(source), MipLoaderConfig::default())?;

    let textures = [
        streamer.register_texture("rock", 6, true),
        streamer.register_texture("grass", 5, false),
        streamer.register_texture("brick", 5, true),
        streamer.register_texture("sky", 4, true),
    ];
    let [rock, grass, brick, sky] = textures;

    for texture in textures {
        streamer.request_levels(texture, 2)?;
    }
    run_frames(&mut streamer, 30);
    let finished = streamer.block_till_idle(Duration::from_secs(5))?;
    report(&streamer, &finished);

    for texture in textures {
        streamer.request_levels(texture, 5)?;
    }
    // 等几帧再取消，让 sky 的读取已经开始
    run_frames(&mut streamer, 2);
    streamer.cancel(sky);
    run_frames(&mut streamer, 60);
    let finished = streamer.block_till_idle(Duration::from_secs(5))?;
    report(&streamer, &finished);

    streamer.request_levels(rock, 1)?;
    streamer.request_levels(grass, 3)?;
    run_frames(&mut streamer, 10);

    let finished = streamer.block_till_idle(Duration::from_secs(5))?;
    report(&streamer, &finished);

    log::info!("final state:");
    for (name, texture) in [("rock", rock), ("grass", grass), ("brick", brick), ("sky", sky)] {
        let summary = streamer.with_texture(texture, |t| {
            format!(
                "{} levels resident of {}, {} bytes, generation {}",
                t.resident_levels(),
                t.total_levels(),
                t.resident_bytes(),
                t.generation()
            )
        });
        log::info!("  {:<6} {}", name, summary.unwrap_or_else(|| "missing".to_string()));
    }
    Ok(())
}

fn run_frames(streamer: &mut TextureStreamer, frames: usize) {
    for _ in 0..frames {
        let frame_start = Instant::now();
        let finished = streamer.update();
        report(streamer, &finished);

        if streamer.pending_count() == 0 {
            break;
        }
        if let Some(rest) = FRAME.checked_sub(frame_start.elapsed()) {
            std::thread::sleep(rest);
        }
    }
}

fn report(streamer: &TextureStreamer, finished: &[(TextureHandle, FinishedUpdate)]) {
    for (texture, update) in finished {
        let name = streamer
            .with_texture(*texture, |t| t.name().to_string())
            .unwrap_or_else(|| format!("{:?}", texture));
        match (update.outcome, streamer.status(*texture)) {
            (UpdateOutcome::Succeeded, StreamStatus::Idle { resident_levels }) => {
                log::info!("{} reached {} levels", name, resident_levels)
            }
            (UpdateOutcome::Cancelled, status) => {
                log::warn!("{} update to {} levels cancelled ({:?})", name, update.requested_level, status)
            }
            (outcome, status) => log::info!("{} finished {:?} ({:?})", name, outcome, status),
        }
    }
}
