//! Writes a synthetic looping animation in the frame format, for demos and
//! benchmarking the player without captured data.

use anyhow::{Context, Result};
use clap::Parser;
use plyframe::PointRecord;
use rayon::prelude::*;
use std::f32::consts::TAU;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "synth_frames", version)]
struct Args {
    /// Output directory (created if missing).
    #[arg(long, default_value = "frames")]
    out_dir: PathBuf,

    /// Points per frame.
    #[arg(long, default_value_t = 50_000)]
    points: usize,

    /// Number of frames; the animation loops seamlessly over this many.
    #[arg(long, default_value_t = 90)]
    frames: usize,

    /// Frame rate the velocities are expressed against.
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Emit logs as JSON lines.
    #[arg(long, default_value_t = false)]
    log_json: bool,
}

/// Position of point `i` of `n` at animation phase `phase` (radians): a
/// swaying, breathing spiral figure about 1.8 m tall.
fn figure_point(i: usize, n: usize, phase: f32) -> [f32; 3] {
    let t = i as f32 / n.max(1) as f32;
    let y = 1.8 * t;
    let angle = t * TAU * 60.0 + phase;
    let radius = 0.18 + 0.06 * (y * 5.0 + 2.0 * phase).sin();
    let sway = 0.15 * phase.sin() * t;
    [radius * angle.cos() + sway, y, radius * angle.sin()]
}

fn figure_color(i: usize, n: usize) -> [u8; 3] {
    let t = i as f32 / n.max(1) as f32;
    let hue = (t * TAU).sin() * 0.5 + 0.5;
    [
        (255.0 * t) as u8,
        (255.0 * hue) as u8,
        (255.0 * (1.0 - t)) as u8,
    ]
}

fn synth_frame(frame: usize, frames: usize, points: usize, fps: u32) -> Vec<PointRecord> {
    let step = TAU / frames.max(1) as f32;
    let phase = frame as f32 * step;
    let fps = fps.max(1) as f32;

    (0..points)
        .map(|i| {
            let p = figure_point(i, points, phase);
            let next = figure_point(i, points, phase + step);
            let velocity = [
                (next[0] - p[0]) * fps,
                (next[1] - p[1]) * fps,
                (next[2] - p[2]) * fps,
            ];
            PointRecord::new(p, figure_color(i, points), velocity)
        })
        .collect()
}

fn main() -> Result<()> {
    let args = Args::parse();
    dance_player::init_tracing(args.log_json);

    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("failed to create {}", args.out_dir.display()))?;

    tracing::info!(
        frames = args.frames,
        points = args.points,
        out = %args.out_dir.display(),
        "generating frames"
    );

    (0..args.frames).into_par_iter().try_for_each(|f| {
        let path = args.out_dir.join(format!("frame_{f:05}.ply"));
        let records = synth_frame(f, args.frames, args.points, args.fps);
        plyframe::write_file(&path, &records)
            .with_context(|| format!("failed to write {}", path.display()))
    })?;

    tracing::info!("done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn animation_loops() {
        let frames = 12;
        let first = synth_frame(0, frames, 64, 30);
        let wrapped = synth_frame(frames, frames, 64, 30);
        for (a, b) in first.iter().zip(&wrapped) {
            let (pa, pb) = (a.position, b.position);
            for k in 0..3 {
                assert!((pa[k] - pb[k]).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn frames_decode() {
        let records = synth_frame(3, 10, 100, 30);
        let bytes = plyframe::encode_frame(&records);
        let frame = plyframe::decode_frame(&bytes).unwrap();
        assert_eq!(frame.point_count(), 100);
        assert_eq!(frame.to_records(), records);
    }
}
