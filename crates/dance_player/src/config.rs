use clap::Parser;
use glam::Vec3;
use std::path::PathBuf;

/// `dance_player` - plays a directory of point-cloud frames as an animation.
///
/// Frames are read in lexical file-name order and looped forever at a fixed
/// frame rate.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Directory searched (recursively) for `*.ply` frame files.
    #[arg(long, env = "DANCE_FRAMES_DIR", default_value = "frames")]
    pub frames_dir: PathBuf,

    /// Content frame rate.
    #[arg(
        long,
        env = "DANCE_FPS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub fps: u32,

    /// Billboard radius in meters.
    #[arg(long, env = "DANCE_POINT_RADIUS", default_value_t = 0.004)]
    pub point_radius: f32,

    /// Treat source colors as sRGB and linearize them during conversion.
    #[arg(long, env = "DANCE_GAMMA", default_value_t = false)]
    pub gamma: bool,

    /// Where the cloud is anchored, as `x,y,z` meters.
    #[arg(long, default_value = "0,0,0", value_parser = parse_anchor, allow_hyphen_values = true)]
    pub anchor: Vec3,

    /// Start with no placement; press `P` to place the cloud.
    #[arg(long, default_value_t = false)]
    pub unplaced: bool,

    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    #[arg(long, default_value_t = 720)]
    pub height: u32,

    /// Hide the playback overlay.
    #[arg(long, default_value_t = false)]
    pub no_hud: bool,

    /// Emit logs as JSON lines.
    #[arg(long, env = "DANCE_LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

fn parse_anchor(s: &str) -> Result<Vec3, String> {
    let coords = s
        .split(',')
        .map(|c| c.trim().parse::<f32>().map_err(|e| format!("'{c}': {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    match coords.as_slice() {
        [x, y, z] => Ok(Vec3::new(*x, *y, *z)),
        _ => Err(format!("expected x,y,z but got {} values", coords.len())),
    }
}
