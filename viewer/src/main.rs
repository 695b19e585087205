use clap::Parser;
use macroquad::prelude::*;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use parse_spine_json::error::{Result, SpineError};
use parse_spine_json::runtime::{BufferedDrawBatcher, DrawFlip, FsTextureLoader, SpineData};

/// Desktop viewer for Spine skeleton exports.
#[derive(Parser, Debug)]
#[command(name = "viewer", version, about, long_about = None)]
struct Args {
    /// Skeleton export (.json)
    #[arg(short, long)]
    skeleton: Option<PathBuf>,

    /// Texture atlas (.atlas); page images are resolved next to it
    #[arg(short, long)]
    atlas: Option<PathBuf>,

    /// Animation to play on startup (defaults to the first one)
    #[arg(short = 'n', long)]
    animation: Option<String>,

    /// RON config file; command line flags win over its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Uniform skeleton scale
    #[arg(long)]
    scale: Option<f32>,

    /// Skeleton origin in window pixels (defaults to bottom-center)
    #[arg(long, num_args = 2, value_names = ["X", "Y"])]
    position: Option<Vec<f32>>,

    /// Mirror the skeleton horizontally
    #[arg(long)]
    flip: bool,

    /// Draw the bone hierarchy and ik targets on top
    #[arg(long)]
    debug_bones: bool,

    /// Play the startup animation once instead of looping it
    #[arg(long)]
    no_loop: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct ViewerConfig {
    skeleton: Option<PathBuf>,
    atlas: Option<PathBuf>,
    animation: Option<String>,
    scale: Option<f32>,
    position: Option<(f32, f32)>,
    flip: bool,
    debug_bones: bool,
}

impl ViewerConfig {
    fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        ron::de::from_str(&text).map_err(|e| SpineError::Config(e.to_string()))
    }
}

struct Settings {
    skeleton: PathBuf,
    atlas: PathBuf,
    animation: Option<String>,
    scale: f32,
    position: Option<(f32, f32)>,
    flip: bool,
    debug_bones: bool,
    looping: bool,
}

fn resolve_settings(args: &Args) -> Result<Settings> {
    let config = match &args.config {
        Some(path) => ViewerConfig::load(path)?,
        None => ViewerConfig::default(),
    };
    let skeleton = args
        .skeleton
        .clone()
        .or(config.skeleton)
        .ok_or_else(|| SpineError::Config("no skeleton file given (use --skeleton)".into()))?;
    let atlas = args
        .atlas
        .clone()
        .or(config.atlas)
        .ok_or_else(|| SpineError::Config("no atlas file given (use --atlas)".into()))?;
    let position = args
        .position
        .as_ref()
        .map(|xy| (xy[0], xy[1]))
        .or(config.position);
    Ok(Settings {
        skeleton,
        atlas,
        animation: args.animation.clone().or(config.animation),
        scale: args.scale.or(config.scale).unwrap_or(1.0),
        position,
        flip: args.flip || config.flip,
        debug_bones: args.debug_bones || config.debug_bones,
        looping: !args.no_loop,
    })
}

fn load_spine_data(settings: &Settings) -> Result<SpineData> {
    let skeleton_bytes = std::fs::read(&settings.skeleton)?;
    let atlas_text = std::fs::read_to_string(&settings.atlas)?;
    let base_dir = settings.atlas.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    let mut texture_loader = FsTextureLoader::new(base_dir);
    SpineData::load(&skeleton_bytes, &atlas_text, &mut texture_loader)
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .try_init();
}

fn window_conf() -> Conf {
    Conf {
        window_title: "Spine Animation Viewer".to_owned(),
        window_width: 800,
        window_height: 600,
        ..Default::default()
    }
}

const PAN_SPEED: f32 = 240.0;
const CROSS_FADE: f32 = 0.2;

#[macroquad::main(window_conf)]
async fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    let settings = match resolve_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let spine_data = match load_spine_data(&settings) {
        Ok(data) => data,
        Err(e) => {
            error!(
                skeleton = %settings.skeleton.display(),
                atlas = %settings.atlas.display(),
                "failed to load spine data: {}", e
            );
            std::process::exit(1);
        }
    };

    let mut skeleton = spine_data.instantiate_skeleton();
    let animations: Vec<String> =
        skeleton.animation_names().iter().map(|name| name.to_string()).collect();
    info!(?animations, "skeleton ready");

    let mut animation_cursor = 0usize;
    match &settings.animation {
        Some(name) if skeleton.has_animation(name) => {
            animation_cursor = animations.iter().position(|n| n == name).unwrap_or(0);
            skeleton.set_animation(name, settings.looping, None);
        }
        Some(name) => {
            warn!(animation = %name, "animation not found, falling back to the first one");
            if let Some(first) = animations.first() {
                skeleton.set_animation(first, settings.looping, None);
            }
        }
        None => {
            if let Some(first) = animations.first() {
                skeleton.set_animation(first, settings.looping, None);
            }
        }
    }

    let mut draw_buffer = BufferedDrawBatcher::new();
    let mut scale = settings.scale;
    let mut flip = settings.flip;
    let mut debug_bones = settings.debug_bones;
    let mut offset = (0.0f32, 0.0f32);

    loop {
        clear_background(Color::new(100.0 / 255.0, 149.0 / 255.0, 237.0 / 255.0, 1.0));

        if is_key_pressed(KeyCode::Space) && !animations.is_empty() {
            animation_cursor = (animation_cursor + 1) % animations.len();
            let next = &animations[animation_cursor];
            info!(animation = %next, "switching");
            skeleton.set_animation(next, true, Some(CROSS_FADE));
        }
        if is_key_pressed(KeyCode::B) {
            debug_bones = !debug_bones;
        }
        if is_key_pressed(KeyCode::F) {
            flip = !flip;
        }
        if is_key_pressed(KeyCode::Equal) || is_key_pressed(KeyCode::KpAdd) {
            scale *= 1.1;
        }
        if is_key_pressed(KeyCode::Minus) || is_key_pressed(KeyCode::KpSubtract) {
            scale /= 1.1;
        }
        let dt = get_frame_time();
        if is_key_down(KeyCode::Left) {
            offset.0 -= PAN_SPEED * dt;
        }
        if is_key_down(KeyCode::Right) {
            offset.0 += PAN_SPEED * dt;
        }
        if is_key_down(KeyCode::Up) {
            offset.1 -= PAN_SPEED * dt;
        }
        if is_key_down(KeyCode::Down) {
            offset.1 += PAN_SPEED * dt;
        }
        if is_key_pressed(KeyCode::Escape) {
            break;
        }

        // Bottom-center placement unless a fixed origin was configured.
        let (base_x, base_y) = settings
            .position
            .unwrap_or_else(|| (screen_width() / 2.0, screen_height() - 100.0));
        let position_x = base_x + offset.0;
        let position_y = base_y + offset.1;

        let x_flip = if flip { DrawFlip::Flipped } else { DrawFlip::None };
        skeleton.update_animation(dt);
        skeleton.draw(&mut draw_buffer, position_x, position_y, scale, x_flip);
        if debug_bones {
            skeleton.draw_bones(position_x, position_y, scale);
            skeleton.draw_ik_effectors(position_x, position_y, scale);
        }
        next_frame().await;
    }
}
