pub mod render;
pub mod utils;

pub use render::{
    BufferHandle, FeatureTier, GpuBackend, HeadlessBackend, LandscapeConfig, LandscapeError,
    LandscapeKey, RenderSystem, RenderSystemRegistry, ShowFlags, TileDesc, TileId, ViewId,
    ViewInfo, ViewMode,
};

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Installs a stdout subscriber at `level` ("trace" through "error").
/// Unknown levels fall back to info. Does nothing when a global subscriber is
/// already set.
pub fn init_logging(level: &str) {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        // events at `level` and above are written to stdout.
        .with_max_level(level)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
