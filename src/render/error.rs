use std::fmt;

use super::arena::TileId;

/// A convenient result type wrapping [`LandscapeError`].
pub type Result<T> = std::result::Result<T, LandscapeError>;

#[derive(Debug)]
pub enum LandscapeError {
    /// `SubsectionSizeQuads + 1` must be a power of two that fits the vertex format.
    InvalidSubsectionSize { quads: u32 },
    InvalidSubsectionCount { count: u32 },
    UnknownTile(TileId),
    ConfigIo(std::io::Error),
    ConfigParse(serde_json::Error),
}

impl fmt::Display for LandscapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LandscapeError::InvalidSubsectionSize { quads } => write!(
                f,
                "subsection size of {quads} quads does not give a power of two vertex count"
            ),
            LandscapeError::InvalidSubsectionCount { count } => {
                write!(f, "unsupported subsection count {count}, expected 1 or 2")
            }
            LandscapeError::UnknownTile(id) => write!(f, "tile {id:?} is not alive"),
            LandscapeError::ConfigIo(err) => write!(f, "failed to read landscape config: {err}"),
            LandscapeError::ConfigParse(err) => {
                write!(f, "failed to parse landscape config: {err}")
            }
        }
    }
}

impl std::error::Error for LandscapeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LandscapeError::ConfigIo(err) => Some(err),
            LandscapeError::ConfigParse(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for LandscapeError {
    fn from(value: std::io::Error) -> Self {
        LandscapeError::ConfigIo(value)
    }
}

impl From<serde_json::Error> for LandscapeError {
    fn from(value: serde_json::Error) -> Self {
        LandscapeError::ConfigParse(value)
    }
}
