//! Composites PSD layer trees into RGBA images.
//!
//! Parsing is somebody else's job: a host implements the [`decoder`]
//! traits on top of its PSD reader and this crate does the rest. Loading
//! tiles every layer's pixels (optionally through an affine transform with
//! gamma corrected resampling), builds the layer tree with its clipping
//! groups, and [`Tree`] then renders any sub tree with Photoshop's blend
//! modes, masks, opacity, clipping and pass through folder semantics.
//!
//! Only RGB documents are supported.
//!
//! You are encouraged to read the PSD specification before contributing to
//! this codebase. This will help you better understand the current
//! approach and discover ways to improve it.
//!
//! psd spec: https://www.adobe.com/devnet-apps/photoshop/fileformatashtml/

#![deny(missing_docs)]

pub use crate::blend::BlendMode;
pub use crate::canvas::{Canvas, CoverageSource, PixelSource};
pub use crate::geom::{transform_rect, Rect, Transform};
pub use crate::loader::{EncodingDetector, LoadOptions};
pub use crate::parallel::CancelToken;
pub use crate::tiles::{TiledImage, TiledMask, DEFAULT_TILE_SIZE};
pub use crate::tree::{Layer, LayerId, LayerImage, Tree, ROOT_SEQ_ID};

pub mod decoder;

mod blend;
mod canvas;
mod gamma;
mod geom;
mod loader;
mod parallel;
mod renderer;
mod tiles;
mod tree;

use crate::decoder::ColorMode;

/// Everything that can go wrong while loading, transforming or rendering.
///
/// All of these are terminal for the operation that raised them; no
/// partial tree is ever returned.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The document is not RGB. Rejected as soon as the decoder reports
    /// its config.
    #[error("unsupported color mode {0:?}, only RGB documents can be composited")]
    UnsupportedColorMode(ColorMode),

    /// The decoder failed, or handed over data the tree cannot be built
    /// from.
    #[error("decoder: {0}")]
    Decoder(String),

    /// Building tiles from decoded channel planes failed.
    #[error("failed to build tiles: {0}")]
    TileBuild(String),

    /// The supplied transform matrix is not invertible.
    #[error("the transform matrix is not invertible")]
    InvalidTransform,

    /// No layer carries the requested sequence id.
    #[error("no layer with sequence id {0}")]
    MissingLayer(i32),

    /// The cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Wrap a decoder implementation's own error type.
    pub fn decoder(error: impl std::fmt::Display) -> Error {
        Error::Decoder(error.to_string())
    }
}
