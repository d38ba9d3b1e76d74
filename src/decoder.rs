//! The contract between the compositor and the PSD decoder it consumes.
//!
//! Parsing a PSD is not this crate's job. A host brings its own decoder,
//! implements [`Decoder`] on top of it and hands the compositor raw layer
//! records: pixel channels, rectangles, blend keys, mask info and folder
//! sentinels, in bottom to top paint order.
//!
//! psd spec: https://www.adobe.com/devnet-apps/photoshop/fileformatashtml/

use std::collections::HashMap;

use crate::geom::Rect;
use crate::Error;

/// The color mode of the document, from the file header.
///
/// Only [`ColorMode::Rgb`] documents can be composited; everything else is
/// rejected when the decoder reports its config.
///
/// # [Adobe Docs](https://www.adobe.com/devnet-apps/photoshop/fileformatashtml/)
///
/// Supported values are: Bitmap = 0; Grayscale = 1; Indexed = 2; RGB = 3;
/// CMYK = 4; Multichannel = 7; Duotone = 8; Lab = 9.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum ColorMode {
    Bitmap = 0,
    Grayscale = 1,
    Indexed = 2,
    Rgb = 3,
    Cmyk = 4,
    Multichannel = 7,
    Duotone = 8,
    Lab = 9,
}

impl ColorMode {
    /// Map the file header's color mode byte, `None` for unknown values.
    pub fn new(mode: u8) -> Option<ColorMode> {
        match mode {
            0 => Some(ColorMode::Bitmap),
            1 => Some(ColorMode::Grayscale),
            2 => Some(ColorMode::Indexed),
            3 => Some(ColorMode::Rgb),
            4 => Some(ColorMode::Cmyk),
            7 => Some(ColorMode::Multichannel),
            8 => Some(ColorMode::Duotone),
            9 => Some(ColorMode::Lab),
            _ => None,
        }
    }
}

/// The different kinds of channels in a layer (red, green, blue, ...).
///
/// The discriminants are the channel ids from the layer records section.
#[derive(Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Copy, Clone)]
#[allow(missing_docs)]
pub enum ChannelKind {
    Red = 0,
    Green = 1,
    Blue = 2,
    TransparencyMask = -1,
    UserSuppliedLayerMask = -2,
    RealUserSuppliedLayerMask = -3,
}

impl ChannelKind {
    /// Map a channel id from the layer records section, `None` for ids
    /// outside the documented range.
    pub fn new(channel_id: i16) -> Option<ChannelKind> {
        match channel_id {
            0 => Some(ChannelKind::Red),
            1 => Some(ChannelKind::Green),
            2 => Some(ChannelKind::Blue),
            -1 => Some(ChannelKind::TransparencyMask),
            -2 => Some(ChannelKind::UserSuppliedLayerMask),
            -3 => Some(ChannelKind::RealUserSuppliedLayerMask),
            _ => None,
        }
    }
}

/// A layer's role in the flat layer list.
///
/// Folders arrive as sentinels around their children: a folder record
/// opens a group, the matching [`SectionType::Divider`] record closes it.
///
/// The discriminants are the 'lsct' section divider types.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SectionType {
    /// An ordinary pixel layer
    Layer = 0,
    /// A folder shown expanded in the layers panel
    OpenFolder = 1,
    /// A folder shown collapsed in the layers panel
    ClosedFolder = 2,
    /// The hidden record that closes the innermost open folder
    Divider = 3,
}

impl SectionType {
    /// Map an 'lsct' section divider type, `None` for unknown values.
    pub fn new(divider_type: u32) -> Option<SectionType> {
        match divider_type {
            0 => Some(SectionType::Layer),
            1 => Some(SectionType::OpenFolder),
            2 => Some(SectionType::ClosedFolder),
            3 => Some(SectionType::Divider),
            _ => None,
        }
    }

    /// Whether this record opens a folder.
    pub fn is_folder(&self) -> bool {
        matches!(self, SectionType::OpenFolder | SectionType::ClosedFolder)
    }
}

/// The user supplied layer mask of a raw layer.
#[derive(Debug, Clone)]
pub struct RawMask {
    /// The canvas space rectangle the mask channel covers
    pub rect: Rect,
    /// The value of every pixel outside `rect`, 0 or 255
    pub default_color: u8,
    /// Whether the mask is switched off in the layers panel
    pub disabled: bool,
}

/// One record of the decoder's flat layer list.
#[derive(Debug, Clone)]
pub struct RawLayer {
    /// Unique id the decoder assigned to this layer, never
    /// [`crate::ROOT_SEQ_ID`]
    pub seq_id: i32,
    /// The raw layer name bytes; the charset is whatever the authoring
    /// tool wrote, see [`crate::LoadOptions::encoding_detector`]
    pub name: Vec<u8>,
    /// The canvas space rectangle the pixel channels cover
    pub rect: Rect,
    /// Pixel layer, folder sentinel or folder terminator
    pub section: SectionType,
    /// The 4 byte blend mode key, e.g. `norm`, `mul `, `pass`
    pub blend_key: [u8; 4],
    /// 0 = transparent ... 255 = opaque
    pub opacity: u8,
    /// Whether this layer clips against the first non clipping layer
    /// below it
    pub clipping: bool,
    /// Whether the layer is shown in the layers panel
    pub visible: bool,
    /// Folder attribute: `false` turns the folder into a pass through
    /// group for its clipped members
    pub blend_clipped_elements: bool,
    /// The user supplied mask, if the layer has one
    pub mask: Option<RawMask>,
    /// Channel planes keyed by kind, row major over `rect` (the mask
    /// channel is row major over the mask rect)
    pub channels: HashMap<ChannelKind, Vec<u8>>,
}

/// The document wide config the decoder reports before any layer.
#[derive(Debug, Clone)]
pub struct DocumentConfig {
    /// The canvas rectangle
    pub rect: Rect,
    /// The color mode from the file header
    pub color_mode: ColorMode,
}

/// Knobs forwarded to the decoder.
#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    /// Skip the pre flattened image data section; the compositor never
    /// reads it
    pub skip_merged_image: bool,
}

/// Receives decoder events during [`Decoder::decode`].
pub trait Sink {
    /// Called exactly once, before any layer, with the document config.
    fn config_loaded(&mut self, config: &DocumentConfig) -> Result<(), Error>;

    /// Called per layer in bottom to top paint order. `index` counts from
    /// zero up to `total - 1`.
    fn layer_image_loaded(
        &mut self,
        layer: RawLayer,
        index: usize,
        total: usize,
    ) -> Result<(), Error>;
}

/// A PSD decoder the compositor can drive.
///
/// Implementations report the document config, then every layer in paint
/// order, and propagate any error a sink callback returns.
pub trait Decoder {
    /// Decode the document, pushing events into `sink`.
    fn decode(&mut self, options: &DecodeOptions, sink: &mut dyn Sink) -> Result<(), Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_ids_map_to_kinds() {
        assert_eq!(ChannelKind::new(0), Some(ChannelKind::Red));
        assert_eq!(ChannelKind::new(-1), Some(ChannelKind::TransparencyMask));
        assert_eq!(ChannelKind::new(-2), Some(ChannelKind::UserSuppliedLayerMask));
        assert_eq!(ChannelKind::new(5), None);
    }

    #[test]
    fn only_documented_color_modes_parse() {
        assert_eq!(ColorMode::new(3), Some(ColorMode::Rgb));
        assert_eq!(ColorMode::new(9), Some(ColorMode::Lab));
        assert_eq!(ColorMode::new(5), None);
        assert_eq!(ColorMode::new(6), None);
    }

    #[test]
    fn folder_sentinels() {
        assert!(SectionType::OpenFolder.is_folder());
        assert!(SectionType::ClosedFolder.is_folder());
        assert!(!SectionType::Layer.is_folder());
        assert!(!SectionType::Divider.is_folder());
    }
}
