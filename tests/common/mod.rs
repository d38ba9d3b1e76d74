//! A scripted stand in for a real PSD decoder.
//!
//! Tests describe documents as flat layer lists, the same shape a real
//! decoder would stream, and feed them through the public loading API.

#![allow(dead_code)]

use std::collections::HashMap;

use psd_compositor::decoder::{
    ChannelKind, ColorMode, DecodeOptions, Decoder, DocumentConfig, RawLayer, RawMask,
    SectionType, Sink,
};
use psd_compositor::{Error, Rect};

pub struct StubDecoder {
    config: DocumentConfig,
    layers: Vec<RawLayer>,
}

impl StubDecoder {
    pub fn new(width: i32, height: i32, layers: Vec<RawLayer>) -> StubDecoder {
        StubDecoder {
            config: DocumentConfig {
                rect: Rect::new(0, 0, width, height),
                color_mode: ColorMode::Rgb,
            },
            layers,
        }
    }

    pub fn with_color_mode(mut self, color_mode: ColorMode) -> StubDecoder {
        self.config.color_mode = color_mode;
        self
    }
}

impl Decoder for StubDecoder {
    fn decode(&mut self, _options: &DecodeOptions, sink: &mut dyn Sink) -> Result<(), Error> {
        sink.config_loaded(&self.config)?;
        let total = self.layers.len();
        for (index, layer) in self.layers.drain(..).enumerate() {
            sink.layer_image_loaded(layer, index, total)?;
        }
        Ok(())
    }
}

/// A pixel layer filled with one RGBA color.
pub fn solid_layer(seq_id: i32, name: &str, rect: Rect, color: [u8; 4]) -> RawLayer {
    let len = rect.width() as usize * rect.height() as usize;
    let mut channels = HashMap::new();
    channels.insert(ChannelKind::Red, vec![color[0]; len]);
    channels.insert(ChannelKind::Green, vec![color[1]; len]);
    channels.insert(ChannelKind::Blue, vec![color[2]; len]);
    channels.insert(ChannelKind::TransparencyMask, vec![color[3]; len]);

    RawLayer {
        seq_id,
        name: name.as_bytes().to_vec(),
        rect,
        section: SectionType::Layer,
        blend_key: *b"norm",
        opacity: 255,
        clipping: false,
        visible: true,
        blend_clipped_elements: true,
        mask: None,
        channels,
    }
}

/// A pixel layer with explicit channel planes.
pub fn layer_from_planes(
    seq_id: i32,
    name: &str,
    rect: Rect,
    red: Vec<u8>,
    green: Vec<u8>,
    blue: Vec<u8>,
    alpha: Vec<u8>,
) -> RawLayer {
    let mut channels = HashMap::new();
    channels.insert(ChannelKind::Red, red);
    channels.insert(ChannelKind::Green, green);
    channels.insert(ChannelKind::Blue, blue);
    channels.insert(ChannelKind::TransparencyMask, alpha);

    RawLayer {
        seq_id,
        name: name.as_bytes().to_vec(),
        rect,
        section: SectionType::Layer,
        blend_key: *b"norm",
        opacity: 255,
        clipping: false,
        visible: true,
        blend_clipped_elements: true,
        mask: None,
        channels,
    }
}

/// A folder record; everything until the matching divider nests inside.
pub fn folder(seq_id: i32, name: &str, blend_key: [u8; 4]) -> RawLayer {
    RawLayer {
        seq_id,
        name: name.as_bytes().to_vec(),
        rect: Rect::zero(),
        section: SectionType::OpenFolder,
        blend_key,
        opacity: 255,
        clipping: false,
        visible: true,
        blend_clipped_elements: true,
        mask: None,
        channels: HashMap::new(),
    }
}

/// The hidden record that closes the innermost open folder.
pub fn divider(seq_id: i32) -> RawLayer {
    RawLayer {
        seq_id,
        name: vec![],
        rect: Rect::zero(),
        section: SectionType::Divider,
        blend_key: *b"norm",
        opacity: 255,
        clipping: false,
        visible: true,
        blend_clipped_elements: true,
        mask: None,
        channels: HashMap::new(),
    }
}

pub fn with_blend_key(mut layer: RawLayer, key: [u8; 4]) -> RawLayer {
    layer.blend_key = key;
    layer
}

pub fn with_opacity(mut layer: RawLayer, opacity: u8) -> RawLayer {
    layer.opacity = opacity;
    layer
}

pub fn with_clipping(mut layer: RawLayer) -> RawLayer {
    layer.clipping = true;
    layer
}

pub fn with_visibility(mut layer: RawLayer, visible: bool) -> RawLayer {
    layer.visible = visible;
    layer
}

/// Attach a user mask covering `rect` with the given plane.
pub fn with_mask(mut layer: RawLayer, rect: Rect, plane: Vec<u8>, default_color: u8) -> RawLayer {
    layer
        .channels
        .insert(ChannelKind::UserSuppliedLayerMask, plane);
    layer.mask = Some(RawMask {
        rect,
        default_color,
        disabled: false,
    });
    layer
}
