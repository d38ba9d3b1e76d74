//! Drives the decoder and assembles a [`Tree`].
//!
//! The decoder streams layers on the calling thread while a pool of
//! workers tiles their pixels; the bounded work channel gives the decoder
//! natural backpressure. Workers never share layer state: each one
//! produces the `LayerImage` for the sequence ids it consumed, and the
//! results are collected after the pool joins.

use std::collections::HashMap;

use crate::blend::BlendMode;
use crate::decoder::{
    ChannelKind, ColorMode, DecodeOptions, Decoder, DocumentConfig, RawLayer, RawMask, Sink,
};
use crate::gamma::GammaTable;
use crate::geom::{transform_rect, Rect, Transform};
use crate::parallel::{CancelToken, ParallelContext};
use crate::tiles::{ChannelData, TiledImage, TiledMask, DEFAULT_TILE_SIZE};
use crate::tree::builder::{self, LayerMeta};
use crate::tree::{LayerImage, Tree};
use crate::Error;

/// Maps raw layer name bytes to the encoding they were written in.
///
/// `None` falls back to UTF-8 with replacement. PSDs authored by older
/// tools carry names in legacy charsets (Shift_JIS is common), and only
/// the host knows which ones to expect.
pub type EncodingDetector = fn(&[u8]) -> Option<&'static encoding_rs::Encoding>;

fn detect_nothing(_name: &[u8]) -> Option<&'static encoding_rs::Encoding> {
    None
}

/// Options for [`Tree::from_decoder`].
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Tile edge length; powers of two keep tile addressing cheap.
    pub tile_size: i32,
    /// Affine transform applied to every layer while tiling. Zeroed
    /// diagonal entries are replaced with 1, so a zero initialized matrix
    /// means identity.
    pub transform: Transform,
    /// Gamma exponent for resampling, 0 disables gamma correction.
    pub gamma: f64,
    /// Ask the decoder to skip the pre flattened image data section.
    pub skip_merged_image: bool,
    /// Charset detection for layer names.
    pub encoding_detector: EncodingDetector,
}

impl Default for LoadOptions {
    fn default() -> LoadOptions {
        LoadOptions {
            tile_size: DEFAULT_TILE_SIZE,
            transform: Transform::identity(),
            gamma: 0.0,
            skip_merged_image: true,
            encoding_detector: detect_nothing,
        }
    }
}

fn decode_name(name: &[u8], detector: EncodingDetector) -> String {
    match detector(name) {
        Some(encoding) => encoding.decode(name).0.into_owned(),
        None => String::from_utf8_lossy(name).into_owned(),
    }
}

/// The pixel payload of one layer, queued for a worker.
struct WorkItem {
    seq_id: i32,
    rect: Rect,
    mask: Option<RawMask>,
    channels: HashMap<ChannelKind, Vec<u8>>,
}

struct LoadSink<'a> {
    ctx: &'a ParallelContext,
    detector: EncodingDetector,
    work_tx: Option<crossbeam_channel::Sender<WorkItem>>,
    canvas_rect: Option<Rect>,
    metas: Vec<LayerMeta>,
}

impl<'a> Sink for LoadSink<'a> {
    fn config_loaded(&mut self, config: &DocumentConfig) -> Result<(), Error> {
        if config.color_mode != ColorMode::Rgb {
            return Err(Error::UnsupportedColorMode(config.color_mode));
        }
        self.canvas_rect = Some(config.rect);
        Ok(())
    }

    fn layer_image_loaded(
        &mut self,
        layer: RawLayer,
        _index: usize,
        _total: usize,
    ) -> Result<(), Error> {
        if self.ctx.aborted() {
            return Err(Error::Cancelled);
        }

        let name = decode_name(&layer.name, self.detector);
        let blend_mode = match BlendMode::from_key(layer.blend_key) {
            Some(mode) => mode,
            None => {
                log::warn!(
                    "layer \"{}\" uses unknown blend key {:?}, using Normal",
                    name,
                    layer.blend_key
                );
                BlendMode::Normal
            }
        };

        let has_mask_channel = layer
            .channels
            .contains_key(&ChannelKind::UserSuppliedLayerMask);
        let mask_enabled = layer
            .mask
            .as_ref()
            .map_or(false, |mask| !mask.disabled && !mask.rect.is_empty())
            && has_mask_channel;
        let mask_default_color = layer.mask.as_ref().map_or(255, |mask| mask.default_color);

        self.metas.push(LayerMeta {
            seq_id: layer.seq_id,
            name,
            rect: layer.rect,
            section: layer.section,
            blend_mode,
            opacity: layer.opacity,
            clipping: layer.clipping,
            visible: layer.visible,
            blend_clipped_elements: layer.blend_clipped_elements,
            mask_enabled,
            mask_default_color,
        });

        let has_pixels = !layer.rect.is_empty()
            && layer.channels.contains_key(&ChannelKind::Red)
            && layer.channels.contains_key(&ChannelKind::Green)
            && layer.channels.contains_key(&ChannelKind::Blue);
        let has_mask = layer
            .mask
            .as_ref()
            .map_or(false, |mask| !mask.rect.is_empty())
            && has_mask_channel;
        if !has_pixels && !has_mask {
            return Ok(());
        }

        let work_tx = match &self.work_tx {
            Some(tx) => tx,
            None => return Err(Error::Cancelled),
        };
        // Blocks when every worker is busy; that is the backpressure that
        // keeps decoded channel data from piling up in memory.
        work_tx
            .send(WorkItem {
                seq_id: layer.seq_id,
                rect: layer.rect,
                mask: layer.mask,
                channels: layer.channels,
            })
            .map_err(|_| Error::Cancelled)
    }
}

/// Tile one layer's channels (and mask) into a [`LayerImage`].
fn build_layer_image(
    item: WorkItem,
    tile_size: i32,
    transform: &Transform,
    gamma: Option<&GammaTable>,
    cancel: &CancelToken,
) -> Result<(i32, LayerImage), Error> {
    let image = match (
        item.channels.get(&ChannelKind::Red),
        item.channels.get(&ChannelKind::Green),
        item.channels.get(&ChannelKind::Blue),
    ) {
        (Some(red), Some(green), Some(blue)) if !item.rect.is_empty() => Some(TiledImage::build(
            tile_size,
            item.rect,
            &ChannelData {
                red,
                green,
                blue,
                alpha: item
                    .channels
                    .get(&ChannelKind::TransparencyMask)
                    .map(|plane| plane.as_slice()),
            },
            transform,
            gamma,
            cancel,
        )?),
        _ => None,
    };

    let mask = match (&item.mask, item.channels.get(&ChannelKind::UserSuppliedLayerMask)) {
        (Some(raw), Some(plane)) if !raw.rect.is_empty() => Some(TiledMask::build(
            tile_size,
            raw.rect,
            plane,
            raw.default_color,
            transform,
            cancel,
        )?),
        _ => None,
    };

    Ok((item.seq_id, LayerImage { image, mask }))
}

pub(crate) fn load(
    decoder: &mut dyn Decoder,
    options: &LoadOptions,
    cancel: &CancelToken,
) -> Result<Tree, Error> {
    let transform = options.transform.or_identity();
    if transform.invert().is_none() {
        return Err(Error::InvalidTransform);
    }
    let gamma = GammaTable::new(options.gamma);

    let tile_size = if options.tile_size > 0 {
        options.tile_size
    } else {
        log::warn!(
            "tile size {} is not positive, using {}",
            options.tile_size,
            DEFAULT_TILE_SIZE
        );
        DEFAULT_TILE_SIZE
    };

    let ctx = ParallelContext::new(cancel.clone());
    let workers = num_cpus::get().max(1);
    let (work_tx, work_rx) = crossbeam_channel::bounded::<WorkItem>(workers * 2);
    let (result_tx, result_rx) = crossbeam_channel::unbounded();

    let mut sink = LoadSink {
        ctx: &ctx,
        detector: options.encoding_detector,
        work_tx: Some(work_tx),
        canvas_rect: None,
        metas: vec![],
    };

    let decode_options = DecodeOptions {
        skip_merged_image: options.skip_merged_image,
    };

    let decode_result = std::thread::scope(|scope| {
        for _ in 0..workers {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let ctx = &ctx;
            let transform = &transform;
            let gamma = gamma.as_ref();
            scope.spawn(move || {
                let token = ctx.abort_token();
                for item in work_rx.iter() {
                    if ctx.aborted() {
                        // Keep draining so the decoder never blocks on a
                        // full queue while shutting down.
                        continue;
                    }
                    match build_layer_image(item, tile_size, transform, gamma, &token) {
                        Ok(result) => {
                            let _ = result_tx.send(result);
                        }
                        Err(error) => ctx.record_error(error),
                    }
                }
            });
        }
        drop(work_rx);

        let result = decoder.decode(&decode_options, &mut sink);
        // Closing the work channel releases the workers.
        sink.work_tx.take();
        result
    });
    drop(result_tx);

    if let Err(error) = decode_result {
        ctx.record_error(error);
    }
    ctx.finish()?;

    let mut layer_images: HashMap<i32, LayerImage> = HashMap::new();
    for (seq_id, layer_image) in result_rx.try_iter() {
        layer_images.insert(seq_id, layer_image);
    }

    let canvas_rect = sink
        .canvas_rect
        .ok_or_else(|| Error::Decoder("the decoder never reported a document config".into()))?;
    let canvas_rect = if transform.is_integer_translate() {
        canvas_rect.translate(transform.tx as i32, transform.ty as i32)
    } else {
        transform_rect(&canvas_rect, &transform)
    };

    let mut metas = sink.metas;
    // Layer rectangles move under the transform; the tiled images know
    // where they actually landed.
    for meta in metas.iter_mut() {
        if let Some(image) = layer_images
            .get(&meta.seq_id)
            .and_then(|layer_image| layer_image.image.as_ref())
        {
            meta.rect = image.rect();
        }
    }

    log::debug!(
        "loaded {} layers, {} with pixel data, across {} workers",
        metas.len(),
        layer_images.len(),
        workers
    );

    let (mut nodes, seq_index) = builder::build_layers(metas)?;
    let rect = builder::refresh_rects(&mut nodes, &layer_images, canvas_rect);

    Ok(Tree::assemble(
        nodes,
        seq_index,
        layer_images,
        canvas_rect,
        rect,
        tile_size,
    ))
}
