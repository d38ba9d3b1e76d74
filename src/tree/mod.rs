//! The layer tree and its public facade.
//!
//! A [`Tree`] owns every [`Layer`] in an arena indexed by [`LayerId`];
//! parent, child and clipping relations are indices into that arena, never
//! owning references. Pixel data lives outside the nodes in the
//! `seq_id -> LayerImage` mapping, whose tile buffers are shared between
//! clones.

use std::collections::HashMap;

use crate::blend::BlendMode;
use crate::canvas::Canvas;
use crate::decoder::Decoder;
use crate::gamma::GammaTable;
use crate::geom::{transform_rect, Rect, Transform};
use crate::loader::{self, LoadOptions};
use crate::parallel::{CancelToken, ParallelContext};
use crate::renderer::Renderer;
use crate::tiles::{ChannelData, TiledImage, TiledMask};
use crate::Error;

pub(crate) mod builder;

/// The sequence id reserved for the synthetic root layer.
///
/// Decoders assign non negative ids, so the root can never collide.
pub const ROOT_SEQ_ID: i32 = -1;

/// An index into a tree's layer arena.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct LayerId(pub(crate) usize);

/// A node of the layer tree: a pixel layer or a folder.
#[derive(Debug, Clone)]
pub struct Layer {
    pub(crate) seq_id: i32,
    pub(crate) name: String,
    pub(crate) folder: bool,
    pub(crate) folder_open: bool,
    pub(crate) visible: bool,
    pub(crate) blend_mode: BlendMode,
    pub(crate) opacity: u8,
    pub(crate) clipping: bool,
    pub(crate) blend_clipped_elements: bool,
    pub(crate) mask_enabled: bool,
    pub(crate) mask_default_color: u8,
    pub(crate) rect: Rect,
    pub(crate) parent: Option<LayerId>,
    pub(crate) children: Vec<LayerId>,
    pub(crate) clipped_by: Option<LayerId>,
    pub(crate) clip: Vec<LayerId>,
}

impl Layer {
    /// The sequence id the decoder assigned, [`ROOT_SEQ_ID`] for the root.
    pub fn seq_id(&self) -> i32 {
        self.seq_id
    }

    /// The layer name, decoded through the configured encoding detector.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this node is a folder.
    pub fn is_folder(&self) -> bool {
        self.folder
    }

    /// Whether the folder is shown expanded in the layers panel.
    pub fn is_folder_open(&self) -> bool {
        self.folder_open
    }

    /// Whether the layer is visible.
    pub fn visible(&self) -> bool {
        self.visible
    }

    /// The blend mode used when compositing this layer into its parent.
    pub fn blend_mode(&self) -> BlendMode {
        self.blend_mode
    }

    /// Layer opacity, 0 = transparent ... 255 = opaque.
    pub fn opacity(&self) -> u8 {
        self.opacity
    }

    /// Whether this layer uses the underlying layer's alpha as its clip.
    pub fn clipping(&self) -> bool {
        self.clipping
    }

    /// Folder attribute controlling how clipped members composite.
    pub fn blend_clipped_elements(&self) -> bool {
        self.blend_clipped_elements
    }

    /// Whether the layer mask is switched on.
    pub fn mask_enabled(&self) -> bool {
        self.mask_enabled
    }

    /// The mask value outside the mask rectangle, 0 or 255.
    pub fn mask_default_color(&self) -> u8 {
        self.mask_default_color
    }

    /// The canvas space rectangle of this layer's pixels; for folders, the
    /// union of the children's rectangles.
    pub fn rect(&self) -> Rect {
        self.rect
    }

    /// The parent folder, `None` for the root.
    pub fn parent(&self) -> Option<LayerId> {
        self.parent
    }

    /// Child ids in bottom to top paint order.
    pub fn children(&self) -> &[LayerId] {
        &self.children
    }

    /// The base of the clip stack this layer participates in.
    pub fn clipped_by(&self) -> Option<LayerId> {
        self.clipped_by
    }

    /// For a clip stack base, the clipped layers in paint order.
    pub fn clip(&self) -> &[LayerId] {
        &self.clip
    }
}

/// A layer's pixel data: its RGBA canvas and its 8 bit mask.
///
/// Folders, empty layers and unmasked layers leave the respective half
/// unset. Entries are immutable once the loader inserts them.
#[derive(Debug, Clone, Default)]
pub struct LayerImage {
    pub(crate) image: Option<TiledImage>,
    pub(crate) mask: Option<TiledMask>,
}

impl LayerImage {
    /// The layer's tiled RGBA pixels, if it has any.
    pub fn image(&self) -> Option<&TiledImage> {
        self.image.as_ref()
    }

    /// The layer's tiled mask, if it has one.
    pub fn mask(&self) -> Option<&TiledMask> {
        self.mask.as_ref()
    }
}

/// Read only view of a tree's structure handed to the renderer, so that
/// the renderer's cache can be borrowed mutably alongside it.
pub(crate) struct TreeView<'a> {
    pub(crate) nodes: &'a [Layer],
    pub(crate) layer_images: &'a HashMap<i32, LayerImage>,
}

/// A composited PSD document: the layer tree plus everything needed to
/// render it.
#[derive(Debug)]
pub struct Tree {
    pub(crate) nodes: Vec<Layer>,
    pub(crate) seq_index: HashMap<i32, LayerId>,
    pub(crate) layer_images: HashMap<i32, LayerImage>,
    pub(crate) canvas_rect: Rect,
    pub(crate) rect: Rect,
    pub(crate) tile_size: i32,
    renderer: Renderer,
}

impl Clone for Tree {
    /// Deep copies the tree structure while sharing tile buffers with the
    /// original. The clone starts with an empty render cache.
    fn clone(&self) -> Tree {
        Tree {
            nodes: self.nodes.clone(),
            seq_index: self.seq_index.clone(),
            layer_images: self.layer_images.clone(),
            canvas_rect: self.canvas_rect,
            rect: self.rect,
            tile_size: self.tile_size,
            renderer: Renderer::new(self.canvas_rect),
        }
    }
}

impl Tree {
    pub(crate) fn assemble(
        nodes: Vec<Layer>,
        seq_index: HashMap<i32, LayerId>,
        layer_images: HashMap<i32, LayerImage>,
        canvas_rect: Rect,
        rect: Rect,
        tile_size: i32,
    ) -> Tree {
        Tree {
            nodes,
            seq_index,
            layer_images,
            canvas_rect,
            rect,
            tile_size,
            renderer: Renderer::new(canvas_rect),
        }
    }

    /// Drive `decoder` and build the tree it describes.
    ///
    /// Rejects non RGB documents. Layer pixels are tiled by a worker pool
    /// while the decoder streams; `cancel` aborts the whole load.
    pub fn from_decoder(
        decoder: &mut dyn Decoder,
        options: &LoadOptions,
        cancel: &CancelToken,
    ) -> Result<Tree, Error> {
        loader::load(decoder, options, cancel)
    }

    /// The document rectangle, after any load time transform.
    pub fn canvas_rect(&self) -> Rect {
        self.canvas_rect
    }

    /// The union of all visible layer rectangles, clipped to the canvas.
    pub fn rect(&self) -> Rect {
        self.rect
    }

    /// The tile edge length shared by every tiled image in this tree.
    pub fn tile_size(&self) -> i32 {
        self.tile_size
    }

    /// The id of the synthetic root layer.
    pub fn root(&self) -> LayerId {
        LayerId(0)
    }

    /// The layer behind `id`.
    pub fn layer(&self, id: LayerId) -> &Layer {
        &self.nodes[id.0]
    }

    /// Look a layer up by the sequence id the decoder assigned.
    pub fn layer_by_seq_id(&self, seq_id: i32) -> Option<&Layer> {
        self.seq_index.get(&seq_id).map(|id| &self.nodes[id.0])
    }

    /// The first layer with the given name, in paint order.
    pub fn layer_by_name(&self, name: &str) -> Option<&Layer> {
        self.nodes.iter().skip(1).find(|layer| layer.name == name)
    }

    /// Every layer except the synthetic root, in paint order.
    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.nodes.iter().skip(1)
    }

    /// The pixel data stored for `seq_id`.
    pub fn layer_image(&self, seq_id: i32) -> Option<&LayerImage> {
        self.layer_images.get(&seq_id)
    }

    /// Render the whole document into `dst`, clipped to `dst`'s rect.
    ///
    /// With `opaque` set, the alpha channel of the rendered region is
    /// forced to 255 after compositing.
    pub fn render(&mut self, dst: &mut Canvas, opaque: bool) -> Result<(), Error> {
        let rect = dst.rect();
        self.render_layer(dst, &rect, ROOT_SEQ_ID, opaque)
    }

    /// Render the whole document restricted to `rect`.
    pub fn render_rect(&mut self, dst: &mut Canvas, rect: &Rect, opaque: bool) -> Result<(), Error> {
        self.render_layer(dst, rect, ROOT_SEQ_ID, opaque)
    }

    /// Render the sub tree rooted at `seq_id` into `dst`, restricted to
    /// `rect`. [`ROOT_SEQ_ID`] renders the whole document.
    pub fn render_layer(
        &mut self,
        dst: &mut Canvas,
        rect: &Rect,
        seq_id: i32,
        opaque: bool,
    ) -> Result<(), Error> {
        let from = if seq_id == ROOT_SEQ_ID {
            LayerId(0)
        } else {
            *self.seq_index.get(&seq_id).ok_or(Error::MissingLayer(seq_id))?
        };

        let view = TreeView {
            nodes: &self.nodes,
            layer_images: &self.layer_images,
        };
        self.renderer.render(&view, dst, rect, from, opaque);
        Ok(())
    }

    /// Mark `seq_id`'s cached composite, and every ancestor's, stale.
    pub fn set_dirty(&mut self, seq_id: i32) {
        let start = match self.seq_index.get(&seq_id) {
            Some(id) => *id,
            None => return,
        };

        let mut current = Some(start);
        while let Some(id) = current {
            let layer = &self.nodes[id.0];
            self.renderer.mark_dirty(layer.seq_id);
            current = layer.parent;
        }
    }

    /// Re-tile every layer image and mask under `transform`, returning the
    /// transformed tree. The receiver is untouched.
    ///
    /// `gamma` enables gamma corrected resampling (0 disables). On
    /// cancellation the partial tree is dropped and `Error::Cancelled`
    /// is returned.
    pub fn transform(
        &self,
        transform: &Transform,
        gamma: f64,
        cancel: &CancelToken,
    ) -> Result<Tree, Error> {
        let m = transform.or_identity();
        if m.invert().is_none() {
            return Err(Error::InvalidTransform);
        }
        let gamma_table = GammaTable::new(gamma);

        let ctx = ParallelContext::new(cancel.clone());
        let entries: Vec<(i32, &LayerImage)> =
            self.layer_images.iter().map(|(k, v)| (*k, v)).collect();

        // Runtime parallelism, backed off when there is not enough work to
        // keep that many workers busy.
        let mut workers = num_cpus::get().max(1);
        while workers > 1 && workers * 2 > entries.len() {
            workers -= 1;
        }
        let chunk_len = (entries.len() + workers - 1) / workers.max(1);

        let (result_tx, result_rx) = crossbeam_channel::unbounded();
        if chunk_len > 0 {
            std::thread::scope(|scope| {
                for chunk in entries.chunks(chunk_len) {
                    let result_tx = result_tx.clone();
                    let ctx = &ctx;
                    let gamma_table = gamma_table.as_ref();
                    let tile_size = self.tile_size;
                    scope.spawn(move || {
                        let token = ctx.abort_token();
                        for &(seq_id, layer_image) in chunk {
                            if ctx.aborted() {
                                return;
                            }
                            match rebuild_layer_image(
                                layer_image,
                                tile_size,
                                &m,
                                gamma_table,
                                &token,
                            ) {
                                Ok(rebuilt) => {
                                    let _ = result_tx.send((seq_id, rebuilt));
                                }
                                Err(error) => {
                                    ctx.record_error(error);
                                    return;
                                }
                            }
                        }
                    });
                }
            });
        }
        drop(result_tx);
        ctx.finish()?;

        let mut layer_images = HashMap::with_capacity(entries.len());
        for (seq_id, rebuilt) in result_rx.try_iter() {
            layer_images.insert(seq_id, rebuilt);
        }
        log::debug!(
            "transformed {} layer images across {} workers",
            layer_images.len(),
            workers
        );

        let canvas_rect = if m.is_integer_translate() {
            self.canvas_rect.translate(m.tx as i32, m.ty as i32)
        } else {
            transform_rect(&self.canvas_rect, &m)
        };

        let mut nodes = self.nodes.clone();
        let rect = builder::refresh_rects(&mut nodes, &layer_images, canvas_rect);

        Ok(Tree::assemble(
            nodes,
            self.seq_index.clone(),
            layer_images,
            canvas_rect,
            rect,
            self.tile_size,
        ))
    }
}

/// Rebuild one layer image entry under a new transform by flattening its
/// tiles back into channel planes and running them through the builders.
fn rebuild_layer_image(
    layer_image: &LayerImage,
    tile_size: i32,
    transform: &Transform,
    gamma: Option<&GammaTable>,
    cancel: &CancelToken,
) -> Result<LayerImage, Error> {
    let image = match &layer_image.image {
        Some(image) => {
            let (red, green, blue, alpha) = image.to_channels();
            Some(TiledImage::build(
                tile_size,
                image.rect(),
                &ChannelData {
                    red: &red,
                    green: &green,
                    blue: &blue,
                    alpha: Some(&alpha),
                },
                transform,
                gamma,
                cancel,
            )?)
        }
        None => None,
    };

    let mask = match &layer_image.mask {
        Some(mask) => {
            let plane = mask.to_channel();
            Some(TiledMask::build(
                tile_size,
                mask.rect(),
                &plane,
                mask.default_color(),
                transform,
                cancel,
            )?)
        }
        None => None,
    };

    Ok(LayerImage { image, mask })
}
