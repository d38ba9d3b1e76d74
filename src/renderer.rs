//! The recursive compositor.
//!
//! Rendering walks the layer tree in bottom to top paint order and blends
//! every visible layer into the destination, honoring blend modes, masks,
//! opacity, clipping groups and pass through folders. Isolated folder
//! composites are cached per sequence id until [`Renderer::mark_dirty`]
//! invalidates them.

use std::collections::HashMap;

use crate::blend::{self, BlendMode};
use crate::canvas::{Canvas, CoverageSource};
use crate::geom::Rect;
use crate::tree::{LayerId, TreeView};

/// A folder composite kept between renders.
#[derive(Debug)]
struct CacheEntry {
    canvas: Canvas,
    rect: Rect,
    dirty: bool,
}

/// Free list of canvas sized RGBA working buffers.
///
/// Every buffer the renderer borrows goes back on the list before the
/// render call returns, or moves into the cache, so repeated renders do
/// not reallocate.
#[derive(Debug)]
struct BufferPool {
    rect: Rect,
    free: Vec<Canvas>,
}

impl BufferPool {
    fn new(rect: Rect) -> BufferPool {
        BufferPool { rect, free: vec![] }
    }

    fn get(&mut self) -> Canvas {
        match self.free.pop() {
            Some(mut canvas) => {
                canvas.clear();
                canvas
            }
            None => Canvas::new(self.rect),
        }
    }

    fn put(&mut self, canvas: Canvas) {
        if canvas.rect() == self.rect {
            self.free.push(canvas);
        }
    }
}

/// Renders sub trees into caller provided canvases; owns the folder cache
/// and the working buffer pool. Not shared between concurrent renders.
#[derive(Debug)]
pub(crate) struct Renderer {
    cache: HashMap<i32, CacheEntry>,
    pool: BufferPool,
}

impl Renderer {
    pub(crate) fn new(canvas_rect: Rect) -> Renderer {
        Renderer {
            cache: HashMap::new(),
            pool: BufferPool::new(canvas_rect),
        }
    }

    /// Mark one cached composite stale. The tree walks the ancestor chain
    /// and calls this per sequence id on it.
    pub(crate) fn mark_dirty(&mut self, seq_id: i32) {
        if let Some(entry) = self.cache.get_mut(&seq_id) {
            entry.dirty = true;
        }
    }

    /// Composite the sub tree rooted at `from` into `dst`, restricted to
    /// `rect`. The region is cleared first; previous destination content
    /// does not bleed into the composite.
    pub(crate) fn render(
        &mut self,
        view: &TreeView<'_>,
        dst: &mut Canvas,
        rect: &Rect,
        from: LayerId,
        opaque: bool,
    ) {
        let rect = dst.rect().intersect(rect);
        if rect.is_empty() {
            return;
        }

        dst.clear_rect(&rect);

        if from.0 == 0 {
            self.composite_children(view, from, &rect, dst);
        } else {
            self.draw_layer(view, from, &rect, dst);
        }

        if opaque {
            dst.force_opaque(&rect);
        }
    }

    /// Blend `parent`'s children into `dst` bottom to top. Invisible
    /// layers are skipped; clipped layers are drawn when their base is.
    fn composite_children(
        &mut self,
        view: &TreeView<'_>,
        parent: LayerId,
        rect: &Rect,
        dst: &mut Canvas,
    ) {
        let children = view.nodes[parent.0].children.clone();
        for child in children {
            let layer = &view.nodes[child.0];
            if !layer.visible || layer.clipped_by.is_some() {
                continue;
            }
            self.draw_layer(view, child, rect, dst);
        }
    }

    fn draw_layer(&mut self, view: &TreeView<'_>, id: LayerId, rect: &Rect, dst: &mut Canvas) {
        let layer = &view.nodes[id.0];

        if !layer.clip.is_empty() {
            self.draw_clip_group(view, id, rect, dst);
        } else if layer.folder {
            self.draw_folder(view, id, rect, dst);
        } else {
            self.draw_pixels(view, id, rect, dst, layer.blend_mode, layer.opacity);
        }
    }

    /// Composite a folder. Pass through folders spill their children
    /// straight into the parent buffer; any other mode isolates the
    /// children in a cached group buffer first and blends that.
    fn draw_folder(&mut self, view: &TreeView<'_>, id: LayerId, rect: &Rect, dst: &mut Canvas) {
        let layer = &view.nodes[id.0];
        if layer.children.is_empty() {
            return;
        }

        if layer.blend_mode == BlendMode::PassThrough {
            // No isolation: children see the backdrop, and the composite
            // depends on it, so there is nothing cacheable here.
            self.composite_children(view, id, rect, dst);
            return;
        }

        let r = rect.intersect(&layer.rect);
        if r.is_empty() {
            return;
        }

        let seq_id = layer.seq_id;
        self.ensure_folder_cache(view, id, &r);

        let layer = &view.nodes[id.0];
        let mask = mask_for(view, layer.seq_id, layer.mask_enabled);
        if let Some(entry) = self.cache.get(&seq_id) {
            blend::draw_with_mask(
                layer.blend_mode,
                dst,
                &r,
                &entry.canvas,
                (r.left, r.top),
                layer.opacity,
                mask,
            );
        }
    }

    /// Make sure the cache holds `id`'s composite covering `r`, filling
    /// it from the folder's children when it is missing, stale or too
    /// small. Clip-group bases go through here too, so every folder with
    /// children has a cache entry that `mark_dirty` can invalidate.
    fn ensure_folder_cache(&mut self, view: &TreeView<'_>, id: LayerId, r: &Rect) {
        if view.nodes[id.0].children.is_empty() {
            return;
        }

        let seq_id = view.nodes[id.0].seq_id;
        let cached = self
            .cache
            .get(&seq_id)
            .map_or(false, |entry| !entry.dirty && entry.rect.contains_rect(r));
        if cached {
            return;
        }

        let mut buf = self.pool.get();
        self.composite_children(view, id, r, &mut buf);
        if let Some(old) = self.cache.insert(
            seq_id,
            CacheEntry {
                canvas: buf,
                rect: *r,
                dirty: false,
            },
        ) {
            self.pool.put(old.canvas);
        }
    }

    /// Blend one pixel layer's tiles into `dst`.
    fn draw_pixels(
        &mut self,
        view: &TreeView<'_>,
        id: LayerId,
        rect: &Rect,
        dst: &mut Canvas,
        mode: BlendMode,
        opacity: u8,
    ) {
        let layer = &view.nodes[id.0];
        let image = match view.layer_images.get(&layer.seq_id).and_then(|li| li.image.as_ref()) {
            Some(image) => image,
            None => return,
        };

        let r = rect.intersect(&image.rect());
        if r.is_empty() {
            return;
        }

        let mask = mask_for(view, layer.seq_id, layer.mask_enabled);
        blend::draw_with_mask(mode, dst, &r, image, (r.left, r.top), opacity, mask);
    }

    /// Composite a clipping group: the base plus the layers clipped to it.
    ///
    /// The members composite onto a transparent buffer with their own
    /// blend modes, then the buffer's alpha is replaced by the base's
    /// alpha (copied, or element wise min when the folder attribute asks
    /// for unblended clipped elements). The result blends into the parent
    /// with the base's mode, opacity and mask.
    fn draw_clip_group(&mut self, view: &TreeView<'_>, base_id: LayerId, rect: &Rect, dst: &mut Canvas) {
        let base = &view.nodes[base_id.0];
        let r = rect.intersect(&base.rect);
        if r.is_empty() {
            return;
        }

        let mut buf = self.pool.get();

        // The base's own opacity and mask apply to the whole group at the
        // end, so its content lands here unmodified. A folder base fills
        // its regular cache entry first and is copied out of it.
        if base.folder {
            self.ensure_folder_cache(view, base_id, &r);
            if let Some(entry) = self.cache.get(&base.seq_id) {
                blend::draw(BlendMode::Normal, &mut buf, &r, &entry.canvas, (r.left, r.top));
            }
        } else if let Some(image) = view
            .layer_images
            .get(&base.seq_id)
            .and_then(|li| li.image.as_ref())
        {
            blend::draw(BlendMode::Normal, &mut buf, &r, image, (r.left, r.top));
        }

        let base_alpha = snapshot_alpha(&buf, &r);

        let clip = view.nodes[base_id.0].clip.clone();
        for member in clip {
            if view.nodes[member.0].visible {
                self.draw_layer(view, member, &r, &mut buf);
            }
        }

        let base = &view.nodes[base_id.0];
        restore_alpha(&mut buf, &r, &base_alpha, base.blend_clipped_elements);

        let mode = match base.blend_mode {
            BlendMode::PassThrough => BlendMode::Normal,
            mode => mode,
        };
        let mask = mask_for(view, base.seq_id, base.mask_enabled);
        blend::draw_with_mask(mode, dst, &r, &buf, (r.left, r.top), base.opacity, mask);

        self.pool.put(buf);
    }
}

fn mask_for<'a>(
    view: &'a TreeView<'_>,
    seq_id: i32,
    mask_enabled: bool,
) -> Option<&'a dyn CoverageSource> {
    if !mask_enabled {
        return None;
    }
    view.layer_images
        .get(&seq_id)
        .and_then(|li| li.mask.as_ref())
        .map(|mask| mask as &dyn CoverageSource)
}

fn snapshot_alpha(buf: &Canvas, rect: &Rect) -> Vec<u8> {
    let mut alpha = Vec::with_capacity(rect.width() as usize * rect.height() as usize);
    for y in rect.top..rect.bottom {
        for x in rect.left..rect.right {
            let at = buf.offset_of(x, y);
            alpha.push(buf.data()[at + 3]);
        }
    }
    alpha
}

/// Put the base's alpha back after the clip members blended over it.
fn restore_alpha(buf: &mut Canvas, rect: &Rect, base_alpha: &[u8], blend_clipped_elements: bool) {
    let mut idx = 0;
    for y in rect.top..rect.bottom {
        for x in rect.left..rect.right {
            let at = buf.offset_of(x, y);
            let data = buf.data_mut();
            data[at + 3] = if blend_clipped_elements {
                base_alpha[idx]
            } else {
                data[at + 3].min(base_alpha[idx])
            };
            idx += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_recycles_buffers() {
        let rect = Rect::new(0, 0, 8, 8);
        let mut pool = BufferPool::new(rect);

        let mut first = pool.get();
        first.put_pixel(1, 1, [1, 2, 3, 4]);
        pool.put(first);

        let reused = pool.get();
        assert_eq!(reused.rect(), rect);
        // Reused buffers come back cleared.
        assert!(reused.data().iter().all(|byte| *byte == 0));
    }

    #[test]
    fn foreign_sized_buffers_are_dropped() {
        let mut pool = BufferPool::new(Rect::new(0, 0, 8, 8));
        pool.put(Canvas::new(Rect::new(0, 0, 2, 2)));
        assert!(pool.free.is_empty());
    }
}
