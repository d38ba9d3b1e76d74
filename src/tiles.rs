//! Fixed size square tiles holding a layer's pixels or mask.
//!
//! A layer's decoded channels are resampled into tiles once, during load or
//! transform. Tiles are immutable afterwards and shared between tree clones
//! by reference, so cloning a tree never copies pixel data.

use std::collections::HashMap;
use std::sync::Arc;

use crate::canvas::{CoverageSource, PixelSource};
use crate::gamma::GammaTable;
use crate::geom::{transform_rect, Rect, Transform};
use crate::parallel::CancelToken;
use crate::Error;

/// The tile edge length used when the caller does not pick one.
pub const DEFAULT_TILE_SIZE: i32 = 64;

/// Raw, row major channel planes covering a layer's rectangle.
///
/// A missing alpha plane means the layer is fully opaque.
pub struct ChannelData<'a> {
    /// Red plane
    pub red: &'a [u8],
    /// Green plane
    pub green: &'a [u8],
    /// Blue plane
    pub blue: &'a [u8],
    /// Transparency plane, if the layer has one
    pub alpha: Option<&'a [u8]>,
}

/// A layer's RGBA pixels split into square tiles in canvas space.
///
/// Tiles exist only where they intersect the layer rectangle; reads outside
/// any tile are transparent.
#[derive(Debug, Clone)]
pub struct TiledImage {
    rect: Rect,
    tile_size: i32,
    tiles: HashMap<(i32, i32), Arc<[u8]>>,
}

/// A layer's 8 bit mask split into square tiles in canvas space.
///
/// Reads outside the mask rectangle return the mask's default color, which
/// is how Photoshop treats pixels the mask channel does not cover.
#[derive(Debug, Clone)]
pub struct TiledMask {
    rect: Rect,
    tile_size: i32,
    default_color: u8,
    tiles: HashMap<(i32, i32), Arc<[u8]>>,
}

fn tile_origin(v: i32, tile_size: i32) -> i32 {
    v.div_euclid(tile_size) * tile_size
}

/// Visit every tile origin whose tile intersects `rect`.
fn for_each_tile_origin(
    rect: &Rect,
    tile_size: i32,
    mut f: impl FnMut(i32, i32) -> Result<(), Error>,
) -> Result<(), Error> {
    if rect.is_empty() {
        return Ok(());
    }
    let mut ty = tile_origin(rect.top, tile_size);
    while ty < rect.bottom {
        let mut tx = tile_origin(rect.left, tile_size);
        while tx < rect.right {
            f(tx, ty)?;
            tx += tile_size;
        }
        ty += tile_size;
    }
    Ok(())
}

/// Read a channel tap in source canvas coordinates, `fallback` outside.
fn tap(channel: &[u8], rect: &Rect, x: i64, y: i64, fallback: u8) -> u8 {
    if x < rect.left as i64 || x >= rect.right as i64 || y < rect.top as i64 || y >= rect.bottom as i64
    {
        return fallback;
    }
    let col = (x - rect.left as i64) as usize;
    let row = (y - rect.top as i64) as usize;
    channel[row * rect.width() as usize + col]
}

struct Bilinear {
    x0: i64,
    y0: i64,
    weights: [f32; 4],
}

/// Tap positions and weights for a destination pixel center back projected
/// to `(sx, sy)` in source space.
fn bilinear(sx: f64, sy: f64) -> Bilinear {
    let fx = sx - 0.5;
    let fy = sy - 0.5;
    let x0 = fx.floor();
    let y0 = fy.floor();
    let tx = (fx - x0) as f32;
    let ty = (fy - y0) as f32;

    Bilinear {
        x0: x0 as i64,
        y0: y0 as i64,
        weights: [
            (1. - tx) * (1. - ty),
            tx * (1. - ty),
            (1. - tx) * ty,
            tx * ty,
        ],
    }
}

impl Bilinear {
    /// Filter one channel; color channels pass the gamma table so the
    /// interpolation happens on linearized values.
    fn sample(
        &self,
        channel: &[u8],
        rect: &Rect,
        fallback: u8,
        gamma: Option<&GammaTable>,
    ) -> u8 {
        let taps = [
            tap(channel, rect, self.x0, self.y0, fallback),
            tap(channel, rect, self.x0 + 1, self.y0, fallback),
            tap(channel, rect, self.x0, self.y0 + 1, fallback),
            tap(channel, rect, self.x0 + 1, self.y0 + 1, fallback),
        ];

        match gamma {
            Some(table) => {
                let mut acc = 0.0f32;
                for (value, weight) in taps.iter().zip(self.weights.iter()) {
                    acc += table.linearize(*value) * weight;
                }
                table.delinearize(acc)
            }
            None => {
                let mut acc = 0.0f32;
                for (value, weight) in taps.iter().zip(self.weights.iter()) {
                    acc += *value as f32 * weight;
                }
                (acc + 0.5).max(0.).min(255.) as u8
            }
        }
    }
}

impl TiledImage {
    /// Resample decoded layer channels into tiles under `transform`.
    ///
    /// Identity and whole pixel translations copy samples directly;
    /// anything else back projects each destination pixel through the
    /// inverse transform and filters bilinearly. When a gamma table is
    /// supplied, color channels are filtered on linearized values.
    pub(crate) fn build(
        tile_size: i32,
        src_rect: Rect,
        channels: &ChannelData<'_>,
        transform: &Transform,
        gamma: Option<&GammaTable>,
        cancel: &CancelToken,
    ) -> Result<TiledImage, Error> {
        if src_rect.is_empty() {
            return Ok(TiledImage {
                rect: Rect::zero(),
                tile_size,
                tiles: HashMap::new(),
            });
        }

        let expected = src_rect.width() as usize * src_rect.height() as usize;
        for (name, plane) in [
            ("red", Some(channels.red)),
            ("green", Some(channels.green)),
            ("blue", Some(channels.blue)),
            ("alpha", channels.alpha),
        ] {
            if let Some(plane) = plane {
                if plane.len() != expected {
                    return Err(Error::TileBuild(format!(
                        "{} plane holds {} bytes, layer rect needs {}",
                        name,
                        plane.len(),
                        expected
                    )));
                }
            }
        }

        if transform.is_integer_translate() {
            return Self::build_translated(tile_size, src_rect, channels, transform, cancel);
        }

        let dest_rect = transform_rect(&src_rect, transform);
        let inverse = transform.invert().ok_or(Error::InvalidTransform)?;

        let mut tiles = HashMap::new();
        for_each_tile_origin(&dest_rect, tile_size, |tx, ty| {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let tile_rect = Rect::from_size(tx, ty, tile_size, tile_size);
            let r = tile_rect.intersect(&dest_rect);
            let mut buf = vec![0u8; (tile_size * tile_size) as usize * 4];

            for y in r.top..r.bottom {
                for x in r.left..r.right {
                    let (sx, sy) = inverse.map(x as f64 + 0.5, y as f64 + 0.5);
                    let filter = bilinear(sx, sy);

                    let alpha = match channels.alpha {
                        Some(plane) => filter.sample(plane, &src_rect, 0, None),
                        // No alpha plane: opaque inside, transparent outside.
                        None => opaque_coverage(&filter, &src_rect),
                    };
                    if alpha == 0 {
                        continue;
                    }

                    let at = (((y - ty) * tile_size + (x - tx)) * 4) as usize;
                    buf[at] = filter.sample(channels.red, &src_rect, 0, gamma);
                    buf[at + 1] = filter.sample(channels.green, &src_rect, 0, gamma);
                    buf[at + 2] = filter.sample(channels.blue, &src_rect, 0, gamma);
                    buf[at + 3] = alpha;
                }
            }

            tiles.insert((tx, ty), Arc::from(buf.into_boxed_slice()));
            Ok(())
        })?;

        Ok(TiledImage {
            rect: dest_rect,
            tile_size,
            tiles,
        })
    }

    fn build_translated(
        tile_size: i32,
        src_rect: Rect,
        channels: &ChannelData<'_>,
        transform: &Transform,
        cancel: &CancelToken,
    ) -> Result<TiledImage, Error> {
        let rect = src_rect.translate(transform.tx as i32, transform.ty as i32);
        let width = src_rect.width() as usize;

        let mut tiles = HashMap::new();
        for_each_tile_origin(&rect, tile_size, |tx, ty| {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let tile_rect = Rect::from_size(tx, ty, tile_size, tile_size);
            let r = tile_rect.intersect(&rect);
            let mut buf = vec![0u8; (tile_size * tile_size) as usize * 4];

            for y in r.top..r.bottom {
                let src_row = (y - rect.top) as usize;
                for x in r.left..r.right {
                    let src_idx = src_row * width + (x - rect.left) as usize;
                    let at = (((y - ty) * tile_size + (x - tx)) * 4) as usize;
                    buf[at] = channels.red[src_idx];
                    buf[at + 1] = channels.green[src_idx];
                    buf[at + 2] = channels.blue[src_idx];
                    buf[at + 3] = channels.alpha.map_or(255, |plane| plane[src_idx]);
                }
            }

            tiles.insert((tx, ty), Arc::from(buf.into_boxed_slice()));
            Ok(())
        })?;

        Ok(TiledImage {
            rect,
            tile_size,
            tiles,
        })
    }

    /// The canvas space rectangle the tiles cover.
    pub fn rect(&self) -> Rect {
        self.rect
    }

    /// The edge length of every tile.
    pub fn tile_size(&self) -> i32 {
        self.tile_size
    }

    /// The tile buffer anchored at `origin`, if it exists.
    pub fn tile_at(&self, origin: (i32, i32)) -> Option<&Arc<[u8]>> {
        self.tiles.get(&origin)
    }

    /// Origins of every populated tile.
    pub fn tile_origins(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.tiles.keys().copied()
    }

    /// Flatten the tiles back into row major channel planes over `rect()`.
    ///
    /// This is the input format the builders take, used when a tree is
    /// re-tiled under a new transform.
    pub(crate) fn to_channels(&self) -> (Vec<u8>, Vec<u8>, Vec<u8>, Vec<u8>) {
        let len = self.rect.width() as usize * self.rect.height() as usize;
        let mut red = vec![0u8; len];
        let mut green = vec![0u8; len];
        let mut blue = vec![0u8; len];
        let mut alpha = vec![0u8; len];

        let mut idx = 0;
        for y in self.rect.top..self.rect.bottom {
            for x in self.rect.left..self.rect.right {
                let pixel = self.pixel(x, y);
                red[idx] = pixel[0];
                green[idx] = pixel[1];
                blue[idx] = pixel[2];
                alpha[idx] = pixel[3];
                idx += 1;
            }
        }

        (red, green, blue, alpha)
    }
}

/// Coverage for a layer without an alpha plane: each tap is opaque inside
/// the layer rect and transparent outside, filtered like any channel.
fn opaque_coverage(filter: &Bilinear, rect: &Rect) -> u8 {
    let inside = |x: i64, y: i64| -> f32 {
        if x >= rect.left as i64 && x < rect.right as i64 && y >= rect.top as i64 && y < rect.bottom as i64
        {
            255.
        } else {
            0.
        }
    };
    let acc = inside(filter.x0, filter.y0) * filter.weights[0]
        + inside(filter.x0 + 1, filter.y0) * filter.weights[1]
        + inside(filter.x0, filter.y0 + 1) * filter.weights[2]
        + inside(filter.x0 + 1, filter.y0 + 1) * filter.weights[3];
    (acc + 0.5).max(0.).min(255.) as u8
}

impl PixelSource for TiledImage {
    fn pixel(&self, x: i32, y: i32) -> [u8; 4] {
        if !self.rect.contains(x, y) {
            return [0; 4];
        }
        let origin = (tile_origin(x, self.tile_size), tile_origin(y, self.tile_size));
        match self.tiles.get(&origin) {
            Some(tile) => {
                let at = (((y - origin.1) * self.tile_size + (x - origin.0)) * 4) as usize;
                [tile[at], tile[at + 1], tile[at + 2], tile[at + 3]]
            }
            None => [0; 4],
        }
    }
}

impl TiledMask {
    /// Resample a decoded mask channel into tiles under `transform`.
    ///
    /// Taps outside the mask rectangle read as `default_color`, matching
    /// how the mask behaves for layer pixels it does not cover.
    pub(crate) fn build(
        tile_size: i32,
        src_rect: Rect,
        channel: &[u8],
        default_color: u8,
        transform: &Transform,
        cancel: &CancelToken,
    ) -> Result<TiledMask, Error> {
        if src_rect.is_empty() {
            return Ok(TiledMask {
                rect: Rect::zero(),
                tile_size,
                default_color,
                tiles: HashMap::new(),
            });
        }

        let expected = src_rect.width() as usize * src_rect.height() as usize;
        if channel.len() != expected {
            return Err(Error::TileBuild(format!(
                "mask plane holds {} bytes, mask rect needs {}",
                channel.len(),
                expected
            )));
        }

        let (rect, inverse) = if transform.is_integer_translate() {
            (
                src_rect.translate(transform.tx as i32, transform.ty as i32),
                None,
            )
        } else {
            (
                transform_rect(&src_rect, transform),
                Some(transform.invert().ok_or(Error::InvalidTransform)?),
            )
        };

        let mut tiles = HashMap::new();
        for_each_tile_origin(&rect, tile_size, |tx, ty| {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let tile_rect = Rect::from_size(tx, ty, tile_size, tile_size);
            let r = tile_rect.intersect(&rect);
            let mut buf = vec![default_color; (tile_size * tile_size) as usize];

            for y in r.top..r.bottom {
                for x in r.left..r.right {
                    let at = ((y - ty) * tile_size + (x - tx)) as usize;
                    buf[at] = match &inverse {
                        Some(inverse) => {
                            let (sx, sy) = inverse.map(x as f64 + 0.5, y as f64 + 0.5);
                            bilinear(sx, sy).sample(channel, &src_rect, default_color, None)
                        }
                        None => {
                            let src_idx = (y - rect.top) as usize * src_rect.width() as usize
                                + (x - rect.left) as usize;
                            channel[src_idx]
                        }
                    };
                }
            }

            tiles.insert((tx, ty), Arc::from(buf.into_boxed_slice()));
            Ok(())
        })?;

        Ok(TiledMask {
            rect,
            tile_size,
            default_color,
            tiles,
        })
    }

    /// The canvas space rectangle the mask channel covers.
    pub fn rect(&self) -> Rect {
        self.rect
    }

    /// The value read for pixels the mask channel does not cover.
    pub fn default_color(&self) -> u8 {
        self.default_color
    }

    /// Flatten the tiles back into a row major plane over `rect()`.
    pub(crate) fn to_channel(&self) -> Vec<u8> {
        let len = self.rect.width() as usize * self.rect.height() as usize;
        let mut plane = vec![0u8; len];
        let mut idx = 0;
        for y in self.rect.top..self.rect.bottom {
            for x in self.rect.left..self.rect.right {
                plane[idx] = self.coverage(x, y);
                idx += 1;
            }
        }
        plane
    }
}

impl CoverageSource for TiledMask {
    fn coverage(&self, x: i32, y: i32) -> u8 {
        if !self.rect.contains(x, y) {
            return self.default_color;
        }
        let origin = (tile_origin(x, self.tile_size), tile_origin(y, self.tile_size));
        match self.tiles.get(&origin) {
            Some(tile) => tile[((y - origin.1) * self.tile_size + (x - origin.0)) as usize],
            None => self.default_color,
        }
    }
}
