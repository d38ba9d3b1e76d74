//! Photoshop blend modes over straight 8 bit RGBA.
//!
//! Every mode mixes the source ("blend") color against the backdrop with
//! its `B(Cb, Cs)` function and then alpha composites the result with
//! Porter-Duff source over:
//!
//! `Cs' = (1 - ab) x Cs + ab x B(Cb, Cs)`
//! `co = Cs' x as + Cb x ab x (1 - as)`
//! `ao = as + ab x (1 - as)`
//! `Co = co / ao`
//!
//! Separable modes run per channel; Hue, Saturation, Color and Luminosity
//! (and the darker/lighter color picks) operate on whole RGB triples in
//! Photoshop's luma preserving HSL space.
//!
//! See https://www.w3.org/TR/compositing-1/ and
//! https://helpx.adobe.com/photoshop/using/blending-modes.html

use crate::canvas::{Canvas, CoverageSource, PixelSource};
use crate::geom::Rect;

/// A layer's blend mode.
///
/// `PassThrough` only ever appears on folders: a pass through folder does
/// not isolate its children, so the renderer composites them directly into
/// the parent buffer and this mode never reaches the pixel kernels.
///
/// The wire encoding is Photoshop's 4 byte blend key:
/// 'pass' = pass through, 'norm' = normal, 'dark' = darken,
/// 'mul ' = multiply, 'idiv' = color burn, 'lbrn' = linear burn,
/// 'dkCl' = darker color, 'lite' = lighten, 'scrn' = screen,
/// 'div ' = color dodge, 'lddg' = linear dodge, 'lgCl' = lighter color,
/// 'over' = overlay, 'sLit' = soft light, 'hLit' = hard light,
/// 'vLit' = vivid light, 'lLit' = linear light, 'pLit' = pin light,
/// 'hMix' = hard mix, 'diff' = difference, 'smud' = exclusion,
/// 'fsub' = subtract, 'fdiv' = divide, 'hue ' = hue, 'sat ' = saturation,
/// 'colr' = color, 'lum ' = luminosity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum BlendMode {
    PassThrough,
    Normal,
    Darken,
    Multiply,
    ColorBurn,
    LinearBurn,
    DarkerColor,
    Lighten,
    Screen,
    ColorDodge,
    LinearDodge,
    LighterColor,
    Overlay,
    SoftLight,
    HardLight,
    LinearLight,
    VividLight,
    PinLight,
    HardMix,
    Difference,
    Exclusion,
    Subtract,
    Divide,
    Hue,
    Saturation,
    Color,
    Luminosity,
}

impl BlendMode {
    /// Map a Photoshop blend key to its mode, `None` for unknown keys.
    pub fn from_key(key: [u8; 4]) -> Option<BlendMode> {
        match &key {
            b"pass" => Some(BlendMode::PassThrough),
            b"norm" => Some(BlendMode::Normal),
            b"dark" => Some(BlendMode::Darken),
            b"mul " => Some(BlendMode::Multiply),
            b"idiv" => Some(BlendMode::ColorBurn),
            b"lbrn" => Some(BlendMode::LinearBurn),
            b"dkCl" => Some(BlendMode::DarkerColor),
            b"lite" => Some(BlendMode::Lighten),
            b"scrn" => Some(BlendMode::Screen),
            b"div " => Some(BlendMode::ColorDodge),
            b"lddg" => Some(BlendMode::LinearDodge),
            b"lgCl" => Some(BlendMode::LighterColor),
            b"over" => Some(BlendMode::Overlay),
            b"sLit" => Some(BlendMode::SoftLight),
            b"hLit" => Some(BlendMode::HardLight),
            b"vLit" => Some(BlendMode::VividLight),
            b"lLit" => Some(BlendMode::LinearLight),
            b"pLit" => Some(BlendMode::PinLight),
            b"hMix" => Some(BlendMode::HardMix),
            b"diff" => Some(BlendMode::Difference),
            b"smud" => Some(BlendMode::Exclusion),
            b"fsub" => Some(BlendMode::Subtract),
            b"fdiv" => Some(BlendMode::Divide),
            b"hue " => Some(BlendMode::Hue),
            b"sat " => Some(BlendMode::Saturation),
            b"colr" => Some(BlendMode::Color),
            b"lum " => Some(BlendMode::Luminosity),
            _ => None,
        }
    }
}

pub(crate) type Pixel = [u8; 4];

type Rgb = [f32; 3];

/// Mix the backdrop and source colors with the mode's `B(Cb, Cs)`.
fn mix(mode: BlendMode, cb: Rgb, cs: Rgb) -> Rgb {
    // Modes are sorted like in the Photoshop UI
    let f: fn(f32, f32) -> f32 = match mode {
        // Folders only; the renderer composites children directly instead
        // of sending a pass through folder to the kernels.
        BlendMode::PassThrough => normal,
        BlendMode::Normal => normal,
        // --------------------------------------
        BlendMode::Darken => darken,
        BlendMode::Multiply => multiply,
        BlendMode::ColorBurn => color_burn,
        BlendMode::LinearBurn => linear_burn,
        BlendMode::DarkerColor => return darker_color(cb, cs),
        // --------------------------------------
        BlendMode::Lighten => lighten,
        BlendMode::Screen => screen,
        BlendMode::ColorDodge => color_dodge,
        BlendMode::LinearDodge => linear_dodge,
        BlendMode::LighterColor => return lighter_color(cb, cs),
        // --------------------------------------
        BlendMode::Overlay => overlay,
        BlendMode::SoftLight => soft_light,
        BlendMode::HardLight => hard_light,
        BlendMode::VividLight => vivid_light,
        BlendMode::LinearLight => linear_light,
        BlendMode::PinLight => pin_light,
        BlendMode::HardMix => hard_mix,
        // --------------------------------------
        BlendMode::Difference => difference,
        BlendMode::Exclusion => exclusion,
        BlendMode::Subtract => subtract,
        BlendMode::Divide => divide,
        // --------------------------------------
        BlendMode::Hue => return hue(cb, cs),
        BlendMode::Saturation => return saturation(cb, cs),
        BlendMode::Color => return color(cb, cs),
        BlendMode::Luminosity => return luminosity(cb, cs),
    };

    [f(cb[0], cs[0]), f(cb[1], cs[1]), f(cb[2], cs[2])]
}

/// Blend `top` over `bottom` and write the composite into `out`.
pub(crate) fn blend_pixel(mode: BlendMode, bottom: Pixel, top: Pixel, out: &mut Pixel) {
    if top[3] == 0 {
        *out = bottom;
        return;
    }

    let alpha_s = top[3] as f32 / 255.;
    let alpha_b = bottom[3] as f32 / 255.;
    let alpha_o = alpha_s + alpha_b * (1. - alpha_s);

    let cs = [
        top[0] as f32 / 255.,
        top[1] as f32 / 255.,
        top[2] as f32 / 255.,
    ];
    let cb = [
        bottom[0] as f32 / 255.,
        bottom[1] as f32 / 255.,
        bottom[2] as f32 / 255.,
    ];

    let mixed = mix(mode, cb, cs);

    for i in 0..3 {
        // The mixing function only applies where the backdrop has coverage.
        let cr = (1. - alpha_b) * cs[i] + alpha_b * mixed[i];
        let co = cr * alpha_s + cb[i] * alpha_b * (1. - alpha_s);
        out[i] = ((co / alpha_o).max(0.).min(1.) * 255. + 0.5) as u8;
    }
    out[3] = (alpha_o * 255. + 0.5) as u8;
}

/// Multiply the pixel's alpha by `opacity`.
pub(crate) fn apply_opacity(pixel: &mut Pixel, opacity: u8) {
    if opacity == 255 {
        return;
    }
    pixel[3] = ((pixel[3] as u16 * opacity as u16 + 127) / 255) as u8;
}

/// Write `src` blended into `dst` inside `rect`.
///
/// `src_origin` is the source position read for the top left corner of
/// `rect`; the rest of the region follows row by row.
pub(crate) fn draw(
    mode: BlendMode,
    dst: &mut Canvas,
    rect: &Rect,
    src: &dyn PixelSource,
    src_origin: (i32, i32),
) {
    draw_with_mask(mode, dst, rect, src, src_origin, 255, None)
}

/// Like [`draw`], with the source alpha further multiplied by `opacity`
/// and an optional 8 bit mask.
pub(crate) fn draw_with_mask(
    mode: BlendMode,
    dst: &mut Canvas,
    rect: &Rect,
    src: &dyn PixelSource,
    src_origin: (i32, i32),
    opacity: u8,
    mask: Option<&dyn CoverageSource>,
) {
    let r = dst.rect().intersect(rect);
    if r.is_empty() || opacity == 0 {
        return;
    }

    let dx = src_origin.0 - rect.left;
    let dy = src_origin.1 - rect.top;

    for y in r.top..r.bottom {
        for x in r.left..r.right {
            let mut top = src.pixel(x + dx, y + dy);
            if let Some(mask) = mask {
                let coverage = mask.coverage(x + dx, y + dy);
                top[3] = ((top[3] as u16 * coverage as u16 + 127) / 255) as u8;
            }
            apply_opacity(&mut top, opacity);
            if top[3] == 0 {
                continue;
            }

            let at = dst.offset_of(x, y);
            let data = dst.data_mut();
            let bottom = [data[at], data[at + 1], data[at + 2], data[at + 3]];
            let mut out = [0; 4];
            blend_pixel(mode, bottom, top, &mut out);
            data[at..at + 4].copy_from_slice(&out);
        }
    }
}

// Separable modes. Each takes the backdrop and source channel on 0..1 and
// returns the mixed channel.

/// https://www.w3.org/TR/compositing-1/#blendingnormal
///
/// `B(Cb, Cs) = Cs`
#[inline(always)]
fn normal(_color_b: f32, color_s: f32) -> f32 {
    color_s
}

/// https://www.w3.org/TR/compositing-1/#blendingdarken
/// Selects the darker of the backdrop and source colors.
///
/// `B(Cb, Cs) = min(Cb, Cs)`
#[inline(always)]
fn darken(color_b: f32, color_s: f32) -> f32 {
    color_b.min(color_s)
}

/// https://www.w3.org/TR/compositing-1/#blendingmultiply
/// The result is always at least as dark as either input; multiplying with
/// black gives black, multiplying with white preserves the backdrop.
///
/// `B(Cb, Cs) = Cb x Cs`
#[inline(always)]
fn multiply(color_b: f32, color_s: f32) -> f32 {
    color_b * color_s
}

/// https://www.w3.org/TR/compositing-1/#blendingcolorburn
///
/// Darkens the backdrop to reflect the source. Painting with white produces
/// no change.
///
/// ```text
/// if(Cb == 1)
///     B(Cb, Cs) = 1
/// else if(Cs == 0)
///     B(Cb, Cs) = 0
/// else
///     B(Cb, Cs) = 1 - min(1, (1 - Cb) / Cs)
/// ```
#[inline(always)]
fn color_burn(color_b: f32, color_s: f32) -> f32 {
    if color_b >= 1. {
        1.
    } else if color_s <= 0. {
        0.
    } else {
        1. - ((1. - color_b) / color_s).min(1.)
    }
}

/// See: http://www.simplefilter.de/en/basics/mixmods.html
///
/// Tonal values of fore- and background that sum to less than 1 become
/// pure black.
///
/// `B(Cb, Cs) = max(0, Cb + Cs - 1)`
#[inline(always)]
fn linear_burn(color_b: f32, color_s: f32) -> f32 {
    (color_b + color_s - 1.).max(0.)
}

/// https://www.w3.org/TR/compositing-1/#blendinglighten
/// Selects the lighter of the backdrop and source colors.
///
/// `B(Cb, Cs) = max(Cb, Cs)`
#[inline(always)]
fn lighten(color_b: f32, color_s: f32) -> f32 {
    color_b.max(color_s)
}

/// https://www.w3.org/TR/compositing-1/#blendingscreen
/// Screening with white produces white; screening with black leaves the
/// backdrop unchanged.
///
/// `B(Cb, Cs) = 1 - [(1 - Cb) x (1 - Cs)] = Cb + Cs - (Cb x Cs)`
#[inline(always)]
fn screen(color_b: f32, color_s: f32) -> f32 {
    color_b + color_s - (color_b * color_s)
}

/// https://www.w3.org/TR/compositing-1/#blendingcolordodge
///
/// Brightens the backdrop to reflect the source. Painting with black
/// produces no change.
///
/// ```text
/// if(Cb == 0)
///     B(Cb, Cs) = 0
/// else if(Cs == 1)
///     B(Cb, Cs) = 1
/// else
///     B(Cb, Cs) = min(1, Cb / (1 - Cs))
/// ```
#[inline(always)]
fn color_dodge(color_b: f32, color_s: f32) -> f32 {
    if color_b <= 0. {
        0.
    } else if color_s >= 1. {
        1.
    } else {
        (color_b / (1. - color_s)).min(1.)
    }
}

/// See: http://www.simplefilter.de/en/basics/mixmods.html
///
/// Adds the tonal values of fore- and background. Photoshop's Add.
///
/// `B(Cb, Cs) = min(1, Cb + Cs)`
#[inline(always)]
fn linear_dodge(color_b: f32, color_s: f32) -> f32 {
    (color_b + color_s).min(1.)
}

/// https://www.w3.org/TR/compositing-1/#blendingoverlay
/// Multiplies or screens, depending on the backdrop value.
///
/// `B(Cb, Cs) = HardLight(Cs, Cb)`
#[inline(always)]
fn overlay(color_b: f32, color_s: f32) -> f32 {
    hard_light(color_s, color_b)
}

/// https://www.w3.org/TR/compositing-1/#blendingsoftlight
///
/// Darkens or lightens, depending on the source value, like a diffused
/// spotlight on the backdrop.
///
/// ```text
/// if(Cs <= 0.5)
///     B(Cb, Cs) = Cb - (1 - 2 x Cs) x Cb x (1 - Cb)
/// else
///     B(Cb, Cs) = Cb + (2 x Cs - 1) x (D(Cb) - Cb)
/// ```
/// with
/// ```text
/// if(Cb <= 0.25)
///     D(Cb) = ((16 * Cb - 12) x Cb + 4) x Cb
/// else
///     D(Cb) = sqrt(Cb)
/// ```
///
/// Photoshop computes soft light with a slightly different D term, so this
/// mode can diverge from it by a small epsilon.
fn soft_light(color_b: f32, color_s: f32) -> f32 {
    let d = if color_b <= 0.25 {
        ((16. * color_b - 12.) * color_b + 4.) * color_b
    } else {
        color_b.sqrt()
    };

    if color_s <= 0.5 {
        color_b - (1. - 2. * color_s) * color_b * (1. - color_b)
    } else {
        color_b + (2. * color_s - 1.) * (d - color_b)
    }
}

/// https://www.w3.org/TR/compositing-1/#blendinghardlight
///
/// Multiplies or screens, depending on the source value, like a harsh
/// spotlight on the backdrop.
///
/// ```text
/// if(Cs <= 0.5)
///     B(Cb, Cs) = Multiply(Cb, 2 x Cs)
/// else
///     B(Cb, Cs) = Screen(Cb, 2 x Cs - 1)
/// ```
#[inline(always)]
fn hard_light(color_b: f32, color_s: f32) -> f32 {
    if color_s <= 0.5 {
        multiply(color_b, 2. * color_s)
    } else {
        screen(color_b, 2. * color_s - 1.)
    }
}

/// Burns or dodges by shifting brightness: linear burn for dark sources,
/// linear dodge for light ones.
///
/// `B(Cb, Cs) = clamp(Cb + 2 x Cs - 1)`
#[inline(always)]
fn linear_light(color_b: f32, color_s: f32) -> f32 {
    (color_b + 2. * color_s - 1.).max(0.).min(1.)
}

/// Burns or dodges by shifting contrast: color burn for dark sources,
/// color dodge for light ones.
///
/// ```text
/// if(Cs <= 0.5)
///     B(Cb, Cs) = ColorBurn(Cb, 2 x Cs)
/// else
///     B(Cb, Cs) = ColorDodge(Cb, 2 x Cs - 1)
/// ```
#[inline(always)]
fn vivid_light(color_b: f32, color_s: f32) -> f32 {
    if color_s <= 0.5 {
        color_burn(color_b, 2. * color_s)
    } else {
        color_dodge(color_b, 2. * color_s - 1.)
    }
}

/// Replaces the backdrop where it falls outside the range the source
/// allows: darken against `2 x Cs`, lighten against `2 x Cs - 1`.
#[inline(always)]
fn pin_light(color_b: f32, color_s: f32) -> f32 {
    if color_s <= 0.5 {
        darken(color_b, 2. * color_s)
    } else {
        lighten(color_b, 2. * color_s - 1.)
    }
}

/// Posterizes to the channel extremes: the sum of backdrop and source
/// either saturates or drops to black.
///
/// `B(Cb, Cs) = Cb + Cs < 1 ? 0 : 1`
#[inline(always)]
fn hard_mix(color_b: f32, color_s: f32) -> f32 {
    if color_b + color_s < 1. {
        0.
    } else {
        1.
    }
}

/// https://www.w3.org/TR/compositing-1/#blendingdifference
///
/// Painting with white inverts the backdrop; painting with black produces
/// no change.
///
/// `B(Cb, Cs) = | Cb - Cs |`
#[inline(always)]
fn difference(color_b: f32, color_s: f32) -> f32 {
    (color_b - color_s).abs()
}

/// https://www.w3.org/TR/compositing-1/#blendingexclusion
///
/// Similar to Difference but lower in contrast.
///
/// `B(Cb, Cs) = Cb + Cs - 2 x Cb x Cs`
#[inline(always)]
fn exclusion(color_b: f32, color_s: f32) -> f32 {
    color_b + color_s - 2. * color_b * color_s
}

/// https://helpx.adobe.com/photoshop/using/blending-modes.html
///
/// Subtracts the source from the backdrop; negative values clip to zero.
///
/// `B(Cb, Cs) = max(0, Cb - Cs)`
#[inline(always)]
fn subtract(color_b: f32, color_s: f32) -> f32 {
    (color_b - color_s).max(0.)
}

/// https://helpx.adobe.com/photoshop/using/blending-modes.html
///
/// Divides the backdrop by the source; results clip to the valid range.
///
/// `B(Cb, Cs) = Cb / Cs`
#[inline(always)]
fn divide(color_b: f32, color_s: f32) -> f32 {
    if color_s <= 0. {
        1.
    } else {
        (color_b / color_s).min(1.)
    }
}

// Non separable modes. Photoshop picks or rebuilds whole colors in a luma
// preserving HSL space rather than mixing channels independently.

const LUMA_R: f32 = 0.3;
const LUMA_G: f32 = 0.59;
const LUMA_B: f32 = 0.11;

#[inline(always)]
fn lum(c: Rgb) -> f32 {
    LUMA_R * c[0] + LUMA_G * c[1] + LUMA_B * c[2]
}

/// Clip a color back into gamut by desaturating toward its luma.
fn clip_color(c: Rgb) -> Rgb {
    let l = lum(c);
    let n = c[0].min(c[1]).min(c[2]);
    let x = c[0].max(c[1]).max(c[2]);

    let mut c = c;
    if n < 0. {
        for ch in c.iter_mut() {
            *ch = l + (*ch - l) * l / (l - n);
        }
    }
    if x > 1. {
        for ch in c.iter_mut() {
            *ch = l + (*ch - l) * (1. - l) / (x - l);
        }
    }
    c
}

/// Replace the luma of `c` with `l`, keeping hue and saturation.
fn set_lum(c: Rgb, l: f32) -> Rgb {
    let d = l - lum(c);
    clip_color([c[0] + d, c[1] + d, c[2] + d])
}

#[inline(always)]
fn sat(c: Rgb) -> f32 {
    c[0].max(c[1]).max(c[2]) - c[0].min(c[1]).min(c[2])
}

/// Replace the saturation of `c` with `s`, keeping hue.
fn set_sat(c: Rgb, s: f32) -> Rgb {
    // out[min] = 0, out[max] = s, the mid channel keeps its relative spot.
    let mut idx = [0usize, 1, 2];
    idx.sort_by(|&a, &b| c[a].partial_cmp(&c[b]).unwrap_or(std::cmp::Ordering::Equal));
    let (min, mid, max) = (idx[0], idx[1], idx[2]);

    let mut out = [0.; 3];
    if c[max] > c[min] {
        out[mid] = (c[mid] - c[min]) * s / (c[max] - c[min]);
        out[max] = s;
    }
    out
}

/// https://www.w3.org/TR/compositing-1/#blendinghue
///
/// The hue of the source with the saturation and luma of the backdrop.
fn hue(cb: Rgb, cs: Rgb) -> Rgb {
    set_lum(set_sat(cs, sat(cb)), lum(cb))
}

/// https://www.w3.org/TR/compositing-1/#blendingsaturation
///
/// The saturation of the source with the hue and luma of the backdrop.
fn saturation(cb: Rgb, cs: Rgb) -> Rgb {
    set_lum(set_sat(cb, sat(cs)), lum(cb))
}

/// https://www.w3.org/TR/compositing-1/#blendingcolor
///
/// The hue and saturation of the source with the luma of the backdrop.
fn color(cb: Rgb, cs: Rgb) -> Rgb {
    set_lum(cs, lum(cb))
}

/// https://www.w3.org/TR/compositing-1/#blendingluminosity
///
/// The luma of the source with the hue and saturation of the backdrop.
fn luminosity(cb: Rgb, cs: Rgb) -> Rgb {
    set_lum(cb, lum(cs))
}

/// Keeps whichever whole color is darker by luma; channels are never mixed.
fn darker_color(cb: Rgb, cs: Rgb) -> Rgb {
    if lum(cs) < lum(cb) {
        cs
    } else {
        cb
    }
}

/// Keeps whichever whole color is lighter by luma.
fn lighter_color(cb: Rgb, cs: Rgb) -> Rgb {
    if lum(cs) > lum(cb) {
        cs
    } else {
        cb
    }
}
