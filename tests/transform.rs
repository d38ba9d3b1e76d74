//! Affine transforms over whole trees, clone semantics and render
//! determinism.

mod common;

use anyhow::Result;
use common::*;
use psd_compositor::{
    CancelToken, Canvas, Error, LoadOptions, PixelSource, Rect, Transform, Tree,
};

fn gradient_layer(seq_id: i32, rect: Rect) -> psd_compositor::decoder::RawLayer {
    let len = rect.width() as usize * rect.height() as usize;
    let mut red = vec![0; len];
    let mut green = vec![0; len];
    let mut blue = vec![0; len];
    for y in 0..rect.height() {
        for x in 0..rect.width() {
            let i = (y * rect.width() + x) as usize;
            red[i] = (x * 20) as u8;
            green[i] = (y * 10) as u8;
            blue[i] = 200;
        }
    }
    layer_from_planes(seq_id, "gradient", rect, red, green, blue, vec![255; len])
}

fn doc(rect: Rect) -> StubDecoder {
    StubDecoder::new(
        rect.width(),
        rect.height(),
        vec![
            gradient_layer(0, rect),
            with_blend_key(
                solid_layer(1, "tint", rect, [40, 0, 80, 128]),
                *b"scrn",
            ),
        ],
    )
}

/// cargo test --test transform clone_renders_identically -- --exact
#[test]
fn clone_renders_identically() -> Result<()> {
    let rect = Rect::new(0, 0, 8, 6);
    let mut tree = Tree::from_decoder(&mut doc(rect), &LoadOptions::default(), &CancelToken::new())?;
    let mut clone = tree.clone();

    let mut a = Canvas::new(rect);
    tree.render(&mut a, false)?;
    let mut b = Canvas::new(rect);
    clone.render(&mut b, false)?;

    assert_eq!(a.data(), b.data());
    Ok(())
}

/// cargo test --test transform clones_share_tile_buffers -- --exact
#[test]
fn clones_share_tile_buffers() -> Result<()> {
    let rect = Rect::new(0, 0, 8, 6);
    let tree = Tree::from_decoder(&mut doc(rect), &LoadOptions::default(), &CancelToken::new())?;
    let clone = tree.clone();

    let original = tree.layer_image(0).and_then(|li| li.image()).unwrap();
    let cloned = clone.layer_image(0).and_then(|li| li.image()).unwrap();

    let origin = original.tile_origins().next().unwrap();
    let a = original.tile_at(origin).unwrap();
    let b = cloned.tile_at(origin).unwrap();
    assert!(std::sync::Arc::ptr_eq(a, b));
    Ok(())
}

/// cargo test --test transform rendering_is_deterministic -- --exact
#[test]
fn rendering_is_deterministic() -> Result<()> {
    let rect = Rect::new(0, 0, 8, 6);

    let mut first = Tree::from_decoder(&mut doc(rect), &LoadOptions::default(), &CancelToken::new())?;
    let mut second =
        Tree::from_decoder(&mut doc(rect), &LoadOptions::default(), &CancelToken::new())?;

    let mut a = Canvas::new(rect);
    first.render(&mut a, false)?;
    let mut b = Canvas::new(rect);
    second.render(&mut b, false)?;

    assert_eq!(a.data(), b.data());
    Ok(())
}

/// cargo test --test transform load_time_translation_moves_everything -- --exact
#[test]
fn load_time_translation_moves_everything() -> Result<()> {
    let rect = Rect::new(0, 0, 4, 4);

    let mut plain = Tree::from_decoder(&mut doc(rect), &LoadOptions::default(), &CancelToken::new())?;

    let options = LoadOptions {
        transform: Transform::from_translate(5.0, 3.0),
        ..LoadOptions::default()
    };
    let mut moved = Tree::from_decoder(&mut doc(rect), &options, &CancelToken::new())?;

    assert_eq!(moved.canvas_rect(), Rect::new(5, 3, 9, 7));
    assert_eq!(
        moved.layer_by_seq_id(0).unwrap().rect(),
        Rect::new(5, 3, 9, 7)
    );

    let mut a = Canvas::new(rect);
    plain.render(&mut a, false)?;
    let mut b = Canvas::new(moved.canvas_rect());
    moved.render(&mut b, false)?;

    for y in 0..4 {
        for x in 0..4 {
            assert_eq!(a.pixel(x, y), b.pixel(x + 5, y + 3));
        }
    }
    Ok(())
}

/// Rotating the tree then rendering matches rendering then rotating, up
/// to one step per channel on interior pixels.
///
/// cargo test --test transform rotate_then_render_matches_render_then_rotate -- --exact
#[test]
fn rotate_then_render_matches_render_then_rotate() -> Result<()> {
    let rect = Rect::new(0, 0, 6, 4);
    let mut plain = Tree::from_decoder(&mut doc(rect), &LoadOptions::default(), &CancelToken::new())?;
    let mut a = Canvas::new(rect);
    plain.render(&mut a, false)?;

    let mut rotated = plain.transform(&Transform::from_rotate(90.0), 0.0, &CancelToken::new())?;
    let mut b = Canvas::new(rotated.canvas_rect());
    rotated.render(&mut b, false)?;

    // (x, y) lands on column -y-1, row x under a 90 degree rotation.
    for y in 1..3 {
        for x in 1..5 {
            let expected = a.pixel(x, y);
            let actual = b.pixel(-y - 1, x);
            for channel in 0..4 {
                let diff = (expected[channel] as i32 - actual[channel] as i32).abs();
                assert!(
                    diff <= 1,
                    "pixel ({}, {}) channel {}: {} vs {}",
                    x,
                    y,
                    channel,
                    expected[channel],
                    actual[channel]
                );
            }
        }
    }
    Ok(())
}

/// cargo test --test transform transform_leaves_the_source_tree_alone -- --exact
#[test]
fn transform_leaves_the_source_tree_alone() -> Result<()> {
    let rect = Rect::new(0, 0, 4, 4);
    let tree = Tree::from_decoder(&mut doc(rect), &LoadOptions::default(), &CancelToken::new())?;

    let moved = tree.transform(&Transform::from_translate(8.0, 0.0), 0.0, &CancelToken::new())?;

    assert_eq!(tree.canvas_rect(), rect);
    assert_eq!(moved.canvas_rect(), Rect::new(8, 0, 12, 4));
    assert_eq!(tree.layer_by_seq_id(0).unwrap().rect(), rect);
    Ok(())
}

/// cargo test --test transform scaled_transform_with_gamma -- --exact
#[test]
fn scaled_transform_with_gamma() -> Result<()> {
    let rect = Rect::new(0, 0, 8, 8);
    let tree = Tree::from_decoder(&mut doc(rect), &LoadOptions::default(), &CancelToken::new())?;

    let mut scaled = tree.transform(&Transform::from_scale(0.5, 0.5), 2.2, &CancelToken::new())?;

    // floor(0), ceil(4 + 1) on both axes.
    assert_eq!(scaled.canvas_rect(), Rect::new(0, 0, 5, 5));
    let mut out = Canvas::new(scaled.canvas_rect());
    scaled.render(&mut out, false)?;
    // The scaled content is still there.
    assert_ne!(out.pixel(1, 1), [0, 0, 0, 0]);
    Ok(())
}

/// cargo test --test transform cancelled_transform_fails -- --exact
#[test]
fn cancelled_transform_fails() -> Result<()> {
    let rect = Rect::new(0, 0, 8, 8);
    let tree = Tree::from_decoder(&mut doc(rect), &LoadOptions::default(), &CancelToken::new())?;

    let cancel = CancelToken::new();
    cancel.cancel();
    let result = tree.transform(&Transform::from_rotate(45.0), 0.0, &cancel);
    assert!(matches!(result, Err(Error::Cancelled)));
    Ok(())
}

/// The zero matrix means identity: only the diagonal is auto filled.
///
/// cargo test --test transform zero_matrix_loads_as_identity -- --exact
#[test]
fn zero_matrix_loads_as_identity() -> Result<()> {
    let rect = Rect::new(0, 0, 4, 4);
    let options = LoadOptions {
        transform: Transform {
            sx: 0.0,
            kx: 0.0,
            ky: 0.0,
            sy: 0.0,
            tx: 0.0,
            ty: 0.0,
        },
        ..LoadOptions::default()
    };
    let tree = Tree::from_decoder(&mut doc(rect), &options, &CancelToken::new())?;
    assert_eq!(tree.canvas_rect(), rect);
    Ok(())
}
