//! Builds the layer tree from the decoder's flat, sentinel delimited list.

use std::collections::HashMap;

use crate::blend::BlendMode;
use crate::decoder::SectionType;
use crate::geom::Rect;
use crate::tree::{Layer, LayerId, LayerImage, ROOT_SEQ_ID};
use crate::Error;

/// Everything the tree needs to know about one decoded layer, minus the
/// pixels (those go through the tile builders separately).
#[derive(Debug, Clone)]
pub(crate) struct LayerMeta {
    pub seq_id: i32,
    pub name: String,
    pub rect: Rect,
    pub section: SectionType,
    pub blend_mode: BlendMode,
    pub opacity: u8,
    pub clipping: bool,
    pub visible: bool,
    pub blend_clipped_elements: bool,
    pub mask_enabled: bool,
    pub mask_default_color: u8,
}

fn root_layer() -> Layer {
    Layer {
        seq_id: ROOT_SEQ_ID,
        name: String::new(),
        folder: true,
        folder_open: true,
        visible: true,
        blend_mode: BlendMode::PassThrough,
        opacity: 255,
        clipping: false,
        blend_clipped_elements: true,
        mask_enabled: false,
        mask_default_color: 255,
        rect: Rect::zero(),
        parent: None,
        children: vec![],
        clipped_by: None,
        clip: vec![],
    }
}

/// Turn the decoder's ordered list into a tree.
///
/// A folder record opens a group and becomes the current parent; the
/// matching [`SectionType::Divider`] closes it. Everything else attaches
/// to the current parent. After the structural pass, clipping groups are
/// wired per parent.
pub(crate) fn build_layers(
    records: Vec<LayerMeta>,
) -> Result<(Vec<Layer>, HashMap<i32, LayerId>), Error> {
    let mut nodes = vec![root_layer()];
    let mut seq_index = HashMap::new();
    let mut parents = vec![LayerId(0)];

    for record in records {
        match record.section {
            SectionType::Divider => {
                if parents.len() > 1 {
                    parents.pop();
                } else {
                    log::warn!("folder divider without an open folder, ignoring");
                }
                continue;
            }
            SectionType::Layer | SectionType::OpenFolder | SectionType::ClosedFolder => {}
        }

        if record.seq_id == ROOT_SEQ_ID {
            return Err(Error::Decoder(format!(
                "layer \"{}\" uses the reserved sequence id {}",
                record.name, ROOT_SEQ_ID
            )));
        }

        let folder = record.section.is_folder();
        // 'pass' only means pass through on folders; Photoshop never
        // writes it on pixel layers, so anything else falls back to Normal.
        let blend_mode = if !folder && record.blend_mode == BlendMode::PassThrough {
            log::warn!(
                "pixel layer \"{}\" carries the pass through key, using Normal",
                record.name
            );
            BlendMode::Normal
        } else {
            record.blend_mode
        };

        let id = LayerId(nodes.len());
        let parent = *parents.last().expect("the root parent is never popped");
        nodes.push(Layer {
            seq_id: record.seq_id,
            name: record.name,
            folder,
            folder_open: record.section == SectionType::OpenFolder,
            visible: record.visible,
            blend_mode,
            opacity: record.opacity,
            clipping: record.clipping,
            blend_clipped_elements: record.blend_clipped_elements,
            mask_enabled: record.mask_enabled,
            mask_default_color: record.mask_default_color,
            rect: record.rect,
            parent: Some(parent),
            children: vec![],
            clipped_by: None,
            clip: vec![],
        });
        nodes[parent.0].children.push(id);

        if seq_index.insert(nodes[id.0].seq_id, id).is_some() {
            return Err(Error::Decoder(format!(
                "duplicate sequence id {}",
                nodes[id.0].seq_id
            )));
        }

        if folder {
            parents.push(id);
        }
    }

    if parents.len() > 1 {
        log::warn!("{} folders were never closed", parents.len() - 1);
    }

    register_clipping_groups(&mut nodes);

    Ok((nodes, seq_index))
}

/// Wire clipping groups within every parent.
///
/// Siblings are walked bottom to top; a run of layers with the clipping
/// flag set all clip against the nearest non clipping sibling below them.
/// A run with no base below it keeps drawing as ordinary layers.
fn register_clipping_groups(nodes: &mut Vec<Layer>) {
    for parent in 0..nodes.len() {
        let children = nodes[parent].children.clone();

        let mut base: Option<LayerId> = None;
        for &child in children.iter() {
            if !nodes[child.0].clipping {
                base = Some(child);
                continue;
            }

            match base {
                Some(base_id) => {
                    nodes[child.0].clipped_by = Some(base_id);
                    nodes[base_id.0].clip.push(child);
                }
                None => {
                    log::warn!(
                        "layer \"{}\" clips but has no base below it, drawing it unclipped",
                        nodes[child.0].name
                    );
                }
            }
        }
    }
}

/// Rewrite layer rects from the tiled images, roll folder rects up from
/// their children and return the tree rect (visible content clipped to
/// the canvas).
pub(crate) fn refresh_rects(
    nodes: &mut [Layer],
    layer_images: &HashMap<i32, LayerImage>,
    canvas_rect: Rect,
) -> Rect {
    for layer in nodes.iter_mut() {
        if let Some(image) = layer_images.get(&layer.seq_id).and_then(|li| li.image.as_ref()) {
            layer.rect = image.rect();
        }
    }

    fold_folder_rect(nodes, LayerId(0));
    nodes[0].rect = canvas_rect;

    let mut rect = Rect::zero();
    for layer in nodes.iter().skip(1) {
        if layer.visible && !layer.folder {
            rect = rect.union(&layer.rect);
        }
    }
    rect.intersect(&canvas_rect)
}

fn fold_folder_rect(nodes: &mut [Layer], id: LayerId) -> Rect {
    if !nodes[id.0].folder {
        return nodes[id.0].rect;
    }

    let children = nodes[id.0].children.clone();
    let mut rect = Rect::zero();
    for child in children {
        rect = rect.union(&fold_folder_rect(nodes, child));
    }
    nodes[id.0].rect = rect;
    rect
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(seq_id: i32, name: &str, section: SectionType) -> LayerMeta {
        LayerMeta {
            seq_id,
            name: name.to_string(),
            rect: Rect::new(0, 0, 4, 4),
            section,
            blend_mode: BlendMode::Normal,
            opacity: 255,
            clipping: false,
            visible: true,
            blend_clipped_elements: true,
            mask_enabled: false,
            mask_default_color: 255,
        }
    }

    fn divider() -> LayerMeta {
        let mut m = meta(i32::MAX, "", SectionType::Divider);
        m.seq_id = 0;
        m
    }

    #[test]
    fn folders_nest_via_sentinels() {
        let mut folder = meta(10, "group", SectionType::OpenFolder);
        folder.blend_mode = BlendMode::PassThrough;

        let records = vec![
            meta(1, "bottom", SectionType::Layer),
            folder,
            meta(11, "inner", SectionType::Layer),
            divider(),
            meta(2, "top", SectionType::Layer),
        ];
        let (nodes, seq_index) = build_layers(records).unwrap();

        let root_children = &nodes[0].children;
        assert_eq!(root_children.len(), 3);

        let group = seq_index[&10];
        assert!(nodes[group.0].folder);
        assert_eq!(nodes[group.0].children.len(), 1);

        let inner = seq_index[&11];
        assert_eq!(nodes[inner.0].parent, Some(group));
        // Every child is listed by its parent.
        for (idx, layer) in nodes.iter().enumerate().skip(1) {
            let parent = layer.parent.unwrap();
            assert!(nodes[parent.0].children.contains(&LayerId(idx)));
        }
    }

    #[test]
    fn clipping_runs_attach_to_the_base_below() {
        let mut clipper_a = meta(2, "a", SectionType::Layer);
        clipper_a.clipping = true;
        let mut clipper_b = meta(3, "b", SectionType::Layer);
        clipper_b.clipping = true;

        let records = vec![
            meta(1, "base", SectionType::Layer),
            clipper_a,
            clipper_b,
            meta(4, "unrelated", SectionType::Layer),
        ];
        let (nodes, seq_index) = build_layers(records).unwrap();

        let base = seq_index[&1];
        let a = seq_index[&2];
        let b = seq_index[&3];
        let unrelated = seq_index[&4];

        assert_eq!(nodes[base.0].clip, vec![a, b]);
        assert_eq!(nodes[a.0].clipped_by, Some(base));
        assert_eq!(nodes[b.0].clipped_by, Some(base));
        assert_eq!(nodes[unrelated.0].clipped_by, None);
        assert!(nodes[unrelated.0].clip.is_empty());

        // ClippedBy always points at an earlier sibling.
        for layer in nodes.iter() {
            if let Some(clip_base) = layer.clipped_by {
                let parent = layer.parent.unwrap();
                let siblings = &nodes[parent.0].children;
                let base_at = siblings.iter().position(|&c| c == clip_base).unwrap();
                let self_at = siblings
                    .iter()
                    .position(|&c| nodes[c.0].seq_id == layer.seq_id)
                    .unwrap();
                assert!(base_at < self_at);
            }
        }
    }

    #[test]
    fn clipping_run_without_a_base_is_discarded() {
        let mut orphan = meta(1, "orphan", SectionType::Layer);
        orphan.clipping = true;

        let records = vec![orphan, meta(2, "above", SectionType::Layer)];
        let (nodes, seq_index) = build_layers(records).unwrap();

        let orphan = seq_index[&1];
        assert_eq!(nodes[orphan.0].clipped_by, None);
    }

    #[test]
    fn duplicate_sequence_ids_are_rejected() {
        let records = vec![
            meta(7, "one", SectionType::Layer),
            meta(7, "two", SectionType::Layer),
        ];
        assert!(matches!(build_layers(records), Err(Error::Decoder(_))));
    }

    #[test]
    fn reserved_sequence_id_is_rejected() {
        let records = vec![meta(ROOT_SEQ_ID, "bad", SectionType::Layer)];
        assert!(matches!(build_layers(records), Err(Error::Decoder(_))));
    }

    #[test]
    fn pass_through_on_a_pixel_layer_falls_back_to_normal() {
        let mut layer = meta(1, "px", SectionType::Layer);
        layer.blend_mode = BlendMode::PassThrough;
        let (nodes, seq_index) = build_layers(vec![layer]).unwrap();
        assert_eq!(nodes[seq_index[&1].0].blend_mode, BlendMode::Normal);
    }

    #[test]
    fn folder_rects_roll_up_from_children() {
        let records = vec![
            meta(10, "group", SectionType::OpenFolder),
            {
                let mut m = meta(1, "a", SectionType::Layer);
                m.rect = Rect::new(0, 0, 4, 4);
                m
            },
            {
                let mut m = meta(2, "b", SectionType::Layer);
                m.rect = Rect::new(10, 10, 20, 18);
                m
            },
            divider(),
        ];
        let (mut nodes, seq_index) = build_layers(records).unwrap();

        let canvas = Rect::new(0, 0, 64, 64);
        let rect = refresh_rects(&mut nodes, &HashMap::new(), canvas);

        let group = seq_index[&10];
        assert_eq!(nodes[group.0].rect, Rect::new(0, 0, 20, 18));
        assert_eq!(rect, Rect::new(0, 0, 20, 18));
    }
}
