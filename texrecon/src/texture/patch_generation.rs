use image::Rgb32FImage;
use log::info;
use rayon::prelude::*;

use crate::mesh::Mesh;
use crate::texture::*;
use base::defs::{Error, ErrorKind::*, Result};

// Pixels reserved around the projected faces of a patch.
pub const PATCH_PADDING: u32 = 2;

/// Where one patch references a mesh vertex.
#[derive(Clone, Debug, PartialEq)]
pub struct VertexProjectionInfo {
    pub patch: usize,
    pub texcoord: Vector2,
    // Ascending faces of the patch incident to the vertex.
    pub faces: Vec<usize>,
}

pub struct TexturePatches {
    pub patches: Vec<TexturePatch>,
    // Per mesh vertex, ordered by patch.
    pub vertex_infos: Vec<Vec<VertexProjectionInfo>>,
}

impl TexturePatches {
    // Patches seam leveling may change, i.e. those cut from a view.
    pub fn is_textured(&self, patch: usize) -> bool {
        self.patches[patch].label != UNLABELED
    }
}

fn build_patch(
    label: Label,
    faces: Vec<usize>,
    mesh: &Mesh,
    view: &TextureView,
    max_size: u32,
) -> Result<TexturePatch> {
    let mut projected = Vec::with_capacity(faces.len());
    for &f_idx in &faces {
        let mut pixels = [Vector2::zeros(); 3];
        for (k, &v) in mesh.faces[f_idx].iter().enumerate() {
            pixels[k] = match view.project(&mesh.vertices[v]) {
                Some((pixel, _)) => pixel,
                None => {
                    let desc = format!(
                        "face {} is behind view {} ('{}')",
                        f_idx, label, view.name
                    );
                    return Err(Error::new(InconsistentState, desc));
                }
            };
        }
        projected.push(pixels);
    }

    let corners: Vec<[f64; 2]> = projected
        .iter()
        .flatten()
        .map(|p| [p[0], p[1]])
        .collect();
    let bounds = Rectangle::bounding(&corners)
        .ok_or_else(|| Error::new(InconsistentState, "empty patch".into()))?;
    let padding = PATCH_PADDING as f64;
    let min = [
        (bounds.pos[0] - padding).floor(),
        (bounds.pos[1] - padding).floor(),
    ];
    let max = [
        (bounds.pos[0] + bounds.size[0] + padding).ceil(),
        (bounds.pos[1] + bounds.size[1] + padding).ceil(),
    ];
    let extent = [(max[0] - min[0]).max(1.0), (max[1] - min[1]).max(1.0)];
    if extent.iter().any(|&e| !(e <= max_size as f64)) {
        let desc = format!(
            "patch of {:.0}x{:.0} pixels for view {} ('{}') exceeds the \
             maximum atlas size {}",
            extent[0], extent[1], label, view.name, max_size
        );
        return Err(Error::new(PatchTooLarge, desc));
    }
    let (width, height) = (extent[0] as u32, extent[1] as u32);
    let offset = Vector2::new(min[0], min[1]);

    // Local pixels line up with view pixels, so colors are plain copies.
    let mut image = Rgb32FImage::new(width, height);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        *pixel = color_to_rgb_f32(view.sample(pixel_center(x, y) + offset));
    }
    let texcoords = projected
        .iter()
        .map(|&ps| ps.map(|p| p - offset))
        .collect();
    Ok(TexturePatch::new(label, faces, texcoords, image))
}

/// Cuts one patch per connected group of faces sharing a view and records
/// where every vertex ends up in the patches around it.
///
/// Unlabeled faces get no patch unless `keep_unseen_faces` is set, in which
/// case they share a single flat patch of `untextured_color`, last in the
/// list and absent from the vertex infos.
pub fn generate_texture_patches(
    graph: &AdjacencyGraph,
    mesh: &Mesh,
    views: &[TextureView],
    settings: &Settings,
) -> Result<TexturePatches> {
    let mut unseen = Vec::new();
    let mut components = Vec::new();
    for component in graph.components() {
        let label = graph.get_label(component[0]);
        if label == UNLABELED {
            unseen.extend(component);
        } else {
            components.push((label, component));
        }
    }

    let progress =
        ProgressCounter::new("Generating texture patches", components.len());
    let max_size = settings.max_atlas_size;
    let mut patches = components
        .into_par_iter()
        .map(|(label, faces)| {
            let view = &views[label - 1];
            let patch = build_patch(label, faces, mesh, view, max_size);
            progress.inc();
            patch
        })
        .collect::<Result<Vec<_>>>()?;

    let mut vertex_infos: Vec<Vec<VertexProjectionInfo>> =
        vec![Vec::new(); mesh.vertices.len()];
    for (p_idx, patch) in patches.iter().enumerate() {
        for (face_pos, &f_idx) in patch.faces.iter().enumerate() {
            for (k, &v) in mesh.faces[f_idx].iter().enumerate() {
                let infos = &mut vertex_infos[v];
                match infos.last_mut() {
                    Some(info) if info.patch == p_idx => {
                        info.faces.push(f_idx)
                    }
                    _ => infos.push(VertexProjectionInfo {
                        patch: p_idx,
                        texcoord: patch.texcoords[face_pos][k],
                        faces: vec![f_idx],
                    }),
                }
            }
        }
    }

    unseen.sort_unstable();
    info!(
        "  {} texture patches, {} faces without texture",
        patches.len(),
        unseen.len()
    );
    if settings.keep_unseen_faces && !unseen.is_empty() {
        let [r, g, b] = settings.untextured_color;
        let color = Color::new(r as f64, g as f64, b as f64);
        patches.push(TexturePatch::flat(UNLABELED, unseen, color));
    }

    Ok(TexturePatches {
        patches,
        vertex_infos,
    })
}
