use std::cmp::Reverse;
use std::collections::BTreeMap;

use image::{Rgb, RgbImage};
use log::info;
use rectangle_pack::{
    contains_smallest_box, pack_rects, volume_heuristic, GroupedRectsToPlace,
    RectToInsert, TargetBin,
};

use crate::texture::*;
use base::defs::{Error, ErrorKind::*, Result};

// Dilation steps filling unused atlas pixels around patches.
const GUTTER_SIZE: usize = 4;

#[derive(Clone, Debug)]
pub struct AtlasEntry {
    pub patch: usize,
    pub rect: Rectangle<u32>,
    // Maps homogeneous local patch coordinates to atlas UV, v pointing up.
    pub transform: Matrix3,
}

#[derive(Clone, Debug)]
pub struct TextureAtlas {
    pub image: RgbImage,
    pub entries: Vec<AtlasEntry>,
}

impl TextureAtlas {
    pub fn uv(&self, entry: &AtlasEntry, local: Vector2) -> Vector2 {
        let p = entry.transform * Vector3::new(local[0], local[1], 1.0);
        Vector2::new(p[0], p[1])
    }
}

fn uv_transform(pos: [u32; 2], [width, height]: [u32; 2]) -> Matrix3 {
    let (w, h) = (width as f64, height as f64);
    Matrix3::new(
        1.0 / w,
        0.0,
        pos[0] as f64 / w,
        0.0,
        -1.0 / h,
        1.0 - pos[1] as f64 / h,
        0.0,
        0.0,
        1.0,
    )
}

type Placements = Vec<Vec<(usize, [u32; 2])>>;

// Rows of patches sorted by decreasing height; a new atlas starts when the
// next row would not fit.
fn pack_shelves(sizes: &[[u32; 2]], side: u32) -> Placements {
    let mut order: Vec<usize> = (0..sizes.len()).collect();
    order.sort_by_key(|&i| (Reverse(sizes[i][1]), Reverse(sizes[i][0]), i));

    let mut atlases: Placements = Vec::new();
    let (mut x, mut y, mut row_height) = (0, 0, 0);
    for i in order {
        let [w, h] = sizes[i];
        if x + w > side {
            x = 0;
            y += row_height;
            row_height = 0;
        }
        if atlases.is_empty() || y + h > side {
            atlases.push(Vec::new());
            x = 0;
            y = 0;
            row_height = 0;
        }
        if let Some(atlas) = atlases.last_mut() {
            atlas.push((i, [x, y]));
        }
        x += w;
        row_height = row_height.max(h);
    }
    atlases
}

fn pack_into_bins(
    rects_to_place: &GroupedRectsToPlace<usize, ()>,
    num_rects: usize,
    side: u32,
    num_bins: usize,
) -> Option<Placements> {
    let mut target_bins = BTreeMap::new();
    for bin in 0..num_bins {
        target_bins.insert(bin, TargetBin::new(side, side, 1));
    }
    let placements = pack_rects(
        rects_to_place,
        &mut target_bins,
        &volume_heuristic,
        &contains_smallest_box,
    )
    .ok()?;

    let mut atlases: Placements = vec![Vec::new(); num_bins];
    for i in 0..num_rects {
        let (bin, location) = placements.packed_locations()[&i];
        atlases[bin].push((i, [location.x(), location.y()]));
    }
    atlases.retain(|a| !a.is_empty());
    Some(atlases)
}

// Guillotine packing into the smallest number of bins that takes all
// patches. The bin count starts at the area bound, doubles until packing
// succeeds and is then bisected.
fn pack_guillotine(sizes: &[[u32; 2]], side: u32) -> Result<Placements> {
    let mut rects_to_place = GroupedRectsToPlace::<usize, ()>::new();
    for (i, size) in sizes.iter().enumerate() {
        rects_to_place.push_rect(i, None, RectToInsert::new(size[0], size[1], 1));
    }

    let pack = |num_bins| pack_into_bins(&rects_to_place, sizes.len(), side, num_bins);
    let area: u64 = sizes.iter().map(|s| s[0] as u64 * s[1] as u64).sum();
    let bin_area = side as u64 * side as u64;
    let lower_bound = (((area + bin_area - 1) / bin_area) as usize).clamp(1, sizes.len());

    let mut failed = lower_bound - 1;
    let mut num_bins = lower_bound;
    let (mut best_bins, mut best) = loop {
        if let Some(atlases) = pack(num_bins) {
            break (num_bins, atlases);
        }
        if num_bins >= sizes.len() {
            let desc = format!("failed to pack {} patches", sizes.len());
            return Err(Error::new(InconsistentState, desc));
        }
        failed = num_bins;
        num_bins = (num_bins * 2).min(sizes.len());
    };
    while best_bins - failed > 1 {
        let mid = failed + (best_bins - failed) / 2;
        match pack(mid) {
            Some(atlases) => {
                best_bins = mid;
                best = atlases;
            }
            None => failed = mid,
        }
    }
    Ok(best)
}

// Repeatedly copies pixels into empty 4-neighbours.
fn extrapolate_gutter(
    buffer: &mut RgbImage,
    empty: &mut ImageMask,
    gutter_size: usize,
) {
    let (width, height) = buffer.dimensions();
    for _ in 0..gutter_size {
        let mut fills = Vec::new();
        for y in 0..height as i64 {
            for x in 0..width as i64 {
                if !empty[(y as usize, x as usize)] {
                    continue;
                }
                let source = [(x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)]
                    .into_iter()
                    .find(|&(x1, y1)| {
                        0 <= x1
                            && x1 < width as i64
                            && 0 <= y1
                            && y1 < height as i64
                            && !empty[(y1 as usize, x1 as usize)]
                    });
                if let Some((x1, y1)) = source {
                    fills.push((x as u32, y as u32, x1 as u32, y1 as u32));
                }
            }
        }
        if fills.is_empty() {
            break;
        }
        for (x, y, x1, y1) in fills {
            buffer[(x, y)] = buffer[(x1, y1)];
            empty[(y as usize, x as usize)] = false;
        }
    }
}

fn bake_atlas(
    patches: &[TexturePatch],
    placements: &[(usize, [u32; 2])],
    side: u32,
) -> TextureAtlas {
    let mut extent = [1, 1];
    for &(i, pos) in placements {
        for k in 0..2 {
            extent[k] = extent[k].max(pos[k] + patches[i].size()[k]);
        }
    }
    let size = extent.map(|e: u32| e.next_power_of_two().min(side));

    let mut image = RgbImage::from_pixel(size[0], size[1], Rgb([0, 0, 0]));
    let mut empty = new_image_mask(size[0], size[1], true);
    let mut entries = Vec::with_capacity(placements.len());
    for &(i, pos) in placements {
        let patch = &patches[i];
        for y in 0..patch.height() {
            for x in 0..patch.width() {
                if patch.is_valid(x, y) {
                    let (ax, ay) = (pos[0] + x, pos[1] + y);
                    image.put_pixel(ax, ay, patch.adjusted_pixel(x, y));
                    empty[(ay as usize, ax as usize)] = false;
                }
            }
        }
        entries.push(AtlasEntry {
            patch: i,
            rect: Rectangle {
                pos,
                size: patch.size(),
            },
            transform: uv_transform(pos, size),
        });
    }
    extrapolate_gutter(&mut image, &mut empty, GUTTER_SIZE);
    entries.sort_by_key(|e| e.patch);
    TextureAtlas { image, entries }
}

/// Packs all patches into square atlases of at most `max_atlas_size`
/// pixels per side, each shrunk to the power of two extent it uses.
pub fn generate_texture_atlases(
    patches: &[TexturePatch],
    settings: &Settings,
) -> Result<Vec<TextureAtlas>> {
    let side = settings.max_atlas_size;
    let sizes: Vec<[u32; 2]> = patches.iter().map(|p| p.size()).collect();
    if let Some((i, [w, h])) = sizes
        .iter()
        .enumerate()
        .find(|(_, s)| s[0] > side || s[1] > side)
    {
        let desc = format!(
            "patch {} of {}x{} pixels exceeds the maximum atlas size {}",
            i, w, h, side
        );
        return Err(Error::new(PatchTooLarge, desc));
    }
    if patches.is_empty() {
        return Ok(Vec::new());
    }

    let placements = match settings.packing {
        PackingStrategy::Shelf => pack_shelves(&sizes, side),
        PackingStrategy::Guillotine => pack_guillotine(&sizes, side)?,
    };
    let atlases: Vec<TextureAtlas> = placements
        .iter()
        .map(|p| bake_atlas(patches, p, side))
        .collect();
    info!(
        "  Packed {} patches into {} atlases",
        patches.len(),
        atlases.len()
    );
    Ok(atlases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base::{assert_eq_f64, assert_err_kind};
    use image::Rgb32FImage;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn empty_patch(width: u32, height: u32) -> TexturePatch {
        TexturePatch::new(1, vec![], vec![], Rgb32FImage::new(width, height))
    }

    fn random_patches(count: usize, max_side: u32) -> Vec<TexturePatch> {
        let mut rng = StdRng::seed_from_u64(7);
        (0..count)
            .map(|_| empty_patch(rng.gen_range(1..=max_side), rng.gen_range(1..=max_side)))
            .collect()
    }

    fn check_layout(patches: &[TexturePatch], atlases: &[TextureAtlas], side: u32) {
        let mut seen = vec![0; patches.len()];
        for atlas in atlases {
            assert!(atlas.image.width() <= side && atlas.image.height() <= side);
            for (k, a) in atlas.entries.iter().enumerate() {
                seen[a.patch] += 1;
                assert_eq!(a.rect.size, patches[a.patch].size());
                assert!(a.rect.pos[0] + a.rect.size[0] <= atlas.image.width());
                assert!(a.rect.pos[1] + a.rect.size[1] <= atlas.image.height());
                for b in &atlas.entries[k + 1..] {
                    assert!(!a.rect.overlaps(&b.rect));
                }
            }
        }
        assert!(seen.iter().all(|&n| n == 1));
    }

    #[test]
    fn test_shelf_packing() {
        let patches = random_patches(60, 40);
        let settings = Settings {
            max_atlas_size: 128,
            ..Default::default()
        };
        let atlases = generate_texture_atlases(&patches, &settings).unwrap();
        assert!(atlases.len() > 1);
        check_layout(&patches, &atlases, 128);
    }

    #[test]
    fn test_guillotine_packing() {
        let patches = random_patches(60, 40);
        let settings = Settings {
            max_atlas_size: 128,
            packing: PackingStrategy::Guillotine,
            ..Default::default()
        };
        let atlases = generate_texture_atlases(&patches, &settings).unwrap();
        check_layout(&patches, &atlases, 128);
    }

    #[test]
    fn test_guillotine_uses_few_bins() {
        // Nine quarter-size patches need three atlases.
        let patches: Vec<TexturePatch> =
            (0..9).map(|_| empty_patch(64, 64)).collect();
        let settings = Settings {
            max_atlas_size: 128,
            packing: PackingStrategy::Guillotine,
            ..Default::default()
        };
        let atlases = generate_texture_atlases(&patches, &settings).unwrap();
        assert_eq!(atlases.len(), 3);
        check_layout(&patches, &atlases, 128);

        let placements = pack_guillotine(&[[128, 128]; 5], 128).unwrap();
        assert_eq!(placements.len(), 5);
    }

    #[test]
    fn test_small_patches_share_an_atlas() {
        let patches = vec![empty_patch(30, 20), empty_patch(20, 30)];
        let atlases = generate_texture_atlases(&patches, &Settings::default()).unwrap();
        assert_eq!(atlases.len(), 1);
        assert_eq!(atlases[0].image.dimensions(), (64, 32));
        check_layout(&patches, &atlases, 8192);
    }

    #[test]
    fn test_patch_too_large() {
        let patches = vec![empty_patch(10, 10), empty_patch(20, 200)];
        let settings = Settings {
            max_atlas_size: 128,
            ..Default::default()
        };
        let res = generate_texture_atlases(&patches, &settings);
        assert_err_kind!(res, PatchTooLarge);
    }

    #[test]
    fn test_uv_transform() {
        let t = uv_transform([16, 8], [64, 32]);
        let atlas = TextureAtlas {
            image: RgbImage::new(64, 32),
            entries: vec![],
        };
        let entry = AtlasEntry {
            patch: 0,
            rect: Rectangle {
                pos: [16, 8],
                size: [4, 4],
            },
            transform: t,
        };
        let uv = atlas.uv(&entry, Vector2::new(0.0, 0.0));
        assert_eq_f64!(uv[0], 0.25);
        assert_eq_f64!(uv[1], 0.75);
        let uv = atlas.uv(&entry, Vector2::new(48.0, 24.0));
        assert_eq_f64!(uv[0], 1.0);
        assert_eq_f64!(uv[1], 0.0);
    }

    #[test]
    fn test_gutter_takes_neighbour_colors() {
        let mut image = RgbImage::new(4, 1);
        image.put_pixel(0, 0, Rgb([9, 8, 7]));
        let mut empty = new_image_mask(4, 1, true);
        empty[(0, 0)] = false;
        extrapolate_gutter(&mut image, &mut empty, 2);
        assert_eq!(image.get_pixel(2, 0), &Rgb([9, 8, 7]));
        assert!(empty[(0, 3)]);
    }
}
