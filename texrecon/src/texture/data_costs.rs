use std::io::{Read, Write};
use std::path::Path;

use kiddo::distance::squared_euclidean;
use kiddo::KdTree;
use log::{debug, info};
use rayon::prelude::*;

use crate::mesh::Mesh;
use crate::texture::adjacency_graph::describe_file;
use crate::texture::*;
use base::defs::{Error, ErrorKind::*, Result};
use base::util::fs;

const DATA_COSTS_MAGIC: u32 = 0x5443_4453; // "SDCT"
const DATA_COSTS_VERSION: u32 = 1;

/// Sparse (face, view) costs; a missing entry means the view cannot texture
/// the face.
///
/// Entries of face `f` live in `entries[offsets[f]..offsets[f + 1]]` with
/// strictly ascending labels.
#[derive(Clone, Debug, PartialEq)]
pub struct DataCosts {
    num_views: usize,
    offsets: Vec<usize>,
    entries: Vec<(Label, f32)>,
}

impl DataCosts {
    pub fn from_face_costs(
        num_views: usize,
        face_costs: Vec<Vec<(Label, f32)>>,
    ) -> Self {
        let mut offsets = Vec::with_capacity(face_costs.len() + 1);
        let mut entries = Vec::new();
        offsets.push(0);
        for mut costs in face_costs {
            costs.sort_by_key(|&(label, _)| label);
            costs.dedup_by_key(|&mut (label, _)| label);
            entries.extend(costs);
            offsets.push(entries.len());
        }
        Self {
            num_views,
            offsets,
            entries,
        }
    }

    pub fn num_faces(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn num_views(&self) -> usize {
        self.num_views
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn costs(&self, face: usize) -> &[(Label, f32)] {
        &self.entries[self.offsets[face]..self.offsets[face + 1]]
    }

    pub fn cost(&self, face: usize, label: Label) -> Option<f32> {
        let costs = self.costs(face);
        costs
            .binary_search_by_key(&label, |&(l, _)| l)
            .ok()
            .map(|i| costs[i].1)
    }

    // Cheapest view of a face, the lowest label on ties.
    pub fn min_cost_label(&self, face: usize) -> Option<Label> {
        let mut best: Option<(Label, f32)> = None;
        for &(label, cost) in self.costs(face) {
            if best.map_or(true, |(_, c)| cost < c) {
                best = Some((label, cost));
            }
        }
        best.map(|(label, _)| label)
    }

    /// Computes the costs of every face in every view it is visible from.
    ///
    /// The quality of a (face, view) pair is the projected area in pixels,
    /// optionally weighted by the cosine of the incidence angle; the cost is
    /// `1 - quality / max_quality`, so it lies in [0, 1].
    pub fn calculate(
        mesh: &Mesh,
        views: &[TextureView],
        settings: &Settings,
    ) -> Self {
        let progress =
            ProgressCounter::new("Calculating data costs", views.len());
        let per_view: Vec<Vec<(usize, f64)>> = views
            .par_iter()
            .map(|view| {
                let q = face_qualities(mesh, view, settings);
                progress.inc();
                q
            })
            .collect();

        let max_quality = per_view
            .iter()
            .flatten()
            .fold(0.0f64, |m, &(_, q)| m.max(q));

        let mut face_costs = vec![Vec::new(); mesh.faces.len()];
        for (v_idx, qualities) in per_view.into_iter().enumerate() {
            for (f_idx, q) in qualities {
                let cost = (1.0 - q / max_quality).max(0.0);
                face_costs[f_idx].push((v_idx + 1, cost as f32));
            }
        }

        let costs = Self::from_face_costs(views.len(), face_costs);
        let unseen =
            (0..costs.num_faces()).filter(|&f| costs.costs(f).is_empty());
        info!(
            "  {} data costs for {} faces ({} faces are seen by no view)",
            costs.num_entries(),
            costs.num_faces(),
            unseen.count()
        );
        costs
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let capacity = 20 + self.offsets.len() * 4 + self.entries.len() * 8;
        let mut data = Vec::with_capacity(capacity);
        for x in [
            DATA_COSTS_MAGIC,
            DATA_COSTS_VERSION,
            self.num_faces() as u32,
            self.num_views as u32,
            self.entries.len() as u32,
        ] {
            data.write_all(&x.to_le_bytes())?;
        }
        for f in 0..self.num_faces() {
            let costs = self.costs(f);
            data.write_all(&(costs.len() as u32).to_le_bytes())?;
            for &(label, cost) in costs {
                data.write_all(&(label as u32).to_le_bytes())?;
                data.write_all(&cost.to_le_bytes())?;
            }
        }
        fs::write_file(path, &data)?;
        info!("  Saved data costs to '{}'", path.display());
        Ok(())
    }

    /// Loads costs written by `save`, checking they were computed for a mesh
    /// with `num_faces` faces and `num_views` views.
    pub fn load<P: AsRef<Path>>(
        path: P,
        num_faces: usize,
        num_views: usize,
    ) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_file(path)?;
        let costs = parse_data_costs(&data, num_faces, num_views)
            .map_err(|err| describe_file(err, "data cost", path))?;
        info!(
            "  Loaded {} data costs from '{}'",
            costs.num_entries(),
            path.display()
        );
        Ok(costs)
    }
}

fn format_error(desc: String) -> Error {
    Error::new(FormatError, desc)
}

fn read_u32(reader: &mut &[u8]) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader
        .read_exact(&mut buf)
        .map_err(|_| format_error("unexpected end of data".to_string()))?;
    Ok(u32::from_le_bytes(buf))
}

fn parse_data_costs(
    mut data: &[u8],
    num_faces: usize,
    num_views: usize,
) -> Result<DataCosts> {
    let magic = read_u32(&mut data)?;
    let version = read_u32(&mut data)?;
    if magic != DATA_COSTS_MAGIC || version != DATA_COSTS_VERSION {
        return Err(format_error(format!(
            "unrecognized header {:#010x} (version {})",
            magic, version
        )));
    }
    let file_faces = read_u32(&mut data)? as usize;
    let file_views = read_u32(&mut data)? as usize;
    let file_entries = read_u32(&mut data)? as usize;
    if file_faces != num_faces || file_views != num_views {
        return Err(format_error(format!(
            "costs for {} faces and {} views, expected {} faces and {} views",
            file_faces, file_views, num_faces, num_views
        )));
    }

    let mut face_costs = Vec::with_capacity(num_faces);
    let mut total = 0;
    for f in 0..num_faces {
        let count = read_u32(&mut data)? as usize;
        if count > num_views {
            return Err(format_error(format!(
                "face {} has {} costs for {} views",
                f, count, num_views
            )));
        }
        let mut costs = Vec::with_capacity(count);
        for _ in 0..count {
            let label = read_u32(&mut data)? as usize;
            let cost = f32::from_bits(read_u32(&mut data)?);
            if label == UNLABELED || label > num_views {
                return Err(format_error(format!(
                    "face {} has a cost for invalid view {}",
                    f, label
                )));
            }
            if !(cost.is_finite() && cost >= 0.0) {
                return Err(format_error(format!(
                    "face {} has invalid cost {} for view {}",
                    f, cost, label
                )));
            }
            if costs.iter().any(|&(l, _)| l == label) {
                return Err(format_error(format!(
                    "face {} has duplicate costs for view {}",
                    f, label
                )));
            }
            costs.push((label, cost));
        }
        total += count;
        face_costs.push(costs);
    }
    if total != file_entries {
        return Err(format_error(format!(
            "header announces {} entries, found {}",
            file_entries, total
        )));
    }
    if !data.is_empty() {
        return Err(format_error(format!(
            "{} trailing bytes",
            data.len()
        )));
    }
    Ok(DataCosts::from_face_costs(num_views, face_costs))
}

struct ProjectedPoint {
    pixel: Vector2,
    depth: f64,
}

fn orientation(v0: Vector2, v1: Vector2, v2: Vector2) -> f64 {
    (v1[0] * v2[1] - v1[1] * v2[0])
        + (v2[0] * v0[1] - v2[1] * v0[0])
        + (v0[0] * v1[1] - v0[1] * v1[0])
}

// Strict containment regardless of the triangle winding.
fn containment_check(v: Vector2, [v0, v1, v2]: [Vector2; 3]) -> bool {
    if v == v0 || v == v1 || v == v2 {
        return false;
    }
    let s = [
        orientation(v, v1, v2),
        orientation(v0, v, v2),
        orientation(v0, v1, v),
    ];
    s.iter().all(|&s| s > 0.0) || s.iter().all(|&s| s < 0.0)
}

// A vertex is occluded when a triangle in front of it covers its projection.
fn compute_occlusion(
    projections: &[Option<ProjectedPoint>],
    mesh: &Mesh,
) -> Vec<bool> {
    let mut kdtree = KdTree::new();
    for (i, p) in projections.iter().enumerate() {
        if let Some(p) = p {
            if kdtree.add(p.pixel.as_ref(), i).is_err() {
                debug!("  Skipping vertex {} in occlusion test", i);
            }
        }
    }

    let mut occluded = vec![false; projections.len()];
    for face in &mesh.faces {
        let (p0, p1, p2) = match (
            &projections[face[0]],
            &projections[face[1]],
            &projections[face[2]],
        ) {
            (Some(p0), Some(p1), Some(p2)) => (p0, p1, p2),
            _ => continue,
        };
        let (v0, v1, v2) = (p0.pixel, p1.pixel, p2.pixel);
        let v = (v0 + v1 + v2) / 3.0;
        let radius = 1.1
            * (v0 - v)
                .norm_squared()
                .max((v1 - v).norm_squared())
                .max((v2 - v).norm_squared());
        let nearby = kdtree
            .within_unsorted(v.as_ref(), radius, &squared_euclidean)
            .unwrap_or_default();
        for (_dist, &i) in nearby {
            if let Some(pi) = &projections[i] {
                let di = pi.depth;
                if p0.depth < di
                    && p1.depth < di
                    && p2.depth < di
                    && containment_check(pi.pixel, [v0, v1, v2])
                {
                    occluded[i] = true;
                }
            }
        }
    }
    occluded
}

// Ascending (face, quality) pairs of the faces a single view can texture.
fn face_qualities(
    mesh: &Mesh,
    view: &TextureView,
    settings: &Settings,
) -> Vec<(usize, f64)> {
    let projections: Vec<Option<ProjectedPoint>> = mesh
        .vertices
        .iter()
        .map(|v| {
            view.project(v)
                .map(|(pixel, depth)| ProjectedPoint { pixel, depth })
        })
        .collect();
    let occluded = if settings.geometric_visibility_test {
        compute_occlusion(&projections, mesh)
    } else {
        vec![false; projections.len()]
    };
    let eye = view.position();

    (0..mesh.faces.len())
        .filter_map(|f_idx| {
            let face = mesh.faces[f_idx];
            let mut pixels = [Vector2::zeros(); 3];
            for (k, &v) in face.iter().enumerate() {
                let p = projections[v].as_ref()?;
                if !view.valid_pixel(p.pixel) || occluded[v] {
                    return None;
                }
                pixels[k] = p.pixel;
            }

            let to_eye = (eye - mesh.face_centroid(f_idx)).try_normalize(0.0)?;
            let cos = mesh.face_normal(f_idx).dot(&to_eye);
            if cos <= 0.0 {
                return None;
            }
            let area = triangle_area(pixels);
            if area <= 0.0 {
                return None;
            }
            let quality = match settings.data_term {
                DataTerm::Area => area,
                DataTerm::Quality => area * cos,
            };
            Some((f_idx, quality))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::test_util::*;
    use base::{assert_eq_f64, assert_err_kind};

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(name)
    }

    #[test]
    fn test_cube_costs() {
        let mesh = cube_mesh();
        let views = cube_views([200, 0, 0], [0, 0, 200]);
        let costs = DataCosts::calculate(&mesh, &views, &Settings::default());
        assert_eq!(costs.num_faces(), 12);
        assert_eq!(costs.num_views(), 2);
        // Every face is seen by exactly one of the two opposite views.
        for f in 0..6 {
            assert_eq!(costs.costs(f).len(), 1);
            assert_eq!(costs.min_cost_label(f), Some(1));
            assert_eq_f64!(costs.cost(f, 1).unwrap() as f64, 0.0, 1e-4);
        }
        for f in 6..12 {
            assert_eq!(costs.costs(f).len(), 1);
            assert_eq!(costs.min_cost_label(f), Some(2));
        }
    }

    #[test]
    fn test_face_qualities_list_only_visible_faces() {
        let mesh = cube_mesh();
        let views = cube_views([200, 0, 0], [0, 0, 200]);
        let qualities = face_qualities(&mesh, &views[1], &Settings::default());
        let faces: Vec<usize> = qualities.iter().map(|&(f, _)| f).collect();
        assert_eq!(faces, (6..12).collect::<Vec<_>>());
        assert!(qualities.iter().all(|&(_, q)| q > 0.0));
    }

    #[test]
    fn test_cost_decreases_with_area() {
        let mesh = grid_mesh(2);
        let near = look_at_view(
            "near",
            Point3::new(0.0, 0.0, 5.0),
            Point3::origin(),
            Vector3::y(),
            flat_image(64, 64, [0, 0, 0]),
        );
        let far = look_at_view(
            "far",
            Point3::new(0.0, 0.0, 10.0),
            Point3::origin(),
            Vector3::y(),
            flat_image(64, 64, [0, 0, 0]),
        );
        let costs =
            DataCosts::calculate(&mesh, &[near, far], &Settings::default());
        for f in 0..costs.num_faces() {
            let (c1, c2) = (costs.cost(f, 1).unwrap(), costs.cost(f, 2).unwrap());
            assert!(c1 < c2);
            assert!((0.0..=1.0).contains(&c2));
            assert_eq!(costs.min_cost_label(f), Some(1));
        }
    }

    #[test]
    fn test_occluded_faces_are_skipped() {
        // Two stacked planes seen from above; the upper one hides the
        // lower one, whose vertices project off the upper grid lines.
        let mut mesh = grid_mesh(2);
        let lower = grid_mesh(2);
        let base = mesh.vertices.len();
        for v in &lower.vertices {
            mesh.vertices.push(Point3::new(
                v[0] * 0.4 + 0.13,
                v[1] * 0.4 + 0.07,
                -1.0,
            ));
            mesh.normals.push(Vector3::z());
        }
        for f in &lower.faces {
            mesh.faces.push([f[0] + base, f[1] + base, f[2] + base]);
        }
        let view = look_at_view(
            "top",
            Point3::new(0.0, 0.0, 5.0),
            Point3::origin(),
            Vector3::y(),
            flat_image(64, 64, [0, 0, 0]),
        );
        let views = vec![view];
        let costs = DataCosts::calculate(&mesh, &views, &Settings::default());
        let num_upper = lower.faces.len();
        assert!((0..num_upper).all(|f| costs.cost(f, 1).is_some()));
        assert!((num_upper..mesh.faces.len()).all(|f| costs.costs(f).is_empty()));

        let settings = Settings {
            geometric_visibility_test: false,
            ..Default::default()
        };
        let costs = DataCosts::calculate(&mesh, &views, &settings);
        assert!((0..mesh.faces.len()).all(|f| costs.cost(f, 1).is_some()));
    }

    #[test]
    fn test_min_cost_label_prefers_lowest_view_on_ties() {
        let costs = data_costs_from(
            2,
            3,
            &[(0, 3, 0.5), (0, 2, 0.5), (0, 1, 0.7), (1, 2, 0.1)],
        );
        assert_eq!(costs.costs(0)[0].0, 1);
        assert_eq!(costs.min_cost_label(0), Some(2));
        assert_eq!(costs.min_cost_label(1), Some(2));
        assert_eq!(costs.cost(1, 1), None);
    }

    #[test]
    fn test_save_load_round_trip() {
        let path = temp_path("texrecon_data_costs_rt.spt");
        let costs = data_costs_from(
            3,
            2,
            &[(0, 1, 0.25), (0, 2, 0.0), (2, 2, 1.0)],
        );
        costs.save(&path).unwrap();
        let loaded = DataCosts::load(&path, 3, 2).unwrap();
        assert_eq!(loaded, costs);
        assert!(loaded.costs(1).is_empty());
    }

    #[test]
    fn test_load_rejects_bad_files() {
        let path = temp_path("texrecon_data_costs_bad.spt");
        let costs = data_costs_from(3, 2, &[(0, 1, 0.25), (2, 2, 1.0)]);
        costs.save(&path).unwrap();
        assert_err_kind!(DataCosts::load(&path, 4, 2), FormatError);
        assert_err_kind!(DataCosts::load(&path, 3, 1), FormatError);

        let data = fs::read_file(&path).unwrap();
        fs::write_file(&path, &data[..data.len() - 3]).unwrap();
        let err = DataCosts::load(&path, 3, 2).unwrap_err();
        assert_eq!(err.kind, FormatError);
        assert!(err.description.ends_with("unexpected end of data"));

        let mut trailing = data.clone();
        trailing.push(0);
        fs::write_file(&path, &trailing).unwrap();
        assert_err_kind!(DataCosts::load(&path, 3, 2), FormatError);

        // Label of the first record (after the header and the face count).
        let mut bad_label = data;
        bad_label[24..28].copy_from_slice(&7u32.to_le_bytes());
        fs::write_file(&path, &bad_label).unwrap();
        assert_err_kind!(DataCosts::load(&path, 3, 2), FormatError);

        assert_err_kind!(
            DataCosts::load(temp_path("texrecon_missing.spt"), 3, 2),
            IoError
        );
    }
}
