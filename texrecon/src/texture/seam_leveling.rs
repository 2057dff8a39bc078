use std::cmp::Ordering;
use std::collections::HashMap;

use kiddo::distance::squared_euclidean;
use kiddo::KdTree;
use log::{debug, info, warn};
use petgraph::unionfind::UnionFind;
use rayon::prelude::*;

use crate::mesh::Mesh;
use crate::texture::adjacency_graph::faces_around_edges;
use crate::texture::*;

type CooMatrix = nalgebra_sparse::coo::CooMatrix<f64>;
type CsrMatrix = nalgebra_sparse::csr::CsrMatrix<f64>;
type DVector = nalgebra::DVector<f64>;

const MAX_CG_STEPS: usize = 1000;
const CG_TOLERANCE: f64 = 1e-8;

/// Runs the selected seam leveling passes in order.
pub fn level_seams(
    patches: &mut TexturePatches,
    mesh: &Mesh,
    settings: &Settings,
) {
    for mode in settings.seam_leveling() {
        let before = seam_color_error(patches);
        match mode {
            SeamLeveling::Global => global_seam_leveling(patches, mesh, settings),
            SeamLeveling::Local => local_seam_leveling(patches, mesh, settings),
        }
        info!(
            "  {:?} seam leveling: mean squared seam difference {:.2} -> {:.2}",
            mode,
            before,
            seam_color_error(patches)
        );
    }
}

/// Mean squared difference of the adjusted colors that patches sharing a
/// vertex show at that vertex.
pub fn seam_color_error(patches: &TexturePatches) -> f64 {
    let mut sum = 0.0;
    let mut count = 0;
    for infos in &patches.vertex_infos {
        for (i, a) in infos.iter().enumerate() {
            let ca = patches.patches[a.patch].sample(a.texcoord);
            for b in &infos[i + 1..] {
                let cb = patches.patches[b.patch].sample(b.texcoord);
                sum += (ca - cb).norm_squared();
                count += 1;
            }
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

// Solves `a x = b` for a symmetric positive definite `a`, `None` when the
// iteration breaks down.
fn conjugate_gradients_solve(
    a: &CsrMatrix,
    b: &DVector,
    max_steps: usize,
    tolerance: f64,
) -> Option<DVector> {
    let mut x = DVector::zeros(b.nrows());
    let mut r = b.clone();
    let mut p = r.clone();
    let mut rsold = r.dot(&r);
    let threshold = (tolerance * b.norm()).powi(2);

    for _ in 0..max_steps {
        if rsold <= threshold {
            break;
        }
        let ap = a * &p;
        let pap = p.dot(&ap);
        if !(pap > 0.0) {
            return None;
        }
        let alpha = rsold / pap;
        x.axpy(alpha, &p, 1.0);
        r.axpy(-alpha, &ap, 1.0);
        let rsnew = r.dot(&r);
        p = &r + (rsnew / rsold) * p;
        rsold = rsnew;
    }

    if x.iter().all(|v| v.is_finite()) {
        Some(x)
    } else {
        None
    }
}

// Squared difference `x_i - x_j - target` weighted by `weight`.
struct Equation {
    i: usize,
    j: usize,
    weight: f64,
    target: Color,
}

/// Least squares corrections per (vertex, patch) pair: colors of different
/// patches at a shared vertex should agree, corrections along edges inside
/// a patch should agree, and all corrections should stay small. Every
/// connected block of unknowns is solved on its own; blocks whose system is
/// singular are left uncorrected.
pub fn global_seam_leveling(
    patches: &mut TexturePatches,
    mesh: &Mesh,
    settings: &Settings,
) {
    let mut offsets = Vec::with_capacity(patches.vertex_infos.len() + 1);
    offsets.push(0);
    for infos in &patches.vertex_infos {
        offsets.push(offsets[offsets.len() - 1] + infos.len());
    }
    let num_unknowns = offsets[offsets.len() - 1];
    let unknown = |v: usize, patch: usize| -> Option<usize> {
        let k = patches.vertex_infos[v].iter().position(|i| i.patch == patch)?;
        Some(offsets[v] + k)
    };

    let mut equations = Vec::new();
    for (v, infos) in patches.vertex_infos.iter().enumerate() {
        for (a, ia) in infos.iter().enumerate() {
            let ca = patches.patches[ia.patch].sample(ia.texcoord);
            for (b, ib) in infos.iter().enumerate().skip(a + 1) {
                let cb = patches.patches[ib.patch].sample(ib.texcoord);
                equations.push(Equation {
                    i: offsets[v] + a,
                    j: offsets[v] + b,
                    weight: 1.0,
                    target: cb - ca,
                });
            }
        }
    }
    let num_seam_equations = equations.len();
    if num_seam_equations == 0 {
        debug!("  No seams to level");
        return;
    }
    if settings.seam_smoothness > 0.0 {
        for (p_idx, patch) in patches.patches.iter().enumerate() {
            for &f_idx in &patch.faces {
                let [v0, v1, v2] = mesh.faces[f_idx];
                for [va, vb] in [[v0, v1], [v1, v2], [v2, v0]] {
                    let (i, j) = (unknown(va, p_idx), unknown(vb, p_idx));
                    if let (Some(i), Some(j)) = (i, j) {
                        equations.push(Equation {
                            i,
                            j,
                            weight: settings.seam_smoothness,
                            target: Color::zeros(),
                        });
                    }
                }
            }
        }
    }

    let mut partition = UnionFind::new(num_unknowns);
    for eq in &equations {
        partition.union(eq.i, eq.j);
    }
    let labeling = partition.into_labeling();
    let mut block_of_repr = HashMap::new();
    let mut blocks: Vec<Vec<usize>> = Vec::new();
    for (u, &repr) in labeling.iter().enumerate() {
        let b = *block_of_repr.entry(repr).or_insert_with(|| {
            blocks.push(Vec::new());
            blocks.len() - 1
        });
        blocks[b].push(u);
    }
    let mut block_equations = vec![Vec::new(); blocks.len()];
    for (e_idx, eq) in equations.iter().enumerate() {
        block_equations[block_of_repr[&labeling[eq.i]]].push(e_idx);
    }

    let mut solution = vec![Color::zeros(); num_unknowns];
    let mut singular = 0;
    for (block, eq_idxs) in blocks.iter().zip(block_equations.iter()) {
        if eq_idxs.iter().all(|&e| equations[e].target == Color::zeros()) {
            continue;
        }
        if !(settings.seam_regularization > 0.0) {
            singular += 1;
            continue;
        }

        let local: HashMap<usize, usize> =
            block.iter().enumerate().map(|(l, &u)| (u, l)).collect();
        let n = block.len();
        let mut coo = CooMatrix::new(n, n);
        let mut rhs = [DVector::zeros(n), DVector::zeros(n), DVector::zeros(n)];
        for l in 0..n {
            coo.push(l, l, settings.seam_regularization);
        }
        for &e in eq_idxs {
            let eq = &equations[e];
            let (i, j) = (local[&eq.i], local[&eq.j]);
            coo.push(i, i, eq.weight);
            coo.push(j, j, eq.weight);
            coo.push(i, j, -eq.weight);
            coo.push(j, i, -eq.weight);
            for c in 0..3 {
                rhs[c][i] += eq.weight * eq.target[c];
                rhs[c][j] -= eq.weight * eq.target[c];
            }
        }
        let a = CsrMatrix::from(&coo);

        let solved: Option<Vec<DVector>> = rhs
            .iter()
            .map(|b| conjugate_gradients_solve(&a, b, MAX_CG_STEPS, CG_TOLERANCE))
            .collect();
        match solved {
            Some(xs) => {
                for (l, &u) in block.iter().enumerate() {
                    solution[u] = Color::new(xs[0][l], xs[1][l], xs[2][l]);
                }
            }
            None => singular += 1,
        }
    }
    if singular > 0 {
        warn!(
            "  Singular seam leveling system in {} of {} blocks, \
             left uncorrected",
            singular,
            blocks.len()
        );
    }
    debug!(
        "  {} unknowns, {} seam equations, {} blocks",
        num_unknowns,
        num_seam_equations,
        blocks.len()
    );

    let values: Vec<Option<Vec<[Color; 3]>>> = patches
        .patches
        .iter()
        .enumerate()
        .map(|(p_idx, patch)| {
            if patch.label == UNLABELED {
                return None;
            }
            let per_face = patch
                .faces
                .iter()
                .map(|&f_idx| {
                    mesh.faces[f_idx].map(|v| {
                        unknown(v, p_idx).map_or(Color::zeros(), |u| solution[u])
                    })
                })
                .collect();
            Some(per_face)
        })
        .collect();

    patches
        .patches
        .par_iter_mut()
        .zip(values.into_par_iter())
        .for_each(|(patch, values)| {
            if let Some(values) = values {
                patch.adjust_colors(&values);
            }
        });
}

// Correction samples of a patch, merged per half pixel.
#[derive(Default)]
struct SeamSamples {
    samples: HashMap<[i64; 2], (Vector2, Color, usize)>,
}

impl SeamSamples {
    fn add(&mut self, pos: Vector2, correction: Color) {
        let key = [(pos[0] * 2.0).round() as i64, (pos[1] * 2.0).round() as i64];
        let entry = self
            .samples
            .entry(key)
            .or_insert((pos, Color::zeros(), 0));
        entry.1 += correction;
        entry.2 += 1;
    }
}

fn texcoord_in(infos: &[VertexProjectionInfo], patch: usize) -> Option<Vector2> {
    infos.iter().find(|i| i.patch == patch).map(|i| i.texcoord)
}

/// Moves both sides of every patch boundary toward their mean color, fading
/// the correction out over `local_band_width` pixels into the patches.
pub fn local_seam_leveling(
    patches: &mut TexturePatches,
    mesh: &Mesh,
    settings: &Settings,
) {
    let mut patch_of_face = vec![None; mesh.faces.len()];
    for (p_idx, patch) in patches.patches.iter().enumerate() {
        if patch.label != UNLABELED {
            for &f in &patch.faces {
                patch_of_face[f] = Some(p_idx);
            }
        }
    }

    let mut samples: Vec<SeamSamples> =
        (0..patches.patches.len()).map(|_| SeamSamples::default()).collect();
    let mut edges: Vec<_> = faces_around_edges(mesh).into_iter().collect();
    edges.sort_unstable();
    for ([v0, v1], faces) in edges {
        for (i, &f) in faces.iter().enumerate() {
            for &g in &faces[i + 1..] {
                let (p, q) = match (patch_of_face[f], patch_of_face[g]) {
                    (Some(p), Some(q)) if p != q => (p, q),
                    _ => continue,
                };
                let coords = (
                    texcoord_in(&patches.vertex_infos[v0], p),
                    texcoord_in(&patches.vertex_infos[v1], p),
                    texcoord_in(&patches.vertex_infos[v0], q),
                    texcoord_in(&patches.vertex_infos[v1], q),
                );
                let (p0, p1, q0, q1) = match coords {
                    (Some(p0), Some(p1), Some(q0), Some(q1)) => (p0, p1, q0, q1),
                    _ => continue,
                };
                let len = (p1 - p0).norm().max((q1 - q0).norm());
                let n = (len.ceil() as usize).max(1);
                for k in 0..=n {
                    let t = k as f64 / n as f64;
                    let (pos_p, pos_q) = (p0.lerp(&p1, t), q0.lerp(&q1, t));
                    let cp = patches.patches[p].sample(pos_p);
                    let cq = patches.patches[q].sample(pos_q);
                    let mean = (cp + cq) / 2.0;
                    samples[p].add(pos_p, mean - cp);
                    samples[q].add(pos_q, mean - cq);
                }
            }
        }
    }

    let band = settings.local_band_width;
    let progress = ProgressCounter::new("Leveling patch seams", patches.patches.len());
    patches
        .patches
        .par_iter_mut()
        .zip(samples.into_par_iter())
        .for_each(|(patch, samples)| {
            let mut kdtree = KdTree::new();
            let mut corrections = Vec::with_capacity(samples.samples.len());
            for (pos, sum, count) in samples.samples.into_values() {
                if kdtree.add(pos.as_ref(), corrections.len()).is_ok() {
                    corrections.push(sum / count as f64);
                }
            }
            if !corrections.is_empty() {
                for y in 0..patch.height() {
                    for x in 0..patch.width() {
                        if !patch.is_valid(x, y) {
                            continue;
                        }
                        let center = pixel_center(x, y);
                        let nearest = kdtree
                            .within_unsorted(
                                center.as_ref(),
                                band * band,
                                &squared_euclidean,
                            )
                            .unwrap_or_default()
                            .into_iter()
                            .min_by(|a, b| {
                                a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal)
                            });
                        if let Some((dist, &s)) = nearest {
                            let falloff = 1.0 - dist.sqrt() / band;
                            if falloff > 0.0 {
                                let correction = corrections[s] * falloff;
                                patch.add_adjustment(x, y, correction);
                            }
                        }
                    }
                }
            }
            progress.inc();
        });
}
