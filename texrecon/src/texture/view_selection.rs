use std::collections::BTreeMap;

use log::{debug, info};

use crate::texture::maxflow::FlowGraph;
use crate::texture::*;
use base::defs::{Error, ErrorKind::*, Result};

// Relative energy decrease below which a move is not taken.
const MIN_IMPROVEMENT: f64 = 1e-9;

struct Energy<'a> {
    graph: &'a AdjacencyGraph,
    costs: &'a DataCosts,
    smoothness_weight: f64,
}

impl<'a> Energy<'a> {
    fn data(&self, face: usize, label: Label) -> f64 {
        if label == UNLABELED {
            0.0
        } else {
            self.costs
                .cost(face, label)
                .map_or(f64::INFINITY, |c| c as f64)
        }
    }

    fn smoothness(&self, l0: Label, l1: Label) -> f64 {
        if l0 == l1 {
            0.0
        } else {
            self.smoothness_weight
        }
    }

    fn total(&self, labels: &[Label]) -> f64 {
        let data: f64 =
            (0..labels.len()).map(|f| self.data(f, labels[f])).sum();
        let smoothness: f64 = self
            .graph
            .edges()
            .map(|[f0, f1]| self.smoothness(labels[f0], labels[f1]))
            .sum();
        data + smoothness
    }

    // Best labeling within one alpha expansion of `labels`: every face may
    // either keep its label or switch to `alpha`.
    fn expand(&self, labels: &[Label], alpha: Label) -> Vec<Label> {
        let mut var_of_face = vec![None; labels.len()];
        let mut faces = Vec::new();
        for (f, &l) in labels.iter().enumerate() {
            if l != alpha && l != UNLABELED && self.costs.cost(f, alpha).is_some()
            {
                var_of_face[f] = Some(faces.len());
                faces.push(f);
            }
        }
        if faces.is_empty() {
            return labels.to_vec();
        }

        // Costs of keeping (0) and of switching (1), per variable.
        let mut keep_costs: Vec<f64> =
            faces.iter().map(|&f| self.data(f, labels[f])).collect();
        let mut switch_costs: Vec<f64> =
            faces.iter().map(|&f| self.data(f, alpha)).collect();
        let mut flow = FlowGraph::new(faces.len());

        for [f0, f1] in self.graph.edges() {
            let (l0, l1) = (labels[f0], labels[f1]);
            match (var_of_face[f0], var_of_face[f1]) {
                (Some(p), Some(q)) => {
                    let a = self.smoothness(l0, l1);
                    let b = self.smoothness(l0, alpha);
                    let c = self.smoothness(alpha, l1);
                    let d = self.smoothness(alpha, alpha);
                    switch_costs[p] += c - a;
                    switch_costs[q] += d - c;
                    flow.add_edge(p, q, b + c - a - d, 0.0);
                }
                (Some(p), None) => {
                    keep_costs[p] += self.smoothness(l0, l1);
                    switch_costs[p] += self.smoothness(alpha, l1);
                }
                (None, Some(q)) => {
                    keep_costs[q] += self.smoothness(l0, l1);
                    switch_costs[q] += self.smoothness(l0, alpha);
                }
                (None, None) => {}
            }
        }
        for p in 0..faces.len() {
            flow.add_terminal_weights(p, switch_costs[p], keep_costs[p]);
        }
        flow.max_flow();

        let mut expanded = labels.to_vec();
        for (p, keeps) in flow.source_side().into_iter().enumerate() {
            if !keeps {
                expanded[faces[p]] = alpha;
            }
        }
        expanded
    }
}

/// Assigns a view to every face by approximately minimizing the data costs
/// plus a Potts penalty on graph edges whose faces use different views.
///
/// Starts from the cheapest view of every face and improves it by alpha
/// expansion passes over all views. Faces that no view sees get
/// `UNLABELED`.
pub fn select_views(
    graph: &mut AdjacencyGraph,
    costs: &DataCosts,
    settings: &Settings,
) -> Result<()> {
    if costs.num_faces() != graph.num_nodes()
        || costs.num_views() != graph.num_views()
    {
        let desc = format!(
            "data costs for {} faces and {} views do not match a mesh with \
             {} faces and {} views",
            costs.num_faces(),
            costs.num_views(),
            graph.num_nodes(),
            graph.num_views()
        );
        return Err(Error::new(InconsistentState, desc));
    }

    let energy = Energy {
        graph,
        costs,
        smoothness_weight: settings.smoothness_weight,
    };
    let mut labels: Vec<Label> = (0..graph.num_nodes())
        .map(|f| costs.min_cost_label(f).unwrap_or(UNLABELED))
        .collect();
    let mut current = energy.total(&labels);
    info!("  Initial labeling energy {:.3}", current);

    for pass in 0..settings.max_iterations {
        let mut improved = false;
        for alpha in 1..=costs.num_views() {
            let expanded = energy.expand(&labels, alpha);
            let e = energy.total(&expanded);
            if e < current - MIN_IMPROVEMENT * current.abs().max(1.0) {
                labels = expanded;
                current = e;
                improved = true;
            }
        }
        debug!("  Pass {}: energy {:.3}", pass + 1, current);
        if !improved {
            break;
        }
    }
    info!("  Final labeling energy {:.3}", current);

    graph.set_labels(&labels)?;
    if settings.min_patch_faces > 1 {
        remove_small_components(graph, costs, settings.min_patch_faces)?;
    }
    Ok(())
}

// Hands components with fewer than `min_faces` faces to the label most of
// their outside neighbours carry, provided all their faces can take it.
// Repeats until no component changes; every relabel merges two components.
fn remove_small_components(
    graph: &mut AdjacencyGraph,
    costs: &DataCosts,
    min_faces: usize,
) -> Result<()> {
    let mut total = 0;
    loop {
        let relabeled = relabel_small_components(graph, costs, min_faces)?;
        if relabeled == 0 {
            break;
        }
        total += relabeled;
    }
    info!("  Relabeled {} small texture components", total);
    Ok(())
}

fn relabel_small_components(
    graph: &mut AdjacencyGraph,
    costs: &DataCosts,
    min_faces: usize,
) -> Result<usize> {
    let mut labels = graph.labels().to_vec();
    let mut relabeled = 0;
    for component in graph.components() {
        let label = labels[component[0]];
        if label == UNLABELED || component.len() >= min_faces {
            continue;
        }

        // Ordered by label so that ties go to the lowest one.
        let mut votes: BTreeMap<Label, usize> = BTreeMap::new();
        for &f in &component {
            for &g in graph.neighbors(f) {
                if labels[g] != label && labels[g] != UNLABELED {
                    *votes.entry(labels[g]).or_default() += 1;
                }
            }
        }
        let majority = votes
            .iter()
            .fold(None, |best: Option<(Label, usize)>, (&l, &n)| match best {
                Some((_, m)) if m >= n => best,
                _ => Some((l, n)),
            });
        if let Some((new_label, _)) = majority {
            if component.iter().all(|&f| costs.cost(f, new_label).is_some()) {
                for &f in &component {
                    labels[f] = new_label;
                }
                relabeled += 1;
            }
        }
    }
    graph.set_labels(&labels)?;
    Ok(relabeled)
}
