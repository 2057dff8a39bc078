use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

use log::info;
use petgraph::unionfind::UnionFind;

use crate::mesh::Mesh;
use crate::texture::*;
use base::defs::{Error, ErrorKind::*, IntoResult, Result};
use base::util::fs;

pub type Edge = [usize; 2];

// Faces around every (ordered) mesh edge.
pub fn faces_around_edges(mesh: &Mesh) -> HashMap<Edge, Vec<usize>> {
    let mut faces_around_edge: HashMap<Edge, Vec<usize>> =
        HashMap::with_capacity(mesh.faces.len() * 3 / 2);
    for (f_idx, &[v0, v1, v2]) in mesh.faces.iter().enumerate() {
        for e in [[v0, v1], [v1, v2], [v2, v0]] {
            faces_around_edge.entry(ordered(e)).or_default().push(f_idx);
        }
    }
    faces_around_edge
}

/// Face adjacency of a mesh together with the label of every face.
///
/// Neighbours are kept in a compressed row layout: the neighbours of face
/// `f` are `neighbors[offsets[f]..offsets[f + 1]]`, ascending.
#[derive(Clone, Debug)]
pub struct AdjacencyGraph {
    labels: Vec<Label>,
    offsets: Vec<usize>,
    neighbors: Vec<usize>,
    num_views: usize,
}

impl AdjacencyGraph {
    pub fn new(num_faces: usize, num_views: usize) -> Self {
        Self {
            labels: vec![UNLABELED; num_faces],
            offsets: vec![0; num_faces + 1],
            neighbors: Vec::new(),
            num_views,
        }
    }

    pub fn build_edges(&mut self, mesh: &Mesh) -> Result<()> {
        if mesh.faces.len() != self.num_nodes() {
            let desc = format!(
                "graph has {} nodes but mesh has {} faces",
                self.num_nodes(),
                mesh.faces.len()
            );
            return Err(Error::new(InconsistentState, desc));
        }

        let mut adjacent = vec![Vec::new(); self.num_nodes()];
        for faces in faces_around_edges(mesh).values() {
            for (i, &f0) in faces.iter().enumerate() {
                for &f1 in &faces[i + 1..] {
                    if f0 != f1 {
                        adjacent[f0].push(f1);
                        adjacent[f1].push(f0);
                    }
                }
            }
        }

        self.offsets.clear();
        self.offsets.push(0);
        self.neighbors.clear();
        for mut fs in adjacent {
            fs.sort_unstable();
            fs.dedup();
            self.neighbors.extend(fs);
            self.offsets.push(self.neighbors.len());
        }
        Ok(())
    }

    pub fn num_nodes(&self) -> usize {
        self.labels.len()
    }

    pub fn num_views(&self) -> usize {
        self.num_views
    }

    pub fn num_edges(&self) -> usize {
        self.neighbors.len() / 2
    }

    pub fn neighbors(&self, face: usize) -> &[usize] {
        &self.neighbors[self.offsets[face]..self.offsets[face + 1]]
    }

    // Every undirected edge once, as (smaller, larger) face index.
    pub fn edges(&self) -> impl Iterator<Item = Edge> + '_ {
        (0..self.num_nodes()).flat_map(move |f0| {
            self.neighbors(f0)
                .iter()
                .filter(move |&&f1| f0 < f1)
                .map(move |&f1| [f0, f1])
        })
    }

    pub fn get_label(&self, face: usize) -> Label {
        self.labels[face]
    }

    pub fn set_label(&mut self, face: usize, label: Label) -> Result<()> {
        self.check_label(label)?;
        self.labels[face] = label;
        Ok(())
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    // Replaces all labels at once; nothing is changed on failure.
    pub fn set_labels(&mut self, labels: &[Label]) -> Result<()> {
        if labels.len() != self.num_nodes() {
            let desc = format!(
                "got {} labels for {} faces",
                labels.len(),
                self.num_nodes()
            );
            return Err(Error::new(InconsistentState, desc));
        }
        for &label in labels {
            self.check_label(label)?;
        }
        self.labels.copy_from_slice(labels);
        Ok(())
    }

    fn check_label(&self, label: Label) -> Result<()> {
        if label > self.num_views {
            let desc = format!(
                "label {} is out of range (there are {} views)",
                label, self.num_views
            );
            return Err(Error::new(InvalidLabel, desc));
        }
        Ok(())
    }

    /// Maximal connected groups of faces sharing a label, ordered by their
    /// smallest face index (faces inside a group ascend as well).
    pub fn components(&self) -> Vec<Vec<usize>> {
        let mut partition = UnionFind::new(self.num_nodes());
        for [f0, f1] in self.edges() {
            if self.labels[f0] == self.labels[f1] {
                partition.union(f0, f1);
            }
        }

        let mut group_of_repr = HashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for (face, repr) in partition.into_labeling().into_iter().enumerate() {
            let group = *group_of_repr.entry(repr).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[group].push(face);
        }
        groups
    }

    pub fn save_labeling<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut data = Vec::with_capacity((self.labels.len() + 1) * 8);
        data.write_all(&(self.labels.len() as u64).to_le_bytes())?;
        for &label in &self.labels {
            data.write_all(&(label as u64).to_le_bytes())?;
        }
        fs::write_file(path, &data)?;
        info!("  Saved {} labels to '{}'", self.labels.len(), path.display());
        Ok(())
    }

    /// Loads labels written by `save_labeling`. The file must hold exactly
    /// one label per face and every label must name a view.
    pub fn load_labeling<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let labels = read_labeling(&fs::read_file(path)?)
            .map_err(|err| describe_file(err, "labeling", path))?;
        self.set_labels(&labels)
            .map_err(|err| describe_file(err, "labeling", path))?;
        info!(
            "  Loaded {} labels from '{}'",
            labels.len(),
            path.display()
        );
        Ok(())
    }
}

pub(crate) fn describe_file(err: Error, what: &str, path: &Path) -> Error {
    Error {
        description: format!(
            "{} file '{}': {}",
            what,
            path.display(),
            err.description
        ),
        ..err
    }
}

fn read_u64(reader: &mut &[u8]) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).map_err(|_| {
        Error::new(FormatError, "unexpected end of data".to_string())
    })?;
    Ok(u64::from_le_bytes(buf))
}

fn read_labeling(mut data: &[u8]) -> Result<Vec<Label>> {
    let count = read_u64(&mut data)? as usize;
    if data.len() != count.saturating_mul(8) {
        let desc = format!(
            "header announces {} labels, but {} bytes of labels follow",
            count,
            data.len()
        );
        return Err(Error::new(FormatError, desc));
    }
    (0..count)
        .map(|_| {
            let label = read_u64(&mut data)?;
            usize::try_from(label).res(|| format!("label {} overflows", label))
        })
        .collect()
}
