use std::collections::HashMap;

use image::RgbImage;

use crate::mesh::Mesh;
use crate::texture::*;

// UVs are merged after rounding to this resolution.
const UV_EPSILON: f64 = 1e-6;

/// Faces textured by one atlas.
#[derive(Clone, Debug)]
pub struct ModelGroup {
    pub material: String,
    // Indices into the vertex, normal and texcoord buffers alike.
    pub faces: Vec<[usize; 3]>,
    pub texture: RgbImage,
}

/// Textured model with one vertex per distinct (mesh vertex, atlas, UV).
#[derive(Clone, Debug, Default)]
pub struct Model {
    pub vertices: Vec<Point3>,
    pub normals: Vec<Vector3>,
    pub texcoords: Vec<Vector2>,
    pub groups: Vec<ModelGroup>,
}

impl Model {
    pub fn num_faces(&self) -> usize {
        self.groups.iter().map(|g| g.faces.len()).sum()
    }
}

pub fn build_model(
    mesh: &Mesh,
    patches: &[TexturePatch],
    atlases: Vec<TextureAtlas>,
) -> Model {
    let quantize = |x: f64| (x / UV_EPSILON).round() as i64;
    let mut model = Model::default();
    let mut unique: HashMap<(usize, usize, [i64; 2]), usize> = HashMap::new();

    for (a_idx, atlas) in atlases.into_iter().enumerate() {
        let mut faces = Vec::new();
        for entry in &atlas.entries {
            let patch = &patches[entry.patch];
            for (&f_idx, texcoords) in patch.faces.iter().zip(&patch.texcoords) {
                let mut face = [0; 3];
                for k in 0..3 {
                    let v = mesh.faces[f_idx][k];
                    let uv = atlas.uv(entry, texcoords[k]);
                    let key = (v, a_idx, [quantize(uv[0]), quantize(uv[1])]);
                    face[k] = *unique.entry(key).or_insert_with(|| {
                        model.vertices.push(mesh.vertices[v]);
                        model.normals.push(mesh.normals[v]);
                        model.texcoords.push(uv);
                        model.vertices.len() - 1
                    });
                }
                faces.push(face);
            }
        }
        model.groups.push(ModelGroup {
            material: format!("material{:04}", a_idx),
            faces,
            texture: atlas.image,
        });
    }
    model
}
