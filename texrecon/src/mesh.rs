use base::defs::{Error, ErrorKind::*, Result};

use crate::texture::{Point3, Vector3};

#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub vertices: Vec<Point3>,
    pub normals: Vec<Vector3>,
    pub faces: Vec<[usize; 3]>,
}

impl Mesh {
    pub fn validate(&self) -> Result<()> {
        if self.faces.is_empty() {
            let desc = "mesh has no faces".to_string();
            return Err(Error::new(MalformedData, desc));
        }
        if self.normals.len() != self.vertices.len() {
            let desc = format!(
                "mesh has {} vertices but {} normals",
                self.vertices.len(),
                self.normals.len()
            );
            return Err(Error::new(InconsistentState, desc));
        }
        for (f_idx, face) in self.faces.iter().enumerate() {
            if let Some(&v) = face.iter().find(|&&v| v >= self.vertices.len())
            {
                let desc =
                    format!("face {} references missing vertex {}", f_idx, v);
                return Err(Error::new(MalformedData, desc));
            }
        }
        Ok(())
    }

    // Recomputes vertex normals as area weighted averages of face normals.
    pub fn compute_normals(&mut self) {
        let mut normals = vec![Vector3::zeros(); self.vertices.len()];
        for &[v0, v1, v2] in &self.faces {
            let e1 = self.vertices[v1] - self.vertices[v0];
            let e2 = self.vertices[v2] - self.vertices[v0];
            let n = e1.cross(&e2);
            normals[v0] += n;
            normals[v1] += n;
            normals[v2] += n;
        }
        for n in normals.iter_mut() {
            *n = n.try_normalize(0.0).unwrap_or_else(Vector3::zeros);
        }
        self.normals = normals;
    }

    pub fn face_vertices(&self, face_idx: usize) -> [Point3; 3] {
        let [v0, v1, v2] = self.faces[face_idx];
        [self.vertices[v0], self.vertices[v1], self.vertices[v2]]
    }

    // Geometric normal following the counter-clockwise winding.
    pub fn face_normal(&self, face_idx: usize) -> Vector3 {
        let [p0, p1, p2] = self.face_vertices(face_idx);
        (p1 - p0)
            .cross(&(p2 - p0))
            .try_normalize(0.0)
            .unwrap_or_else(Vector3::zeros)
    }

    pub fn face_centroid(&self, face_idx: usize) -> Point3 {
        let [p0, p1, p2] = self.face_vertices(face_idx);
        Point3::from((p0.coords + p1.coords + p2.coords) / 3.0)
    }

    pub fn face_area(&self, face_idx: usize) -> f64 {
        let [p0, p1, p2] = self.face_vertices(face_idx);
        (p1 - p0).cross(&(p2 - p0)).norm() / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::test_util::cube_mesh;
    use base::assert_eq_f64;

    #[test]
    fn test_cube_normals_point_outwards() {
        let mut mesh = cube_mesh();
        mesh.validate().unwrap();
        for f in 0..mesh.faces.len() {
            let centroid = mesh.face_centroid(f).coords;
            assert!(mesh.face_normal(f).dot(&centroid) > 0.0);
            assert_eq_f64!(mesh.face_area(f), 2.0);
        }
        mesh.compute_normals();
        for (v, n) in mesh.vertices.iter().zip(mesh.normals.iter()) {
            assert_eq_f64!(n.norm(), 1.0);
            assert!(n.dot(&v.coords) > 0.0);
        }
    }

    #[test]
    fn test_validate_rejects_bad_index() {
        let mut mesh = cube_mesh();
        mesh.faces[3][1] = 42;
        let err = mesh.validate().unwrap_err();
        assert_eq!(err.kind, MalformedData);
        assert_eq!(&err.description, "face 3 references missing vertex 42");
    }
}
