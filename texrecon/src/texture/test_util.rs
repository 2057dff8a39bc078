// Synthetic meshes and views shared by the texturing tests.

use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::mesh::Mesh;
use crate::texture::*;

// Axis aligned cube [-1, 1]^3 with counter-clockwise outward faces ordered
// +x, +y, +z, -x, -y, -z (two triangles each).
pub fn cube_mesh() -> Mesh {
    let vertices = vec![
        Point3::new(-1.0, -1.0, -1.0),
        Point3::new(1.0, -1.0, -1.0),
        Point3::new(1.0, 1.0, -1.0),
        Point3::new(-1.0, 1.0, -1.0),
        Point3::new(-1.0, -1.0, 1.0),
        Point3::new(1.0, -1.0, 1.0),
        Point3::new(1.0, 1.0, 1.0),
        Point3::new(-1.0, 1.0, 1.0),
    ];
    let normals = vertices.iter().map(|v| v.coords.normalize()).collect();
    let faces = vec![
        [1, 2, 6],
        [1, 6, 5],
        [3, 7, 6],
        [3, 6, 2],
        [4, 5, 6],
        [4, 6, 7],
        [0, 4, 7],
        [0, 7, 3],
        [0, 1, 5],
        [0, 5, 4],
        [0, 2, 1],
        [0, 3, 2],
    ];
    Mesh {
        vertices,
        normals,
        faces,
    }
}

// Planar n x n grid of unit quads in the z = 0 plane centred at the origin,
// facing +z.
pub fn grid_mesh(n: usize) -> Mesh {
    let idx = |i: usize, j: usize| j * (n + 1) + i;
    let half = n as f64 / 2.0;
    let mut mesh = Mesh::default();
    for j in 0..=n {
        for i in 0..=n {
            mesh.vertices
                .push(Point3::new(i as f64 - half, j as f64 - half, 0.0));
            mesh.normals.push(Vector3::z());
        }
    }
    for j in 0..n {
        for i in 0..n {
            mesh.faces.push([idx(i, j), idx(i + 1, j), idx(i + 1, j + 1)]);
            mesh.faces.push([idx(i, j), idx(i + 1, j + 1), idx(i, j + 1)]);
        }
    }
    mesh
}

pub fn flat_image(width: u32, height: u32, color: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb(color))
}

pub fn noisy_image(
    width: u32,
    height: u32,
    color: [u8; 3],
    amplitude: u8,
    seed: u64,
) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut image = flat_image(width, height, color);
    for pixel in image.pixels_mut() {
        for c in pixel.0.iter_mut() {
            let noise = rng.gen_range(-(amplitude as i32)..=amplitude as i32);
            *c = (*c as i32 + noise).clamp(0, 255) as u8;
        }
    }
    image
}

pub fn look_at_view(
    name: &str,
    eye: Point3,
    target: Point3,
    up: Vector3,
    image: RgbImage,
) -> TextureView {
    let forward = (target - eye).normalize();
    let right = forward.cross(&up).normalize();
    let down = forward.cross(&right);
    let rotation = Matrix3::from_rows(&[
        right.transpose(),
        down.transpose(),
        forward.transpose(),
    ]);
    let translation = -(rotation * eye.coords);
    let intrinsics = CameraIntrinsics {
        focal_length: 1.0,
        principal_point: [0.5, 0.5],
        pixel_aspect: 1.0,
    };
    TextureView::new(name, intrinsics, rotation, translation, image)
}

// View 1 sees the +x, +y, +z sides and view 2 the opposite ones.
pub fn cube_views(color1: [u8; 3], color2: [u8; 3]) -> Vec<TextureView> {
    let up = Vector3::z();
    vec![
        look_at_view(
            "front",
            Point3::new(3.0, 3.0, 3.0),
            Point3::origin(),
            up,
            flat_image(64, 64, color1),
        ),
        look_at_view(
            "back",
            Point3::new(-3.0, -3.0, -3.0),
            Point3::origin(),
            up,
            flat_image(64, 64, color2),
        ),
    ]
}

// Cameras above the grid looking straight down, offset along x.
pub fn grid_views(images: Vec<RgbImage>, offsets: &[f64]) -> Vec<TextureView> {
    images
        .into_iter()
        .zip(offsets.iter())
        .enumerate()
        .map(|(i, (image, &dx))| {
            look_at_view(
                &format!("top{}", i),
                Point3::new(dx, 0.0, 10.0),
                Point3::new(dx, 0.0, 0.0),
                Vector3::y(),
                image,
            )
        })
        .collect()
}

// Data costs from explicit (face, label, cost) triples.
pub fn data_costs_from(
    num_faces: usize,
    num_views: usize,
    entries: &[(usize, Label, f32)],
) -> DataCosts {
    let mut per_face = vec![Vec::new(); num_faces];
    for &(face, label, cost) in entries {
        per_face[face].push((label, cost));
    }
    DataCosts::from_face_costs(num_views, per_face)
}
