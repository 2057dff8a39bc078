use image::{Rgb, Rgb32FImage};
use nalgebra::DMatrix;

use crate::texture::*;

// Pixels this close to a projected triangle still carry its texture.
pub const VALIDITY_MARGIN: f64 = 1.5;

/// Texture of a connected group of faces that share a view.
///
/// Coordinates are local pixel coordinates of `image`, whose pixel (x, y)
/// covers [x, x + 1) x [y, y + 1). Colors are in [0, 255]; seam leveling
/// accumulates into `adjustments`, which is added to `image` on output.
#[derive(Clone, Debug)]
pub struct TexturePatch {
    pub label: Label,
    // Ascending face indices.
    pub faces: Vec<usize>,
    // Local coordinates of the three vertices of every face.
    pub texcoords: Vec<[Vector2; 3]>,
    pub image: Rgb32FImage,
    pub adjustments: Rgb32FImage,
    // Indexed as (y, x).
    pub validity_mask: ImageMask,
}

impl TexturePatch {
    pub fn new(
        label: Label,
        faces: Vec<usize>,
        texcoords: Vec<[Vector2; 3]>,
        image: Rgb32FImage,
    ) -> Self {
        let (width, height) = image.dimensions();
        let mut patch = Self {
            label,
            faces,
            texcoords,
            image,
            adjustments: Rgb32FImage::new(width, height),
            validity_mask: new_image_mask(width, height, false),
        };
        patch.compute_validity_mask();
        patch
    }

    // Single colored patch whose faces all map to its centre.
    pub fn flat(label: Label, faces: Vec<usize>, color: Color) -> Self {
        const SIZE: u32 = 3;
        let center = Vector2::new(SIZE as f64 / 2.0, SIZE as f64 / 2.0);
        let texcoords = vec![[center; 3]; faces.len()];
        let image =
            Rgb32FImage::from_pixel(SIZE, SIZE, color_to_rgb_f32(color));
        Self {
            label,
            faces,
            texcoords,
            image,
            adjustments: Rgb32FImage::new(SIZE, SIZE),
            validity_mask: new_image_mask(SIZE, SIZE, true),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn size(&self) -> [u32; 2] {
        [self.width(), self.height()]
    }

    pub fn num_valid_pixels(&self) -> usize {
        self.validity_mask.iter().filter(|&&v| v).count()
    }

    // Position of `face` within `faces`.
    pub fn face_position(&self, face: usize) -> Option<usize> {
        self.faces.binary_search(&face).ok()
    }

    pub fn is_valid(&self, x: u32, y: u32) -> bool {
        x < self.width()
            && y < self.height()
            && self.validity_mask[(y as usize, x as usize)]
    }

    pub fn pixel_color(&self, x: u32, y: u32) -> Color {
        let [r, g, b] = self.image.get_pixel(x, y).0;
        let [dr, dg, db] = self.adjustments.get_pixel(x, y).0;
        Color::new((r + dr) as f64, (g + dg) as f64, (b + db) as f64)
    }

    /// Adjusted color at a local position, interpolated bilinearly.
    pub fn sample(&self, p: Vector2) -> Color {
        sample_pixel_f32(&self.image, p) + sample_pixel_f32(&self.adjustments, p)
    }

    pub fn add_adjustment(&mut self, x: u32, y: u32, delta: Color) {
        let pixel = self.adjustments.get_pixel_mut(x, y);
        for c in 0..3 {
            pixel.0[c] += delta[c] as f32;
        }
    }

    // Calls `f` with every pixel within the validity margin of some face,
    // the closest face position and the barycentric coordinates of the
    // closest point of that face.
    fn for_each_covered_pixel(&self, mut f: impl FnMut(u32, u32, usize, Vector3)) {
        let (width, height) = self.image.dimensions();
        let mut best = DMatrix::from_element(
            height as usize,
            width as usize,
            (f64::INFINITY, 0usize, Vector3::zeros()),
        );
        for (face_pos, &vs) in self.texcoords.iter().enumerate() {
            let bcs = match BarycentricCoordinateSystem::new(vs) {
                Some(bcs) => bcs,
                None => continue, // Degenerate projection.
            };
            let xs = vs.map(|v| v[0]);
            let ys = vs.map(|v| v[1]);
            let lo = |c: [f64; 3]| {
                (c.iter().cloned().fold(f64::INFINITY, f64::min) - VALIDITY_MARGIN)
                    .floor()
                    .max(0.0) as u32
            };
            let hi = |c: [f64; 3], limit: u32| {
                ((c.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
                    + VALIDITY_MARGIN)
                    .ceil()
                    .max(0.0) as u32)
                    .min(limit)
            };
            for y in lo(ys)..hi(ys, height) {
                for x in lo(xs)..hi(xs, width) {
                    let (dist, bary) = bcs.coverage(pixel_center(x, y));
                    let entry = &mut best[(y as usize, x as usize)];
                    if dist <= VALIDITY_MARGIN && dist < entry.0 {
                        *entry = (dist, face_pos, bary);
                    }
                }
            }
        }
        for y in 0..height {
            for x in 0..width {
                let (dist, face_pos, bary) = best[(y as usize, x as usize)];
                if dist.is_finite() {
                    f(x, y, face_pos, bary);
                }
            }
        }
    }

    pub fn compute_validity_mask(&mut self) {
        let (width, height) = self.image.dimensions();
        let mut mask = new_image_mask(width, height, false);
        self.for_each_covered_pixel(|x, y, _, _| {
            mask[(y as usize, x as usize)] = true;
        });
        self.validity_mask = mask;
    }

    /// Adds per face vertex adjustments (indexed like `texcoords`) to every
    /// valid pixel, interpolated over the closest face.
    pub fn adjust_colors(&mut self, values: &[[Color; 3]]) {
        let mut deltas = Vec::new();
        self.for_each_covered_pixel(|x, y, face_pos, bary| {
            let [a, b, c] = values[face_pos];
            deltas.push((x, y, a * bary[0] + b * bary[1] + c * bary[2]));
        });
        for (x, y, delta) in deltas {
            if self.validity_mask[(y as usize, x as usize)] {
                self.add_adjustment(x, y, delta);
            }
        }
    }

    // Final colors of all pixels, clamped to [0, 255].
    pub fn adjusted_pixel(&self, x: u32, y: u32) -> Rgb<u8> {
        color_to_rgb(self.pixel_color(x, y))
    }
}
