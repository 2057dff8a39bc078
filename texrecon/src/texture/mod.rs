mod adjacency_graph;
mod data_costs;
mod maxflow;
mod model;
mod patch_generation;
mod progress;
mod seam_leveling;
mod settings;
mod texture_atlas;
mod texture_patch;
mod texture_view;
mod view_selection;

#[cfg(test)]
pub(crate) mod test_util;

use std::cmp::Ordering;
use std::ops::Sub;

use image::{Rgb, Rgb32FImage, RgbImage};
use nalgebra::{DMatrix, Dynamic};

pub use crate::texture::{
    adjacency_graph::*, data_costs::*, model::*, patch_generation::*,
    progress::*, seam_leveling::*, settings::*, texture_atlas::*,
    texture_patch::*, texture_view::*, view_selection::*,
};

pub type Vector3 = nalgebra::Vector3<f64>;
pub type Point3 = nalgebra::Point3<f64>;
pub type Vector2 = nalgebra::Vector2<f64>;
pub type Matrix2 = nalgebra::Matrix2<f64>;
pub type Matrix3 = nalgebra::Matrix3<f64>;

// RGB with channels in [0, 255].
pub type Color = Vector3;

// Indexed as (row, column), i.e. (y, x) in pixel terms.
pub type ImageMask = DMatrix<bool>;

pub type Label = usize;

// Label of faces without any suitable view.
pub const UNLABELED: Label = 0;

pub fn new_image_mask(width: u32, height: u32, value: bool) -> ImageMask {
    ImageMask::from_element_generic(
        Dynamic::new(height as usize),
        Dynamic::new(width as usize),
        value,
    )
}

// Pixel (x, y) covers [x, x + 1) x [y, y + 1), so its centre is at +0.5.
pub fn pixel_center(x: u32, y: u32) -> Vector2 {
    Vector2::new(x as f64 + 0.5, y as f64 + 0.5)
}

fn sample_bilinear_with(
    (width, height): (u32, u32),
    p: Vector2,
    fetch: impl Fn(u32, u32) -> Color,
) -> Color {
    if width == 0 || height == 0 {
        return Color::zeros();
    }
    let fx = (p[0] - 0.5).clamp(0.0, (width - 1) as f64);
    let fy = (p[1] - 0.5).clamp(0.0, (height - 1) as f64);
    let (x0, y0) = (fx.floor() as u32, fy.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(width - 1), (y0 + 1).min(height - 1));
    let (dx, dy) = (fx - x0 as f64, fy - y0 as f64);
    let s0 = (1.0 - dx) * fetch(x0, y0) + dx * fetch(x1, y0);
    let s1 = (1.0 - dx) * fetch(x0, y1) + dx * fetch(x1, y1);
    (1.0 - dy) * s0 + dy * s1
}

pub fn sample_pixel(image: &RgbImage, p: Vector2) -> Color {
    sample_bilinear_with(image.dimensions(), p, |x, y| {
        get_pixel_as_color(image, x, y)
    })
}

pub fn sample_pixel_f32(image: &Rgb32FImage, p: Vector2) -> Color {
    sample_bilinear_with(image.dimensions(), p, |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        Color::new(r as f64, g as f64, b as f64)
    })
}

pub fn get_pixel_as_color(image: &RgbImage, x: u32, y: u32) -> Color {
    let [r, g, b] = image.get_pixel(x, y).0;
    Color::new(r as f64, g as f64, b as f64)
}

pub fn color_to_rgb(color: Color) -> Rgb<u8> {
    let f = |c: f64| c.clamp(0.0, 255.0).round() as u8;
    Rgb([f(color[0]), f(color[1]), f(color[2])])
}

pub fn color_to_rgb_f32(color: Color) -> Rgb<f32> {
    Rgb([color[0] as f32, color[1] as f32, color[2] as f32])
}

pub struct BarycentricCoordinateSystem {
    vs: [Vector2; 3],
    n22: nalgebra::QR<f64, nalgebra::U2, nalgebra::U2>,
}

impl BarycentricCoordinateSystem {
    pub fn new(vs: [Vector2; 3]) -> Option<Self> {
        let m22 = Matrix2::from_columns(&[vs[1] - vs[0], vs[2] - vs[0]]);
        let n22 = m22.qr();
        if n22.is_invertible() {
            Some(Self { vs, n22 })
        } else {
            None // The triangle is degenerate.
        }
    }

    // The functions 'infer' and 'apply' are mutually inverse.

    pub fn infer(&self, v: Vector2) -> Vector3 {
        match self.n22.solve(&(v - self.vs[0])) {
            Some(l) => Vector3::new(1.0 - l[0] - l[1], l[0], l[1]),
            None => Vector3::new(1.0, 0.0, 0.0),
        }
    }

    // Assuming the input 'u' sums to 1.0.
    pub fn apply(&self, u: Vector3) -> Vector2 {
        u[0] * self.vs[0] + u[1] * self.vs[1] + u[2] * self.vs[2]
    }

    // Distance from 'p' to the triangle (zero inside) together with the
    // barycentric coordinates of the closest point of the triangle.
    pub fn coverage(&self, p: Vector2) -> (f64, Vector3) {
        let bary = self.infer(p);
        if all_nonneg(bary) {
            return (0.0, bary);
        }

        let mut best = (f64::INFINITY, bary);
        for (a, b) in [(0, 1), (1, 2), (2, 0)] {
            let (va, vb) = (self.vs[a], self.vs[b]);
            let ab = vb - va;
            let len2 = ab.norm_squared();
            let t = if len2 > 0.0 {
                ((p - va).dot(&ab) / len2).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let dist = (va + t * ab - p).norm();
            if dist < best.0 {
                let mut coords = Vector3::zeros();
                coords[a] = 1.0 - t;
                coords[b] = t;
                best = (dist, coords);
            }
        }
        best
    }
}

pub fn all_nonneg(v: Vector3) -> bool {
    v.iter().all(|&c| c >= 0.0)
}

pub fn triangle_area(vs: [Vector2; 3]) -> f64 {
    let (a, b) = (vs[1] - vs[0], vs[2] - vs[0]);
    (a[0] * b[1] - a[1] * b[0]).abs() / 2.0
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Rectangle<T> {
    pub pos: [T; 2],
    pub size: [T; 2],
}

type Comparator<T> = fn(&T, &T) -> Ordering;

pub fn extremum<
    T: Copy + PartialOrd + Sub<Output = T>,
    I: Iterator<Item = T>,
>(
    it: I,
    f: fn(I, Comparator<T>) -> Option<T>,
) -> Option<T> {
    f(it, |p, q| p.partial_cmp(q).unwrap_or(Ordering::Equal))
}

impl<T> Rectangle<T> {
    pub fn bounding(xys: &[[T; 2]]) -> Option<Rectangle<T>>
    where
        T: Copy + PartialOrd + Sub<Output = T>,
    {
        let xys_coord = |k: usize| xys.iter().map(move |xy| xy[k]);

        let xmin = extremum(xys_coord(0), Iterator::min_by)?;
        let xmax = extremum(xys_coord(0), Iterator::max_by)?;
        let ymin = extremum(xys_coord(1), Iterator::min_by)?;
        let ymax = extremum(xys_coord(1), Iterator::max_by)?;

        Some(Rectangle {
            pos: [xmin, ymin],
            size: [xmax - xmin, ymax - ymin],
        })
    }
}

impl Rectangle<u32> {
    pub fn overlaps(&self, other: &Rectangle<u32>) -> bool {
        let disjoint = |a: &Rectangle<u32>, b: &Rectangle<u32>, k: usize| {
            a.pos[k] + a.size[k] <= b.pos[k]
        };
        !(0..2).any(|k| disjoint(self, other, k) || disjoint(other, self, k))
    }
}

pub fn ordered(e: [usize; 2]) -> [usize; 2] {
    if e[0] < e[1] {
        e
    } else {
        [e[1], e[0]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base::assert_eq_f64;

    #[test]
    fn test_barycentric_round_trip() {
        let bcs = BarycentricCoordinateSystem::new([
            Vector2::new(0.0, 0.0),
            Vector2::new(4.0, 0.0),
            Vector2::new(0.0, 2.0),
        ])
        .unwrap();
        let p = Vector2::new(1.0, 0.5);
        let bary = bcs.infer(p);
        assert_eq_f64!(bary.sum(), 1.0);
        assert_eq_f64!((bcs.apply(bary) - p).norm(), 0.0);
    }

    #[test]
    fn test_degenerate_triangle() {
        let p = Vector2::new(1.0, 1.0);
        assert!(BarycentricCoordinateSystem::new([p, p * 2.0, p * 3.0])
            .is_none());
    }

    #[test]
    fn test_coverage_outside_triangle() {
        let bcs = BarycentricCoordinateSystem::new([
            Vector2::new(0.0, 0.0),
            Vector2::new(4.0, 0.0),
            Vector2::new(0.0, 4.0),
        ])
        .unwrap();
        let (dist, bary) = bcs.coverage(Vector2::new(2.0, -1.0));
        assert_eq_f64!(dist, 1.0);
        assert_eq_f64!(bary[0], 0.5);
        assert_eq_f64!(bary[1], 0.5);
        assert_eq!(bcs.coverage(Vector2::new(1.0, 1.0)).0, 0.0);
    }

    #[test]
    fn test_sample_pixel_interpolates() {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(0, 0, Rgb([0, 0, 0]));
        image.put_pixel(1, 0, Rgb([100, 200, 50]));
        let c = sample_pixel(&image, Vector2::new(1.0, 0.5));
        assert_eq_f64!(c[0], 50.0);
        assert_eq_f64!(c[1], 100.0);
        let c = sample_pixel(&image, Vector2::new(10.0, 10.0));
        assert_eq_f64!(c[2], 50.0);
    }

    #[test]
    fn test_rectangle_overlap() {
        let a = Rectangle { pos: [0, 0], size: [10, 10] };
        let b = Rectangle { pos: [10, 0], size: [5, 5] };
        let c = Rectangle { pos: [9, 9], size: [5, 5] };
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&a));
    }

    #[test]
    fn test_bounding_rectangle() {
        let r = Rectangle::bounding(&[[3.0, 1.0], [-1.0, 2.0], [0.0, 5.0]])
            .unwrap();
        assert_eq!(r.pos, [-1.0, 1.0]);
        assert_eq!(r.size, [4.0, 4.0]);
        assert!(Rectangle::<f64>::bounding(&[]).is_none());
    }
}
