use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::texture::*;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct CameraIntrinsics {
    // Normalized by the larger image dimension.
    pub focal_length: f64,
    // Normalized to the image size, (0.5, 0.5) is the image centre.
    #[serde(default = "default_principal_point")]
    pub principal_point: [f64; 2],
    #[serde(default = "default_pixel_aspect")]
    pub pixel_aspect: f64,
}

fn default_principal_point() -> [f64; 2] {
    [0.5, 0.5]
}

fn default_pixel_aspect() -> f64 {
    1.0
}

/// A calibrated photograph that can texture mesh faces.
///
/// Extrinsics map world points into camera space as `R * p + t`; the camera
/// looks along +z with the image y axis pointing down.
#[derive(Clone, Debug)]
pub struct TextureView {
    pub name: String,
    pub intrinsics: CameraIntrinsics,
    pub rotation: Matrix3,
    pub translation: Vector3,
    pub image: RgbImage,
}

impl TextureView {
    pub fn new(
        name: &str,
        intrinsics: CameraIntrinsics,
        rotation: Matrix3,
        translation: Vector3,
        image: RgbImage,
    ) -> Self {
        Self {
            name: name.to_string(),
            intrinsics,
            rotation,
            translation,
            image,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn position(&self) -> Point3 {
        Point3::from(-(self.rotation.transpose() * self.translation))
    }

    pub fn viewing_direction(&self) -> Vector3 {
        self.rotation.transpose() * Vector3::z()
    }

    /// Projects a world point into pixel coordinates, also returning its
    /// depth. Points behind the camera yield `None`.
    pub fn project(&self, point: &Point3) -> Option<(Vector2, f64)> {
        let c = self.rotation * point.coords + self.translation;
        if c[2] <= 0.0 {
            return None;
        }
        let (w, h) = (self.width() as f64, self.height() as f64);
        let fx = self.intrinsics.focal_length * w.max(h);
        let fy = fx * self.intrinsics.pixel_aspect;
        let [ppx, ppy] = self.intrinsics.principal_point;
        let pixel =
            Vector2::new(fx * c[0] / c[2] + ppx * w, fy * c[1] / c[2] + ppy * h);
        Some((pixel, c[2]))
    }

    // Keeps a one pixel margin so that bilinear sampling stays inside.
    pub fn valid_pixel(&self, pixel: Vector2) -> bool {
        let (w, h) = (self.width() as f64, self.height() as f64);
        pixel[0] >= 1.0
            && pixel[0] <= w - 1.0
            && pixel[1] >= 1.0
            && pixel[1] <= h - 1.0
    }

    pub fn sample(&self, pixel: Vector2) -> Color {
        sample_pixel(&self.image, pixel)
    }

    /// Replaces the photograph by a flat color identifying the view, which
    /// turns a textured model into a picture of the labeling decision.
    pub fn apply_debug_color(&mut self, label: Label) {
        let color = debug_color(label);
        for pixel in self.image.pixels_mut() {
            *pixel = color;
        }
    }
}

// Well separated hues by stepping around the color wheel by the golden angle.
pub fn debug_color(label: Label) -> Rgb<u8> {
    const GOLDEN_RATIO_CONJUGATE: f64 = 0.618_033_988_749_895;
    let hue = (label as f64 * GOLDEN_RATIO_CONJUGATE).fract() * 6.0;
    let (s, v) = (0.7, 0.95);
    let sector = hue.floor() as u32 % 6;
    let f = hue - hue.floor();
    let (p, q, t) = (v * (1.0 - s), v * (1.0 - s * f), v * (1.0 - s * (1.0 - f)));
    let (r, g, b) = match sector {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    color_to_rgb(Color::new(r, g, b) * 255.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::test_util::*;
    use base::assert_eq_f64;

    #[test]
    fn test_look_at_projects_target_to_principal_point() {
        let view = look_at_view(
            "front",
            Point3::new(0.0, 0.0, 5.0),
            Point3::origin(),
            Vector3::new(0.0, 1.0, 0.0),
            flat_image(64, 48, [10, 20, 30]),
        );
        assert_eq_f64!((view.position() - Point3::new(0.0, 0.0, 5.0)).norm(), 0.0);
        assert_eq_f64!((view.viewing_direction() + Vector3::z()).norm(), 0.0);

        let (pixel, depth) = view.project(&Point3::origin()).unwrap();
        assert_eq_f64!(pixel[0], 32.0);
        assert_eq_f64!(pixel[1], 24.0);
        assert_eq_f64!(depth, 5.0);

        // Positive world x is right, positive world y is up (image y down).
        let (pixel, _) = view.project(&Point3::new(1.0, 1.0, 0.0)).unwrap();
        assert!(pixel[0] > 32.0);
        assert!(pixel[1] < 24.0);
    }

    #[test]
    fn test_project_behind_camera() {
        let view = look_at_view(
            "front",
            Point3::new(0.0, 0.0, 5.0),
            Point3::origin(),
            Vector3::new(0.0, 1.0, 0.0),
            flat_image(8, 8, [0, 0, 0]),
        );
        assert!(view.project(&Point3::new(0.0, 0.0, 6.0)).is_none());
        assert!(!view.valid_pixel(Vector2::new(0.5, 4.0)));
        assert!(view.valid_pixel(Vector2::new(4.0, 4.0)));
    }

    #[test]
    fn test_debug_colors_differ() {
        let colors: Vec<Rgb<u8>> = (1..=8).map(debug_color).collect();
        for i in 0..colors.len() {
            for j in i + 1..colors.len() {
                assert_ne!(colors[i], colors[j]);
            }
        }
    }
}
