use std::path::{Path, PathBuf};

use image::RgbImage;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use base::defs::{Error, ErrorKind::*, IntoResult, Result};
use base::util::fs;

use crate::texture::{CameraIntrinsics, Matrix3, TextureView, Vector3};

const CAMERA_EXTENSION: &str = "cam";
const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SceneView {
    pub name: String,
    // Relative to the directory of the scene file.
    pub image: PathBuf,
    pub intrinsics: CameraIntrinsics,
    // Row-major world to camera rotation.
    pub rotation: [[f64; 3]; 3],
    pub translation: [f64; 3],
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Scene {
    pub views: Vec<SceneView>,
}

/// Loads texture views either from a JSON scene file or from a directory
/// holding images side by side with `.cam` camera files.
pub fn load_scene<P: AsRef<Path>>(path: P) -> Result<Vec<TextureView>> {
    let path = path.as_ref();
    let views = if path.is_dir() {
        load_camera_directory(path)?
    } else {
        load_scene_file(path)?
    };

    if views.is_empty() {
        let desc = format!("scene '{}' contains no views", path.display());
        return Err(Error::new(MalformedData, desc));
    }

    info!("  Loaded {} views", views.len());
    Ok(views)
}

fn load_scene_file(path: &Path) -> Result<Vec<TextureView>> {
    let json = fs::read_file_to_string(path)?;
    let scene: Scene = serde_json::from_str(&json)
        .res(|| format!("failed to parse scene file '{}'", path.display()))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new(""));

    scene
        .views
        .into_iter()
        .map(|view| {
            let image = load_image(&base_dir.join(&view.image))?;
            let rotation = Matrix3::from_fn(|r, c| view.rotation[r][c]);
            Ok(TextureView::new(
                &view.name,
                view.intrinsics,
                rotation,
                Vector3::from(view.translation),
                image,
            ))
        })
        .collect()
}

fn load_camera_directory(dir: &Path) -> Result<Vec<TextureView>> {
    let entries = std::fs::read_dir(dir)
        .res(|| format!("failed to list directory '{}'", dir.display()))?;
    let mut cam_paths = Vec::new();
    for entry in entries {
        let path = entry
            .res(|| format!("failed to list directory '{}'", dir.display()))?
            .path();
        if path.extension().and_then(|e| e.to_str()) == Some(CAMERA_EXTENSION)
        {
            cam_paths.push(path);
        }
    }
    // Views are labeled in the order of their names.
    cam_paths.sort();

    let mut views = Vec::with_capacity(cam_paths.len());
    for cam_path in cam_paths {
        let image_path = IMAGE_EXTENSIONS
            .iter()
            .map(|ext| cam_path.with_extension(ext))
            .find(|p| p.is_file());
        let image_path = match image_path {
            Some(path) => path,
            None => {
                warn!("  No image for camera '{}', skipping", cam_path.display());
                continue;
            }
        };

        let text = fs::read_file_to_string(&cam_path)?;
        let (intrinsics, rotation, translation) = parse_camera(&text)
            .map_err(|mut err| {
                err.description = format!(
                    "camera file '{}': {}",
                    cam_path.display(),
                    err.description
                );
                err
            })?;
        let name = cam_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        views.push(TextureView::new(
            name,
            intrinsics,
            rotation,
            translation,
            load_image(&image_path)?,
        ));
    }
    Ok(views)
}

/// Parses a camera file of two lines: `tx ty tz r00 r01 .. r22` and
/// `f d0 d1 pixel_aspect ppx ppy`. Distortion is ignored.
pub fn parse_camera(text: &str) -> Result<(CameraIntrinsics, Matrix3, Vector3)> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let mut parse_line = |what: &str, min: usize| -> Result<Vec<f64>> {
        let line = lines.next().ok_or_else(|| {
            Error::new(MalformedData, format!("missing {} line", what))
        })?;
        let values = line
            .split_whitespace()
            .map(|s| s.parse::<f64>())
            .collect::<std::result::Result<Vec<f64>, _>>()
            .map_err(|_| {
                Error::new(MalformedData, format!("malformed {} line", what))
            })?;
        if values.len() < min {
            let desc = format!(
                "{} line has {} values, expected {}",
                what,
                values.len(),
                min
            );
            return Err(Error::new(MalformedData, desc));
        }
        Ok(values)
    };

    let extrinsics = parse_line("extrinsics", 12)?;
    let intrinsics = parse_line("intrinsics", 1)?;
    let (translation, rotation) = extrinsics_from_values(&extrinsics);

    let value = |i: usize, default: f64| intrinsics.get(i).copied().unwrap_or(default);
    let intrinsics = CameraIntrinsics {
        focal_length: intrinsics[0],
        principal_point: [value(4, 0.5), value(5, 0.5)],
        pixel_aspect: value(3, 1.0),
    };
    validate_intrinsics(&intrinsics)?;
    Ok((intrinsics, rotation, translation))
}

// Takes `tx ty tz` followed by the row-major rotation.
fn extrinsics_from_values(values: &[f64]) -> (Vector3, Matrix3) {
    let translation = Vector3::new(values[0], values[1], values[2]);
    let rotation = Matrix3::from_row_slice(&values[3..12]);
    (translation, rotation)
}

fn validate_intrinsics(intrinsics: &CameraIntrinsics) -> Result<()> {
    if !(intrinsics.focal_length > 0.0) || !(intrinsics.pixel_aspect > 0.0) {
        let desc = format!(
            "bad focal length {} or pixel aspect {}",
            intrinsics.focal_length, intrinsics.pixel_aspect
        );
        return Err(Error::new(MalformedData, desc));
    }
    Ok(())
}

fn load_image(path: &Path) -> Result<RgbImage> {
    Ok(image::open(path)
        .res(|| format!("failed to load image '{}'", path.display()))?
        .to_rgb8())
}

/// Builds views from in-memory RGB buffers of equal size, for embedding
/// the pipeline without touching the file system.
///
/// Every intrinsics entry is `[f, ppx, ppy, pixel_aspect]` (trailing values
/// optional) and every extrinsics entry is `[tx, ty, tz, r00, .., r22]`.
pub fn views_from_buffers(
    width: u32,
    height: u32,
    images: Vec<Vec<u8>>,
    intrinsics: &[Vec<f64>],
    extrinsics: &[Vec<f64>],
) -> Result<Vec<TextureView>> {
    if images.len() != intrinsics.len() || images.len() != extrinsics.len() {
        let desc = format!(
            "got {} images, {} intrinsics and {} extrinsics",
            images.len(),
            intrinsics.len(),
            extrinsics.len()
        );
        return Err(Error::new(InvalidArgument, desc));
    }

    let mut views = Vec::with_capacity(images.len());
    for (i, data) in images.into_iter().enumerate() {
        let bad_view = |what: &str| {
            Error::new(InvalidArgument, format!("view {}: bad {}", i, what))
        };

        let image =
            RgbImage::from_raw(width, height, data).ok_or_else(|| bad_view("image buffer"))?;
        let (k, e) = (&intrinsics[i], &extrinsics[i]);
        if k.is_empty() {
            return Err(bad_view("intrinsics"));
        }
        if e.len() != 12 {
            return Err(bad_view("extrinsics"));
        }

        let camera = CameraIntrinsics {
            focal_length: k[0],
            principal_point: [
                k.get(1).copied().unwrap_or(0.5),
                k.get(2).copied().unwrap_or(0.5),
            ],
            pixel_aspect: k.get(3).copied().unwrap_or(1.0),
        };
        validate_intrinsics(&camera).map_err(|_| bad_view("intrinsics"))?;
        let (translation, rotation) = extrinsics_from_values(e);
        views.push(TextureView::new(
            &format!("view{:04}", i),
            camera,
            rotation,
            translation,
            image,
        ));
    }
    Ok(views)
}
