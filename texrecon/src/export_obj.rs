use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::info;

use base::defs::{IntoResult, Result};
use base::util::fs;

use crate::texture::Model;

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut path = prefix.as_os_str().to_os_string();
    path.push(suffix);
    PathBuf::from(path)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Writes `<prefix>.obj`, `<prefix>.mtl` and one PNG texture per group.
pub fn save_model<P: AsRef<Path>>(model: &Model, prefix: P) -> Result<()> {
    let prefix = prefix.as_ref();
    let obj_path = with_suffix(prefix, ".obj");
    let mtl_path = with_suffix(prefix, ".mtl");

    let mut texture_paths = Vec::with_capacity(model.groups.len());
    for group in &model.groups {
        let path = with_suffix(prefix, &format!("_{}_map_Kd.png", group.material));
        group
            .texture
            .save(&path)
            .res(|| format!("failed to write texture '{}'", path.display()))?;
        texture_paths.push(path);
    }

    let mtl_err = || format!("failed to write file '{}'", mtl_path.display());
    let obj_err = || format!("failed to write file '{}'", obj_path.display());

    let mut writer = BufWriter::new(fs::create_file(&mtl_path)?);
    for (group, texture_path) in model.groups.iter().zip(&texture_paths) {
        writeln!(writer, "newmtl {}", group.material).res(mtl_err)?;
        writeln!(writer, "Ka 0.000000 0.000000 0.000000").res(mtl_err)?;
        writeln!(writer, "Kd 1.000000 1.000000 1.000000").res(mtl_err)?;
        writeln!(writer, "Ks 0.000000 0.000000 0.000000").res(mtl_err)?;
        writeln!(writer, "map_Kd {}", file_name(texture_path)).res(mtl_err)?;
    }
    writer.flush().res(mtl_err)?;

    let mut writer = BufWriter::new(fs::create_file(&obj_path)?);
    writeln!(writer, "mtllib {}", file_name(&mtl_path)).res(obj_err)?;
    for v in &model.vertices {
        writeln!(writer, "v {:.6} {:.6} {:.6}", v[0], v[1], v[2]).res(obj_err)?;
    }
    for vt in &model.texcoords {
        writeln!(writer, "vt {:.6} {:.6}", vt[0], vt[1]).res(obj_err)?;
    }
    for vn in &model.normals {
        writeln!(writer, "vn {:.6} {:.6} {:.6}", vn[0], vn[1], vn[2])
            .res(obj_err)?;
    }
    for group in &model.groups {
        writeln!(writer, "usemtl {}", group.material).res(obj_err)?;
        for f in &group.faces {
            // One-based and shared by position, texcoord and normal.
            let (a, b, c) = (f[0] + 1, f[1] + 1, f[2] + 1);
            writeln!(writer, "f {a}/{a}/{a} {b}/{b}/{b} {c}/{c}/{c}")
                .res(obj_err)?;
        }
    }
    writer.flush().res(obj_err)?;

    info!(
        "  Wrote '{}' with {} faces and {} textures",
        obj_path.display(),
        model.num_faces(),
        model.groups.len()
    );
    Ok(())
}
