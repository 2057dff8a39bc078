use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use log::info;

use base::defs::{Error, ErrorKind::*, IntoResult, Result};
use base::util::fs;

use crate::mesh::Mesh;
use crate::texture::{Point3, Vector3};

#[derive(Default)]
struct ImportState {
    line: usize,
    mesh: Mesh,
    normals: Vec<Vector3>,
    // Normal index referenced for every vertex by f-statements.
    vertex_normals: Vec<Option<usize>>,
    normals_consistent: bool,
}

pub fn load_mesh<P: AsRef<Path>>(path: P) -> Result<Mesh> {
    let path = path.as_ref();
    let file = fs::open_file(path)?;
    let mesh = import_obj(file).map_err(|mut err| {
        err.description =
            format!("mesh file '{}': {}", path.display(), err.description);
        err
    })?;
    info!(
        "  Loaded mesh with {} vertices and {} faces",
        mesh.vertices.len(),
        mesh.faces.len()
    );
    Ok(mesh)
}

/// Reads a triangle mesh from Wavefront OBJ, fan-triangulating polygons.
///
/// Vertex normals are taken from the file when every vertex is referenced
/// with one consistent normal, otherwise they are recomputed.
pub fn import_obj<R: Read>(reader: R) -> Result<Mesh> {
    let mut state = ImportState {
        normals_consistent: true,
        ..Default::default()
    };

    for line in BufReader::new(reader).lines() {
        state.line += 1;
        let line = line.res(|| format!("failed to read line {}", state.line))?;
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        match parts[0] {
            "f" => import_f(&mut state, &parts)?,
            "v" => import_v(&mut state, &parts)?,
            "vn" => import_vn(&mut state, &parts)?,
            _ => (), // Ignore comments, texcoords, groups and materials.
        }
    }

    let mut mesh = state.mesh;
    let all_referenced = state.vertex_normals.iter().all(|n| n.is_some());
    if state.normals_consistent && all_referenced && !state.normals.is_empty()
    {
        mesh.normals = state
            .vertex_normals
            .iter()
            .flatten()
            .map(|&n| {
                state.normals[n]
                    .try_normalize(0.0)
                    .unwrap_or_else(Vector3::zeros)
            })
            .collect();
    } else {
        mesh.compute_normals();
    }

    mesh.validate()?;
    Ok(mesh)
}

fn import_f(state: &mut ImportState, parts: &[&str]) -> Result<()> {
    if parts.len() < 4 {
        let desc =
            format!("bad number of vertices in f-statement at line {}", state.line);
        return Err(Error::new(MalformedData, desc));
    }

    let mut vertices = Vec::with_capacity(parts.len() - 1);
    for part in &parts[1..] {
        vertices.push(parse_f_component(state, part)?);
    }

    for i in 1..vertices.len() - 1 {
        state
            .mesh
            .faces
            .push([vertices[0], vertices[i], vertices[i + 1]]);
    }

    Ok(())
}

// Parses 'v', 'v/vt', 'v//vn' or 'v/vt/vn', returning the vertex index.
fn parse_f_component(state: &mut ImportState, component: &str) -> Result<usize> {
    let mut indices = component.split('/');
    let num_vertices = state.mesh.vertices.len();
    let vertex = parse_index("vertex", state.line, indices.next(), num_vertices)?
        .ok_or_else(|| {
            let desc = format!("missing vertex in f-statement at line {}", state.line);
            Error::new(MalformedData, desc)
        })?;
    let _texcoord = indices.next();
    let num_normals = state.normals.len();
    let normal = parse_index("normal", state.line, indices.next(), num_normals)?;

    if indices.next().is_some() {
        let desc =
            format!("malformed vertex '{}' in f-statement at line {}", component, state.line);
        return Err(Error::new(MalformedData, desc));
    }

    match (normal, state.vertex_normals[vertex]) {
        (None, _) => state.normals_consistent = false,
        (Some(n), None) => state.vertex_normals[vertex] = Some(n),
        (Some(n), Some(prev)) => {
            if state.normals[n] != state.normals[prev] {
                state.normals_consistent = false;
            }
        }
    }

    Ok(vertex)
}

// Resolves one-based and negative (relative) OBJ indices.
fn parse_index(
    what: &str,
    line: usize,
    str: Option<&str>,
    len: usize,
) -> Result<Option<usize>> {
    let str = match str {
        Some(str) if !str.is_empty() => str,
        _ => return Ok(None),
    };
    let bad_index = || {
        let desc = format!("bad {} index '{}' in f-statement at line {}", what, str, line);
        Error::new(MalformedData, desc)
    };
    let index = str.parse::<i64>().map_err(|_| bad_index())?;
    let resolved = if index > 0 {
        index - 1
    } else {
        len as i64 + index
    };
    if index == 0 || resolved < 0 || resolved >= len as i64 {
        return Err(bad_index());
    }
    Ok(Some(resolved as usize))
}

fn import_v(state: &mut ImportState, parts: &[&str]) -> Result<()> {
    // Also accepts trailing vertex colors.
    if parts.len() < 4 || parts.len() > 7 {
        return Err(Error::new(
            MalformedData,
            format!("malformed v-statement at line {}", state.line),
        ));
    }

    let x = parse_coord("x-coordinate of v-statement", state.line, parts[1])?;
    let y = parse_coord("y-coordinate of v-statement", state.line, parts[2])?;
    let z = parse_coord("z-coordinate of v-statement", state.line, parts[3])?;

    state.mesh.vertices.push(Point3::new(x, y, z));
    state.vertex_normals.push(None);

    Ok(())
}

fn import_vn(state: &mut ImportState, parts: &[&str]) -> Result<()> {
    if parts.len() != 4 {
        return Err(Error::new(
            MalformedData,
            format!("malformed vn-statement at line {}", state.line),
        ));
    }

    let x = parse_coord("x-coordinate of vn-statement", state.line, parts[1])?;
    let y = parse_coord("y-coordinate of vn-statement", state.line, parts[2])?;
    let z = parse_coord("z-coordinate of vn-statement", state.line, parts[3])?;

    state.normals.push(Vector3::new(x, y, z));

    Ok(())
}

fn parse_coord(what: &str, line: usize, str: &str) -> Result<f64> {
    match str.parse::<f64>() {
        Ok(val) if val.is_finite() => Ok(val),
        _ => Err(Error::new(
            MalformedData,
            format!("failed to parse {} at line {}", what, line),
        )),
    }
}
