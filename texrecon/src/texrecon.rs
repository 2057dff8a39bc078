use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{info, warn};
use structopt::StructOpt;

use base::defs::{Error, ErrorKind::*, IntoResult, Result};
use base::util::fs;

use crate::export_obj::save_model;
use crate::import_obj::load_mesh;
use crate::mesh::Mesh;
use crate::scene::load_scene;
use crate::texture::*;

#[derive(StructOpt)]
#[structopt(about = "Texture a mesh from calibrated photographs")]
pub struct TexreconParams {
    #[structopt(
        help = "Scene JSON file or directory with images and .cam files"
    )]
    scene: PathBuf,
    #[structopt(help = "Input mesh .obj file")]
    mesh: PathBuf,
    #[structopt(help = "Output prefix of the textured .obj model")]
    out_prefix: PathBuf,
    #[structopt(
        help = "JSON settings file (replaces the settings flags)",
        long = "settings"
    )]
    settings_file: Option<PathBuf>,
    #[structopt(flatten)]
    settings: Settings,
    #[structopt(help = "Load data costs from this file", long)]
    data_cost_file: Option<PathBuf>,
    #[structopt(help = "Load the view labeling from this file", long)]
    labeling_file: Option<PathBuf>,
    #[structopt(help = "Write data costs and labeling next to the model", long)]
    write_intermediate_results: bool,
    #[structopt(help = "Write stage durations as CSV", long)]
    write_timings: bool,
    #[structopt(
        help = "Also write a model colored by the selected views",
        long
    )]
    write_view_selection_model: bool,
    #[structopt(help = "Log debug messages", long, short = "v")]
    pub verbose: bool,
}

/// Optional inputs and outputs of `texture_mesh` besides the model.
#[derive(Clone, Debug, Default)]
pub struct TexturingOptions {
    pub data_cost_file: Option<PathBuf>,
    pub labeling_file: Option<PathBuf>,
    // Prefix of intermediate data cost and labeling files to write.
    pub intermediate_prefix: Option<PathBuf>,
    pub view_selection_model: bool,
}

pub struct TexturingOutput {
    pub model: Model,
    pub view_selection_model: Option<Model>,
    pub timings: Timings,
}

/// Wall clock durations of consecutive pipeline stages.
#[derive(Clone, Debug)]
pub struct Timings {
    last: Instant,
    pub stages: Vec<(String, f64)>,
}

impl Timings {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
            stages: Vec::new(),
        }
    }

    pub fn measure(&mut self, stage: &str) {
        let now = Instant::now();
        let secs = now.duration_since(self.last).as_secs_f64();
        info!("  {} took {:.3}s", stage, secs);
        self.stages.push((stage.to_string(), secs));
        self.last = now;
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut csv = String::from("stage,seconds\n");
        for (stage, secs) in &self.stages {
            csv.push_str(&format!("{},{:.6}\n", stage, secs));
        }
        fs::write_file(path, csv.as_bytes())
    }
}

impl Default for Timings {
    fn default() -> Self {
        Self::new()
    }
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut path = prefix.as_os_str().to_os_string();
    path.push(suffix);
    PathBuf::from(path)
}

pub fn texrecon_with_params(params: &TexreconParams) -> Result<()> {
    let mut timings = Timings::new();

    let out_dir = params.out_prefix.parent().unwrap_or_else(|| Path::new(""));
    if !fs::dir_exists(out_dir) {
        let desc =
            format!("output directory '{}' does not exist", out_dir.display());
        return Err(Error::new(InvalidArgument, desc));
    }

    let settings = match &params.settings_file {
        Some(path) => {
            let json = fs::read_file_to_string(path)?;
            serde_json::from_str(&json).res(|| {
                format!("failed to parse settings file '{}'", path.display())
            })?
        }
        None => params.settings.clone(),
    };
    settings.validate()?;

    info!("Loading scene...");
    let views = load_scene(&params.scene).map_err(|e| e.in_stage("scene"))?;
    info!("Loading mesh...");
    let mesh = load_mesh(&params.mesh).map_err(|e| e.in_stage("mesh"))?;
    timings.measure("Loading");

    let conf_path = with_suffix(&params.out_prefix, ".conf");
    let conf = serde_json::to_string_pretty(&settings)
        .res(|| "failed to serialize settings".to_string())?;
    fs::write_file(&conf_path, conf.as_bytes())?;

    let options = TexturingOptions {
        data_cost_file: params.data_cost_file.clone(),
        labeling_file: params.labeling_file.clone(),
        intermediate_prefix: params
            .write_intermediate_results
            .then(|| params.out_prefix.clone()),
        view_selection_model: params.write_view_selection_model,
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(settings.num_threads)
        .build()
        .res(|| "failed to start worker threads".to_string())?;
    let output = pool.install(|| {
        texture_mesh_with_timings(&mesh, views, &settings, &options, timings)
    })?;
    let mut timings = output.timings;

    info!("Saving model...");
    save_model(&output.model, &params.out_prefix)
        .map_err(|e| e.in_stage("model output"))?;
    if let Some(model) = &output.view_selection_model {
        let prefix = with_suffix(&params.out_prefix, "_view_selection");
        save_model(model, prefix).map_err(|e| e.in_stage("model output"))?;
    }
    timings.measure("Saving");

    if params.write_timings {
        timings.save(with_suffix(&params.out_prefix, "_timings.csv"))?;
    }
    Ok(())
}

/// Runs the whole texturing pipeline on loaded inputs. Errors name the
/// stage that failed; nothing is written except the requested
/// intermediate files.
pub fn texture_mesh(
    mesh: &Mesh,
    views: Vec<TextureView>,
    settings: &Settings,
    options: &TexturingOptions,
) -> Result<TexturingOutput> {
    texture_mesh_with_timings(mesh, views, settings, options, Timings::new())
}

fn texture_mesh_with_timings(
    mesh: &Mesh,
    mut views: Vec<TextureView>,
    settings: &Settings,
    options: &TexturingOptions,
    mut timings: Timings,
) -> Result<TexturingOutput> {
    settings.validate()?;
    mesh.validate().map_err(|e| e.in_stage("mesh"))?;
    if views.is_empty() {
        let desc = "no views to texture from".to_string();
        return Err(Error::new(InvalidArgument, desc).in_stage("scene"));
    }

    info!("Building adjacency graph...");
    let mut graph = AdjacencyGraph::new(mesh.faces.len(), views.len());
    graph
        .build_edges(mesh)
        .map_err(|e| e.in_stage("adjacency graph"))?;
    info!("  {} faces, {} edges", graph.num_nodes(), graph.num_edges());

    select_labeling(&mut graph, mesh, &views, settings, options, &mut timings)
        .map_err(|e| e.in_stage("view selection"))?;

    let model =
        texture_labeled_mesh(&graph, mesh, &views, settings, &mut timings)?;

    let view_selection_model = if options.view_selection_model {
        info!("Building view selection model...");
        for (i, view) in views.iter_mut().enumerate() {
            view.apply_debug_color(i + 1);
        }
        let debug_settings = Settings {
            global_seam_leveling: false,
            local_seam_leveling: false,
            ..settings.clone()
        };
        Some(texture_labeled_mesh(
            &graph,
            mesh,
            &views,
            &debug_settings,
            &mut timings,
        )?)
    } else {
        None
    };

    Ok(TexturingOutput {
        model,
        view_selection_model,
        timings,
    })
}

fn select_labeling(
    graph: &mut AdjacencyGraph,
    mesh: &Mesh,
    views: &[TextureView],
    settings: &Settings,
    options: &TexturingOptions,
    timings: &mut Timings,
) -> Result<()> {
    if let Some(path) = &options.labeling_file {
        info!("Loading labeling...");
        graph.load_labeling(path)?;
        timings.measure("Loading labeling");
        return Ok(());
    }

    info!("View selection...");
    let costs = match &options.data_cost_file {
        Some(path) => {
            DataCosts::load(path, graph.num_nodes(), graph.num_views())?
        }
        None => DataCosts::calculate(mesh, views, settings),
    };
    if let Some(prefix) = &options.intermediate_prefix {
        costs.save(with_suffix(prefix, "_data_costs.spt"))?;
    }
    timings.measure("Calculating data costs");

    select_views(graph, &costs, settings)?;
    timings.measure("Running view selection");

    if let Some(prefix) = &options.intermediate_prefix {
        graph.save_labeling(with_suffix(prefix, "_labeling.vec"))?;
    }
    Ok(())
}

fn texture_labeled_mesh(
    graph: &AdjacencyGraph,
    mesh: &Mesh,
    views: &[TextureView],
    settings: &Settings,
    timings: &mut Timings,
) -> Result<Model> {
    info!("Generating texture patches...");
    let mut patches = generate_texture_patches(graph, mesh, views, settings)
        .map_err(|e| e.in_stage("patch generation"))?;
    let unseen = graph.labels().iter().filter(|&&l| l == UNLABELED).count();
    if unseen > 0 && !settings.keep_unseen_faces {
        warn!("  {} faces are not seen by any view and are dropped", unseen);
    }
    timings.measure("Generating texture patches");

    if !settings.seam_leveling().is_empty() {
        info!("Leveling seams...");
        level_seams(&mut patches, mesh, settings);
        timings.measure("Leveling seams");
    }

    info!("Generating texture atlases...");
    let atlases = generate_texture_atlases(&patches.patches, settings)
        .map_err(|e| e.in_stage("atlas packing"))?;
    timings.measure("Generating texture atlases");

    info!("Building model...");
    let model = build_model(mesh, &patches.patches, atlases);
    timings.measure("Building model");
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base::assert_err_kind;

    use crate::texture::test_util::*;

    fn temp_prefix(name: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir()
            .join(format!("texrecon-pipeline-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let prefix = dir.join("model");
        (dir, prefix)
    }

    fn cube_output(options: &TexturingOptions) -> Result<TexturingOutput> {
        let views = cube_views([200, 10, 10], [10, 10, 200]);
        texture_mesh(&cube_mesh(), views, &Settings::default(), options)
    }

    #[test]
    fn test_texture_cube() {
        let output = cube_output(&TexturingOptions::default()).unwrap();
        assert_eq!(output.model.num_faces(), 12);
        assert_eq!(output.model.groups.len(), 1);
        assert!(output.view_selection_model.is_none());
        let stages: Vec<&str> =
            output.timings.stages.iter().map(|(s, _)| s.as_str()).collect();
        assert!(stages.contains(&"Running view selection"));
        assert!(stages.contains(&"Leveling seams"));
    }

    #[test]
    fn test_intermediate_results_reload() {
        let (dir, prefix) = temp_prefix("intermediate");
        let options = TexturingOptions {
            intermediate_prefix: Some(prefix.clone()),
            ..Default::default()
        };
        cube_output(&options).unwrap();
        let labeling = with_suffix(&prefix, "_labeling.vec");
        let costs = with_suffix(&prefix, "_data_costs.spt");
        assert!(labeling.is_file());
        assert!(costs.is_file());

        let mut graph = AdjacencyGraph::new(12, 2);
        graph.load_labeling(&labeling).unwrap();
        let expected: Vec<Label> = (0..12).map(|f| if f < 6 { 1 } else { 2 }).collect();
        assert_eq!(graph.labels(), &expected[..]);

        let from_labeling = TexturingOptions {
            labeling_file: Some(labeling),
            ..Default::default()
        };
        assert_eq!(cube_output(&from_labeling).unwrap().model.num_faces(), 12);
        let from_costs = TexturingOptions {
            data_cost_file: Some(costs),
            ..Default::default()
        };
        assert_eq!(cube_output(&from_costs).unwrap().model.num_faces(), 12);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_labeling_for_other_mesh_is_fatal() {
        let (dir, prefix) = temp_prefix("mismatch");
        let path = with_suffix(&prefix, "_labeling.vec");
        AdjacencyGraph::new(10, 2).save_labeling(&path).unwrap();

        let options = TexturingOptions {
            labeling_file: Some(path),
            ..Default::default()
        };
        let err = cube_output(&options).err().unwrap();
        assert_eq!(err.kind, InconsistentState);
        assert!(err.description.starts_with("view selection: labeling file"));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_view_selection_model() {
        let options = TexturingOptions {
            view_selection_model: true,
            ..Default::default()
        };
        let output = cube_output(&options).unwrap();
        let model = output.view_selection_model.unwrap();
        assert_eq!(model.num_faces(), 12);
        let colors: Vec<[u8; 3]> =
            model.groups[0].texture.pixels().map(|p| p.0).collect();
        assert!(colors.contains(&debug_color(1).0));
        assert!(colors.contains(&debug_color(2).0));
    }

    #[test]
    fn test_texture_without_views() {
        let res = texture_mesh(
            &cube_mesh(),
            Vec::new(),
            &Settings::default(),
            &TexturingOptions::default(),
        );
        assert_err_kind!(res, InvalidArgument);
    }

    #[test]
    fn test_missing_output_directory() {
        let params = TexreconParams::from_iter(vec![
            "texrecon",
            "scene.json",
            "mesh.obj",
            "/nonexistent/texrecon/model",
        ]);
        let err = texrecon_with_params(&params).unwrap_err();
        assert_eq!(err.kind, InvalidArgument);
        assert_eq!(
            err.description,
            "output directory '/nonexistent/texrecon' does not exist"
        );
    }

    fn cube_costs_without_face(face: usize) -> DataCosts {
        let entries: Vec<(usize, Label, f32)> = (0..12)
            .filter(|&f| f != face)
            .map(|f| (f, if f < 6 { 1 } else { 2 }, 0.0))
            .collect();
        data_costs_from(12, 2, &entries)
    }

    fn has_color(model: &Model, color: [u8; 3]) -> bool {
        model
            .groups
            .iter()
            .any(|g| g.texture.pixels().any(|p| p.0 == color))
    }

    #[test]
    fn test_unseen_face_is_dropped_or_kept_flat() {
        let (dir, prefix) = temp_prefix("unseen");
        let path = with_suffix(&prefix, "_data_costs.spt");
        cube_costs_without_face(3).save(&path).unwrap();
        let options = TexturingOptions {
            data_cost_file: Some(path),
            ..Default::default()
        };
        let views = cube_views([200, 10, 10], [10, 10, 200]);

        let settings = Settings::default();
        let output =
            texture_mesh(&cube_mesh(), views.clone(), &settings, &options)
                .unwrap();
        assert_eq!(output.model.num_faces(), 11);
        assert!(!has_color(&output.model, settings.untextured_color));

        let settings = Settings {
            keep_unseen_faces: true,
            untextured_color: [255, 0, 255],
            ..Default::default()
        };
        let output =
            texture_mesh(&cube_mesh(), views, &settings, &options).unwrap();
        assert_eq!(output.model.num_faces(), 12);
        assert!(has_color(&output.model, [255, 0, 255]));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_failed_load_writes_nothing() {
        let (dir, prefix) = temp_prefix("failed-load");
        let scene = dir.join("missing-scene.json");
        let params = TexreconParams::from_iter(vec![
            PathBuf::from("texrecon"),
            scene,
            dir.join("mesh.obj"),
            prefix.clone(),
        ]);
        let err = texrecon_with_params(&params).unwrap_err();
        assert!(err.description.starts_with("scene: "));
        assert!(!with_suffix(&prefix, ".conf").exists());
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_timings_csv() {
        let (dir, prefix) = temp_prefix("timings");
        let mut timings = Timings::new();
        timings.measure("Loading");
        timings.measure("Saving");
        let path = with_suffix(&prefix, "_timings.csv");
        timings.save(&path).unwrap();
        let csv = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "stage,seconds");
        assert!(lines[1].starts_with("Loading,"));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
