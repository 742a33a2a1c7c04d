//! Stream a model from a local directory and report what gets loaded.
//!
//! Usage: cargo run --release --bin stream_model -- --model <dir> [--eye x,y,z] [--target x,y,z] [--config file.json]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sectorstream::core::types::{Mat4, Vec3};
use sectorstream::repository::GroupGeometry;
use sectorstream::{Camera, CadManager, Error, LocalDataSource, RendererHandle, Result, SectorGroup, StreamingConfig};

/// Counts what would be on screen
#[derive(Default)]
struct SummaryRenderer {
    attached: usize,
    detached: usize,
    disposed: usize,
    quad_instances: usize,
    draw_calls: usize,
}

impl RendererHandle for SummaryRenderer {
    fn attach(&mut self, model: &str, sector_id: u32, group: &Arc<SectorGroup>) {
        self.attached += 1;
        match group.geometry() {
            GroupGeometry::Quads(q) => self.quad_instances += q.instance_count(),
            GroupGeometry::Detailed(d) => self.draw_calls += d.mesh_draw_calls(),
        }
        log::debug!("{}: attached '{}' to sector {}", model, group.name(), sector_id);
    }

    fn detach(&mut self, _model: &str, _sector_id: u32, _group: &Arc<SectorGroup>) {
        self.detached += 1;
    }

    fn dispose(&mut self, _group: &Arc<SectorGroup>) {
        self.disposed += 1;
    }
}

fn arg_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn parse_vec3(value: &str) -> Result<Vec3> {
    let parts: Vec<f32> = value
        .split(',')
        .map(|p| p.trim().parse::<f32>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::InvalidScene(format!("bad vector '{}': {}", value, e)))?;
    match parts.as_slice() {
        [x, y, z] => Ok(Vec3::new(*x, *y, *z)),
        _ => Err(Error::InvalidScene(format!("expected x,y,z, got '{}'", value))),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .format_timestamp_millis()
    .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(model_dir) = arg_value(&args, "--model").map(PathBuf::from) else {
        eprintln!("Usage: stream_model --model <dir> [--eye x,y,z] [--target x,y,z] [--config file.json]");
        std::process::exit(2);
    };

    let config = match arg_value(&args, "--config") {
        Some(path) => StreamingConfig::load_sync(Path::new(path))?,
        None => StreamingConfig::default(),
    };

    let mut manager = CadManager::new(config, SummaryRenderer::default());
    let model = manager
        .add_model("model", Arc::new(LocalDataSource::new(&model_dir)), Mat4::IDENTITY)
        .await?;

    let bounds = model.scene.root.bounds;
    let target = arg_value(&args, "--target").map(parse_vec3).transpose()?.unwrap_or(bounds.center());
    let eye = match arg_value(&args, "--eye") {
        Some(v) => parse_vec3(v)?,
        None => bounds.center() + Vec3::new(0.0, 0.0, bounds.size().length().max(1.0)),
    };
    log::info!(
        "Loaded scene with {} sectors from {}; eye {:?}, target {:?}",
        model.scene.sector_count(), model_dir.display(), eye, target
    );

    let camera = Camera::look_at(eye, target, Vec3::Y).with_clip(0.1, bounds.size().length() * 10.0 + 100.0);
    manager.set_camera(camera)?;

    let start = Instant::now();
    let mut state = manager.loading_state();
    // First tick starts after the update interval
    tokio::time::sleep(Duration::from_millis(50)).await;
    loop {
        manager.poll();
        if start.elapsed() > Duration::from_millis(500) && !state.borrow().is_loading {
            break;
        }
        tokio::select! {
            _ = state.changed() => {}
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }
    manager.poll();

    let summary = manager.renderer();
    log::info!(
        "Done in {:.2?}: {} sectors attached ({} quads, {} mesh draw calls), {} detached, {} disposed",
        start.elapsed(),
        manager.attached_count("model"),
        summary.quad_instances,
        summary.draw_calls,
        summary.detached,
        summary.disposed
    );
    log::debug!("{} attach calls in total", summary.attached);
    Ok(())
}
