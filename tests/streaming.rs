//! End-to-end streaming through the manager with an in-memory or on-disk model.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sectorstream::core::config::SchedulerConfig;
use sectorstream::core::types::{Mat4, Vec3};
use sectorstream::parser::ctm::encode_ctm_mg1;
use sectorstream::parser::f3d::encode_quads;
use sectorstream::parser::i3d::{encode_sector, I3D_VERSION};
use sectorstream::parser::{ParseCtmResult, ParseSectorResult, QuadInstance, TriangleMeshTable};
use sectorstream::repository::SCENE_FILE_NAME;
use sectorstream::{
    CadManager, Camera, InMemoryDataSource, LoadingHints, LocalDataSource, ModelDataSource, RendererHandle,
    SectorGroup, StreamingConfig,
};

/// Root spanning x in [-100, 100] with child A on the left and B on the right
const SECTORS: [(u32, i64, [f32; 3], [f32; 3], f32); 3] = [
    (0, -1, [-100.0, -100.0, -20.0], [100.0, 100.0, 0.0], 5.0),
    (1, 0, [-100.0, -100.0, -20.0], [-40.0, 100.0, 0.0], 0.5),
    (2, 0, [40.0, -100.0, -20.0], [100.0, 100.0, 0.0], 0.5),
];

fn scene_json() -> String {
    let sectors: Vec<String> = SECTORS
        .iter()
        .map(|(id, parent, min, max, quad_size)| {
            format!(
                r#"{{
                    "id": {id}, "parentId": {parent}, "path": "{id}/", "depth": {depth},
                    "boundingBox": {{
                        "min": {{ "x": {}, "y": {}, "z": {} }},
                        "max": {{ "x": {}, "y": {}, "z": {} }}
                    }},
                    "indexFile": {{ "fileName": "{id}.i3d", "peripheralFiles": ["mesh_1.ctm"],
                                    "estimatedDrawCallCount": 1, "downloadSize": 1000 }},
                    "facesFile": {{ "quadSize": {quad_size},
                                    "coverageFactors": {{ "xy": 0.5, "yz": 0.5, "xz": 0.5 }},
                                    "recursiveCoverageFactors": {{ "xy": 0.5, "yz": 0.5, "xz": 0.5 }},
                                    "fileName": "{id}.f3d", "downloadSize": 100 }}
                }}"#,
                min[0], min[1], min[2], max[0], max[1], max[2],
                depth = if *parent < 0 { 0 } else { 1 },
            )
        })
        .collect();
    format!(r#"{{ "version": 8, "maxTreeIndex": 3, "unit": "Meters", "sectors": [{}] }}"#, sectors.join(","))
}

/// Every file of the model, keyed by name
fn model_files() -> HashMap<String, Vec<u8>> {
    let mut files = HashMap::new();
    files.insert(SCENE_FILE_NAME.to_string(), scene_json().into_bytes());

    let mesh = ParseCtmResult {
        indices: vec![0, 1, 2, 0, 2, 3],
        vertices: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0],
        normals: None,
    };
    files.insert("mesh_1.ctm".to_string(), encode_ctm_mg1(&mesh).unwrap());

    for (id, ..) in SECTORS {
        let quad = QuadInstance { tree_index: id as f32, ..Default::default() };
        files.insert(format!("{}.f3d", id), encode_quads(&[quad; 4]));

        let sector = ParseSectorResult {
            version: I3D_VERSION,
            sector_id: id,
            node_ids: vec![u64::from(id) + 1000],
            tree_indices: vec![id],
            triangle_meshes: TriangleMeshTable {
                file_ids: vec![1],
                tree_indices: vec![id],
                colors: vec![[200, 100, 50, 255]],
                triangle_counts: vec![2],
            },
            ..Default::default()
        };
        files.insert(format!("{}.i3d", id), encode_sector(&sector).unwrap());
    }
    files
}

fn in_memory_model() -> Arc<InMemoryDataSource> {
    let source = InMemoryDataSource::new();
    for (name, bytes) in model_files() {
        source.insert(name, bytes);
    }
    Arc::new(source)
}

#[derive(Default)]
struct RecordingRenderer {
    shown: HashMap<(String, u32), String>,
    disposed: Vec<String>,
}

impl RendererHandle for RecordingRenderer {
    fn attach(&mut self, model: &str, sector_id: u32, group: &Arc<SectorGroup>) {
        self.shown.insert((model.to_string(), sector_id), group.name().to_string());
    }

    fn detach(&mut self, model: &str, sector_id: u32, _group: &Arc<SectorGroup>) {
        self.shown.remove(&(model.to_string(), sector_id));
    }

    fn dispose(&mut self, group: &Arc<SectorGroup>) {
        self.disposed.push(group.name().to_string());
    }
}

impl RecordingRenderer {
    fn shown(&self, sector_id: u32) -> Option<&str> {
        self.shown.get(&("cad".to_string(), sector_id)).map(String::as_str)
    }
}

fn config(max_quad_size: f32) -> StreamingConfig {
    StreamingConfig {
        scheduler: SchedulerConfig { update_interval_ms: 10, restart_delay_ms: 100 },
        loading_hints: LoadingHints { max_quad_size, suspend_loading: false },
        ..Default::default()
    }
}

/// Looking straight down -Z from 30 units above the sectors
fn camera_over(x: f32) -> Camera {
    Camera::new(Vec3::new(x, 0.0, 30.0), 60.0, 16.0 / 9.0)
}

async fn stream_until(
    manager: &mut CadManager<RecordingRenderer>,
    done: impl Fn(&RecordingRenderer) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !done(manager.renderer()) {
            manager.wait_for_update().await.unwrap();
        }
    })
    .await
    .expect("streaming did not settle");
}

async fn start(
    max_quad_size: f32,
    source: Arc<dyn ModelDataSource>,
) -> CadManager<RecordingRenderer> {
    let mut manager = CadManager::new(config(max_quad_size), RecordingRenderer::default());
    manager.add_model("cad", source, Mat4::IDENTITY).await.unwrap();
    manager
}

#[tokio::test]
async fn test_visible_child_streams_in_detail() {
    let mut manager = start(0.05, in_memory_model()).await;
    manager.set_camera(camera_over(-70.0)).unwrap();

    stream_until(&mut manager, |r| r.shown(0).is_some() && r.shown(1).is_some()).await;
    assert!(manager.needs_redraw());
    assert_eq!(manager.renderer().shown(0), Some("Sector 0"));
    assert_eq!(manager.renderer().shown(1), Some("Sector 1"));
    assert_eq!(manager.renderer().shown(2), None);
}

#[tokio::test]
async fn test_coarse_hints_stream_quads() {
    let mut manager = start(0.0025, in_memory_model()).await;
    manager.set_camera(camera_over(-70.0)).unwrap();

    stream_until(&mut manager, |r| r.shown(0).is_some() && r.shown(1).is_some()).await;
    assert_eq!(manager.renderer().shown(0), Some("Quads 0"));
    assert_eq!(manager.renderer().shown(1), Some("Quads 1"));
    assert_eq!(manager.renderer().shown(2), None);
}

#[tokio::test]
async fn test_camera_move_swaps_children() {
    let mut manager = start(0.05, in_memory_model()).await;
    manager.set_camera(camera_over(-70.0)).unwrap();
    stream_until(&mut manager, |r| r.shown(1).is_some()).await;
    manager.reset_redraw();

    manager.set_camera(camera_over(70.0)).unwrap();
    stream_until(&mut manager, |r| r.shown(1).is_none() && r.shown(2).is_some()).await;

    assert!(manager.needs_redraw());
    assert_eq!(manager.renderer().shown(0), Some("Sector 0"));
    assert_eq!(manager.renderer().shown(2), Some("Sector 2"));
    assert!(manager.renderer().disposed.contains(&"Sector 1".to_string()));
    assert!(!manager.renderer().disposed.contains(&"Sector 0".to_string()));
}

#[tokio::test]
async fn test_suspended_model_keeps_its_geometry() {
    let mut manager = start(0.05, in_memory_model()).await;
    manager.set_camera(camera_over(-70.0)).unwrap();
    stream_until(&mut manager, |r| r.shown(0).is_some() && r.shown(1).is_some()).await;

    manager
        .set_model_loading_hints("cad", Some(LoadingHints { suspend_loading: true, max_quad_size: 0.05 }))
        .unwrap();
    manager.set_camera(camera_over(70.0)).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    manager.poll();

    assert_eq!(manager.renderer().shown(1), Some("Sector 1"));
    assert_eq!(manager.renderer().shown(2), None);
    assert!(manager.renderer().disposed.is_empty());
}

#[tokio::test]
async fn test_remove_model_disposes_everything() {
    let mut manager = start(0.05, in_memory_model()).await;
    manager.set_camera(camera_over(-70.0)).unwrap();
    stream_until(&mut manager, |r| r.shown(0).is_some() && r.shown(1).is_some()).await;

    manager.remove_model("cad").unwrap();
    assert!(manager.renderer().shown.is_empty());
    assert_eq!(manager.renderer().disposed.len(), 2);
    assert_eq!(manager.model_count(), 0);
}

#[tokio::test]
async fn test_streams_from_local_directory() {
    let dir = tempfile::tempdir().unwrap();
    for (name, bytes) in model_files() {
        std::fs::write(dir.path().join(name), bytes).unwrap();
    }

    let mut manager = start(0.05, Arc::new(LocalDataSource::new(dir.path()))).await;
    manager.set_camera(camera_over(70.0)).unwrap();

    stream_until(&mut manager, |r| r.shown(0).is_some() && r.shown(2).is_some()).await;
    assert_eq!(manager.renderer().shown(2), Some("Sector 2"));
    assert_eq!(manager.repository().cached_peripheral_files(), 1);
}
