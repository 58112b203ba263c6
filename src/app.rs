use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use glam::Vec3;
use log::debug;

use crate::camera::Camera;
use crate::config::PipelineSettings;
use crate::render::geometry::ObjectDraw;
use crate::render::shadow::plan_shadows;
use crate::render::SsaoKernel;
use crate::scene::{
    DrawList, Renderable, SceneDescription, SceneGraph, SceneObject, SceneObjectKind, SceneView,
    ShaderTarget, SharedScene,
};

/// Tick rate of [`UpdateThread`].
pub const UPDATE_HZ: u32 = 64;

/// Fixed-rate thread that advances scene behaviours until stopped.
pub struct UpdateThread {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl UpdateThread {
    pub fn spawn(scene: SharedScene) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::spawn(move || {
            let step = Duration::from_secs(1) / UPDATE_HZ;
            let mut ticks = 0;
            let mut last = Instant::now();
            while flag.load(Ordering::Acquire) {
                let now = Instant::now();
                scene.update(now.duration_since(last).as_secs_f64());
                last = now;
                ticks += 1;
                thread::sleep(step.saturating_sub(now.elapsed()));
            }
            ticks
        });
        Self {
            running,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stops the thread and returns the number of ticks it ran.
    pub fn stop(&mut self) -> Result<u64> {
        self.running.store(false, Ordering::Release);
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|panic| anyhow!("update thread panicked: {:?}", panic)),
            None => Ok(0),
        }
    }
}

impl Drop for UpdateThread {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Scene used when no file is given: a spinning cube over a floor, lit from
/// above and viewed from `(0, 2, 5)`.
pub fn demo_scene() -> SceneDescription {
    SceneDescription {
        objects: vec![
            SceneObject {
                name: "Floor".into(),
                mesh: Some("plane".into()),
                color: Vec3::splat(0.8),
                position: Vec3::new(0.0, -0.5, 0.0),
                scale: Vec3::splat(4.0),
                ..SceneObject::default()
            },
            SceneObject {
                name: "Cube".into(),
                mesh: Some("cube".into()),
                color: Vec3::new(0.9, 0.3, 0.2),
                spin: Some(30.0),
                ..SceneObject::default()
            },
            SceneObject {
                name: "Light".into(),
                kind: SceneObjectKind::Light,
                position: Vec3::new(0.0, 5.0, 0.0),
                intensity: 1.5,
                ..SceneObject::default()
            },
            SceneObject {
                name: "Camera".into(),
                kind: SceneObjectKind::Camera,
                position: Vec3::new(0.0, 2.0, 5.0),
                target: Some(Vec3::ZERO),
                ..SceneObject::default()
            },
        ],
        settings: Default::default(),
    }
}

/// Reads a scene file, or falls back to [`demo_scene`].
pub fn load_scene(path: Option<&Path>) -> Result<SceneDescription> {
    let Some(path) = path else {
        return Ok(demo_scene());
    };
    let xml = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scene {}", path.display()))?;
    SceneDescription::from_xml(&xml)
        .with_context(|| format!("failed to parse scene {}", path.display()))
}

/// What the pipeline would draw for a scene, computed without a GPU.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneSummary {
    pub nodes: usize,
    pub lights: usize,
    pub visible: usize,
    pub culled: usize,
    pub shadow_casters: usize,
    pub shadow_draws: usize,
    pub kernel_samples: usize,
    pub camera_position: Vec3,
}

pub fn summarize(
    graph: &SceneGraph,
    camera: &mut Camera,
    settings: &PipelineSettings,
    aspect: f32,
) -> Result<SceneSummary> {
    camera.update(aspect, true);
    let mut list = DrawList::new(ShaderTarget::Geometry, camera.frustum().copied());
    graph.render(0.0, &mut list);

    let mut slots = 0;
    let casters = plan_shadows(graph, &settings.shadow, settings.max_lights, 0.0, true, |command| {
        slots += 1;
        Some(ObjectDraw {
            mesh: command.mesh,
            slot: slots - 1,
        })
    })?;
    let kernel = SsaoKernel::generate(settings.ssao.samples, settings.seed);
    debug!("summarized scene with {} shadow draw(s)", slots);

    Ok(SceneSummary {
        nodes: graph.node_count(),
        lights: graph.lights().len(),
        visible: list.len(),
        culled: list.culled(),
        shadow_casters: casters.len(),
        shadow_draws: casters.iter().map(|caster| caster.draw_count()).sum(),
        kernel_samples: kernel.len(),
        camera_position: camera.position,
    })
}

pub fn print_summary(summary: &SceneSummary, settings: &PipelineSettings) {
    println!("Scene summary:");
    println!(" - nodes: {}", summary.nodes);
    println!(" - lights: {}", summary.lights);
    println!(
        " - camera: ({:.2}, {:.2}, {:.2})",
        summary.camera_position.x, summary.camera_position.y, summary.camera_position.z
    );
    println!(" - visible draws: {}", summary.visible);
    println!(" - culled draws: {}", summary.culled);
    println!(
        " - shadow casters: {} ({} face draws)",
        summary.shadow_casters, summary.shadow_draws
    );
    println!(" - ssao kernel: {} samples", summary.kernel_samples);
    println!(" - msaa samples: {}", settings.msaa_samples);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_scene_summary() {
        let description = demo_scene();
        let graph = description.build_graph().unwrap();
        let settings = PipelineSettings::default();
        let mut camera = description.build_camera(&settings.camera).unwrap();
        let summary = summarize(&graph, &mut camera, &settings, 16.0 / 9.0).unwrap();
        assert_eq!(summary.nodes, 2);
        assert_eq!(summary.lights, 1);
        assert_eq!(summary.visible, 2);
        assert_eq!(summary.culled, 0);
        assert_eq!(summary.shadow_casters, 1);
        assert!(summary.shadow_draws >= 2);
        assert_eq!(summary.kernel_samples, 32);
    }

    #[test]
    fn update_thread_ticks_until_stopped() {
        let description = demo_scene();
        let shared = SharedScene::new(description.build_graph().unwrap());
        let mut updater = UpdateThread::spawn(shared.clone());
        assert!(updater.is_running());
        thread::sleep(Duration::from_millis(60));
        let ticks = updater.stop().unwrap();
        assert!(ticks >= 1);
        assert!(!updater.is_running());
        let cube = shared.read().find("Cube").unwrap();
        let rotation = shared.read().node(cube).unwrap().transform.rotation;
        assert!(rotation.angle_between(glam::Quat::IDENTITY) > 0.0);
    }

    #[test]
    fn missing_scene_file_is_an_error() {
        let err = load_scene(Some(Path::new("/nonexistent/scene.xml"))).unwrap_err();
        assert!(err.to_string().contains("failed to read scene"));
        assert_eq!(load_scene(None).unwrap(), demo_scene());
    }
}
