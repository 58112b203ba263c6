use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::light::PointLight;
use crate::scene::{NodeId, SceneGraph, SceneView, Transform};

/// Scene graph shared between the update thread and the render thread.
///
/// The update thread mutates through [`SharedScene::write`]; the render
/// thread holds [`SharedScene::read`] for the duration of a frame.
#[derive(Debug, Default)]
pub struct SharedScene {
    graph: Arc<RwLock<SceneGraph>>,
}

impl Clone for SharedScene {
    fn clone(&self) -> Self {
        Self {
            graph: Arc::clone(&self.graph),
        }
    }
}

impl SharedScene {
    /// Wraps an already built scene graph.
    pub fn new(graph: SceneGraph) -> Self {
        Self {
            graph: Arc::new(RwLock::new(graph)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, SceneGraph> {
        self.graph.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, SceneGraph> {
        self.graph.write()
    }

    /// Advances every node behaviour by `delta` seconds.
    pub fn update(&self, delta: f64) {
        self.graph.write().update(delta);
    }

    /// Applies a mutation to a node's transform.
    pub fn update_transform<F, R>(&self, id: NodeId, updater: F) -> Option<R>
    where
        F: FnOnce(&mut Transform) -> R,
    {
        let mut guard = self.graph.write();
        let node = guard.node_mut(id)?;
        Some(updater(&mut node.transform))
    }

    /// Returns a snapshot of the light list.
    pub fn lights(&self) -> Vec<PointLight> {
        self.graph.read().lights().to_vec()
    }

    pub fn set_light(&self, index: usize, light: PointLight) -> bool {
        match self.graph.write().lights_mut().get_mut(index) {
            Some(slot) => {
                *slot = light;
                true
            }
            None => false,
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.read().node_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn clones_share_the_same_graph() {
        let shared = SharedScene::new(SceneGraph::new());
        let other = shared.clone();
        let id = other.write().add_node("Extra", None);
        assert_eq!(shared.node_count(), 1);
        shared.update_transform(id, |transform| transform.translation = Vec3::X);
        let translation = other.read().node(id).unwrap().transform.translation;
        assert_eq!(translation, Vec3::X);
    }

    #[test]
    fn light_updates_are_visible_to_readers() {
        let shared = SharedScene::new(SceneGraph::new());
        shared.write().add_light(PointLight::default());
        assert!(shared.set_light(0, PointLight::new(Vec3::Y, Vec3::ONE, 3.0)));
        assert!(!shared.set_light(5, PointLight::default()));
        assert_eq!(shared.lights()[0].intensity, 3.0);
    }

    #[test]
    fn update_from_another_thread() {
        let shared = SharedScene::new(SceneGraph::new());
        let worker = shared.clone();
        std::thread::spawn(move || worker.update(0.016)).join().unwrap();
        assert_eq!(shared.node_count(), 0);
    }
}
