// src/engine.rs
//! Headless orchestrator tying the scene, its components and the physics
//! manager together.
//!
//! One `tick` runs, in order:
//! 1. component updates (editor transitions, rescale, drift push),
//! 2. the physics update (direct step or queued step),
//! 3. result sync (threaded mode only),
//! 4. trigger detection.

use crate::collision_shape::CollisionShapeDesc;
use crate::components::{ComponentId, ComponentStore};
use crate::error::Result;
use crate::physics::PhysicsConfig;
use crate::physics_component::PhysicsProperties;
use crate::physics_manager::PhysicsManager;
use crate::scene::{NodeId, Scene};
use crate::thread_manager::ThreadManager;
use crate::trigger::{TriggerEvent, TriggerKind};
use std::sync::Arc;

/// How the main thread picks up results from the physics worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameSync {
    /// Apply whatever the worker has published; poses may lag a frame.
    #[default]
    Opportunistic,
    /// Wait for this frame's step before applying results.
    Blocking,
}

pub struct Engine {
    pub scene: Scene,
    // Declared before `physics` so components tear down while the world lives.
    pub components: ComponentStore,
    pub physics: PhysicsManager,
    threads: Arc<ThreadManager>,
    frame_sync: FrameSync,
    frame: u64,
}

impl Engine {
    pub fn new(config: PhysicsConfig) -> Self {
        Self::with_threads(Arc::new(ThreadManager::new()), config)
    }

    pub fn with_threads(threads: Arc<ThreadManager>, config: PhysicsConfig) -> Self {
        let physics = PhysicsManager::new(threads.clone(), config);
        physics.initialize();
        Self {
            scene: Scene::new(),
            components: ComponentStore::new(),
            physics,
            threads,
            frame_sync: FrameSync::default(),
            frame: 0,
        }
    }

    pub fn threads(&self) -> &Arc<ThreadManager> {
        &self.threads
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn set_frame_sync(&mut self, mode: FrameSync) {
        self.frame_sync = mode;
    }

    pub fn set_threaded(&self, threaded: bool) -> Result<()> {
        self.physics.enable_threading(threaded)
    }

    /// Attaches and starts a physics component.
    pub fn add_body(&mut self, node: NodeId, props: PhysicsProperties) -> Option<ComponentId> {
        let id = self.components.add_physics(&mut self.scene, node, props)?;
        if let Some(component) = self.components.physics_mut(id) {
            component.start(&self.physics, &self.scene);
        }
        Some(id)
    }

    /// Attaches and starts a trigger zone.
    pub fn add_trigger(
        &mut self,
        node: NodeId,
        kind: TriggerKind,
        shape: CollisionShapeDesc,
    ) -> Option<ComponentId> {
        let id = self.components.add_trigger(&mut self.scene, node, kind, shape)?;
        if let Some(trigger) = self.components.trigger_mut(id) {
            trigger.start(&self.physics, &self.scene);
        }
        Some(id)
    }

    /// Destroys the node's subtree together with its components.
    pub fn despawn(&mut self, node: NodeId) {
        let mut subtree = vec![node];
        let mut i = 0;
        while i < subtree.len() {
            if let Some(n) = self.scene.node(subtree[i]) {
                subtree.extend_from_slice(n.children());
            }
            i += 1;
        }
        for id in &subtree {
            self.components.remove_node(&self.physics, &mut self.scene, *id);
        }
        self.scene.despawn(node);
    }

    /// Advances one frame and returns the trigger events it produced.
    pub fn tick(&mut self, dt: f32) -> Vec<TriggerEvent> {
        self.frame += 1;
        let _span = tracing::debug_span!("engine_tick", frame = self.frame, dt).entered();

        self.components.start_all(&self.physics, &self.scene);
        self.components.update_physics(&self.physics, &self.scene, dt);
        self.physics.update(dt, &mut self.scene, &mut self.components);

        if self.physics.is_threading_enabled() {
            if self.frame_sync == FrameSync::Blocking {
                self.physics.flush();
            }
            self.physics
                .sync_physics_results(&mut self.scene, &mut self.components);
        }

        self.components.update_triggers(&self.physics, &self.scene)
    }

    pub fn shutdown(&mut self) {
        self.components.destroy_all(&self.physics);
        self.physics.shutdown();
        log::info!("engine shut down after {} frames", self.frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Transform;
    use crate::trigger::TriggerEventKind;
    use glam::Vec3;

    fn drop_scene(engine: &mut Engine) -> NodeId {
        let ground = engine.scene.spawn("ground");
        engine.add_body(ground, PhysicsProperties::fixed(CollisionShapeDesc::Plane));
        let crate_node = engine
            .scene
            .spawn_with("crate", Transform::from_position(Vec3::new(0.0, 5.0, 0.0)));
        engine.add_body(crate_node, PhysicsProperties::dynamic(CollisionShapeDesc::default(), 2.0));
        crate_node
    }

    fn run(engine: &mut Engine, node: NodeId, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|_| {
                engine.tick(1.0 / 60.0);
                engine.scene.node(node).unwrap().transform.position.y
            })
            .collect()
    }

    #[test]
    fn threaded_and_unthreaded_produce_same_poses() {
        let mut direct = Engine::new(PhysicsConfig::default());
        let a = drop_scene(&mut direct);
        let direct_y = run(&mut direct, a, 90);

        let mut worker = Engine::new(PhysicsConfig::default());
        worker.set_threaded(true).unwrap();
        worker.set_frame_sync(FrameSync::Blocking);
        let b = drop_scene(&mut worker);
        let worker_y = run(&mut worker, b, 90);

        for (frame, (x, y)) in direct_y.iter().zip(&worker_y).enumerate() {
            assert!((x - y).abs() < 1e-4, "frame {frame}: {x} vs {y}");
        }
        // Crate ends up resting on the ground plane.
        let rest = *direct_y.last().unwrap();
        assert!(rest < 5.0 && rest > 0.0, "{rest}");
    }

    #[test]
    fn falling_crate_enters_area() {
        let mut engine = Engine::new(PhysicsConfig::default());
        let crate_node = drop_scene(&mut engine);
        let zone = engine
            .scene
            .spawn_with("landing", Transform::from_position(Vec3::new(0.0, 1.0, 0.0)));
        engine.add_trigger(zone, TriggerKind::Area, CollisionShapeDesc::Box { half_extents: Vec3::splat(2.0) });

        let mut entered = Vec::new();
        for _ in 0..120 {
            for event in engine.tick(1.0 / 60.0) {
                if event.kind == TriggerEventKind::Entered {
                    entered.push(event.other_node);
                }
            }
        }
        assert!(entered.contains(&crate_node));
    }

    #[test]
    fn threaded_area_reports_enter_and_exit() {
        let mut engine = Engine::new(PhysicsConfig::default());
        engine.set_threaded(true).unwrap();
        engine.set_frame_sync(FrameSync::Blocking);

        let zone = engine.scene.spawn("zone");
        engine.add_trigger(zone, TriggerKind::Area, CollisionShapeDesc::Box { half_extents: Vec3::ONE });
        let mover = engine
            .scene
            .spawn_with("mover", Transform::from_position(Vec3::new(10.0, 0.0, 0.0)));
        engine.add_body(mover, PhysicsProperties::kinematic(CollisionShapeDesc::Sphere { radius: 0.25 }));

        let path = [10.0, 10.0, 0.0, 0.0, 0.0, 10.0, 10.0];
        let mut seen = Vec::new();
        for x in path {
            engine.scene.node_mut(mover).unwrap().transform.position = Vec3::new(x, 0.0, 0.0);
            for event in engine.tick(1.0 / 60.0) {
                assert_eq!(event.other_node, mover);
                seen.push(event.kind);
            }
        }
        assert_eq!(
            seen,
            vec![
                TriggerEventKind::Entered,
                TriggerEventKind::Stayed,
                TriggerEventKind::Stayed,
                TriggerEventKind::Exited,
            ]
        );
        assert!(engine.physics.is_threading_enabled());
    }

    #[test]
    fn despawn_releases_bodies_and_shapes() {
        let mut engine = Engine::new(PhysicsConfig::default());
        let crate_node = drop_scene(&mut engine);
        assert_eq!(engine.physics.body_count(), 2);
        engine.despawn(crate_node);
        assert_eq!(engine.physics.body_count(), 1);
        assert!(!engine.scene.contains(crate_node));

        engine.shutdown();
        assert_eq!(engine.physics.shape_stats().live, 0);
    }
}
