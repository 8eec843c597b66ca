// src/physics_manager.rs
//! Owner of the physics world and the optional physics worker.
//!
//! ## Modes
//! - **Unthreaded**: every call mutates the world directly under the world
//!   lock, and `update` writes poses back to components immediately.
//! - **Threaded**: calls become [`PhysicsCommand`]s on a FIFO drained by one
//!   worker thread. After each step the worker publishes a
//!   [`PhysicsTransformResult`] per enabled body; the main thread applies them
//!   in `sync_physics_results`.
//!
//! Commands are applied in exactly the order they were queued. Every call on
//! an uninitialized world is a logged no-op.
//!
//! The manager is a cheap cloneable handle; components keep a weak
//! [`PhysicsHandle`] so their teardown can still reach the world.

use crate::collision_shape::{CollisionShapeDesc, ShapeFactory, ShapeHandle, ShapeStats};
use crate::components::{ComponentId, ComponentStore};
use crate::error::{Error, Result};
use crate::physics::{
    BodyDescriptor, BodyEdit, BodySnapshot, PhysicsConfig, PhysicsWorld, SensorDescriptor,
};
use crate::scene::{NodeId, Scene};
use crate::thread_manager::{current_thread_id, ThreadHandle, ThreadManager};
use crate::thread_safe_queue::ThreadSafeQueue;
use crossbeam::channel;
use glam::{Quat, Vec3};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

pub const WORKER_THREAD_NAME: &str = "physics-worker";

/// Upper bound on how long `flush` waits for the worker.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Message from the main thread to the physics worker.
pub enum PhysicsCommand {
    Update(f32),
    AddRigidBody(Box<BodyDescriptor>),
    RemoveRigidBody(ComponentId),
    EditBody(ComponentId, BodyEdit),
    AddSensor(Box<SensorDescriptor>),
    RemoveSensor(ComponentId),
    SetSensorPose {
        component: ComponentId,
        position: Vec3,
        rotation: Quat,
    },
    SetGravity(Vec3),
    /// Acknowledged once every earlier command has been applied.
    Fence(channel::Sender<()>),
    Shutdown,
}

impl fmt::Debug for PhysicsCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhysicsCommand::Update(dt) => f.debug_tuple("Update").field(dt).finish(),
            PhysicsCommand::AddRigidBody(desc) => {
                f.debug_tuple("AddRigidBody").field(&desc.component).finish()
            }
            PhysicsCommand::RemoveRigidBody(id) => f.debug_tuple("RemoveRigidBody").field(id).finish(),
            PhysicsCommand::EditBody(id, edit) => {
                f.debug_tuple("EditBody").field(id).field(edit).finish()
            }
            PhysicsCommand::AddSensor(desc) => f.debug_tuple("AddSensor").field(&desc.component).finish(),
            PhysicsCommand::RemoveSensor(id) => f.debug_tuple("RemoveSensor").field(id).finish(),
            PhysicsCommand::SetSensorPose { component, .. } => {
                f.debug_tuple("SetSensorPose").field(component).finish()
            }
            PhysicsCommand::SetGravity(g) => f.debug_tuple("SetGravity").field(g).finish(),
            PhysicsCommand::Fence(_) => f.write_str("Fence"),
            PhysicsCommand::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Pose published by the worker for one component after a step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsTransformResult {
    pub component: ComponentId,
    pub position: Vec3,
    pub rotation: Quat,
    pub valid: bool,
}

#[derive(Debug, Clone, Copy)]
struct RegistryEntry {
    id: ComponentId,
    enabled: bool,
}

/// Everything guarded by the coarse world lock.
#[derive(Default)]
struct PhysicsState {
    world: Option<PhysicsWorld>,
    /// Registration order is preserved.
    registry: Vec<RegistryEntry>,
}

impl PhysicsState {
    fn enabled_ids(&self) -> Vec<ComponentId> {
        self.registry
            .iter()
            .filter(|e| e.enabled)
            .map(|e| e.id)
            .collect()
    }
}

/// State shared with the worker thread.
#[derive(Default)]
struct Shared {
    state: Mutex<PhysicsState>,
    commands: ThreadSafeQueue<PhysicsCommand>,
    results: ThreadSafeQueue<PhysicsTransformResult>,
}

struct Inner {
    shared: Arc<Shared>,
    threads: Arc<ThreadManager>,
    worker: Mutex<ThreadHandle>,
    threaded: AtomicBool,
    editor_mode: AtomicBool,
    config: PhysicsConfig,
    shapes: ShapeFactory,
}

impl Inner {
    fn stop_worker(&self) {
        if !self.threaded.load(Ordering::Acquire) {
            return;
        }
        self.shared.commands.push(PhysicsCommand::Shutdown);
        let mut worker = self.worker.lock();
        self.threads.join_thread(&mut worker);
        self.shared.commands.reset();
        self.shared.results.reset();
        self.threaded.store(false, Ordering::Release);
        log::info!("physics worker joined; running unthreaded");
    }

    fn shutdown(&self) {
        self.stop_worker();
        let mut state = self.shared.state.lock();
        if let Some(world) = state.world.take() {
            log::info!(
                "physics world destroyed ({} bodies, {} sensors)",
                world.body_count(),
                world.sensor_count()
            );
        }
        state.registry.clear();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Non-owning reference to a [`PhysicsManager`].
#[derive(Clone, Default)]
pub struct PhysicsHandle(Weak<Inner>);

impl PhysicsHandle {
    pub fn upgrade(&self) -> Option<PhysicsManager> {
        self.0.upgrade().map(|inner| PhysicsManager { inner })
    }
}

impl fmt::Debug for PhysicsHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicsHandle")
            .field("alive", &(self.0.strong_count() > 0))
            .finish()
    }
}

#[derive(Clone)]
pub struct PhysicsManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for PhysicsManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicsManager")
            .field("initialized", &self.is_initialized())
            .field("threaded", &self.is_threading_enabled())
            .field("editor_mode", &self.editor_mode())
            .finish()
    }
}

impl PhysicsManager {
    /// An invalid `config` is logged and replaced by the defaults.
    pub fn new(threads: Arc<ThreadManager>, config: PhysicsConfig) -> Self {
        let config = match config.validate() {
            Ok(()) => config,
            Err(err) => {
                log::error!("{}; using default physics config", err);
                PhysicsConfig::default()
            }
        };
        Self {
            inner: Arc::new(Inner {
                shared: Arc::new(Shared::default()),
                threads,
                worker: Mutex::new(ThreadHandle::invalid()),
                threaded: AtomicBool::new(false),
                editor_mode: AtomicBool::new(false),
                config,
                shapes: ShapeFactory::new(),
            }),
        }
    }

    pub fn downgrade(&self) -> PhysicsHandle {
        PhysicsHandle(Arc::downgrade(&self.inner))
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Creates the world. Calling it twice is a no-op.
    pub fn initialize(&self) {
        {
            let mut state = self.inner.shared.state.lock();
            if state.world.is_some() {
                log::debug!("physics world already initialized");
                return;
            }
            state.world = Some(PhysicsWorld::new(&self.inner.config));
        }
        log::info!(
            "physics world initialized (gravity {:?}, step {:.4}s, max {} sub-steps)",
            self.inner.config.gravity,
            self.inner.config.fixed_timestep,
            self.inner.config.max_substeps
        );
        if self.inner.config.start_threaded {
            if let Err(err) = self.enable_threading(true) {
                log::error!("{}; staying unthreaded", err);
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.shared.state.lock().world.is_some()
    }

    /// Stops the worker if running and destroys the world and the registry.
    /// Safe to call repeatedly; also runs when the last handle is dropped.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Starts or stops the physics worker. Enabling twice is a no-op; enabling
    /// before `initialize` fails. Disabling joins the worker and clears both
    /// queues.
    pub fn enable_threading(&self, enabled: bool) -> Result<()> {
        let inner = &self.inner;
        if !enabled {
            inner.stop_worker();
            return Ok(());
        }
        if inner.threaded.load(Ordering::Acquire) {
            return Ok(());
        }
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }

        let shared = inner.shared.clone();
        let handle = inner
            .threads
            .create_thread(WORKER_THREAD_NAME, move || worker_loop(shared));
        if !inner.threads.is_valid(&handle) {
            return Err(Error::ThreadSpawn(WORKER_THREAD_NAME.into()).context("enable threading"));
        }
        *inner.worker.lock() = handle;
        inner.threaded.store(true, Ordering::Release);
        log::info!("physics worker started ({} backend)", inner.threads.backend_name());
        Ok(())
    }

    pub fn is_threading_enabled(&self) -> bool {
        self.inner.threaded.load(Ordering::Acquire)
    }

    /// While set, bodies are frozen and never written back to the scene.
    pub fn set_editor_mode(&self, editor: bool) {
        if self.inner.editor_mode.swap(editor, Ordering::AcqRel) != editor {
            log::info!("physics editor mode {}", if editor { "on" } else { "off" });
        }
    }

    pub fn editor_mode(&self) -> bool {
        self.inner.editor_mode.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    pub fn register_component(&self, id: ComponentId) {
        let mut state = self.inner.shared.state.lock();
        if state.registry.iter().any(|e| e.id == id) {
            return;
        }
        state.registry.push(RegistryEntry { id, enabled: true });
    }

    pub fn unregister_component(&self, id: ComponentId) {
        self.inner.shared.state.lock().registry.retain(|e| e.id != id);
    }

    /// Disabled components are neither published nor synced back.
    pub fn set_component_enabled(&self, id: ComponentId, enabled: bool) {
        let mut state = self.inner.shared.state.lock();
        if let Some(entry) = state.registry.iter_mut().find(|e| e.id == id) {
            entry.enabled = enabled;
        }
    }

    pub fn registered_components(&self) -> Vec<ComponentId> {
        self.inner.shared.state.lock().registry.iter().map(|e| e.id).collect()
    }

    // ------------------------------------------------------------------
    // World mutation
    // ------------------------------------------------------------------

    pub fn add_rigid_body(&self, desc: BodyDescriptor) {
        self.dispatch(PhysicsCommand::AddRigidBody(Box::new(desc)));
    }

    pub fn remove_rigid_body(&self, id: ComponentId) {
        self.dispatch(PhysicsCommand::RemoveRigidBody(id));
    }

    pub fn edit_body(&self, id: ComponentId, edit: BodyEdit) {
        self.dispatch(PhysicsCommand::EditBody(id, edit));
    }

    pub fn add_sensor(&self, desc: SensorDescriptor) {
        self.dispatch(PhysicsCommand::AddSensor(Box::new(desc)));
    }

    pub fn remove_sensor(&self, id: ComponentId) {
        self.dispatch(PhysicsCommand::RemoveSensor(id));
    }

    pub fn set_sensor_pose(&self, id: ComponentId, position: Vec3, rotation: Quat) {
        self.dispatch(PhysicsCommand::SetSensorPose {
            component: id,
            position,
            rotation,
        });
    }

    pub fn set_gravity(&self, gravity: Vec3) {
        self.dispatch(PhysicsCommand::SetGravity(gravity));
    }

    fn dispatch(&self, command: PhysicsCommand) {
        if self.is_threading_enabled() {
            self.inner.shared.commands.push(command);
        } else {
            let mut state = self.inner.shared.state.lock();
            execute(&mut state, command, None);
        }
    }

    /// Blocks until the worker has applied every command queued so far.
    /// Returns immediately when unthreaded.
    pub fn flush(&self) {
        if !self.is_threading_enabled() {
            return;
        }
        let (tx, rx) = channel::bounded(1);
        self.inner.shared.commands.push(PhysicsCommand::Fence(tx));
        if rx.recv_timeout(FLUSH_TIMEOUT).is_err() {
            log::warn!("physics worker did not acknowledge flush within {:?}", FLUSH_TIMEOUT);
        }
    }

    // ------------------------------------------------------------------
    // Simulation
    // ------------------------------------------------------------------

    /// Advances the world by `dt`.
    ///
    /// Threaded: queues the step and returns. Unthreaded: steps under the
    /// lock, then syncs every enabled component from its body.
    pub fn update(&self, dt: f32, scene: &mut Scene, store: &mut ComponentStore) {
        if self.is_threading_enabled() {
            self.inner.shared.commands.push(PhysicsCommand::Update(dt));
            return;
        }

        let ids = {
            let mut state = self.inner.shared.state.lock();
            let Some(world) = state.world.as_mut() else {
                log::debug!("update ignored: physics world not initialized");
                return;
            };
            world.step(dt);
            state.enabled_ids()
        };
        for id in ids {
            if let Some(component) = store.physics_mut(id) {
                component.sync_transform_from_physics(self, scene);
            }
        }
    }

    /// Applies worker results published so far, without blocking. Several
    /// results for one component collapse into the newest. Returns how many
    /// components were updated.
    pub fn sync_physics_results(&self, scene: &mut Scene, store: &mut ComponentStore) -> usize {
        let mut latest: HashMap<ComponentId, PhysicsTransformResult> = HashMap::new();
        let mut order = Vec::new();
        while let Some(result) = self.inner.shared.results.try_pop() {
            if latest.insert(result.component, result).is_none() {
                order.push(result.component);
            }
        }

        let mut applied = 0;
        for id in order {
            let (Some(result), Some(component)) = (latest.get(&id), store.physics_mut(id)) else {
                continue;
            };
            if component.apply_physics_result(result, scene) {
                applied += 1;
            }
        }
        applied
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn gravity(&self) -> Option<Vec3> {
        self.inner.shared.state.lock().world.as_ref().map(|w| w.gravity())
    }

    pub fn body_count(&self) -> usize {
        self.inner
            .shared
            .state
            .lock()
            .world
            .as_ref()
            .map_or(0, |w| w.body_count())
    }

    pub fn sensor_count(&self) -> usize {
        self.inner
            .shared
            .state
            .lock()
            .world
            .as_ref()
            .map_or(0, |w| w.sensor_count())
    }

    pub fn body_pose(&self, id: ComponentId) -> Option<(Vec3, Quat)> {
        self.inner.shared.state.lock().world.as_ref()?.body_pose(id)
    }

    pub fn body_snapshot(&self, id: ComponentId) -> Option<BodySnapshot> {
        self.inner.shared.state.lock().world.as_ref()?.body_snapshot(id)
    }

    /// Nodes whose colliders overlap `shape` placed at the given pose.
    pub fn overlap_candidates(
        &self,
        exclude: ComponentId,
        shape: &ShapeHandle,
        position: Vec3,
        rotation: Quat,
    ) -> Vec<NodeId> {
        let mut state = self.inner.shared.state.lock();
        let Some(world) = state.world.as_mut() else {
            return Vec::new();
        };
        let shared = shape.shared();
        world.overlap_candidates(Some(exclude), &*shared, position, rotation)
    }

    // ------------------------------------------------------------------
    // Shapes
    // ------------------------------------------------------------------

    pub fn create_box_shape(&self, half_extents: Vec3) -> ShapeHandle {
        self.inner.shapes.create_box(half_extents)
    }

    pub fn create_sphere_shape(&self, radius: f32) -> ShapeHandle {
        self.inner.shapes.create_sphere(radius)
    }

    pub fn create_capsule_shape(&self, radius: f32, height: f32) -> ShapeHandle {
        self.inner.shapes.create_capsule(radius, height)
    }

    pub fn create_cylinder_shape(&self, radius: f32, height: f32) -> ShapeHandle {
        self.inner.shapes.create_cylinder(radius, height)
    }

    pub fn create_plane_shape(&self) -> ShapeHandle {
        self.inner.shapes.create_plane()
    }

    pub fn create_shape(&self, desc: &CollisionShapeDesc, world_scale: Vec3) -> ShapeHandle {
        self.inner.shapes.create(desc, world_scale)
    }

    pub fn shape_stats(&self) -> ShapeStats {
        self.inner.shapes.stats()
    }
}

// ----------------------------------------------------------------------
// Worker
// ----------------------------------------------------------------------

fn worker_loop(shared: Arc<Shared>) {
    log::debug!("physics worker running on thread {}", current_thread_id());
    while let Some(command) = shared.commands.pop() {
        if let PhysicsCommand::Shutdown = command {
            break;
        }
        let mut state = shared.state.lock();
        execute(&mut state, command, Some(&shared.results));
    }
    log::debug!("physics worker exiting");
}

/// Applies one command. `results` is set only on the worker, which publishes
/// poses after each step.
fn execute(
    state: &mut PhysicsState,
    command: PhysicsCommand,
    results: Option<&ThreadSafeQueue<PhysicsTransformResult>>,
) {
    let command = match command {
        PhysicsCommand::Fence(ack) => {
            let _ = ack.send(());
            return;
        }
        PhysicsCommand::Shutdown => return,
        other => other,
    };

    let Some(world) = state.world.as_mut() else {
        log::debug!("{:?} ignored: physics world not initialized", command);
        return;
    };

    match command {
        PhysicsCommand::Update(dt) => {
            let _span = tracing::trace_span!("physics_update", dt).entered();
            world.step(dt);
            if let Some(results) = results {
                for entry in state.registry.iter().filter(|e| e.enabled) {
                    if let Some((position, rotation)) = world.body_pose(entry.id) {
                        results.push(PhysicsTransformResult {
                            component: entry.id,
                            position,
                            rotation,
                            valid: position.is_finite() && rotation.is_finite(),
                        });
                    }
                }
            }
        }
        PhysicsCommand::AddRigidBody(desc) => world.insert_body(*desc),
        PhysicsCommand::RemoveRigidBody(id) => {
            world.remove_body(id);
        }
        PhysicsCommand::EditBody(id, edit) => world.edit_body(id, edit),
        PhysicsCommand::AddSensor(desc) => world.insert_sensor(*desc),
        PhysicsCommand::RemoveSensor(id) => {
            world.remove_sensor(id);
        }
        PhysicsCommand::SetSensorPose {
            component,
            position,
            rotation,
        } => world.set_sensor_pose(component, position, rotation),
        PhysicsCommand::SetGravity(gravity) => world.set_gravity(gravity),
        PhysicsCommand::Fence(_) | PhysicsCommand::Shutdown => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{BodyConfig, BodyType};
    use rapier3d::prelude::SharedShape;

    fn manager() -> PhysicsManager {
        let manager = PhysicsManager::new(Arc::new(ThreadManager::new()), PhysicsConfig::default());
        manager.initialize();
        manager
    }

    fn falling_box(id: u64) -> BodyDescriptor {
        BodyDescriptor {
            component: ComponentId(id),
            node: NodeId::from_bits(id as u128),
            position: Vec3::new(0.0, 10.0, 0.0),
            rotation: Quat::IDENTITY,
            shape: SharedShape::cuboid(0.5, 0.5, 0.5),
            config: BodyConfig {
                body_type: BodyType::Dynamic,
                mass: 1.0,
                friction: 0.5,
                restitution: 0.0,
                linear_damping: 0.0,
                angular_damping: 0.0,
                gravity_enabled: true,
                linear_factor: Vec3::ONE,
                angular_factor: Vec3::ONE,
                frozen: false,
            },
        }
    }

    #[test]
    fn uninitialized_calls_are_noops() {
        let manager = PhysicsManager::new(Arc::new(ThreadManager::new()), PhysicsConfig::default());
        manager.add_rigid_body(falling_box(1));
        manager.set_gravity(Vec3::ZERO);
        assert!(!manager.is_initialized());
        assert_eq!(manager.body_count(), 0);
        assert_eq!(manager.gravity(), None);
        assert!(manager.body_pose(ComponentId(1)).is_none());
    }

    #[test]
    fn invalid_config_falls_back_to_defaults() {
        let config = PhysicsConfig {
            fixed_timestep: 0.0,
            ..PhysicsConfig::default()
        };
        let manager = PhysicsManager::new(Arc::new(ThreadManager::new()), config);
        assert_eq!(manager.config().fixed_timestep, PhysicsConfig::default().fixed_timestep);

        manager.initialize();
        manager.add_rigid_body(falling_box(1));
        manager.update(1.0 / 60.0, &mut Scene::new(), &mut ComponentStore::new());
        let (position, _) = manager.body_pose(ComponentId(1)).unwrap();
        assert!(position.y < 10.0, "{position}");
    }

    #[test]
    fn threading_requires_initialized_world() {
        let manager = PhysicsManager::new(Arc::new(ThreadManager::new()), PhysicsConfig::default());
        assert!(manager.enable_threading(true).unwrap_err().is_not_initialized());
        assert!(manager.enable_threading(false).is_ok());
    }

    #[test]
    fn threaded_commands_apply_in_order() {
        let manager = manager();
        manager.enable_threading(true).unwrap();
        manager.add_rigid_body(falling_box(1));
        manager.remove_rigid_body(ComponentId(1));
        manager.add_rigid_body(falling_box(2));
        manager.set_gravity(Vec3::new(0.0, -1.0, 0.0));
        manager.flush();

        assert_eq!(manager.body_count(), 1);
        assert!(manager.body_pose(ComponentId(2)).is_some());
        assert_eq!(manager.gravity(), Some(Vec3::new(0.0, -1.0, 0.0)));
        manager.enable_threading(false).unwrap();
    }

    #[test]
    fn worker_publishes_results_for_enabled_components() {
        let manager = manager();
        manager.register_component(ComponentId(1));
        manager.register_component(ComponentId(2));
        manager.set_component_enabled(ComponentId(2), false);
        manager.add_rigid_body(falling_box(1));
        manager.add_rigid_body(falling_box(2));

        manager.enable_threading(true).unwrap();
        manager.inner.shared.commands.push(PhysicsCommand::Update(1.0 / 60.0));
        manager.flush();

        let results = manager.inner.shared.results.drain();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].component, ComponentId(1));
        assert!(results[0].valid);
        assert!(results[0].position.y < 10.0);
    }

    #[test]
    fn toggling_threading_repeatedly_leaves_clean_queues() {
        let threads = Arc::new(ThreadManager::new());
        let manager = PhysicsManager::new(threads.clone(), PhysicsConfig::default());
        manager.initialize();
        for _ in 0..5 {
            manager.enable_threading(true).unwrap();
            manager.enable_threading(true).unwrap();
            assert!(manager.is_threading_enabled());
            manager.add_rigid_body(falling_box(1));
            manager.enable_threading(false).unwrap();
            assert!(!manager.is_threading_enabled());
            assert!(manager.inner.shared.commands.is_empty());
            assert!(!manager.inner.shared.commands.is_stopped());
        }
        assert_eq!(threads.live_threads(), 0);
        assert_eq!(manager.body_count(), 1);
    }

    #[test]
    fn spawn_failure_reports_error_and_stays_unthreaded() {
        let manager = PhysicsManager::new(Arc::new(ThreadManager::with_limit(0)), PhysicsConfig::default());
        manager.initialize();
        let err = manager.enable_threading(true).unwrap_err();
        assert_eq!(
            err.to_string(),
            "enable threading: failed to spawn thread `physics-worker`"
        );
        assert!(!manager.is_threading_enabled());
    }

    #[test]
    fn dropping_last_handle_joins_worker() {
        let threads = Arc::new(ThreadManager::new());
        let manager = PhysicsManager::new(threads.clone(), PhysicsConfig::default());
        manager.initialize();
        manager.enable_threading(true).unwrap();
        let weak = manager.downgrade();
        drop(manager);
        assert!(weak.upgrade().is_none());
        assert_eq!(threads.live_threads(), 0);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let manager = manager();
        manager.add_rigid_body(falling_box(1));
        manager.shutdown();
        manager.shutdown();
        assert!(!manager.is_initialized());
        manager.initialize();
        assert_eq!(manager.body_count(), 0);
    }
}
