// src/physics.rs
//! Rapier 3D world wrapper owned by the physics manager.
//!
//! - Fixed sub-stepping (1/60 s, at most 20 sub-steps per call by default).
//!   Time beyond the cap is dropped, never carried into the next call.
//! - Bodies and sensors are keyed by the owning component id; the backend
//!   handles never leave this module.
//! - glam <-> nalgebra conversion helpers for the scene boundary.

use crate::components::ComponentId;
use crate::error::{Error, Result};
use crate::scene::NodeId;
use glam::{Quat, Vec3};
use nalgebra::{Isometry3, Quaternion, Translation3, UnitQuaternion};
use rapier3d::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_FIXED_TIMESTEP: f32 = 1.0 / 60.0;
pub const DEFAULT_MAX_SUBSTEPS: u32 = 20;

/// Shapes whose unit-density mass falls below this are treated as massless.
const MIN_UNIT_MASS: f32 = 1.0e-6;

// ---------------------------------------------------------------------------
// Shared Configuration
// ---------------------------------------------------------------------------

/// Defines which subsystem is allowed to move a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BodyType {
    /// Never moves; never written back to the scene.
    #[default]
    Static,
    /// Advanced by the solver; physics is the authoritative writer.
    Dynamic,
    /// Zero mass, driven by the scene graph or scripts.
    Kinematic,
}

impl BodyType {
    fn from_rapier(body_type: RigidBodyType) -> Self {
        match body_type {
            RigidBodyType::Dynamic => BodyType::Dynamic,
            RigidBodyType::Fixed => BodyType::Static,
            RigidBodyType::KinematicPositionBased | RigidBodyType::KinematicVelocityBased => {
                BodyType::Kinematic
            }
        }
    }
}

/// Tolerances used by the transform synchronization protocol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncTolerances {
    /// Max distance between a child's world position and
    /// `parent position + local position` before the parent-derived value wins.
    pub divergence_limit: f32,
    /// Every position component is clamped to +/- this value.
    pub clamp_limit: f32,
    /// Node movement (world units) that triggers a push into physics.
    pub drift_position: f32,
    /// Node rotation (radians) that triggers a push into physics.
    pub drift_rotation: f32,
    /// World-scale change that regenerates a collision shape.
    pub scale_epsilon: f32,
}

impl Default for SyncTolerances {
    fn default() -> Self {
        Self {
            divergence_limit: 50.0,
            clamp_limit: 1_000_000.0,
            drift_position: 0.001,
            drift_rotation: 0.001,
            scale_epsilon: 1.0e-4,
        }
    }
}

/// Configuration for the physics manager and its world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    pub gravity: Vec3,
    pub fixed_timestep: f32,
    pub max_substeps: u32,
    /// Spawn the physics worker as part of `initialize`.
    pub start_threaded: bool,
    pub tolerances: SyncTolerances,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -9.81, 0.0),
            fixed_timestep: DEFAULT_FIXED_TIMESTEP,
            max_substeps: DEFAULT_MAX_SUBSTEPS,
            start_threaded: false,
            tolerances: SyncTolerances::default(),
        }
    }
}

impl PhysicsConfig {
    /// Parses and validates a JSON configuration. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.fixed_timestep.is_finite() && self.fixed_timestep > 0.0) {
            return Err(Error::Config(format!(
                "fixed_timestep must be positive, got {}",
                self.fixed_timestep
            )));
        }
        if self.max_substeps == 0 {
            return Err(Error::Config("max_substeps must be at least 1".into()));
        }
        if !self.gravity.is_finite() {
            return Err(Error::Config("gravity must be finite".into()));
        }
        let t = &self.tolerances;
        if [t.divergence_limit, t.clamp_limit, t.drift_position, t.drift_rotation, t.scale_epsilon]
            .iter()
            .any(|v| !(v.is_finite() && *v >= 0.0))
        {
            return Err(Error::Config("tolerances must be finite and non-negative".into()));
        }
        Ok(())
    }
}

/// Backend-facing body configuration derived from authored properties.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyConfig {
    pub body_type: BodyType,
    pub mass: f32,
    pub friction: f32,
    pub restitution: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub gravity_enabled: bool,
    pub linear_factor: Vec3,
    pub angular_factor: Vec3,
    /// Editor override: frozen, zero gravity, not simulated.
    pub frozen: bool,
}

impl BodyConfig {
    fn rapier_type(&self) -> RigidBodyType {
        if self.frozen {
            return RigidBodyType::Fixed;
        }
        match self.body_type {
            BodyType::Static => RigidBodyType::Fixed,
            BodyType::Dynamic => RigidBodyType::Dynamic,
            BodyType::Kinematic => RigidBodyType::KinematicPositionBased,
        }
    }

    /// Mass seen by the backend: only simulated dynamic bodies carry mass.
    pub fn effective_mass(&self) -> f32 {
        if self.frozen || self.body_type != BodyType::Dynamic {
            0.0
        } else {
            self.mass.max(0.0)
        }
    }

    fn density(&self, unit_mass: f32) -> f32 {
        let mass = self.effective_mass();
        if mass <= 0.0 {
            0.0
        } else if unit_mass.is_finite() && unit_mass > MIN_UNIT_MASS {
            mass / unit_mass
        } else {
            1.0
        }
    }

    fn gravity_scale(&self) -> f32 {
        if self.frozen || !self.gravity_enabled {
            0.0
        } else {
            1.0
        }
    }
}

/// Everything the world needs to create one rigid body.
#[derive(Clone)]
pub struct BodyDescriptor {
    pub component: ComponentId,
    pub node: NodeId,
    pub position: Vec3,
    pub rotation: Quat,
    pub shape: SharedShape,
    pub config: BodyConfig,
}

/// Everything the world needs to create one sensor.
#[derive(Clone)]
pub struct SensorDescriptor {
    pub component: ComponentId,
    pub node: NodeId,
    pub position: Vec3,
    pub rotation: Quat,
    pub shape: SharedShape,
}

/// Mutation applied to an existing body.
#[derive(Clone)]
pub enum BodyEdit {
    /// Moves the body. Kinematic bodies also get their target and AABBs refreshed.
    Teleport { position: Vec3, rotation: Quat },
    Configure(BodyConfig),
    /// Swaps the collision shape and recomputes mass properties.
    Reshape(SharedShape),
    Impulse(Vec3),
    /// `None` leaves that velocity unchanged.
    Velocity {
        linear: Option<Vec3>,
        angular: Option<Vec3>,
    },
}

impl std::fmt::Debug for BodyEdit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BodyEdit::Teleport { position, rotation } => f
                .debug_struct("Teleport")
                .field("position", position)
                .field("rotation", rotation)
                .finish(),
            BodyEdit::Configure(config) => f.debug_tuple("Configure").field(config).finish(),
            BodyEdit::Reshape(shape) => f
                .debug_tuple("Reshape")
                .field(&shape.shape_type())
                .finish(),
            BodyEdit::Impulse(impulse) => f.debug_tuple("Impulse").field(impulse).finish(),
            BodyEdit::Velocity { linear, angular } => f
                .debug_struct("Velocity")
                .field("linear", linear)
                .field("angular", angular)
                .finish(),
        }
    }
}

/// Read-only view of a body for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodySnapshot {
    pub body_type: BodyType,
    pub position: Vec3,
    pub rotation: Quat,
    pub linear_velocity: Vec3,
    pub gravity_scale: f32,
    pub mass: f32,
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

#[inline]
pub fn to_vector(v: Vec3) -> Vector<Real> {
    vector![v.x, v.y, v.z]
}

#[inline]
pub fn from_vector(v: &Vector<Real>) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

pub fn to_isometry(position: Vec3, rotation: Quat) -> Isometry3<Real> {
    let rotation = UnitQuaternion::from_quaternion(Quaternion::new(
        rotation.w, rotation.x, rotation.y, rotation.z,
    ));
    Isometry3::from_parts(Translation3::new(position.x, position.y, position.z), rotation)
}

pub fn from_isometry(iso: &Isometry3<Real>) -> (Vec3, Quat) {
    let t = iso.translation.vector;
    let q = iso.rotation.coords;
    (Vec3::new(t.x, t.y, t.z), Quat::from_xyzw(q.x, q.y, q.z, q.w))
}

// ---------------------------------------------------------------------------
// Fixed-step policy
// ---------------------------------------------------------------------------

/// Splits frame time into fixed sub-steps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedStepper {
    fixed_timestep: f32,
    max_substeps: u32,
    accumulator: f32,
}

impl FixedStepper {
    pub fn new(fixed_timestep: f32, max_substeps: u32) -> Self {
        Self {
            fixed_timestep,
            max_substeps: max_substeps.max(1),
            accumulator: 0.0,
        }
    }

    /// Adds `dt` and returns how many fixed steps to run now. Any remainder
    /// shorter than one step waits for the next call; time beyond the cap is
    /// discarded.
    pub fn advance(&mut self, dt: f32) -> u32 {
        if !dt.is_finite() || dt <= 0.0 {
            return 0;
        }
        self.accumulator += dt;
        let wanted = (self.accumulator / self.fixed_timestep).floor();
        let cap = self.max_substeps as f32;
        if wanted > cap {
            log::debug!(
                "dropping {:.3}s of simulation time (sub-step cap {})",
                self.accumulator - cap * self.fixed_timestep,
                self.max_substeps
            );
            self.accumulator = 0.0;
            return self.max_substeps;
        }
        self.accumulator -= wanted * self.fixed_timestep;
        wanted as u32
    }

    pub fn fixed_timestep(&self) -> f32 {
        self.fixed_timestep
    }

    pub fn pending(&self) -> f32 {
        self.accumulator
    }
}

// ---------------------------------------------------------------------------
// 3D Physics World
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct BodySlot {
    body: RigidBodyHandle,
    collider: ColliderHandle,
    config: BodyConfig,
}

pub struct PhysicsWorld {
    gravity: Vector<Real>,
    integration_params: IntegrationParameters,
    pipeline: PhysicsPipeline,
    islands: IslandManager,
    broad_phase: BroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,
    stepper: FixedStepper,
    slots: HashMap<ComponentId, BodySlot>,
    sensors: HashMap<ComponentId, ColliderHandle>,
    /// Set when collider poses changed outside a step.
    query_dirty: bool,
}

impl PhysicsWorld {
    pub fn new(config: &PhysicsConfig) -> Self {
        Self {
            gravity: to_vector(config.gravity),
            integration_params: IntegrationParameters::default(),
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: BroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            stepper: FixedStepper::new(config.fixed_timestep, config.max_substeps),
            slots: HashMap::new(),
            sensors: HashMap::new(),
            query_dirty: false,
        }
    }

    /// Advances the simulation by `dt` using the fixed-step policy.
    /// Returns the number of sub-steps taken.
    pub fn step(&mut self, dt: f32) -> u32 {
        let substeps = self.stepper.advance(dt);
        if substeps == 0 {
            return 0;
        }
        let _span = tracing::debug_span!("physics_step", dt, substeps).entered();
        self.integration_params.dt = self.stepper.fixed_timestep();
        for _ in 0..substeps {
            self.pipeline.step(
                &self.gravity,
                &self.integration_params,
                &mut self.islands,
                &mut self.broad_phase,
                &mut self.narrow_phase,
                &mut self.bodies,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                &mut self.ccd_solver,
                Some(&mut self.query_pipeline),
                &(),
                &(),
            );
        }
        self.query_dirty = false;
        substeps
    }

    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = to_vector(gravity);
    }

    pub fn gravity(&self) -> Vec3 {
        from_vector(&self.gravity)
    }

    pub fn body_count(&self) -> usize {
        self.slots.len()
    }

    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }

    pub fn has_body(&self, component: ComponentId) -> bool {
        self.slots.contains_key(&component)
    }

    // -------------------------------------------------------------------------
    // Body Management
    // -------------------------------------------------------------------------

    pub fn insert_body(&mut self, desc: BodyDescriptor) {
        if self.slots.contains_key(&desc.component) {
            log::warn!("{:?} already owns a body; replacing it", desc.component);
            self.remove_body(desc.component);
        }

        let body = RigidBodyBuilder::new(desc.config.rapier_type())
            .position(to_isometry(desc.position, desc.rotation))
            .user_data(desc.node.to_bits())
            .build();
        let body_handle = self.bodies.insert(body);

        let collider = ColliderBuilder::new(desc.shape)
            .user_data(desc.node.to_bits())
            .build();
        let collider_handle =
            self.colliders
                .insert_with_parent(collider, body_handle, &mut self.bodies);

        self.slots.insert(
            desc.component,
            BodySlot {
                body: body_handle,
                collider: collider_handle,
                config: desc.config,
            },
        );
        self.configure_body(desc.component, desc.config);
        self.query_dirty = true;
    }

    /// Removes the body and its collider. Unknown components are ignored.
    pub fn remove_body(&mut self, component: ComponentId) -> bool {
        let Some(slot) = self.slots.remove(&component) else {
            return false;
        };
        self.bodies.remove(
            slot.body,
            &mut self.islands,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
        self.query_dirty = true;
        true
    }

    pub fn edit_body(&mut self, component: ComponentId, edit: BodyEdit) {
        if !self.slots.contains_key(&component) {
            log::debug!("{:?} has no body; dropping {:?}", component, edit);
            return;
        }
        match edit {
            BodyEdit::Teleport { position, rotation } => self.teleport(component, position, rotation),
            BodyEdit::Configure(config) => self.configure_body(component, config),
            BodyEdit::Reshape(shape) => {
                let Some(slot) = self.slots.get(&component).copied() else {
                    return;
                };
                if let Some(collider) = self.colliders.get_mut(slot.collider) {
                    collider.set_shape(shape);
                }
                self.configure_body(component, slot.config);
                self.query_dirty = true;
            }
            BodyEdit::Impulse(impulse) => {
                if let Some(body) = self.body_mut(component) {
                    body.apply_impulse(to_vector(impulse), true);
                }
            }
            BodyEdit::Velocity { linear, angular } => {
                if let Some(body) = self.body_mut(component) {
                    if let Some(linear) = linear {
                        body.set_linvel(to_vector(linear), true);
                    }
                    if let Some(angular) = angular {
                        body.set_angvel(to_vector(angular), true);
                    }
                }
            }
        }
    }

    fn body_mut(&mut self, component: ComponentId) -> Option<&mut RigidBody> {
        let slot = self.slots.get(&component)?;
        self.bodies.get_mut(slot.body)
    }

    fn teleport(&mut self, component: ComponentId, position: Vec3, rotation: Quat) {
        let Some(slot) = self.slots.get(&component).copied() else {
            return;
        };
        let iso = to_isometry(position, rotation);
        let Some(body) = self.bodies.get_mut(slot.body) else {
            return;
        };
        body.set_position(iso, true);
        if !body.is_kinematic() {
            return;
        }
        // The solver does not advance kinematic bodies, so tell the broad
        // phase about the move now.
        body.set_next_kinematic_position(iso);
        let attached: Vec<ColliderHandle> = body.colliders().to_vec();
        for handle in attached {
            if let Some(collider) = self.colliders.get_mut(handle) {
                if let Some(relative) = collider.position_wrt_parent().copied() {
                    collider.set_position(iso * relative);
                }
            }
        }
        self.query_dirty = true;
    }

    fn configure_body(&mut self, component: ComponentId, config: BodyConfig) {
        let Some(slot) = self.slots.get_mut(&component) else {
            return;
        };
        slot.config = config;
        let slot = *slot;

        if let Some(collider) = self.colliders.get_mut(slot.collider) {
            let unit_mass = collider.shape().mass_properties(1.0).mass();
            collider.set_friction(config.friction);
            collider.set_restitution(config.restitution);
            collider.set_density(config.density(unit_mass));
        }

        if let Some(body) = self.bodies.get_mut(slot.body) {
            body.set_body_type(config.rapier_type(), true);
            body.set_linear_damping(config.linear_damping);
            body.set_angular_damping(config.angular_damping);
            body.set_gravity_scale(config.gravity_scale(), true);
            let lf = config.linear_factor;
            let af = config.angular_factor;
            body.set_enabled_translations(lf.x != 0.0, lf.y != 0.0, lf.z != 0.0, true);
            body.set_enabled_rotations(af.x != 0.0, af.y != 0.0, af.z != 0.0, true);
            if config.frozen {
                body.set_linvel(Vector::zeros(), false);
                body.set_angvel(Vector::zeros(), false);
            }
        }
    }

    /// World pose of a component's body, read from the backend.
    pub fn body_pose(&self, component: ComponentId) -> Option<(Vec3, Quat)> {
        let slot = self.slots.get(&component)?;
        self.bodies.get(slot.body).map(|b| from_isometry(b.position()))
    }

    pub fn body_snapshot(&self, component: ComponentId) -> Option<BodySnapshot> {
        let slot = self.slots.get(&component)?;
        let body = self.bodies.get(slot.body)?;
        let (position, rotation) = from_isometry(body.position());
        Some(BodySnapshot {
            body_type: BodyType::from_rapier(body.body_type()),
            position,
            rotation,
            linear_velocity: from_vector(body.linvel()),
            gravity_scale: body.gravity_scale(),
            mass: slot.config.effective_mass(),
        })
    }

    // -------------------------------------------------------------------------
    // Sensors
    // -------------------------------------------------------------------------

    pub fn insert_sensor(&mut self, desc: SensorDescriptor) {
        self.remove_sensor(desc.component);
        let mut collider = ColliderBuilder::new(desc.shape)
            .sensor(true)
            .user_data(desc.node.to_bits())
            .build();
        collider.set_position(to_isometry(desc.position, desc.rotation));
        let handle = self.colliders.insert(collider);
        self.sensors.insert(desc.component, handle);
        self.query_dirty = true;
    }

    pub fn remove_sensor(&mut self, component: ComponentId) -> bool {
        let Some(handle) = self.sensors.remove(&component) else {
            return false;
        };
        self.colliders
            .remove(handle, &mut self.islands, &mut self.bodies, false);
        self.query_dirty = true;
        true
    }

    pub fn set_sensor_pose(&mut self, component: ComponentId, position: Vec3, rotation: Quat) {
        let Some(handle) = self.sensors.get(&component).copied() else {
            return;
        };
        if let Some(collider) = self.colliders.get_mut(handle) {
            collider.set_position(to_isometry(position, rotation));
            self.query_dirty = true;
        }
    }

    /// Broad-phase candidates overlapping `shape` at the given pose, reported
    /// as the owning scene nodes. `exclude` skips that component's own sensor.
    pub fn overlap_candidates(
        &mut self,
        exclude: Option<ComponentId>,
        shape: &dyn Shape,
        position: Vec3,
        rotation: Quat,
    ) -> Vec<NodeId> {
        if self.query_dirty {
            self.query_pipeline.update(&self.bodies, &self.colliders);
            self.query_dirty = false;
        }

        let mut filter = QueryFilter::default();
        if let Some(own) = exclude.and_then(|c| self.sensors.get(&c).copied()) {
            filter = filter.exclude_collider(own);
        }

        let iso = to_isometry(position, rotation);
        let colliders = &self.colliders;
        let mut found = Vec::new();
        self.query_pipeline.intersections_with_shape(
            &self.bodies,
            colliders,
            &iso,
            shape,
            filter,
            |handle| {
                if let Some(collider) = colliders.get(handle) {
                    found.push(NodeId::from_bits(collider.user_data));
                }
                true
            },
        );
        found
    }
}
