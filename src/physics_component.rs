// src/physics_component.rs
//! Rigid body attached to a scene node.
//!
//! ## Authority
//! | body type | scene -> physics        | physics -> scene            |
//! |-----------|-------------------------|-----------------------------|
//! | Static    | explicit sync only      | never                       |
//! | Kinematic | every update on drift   | never                       |
//! | Dynamic   | every update on drift   | own node, or parent if any  |
//!
//! Editor mode freezes every body and suspends both directions.
//!
//! Pushed poses are validated first: non-finite world transforms fall back to
//! the local position, positions are clamped, and a child whose world position
//! strays too far from `parent + local` takes the parent-derived value.

use crate::collision_shape::{CollisionShapeDesc, CollisionShapeType, ShapeHandle};
use crate::components::ComponentId;
use crate::error::Result;
use crate::physics::{BodyConfig, BodyDescriptor, BodyEdit, BodyType, SyncTolerances};
use crate::physics_manager::{PhysicsHandle, PhysicsManager, PhysicsTransformResult};
use crate::scene::{NodeId, Scene};
use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Authored body properties.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsProperties {
    pub shape: CollisionShapeDesc,
    pub body_type: BodyType,
    pub mass: f32,
    pub friction: f32,
    pub restitution: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub gravity_enabled: bool,
    /// Per-axis movement factor; zero locks the axis.
    pub linear_factor: Vec3,
    pub angular_factor: Vec3,
}

impl Default for PhysicsProperties {
    fn default() -> Self {
        Self {
            shape: CollisionShapeDesc::default(),
            body_type: BodyType::Static,
            mass: 0.0,
            friction: 0.5,
            restitution: 0.0,
            linear_damping: 0.0,
            angular_damping: 0.05,
            gravity_enabled: true,
            linear_factor: Vec3::ONE,
            angular_factor: Vec3::ONE,
        }
    }
}

impl PhysicsProperties {
    pub fn dynamic(shape: CollisionShapeDesc, mass: f32) -> Self {
        Self {
            shape,
            body_type: BodyType::Dynamic,
            mass,
            ..Self::default()
        }
    }

    pub fn kinematic(shape: CollisionShapeDesc) -> Self {
        Self {
            shape,
            body_type: BodyType::Kinematic,
            ..Self::default()
        }
    }

    pub fn fixed(shape: CollisionShapeDesc) -> Self {
        Self {
            shape,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Validated world pose of the owning node.
#[derive(Debug, Clone, Copy, PartialEq)]
struct WorldPose {
    position: Vec3,
    rotation: Quat,
    scale: Vec3,
}

#[derive(Debug)]
pub struct PhysicsComponent {
    id: ComponentId,
    node: NodeId,
    props: PhysicsProperties,
    shape: Option<ShapeHandle>,
    shape_scale: Vec3,
    physics: Option<PhysicsHandle>,
    tolerances: SyncTolerances,
    last_position: Vec3,
    last_rotation: Quat,
    frozen: bool,
    enabled: bool,
    started: bool,
    destroyed: bool,
}

impl PhysicsComponent {
    /// New components are static until configured otherwise.
    pub fn new(id: ComponentId, node: NodeId) -> Self {
        Self::with_properties(id, node, PhysicsProperties::default())
    }

    pub fn with_properties(id: ComponentId, node: NodeId, props: PhysicsProperties) -> Self {
        let mut component = Self {
            id,
            node,
            props,
            shape: None,
            shape_scale: Vec3::ONE,
            physics: None,
            tolerances: SyncTolerances::default(),
            last_position: Vec3::ZERO,
            last_rotation: Quat::IDENTITY,
            frozen: false,
            enabled: true,
            started: false,
            destroyed: false,
        };
        component.normalize_mass();
        component
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn properties(&self) -> &PhysicsProperties {
        &self.props
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// True while the editor override is applied to the body.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Registers with the manager and creates the body at the node's world pose.
    pub fn start(&mut self, manager: &PhysicsManager, scene: &Scene) {
        if self.destroyed {
            log::warn!("{:?}: start after destroy ignored", self.id);
            return;
        }
        if self.started {
            return;
        }
        self.tolerances = manager.config().tolerances;
        let Some(pose) = self.world_pose(scene) else {
            log::warn!("{:?}: owner node {:?} missing; no body created", self.id, self.node);
            return;
        };

        self.frozen = manager.editor_mode();
        manager.register_component(self.id);
        if !self.enabled {
            manager.set_component_enabled(self.id, false);
        }

        let shape = manager.create_shape(&self.props.shape, pose.scale);
        manager.add_rigid_body(BodyDescriptor {
            component: self.id,
            node: self.node,
            position: pose.position,
            rotation: pose.rotation,
            shape: shape.shared(),
            config: self.body_config(),
        });

        self.shape = Some(shape);
        self.shape_scale = pose.scale;
        self.last_position = pose.position;
        self.last_rotation = pose.rotation;
        self.physics = Some(manager.downgrade());
        self.started = true;
        log::debug!("{:?} started as {:?} on {:?}", self.id, self.props.body_type, self.node);
    }

    /// Per-frame scene-side work: editor transitions, shape rescaling and
    /// pushing drifted node poses into kinematic and dynamic bodies.
    pub fn update(&mut self, manager: &PhysicsManager, scene: &Scene, _dt: f32) {
        if !self.started || self.destroyed {
            return;
        }

        let editor = manager.editor_mode();
        if editor != self.frozen {
            self.frozen = editor;
            manager.edit_body(self.id, BodyEdit::Configure(self.body_config()));
            if !editor {
                // Leaving the editor: the node is authoritative again.
                self.sync_transform_to_physics(manager, scene);
            }
        }

        let Some(pose) = self.world_pose(scene) else {
            return;
        };
        if (pose.scale - self.shape_scale).abs().max_element() > self.tolerances.scale_epsilon {
            self.rebuild_shape(manager, pose.scale);
        }

        if self.frozen || self.props.body_type == BodyType::Static {
            return;
        }
        if self.has_drifted(&pose) {
            self.push_pose(manager, &pose);
        }
    }

    /// Removes the body and releases the shape. Idempotent.
    pub fn destroy(&mut self, manager: &PhysicsManager) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        if self.started {
            manager.remove_rigid_body(self.id);
            manager.unregister_component(self.id);
        }
        self.shape = None;
        self.physics = None;
    }

    // ------------------------------------------------------------------
    // Transform synchronization
    // ------------------------------------------------------------------

    /// Pushes the node's validated world pose into the body.
    pub fn sync_transform_to_physics(&mut self, manager: &PhysicsManager, scene: &Scene) {
        if !self.started || self.destroyed {
            return;
        }
        if let Some(pose) = self.world_pose(scene) {
            self.push_pose(manager, &pose);
        }
    }

    /// Pulls the body pose into the scene. Only dynamic bodies outside editor
    /// mode ever write.
    pub fn sync_transform_from_physics(&mut self, manager: &PhysicsManager, scene: &mut Scene) {
        if !self.writes_back() {
            return;
        }
        if let Some((position, rotation)) = manager.body_pose(self.id) {
            self.write_back(position, rotation, scene);
        }
    }

    /// Applies one worker result. Returns whether the scene was written.
    pub fn apply_physics_result(&mut self, result: &PhysicsTransformResult, scene: &mut Scene) -> bool {
        if result.component != self.id || !self.writes_back() {
            return false;
        }
        if !result.valid {
            log::debug!("{:?}: discarding invalid physics result", self.id);
            return false;
        }
        self.write_back(result.position, result.rotation, scene)
    }

    fn writes_back(&self) -> bool {
        self.started
            && !self.destroyed
            && self.enabled
            && !self.frozen
            && self.props.body_type == BodyType::Dynamic
    }

    fn write_back(&mut self, position: Vec3, rotation: Quat, scene: &mut Scene) -> bool {
        if !position.is_finite() || !rotation.is_finite() {
            log::warn!("{:?}: non-finite body pose skipped", self.id);
            return false;
        }
        let rotation = rotation.normalize();
        let Some(node) = scene.node(self.node) else {
            return false;
        };

        match node.parent() {
            None => {
                let Some(node) = scene.node_mut(self.node) else {
                    return false;
                };
                node.transform.position = position;
                node.transform.rotation = rotation;
            }
            Some(parent) => {
                // The body drives the parent: solve for the parent's world
                // transform, then express it in the grandparent's frame.
                let child_local = node.transform.local_matrix();
                let (world_scale, _, _) = scene.world_matrix(self.node).to_scale_rotation_translation();
                let child_world = Mat4::from_scale_rotation_translation(world_scale, rotation, position);
                let parent_world = child_world * child_local.inverse();
                let parent_local = match scene.parent(parent) {
                    Some(grandparent) => scene.world_matrix(grandparent).inverse() * parent_world,
                    None => parent_world,
                };
                let (_, r, t) = parent_local.to_scale_rotation_translation();
                if !t.is_finite() || !r.is_finite() {
                    log::warn!("{:?}: degenerate hierarchy, parent {:?} not updated", self.id, parent);
                    return false;
                }
                let Some(parent_node) = scene.node_mut(parent) else {
                    return false;
                };
                parent_node.transform.position = t;
                parent_node.transform.rotation = r.normalize();
            }
        }

        self.last_position = position;
        self.last_rotation = rotation;
        true
    }

    fn push_pose(&mut self, manager: &PhysicsManager, pose: &WorldPose) {
        manager.edit_body(
            self.id,
            BodyEdit::Teleport {
                position: pose.position,
                rotation: pose.rotation,
            },
        );
        self.last_position = pose.position;
        self.last_rotation = pose.rotation;
    }

    fn has_drifted(&self, pose: &WorldPose) -> bool {
        pose.position.distance(self.last_position) > self.tolerances.drift_position
            || pose.rotation.angle_between(self.last_rotation) > self.tolerances.drift_rotation
    }

    fn world_pose(&self, scene: &Scene) -> Option<WorldPose> {
        let node = scene.node(self.node)?;
        let tol = &self.tolerances;
        let limit = Vec3::splat(tol.clamp_limit);

        let (scale, rotation, position) = scene.world_matrix(self.node).to_scale_rotation_translation();
        let (mut position, rotation) = if position.is_finite() && rotation.is_finite() {
            (position, rotation)
        } else {
            log::warn!("{:?}: non-finite world transform, using local position", self.id);
            let local = node.transform;
            (
                if local.position.is_finite() { local.position } else { Vec3::ZERO },
                if local.rotation.is_finite() { local.rotation } else { Quat::IDENTITY },
            )
        };

        let clamped = position.clamp(-limit, limit);
        if clamped != position {
            log::warn!("{:?}: position {:?} clamped", self.id, position);
            position = clamped;
        }

        if let Some(parent) = node.parent() {
            let expected = scene.world_position(parent) + node.transform.position;
            if expected.is_finite() && position.distance(expected) > tol.divergence_limit {
                log::warn!(
                    "{:?}: world position {:?} diverges from parent-relative {:?}",
                    self.id,
                    position,
                    expected
                );
                position = expected.clamp(-limit, limit);
            }
        }

        let scale = if scale.is_finite() { scale.abs() } else { Vec3::ONE };
        let rotation = if rotation.length_squared() > 0.0 {
            rotation.normalize()
        } else {
            Quat::IDENTITY
        };
        Some(WorldPose {
            position,
            rotation,
            scale,
        })
    }

    // ------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------

    fn body_config(&self) -> BodyConfig {
        BodyConfig {
            body_type: self.props.body_type,
            mass: self.props.mass,
            friction: self.props.friction,
            restitution: self.props.restitution,
            linear_damping: self.props.linear_damping,
            angular_damping: self.props.angular_damping,
            gravity_enabled: self.props.gravity_enabled,
            linear_factor: self.props.linear_factor,
            angular_factor: self.props.angular_factor,
            frozen: self.frozen,
        }
    }

    fn normalize_mass(&mut self) {
        match self.props.body_type {
            BodyType::Static | BodyType::Kinematic => self.props.mass = 0.0,
            BodyType::Dynamic => {
                if !(self.props.mass.is_finite() && self.props.mass > 0.0) {
                    self.props.mass = 1.0;
                }
            }
        }
    }

    fn push_config(&self) {
        if let Some(manager) = self.live_manager() {
            manager.edit_body(self.id, BodyEdit::Configure(self.body_config()));
        }
    }

    fn live_manager(&self) -> Option<PhysicsManager> {
        if !self.started || self.destroyed {
            return None;
        }
        self.physics.as_ref().and_then(PhysicsHandle::upgrade)
    }

    fn rebuild_shape(&mut self, manager: &PhysicsManager, scale: Vec3) {
        let shape = manager.create_shape(&self.props.shape, scale);
        manager.edit_body(self.id, BodyEdit::Reshape(shape.shared()));
        // Replacing the handle releases the previous shape exactly once.
        self.shape = Some(shape);
        self.shape_scale = scale;
    }

    pub fn body_type(&self) -> BodyType {
        self.props.body_type
    }

    /// Static and kinematic bodies lose their mass; a massless body turned
    /// dynamic gets a mass of 1.
    pub fn set_body_type(&mut self, body_type: BodyType) {
        self.props.body_type = body_type;
        self.normalize_mass();
        self.push_config();
    }

    pub fn mass(&self) -> f32 {
        self.props.mass
    }

    /// Only dynamic bodies carry mass; other types ignore the value.
    pub fn set_mass(&mut self, mass: f32) {
        if self.props.body_type != BodyType::Dynamic {
            log::debug!("{:?}: mass ignored for {:?} body", self.id, self.props.body_type);
            return;
        }
        self.props.mass = mass;
        self.normalize_mass();
        self.push_config();
    }

    pub fn friction(&self) -> f32 {
        self.props.friction
    }

    pub fn set_friction(&mut self, friction: f32) {
        self.props.friction = friction.max(0.0);
        self.push_config();
    }

    pub fn restitution(&self) -> f32 {
        self.props.restitution
    }

    pub fn set_restitution(&mut self, restitution: f32) {
        self.props.restitution = restitution.max(0.0);
        self.push_config();
    }

    pub fn linear_damping(&self) -> f32 {
        self.props.linear_damping
    }

    pub fn angular_damping(&self) -> f32 {
        self.props.angular_damping
    }

    pub fn set_damping(&mut self, linear: f32, angular: f32) {
        self.props.linear_damping = linear.max(0.0);
        self.props.angular_damping = angular.max(0.0);
        self.push_config();
    }

    pub fn gravity_enabled(&self) -> bool {
        self.props.gravity_enabled
    }

    pub fn set_gravity_enabled(&mut self, enabled: bool) {
        self.props.gravity_enabled = enabled;
        self.push_config();
    }

    pub fn linear_factor(&self) -> Vec3 {
        self.props.linear_factor
    }

    pub fn angular_factor(&self) -> Vec3 {
        self.props.angular_factor
    }

    pub fn set_movement_factors(&mut self, linear: Vec3, angular: Vec3) {
        self.props.linear_factor = linear;
        self.props.angular_factor = angular;
        self.push_config();
    }

    /// Disabled components keep their body but stop syncing back.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if let Some(manager) = self.live_manager() {
            manager.set_component_enabled(self.id, enabled);
        }
    }

    pub fn set_linear_velocity(&self, linear: Vec3) {
        if let Some(manager) = self.live_manager() {
            manager.edit_body(
                self.id,
                BodyEdit::Velocity {
                    linear: Some(linear),
                    angular: None,
                },
            );
        }
    }

    pub fn set_angular_velocity(&self, angular: Vec3) {
        if let Some(manager) = self.live_manager() {
            manager.edit_body(
                self.id,
                BodyEdit::Velocity {
                    linear: None,
                    angular: Some(angular),
                },
            );
        }
    }

    pub fn apply_impulse(&self, impulse: Vec3) {
        if let Some(manager) = self.live_manager() {
            manager.edit_body(self.id, BodyEdit::Impulse(impulse));
        }
    }

    // ------------------------------------------------------------------
    // Shape
    // ------------------------------------------------------------------

    pub fn shape_desc(&self) -> CollisionShapeDesc {
        self.props.shape
    }

    pub fn collision_shape_type(&self) -> CollisionShapeType {
        self.props.shape.shape_type()
    }

    pub fn box_half_extents(&self) -> Option<Vec3> {
        self.props.shape.half_extents()
    }

    pub fn radius(&self) -> Option<f32> {
        self.props.shape.radius()
    }

    pub fn height(&self) -> Option<f32> {
        self.props.shape.height()
    }

    /// Backend shape currently attached, if started.
    pub fn shape(&self) -> Option<&ShapeHandle> {
        self.shape.as_ref()
    }

    /// Replaces the collision shape; a started body swaps it in place.
    pub fn set_collision_shape(&mut self, shape: CollisionShapeDesc) {
        self.props.shape = shape;
        if let Some(manager) = self.live_manager() {
            self.rebuild_shape(&manager, self.shape_scale);
        }
    }

    pub fn set_box_shape(&mut self, half_extents: Vec3) {
        self.set_collision_shape(CollisionShapeDesc::Box { half_extents });
    }

    pub fn set_sphere_shape(&mut self, radius: f32) {
        self.set_collision_shape(CollisionShapeDesc::Sphere { radius });
    }

    pub fn set_capsule_shape(&mut self, radius: f32, height: f32) {
        self.set_collision_shape(CollisionShapeDesc::Capsule { radius, height });
    }

    pub fn set_cylinder_shape(&mut self, radius: f32, height: f32) {
        self.set_collision_shape(CollisionShapeDesc::Cylinder { radius, height });
    }

    pub fn set_plane_shape(&mut self) {
        self.set_collision_shape(CollisionShapeDesc::Plane);
    }
}

impl Drop for PhysicsComponent {
    fn drop(&mut self) {
        match self.physics.as_ref().and_then(PhysicsHandle::upgrade) {
            Some(manager) => self.destroy(&manager),
            None => {
                self.destroyed = true;
                self.shape = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, FrameSync};
    use crate::physics::PhysicsConfig;
    use crate::scene::Transform;
    use crate::thread_manager::ThreadManager;
    use std::sync::Arc;

    fn manager() -> PhysicsManager {
        let manager = PhysicsManager::new(Arc::new(ThreadManager::new()), PhysicsConfig::default());
        manager.initialize();
        manager
    }

    fn started(
        manager: &PhysicsManager,
        scene: &Scene,
        node: NodeId,
        id: u64,
        props: PhysicsProperties,
    ) -> PhysicsComponent {
        let mut component = PhysicsComponent::with_properties(ComponentId(id), node, props);
        component.start(manager, scene);
        component
    }

    #[test]
    fn new_component_is_static_and_massless() {
        let component = PhysicsComponent::new(ComponentId(1), NodeId::from_bits(0));
        assert_eq!(component.body_type(), BodyType::Static);
        assert_eq!(component.mass(), 0.0);
        assert_eq!(component.collision_shape_type(), CollisionShapeType::Box);
    }

    #[test]
    fn getters_reflect_setters() {
        let manager = manager();
        let mut scene = Scene::new();
        let node = scene.spawn("body");
        let mut c = started(&manager, &scene, node, 1, PhysicsProperties::default());

        c.set_body_type(BodyType::Dynamic);
        assert_eq!(c.mass(), 1.0);
        c.set_mass(3.5);
        c.set_friction(0.9);
        c.set_restitution(0.25);
        c.set_damping(0.1, 0.2);
        c.set_gravity_enabled(false);
        c.set_movement_factors(Vec3::new(1.0, 0.0, 1.0), Vec3::ZERO);
        c.set_capsule_shape(0.4, 1.5);

        assert_eq!(c.mass(), 3.5);
        assert_eq!(c.friction(), 0.9);
        assert_eq!(c.restitution(), 0.25);
        assert_eq!((c.linear_damping(), c.angular_damping()), (0.1, 0.2));
        assert!(!c.gravity_enabled());
        assert_eq!(c.linear_factor(), Vec3::new(1.0, 0.0, 1.0));
        assert_eq!(c.collision_shape_type(), CollisionShapeType::Capsule);
        assert_eq!((c.radius(), c.height()), (Some(0.4), Some(1.5)));
        assert_eq!(manager.body_snapshot(c.id()).unwrap().mass, 3.5);

        c.set_body_type(BodyType::Kinematic);
        assert_eq!(c.mass(), 0.0);
        c.set_mass(2.0);
        assert_eq!(c.mass(), 0.0);
    }

    #[test]
    fn dynamic_body_falls_monotonically() {
        let manager = manager();
        let mut scene = Scene::new();
        let node = scene.spawn_with("box", Transform::from_position(Vec3::new(0.0, 10.0, 0.0)));
        let mut c = started(
            &manager,
            &scene,
            node,
            1,
            PhysicsProperties::dynamic(CollisionShapeDesc::default(), 1.0),
        );

        let mut store = crate::components::ComponentStore::new();
        let mut last = 10.0;
        for _ in 0..20 {
            c.update(&manager, &scene, 1.0 / 60.0);
            manager.update(1.0 / 60.0, &mut scene, &mut store);
            c.sync_transform_from_physics(&manager, &mut scene);
            let y = scene.node(node).unwrap().transform.position.y;
            assert!(y < last, "{y} !< {last}");
            last = y;
        }
    }

    fn engine(threaded: bool) -> Engine {
        let mut engine = Engine::new(PhysicsConfig::default());
        if threaded {
            engine.set_threaded(true).unwrap();
            engine.set_frame_sync(FrameSync::Blocking);
        }
        engine
    }

    fn assert_static_never_writes_back(threaded: bool) {
        let mut engine = engine(threaded);
        let rig = engine.scene.spawn_with("rig", Transform::from_position(Vec3::new(0.0, 2.0, 0.0)));
        let floor = engine.scene.spawn_child(
            "floor",
            rig,
            Transform::from_position(Vec3::new(0.0, -1.0, 0.0)),
        );
        engine.add_body(
            floor,
            PhysicsProperties::fixed(CollisionShapeDesc::Box { half_extents: Vec3::new(4.0, 0.5, 4.0) }),
        );
        let crate_node = engine
            .scene
            .spawn_with("crate", Transform::from_position(Vec3::new(0.0, 4.0, 0.0)));
        engine.add_body(crate_node, PhysicsProperties::dynamic(CollisionShapeDesc::default(), 1.0));

        for frame in 0..30 {
            let scripted = Vec3::new(frame as f32 * 0.1, 2.0, 0.0);
            engine.scene.node_mut(rig).unwrap().transform.position = scripted;
            engine.tick(1.0 / 60.0);

            assert_eq!(engine.scene.node(rig).unwrap().transform.position, scripted, "frame {frame}");
            assert_eq!(
                engine.scene.node(floor).unwrap().transform.position,
                Vec3::new(0.0, -1.0, 0.0),
                "frame {frame}"
            );
        }
        // The simulation did run.
        assert!(engine.scene.node(crate_node).unwrap().transform.position.y < 4.0);
    }

    #[test]
    fn static_body_never_writes_back() {
        assert_static_never_writes_back(false);
    }

    #[test]
    fn static_body_never_writes_back_threaded() {
        assert_static_never_writes_back(true);
    }

    fn assert_parented_kinematic_follows_script(threaded: bool) {
        let mut engine = engine(threaded);
        let rig = engine.scene.spawn_with("rig", Transform::from_position(Vec3::new(1.0, 2.0, 3.0)));
        let hand = engine.scene.spawn_child("hand", rig, Transform::from_position(Vec3::X));
        let id = engine
            .add_body(hand, PhysicsProperties::kinematic(CollisionShapeDesc::Sphere { radius: 0.2 }))
            .unwrap();

        for frame in 0..30 {
            let scripted = Vec3::new(1.0 + frame as f32 * 0.1, 2.0, 3.0 - frame as f32 * 0.05);
            engine.scene.node_mut(rig).unwrap().transform.position = scripted;
            engine.tick(1.0 / 60.0);

            assert_eq!(engine.scene.node(rig).unwrap().transform.position, scripted, "frame {frame}");
            assert_eq!(engine.scene.node(hand).unwrap().transform.position, Vec3::X, "frame {frame}");
            let (body, _) = engine.physics.body_pose(id).unwrap();
            assert!(body.distance(scripted + Vec3::X) < 1e-3, "frame {frame}: {body}");
        }
    }

    #[test]
    fn parented_kinematic_never_overwrites_parent() {
        assert_parented_kinematic_follows_script(false);
    }

    #[test]
    fn parented_kinematic_never_overwrites_parent_threaded() {
        assert_parented_kinematic_follows_script(true);
    }

    #[test]
    fn parented_dynamic_moves_parent() {
        let manager = manager();
        let mut scene = Scene::new();
        let parent = scene.spawn_with("rig", Transform::from_position(Vec3::new(0.0, 10.0, 0.0)));
        let child = scene.spawn_child("body", parent, Transform::from_position(Vec3::new(0.0, 1.0, 0.0)));
        let mut c = started(
            &manager,
            &scene,
            child,
            1,
            PhysicsProperties::dynamic(CollisionShapeDesc::default(), 1.0),
        );

        manager.edit_body(
            c.id(),
            BodyEdit::Teleport {
                position: Vec3::new(2.0, 4.0, 0.0),
                rotation: Quat::IDENTITY,
            },
        );
        c.sync_transform_from_physics(&manager, &mut scene);
        let p = scene.node(parent).unwrap().transform.position;
        assert!((p - Vec3::new(2.0, 3.0, 0.0)).length() < 1e-5, "{p:?}");
        assert_eq!(scene.node(child).unwrap().transform.position, Vec3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn shape_change_releases_exactly_one_shape() {
        let manager = manager();
        let mut scene = Scene::new();
        let node = scene.spawn("body");
        let mut c = started(&manager, &scene, node, 1, PhysicsProperties::default());
        let before = manager.shape_stats();

        c.set_sphere_shape(2.0);
        let after = manager.shape_stats();
        assert_eq!(after.created, before.created + 1);
        assert_eq!(after.destroyed, before.destroyed + 1);
        assert_eq!(after.live, before.live);

        c.destroy(&manager);
        c.destroy(&manager);
        assert_eq!(manager.shape_stats().live, 0);
        assert_eq!(manager.body_count(), 0);
    }

    #[test]
    fn world_scale_change_rebuilds_shape() {
        let manager = manager();
        let mut scene = Scene::new();
        let node = scene.spawn("body");
        let mut c = started(&manager, &scene, node, 1, PhysicsProperties::default());

        scene.node_mut(node).unwrap().transform.scale = Vec3::splat(2.0);
        c.update(&manager, &scene, 0.0);
        assert_eq!(
            c.shape().unwrap().dimensions().half_extents(),
            Some(Vec3::ONE)
        );
        assert_eq!(manager.shape_stats().live, 1);
    }

    #[test]
    fn divergent_child_uses_parent_relative_position() {
        let manager = manager();
        let mut scene = Scene::new();
        let parent = scene.spawn_with(
            "spinner",
            Transform::identity().with_rotation(Quat::from_rotation_y(std::f32::consts::PI)),
        );
        let child = scene.spawn_child("arm", parent, Transform::from_position(Vec3::new(60.0, 0.0, 0.0)));
        let c = started(
            &manager,
            &scene,
            child,
            1,
            PhysicsProperties::kinematic(CollisionShapeDesc::default()),
        );

        // World position is (-60, 0, 0); 120 units from parent + local.
        let (p, _) = manager.body_pose(c.id()).unwrap();
        assert!((p - Vec3::new(60.0, 0.0, 0.0)).length() < 1e-3, "{p:?}");
    }

    #[test]
    fn non_finite_world_transform_falls_back_to_local() {
        let manager = manager();
        let mut scene = Scene::new();
        let parent = scene.spawn_with("broken", Transform::from_position(Vec3::new(f32::NAN, 0.0, 0.0)));
        let child = scene.spawn_child("body", parent, Transform::from_position(Vec3::new(1.0, 2.0, 3.0)));
        let c = started(
            &manager,
            &scene,
            child,
            1,
            PhysicsProperties::kinematic(CollisionShapeDesc::default()),
        );
        let (p, _) = manager.body_pose(c.id()).unwrap();
        assert_eq!(p, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn positions_are_clamped() {
        let manager = manager();
        let mut scene = Scene::new();
        let node = scene.spawn_with("far", Transform::from_position(Vec3::new(5.0e7, 0.0, 0.0)));
        let c = started(&manager, &scene, node, 1, PhysicsProperties::default());
        let (p, _) = manager.body_pose(c.id()).unwrap();
        assert_eq!(p.x, 1_000_000.0);
    }

    #[test]
    fn editor_mode_freezes_and_suspends_sync() {
        let manager = manager();
        let mut scene = Scene::new();
        let node = scene.spawn_with("box", Transform::from_position(Vec3::new(0.0, 10.0, 0.0)));
        let mut c = started(
            &manager,
            &scene,
            node,
            1,
            PhysicsProperties::dynamic(CollisionShapeDesc::default(), 1.0),
        );

        manager.set_editor_mode(true);
        c.update(&manager, &scene, 0.0);
        assert!(c.is_frozen());
        let snap = manager.body_snapshot(c.id()).unwrap();
        assert_eq!(snap.body_type, BodyType::Static);
        assert_eq!(snap.gravity_scale, 0.0);

        let mut store = crate::components::ComponentStore::new();
        manager.update(0.5, &mut scene, &mut store);
        c.sync_transform_from_physics(&manager, &mut scene);
        assert_eq!(scene.node(node).unwrap().transform.position.y, 10.0);

        manager.set_editor_mode(false);
        c.update(&manager, &scene, 0.0);
        assert!(!c.is_frozen());
        assert_eq!(manager.body_snapshot(c.id()).unwrap().body_type, BodyType::Dynamic);
    }

    #[test]
    fn properties_json_round_trip() {
        let props = PhysicsProperties {
            restitution: 0.3,
            ..PhysicsProperties::dynamic(CollisionShapeDesc::Cylinder { radius: 1.0, height: 2.0 }, 4.0)
        };
        let json = props.to_json().unwrap();
        assert_eq!(PhysicsProperties::from_json(&json).unwrap(), props);

        let partial = PhysicsProperties::from_json(r#"{ "body_type": "Kinematic" }"#).unwrap();
        assert_eq!(partial.body_type, BodyType::Kinematic);
        assert_eq!(partial.friction, 0.5);
    }
}
