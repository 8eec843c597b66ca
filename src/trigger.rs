// src/trigger.rs
//! Sensor zones reporting enter / exit / stay events.
//!
//! Each update the zone asks the broad phase for candidate colliders, then
//! confirms them with an exact test of the candidate node's world origin in
//! the zone's local frame. Objects are tracked by node id; the node name is
//! carried in events for display.
//!
//! Listeners are boxed closures called on the main thread; crossbeam channel
//! subscribers receive a copy of every event and are dropped once
//! disconnected.

use crate::collision_shape::{CollisionShapeDesc, ShapeHandle};
use crate::components::ComponentId;
use crate::physics::SensorDescriptor;
use crate::physics_manager::{PhysicsHandle, PhysicsManager};
use crate::scene::{NodeId, Scene};
use crossbeam::channel::{self, Receiver, Sender};
use glam::{Quat, Vec2, Vec3};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    /// Reports every transition for as long as it lives.
    Area,
    /// Reports the first entry, then marks itself collected and goes quiet.
    Pickup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerEventKind {
    Entered,
    Exited,
    Stayed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerEvent {
    pub zone: ComponentId,
    pub zone_node: NodeId,
    pub kind: TriggerEventKind,
    /// Name of the detected node.
    pub other: String,
    pub other_node: NodeId,
}

pub type TriggerCallback = Box<dyn FnMut(&TriggerEvent) + Send>;

pub struct TriggerComponent {
    id: ComponentId,
    node: NodeId,
    kind: TriggerKind,
    shape_desc: CollisionShapeDesc,
    detection_tags: Vec<String>,
    shape: Option<ShapeHandle>,
    scale: Vec3,
    scale_epsilon: f32,
    physics: Option<PhysicsHandle>,
    inside: BTreeMap<NodeId, String>,
    listeners: Vec<TriggerCallback>,
    subscribers: Vec<Sender<TriggerEvent>>,
    collected: bool,
    started: bool,
    destroyed: bool,
}

impl fmt::Debug for TriggerComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerComponent")
            .field("id", &self.id)
            .field("node", &self.node)
            .field("kind", &self.kind)
            .field("shape", &self.shape_desc)
            .field("inside", &self.inside)
            .field("collected", &self.collected)
            .finish()
    }
}

impl TriggerComponent {
    pub fn new(id: ComponentId, node: NodeId, kind: TriggerKind, shape: CollisionShapeDesc) -> Self {
        Self {
            id,
            node,
            kind,
            shape_desc: shape,
            detection_tags: Vec::new(),
            shape: None,
            scale: Vec3::ONE,
            scale_epsilon: 1.0e-4,
            physics: None,
            inside: BTreeMap::new(),
            listeners: Vec::new(),
            subscribers: Vec::new(),
            collected: false,
            started: false,
            destroyed: false,
        }
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn kind(&self) -> TriggerKind {
        self.kind
    }

    pub fn shape_desc(&self) -> CollisionShapeDesc {
        self.shape_desc
    }

    pub fn is_collected(&self) -> bool {
        self.collected
    }

    /// Names of the objects currently inside, in node order.
    pub fn contained(&self) -> impl Iterator<Item = &str> {
        self.inside.values().map(String::as_str)
    }

    pub fn contained_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.inside.keys().copied()
    }

    /// Restricts detection to nodes carrying one of these tags. Empty means
    /// everything is detected.
    pub fn set_detection_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.detection_tags = tags.into_iter().map(Into::into).collect();
    }

    pub fn on_event<F>(&mut self, callback: F)
    where
        F: FnMut(&TriggerEvent) + Send + 'static,
    {
        self.listeners.push(Box::new(callback));
    }

    pub fn subscribe(&mut self) -> Receiver<TriggerEvent> {
        let (tx, rx) = channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Radius of this zone in world units, when it is a sphere.
    pub fn world_sphere_radius(&self) -> Option<f32> {
        match self.shape_desc.scaled(self.scale) {
            CollisionShapeDesc::Sphere { radius } => Some(radius),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn start(&mut self, manager: &PhysicsManager, scene: &Scene) {
        if self.started || self.destroyed {
            return;
        }
        let Some((position, rotation, scale)) = self.world_pose(scene) else {
            log::warn!("trigger {:?}: owner node {:?} unusable; not started", self.id, self.node);
            return;
        };
        self.scale_epsilon = manager.config().tolerances.scale_epsilon;
        self.insert_sensor(manager, position, rotation, scale);
        self.physics = Some(manager.downgrade());
        self.started = true;
    }

    /// Runs detection and dispatches events. `sphere_zones` maps other
    /// sphere-zone nodes to their world radius.
    pub fn update(
        &mut self,
        manager: &PhysicsManager,
        scene: &Scene,
        sphere_zones: &HashMap<NodeId, f32>,
    ) -> Vec<TriggerEvent> {
        if !self.started || self.destroyed || self.collected {
            return Vec::new();
        }
        let Some((position, rotation, scale)) = self.world_pose(scene) else {
            log::warn!("trigger {:?}: non-finite pose, detection skipped", self.id);
            return Vec::new();
        };

        if (scale - self.scale).abs().max_element() > self.scale_epsilon {
            manager.remove_sensor(self.id);
            self.insert_sensor(manager, position, rotation, scale);
        } else {
            manager.set_sensor_pose(self.id, position, rotation);
        }

        let Some(shape) = self.shape.as_ref() else {
            return Vec::new();
        };
        let dims = shape.dimensions();
        // A plane proxied by a slab still tests as a plane.
        let dims = match self.shape_desc {
            CollisionShapeDesc::Plane => CollisionShapeDesc::Plane,
            _ => dims,
        };
        let to_local = rotation.inverse();

        let mut now = BTreeMap::new();
        for candidate in manager.overlap_candidates(self.id, shape, position, rotation) {
            if candidate == self.node {
                continue;
            }
            let Some(other) = scene.node(candidate) else {
                continue;
            };
            if !self.tag_allowed(&other.tag) {
                continue;
            }
            let local = to_local * (scene.world_position(candidate) - position);
            if self.contains_point(&dims, local, sphere_zones.get(&candidate).copied()) {
                now.insert(candidate, other.name.clone());
            }
        }

        let event = |kind, (node, name): (&NodeId, &String)| TriggerEvent {
            zone: self.id,
            zone_node: self.node,
            kind,
            other: name.clone(),
            other_node: *node,
        };
        let mut events: Vec<TriggerEvent> = now
            .iter()
            .filter(|(node, _)| !self.inside.contains_key(*node))
            .map(|entry| event(TriggerEventKind::Entered, entry))
            .collect();
        events.extend(
            self.inside
                .iter()
                .filter(|(node, _)| !now.contains_key(*node))
                .map(|entry| event(TriggerEventKind::Exited, entry)),
        );
        events.extend(
            now.iter()
                .filter(|(node, _)| self.inside.contains_key(*node))
                .map(|entry| event(TriggerEventKind::Stayed, entry)),
        );
        self.inside = now;

        if self.kind == TriggerKind::Pickup
            && events.iter().any(|e| e.kind == TriggerEventKind::Entered)
        {
            // Only the first entrant collects.
            events.retain(|e| e.kind == TriggerEventKind::Entered);
            events.truncate(1);
            self.collected = true;
            self.inside.clear();
            log::info!("pickup {:?} collected by {}", self.id, events[0].other);
        }

        self.dispatch(&events);
        events
    }

    pub fn destroy(&mut self, manager: &PhysicsManager) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        if self.started {
            manager.remove_sensor(self.id);
        }
        self.shape = None;
        self.physics = None;
        self.inside.clear();
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn insert_sensor(&mut self, manager: &PhysicsManager, position: Vec3, rotation: Quat, scale: Vec3) {
        let shape = manager.create_shape(&self.shape_desc, scale);
        manager.add_sensor(SensorDescriptor {
            component: self.id,
            node: self.node,
            position,
            rotation,
            shape: shape.shared(),
        });
        self.shape = Some(shape);
        self.scale = scale;
    }

    fn world_pose(&self, scene: &Scene) -> Option<(Vec3, Quat, Vec3)> {
        scene.node(self.node)?;
        let (scale, rotation, position) = scene.world_matrix(self.node).to_scale_rotation_translation();
        if !(position.is_finite() && rotation.is_finite() && scale.is_finite()) {
            return None;
        }
        Some((position, rotation.normalize(), scale.abs()))
    }

    fn tag_allowed(&self, tag: &str) -> bool {
        self.detection_tags.is_empty() || self.detection_tags.iter().any(|t| t == tag)
    }

    /// Exact containment of a point given in the zone's local frame.
    fn contains_point(&self, dims: &CollisionShapeDesc, local: Vec3, other_sphere: Option<f32>) -> bool {
        match *dims {
            CollisionShapeDesc::Box { half_extents } => {
                local.x.abs() <= half_extents.x
                    && local.y.abs() <= half_extents.y
                    && local.z.abs() <= half_extents.z
            }
            CollisionShapeDesc::Sphere { radius } => {
                local.length() <= radius + other_sphere.unwrap_or(0.0)
            }
            // Straight section plus rounded caps.
            CollisionShapeDesc::Capsule { radius, height }
            | CollisionShapeDesc::Cylinder { radius, height } => {
                let half = height * 0.5;
                if local.y.abs() <= half {
                    Vec2::new(local.x, local.z).length() <= radius
                } else {
                    let cap = Vec3::new(0.0, half.copysign(local.y), 0.0);
                    local.distance(cap) <= radius
                }
            }
            CollisionShapeDesc::Plane => local.y <= 0.0,
        }
    }

    fn dispatch(&mut self, events: &[TriggerEvent]) {
        if events.is_empty() {
            return;
        }
        for event in events {
            for listener in &mut self.listeners {
                listener(event);
            }
        }
        self.subscribers
            .retain(|tx| events.iter().all(|e| tx.send(e.clone()).is_ok()));
    }
}

impl Drop for TriggerComponent {
    fn drop(&mut self) {
        if let Some(manager) = self.physics.as_ref().and_then(PhysicsHandle::upgrade) {
            self.destroy(&manager);
        }
    }
}
