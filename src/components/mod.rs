//! Component storage for physics-driven nodes.
//! Components live in the store keyed by [`ComponentId`]; each node keeps a
//! small [`ComponentSet`] for typed lookup by kind.

use crate::collision_shape::CollisionShapeDesc;
use crate::physics_component::{PhysicsComponent, PhysicsProperties};
use crate::physics_manager::PhysicsManager;
use crate::scene::{NodeId, Scene};
use crate::trigger::{TriggerComponent, TriggerEvent, TriggerKind};
use std::collections::{BTreeMap, HashMap};

/// Unique identifier of a component instance.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Physics,
    Area,
    Pickup,
}

impl ComponentKind {
    #[inline(always)]
    fn bit(self) -> u8 {
        match self {
            ComponentKind::Physics => 1 << 0,
            ComponentKind::Area => 1 << 1,
            ComponentKind::Pickup => 1 << 2,
        }
    }
}

impl From<TriggerKind> for ComponentKind {
    fn from(kind: TriggerKind) -> Self {
        match kind {
            TriggerKind::Area => ComponentKind::Area,
            TriggerKind::Pickup => ComponentKind::Pickup,
        }
    }
}

/// Components attached to one node, at most one per kind.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ComponentSet {
    mask: u8,
    entries: Vec<(ComponentKind, ComponentId)>,
}

impl ComponentSet {
    #[inline(always)]
    pub fn has(&self, kind: ComponentKind) -> bool {
        self.mask & kind.bit() != 0
    }

    pub fn get(&self, kind: ComponentKind) -> Option<ComponentId> {
        if !self.has(kind) {
            return None;
        }
        self.entries.iter().find(|(k, _)| *k == kind).map(|(_, id)| *id)
    }

    /// Returns false if a component of this kind is already attached.
    pub fn insert(&mut self, kind: ComponentKind, id: ComponentId) -> bool {
        if self.has(kind) {
            return false;
        }
        self.mask |= kind.bit();
        self.entries.push((kind, id));
        true
    }

    pub fn remove(&mut self, id: ComponentId) -> Option<ComponentKind> {
        let pos = self.entries.iter().position(|(_, c)| *c == id)?;
        let (kind, _) = self.entries.remove(pos);
        self.mask &= !kind.bit();
        Some(kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ComponentKind, ComponentId)> + '_ {
        self.entries.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Owns every physics and trigger component in a scene.
#[derive(Debug, Default)]
pub struct ComponentStore {
    next_id: u64,
    physics: BTreeMap<ComponentId, PhysicsComponent>,
    triggers: BTreeMap<ComponentId, TriggerComponent>,
}

impl ComponentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> ComponentId {
        self.next_id += 1;
        ComponentId(self.next_id)
    }

    pub fn len(&self) -> usize {
        self.physics.len() + self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attaches a physics component. `None` if the node is missing or
    /// already has one.
    pub fn add_physics(
        &mut self,
        scene: &mut Scene,
        node: NodeId,
        props: PhysicsProperties,
    ) -> Option<ComponentId> {
        let id = self.attach(scene, node, ComponentKind::Physics)?;
        self.physics
            .insert(id, PhysicsComponent::with_properties(id, node, props));
        Some(id)
    }

    /// Attaches an area or pickup zone. `None` if the node is missing or
    /// already has one of that kind.
    pub fn add_trigger(
        &mut self,
        scene: &mut Scene,
        node: NodeId,
        kind: TriggerKind,
        shape: CollisionShapeDesc,
    ) -> Option<ComponentId> {
        let id = self.attach(scene, node, kind.into())?;
        self.triggers
            .insert(id, TriggerComponent::new(id, node, kind, shape));
        Some(id)
    }

    fn attach(&mut self, scene: &mut Scene, node: NodeId, kind: ComponentKind) -> Option<ComponentId> {
        let id = ComponentId(self.next_id + 1);
        let Some(owner) = scene.node_mut(node) else {
            log::warn!("cannot attach {:?}: node {:?} does not exist", kind, node);
            return None;
        };
        if !owner.components.insert(kind, id) {
            log::warn!("node {:?} already has a {:?} component", node, kind);
            return None;
        }
        Some(self.allocate())
    }

    pub fn physics(&self, id: ComponentId) -> Option<&PhysicsComponent> {
        self.physics.get(&id)
    }

    pub fn physics_mut(&mut self, id: ComponentId) -> Option<&mut PhysicsComponent> {
        self.physics.get_mut(&id)
    }

    pub fn trigger(&self, id: ComponentId) -> Option<&TriggerComponent> {
        self.triggers.get(&id)
    }

    pub fn trigger_mut(&mut self, id: ComponentId) -> Option<&mut TriggerComponent> {
        self.triggers.get_mut(&id)
    }

    /// Typed lookup through the node's component set.
    pub fn physics_of(&self, scene: &Scene, node: NodeId) -> Option<&PhysicsComponent> {
        let id = scene.node(node)?.components.get(ComponentKind::Physics)?;
        self.physics.get(&id)
    }

    pub fn physics_of_mut(&mut self, scene: &Scene, node: NodeId) -> Option<&mut PhysicsComponent> {
        let id = scene.node(node)?.components.get(ComponentKind::Physics)?;
        self.physics.get_mut(&id)
    }

    pub fn trigger_of(&self, scene: &Scene, node: NodeId, kind: TriggerKind) -> Option<&TriggerComponent> {
        let id = scene.node(node)?.components.get(kind.into())?;
        self.triggers.get(&id)
    }

    pub fn trigger_of_mut(
        &mut self,
        scene: &Scene,
        node: NodeId,
        kind: TriggerKind,
    ) -> Option<&mut TriggerComponent> {
        let id = scene.node(node)?.components.get(kind.into())?;
        self.triggers.get_mut(&id)
    }

    /// Starts every component that has not started yet.
    pub fn start_all(&mut self, manager: &PhysicsManager, scene: &Scene) {
        for component in self.physics.values_mut() {
            component.start(manager, scene);
        }
        for trigger in self.triggers.values_mut() {
            trigger.start(manager, scene);
        }
    }

    pub fn update_physics(&mut self, manager: &PhysicsManager, scene: &Scene, dt: f32) {
        for component in self.physics.values_mut() {
            component.update(manager, scene, dt);
        }
    }

    /// Runs every zone and returns their events in component order.
    pub fn update_triggers(&mut self, manager: &PhysicsManager, scene: &Scene) -> Vec<TriggerEvent> {
        let sphere_zones: HashMap<NodeId, f32> = self
            .triggers
            .values()
            .filter_map(|t| t.world_sphere_radius().map(|r| (t.node(), r)))
            .collect();
        self.triggers
            .values_mut()
            .flat_map(|t| t.update(manager, scene, &sphere_zones))
            .collect()
    }

    /// Destroys and detaches one component. Returns false if it is unknown.
    pub fn remove(&mut self, manager: &PhysicsManager, scene: &mut Scene, id: ComponentId) -> bool {
        let node = if let Some(mut component) = self.physics.remove(&id) {
            component.destroy(manager);
            component.node()
        } else if let Some(mut trigger) = self.triggers.remove(&id) {
            trigger.destroy(manager);
            trigger.node()
        } else {
            return false;
        };
        if let Some(owner) = scene.node_mut(node) {
            owner.components.remove(id);
        }
        true
    }

    /// Destroys every component attached to `node`.
    pub fn remove_node(&mut self, manager: &PhysicsManager, scene: &mut Scene, node: NodeId) {
        let ids: Vec<ComponentId> = match scene.node(node) {
            Some(owner) => owner.components.iter().map(|(_, id)| id).collect(),
            None => self
                .physics
                .values()
                .filter(|c| c.node() == node)
                .map(|c| c.id())
                .chain(self.triggers.values().filter(|t| t.node() == node).map(|t| t.id()))
                .collect(),
        };
        for id in ids {
            self.remove(manager, scene, id);
        }
    }

    pub fn destroy_all(&mut self, manager: &PhysicsManager) {
        for (_, mut component) in std::mem::take(&mut self.physics) {
            component.destroy(manager);
        }
        for (_, mut trigger) in std::mem::take(&mut self.triggers) {
            trigger.destroy(manager);
        }
    }
}
