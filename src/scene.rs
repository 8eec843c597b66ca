// src/scene.rs
// Scene graph hosting physics-driven nodes.
// Nodes live in a generational arena; ids stay stable until despawn and are
// never reused with the same generation.

use crate::components::ComponentSet;
use glam::{Mat4, Quat, Vec3};
use std::collections::VecDeque;

/// Node id (index + generation)
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    /// Packs the id for storage in backend user data.
    pub fn to_bits(self) -> u128 {
        ((self.generation as u128) << 32) | self.index as u128
    }

    pub fn from_bits(bits: u128) -> Self {
        Self {
            index: (bits & 0xFFFF_FFFF) as u32,
            generation: ((bits >> 32) & 0xFFFF_FFFF) as u32,
        }
    }

    pub fn index(self) -> usize {
        self.index as usize
    }
}

/// Local transform of a node, relative to its parent.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::identity()
        }
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

/// Scene node with hierarchy links and attached components.
#[derive(Debug, Clone)]
pub struct SceneNode {
    pub name: String,
    /// Free-form tag matched by trigger zones.
    pub tag: String,
    pub transform: Transform,
    pub components: ComponentSet,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl SceneNode {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            tag: String::new(),
            transform: Transform::identity(),
            components: ComponentSet::default(),
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    node: Option<SceneNode>,
}

/// Scene container
#[derive(Debug, Default)]
pub struct Scene {
    slots: Vec<Slot>,
    free_list: VecDeque<u32>,
    live: usize,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Spawn a root node
    pub fn spawn(&mut self, name: &str) -> NodeId {
        self.spawn_with(name, Transform::identity())
    }

    pub fn spawn_with(&mut self, name: &str, transform: Transform) -> NodeId {
        let mut node = SceneNode::new(name);
        node.transform = transform;
        self.live += 1;
        if let Some(index) = self.free_list.pop_front() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    /// Spawn a node under `parent`. Falls back to a root node if the parent is gone.
    pub fn spawn_child(&mut self, name: &str, parent: NodeId, transform: Transform) -> NodeId {
        let id = self.spawn_with(name, transform);
        self.set_parent(id, Some(parent));
        id
    }

    /// Despawn a node and its whole subtree. Returns the removed ids.
    /// Components attached to them are not touched; see `Engine::despawn`.
    pub fn despawn(&mut self, id: NodeId) -> Vec<NodeId> {
        if !self.contains(id) {
            return Vec::new();
        }
        self.set_parent(id, None);

        let mut removed = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            let slot = &mut self.slots[cur.index()];
            if let Some(node) = slot.node.take() {
                stack.extend(node.children);
                slot.generation = slot.generation.wrapping_add(1);
                self.free_list.push_back(cur.index);
                self.live -= 1;
                removed.push(cur);
            }
        }
        removed
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn node(&self, id: NodeId) -> Option<&SceneNode> {
        let slot = self.slots.get(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id)?.parent
    }

    /// Re-parents `child`, keeping its local transform. Refuses cycles.
    pub fn set_parent(&mut self, child: NodeId, parent: Option<NodeId>) -> bool {
        if !self.contains(child) {
            return false;
        }
        if let Some(p) = parent {
            if !self.contains(p) {
                log::warn!("set_parent: parent {:?} does not exist", p);
                return false;
            }
            let mut cur = Some(p);
            while let Some(ancestor) = cur {
                if ancestor == child {
                    log::warn!("set_parent: {:?} under {:?} would form a cycle", child, p);
                    return false;
                }
                cur = self.parent(ancestor);
            }
        }

        if let Some(old) = self.parent(child) {
            if let Some(node) = self.node_mut(old) {
                node.children.retain(|c| *c != child);
            }
        }
        if let Some(p) = parent {
            if let Some(node) = self.node_mut(p) {
                node.children.push(child);
            }
        }
        if let Some(node) = self.node_mut(child) {
            node.parent = parent;
        }
        true
    }

    /// World matrix, composed fresh from the root down. Unknown ids yield identity.
    pub fn world_matrix(&self, id: NodeId) -> Mat4 {
        let Some(node) = self.node(id) else {
            return Mat4::IDENTITY;
        };
        let mut world = node.transform.local_matrix();
        let mut cur = node.parent;
        let mut depth = 0;
        while let Some(parent_id) = cur {
            let Some(parent) = self.node(parent_id) else {
                break;
            };
            world = parent.transform.local_matrix() * world;
            cur = parent.parent;
            depth += 1;
            if depth > self.slots.len() {
                log::error!("world_matrix: hierarchy loop above {:?}", id);
                break;
            }
        }
        world
    }

    pub fn world_position(&self, id: NodeId) -> Vec3 {
        self.world_matrix(id).w_axis.truncate()
    }

    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.iter().find(|(_, n)| n.name == name).map(|(id, _)| id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &SceneNode)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.node.as_ref().map(|n| {
                (
                    NodeId {
                        index: i as u32,
                        generation: slot.generation,
                    },
                    n,
                )
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_matrix_composes_parents() {
        let mut scene = Scene::new();
        let root = scene.spawn_with("root", Transform::from_position(Vec3::new(1.0, 0.0, 0.0)));
        let child = scene.spawn_child(
            "child",
            root,
            Transform::from_position(Vec3::new(0.0, 2.0, 0.0)).with_scale(Vec3::splat(2.0)),
        );
        scene.node_mut(root).unwrap().transform.scale = Vec3::splat(3.0);

        let (scale, _, pos) = scene.world_matrix(child).to_scale_rotation_translation();
        assert!((pos - Vec3::new(1.0, 6.0, 0.0)).length() < 1e-5);
        assert!((scale - Vec3::splat(6.0)).length() < 1e-5);
    }

    #[test]
    fn despawn_removes_subtree_and_invalidates_ids() {
        let mut scene = Scene::new();
        let root = scene.spawn("root");
        let child = scene.spawn_child("child", root, Transform::identity());
        let other = scene.spawn("other");

        assert_eq!(scene.despawn(root).len(), 2);
        assert!(!scene.contains(child));
        assert_eq!(scene.len(), 1);

        let reused = scene.spawn("new");
        assert_ne!(reused, root);
        assert!(scene.node(root).is_none());
        assert!(scene.contains(other));
    }

    #[test]
    fn set_parent_rejects_cycles() {
        let mut scene = Scene::new();
        let a = scene.spawn("a");
        let b = scene.spawn_child("b", a, Transform::identity());
        assert!(!scene.set_parent(a, Some(b)));
        assert!(scene.set_parent(b, None));
        assert!(scene.node(a).unwrap().children().is_empty());
        assert_eq!(scene.find_by_name("b"), Some(b));
    }

    #[test]
    fn node_id_bits_round_trip() {
        let mut scene = Scene::new();
        let a = scene.spawn("a");
        scene.despawn(a);
        let b = scene.spawn("b");
        assert_eq!(NodeId::from_bits(b.to_bits()), b);
    }
}
