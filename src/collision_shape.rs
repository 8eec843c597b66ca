// src/collision_shape.rs
//! Collision shape descriptions and the backend shape factory.
//!
//! A [`CollisionShapeDesc`] is the authored, unscaled shape. The factory bakes
//! the owner's world scale into it and returns a [`ShapeHandle`], which counts
//! itself in [`ShapeStats`] on creation and again when dropped.

use glam::Vec3;
use rapier3d::prelude::{SharedShape, Vector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Dimensions are clamped to at least this to keep the backend well-formed.
pub const MIN_DIMENSION: f32 = 1.0e-3;

/// Half extent of the box standing in for a plane under non-uniform scale.
pub const PLANE_PROXY_HALF_EXTENT: f32 = 1000.0;
pub const PLANE_PROXY_HALF_THICKNESS: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollisionShapeType {
    Box,
    Sphere,
    Capsule,
    Cylinder,
    Plane,
}

/// Authored collision shape, in the owner's local (unscaled) units.
/// Capsule and cylinder heights are the full length of the straight section,
/// along local Y. The plane has a +Y normal through the origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CollisionShapeDesc {
    Box { half_extents: Vec3 },
    Sphere { radius: f32 },
    Capsule { radius: f32, height: f32 },
    Cylinder { radius: f32, height: f32 },
    Plane,
}

impl Default for CollisionShapeDesc {
    fn default() -> Self {
        CollisionShapeDesc::Box {
            half_extents: Vec3::splat(0.5),
        }
    }
}

impl CollisionShapeDesc {
    pub fn shape_type(&self) -> CollisionShapeType {
        match self {
            CollisionShapeDesc::Box { .. } => CollisionShapeType::Box,
            CollisionShapeDesc::Sphere { .. } => CollisionShapeType::Sphere,
            CollisionShapeDesc::Capsule { .. } => CollisionShapeType::Capsule,
            CollisionShapeDesc::Cylinder { .. } => CollisionShapeType::Cylinder,
            CollisionShapeDesc::Plane => CollisionShapeType::Plane,
        }
    }

    pub fn half_extents(&self) -> Option<Vec3> {
        match *self {
            CollisionShapeDesc::Box { half_extents } => Some(half_extents),
            _ => None,
        }
    }

    pub fn radius(&self) -> Option<f32> {
        match *self {
            CollisionShapeDesc::Sphere { radius }
            | CollisionShapeDesc::Capsule { radius, .. }
            | CollisionShapeDesc::Cylinder { radius, .. } => Some(radius),
            _ => None,
        }
    }

    pub fn height(&self) -> Option<f32> {
        match *self {
            CollisionShapeDesc::Capsule { height, .. }
            | CollisionShapeDesc::Cylinder { height, .. } => Some(height),
            _ => None,
        }
    }

    /// Bakes a world scale into the dimensions.
    ///
    /// Boxes scale per axis, spheres by the largest axis, capsules and
    /// cylinders take the largest of X/Z for the radius and Y for the height.
    /// Planes are unbounded and unchanged.
    pub fn scaled(&self, scale: Vec3) -> CollisionShapeDesc {
        let s = sanitize_scale(scale);
        let radial = s.x.max(s.z);
        match *self {
            CollisionShapeDesc::Box { half_extents } => CollisionShapeDesc::Box {
                half_extents: half_extents * s,
            },
            CollisionShapeDesc::Sphere { radius } => CollisionShapeDesc::Sphere {
                radius: radius * s.max_element(),
            },
            CollisionShapeDesc::Capsule { radius, height } => CollisionShapeDesc::Capsule {
                radius: radius * radial,
                height: height * s.y,
            },
            CollisionShapeDesc::Cylinder { radius, height } => CollisionShapeDesc::Cylinder {
                radius: radius * radial,
                height: height * s.y,
            },
            CollisionShapeDesc::Plane => CollisionShapeDesc::Plane,
        }
    }
}

fn sanitize_scale(scale: Vec3) -> Vec3 {
    if scale.is_finite() {
        scale.abs()
    } else {
        log::warn!("non-finite world scale {:?}; using unit scale", scale);
        Vec3::ONE
    }
}

fn dimension(value: f32) -> f32 {
    if value.is_finite() && value >= MIN_DIMENSION {
        value
    } else {
        MIN_DIMENSION
    }
}

// ============================================================================
// Lifetime accounting
// ============================================================================

#[derive(Debug, Default)]
pub struct ShapeCounters {
    created: AtomicUsize,
    destroyed: AtomicUsize,
}

/// Snapshot of backend shape allocations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShapeStats {
    pub created: usize,
    pub destroyed: usize,
    pub live: usize,
}

impl ShapeCounters {
    pub fn snapshot(&self) -> ShapeStats {
        let created = self.created.load(Ordering::Acquire);
        let destroyed = self.destroyed.load(Ordering::Acquire);
        ShapeStats {
            created,
            destroyed,
            live: created.saturating_sub(destroyed),
        }
    }
}

/// Owned backend shape. Dropping it releases the allocation exactly once.
pub struct ShapeHandle {
    shape: SharedShape,
    kind: CollisionShapeType,
    dims: CollisionShapeDesc,
    counters: Arc<ShapeCounters>,
}

impl ShapeHandle {
    fn new(shape: SharedShape, dims: CollisionShapeDesc, counters: Arc<ShapeCounters>) -> Self {
        counters.created.fetch_add(1, Ordering::AcqRel);
        Self {
            shape,
            kind: dims.shape_type(),
            dims,
            counters,
        }
    }

    /// Backend primitive actually built. A plane under non-uniform scale
    /// reports [`CollisionShapeType::Box`].
    pub fn kind(&self) -> CollisionShapeType {
        self.kind
    }

    /// Scaled dimensions the backend shape was built from.
    pub fn dimensions(&self) -> CollisionShapeDesc {
        self.dims
    }

    /// Shares the backend shape with a collider.
    pub fn shared(&self) -> SharedShape {
        self.shape.clone()
    }
}

impl Drop for ShapeHandle {
    fn drop(&mut self) {
        self.counters.destroyed.fetch_add(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for ShapeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShapeHandle")
            .field("kind", &self.kind)
            .field("dims", &self.dims)
            .finish()
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Builds backend shapes and tracks their lifetimes.
#[derive(Debug, Clone, Default)]
pub struct ShapeFactory {
    counters: Arc<ShapeCounters>,
}

impl ShapeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> ShapeStats {
        self.counters.snapshot()
    }

    pub fn create_box(&self, half_extents: Vec3) -> ShapeHandle {
        let h = Vec3::new(
            dimension(half_extents.x),
            dimension(half_extents.y),
            dimension(half_extents.z),
        );
        ShapeHandle::new(
            SharedShape::cuboid(h.x, h.y, h.z),
            CollisionShapeDesc::Box { half_extents: h },
            self.counters.clone(),
        )
    }

    pub fn create_sphere(&self, radius: f32) -> ShapeHandle {
        let radius = dimension(radius);
        ShapeHandle::new(
            SharedShape::ball(radius),
            CollisionShapeDesc::Sphere { radius },
            self.counters.clone(),
        )
    }

    /// Y-aligned capsule; `height` is the length of the straight section.
    pub fn create_capsule(&self, radius: f32, height: f32) -> ShapeHandle {
        let radius = dimension(radius);
        let height = dimension(height);
        ShapeHandle::new(
            SharedShape::capsule_y(height * 0.5, radius),
            CollisionShapeDesc::Capsule { radius, height },
            self.counters.clone(),
        )
    }

    pub fn create_cylinder(&self, radius: f32, height: f32) -> ShapeHandle {
        let radius = dimension(radius);
        let height = dimension(height);
        ShapeHandle::new(
            SharedShape::cylinder(height * 0.5, radius),
            CollisionShapeDesc::Cylinder { radius, height },
            self.counters.clone(),
        )
    }

    /// Half-space bounded by the XZ plane, solid below it.
    pub fn create_plane(&self) -> ShapeHandle {
        ShapeHandle::new(
            SharedShape::halfspace(Vector::y_axis()),
            CollisionShapeDesc::Plane,
            self.counters.clone(),
        )
    }

    /// Builds `desc` at the given world scale.
    pub fn create(&self, desc: &CollisionShapeDesc, world_scale: Vec3) -> ShapeHandle {
        if let CollisionShapeDesc::Plane = desc {
            let s = sanitize_scale(world_scale);
            if (s.x - s.z).abs() > 1.0e-4 {
                // A half-space cannot carry X/Z scale; fall back to a thin slab.
                log::warn!(
                    "plane shape under non-uniform scale {:?}; using a flat box instead",
                    s
                );
                return self.create_box(Vec3::new(
                    PLANE_PROXY_HALF_EXTENT * s.x.max(MIN_DIMENSION),
                    PLANE_PROXY_HALF_THICKNESS,
                    PLANE_PROXY_HALF_EXTENT * s.z.max(MIN_DIMENSION),
                ));
            }
            return self.create_plane();
        }

        match desc.scaled(world_scale) {
            CollisionShapeDesc::Box { half_extents } => self.create_box(half_extents),
            CollisionShapeDesc::Sphere { radius } => self.create_sphere(radius),
            CollisionShapeDesc::Capsule { radius, height } => self.create_capsule(radius, height),
            CollisionShapeDesc::Cylinder { radius, height } => self.create_cylinder(radius, height),
            CollisionShapeDesc::Plane => self.create_plane(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_rules_per_shape() {
        let scale = Vec3::new(2.0, 3.0, 4.0);
        assert_eq!(
            CollisionShapeDesc::Box { half_extents: Vec3::ONE }.scaled(scale),
            CollisionShapeDesc::Box { half_extents: scale }
        );
        assert_eq!(
            CollisionShapeDesc::Sphere { radius: 1.0 }.scaled(scale),
            CollisionShapeDesc::Sphere { radius: 4.0 }
        );
        assert_eq!(
            CollisionShapeDesc::Capsule { radius: 0.5, height: 2.0 }.scaled(scale),
            CollisionShapeDesc::Capsule { radius: 2.0, height: 6.0 }
        );
        assert_eq!(
            CollisionShapeDesc::Cylinder { radius: 1.0, height: 1.0 }.scaled(-scale),
            CollisionShapeDesc::Cylinder { radius: 4.0, height: 3.0 }
        );
    }

    #[test]
    fn handles_count_create_and_destroy() {
        let factory = ShapeFactory::new();
        let a = factory.create_sphere(1.0);
        let b = factory.create_box(Vec3::splat(0.5));
        assert_eq!(factory.stats(), ShapeStats { created: 2, destroyed: 0, live: 2 });

        drop(a);
        let c = factory.create_capsule(0.5, 1.0);
        assert_eq!(factory.stats(), ShapeStats { created: 3, destroyed: 1, live: 2 });
        drop((b, c));
        assert_eq!(factory.stats().live, 0);
    }

    #[test]
    fn plane_substitutes_box_under_non_uniform_scale() {
        let factory = ShapeFactory::new();
        assert_eq!(
            factory.create(&CollisionShapeDesc::Plane, Vec3::ONE).kind(),
            CollisionShapeType::Plane
        );
        let slab = factory.create(&CollisionShapeDesc::Plane, Vec3::new(2.0, 1.0, 1.0));
        assert_eq!(slab.kind(), CollisionShapeType::Box);
    }

    #[test]
    fn degenerate_dimensions_are_clamped() {
        let factory = ShapeFactory::new();
        let shape = factory.create(&CollisionShapeDesc::Sphere { radius: f32::NAN }, Vec3::ONE);
        assert_eq!(shape.dimensions().radius(), Some(MIN_DIMENSION));
    }

    #[test]
    fn desc_serializes_with_type_tag() {
        let json = serde_json::to_string(&CollisionShapeDesc::Sphere { radius: 2.0 }).unwrap();
        assert_eq!(json, r#"{"type":"Sphere","radius":2.0}"#);
        let back: CollisionShapeDesc = serde_json::from_str(r#"{"type":"Plane"}"#).unwrap();
        assert_eq!(back, CollisionShapeDesc::Plane);
    }
}
