// src/lib.rs
//! Physics core for a scene-graph engine: rigid bodies, trigger zones and an
//! optional dedicated physics thread, built on Rapier 3D.

pub mod collision_shape;
pub mod components;
pub mod engine;
pub mod error;
pub mod physics;
pub mod physics_component;
pub mod physics_manager;
pub mod scene;
pub mod thread_manager;
pub mod thread_safe_queue;
pub mod trigger;

pub use collision_shape::{CollisionShapeDesc, CollisionShapeType, ShapeHandle, ShapeStats};
pub use components::{ComponentId, ComponentKind, ComponentStore};
pub use engine::{Engine, FrameSync};
pub use error::{Error, Result};
pub use physics::{BodyType, PhysicsConfig, SyncTolerances};
pub use physics_component::{PhysicsComponent, PhysicsProperties};
pub use physics_manager::{PhysicsHandle, PhysicsManager, PhysicsTransformResult};
pub use scene::{NodeId, Scene, SceneNode, Transform};
pub use thread_manager::{ThreadHandle, ThreadManager};
pub use thread_safe_queue::ThreadSafeQueue;
pub use trigger::{TriggerComponent, TriggerEvent, TriggerEventKind, TriggerKind};
