#![cfg(not(target_arch = "wasm32"))]

use anyhow::Context;
use glam::Vec3;
use log::{info, LevelFilter};
use slop_physics::{
    BodyType, CollisionShapeDesc, Engine, FrameSync, PhysicsConfig, PhysicsProperties,
    TriggerEventKind, TriggerKind, Transform,
};
use std::backtrace::Backtrace;
use std::fs::File;
use std::io::Write;
use std::panic;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const FRAMES: u64 = 240;
const FRAME_DT: f32 = 1.0 / 60.0;

fn main() -> anyhow::Result<()> {
    setup_diagnostics();
    elevate_main_thread();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("reading physics config {path}"))?;
            PhysicsConfig::from_json(&json).context("parsing physics config")?
        }
        None => PhysicsConfig {
            start_threaded: true,
            ..PhysicsConfig::default()
        },
    };

    let mut engine = Engine::new(config);
    engine.set_frame_sync(FrameSync::Blocking);
    info!(
        "physics demo: threaded={}, backend={}",
        engine.physics.is_threading_enabled(),
        engine.threads().backend_name()
    );

    build_scene(&mut engine);

    for _ in 0..FRAMES {
        for event in engine.tick(FRAME_DT) {
            if event.kind != TriggerEventKind::Stayed {
                info!("frame {}: {} {:?} zone {:?}", engine.frame(), event.other, event.kind, event.zone);
            }
        }
    }

    for (_, node) in engine.scene.iter() {
        info!("{:>8}: {:?}", node.name, node.transform.position);
    }
    info!("shapes: {:?}", engine.physics.shape_stats());
    engine.shutdown();
    Ok(())
}

fn build_scene(engine: &mut Engine) {
    let ground = engine.scene.spawn("ground");
    engine.add_body(ground, PhysicsProperties::fixed(CollisionShapeDesc::Plane));

    for i in 0..3 {
        let node = engine.scene.spawn_with(
            &format!("crate{i}"),
            Transform::from_position(Vec3::new(i as f32 * 1.5, 4.0 + i as f32 * 2.0, 0.0)),
        );
        if let Some(n) = engine.scene.node_mut(node) {
            n.tag = "crate".into();
        }
        engine.add_body(node, PhysicsProperties::dynamic(CollisionShapeDesc::default(), 1.0 + i as f32));
    }

    // Dynamic body parented to a rig: physics moves the rig.
    let rig = engine
        .scene
        .spawn_with("rig", Transform::from_position(Vec3::new(-3.0, 6.0, 0.0)));
    let ball = engine
        .scene
        .spawn_child("ball", rig, Transform::from_position(Vec3::new(0.0, 0.5, 0.0)));
    if let Some(id) = engine.add_body(ball, PhysicsProperties::dynamic(CollisionShapeDesc::Sphere { radius: 0.5 }, 1.0)) {
        if let Some(body) = engine.components.physics_mut(id) {
            body.set_restitution(0.6);
            debug_assert_eq!(body.body_type(), BodyType::Dynamic);
        }
    }

    let zone = engine
        .scene
        .spawn_with("landing", Transform::from_position(Vec3::new(1.5, 0.5, 0.0)));
    if let Some(id) = engine.add_trigger(zone, TriggerKind::Area, CollisionShapeDesc::Box { half_extents: Vec3::new(3.0, 1.0, 2.0) }) {
        if let Some(trigger) = engine.components.trigger_mut(id) {
            trigger.set_detection_tags(["crate"]);
        }
    }

    let coin = engine
        .scene
        .spawn_with("coin", Transform::from_position(Vec3::new(-3.0, 0.5, 0.0)));
    engine.add_trigger(coin, TriggerKind::Pickup, CollisionShapeDesc::Sphere { radius: 0.75 });
}

/// The main thread drives the frame loop and waits on physics fences.
fn elevate_main_thread() {
    #[cfg(feature = "high_priority")]
    {
        if thread_priority::set_current_thread_priority(thread_priority::ThreadPriority::Max).is_ok() {
            info!("Elevated main thread priority to Max.");
        }
    }
}

/// Sets up logging and crash reporting
fn setup_diagnostics() {
    env_logger::Builder::new()
        .filter_level(if cfg!(debug_assertions) {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        })
        .format_timestamp_millis()
        .format_target(false)
        .parse_default_env()
        .init();

    panic::set_hook(Box::new(|panic_info| {
        let backtrace = Backtrace::force_capture();

        let msg = match panic_info.payload().downcast_ref::<&'static str>() {
            Some(s) => *s,
            None => match panic_info.payload().downcast_ref::<String>() {
                Some(s) => &s[..],
                None => "Box<dyn Any>",
            },
        };

        let location = panic_info
            .location()
            .map_or("Unknown location".to_string(), |loc| format!("{}:{}", loc.file(), loc.line()));
        let thread = std::thread::current();
        let crash_msg = format!(
            "=== PHYSICS CRASH ===\nThread: {}\nReason: {}\nLocation: {}\n\nStack Trace:\n{}",
            thread.name().unwrap_or("<unnamed>"),
            msg,
            location,
            backtrace
        );

        eprintln!("\x1b[31;1m{}\x1b[0m", crash_msg);
        if let Ok(mut file) = File::create("physics_crash.log") {
            let _ = file.write_all(crash_msg.as_bytes());
            eprintln!("Crash report saved to physics_crash.log");
        }
    }));
}
