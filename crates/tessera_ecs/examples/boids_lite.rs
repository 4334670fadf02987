//! A minimal flocking demo: velocities steer toward the flock's centre,
//! positions integrate each tick, and a predator entity freezes anything it
//! catches through an exclusive `Chasing` relationship.
//!
//! Run with `RUST_LOG=debug` to watch archetype and filter activity.

use tessera_ecs::{Component, Entity, Mask, World};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

impl Component for Position {}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Velocity {
    x: f32,
    y: f32,
}

impl Component for Velocity {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Frozen;

impl Component for Frozen {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Chasing;

impl Component for Chasing {}

const FLOCK: usize = 32;
const TICKS: usize = 60;
const COHESION: f32 = 0.02;
const CATCH_RADIUS: f32 = 0.5;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut world = World::new();
    world.set_exclusive::<Chasing>(true);

    for i in 0..FLOCK {
        let angle = i as f32 / FLOCK as f32 * std::f32::consts::TAU;
        let boid = world.spawn();
        world.insert(
            boid,
            Position {
                x: angle.cos() * 20.0,
                y: angle.sin() * 20.0,
            },
        )?;
        world.insert(
            boid,
            Velocity {
                x: -angle.sin(),
                y: angle.cos(),
            },
        )?;
    }

    let predator = world.spawn();
    world.insert(predator, Position { x: 0.0, y: 0.0 })?;
    world.insert(predator, Velocity { x: 0.4, y: 0.3 })?;

    let pos = world.component_id::<Position>().unwrap();
    let vel = world.component_id::<Velocity>().unwrap();
    let frozen = world.register::<Frozen>();

    let movers = world.filter(Mask::new().with(pos).with(vel).without(frozen))?;
    let chased = world.filter(Mask::new().with(Entity::any_target(
        world.component_id::<Chasing>().unwrap(),
    )))?;

    for tick in 0..TICKS {
        // Flock centre from the current positions.
        let (mut cx, mut cy, mut n) = (0.0, 0.0, 0);
        for (_, p) in world.view::<&Position>(&movers) {
            cx += p.x;
            cy += p.y;
            n += 1;
        }
        if n > 0 {
            cx /= n as f32;
            cy /= n as f32;
        }

        // Steer and integrate; catch boids that stray too close to the
        // predator. Structural changes defer until the visit ends.
        let predator_pos = *world.get::<Position>(predator).unwrap();
        world.each(&movers, |w, boid| {
            let p = *w.get::<Position>(boid).unwrap();
            let v = w.get_mut::<Velocity>(boid).unwrap();
            v.x += (cx - p.x) * COHESION;
            v.y += (cy - p.y) * COHESION;
            let (vx, vy) = (v.x, v.y);
            let p = w.get_mut::<Position>(boid).unwrap();
            p.x += vx * 0.1;
            p.y += vy * 0.1;
            let (dx, dy) = (p.x - predator_pos.x, p.y - predator_pos.y);
            if boid != predator && (dx * dx + dy * dy).sqrt() < CATCH_RADIUS {
                w.insert(boid, Frozen).unwrap();
                w.remove::<Velocity>(boid).unwrap();
                w.add_pair::<Chasing>(predator, boid).unwrap();
            }
        });

        if tick % 20 == 0 {
            info!(tick, flying = world.count(&movers), "tick complete");
        }
    }

    let caught: Vec<Entity> = world
        .iter(&chased)
        .filter_map(|row| row.resolved_target(0))
        .collect();
    info!(caught = caught.len(), "simulation finished");
    Ok(())
}
