//! Shot execution: fire vectors, hitscan sweeps, projectile spawns and
//! damage application
//!
//! World queries and side effects go through `ShotWorld`, implemented by the
//! host (the server against replicated player capsules, tests against fixed
//! geometry).

use bevy::prelude::*;

use super::config::{HitscanConfig, ProjectileConfig, ShotOriginPolicy};
use super::damage::{calculate_damage, HitZone};
use super::fire_mode::{HitscanVisualInfo, SimulatedShotInfo};

/// Identifies a damageable target in the host world
pub type TargetId = u64;

/// One hit of a trace or sweep
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TraceHit {
    pub location: Vec3,
    pub normal: Vec3,
    /// Distance from the trace start
    pub distance: f32,
    /// Set when the hit thing can take damage
    pub target: Option<TargetId>,
    /// World geometry that stops the trace
    pub blocking: bool,
    pub zone: HitZone,
}

/// Damage to apply to one target
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointDamage {
    pub target: TargetId,
    pub amount: f32,
    pub zone: HitZone,
    pub location: Vec3,
    pub direction: Vec3,
    pub distance: f32,
}

/// A projectile the host should start simulating
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectileSpawn {
    pub fire_mode: u8,
    pub position: Vec3,
    pub velocity: Vec3,
    pub config: ProjectileConfig,
}

/// World access needed to resolve shots
pub trait ShotWorld {
    /// Eye location and aim direction of the holder
    fn view_point(&self) -> (Vec3, Vec3);

    /// Sphere sweep from `start` to `end`. Hits sorted near to far, the
    /// holder excluded.
    fn sweep(&self, _start: Vec3, _end: Vec3, _radius: f32) -> Vec<TraceHit> {
        Vec::new()
    }

    /// First blocking world hit between `start` and `end`
    fn line_trace(&self, _start: Vec3, _end: Vec3) -> Option<TraceHit> {
        None
    }

    fn apply_point_damage(&mut self, _damage: PointDamage) {}

    fn spawn_projectile(&mut self, _spawn: ProjectileSpawn) {}
}

/// Origin and normalized direction of a shot from the holder's eye
pub fn fire_vector<W: ShotWorld + ?Sized>(world: &W) -> (Vec3, Vec3) {
    let (eye, aim) = world.view_point();
    (eye, aim.try_normalize().unwrap_or(Vec3::NEG_Z))
}

/// Projectile spawn point in front of the eye, pulled back to the first
/// wall between the eye and that point.
pub fn simulate_shot<W: ShotWorld + ?Sized>(
    world: &W,
    config: &ProjectileConfig,
) -> SimulatedShotInfo {
    let (eye, direction) = fire_vector(world);
    let wanted = eye + direction * config.muzzle_offset;

    let origin = match world.line_trace(eye, wanted) {
        Some(hit) => hit.location,
        None => wanted,
    };

    SimulatedShotInfo { origin, direction }
}

/// Hitscan shot from the eye, with the speculative impact for effects
pub fn simulate_hitscan_shot<W: ShotWorld + ?Sized>(
    world: &W,
    config: &HitscanConfig,
) -> (SimulatedShotInfo, HitscanVisualInfo) {
    let (origin, direction) = fire_vector(world);
    let (_, visual) = hitscan_trace(world, origin, direction, config);
    (SimulatedShotInfo { origin, direction }, visual)
}

/// First hit of a hitscan sweep that blocks or can take damage. Without a
/// hit the impact is the trace end and the normal points back at the start.
pub fn hitscan_trace<W: ShotWorld + ?Sized>(
    world: &W,
    origin: Vec3,
    direction: Vec3,
    config: &HitscanConfig,
) -> (Option<TraceHit>, HitscanVisualInfo) {
    let end = origin + direction * config.range;
    let hit = world
        .sweep(origin, end, config.sweep_radius)
        .into_iter()
        .find(|hit| hit.blocking || hit.target.is_some());

    let visual = match &hit {
        Some(hit) => HitscanVisualInfo {
            impact: hit.location,
            normal: hit.normal,
        },
        None => HitscanVisualInfo {
            impact: end,
            normal: (origin - end).normalize_or_zero(),
        },
    };
    (hit, visual)
}

fn authority_direction(shot: &SimulatedShotInfo) -> Vec3 {
    shot.direction.try_normalize().unwrap_or(Vec3::NEG_Z)
}

/// Spawn the projectile of an accepted shot.
pub fn authority_shot<W: ShotWorld + ?Sized>(
    world: &mut W,
    policy: ShotOriginPolicy,
    fire_mode: u8,
    config: &ProjectileConfig,
    shot: &SimulatedShotInfo,
) {
    let origin = match policy {
        ShotOriginPolicy::TrustClient => shot.origin,
        ShotOriginPolicy::Authority => simulate_shot(world, config).origin,
    };
    let direction = authority_direction(shot);

    world.spawn_projectile(ProjectileSpawn {
        fire_mode,
        position: origin,
        velocity: direction * config.speed,
        config: config.clone(),
    });
}

/// Trace an accepted hitscan shot and damage what it hits.
pub fn authority_hitscan_shot<W: ShotWorld + ?Sized>(
    world: &mut W,
    policy: ShotOriginPolicy,
    config: &HitscanConfig,
    shot: &SimulatedShotInfo,
) -> HitscanVisualInfo {
    let origin = match policy {
        ShotOriginPolicy::TrustClient => shot.origin,
        ShotOriginPolicy::Authority => fire_vector(world).0,
    };
    let direction = authority_direction(shot);

    let (hit, visual) = hitscan_trace(world, origin, direction, config);
    if let Some(hit) = hit {
        if let Some(target) = hit.target {
            world.apply_point_damage(PointDamage {
                target,
                amount: calculate_damage(config.damage, &config.falloff, hit.distance, hit.zone),
                zone: hit.zone,
                location: hit.location,
                direction,
                distance: hit.distance,
            });
        }
    }
    visual
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Shooter at the origin looking down -Z, a wall at z = -wall_z and an
    /// optional target in front of it.
    struct Range {
        eye: Vec3,
        aim: Vec3,
        wall_z: f32,
        target_z: Option<f32>,
        damage: Vec<PointDamage>,
        spawned: Vec<ProjectileSpawn>,
    }

    impl Range {
        fn new(wall_z: f32, target_z: Option<f32>) -> Self {
            Self {
                eye: Vec3::ZERO,
                aim: Vec3::NEG_Z,
                wall_z,
                target_z,
                damage: Vec::new(),
                spawned: Vec::new(),
            }
        }

        fn wall_hit(&self, start: Vec3, end: Vec3) -> Option<TraceHit> {
            if start.z <= -self.wall_z || end.z > -self.wall_z {
                return None;
            }
            let location = Vec3::new(start.x, start.y, -self.wall_z);
            Some(TraceHit {
                location,
                normal: Vec3::Z,
                distance: start.distance(location),
                target: None,
                blocking: true,
                zone: HitZone::Chest,
            })
        }
    }

    impl ShotWorld for Range {
        fn view_point(&self) -> (Vec3, Vec3) {
            (self.eye, self.aim)
        }

        fn sweep(&self, start: Vec3, end: Vec3, _radius: f32) -> Vec<TraceHit> {
            let mut hits = Vec::new();
            if let Some(z) = self.target_z {
                if start.z > -z && end.z <= -z {
                    let location = Vec3::new(start.x, start.y, -z);
                    hits.push(TraceHit {
                        location,
                        normal: Vec3::Z,
                        distance: start.distance(location),
                        target: Some(7),
                        blocking: false,
                        zone: HitZone::Head,
                    });
                }
            }
            hits.extend(self.wall_hit(start, end));
            hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
            hits
        }

        fn line_trace(&self, start: Vec3, end: Vec3) -> Option<TraceHit> {
            self.wall_hit(start, end)
        }

        fn apply_point_damage(&mut self, damage: PointDamage) {
            self.damage.push(damage);
        }

        fn spawn_projectile(&mut self, spawn: ProjectileSpawn) {
            self.spawned.push(spawn);
        }
    }

    #[test]
    fn test_fire_vector_normalizes_aim() {
        let mut range = Range::new(50.0, None);
        range.aim = Vec3::new(0.0, 0.0, -4.0);
        assert_eq!(fire_vector(&range).1, Vec3::NEG_Z);

        range.aim = Vec3::ZERO;
        assert_eq!(fire_vector(&range).1, Vec3::NEG_Z);
    }

    #[test]
    fn test_miss_impacts_trace_end() {
        let range = Range::new(500.0, None);
        let config = HitscanConfig {
            range: 100.0,
            ..Default::default()
        };

        let (shot, visual) = simulate_hitscan_shot(&range, &config);
        assert_eq!(shot.origin, Vec3::ZERO);
        assert_eq!(visual.impact, Vec3::new(0.0, 0.0, -100.0));
        assert_eq!(visual.normal, Vec3::Z);
    }

    #[test]
    fn test_hitscan_damages_first_target() {
        let mut range = Range::new(50.0, Some(20.0));
        let config = HitscanConfig::default();
        let shot = SimulatedShotInfo {
            origin: Vec3::ZERO,
            direction: Vec3::NEG_Z,
        };

        let visual = authority_hitscan_shot(&mut range, ShotOriginPolicy::TrustClient, &config, &shot);

        assert_eq!(visual.impact, Vec3::new(0.0, 0.0, -20.0));
        assert_eq!(range.damage.len(), 1);
        let damage = range.damage[0];
        assert_eq!(damage.target, 7);
        assert_eq!(damage.zone, HitZone::Head);
        assert!((damage.amount - config.damage * config.falloff.headshot_mult).abs() < 0.01);
    }

    #[test]
    fn test_wall_stops_hitscan() {
        let mut range = Range::new(10.0, Some(20.0));
        let shot = SimulatedShotInfo {
            origin: Vec3::ZERO,
            direction: Vec3::NEG_Z,
        };

        let visual = authority_hitscan_shot(
            &mut range,
            ShotOriginPolicy::TrustClient,
            &HitscanConfig::default(),
            &shot,
        );
        assert_eq!(visual.impact, Vec3::new(0.0, 0.0, -10.0));
        assert!(range.damage.is_empty());
    }

    #[test]
    fn test_authority_origin_policy_ignores_claimed_origin() {
        let mut range = Range::new(50.0, Some(20.0));
        let claimed = SimulatedShotInfo {
            origin: Vec3::new(0.0, 0.0, -30.0),
            direction: Vec3::NEG_Z,
        };

        // Claimed origin is past the target, so only the authority origin hits.
        let config = HitscanConfig::default();
        authority_hitscan_shot(&mut range, ShotOriginPolicy::TrustClient, &config, &claimed);
        assert!(range.damage.is_empty());

        authority_hitscan_shot(&mut range, ShotOriginPolicy::Authority, &config, &claimed);
        assert_eq!(range.damage.len(), 1);
    }

    #[test]
    fn test_projectile_spawn_pulled_back_by_wall() {
        let range = Range::new(0.5, None);
        let config = ProjectileConfig {
            muzzle_offset: 1.0,
            ..Default::default()
        };

        let shot = simulate_shot(&range, &config);
        assert_eq!(shot.origin, Vec3::new(0.0, 0.0, -0.5));

        let open = Range::new(50.0, None);
        assert_eq!(simulate_shot(&open, &config).origin, Vec3::new(0.0, 0.0, -1.0));
    }

    #[test]
    fn test_authority_shot_spawns_projectile() {
        let mut range = Range::new(50.0, None);
        let config = ProjectileConfig::default();
        let shot = SimulatedShotInfo {
            origin: Vec3::new(1.0, 2.0, 3.0),
            direction: Vec3::new(0.0, 0.0, -2.0),
        };

        authority_shot(&mut range, ShotOriginPolicy::TrustClient, 1, &config, &shot);

        assert_eq!(range.spawned.len(), 1);
        let spawn = &range.spawned[0];
        assert_eq!(spawn.fire_mode, 1);
        assert_eq!(spawn.position, shot.origin);
        assert_eq!(spawn.velocity, Vec3::NEG_Z * config.speed);
    }
}
