//! Hit detection geometry for player capsules and the ground plane

use bevy::prelude::*;

use crate::player::{PLAYER_HEIGHT, PLAYER_RADIUS};
use crate::weapons::{HitZone, TargetId, TraceHit};

/// Height of the flat ground plane
pub const GROUND_HEIGHT: f32 = 0.0;

/// Capsule axis endpoints for a player standing at `feet`
pub fn player_capsule_endpoints(feet: Vec3) -> (Vec3, Vec3) {
    let bottom = feet + Vec3::Y * PLAYER_RADIUS;
    let top = feet + Vec3::Y * (PLAYER_HEIGHT - PLAYER_RADIUS);
    (bottom, top)
}

/// Body zone of a hit at `point` on a player standing at `feet`
pub fn player_hit_zone(feet: Vec3, point: Vec3) -> HitZone {
    let relative_height = ((point.y - feet.y) / PLAYER_HEIGHT).clamp(0.0, 1.0);
    HitZone::from_relative_height(relative_height)
}

/// Closest points between segments `p1..q1` and `p2..q2`, as parameters
/// `(s, t)` in `0..=1` along each segment.
fn closest_segment_params(p1: Vec3, q1: Vec3, p2: Vec3, q2: Vec3) -> (f32, f32) {
    let d1 = q1 - p1;
    let d2 = q2 - p2;
    let r = p1 - p2;
    let a = d1.length_squared();
    let e = d2.length_squared();
    let f = d2.dot(r);

    if a <= f32::EPSILON && e <= f32::EPSILON {
        return (0.0, 0.0);
    }
    if a <= f32::EPSILON {
        return (0.0, (f / e).clamp(0.0, 1.0));
    }

    let c = d1.dot(r);
    if e <= f32::EPSILON {
        return ((-c / a).clamp(0.0, 1.0), 0.0);
    }

    let b = d1.dot(d2);
    let denom = a * e - b * b;
    let mut s = if denom > f32::EPSILON {
        ((b * f - c * e) / denom).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let mut t = (b * s + f) / e;
    if t < 0.0 {
        t = 0.0;
        s = (-c / a).clamp(0.0, 1.0);
    } else if t > 1.0 {
        t = 1.0;
        s = ((b - c) / a).clamp(0.0, 1.0);
    }
    (s, t)
}

/// Sphere of `sweep_radius` swept from `start` to `end` against a capsule.
///
/// Returns the distance along the sweep where it first touches the capsule
/// and the touching point on the capsule surface.
pub fn sweep_capsule(
    start: Vec3,
    end: Vec3,
    sweep_radius: f32,
    capsule_a: Vec3,
    capsule_b: Vec3,
    capsule_radius: f32,
) -> Option<(f32, Vec3)> {
    let length = start.distance(end);
    if length < 0.001 {
        return None;
    }
    let dir = (end - start) / length;
    let reach = capsule_radius + sweep_radius;

    let (s, t) = closest_segment_params(start, end, capsule_a, capsule_b);
    let on_sweep = start + (end - start) * s;
    let on_axis = capsule_a + (capsule_b - capsule_a) * t;
    let gap = on_sweep.distance(on_axis);
    if gap > reach {
        return None;
    }

    // Back off from the closest approach to the first contact.
    let back = (reach * reach - gap * gap).max(0.0).sqrt();
    let distance = (s * length - back).max(0.0);
    let center = start + dir * distance;
    let axis_point = capsule_a + (capsule_b - capsule_a) * closest_point_param(center, capsule_a, capsule_b);
    let normal = (center - axis_point).try_normalize().unwrap_or(-dir);
    Some((distance, axis_point + normal * capsule_radius))
}

fn closest_point_param(point: Vec3, a: Vec3, b: Vec3) -> f32 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq <= f32::EPSILON {
        return 0.0;
    }
    ((point - a).dot(ab) / len_sq).clamp(0.0, 1.0)
}

/// Where the segment `start..end` crosses the ground plane, with distance
pub fn ground_hit(start: Vec3, end: Vec3) -> Option<(f32, Vec3)> {
    if start.y < GROUND_HEIGHT || end.y > GROUND_HEIGHT {
        return None;
    }
    let drop = start.y - end.y;
    let t = if drop > f32::EPSILON {
        (start.y - GROUND_HEIGHT) / drop
    } else {
        0.0
    };
    let point = start + (end - start) * t;
    Some((start.distance(point), point))
}

/// A player as seen by someone else's shots
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CapsuleTarget {
    pub id: TargetId,
    pub feet: Vec3,
    pub alive: bool,
}

/// Ground plane as a blocking trace hit
pub fn ground_trace(start: Vec3, end: Vec3) -> Option<TraceHit> {
    let (distance, location) = ground_hit(start, end)?;
    Some(TraceHit {
        location,
        normal: Vec3::Y,
        distance,
        target: None,
        blocking: true,
        zone: HitZone::default(),
    })
}

/// Sweep against living player capsules and the ground, nearest first.
/// `exclude` is the shooter.
pub fn sweep_targets(
    targets: &[CapsuleTarget],
    exclude: TargetId,
    start: Vec3,
    end: Vec3,
    radius: f32,
) -> Vec<TraceHit> {
    let mut hits: Vec<TraceHit> = targets
        .iter()
        .filter(|target| target.alive && target.id != exclude)
        .filter_map(|target| {
            let (a, b) = player_capsule_endpoints(target.feet);
            let (distance, location) = sweep_capsule(start, end, radius, a, b, PLAYER_RADIUS)?;
            Some(TraceHit {
                location,
                normal: (start - location).normalize_or_zero(),
                distance,
                target: Some(target.id),
                blocking: false,
                zone: player_hit_zone(target.feet, location),
            })
        })
        .collect();

    if let Some(ground) = ground_trace(start, end) {
        hits.push(ground);
    }
    hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    hits
}
