//! Spreads co-located markers onto a small circle so each stays selectable.

use std::collections::HashMap;
use std::f64::consts::PI;

use crate::types::{Coordinate, EntityId};

/// Meters per degree of latitude (and of longitude at the equator)
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Lower bound for cos(latitude) so longitude offsets stay finite at the poles
const MIN_COS_LAT: f64 = 1e-6;

pub const DEFAULT_RADIUS_M: f64 = 12.0;
pub const DEFAULT_PRECISION_DEG: f64 = 1e-6;

fn grid_key(coordinate: &Coordinate, precision: f64) -> (i64, i64) {
    (
        (coordinate.latitude / precision).round() as i64,
        (coordinate.longitude / precision).round() as i64,
    )
}

/// Offset `base` by `dx` meters east and `dy` meters north
fn offset(base: &Coordinate, dx: f64, dy: f64) -> Coordinate {
    let cos_lat = (base.latitude * PI / 180.0).cos().max(MIN_COS_LAT);
    Coordinate {
        latitude: (base.latitude + dy / METERS_PER_DEGREE).clamp(-90.0, 90.0),
        longitude: wrap_longitude(base.longitude + dx / (METERS_PER_DEGREE * cos_lat)),
    }
}

/// Near the poles a small offset can span several turns of longitude
fn wrap_longitude(longitude: f64) -> f64 {
    if (-180.0..=180.0).contains(&longitude) {
        longitude
    } else {
        (longitude + 180.0).rem_euclid(360.0) - 180.0
    }
}

/// Separate entities that share a coordinate (to within `precision`
/// degrees). In a group of `n`, the first entity in input order keeps its
/// coordinate and member `i` moves `radius_m` meters out at angle `2πi/n`.
///
/// Output order matches input order, and the same input always gives the
/// same output.
pub fn declutter(
    entities: &[(EntityId, Coordinate)],
    radius_m: f64,
    precision: f64,
) -> Vec<(EntityId, Coordinate)> {
    let mut groups: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    for (index, (_, coordinate)) in entities.iter().enumerate() {
        groups
            .entry(grid_key(coordinate, precision))
            .or_default()
            .push(index);
    }

    let mut adjusted: Vec<Coordinate> = entities.iter().map(|(_, c)| *c).collect();
    for members in groups.values().filter(|m| m.len() > 1) {
        let n = members.len() as f64;
        let anchor = entities[members[0]].1;
        for (i, &index) in members.iter().enumerate().skip(1) {
            let angle = 2.0 * PI * i as f64 / n;
            adjusted[index] = offset(&anchor, radius_m * angle.cos(), radius_m * angle.sin());
        }
    }

    entities
        .iter()
        .zip(adjusted)
        .map(|((id, _), coordinate)| (id.clone(), coordinate))
        .collect()
}
