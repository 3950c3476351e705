//! Footprint and geofence construction.
//!
//! All regions are rectangles in the vehicle's body frame, rotated into the
//! world frame about their anchor point. The ahead geofence is anchored at
//! the front-axle midpoint; the priority-detection geofences are anchored at
//! the rear-axle midpoint.

use geo::{Coord, LineString, Polygon};

/// Rotate `p` counterclockwise by `angle` radians about `center`.
pub fn rotate_about(p: Coord<f64>, center: Coord<f64>, angle: f64) -> Coord<f64> {
    let (sin, cos) = angle.sin_cos();
    let dx = p.x - center.x;
    let dy = p.y - center.y;
    Coord {
        x: dx * cos - dy * sin + center.x,
        y: dy * cos + dx * sin + center.y,
    }
}

/// Normalize an angle into `[0, 2π)`.
pub fn normalize_angle(angle: f64) -> f64 {
    if angle < 0.0 {
        angle + 2.0 * std::f64::consts::PI
    } else {
        angle
    }
}

/// Build a polygon from raw boundary points. `None` for degenerate input.
pub fn polygon_from_points(points: &[(f64, f64)]) -> Option<Polygon<f64>> {
    if points.len() < 3 {
        return None;
    }
    let coords: Vec<Coord<f64>> = points.iter().map(|&(x, y)| Coord { x, y }).collect();
    Some(Polygon::new(LineString::from(coords), vec![]))
}

/// Rectangular footprint of a vehicle at (`x`, `y`) with the given heading.
///
/// With a nonzero wheelbase the anchor is the rear axle, so the rectangle
/// extends `(length - wheelbase) / 2 + wheelbase` forward and
/// `(length - wheelbase) / 2` backward. With wheelbase 0 (obstacles) the
/// anchor is the geometric center.
pub fn rect_footprint(
    x: f64,
    y: f64,
    length: f64,
    width: f64,
    heading: f64,
    wheelbase: f64,
) -> Polygon<f64> {
    let (front, back) = if wheelbase > 0.0 {
        let overhang = (length - wheelbase) / 2.0;
        (overhang + wheelbase, overhang)
    } else {
        (length / 2.0, length / 2.0)
    };
    let half_width = width / 2.0;
    let center = Coord { x, y };

    let corners = [
        Coord { x: x + front, y: y + half_width },
        Coord { x: x + front, y: y - half_width },
        Coord { x: x - back, y: y - half_width },
        Coord { x: x - back, y: y + half_width },
    ];
    rotated_rect(&corners, center, heading)
}

/// Front-axle midpoint of the ego, `dx` ahead of the pose anchor.
pub fn head_point(x: f64, y: f64, heading: f64, length: f64, wheelbase: f64) -> Coord<f64> {
    let dx = (length - wheelbase) / 2.0 + wheelbase;
    Coord {
        x: x + dx * heading.cos(),
        y: y + dx * heading.sin(),
    }
}

/// Rear-axle midpoint of the ego, behind the pose anchor.
pub fn back_point(x: f64, y: f64, heading: f64, length: f64, wheelbase: f64) -> Coord<f64> {
    let dx = -(length - wheelbase) / 2.0;
    Coord {
        x: x + dx * heading.cos(),
        y: y + dx * heading.sin(),
    }
}

/// Rectangle reaching `reach` units ahead of `anchor` along `heading`,
/// `width` units wide.
pub fn ahead_area(anchor: Coord<f64>, heading: f64, width: f64, reach: f64) -> Polygon<f64> {
    let half = width / 2.0;
    let corners = [
        Coord { x: anchor.x + reach, y: anchor.y + half },
        Coord { x: anchor.x + reach, y: anchor.y - half },
        Coord { x: anchor.x, y: anchor.y - half },
        Coord { x: anchor.x, y: anchor.y + half },
    ];
    rotated_rect(&corners, anchor, heading)
}

/// 30x30 square ahead of `anchor` on the left side of the heading axis.
pub fn forward_left_area(anchor: Coord<f64>, heading: f64) -> Polygon<f64> {
    let corners = [
        Coord { x: anchor.x + 30.0, y: anchor.y },
        Coord { x: anchor.x + 30.0, y: anchor.y - 30.0 },
        Coord { x: anchor.x, y: anchor.y - 30.0 },
        Coord { x: anchor.x, y: anchor.y },
    ];
    rotated_rect(&corners, anchor, heading)
}

/// 30x30 square ahead of `anchor` on the right side of the heading axis.
pub fn forward_right_area(anchor: Coord<f64>, heading: f64) -> Polygon<f64> {
    let corners = [
        Coord { x: anchor.x + 30.0, y: anchor.y + 30.0 },
        Coord { x: anchor.x + 30.0, y: anchor.y },
        Coord { x: anchor.x, y: anchor.y },
        Coord { x: anchor.x, y: anchor.y + 30.0 },
    ];
    rotated_rect(&corners, anchor, heading)
}

/// Narrow 30-unit-long strip beside and behind the rear axle, on the side a
/// left lane change sweeps through. Offset half the ego width plus a 0.3
/// clearance margin, 3 units deep.
pub fn back_left_area(anchor: Coord<f64>, heading: f64, width: f64) -> Polygon<f64> {
    let offset = width / 2.0 + 0.3;
    let corners = [
        Coord { x: anchor.x, y: anchor.y - offset },
        Coord { x: anchor.x, y: anchor.y - offset - 3.0 },
        Coord { x: anchor.x - 30.0, y: anchor.y - offset - 3.0 },
        Coord { x: anchor.x - 30.0, y: anchor.y - offset },
    ];
    rotated_rect(&corners, anchor, heading)
}

/// Mirror of [`back_left_area`] for a right lane change.
pub fn back_right_area(anchor: Coord<f64>, heading: f64, width: f64) -> Polygon<f64> {
    let offset = width / 2.0 + 0.3;
    let corners = [
        Coord { x: anchor.x, y: anchor.y + offset + 3.0 },
        Coord { x: anchor.x, y: anchor.y + offset },
        Coord { x: anchor.x - 30.0, y: anchor.y + offset },
        Coord { x: anchor.x - 30.0, y: anchor.y + offset + 3.0 },
    ];
    rotated_rect(&corners, anchor, heading)
}

/// Magnitude of a velocity vector.
pub fn vector_speed(x: f64, y: f64, z: f64) -> f64 {
    (x * x + y * y + z * z).sqrt()
}

fn rotated_rect(corners: &[Coord<f64>; 4], anchor: Coord<f64>, heading: f64) -> Polygon<f64> {
    let rotated: Vec<Coord<f64>> = corners
        .iter()
        .map(|&c| rotate_about(c, anchor, heading))
        .collect();
    Polygon::new(LineString::from(rotated), vec![])
}
