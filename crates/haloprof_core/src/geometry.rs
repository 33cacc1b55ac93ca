//! Small vector helpers shared by the virial solver and the binning engine.

use nalgebra::Vector3;

/// Projection of `v` onto the direction of `r`.
///
/// A zero `r` has no direction; the projection is defined as zero there.
pub fn project_onto(v: &Vector3<f64>, r: &Vector3<f64>) -> Vector3<f64> {
    let norm_squared = r.norm_squared();
    if norm_squared == 0.0 {
        return Vector3::zeros();
    }
    r * (v.dot(r) / norm_squared)
}

/// Specific angular momentum `v x r`.
pub fn angular_momentum(v: &Vector3<f64>, r: &Vector3<f64>) -> Vector3<f64> {
    v.cross(r)
}

/// Distance from `point` to the infinite line through `origin` along `axis`.
/// A zero `axis` degenerates to the distance to `origin`.
pub fn distance_to_line(point: &Vector3<f64>, origin: &Vector3<f64>, axis: &Vector3<f64>) -> f64 {
    let offset = point - origin;
    let axis_norm_squared = axis.norm_squared();
    if axis_norm_squared == 0.0 {
        return offset.norm();
    }
    let along = axis * (offset.dot(axis) / axis_norm_squared);
    (offset - along).norm()
}

/// Distance from `point` to the plane through `origin` with the given
/// `normal`. A zero `normal` degenerates to the distance to `origin`.
pub fn distance_to_plane(point: &Vector3<f64>, origin: &Vector3<f64>, normal: &Vector3<f64>) -> f64 {
    let offset = point - origin;
    let normal_norm = normal.norm();
    if normal_norm == 0.0 {
        return offset.norm();
    }
    offset.dot(normal).abs() / normal_norm
}

/// The 8 corners of an axis-aligned bounding box.
pub fn box_corners(min: &Vector3<f64>, max: &Vector3<f64>) -> [Vector3<f64>; 8] {
    let mut corners = [Vector3::zeros(); 8];
    for (index, corner) in corners.iter_mut().enumerate() {
        corner.x = if index & 1 == 0 { min.x } else { max.x };
        corner.y = if index & 2 == 0 { min.y } else { max.y };
        corner.z = if index & 4 == 0 { min.z } else { max.z };
    }
    corners
}

/// Greatest distance from `center` to any corner of the box — a safe outer
/// radius enclosing every point inside the box.
pub fn max_corner_distance(min: &Vector3<f64>, max: &Vector3<f64>, center: &Vector3<f64>) -> f64 {
    box_corners(min, max)
        .iter()
        .map(|corner| (corner - center).norm())
        .fold(0.0, f64::max)
}
