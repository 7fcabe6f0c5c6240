use glam::{Mat4, Vec3};

/// Returns the smallest `n` such that `1 << n >= value`. Zero and one map to zero.
#[inline]
pub fn ceil_log2(value: u32) -> u32 {
    if value <= 1 {
        0
    } else {
        32 - (value - 1).leading_zeros()
    }
}

#[inline]
pub fn is_power_of_two(value: u32) -> bool {
    value != 0 && value & (value - 1) == 0
}

/// Larger of the two projection scale terms. Perspective and orthographic
/// matrices both keep them on the diagonal.
#[inline]
pub fn screen_multiple(projection: &Mat4) -> f32 {
    (0.5 * projection.x_axis.x).max(0.5 * projection.y_axis.y)
}

/// Squared screen-space radius of a bounding sphere, as a fraction of the
/// viewport. Orthographic projections ignore the distance term.
pub fn compute_bounds_screen_radius_squared(
    origin: Vec3,
    sphere_radius: f32,
    view_origin: Vec3,
    projection: &Mat4,
) -> f32 {
    let multiple = screen_multiple(projection);
    let dist_sqr = origin.distance_squared(view_origin) * projection.z_axis.w.abs();
    let screen_radius = multiple * sphere_radius;
    (screen_radius * screen_radius) / dist_sqr.max(1.0)
}

/// Distance from the view at which a sphere of `sphere_radius` covers
/// `screen_size` of the viewport.
pub fn compute_bounds_draw_distance(screen_size: f32, sphere_radius: f32, projection: &Mat4) -> f32 {
    let multiple = screen_multiple(projection);
    let screen_radius = (screen_size * 0.5).max(1.0e-8);
    (multiple * sphere_radius) / screen_radius
}
