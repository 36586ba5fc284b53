use bevy::math::Vec3;

/// Furnace mockup geometry: hollow cylinder, axis along Z, centred on origin.
pub const FURNACE_OUTER_RADIUS: f64 = 1.8;
pub const FURNACE_INNER_RADIUS: f64 = 0.7;
pub const FURNACE_HEIGHT: f64 = 6.0;

/// Default sample lattice for the synthetic datasets.
pub const SAMPLE_DIMENSIONS: (usize, usize, usize) = (80, 80, 120);

/// Axis-aligned clip normal addressable by name from the control surface.
pub fn axis_normal(axis: &str) -> Option<Vec3> {
    match axis.to_uppercase().as_str() {
        "X" => Some(Vec3::X),
        "Y" => Some(Vec3::Y),
        "Z" => Some(Vec3::Z),
        _ => None,
    }
}

/// Radial position within the lining, normalised to 0..1 between the inner
/// and outer radius.
pub fn radial_fraction(x: f64, y: f64) -> f64 {
    let r = (x * x + y * y).sqrt();
    let span = (FURNACE_OUTER_RADIUS - FURNACE_INNER_RADIUS).max(1e-3);
    ((r - FURNACE_INNER_RADIUS) / span).clamp(0.0, 1.0)
}

/// Height within the furnace, normalised to 0..1 from bottom to top.
pub fn vertical_fraction(z: f64) -> f64 {
    ((z + FURNACE_HEIGHT * 0.5) / FURNACE_HEIGHT).clamp(0.0, 1.0)
}
