/// Approximate Inferno colour map as piecewise-linear RGB control points.
/// Control points are (normalised position, [r, g, b]).
pub const INFERNO_CONTROL_POINTS: &[(f32, [f32; 3])] = &[
    (0.0, [0.0, 0.0, 0.0]),
    (0.25, [0.22, 0.02, 0.40]),
    (0.50, [0.68, 0.16, 0.16]),
    (0.75, [0.98, 0.64, 0.05]),
    (1.0, [0.99, 0.98, 0.65]),
];

/// Sample the colour map at a normalised position in 0..1.
pub fn sample_color_map(t: f32) -> [f32; 3] {
    let t = t.clamp(0.0, 1.0);

    let mut prev = INFERNO_CONTROL_POINTS[0];
    for &point in &INFERNO_CONTROL_POINTS[1..] {
        if t <= point.0 {
            let span = point.0 - prev.0;
            let local = if span > 0.0 { (t - prev.0) / span } else { 0.0 };
            return [
                prev.1[0] + (point.1[0] - prev.1[0]) * local,
                prev.1[1] + (point.1[1] - prev.1[1]) * local,
                prev.1[2] + (point.1[2] - prev.1[2]) * local,
            ];
        }
        prev = point;
    }
    prev.1
}

/// Build a discrete lookup table for the view layer's scalar bar.
pub fn build_lookup_table(entries: usize) -> Vec<[f32; 3]> {
    (0..entries)
        .map(|i| sample_color_map(i as f32 / (entries.max(2) - 1) as f32))
        .collect()
}
