/// Refractory material catalogue for the furnace lining
pub struct MaterialInfo {
    pub id: u8,
    pub name: &'static str,
    /// Thermal conductivity (W/mK)
    pub conductivity: f64,
    /// Density (kg/m3)
    pub density: f64,
    pub note: &'static str,
}

pub const MATERIAL_MAP: &[MaterialInfo] = &[
    MaterialInfo {
        id: 1,
        name: "Carbon Refractory",
        conductivity: 12.0,
        density: 1650.0,
        note: "Hot face",
    },
    MaterialInfo {
        id: 2,
        name: "High-Alumina Brick",
        conductivity: 4.2,
        density: 2300.0,
        note: "Safety lining",
    },
    MaterialInfo {
        id: 3,
        name: "Silica Brick",
        conductivity: 2.1,
        density: 1900.0,
        note: "Upper stack",
    },
    MaterialInfo {
        id: 4,
        name: "Steel Shell",
        conductivity: 45.0,
        density: 7800.0,
        note: "Shell",
    },
];

pub fn get_material_name(id: u8) -> String {
    MATERIAL_MAP
        .iter()
        .find(|m| m.id == id)
        .map_or("unknown", |m| m.name)
        .to_string()
}

/// Material assignment by normalised position within the lining.
/// Inner third is the carbon hot face, middle third splits between safety
/// lining and the silica upper stack, outer third is the steel shell.
pub fn material_id_from_fractions(radial_frac: f64, vertical_frac: f64) -> u8 {
    if radial_frac < 0.33 {
        1
    } else if radial_frac < 0.66 {
        if vertical_frac < 0.65 { 2 } else { 3 }
    } else {
        4
    }
}
