/// Furnace zoning: three vertical bands crossed with three radial layers.
/// Block ids are assigned band-major, matching the solver's zone numbering.
pub struct BlockInfo {
    pub id: u8,
    pub band: &'static str,
    pub layer: &'static str,
    pub name: &'static str,
}

pub const BLOCK_MAP: &[BlockInfo] = &[
    BlockInfo {
        id: 1,
        band: "Bottom",
        layer: "Hot Face",
        name: "Bottom - Hot Face",
    },
    BlockInfo {
        id: 2,
        band: "Bottom",
        layer: "Safety",
        name: "Bottom - Safety",
    },
    BlockInfo {
        id: 3,
        band: "Bottom",
        layer: "Shell",
        name: "Bottom - Shell",
    },
    BlockInfo {
        id: 4,
        band: "Mid",
        layer: "Hot Face",
        name: "Mid - Hot Face",
    },
    BlockInfo {
        id: 5,
        band: "Mid",
        layer: "Safety",
        name: "Mid - Safety",
    },
    BlockInfo {
        id: 6,
        band: "Mid",
        layer: "Shell",
        name: "Mid - Shell",
    },
    BlockInfo {
        id: 7,
        band: "Top",
        layer: "Hot Face",
        name: "Top - Hot Face",
    },
    BlockInfo {
        id: 8,
        band: "Top",
        layer: "Safety",
        name: "Top - Safety",
    },
    BlockInfo {
        id: 9,
        band: "Top",
        layer: "Shell",
        name: "Top - Shell",
    },
];

pub fn get_block(id: u8) -> Option<&'static BlockInfo> {
    BLOCK_MAP.iter().find(|b| b.id == id)
}

pub fn all_block_ids() -> Vec<u8> {
    BLOCK_MAP.iter().map(|b| b.id).collect()
}

/// Block assignment by normalised position within the lining.
pub fn block_id_from_fractions(radial_frac: f64, vertical_frac: f64) -> u8 {
    let layer = if radial_frac < 0.33 {
        0
    } else if radial_frac < 0.66 {
        1
    } else {
        2
    };
    let band = if vertical_frac < 0.33 {
        0
    } else if vertical_frac < 0.66 {
        1
    } else {
        2
    };
    band * 3 + layer + 1
}
