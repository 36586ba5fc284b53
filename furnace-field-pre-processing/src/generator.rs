//! Synthetic hollow-cylinder furnace volume with an analytic temperature
//! distribution. The structure mirrors what a real solver-result reader
//! would return, so swapping this generator for an actual reader only
//! replaces this module.

use std::collections::BTreeMap;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use constants::coordinate_system::{
    FURNACE_HEIGHT, FURNACE_INNER_RADIUS, FURNACE_OUTER_RADIUS, SAMPLE_DIMENSIONS,
};
use constants::render_settings::DEFAULT_COLOR_RANGE;
use constants::{block, cases, material};

use crate::dataset::DatasetFile;

const TEMPERATURE_ARRAY: &str = "Temperature";
const DISTANCE_ARRAY: &str = "Distance";
const MATERIAL_ARRAY: &str = "MaterialId";
const BLOCK_ARRAY: &str = "BlockId";

/// Case-specific knobs that perturb the synthetic field.
struct CaseParams {
    slug: &'static str,
    offset: f64,
    noise_amp: f64,
    hot_spot_radius: f64,
    hot_spot_delta: f64,
}

const CASE_VARIANTS: &[CaseParams] = &[
    CaseParams {
        slug: "baseline_design",
        offset: 0.0,
        noise_amp: 25.0,
        hot_spot_radius: 1.0,
        hot_spot_delta: 30.0,
    },
    CaseParams {
        slug: "eroded_state_1",
        offset: -60.0,
        noise_amp: 35.0,
        hot_spot_radius: 1.15,
        hot_spot_delta: 75.0,
    },
    CaseParams {
        slug: "eroded_state_2",
        offset: -120.0,
        noise_amp: 45.0,
        hot_spot_radius: 1.25,
        hot_spot_delta: 120.0,
    },
];

pub struct VolumeGenerator {
    pub dimensions: (usize, usize, usize),
}

impl Default for VolumeGenerator {
    fn default() -> Self {
        Self {
            dimensions: SAMPLE_DIMENSIONS,
        }
    }
}

struct SliceData {
    temperatures: Vec<f32>,
    distances: Vec<f32>,
    materials: Vec<u8>,
    blocks: Vec<u8>,
}

impl VolumeGenerator {
    /// Sample the furnace volume for one case. Slices are generated in
    /// parallel; the result is fully deterministic per case.
    pub fn generate(&self, case_slug: &str) -> Result<DatasetFile, Box<dyn std::error::Error>> {
        let case = cases::get_case(case_slug)
            .ok_or_else(|| format!("unknown case slug: {case_slug}"))?;
        let params = CASE_VARIANTS
            .iter()
            .find(|p| p.slug == case_slug)
            .ok_or_else(|| format!("no variant parameters for case: {case_slug}"))?;

        let (nx, ny, nz) = self.dimensions;
        let origin = [
            -FURNACE_OUTER_RADIUS as f32,
            -FURNACE_OUTER_RADIUS as f32,
            (-FURNACE_HEIGHT * 0.5) as f32,
        ];
        let spacing = [
            (2.0 * FURNACE_OUTER_RADIUS / (nx - 1) as f64) as f32,
            (2.0 * FURNACE_OUTER_RADIUS / (ny - 1) as f64) as f32,
            (FURNACE_HEIGHT / (nz - 1) as f64) as f32,
        ];

        let pb = ProgressBar::new(nz as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{bar:40.green/blue}] {pos}/{len} slices ({percent}%) {msg}")
                .unwrap()
                .progress_chars("█▉▊▋▌▍▎▏"),
        );
        pb.set_message(format!("Sampling '{}'", case.name));

        let slices: Vec<SliceData> = (0..nz)
            .into_par_iter()
            .map(|k| {
                let slice = self.sample_slice(k, origin, spacing, params);
                pb.inc(1);
                slice
            })
            .collect();
        pb.finish_with_message("Volume sampled");

        let point_count = nx * ny * nz;
        let mut temperatures = Vec::with_capacity(point_count);
        let mut distances = Vec::with_capacity(point_count);
        let mut materials = Vec::with_capacity(point_count);
        let mut blocks = Vec::with_capacity(point_count);
        for slice in slices {
            temperatures.extend(slice.temperatures);
            distances.extend(slice.distances);
            materials.extend(slice.materials);
            blocks.extend(slice.blocks);
        }

        Ok(DatasetFile {
            case_name: case.name.to_string(),
            dimensions: [nx, ny, nz],
            origin,
            spacing,
            arrays: BTreeMap::from([
                (TEMPERATURE_ARRAY.to_string(), temperatures),
                (DISTANCE_ARRAY.to_string(), distances),
            ]),
            labels: BTreeMap::from([
                (MATERIAL_ARRAY.to_string(), materials),
                (BLOCK_ARRAY.to_string(), blocks),
            ]),
            raw_arrays: Vec::new(),
        })
    }

    fn sample_slice(
        &self,
        k: usize,
        origin: [f32; 3],
        spacing: [f32; 3],
        params: &CaseParams,
    ) -> SliceData {
        let (nx, ny, _) = self.dimensions;
        let mut slice = SliceData {
            temperatures: Vec::with_capacity(nx * ny),
            distances: Vec::with_capacity(nx * ny),
            materials: Vec::with_capacity(nx * ny),
            blocks: Vec::with_capacity(nx * ny),
        };

        let z = origin[2] as f64 + k as f64 * spacing[2] as f64;
        for j in 0..ny {
            let y = origin[1] as f64 + j as f64 * spacing[1] as f64;
            for i in 0..nx {
                let x = origin[0] as f64 + i as f64 * spacing[0] as f64;
                let point_id = (i + j * nx + k * nx * ny) as u64;

                slice.distances.push(shell_distance(x, y, z) as f32);
                slice
                    .temperatures
                    .push(temperature_at(x, y, z, point_id, params) as f32);

                let radial = constants::coordinate_system::radial_fraction(x, y);
                let vertical = constants::coordinate_system::vertical_fraction(z);
                slice
                    .materials
                    .push(material::material_id_from_fractions(radial, vertical));
                slice
                    .blocks
                    .push(block::block_id_from_fractions(radial, vertical));
            }
        }
        slice
    }
}

/// Signed distance to the hollow-cylinder shell: negative inside the
/// lining, zero on its surface.
fn shell_distance(x: f64, y: f64, z: f64) -> f64 {
    let r = (x * x + y * y).sqrt();
    let outside_outer = r - FURNACE_OUTER_RADIUS;
    let inside_bore = FURNACE_INNER_RADIUS - r;
    let beyond_ends = z.abs() - FURNACE_HEIGHT * 0.5;
    outside_outer.max(inside_bore).max(beyond_ends)
}

/// Hot core cooling towards the shell, with a vertical falloff, a
/// case-dependent offset, deterministic pseudo-noise and a hot-spot ring.
fn temperature_at(x: f64, y: f64, z: f64, point_id: u64, params: &CaseParams) -> f64 {
    let r = (x * x + y * y).sqrt();
    let radial = constants::coordinate_system::radial_fraction(x, y);
    let vertical = constants::coordinate_system::vertical_fraction(z);

    let base = 1600.0 - radial * 1550.0 - vertical * 80.0 + params.offset;
    let noise = pseudo_noise(point_id ^ (params.offset.to_bits())) * params.noise_amp;
    let ring = (-(r - params.hot_spot_radius).powi(2) / 0.15).exp() * params.hot_spot_delta;

    let (lo, hi) = DEFAULT_COLOR_RANGE;
    (base + noise + ring).clamp(lo as f64, hi as f64)
}

/// Deterministic noise in -1..1 from a point seed (splitmix64 scramble).
fn pseudo_noise(seed: u64) -> f64 {
    let mut x = seed.wrapping_add(0x9E3779B97F4A7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D049BB133111EB);
    x ^= x >> 31;
    (x as f64 / u64::MAX as f64) * 2.0 - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_generator() -> VolumeGenerator {
        VolumeGenerator {
            dimensions: (12, 12, 16),
        }
    }

    #[test]
    fn generated_volume_is_well_formed() {
        let file = small_generator().generate("baseline_design").unwrap();
        let points = 12 * 12 * 16;

        assert_eq!(file.point_count(), points);
        let temps = &file.arrays[TEMPERATURE_ARRAY];
        assert_eq!(temps.len(), points);
        let (lo, hi) = DEFAULT_COLOR_RANGE;
        assert!(temps.iter().all(|t| t.is_finite() && *t >= lo && *t <= hi));
        assert_eq!(file.arrays[DISTANCE_ARRAY].len(), points);
        assert_eq!(file.labels[MATERIAL_ARRAY].len(), points);
        assert!(
            file.labels[BLOCK_ARRAY]
                .iter()
                .all(|b| (1..=9).contains(b))
        );
    }

    #[test]
    fn generation_is_deterministic() {
        let generator = small_generator();
        let a = generator.generate("eroded_state_1").unwrap();
        let b = generator.generate("eroded_state_1").unwrap();
        assert_eq!(a.arrays[TEMPERATURE_ARRAY], b.arrays[TEMPERATURE_ARRAY]);
    }

    #[test]
    fn cases_differ_in_temperature_only() {
        let generator = small_generator();
        let baseline = generator.generate("baseline_design").unwrap();
        let eroded = generator.generate("eroded_state_2").unwrap();
        assert_ne!(
            baseline.arrays[TEMPERATURE_ARRAY],
            eroded.arrays[TEMPERATURE_ARRAY]
        );
        assert_eq!(
            baseline.arrays[DISTANCE_ARRAY],
            eroded.arrays[DISTANCE_ARRAY]
        );
    }

    #[test]
    fn shell_distance_signs_match_the_geometry() {
        // Mid-lining point sits inside the shell
        let mid = (FURNACE_INNER_RADIUS + FURNACE_OUTER_RADIUS) * 0.5;
        assert!(shell_distance(mid, 0.0, 0.0) < 0.0);
        // The bore and the outside are both positive
        assert!(shell_distance(0.0, 0.0, 0.0) > 0.0);
        assert!(shell_distance(FURNACE_OUTER_RADIUS + 0.5, 0.0, 0.0) > 0.0);
        // Above the stack is outside regardless of radius
        assert!(shell_distance(mid, 0.0, FURNACE_HEIGHT) > 0.0);
    }

    #[test]
    fn every_catalogued_case_has_variant_parameters() {
        for case in cases::CASE_MAP {
            assert!(CASE_VARIANTS.iter().any(|p| p.slug == case.slug));
        }
    }
}
