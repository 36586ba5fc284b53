//! Field store: the structured grid, its scalar arrays, and the versioned
//! swap that drives every downstream cache invalidation.

pub mod dataset;

use std::collections::HashMap;
use std::sync::Arc;

use bevy::math::Vec3;
use bevy::prelude::*;

use crate::engine::error::{FieldError, Result};
use dataset::{FieldDataset, FieldSource};

pub const TEMPERATURE_ARRAY: &str = "Temperature";
pub const DISTANCE_ARRAY: &str = "Distance";
pub const MATERIAL_ARRAY: &str = "MaterialId";
pub const BLOCK_ARRAY: &str = "BlockId";

/// Structured 3D lattice with uniform spacing. Point layout is x-fastest:
/// index = i + j * nx + k * nx * ny.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    pub dims: (usize, usize, usize),
    pub origin: Vec3,
    pub spacing: Vec3,
}

impl Grid {
    pub fn point_count(&self) -> usize {
        self.dims.0 * self.dims.1 * self.dims.2
    }

    pub fn cell_count(&self) -> usize {
        (self.dims.0 - 1) * (self.dims.1 - 1) * (self.dims.2 - 1)
    }

    pub fn point_index(&self, i: usize, j: usize, k: usize) -> usize {
        i + j * self.dims.0 + k * self.dims.0 * self.dims.1
    }

    pub fn point_position(&self, i: usize, j: usize, k: usize) -> Vec3 {
        self.origin
            + Vec3::new(
                i as f32 * self.spacing.x,
                j as f32 * self.spacing.y,
                k as f32 * self.spacing.z,
            )
    }

    pub fn bounds(&self) -> (Vec3, Vec3) {
        let max = self.point_position(self.dims.0 - 1, self.dims.1 - 1, self.dims.2 - 1);
        (self.origin, max)
    }

    pub fn contains(&self, point: Vec3) -> bool {
        let (min, max) = self.bounds();
        point.x >= min.x
            && point.x <= max.x
            && point.y >= min.y
            && point.y <= max.y
            && point.z >= min.z
            && point.z <= max.z
    }

    /// Cell containing `point` plus the local fractional coordinate within
    /// that cell. Points on the far boundary land in the last cell with a
    /// local fraction of 1.0, so the whole bounding box is sampleable.
    pub fn cell_containing(&self, point: Vec3) -> Option<((usize, usize, usize), Vec3)> {
        if !self.contains(point) {
            return None;
        }

        let rel = (point - self.origin) / self.spacing;
        let clamp_axis = |v: f32, n: usize| -> (usize, f32) {
            let cell = (v.floor() as isize).clamp(0, n as isize - 2) as usize;
            (cell, v - cell as f32)
        };

        let (ci, fx) = clamp_axis(rel.x, self.dims.0);
        let (cj, fy) = clamp_axis(rel.y, self.dims.1);
        let (ck, fz) = clamp_axis(rel.z, self.dims.2);
        Some(((ci, cj, ck), Vec3::new(fx, fy, fz)))
    }
}

/// One loaded timestep: immutable named point arrays over a grid, a single
/// active scalar array, and the field version stamped by the store.
#[derive(Debug, Clone)]
pub struct ScalarField {
    grid: Grid,
    arrays: HashMap<String, Arc<Vec<f32>>>,
    labels: HashMap<String, Arc<Vec<u8>>>,
    ranges: HashMap<String, (f32, f32)>,
    active: String,
    version: u64,
    case_name: String,
}

impl ScalarField {
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn case_name(&self) -> &str {
        &self.case_name
    }

    pub fn active_array(&self) -> &str {
        &self.active
    }

    pub fn array_names(&self) -> Vec<&str> {
        self.arrays.keys().map(String::as_str).collect()
    }

    pub fn array(&self, name: &str) -> Result<&Arc<Vec<f32>>> {
        self.arrays.get(name).ok_or_else(|| FieldError::UnknownArray {
            name: name.to_string(),
        })
    }

    pub fn labels(&self, name: &str) -> Option<&Arc<Vec<u8>>> {
        self.labels.get(name)
    }

    /// Observed [min, max] of a named array.
    pub fn range(&self, name: &str) -> Result<(f32, f32)> {
        self.ranges
            .get(name)
            .copied()
            .ok_or_else(|| FieldError::UnknownArray {
                name: name.to_string(),
            })
    }

    /// Build a field from a validated dataset. Repairs sparse non-finite
    /// samples; rejects the dataset when they exceed the tolerated fraction.
    pub fn from_dataset(dataset: FieldDataset, version: u64) -> Result<Self> {
        let [nx, ny, nz] = dataset.dimensions;
        if nx < 2 || ny < 2 || nz < 2 {
            return Err(FieldError::data_format(format!(
                "grid must be at least 2 points per axis, got {nx}x{ny}x{nz}"
            )));
        }
        let spacing = Vec3::from(dataset.spacing);
        if spacing.min_element() <= 0.0 || !spacing.is_finite() {
            return Err(FieldError::data_format(format!(
                "non-positive grid spacing {:?}",
                dataset.spacing
            )));
        }

        let grid = Grid {
            dims: (nx, ny, nz),
            origin: Vec3::from(dataset.origin),
            spacing,
        };
        let point_count = grid.point_count();

        if !dataset.arrays.contains_key(TEMPERATURE_ARRAY) {
            return Err(FieldError::data_format(format!(
                "missing required scalar array '{TEMPERATURE_ARRAY}'"
            )));
        }

        let mut arrays = HashMap::new();
        let mut ranges = HashMap::new();
        for (name, mut values) in dataset.arrays {
            if values.len() != point_count {
                return Err(FieldError::data_format(format!(
                    "array '{name}' has {} values, grid has {point_count} points",
                    values.len()
                )));
            }
            repair_non_finite(&name, &mut values)?;
            let range = values
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                });
            ranges.insert(name.clone(), range);
            arrays.insert(name, Arc::new(values));
        }

        let mut labels = HashMap::new();
        for (name, values) in dataset.labels {
            if values.len() != point_count {
                return Err(FieldError::data_format(format!(
                    "label array '{name}' has {} values, grid has {point_count} points",
                    values.len()
                )));
            }
            labels.insert(name, Arc::new(values));
        }

        Ok(Self {
            grid,
            arrays,
            labels,
            ranges,
            active: TEMPERATURE_ARRAY.to_string(),
            version,
            case_name: dataset.case_name,
        })
    }
}

/// Replace sparse non-finite samples with the finite mean. More than the
/// tolerated fraction is a malformed source, not sensor noise.
fn repair_non_finite(name: &str, values: &mut [f32]) -> Result<()> {
    let bad = values.iter().filter(|v| !v.is_finite()).count();
    if bad == 0 {
        return Ok(());
    }

    let fraction = bad as f64 / values.len() as f64;
    if fraction > constants::render_settings::NON_FINITE_TOLERATED_FRACTION {
        return Err(FieldError::data_format(format!(
            "array '{name}': {:.2}% non-finite values",
            fraction * 100.0
        )));
    }

    let (sum, count) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0f64, 0usize), |(s, c), &v| (s + v as f64, c + 1));
    let mean = if count > 0 { (sum / count as f64) as f32 } else { 0.0 };
    for v in values.iter_mut() {
        if !v.is_finite() {
            *v = mean;
        }
    }
    warn!("array '{name}': repaired {bad} non-finite values to mean {mean}");
    Ok(())
}

/// Owns the current field and hands out monotonically increasing versions.
/// A failed load leaves the previous field active.
#[derive(Default)]
pub struct FieldStore {
    field: Option<Arc<ScalarField>>,
    loaded_versions: u64,
}

impl FieldStore {
    pub fn current(&self) -> Option<&Arc<ScalarField>> {
        self.field.as_ref()
    }

    /// Parse, validate, and atomically swap in a new field. Returns the new
    /// field version on success.
    pub fn load(&mut self, source: &dyn FieldSource) -> Result<u64> {
        let dataset = source.read()?;
        let version = self.loaded_versions + 1;
        let field = ScalarField::from_dataset(dataset, version)?;
        info!(
            "field v{version} loaded from {}: case '{}', {}x{}x{} points",
            source.describe(),
            field.case_name(),
            field.grid().dims.0,
            field.grid().dims.1,
            field.grid().dims.2
        );
        self.loaded_versions = version;
        self.field = Some(Arc::new(field));
        Ok(version)
    }

    /// Swap in a fresh dataset. Every derived cache keyed by field version
    /// goes stale through the version bump alone.
    pub fn refresh(&mut self, source: &dyn FieldSource) -> Result<u64> {
        self.load(source)
    }
}

#[cfg(test)]
pub(crate) mod test_fields {
    use super::*;
    use std::collections::HashMap;

    /// Cubic dataset with the temperature equal to the distance from the
    /// grid center; spacing 1.0, origin at zero.
    pub fn distance_dataset(n: usize, case: &str) -> FieldDataset {
        let center = (n - 1) as f32 * 0.5;
        let mut values = Vec::with_capacity(n * n * n);
        for k in 0..n {
            for j in 0..n {
                for i in 0..n {
                    let dx = i as f32 - center;
                    let dy = j as f32 - center;
                    let dz = k as f32 - center;
                    values.push((dx * dx + dy * dy + dz * dz).sqrt());
                }
            }
        }
        FieldDataset {
            case_name: case.to_string(),
            dimensions: [n, n, n],
            origin: [0.0, 0.0, 0.0],
            spacing: [1.0, 1.0, 1.0],
            arrays: HashMap::from([(TEMPERATURE_ARRAY.to_string(), values)]),
            labels: HashMap::new(),
            raw_arrays: Vec::new(),
        }
    }

    pub fn distance_field(n: usize) -> ScalarField {
        ScalarField::from_dataset(distance_dataset(n, "test"), 1)
            .expect("test dataset is well-formed")
    }

    pub fn field_from_values(n: usize, values: Vec<f32>) -> ScalarField {
        let dataset = FieldDataset {
            case_name: "test".to_string(),
            dimensions: [n, n, n],
            origin: [0.0, 0.0, 0.0],
            spacing: [1.0, 1.0, 1.0],
            arrays: HashMap::from([(TEMPERATURE_ARRAY.to_string(), values)]),
            labels: HashMap::new(),
            raw_arrays: Vec::new(),
        };
        ScalarField::from_dataset(dataset, 1).expect("test dataset is well-formed")
    }
}

#[cfg(test)]
mod tests {
    use super::dataset::InMemorySource;
    use super::*;
    use std::collections::HashMap;

    fn dataset(n: usize, values: Vec<f32>) -> FieldDataset {
        FieldDataset {
            case_name: "unit".to_string(),
            dimensions: [n, n, n],
            origin: [0.0, 0.0, 0.0],
            spacing: [1.0, 1.0, 1.0],
            arrays: HashMap::from([(TEMPERATURE_ARRAY.to_string(), values)]),
            labels: HashMap::new(),
            raw_arrays: Vec::new(),
        }
    }

    #[test]
    fn load_rejects_length_mismatch() {
        let mut store = FieldStore::default();
        let source = InMemorySource::new(dataset(2, vec![1.0; 7]));
        let err = store.load(&source).unwrap_err();
        assert!(matches!(err, FieldError::DataFormat { .. }));
        assert!(store.current().is_none());
    }

    #[test]
    fn load_rejects_missing_temperature() {
        let mut store = FieldStore::default();
        let mut ds = dataset(2, vec![1.0; 8]);
        let values = ds.arrays.remove(TEMPERATURE_ARRAY).unwrap();
        ds.arrays.insert("Pressure".to_string(), values);
        let err = store.load(&InMemorySource::new(ds)).unwrap_err();
        assert!(matches!(err, FieldError::DataFormat { .. }));
    }

    #[test]
    fn load_rejects_dense_non_finite() {
        let mut store = FieldStore::default();
        let mut values = vec![1.0; 8];
        values[0] = f32::NAN;
        // 12.5% bad is far beyond the tolerated fraction
        let err = store
            .load(&InMemorySource::new(dataset(2, values)))
            .unwrap_err();
        assert!(matches!(err, FieldError::DataFormat { .. }));
    }

    #[test]
    fn sparse_non_finite_is_repaired_to_mean() {
        let n = 5;
        let mut values = vec![2.0f32; n * n * n];
        values[10] = f32::INFINITY;
        let mut store = FieldStore::default();
        store
            .load(&InMemorySource::new(dataset(n, values)))
            .unwrap();
        let field = store.current().unwrap();
        let array = field.array(TEMPERATURE_ARRAY).unwrap();
        assert_eq!(array[10], 2.0);
        assert_eq!(field.range(TEMPERATURE_ARRAY).unwrap(), (2.0, 2.0));
    }

    #[test]
    fn refresh_bumps_version_and_failed_refresh_keeps_field() {
        let mut store = FieldStore::default();
        let v1 = store
            .load(&InMemorySource::new(dataset(2, vec![1.0; 8])))
            .unwrap();
        let v2 = store
            .refresh(&InMemorySource::new(dataset(2, vec![2.0; 8])))
            .unwrap();
        assert!(v2 > v1);

        let bad = InMemorySource::new(dataset(2, vec![1.0; 3]));
        assert!(store.refresh(&bad).is_err());
        let field = store.current().unwrap();
        assert_eq!(field.version(), v2);
        assert_eq!(field.array(TEMPERATURE_ARRAY).unwrap()[0], 2.0);
    }

    #[test]
    fn cell_containing_handles_far_boundary() {
        let field = test_fields::distance_field(4);
        let grid = field.grid();

        let ((i, j, k), frac) = grid.cell_containing(Vec3::new(3.0, 3.0, 3.0)).unwrap();
        assert_eq!((i, j, k), (2, 2, 2));
        assert_eq!(frac, Vec3::ONE);

        assert!(grid.cell_containing(Vec3::new(3.01, 0.0, 0.0)).is_none());
    }
}
