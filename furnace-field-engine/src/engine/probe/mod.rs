//! Probe engine: trilinear point sampling and fixed monitoring points that
//! accumulate a temperature history for the trend chart.

use std::collections::BTreeMap;

use bevy::math::Vec3;
use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::engine::error::{FieldError, Result};
use crate::engine::field::{BLOCK_ARRAY, ScalarField, TEMPERATURE_ARRAY};

/// Trilinear interpolation of a named array at an arbitrary point. Points
/// outside the grid's bounding box fail; the pipeline never extrapolates.
pub fn sample_value(field: &ScalarField, array: &str, point: Vec3) -> Result<f32> {
    let values = field.array(array)?;
    let grid = field.grid();
    let ((i, j, k), f) = grid
        .cell_containing(point)
        .ok_or(FieldError::OutOfBounds { point })?;

    let v = |di: usize, dj: usize, dk: usize| values[grid.point_index(i + di, j + dj, k + dk)];

    let c00 = v(0, 0, 0) * (1.0 - f.x) + v(1, 0, 0) * f.x;
    let c10 = v(0, 1, 0) * (1.0 - f.x) + v(1, 1, 0) * f.x;
    let c01 = v(0, 0, 1) * (1.0 - f.x) + v(1, 0, 1) * f.x;
    let c11 = v(0, 1, 1) * (1.0 - f.x) + v(1, 1, 1) * f.x;

    let c0 = c00 * (1.0 - f.y) + c10 * f.y;
    let c1 = c01 * (1.0 - f.y) + c11 * f.y;

    Ok(c0 * (1.0 - f.z) + c1 * f.z)
}

/// Block id of the lattice point nearest to `point`, or 0 when the field
/// carries no block labels or the point is outside the grid.
pub fn nearest_block_id(field: &ScalarField, point: Vec3) -> u8 {
    let Some(labels) = field.labels(BLOCK_ARRAY) else {
        return 0;
    };
    let grid = field.grid();
    let Some(((i, j, k), f)) = grid.cell_containing(point) else {
        return 0;
    };
    let idx = grid.point_index(
        i + (f.x >= 0.5) as usize,
        j + (f.y >= 0.5) as usize,
        k + (f.z >= 0.5) as usize,
    );
    labels[idx]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProbeHandle(pub u64);

/// One monitoring point and its accumulated samples. The series only ever
/// grows, and timestamps never run backwards.
#[derive(Debug, Clone)]
pub struct Probe {
    pub point: Vec3,
    samples: Vec<(f64, f32)>,
}

/// Serializable probe series for the trend chart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSeries {
    pub id: u64,
    pub point: [f32; 3],
    pub times: Vec<f64>,
    pub values: Vec<f32>,
}

#[derive(Default)]
pub struct ProbeEngine {
    probes: BTreeMap<u64, Probe>,
    next_id: u64,
}

impl ProbeEngine {
    /// Register a monitoring point. The point must lie inside the current
    /// grid; registration is rejected otherwise.
    pub fn register(&mut self, field: &ScalarField, point: Vec3) -> Result<ProbeHandle> {
        if !field.grid().contains(point) {
            return Err(FieldError::OutOfBounds { point });
        }
        let id = self.next_id;
        self.next_id += 1;
        self.probes.insert(
            id,
            Probe {
                point,
                samples: Vec::new(),
            },
        );
        Ok(ProbeHandle(id))
    }

    pub fn remove(&mut self, handle: ProbeHandle) -> bool {
        self.probes.remove(&handle.0).is_some()
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// Append one sample per live probe. A probe that fails to sample (for
    /// instance after a refresh shrank the grid) is skipped this tick and
    /// keeps its history; other probes are unaffected.
    pub fn tick(&mut self, field: &ScalarField, timestamp: f64) {
        for (id, probe) in self.probes.iter_mut() {
            let timestamp = match probe.samples.last() {
                // Clock skew never makes a series run backwards
                Some(&(last, _)) if timestamp < last => last,
                _ => timestamp,
            };
            match sample_value(field, TEMPERATURE_ARRAY, probe.point) {
                Ok(value) => probe.samples.push((timestamp, value)),
                Err(err) => debug!("probe {id}: sample skipped: {err}"),
            }
        }
    }

    /// Lazy, finite, restartable traversal of a probe's accumulated series.
    /// Each call starts over from the first sample.
    pub fn history(
        &self,
        handle: ProbeHandle,
    ) -> Option<impl Iterator<Item = (f64, f32)> + '_> {
        self.probes
            .get(&handle.0)
            .map(|probe| probe.samples.iter().copied())
    }

    pub fn point_of(&self, handle: ProbeHandle) -> Option<Vec3> {
        self.probes.get(&handle.0).map(|p| p.point)
    }

    /// Owned series snapshot for every probe, for the view layer.
    pub fn series(&self) -> Vec<ProbeSeries> {
        self.probes
            .iter()
            .map(|(&id, probe)| ProbeSeries {
                id,
                point: probe.point.to_array(),
                times: probe.samples.iter().map(|&(t, _)| t).collect(),
                values: probe.samples.iter().map(|&(_, v)| v).collect(),
            })
            .collect()
    }
}
