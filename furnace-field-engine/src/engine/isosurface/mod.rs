//! Marching-cubes isosurface extraction with version-keyed caching.

mod tables;

use std::collections::HashMap;
use std::sync::Arc;

use bevy::math::Vec3;

use crate::engine::clip::VolumeClip;
use crate::engine::error::{FieldError, Result};
use crate::engine::field::{ScalarField, TEMPERATURE_ARRAY};
use crate::engine::mesh::SurfaceMesh;
use crate::engine::probe;
use tables::{CORNER_OFFSETS, EDGE_ENDPOINTS, EDGE_TABLE, TRI_TABLE};

/// Extract the level-set surface of a named array at `threshold`.
///
/// Corner values equal to the threshold count as above it, uniformly, so a
/// threshold that coincides with lattice values still produces a watertight
/// surface without duplicate facets. A threshold outside the array's
/// observed range returns an empty mesh rather than an error; there is
/// nothing to extract and callers render "no geometry".
pub fn extract_isosurface(field: &ScalarField, array: &str, threshold: f32) -> Result<SurfaceMesh> {
    extract_isosurface_masked(field, array, threshold, None)
}

/// Extraction restricted to the cells retained by a volumetric clip. Cells
/// masked out contribute no facets, matching a re-extraction over the
/// clipped sub-volume.
pub fn extract_isosurface_masked(
    field: &ScalarField,
    array: &str,
    threshold: f32,
    mask: Option<&VolumeClip>,
) -> Result<SurfaceMesh> {
    let values = field.array(array)?;
    let (min, max) = field.range(array)?;
    if threshold < min || threshold > max {
        return Ok(SurfaceMesh::empty());
    }

    let grid = field.grid();
    let (nx, ny, nz) = grid.dims;
    let mut mesh = SurfaceMesh::empty();
    // Shared crossing vertices keyed by the lattice edge's endpoint indices,
    // so neighbouring cells weld instead of duplicating
    let mut edge_vertices: HashMap<(usize, usize), u32> = HashMap::new();

    for k in 0..nz - 1 {
        for j in 0..ny - 1 {
            for i in 0..nx - 1 {
                if let Some(mask) = mask {
                    if !mask.is_cell_kept(i, j, k) {
                        continue;
                    }
                }

                let mut corner_index = [0usize; 8];
                let mut corner_value = [0.0f32; 8];
                let mut config = 0usize;
                for (c, &(di, dj, dk)) in CORNER_OFFSETS.iter().enumerate() {
                    let idx = grid.point_index(i + di, j + dj, k + dk);
                    let v = values[idx];
                    corner_index[c] = idx;
                    corner_value[c] = v;
                    // Below-threshold corners set bits; equality stays above
                    if v < threshold {
                        config |= 1 << c;
                    }
                }

                let edges = EDGE_TABLE[config];
                if edges == 0 {
                    continue;
                }

                let mut cell_edge_vertex = [u32::MAX; 12];
                for (edge, &(a, b)) in EDGE_ENDPOINTS.iter().enumerate() {
                    if edges & (1 << edge) == 0 {
                        continue;
                    }
                    let key = if corner_index[a] < corner_index[b] {
                        (corner_index[a], corner_index[b])
                    } else {
                        (corner_index[b], corner_index[a])
                    };
                    let vertex = match edge_vertices.get(&key) {
                        Some(&v) => v,
                        None => {
                            let (da, dja, dka) = CORNER_OFFSETS[a];
                            let (db, djb, dkb) = CORNER_OFFSETS[b];
                            let pa = grid.point_position(i + da, j + dja, k + dka);
                            let pb = grid.point_position(i + db, j + djb, k + dkb);
                            let position =
                                interpolate_crossing(pa, pb, corner_value[a], corner_value[b], threshold);

                            let scalar = probe::sample_value(field, TEMPERATURE_ARRAY, position)
                                .unwrap_or(threshold);
                            let block = probe::nearest_block_id(field, position);
                            let v = mesh.push_vertex(position.to_array(), scalar, block);
                            edge_vertices.insert(key, v);
                            v
                        }
                    };
                    cell_edge_vertex[edge] = vertex;
                }

                let row = &TRI_TABLE[config];
                for tri in row.chunks_exact(3) {
                    if tri[0] < 0 {
                        break;
                    }
                    let a = cell_edge_vertex[tri[0] as usize];
                    let b = cell_edge_vertex[tri[1] as usize];
                    let c = cell_edge_vertex[tri[2] as usize];
                    // Degenerate facets can appear when a crossing lands on a
                    // lattice point shared by several edges
                    if a == b || b == c || a == c {
                        continue;
                    }
                    mesh.push_triangle(a, b, c);
                }
            }
        }
    }

    if mesh
        .positions
        .iter()
        .any(|p| !p.iter().all(|c| c.is_finite()))
    {
        return Err(FieldError::extraction(format!(
            "non-finite vertex while contouring '{array}' at {threshold}"
        )));
    }

    mesh.compute_normals();
    Ok(mesh)
}

/// Strict validation for callers that reject out-of-range thresholds
/// instead of accepting the empty surface.
pub fn validate_threshold(field: &ScalarField, array: &str, threshold: f32) -> Result<()> {
    let (min, max) = field.range(array)?;
    if threshold < min || threshold > max {
        return Err(FieldError::InvalidThreshold {
            value: threshold,
            min,
            max,
        });
    }
    Ok(())
}

/// Linear crossing point of the threshold along one lattice edge.
fn interpolate_crossing(pa: Vec3, pb: Vec3, va: f32, vb: f32, threshold: f32) -> Vec3 {
    let denom = vb - va;
    let t = if denom.abs() < 1e-12 {
        0.5
    } else {
        ((threshold - va) / denom).clamp(0.0, 1.0)
    };
    pa + (pb - pa) * t
}

/// Cache key: array plus the exact threshold bit pattern. Together with the
/// field version carried by the cache itself this fully determines the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IsoKey {
    pub array: String,
    pub threshold_bits: u32,
}

impl IsoKey {
    pub fn new(array: &str, threshold: f32) -> Self {
        Self {
            array: array.to_string(),
            threshold_bits: threshold.to_bits(),
        }
    }
}

/// Version-keyed extraction cache. Entries from an older field version are
/// dropped wholesale the first time the cache sees a newer one, so a stale
/// mesh can never be served after a refresh.
#[derive(Default)]
pub struct IsoCache {
    version: u64,
    entries: HashMap<IsoKey, Arc<SurfaceMesh>>,
}

impl IsoCache {
    fn sync(&mut self, version: u64) {
        if self.version != version {
            self.entries.clear();
            self.version = version;
        }
    }

    pub fn peek(&mut self, field_version: u64, key: &IsoKey) -> Option<Arc<SurfaceMesh>> {
        self.sync(field_version);
        self.entries.get(key).cloned()
    }

    /// Cached mesh for `(field version, array, threshold)`, extracting on a
    /// miss. A hit returns the shared mesh without recomputation.
    pub fn get_or_extract(
        &mut self,
        field: &ScalarField,
        array: &str,
        threshold: f32,
    ) -> Result<Arc<SurfaceMesh>> {
        self.sync(field.version());
        let key = IsoKey::new(array, threshold);
        if let Some(mesh) = self.entries.get(&key) {
            return Ok(mesh.clone());
        }
        let mesh = Arc::new(extract_isosurface(field, array, threshold)?);
        self.entries.insert(key, mesh.clone());
        Ok(mesh)
    }

    /// Install a mesh computed elsewhere (the background worker). Returns
    /// false when the result was produced against a superseded field version
    /// and must be discarded.
    pub fn install(
        &mut self,
        current_field_version: u64,
        computed_version: u64,
        key: IsoKey,
        mesh: Arc<SurfaceMesh>,
    ) -> bool {
        self.sync(current_field_version);
        if computed_version != current_field_version {
            return false;
        }
        self.entries.insert(key, mesh);
        true
    }

    pub fn contains(&self, field_version: u64, key: &IsoKey) -> bool {
        self.version == field_version && self.entries.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::field::test_fields;

    #[test]
    fn sphere_surface_has_vertices_near_radius() {
        let field = test_fields::distance_field(10);
        let mesh = extract_isosurface(&field, TEMPERATURE_ARRAY, 4.0).unwrap();
        assert!(mesh.triangle_count() > 0);

        let center = Vec3::splat(4.5);
        for p in &mesh.positions {
            let r = (Vec3::from(*p) - center).length();
            // Trilinear crossings on a distance field stay within one cell
            // of the true radius
            assert!((r - 4.0).abs() < 0.5, "vertex at radius {r}");
        }
    }

    #[test]
    fn sphere_surface_is_watertight() {
        let field = test_fields::distance_field(10);
        let mesh = extract_isosurface(&field, TEMPERATURE_ARRAY, 4.0).unwrap();

        // Closed 2-manifold: every edge is shared by exactly two triangles
        let mut edge_counts: HashMap<(u32, u32), u32> = HashMap::new();
        for tri in mesh.indices.chunks_exact(3) {
            for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
                let key = if a < b { (a, b) } else { (b, a) };
                *edge_counts.entry(key).or_default() += 1;
            }
        }
        assert!(edge_counts.values().all(|&c| c == 2));

        // And a sphere's Euler characteristic is 2
        let v = mesh.vertex_count() as i64;
        let e = edge_counts.len() as i64;
        let f = mesh.triangle_count() as i64;
        assert_eq!(v - e + f, 2);
    }

    #[test]
    fn extraction_is_deterministic() {
        let field = test_fields::distance_field(8);
        let a = extract_isosurface(&field, TEMPERATURE_ARRAY, 3.0).unwrap();
        let b = extract_isosurface(&field, TEMPERATURE_ARRAY, 3.0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn out_of_range_threshold_yields_empty_mesh() {
        let field = test_fields::distance_field(8);
        let (_, max) = field.range(TEMPERATURE_ARRAY).unwrap();

        let first = extract_isosurface(&field, TEMPERATURE_ARRAY, max + 1.0).unwrap();
        let second = extract_isosurface(&field, TEMPERATURE_ARRAY, max + 1.0).unwrap();
        assert!(first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn threshold_equal_to_corner_value_is_handled() {
        // Uniform plane of exactly-threshold values: equality counts as
        // above, so the crossing sits between the 0-plane and the 1-plane
        let n = 3;
        let mut values = vec![0.0f32; n * n * n];
        for idx in 0..values.len() {
            let k = idx / (n * n);
            values[idx] = k as f32;
        }
        let field = test_fields::field_from_values(n, values);
        let mesh = extract_isosurface(&field, TEMPERATURE_ARRAY, 1.0).unwrap();
        assert!(mesh.triangle_count() > 0);
        for p in &mesh.positions {
            assert!(p[2] > 0.0 && p[2] <= 1.0);
        }
    }

    #[test]
    fn strict_validation_flags_out_of_range_thresholds() {
        let field = test_fields::distance_field(8);
        let (min, max) = field.range(TEMPERATURE_ARRAY).unwrap();

        assert!(validate_threshold(&field, TEMPERATURE_ARRAY, min).is_ok());
        assert!(validate_threshold(&field, TEMPERATURE_ARRAY, max).is_ok());
        assert!(matches!(
            validate_threshold(&field, TEMPERATURE_ARRAY, max + 1.0),
            Err(FieldError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn cache_hits_share_the_same_mesh() {
        let field = test_fields::distance_field(8);
        let mut cache = IsoCache::default();
        let a = cache.get_or_extract(&field, TEMPERATURE_ARRAY, 3.0).unwrap();
        let b = cache.get_or_extract(&field, TEMPERATURE_ARRAY, 3.0).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let c = cache.get_or_extract(&field, TEMPERATURE_ARRAY, 2.5).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn stale_install_is_discarded() {
        let field = test_fields::distance_field(8);
        let mut cache = IsoCache::default();
        let mesh = Arc::new(extract_isosurface(&field, TEMPERATURE_ARRAY, 3.0).unwrap());

        let key = IsoKey::new(TEMPERATURE_ARRAY, 3.0);
        // Result computed against version 1 arrives after a refresh to 2
        assert!(!cache.install(2, 1, key.clone(), mesh.clone()));
        assert!(!cache.contains(2, &key));
        assert!(cache.install(2, 2, key.clone(), mesh));
        assert!(cache.contains(2, &key));
    }
}
