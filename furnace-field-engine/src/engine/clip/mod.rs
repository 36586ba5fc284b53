//! Clip engine: restrict derived surfaces or the raw volume to one side of a
//! movable plane.

use bevy::math::Vec3;

use crate::engine::field::{Grid, ScalarField};
use crate::engine::mesh::SurfaceMesh;

/// Plane descriptor with a side selector. The retained half-space is where
/// `normal . (p - origin) >= 0`; `flip` selects the other side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipPlane {
    pub origin: Vec3,
    pub normal: Vec3,
    pub flip: bool,
}

impl ClipPlane {
    /// Build a plane from an arbitrary normal. Returns None for a
    /// zero-length normal, which describes no plane at all.
    pub fn new(origin: Vec3, normal: Vec3, flip: bool) -> Option<Self> {
        let normal = normal.try_normalize()?;
        Some(Self {
            origin,
            normal,
            flip,
        })
    }

    /// Signed distance with the side selector folded in: retained points
    /// have a non-negative oriented distance.
    pub fn oriented_distance(&self, point: Vec3) -> f32 {
        let d = self.normal.dot(point - self.origin);
        if self.flip { -d } else { d }
    }

    /// Exact bit-pattern key for cache invalidation; any pose or side
    /// mutation produces a different key.
    pub fn key(&self) -> PlaneKey {
        PlaneKey {
            origin: self.origin.to_array().map(f32::to_bits),
            normal: self.normal.to_array().map(f32::to_bits),
            flip: self.flip,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaneKey {
    origin: [u32; 3],
    normal: [u32; 3],
    flip: bool,
}

/// Clip a triangle mesh against the plane. Triangles fully on the retained
/// side pass through, triangles fully on the discarded side are dropped, and
/// straddling triangles are cut at the plane-edge crossings with the
/// retained sub-polygon re-triangulated as a fan. Vertex attributes
/// interpolate with position.
pub fn clip_surface(mesh: &SurfaceMesh, plane: &ClipPlane) -> SurfaceMesh {
    let mut out = SurfaceMesh::empty();
    // Original vertices and plane crossings are welded across triangles
    let mut kept_map: Vec<u32> = vec![u32::MAX; mesh.positions.len()];
    let mut crossing_map: std::collections::HashMap<(u32, u32), u32> =
        std::collections::HashMap::new();

    let mut keep_vertex = |out: &mut SurfaceMesh, map: &mut Vec<u32>, vi: u32| -> u32 {
        let slot = &mut map[vi as usize];
        if *slot == u32::MAX {
            *slot = out.push_vertex(
                mesh.positions[vi as usize],
                mesh.scalars[vi as usize],
                mesh.block_ids[vi as usize],
            );
        }
        *slot
    };

    for tri in mesh.indices.chunks_exact(3) {
        let d = [
            plane.oriented_distance(Vec3::from(mesh.positions[tri[0] as usize])),
            plane.oriented_distance(Vec3::from(mesh.positions[tri[1] as usize])),
            plane.oriented_distance(Vec3::from(mesh.positions[tri[2] as usize])),
        ];

        if d.iter().all(|&v| v >= 0.0) {
            // Fully retained
            let a = keep_vertex(&mut out, &mut kept_map, tri[0]);
            let b = keep_vertex(&mut out, &mut kept_map, tri[1]);
            let c = keep_vertex(&mut out, &mut kept_map, tri[2]);
            out.push_triangle(a, b, c);
            continue;
        }
        if !d.iter().any(|&v| v > 0.0) {
            // Fully discarded (at best touching the plane)
            continue;
        }

        // Straddling: walk the triangle boundary and keep the retained
        // sub-polygon, inserting crossings where edges pierce the plane
        let mut polygon: Vec<u32> = Vec::with_capacity(4);
        for e in 0..3 {
            let (vi, vj) = (tri[e], tri[(e + 1) % 3]);
            let (di, dj) = (d[e], d[(e + 1) % 3]);

            if di >= 0.0 {
                polygon.push(keep_vertex(&mut out, &mut kept_map, vi));
            }
            if (di >= 0.0) != (dj >= 0.0) {
                let key = if vi < vj { (vi, vj) } else { (vj, vi) };
                let crossing = *crossing_map.entry(key).or_insert_with(|| {
                    let t = di / (di - dj);
                    let pi = Vec3::from(mesh.positions[vi as usize]);
                    let pj = Vec3::from(mesh.positions[vj as usize]);
                    let p = pi + (pj - pi) * t;
                    let s = mesh.scalars[vi as usize]
                        + (mesh.scalars[vj as usize] - mesh.scalars[vi as usize]) * t;
                    let block = if t < 0.5 {
                        mesh.block_ids[vi as usize]
                    } else {
                        mesh.block_ids[vj as usize]
                    };
                    out.push_vertex(p.to_array(), s, block)
                });
                polygon.push(crossing);
            }
        }

        for w in 1..polygon.len().saturating_sub(1) {
            out.push_triangle(polygon[0], polygon[w], polygon[w + 1]);
        }
    }

    out.compute_normals();
    out
}

/// Cell mask of the grid restricted to the retained half-space. A cell is
/// kept iff some fragment of it lies strictly on the retained side, so a
/// plane coincident with an interior grid face produces exactly the two
/// complementary half-grids.
#[derive(Debug, Clone)]
pub struct VolumeClip {
    /// Cell lattice dimensions (points minus one per axis)
    pub cell_dims: (usize, usize, usize),
    kept: Vec<bool>,
    pub kept_count: usize,
    /// Field version the mask was derived from
    pub field_version: u64,
}

impl VolumeClip {
    pub fn is_cell_kept(&self, i: usize, j: usize, k: usize) -> bool {
        let (cx, cy, _) = self.cell_dims;
        self.kept[i + j * cx + k * cx * cy]
    }
}

pub fn clip_volume(field: &ScalarField, plane: &ClipPlane) -> VolumeClip {
    let grid = field.grid();
    let mask = clip_grid(grid, plane);
    VolumeClip {
        field_version: field.version(),
        ..mask
    }
}

fn clip_grid(grid: &Grid, plane: &ClipPlane) -> VolumeClip {
    let (nx, ny, nz) = grid.dims;
    let cell_dims = (nx - 1, ny - 1, nz - 1);
    let mut kept = Vec::with_capacity(cell_dims.0 * cell_dims.1 * cell_dims.2);
    let mut kept_count = 0usize;

    for k in 0..cell_dims.2 {
        for j in 0..cell_dims.1 {
            for i in 0..cell_dims.0 {
                let mut max_d = f32::NEG_INFINITY;
                for (di, dj, dk) in [
                    (0, 0, 0),
                    (1, 0, 0),
                    (0, 1, 0),
                    (1, 1, 0),
                    (0, 0, 1),
                    (1, 0, 1),
                    (0, 1, 1),
                    (1, 1, 1),
                ] {
                    let p = grid.point_position(i + di, j + dj, k + dk);
                    max_d = max_d.max(plane.oriented_distance(p));
                }
                let keep = max_d > 0.0;
                kept.push(keep);
                kept_count += keep as usize;
            }
        }
    }

    VolumeClip {
        cell_dims,
        kept,
        kept_count,
        field_version: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::field::test_fields;
    use crate::engine::field::TEMPERATURE_ARRAY;
    use crate::engine::isosurface::extract_isosurface;

    #[test]
    fn plane_on_grid_face_partitions_cells_exactly() {
        let field = test_fields::distance_field(5);
        // Plane through the x = 2 lattice face
        let plane = ClipPlane::new(Vec3::new(2.0, 0.0, 0.0), Vec3::X, false).unwrap();
        let kept = clip_volume(&field, &plane);
        let flipped = ClipPlane::new(Vec3::new(2.0, 0.0, 0.0), Vec3::X, true).unwrap();
        let dropped = clip_volume(&field, &flipped);

        let total = 4 * 4 * 4;
        assert_eq!(kept.kept_count, 2 * 4 * 4);
        assert_eq!(dropped.kept_count, 2 * 4 * 4);
        assert_eq!(kept.kept_count + dropped.kept_count, total);
        // The two masks are complementary cell by cell
        for k in 0..4 {
            for j in 0..4 {
                for i in 0..4 {
                    assert_ne!(kept.is_cell_kept(i, j, k), dropped.is_cell_kept(i, j, k));
                }
            }
        }
    }

    #[test]
    fn surface_clip_keeps_retained_side_only() {
        let field = test_fields::distance_field(10);
        let mesh = extract_isosurface(&field, TEMPERATURE_ARRAY, 4.0).unwrap();
        let plane = ClipPlane::new(Vec3::splat(4.5), Vec3::Z, false).unwrap();

        let upper = clip_surface(&mesh, &plane);
        let lower = clip_surface(&mesh, &ClipPlane { flip: true, ..plane });

        assert!(upper.triangle_count() > 0);
        assert!(lower.triangle_count() > 0);
        assert!(upper.triangle_count() < mesh.triangle_count());
        assert!(lower.triangle_count() < mesh.triangle_count());

        for p in &upper.positions {
            assert!(p[2] >= 4.5 - 1e-4);
        }
        for p in &lower.positions {
            assert!(p[2] <= 4.5 + 1e-4);
        }
    }

    #[test]
    fn fully_retained_mesh_passes_through_unchanged() {
        let field = test_fields::distance_field(8);
        let mesh = extract_isosurface(&field, TEMPERATURE_ARRAY, 3.0).unwrap();
        // Plane far below the grid keeps everything
        let plane = ClipPlane::new(Vec3::new(0.0, 0.0, -100.0), Vec3::Z, false).unwrap();
        let clipped = clip_surface(&mesh, &plane);
        assert_eq!(clipped.triangle_count(), mesh.triangle_count());
        assert_eq!(clipped.vertex_count(), mesh.vertex_count());
    }

    #[test]
    fn plane_key_changes_with_pose_and_side() {
        let a = ClipPlane::new(Vec3::ZERO, Vec3::X, false).unwrap();
        let b = ClipPlane::new(Vec3::ZERO, Vec3::X, true).unwrap();
        let c = ClipPlane::new(Vec3::new(0.1, 0.0, 0.0), Vec3::X, false).unwrap();
        assert_ne!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
        assert_eq!(a.key(), ClipPlane::new(Vec3::ZERO, Vec3::X, false).unwrap().key());
    }

    #[test]
    fn zero_normal_is_rejected() {
        assert!(ClipPlane::new(Vec3::ZERO, Vec3::ZERO, false).is_none());
    }
}
