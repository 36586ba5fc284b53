//! Triangle mesh data produced by the extraction and clip stages.
//!
//! The engine never talks to a renderer; meshes are plain buffers the view
//! layer uploads however it likes.

use serde::{Deserialize, Serialize};

/// Indexed triangle mesh with per-vertex temperature and block id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurfaceMesh {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    /// Temperature sampled at each vertex
    pub scalars: Vec<f32>,
    /// Furnace block zone each vertex falls in (0 = unzoned)
    pub block_ids: Vec<u8>,
    /// Triangle list, three indices per facet
    pub indices: Vec<u32>,
}

impl SurfaceMesh {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Append a vertex and return its index.
    pub fn push_vertex(&mut self, position: [f32; 3], scalar: f32, block_id: u8) -> u32 {
        let index = self.positions.len() as u32;
        self.positions.push(position);
        self.scalars.push(scalar);
        self.block_ids.push(block_id);
        index
    }

    pub fn push_triangle(&mut self, a: u32, b: u32, c: u32) {
        self.indices.extend_from_slice(&[a, b, c]);
    }

    /// Recompute area-weighted vertex normals from the triangle list.
    pub fn compute_normals(&mut self) {
        let mut accum = vec![[0.0f32; 3]; self.positions.len()];

        for tri in self.indices.chunks_exact(3) {
            let a = self.positions[tri[0] as usize];
            let b = self.positions[tri[1] as usize];
            let c = self.positions[tri[2] as usize];

            let ab = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
            let ac = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
            // Cross product length carries the facet area weighting
            let n = [
                ab[1] * ac[2] - ab[2] * ac[1],
                ab[2] * ac[0] - ab[0] * ac[2],
                ab[0] * ac[1] - ab[1] * ac[0],
            ];

            for &vi in tri {
                let acc = &mut accum[vi as usize];
                acc[0] += n[0];
                acc[1] += n[1];
                acc[2] += n[2];
            }
        }

        self.normals = accum
            .into_iter()
            .map(|n| {
                let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
                if len > 1e-12 {
                    [n[0] / len, n[1] / len, n[2] / len]
                } else {
                    [0.0, 0.0, 0.0]
                }
            })
            .collect();
    }

    /// Restrict the mesh to triangles whose vertices sit in the visible block
    /// set. A triangle survives when at least two of its three corners are
    /// visible; surviving vertices are compacted and re-indexed.
    pub fn retain_blocks(&self, visible: &[u8]) -> SurfaceMesh {
        let mut out = SurfaceMesh::empty();
        let mut remap: Vec<u32> = vec![u32::MAX; self.positions.len()];

        for tri in self.indices.chunks_exact(3) {
            let visible_corners = tri
                .iter()
                .filter(|&&vi| visible.contains(&self.block_ids[vi as usize]))
                .count();
            if visible_corners < 2 {
                continue;
            }

            let mut mapped = [0u32; 3];
            for (slot, &vi) in mapped.iter_mut().zip(tri) {
                let vi = vi as usize;
                if remap[vi] == u32::MAX {
                    remap[vi] =
                        out.push_vertex(self.positions[vi], self.scalars[vi], self.block_ids[vi]);
                    if let Some(&n) = self.normals.get(vi) {
                        out.normals.push(n);
                    }
                }
                *slot = remap[vi];
            }
            out.push_triangle(mapped[0], mapped[1], mapped[2]);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> SurfaceMesh {
        // Two triangles in the XY plane sharing an edge
        let mut mesh = SurfaceMesh::empty();
        let a = mesh.push_vertex([0.0, 0.0, 0.0], 1.0, 1);
        let b = mesh.push_vertex([1.0, 0.0, 0.0], 2.0, 1);
        let c = mesh.push_vertex([1.0, 1.0, 0.0], 3.0, 2);
        let d = mesh.push_vertex([0.0, 1.0, 0.0], 4.0, 2);
        mesh.push_triangle(a, b, c);
        mesh.push_triangle(a, c, d);
        mesh.compute_normals();
        mesh
    }

    #[test]
    fn normals_are_unit_length_and_planar() {
        let mesh = quad();
        assert_eq!(mesh.normals.len(), 4);
        for n in &mesh.normals {
            let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
            assert!((len - 1.0).abs() < 1e-5);
            assert!((n[2].abs() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn retain_blocks_drops_invisible_triangles() {
        let mesh = quad();

        let only_one = mesh.retain_blocks(&[1]);
        // First triangle has two block-1 corners, second only one
        assert_eq!(only_one.triangle_count(), 1);
        assert_eq!(only_one.vertex_count(), 3);

        let all = mesh.retain_blocks(&[1, 2]);
        assert_eq!(all.triangle_count(), 2);
        assert_eq!(all.vertex_count(), 4);
    }
}
