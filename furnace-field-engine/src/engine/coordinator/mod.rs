//! Render state coordinator: owns the field store, the derived-geometry
//! caches and the probe set, and recomputes exactly the stale entities when
//! parameters change.

pub mod systems;

use std::collections::HashMap;
use std::sync::Arc;

use bevy::math::Vec3;
use bevy::prelude::*;
use serde::Serialize;

use constants::{block, render_settings};

use crate::engine::clip::{ClipPlane, PlaneKey, VolumeClip, clip_surface, clip_volume};
use crate::engine::error::{FieldError, Result};
use crate::engine::field::{
    DISTANCE_ARRAY, FieldStore, ScalarField, TEMPERATURE_ARRAY, dataset::FieldSource,
};
use crate::engine::isosurface::{IsoCache, IsoKey, extract_isosurface_masked};
use crate::engine::mesh::SurfaceMesh;
use crate::engine::probe::{ProbeEngine, ProbeHandle, ProbeSeries};
use crate::engine::summary::{BlockSummary, block_table};

/// Current visualization parameters for one session.
#[derive(Debug, Clone)]
pub struct RenderParams {
    pub threshold: f32,
    pub opacity: f32,
    pub color_range: (f32, f32),
    pub clip: Option<ClipPlane>,
    pub visible_blocks: Vec<u8>,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            threshold: render_settings::DEFAULT_ISO_VALUE,
            opacity: render_settings::DEFAULT_SHELL_OPACITY,
            color_range: render_settings::DEFAULT_COLOR_RANGE,
            clip: None,
            visible_blocks: block::all_block_ids(),
        }
    }
}

/// Stale markers over the structurally derived entities. Presentation
/// parameters (opacity, colour range) never set one.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirtyFlags {
    pub shell: bool,
    pub isosurface: bool,
    pub clip: bool,
}

impl DirtyFlags {
    pub fn all() -> Self {
        Self {
            shell: true,
            isosurface: true,
            clip: true,
        }
    }

    pub fn any(&self) -> bool {
        self.shell || self.isosurface || self.clip
    }
}

/// A derived entity that could not be recomputed this resolve. The view
/// layer shows the last good geometry plus a non-blocking indicator.
#[derive(Debug, Clone, Serialize)]
pub struct EntityFailure {
    pub entity: &'static str,
    pub reason: String,
}

/// Immutable bundle handed to the view adapter after each resolve.
#[derive(Debug, Clone)]
pub struct RenderableSnapshot {
    pub serial: u64,
    pub field_version: u64,
    pub case_name: String,
    pub timestamp: f64,
    pub threshold: f32,
    pub opacity: f32,
    pub color_range: (f32, f32),
    pub clip_enabled: bool,
    pub shell: Option<Arc<SurfaceMesh>>,
    pub isotherm: Option<Arc<SurfaceMesh>>,
    pub shell_clipped: Option<Arc<SurfaceMesh>>,
    pub isotherm_clipped: Option<Arc<SurfaceMesh>>,
    /// Cells surviving the volumetric clip, for the view's volume pass
    pub clipped_cell_count: Option<usize>,
    pub probes: Vec<ProbeSeries>,
    pub block_table: Arc<Vec<BlockSummary>>,
    pub unavailable: Vec<EntityFailure>,
}

/// Work order for the background extraction worker.
#[derive(Clone)]
pub struct ExtractionJob {
    pub field: Arc<ScalarField>,
    pub array: String,
    pub threshold: f32,
}

impl ExtractionJob {
    pub fn key(&self) -> IsoKey {
        IsoKey::new(&self.array, self.threshold)
    }
}

enum MeshOutcome {
    Ready(Arc<SurfaceMesh>),
    /// Awaiting the background worker; the last good geometry stays up
    Pending,
    Failed(FieldError),
}

#[derive(Default)]
struct ResolvedGeometry {
    shell: Option<Arc<SurfaceMesh>>,
    isotherm: Option<Arc<SurfaceMesh>>,
    shell_clipped: Option<Arc<SurfaceMesh>>,
    isotherm_clipped: Option<Arc<SurfaceMesh>>,
}

/// One session's pipeline: field store, caches, probes and parameters.
#[derive(Resource, Default)]
pub struct RenderPipeline {
    store: FieldStore,
    iso_cache: IsoCache,
    clip_cache: HashMap<(IsoKey, PlaneKey), Arc<SurfaceMesh>>,
    clip_cache_version: u64,
    volume_clip: Option<(PlaneKey, Arc<VolumeClip>)>,
    probes: ProbeEngine,
    params: RenderParams,
    dirty: DirtyFlags,
    summary_cache: Option<(u64, Arc<Vec<BlockSummary>>)>,
    resolved: ResolvedGeometry,
    unavailable: Vec<EntityFailure>,
    /// Snapshot inputs changed outside the dirty flags (probe activity,
    /// background failures)
    snapshot_stale: bool,
    /// Dirty entities are all blocked on the background worker; resolving
    /// again before a result lands would produce an identical snapshot
    waiting_on_background: bool,
    serial: u64,
}

impl RenderPipeline {
    pub fn params(&self) -> &RenderParams {
        &self.params
    }

    pub fn field(&self) -> Option<&Arc<ScalarField>> {
        self.store.current()
    }

    /// Load or refresh the field. On success every structural entity goes
    /// stale and previously resolved geometry is dropped, so nothing
    /// computed against the old version can ever be served again. A failed
    /// load keeps the previous field and geometry untouched.
    pub fn load_dataset(&mut self, source: &dyn FieldSource) -> Result<u64> {
        let version = self.store.refresh(source)?;
        self.dirty = DirtyFlags::all();
        self.resolved = ResolvedGeometry::default();
        self.unavailable.clear();
        self.waiting_on_background = false;
        self.clamp_threshold();
        Ok(version)
    }

    /// Record or clear the unavailability marker for one derived entity.
    /// Markers persist across resolves until the entity recomputes cleanly.
    fn set_entity_failure(&mut self, entity: &'static str, reason: String) {
        self.unavailable.retain(|f| f.entity != entity);
        self.unavailable.push(EntityFailure { entity, reason });
    }

    fn clear_entity_failure(&mut self, entity: &'static str) {
        self.unavailable.retain(|f| f.entity != entity);
    }

    fn clamp_threshold(&mut self) {
        if let Some(field) = self.store.current() {
            if let Ok((min, max)) = field.range(TEMPERATURE_ARRAY) {
                self.params.threshold = self.params.threshold.clamp(min, max);
            }
        }
    }

    /// Move the isotherm threshold. Bounded to the field's observed range;
    /// the isosurface and any clip of it go stale.
    pub fn set_threshold(&mut self, value: f32) {
        let mut value = value;
        if let Some(field) = self.store.current() {
            if let Ok((min, max)) = field.range(TEMPERATURE_ARRAY) {
                value = value.clamp(min, max);
            }
        }
        if value.to_bits() != self.params.threshold.to_bits() {
            self.params.threshold = value;
            self.dirty.isosurface = true;
            self.dirty.clip = true;
            self.waiting_on_background = false;
        }
    }

    /// Presentation only: no recompute, forwarded with the next snapshot.
    pub fn set_opacity(&mut self, value: f32) {
        self.params.opacity = value.clamp(0.0, 1.0);
    }

    /// Presentation only. The pair is reordered so min <= max always holds.
    pub fn set_color_range(&mut self, min: f32, max: f32) {
        self.params.color_range = if min <= max { (min, max) } else { (max, min) };
    }

    pub fn set_clip_plane(&mut self, plane: ClipPlane) {
        if self.params.clip.map(|p| p.key()) != Some(plane.key()) {
            self.params.clip = Some(plane);
            self.dirty.clip = true;
            self.waiting_on_background = false;
        }
    }

    pub fn clear_clip_plane(&mut self) {
        if self.params.clip.take().is_some() {
            self.dirty.clip = true;
            self.waiting_on_background = false;
        }
    }

    /// Restrict rendered geometry to a set of block zones. Unknown ids are
    /// dropped; an empty selection means all blocks.
    pub fn set_visible_blocks(&mut self, blocks: &[u8]) {
        let mut clean: Vec<u8> = blocks
            .iter()
            .copied()
            .filter(|&b| block::get_block(b).is_some())
            .collect();
        clean.sort_unstable();
        clean.dedup();
        if clean.is_empty() {
            clean = block::all_block_ids();
        }
        if clean != self.params.visible_blocks {
            self.params.visible_blocks = clean;
            // Filtered outputs are rebuilt from the cached base meshes
            self.dirty.shell = true;
            self.dirty.isosurface = true;
            self.dirty.clip = true;
            self.waiting_on_background = false;
        }
    }

    pub fn register_probe(&mut self, point: Vec3) -> Result<ProbeHandle> {
        let field = self.store.current().ok_or(FieldError::OutOfBounds { point })?;
        let handle = self.probes.register(field, point)?;
        self.snapshot_stale = true;
        Ok(handle)
    }

    pub fn remove_probe(&mut self, handle: ProbeHandle) -> bool {
        let removed = self.probes.remove(handle);
        self.snapshot_stale |= removed;
        removed
    }

    pub fn probe_history(
        &self,
        handle: ProbeHandle,
    ) -> Option<impl Iterator<Item = (f64, f32)> + '_> {
        self.probes.history(handle)
    }

    /// Interpolated value of the active array at an arbitrary point.
    pub fn sample_at(&self, point: Vec3) -> Result<f32> {
        let field = self.store.current().ok_or(FieldError::OutOfBounds { point })?;
        crate::engine::probe::sample_value(field, field.active_array(), point)
    }

    /// Periodic probe sampling against the current field.
    pub fn tick(&mut self, timestamp: f64) {
        let Some(field) = self.store.current() else {
            return;
        };
        if !self.probes.is_empty() {
            let field = field.clone();
            self.probes.tick(&field, timestamp);
            self.snapshot_stale = true;
        }
    }

    /// Whether a resolve would produce a new snapshot. Entities parked on
    /// the background worker don't warrant one until a result arrives.
    pub fn needs_resolve(&self) -> bool {
        self.serial == 0
            || self.snapshot_stale
            || (self.dirty.any() && !self.waiting_on_background)
    }

    /// Recompute every stale derived entity at most once and bundle the
    /// results. Entities awaiting the background worker keep their last good
    /// geometry and stay stale; failed entities are reported unavailable.
    pub fn resolve(&mut self, timestamp: f64) -> Arc<RenderableSnapshot> {
        self.serial += 1;
        self.snapshot_stale = false;
        self.waiting_on_background = false;

        let Some(field) = self.store.current().cloned() else {
            return Arc::new(self.snapshot(timestamp, 0, String::new(), None));
        };

        let inline_ok =
            field.grid().cell_count() <= render_settings::ASYNC_EXTRACTION_CELL_THRESHOLD;

        // Shell surface of the lining (zero level of the signed distance)
        if self.dirty.shell || self.resolved.shell.is_none() {
            if field.array(DISTANCE_ARRAY).is_ok() {
                match self.base_mesh(&field, DISTANCE_ARRAY, render_settings::SHELL_ISO_VALUE, inline_ok)
                {
                    MeshOutcome::Ready(mesh) => {
                        self.resolved.shell = Some(self.apply_block_filter(mesh));
                        self.clear_entity_failure("shell");
                        self.dirty.shell = false;
                    }
                    MeshOutcome::Pending => {}
                    MeshOutcome::Failed(err) => {
                        warn!("shell surface unavailable: {err}");
                        self.set_entity_failure("shell", err.to_string());
                        self.dirty.shell = false;
                    }
                }
            } else {
                self.resolved.shell = None;
                self.dirty.shell = false;
            }
        }

        // Isotherm at the current threshold
        if self.dirty.isosurface || self.resolved.isotherm.is_none() {
            let threshold = self.params.threshold;
            match self.base_mesh(&field, TEMPERATURE_ARRAY, threshold, inline_ok) {
                MeshOutcome::Ready(mesh) => {
                    self.resolved.isotherm = Some(self.apply_block_filter(mesh));
                    self.clear_entity_failure("isotherm");
                    self.dirty.isosurface = false;
                }
                MeshOutcome::Pending => {}
                MeshOutcome::Failed(err) => {
                    warn!("isotherm unavailable: {err}");
                    self.set_entity_failure("isotherm", err.to_string());
                    self.dirty.isosurface = false;
                }
            }
        }

        // Clip results, composed from the cached surfaces when possible
        if let Some(plane) = self.params.clip {
            // Keep the volumetric mask fresh for this plane and version
            self.volume_clip_for(&field, &plane);

            if self.dirty.clip
                || self.resolved.shell_clipped.is_none()
                || self.resolved.isotherm_clipped.is_none()
            {
                let mut all_ready = true;
                for (entity, array, threshold) in [
                    ("shell_clip", DISTANCE_ARRAY, render_settings::SHELL_ISO_VALUE),
                    ("isotherm_clip", TEMPERATURE_ARRAY, self.params.threshold),
                ] {
                    if field.array(array).is_err() {
                        continue;
                    }
                    match self.clipped_mesh(&field, array, threshold, &plane, inline_ok) {
                        MeshOutcome::Ready(mesh) => {
                            let filtered = Some(self.apply_block_filter(mesh));
                            if entity == "shell_clip" {
                                self.resolved.shell_clipped = filtered;
                            } else {
                                self.resolved.isotherm_clipped = filtered;
                            }
                            self.clear_entity_failure(entity);
                        }
                        MeshOutcome::Pending => all_ready = false,
                        MeshOutcome::Failed(err) => {
                            warn!("{entity} unavailable: {err}");
                            self.set_entity_failure(entity, err.to_string());
                        }
                    }
                }
                if all_ready {
                    self.dirty.clip = false;
                }
            }
        } else {
            self.resolved.shell_clipped = None;
            self.resolved.isotherm_clipped = None;
            self.dirty.clip = false;
        }

        let case_name = field.case_name().to_string();
        let version = field.version();
        let table = self.block_table_for(&field);
        Arc::new(self.snapshot(timestamp, version, case_name, Some(table)))
    }

    fn snapshot(
        &self,
        timestamp: f64,
        field_version: u64,
        case_name: String,
        table: Option<Arc<Vec<BlockSummary>>>,
    ) -> RenderableSnapshot {
        RenderableSnapshot {
            serial: self.serial,
            field_version,
            case_name,
            timestamp,
            threshold: self.params.threshold,
            opacity: self.params.opacity,
            color_range: self.params.color_range,
            clip_enabled: self.params.clip.is_some(),
            shell: self.resolved.shell.clone(),
            isotherm: self.resolved.isotherm.clone(),
            shell_clipped: self.resolved.shell_clipped.clone(),
            isotherm_clipped: self.resolved.isotherm_clipped.clone(),
            clipped_cell_count: self
                .params
                .clip
                .and(self.volume_clip.as_ref())
                .map(|(_, mask)| mask.kept_count),
            probes: self.probes.series(),
            block_table: table.unwrap_or_default(),
            unavailable: self.unavailable.clone(),
        }
    }

    /// Cached or freshly extracted base mesh for one (array, threshold).
    /// Large grids defer misses to the background worker.
    fn base_mesh(
        &mut self,
        field: &Arc<ScalarField>,
        array: &str,
        threshold: f32,
        inline_ok: bool,
    ) -> MeshOutcome {
        let key = IsoKey::new(array, threshold);
        if let Some(mesh) = self.iso_cache.peek(field.version(), &key) {
            return MeshOutcome::Ready(mesh);
        }
        if !inline_ok {
            self.waiting_on_background = true;
            return MeshOutcome::Pending;
        }
        match self.iso_cache.get_or_extract(field, array, threshold) {
            Ok(mesh) => MeshOutcome::Ready(mesh),
            Err(err) => MeshOutcome::Failed(err),
        }
    }

    /// Clipped mesh for one (array, threshold, plane). When the unclipped
    /// surface is already cached, cutting it is the cheaper order; only
    /// fresh parameters fall back to extracting over the retained
    /// sub-volume.
    fn clipped_mesh(
        &mut self,
        field: &Arc<ScalarField>,
        array: &str,
        threshold: f32,
        plane: &ClipPlane,
        inline_ok: bool,
    ) -> MeshOutcome {
        if self.clip_cache_version != field.version() {
            self.clip_cache.clear();
            self.clip_cache_version = field.version();
        }

        let base_key = IsoKey::new(array, threshold);
        let clip_key = (base_key.clone(), plane.key());
        if let Some(mesh) = self.clip_cache.get(&clip_key) {
            return MeshOutcome::Ready(mesh.clone());
        }

        if let Some(base) = self.iso_cache.peek(field.version(), &base_key) {
            let clipped = Arc::new(clip_surface(&base, plane));
            self.clip_cache.insert(clip_key, clipped.clone());
            return MeshOutcome::Ready(clipped);
        }

        if !inline_ok {
            self.waiting_on_background = true;
            return MeshOutcome::Pending;
        }

        // No base surface yet: restrict the extraction to the retained cells
        // and finish with an exact cut at the plane
        let mask = self.volume_clip_for(field, plane);
        match extract_isosurface_masked(field, array, threshold, Some(&mask)) {
            Ok(mesh) => {
                let clipped = Arc::new(clip_surface(&mesh, plane));
                self.clip_cache.insert(clip_key, clipped.clone());
                MeshOutcome::Ready(clipped)
            }
            Err(err) => MeshOutcome::Failed(err),
        }
    }

    fn volume_clip_for(&mut self, field: &Arc<ScalarField>, plane: &ClipPlane) -> Arc<VolumeClip> {
        if let Some((key, mask)) = &self.volume_clip {
            if *key == plane.key() && mask.field_version == field.version() {
                return mask.clone();
            }
        }
        let mask = Arc::new(clip_volume(field, plane));
        self.volume_clip = Some((plane.key(), mask.clone()));
        mask
    }

    fn apply_block_filter(&self, mesh: Arc<SurfaceMesh>) -> Arc<SurfaceMesh> {
        if self.params.visible_blocks == block::all_block_ids() {
            return mesh;
        }
        // Unzoned meshes carry no block ids worth filtering on
        if mesh.block_ids.iter().all(|&b| b == 0) {
            return mesh;
        }
        Arc::new(mesh.retain_blocks(&self.params.visible_blocks))
    }

    fn block_table_for(&mut self, field: &Arc<ScalarField>) -> Arc<Vec<BlockSummary>> {
        if let Some((version, table)) = &self.summary_cache {
            if *version == field.version() {
                return table.clone();
            }
        }
        let table = Arc::new(block_table(field));
        self.summary_cache = Some((field.version(), table.clone()));
        table
    }

    /// Jobs the background worker should run: stale entities whose mesh is
    /// not cached and whose grid is too large to extract inline.
    pub fn pending_jobs(&mut self) -> Vec<ExtractionJob> {
        let Some(field) = self.store.current().cloned() else {
            return Vec::new();
        };
        if field.grid().cell_count() <= render_settings::ASYNC_EXTRACTION_CELL_THRESHOLD {
            return Vec::new();
        }

        let mut jobs = Vec::new();
        let mut push_job = |cache: &mut IsoCache, array: &str, threshold: f32| {
            let key = IsoKey::new(array, threshold);
            if !cache.contains(field.version(), &key) && field.array(array).is_ok() {
                jobs.push(ExtractionJob {
                    field: field.clone(),
                    array: array.to_string(),
                    threshold,
                });
            }
        };

        if self.dirty.shell {
            push_job(
                &mut self.iso_cache,
                DISTANCE_ARRAY,
                render_settings::SHELL_ISO_VALUE,
            );
        }
        if self.dirty.isosurface || self.dirty.clip {
            push_job(&mut self.iso_cache, TEMPERATURE_ARRAY, self.params.threshold);
        }
        jobs
    }

    /// Accept a background extraction result. Results computed against a
    /// superseded field version or stale parameters are discarded silently;
    /// the caches stay consistent either way.
    pub fn install_extraction(
        &mut self,
        computed_version: u64,
        key: IsoKey,
        result: Result<SurfaceMesh>,
    ) {
        let Some(field) = self.store.current() else {
            return;
        };
        let current_version = field.version();

        match result {
            Ok(mesh) => {
                let installed = self.iso_cache.install(
                    current_version,
                    computed_version,
                    key.clone(),
                    Arc::new(mesh),
                );
                if installed {
                    // The next resolve finds the cache filled
                    self.waiting_on_background = false;
                } else {
                    info!(
                        "discarding extraction for superseded field v{computed_version} (now v{current_version})"
                    );
                }
            }
            Err(err) => {
                if computed_version != current_version {
                    return;
                }
                // Only a failure for the currently requested parameters
                // degrades an entity
                if key == IsoKey::new(TEMPERATURE_ARRAY, self.params.threshold) {
                    warn!("background isotherm extraction failed: {err}");
                    self.set_entity_failure("isotherm", err.to_string());
                    self.dirty.isosurface = false;
                    self.snapshot_stale = true;
                } else if key == IsoKey::new(DISTANCE_ARRAY, render_settings::SHELL_ISO_VALUE) {
                    warn!("background shell extraction failed: {err}");
                    self.set_entity_failure("shell", err.to_string());
                    self.dirty.shell = false;
                    self.snapshot_stale = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::field::dataset::{FieldDataset, InMemorySource};
    use std::collections::HashMap;

    /// 10x10x10-cell lattice (11 points per axis), spacing 1.0, temperature
    /// equal to the distance from the central lattice point.
    fn sphere_source(n_points: usize, case: &str) -> InMemorySource {
        InMemorySource::new(crate::engine::field::test_fields::distance_dataset(
            n_points, case,
        ))
    }

    fn pipeline_with_sphere() -> RenderPipeline {
        let mut pipeline = RenderPipeline::default();
        pipeline
            .load_dataset(&sphere_source(11, "sphere"))
            .unwrap();
        pipeline
    }

    #[test]
    fn end_to_end_sphere_scenario() {
        let mut pipeline = pipeline_with_sphere();
        pipeline.set_threshold(5.0);
        let snapshot = pipeline.resolve(0.0);

        // A closed surface approximating the radius-5 sphere
        let mesh = snapshot.isotherm.as_ref().expect("isotherm available");
        assert!(mesh.triangle_count() > 0);
        let center = Vec3::splat(5.0);
        for p in &mesh.positions {
            let r = (Vec3::from(*p) - center).length();
            assert!((r - 5.0).abs() < 0.5, "vertex at radius {r}");
        }
        // Vertex temperatures track the distance field
        for (p, &s) in mesh.positions.iter().zip(&mesh.scalars) {
            let d = (Vec3::from(*p) - center).length();
            assert!((s - d).abs() < 0.5);
        }

        // The exact center samples to zero
        assert_eq!(pipeline.sample_at(center).unwrap(), 0.0);

        // A plane through the center splits the surface into two patches
        let full = mesh.clone();
        let plane = ClipPlane::new(center, Vec3::Z, false).unwrap();
        pipeline.set_clip_plane(plane);
        let upper = pipeline
            .resolve(1.0)
            .isotherm_clipped
            .clone()
            .expect("clipped isotherm");
        pipeline.set_clip_plane(ClipPlane { flip: true, ..plane });
        let lower = pipeline
            .resolve(2.0)
            .isotherm_clipped
            .clone()
            .expect("clipped isotherm");

        assert!(!upper.is_empty() && !lower.is_empty());
        assert!(upper.triangle_count() < full.triangle_count());
        assert!(lower.triangle_count() < full.triangle_count());
        // Splitting duplicates only the cut boundary
        assert!(upper.vertex_count() + lower.vertex_count() >= full.vertex_count());
        assert!(upper.triangle_count() + lower.triangle_count() >= full.triangle_count());
        for p in &upper.positions {
            assert!(p[2] >= 5.0 - 1e-3);
        }
        for p in &lower.positions {
            assert!(p[2] <= 5.0 + 1e-3);
        }
    }

    #[test]
    fn resolve_memoizes_unchanged_entities() {
        let mut pipeline = pipeline_with_sphere();
        pipeline.set_threshold(4.0);

        let first = pipeline.resolve(0.0);
        let second = pipeline.resolve(1.0);
        let a = first.isotherm.as_ref().unwrap();
        let b = second.isotherm.as_ref().unwrap();
        assert!(Arc::ptr_eq(a, b));

        // Presentation changes recompute nothing
        pipeline.set_opacity(0.3);
        pipeline.set_color_range(100.0, 900.0);
        let third = pipeline.resolve(2.0);
        assert!(Arc::ptr_eq(a, third.isotherm.as_ref().unwrap()));
        assert_eq!(third.opacity, 0.3);
        assert_eq!(third.color_range, (100.0, 900.0));

        // A threshold change recomputes the isosurface
        pipeline.set_threshold(3.0);
        let fourth = pipeline.resolve(3.0);
        assert!(!Arc::ptr_eq(a, fourth.isotherm.as_ref().unwrap()));
    }

    #[test]
    fn plane_move_reclips_without_reextracting() {
        let mut pipeline = pipeline_with_sphere();
        pipeline.set_threshold(4.0);
        let base = pipeline.resolve(0.0).isotherm.clone().unwrap();

        let center = Vec3::splat(5.0);
        pipeline.set_clip_plane(ClipPlane::new(center, Vec3::Z, false).unwrap());
        let snap = pipeline.resolve(1.0);
        // The base surface was not recomputed to produce the clip
        assert!(Arc::ptr_eq(&base, snap.isotherm.as_ref().unwrap()));
        assert!(snap.isotherm_clipped.is_some());
        assert!(snap.clipped_cell_count.unwrap() > 0);

        pipeline.set_clip_plane(
            ClipPlane::new(center + Vec3::Z, Vec3::Z, false).unwrap(),
        );
        let moved = pipeline.resolve(2.0);
        assert!(Arc::ptr_eq(&base, moved.isotherm.as_ref().unwrap()));

        pipeline.clear_clip_plane();
        let cleared = pipeline.resolve(3.0);
        assert!(cleared.isotherm_clipped.is_none());
        assert!(!cleared.clip_enabled);
    }

    #[test]
    fn refresh_invalidates_every_derived_entity() {
        let mut pipeline = pipeline_with_sphere();
        pipeline.set_threshold(4.0);
        pipeline.set_clip_plane(ClipPlane::new(Vec3::splat(5.0), Vec3::X, false).unwrap());
        let before = pipeline.resolve(0.0);
        let old_iso = before.isotherm.clone().unwrap();
        let old_clip = before.isotherm_clipped.clone().unwrap();

        pipeline
            .load_dataset(&sphere_source(11, "sphere-refreshed"))
            .unwrap();
        let after = pipeline.resolve(1.0);

        assert!(after.field_version > before.field_version);
        assert!(!Arc::ptr_eq(&old_iso, after.isotherm.as_ref().unwrap()));
        assert!(!Arc::ptr_eq(&old_clip, after.isotherm_clipped.as_ref().unwrap()));
        assert_eq!(after.case_name, "sphere-refreshed");
    }

    #[test]
    fn failed_refresh_keeps_previous_field_and_geometry() {
        let mut pipeline = pipeline_with_sphere();
        pipeline.set_threshold(4.0);
        let before = pipeline.resolve(0.0);

        let bad = InMemorySource::new(FieldDataset {
            case_name: "broken".to_string(),
            dimensions: [2, 2, 2],
            origin: [0.0; 3],
            spacing: [1.0; 3],
            arrays: HashMap::from([(TEMPERATURE_ARRAY.to_string(), vec![1.0; 3])]),
            labels: HashMap::new(),
            raw_arrays: Vec::new(),
        });
        assert!(pipeline.load_dataset(&bad).is_err());

        let after = pipeline.resolve(1.0);
        assert_eq!(after.field_version, before.field_version);
        assert!(Arc::ptr_eq(
            before.isotherm.as_ref().unwrap(),
            after.isotherm.as_ref().unwrap()
        ));
    }

    #[test]
    fn probe_flow_through_the_coordinator() {
        let mut pipeline = pipeline_with_sphere();
        let handle = pipeline.register_probe(Vec3::splat(5.0)).unwrap();

        pipeline.tick(1.0);
        pipeline.tick(2.0);
        let snapshot = pipeline.resolve(2.0);
        let series = &snapshot.probes[0];
        assert_eq!(series.times, vec![1.0, 2.0]);
        assert_eq!(series.values, vec![0.0, 0.0]);

        assert_eq!(pipeline.probe_history(handle).unwrap().count(), 2);
        assert!(matches!(
            pipeline.register_probe(Vec3::new(50.0, 0.0, 0.0)),
            Err(FieldError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn probes_survive_refresh_and_sample_the_new_field() {
        let mut pipeline = pipeline_with_sphere();
        let handle = pipeline.register_probe(Vec3::splat(5.0)).unwrap();
        pipeline.tick(1.0);

        pipeline
            .load_dataset(&sphere_source(11, "sphere-refreshed"))
            .unwrap();
        pipeline.tick(2.0);

        let samples: Vec<_> = pipeline.probe_history(handle).unwrap().collect();
        assert_eq!(samples.len(), 2);
        assert!(samples[0].0 <= samples[1].0);
    }

    #[test]
    fn threshold_is_clamped_to_observed_range() {
        let mut pipeline = pipeline_with_sphere();
        let field = pipeline.field().unwrap().clone();
        let (min, max) = field.range(TEMPERATURE_ARRAY).unwrap();

        pipeline.set_threshold(max + 100.0);
        assert_eq!(pipeline.params().threshold, max);
        pipeline.set_threshold(min - 100.0);
        assert_eq!(pipeline.params().threshold, min);
    }

    #[test]
    fn stale_background_result_is_discarded() {
        let mut pipeline = pipeline_with_sphere();
        pipeline.set_threshold(4.0);
        let old_version = pipeline.field().unwrap().version();

        pipeline
            .load_dataset(&sphere_source(11, "sphere-refreshed"))
            .unwrap();

        // A worker result for the superseded version arrives late
        let key = IsoKey::new(TEMPERATURE_ARRAY, 4.0);
        pipeline.install_extraction(old_version, key, Ok(SurfaceMesh::empty()));
        pipeline.set_threshold(4.0);
        let snapshot = pipeline.resolve(1.0);
        // The snapshot mesh was extracted fresh, not the stale empty one
        assert!(!snapshot.isotherm.as_ref().unwrap().is_empty());
    }

    #[test]
    fn visible_blocks_sanitized_and_marks_dirty() {
        let mut pipeline = pipeline_with_sphere();
        pipeline.set_visible_blocks(&[3, 1, 1, 99]);
        assert_eq!(pipeline.params().visible_blocks, vec![1, 3]);

        pipeline.set_visible_blocks(&[]);
        assert_eq!(pipeline.params().visible_blocks, block::all_block_ids());
    }
}
