//! Bevy layer over the pipeline: control events, periodic probe sampling,
//! the background extraction worker, and snapshot publication.

use std::sync::Arc;

use bevy::math::Vec3;
use bevy::prelude::*;
use bevy::tasks::{AsyncComputeTaskPool, Task, block_on, futures_lite::future};

use constants::render_settings;

use super::{RenderPipeline, RenderableSnapshot};
use crate::engine::clip::ClipPlane;
use crate::engine::error::Result as FieldResult;
use crate::engine::isosurface::{IsoKey, extract_isosurface};
use crate::engine::mesh::SurfaceMesh;
use crate::engine::probe::ProbeHandle;

#[derive(Event)]
pub struct SetThreshold(pub f32);

#[derive(Event)]
pub struct SetOpacity(pub f32);

#[derive(Event)]
pub struct SetColorRange {
    pub min: f32,
    pub max: f32,
}

#[derive(Event)]
pub struct SetClipPlane {
    pub origin: Vec3,
    pub normal: Vec3,
    pub flip: bool,
}

#[derive(Event)]
pub struct ClearClipPlane;

#[derive(Event)]
pub struct SetVisibleBlocks(pub Vec<u8>);

#[derive(Event)]
pub struct RemoveProbe(pub u64);

/// Latest resolved snapshot for the view boundary to pick up.
#[derive(Resource, Default)]
pub struct CurrentSnapshot(pub Option<Arc<RenderableSnapshot>>);

/// Drives the periodic probe sampling that feeds the trend chart.
#[derive(Resource)]
pub struct ProbeTimer(pub Timer);

impl Default for ProbeTimer {
    fn default() -> Self {
        Self(Timer::from_seconds(
            render_settings::PROBE_TICK_SECONDS,
            TimerMode::Repeating,
        ))
    }
}

/// In-flight background extractions, at most one per (version, key).
#[derive(Resource, Default)]
pub struct ExtractionTasks {
    pending: Vec<PendingExtraction>,
}

struct PendingExtraction {
    version: u64,
    key: IsoKey,
    task: Task<FieldResult<SurfaceMesh>>,
}

pub struct CoordinatorPlugin;

impl Plugin for CoordinatorPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<RenderPipeline>()
            .init_resource::<CurrentSnapshot>()
            .init_resource::<ExtractionTasks>()
            .init_resource::<ProbeTimer>()
            .add_event::<SetThreshold>()
            .add_event::<SetOpacity>()
            .add_event::<SetColorRange>()
            .add_event::<SetClipPlane>()
            .add_event::<ClearClipPlane>()
            .add_event::<SetVisibleBlocks>()
            .add_event::<RemoveProbe>()
            .add_systems(
                Update,
                (
                    apply_control_events,
                    tick_probes,
                    drive_background_extractions,
                    resolve_render_state,
                )
                    .chain(),
            );
    }
}

/// Apply every queued control mutation to the pipeline. Events arrive
/// serialized through the app's event queue, so parameter changes and
/// recomputation never interleave.
pub fn apply_control_events(
    mut pipeline: ResMut<RenderPipeline>,
    mut thresholds: EventReader<SetThreshold>,
    mut opacities: EventReader<SetOpacity>,
    mut color_ranges: EventReader<SetColorRange>,
    mut clip_planes: EventReader<SetClipPlane>,
    mut clip_clears: EventReader<ClearClipPlane>,
    mut visible_blocks: EventReader<SetVisibleBlocks>,
    mut probe_removals: EventReader<RemoveProbe>,
) {
    for event in thresholds.read() {
        pipeline.set_threshold(event.0);
    }
    for event in opacities.read() {
        pipeline.set_opacity(event.0);
    }
    for event in color_ranges.read() {
        pipeline.set_color_range(event.min, event.max);
    }
    for event in clip_planes.read() {
        match ClipPlane::new(event.origin, event.normal, event.flip) {
            Some(plane) => pipeline.set_clip_plane(plane),
            None => warn!("ignoring clip plane with zero-length normal"),
        }
    }
    if !clip_clears.is_empty() {
        clip_clears.clear();
        pipeline.clear_clip_plane();
    }
    for event in visible_blocks.read() {
        pipeline.set_visible_blocks(&event.0);
    }
    for event in probe_removals.read() {
        if !pipeline.remove_probe(ProbeHandle(event.0)) {
            warn!("remove requested for unknown probe {}", event.0);
        }
    }
}

pub fn tick_probes(
    time: Res<Time>,
    mut timer: ResMut<ProbeTimer>,
    mut pipeline: ResMut<RenderPipeline>,
) {
    if timer.0.tick(time.delta()).just_finished() {
        pipeline.tick(time.elapsed_secs_f64());
    }
}

/// Poll finished extractions and hand stale-or-fresh results to the
/// pipeline, then launch workers for any newly stale large-grid entities.
/// A second request for a key already in flight awaits the existing task.
pub fn drive_background_extractions(
    mut pipeline: ResMut<RenderPipeline>,
    mut tasks: ResMut<ExtractionTasks>,
) {
    let mut index = 0;
    while index < tasks.pending.len() {
        if let Some(result) = block_on(future::poll_once(&mut tasks.pending[index].task)) {
            let done = tasks.pending.swap_remove(index);
            pipeline.install_extraction(done.version, done.key, result);
        } else {
            index += 1;
        }
    }

    for job in pipeline.pending_jobs() {
        let key = job.key();
        let version = job.field.version();
        if tasks
            .pending
            .iter()
            .any(|p| p.key == key && p.version == version)
        {
            continue;
        }

        info!(
            "background extraction started: '{}' at {} (field v{version})",
            job.array, job.threshold
        );
        let task = AsyncComputeTaskPool::get()
            .spawn(async move { extract_isosurface(&job.field, &job.array, job.threshold) });
        tasks.pending.push(PendingExtraction {
            version,
            key,
            task,
        });
    }
}

pub fn resolve_render_state(
    time: Res<Time>,
    mut pipeline: ResMut<RenderPipeline>,
    mut current: ResMut<CurrentSnapshot>,
) {
    if pipeline.needs_resolve() {
        current.0 = Some(pipeline.resolve(time.elapsed_secs_f64()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::field::dataset::InMemorySource;
    use crate::engine::field::test_fields;

    fn app_with_field() -> App {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins)
            .add_plugins(CoordinatorPlugin);
        app.world_mut()
            .resource_mut::<RenderPipeline>()
            .load_dataset(&InMemorySource::new(test_fields::distance_dataset(
                9, "unit",
            )))
            .unwrap();
        app
    }

    fn snapshot(app: &App) -> Arc<RenderableSnapshot> {
        app.world()
            .resource::<CurrentSnapshot>()
            .0
            .clone()
            .expect("snapshot published")
    }

    #[test]
    fn control_events_flow_into_snapshots() {
        let mut app = app_with_field();
        app.update();
        let initial = snapshot(&app);
        assert!(initial.isotherm.is_some());

        app.world_mut().send_event(SetThreshold(3.0));
        app.world_mut().send_event(SetOpacity(0.5));
        app.update();

        let updated = snapshot(&app);
        assert!(updated.serial > initial.serial);
        assert_eq!(updated.threshold, 3.0);
        assert_eq!(updated.opacity, 0.5);
    }

    #[test]
    fn idle_frames_publish_no_new_snapshot() {
        let mut app = app_with_field();
        app.update();
        let first = snapshot(&app);
        app.update();
        app.update();
        let second = snapshot(&app);
        assert_eq!(first.serial, second.serial);
    }

    #[test]
    fn clip_events_toggle_clipped_geometry() {
        let mut app = app_with_field();
        app.world_mut().send_event(SetThreshold(3.0));
        app.update();

        app.world_mut().send_event(SetClipPlane {
            origin: Vec3::splat(4.0),
            normal: Vec3::Z,
            flip: false,
        });
        app.update();
        assert!(snapshot(&app).isotherm_clipped.is_some());

        app.world_mut().send_event(ClearClipPlane);
        app.update();
        assert!(snapshot(&app).isotherm_clipped.is_none());
    }
}
