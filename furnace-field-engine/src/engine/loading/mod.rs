//! Dataset asset loading and case switching through the Bevy asset server,
//! which keeps the same code path working on native and wasm builds.

use bevy::prelude::*;

use constants::cases;

use crate::constants::{DEFAULT_CASE, RELATIVE_DATASET_PATH};
use crate::engine::coordinator::RenderPipeline;
use crate::engine::core::app_state::AppState;
use crate::engine::field::dataset::{FieldDataset, InMemorySource};

/// Request to switch the active dataset case by slug.
#[derive(Event)]
pub struct LoadCase(pub String);

#[derive(Resource, Default)]
pub struct DatasetLoader {
    handle: Option<Handle<FieldDataset>>,
    pending_case: Option<String>,
}

pub fn dataset_path(slug: &str) -> String {
    format!("{RELATIVE_DATASET_PATH}/{slug}.dataset.json")
}

pub struct DatasetLoadingPlugin;

impl Plugin for DatasetLoadingPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<DatasetLoader>()
            .add_event::<LoadCase>()
            .add_systems(Startup, start_loading)
            .add_systems(Update, (handle_case_requests, apply_loaded_dataset).chain());
    }
}

/// Kick off loading of the default case.
pub fn start_loading(mut loader: ResMut<DatasetLoader>, asset_server: Res<AssetServer>) {
    let path = dataset_path(DEFAULT_CASE);
    info!("Loading dataset from: {path}");
    loader.pending_case = Some(DEFAULT_CASE.to_string());
    loader.handle = Some(asset_server.load(path));
}

pub fn handle_case_requests(
    mut events: EventReader<LoadCase>,
    mut loader: ResMut<DatasetLoader>,
    asset_server: Res<AssetServer>,
) {
    for event in events.read() {
        let Some(case) = cases::get_case(&event.0) else {
            warn!("unknown case '{}' requested", event.0);
            continue;
        };
        let path = dataset_path(case.slug);
        info!("Switching to case '{}' ({path})", case.name);
        loader.pending_case = Some(case.slug.to_string());
        loader.handle = Some(asset_server.load(path));
    }
}

/// Swap a finished dataset asset into the pipeline. A load failure keeps
/// the previous field serving.
pub fn apply_loaded_dataset(
    mut loader: ResMut<DatasetLoader>,
    mut pipeline: ResMut<RenderPipeline>,
    datasets: Res<Assets<FieldDataset>>,
    mut next_state: ResMut<NextState<AppState>>,
) {
    let Some(handle) = loader.handle.clone() else {
        return;
    };
    let Some(dataset) = datasets.get(&handle) else {
        return;
    };

    let case = loader.pending_case.take().unwrap_or_default();
    loader.handle = None;

    let source = InMemorySource::with_origin(dataset.clone(), dataset_path(&case));
    match pipeline.load_dataset(&source) {
        Ok(version) => {
            info!("✓ Dataset ready (field v{version})");
            next_state.set(AppState::Running);
        }
        Err(err) => error!("dataset load failed: {err}"),
    }
}
