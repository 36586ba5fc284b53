use std::time::Duration;

use bevy::asset::AssetMetaCheck;
use bevy::prelude::*;
use bevy_common_assets::json::JsonAssetPlugin;

mod constants;
mod engine;
mod rpc;

use engine::coordinator::systems::CoordinatorPlugin;
use engine::core::app_state::AppState;
use engine::field::dataset::FieldDataset;
use engine::loading::DatasetLoadingPlugin;
use rpc::web_rpc::WebRpcPlugin;

fn main() {
    let mut app = create_app();

    #[cfg(target_arch = "wasm32")]
    {
        wasm_bindgen_futures::spawn_local(async move {
            app.run();
        });
    }

    #[cfg(not(target_arch = "wasm32"))]
    {
        app.run();
    }
}

/// Create the headless pipeline application. Rendering lives entirely on
/// the frontend side of the RPC boundary; this process only produces data.
fn create_app() -> App {
    let mut app = App::new();

    app.add_plugins(
        MinimalPlugins.set(bevy::app::ScheduleRunnerPlugin::run_loop(
            Duration::from_millis(50),
        )),
    )
    .add_plugins(AssetPlugin {
        meta_check: AssetMetaCheck::Never,
        ..default()
    })
    .add_plugins(bevy::state::app::StatesPlugin)
    .add_plugins(bevy::log::LogPlugin::default())
    .add_plugins(JsonAssetPlugin::<FieldDataset>::new(&["dataset.json"]))
    .add_plugins(DatasetLoadingPlugin)
    .add_plugins(CoordinatorPlugin)
    .add_plugins(WebRpcPlugin)
    .init_state::<AppState>()
    .add_systems(OnEnter(AppState::Running), announce_running);

    app
}

fn announce_running() {
    info!("→ Pipeline running, serving snapshots");
}
