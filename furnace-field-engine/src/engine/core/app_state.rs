use bevy::prelude::*;

/// Session lifecycle: waiting for the first dataset, then serving.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, States)]
pub enum AppState {
    #[default]
    Loading,
    Running,
}
