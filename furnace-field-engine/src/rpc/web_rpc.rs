//! JSON-RPC 2.0 control surface between the web frontend and the pipeline.
//! The frontend mutates parameters through request messages; resolved
//! snapshots stream back as notifications carrying plain mesh and series
//! buffers. Rendering stays entirely on the frontend side.

use bevy::math::Vec3;
use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use constants::{block, cases, color_map, coordinate_system, render_settings};

use crate::engine::coordinator::systems::{
    ClearClipPlane, CurrentSnapshot, RemoveProbe, SetClipPlane, SetColorRange, SetOpacity,
    SetThreshold, SetVisibleBlocks,
};
use crate::engine::coordinator::{RenderPipeline, RenderableSnapshot};
use crate::engine::error::FieldError;
use crate::engine::field::TEMPERATURE_ARRAY;
use crate::engine::loading::LoadCase;
use crate::engine::probe::ProbeHandle;

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::JsValue;
#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;
#[cfg(target_arch = "wasm32")]
use web_sys::{MessageEvent, window};

/// JSON-RPC 2.0 request structure.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<RpcError>,
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 notification structure for one-way communication.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RpcNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: serde_json::Value,
}

/// JSON-RPC error structure following specification.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    pub fn invalid_params(message: &str) -> Self {
        Self {
            code: -32602,
            message: message.to_string(),
            data: None,
        }
    }

    pub fn internal_error(message: &str) -> Self {
        Self {
            code: -32603,
            message: message.to_string(),
            data: None,
        }
    }
}

impl From<FieldError> for RpcError {
    fn from(err: FieldError) -> Self {
        match err {
            FieldError::OutOfBounds { .. }
            | FieldError::InvalidThreshold { .. }
            | FieldError::UnknownArray { .. } => Self::invalid_params(&err.to_string()),
            FieldError::DataFormat { .. } | FieldError::Extraction { .. } => {
                Self::internal_error(&err.to_string())
            }
        }
    }
}

/// Resource managing outbound RPC traffic to the frontend.
#[derive(Resource, Default)]
pub struct WebRpcInterface {
    outgoing_notifications: Vec<RpcNotification>,
    outgoing_responses: Vec<RpcResponse>,
}

impl WebRpcInterface {
    /// Send notification to the frontend without expecting a response.
    pub fn send_notification(&mut self, method: &str, params: serde_json::Value) {
        self.outgoing_notifications.push(RpcNotification {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        });
    }

    fn queue_response(&mut self, response: RpcResponse) {
        self.outgoing_responses.push(response);
    }
}

/// Plugin establishing the RPC boundary for iframe-based deployment.
pub struct WebRpcPlugin;

impl Plugin for WebRpcPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<WebRpcInterface>()
            .add_event::<IncomingRpcMessage>()
            .add_systems(
                Update,
                (
                    process_incoming_messages,
                    handle_rpc_messages,
                    publish_snapshots,
                    send_outgoing_messages,
                )
                    .chain(),
            );

        #[cfg(target_arch = "wasm32")]
        app.add_systems(Startup, setup_message_listener);
    }
}

#[cfg(target_arch = "wasm32")]
fn setup_message_listener(mut commands: Commands) {
    use std::sync::Arc;
    use std::sync::Mutex;

    // Thread-safe message queue for cross-thread communication.
    let message_queue: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let queue_clone = message_queue.clone();

    let closure = Closure::wrap(Box::new(move |event: MessageEvent| {
        if let Ok(data) = event.data().dyn_into::<js_sys::JsString>() {
            let message_str: String = data.into();
            // Validate the RPC shape before queuing.
            if message_str.contains("jsonrpc") {
                if let Ok(mut queue) = queue_clone.lock() {
                    queue.push(message_str);
                }
            }
        }
    }) as Box<dyn FnMut(MessageEvent)>);

    if let Some(window) = window() {
        window
            .add_event_listener_with_callback("message", closure.as_ref().unchecked_ref())
            .expect("Failed to register message listener");
    }

    // Prevent closure from being dropped by transferring ownership to JS.
    closure.forget();
    commands.insert_resource(MessageQueue(message_queue));
}

/// Resource wrapping the thread-safe message queue for WASM event handling.
#[derive(Resource)]
struct MessageQueue(std::sync::Arc<std::sync::Mutex<Vec<String>>>);

/// Event representing an incoming RPC message from the frontend.
#[derive(Event)]
pub struct IncomingRpcMessage {
    pub content: String,
}

fn process_incoming_messages(
    message_queue: Option<Res<MessageQueue>>,
    mut message_events: EventWriter<IncomingRpcMessage>,
) {
    let Some(queue_res) = message_queue else {
        return;
    };

    let messages = if let Ok(mut queue) = queue_res.0.lock() {
        std::mem::take(&mut *queue)
    } else {
        Vec::new()
    };

    for message_str in messages {
        message_events.write(IncomingRpcMessage {
            content: message_str,
        });
    }
}

/// Writers for the control events a request can translate into.
#[derive(bevy::ecs::system::SystemParam)]
pub struct ControlWriters<'w> {
    thresholds: EventWriter<'w, SetThreshold>,
    opacities: EventWriter<'w, SetOpacity>,
    color_ranges: EventWriter<'w, SetColorRange>,
    clip_planes: EventWriter<'w, SetClipPlane>,
    clip_clears: EventWriter<'w, ClearClipPlane>,
    visible_blocks: EventWriter<'w, SetVisibleBlocks>,
    probe_removals: EventWriter<'w, RemoveProbe>,
    case_loads: EventWriter<'w, LoadCase>,
}

fn handle_rpc_messages(
    mut events: EventReader<IncomingRpcMessage>,
    mut rpc_interface: ResMut<WebRpcInterface>,
    mut pipeline: ResMut<RenderPipeline>,
    mut writers: ControlWriters,
) {
    for event in events.read() {
        match serde_json::from_str::<RpcRequest>(&event.content) {
            Ok(request) => {
                if let Some(response) = handle_rpc_request(&request, &mut pipeline, &mut writers) {
                    rpc_interface.queue_response(response);
                }
            }
            Err(parse_error) => {
                warn!("unparseable RPC message: {parse_error}");
            }
        }
    }
}

/// Handle one request and generate a response based on its method. Requests
/// without an id are notifications and get no response.
fn handle_rpc_request(
    request: &RpcRequest,
    pipeline: &mut RenderPipeline,
    writers: &mut ControlWriters,
) -> Option<RpcResponse> {
    let id = request.id.clone()?;

    let result = match request.method.as_str() {
        "set_threshold" => handle_set_threshold(&request.params, pipeline, writers),
        "set_opacity" => handle_set_opacity(&request.params, writers),
        "set_color_range" => handle_set_color_range(&request.params, writers),
        "set_clip_plane" => handle_set_clip_plane(&request.params, writers),
        "clear_clip_plane" => {
            writers.clip_clears.write(ClearClipPlane);
            Ok(serde_json::json!({ "success": true }))
        }
        "set_visible_blocks" => handle_set_visible_blocks(&request.params, writers),
        "register_probe" => handle_register_probe(&request.params, pipeline),
        "remove_probe" => handle_remove_probe(&request.params, writers),
        "probe_history" => handle_probe_history(&request.params, pipeline),
        "sample_point" => handle_sample_point(&request.params, pipeline),
        "load_case" => handle_load_case(&request.params, writers),
        "get_block_table" => Ok(serde_json::json!({
            "blocks": pipeline
                .field()
                .map(|f| crate::engine::summary::block_table(f))
                .unwrap_or_default()
        })),
        "get_field_info" => handle_get_field_info(pipeline),
        "get_color_map" => Ok(serde_json::json!({
            "lookup_table": color_map::build_lookup_table(render_settings::LOOKUP_TABLE_SIZE),
            "label_count": render_settings::SCALAR_BAR_LABELS,
        })),
        _ => {
            warn!("Unknown RPC method: {}", request.method);
            return Some(RpcResponse {
                jsonrpc: "2.0".to_string(),
                result: None,
                error: Some(RpcError {
                    code: -32601,
                    message: "Method not found".to_string(),
                    data: Some(serde_json::json!({"method": request.method})),
                }),
                id: Some(id),
            });
        }
    };

    match result {
        Ok(result_value) => Some(RpcResponse {
            jsonrpc: "2.0".to_string(),
            result: Some(result_value),
            error: None,
            id: Some(id),
        }),
        Err(error) => Some(RpcResponse {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id: Some(id),
        }),
    }
}

fn handle_set_threshold(
    params: &serde_json::Value,
    pipeline: &RenderPipeline,
    writers: &mut ControlWriters,
) -> Result<serde_json::Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        value: f32,
    }
    let p: Params = parse_params(params)?;
    if !p.value.is_finite() {
        return Err(RpcError::invalid_params("threshold must be finite"));
    }
    // The slider in the UI is bounded to the observed range; a request
    // outside it is rejected rather than silently clamped
    if let Some(field) = pipeline.field() {
        crate::engine::isosurface::validate_threshold(field, TEMPERATURE_ARRAY, p.value)?;
    }
    writers.thresholds.write(SetThreshold(p.value));
    Ok(serde_json::json!({ "success": true, "threshold": p.value }))
}

fn handle_set_opacity(
    params: &serde_json::Value,
    writers: &mut ControlWriters,
) -> Result<serde_json::Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        value: f32,
    }
    let p: Params = parse_params(params)?;
    if !(0.0..=1.0).contains(&p.value) {
        return Err(RpcError::invalid_params("opacity must lie in 0..1"));
    }
    writers.opacities.write(SetOpacity(p.value));
    Ok(serde_json::json!({ "success": true, "opacity": p.value }))
}

fn handle_set_color_range(
    params: &serde_json::Value,
    writers: &mut ControlWriters,
) -> Result<serde_json::Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        min: f32,
        max: f32,
    }
    let p: Params = parse_params(params)?;
    if !p.min.is_finite() || !p.max.is_finite() || p.min > p.max {
        return Err(RpcError::invalid_params(
            "colour range needs finite min <= max",
        ));
    }
    writers.color_ranges.write(SetColorRange {
        min: p.min,
        max: p.max,
    });
    Ok(serde_json::json!({ "success": true }))
}

fn handle_set_clip_plane(
    params: &serde_json::Value,
    writers: &mut ControlWriters,
) -> Result<serde_json::Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        origin: [f32; 3],
        #[serde(default)]
        normal: Option<[f32; 3]>,
        #[serde(default)]
        axis: Option<String>,
        #[serde(default)]
        flip: bool,
    }
    let p: Params = parse_params(params)?;

    let normal = match (p.normal, p.axis) {
        (Some(n), _) => Vec3::from(n),
        (None, Some(axis)) => coordinate_system::axis_normal(&axis)
            .ok_or_else(|| RpcError::invalid_params("axis must be one of x, y, z"))?,
        (None, None) => {
            return Err(RpcError::invalid_params(
                "clip plane needs a 'normal' or an 'axis'",
            ));
        }
    };
    if normal.length_squared() < 1e-12 {
        return Err(RpcError::invalid_params("clip normal must be non-zero"));
    }

    writers.clip_planes.write(SetClipPlane {
        origin: Vec3::from(p.origin),
        normal,
        flip: p.flip,
    });
    Ok(serde_json::json!({ "success": true }))
}

fn handle_set_visible_blocks(
    params: &serde_json::Value,
    writers: &mut ControlWriters,
) -> Result<serde_json::Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        blocks: Vec<u8>,
    }
    let p: Params = parse_params(params)?;
    writers.visible_blocks.write(SetVisibleBlocks(p.blocks));
    Ok(serde_json::json!({ "success": true }))
}

fn handle_register_probe(
    params: &serde_json::Value,
    pipeline: &mut RenderPipeline,
) -> Result<serde_json::Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        point: [f32; 3],
    }
    let p: Params = parse_params(params)?;
    let handle = pipeline.register_probe(Vec3::from(p.point))?;
    // The probe samples immediately: the frontend gets a reading without
    // waiting for the next tick
    let value = pipeline.sample_at(Vec3::from(p.point)).ok();
    Ok(serde_json::json!({
        "success": true,
        "probe_id": handle.0,
        "value": value,
    }))
}

fn handle_remove_probe(
    params: &serde_json::Value,
    writers: &mut ControlWriters,
) -> Result<serde_json::Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        probe_id: u64,
    }
    let p: Params = parse_params(params)?;
    writers.probe_removals.write(RemoveProbe(p.probe_id));
    Ok(serde_json::json!({ "success": true }))
}

fn handle_probe_history(
    params: &serde_json::Value,
    pipeline: &RenderPipeline,
) -> Result<serde_json::Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        probe_id: u64,
    }
    let p: Params = parse_params(params)?;
    let history = pipeline
        .probe_history(ProbeHandle(p.probe_id))
        .ok_or_else(|| RpcError::invalid_params("unknown probe id"))?;

    let (times, values): (Vec<f64>, Vec<f32>) = history.unzip();
    Ok(serde_json::json!({
        "probe_id": p.probe_id,
        "times": times,
        "values": values,
    }))
}

fn handle_sample_point(
    params: &serde_json::Value,
    pipeline: &RenderPipeline,
) -> Result<serde_json::Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        point: [f32; 3],
    }
    let p: Params = parse_params(params)?;
    let value = pipeline.sample_at(Vec3::from(p.point))?;
    Ok(serde_json::json!({
        "point": p.point,
        "value": value,
    }))
}

fn handle_load_case(
    params: &serde_json::Value,
    writers: &mut ControlWriters,
) -> Result<serde_json::Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        case: String,
    }
    let p: Params = parse_params(params)?;
    if cases::get_case(&p.case).is_none() {
        return Err(RpcError::invalid_params(&format!(
            "unknown case: {}",
            p.case
        )));
    }
    writers.case_loads.write(LoadCase(p.case.clone()));
    Ok(serde_json::json!({ "success": true, "case": p.case }))
}

fn handle_get_field_info(pipeline: &RenderPipeline) -> Result<serde_json::Value, RpcError> {
    let Some(field) = pipeline.field() else {
        return Ok(serde_json::json!({ "loaded": false }));
    };
    let grid = field.grid();
    let (min, max) = grid.bounds();
    let range = field.range(TEMPERATURE_ARRAY).unwrap_or((0.0, 0.0));

    Ok(serde_json::json!({
        "loaded": true,
        "field_version": field.version(),
        "case": field.case_name(),
        "cases": cases::CASE_MAP
            .iter()
            .map(|c| serde_json::json!({ "slug": c.slug, "name": c.name }))
            .collect::<Vec<_>>(),
        "dimensions": [grid.dims.0, grid.dims.1, grid.dims.2],
        "bounds": { "min": min.to_array(), "max": max.to_array() },
        "temperature_range": [range.0, range.1],
        "arrays": field.array_names(),
        "block_ids": block::all_block_ids(),
    }))
}

fn parse_params<T: for<'de> Deserialize<'de>>(
    params: &serde_json::Value,
) -> Result<T, RpcError> {
    serde_json::from_value(params.clone())
        .map_err(|e| RpcError::invalid_params(&format!("bad parameters: {e}")))
}

/// Push each freshly resolved snapshot to the frontend exactly once.
fn publish_snapshots(
    current: Res<CurrentSnapshot>,
    mut rpc_interface: ResMut<WebRpcInterface>,
    mut last_serial: Local<u64>,
) {
    let Some(snapshot) = current.0.as_ref() else {
        return;
    };
    if snapshot.serial == *last_serial {
        return;
    }
    *last_serial = snapshot.serial;
    rpc_interface.send_notification("snapshot_ready", snapshot_payload(snapshot));
}

fn snapshot_payload(snapshot: &RenderableSnapshot) -> serde_json::Value {
    let mesh = |m: &Option<std::sync::Arc<crate::engine::mesh::SurfaceMesh>>| {
        m.as_ref()
            .map(|m| serde_json::to_value(&**m).unwrap_or(serde_json::Value::Null))
            .unwrap_or(serde_json::Value::Null)
    };

    serde_json::json!({
        "serial": snapshot.serial,
        "field_version": snapshot.field_version,
        "case": &snapshot.case_name,
        "timestamp": snapshot.timestamp,
        "threshold": snapshot.threshold,
        "opacity": snapshot.opacity,
        "color_range": [snapshot.color_range.0, snapshot.color_range.1],
        "clip_enabled": snapshot.clip_enabled,
        "clipped_cell_count": snapshot.clipped_cell_count,
        "shell": mesh(&snapshot.shell),
        "isotherm": mesh(&snapshot.isotherm),
        "shell_clipped": mesh(&snapshot.shell_clipped),
        "isotherm_clipped": mesh(&snapshot.isotherm_clipped),
        "probes": &snapshot.probes,
        "block_table": &*snapshot.block_table,
        "unavailable": &snapshot.unavailable,
    })
}

/// Send queued notifications and responses to the frontend.
fn send_outgoing_messages(mut rpc_interface: ResMut<WebRpcInterface>) {
    for notification in rpc_interface.outgoing_notifications.drain(..) {
        send_message_to_parent(&notification);
    }
    for response in rpc_interface.outgoing_responses.drain(..) {
        send_message_to_parent(&response);
    }
}

/// Send a serialized message to the parent window (the frontend).
fn send_message_to_parent<T: Serialize>(message: &T) {
    #[cfg(target_arch = "wasm32")]
    {
        match serde_json::to_string(message) {
            Ok(json) => {
                if let Some(window) = window() {
                    if let Some(parent) = window.parent().ok().flatten() {
                        if let Err(e) = parent.post_message(&JsValue::from_str(&json), "*") {
                            error!("Failed to send message to parent: {:?}", e);
                        }
                    } else {
                        warn!("No parent window available for message transmission");
                    }
                } else {
                    error!("Window object not available");
                }
            }
            Err(e) => {
                error!("Failed to serialize message: {}", e);
            }
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    {
        // Native builds log outbound traffic instead of posting it.
        if let Ok(json) = serde_json::to_string(message) {
            debug!("rpc out: {json}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::coordinator::systems::CoordinatorPlugin;
    use crate::engine::field::dataset::InMemorySource;
    use crate::engine::field::test_fields;

    fn app_with_rpc() -> App {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins)
            .add_plugins(CoordinatorPlugin)
            .add_event::<LoadCase>()
            .add_plugins(WebRpcPlugin);
        app.world_mut()
            .resource_mut::<RenderPipeline>()
            .load_dataset(&InMemorySource::new(test_fields::distance_dataset(
                9, "unit",
            )))
            .unwrap();
        app
    }

    fn send_request(app: &mut App, method: &str, params: serde_json::Value) {
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });
        app.world_mut().send_event(IncomingRpcMessage {
            content: request.to_string(),
        });
    }

    #[test]
    fn threshold_request_reaches_the_pipeline() {
        let mut app = app_with_rpc();
        send_request(&mut app, "set_threshold", serde_json::json!({"value": 3.0}));
        app.update();

        let pipeline = app.world().resource::<RenderPipeline>();
        assert_eq!(pipeline.params().threshold, 3.0);
    }

    #[test]
    fn register_probe_round_trip() {
        let mut app = app_with_rpc();
        send_request(
            &mut app,
            "register_probe",
            serde_json::json!({"point": [4.0, 4.0, 4.0]}),
        );
        app.update();

        let pipeline = app.world().resource::<RenderPipeline>();
        assert_eq!(
            pipeline
                .probe_history(ProbeHandle(0))
                .map(|h| h.count()),
            Some(0)
        );
    }

    #[test]
    fn malformed_params_are_rejected_without_state_change() {
        let mut app = app_with_rpc();
        let before = app.world().resource::<RenderPipeline>().params().threshold;

        send_request(
            &mut app,
            "set_threshold",
            serde_json::json!({"wrong": true}),
        );
        // Out of the observed range: rejected, not clamped
        send_request(
            &mut app,
            "set_threshold",
            serde_json::json!({"value": 1000.0}),
        );
        send_request(
            &mut app,
            "set_opacity",
            serde_json::json!({"value": 7.0}),
        );
        app.update();

        let pipeline = app.world().resource::<RenderPipeline>();
        assert_eq!(pipeline.params().threshold, before);
        assert_eq!(
            pipeline.params().opacity,
            constants::render_settings::DEFAULT_SHELL_OPACITY
        );
    }

    #[test]
    fn snapshot_notifications_publish_once_per_serial() {
        let mut app = app_with_rpc();
        app.update();
        // The outbound queue drains within the same frame on native builds;
        // what matters is that repeated idle frames queue nothing new
        app.update();
        let rpc = app.world().resource::<WebRpcInterface>();
        assert!(rpc.outgoing_notifications.is_empty());
    }
}
