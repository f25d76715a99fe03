// HDHomeRun emulation documents consumed by Plex, Emby and friends.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

const MODEL_NUMBER: &str = "HDTC-2US";
const FIRMWARE_NAME: &str = "hdhomeruntc_atsc";
const FIRMWARE_VERSION: &str = "20250101";

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Discover {
    friendly_name: String,
    manufacturer: String,
    model_number: String,
    firmware_name: String,
    tuner_count: u64,
    firmware_version: String,
    #[serde(rename = "DeviceID")]
    device_id: String,
    device_auth: String,
    #[serde(rename = "BaseURL")]
    base_url: String,
    #[serde(rename = "LineupURL")]
    lineup_url: String,
}

pub async fn discover(State(state): State<AppState>) -> Json<impl Serialize> {
    let base = state.config.base_url();
    Json(Discover {
        friendly_name: "vTuner".to_string(),
        manufacturer: "vTuner".to_string(),
        model_number: MODEL_NUMBER.to_string(),
        firmware_name: FIRMWARE_NAME.to_string(),
        tuner_count: state.tuner_total(),
        firmware_version: FIRMWARE_VERSION.to_string(),
        device_id: state.device_id.clone(),
        device_auth: "vtuner".to_string(),
        lineup_url: format!("{base}/lineup.json"),
        base_url: base,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LineupItem {
    guide_number: String,
    guide_name: String,
    #[serde(rename = "URL")]
    url: String,
}

pub async fn lineup(State(state): State<AppState>) -> Json<Vec<LineupItem>> {
    let base = state.config.base_url();
    let items = state
        .lineup
        .snapshot()
        .into_iter()
        .map(|(key, entry)| LineupItem {
            guide_number: entry.guide_number,
            guide_name: entry.guide_name,
            url: format!("{base}/stream/{key}"),
        })
        .collect();
    Json(items)
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct LineupStatus {
    scan_in_progress: u8,
    scan_possible: u8,
    source: String,
    source_list: Vec<String>,
}

pub async fn lineup_status() -> Json<impl Serialize> {
    Json(LineupStatus {
        scan_in_progress: 0,
        scan_possible: 1,
        source: "Cable".to_string(),
        source_list: vec!["Cable".to_string()],
    })
}

#[derive(Serialize)]
#[serde(rename = "root")]
struct DeviceDescription {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    #[serde(rename = "URLBase")]
    url_base: String,
    #[serde(rename = "specVersion")]
    spec_version: SpecVersion,
    device: Device,
}

#[derive(Serialize)]
struct SpecVersion {
    major: u8,
    minor: u8,
}

#[derive(Serialize)]
struct Device {
    #[serde(rename = "deviceType")]
    device_type: &'static str,
    #[serde(rename = "friendlyName")]
    friendly_name: String,
    manufacturer: &'static str,
    #[serde(rename = "modelName")]
    model_name: &'static str,
    #[serde(rename = "modelNumber")]
    model_number: &'static str,
    #[serde(rename = "serialNumber")]
    serial_number: String,
    #[serde(rename = "UDN")]
    udn: String,
}

pub async fn device_xml(State(state): State<AppState>) -> AppResult<Response> {
    let doc = DeviceDescription {
        xmlns: "urn:schemas-upnp-org:device-1-0",
        url_base: state.config.base_url(),
        spec_version: SpecVersion { major: 1, minor: 0 },
        device: Device {
            device_type: "urn:schemas-upnp-org:device:MediaServer:1",
            friendly_name: "vTuner".to_string(),
            manufacturer: "vTuner",
            model_name: MODEL_NUMBER,
            model_number: MODEL_NUMBER,
            serial_number: state.device_id.clone(),
            udn: format!("uuid:{}", state.device_id),
        },
    };
    let body = quick_xml::se::to_string(&doc).map_err(|e| {
        AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("device.xml: {e}"),
        )
    })?;
    Ok((
        [(header::CONTENT_TYPE, "application/xml; charset=utf-8")],
        format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>{body}"),
    )
        .into_response())
}

#[derive(Serialize)]
#[serde(rename = "capability")]
struct Capability {
    #[serde(rename = "deviceID")]
    device_id: String,
    #[serde(rename = "tunerCount")]
    tuner_count: u64,
}

pub async fn capability(State(state): State<AppState>) -> AppResult<Response> {
    let doc = Capability {
        device_id: state.device_id.clone(),
        tuner_count: state.tuner_total(),
    };
    let body = quick_xml::se::to_string(&doc).map_err(|e| {
        AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("capability: {e}"),
        )
    })?;
    Ok((
        [(header::CONTENT_TYPE, "application/xml; charset=utf-8")],
        format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>{body}"),
    )
        .into_response())
}
