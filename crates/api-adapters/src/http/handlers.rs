use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, StatusCode, Uri};
use bytes::Bytes;
use services::ReportRequest;

use super::AppState;

/// Set by the GeoIP-aware proxy in front of the collector.
static GEOIP_COUNTRY_CODE: HeaderName = HeaderName::from_static("geoip_country_code");

pub(super) async fn report_by_path(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    let plugin = crate::plugin_from_path(uri.path());
    respond(&state, plugin, &headers, &body).await
}

pub(super) async fn report_by_query(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    let plugin = crate::plugin_from_query(uri.query());
    respond(&state, plugin, &headers, &body).await
}

/// Every outcome, errors included, is a 200 with one text line.
async fn respond(
    state: &AppState,
    plugin: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
) -> (StatusCode, String) {
    let body = String::from_utf8_lossy(body);
    let country = headers
        .get(&GEOIP_COUNTRY_CODE)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty());

    let line = state
        .reports
        .handle(ReportRequest {
            plugin,
            body: &body,
            country,
        })
        .await;

    (StatusCode::OK, format!("{line}\n"))
}
