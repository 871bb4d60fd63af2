//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render the `/metrics` endpoint. Call once at
/// startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Authenticated users currently online (gauge).
pub const USERS_ONLINE: &str = "relay_users_online";
/// Envelopes received (counter, labels: kind).
pub const MESSAGES_TOTAL: &str = "relay_messages_total";
/// Handler failures (counter, labels: kind, error_type).
pub const ERRORS_TOTAL: &str = "relay_errors_total";
/// Handler duration (histogram, labels: kind).
pub const HANDLER_DURATION_SECONDS: &str = "relay_handler_duration_seconds";
/// Frames dropped because a peer's outbound queue was full (counter).
pub const OUTBOUND_DROPS_TOTAL: &str = "relay_outbound_drops_total";
/// Sessions closed by a newer login for the same user (counter).
pub const EVICTIONS_TOTAL: &str = "relay_evictions_total";
/// Connections closed by the auth deadline (counter).
pub const AUTH_TIMEOUTS_TOTAL: &str = "relay_auth_timeouts_total";
/// Chat envelopes forwarded to an online recipient (counter).
pub const CHAT_DELIVERED_TOTAL: &str = "relay_chat_delivered_total";
