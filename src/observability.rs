use std::net::SocketAddr;

use crate::api::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests executed. Labels: request, status.
pub const REQUESTS_TOTAL: &str = "visita_requests_total";

/// Histogram: request latency in seconds. Labels: request.
pub const REQUEST_DURATION_SECONDS: &str = "visita_request_duration_seconds";

/// Counter: appointments committed.
pub const BOOKINGS_TOTAL: &str = "visita_bookings_total";

/// Counter: bookings rejected on capacity.
pub const BOOKINGS_REJECTED_TOTAL: &str = "visita_bookings_rejected_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "visita_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "visita_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "visita_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "visita_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "visita_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Request variant to a short label for metrics.
pub fn request_label(req: &Request) -> &'static str {
    match req {
        Request::CreateVisit { .. } => "create_visit",
        Request::UpdateVisit { .. } => "update_visit",
        Request::DeleteVisit { .. } => "delete_visit",
        Request::AddSlot { .. } => "add_slot",
        Request::Book { .. } => "book",
        Request::Transition { .. } => "transition",
        Request::ListVisits => "list_visits",
        Request::ListSlots { .. } => "list_slots",
        Request::ListAvailableSlots { .. } => "list_available_slots",
        Request::ListAvailableDates { .. } => "list_available_dates",
        Request::ListAppointments { .. } => "list_appointments",
        Request::Watch { .. } => "watch",
    }
}
