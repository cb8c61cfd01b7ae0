//! Statement spans.
//!
//! One `db.query` span is opened per statement attempt. It becomes a child of
//! whatever span is current when the statement starts, so database spans nest
//! under request spans from the web framework's tracing middleware.
//!
//! | Field | Recorded |
//! |-------|----------|
//! | `otel.name` | at start (`SQL: SELECT`, …) |
//! | `otel.kind` | at start (`client`) |
//! | `service.name` | at start |
//! | `db.host`, `db.database`, `db.user` | at start (routed endpoint) |
//! | `query` | at start (normalized text) |
//! | `query.time`, `db.duration_ms` | at finish |
//! | `otel.status_code` | at finish (`OK` / `ERROR`) |
//! | `error`, `error.message` | on failure |

use std::fmt::Display;
use std::time::Duration;

use tracing::{field, Span};

use crate::parser::StatementKind;
use crate::routing::EndpointIdentity;

/// Open the span for a statement attempt.
pub(crate) fn start(
    service: &str,
    kind: StatementKind,
    endpoint: &EndpointIdentity,
    query: &str,
) -> Span {
    tracing::info_span!(
        "db.query",
        otel.name = kind.span_name(),
        otel.kind = "client",
        service.name = %service,
        db.host = %endpoint.host,
        db.database = %endpoint.database,
        db.user = %endpoint.user,
        query = %query,
        query.time = field::Empty,
        db.duration_ms = field::Empty,
        otel.status_code = field::Empty,
        error = field::Empty,
        error.message = field::Empty,
    )
}

fn record_elapsed(span: &Span, elapsed: Duration) {
    span.record("query.time", field::debug(elapsed));
    span.record("db.duration_ms", elapsed.as_millis() as i64);
}

/// Record timing on a successful statement and close its span.
pub(crate) fn finish_ok(span: Span, elapsed: Duration) {
    record_elapsed(&span, elapsed);
    span.record("otel.status_code", "OK");
}

/// Record timing and the error on a failed statement and close its span.
pub(crate) fn finish_err(span: Span, elapsed: Duration, err: &dyn Display) {
    record_elapsed(&span, elapsed);
    span.record("otel.status_code", "ERROR");
    span.record("error", true);
    span.record("error.message", field::display(err));
    tracing::error!(parent: &span, error = %err, "Database query failed");
}
