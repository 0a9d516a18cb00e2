//! Observability for the Audio Session Controller.
//!
//! Operations are instrumented with `#[instrument(skip_all)]` and an explicit
//! allow-list of identifier fields. Metric labels are bounded (see
//! [`metrics`]).
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `asc_sessions_active` | Gauge | none |
//! | `asc_sessions_created_total` | Counter | `mode` |
//! | `asc_worker_assignments_total` | Counter | `worker_id` |
//! | `asc_engine_errors_total` | Counter | `operation` |
//! | `asc_participant_operations_total` | Counter | `operation`, `status` |
//! | `asc_playback_actions_total` | Counter | `action` |
//! | `asc_operation_duration_seconds` | Histogram | `operation` |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState, Readiness};
pub use metrics::init_metrics_recorder;
