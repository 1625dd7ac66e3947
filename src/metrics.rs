//! Counters for auth, payment, tool and beacon activity.
//!
//! Counters go through the `metrics` facade and are no-ops until a recorder
//! is installed. With the `metrics` feature the gateway installs a
//! Prometheus recorder once per process and renders it at `GET /metrics`.

use telemetry_metrics::{counter, describe_counter};

/// Requests refused by the auth dispatcher, labelled by `reason`
pub const AUTH_REJECTIONS: &str = "tollgate_auth_rejections_total";
/// Payment attempts, labelled by `tool` and `outcome`
pub const PAYMENTS: &str = "tollgate_payments_total";
/// Tool invocations, labelled by `tool` and `outcome`
pub const TOOL_CALLS: &str = "tollgate_tool_calls_total";
/// Beacon flush attempts, labelled by `outcome`
pub const BEACON_FLUSHES: &str = "tollgate_beacon_flushes_total";

/// Register metric descriptions with the installed recorder
pub fn describe() {
    describe_counter!(AUTH_REJECTIONS, "Requests rejected by authentication");
    describe_counter!(PAYMENTS, "Payment attempts for priced tools");
    describe_counter!(TOOL_CALLS, "Tool invocations");
    describe_counter!(BEACON_FLUSHES, "Usage beacon flush attempts");
}

pub(crate) fn auth_rejected(reason: &'static str) {
    counter!(AUTH_REJECTIONS, "reason" => reason).increment(1);
}

pub(crate) fn payment(tool: &str, outcome: &'static str) {
    counter!(PAYMENTS, "tool" => tool.to_string(), "outcome" => outcome).increment(1);
}

pub(crate) fn tool_call(tool: &str, outcome: &'static str) {
    counter!(TOOL_CALLS, "tool" => tool.to_string(), "outcome" => outcome).increment(1);
}

pub(crate) fn beacon_flush(outcome: &'static str) {
    counter!(BEACON_FLUSHES, "outcome" => outcome).increment(1);
}

#[cfg(feature = "metrics")]
mod exporter {
    use std::sync::OnceLock;

    use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

    static HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

    /// Install the Prometheus recorder (first call only) and return its handle.
    ///
    /// Returns `None` when another recorder already owns the global slot.
    pub fn prometheus() -> Option<PrometheusHandle> {
        HANDLE
            .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
                Ok(handle) => {
                    super::describe();
                    Some(handle)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Prometheus recorder not installed");
                    None
                }
            })
            .clone()
    }
}

#[cfg(feature = "metrics")]
pub use exporter::prometheus;
