// Prometheus metrics for the cligate server
//
// Exposes metrics on the /metrics HTTP endpoint:
// - Commands handled per backend and outcome (counter)
// - Policy denials per backend and reason (counter)
// - Backend execution durations (histogram)
// - Executions holding a slot (gauge)
// - Version negotiations (counter)

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    // Gateway metrics
    pub static ref COMMANDS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cligate_commands_total", "Total number of commands handled"),
        &["program", "status"]
    ).expect("Failed to create commands total metric");

    pub static ref POLICY_DENIALS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cligate_policy_denials_total", "Total number of commands rejected by policy"),
        &["program", "reason"]
    ).expect("Failed to create policy denials metric");

    // Execution metrics
    pub static ref EXECUTION_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("cligate_execution_duration_seconds", "Backend run time in seconds")
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
        &["program"]
    ).expect("Failed to create execution duration metric");

    pub static ref ACTIVE_EXECUTIONS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("cligate_active_executions", "Commands holding an execution slot"),
        &["program"]
    ).expect("Failed to create active executions metric");

    pub static ref NEGOTIATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cligate_negotiations_total", "Successful API version negotiations"),
        &["program"]
    ).expect("Failed to create negotiations metric");
}

/// Register every metric with [`REGISTRY`]
///
/// Safe to call more than once.
pub fn init() -> prometheus::Result<()> {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(COMMANDS_TOTAL.clone()),
        Box::new(POLICY_DENIALS_TOTAL.clone()),
        Box::new(EXECUTION_DURATION_SECONDS.clone()),
        Box::new(ACTIVE_EXECUTIONS.clone()),
        Box::new(NEGOTIATIONS_TOTAL.clone()),
    ];
    for collector in collectors {
        match REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        assert!(init().is_ok());
        assert!(init().is_ok());
    }

    #[test]
    fn test_gateway_metrics_are_exported() {
        init().unwrap();
        COMMANDS_TOTAL.with_label_values(&["metrics-test", "success"]).inc();
        POLICY_DENIALS_TOTAL.with_label_values(&["metrics-test", "blocked"]).inc();

        let text = gather_metrics().unwrap();
        assert!(text.contains("cligate_commands_total"));
        assert!(text.contains("cligate_policy_denials_total"));
        assert!(text.contains("metrics-test"));
    }

    #[test]
    fn test_active_executions_gauge() {
        let gauge = ACTIVE_EXECUTIONS.with_label_values(&["gauge-test"]);
        gauge.inc();
        assert_eq!(gauge.get(), 1);
        gauge.dec();
        assert_eq!(gauge.get(), 0);
    }
}
