use std::net::SocketAddr;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{info, warn};

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the process-wide Prometheus recorder once. With `listen` set the
/// samples are also served over HTTP; must then run inside a tokio runtime.
pub fn init_metrics(listen: Option<SocketAddr>) -> Result<()> {
    if HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = match listen {
        Some(addr) => {
            let (recorder, exporter) = PrometheusBuilder::new()
                .with_http_listener(addr)
                .build()
                .context("failed to build metrics exporter")?;
            let handle = recorder.handle();
            if metrics::set_global_recorder(recorder).is_err() {
                warn!("a metrics recorder is already installed");
                return Ok(());
            }
            tokio::spawn(async move {
                if let Err(_err) = exporter.await {
                    // ExporterError (metrics-exporter-prometheus 0.15) implements neither Debug nor Display.
                    warn!("metrics endpoint stopped");
                }
            });
            info!(address = %addr, "serving metrics");
            handle
        }
        None => match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(err) => {
                warn!(error = %err, "a metrics recorder is already installed");
                return Ok(());
            }
        },
    };

    let _ = HANDLE.set(handle);
    Ok(())
}

/// Current samples in the Prometheus text format; empty before [`init_metrics`].
pub fn render_metrics() -> String {
    HANDLE.get().map(|h| h.render()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recorded_counters_are_rendered() {
        init_metrics(None).unwrap();
        init_metrics(None).unwrap();

        metrics::counter!("gitden_exporter_test_total").increment(2);

        let rendered = render_metrics();
        assert!(
            rendered
                .lines()
                .any(|line| line == "gitden_exporter_test_total 2"),
            "{rendered}"
        );
    }
}
