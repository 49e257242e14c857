use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::metrics_exporter::{init_metrics, render_metrics};
use crate::ssh::SshServer;
use crate::supervisor::Supervisor;

/// Run the SSH git server in the foreground until SIGINT/SIGTERM or until
/// `shutdown` is cancelled.
pub async fn serve(config: Config, shutdown: CancellationToken) -> Result<()> {
    init_metrics(config.metrics_addr)?;
    let server = SshServer::bind(&config).await?;
    info!(
        address = %server.local_addr()?,
        repos = %config.repos_dir.display(),
        "gitden ready"
    );

    let mut supervisor = Supervisor::with_shutdown(shutdown);
    supervisor.spawn("ssh", move |shutdown| server.run(shutdown));
    let result = supervisor.run().await;
    debug!(metrics = %render_metrics(), "final metrics snapshot");
    result
}
