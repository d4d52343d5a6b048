use clap::Args;

use service::{Service, ServiceConfig};

#[derive(Args, Debug, Clone)]
pub struct Run;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait::async_trait]
impl crate::op::Op for Run {
    type Error = RunError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let config = ServiceConfig::from_settings(&ctx.settings);
        let service = Service::start(config).await;

        tracing::info!("dockhand service running; press ctrl-c to stop");
        tokio::signal::ctrl_c().await?;

        service.shutdown().await;
        Ok("service stopped".to_string())
    }
}
