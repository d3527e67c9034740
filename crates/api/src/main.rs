use anyhow::Context;

use finback_infra::PlatformConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = PlatformConfig::from_env().context("invalid configuration")?;
    finback_observability::init_with(config.json_logs);

    let bind_addr = config.bind_addr;
    let app = finback_api::app::build_app(config);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
