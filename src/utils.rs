use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn pre_flight() -> color_eyre::Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .with(console_subscriber::spawn())
        .with(tracing_error::ErrorLayer::default())
        .init();
    color_eyre::install()?;

    Ok(())
}
