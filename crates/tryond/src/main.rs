use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tryon_core::MeshEstimatorLoader;
use tryon_hw::Camera;

mod config;
mod dbus_interface;
mod engine;
mod overlay;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("tryond starting");

    let config = config::Config::from_env();
    tracing::info!(
        device = %config.camera_device,
        model_dir = %config.model_dir.display(),
        refine = config.refine_landmarks,
        mirrored = config.mirror_preview,
        "configuration loaded"
    );

    let loader = MeshEstimatorLoader::new(config.estimator_options());
    let device = config.camera_device.clone();
    let constraints = config.camera;
    let session = engine::Session::start(
        engine::SessionSettings::from_config(&config),
        loader,
        move || Camera::open(&device, &constraints)?.into_stream(),
    )
    .await;
    let session = Arc::new(session);

    let _conn = zbus::connection::Builder::session()?
        .name(dbus_interface::BUS_NAME)?
        .serve_at(
            dbus_interface::OBJECT_PATH,
            dbus_interface::StudioService::new(Arc::clone(&session)),
        )?
        .build()
        .await?;

    tracing::info!(bus = dbus_interface::BUS_NAME, "tryond ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("tryond shutting down");
    session.stop().await;

    Ok(())
}
