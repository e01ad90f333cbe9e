//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the REST API over in-memory stores with one seeded clinic, physician, patient and exam.
//!
//! ## Intended use
//! Development and debugging with the Swagger UI. Nothing survives a restart: artifacts live in
//! memory and certificates in a temporary directory. The workspace's main `laudo-run` binary
//! wires real stores from the environment.

use api_rest::backend::Backend;
use api_rest::{demo, router};
use laudo_core::CoreSettings;
use laudo_crypto::{AesGcmFieldCodec, FieldCodec, FieldKey};
use laudo_storage::HmacUrlSigner;
use object_store::memory::InMemory;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEV_LINK_SECRET: &[u8] = b"laudo-dev-link-secret";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("laudo=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("LAUDO_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let base_url = std::env::var("LAUDO_PUBLIC_BASE_URL")
        .unwrap_or_else(|_| "http://localhost:3000".into());

    let certificate_dir = std::env::temp_dir().join(format!("laudo-dev-{}", std::process::id()));
    std::fs::create_dir_all(&certificate_dir)?;

    let codec: Arc<dyn FieldCodec> = Arc::new(AesGcmFieldCodec::new(&FieldKey::generate()));
    let signer = Arc::new(HmacUrlSigner::new(DEV_LINK_SECRET, &base_url)?);

    let (state, repo) = Backend {
        settings: CoreSettings {
            public_base_url: base_url,
            expose_error_detail: true,
            ..CoreSettings::default()
        },
        codec: codec.clone(),
        primary: Arc::new(InMemory::new()),
        legacy: None,
        url_signer: signer.clone(),
        link_verifier: Some(signer),
        certificate_dir,
    }
    .in_memory()?;

    let seeded = demo::seed(&repo, codec.as_ref()).await?;
    tracing::info!(
        "++ Send x-user-id={} x-tenant-id={} to act as the demo physician",
        seeded.physician_id,
        seeded.tenant_id
    );

    tracing::info!("++ Starting laudo REST on {}", rest_addr);
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}
