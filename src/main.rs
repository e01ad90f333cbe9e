use anyhow::Context;
use api_rest::backend::Backend;
use api_rest::{demo, router};
use laudo_core::CoreSettings;
use laudo_crypto::{AesGcmFieldCodec, FieldCodec, FieldKey};
use laudo_storage::{HmacUrlSigner, LegacyStore, S3UrlSigner, UrlSigner};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::ObjectStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the laudo application
///
/// Resolves configuration from the environment, wires the report service and serves the REST API.
///
/// # Environment Variables
/// - `LAUDO_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `LAUDO_PUBLIC_BASE_URL`: base URL for verification links and QR codes
/// - `LAUDO_FIELD_KEY`: base64 AES-256 key for encrypted fields; generated when absent
/// - `LAUDO_CERTIFICATE_DIR`: directory for encrypted certificate containers (default: "./certificados")
/// - `LAUDO_S3_BUCKET`: primary bucket; credentials and region come from the usual `AWS_*` variables
/// - `LAUDO_URL_SIGNING_SECRET`: HMAC secret for `/arquivos` links, required without `LAUDO_S3_BUCKET`
/// - `LAUDO_LEGACY_DIR` and `LAUDO_LEGACY_PUBLIC_URL`: optional legacy store and its public base URL
/// - `LAUDO_EXPOSE_ERROR_DETAIL`: include internal error detail in responses (development only)
/// - `LAUDO_SEED_DEMO`: seed one clinic, physician, patient and exam
///
/// # Returns
/// * `Ok(())` - If the server starts and runs successfully
/// * `Err(anyhow::Error)` - If configuration is invalid or the server fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("laudo=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr: SocketAddr = env_or("LAUDO_REST_ADDR", "0.0.0.0:3000").parse()?;
    let public_base_url = env_or("LAUDO_PUBLIC_BASE_URL", "http://localhost:3000");

    let field_key = match std::env::var("LAUDO_FIELD_KEY") {
        Ok(encoded) => FieldKey::from_base64(&encoded).context("LAUDO_FIELD_KEY")?,
        Err(_) => {
            let key = FieldKey::generate();
            tracing::warn!(
                "LAUDO_FIELD_KEY not set; using a generated key, encrypted data will be unreadable after restart"
            );
            key
        }
    };
    let codec: Arc<dyn FieldCodec> = Arc::new(AesGcmFieldCodec::new(&field_key));

    let certificate_dir = PathBuf::from(env_or("LAUDO_CERTIFICATE_DIR", "./certificados"));
    std::fs::create_dir_all(&certificate_dir)
        .with_context(|| format!("creating {}", certificate_dir.display()))?;

    let (primary, url_signer, link_verifier) = match std::env::var("LAUDO_S3_BUCKET") {
        Ok(bucket) => {
            let s3 = Arc::new(
                AmazonS3Builder::from_env()
                    .with_bucket_name(&bucket)
                    .build()
                    .context("configuring S3 primary store")?,
            );
            tracing::info!(bucket = %bucket, "primary store: S3");
            let signer: Arc<dyn UrlSigner> = Arc::new(S3UrlSigner::new(s3.clone()));
            (s3 as Arc<dyn ObjectStore>, signer, None)
        }
        Err(_) => {
            let secret = std::env::var("LAUDO_URL_SIGNING_SECRET")
                .context("LAUDO_URL_SIGNING_SECRET is required when LAUDO_S3_BUCKET is not set")?;
            let signer = Arc::new(HmacUrlSigner::new(secret.as_bytes(), &public_base_url)?);
            tracing::warn!("LAUDO_S3_BUCKET not set; primary store is in memory");
            let primary: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
            (primary, signer.clone() as Arc<dyn UrlSigner>, Some(signer))
        }
    };

    let legacy = match std::env::var("LAUDO_LEGACY_DIR") {
        Ok(dir) => {
            let public_url = std::env::var("LAUDO_LEGACY_PUBLIC_URL")
                .context("LAUDO_LEGACY_PUBLIC_URL is required with LAUDO_LEGACY_DIR")?;
            std::fs::create_dir_all(&dir).with_context(|| format!("creating {dir}"))?;
            let store = LocalFileSystem::new_with_prefix(&dir)
                .with_context(|| format!("opening legacy store at {dir}"))?;
            tracing::info!(dir = %dir, "legacy store enabled");
            Some(LegacyStore::new(Arc::new(store), &public_url))
        }
        Err(_) => None,
    };

    let (state, repo) = Backend {
        settings: CoreSettings {
            public_base_url,
            expose_error_detail: env_flag("LAUDO_EXPOSE_ERROR_DETAIL"),
            ..CoreSettings::default()
        },
        codec: codec.clone(),
        primary,
        legacy,
        url_signer,
        link_verifier,
        certificate_dir,
    }
    .in_memory()?;

    if env_flag("LAUDO_SEED_DEMO") {
        demo::seed(&repo, codec.as_ref()).await?;
    }

    tracing::info!("++ Starting laudo REST on {}", rest_addr);
    let listener = tokio::net::TcpListener::bind(rest_addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

