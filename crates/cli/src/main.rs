use anyhow::Context;
use clap::{Parser, Subcommand};
use laudo_certificates::{CertificateAnalyzer, DevCertificate};
use laudo_signing::{inspect_signature, SignerMetadata, SigningEngine, DEFAULT_RESERVE_BYTES};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "laudo")]
#[command(about = "Laudo certificate and signature tools")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the certificate details of a PKCS#12 file
    Inspect {
        /// PKCS#12 container (.p12 / .pfx)
        pkcs12: PathBuf,
        /// Container password
        #[arg(long)]
        password: String,
    },
    /// Issue a self-signed physician certificate for development
    IssueDevCert {
        /// Physician full name
        name: String,
        /// CRM registration, e.g. "CRM-SP 123456"
        crm: String,
        /// Container password
        #[arg(long)]
        password: String,
        /// Validity in days
        #[arg(long, default_value_t = 365)]
        days: i64,
        /// Output file
        #[arg(long)]
        out: PathBuf,
    },
    /// Sign a PDF with a PKCS#12 certificate
    Sign {
        /// Unsigned PDF
        pdf: PathBuf,
        /// PKCS#12 container
        pkcs12: PathBuf,
        /// Container password
        #[arg(long)]
        password: String,
        /// Signature reason
        #[arg(long, default_value = "Laudo médico")]
        reason: String,
        /// Signature location
        #[arg(long, default_value = "Brasil")]
        location: String,
        /// Output file
        #[arg(long)]
        out: PathBuf,
    },
    /// Check the embedded signature of a PDF
    Verify {
        /// Signed PDF
        pdf: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Inspect { pkcs12, password }) => {
            let bytes = read(&pkcs12)?;
            let info = CertificateAnalyzer::new().analyze(&bytes, &password)?;
            println!("Subject:     {}", info.subject);
            println!("Issuer:      {}", info.issuer);
            println!("Serial:      {}", info.serial_number);
            println!("Valid from:  {}", info.not_before);
            println!("Valid until: {}", info.not_after);
            println!("Algorithm:   {}", info.signature_algorithm);
            if let Some(bits) = info.key_size {
                println!("Key size:    {bits}");
            }
            println!("Fingerprint: {}", info.fingerprint);
            if info.is_expired_at(chrono::Utc::now()) {
                println!("Certificate is EXPIRED");
            }
        }
        Some(Commands::IssueDevCert {
            name,
            crm,
            password,
            days,
            out,
        }) => {
            let pkcs12 = DevCertificate::valid_for_days(&name, &crm, days).to_pkcs12(&password)?;
            std::fs::write(&out, pkcs12).with_context(|| format!("writing {}", out.display()))?;
            println!("Wrote development certificate for {name} to {}", out.display());
        }
        Some(Commands::Sign {
            pdf,
            pkcs12,
            password,
            reason,
            location,
            out,
        }) => {
            let document = read(&pdf)?;
            let container = read(&pkcs12)?;
            let subject = CertificateAnalyzer::new()
                .analyze(&container, &password)
                .map(|info| info.subject)
                .unwrap_or_default();
            let metadata = SignerMetadata {
                name: subject,
                reason,
                location,
                contact_info: None,
            };
            let signed = SigningEngine::new(DEFAULT_RESERVE_BYTES).sign(
                &document,
                &container,
                &password,
                &metadata,
            )?;
            std::fs::write(&out, &signed.bytes)
                .with_context(|| format!("writing {}", out.display()))?;
            println!(
                "Signed by {} using the {} password variant; wrote {}",
                signed.signer_subject,
                signed.variant,
                out.display()
            );
        }
        Some(Commands::Verify { pdf }) => {
            let document = read(&pdf)?;
            let inspection = inspect_signature(&document)?;
            println!("Byte range:        {:?}", inspection.byte_range);
            println!("Covers whole file: {}", inspection.covers_whole_file);
            println!("Digest matches:    {}", inspection.digest_matches());
            if inspection.is_valid() {
                println!("Signature OK");
            } else {
                anyhow::bail!("signature does not cover the document");
            }
        }
        None => {
            println!("Use 'laudo --help' for commands");
        }
    }

    Ok(())
}

fn read(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}
