//! safesend: end-to-end encrypted file sharing client
//!
//! Commands:
//!   upload <file>             - encrypt locally, store ciphertext, print the link
//!   download <link> [-o path] - fetch and decrypt the file a link points at
//!   bucket-policy             - print the bucket lifecycle and CORS rules as JSON
//!   config show               - display current configuration

mod client;
mod flow;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use safesend_core::config::SafesendConfig;
use safesend_core::SafesendError;
use safesend_crypto::EnvelopeParams;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::{BrokerClient, GrantTransport};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "safesend",
    version,
    about = "SafeSend encrypted file sharing client",
    long_about = "safesend: encrypt a file locally and share it through a single link"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(
        long,
        short = 'c',
        env = "SAFESEND_CONFIG",
        default_value = "/etc/safesend/config.toml"
    )]
    config: PathBuf,

    /// Log level for diagnostics on stderr
    #[arg(long, env = "SAFESEND_LOG", default_value = "warn")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt and upload a file, then print its shareable link
    ///
    /// The link is the only way to decrypt the file. Anyone holding it can.
    Upload {
        /// Local file to share
        file: PathBuf,
        /// Filename stored as (unencrypted) object metadata; defaults to the file's name
        #[arg(long)]
        name: Option<String>,
        /// Do not send any filename to the broker
        #[arg(long, conflicts_with = "name")]
        no_name: bool,
    },

    /// Download and decrypt the file behind a shareable link
    Download {
        /// The full link, including the #fragment
        link: String,
        /// Output path (default: derived from the object key)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Overwrite the output file if it exists
        #[arg(long)]
        force: bool,
    },

    /// Print the storage lifecycle and CORS rules for the bucket
    #[command(name = "bucket-policy")]
    BucketPolicy,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log);
    let config = SafesendConfig::load(&cli.config)?;

    match cli.command {
        Commands::Upload {
            file,
            name,
            no_name,
        } => cmd_upload(&config, &file, name, no_name).await,
        Commands::Download {
            link,
            output,
            force,
        } => cmd_download(&config, &link, output.as_deref(), force).await,
        Commands::BucketPolicy => cmd_bucket_policy(&config),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

// ── Progress helpers ──────────────────────────────────────────────────────────

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}") {
        pb.set_style(style);
    }
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Turn a flow error into the message the user should act on.
fn explain(err: SafesendError, action: &str) -> anyhow::Error {
    match err {
        SafesendError::Decryption => anyhow::anyhow!("wrong or corrupted link"),
        SafesendError::OriginRejected => anyhow::anyhow!(
            "the broker does not accept this client's origin; check client.origin"
        ),
        e @ SafesendError::Storage { .. } => {
            anyhow::anyhow!("{e}\nno data was {action}; run the command again for a fresh grant")
        }
        other => anyhow::Error::from(other),
    }
}

// ── `safesend upload` ─────────────────────────────────────────────────────────

async fn cmd_upload(
    config: &SafesendConfig,
    file: &Path,
    name: Option<String>,
    no_name: bool,
) -> Result<()> {
    let plaintext = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;

    let filename = if no_name {
        None
    } else {
        name.or_else(|| {
            file.file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
    };

    let broker = BrokerClient::new(&config.client.broker_url, &config.client.origin)?;
    let transport = GrantTransport::new()?;
    let params = EnvelopeParams::from_config(&config.crypto);

    let pb = make_spinner("upload");
    pb.set_message(format!(
        "encrypting and uploading {} ({})",
        file.display(),
        fmt_bytes(plaintext.len() as u64)
    ));

    let result = flow::upload(
        &broker,
        &transport,
        &plaintext,
        filename.as_deref(),
        &params,
        &config.client.origin,
    )
    .await;

    let outcome = match result {
        Ok(o) => o,
        Err(e) => {
            pb.finish_and_clear();
            return Err(explain(e, "shared"));
        }
    };
    pb.finish_with_message(format!("done ({} stored)", fmt_bytes(outcome.ciphertext_bytes)));

    println!();
    println!("Share this link. It is the only way to decrypt the file:");
    println!("{}", outcome.link());
    Ok(())
}

// ── `safesend download` ───────────────────────────────────────────────────────

async fn cmd_download(
    config: &SafesendConfig,
    link: &str,
    output: Option<&Path>,
    force: bool,
) -> Result<()> {
    let broker = BrokerClient::new(&config.client.broker_url, &config.client.origin)?;
    let transport = GrantTransport::new()?;

    let pb = make_spinner("download");
    pb.set_message("fetching and decrypting");

    let result = flow::download(&broker, &transport, link, config.storage.max_payload_bytes).await;
    let (locator, plaintext) = match result {
        Ok(r) => r,
        Err(e) => {
            pb.finish_and_clear();
            return Err(explain(e, "written"));
        }
    };

    let dest = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_output_name(locator.as_str()));
    if dest.exists() && !force {
        pb.finish_and_clear();
        anyhow::bail!(
            "{} already exists; pass --force or choose another path with -o",
            dest.display()
        );
    }
    tokio::fs::write(&dest, &plaintext)
        .await
        .with_context(|| format!("writing {}", dest.display()))?;

    pb.finish_with_message("done");
    println!(
        "Saved {} ({})",
        dest.display(),
        fmt_bytes(plaintext.len() as u64)
    );
    Ok(())
}

/// `uploads/1700000000000-ab12.enc` → `1700000000000-ab12`
fn default_output_name(locator: &str) -> PathBuf {
    let base = locator.rsplit('/').next().unwrap_or(locator);
    let stem = base.strip_suffix(".enc").unwrap_or(base);
    if stem.is_empty() || stem == "." || stem == ".." {
        PathBuf::from("safesend-download")
    } else {
        PathBuf::from(stem)
    }
}

// ── `safesend bucket-policy` ──────────────────────────────────────────────────

fn cmd_bucket_policy(config: &SafesendConfig) -> Result<()> {
    let doc = serde_json::json!({
        "lifecycle": safesend_storage::policy::lifecycle_document(config),
        "cors": safesend_storage::policy::cors_document(config),
    });
    let rendered = serde_json::to_string_pretty(&doc).context("rendering bucket policy")?;
    println!("{rendered}");
    Ok(())
}

// ── `safesend config show` ────────────────────────────────────────────────────

fn cmd_config_show(config: &SafesendConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!(
            "# Configuration: defaults (no file at {})",
            config_path.display()
        );
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_name() {
        assert_eq!(
            default_output_name("uploads/1700000000000-ab12.enc"),
            PathBuf::from("1700000000000-ab12")
        );
        assert_eq!(default_output_name("uploads/..enc"), PathBuf::from("safesend-download"));
        assert_eq!(default_output_name("plain"), PathBuf::from("plain"));
    }

    #[test]
    fn test_fmt_bytes() {
        assert_eq!(fmt_bytes(512), "512 B");
        assert_eq!(fmt_bytes(2048), "2.0 KB");
        assert_eq!(fmt_bytes(100 * 1024 * 1024), "100.0 MB");
    }

    #[test]
    fn test_explain_decryption_is_link_problem() {
        let msg = explain(SafesendError::Decryption, "written").to_string();
        assert_eq!(msg, "wrong or corrupted link");
        let msg = explain(SafesendError::storage(Some(403), "expired"), "written").to_string();
        assert!(msg.contains("403"));
        assert!(msg.contains("fresh grant"));
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "safesend",
            "download",
            "https://host/download?fileKey=a&serverSecret=b#c",
            "-o",
            "out.bin",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Download { .. }));
        assert!(Cli::try_parse_from(["safesend", "upload", "f", "--name", "x", "--no-name"]).is_err());
    }

    #[test]
    fn test_config_show_with_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[client]\norigin = \"https://send.example.com\"\n").unwrap();
        let config = SafesendConfig::load(&path).unwrap();
        assert_eq!(config.client.origin, "https://send.example.com");
        assert!(cmd_config_show(&config, &path).is_ok());
        assert!(cmd_bucket_policy(&config).is_ok());
    }
}
