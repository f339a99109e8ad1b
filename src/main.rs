use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sayonara_attest::crypto::{DeviceWipeCertificate, FileCertificate};
use sayonara_attest::ledger::LedgerStatus;
use sayonara_attest::{AttestError, AttestationService, EngineConfig};
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sayonara-attest")]
#[command(about = "Secure file erasure with signed, tamper-evident certificates")]
#[command(version = "1.0.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "WIPE_ATTEST_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the signing keypair if needed and print the public key
    Keys,

    /// Overwrite and delete a file, or every file below a mountpoint
    Wipe {
        /// File or mountpoint directory
        path: PathBuf,

        /// Number of random overwrite passes
        #[arg(short, long)]
        passes: Option<u32>,

        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Check whether a file still holds recoverable content
    Verify {
        path: PathBuf,

        /// SHA-256 of the file before it was wiped
        #[arg(long)]
        original_hash: Option<String>,
    },

    /// Check every file below a directory
    VerifyDir { path: PathBuf },

    /// Verify the signature of a file certificate JSON
    VerifyCert { path: PathBuf },

    /// Compare a stored device certificate with its tamper ledger entry
    LedgerVerify { cert_id: String },

    /// Register a stored device certificate whose registration failed
    LedgerRegister { cert_id: String },

    /// Inspect stored device certificates
    Certs {
        #[command(subcommand)]
        action: CertsAction,
    },
}

#[derive(Subcommand)]
enum CertsAction {
    /// List all device certificates
    List,
    /// Show one device certificate
    Show { cert_id: String },
    /// Store and register a device certificate from a degraded wipe
    Store {
        /// Certificate JSON as printed by `wipe`
        path: PathBuf,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    init_logging(cli.debug, cli.json_logs);
    setup_signal_handlers()?;

    let config = EngineConfig::load(cli.config.as_deref())?;
    tracing::debug!(?config, "Loaded configuration");
    let service = AttestationService::new(config)?;

    match cli.command {
        Commands::Keys => {
            service.ensure_keys()?;
            print!("{}", service.public_key_pem()?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Wipe { path, passes, yes } => {
            let passes = passes.unwrap_or(service.config().default_passes);
            wipe(&service, &path, passes, yes)
        }
        Commands::Verify {
            path,
            original_hash,
        } => {
            let report = service.verify_wipe(&path, original_hash.as_deref());
            print_json(&report)?;
            Ok(exit_code(report.verified))
        }
        Commands::VerifyDir { path } => {
            let report = service.verify_directory(&path);
            print_json(&report)?;
            Ok(exit_code(report.all_verified))
        }
        Commands::VerifyCert { path } => {
            let valid = service.verify_certificate_file(&path);
            let certificate = FileCertificate::from_json_file(&path).ok();
            print_json(&serde_json::json!({
                "path": path,
                "valid": valid,
                "certificate": certificate,
            }))?;
            Ok(exit_code(valid))
        }
        Commands::LedgerVerify { cert_id } => {
            let result = service.verify_stored_certificate(&cert_id);
            print_json(&result)?;
            Ok(exit_code(result.status == LedgerStatus::Verified))
        }
        Commands::LedgerRegister { cert_id } => {
            let entry = service.register_stored_certificate(&cert_id)?;
            print_json(&entry)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Certs { action } => {
            match action {
                CertsAction::List => print_json(&service.list_certificates()?)?,
                CertsAction::Show { cert_id } => match service.get_certificate(&cert_id)? {
                    Some(certificate) => print_json(&certificate)?,
                    None => {
                        eprintln!("No certificate with id {}", cert_id);
                        return Ok(ExitCode::FAILURE);
                    }
                },
                CertsAction::Store { path } => {
                    let certificate = read_device_certificate(&path)?;
                    print_json(&service.persist_certificate(&certificate)?)?;
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[derive(Serialize)]
struct WipeOutput<'a, T: Serialize> {
    status: &'static str,
    certificate: &'a T,
    degraded: Vec<String>,
}

fn wipe(service: &AttestationService, path: &Path, passes: u32, yes: bool) -> Result<ExitCode> {
    if !yes {
        let scope = if path.is_dir() {
            "EVERY FILE below"
        } else {
            "the file"
        };
        eprintln!(
            "This will overwrite {} {} with {} random pass(es) and delete it.",
            scope,
            path.display(),
            passes
        );
        eprint!("Type 'DESTROY' to confirm: ");
        io::stderr().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if input.trim() != "DESTROY" {
            eprintln!("Operation cancelled.");
            return Ok(ExitCode::FAILURE);
        }
    }

    let issued = match service.wipe(path, passes) {
        Ok(issued) => issued,
        Err(AttestError::Interrupted) => {
            eprintln!("Wipe interrupted. Files already started may be partially overwritten and were NOT deleted.");
            return Ok(ExitCode::from(130));
        }
        Err(e) => return Err(e).with_context(|| format!("Wipe of {} failed", path.display())),
    };

    let degraded: Vec<String> = issued.degraded.iter().map(ToString::to_string).collect();
    for warning in &degraded {
        eprintln!("warning: {}", warning);
    }

    print_json(&WipeOutput {
        status: if degraded.is_empty() { "success" } else { "degraded" },
        certificate: &issued.certificate,
        degraded,
    })?;
    Ok(ExitCode::SUCCESS)
}

fn read_device_certificate(path: &Path) -> Result<DeviceWipeCertificate> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&data)
        .with_context(|| format!("{} is not JSON", path.display()))?;

    // Accept both the bare certificate and the full `wipe` output
    let certificate = value.get("certificate").cloned().unwrap_or(value);
    serde_json::from_value(certificate)
        .with_context(|| format!("{} holds no device certificate", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn init_logging(debug: bool, json: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

// Signal handler for graceful shutdown
fn setup_signal_handlers() -> Result<()> {
    use signal_hook::{consts::SIGINT, iterator::Signals};

    let mut signals = Signals::new([SIGINT])?;

    std::thread::spawn(move || {
        for sig in signals.forever() {
            if sig == SIGINT {
                eprintln!("\nInterrupt received! Stopping after the current pass...");
                sayonara_attest::set_interrupted();
            }
        }
    });

    Ok(())
}
