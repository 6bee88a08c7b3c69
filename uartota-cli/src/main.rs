//! uartota CLI - Command-line tool for uploading firmware over a serial OTA link.
//!
//! ## Features
//!
//! - Reset the target through RTS/DTR and handshake with its OTA receiver
//! - Stream a firmware image in acknowledged chunks with a progress bar
//! - Report the failing phase and any device output on error
//! - Environment variable and config file defaults

use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use uartota::{
    DEFAULT_BAUD, Error as OtaError, FirmwareImage, NativePort, SerialConfig, SystemClock,
    UploadSession, describe_received,
};

mod config;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Errors raised by the CLI itself, classified for the exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Missing or inconsistent arguments.
    #[error("{0}")]
    Usage(String),
    /// Cancelled by the user.
    #[error("{0}")]
    Cancelled(String),
}

/// uartota - Upload firmware to a device over a serial OTA link.
///
/// Environment variables:
///   UARTOTA_PORT   - Default serial port
///   UARTOTA_BAUD   - Default baud rate (default: 2000000)
#[derive(Parser, Debug)]
#[command(name = "uartota")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Serial port connected to the device (e.g. /dev/ttyUSB0, COM3).
    #[arg(short, long, env = "UARTOTA_PORT")]
    port: Option<String>,

    /// Firmware image to upload.
    #[arg(short, long, value_name = "PATH")]
    file: PathBuf,

    /// Baud rate [default: 2000000].
    #[arg(short, long, env = "UARTOTA_BAUD")]
    baud: Option<u32>,

    /// Path to a configuration file.
    #[arg(long = "config", value_name = "PATH")]
    config_path: Option<PathBuf>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();

    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "uartota v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    uartota::set_interrupt_checker(was_interrupted);

    if let Err(err) = cmd_upload(&cli) {
        report_error(&err);
        std::process::exit(exit_code_for(&err));
    }
}

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Operation cancelled".to_string()).into())
    } else {
        Ok(())
    }
}

/// Pick port and baud rate. Arguments and environment beat config files.
fn resolve_connection(cli: &Cli, config: &Config) -> Result<(String, u32)> {
    let port = cli
        .port
        .clone()
        .or_else(|| config.connection.port.clone())
        .ok_or_else(|| {
            CliError::Usage(
                "No serial port given; use --port, UARTOTA_PORT or a config file".to_string(),
            )
        })?;
    let baud = cli
        .baud
        .or(config.connection.baud)
        .unwrap_or(DEFAULT_BAUD);
    Ok((port, baud))
}

/// Upload command implementation.
fn cmd_upload(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    // The image is checked before the port is touched
    let image = FirmwareImage::from_file(&cli.file)
        .with_context(|| format!("Failed to load firmware {}", cli.file.display()))?;
    if !cli.quiet {
        eprintln!(
            "{} Loaded {} ({} bytes, {} chunks, CRC 0x{:04X})",
            style("📦").cyan(),
            cli.file.display(),
            image.len(),
            image.chunk_count(),
            image.crc16()
        );
    }

    let (port_name, baud) = resolve_connection(cli, &config)?;
    ensure_not_interrupted()?;

    let port = NativePort::open(&SerialConfig::new(&port_name, baud))
        .with_context(|| format!("Failed to open serial port {port_name}"))?;
    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            port_name,
            baud
        );
        eprintln!("{} Resetting device...", style("🔄").cyan());
    }

    // From here on the session owns the port and closes it when dropped
    let mut session = UploadSession::connect(port, SystemClock)?;
    if let Err(err) = ensure_not_interrupted() {
        let _ = session.close();
        return Err(err);
    }

    if !cli.quiet {
        eprintln!("{} Waiting for device...", style("⏳").yellow());
    }
    match session.sync() {
        Ok(hello) => {
            if !cli.quiet {
                eprintln!("{} Connected: {}", style("✓").green(), hello.message);
            }
        },
        Err(err) => {
            let _ = session.close();
            return Err(err.into());
        },
    }

    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(100);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let result = session.run(image.data(), |p| {
        pb.set_message(format!("chunk {}/{}", p.chunks_done, p.chunks_total));
        pb.set_position(u64::from(p.percent()));
    });

    let report = match result {
        Ok(report) => report,
        Err(err) => {
            pb.abandon();
            let _ = session.close();
            return Err(err.into());
        },
    };
    pb.finish_with_message("done");

    session
        .close()
        .context("Failed to close serial port")?;

    if !cli.quiet {
        eprintln!(
            "\n{} Upload complete: {} bytes in {} chunks. Device says: {}",
            style("🎉").green().bold(),
            report.bytes_sent,
            report.chunks,
            report.end_message
        );
    }

    Ok(())
}

/// Print an error with the failing phase and whatever the device said.
fn report_error(err: &anyhow::Error) {
    let label = style("Error:").red().bold();
    let Some((ota, phase)) = err
        .downcast_ref::<OtaError>()
        .and_then(|ota| ota.phase().map(|phase| (ota, phase)))
    else {
        eprintln!("{label} {err:#}");
        return;
    };

    eprintln!("{label} {} failed: {ota}", style(phase).yellow());
    if let OtaError::Timeout { received, .. } = ota {
        if received.is_empty() {
            eprintln!("  No data received from device");
        } else {
            eprintln!("  Device output: {}", describe_received(received));
        }
    }
}

/// Map an error to the process exit code.
///
/// 1 generic failure, 2 usage, 4 port could not be opened, 130 cancelled.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 130,
        };
    }
    match err.downcast_ref::<OtaError>() {
        Some(OtaError::Interrupted) => 130,
        Some(OtaError::Serial(_)) => 4,
        _ => 1,
    }
}
