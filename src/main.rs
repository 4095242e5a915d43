use anyhow::Result;
use clap::Parser;
use dutwatch::{DutwatchConfig, TesterApp};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "dutwatch")]
#[command(about = "Video-driven test station for display devices under test")]
#[command(version)]
#[command(long_about = "Watches the video feed of a device under test, detects when its \
screen leaves the test pattern and when a sustained change appears, and drives the station \
lamps, alert flag and reset switch in response. Status is relayed for remote monitoring.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "dutwatch.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the station")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - wire components but don't start them
    #[arg(long, help = "Perform dry run - initialize components but don't start them")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// DUT identifier; a bare number N means "vidN"
    #[arg(long, value_name = "ID")]
    dut_id: Option<String>,

    /// Directory of frames or a video file to analyse
    #[arg(long, value_name = "PATH")]
    source: Option<PathBuf>,

    /// Seconds a change must persist before it raises an alert
    #[arg(long, value_name = "SECONDS")]
    frame_threshold: Option<f64>,

    /// Binarization threshold for the difference mask
    #[arg(long, value_name = "LEVEL")]
    threshold: Option<f64>,

    /// Configure and start the detector immediately instead of waiting for
    /// the orchestrator handshake
    #[arg(long)]
    no_handshake: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let log_guard = init_logging(&args)?;

    info!("Starting dutwatch v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let mut config = match DutwatchConfig::load_from_file(&args.config) {
        Ok(config) => {
            info!("Configuration loaded successfully from: {}", args.config);
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };
    apply_overrides(&mut config, &args);

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        drop(log_guard);
        std::process::exit(1);
    }

    if args.validate_config {
        info!("Configuration validation successful");
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let mut app = TesterApp::new(config).map_err(|e| {
        error!("Failed to create station: {}", e);
        e
    })?;

    app.initialize().await.map_err(|e| {
        error!("Failed to initialize station: {}", e);
        e
    })?;

    if args.dry_run {
        info!("Dry run mode - components initialized but not started");
        println!(
            "✓ Dry run completed successfully - components: {}",
            app.component_names().join(", ")
        );
        return Ok(());
    }

    app.start().await.map_err(|e| {
        error!("Failed to start station: {}", e);
        e
    })?;

    let exit_code = app.run().await.map_err(|e| {
        error!("Station error during execution: {}", e);
        e
    })?;

    info!("dutwatch exited with code: {}", exit_code);
    drop(log_guard);
    std::process::exit(exit_code);
}

fn apply_overrides(config: &mut DutwatchConfig, args: &Args) {
    if let Some(id) = &args.dut_id {
        config.dut.id = normalize_dut_id(id);
    }
    if let Some(source) = &args.source {
        config.detector.source = Some(source.clone());
    }
    if let Some(seconds) = args.frame_threshold {
        config.detector.frame_threshold_seconds = seconds;
    }
    if let Some(threshold) = args.threshold {
        config.detector.binarization_threshold = threshold;
    }
    if args.no_handshake {
        config.detector.await_handshake = false;
    }
}

fn normalize_dut_id(id: &str) -> String {
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
        format!("vid{}", id)
    } else {
        id.to_string()
    }
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("dutwatch={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "dutwatch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# dutwatch configuration file");
    println!("# Every value below is the built-in default");
    println!("# Set [detector] source to a frame directory or video file");
    println!();
    println!("{}", toml::to_string_pretty(&DutwatchConfig::default())?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_dut_id_maps_to_video_device() {
        assert_eq!(normalize_dut_id("2"), "vid2");
        assert_eq!(normalize_dut_id("vid9"), "vid9");
        assert_eq!(normalize_dut_id("bench-a"), "bench-a");
    }

    #[test]
    fn test_cli_overrides() {
        let args = Args::parse_from([
            "dutwatch",
            "--dut-id",
            "4",
            "--frame-threshold",
            "2.5",
            "--threshold",
            "60",
            "--no-handshake",
        ]);
        let mut config = DutwatchConfig::default();
        apply_overrides(&mut config, &args);

        assert_eq!(config.dut.id, "vid4");
        assert_eq!(config.detector.frame_threshold_seconds, 2.5);
        assert_eq!(config.detector.binarization_threshold, 60.0);
        assert!(!config.detector.await_handshake);
        assert!(config.detector.source.is_none());
    }
}
