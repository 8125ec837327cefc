//! Registry Prober CLI Application
//!
//! A command-line interface that runs registry-prober-lib probing sequences
//! against web WHOIS and EPP endpoints, once or on a fixed interval.

mod ui;

use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::Parser;
use registry_prober_lib::{
    describe_sequence, get_available_sequences, load_env_config, parse_duration_string,
    ConfigManager, FileConfig, PassResult, Prober, ProberConfig,
};
use std::process;
use tracing_subscriber::EnvFilter;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

/// CLI arguments for registry-prober
#[derive(Parser, Debug)]
#[command(name = "registry-prober")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Blackbox prober for registry web WHOIS and EPP services")]
#[command(
    long_about = "Blackbox prober for registry web WHOIS and EPP services.\n\nRuns scripted probing sequences on an interval and reports per-step outcomes and latencies."
)]
#[command(styles = STYLES)]
pub struct Args {
    /// Sequences to run (comma-separated or multiple -s flags)
    #[arg(short = 's', long = "sequence", value_name = "NAME", value_delimiter = ',', action = clap::ArgAction::Append, help_heading = "Probing")]
    pub sequences: Option<Vec<String>>,

    /// List all available sequences and exit
    #[arg(long = "list-sequences", help_heading = "Probing")]
    pub list_sequences: bool,

    /// Run a single pass of every sequence and exit
    #[arg(long = "once", help_heading = "Probing")]
    pub once: bool,

    /// Stop each sequence after this many passes
    #[arg(long = "passes", value_name = "N", help_heading = "Probing")]
    pub passes: Option<usize>,

    /// Time between passes (e.g. "30s", "5m", "500ms")
    #[arg(short = 'i', long = "interval", value_name = "DURATION", help_heading = "Probing")]
    pub interval: Option<String>,

    /// Per-step timeout; "0" disables it
    #[arg(short = 't', long = "timeout", value_name = "DURATION", help_heading = "Probing")]
    pub timeout: Option<String>,

    /// Web WHOIS TLDs to rotate through (comma-separated)
    #[arg(long = "tld", value_name = "TLD", value_delimiter = ',', action = clap::ArgAction::Append, help_heading = "Targets")]
    pub tlds: Option<Vec<String>>,

    /// EPP server host
    #[arg(long = "epp-host", value_name = "HOST", help_heading = "Targets")]
    pub epp_host: Option<String>,

    /// EPP server port
    #[arg(long = "epp-port", value_name = "PORT", help_heading = "Targets")]
    pub epp_port: Option<u16>,

    /// Output pass results as JSON lines
    #[arg(short = 'j', long = "json", help_heading = "Output Format")]
    pub json: bool,

    /// Use specific config file instead of automatic discovery
    #[arg(long = "config", value_name = "FILE", help_heading = "Configuration")]
    pub config: Option<String>,

    /// Show per-step details and debug logs
    #[arg(short = 'd', long = "debug", help_heading = "Configuration")]
    pub debug: bool,

    /// Verbose logging
    #[arg(short = 'v', long = "verbose", help_heading = "Configuration")]
    pub verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Validate arguments
    if let Err(e) = validate_args(&args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    // Handle --list-sequences early
    if args.list_sequences {
        print_sequences();
        return;
    }

    init_logging(&args);

    match run_prober(args).await {
        Ok(0) => {}
        Ok(_) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn validate_args(args: &Args) -> Result<(), String> {
    // --list-sequences is self-contained, skip other validation
    if args.list_sequences {
        return Ok(());
    }

    if args.once && args.passes.is_some() {
        return Err("Cannot specify both --once and --passes".to_string());
    }

    if args.passes == Some(0) {
        return Err("--passes must be at least 1".to_string());
    }

    if args.epp_port == Some(0) {
        return Err("--epp-port must be between 1 and 65535".to_string());
    }

    if let Some(interval) = &args.interval {
        match parse_duration_string(interval) {
            Some(d) if !d.is_zero() => {}
            _ => {
                return Err(format!(
                    "Invalid interval '{}'. Use a positive duration like \"30s\" or \"5m\"",
                    interval
                ))
            }
        }
    }

    if let Some(timeout) = &args.timeout {
        if parse_duration_string(timeout).is_none() {
            return Err(format!(
                "Invalid timeout '{}'. Use a duration like \"10s\" or \"0\" to disable",
                timeout
            ));
        }
    }

    Ok(())
}

fn print_sequences() {
    use console::Style;

    let heading = Style::new().yellow().bold();
    let name_style = Style::new().green().bold();

    println!();
    println!("{}", heading.apply_to("Available Sequences:"));
    println!();

    for name in get_available_sequences() {
        println!(
            "  {}  {}",
            name_style.apply_to(format!("{:<44}", name)),
            describe_sequence(name).unwrap_or_default(),
        );
    }

    println!();
    println!("Use: registry-prober --sequence <name>");
}

/// Install the tracing subscriber. `RUST_LOG` wins over the flags.
fn init_logging(args: &Args) {
    let level = if args.debug { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Run the configured sequences. Returns the number of failed passes.
async fn run_prober(args: Args) -> Result<usize, Box<dyn std::error::Error>> {
    let config = build_config(&args)?;

    if args.verbose && !args.json {
        ui::print_header(&config);
    }

    let mut prober = Prober::with_config(config)?;

    if args.once {
        let results = prober.run_once_all().await;
        prober.close().await;

        let mut failures = 0;
        for result in &results {
            failures += report(result, &args);
        }
        if !args.json {
            ui::print_summary(results.len(), failures);
        }
        return Ok(failures);
    }

    let continuous = args.passes.is_none();
    let (mut results, handle) = prober.spawn(args.passes);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut passes = 0;
    let mut failures = 0;
    let mut interrupted = false;
    loop {
        tokio::select! {
            result = results.recv() => match result {
                Some(result) => {
                    passes += 1;
                    failures += report(&result, &args);
                }
                None => break,
            },
            _ = &mut ctrl_c => {
                interrupted = true;
                break;
            }
        }
    }

    if interrupted {
        if !args.json {
            ui::print_shutdown();
        }
        handle.shutdown().await;
    } else {
        handle.wait().await;
    }

    if !args.json {
        ui::print_summary(passes, failures);
    }

    // A long-running prober reports failures through its output, not its exit code.
    Ok(if continuous { 0 } else { failures })
}

/// Print one pass result and return 1 if it failed.
fn report(result: &PassResult, args: &Args) -> usize {
    if args.json {
        ui::print_json(result);
    } else {
        ui::print_pass(result, args.debug);
    }
    usize::from(result.is_err())
}

/// Build configuration with proper precedence.
///
/// Defaults, then config files, then `PROBER_*` environment variables,
/// then command-line arguments.
fn build_config(args: &Args) -> Result<ProberConfig, Box<dyn std::error::Error>> {
    let config = ProberConfig::default();
    let config_manager = ConfigManager::new(args.verbose);
    let env_config = load_env_config(args.verbose);

    // Step 1: Determine config file path and load config files
    let file_config = if let Some(explicit_config_path) = &args.config {
        tracing::info!(path = %explicit_config_path, "using config file from --config");
        config_manager
            .load_file(explicit_config_path)
            .map_err(|e| format!("Failed to load config file '{}': {}", explicit_config_path, e))?
    } else if let Some(env_config_path) = &env_config.config {
        tracing::info!(path = %env_config_path, "using config file from PROBER_CONFIG");
        config_manager
            .load_file(env_config_path)
            .map_err(|e| format!("Failed to load config file '{}': {}", env_config_path, e))?
    } else {
        match config_manager.discover_and_load() {
            Ok(file_config) => file_config,
            Err(e) => {
                tracing::warn!(error = %e, "config discovery failed, using defaults");
                FileConfig::default()
            }
        }
    };
    let config = file_config.apply_to(config)?;

    // Step 2: Apply environment variables (PROBER_*)
    let config = env_config.apply_to(config);

    // Step 3: Apply CLI arguments (highest precedence)
    apply_cli_args_to_config(config, args)
}

fn apply_cli_args_to_config(
    mut config: ProberConfig,
    args: &Args,
) -> Result<ProberConfig, Box<dyn std::error::Error>> {
    if let Some(sequences) = &args.sequences {
        config = config.with_sequences(sequences.clone());
    }

    if let Some(tlds) = &args.tlds {
        config = config.with_tlds(tlds.clone());
    }

    if let Some(interval) = &args.interval {
        let interval = parse_duration_string(interval)
            .ok_or_else(|| format!("Invalid interval '{}'", interval))?;
        config = config.with_interval(interval);
    }

    if let Some(timeout) = &args.timeout {
        let timeout =
            parse_duration_string(timeout).ok_or_else(|| format!("Invalid timeout '{}'", timeout))?;
        config = config.with_step_timeout(timeout);
    }

    if let Some(host) = &args.epp_host {
        config.epp.host = host.clone();
    }

    if let Some(port) = args.epp_port {
        config.epp.port = port;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["registry-prober"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_validate_args_conflicts() {
        assert!(validate_args(&args(&["--once", "--passes", "2"])).is_err());
        assert!(validate_args(&args(&["--passes", "0"])).is_err());
        assert!(validate_args(&args(&["--interval", "0"])).is_err());
        assert!(validate_args(&args(&["--timeout", "soon"])).is_err());
        assert!(validate_args(&args(&["--once", "--timeout", "0"])).is_ok());
    }

    #[test]
    fn test_sequence_flag_accepts_lists() {
        let parsed = args(&["-s", "web-whois,epp-login-logout", "-s", "epp-login-claimscheck-logout"]);
        assert_eq!(
            parsed.sequences.unwrap(),
            vec![
                "web-whois".to_string(),
                "epp-login-logout".to_string(),
                "epp-login-claimscheck-logout".to_string()
            ]
        );
    }

    #[test]
    fn test_cli_args_override_config() {
        let parsed = args(&[
            "--interval",
            "30s",
            "--timeout",
            "0",
            "--tld",
            "dev",
            "--epp-host",
            "epp.example",
            "--epp-port",
            "1700",
        ]);
        let config = apply_cli_args_to_config(ProberConfig::default(), &parsed).unwrap();

        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.step_timeout, None);
        assert_eq!(config.web_whois.tlds, vec!["dev".to_string()]);
        assert_eq!(config.epp.host, "epp.example");
        assert_eq!(config.epp.port, 1700);
    }
}
