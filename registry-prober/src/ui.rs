//! Display logic for registry-prober CLI.
//!
//! Colored pass lines, per-step detail in debug mode, JSON lines and the
//! closing summary. Uses only the `console` crate.

use console::{pad_str, style, Alignment};
use registry_prober_lib::{PassResult, ProberConfig, StepReport};

// ── Header ───────────────────────────────────────────────────────────────────

/// Print a styled header before the first pass.
pub fn print_header(config: &ProberConfig) {
    println!(
        "{} {} {}",
        style("registry-prober").bold(),
        style(format!("v{}", env!("CARGO_PKG_VERSION"))).dim(),
        style(format!(
            "probing {} sequence{}",
            config.sequences.len(),
            if config.sequences.len() == 1 { "" } else { "s" }
        ))
        .dim(),
    );

    let timeout = match config.step_timeout {
        Some(timeout) => format!("{}ms", timeout.as_millis()),
        None => "off".to_string(),
    };
    let meta_parts = [
        format!("Sequences: {}", config.sequences.join(", ")),
        format!("Interval: {}s", config.interval.as_secs_f64()),
        format!("Step timeout: {}", timeout),
    ];

    println!("{}", style(meta_parts.join(" | ")).dim());
    println!();
}

// ── Pass results ─────────────────────────────────────────────────────────────

/// Print one pass as a colored line, with per-step lines in debug mode.
pub fn print_pass(result: &PassResult, debug: bool) {
    match result {
        Ok(report) => {
            println!(
                "  {}  {}  {}  {}",
                style(pad_str(&report.sequence, 44, Alignment::Left, Some(".."))).white(),
                style("SUCCESS").green().bold(),
                style(pad_str(&report.target, 30, Alignment::Left, Some(".."))).dim(),
                style(format!(
                    "{} step{} in {}ms",
                    report.steps.len(),
                    if report.steps.len() == 1 { "" } else { "s" },
                    report.duration.as_millis()
                ))
                .dim(),
            );
            if debug {
                print_steps(&report.steps);
            }
        }
        Err(failure) => {
            let outcome = failure.outcome.to_string();
            let outcome = if failure.error.is_internal() {
                style(outcome).magenta().bold()
            } else if failure.error.is_transport() {
                style(outcome).yellow().bold()
            } else {
                style(outcome).red().bold()
            };
            println!(
                "  {}  {}  {}  {}",
                style(pad_str(&failure.sequence, 44, Alignment::Left, Some(".."))).white(),
                outcome,
                style(pad_str(&failure.target, 30, Alignment::Left, Some(".."))).dim(),
                style(format!("at '{}': {}", failure.step, failure.message)).dim(),
            );
            if debug {
                print_steps(&failure.completed);
            }
        }
    }
}

fn print_steps(steps: &[StepReport]) {
    for step in steps {
        let redirects = match step.redirects {
            0 => String::new(),
            1 => ", 1 redirect".to_string(),
            n => format!(", {} redirects", n),
        };
        println!(
            "    {} {} in {}ms via {} (connection {}{})",
            style("└─").dim(),
            step.step,
            step.latency.as_millis(),
            step.endpoint,
            step.connection_id,
            redirects,
        );
    }
}

/// Print one pass as a single JSON line.
pub fn print_json(result: &PassResult) {
    let line = match result {
        Ok(report) => serde_json::to_string(report),
        Err(failure) => serde_json::to_string(failure),
    };
    match line {
        Ok(line) => println!("{}", line),
        Err(e) => eprintln!("Error serializing result: {}", e),
    }
}

// ── Summary ──────────────────────────────────────────────────────────────────

pub fn print_shutdown() {
    eprintln!("{}", style("Interrupted, stopping sequences...").yellow());
}

/// Print the final summary bar with colored counts.
pub fn print_summary(passes: usize, failures: usize) {
    println!(
        "  {}",
        style("────────────────────────────────────────────────────").dim()
    );
    println!(
        "  {} pass{}  {}  {}  {}  {}",
        style(passes).bold(),
        if passes == 1 { "" } else { "es" },
        style("|").dim(),
        style(format!("{} succeeded", passes - failures)).green(),
        style("|").dim(),
        style(format!("{} failed", failures)).red(),
    );
}
