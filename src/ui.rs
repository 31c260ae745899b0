//! Terminal output for the `tunping` binary

use colored::*;
use console::Term;
use indicatif::{ProgressBar, ProgressStyle};
use tunping_core::{Measurement, ProbeSample, SampleObserver};

/// UI settings
#[derive(Debug, Clone)]
pub struct UiConfig {
    pub use_color: bool,
    pub show_progress: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        let interactive = Term::stderr().is_term();
        Self {
            use_color: interactive,
            show_progress: interactive,
        }
    }
}

/// Create a standard progress bar, drawn on stderr
pub fn create_progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}

/// Advances a progress bar per sample and shows the latest delay
pub struct ProgressObserver {
    bar: ProgressBar,
}

impl ProgressObserver {
    pub fn new(times: u32) -> Self {
        Self {
            bar: create_progress_bar(times as u64),
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl SampleObserver for ProgressObserver {
    fn on_sample(&self, _index: u32, sample: &ProbeSample) {
        let msg = match sample {
            ProbeSample::Delay(ms) => latency_label(*ms).to_string(),
            ProbeSample::Timeout(_) => "timeout".red().to_string(),
        };
        self.bar.set_message(msg);
        self.bar.inc(1);
    }
}

fn latency_label(ms: u64) -> ColoredString {
    let text = format!("{}ms", ms);
    match ms {
        0..=100 => text.green(),
        101..=300 => text.yellow(),
        _ => text.red(),
    }
}

/// Print the banner
pub fn print_banner(version: &str) {
    eprintln!(
        "{} {}",
        "tunping".cyan().bold(),
        format!("v{}", version).yellow()
    );
}

/// One-line human summary on stderr
pub fn print_summary(measurement: &Measurement) {
    match measurement {
        Measurement::Measured {
            delay_ms, country, ..
        } => {
            let country = if country.is_empty() { "??" } else { country.as_str() };
            print_success(&format!("{} via exit {}", latency_label(*delay_ms), country.cyan()));
            if !measurement.error().is_empty() {
                print_warning(&format!("some samples failed: {}", measurement.error()));
            }
        }
        Measurement::TimedOut { last_error } => {
            print_error(&format!("every sample failed: {}", last_error))
        }
        Measurement::Fatal { error } => print_error(&format!("tunnel unavailable: {}", error)),
    }
}

/// Print a success message
pub fn print_success(msg: &str) {
    eprintln!("{} {}", "✓".green().bold(), msg);
}

/// Print an error message
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red().bold(), msg);
}

/// Print a warning message
pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "!".yellow().bold(), msg);
}

/// Apply the color setting globally
pub fn init_ui(config: &UiConfig) {
    colored::control::set_override(config.use_color);
}
