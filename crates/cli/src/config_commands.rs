use anyhow::{Result, bail};

use courier_config::{
    CourierConfig, apply_env_overrides, find_config_file, load_config,
    validate::{self, Severity},
};

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Validate the discovered config file and report errors/warnings.
pub fn check(verbose: bool) -> Result<()> {
    let path = find_config_file();

    let mut config = match &path {
        Some(path) => {
            eprintln!("Checking {}\n", path.display());
            load_config(path)?
        },
        None => {
            eprintln!("No config file found; checking defaults.\n");
            CourierConfig::default()
        },
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());

    let result = validate::validate(&config, path.as_deref());

    let mut shown = 0;
    for d in &result.diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }

        let (color, label) = match d.severity {
            Severity::Error => (RED, "error"),
            Severity::Warning => (YELLOW, "warning"),
            Severity::Info => (CYAN, "info"),
        };

        if d.path.is_empty() {
            eprintln!("  {BOLD}{color}{label}{RESET} {}", d.message);
        } else {
            eprintln!("  {BOLD}{color}{label}{RESET} {}: {}", d.path, d.message);
        }
        shown += 1;
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

    if shown > 0 {
        eprintln!();
    }

    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        bail!("configuration has {errors} error(s)");
    }

    Ok(())
}
