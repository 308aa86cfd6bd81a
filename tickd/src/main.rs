//! # tickd
//!
//! Runs the tick kernel against a directory-backed store.

use std::env;
use std::path::PathBuf;
use std::process;
use tickd::{console_log, Tickd, TickdConfig};

fn main() {
    let args: Vec<String> = env::args().collect();

    let config = parse_args(&args).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        print_usage(&args[0]);
        process::exit(1);
    });

    if let Err(e) = console_log::init(config.verbose) {
        eprintln!("Failed to install logger: {}", e);
        process::exit(1);
    }

    let mut daemon = Tickd::new(config).unwrap_or_else(|e| {
        eprintln!("Failed to open store: {}", e);
        process::exit(1);
    });

    if let Err(e) = daemon.run() {
        eprintln!("Runtime error: {}", e);
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<TickdConfig, String> {
    let mut config = TickdConfig::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--store" | "-s" => {
                config.store = PathBuf::from(value_of(args, &mut i, "--store")?);
            }
            "--ticks" | "-t" => {
                let value = value_of(args, &mut i, "--ticks")?;
                config.ticks = value
                    .parse()
                    .map_err(|_| format!("Invalid ticks value: {}", value))?;
            }
            "--cpu-limit" => {
                let value = value_of(args, &mut i, "--cpu-limit")?;
                config.cpu_limit = value
                    .parse()
                    .map_err(|_| format!("Invalid cpu-limit value: {}", value))?;
            }
            "--bucket" => {
                let value = value_of(args, &mut i, "--bucket")?;
                config.bucket = Some(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid bucket value: {}", value))?,
                );
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--help" | "-h" => {
                print_usage(&args[0]);
                process::exit(0);
            }
            other => {
                return Err(format!("Unknown option: {}", other));
            }
        }
        i += 1;
    }

    Ok(config)
}

fn value_of<'a>(args: &'a [String], i: &mut usize, option: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("Missing value for {}", option))
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} [OPTIONS]", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -s, --store <DIR>        Store directory (default: tickd-store)");
    eprintln!("  -t, --ticks <N>          Ticks to run (default: 100)");
    eprintln!("  --cpu-limit <CPU>        CPU allowance per tick (default: 20)");
    eprintln!("  --bucket <N>             Override the banked CPU reserve");
    eprintln!("  -v, --verbose            Print full tick reports and debug logs");
    eprintln!("  -h, --help               Show this help message");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {} --store /tmp/tickd --ticks 50", program);
    eprintln!("  {} --bucket 400 --verbose", program);
}
