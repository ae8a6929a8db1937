use crate::CLAP_STYLING;
use clap::{Arg, arg, command};
use homefront_core::config::{DEFAULT_CACHE_DIR, DEFAULT_OUTPUT_DIR};
use std::path::PathBuf;

/// Flags shared by `check` and `batch`.
fn run_arguments() -> Vec<Arg> {
    vec![
        arg!(--"dns" <SERVER>)
            .required(false)
            .help("Custom DNS server, IP or IP:port (default: system resolver)"),
        arg!(--"ipinfo-token" <TOKEN>)
            .required(false)
            .help("Geolocation API token (default: $IPINFO_TOKEN)"),
        arg!(--"ipinfo-url" <URL>)
            .required(false)
            .help("Geolocation service base URL")
            .default_value("https://ipinfo.io"),
        arg!(--"no-adblock")
            .required(false)
            .help("Do not filter dependencies with block lists")
            .action(clap::ArgAction::SetTrue),
        arg!(--"adblock-source" <URL>)
            .required(false)
            .help("Block list URL; repeat to use several (replaces the built-in list)")
            .action(clap::ArgAction::Append),
        arg!(--"no-cache")
            .required(false)
            .help("Always query live services; results are still written to the cache")
            .action(clap::ArgAction::SetTrue),
        arg!(--"cache-dir" <PATH>)
            .required(false)
            .help("Directory for cached lookups")
            .default_value(DEFAULT_CACHE_DIR),
        arg!(--"cache-db" <PATH>)
            .required(false)
            .help("Keep the cache and run history in this SQLite database instead")
            .value_parser(clap::value_parser!(PathBuf)),
        arg!(--"headless" <MODE>)
            .required(false)
            .help("Collection mode: auto tries headless then headful, true/false pins one")
            .value_parser(["auto", "true", "false"])
            .default_value("auto"),
        arg!(--"timeout" <SECONDS>)
            .required(false)
            .help("Timeout for each collection attempt")
            .value_parser(clap::value_parser!(u64))
            .default_value("120"),
        arg!(-o --"output" <PATH>)
            .required(false)
            .help("Directory for result records")
            .value_parser(clap::value_parser!(PathBuf))
            .default_value(DEFAULT_OUTPUT_DIR),
        arg!(--"no-save")
            .required(false)
            .help("Do not write result records")
            .action(clap::ArgAction::SetTrue),
        arg!(--"country" <CODE>)
            .required(false)
            .help("Reference country code")
            .default_value("TW"),
        arg!(--"pop-codes" <CODES>)
            .required(false)
            .help("Comma-separated airport/PoP codes inside the reference country")
            .default_value("TPE,KHH,RMQ"),
        arg!(--"rtt-threshold" <MS>)
            .required(false)
            .help("Round-trip time below which a cloud edge counts as domestic")
            .value_parser(clap::value_parser!(f64))
            .default_value("15"),
        arg!(-d --"debug" "Verbose logging")
            .required(false)
            .action(clap::ArgAction::SetTrue),
    ]
}

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("homefront")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("homefront")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .subcommand_required(false)
        .subcommand(
            command!("check")
                .about("Classify the third-party dependencies of a single website")
                .arg(
                    arg!(<URL>)
                        .required(true)
                        .help("The website to check; https:// is added when missing"),
                )
                .arg(
                    arg!(--"json")
                        .required(false)
                        .help("Print the full result as JSON")
                        .action(clap::ArgAction::SetTrue),
                )
                .args(run_arguments()),
        )
        .subcommand(
            command!("batch")
                .about(
                    "Check every website in a list with a pool of workers. Accepts a JSON array, \
                a previous run's batch_errors file, or one URL per line.",
                )
                .arg(
                    arg!(<LIST>)
                        .required(true)
                        .help("Path to the target list")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    arg!(-l --"limit" <NUM>)
                        .required(false)
                        .help("Check at most this many targets")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(-s --"start" <INDEX>)
                        .required(false)
                        .help("Skip the first INDEX targets")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("0"),
                )
                .arg(
                    arg!(-c --"concurrency" <NUM_WORKERS>)
                        .required(false)
                        .help("The number of targets checked at once")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("4"),
                )
                .arg(
                    arg!(--"delay" <MS>)
                        .required(false)
                        .help("Pause after each target, per worker")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("1000"),
                )
                .args(run_arguments()),
        )
        .subcommand(
            command!("prune")
                .about("Delete error records superseded by a later success, and expired cache entries")
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Directory holding result records")
                        .value_parser(clap::value_parser!(PathBuf))
                        .default_value(DEFAULT_OUTPUT_DIR),
                )
                .arg(
                    arg!(--"cache-db" <PATH>)
                        .required(false)
                        .help("Also purge expired entries from this SQLite cache")
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
}
