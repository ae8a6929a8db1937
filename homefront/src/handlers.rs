use anyhow::{Context, bail};
use clap::ArgMatches;
use colored::{ColoredString, Colorize};
use homefront_core::batch::select_targets;
use homefront_core::config::{DEFAULT_TIMEOUT_SECS, RunConfig, expand_path};
use homefront_core::report::{BatchSummary, ErrorResult, TargetResult, generate_json_report};
use homefront_core::{
    ResultStore, RunContext, check_target, execute_batch, load_target_list, persist_outcome,
};
use homefront_core::data::SqliteStore;
use homefront_scanner::cache::DEFAULT_TTL;
use homefront_scanner::cloud::Jurisdiction;
use homefront_scanner::{adblock, geo};
use homefront_scanner::result::{Category, ResilienceSummary};
use homefront_scanner::retry::HeadlessMode;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, warn};

pub use homefront_core::batch::parse_url_line;

/// Install the fmt subscriber once. Later calls are ignored.
pub fn init_logging(debug: bool, quiet: bool) {
    let level = if debug {
        Level::DEBUG
    } else if quiet {
        Level::WARN
    } else {
        Level::INFO
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(debug)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Split a comma-separated code list, dropping blanks.
pub fn parse_pop_codes(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|c| c.trim().to_ascii_uppercase())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Turn parsed arguments into a run configuration.
///
/// Batch-only arguments are read when present, so the same function serves
/// both `check` and `batch`.
pub fn build_config(args: &ArgMatches) -> anyhow::Result<RunConfig> {
    let mut config = RunConfig::default();

    config.dns_server = args.get_one::<String>("dns").cloned();
    config.ipinfo_token = RunConfig::resolve_token(args.get_one::<String>("ipinfo-token").cloned());
    if let Some(url) = args.get_one::<String>("ipinfo-url") {
        config.ipinfo_url = url.trim_end_matches('/').to_string();
    }

    config.adblock = !args.get_flag("no-adblock");
    if let Some(sources) = args.get_many::<String>("adblock-source") {
        config.adblock_sources = sources.cloned().collect();
    }

    config.use_cache = !args.get_flag("no-cache");
    if let Some(dir) = args.get_one::<String>("cache-dir") {
        config.cache_dir = expand_path(dir);
    }
    config.cache_db = args
        .get_one::<PathBuf>("cache-db")
        .map(|p| expand_path(&p.to_string_lossy()));

    if let Some(mode) = args.get_one::<String>("headless") {
        config.headless = mode.parse::<HeadlessMode>()?;
    }
    config.debug = args.get_flag("debug");
    config.timeout = Duration::from_secs(
        args.get_one::<u64>("timeout")
            .copied()
            .unwrap_or(DEFAULT_TIMEOUT_SECS),
    );

    if let Some(output) = args.get_one::<PathBuf>("output") {
        config.output_dir = expand_path(&output.to_string_lossy());
    }
    config.save = !args.get_flag("no-save");

    let country = args.get_one::<String>("country").map(String::as_str).unwrap_or("TW");
    if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
        bail!("Invalid country code '{}' (expected two letters)", country);
    }
    let pop_codes = args
        .get_one::<String>("pop-codes")
        .map(|v| parse_pop_codes(v))
        .unwrap_or_default();
    config.jurisdiction = Jurisdiction::new(country, &pop_codes);
    if let Some(threshold) = args.get_one::<f64>("rtt-threshold") {
        if *threshold <= 0.0 {
            bail!("RTT threshold must be positive");
        }
        config.rtt_threshold_ms = *threshold;
    }

    // batch only
    if let Ok(Some(limit)) = args.try_get_one::<usize>("limit") {
        config.limit = Some(*limit);
    }
    if let Ok(Some(start)) = args.try_get_one::<usize>("start") {
        config.start = *start;
    }
    if let Ok(Some(concurrency)) = args.try_get_one::<usize>("concurrency") {
        if *concurrency == 0 {
            bail!("Concurrency must be at least 1");
        }
        config.concurrency = *concurrency;
    }
    if let Ok(Some(delay)) = args.try_get_one::<u64>("delay") {
        config.delay_ms = *delay;
    }

    Ok(config)
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn category_label(category: Category) -> ColoredString {
    match category {
        Category::DomesticCloud => category.as_str().green(),
        Category::DomesticDirect => category.as_str().bright_green(),
        Category::ForeignCloud => category.as_str().yellow(),
        Category::ForeignDirect => category.as_str().red(),
    }
}

fn verdict_label(resilient: bool) -> ColoredString {
    if resilient {
        "RESILIENT".green().bold()
    } else {
        "NOT RESILIENT".red().bold()
    }
}

/// Plain-text 2x2 matrix, one row per location.
pub fn format_matrix(summary: &ResilienceSummary) -> String {
    let mut out = format!("{:<12}{:>8}{:>8}{:>8}\n", "", "cloud", "direct", "total");
    for (label, counts) in [("domestic", &summary.domestic), ("foreign", &summary.foreign)] {
        out.push_str(&format!(
            "{:<12}{:>8}{:>8}{:>8}\n",
            label,
            counts.cloud,
            counts.direct,
            counts.total()
        ));
    }
    out
}

fn print_target_result(result: &TargetResult) {
    print_divider();
    println!("  {}", result.url.bright_white().bold());
    print_divider();
    println!();

    if result.canonical_url != result.url {
        println!("{} Canonical: {}", "→".blue(), result.canonical_url);
    }
    println!(
        "{} Collected in {} mode after {} attempt(s)",
        "→".blue(),
        result.collection.mode.to_string().cyan(),
        result.collection.attempts
    );
    println!(
        "{} {} requests, {} dependency domains ({} unresolved)",
        "→".blue(),
        result.request_count,
        result.domain_count,
        result.geo_errors()
    );
    println!();

    print!("{}", format_matrix(&result.summary));
    println!();

    for detail in &result.domains {
        let label = match &detail.classification {
            Some(c) => category_label(c.category),
            None => "unresolved".dimmed(),
        };
        let country = detail.geo.country.as_deref().unwrap_or("-");
        let mut line = format!("  {:<16} {:<4} {}", label, country, detail.domain);
        if let Some(provider) = detail.classification.as_ref().and_then(|c| c.provider.as_ref()) {
            line.push_str(&format!(" {}", format!("[{}]", provider).dimmed()));
        }
        if let Some(cloud) = &detail.cloud
            && let Some(rtt) = cloud.rtt
        {
            line.push_str(&format!(" {}", format!("(rtt {:.1} ms)", rtt).dimmed()));
        }
        println!("{}", line);
    }

    println!();
    println!("{} {}", "Verdict:".bright_white().bold(), verdict_label(result.resilient));
}

fn print_error_result(error: &ErrorResult) {
    print_divider();
    println!("  {}", error.url.bright_white().bold());
    print_divider();
    println!();
    println!(
        "{} {} {}",
        "✗".red().bold(),
        error.error_code.as_str().red().bold(),
        error.error_reason
    );
    if let Some(attempts) = error.error_details.attempts {
        println!("{} {} collection attempt(s)", "→".blue(), attempts);
    }
    if let Some(net_error) = &error.error_details.net_error {
        println!("{} {}", "→".blue(), net_error.yellow());
    }
    println!();
}

pub async fn handle_check(args: &ArgMatches, quiet: bool) -> anyhow::Result<()> {
    let config = build_config(args)?;
    init_logging(config.debug, quiet);

    let raw = args
        .get_one::<String>("URL")
        .context("A URL is required")?;
    let Some(url) = parse_url_line(raw) else {
        bail!("Invalid URL '{}'", raw);
    };

    let ctx = RunContext::builder(config)
        .build()
        .await
        .context("Failed to set up the run")?;

    let outcome = check_target(&ctx, &url).await;
    if let Err(e) = persist_outcome(&ctx, &outcome) {
        warn!("Cannot save result for {}: {}", url, e);
    }

    if args.get_flag("json") {
        match &outcome {
            Ok(result) => println!("{}", generate_json_report(result)?),
            Err(error) => println!("{}", serde_json::to_string_pretty(error)?),
        }
        return Ok(());
    }

    match &outcome {
        Ok(result) => print_target_result(result),
        Err(error) => print_error_result(error),
    }
    if let Some(store) = &ctx.store {
        let path = match &outcome {
            Ok(_) => store.success_path(&url),
            Err(_) => store.error_path(&url),
        };
        println!("{} Saved to {}", "✓".green().bold(), path.display());
    }
    Ok(())
}

pub fn print_batch_summary(summary: &BatchSummary) {
    println!();
    print_divider();
    println!("{}", "  BATCH COMPLETE".green().bold());
    print_divider();
    println!();

    let stats = &summary.stats;
    println!("{} Run:          {}", "→".blue(), summary.run_id.dimmed());
    println!("{} Targets:      {}", "→".blue(), stats.total);
    println!("{} Succeeded:    {}", "✓".green().bold(), stats.success.to_string().green());
    println!(
        "{} Errors:       {}",
        "⚠".yellow().bold(),
        stats.test_errors.to_string().yellow()
    );
    if stats.failed > 0 {
        println!("{} Failed:       {}", "✗".red().bold(), stats.failed.to_string().red());
    }

    let resilient = summary
        .results
        .iter()
        .filter(|r| r.resilient == Some(true))
        .count();
    println!(
        "{} Resilient:    {}/{}",
        "→".blue(),
        resilient.to_string().bright_white().bold(),
        stats.success
    );

    if !summary.error_sites.is_empty() {
        println!();
        println!("{}", "Error sites".yellow().bold());
        for site in &summary.error_sites {
            println!(
                "  {} {:<20} {}",
                "•".yellow(),
                site.error_code.as_str(),
                site.target.label()
            );
        }
    }
    println!();
}

pub async fn handle_batch(args: &ArgMatches, quiet: bool, command_line: String) -> anyhow::Result<()> {
    let config = build_config(args)?;
    init_logging(config.debug, quiet);

    let list = args
        .get_one::<PathBuf>("LIST")
        .context("A target list is required")?;
    let targets = load_target_list(list)
        .with_context(|| format!("Cannot read target list {}", list.display()))?;
    let loaded = targets.len();
    let targets = select_targets(targets, config.start, config.limit);
    if targets.is_empty() {
        warn!(
            "Nothing to do: {} targets loaded, start offset {}",
            loaded, config.start
        );
        return Ok(());
    }

    if !quiet {
        println!(
            "{} Checking {} of {} targets with {} worker(s)\n",
            "→".blue(),
            targets.len().to_string().bright_white().bold(),
            loaded,
            config.worker_count(targets.len())
        );
    }

    let ctx = RunContext::builder(config)
        .build()
        .await
        .context("Failed to set up the run")?;
    let summary = execute_batch(Arc::new(ctx), targets, command_line, !quiet).await;

    if !quiet {
        print_batch_summary(&summary);
    }
    Ok(())
}

pub fn handle_prune(args: &ArgMatches, quiet: bool) -> anyhow::Result<()> {
    init_logging(false, quiet);

    let output = args
        .get_one::<PathBuf>("output")
        .map(|p| expand_path(&p.to_string_lossy()))
        .context("An output directory is required")?;
    if !output.is_dir() {
        bail!("Output directory {} does not exist", output.display());
    }

    let removed = ResultStore::new(&output)?.prune_stale_errors()?;
    if !quiet {
        for path in &removed {
            println!("  {} {}", "✓".green(), path.display());
        }
        println!(
            "{} Removed {} stale error record(s) from {}",
            "✓".green().bold(),
            removed.len(),
            output.display()
        );
    }

    let cache_db = args
        .try_get_one::<PathBuf>("cache-db")
        .ok()
        .flatten()
        .map(|p| expand_path(&p.to_string_lossy()));
    if let Some(path) = cache_db {
        if !path.is_file() {
            bail!("Cache database {} does not exist", path.display());
        }
        let db = SqliteStore::new(&path)
            .with_context(|| format!("Cannot open cache database {}", path.display()))?;
        let mut purged = 0;
        for namespace in [geo::CACHE_NAMESPACE, adblock::CACHE_NAMESPACE] {
            purged += db.purge_expired(namespace, DEFAULT_TTL)?;
        }
        if !quiet {
            println!(
                "{} Purged {} expired cache entr{} from {}",
                "✓".green().bold(),
                purged,
                if purged == 1 { "y" } else { "ies" },
                path.display()
            );
        }
    }
    Ok(())
}
