pub mod batch;
pub mod config;
pub mod context;
pub mod data;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod store;

use colored::Colorize;

pub use batch::{BatchTarget, execute_batch, load_target_list};
pub use config::RunConfig;
pub use context::{RunContext, RunContextBuilder};
pub use error::CoreError;
pub use pipeline::{TargetOutcomeResult, check_target, persist_outcome};
pub use report::{BatchSummary, ErrorCode, ErrorResult, TargetResult};
pub use store::ResultStore;

const BANNER: &str = r#"
  _                          __                 _
 | |__   ___  _ __ ___   ___ / _|_ __ ___  _ __ | |_
 | '_ \ / _ \| '_ ` _ \ / _ \ |_| '__/ _ \| '_ \| __|
 | | | | (_) | | | | | |  __/  _| | | (_) | | | | |_
 |_| |_|\___/|_| |_| |_|\___|_| |_|  \___/|_| |_|\__|
"#;

pub fn print_banner() {
    println!("{}", BANNER.bright_cyan().bold());
    println!(
        "  {} {}\n",
        "domestic resilience checker".bright_white(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}
