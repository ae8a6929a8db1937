// Include handlers module directly from handlers.rs
#[path = "handlers.rs"]
pub mod handlers;

pub use handlers::{build_config, format_matrix, init_logging, parse_pop_codes, parse_url_line};
