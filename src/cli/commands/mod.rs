//! CLI command implementations

pub mod cache;
pub mod config;
pub mod generate;
pub mod serve;
pub mod template;

pub use cache::execute as cache;
pub use config::execute as config;
pub use generate::execute as generate;
pub use serve::execute as serve;
pub use template::execute as template;
