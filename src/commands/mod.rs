pub mod cat;
pub mod common;
pub mod ls;
pub mod put;
pub mod serve;
pub mod stat;

// Re-export command functions
pub use cat::cmd_cat;
pub use ls::cmd_ls;
pub use put::cmd_put;
pub use serve::cmd_serve;
pub use stat::cmd_stat;
