//! CLI subcommands.

pub mod query;
pub mod serve;
pub mod status;
pub mod tick;
