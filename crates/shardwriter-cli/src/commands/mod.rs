//! CLI subcommands.

pub mod route;
pub mod validate;
