//! Command line subcommands.

pub mod acknowledge;
pub mod dry_run;

pub use acknowledge::AcknowledgeArgs;
pub use dry_run::DryRunArgs;
