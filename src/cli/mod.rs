//! Command-line interface for mobile-judge.
//!
//! Provides the `evaluate` batch command and the `summarize` ledger report.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands, EvaluateArgs, LedgerArgs, SummarizeArgs};
