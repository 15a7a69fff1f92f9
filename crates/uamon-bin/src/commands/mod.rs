// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI command implementations.
//!
//! - `run`: Monitor the configured nodes
//! - `read`: Read every configured node once
//! - `browse`: List the references of a node
//! - `validate`: Validate the configuration file
//! - `version`: Show version information

mod browse;
mod read;
mod run;
mod validate;
mod version;

pub use browse::browse;
pub use read::read;
pub use run::run;
pub use validate::validate;
pub use version::version;

use crate::cli::{Cli, Commands};
use crate::error::BinResult;

/// Executes the appropriate command based on CLI arguments.
pub async fn execute(cli: Cli) -> BinResult<()> {
    match cli.effective_command() {
        Commands::Run(args) => run::run(&cli, args).await,
        Commands::Read(args) => read::read(&cli, args).await,
        Commands::Browse(args) => browse::browse(&cli, args).await,
        Commands::Validate(args) => validate::validate(&cli, args),
        Commands::Version => version::version(&cli),
    }
}
