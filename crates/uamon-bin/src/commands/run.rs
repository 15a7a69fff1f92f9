// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `run` command.

use std::io;

use tracing::info;

use crate::cli::{Cli, RunArgs};
use crate::error::BinResult;
use crate::runtime::RuntimeBuilder;

/// Executes the `run` command: streams change events to stdout.
pub async fn run(cli: &Cli, args: RunArgs) -> BinResult<()> {
    let mut builder = RuntimeBuilder::new()
        .config_path(&cli.config)
        .print_errors(args.errors);
    if args.no_silent {
        builder = builder.silent(false);
    }
    let runtime = builder.build()?;

    let mut out = io::stdout();
    let summary = runtime.run(&mut out).await?;

    info!(
        nodes = summary.nodes_monitored,
        changes = summary.changes_written,
        "Run finished"
    );
    Ok(())
}
