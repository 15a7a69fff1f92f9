// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `browse` command.

use uamon_opcua::NodeId;

use crate::cli::{BrowseArgs, Cli, OutputFormat};
use crate::error::{BinError, BinResult};
use crate::runtime::RuntimeBuilder;

/// Executes the `browse` command: lists the references of one node.
pub async fn browse(cli: &Cli, args: BrowseArgs) -> BinResult<()> {
    let node_id = match args.node.as_deref() {
        Some(s) => s.parse::<NodeId>()?,
        None => NodeId::root_folder(),
    };

    let runtime = RuntimeBuilder::new().config_path(&cli.config).build()?;
    let references = runtime.browse(&node_id).await?;

    match args.format {
        OutputFormat::Text => {
            println!("References of {} ({}):", node_id, references.len());
            for reference in &references {
                println!("  {}", reference);
            }
        }
        OutputFormat::Json => {
            let text = serde_json::to_string_pretty(&references)
                .map_err(|e| BinError::runtime(e.to_string()))?;
            println!("{}", text);
        }
    }
    Ok(())
}
