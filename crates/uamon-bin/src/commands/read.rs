// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `read` command.

use crate::cli::{Cli, OutputFormat, ReadArgs};
use crate::error::{BinError, BinResult};
use crate::runtime::RuntimeBuilder;

/// Executes the `read` command: reads every configured node once.
///
/// Fails when any node could not be read.
pub async fn read(cli: &Cli, args: ReadArgs) -> BinResult<()> {
    let runtime = RuntimeBuilder::new().config_path(&cli.config).build()?;
    let outcomes = runtime.read_all().await?;

    match args.format {
        OutputFormat::Text => {
            for outcome in &outcomes {
                match &outcome.result {
                    Ok(value) => match value.value.as_ref() {
                        Some(v) => println!(
                            "{}: {} ({}) at {}",
                            outcome.node_identifier,
                            v,
                            v.type_name(),
                            value
                                .server_timestamp
                                .map(|t| t.to_rfc3339())
                                .unwrap_or_else(|| "-".to_string())
                        ),
                        None => println!("{}: <no value>", outcome.node_identifier),
                    },
                    Err(message) => println!("{}: ERROR {}", outcome.node_identifier, message),
                }
            }
        }
        OutputFormat::Json => {
            let values: Vec<_> = outcomes.iter().map(|o| o.to_json()).collect();
            let text = serde_json::to_string_pretty(&values)
                .map_err(|e| BinError::runtime(e.to_string()))?;
            println!("{}", text);
        }
    }

    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    if failed > 0 {
        return Err(BinError::runtime(format!(
            "{} of {} node(s) could not be read",
            failed,
            outcomes.len()
        )));
    }
    Ok(())
}
