// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `validate` command.

use std::path::Path;

use crate::cli::{Cli, OutputFormat, ValidateArgs};
use crate::config::{ConfigLoader, UamonConfig};
use crate::error::{BinError, BinResult};

/// Executes the `validate` command to validate configuration.
pub fn validate(cli: &Cli, args: ValidateArgs) -> BinResult<()> {
    let report = validate_file(&cli.config)?;
    print_report(&cli.config, &report, &args)?;

    if args.strict && !report.warnings.is_empty() {
        return Err(BinError::config(format!(
            "Strict mode: {} warning(s) found",
            report.warnings.len()
        )));
    }
    Ok(())
}

/// Outcome of a successful validation.
#[derive(Debug)]
pub struct ValidationReport {
    /// The validated configuration.
    pub config: UamonConfig,
    /// Non-fatal findings.
    pub warnings: Vec<String>,
}

/// Loads and validates `path`, collecting warnings.
pub fn validate_file(path: &Path) -> BinResult<ValidationReport> {
    let config = ConfigLoader::new()
        .load(path)
        .map_err(|e| BinError::from(e).with_context("Configuration validation failed"))?;
    let warnings = config.warnings();
    Ok(ValidationReport { config, warnings })
}

fn print_report(path: &Path, report: &ValidationReport, args: &ValidateArgs) -> BinResult<()> {
    let config = &report.config;
    match args.format {
        OutputFormat::Text => {
            println!("✓ Configuration is valid: {}", path.display());
            println!();
            println!("Summary:");
            println!("  Endpoint: {}", config.endpoint);
            println!("  Nodes: {}", config.nodes.len());
            println!(
                "  Publishing interval: {:?}",
                config.subscription.publishing_interval
            );
            println!("  Queue size: {}", config.monitoring.queue_size);

            if !report.warnings.is_empty() {
                println!();
                println!("Warnings:");
                for warning in &report.warnings {
                    println!("  ⚠ {}", warning);
                }
            }

            if args.show_config {
                println!();
                println!("Parsed configuration:");
                let yaml = serde_yaml::to_string(config)
                    .map_err(|e| BinError::runtime(e.to_string()))?;
                println!("{}", yaml);
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "valid": true,
                "config_path": path.display().to_string(),
                "summary": {
                    "endpoint": config.endpoint,
                    "node_count": config.nodes.len(),
                    "queue_size": config.monitoring.queue_size,
                },
                "warnings": report.warnings,
                "config": if args.show_config { Some(config) } else { None },
            });
            let text = serde_json::to_string_pretty(&output)
                .map_err(|e| BinError::runtime(e.to_string()))?;
            println!("{}", text);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_validate_file() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(file, "endpoint: opc.tcp://localhost:4840\nnodes: []").unwrap();

        let report = validate_file(file.path()).unwrap();

        assert_eq!(report.config.endpoint, "opc.tcp://localhost:4840");
        assert_eq!(report.warnings, vec!["No nodes configured".to_string()]);
    }

    #[test]
    fn test_validate_file_rejects_bad_node() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(file, "endpoint: opc.tcp://localhost:4840\nnodes: [\"ns=x;s=A\"]").unwrap();

        let err = validate_file(file.path()).unwrap_err();

        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("nodes[0]"));
    }
}
