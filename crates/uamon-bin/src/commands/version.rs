// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `version` command.

use std::fmt::Write as _;

use crate::cli::Cli;
use crate::error::BinResult;

/// Prints version, build target and transport information.
pub fn version(_cli: &Cli) -> BinResult<()> {
    print!("{}", version_info());
    Ok(())
}

fn version_info() -> String {
    let transport = if cfg!(feature = "real-transport") {
        "opcua (opc.tcp)"
    } else {
        "none (built without real-transport)"
    };

    let mut out = String::new();
    let _ = writeln!(out, "uamon {}", crate::VERSION);
    let _ = writeln!(out, "  uamon-opcua: {}", uamon_opcua::VERSION);
    let _ = writeln!(
        out,
        "  target:      {}-{}",
        std::env::consts::ARCH,
        std::env::consts::OS
    );
    let _ = writeln!(out, "  transport:   {}", transport);
    let _ = writeln!(out);
    let _ = writeln!(out, "License: PolyForm Noncommercial License 1.0.0");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info_lists_both_crates() {
        let info = version_info();
        assert!(info.starts_with(&format!("uamon {}", crate::VERSION)));
        assert!(info.contains("uamon-opcua:"));
        assert!(info.contains(std::env::consts::OS));
    }
}
