// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Design sidecar: placement and timing constraints.
//!
//! The gate-level Verilog netlist carries no locations or constraints, so
//! they arrive in a JSON sidecar. All times are seconds; locations are
//! integer DBU.

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Placement and constraint data for one design.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DesignInfo {
    /// DBU-per-micron factor of the placement grid.
    pub dbu_per_micron: f64,
    /// Instance name to (x, y) location in DBU.
    pub placement: HashMap<String, (i64, i64)>,
    /// Top-level port name to (x, y) location in DBU.
    pub port_locations: HashMap<String, (i64, i64)>,
    /// Clock period in seconds. Endpoints without an explicit required
    /// time are constrained against this.
    pub clock_period: Option<f64>,
    /// Top-level ports that are clock roots. The clock network is traced
    /// from these, never inferred from names.
    pub clock_ports: Vec<String>,
    /// Design-wide max slew limit, seconds.
    pub max_slew: Option<f64>,
    /// Per-port max slew limits, seconds.
    pub port_slew_limits: HashMap<String, f64>,
    /// Per-pin max slew limits keyed by full pin path, seconds.
    pub pin_slew_limits: HashMap<String, f64>,
    /// Required times at top-level output ports, seconds.
    pub output_required: HashMap<String, f64>,
}

impl Default for DesignInfo {
    fn default() -> DesignInfo {
        DesignInfo {
            dbu_per_micron: 1000.0,
            placement: HashMap::new(),
            port_locations: HashMap::new(),
            clock_period: None,
            clock_ports: Vec::new(),
            max_slew: None,
            port_slew_limits: HashMap::new(),
            pin_slew_limits: HashMap::new(),
            output_required: HashMap::new(),
        }
    }
}

impl DesignInfo {
    pub fn from_file(path: impl AsRef<Path>) -> Result<DesignInfo, String> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| format!("failed to read {}: {}", path.as_ref().display(), e))?;
        serde_json::from_str(&content)
            .map_err(|e| format!("failed to parse {}: {}", path.as_ref().display(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let design: DesignInfo = serde_json::from_str("{}").unwrap();
        assert_eq!(design.dbu_per_micron, 1000.0);
        assert!(design.placement.is_empty());
        assert!(design.clock_period.is_none());
    }

    #[test]
    fn test_parse_full() {
        let design: DesignInfo = serde_json::from_str(
            r#"{
                "dbu_per_micron": 2000.0,
                "placement": {"u1": [100, 200]},
                "port_locations": {"clk": [0, 0]},
                "clock_period": 1.0e-9,
                "clock_ports": ["clk"],
                "max_slew": 1.5e-10,
                "output_required": {"out": 8.0e-10}
            }"#,
        )
        .unwrap();
        assert_eq!(design.dbu_per_micron, 2000.0);
        assert_eq!(design.placement["u1"], (100, 200));
        assert_eq!(design.clock_ports, ["clk"]);
        assert_eq!(design.output_required["out"], 8.0e-10);
    }
}
