// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Mutable placed netlist.
//!
//! Flat-vector storage in the netlistdb style (parallel `Vec`s indexed by
//! ids, name maps on the side), but growable: buffer insertion creates new
//! nets, instances and pins in place. Cell 0 is the top-level macro and its
//! pins are the design's ports, following the netlistdb convention.

use crate::design::DesignInfo;
use crate::liberty::{Cell, PortDirection};
use compact_str::CompactString;
use netlistdb::{Direction, NetlistDB};
use std::collections::HashMap;

/// The id of the top-level macro cell.
pub const TOP_CELL: usize = 0;

/// A location in database units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

impl Point {
    pub fn new(x: i64, y: i64) -> Point {
        Point { x, y }
    }

    /// Rectilinear wire length between two points, in DBU.
    pub fn manhattan_distance(self, other: Point) -> i64 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }
}

/// The netlist storage. Ids are stable across mutation: pins, nets and
/// cells are only ever appended, never removed.
#[derive(Debug, Clone, Default)]
pub struct Netlist {
    pub name: CompactString,
    /// DBU-per-micron factor for converting locations to meters.
    pub dbu_per_micron: f64,

    pub cell_names: Vec<CompactString>,
    /// Liberty cell type per instance; empty string for the top macro.
    pub cell_types: Vec<CompactString>,
    pub cell_locations: Vec<Option<Point>>,
    pub cell2pins: Vec<Vec<usize>>,
    cellname2id: HashMap<CompactString, usize>,

    pub pin2cell: Vec<usize>,
    pub pin_ports: Vec<CompactString>,
    pub pin2net: Vec<Option<usize>>,
    pub pindirect: Vec<Direction>,
    /// Explicit per-pin locations; set for top-level ports only. Instance
    /// pins resolve to their cell location.
    pin_locations: Vec<Option<Point>>,

    pub net_names: Vec<CompactString>,
    pub net2pins: Vec<Vec<usize>>,
    netname2id: HashMap<CompactString, usize>,
}

impl Netlist {
    pub fn new(name: impl Into<CompactString>, dbu_per_micron: f64) -> Netlist {
        let mut netlist = Netlist {
            name: name.into(),
            dbu_per_micron,
            ..Netlist::default()
        };
        // Cell 0: the top macro.
        netlist.cell_names.push(CompactString::new(""));
        netlist.cell_types.push(CompactString::new(""));
        netlist.cell_locations.push(None);
        netlist.cell2pins.push(Vec::new());
        netlist
    }

    /// Import a netlistdb database, attaching placement from the design
    /// sidecar. Hierarchical names are flattened.
    pub fn from_netlistdb(db: &NetlistDB, design: &DesignInfo) -> Netlist {
        let mut netlist = Netlist::new(CompactString::from(db.name.as_str()), design.dbu_per_micron);

        for netid in 0..db.num_nets {
            let name = CompactString::from(db.netnames[netid].dbg_fmt_pin());
            netlist.net_names.push(name.clone());
            netlist.net2pins.push(Vec::new());
            netlist.netname2id.insert(name, netid);
        }

        for cellid in 1..db.num_cells {
            let name = CompactString::from(db.cellnames[cellid].dbg_fmt_hier());
            let location = design
                .placement
                .get(name.as_str())
                .map(|&(x, y)| Point::new(x, y));
            netlist.cell_names.push(name.clone());
            netlist.cell_types.push(CompactString::from(db.celltypes[cellid].as_str()));
            netlist.cell_locations.push(location);
            netlist.cell2pins.push(Vec::new());
            netlist.cellname2id.insert(name, cellid);
        }

        for pinid in 0..db.num_pins {
            let cellid = db.pin2cell[pinid];
            let (_, port, idx) = &db.pinnames[pinid];
            let port_name = match idx {
                Some(i) => CompactString::from(format!("{}[{}]", port, i)),
                None => CompactString::from(port.as_str()),
            };
            let netid = db.pin2net[pinid];
            let location = if cellid == TOP_CELL {
                design
                    .port_locations
                    .get(port_name.as_str())
                    .map(|&(x, y)| Point::new(x, y))
            } else {
                None
            };
            netlist.pin2cell.push(cellid);
            netlist.pin_ports.push(port_name);
            netlist.pin2net.push(Some(netid));
            netlist.pindirect.push(db.pindirect[pinid].clone());
            netlist.pin_locations.push(location);
            netlist.cell2pins[cellid].push(pinid);
            netlist.net2pins[netid].push(pinid);
        }

        netlist
    }

    pub fn num_cells(&self) -> usize {
        self.cell_names.len()
    }

    pub fn num_pins(&self) -> usize {
        self.pin2cell.len()
    }

    pub fn num_nets(&self) -> usize {
        self.net_names.len()
    }

    pub fn dbu_to_meters(&self, dbu: i64) -> f64 {
        dbu as f64 / self.dbu_per_micron * 1e-6
    }

    pub fn find_net(&self, name: &str) -> Option<usize> {
        self.netname2id.get(name).copied()
    }

    pub fn find_instance(&self, name: &str) -> Option<usize> {
        self.cellname2id.get(name).copied()
    }

    pub fn is_top_port(&self, pin: usize) -> bool {
        self.pin2cell[pin] == TOP_CELL
    }

    /// Whether this pin drives its net: an output pin of a leaf instance,
    /// or a top-level input port (which drives inward).
    pub fn is_driver(&self, pin: usize) -> bool {
        if self.pin2cell[pin] == TOP_CELL {
            self.pindirect[pin] == Direction::I
        } else {
            self.pindirect[pin] == Direction::O
        }
    }

    pub fn drivers(&self, net: usize) -> impl Iterator<Item = usize> + '_ {
        self.net2pins[net]
            .iter()
            .copied()
            .filter(move |&p| self.is_driver(p))
    }

    pub fn loads(&self, net: usize) -> impl Iterator<Item = usize> + '_ {
        self.net2pins[net]
            .iter()
            .copied()
            .filter(move |&p| !self.is_driver(p))
    }

    /// Full path name of a pin: `instance/PORT`, or the bare port name for
    /// top-level ports.
    pub fn pin_full_name(&self, pin: usize) -> String {
        let cell = self.pin2cell[pin];
        if cell == TOP_CELL {
            self.pin_ports[pin].to_string()
        } else {
            format!("{}/{}", self.cell_names[cell], self.pin_ports[pin])
        }
    }

    /// Resolve the placed location of a pin: its own location for top
    /// ports, its cell's location otherwise.
    pub fn pin_location(&self, pin: usize) -> Option<Point> {
        if let Some(loc) = self.pin_locations[pin] {
            return Some(loc);
        }
        self.cell_locations[self.pin2cell[pin]]
    }

    pub fn pin_of_cell_port(&self, cell: usize, port: &str) -> Option<usize> {
        self.cell2pins[cell]
            .iter()
            .copied()
            .find(|&p| self.pin_ports[p] == port)
    }

    /// Create a new net in the top scope.
    pub fn make_net(&mut self, name: &str) -> Result<usize, String> {
        if self.netname2id.contains_key(name) {
            return Err(format!("net {} already exists", name));
        }
        let netid = self.net_names.len();
        let name = CompactString::from(name);
        self.net_names.push(name.clone());
        self.net2pins.push(Vec::new());
        self.netname2id.insert(name, netid);
        Ok(netid)
    }

    /// Create a new unplaced instance of a liberty cell with all pins
    /// unconnected.
    pub fn make_instance(&mut self, cell: &Cell, name: &str) -> Result<usize, String> {
        if self.cellname2id.contains_key(name) {
            return Err(format!("instance {} already exists", name));
        }
        let cellid = self.cell_names.len();
        let name = CompactString::from(name);
        self.cell_names.push(name.clone());
        self.cell_types.push(cell.name.clone());
        self.cell_locations.push(None);
        self.cell2pins.push(Vec::new());
        self.cellname2id.insert(name, cellid);
        for port in cell.ports.values() {
            let pinid = self.pin2cell.len();
            self.pin2cell.push(cellid);
            self.pin_ports.push(port.name.clone());
            self.pin2net.push(None);
            self.pindirect.push(match port.direction {
                PortDirection::Output => Direction::O,
                _ => Direction::I,
            });
            self.pin_locations.push(None);
            self.cell2pins[cellid].push(pinid);
        }
        Ok(cellid)
    }

    /// Create a top-level port: a pin on the top macro. An input port
    /// drives its net from outside; an output port loads it.
    pub fn make_top_port(
        &mut self,
        name: &str,
        direction: Direction,
        location: Option<Point>,
    ) -> Result<usize, String> {
        if self.cell2pins[TOP_CELL]
            .iter()
            .any(|&p| self.pin_ports[p] == name)
        {
            return Err(format!("port {} already exists", name));
        }
        let pin = self.pin2cell.len();
        self.pin2cell.push(TOP_CELL);
        self.pin_ports.push(CompactString::from(name));
        self.pin2net.push(None);
        self.pindirect.push(direction);
        self.pin_locations.push(location);
        self.cell2pins[TOP_CELL].push(pin);
        Ok(pin)
    }

    /// Connect an instance port to a net. Reconnecting a port to the net it
    /// is already on is a no-op; connecting a port bound to a different net
    /// is an error.
    pub fn connect_pin(&mut self, cell: usize, port: &str, net: usize) -> Result<usize, String> {
        let pin = self.pin_of_cell_port(cell, port).ok_or_else(|| {
            format!("no port {} on instance {}", port, self.cell_names[cell])
        })?;
        if net >= self.net_names.len() {
            return Err(format!("net id {} out of range", net));
        }
        match self.pin2net[pin] {
            Some(existing) if existing == net => Ok(pin),
            Some(existing) => Err(format!(
                "pin {} is already connected to {}",
                self.pin_full_name(pin),
                self.net_names[existing]
            )),
            None => {
                self.pin2net[pin] = Some(net);
                self.net2pins[net].push(pin);
                Ok(pin)
            }
        }
    }

    pub fn disconnect_pin(&mut self, pin: usize) {
        if let Some(net) = self.pin2net[pin].take() {
            self.net2pins[net].retain(|&p| p != pin);
        }
    }

    /// Rebind an instance to a different liberty cell. Net bindings are
    /// preserved by port name; the new cell must expose every bound port
    /// with the same direction.
    pub fn replace_cell(&mut self, cell: usize, new_cell: &Cell) -> Result<(), String> {
        if cell == TOP_CELL {
            return Err("cannot replace the top macro".to_string());
        }
        for &pin in &self.cell2pins[cell] {
            let port = new_cell.ports.get(self.pin_ports[pin].as_str()).ok_or_else(|| {
                format!(
                    "cell {} has no port {} bound on instance {}",
                    new_cell.name, self.pin_ports[pin], self.cell_names[cell]
                )
            })?;
            let new_dir = match port.direction {
                PortDirection::Output => Direction::O,
                _ => Direction::I,
            };
            if new_dir != self.pindirect[pin] {
                return Err(format!(
                    "port {} of cell {} changes direction on instance {}",
                    port.name, new_cell.name, self.cell_names[cell]
                ));
            }
        }
        if new_cell.ports.len() != self.cell2pins[cell].len() {
            return Err(format!(
                "cell {} port count differs from instance {}",
                new_cell.name, self.cell_names[cell]
            ));
        }
        self.cell_types[cell] = new_cell.name.clone();
        Ok(())
    }

    pub fn set_location(&mut self, cell: usize, location: Point) {
        self.cell_locations[cell] = Some(location);
    }

    /// Write the netlist back out as flat structural Verilog.
    pub fn to_structural_verilog(&self) -> String {
        fn esc(name: &str) -> String {
            let simple = !name.is_empty()
                && !name.as_bytes()[0].is_ascii_digit()
                && name
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'$');
            if simple {
                name.to_string()
            } else {
                format!("\\{} ", name)
            }
        }

        let mut out = String::new();
        let top_pins = &self.cell2pins[TOP_CELL];
        let ports: Vec<String> = top_pins
            .iter()
            .map(|&p| esc(self.pin_ports[p].as_str()))
            .collect();
        out.push_str(&format!("module {} ({});\n", esc(&self.name), ports.join(", ")));
        for &pin in top_pins {
            let dir = match self.pindirect[pin] {
                Direction::I => "input",
                _ => "output",
            };
            out.push_str(&format!("  {} {};\n", dir, esc(self.pin_ports[pin].as_str())));
        }
        let port_names: std::collections::HashSet<&str> = top_pins
            .iter()
            .map(|&p| self.pin_ports[p].as_str())
            .collect();
        for name in &self.net_names {
            if !port_names.contains(name.as_str()) {
                out.push_str(&format!("  wire {};\n", esc(name.as_str())));
            }
        }
        for cell in 1..self.num_cells() {
            let conns: Vec<String> = self.cell2pins[cell]
                .iter()
                .filter_map(|&pin| {
                    let net = self.pin2net[pin]?;
                    Some(format!(
                        ".{}({})",
                        esc(self.pin_ports[pin].as_str()),
                        esc(self.net_names[net].as_str())
                    ))
                })
                .collect();
            out.push_str(&format!(
                "  {} {} ({});\n",
                esc(self.cell_types[cell].as_str()),
                esc(self.cell_names[cell].as_str()),
                conns.join(", ")
            ));
        }
        out.push_str("endmodule\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liberty::Library;

    const LIB: &str = r#"
    library (nl_test) {
      time_unit : "1ns";
      capacitive_load_unit (1,pf);
      operating_conditions (typ) { process : 1.0; voltage : 1.8; temperature : 25.0; }
      cell (BUF1) {
        cell_footprint : buf;
        pin (A) { direction : input; capacitance : 0.005; }
        pin (Y) { direction : output; function : "A";
          timing () {
            related_pin : "A"; timing_sense : positive_unate;
            cell_rise (scalar) { values ("0.02"); }
            cell_fall (scalar) { values ("0.02"); }
            rise_transition (scalar) { values ("0.05"); }
            fall_transition (scalar) { values ("0.05"); }
          }
        }
      }
      cell (BUF2) {
        cell_footprint : buf;
        pin (A) { direction : input; capacitance : 0.010; }
        pin (Y) { direction : output; function : "A";
          timing () {
            related_pin : "A"; timing_sense : positive_unate;
            cell_rise (scalar) { values ("0.015"); }
            cell_fall (scalar) { values ("0.015"); }
            rise_transition (scalar) { values ("0.04"); }
            fall_transition (scalar) { values ("0.04"); }
          }
        }
      }
      cell (AND2) {
        pin (A) { direction : input; capacitance : 0.004; }
        pin (B) { direction : input; capacitance : 0.004; }
        pin (Y) { direction : output; function : "A&B";
          timing () {
            related_pin : "A"; timing_sense : positive_unate;
            cell_rise (scalar) { values ("0.05"); }
            cell_fall (scalar) { values ("0.05"); }
            rise_transition (scalar) { values ("0.08"); }
            fall_transition (scalar) { values ("0.08"); }
          }
        }
      }
    }
    "#;

    fn test_lib() -> Library {
        Library::parse(LIB).unwrap()
    }

    #[test]
    fn test_manhattan_distance() {
        let a = Point::new(0, 0);
        let b = Point::new(300, -400);
        assert_eq!(a.manhattan_distance(b), 700);
        assert_eq!(b.manhattan_distance(a), 700);
    }

    #[test]
    fn test_dbu_to_meters() {
        let netlist = Netlist::new("t", 1000.0);
        // 1000 DBU = 1 micron = 1e-6 m.
        assert!((netlist.dbu_to_meters(1000) - 1e-6).abs() < 1e-18);
    }

    #[test]
    fn test_make_and_connect() {
        let lib = test_lib();
        let mut netlist = Netlist::new("t", 1000.0);
        let buf = netlist.make_instance(lib.get_cell("BUF1").unwrap(), "u1").unwrap();
        let net = netlist.make_net("n1").unwrap();
        let pin = netlist.connect_pin(buf, "A", net).unwrap();
        assert_eq!(netlist.pin2net[pin], Some(net));
        assert_eq!(netlist.net2pins[net], vec![pin]);
        // Reconnecting to the same net is a no-op.
        assert_eq!(netlist.connect_pin(buf, "A", net).unwrap(), pin);
        // Connecting elsewhere while bound is an error.
        let net2 = netlist.make_net("n2").unwrap();
        assert!(netlist.connect_pin(buf, "A", net2).is_err());
        netlist.disconnect_pin(pin);
        assert!(netlist.net2pins[net].is_empty());
        assert!(netlist.connect_pin(buf, "A", net2).is_ok());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let lib = test_lib();
        let mut netlist = Netlist::new("t", 1000.0);
        netlist.make_net("n1").unwrap();
        assert!(netlist.make_net("n1").is_err());
        netlist.make_instance(lib.get_cell("BUF1").unwrap(), "u1").unwrap();
        assert!(netlist
            .make_instance(lib.get_cell("BUF2").unwrap(), "u1")
            .is_err());
    }

    #[test]
    fn test_replace_cell_preserves_bindings() {
        let lib = test_lib();
        let mut netlist = Netlist::new("t", 1000.0);
        let buf = netlist.make_instance(lib.get_cell("BUF1").unwrap(), "u1").unwrap();
        let ni = netlist.make_net("in").unwrap();
        let no = netlist.make_net("out").unwrap();
        netlist.connect_pin(buf, "A", ni).unwrap();
        netlist.connect_pin(buf, "Y", no).unwrap();
        netlist.replace_cell(buf, lib.get_cell("BUF2").unwrap()).unwrap();
        assert_eq!(netlist.cell_types[buf], "BUF2");
        let pin_a = netlist.pin_of_cell_port(buf, "A").unwrap();
        assert_eq!(netlist.pin2net[pin_a], Some(ni));
        // AND2 has a different port signature.
        assert!(netlist
            .replace_cell(buf, lib.get_cell("AND2").unwrap())
            .is_err());
    }

    #[test]
    fn test_drivers_and_loads() {
        let lib = test_lib();
        let mut netlist = Netlist::new("t", 1000.0);
        let b1 = netlist.make_instance(lib.get_cell("BUF1").unwrap(), "u1").unwrap();
        let b2 = netlist.make_instance(lib.get_cell("BUF2").unwrap(), "u2").unwrap();
        let net = netlist.make_net("n").unwrap();
        let drv = netlist.connect_pin(b1, "Y", net).unwrap();
        let load = netlist.connect_pin(b2, "A", net).unwrap();
        assert_eq!(netlist.drivers(net).collect::<Vec<_>>(), vec![drv]);
        assert_eq!(netlist.loads(net).collect::<Vec<_>>(), vec![load]);
        assert_eq!(netlist.pin_full_name(drv), "u1/Y");
    }

    #[test]
    fn test_verilog_writer() {
        let lib = test_lib();
        let mut netlist = Netlist::new("top", 1000.0);
        let b1 = netlist.make_instance(lib.get_cell("BUF1").unwrap(), "u1").unwrap();
        let net = netlist.make_net("n1").unwrap();
        netlist.connect_pin(b1, "Y", net).unwrap();
        let v = netlist.to_structural_verilog();
        assert!(v.contains("module top ()"));
        assert!(v.contains("wire n1;"));
        assert!(v.contains("BUF1 u1 (.Y(n1));"));
    }
}
