// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Timing graph over the netlist: levelization, arrival/slew propagation,
//! required times, and clock-network marking.
//!
//! This is a deliberately small single-corner timing engine. Wire delay is
//! not folded into arrivals (loads see their driver's time); wires
//! contribute through the lumped parasitic capacitance each driver sees.

use crate::design::DesignInfo;
use crate::fuzzy::INF;
use crate::liberty::{Cell, Edge, Library, Port, TimingRole};
use crate::netlist::{Netlist, TOP_CELL};
use crate::parasitics::Parasitics;
use netlistdb::Direction;

/// Per-pin timing state. Pins are identified by netlist pin ids; the
/// level structure is cached and must be invalidated when the netlist
/// topology changes.
#[derive(Debug, Default)]
pub struct TimingGraph {
    levels: Vec<u32>,
    level_drvrs: Vec<usize>,
    clock_net: Vec<bool>,
    graph_valid: bool,
    arrival: Vec<[f64; 2]>,
    slew: Vec<[f64; 2]>,
    required: Vec<f64>,
}

/// Resolve the liberty cell of a leaf instance.
pub fn liberty_cell<'a>(netlist: &Netlist, library: &'a Library, cell: usize) -> Option<&'a Cell> {
    if cell == TOP_CELL {
        return None;
    }
    library.get_cell(netlist.cell_types[cell].as_str())
}

/// Resolve the liberty port of a leaf instance pin.
pub fn liberty_port<'a>(netlist: &Netlist, library: &'a Library, pin: usize) -> Option<&'a Port> {
    let cell = liberty_cell(netlist, library, netlist.pin2cell[pin])?;
    cell.ports.get(netlist.pin_ports[pin].as_str())
}

/// Whether a cell output port is a sequential (registered) output.
fn is_sequential_output(cell: &Cell, port: &str) -> bool {
    cell.arc_sets_to(port)
        .any(|s| matches!(s.role, TimingRole::RisingEdge | TimingRole::FallingEdge))
}

impl TimingGraph {
    pub fn new() -> TimingGraph {
        TimingGraph::default()
    }

    /// Mark the cached level structure stale. Called after any topology
    /// mutation (buffer insertion, reconnection).
    pub fn invalidate(&mut self) {
        self.graph_valid = false;
    }

    /// The load capacitance seen by a driver pin: fanout input pin caps
    /// plus the net's parasitic wire capacitance.
    pub fn load_cap(
        netlist: &Netlist,
        library: &Library,
        parasitics: &Parasitics,
        drvr_pin: usize,
    ) -> f64 {
        let Some(net) = netlist.pin2net[drvr_pin] else {
            return 0.0;
        };
        let mut cap = parasitics.wire_cap(net);
        for load in netlist.loads(net) {
            if let Some(port) = liberty_port(netlist, library, load) {
                cap += port.capacitance();
            }
        }
        cap
    }

    /// Driver pins in level order, ties broken by pin path name.
    /// Consumers walk this in reverse so downstream loads are final first.
    pub fn levelized_drivers(
        &mut self,
        netlist: &Netlist,
        library: &Library,
        design: &DesignInfo,
    ) -> &[usize] {
        self.ensure_graph(netlist, library, design);
        &self.level_drvrs
    }

    pub fn level(&self, pin: usize) -> u32 {
        self.levels.get(pin).copied().unwrap_or(0)
    }

    /// Whether a pin is on the clock network. Valid after the graph has
    /// been built; traced from declared clock roots, never from names.
    pub fn is_clock(&self, pin: usize) -> bool {
        self.clock_net.get(pin).copied().unwrap_or(false)
    }

    pub fn arrival(&self, pin: usize, edge: Edge) -> f64 {
        self.arrival
            .get(pin)
            .map(|a| a[edge.index()])
            .unwrap_or(0.0)
    }

    pub fn slew(&self, pin: usize, edge: Edge) -> f64 {
        self.slew.get(pin).map(|s| s[edge.index()]).unwrap_or(0.0)
    }

    /// Required time at a pin; `INF` when unconstrained.
    pub fn required(&self, pin: usize) -> f64 {
        self.required.get(pin).copied().unwrap_or(INF)
    }

    fn ensure_graph(&mut self, netlist: &Netlist, library: &Library, design: &DesignInfo) {
        if self.graph_valid {
            return;
        }
        self.compute_levels(netlist, library);
        self.mark_clock_network(netlist, library, design);
        self.graph_valid = true;
    }

    /// Longest-path levelization. Driver pins at combinational start
    /// points (top input ports, sequential outputs, constant generators)
    /// get level 0; a combinational output is one deeper than its cell's
    /// deepest input.
    fn compute_levels(&mut self, netlist: &Netlist, library: &Library) {
        let num_pins = netlist.num_pins();
        self.levels = vec![0; num_pins];
        let mut remaining: Vec<usize> = (0..netlist.num_cells())
            .map(|c| {
                if c == TOP_CELL {
                    return 0;
                }
                netlist.cell2pins[c]
                    .iter()
                    .filter(|&&p| {
                        netlist.pindirect[p] == Direction::I
                            && netlist.pin2net[p]
                                .map(|n| netlist.drivers(n).next().is_some())
                                .unwrap_or(false)
                    })
                    .count()
            })
            .collect();

        let mut queue: Vec<usize> = Vec::new();
        let mut processed = vec![false; num_pins];
        for pin in 0..num_pins {
            if !netlist.is_driver(pin) || netlist.pin2net[pin].is_none() {
                continue;
            }
            let cell = netlist.pin2cell[pin];
            if cell == TOP_CELL {
                queue.push(pin);
            } else if let Some(lib_cell) = liberty_cell(netlist, library, cell) {
                if is_sequential_output(lib_cell, netlist.pin_ports[pin].as_str())
                    || remaining[cell] == 0
                {
                    queue.push(pin);
                }
            } else if remaining[cell] == 0 {
                queue.push(pin);
            }
        }

        let mut head = 0;
        while head < queue.len() {
            let drvr = queue[head];
            head += 1;
            if processed[drvr] {
                continue;
            }
            processed[drvr] = true;
            let level = self.levels[drvr];
            let Some(net) = netlist.pin2net[drvr] else {
                continue;
            };
            for load in netlist.loads(net) {
                self.levels[load] = self.levels[load].max(level);
                let cell = netlist.pin2cell[load];
                if cell == TOP_CELL {
                    continue;
                }
                if remaining[cell] > 0 {
                    remaining[cell] -= 1;
                }
                if remaining[cell] == 0 {
                    let depth = netlist.cell2pins[cell]
                        .iter()
                        .filter(|&&p| netlist.pindirect[p] == Direction::I)
                        .map(|&p| self.levels[p])
                        .max()
                        .unwrap_or(0);
                    let lib_cell = liberty_cell(netlist, library, cell);
                    for &out in &netlist.cell2pins[cell] {
                        if netlist.pindirect[out] != Direction::O
                            || processed[out]
                            || netlist.pin2net[out].is_none()
                        {
                            continue;
                        }
                        let sequential = lib_cell
                            .map(|c| is_sequential_output(c, netlist.pin_ports[out].as_str()))
                            .unwrap_or(false);
                        if !sequential {
                            self.levels[out] = depth + 1;
                            queue.push(out);
                        }
                    }
                }
            }
        }

        // Anything left unprocessed sits on a combinational cycle or
        // behind an undriven input; give it a level past everything else.
        let max_level = self.levels.iter().copied().max().unwrap_or(0);
        let mut leftovers = 0usize;
        let mut drvrs: Vec<usize> = Vec::new();
        for pin in 0..num_pins {
            if !netlist.is_driver(pin) || netlist.pin2net[pin].is_none() {
                continue;
            }
            if !processed[pin] {
                self.levels[pin] = max_level + 1;
                leftovers += 1;
            }
            drvrs.push(pin);
        }
        if leftovers > 0 {
            clilog::warn!(
                "{} driver pins could not be levelized (combinational loop or undriven input)",
                leftovers
            );
        }
        drvrs.sort_by(|&a, &b| {
            (self.levels[a], netlist.pin_full_name(a))
                .cmp(&(self.levels[b], netlist.pin_full_name(b)))
        });
        self.level_drvrs = drvrs;
    }

    /// Trace the clock network from declared clock root ports, flowing
    /// through single-input single-output (buffer/inverter) cells.
    fn mark_clock_network(&mut self, netlist: &Netlist, library: &Library, design: &DesignInfo) {
        self.clock_net = vec![false; netlist.num_pins()];
        let mut queue: Vec<usize> = Vec::new();
        for port in &design.clock_ports {
            for &pin in &netlist.cell2pins[TOP_CELL] {
                if netlist.pin_ports[pin] == port.as_str() {
                    queue.push(pin);
                }
            }
        }
        while let Some(pin) = queue.pop() {
            if self.clock_net[pin] {
                continue;
            }
            self.clock_net[pin] = true;
            if !netlist.is_driver(pin) {
                // A clock-tree buffer or inverter passes the clock on.
                let cell = netlist.pin2cell[pin];
                if let Some(lib_cell) = liberty_cell(netlist, library, cell) {
                    if let Some((_, output)) = lib_cell.single_input_output() {
                        if let Some(out_pin) =
                            netlist.pin_of_cell_port(cell, output.name.as_str())
                        {
                            queue.push(out_pin);
                        }
                    }
                }
                continue;
            }
            if let Some(net) = netlist.pin2net[pin] {
                for p in netlist.net2pins[net].iter().copied() {
                    if !self.clock_net[p] {
                        queue.push(p);
                    }
                }
            }
        }
    }

    /// Forward pass: arrival times and slews for every pin, in level
    /// order. Loads inherit their driver's values.
    pub fn find_delays(
        &mut self,
        netlist: &Netlist,
        library: &Library,
        parasitics: &Parasitics,
        design: &DesignInfo,
    ) {
        self.ensure_graph(netlist, library, design);
        let num_pins = netlist.num_pins();
        self.arrival = vec![[0.0; 2]; num_pins];
        self.slew = vec![[0.0; 2]; num_pins];

        let drvrs = self.level_drvrs.clone();
        for drvr in drvrs {
            let cell = netlist.pin2cell[drvr];
            if cell != TOP_CELL {
                let Some(lib_cell) = liberty_cell(netlist, library, cell) else {
                    continue;
                };
                let load = Self::load_cap(netlist, library, parasitics, drvr);
                let out_port = netlist.pin_ports[drvr].clone();
                let mut arr = [0.0f64; 2];
                let mut slw = [0.0f64; 2];
                for arc_set in lib_cell.arc_sets_to(out_port.as_str()) {
                    if arc_set.role.is_check() {
                        continue;
                    }
                    let Some(in_pin) =
                        netlist.pin_of_cell_port(cell, arc_set.from_port.as_str())
                    else {
                        continue;
                    };
                    let launch = matches!(
                        arc_set.role,
                        TimingRole::RisingEdge | TimingRole::FallingEdge
                    );
                    for arc in &arc_set.arcs {
                        let in_slew = self.slew[in_pin][arc.in_edge.index()];
                        let (delay, out_slew) = arc.evaluate(in_slew, load);
                        // Registered outputs launch from the clock edge at
                        // time zero; combinational arcs add to the input
                        // arrival.
                        let in_arrival = if launch {
                            0.0
                        } else {
                            self.arrival[in_pin][arc.in_edge.index()]
                        };
                        let o = arc.out_edge.index();
                        arr[o] = arr[o].max(in_arrival + delay);
                        slw[o] = slw[o].max(out_slew);
                    }
                }
                self.arrival[drvr] = arr;
                self.slew[drvr] = slw;
            }
            if let Some(net) = netlist.pin2net[drvr] {
                for load in netlist.loads(net) {
                    self.arrival[load] = self.arrival[drvr];
                    self.slew[load] = self.slew[drvr];
                }
            }
        }
    }

    /// Backward pass: required times. Endpoints are top-level output
    /// ports and setup-constrained data pins; everything unconstrained
    /// stays at `INF`.
    pub fn find_required(
        &mut self,
        netlist: &Netlist,
        library: &Library,
        parasitics: &Parasitics,
        design: &DesignInfo,
    ) {
        self.ensure_graph(netlist, library, design);
        let num_pins = netlist.num_pins();
        if self.slew.len() != num_pins {
            self.find_delays(netlist, library, parasitics, design);
        }
        self.required = vec![INF; num_pins];
        let period = design.clock_period.unwrap_or(INF);

        for &pin in &netlist.cell2pins[TOP_CELL] {
            if netlist.pindirect[pin] == Direction::O {
                let name = netlist.pin_ports[pin].as_str();
                self.required[pin] = design
                    .output_required
                    .get(name)
                    .copied()
                    .unwrap_or(period);
            }
        }
        for pin in 0..num_pins {
            let cell = netlist.pin2cell[pin];
            if cell == TOP_CELL || netlist.pindirect[pin] != Direction::I {
                continue;
            }
            let Some(lib_cell) = liberty_cell(netlist, library, cell) else {
                continue;
            };
            let port = netlist.pin_ports[pin].as_str();
            for arc_set in lib_cell.arc_sets_to(port) {
                if arc_set.role != TimingRole::Setup || period >= INF {
                    continue;
                }
                for arc in &arc_set.arcs {
                    let margin = arc
                        .evaluate(self.slew[pin][arc.in_edge.index()], 0.0)
                        .0;
                    self.required[pin] = self.required[pin].min(period - margin);
                }
            }
        }

        let drvrs = self.level_drvrs.clone();
        for drvr in drvrs.into_iter().rev() {
            if let Some(net) = netlist.pin2net[drvr] {
                for load in netlist.loads(net) {
                    self.required[drvr] = self.required[drvr].min(self.required[load]);
                }
            }
            let cell = netlist.pin2cell[drvr];
            if cell == TOP_CELL {
                continue;
            }
            let Some(lib_cell) = liberty_cell(netlist, library, cell) else {
                continue;
            };
            let load = Self::load_cap(netlist, library, parasitics, drvr);
            let out_port = netlist.pin_ports[drvr].clone();
            for arc_set in lib_cell.arc_sets_to(out_port.as_str()) {
                if arc_set.role != TimingRole::Combinational && !arc_set.role.is_tristate() {
                    continue;
                }
                let Some(in_pin) = netlist.pin_of_cell_port(cell, arc_set.from_port.as_str())
                else {
                    continue;
                };
                for arc in &arc_set.arcs {
                    let in_slew = self.slew[in_pin][arc.in_edge.index()];
                    let delay = arc.evaluate(in_slew, load).0;
                    let req = self.required[drvr] - delay;
                    self.required[in_pin] = self.required[in_pin].min(req);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlist::Point;

    const LIB: &str = r#"
    library (tm_test) {
      time_unit : "1ns";
      capacitive_load_unit (1,pf);
      operating_conditions (typ) { process : 1.0; voltage : 1.8; temperature : 25.0; }
      cell (BUF1) {
        cell_footprint : buf;
        pin (A) { direction : input; capacitance : 0.005; }
        pin (Y) { direction : output; function : "A";
          timing () {
            related_pin : "A"; timing_sense : positive_unate;
            cell_rise (scalar) { values ("0.10"); }
            cell_fall (scalar) { values ("0.10"); }
            rise_transition (scalar) { values ("0.05"); }
            fall_transition (scalar) { values ("0.05"); }
          }
        }
      }
      cell (DFF1) {
        pin (CK) { direction : input; clock : true; capacitance : 0.003; }
        pin (D) { direction : input; capacitance : 0.002;
          timing () {
            related_pin : "CK"; timing_type : setup_rising;
            rise_constraint (scalar) { values ("0.10"); }
            fall_constraint (scalar) { values ("0.10"); }
          }
        }
        pin (Q) { direction : output; function : "IQ";
          timing () {
            related_pin : "CK"; timing_type : rising_edge;
            cell_rise (scalar) { values ("0.15"); }
            cell_fall (scalar) { values ("0.15"); }
            rise_transition (scalar) { values ("0.08"); }
            fall_transition (scalar) { values ("0.08"); }
          }
        }
      }
    }
    "#;

    /// in -> u1 -> u2 -> out buffer chain, plus a DFF clocked by clk whose
    /// D input hangs off u2's output net.
    fn chain_design() -> (Library, Netlist, DesignInfo) {
        let lib = Library::parse(LIB).unwrap();
        let buf = lib.get_cell("BUF1").unwrap().clone();
        let dff = lib.get_cell("DFF1").unwrap().clone();
        let mut netlist = Netlist::new("chain", 1000.0);
        let n_in = netlist.make_net("in").unwrap();
        let n_mid = netlist.make_net("mid").unwrap();
        let n_out = netlist.make_net("out").unwrap();
        let n_clk = netlist.make_net("clk").unwrap();
        let u1 = netlist.make_instance(&buf, "u1").unwrap();
        let u2 = netlist.make_instance(&buf, "u2").unwrap();
        let ff = netlist.make_instance(&dff, "ff").unwrap();
        for (cell, loc) in [(u1, (0, 0)), (u2, (1000, 0)), (ff, (2000, 0))] {
            netlist.set_location(cell, Point::new(loc.0, loc.1));
        }
        netlist
            .make_top_port("in", Direction::I, Some(Point::new(0, 0)))
            .unwrap();
        netlist
            .make_top_port("clk", Direction::I, Some(Point::new(0, 1000)))
            .unwrap();
        netlist
            .make_top_port("out", Direction::O, Some(Point::new(3000, 0)))
            .unwrap();
        netlist.connect_pin(TOP_CELL, "in", n_in).unwrap();
        netlist.connect_pin(TOP_CELL, "clk", n_clk).unwrap();
        netlist.connect_pin(TOP_CELL, "out", n_out).unwrap();
        netlist.connect_pin(u1, "A", n_in).unwrap();
        netlist.connect_pin(u1, "Y", n_mid).unwrap();
        netlist.connect_pin(u2, "A", n_mid).unwrap();
        netlist.connect_pin(u2, "Y", n_out).unwrap();
        netlist.connect_pin(ff, "D", n_out).unwrap();
        netlist.connect_pin(ff, "CK", n_clk).unwrap();

        let design = DesignInfo {
            clock_period: Some(1.0e-9),
            clock_ports: vec!["clk".to_string()],
            ..DesignInfo::default()
        };
        (lib, netlist, design)
    }

    #[test]
    fn test_levelization_order() {
        let (lib, netlist, design) = chain_design();
        let mut timing = TimingGraph::new();
        let drvrs = timing
            .levelized_drivers(&netlist, &lib, &design)
            .to_vec();
        let names: Vec<String> = drvrs.iter().map(|&p| netlist.pin_full_name(p)).collect();
        // Ports and the sequential output sit at level 0 in lexical
        // order; the buffer chain follows by depth.
        assert_eq!(names, ["clk", "ff/Q", "in", "u1/Y", "u2/Y"]);
        let u1y = netlist.pin_of_cell_port(netlist.find_instance("u1").unwrap(), "Y").unwrap();
        let u2y = netlist.pin_of_cell_port(netlist.find_instance("u2").unwrap(), "Y").unwrap();
        assert!(timing.level(u1y) < timing.level(u2y));
    }

    #[test]
    fn test_load_cap_sums_fanout() {
        let (lib, netlist, _) = chain_design();
        let parasitics = Parasitics::new();
        let u2 = netlist.find_instance("u2").unwrap();
        let u2y = netlist.pin_of_cell_port(u2, "Y").unwrap();
        // u2/Y drives ff/D only: 2 fF.
        let cap = TimingGraph::load_cap(&netlist, &lib, &parasitics, u2y);
        assert!((cap - 2.0e-15).abs() < 1e-20);
    }

    #[test]
    fn test_arrivals_accumulate() {
        let (lib, netlist, design) = chain_design();
        let parasitics = Parasitics::new();
        let mut timing = TimingGraph::new();
        timing.find_delays(&netlist, &lib, &parasitics, &design);
        let u2 = netlist.find_instance("u2").unwrap();
        let u2y = netlist.pin_of_cell_port(u2, "Y").unwrap();
        // Two buffer stages at 100 ps each.
        assert!((timing.arrival(u2y, Edge::Rise) - 0.2e-9).abs() < 1e-15);
        assert!((timing.slew(u2y, Edge::Rise) - 0.05e-9).abs() < 1e-15);
    }

    #[test]
    fn test_required_from_setup() {
        let (lib, netlist, design) = chain_design();
        let parasitics = Parasitics::new();
        let mut timing = TimingGraph::new();
        timing.find_required(&netlist, &lib, &parasitics, &design);
        let ff = netlist.find_instance("ff").unwrap();
        let ffd = netlist.pin_of_cell_port(ff, "D").unwrap();
        // period - setup = 1ns - 100ps.
        assert!((timing.required(ffd) - 0.9e-9).abs() < 1e-15);
        let u2 = netlist.find_instance("u2").unwrap();
        let u2y = netlist.pin_of_cell_port(u2, "Y").unwrap();
        assert!((timing.required(u2y) - 0.9e-9).abs() < 1e-15);
        // One buffer delay earlier at the stage input.
        let u1 = netlist.find_instance("u1").unwrap();
        let u1y = netlist.pin_of_cell_port(u1, "Y").unwrap();
        assert!((timing.required(u1y) - 0.8e-9).abs() < 1e-15);
    }

    #[test]
    fn test_unconstrained_is_inf() {
        let (lib, netlist, mut design) = chain_design();
        design.clock_period = None;
        let parasitics = Parasitics::new();
        let mut timing = TimingGraph::new();
        timing.find_required(&netlist, &lib, &parasitics, &design);
        let u1 = netlist.find_instance("u1").unwrap();
        let u1y = netlist.pin_of_cell_port(u1, "Y").unwrap();
        assert!(crate::fuzzy::is_inf(timing.required(u1y)));
    }

    #[test]
    fn test_clock_marking_through_buffer() {
        let (lib, mut netlist, design) = chain_design();
        // Insert a clock-tree buffer: clk -> cb -> clkbuf net -> ff/CK.
        let buf = lib.get_cell("BUF1").unwrap().clone();
        let n_clk = netlist.find_net("clk").unwrap();
        let n_cbuf = netlist.make_net("clkbuf").unwrap();
        let cb = netlist.make_instance(&buf, "cb").unwrap();
        netlist.connect_pin(cb, "A", n_clk).unwrap();
        netlist.connect_pin(cb, "Y", n_cbuf).unwrap();
        let ff = netlist.find_instance("ff").unwrap();
        let ffck = netlist.pin_of_cell_port(ff, "CK").unwrap();
        netlist.disconnect_pin(ffck);
        netlist.connect_pin(ff, "CK", n_cbuf).unwrap();

        let mut timing = TimingGraph::new();
        timing.levelized_drivers(&netlist, &lib, &design);
        let cby = netlist.pin_of_cell_port(cb, "Y").unwrap();
        assert!(timing.is_clock(cby));
        assert!(timing.is_clock(ffck));
        let u1 = netlist.find_instance("u1").unwrap();
        let u1y = netlist.pin_of_cell_port(u1, "Y").unwrap();
        assert!(!timing.is_clock(u1y));
    }
}
