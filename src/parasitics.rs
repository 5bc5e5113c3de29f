// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Wire parasitics estimated from routing trees.
//!
//! Each placed net gets a pi-model RC network: one node per pin and per
//! Steiner point, a series resistor per tree edge with half the edge's
//! capacitance lumped at each endpoint. Zero-length edges keep their
//! connectivity through a nominal resistor.

use crate::netlist::Netlist;
use crate::steiner::SteinerTree;
use indexmap::IndexMap;
use std::collections::HashMap;

/// Resistance used for zero-length connectivity edges, ohms.
pub const MIN_RESISTANCE: f64 = 1.0e-3;

/// A node of a parasitic network: a real pin, or an internal Steiner
/// point of the net's routing tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParasiticNode {
    Pin(usize),
    SteinerPt(usize),
}

/// The RC network of one net.
#[derive(Debug, Clone, Default)]
pub struct ParasiticNetwork {
    /// Grounded capacitance per node, farads.
    pub caps: IndexMap<ParasiticNode, f64>,
    pub resistors: Vec<(ParasiticNode, ParasiticNode, f64)>,
}

impl ParasiticNetwork {
    pub fn ensure_node(&mut self, node: ParasiticNode) {
        self.caps.entry(node).or_insert(0.0);
    }

    pub fn incr_cap(&mut self, node: ParasiticNode, cap: f64) {
        *self.caps.entry(node).or_insert(0.0) += cap;
    }

    pub fn make_resistor(&mut self, n1: ParasiticNode, n2: ParasiticNode, res: f64) {
        self.ensure_node(n1);
        self.ensure_node(n2);
        self.resistors.push((n1, n2, res));
    }

    /// Total grounded wire capacitance of the net, farads.
    pub fn wire_cap(&self) -> f64 {
        self.caps.values().sum()
    }

    /// Total series resistance of the net, ohms.
    pub fn total_res(&self) -> f64 {
        self.resistors.iter().map(|&(_, _, r)| r).sum()
    }
}

/// Parasitic networks for all modeled nets, keyed by net id.
#[derive(Debug, Clone, Default)]
pub struct Parasitics {
    nets: HashMap<usize, ParasiticNetwork>,
}

impl Parasitics {
    pub fn new() -> Parasitics {
        Parasitics::default()
    }

    /// Start a fresh network for a net, discarding any previous model.
    pub fn make_parasitic_network(&mut self, net: usize) -> &mut ParasiticNetwork {
        let network = self.nets.entry(net).or_default();
        *network = ParasiticNetwork::default();
        network
    }

    pub fn network(&self, net: usize) -> Option<&ParasiticNetwork> {
        self.nets.get(&net)
    }

    pub fn remove(&mut self, net: usize) {
        self.nets.remove(&net);
    }

    /// Wire capacitance of a net, zero when it has no model.
    pub fn wire_cap(&self, net: usize) -> f64 {
        self.nets.get(&net).map(|n| n.wire_cap()).unwrap_or(0.0)
    }
}

fn parasitic_node(tree: &SteinerTree, pt: usize) -> ParasiticNode {
    // A Steiner point sitting on top of a pin uses the pin's node.
    match tree.pin(pt).or_else(|| tree.alias(pt)) {
        Some(pin) => ParasiticNode::Pin(pin),
        None => ParasiticNode::SteinerPt(pt),
    }
}

/// Build the pi-model parasitics for one net from its routing tree.
///
/// Nets without a placed routing tree lose any stale model and are left
/// unmodeled.
pub fn make_net_parasitics(
    parasitics: &mut Parasitics,
    netlist: &Netlist,
    net: usize,
    wire_res_per_length: f64,
    wire_cap_per_length: f64,
) {
    let Some(tree) = SteinerTree::build(netlist, net) else {
        parasitics.remove(net);
        return;
    };
    clilog::debug!("parasitics for net {}", netlist.net_names[net]);
    let network = parasitics.make_parasitic_network(net);
    for (pt1, pt2, length_dbu) in tree.branches() {
        let n1 = parasitic_node(&tree, pt1);
        let n2 = parasitic_node(&tree, pt2);
        if n1 == n2 {
            continue;
        }
        if length_dbu == 0 {
            network.make_resistor(n1, n2, MIN_RESISTANCE);
        } else {
            let wire_length = netlist.dbu_to_meters(length_dbu);
            let wire_cap = wire_length * wire_cap_per_length;
            let wire_res = wire_length * wire_res_per_length;
            network.incr_cap(n1, wire_cap / 2.0);
            network.make_resistor(n1, n2, wire_res);
            network.incr_cap(n2, wire_cap / 2.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liberty::Library;
    use crate::netlist::{Netlist, Point};

    const LIB: &str = r#"
    library (par_test) {
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
    }
    "#;

    fn one_sink_net(sink_loc: Point) -> (Netlist, usize) {
        let lib = Library::parse(LIB).unwrap();
        let buf = lib.get_cell("BUF1").unwrap();
        let mut netlist = Netlist::new("t", 1000.0);
        let net = netlist.make_net("n").unwrap();
        let u0 = netlist.make_instance(buf, "drv").unwrap();
        netlist.set_location(u0, Point::new(0, 0));
        netlist.connect_pin(u0, "Y", net).unwrap();
        let u1 = netlist.make_instance(buf, "s0").unwrap();
        netlist.set_location(u1, sink_loc);
        netlist.connect_pin(u1, "A", net).unwrap();
        (netlist, net)
    }

    #[test]
    fn test_pi_model_sums() {
        // 1 mm of wire at 1e-10 F/m and 1e2 ohm/m.
        let (netlist, net) = one_sink_net(Point::new(1_000_000, 0));
        let mut parasitics = Parasitics::new();
        make_net_parasitics(&mut parasitics, &netlist, net, 1.0e2, 1.0e-10);
        let network = parasitics.network(net).unwrap();
        assert!((network.wire_cap() - 1.0e-13).abs() < 1e-20);
        assert!((network.total_res() - 0.1).abs() < 1e-9);
        assert_eq!(network.resistors.len(), 1);
        // Cap split evenly across the two endpoints.
        for &cap in network.caps.values() {
            assert!((cap - 0.5e-13).abs() < 1e-20);
        }
    }

    #[test]
    fn test_zero_length_edge_keeps_connectivity() {
        let (netlist, net) = one_sink_net(Point::new(0, 0));
        let mut parasitics = Parasitics::new();
        make_net_parasitics(&mut parasitics, &netlist, net, 1.0e2, 1.0e-10);
        let network = parasitics.network(net).unwrap();
        assert_eq!(network.resistors.len(), 1);
        assert_eq!(network.resistors[0].2, MIN_RESISTANCE);
        assert_eq!(network.wire_cap(), 0.0);
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let (netlist, net) = one_sink_net(Point::new(500_000, 250_000));
        let mut parasitics = Parasitics::new();
        make_net_parasitics(&mut parasitics, &netlist, net, 1.0e2, 1.0e-10);
        let cap1 = parasitics.wire_cap(net);
        let res1 = parasitics.network(net).unwrap().total_res();
        make_net_parasitics(&mut parasitics, &netlist, net, 1.0e2, 1.0e-10);
        let cap2 = parasitics.wire_cap(net);
        let res2 = parasitics.network(net).unwrap().total_res();
        assert_eq!(cap1, cap2);
        assert_eq!(res1, res2);
    }

    #[test]
    fn test_unmodeled_net_has_zero_cap() {
        let parasitics = Parasitics::new();
        assert_eq!(parasitics.wire_cap(42), 0.0);
    }
}
