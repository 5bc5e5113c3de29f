// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Rectilinear routing trees for placed nets.
//!
//! A net's routing estimate is a binary tree: leaves are the net's load
//! pins, internal nodes are Steiner points, and the root is the driver.
//! Edges carry Manhattan wire lengths in DBU. The topology comes from a
//! Prim spanning tree over pin locations seeded at the driver; nodes with
//! more than two children are split into chains of zero-length junctions
//! at the same location.

use crate::netlist::{Netlist, Point};

/// Sentinel for an absent child.
pub const STEINER_NULL: usize = usize::MAX;

/// A binary Steiner tree for one net.
#[derive(Debug, Clone)]
pub struct SteinerTree {
    /// The root node, corresponding to the driver pin.
    pub drvr_pt: usize,
    locations: Vec<Point>,
    pins: Vec<Option<usize>>,
    aliases: Vec<Option<usize>>,
    left: Vec<usize>,
    right: Vec<usize>,
}

impl SteinerTree {
    /// Build the routing tree for a net.
    ///
    /// Returns `None` when the net has no driver, no loads, or any
    /// unplaced pin (an unplaced tree cannot be estimated).
    pub fn build(netlist: &Netlist, net: usize) -> Option<SteinerTree> {
        let drvr_pin = netlist.drivers(net).next()?;
        let drvr_loc = netlist.pin_location(drvr_pin)?;
        let mut load_pins = Vec::new();
        let mut locs = vec![drvr_loc];
        for pin in netlist.loads(net) {
            locs.push(netlist.pin_location(pin)?);
            load_pins.push(pin);
        }
        if load_pins.is_empty() {
            return None;
        }

        // Prim spanning tree over Manhattan distance, seeded at the driver.
        let n = locs.len();
        let mut in_tree = vec![false; n];
        let mut parent = vec![0usize; n];
        let mut dist: Vec<i64> = locs.iter().map(|&l| drvr_loc.manhattan_distance(l)).collect();
        in_tree[0] = true;
        for _ in 1..n {
            let mut best = usize::MAX;
            for i in 1..n {
                if !in_tree[i] && (best == usize::MAX || dist[i] < dist[best]) {
                    best = i;
                }
            }
            in_tree[best] = true;
            for i in 1..n {
                if !in_tree[i] {
                    let d = locs[best].manhattan_distance(locs[i]);
                    if d < dist[i] {
                        dist[i] = d;
                        parent[i] = best;
                    }
                }
            }
        }
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
        for i in 1..n {
            children[parent[i]].push(i);
        }

        let mut tree = SteinerTree {
            drvr_pt: STEINER_NULL,
            locations: Vec::new(),
            pins: Vec::new(),
            aliases: Vec::new(),
            left: Vec::new(),
            right: Vec::new(),
        };
        let child =
            tree.binarize_children(&children, &locs, &load_pins, 0, drvr_loc, Some(drvr_pin));
        let root = tree.push(drvr_loc, Some(drvr_pin), Some(drvr_pin));
        tree.left[root] = child;
        tree.drvr_pt = root;
        Some(tree)
    }

    fn push(&mut self, location: Point, pin: Option<usize>, alias: Option<usize>) -> usize {
        let id = self.locations.len();
        self.locations.push(location);
        self.pins.push(pin);
        self.aliases.push(alias);
        self.left.push(STEINER_NULL);
        self.right.push(STEINER_NULL);
        id
    }

    /// Build the binary subtree for one spanning-tree node.
    fn binarize_node(
        &mut self,
        children: &[Vec<usize>],
        locs: &[Point],
        load_pins: &[usize],
        node: usize,
    ) -> usize {
        let pin = load_pins[node - 1];
        let leaf = self.push(locs[node], Some(pin), Some(pin));
        if children[node].is_empty() {
            return leaf;
        }
        let mut acc = leaf;
        for &child in &children[node] {
            let sub = self.binarize_node(children, locs, load_pins, child);
            let junction = self.push(locs[node], None, Some(pin));
            self.left[junction] = acc;
            self.right[junction] = sub;
            acc = junction;
        }
        acc
    }

    /// Combine a node's child subtrees into a single tree rooted at the
    /// node's location, chaining junctions for fanout beyond two.
    fn binarize_children(
        &mut self,
        children: &[Vec<usize>],
        locs: &[Point],
        load_pins: &[usize],
        node: usize,
        location: Point,
        alias: Option<usize>,
    ) -> usize {
        let mut acc = STEINER_NULL;
        for &child in &children[node] {
            let sub = self.binarize_node(children, locs, load_pins, child);
            if acc == STEINER_NULL {
                acc = sub;
            } else {
                let junction = self.push(location, None, alias);
                self.left[junction] = acc;
                self.right[junction] = sub;
                acc = junction;
            }
        }
        acc
    }

    pub fn num_pts(&self) -> usize {
        self.locations.len()
    }

    pub fn left(&self, pt: usize) -> usize {
        self.left[pt]
    }

    pub fn right(&self, pt: usize) -> usize {
        self.right[pt]
    }

    pub fn location(&self, pt: usize) -> Point {
        self.locations[pt]
    }

    /// The load pin at a leaf, if this point is a sink.
    pub fn pin(&self, pt: usize) -> Option<usize> {
        self.pins[pt]
    }

    /// The pin this Steiner point coincides with, if any.
    pub fn alias(&self, pt: usize) -> Option<usize> {
        self.aliases[pt]
    }

    /// All (parent, child, wire length DBU) edges, root first.
    pub fn branches(&self) -> Vec<(usize, usize, i64)> {
        let mut edges = Vec::new();
        let mut stack = vec![self.drvr_pt];
        while let Some(pt) = stack.pop() {
            for child in [self.left[pt], self.right[pt]] {
                if child != STEINER_NULL {
                    let length = self.locations[pt].manhattan_distance(self.locations[child]);
                    edges.push((pt, child, length));
                    stack.push(child);
                }
            }
        }
        edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liberty::Library;
    use crate::netlist::Netlist;

    const LIB: &str = r#"
    library (st_test) {
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

    /// One driver at `drvr` fanning out to a buffer input at each sink.
    fn fanout_net(drvr: (i64, i64), sinks: &[(i64, i64)]) -> (Netlist, usize, Vec<usize>) {
        let lib = Library::parse(LIB).unwrap();
        let buf = lib.get_cell("BUF1").unwrap();
        let mut netlist = Netlist::new("t", 1000.0);
        let net = netlist.make_net("n").unwrap();
        let u0 = netlist.make_instance(buf, "drv").unwrap();
        netlist.set_location(u0, Point::new(drvr.0, drvr.1));
        netlist.connect_pin(u0, "Y", net).unwrap();
        let mut sink_pins = Vec::new();
        for (i, &(x, y)) in sinks.iter().enumerate() {
            let u = netlist.make_instance(buf, &format!("s{}", i)).unwrap();
            netlist.set_location(u, Point::new(x, y));
            sink_pins.push(netlist.connect_pin(u, "A", net).unwrap());
        }
        (netlist, net, sink_pins)
    }

    #[test]
    fn test_single_sink() {
        let (netlist, net, sinks) = fanout_net((0, 0), &[(1000, 0)]);
        let tree = SteinerTree::build(&netlist, net).unwrap();
        let root = tree.drvr_pt;
        assert_eq!(tree.location(root), Point::new(0, 0));
        let leaf = tree.left(root);
        assert_ne!(leaf, STEINER_NULL);
        assert_eq!(tree.right(root), STEINER_NULL);
        assert_eq!(tree.pin(leaf), Some(sinks[0]));
        let branches = tree.branches();
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].2, 1000);
    }

    #[test]
    fn test_two_sinks_junction() {
        let (netlist, net, sinks) = fanout_net((0, 0), &[(1000, 0), (0, 2000)]);
        let tree = SteinerTree::build(&netlist, net).unwrap();
        let junction = tree.left(tree.drvr_pt);
        assert!(tree.pin(junction).is_none());
        let (l, r) = (tree.left(junction), tree.right(junction));
        assert_eq!(tree.pin(l), Some(sinks[0]));
        assert_eq!(tree.pin(r), Some(sinks[1]));
        // Root-to-junction edge is zero length; sink edges carry the wire.
        let total: i64 = tree.branches().iter().map(|&(_, _, len)| len).sum();
        assert_eq!(total, 3000);
    }

    #[test]
    fn test_chain_topology() {
        // The middle sink is on the path to the far sink; the spanning tree
        // should route through it rather than star from the driver.
        let (netlist, net, _) = fanout_net((0, 0), &[(500, 0), (1000, 0)]);
        let tree = SteinerTree::build(&netlist, net).unwrap();
        let total: i64 = tree.branches().iter().map(|&(_, _, len)| len).sum();
        assert_eq!(total, 1000);
    }

    #[test]
    fn test_unplaced_returns_none() {
        let lib = Library::parse(LIB).unwrap();
        let buf = lib.get_cell("BUF1").unwrap();
        let mut netlist = Netlist::new("t", 1000.0);
        let net = netlist.make_net("n").unwrap();
        let u0 = netlist.make_instance(buf, "drv").unwrap();
        netlist.set_location(u0, Point::new(0, 0));
        netlist.connect_pin(u0, "Y", net).unwrap();
        let u1 = netlist.make_instance(buf, "s0").unwrap();
        netlist.connect_pin(u1, "A", net).unwrap();
        // s0 has no location.
        assert!(SteinerTree::build(&netlist, net).is_none());
    }

    #[test]
    fn test_driverless_returns_none() {
        let lib = Library::parse(LIB).unwrap();
        let buf = lib.get_cell("BUF1").unwrap();
        let mut netlist = Netlist::new("t", 1000.0);
        let net = netlist.make_net("n").unwrap();
        let u1 = netlist.make_instance(buf, "s0").unwrap();
        netlist.set_location(u1, Point::new(0, 0));
        netlist.connect_pin(u1, "A", net).unwrap();
        assert!(SteinerTree::build(&netlist, net).is_none());
    }
}
