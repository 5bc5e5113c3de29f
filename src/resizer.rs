// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Gate resizing and rebuffering.
//!
//! Two passes over a placed netlist:
//!
//! 1. **Resize to target slew**: characterize each library cell with the
//!    load capacitance that reproduces a canonical output slew, then walk
//!    drivers in reverse level order swapping every cell for the
//!    drive-strength equivalent whose target load best matches its actual
//!    load.
//! 2. **Rebuffer**: for drivers violating max-capacitance or max-slew
//!    limits, run a bottom-up dynamic program over the net's routing tree
//!    that enumerates Pareto-optimal (capacitance, required time) options,
//!    then materialize the winning option top-down as buffer instances and
//!    split nets.

use crate::design::DesignInfo;
use crate::fuzzy::{self, INF};
use crate::liberty::{Cell, Edge, Library, TimingArc};
use crate::netlist::{Netlist, Point, TOP_CELL};
use crate::parasitics::{make_net_parasitics, Parasitics};
use crate::steiner::{SteinerTree, STEINER_NULL};
use crate::timing::{liberty_cell, liberty_port, TimingGraph};
use compact_str::CompactString;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fmt;

/// Starting point of the target-load bisection, farads.
const TARGET_LOAD_CAP_INIT: f64 = 1.0e-12;

/// Pass configuration.
#[derive(Debug, Clone, Default)]
pub struct ResizerOptions {
    /// Resize instances to their target load.
    pub resize: bool,
    /// Rebuffer drivers over their capacitance limit.
    pub repair_max_cap: bool,
    /// Rebuffer drivers over their slew limit.
    pub repair_max_slew: bool,
    /// Buffer cell used for insertion; required when repairing.
    pub buffer_cell: Option<String>,
    /// Wire resistance, ohms/meter.
    pub wire_res_per_length: f64,
    /// Wire capacitance, farads/meter.
    pub wire_cap_per_length: f64,
    /// Operating condition name; library default when absent.
    pub corner: Option<String>,
}

/// Counters accumulated over one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResizeReport {
    pub resize_count: usize,
    pub inserted_buffer_count: usize,
    pub rebuffer_net_count: usize,
}

impl fmt::Display for ResizeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Resized {} instances.", self.resize_count)?;
        write!(
            f,
            "Inserted {} buffers in {} nets.",
            self.inserted_buffer_count, self.rebuffer_net_count
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RebufferKind {
    Sink,
    Junction,
    Wire,
    Buffer,
}

/// One node of the rebuffering option DAG. Options are arena-allocated
/// per rebuffered net and reference each other by index.
#[derive(Debug, Clone)]
struct RebufferOption {
    kind: RebufferKind,
    /// Downstream capacitance seen by a driver placed here, farads.
    cap: f64,
    /// Required time at this node, seconds.
    required: f64,
    /// Where a buffer would land if this option is chosen.
    location: Point,
    /// The sink pin; only for `Sink` options.
    load_pin: Option<usize>,
    ref_: Option<usize>,
    ref2: Option<usize>,
}

/// Arena owning all options produced while rebuffering one net.
#[derive(Debug, Default)]
struct RebufferArena {
    options: Vec<RebufferOption>,
}

impl RebufferArena {
    fn push(&mut self, option: RebufferOption) -> usize {
        self.options.push(option);
        self.options.len() - 1
    }
}

/// The optimizer. Owns the netlist and derived state; borrows the
/// library.
pub struct Resizer<'a> {
    pub netlist: Netlist,
    library: &'a Library,
    design: DesignInfo,
    timing: TimingGraph,
    parasitics: Parasitics,

    resize: bool,
    repair_max_cap: bool,
    repair_max_slew: bool,
    buffer_cell: Option<CompactString>,
    wire_res: f64,
    wire_cap: f64,
    corner: CompactString,

    target_load_map: Option<HashMap<CompactString, f64>>,
    tgt_slews: Option<[f64; 2]>,

    resize_count: usize,
    inserted_buffer_count: usize,
    rebuffer_net_count: usize,
    unique_net_index: usize,
    unique_buffer_index: usize,
}

impl<'a> Resizer<'a> {
    /// Validate the configuration and bind it to a netlist. Fails fast
    /// before any mutation.
    pub fn new(
        netlist: Netlist,
        library: &'a Library,
        design: DesignInfo,
        options: ResizerOptions,
    ) -> Result<Resizer<'a>, String> {
        if options.wire_res_per_length <= 0.0 {
            return Err(format!(
                "wire resistance must be positive, got {}",
                options.wire_res_per_length
            ));
        }
        if options.wire_cap_per_length <= 0.0 {
            return Err(format!(
                "wire capacitance must be positive, got {}",
                options.wire_cap_per_length
            ));
        }
        let corner = library.find_corner(options.corner.as_deref())?.name.clone();
        let buffer_cell = match &options.buffer_cell {
            Some(name) => {
                let cell = library
                    .get_cell(name)
                    .ok_or_else(|| format!("buffer cell {} not found in library", name))?;
                let (input, output) = cell
                    .buffer_ports()
                    .ok_or_else(|| format!("cell {} is not a buffer", name))?;
                if !cell
                    .arc_sets_to(output.name.as_str())
                    .any(|s| s.from_port == input.name)
                {
                    return Err(format!("buffer cell {} has no timing model", name));
                }
                Some(CompactString::from(name.as_str()))
            }
            None if options.repair_max_cap || options.repair_max_slew => {
                return Err("repairing violations requires a buffer cell".to_string());
            }
            None => None,
        };
        Ok(Resizer {
            netlist,
            library,
            design,
            timing: TimingGraph::new(),
            parasitics: Parasitics::new(),
            resize: options.resize,
            repair_max_cap: options.repair_max_cap,
            repair_max_slew: options.repair_max_slew,
            buffer_cell,
            wire_res: options.wire_res_per_length,
            wire_cap: options.wire_cap_per_length,
            corner,
            target_load_map: None,
            tgt_slews: None,
            resize_count: 0,
            inserted_buffer_count: 0,
            rebuffer_net_count: 0,
            unique_net_index: 1,
            unique_buffer_index: 1,
        })
    }

    /// Switch operating conditions, dropping the characterization caches.
    pub fn set_corner(&mut self, name: &str) -> Result<(), String> {
        let corner = self.library.find_corner(Some(name))?.name.clone();
        if corner != self.corner {
            self.corner = corner;
            self.target_load_map = None;
            self.tgt_slews = None;
        }
        Ok(())
    }

    pub fn report(&self) -> ResizeReport {
        ResizeReport {
            resize_count: self.resize_count,
            inserted_buffer_count: self.inserted_buffer_count,
            rebuffer_net_count: self.rebuffer_net_count,
        }
    }

    /// Run the configured passes and return the counters.
    pub fn run(&mut self) -> ResizeReport {
        self.resize_count = 0;
        self.inserted_buffer_count = 0;
        self.rebuffer_net_count = 0;
        self.make_all_net_parasitics();
        self.ensure_target_loads();
        if self.resize {
            self.resize_to_target_slew_pass();
            clilog::info!("Resized {} instances.", self.resize_count);
        }
        if self.repair_max_cap || self.repair_max_slew {
            self.rebuffer_pass();
            clilog::info!(
                "Inserted {} buffers in {} nets.",
                self.inserted_buffer_count,
                self.rebuffer_net_count
            );
        }
        self.report()
    }

    /// Build parasitics for every net from placement.
    fn make_all_net_parasitics(&mut self) {
        for net in 0..self.netlist.num_nets() {
            make_net_parasitics(
                &mut self.parasitics,
                &self.netlist,
                net,
                self.wire_res,
                self.wire_cap,
            );
        }
    }

    ////////////////////////////////////////////////////////////////
    // Characterization

    /// The canonical output slews (rise, fall) buffers in this library
    /// naturally produce under moderate load.
    pub fn target_slews(&mut self) -> [f64; 2] {
        self.ensure_buffer_target_slews();
        self.tgt_slews.unwrap_or([0.0; 2])
    }

    /// The characterized target load of a cell, farads.
    pub fn target_load(&mut self, cell: &str) -> f64 {
        self.ensure_target_loads();
        self.target_load_map
            .as_ref()
            .and_then(|m| m.get(cell).copied())
            .unwrap_or(0.0)
    }

    fn ensure_buffer_target_slews(&mut self) {
        if self.tgt_slews.is_some() {
            return;
        }
        let mut slews = [0.0f64; 2];
        let mut counts = [0usize; 2];
        for buffer in self.library.buffers() {
            let Some((input, output)) = buffer.buffer_ports() else {
                continue;
            };
            for arc_set in buffer.arc_sets_to(output.name.as_str()) {
                if arc_set.from_port != input.name {
                    continue;
                }
                for arc in &arc_set.arcs {
                    let load_cap = input.capacitance_edge(arc.in_edge) * 10.0;
                    let (_, slew) = arc.evaluate(0.0, load_cap);
                    // Feed the slew back once so the sample is
                    // self-consistent.
                    let (_, slew) = arc.evaluate(slew, load_cap);
                    slews[arc.out_edge.index()] += slew;
                    counts[arc.out_edge.index()] += 1;
                }
            }
        }
        for i in 0..2 {
            if counts[i] > 0 {
                slews[i] /= counts[i] as f64;
            }
        }
        clilog::debug!(
            "target slews: rise {:.3e} s, fall {:.3e} s",
            slews[0],
            slews[1]
        );
        self.tgt_slews = Some(slews);
    }

    fn ensure_target_loads(&mut self) {
        if self.target_load_map.is_some() {
            return;
        }
        self.ensure_buffer_target_slews();
        let tgt_slews = self.tgt_slews.unwrap_or([0.0; 2]);
        let cells: Vec<&Cell> = self.library.cells.values().collect();
        // Per-cell characterization is independent; the reduction below
        // stays in library order for determinism.
        let loads: Vec<(CompactString, f64)> = cells
            .par_iter()
            .map(|&cell| (cell.name.clone(), find_target_load_for_cell(cell, &tgt_slews)))
            .collect();
        let mut map = HashMap::new();
        for (name, load) in loads {
            clilog::debug!("{} target_load = {:.2e}", name, load);
            map.insert(name, load);
        }
        self.target_load_map = Some(map);
    }

    ////////////////////////////////////////////////////////////////
    // Resize pass

    fn resize_to_target_slew_pass(&mut self) {
        let drvrs = self
            .timing
            .levelized_drivers(&self.netlist, self.library, &self.design)
            .to_vec();
        // Reverse level order: a driver's fanout is already final when it
        // is sized.
        for &drvr in drvrs.iter().rev() {
            let inst = self.netlist.pin2cell[drvr];
            if inst == TOP_CELL {
                continue;
            }
            self.resize_to_target_slew(inst);
        }
    }

    /// Replace one instance with its best drive-strength equivalent.
    fn resize_to_target_slew(&mut self, inst: usize) {
        let Some(cell) = liberty_cell(&self.netlist, self.library, inst) else {
            return;
        };
        // Only single-output gates are sized.
        let Some(output) = self.single_output_pin(inst) else {
            return;
        };
        let load_cap =
            TimingGraph::load_cap(&self.netlist, self.library, &self.parasitics, output);
        if load_cap <= 0.0 {
            return;
        }
        let Some(target_load_map) = self.target_load_map.as_ref() else {
            return;
        };
        let mut best_cell: Option<&Cell> = None;
        let mut best_ratio = 0.0;
        for name in self.library.equiv_cells(cell) {
            let Some(candidate) = self.library.get_cell(name) else {
                continue;
            };
            let target_load = target_load_map.get(name).copied().unwrap_or(0.0);
            let mut ratio = target_load / load_cap;
            if ratio > 1.0 {
                ratio = 1.0 / ratio;
            }
            if ratio > best_ratio {
                best_ratio = ratio;
                best_cell = Some(candidate);
            }
        }
        if let Some(best) = best_cell {
            if best.name != cell.name {
                // A physically backed cell may only swap with another
                // physically backed cell so pin geometry stays aligned.
                if cell.is_physical() && !best.is_physical() {
                    return;
                }
                clilog::debug!(
                    "resize {}: {} -> {}",
                    self.netlist.cell_names[inst],
                    cell.name,
                    best.name
                );
                match self.netlist.replace_cell(inst, best) {
                    Ok(()) => self.resize_count += 1,
                    Err(e) => clilog::warn!(
                        "cannot replace {}: {}",
                        self.netlist.cell_names[inst],
                        e
                    ),
                }
            }
        }
    }

    /// The single output pin of an instance, or `None` for multi-output
    /// cells.
    fn single_output_pin(&self, inst: usize) -> Option<usize> {
        let mut output = None;
        for &pin in &self.netlist.cell2pins[inst] {
            if self.netlist.pindirect[pin] == netlistdb::Direction::O {
                if output.is_some() {
                    return None;
                }
                output = Some(pin);
            }
        }
        output
    }

    ////////////////////////////////////////////////////////////////
    // Violation checks

    fn has_max_cap_violation(&self, drvr_pin: usize) -> bool {
        let Some(port) = liberty_port(&self.netlist, self.library, drvr_pin) else {
            return false;
        };
        let Some(limit) = port.max_capacitance else {
            return false;
        };
        TimingGraph::load_cap(&self.netlist, self.library, &self.parasitics, drvr_pin) > limit
    }

    fn has_max_slew_violation(&self, drvr_pin: usize) -> bool {
        let Some(limit) = self.slew_limit(drvr_pin) else {
            return false;
        };
        Edge::both()
            .into_iter()
            .any(|edge| self.timing.slew(drvr_pin, edge) > limit)
    }

    /// The tightest applicable max-slew limit for a pin: design-wide,
    /// port or pin specific, and the liberty port's own limit.
    fn slew_limit(&self, pin: usize) -> Option<f64> {
        fn tighten(a: Option<f64>, b: Option<f64>) -> Option<f64> {
            match (a, b) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (Some(a), None) => Some(a),
                (None, b) => b,
            }
        }
        let mut limit = self.design.max_slew;
        if self.netlist.is_top_port(pin) {
            let port = self.netlist.pin_ports[pin].as_str();
            limit = tighten(limit, self.design.port_slew_limits.get(port).copied());
        } else {
            let path = self.netlist.pin_full_name(pin);
            limit = tighten(limit, self.design.pin_slew_limits.get(&path).copied());
            limit = tighten(
                limit,
                liberty_port(&self.netlist, self.library, pin).and_then(|p| p.max_transition),
            );
        }
        limit
    }

    ////////////////////////////////////////////////////////////////
    // Rebuffer pass

    fn rebuffer_pass(&mut self) {
        let Some(buffer_name) = self.buffer_cell.clone() else {
            return;
        };
        let Some(buffer) = self.library.get_cell(buffer_name.as_str()) else {
            return;
        };
        self.timing
            .find_delays(&self.netlist, self.library, &self.parasitics, &self.design);
        self.timing
            .find_required(&self.netlist, self.library, &self.parasitics, &self.design);
        let drvrs = self
            .timing
            .levelized_drivers(&self.netlist, self.library, &self.design)
            .to_vec();
        for &drvr in drvrs.iter().rev() {
            // Hands off the clock tree.
            if self.timing.is_clock(drvr) {
                continue;
            }
            if (self.repair_max_cap && self.has_max_cap_violation(drvr))
                || (self.repair_max_slew && self.has_max_slew_violation(drvr))
            {
                if let Err(e) = self.rebuffer_drvr(drvr, buffer) {
                    clilog::warn!(
                        "rebuffering {} failed: {}",
                        self.netlist.pin_full_name(drvr),
                        e
                    );
                }
            }
        }
    }

    fn rebuffer_drvr(&mut self, drvr_pin: usize, buffer: &Cell) -> Result<(), String> {
        let Some(net) = self.netlist.pin2net[drvr_pin] else {
            return Ok(());
        };
        // For a top-level input port there is no driving gate; size the
        // root choice against the buffer's own output.
        let (drvr_cell, drvr_port) = if self.netlist.is_top_port(drvr_pin) {
            let (_, output) = buffer
                .buffer_ports()
                .ok_or_else(|| format!("cell {} is not a buffer", buffer.name))?;
            (buffer, output.name.clone())
        } else {
            let cell = liberty_cell(&self.netlist, self.library, self.netlist.pin2cell[drvr_pin])
                .ok_or_else(|| {
                    format!("unknown cell type on {}", self.netlist.pin_full_name(drvr_pin))
                })?;
            (cell, self.netlist.pin_ports[drvr_pin].clone())
        };
        let Some(tree) = SteinerTree::build(&self.netlist, net) else {
            return Ok(());
        };
        // Unconstrained drivers have nothing to optimize against.
        if fuzzy::is_inf(self.timing.required(drvr_pin)) {
            return Ok(());
        }
        clilog::debug!("rebuffer driver {}", self.netlist.pin_full_name(drvr_pin));

        let mut arena = RebufferArena::default();
        let root_options = self.rebuffer_bottom_up(
            &mut arena,
            &tree,
            tree.left(tree.drvr_pt),
            tree.drvr_pt,
            1,
            buffer,
        );
        let mut best_required = -INF;
        let mut best = None;
        for &p in &root_options {
            let option = &arena.options[p];
            let required =
                option.required - self.gate_delay(drvr_cell, drvr_port.as_str(), option.cap);
            if fuzzy::REQUIRED.greater(required, best_required) {
                best_required = required;
                best = Some(p);
            }
        }
        if let Some(best) = best {
            let inserted = self.rebuffer_top_down(&arena, best, net, 1, buffer)?;
            if inserted > 0 {
                self.inserted_buffer_count += inserted;
                self.rebuffer_net_count += 1;
            }
        }
        Ok(())
    }

    /// Bottom-up DP over the routing tree. Returns the non-dominated
    /// option set at `k`, already extended to the parent `prev`.
    fn rebuffer_bottom_up(
        &self,
        arena: &mut RebufferArena,
        tree: &SteinerTree,
        k: usize,
        prev: usize,
        level: usize,
        buffer: &Cell,
    ) -> Vec<usize> {
        if k == STEINER_NULL {
            return Vec::new();
        }
        if let Some(pin) = tree.pin(k) {
            if self.netlist.is_driver(pin) {
                return Vec::new();
            }
            let option = RebufferOption {
                kind: RebufferKind::Sink,
                cap: self.pin_capacitance(pin),
                required: self.timing.required(pin),
                location: tree.location(k),
                load_pin: Some(pin),
                ref_: None,
                ref2: None,
            };
            clilog::debug!(
                "{:level$}load {} cap {:.3e} req {:.3e}",
                "",
                self.netlist.pin_full_name(pin),
                option.cap,
                option.required
            );
            let z = vec![arena.push(option)];
            return self.add_wire_and_buffer(arena, z, tree, k, prev, level, buffer);
        }

        // Steiner junction: combine options from both branches.
        let zl = self.rebuffer_bottom_up(arena, tree, tree.left(k), k, level + 1, buffer);
        let zr = self.rebuffer_bottom_up(arena, tree, tree.right(k), k, level + 1, buffer);
        let mut z2: Vec<usize> = Vec::with_capacity(zl.len() * zr.len());
        for &p in &zl {
            for &q in &zr {
                let junction = RebufferOption {
                    kind: RebufferKind::Junction,
                    cap: arena.options[p].cap + arena.options[q].cap,
                    required: arena.options[p].required.min(arena.options[q].required),
                    location: tree.location(k),
                    load_pin: None,
                    ref_: Some(p),
                    ref2: Some(q),
                };
                z2.push(arena.push(junction));
            }
        }
        // Prune dominated options. Comparison happens in the frame where
        // any choice might be capped by a buffer insertion. Quadratic in
        // the option count.
        let keyed: Vec<(f64, f64)> = z2
            .iter()
            .map(|&idx| {
                (
                    self.buffer_required(arena, idx, buffer),
                    arena.options[idx].cap,
                )
            })
            .collect();
        let mut alive = vec![true; z2.len()];
        for i in 0..z2.len() {
            if !alive[i] {
                continue;
            }
            let (t_p, l_p) = keyed[i];
            for j in 0..z2.len() {
                if !alive[j] {
                    continue;
                }
                let (t_q, l_q) = keyed[j];
                if fuzzy::REQUIRED.less(t_q, t_p) && fuzzy::CAP.greater(l_q, l_p) {
                    // q is strictly worse than p on both axes.
                    alive[j] = false;
                }
            }
        }
        let mut z: Vec<usize> = z2
            .iter()
            .zip(&alive)
            .filter(|&(_, &keep)| keep)
            .map(|(&idx, _)| idx)
            .collect();
        // Deterministic order for mutually non-dominated ties.
        z.sort_by(|&a, &b| {
            let oa = &arena.options[a];
            let ob = &arena.options[b];
            oa.cap
                .partial_cmp(&ob.cap)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| (oa.location.x, oa.location.y).cmp(&(ob.location.x, ob.location.y)))
        });
        self.add_wire_and_buffer(arena, z, tree, k, prev, level, buffer)
    }

    /// Extend options at `k` across the wire to `prev`, and offer one
    /// buffered alternative fed by the best candidate.
    fn add_wire_and_buffer(
        &self,
        arena: &mut RebufferArena,
        z: Vec<usize>,
        tree: &SteinerTree,
        k: usize,
        prev: usize,
        level: usize,
        buffer: &Cell,
    ) -> Vec<usize> {
        let k_loc = tree.location(k);
        let prev_loc = tree.location(prev);
        let wire_length_dbu = k_loc.manhattan_distance(prev_loc);
        let wire_length = self.netlist.dbu_to_meters(wire_length_dbu);
        let wire_cap = wire_length * self.wire_cap;
        let wire_res = wire_length * self.wire_res;
        // Lumped R*C product, deliberately not Elmore.
        let wire_delay = wire_res * wire_cap;

        let mut z1 = Vec::with_capacity(z.len() + 1);
        let mut best = -INF;
        let mut best_ref = None;
        for &p in &z {
            let wire_option = RebufferOption {
                kind: RebufferKind::Wire,
                cap: arena.options[p].cap + wire_cap,
                required: arena.options[p].required - wire_delay,
                location: prev_loc,
                load_pin: None,
                ref_: Some(p),
                ref2: None,
            };
            let w = arena.push(wire_option);
            z1.push(w);
            // A single buffer drive strength is considered; options per
            // buffer size would slot in here.
            let buffered = self.buffer_required(arena, w, buffer);
            if fuzzy::REQUIRED.greater(buffered, best) {
                best = buffered;
                best_ref = Some(p);
            }
        }
        if let Some(p) = best_ref {
            let buffer_option = RebufferOption {
                kind: RebufferKind::Buffer,
                cap: self.buffer_input_capacitance(buffer),
                required: best,
                // The buffer lands at the upstream end of the wire.
                location: prev_loc,
                load_pin: None,
                ref_: Some(p),
                ref2: None,
            };
            clilog::debug!(
                "{:level$}buffer cap {:.3e} req {:.3e}",
                "",
                buffer_option.cap,
                buffer_option.required
            );
            z1.push(arena.push(buffer_option));
        }
        z1
    }

    /// Required time of an option when driven through the buffer cell.
    fn buffer_required(&self, arena: &RebufferArena, option: usize, buffer: &Cell) -> f64 {
        arena.options[option].required - self.buffer_delay(buffer, arena.options[option].cap)
    }

    /// Materialize the chosen option chain into the netlist. Returns the
    /// number of buffers inserted.
    fn rebuffer_top_down(
        &mut self,
        arena: &RebufferArena,
        choice: usize,
        net: usize,
        level: usize,
        buffer: &Cell,
    ) -> Result<usize, String> {
        let option = &arena.options[choice];
        match option.kind {
            RebufferKind::Buffer => {
                let net2_name = self.make_unique_net_name();
                let buffer_name = self.make_unique_buffer_name();
                let net2 = self.netlist.make_net(&net2_name)?;
                let buffer_inst = self.netlist.make_instance(buffer, &buffer_name)?;
                self.timing.invalidate();
                let (input, output) = buffer
                    .buffer_ports()
                    .ok_or_else(|| format!("cell {} is not a buffer", buffer.name))?;
                let (input, output) = (input.name.clone(), output.name.clone());
                clilog::debug!(
                    "{:level$}insert {} -> {} -> {}",
                    "",
                    self.netlist.net_names[net],
                    buffer_name,
                    net2_name
                );
                self.netlist.connect_pin(buffer_inst, input.as_str(), net)?;
                self.netlist.connect_pin(buffer_inst, output.as_str(), net2)?;
                self.netlist.set_location(buffer_inst, option.location);
                let fanout = option
                    .ref_
                    .ok_or_else(|| "buffer option without fanout".to_string())?;
                self.rebuffer_top_down(arena, fanout, net2, level + 1, buffer)?;
                make_net_parasitics(
                    &mut self.parasitics,
                    &self.netlist,
                    net,
                    self.wire_res,
                    self.wire_cap,
                );
                make_net_parasitics(
                    &mut self.parasitics,
                    &self.netlist,
                    net2,
                    self.wire_res,
                    self.wire_cap,
                );
                Ok(1)
            }
            RebufferKind::Wire => {
                let fanout = option
                    .ref_
                    .ok_or_else(|| "wire option without fanout".to_string())?;
                self.rebuffer_top_down(arena, fanout, net, level + 1, buffer)
            }
            RebufferKind::Junction => {
                let left = option
                    .ref_
                    .ok_or_else(|| "junction option without fanout".to_string())?;
                let right = option
                    .ref2
                    .ok_or_else(|| "junction option without fanout".to_string())?;
                let count_left = self.rebuffer_top_down(arena, left, net, level + 1, buffer)?;
                let count_right = self.rebuffer_top_down(arena, right, net, level + 1, buffer)?;
                Ok(count_left + count_right)
            }
            RebufferKind::Sink => {
                let load_pin = option
                    .load_pin
                    .ok_or_else(|| "sink option without load pin".to_string())?;
                if self.netlist.pin2net[load_pin] != Some(net) {
                    // Splice the load onto the buffered subtree's net.
                    let load_inst = self.netlist.pin2cell[load_pin];
                    let load_port = self.netlist.pin_ports[load_pin].clone();
                    self.netlist.disconnect_pin(load_pin);
                    self.netlist.connect_pin(load_inst, load_port.as_str(), net)?;
                    self.timing.invalidate();
                }
                Ok(0)
            }
        }
    }

    fn make_unique_net_name(&mut self) -> String {
        loop {
            let name = format!("net{}", self.unique_net_index);
            self.unique_net_index += 1;
            if self.netlist.find_net(&name).is_none() {
                return name;
            }
        }
    }

    fn make_unique_buffer_name(&mut self) -> String {
        loop {
            let name = format!("buffer{}", self.unique_buffer_index);
            self.unique_buffer_index += 1;
            if self.netlist.find_instance(&name).is_none() {
                return name;
            }
        }
    }

    ////////////////////////////////////////////////////////////////
    // Gate delay helpers

    fn pin_capacitance(&self, pin: usize) -> f64 {
        liberty_port(&self.netlist, self.library, pin)
            .map(|p| p.capacitance())
            .unwrap_or(0.0)
    }

    fn buffer_input_capacitance(&self, buffer: &Cell) -> f64 {
        buffer
            .buffer_ports()
            .map(|(input, _)| input.capacitance())
            .unwrap_or(0.0)
    }

    fn buffer_delay(&self, buffer: &Cell, load_cap: f64) -> f64 {
        match buffer.buffer_ports() {
            Some((_, output)) => self.gate_delay(buffer, output.name.as_str(), load_cap),
            None => 0.0,
        }
    }

    /// Worst delay through a cell to the given output at the given load,
    /// with input slews pinned to the library target slews.
    fn gate_delay(&self, cell: &Cell, out_port: &str, load_cap: f64) -> f64 {
        let tgt_slews = self.tgt_slews.unwrap_or([0.0; 2]);
        let mut max_delay = -INF;
        for arc_set in cell.arc_sets_to(out_port) {
            if arc_set.role.is_check() {
                continue;
            }
            for arc in &arc_set.arcs {
                let in_slew = tgt_slews[arc.in_edge.index()];
                let (delay, _) = arc.evaluate(in_slew, load_cap);
                max_delay = max_delay.max(delay);
            }
        }
        max_delay
    }
}

/// Mean target load over a cell's qualifying delay arcs. Cells with no
/// modeled arcs characterize to zero and are skipped by the resizer.
fn find_target_load_for_cell(cell: &Cell, tgt_slews: &[f64; 2]) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for arc_set in &cell.arc_sets {
        if arc_set.role.is_check() || arc_set.role.is_tristate() {
            continue;
        }
        for arc in &arc_set.arcs {
            sum += find_target_load(arc, tgt_slews[arc.in_edge.index()]);
            count += 1;
        }
    }
    if count > 0 {
        sum / count as f64
    } else {
        0.0
    }
}

/// Bisection-by-halving for the load capacitance whose output slew equals
/// the target slew.
fn find_target_load(arc: &TimingArc, target_slew: f64) -> f64 {
    let cap_tol = TARGET_LOAD_CAP_INIT * 0.001;
    let mut load_cap = TARGET_LOAD_CAP_INIT;
    let mut cap_step = TARGET_LOAD_CAP_INIT;
    while cap_step > cap_tol {
        let (_, slew) = arc.evaluate(0.0, load_cap);
        if slew > target_slew {
            load_cap -= cap_step;
            cap_step /= 2.0;
        }
        load_cap += cap_step;
    }
    load_cap
}
