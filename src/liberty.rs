// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Liberty (.lib) cell library model and parser.
//!
//! Parses the subset of Liberty needed for load-driven gate sizing:
//! - Per-pin directions, capacitances, and max_capacitance/max_transition
//!   limits
//! - Timing arcs with scalar, 1-D (load) or 2-D (slew x load) NLDM tables
//!   for delay and output transition
//! - Operating condition (corner) declarations
//! - Cell footprints, from which drive-strength equivalence groups are
//!   derived
//!
//! All values are normalized to SI units (seconds, farads) at parse time
//! using the library's `time_unit` and `capacitive_load_unit`.

use arcstr::Substr;
use compact_str::CompactString;
use indexmap::IndexMap;
use netlistdb::{Direction, DirectionProvider};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// A signal transition direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rise = 0,
    Fall = 1,
}

impl Edge {
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Both transitions, rise first.
    #[inline]
    pub fn both() -> [Edge; 2] {
        [Edge::Rise, Edge::Fall]
    }
}

/// Pin direction as declared in Liberty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortDirection {
    #[default]
    Input,
    Output,
    Inout,
    Internal,
}

/// An NLDM lookup table.
///
/// Three shapes are supported:
/// - scalar: both index vectors empty, one value
/// - 1-D over load capacitance: `cap_index` only
/// - 2-D over (input slew, load capacitance): `slew_index` rows by
///   `cap_index` columns, values row-major
///
/// Lookups interpolate linearly and extrapolate beyond the table edges
/// using the outermost segment slope.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub slew_index: Vec<f64>,
    pub cap_index: Vec<f64>,
    pub values: Vec<f64>,
}

impl Table {
    pub fn scalar(value: f64) -> Table {
        Table {
            slew_index: Vec::new(),
            cap_index: Vec::new(),
            values: vec![value],
        }
    }

    /// Linear interpolation over one axis, extrapolating at both ends.
    fn interp1(xs: &[f64], ys: &[f64], x: f64) -> f64 {
        debug_assert_eq!(xs.len(), ys.len());
        if xs.len() == 1 {
            return ys[0];
        }
        // Pick the segment bracketing x, clamped to the outermost segments
        // so out-of-range queries extrapolate.
        let mut i = match xs.iter().position(|&xi| xi >= x) {
            Some(0) | None => 0,
            Some(p) => p - 1,
        };
        if x > xs[xs.len() - 1] {
            i = xs.len() - 2;
        }
        let (x0, x1) = (xs[i], xs[i + 1]);
        let (y0, y1) = (ys[i], ys[i + 1]);
        if x1 == x0 {
            return y0;
        }
        y0 + (y1 - y0) * (x - x0) / (x1 - x0)
    }

    /// Evaluate the table at the given input slew and load capacitance.
    pub fn lookup(&self, in_slew: f64, load_cap: f64) -> f64 {
        match (self.slew_index.len(), self.cap_index.len()) {
            (0, 0) => self.values[0],
            (0, _) => Self::interp1(&self.cap_index, &self.values, load_cap),
            (_, 0) => Self::interp1(&self.slew_index, &self.values, in_slew),
            (nrows, ncols) => {
                // Interpolate along the cap axis for each slew row, then
                // along the slew axis.
                let row_vals: Vec<f64> = (0..nrows)
                    .map(|r| {
                        let row = &self.values[r * ncols..(r + 1) * ncols];
                        Self::interp1(&self.cap_index, row, load_cap)
                    })
                    .collect();
                Self::interp1(&self.slew_index, &row_vals, in_slew)
            }
        }
    }
}

/// Classification of a timing arc set, derived from `timing_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingRole {
    Combinational,
    RisingEdge,
    FallingEdge,
    Setup,
    Hold,
    TristateEnable,
    TristateDisable,
}

impl TimingRole {
    fn from_timing_type(timing_type: Option<&str>) -> TimingRole {
        match timing_type {
            Some("rising_edge") => TimingRole::RisingEdge,
            Some("falling_edge") => TimingRole::FallingEdge,
            Some(t) if t.starts_with("setup") => TimingRole::Setup,
            Some(t) if t.starts_with("hold") => TimingRole::Hold,
            Some("three_state_enable") => TimingRole::TristateEnable,
            Some("three_state_disable") => TimingRole::TristateDisable,
            _ => TimingRole::Combinational,
        }
    }

    /// Setup and hold arcs constrain rather than propagate.
    pub fn is_check(self) -> bool {
        matches!(self, TimingRole::Setup | TimingRole::Hold)
    }

    pub fn is_tristate(self) -> bool {
        matches!(self, TimingRole::TristateEnable | TimingRole::TristateDisable)
    }
}

/// One gate-delay model: input transition edge to output transition edge,
/// with delay and output slew tables.
#[derive(Debug, Clone)]
pub struct TimingArc {
    pub in_edge: Edge,
    pub out_edge: Edge,
    pub delay: Table,
    pub out_slew: Table,
}

impl TimingArc {
    /// Evaluate the model: returns (arc delay, output slew) in seconds.
    pub fn evaluate(&self, in_slew: f64, load_cap: f64) -> (f64, f64) {
        (
            self.delay.lookup(in_slew, load_cap),
            self.out_slew.lookup(in_slew, load_cap),
        )
    }
}

/// All arcs from one input port to one output port with a common role.
#[derive(Debug, Clone)]
pub struct TimingArcSet {
    pub from_port: CompactString,
    pub to_port: CompactString,
    pub role: TimingRole,
    pub arcs: SmallVec<[TimingArc; 4]>,
}

/// A Liberty pin.
#[derive(Debug, Clone, Default)]
pub struct Port {
    pub name: CompactString,
    pub direction: PortDirection,
    /// Input capacitance per transition (rise, fall), farads.
    pub cap: [f64; 2],
    pub max_capacitance: Option<f64>,
    pub max_transition: Option<f64>,
    pub function: Option<String>,
    pub is_clock: bool,
}

impl Port {
    /// Worst-case input capacitance (max of rise and fall).
    pub fn capacitance(&self) -> f64 {
        self.cap[0].max(self.cap[1])
    }

    pub fn capacitance_edge(&self, edge: Edge) -> f64 {
        self.cap[edge.index()]
    }
}

/// A library cell.
#[derive(Debug, Clone, Default)]
pub struct Cell {
    pub name: CompactString,
    /// Physical area; a positive area marks the cell as backed by a
    /// physical macro, which restricts what it may be swapped with.
    pub area: f64,
    pub footprint: Option<CompactString>,
    pub ports: IndexMap<CompactString, Port>,
    pub arc_sets: Vec<TimingArcSet>,
}

impl Cell {
    pub fn is_physical(&self) -> bool {
        self.area > 0.0
    }

    pub fn input_ports(&self) -> impl Iterator<Item = &Port> {
        self.ports
            .values()
            .filter(|p| p.direction == PortDirection::Input)
    }

    pub fn output_ports(&self) -> impl Iterator<Item = &Port> {
        self.ports
            .values()
            .filter(|p| p.direction == PortDirection::Output)
    }

    /// The (input, output) port pair if this cell has exactly one of each.
    pub fn single_input_output(&self) -> Option<(&Port, &Port)> {
        let mut inputs = self.input_ports();
        let input = inputs.next()?;
        if inputs.next().is_some() {
            return None;
        }
        let mut outputs = self.output_ports();
        let output = outputs.next()?;
        if outputs.next().is_some() {
            return None;
        }
        Some((input, output))
    }

    /// The (input, output) ports of a buffer: one input, one output, and a
    /// non-inverting output function.
    pub fn buffer_ports(&self) -> Option<(&Port, &Port)> {
        let (input, output) = self.single_input_output()?;
        let function = output.function.as_deref()?;
        if function.contains('!') || function.contains('\'') {
            return None;
        }
        Some((input, output))
    }

    pub fn is_buffer(&self) -> bool {
        self.buffer_ports().is_some()
    }

    /// Arc sets driving the named output port.
    pub fn arc_sets_to<'a>(
        &'a self,
        to_port: &'a str,
    ) -> impl Iterator<Item = &'a TimingArcSet> + 'a {
        self.arc_sets.iter().filter(move |s| s.to_port == to_port)
    }

    /// Key used to group drive-strength variants of the same function.
    fn equiv_key(&self) -> String {
        if let Some(fp) = &self.footprint {
            return format!("fp:{}", fp);
        }
        let mut ports: Vec<String> = self
            .ports
            .values()
            .map(|p| {
                let func = p
                    .function
                    .as_deref()
                    .map(|f| f.replace(' ', ""))
                    .unwrap_or_default();
                format!("{}:{:?}:{}", p.name, p.direction, func)
            })
            .collect();
        ports.sort();
        format!("sig:{}", ports.join(","))
    }
}

/// An operating condition declaration (a corner).
#[derive(Debug, Clone, Default)]
pub struct Corner {
    pub name: CompactString,
    pub process: f64,
    pub voltage: f64,
    pub temperature: f64,
}

/// A parsed Liberty library.
#[derive(Debug, Clone, Default)]
pub struct Library {
    pub name: CompactString,
    /// Multiplier from library time values to seconds.
    pub time_scale: f64,
    /// Multiplier from library capacitance values to farads.
    pub cap_scale: f64,
    pub corners: Vec<Corner>,
    pub default_corner: Option<CompactString>,
    pub cells: IndexMap<CompactString, Cell>,
    /// Equivalence groups: cells sharing a footprint (or port/function
    /// signature), in library order.
    groups: Vec<Vec<CompactString>>,
    cell2group: HashMap<CompactString, usize>,
}

impl Library {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Library, String> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| format!("failed to read {}: {}", path.as_ref().display(), e))?;
        Library::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Library, String> {
        let mut lib = Library {
            time_scale: 1e-9,
            cap_scale: 1e-12,
            ..Library::default()
        };
        let mut parser = LibertyParser::new(content);
        parser.parse_library(&mut lib)?;
        lib.build_equiv_groups();
        Ok(lib)
    }

    pub fn get_cell(&self, name: &str) -> Option<&Cell> {
        self.cells.get(name)
    }

    /// Buffer cells of the library, in declaration order.
    pub fn buffers(&self) -> impl Iterator<Item = &Cell> {
        self.cells.values().filter(|c| c.is_buffer())
    }

    /// The drive-strength equivalence group of a cell (including the cell
    /// itself), in library order. Empty when the cell is unknown.
    pub fn equiv_cells(&self, cell: &Cell) -> &[CompactString] {
        self.cell2group
            .get(&cell.name)
            .map(|&g| self.groups[g].as_slice())
            .unwrap_or(&[])
    }

    /// Resolve a corner by name, or fall back to the library default.
    pub fn find_corner(&self, name: Option<&str>) -> Result<&Corner, String> {
        match name {
            Some(n) => self
                .corners
                .iter()
                .find(|c| c.name == n)
                .ok_or_else(|| format!("operating condition '{}' not found in library {}", n, self.name)),
            None => {
                if let Some(def) = &self.default_corner {
                    if let Some(c) = self.corners.iter().find(|c| &c.name == def) {
                        return Ok(c);
                    }
                }
                self.corners
                    .first()
                    .ok_or_else(|| format!("library {} declares no operating conditions", self.name))
            }
        }
    }

    fn build_equiv_groups(&mut self) {
        let mut key2group: HashMap<String, usize> = HashMap::new();
        for cell in self.cells.values() {
            let key = cell.equiv_key();
            let gid = *key2group.entry(key).or_insert_with(|| {
                self.groups.push(Vec::new());
                self.groups.len() - 1
            });
            self.groups[gid].push(cell.name.clone());
            self.cell2group.insert(cell.name.clone(), gid);
        }
    }
}

/// Direction provider for netlistdb backed by parsed Liberty directions.
pub struct LibertyLeafPins<'a>(pub &'a Library);

impl DirectionProvider for LibertyLeafPins<'_> {
    fn direction_of(
        &self,
        macro_name: &Substr,
        pin_name: &Substr,
        pin_idx: Option<isize>,
    ) -> Direction {
        let Some(cell) = self.0.get_cell(macro_name.as_str()) else {
            panic!(
                "cell type {} not found in liberty library {}",
                macro_name, self.0.name
            );
        };
        let Some(port) = cell.ports.get(pin_name.as_str()) else {
            panic!(
                "pin {}{} not found on liberty cell {}",
                pin_name,
                pin_idx.map(|i| format!("[{}]", i)).unwrap_or_default(),
                macro_name
            );
        };
        match port.direction {
            PortDirection::Output => Direction::O,
            _ => Direction::I,
        }
    }
}

/// Tables collected from one `timing()` group before arc construction.
#[derive(Debug, Default)]
struct TimingGroup {
    related_pin: String,
    timing_sense: Option<String>,
    timing_type: Option<String>,
    cell_rise: Option<Table>,
    cell_fall: Option<Table>,
    rise_transition: Option<Table>,
    fall_transition: Option<Table>,
    rise_constraint: Option<Table>,
    fall_constraint: Option<Table>,
}

/// Liberty parser over a shrinking tail of the input.
///
/// The cursor consumes `rest` from the front and tracks the current line
/// for error reporting. Backslash line continuations count as whitespace.
struct LibertyParser<'a> {
    rest: &'a str,
    line: u32,
}

impl<'a> LibertyParser<'a> {
    fn new(content: &'a str) -> Self {
        Self {
            rest: content,
            line: 1,
        }
    }

    fn advance(&mut self, n: usize) {
        let (eaten, rest) = self.rest.split_at(n);
        self.line += eaten.bytes().filter(|&b| b == b'\n').count() as u32;
        self.rest = rest;
    }

    /// Drop whitespace, line continuations, and both comment styles.
    fn strip_ws(&mut self) {
        loop {
            let tail = self
                .rest
                .trim_start_matches(|c: char| c.is_ascii_whitespace() || c == '\\');
            let ws = self.rest.len() - tail.len();
            if ws > 0 {
                self.advance(ws);
            }
            if let Some(comment) = self.rest.strip_prefix("/*") {
                let len = comment.find("*/").map(|i| i + 4).unwrap_or(self.rest.len());
                self.advance(len);
            } else if self.rest.starts_with("//") {
                let len = self.rest.find('\n').unwrap_or(self.rest.len());
                self.advance(len);
            } else {
                return;
            }
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.strip_ws();
        self.rest.chars().next()
    }

    /// A short sample of the upcoming text, for error messages.
    fn context(&self) -> String {
        self.rest.chars().take(12).collect()
    }

    fn eat(&mut self, want: char) -> Result<(), String> {
        self.strip_ws();
        if self.rest.starts_with(want) {
            self.advance(want.len_utf8());
            Ok(())
        } else {
            Err(format!(
                "line {}: wanted '{}' before {:?}",
                self.line,
                want,
                self.context()
            ))
        }
    }

    fn ident(&mut self) -> String {
        self.strip_ws();
        let len = self
            .rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.'))
            .unwrap_or(self.rest.len());
        let word = self.rest[..len].to_string();
        self.advance(len);
        word
    }

    fn quoted(&mut self) -> Result<String, String> {
        self.eat('"')?;
        let len = self.rest.find('"').unwrap_or(self.rest.len());
        let text = self.rest[..len].to_string();
        self.advance((len + 1).min(self.rest.len()));
        Ok(text)
    }

    /// An attribute value: a quoted string, or raw text up to the next
    /// top-level ';', ',' or ')'.
    fn value(&mut self) -> Result<String, String> {
        self.strip_ws();
        if self.rest.starts_with('"') {
            return self.quoted();
        }
        let mut depth = 0usize;
        let mut len = self.rest.len();
        for (i, c) in self.rest.char_indices() {
            match c {
                '(' => depth += 1,
                ')' if depth == 0 => {
                    len = i;
                    break;
                }
                ')' => depth -= 1,
                ';' | ',' if depth == 0 => {
                    len = i;
                    break;
                }
                _ => {}
            }
        }
        let text = self.rest[..len].trim().to_string();
        self.advance(len);
        Ok(text)
    }

    /// The argument list of `name ( a, b, ... )`, quotes stripped.
    fn paren_args(&mut self) -> Result<Vec<String>, String> {
        self.eat('(')?;
        let mut args = Vec::new();
        while self.peek() != Some(')') {
            args.push(self.value()?);
            if self.peek() == Some(',') {
                self.eat(',')?;
            }
        }
        self.eat(')')?;
        Ok(args)
    }

    /// Consume through the '}' matching an already-consumed '{'.
    fn skip_braced(&mut self) -> Result<(), String> {
        let mut depth = 1usize;
        for (i, c) in self.rest.char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        self.advance(i + 1);
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
        Err(format!("line {}: unterminated group", self.line))
    }

    /// Consume a balanced `( ... )` group, contents included.
    fn skip_parens(&mut self) -> Result<(), String> {
        self.eat('(')?;
        let mut depth = 1usize;
        for (i, c) in self.rest.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        self.advance(i + 1);
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
        Err(format!("line {}: unterminated group", self.line))
    }

    /// Skip an unrecognized attribute or group.
    fn skip_entry(&mut self) -> Result<(), String> {
        match self.peek() {
            Some(':') => {
                self.eat(':')?;
                self.value()?;
                if self.peek() == Some(';') {
                    self.eat(';')?;
                }
            }
            Some('(') => {
                self.skip_parens()?;
                if self.peek() == Some('{') {
                    self.eat('{')?;
                    self.skip_braced()?;
                } else if self.peek() == Some(';') {
                    self.eat(';')?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn parse_float(value: &str) -> f64 {
        value.trim().trim_matches('"').parse::<f64>().unwrap_or(0.0)
    }

    /// Parse a time unit string like "1ns" into a seconds multiplier.
    fn parse_time_unit(value: &str) -> f64 {
        let v = value.trim().trim_matches('"');
        let split = v.find(|c: char| c.is_ascii_alphabetic()).unwrap_or(v.len());
        let mag: f64 = v[..split].parse().unwrap_or(1.0);
        let scale = match &v[split..] {
            "s" => 1.0,
            "ms" => 1e-3,
            "us" => 1e-6,
            "ns" => 1e-9,
            "ps" => 1e-12,
            "fs" => 1e-15,
            _ => 1e-9,
        };
        mag * scale
    }

    fn parse_cap_unit(unit: &str) -> f64 {
        match unit.trim().trim_matches('"') {
            "f" => 1.0,
            "mf" => 1e-3,
            "uf" => 1e-6,
            "nf" => 1e-9,
            "pf" => 1e-12,
            "ff" => 1e-15,
            _ => 1e-12,
        }
    }

    fn parse_library(&mut self, lib: &mut Library) -> Result<(), String> {
        let keyword = self.ident();
        if keyword != "library" {
            return Err(format!(
                "line {}: not a liberty file (leading keyword {:?})",
                self.line, keyword
            ));
        }
        self.eat('(')?;
        lib.name = CompactString::from(self.ident());
        self.eat(')')?;
        self.eat('{')?;

        while self.peek() != Some('}') {
            let keyword = self.ident();
            match keyword.as_str() {
                "time_unit" => {
                    self.eat(':')?;
                    lib.time_scale = Self::parse_time_unit(&self.value()?);
                    self.eat(';')?;
                }
                "capacitive_load_unit" => {
                    let args = self.paren_args()?;
                    let mag = args.first().map(|a| Self::parse_float(a)).unwrap_or(1.0);
                    let unit = args.get(1).map(String::as_str).unwrap_or("pf");
                    lib.cap_scale = mag * Self::parse_cap_unit(unit);
                    if self.peek() == Some(';') {
                        self.eat(';')?;
                    }
                }
                "default_operating_conditions" => {
                    self.eat(':')?;
                    lib.default_corner =
                        Some(CompactString::from(self.value()?.trim_matches('"')));
                    self.eat(';')?;
                }
                "operating_conditions" => {
                    let corner = self.parse_operating_conditions()?;
                    lib.corners.push(corner);
                }
                "cell" => {
                    let cell = self.parse_cell(lib.time_scale, lib.cap_scale)?;
                    lib.cells.insert(cell.name.clone(), cell);
                }
                "" => {
                    return Err(format!(
                        "line {}: unexpected token near {:?}",
                        self.line,
                        self.context()
                    ));
                }
                _ => self.skip_entry()?,
            }
        }
        self.eat('}')?;
        Ok(())
    }

    fn parse_operating_conditions(&mut self) -> Result<Corner, String> {
        let mut corner = Corner::default();
        self.eat('(')?;
        corner.name = CompactString::from(self.ident());
        self.eat(')')?;
        self.eat('{')?;
        while self.peek() != Some('}') {
            let keyword = self.ident();
            match keyword.as_str() {
                "process" | "voltage" | "temperature" => {
                    self.eat(':')?;
                    let v = Self::parse_float(&self.value()?);
                    self.eat(';')?;
                    match keyword.as_str() {
                        "process" => corner.process = v,
                        "voltage" => corner.voltage = v,
                        _ => corner.temperature = v,
                    }
                }
                "" => {
                    return Err(format!(
                        "line {}: unexpected token near {:?}",
                        self.line,
                        self.context()
                    ));
                }
                _ => self.skip_entry()?,
            }
        }
        self.eat('}')?;
        Ok(corner)
    }

    fn parse_cell(&mut self, time_scale: f64, cap_scale: f64) -> Result<Cell, String> {
        let mut cell = Cell::default();
        self.eat('(')?;
        cell.name = CompactString::from(self.ident());
        self.eat(')')?;
        self.eat('{')?;

        while self.peek() != Some('}') {
            let keyword = self.ident();
            match keyword.as_str() {
                "area" => {
                    self.eat(':')?;
                    cell.area = Self::parse_float(&self.value()?);
                    self.eat(';')?;
                }
                "cell_footprint" => {
                    self.eat(':')?;
                    cell.footprint =
                        Some(CompactString::from(self.value()?.trim_matches('"')));
                    self.eat(';')?;
                }
                "pin" => {
                    let (port, groups) = self.parse_pin(time_scale, cap_scale)?;
                    let port_name = port.name.clone();
                    for group in groups {
                        if let Some(set) = Self::make_arc_set(&port_name, group) {
                            cell.arc_sets.push(set);
                        }
                    }
                    cell.ports.insert(port_name, port);
                }
                "ff" | "latch" | "statetable" => {
                    self.skip_parens()?;
                    self.eat('{')?;
                    self.skip_braced()?;
                }
                "" => {
                    return Err(format!(
                        "line {}: unexpected token near {:?}",
                        self.line,
                        self.context()
                    ));
                }
                _ => self.skip_entry()?,
            }
        }
        self.eat('}')?;
        Ok(cell)
    }

    fn parse_pin(
        &mut self,
        time_scale: f64,
        cap_scale: f64,
    ) -> Result<(Port, Vec<TimingGroup>), String> {
        let mut port = Port::default();
        let mut groups = Vec::new();
        self.eat('(')?;
        port.name = CompactString::from(self.ident());
        self.eat(')')?;
        self.eat('{')?;

        while self.peek() != Some('}') {
            let keyword = self.ident();
            match keyword.as_str() {
                "direction" => {
                    self.eat(':')?;
                    port.direction = match self.ident().as_str() {
                        "output" => PortDirection::Output,
                        "inout" => PortDirection::Inout,
                        "internal" => PortDirection::Internal,
                        _ => PortDirection::Input,
                    };
                    self.eat(';')?;
                }
                "capacitance" => {
                    self.eat(':')?;
                    let v = Self::parse_float(&self.value()?) * cap_scale;
                    port.cap = [v, v];
                    self.eat(';')?;
                }
                "rise_capacitance" => {
                    self.eat(':')?;
                    port.cap[Edge::Rise.index()] =
                        Self::parse_float(&self.value()?) * cap_scale;
                    self.eat(';')?;
                }
                "fall_capacitance" => {
                    self.eat(':')?;
                    port.cap[Edge::Fall.index()] =
                        Self::parse_float(&self.value()?) * cap_scale;
                    self.eat(';')?;
                }
                "max_capacitance" => {
                    self.eat(':')?;
                    port.max_capacitance = Some(Self::parse_float(&self.value()?) * cap_scale);
                    self.eat(';')?;
                }
                "max_transition" => {
                    self.eat(':')?;
                    port.max_transition = Some(Self::parse_float(&self.value()?) * time_scale);
                    self.eat(';')?;
                }
                "function" => {
                    self.eat(':')?;
                    port.function = Some(self.value()?.trim_matches('"').to_string());
                    self.eat(';')?;
                }
                "clock" => {
                    self.eat(':')?;
                    port.is_clock = self.ident() == "true";
                    self.eat(';')?;
                }
                "timing" => {
                    groups.push(self.parse_timing_group(time_scale, cap_scale)?);
                }
                "" => {
                    return Err(format!(
                        "line {}: unexpected token near {:?}",
                        self.line,
                        self.context()
                    ));
                }
                _ => self.skip_entry()?,
            }
        }
        self.eat('}')?;
        Ok((port, groups))
    }

    fn parse_timing_group(
        &mut self,
        time_scale: f64,
        cap_scale: f64,
    ) -> Result<TimingGroup, String> {
        let mut group = TimingGroup::default();
        self.eat('(')?;
        if self.peek() != Some(')') {
            self.value()?;
        }
        self.eat(')')?;
        self.eat('{')?;

        while self.peek() != Some('}') {
            let keyword = self.ident();
            match keyword.as_str() {
                "related_pin" => {
                    self.eat(':')?;
                    group.related_pin = self.value()?.trim_matches('"').to_string();
                    self.eat(';')?;
                }
                "timing_sense" => {
                    self.eat(':')?;
                    group.timing_sense = Some(self.ident());
                    self.eat(';')?;
                }
                "timing_type" => {
                    self.eat(':')?;
                    group.timing_type = Some(self.ident());
                    self.eat(';')?;
                }
                "cell_rise" | "cell_fall" | "rise_transition" | "fall_transition"
                | "rise_constraint" | "fall_constraint" => {
                    let table = self.parse_table(time_scale, cap_scale)?;
                    match keyword.as_str() {
                        "cell_rise" => group.cell_rise = Some(table),
                        "cell_fall" => group.cell_fall = Some(table),
                        "rise_transition" => group.rise_transition = Some(table),
                        "fall_transition" => group.fall_transition = Some(table),
                        "rise_constraint" => group.rise_constraint = Some(table),
                        _ => group.fall_constraint = Some(table),
                    }
                }
                "" => {
                    return Err(format!(
                        "line {}: unexpected token near {:?}",
                        self.line,
                        self.context()
                    ));
                }
                _ => self.skip_entry()?,
            }
        }
        self.eat('}')?;
        Ok(group)
    }

    fn parse_number_list(raw: &[String]) -> Vec<f64> {
        raw.iter()
            .flat_map(|row| row.split(','))
            .map(Self::parse_float)
            .collect()
    }

    /// Parse a `cell_rise (template) { index_1(...); values(...); }` table.
    ///
    /// Axis convention: a 2-D table is (input slew, load capacitance); a
    /// 1-D table is over load capacitance.
    fn parse_table(&mut self, time_scale: f64, cap_scale: f64) -> Result<Table, String> {
        self.eat('(')?;
        if self.peek() != Some(')') {
            self.value()?; // template name, e.g. "scalar"
        }
        self.eat(')')?;
        self.eat('{')?;

        let mut index1 = Vec::new();
        let mut index2 = Vec::new();
        let mut values = Vec::new();
        while self.peek() != Some('}') {
            let keyword = self.ident();
            match keyword.as_str() {
                "index_1" | "index_2" | "values" => {
                    let args = self.paren_args()?;
                    if self.peek() == Some(';') {
                        self.eat(';')?;
                    }
                    let nums = Self::parse_number_list(&args);
                    match keyword.as_str() {
                        "index_1" => index1 = nums,
                        "index_2" => index2 = nums,
                        _ => values = nums,
                    }
                }
                "" => {
                    return Err(format!(
                        "line {}: unexpected token near {:?}",
                        self.line,
                        self.context()
                    ));
                }
                _ => self.skip_entry()?,
            }
        }
        self.eat('}')?;

        if values.is_empty() {
            return Err(format!("line {}: table group has no values", self.line));
        }
        let mut table = if !index2.is_empty() {
            Table {
                slew_index: index1.iter().map(|v| v * time_scale).collect(),
                cap_index: index2.iter().map(|v| v * cap_scale).collect(),
                values,
            }
        } else if !index1.is_empty() {
            Table {
                slew_index: Vec::new(),
                cap_index: index1.iter().map(|v| v * cap_scale).collect(),
                values,
            }
        } else {
            Table {
                slew_index: Vec::new(),
                cap_index: Vec::new(),
                values,
            }
        };
        for v in &mut table.values {
            *v *= time_scale;
        }
        Ok(table)
    }

    /// Build a timing arc set from a parsed timing group.
    ///
    /// Arcs without a delay model are not materialized, so cells whose
    /// timing groups carry no tables end up with no arcs at all.
    fn make_arc_set(to_port: &str, group: TimingGroup) -> Option<TimingArcSet> {
        if group.related_pin.is_empty() {
            return None;
        }
        let role = TimingRole::from_timing_type(group.timing_type.as_deref());
        let mut arcs: SmallVec<[TimingArc; 4]> = SmallVec::new();

        if role.is_check() {
            // Constraint arcs: the table value is the setup/hold margin for
            // the constrained data transition.
            for (edge, table) in [
                (Edge::Rise, group.rise_constraint),
                (Edge::Fall, group.fall_constraint),
            ] {
                if let Some(t) = table {
                    arcs.push(TimingArc {
                        in_edge: edge,
                        out_edge: edge,
                        delay: t,
                        out_slew: Table::scalar(0.0),
                    });
                }
            }
        } else {
            let in_edges = |out_edge: Edge| -> SmallVec<[Edge; 2]> {
                match group.timing_sense.as_deref() {
                    Some("positive_unate") => SmallVec::from_slice(&[out_edge]),
                    Some("negative_unate") => SmallVec::from_slice(&[match out_edge {
                        Edge::Rise => Edge::Fall,
                        Edge::Fall => Edge::Rise,
                    }]),
                    _ => SmallVec::from_slice(&[Edge::Rise, Edge::Fall]),
                }
            };
            for (out_edge, delay, slew) in [
                (Edge::Rise, &group.cell_rise, &group.rise_transition),
                (Edge::Fall, &group.cell_fall, &group.fall_transition),
            ] {
                let Some(delay) = delay else { continue };
                let out_slew = slew.clone().unwrap_or_else(|| Table::scalar(0.0));
                for in_edge in in_edges(out_edge) {
                    arcs.push(TimingArc {
                        in_edge,
                        out_edge,
                        delay: delay.clone(),
                        out_slew: out_slew.clone(),
                    });
                }
            }
        }

        if arcs.is_empty() {
            return None;
        }
        Some(TimingArcSet {
            from_port: CompactString::from(group.related_pin),
            to_port: CompactString::from(to_port),
            role,
            arcs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_LIB: &str = r#"
    library (testlib) {
      time_unit : "1ns";
      capacitive_load_unit (1,pf);
      default_operating_conditions : typical;
      operating_conditions (typical) {
        process : 1.0;
        voltage : 1.8;
        temperature : 25.0;
      }
      cell (BUF1) {
        area : 2.0;
        cell_footprint : buf;
        pin (A) {
          direction : input;
          capacitance : 0.005;
        }
        pin (Y) {
          direction : output;
          function : "A";
          max_capacitance : 0.2;
          timing () {
            related_pin : "A";
            timing_sense : positive_unate;
            cell_rise (lin) {
              index_1 ("0.0, 1.0");
              values ("0.02, 2.02");
            }
            rise_transition (lin) {
              index_1 ("0.0, 1.0");
              values ("0.05, 1.05");
            }
            cell_fall (lin) {
              index_1 ("0.0, 1.0");
              values ("0.02, 2.02");
            }
            fall_transition (lin) {
              index_1 ("0.0, 1.0");
              values ("0.05, 1.05");
            }
          }
        }
      }
      cell (INV1) {
        area : 1.0;
        cell_footprint : inv;
        pin (A) {
          direction : input;
          capacitance : 0.004;
        }
        pin (Y) {
          direction : output;
          function : "!A";
          timing () {
            related_pin : "A";
            timing_sense : negative_unate;
            cell_rise (scalar) { values ("0.03"); }
            cell_fall (scalar) { values ("0.03"); }
            rise_transition (scalar) { values ("0.06"); }
            fall_transition (scalar) { values ("0.06"); }
          }
        }
      }
      cell (INV2) {
        area : 1.5;
        cell_footprint : inv;
        pin (A) {
          direction : input;
          capacitance : 0.008;
        }
        pin (Y) {
          direction : output;
          function : "!A";
          timing () {
            related_pin : "A";
            timing_sense : negative_unate;
            cell_rise (scalar) { values ("0.02"); }
            cell_fall (scalar) { values ("0.02"); }
            rise_transition (scalar) { values ("0.04"); }
            fall_transition (scalar) { values ("0.04"); }
          }
        }
      }
      cell (DFF1) {
        area : 5.0;
        pin (CK) {
          direction : input;
          clock : true;
          capacitance : 0.003;
        }
        pin (D) {
          direction : input;
          capacitance : 0.002;
          timing () {
            related_pin : "CK";
            timing_type : setup_rising;
            rise_constraint (scalar) { values ("0.1"); }
            fall_constraint (scalar) { values ("0.1"); }
          }
        }
        pin (Q) {
          direction : output;
          function : "IQ";
          timing () {
            related_pin : "CK";
            timing_type : rising_edge;
            cell_rise (scalar) { values ("0.15"); }
            cell_fall (scalar) { values ("0.15"); }
            rise_transition (scalar) { values ("0.08"); }
            fall_transition (scalar) { values ("0.08"); }
          }
        }
      }
    }
    "#;

    #[test]
    fn test_parse_units_and_corners() {
        let lib = Library::parse(TEST_LIB).unwrap();
        assert_eq!(lib.name, "testlib");
        assert_eq!(lib.time_scale, 1e-9);
        assert_eq!(lib.cap_scale, 1e-12);
        assert_eq!(lib.corners.len(), 1);
        let corner = lib.find_corner(None).unwrap();
        assert_eq!(corner.name, "typical");
        assert_eq!(corner.voltage, 1.8);
        assert!(lib.find_corner(Some("missing")).is_err());
    }

    #[test]
    fn test_port_attributes_scaled_to_si() {
        let lib = Library::parse(TEST_LIB).unwrap();
        let buf = lib.get_cell("BUF1").unwrap();
        let a = buf.ports.get("A").unwrap();
        assert!((a.capacitance() - 5e-15).abs() < 1e-20);
        let y = buf.ports.get("Y").unwrap();
        assert_eq!(y.direction, PortDirection::Output);
        assert!((y.max_capacitance.unwrap() - 0.2e-12).abs() < 1e-18);
    }

    #[test]
    fn test_buffer_detection() {
        let lib = Library::parse(TEST_LIB).unwrap();
        assert!(lib.get_cell("BUF1").unwrap().is_buffer());
        assert!(!lib.get_cell("INV1").unwrap().is_buffer());
        assert!(!lib.get_cell("DFF1").unwrap().is_buffer());
        let buffers: Vec<_> = lib.buffers().map(|c| c.name.as_str()).collect();
        assert_eq!(buffers, ["BUF1"]);
    }

    #[test]
    fn test_equiv_groups_by_footprint() {
        let lib = Library::parse(TEST_LIB).unwrap();
        let inv1 = lib.get_cell("INV1").unwrap();
        let group: Vec<_> = lib.equiv_cells(inv1).iter().map(|n| n.as_str()).collect();
        assert_eq!(group, ["INV1", "INV2"]);
        let buf = lib.get_cell("BUF1").unwrap();
        assert_eq!(lib.equiv_cells(buf).len(), 1);
    }

    #[test]
    fn test_arc_construction() {
        let lib = Library::parse(TEST_LIB).unwrap();
        let inv = lib.get_cell("INV1").unwrap();
        assert_eq!(inv.arc_sets.len(), 1);
        let set = &inv.arc_sets[0];
        assert_eq!(set.from_port, "A");
        assert_eq!(set.to_port, "Y");
        assert_eq!(set.role, TimingRole::Combinational);
        // Negative unate: rise output from fall input and vice versa.
        assert_eq!(set.arcs.len(), 2);
        assert_eq!(set.arcs[0].in_edge, Edge::Fall);
        assert_eq!(set.arcs[0].out_edge, Edge::Rise);

        let dff = lib.get_cell("DFF1").unwrap();
        let setup = dff.arc_sets_to("D").next().unwrap();
        assert_eq!(setup.role, TimingRole::Setup);
        assert!(setup.role.is_check());
        let ck2q = dff.arc_sets_to("Q").next().unwrap();
        assert_eq!(ck2q.role, TimingRole::RisingEdge);
    }

    #[test]
    fn test_linear_table_evaluation() {
        let lib = Library::parse(TEST_LIB).unwrap();
        let buf = lib.get_cell("BUF1").unwrap();
        let arc = &buf.arc_sets[0].arcs[0];
        // Table is delay = 20ps + 2ns/pF * load, i.e. 2e3 s/F.
        let (d0, s0) = arc.evaluate(0.0, 0.0);
        assert!((d0 - 20e-12).abs() < 1e-15);
        assert!((s0 - 50e-12).abs() < 1e-15);
        let (d1, _) = arc.evaluate(0.0, 5e-13);
        assert!((d1 - (20e-12 + 2e3 * 5e-13)).abs() < 1e-15);
        // Beyond the last index: linear extrapolation.
        let (d2, _) = arc.evaluate(0.0, 2e-12);
        assert!((d2 - (20e-12 + 2e3 * 2e-12)).abs() < 1e-14);
    }

    #[test]
    fn test_2d_table_lookup() {
        let table = Table {
            slew_index: vec![0.0, 1.0],
            cap_index: vec![0.0, 1.0],
            values: vec![0.0, 1.0, 2.0, 3.0],
        };
        assert_eq!(table.lookup(0.0, 0.0), 0.0);
        assert_eq!(table.lookup(0.0, 1.0), 1.0);
        assert_eq!(table.lookup(1.0, 0.0), 2.0);
        assert!((table.lookup(0.5, 0.5) - 1.5).abs() < 1e-12);
        // Extrapolation past both axes.
        assert!((table.lookup(2.0, 0.0) - 4.0).abs() < 1e-12);
    }
}
