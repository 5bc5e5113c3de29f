// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Gate resizing and rebuffering driver.
//!
//! Reads a placed gate-level netlist, sizes every gate to its target load,
//! and inserts buffers on nets violating max-capacitance or max-slew
//! limits.
//!
//! Usage:
//!   cargo run -r --bin redrive -- <netlist.v> --liberty <lib.lib> \
//!       --design <design.json> --buffer-cell BUF [options]

use netlistdb::NetlistDB;
use redrive::design::DesignInfo;
use redrive::liberty::{Library, LibertyLeafPins};
use redrive::netlist::Netlist;
use redrive::resizer::{Resizer, ResizerOptions};
use std::path::PathBuf;

#[derive(clap::Parser, Debug)]
#[command(name = "redrive")]
#[command(about = "Load-driven gate resizing and rebuffering")]
struct Args {
    /// Placed gate-level Verilog netlist.
    netlist_verilog: PathBuf,

    /// Liberty timing library path.
    #[clap(long)]
    liberty: PathBuf,

    /// Design sidecar (placement + constraints) JSON path.
    #[clap(long)]
    design: PathBuf,

    /// Top module type in the netlist.
    /// If not specified, will be inferred from hierarchy.
    #[clap(long)]
    top_module: Option<String>,

    /// Resize instances to their target load.
    #[clap(long)]
    resize: bool,

    /// Rebuffer drivers over their max-capacitance limit.
    #[clap(long)]
    repair_max_cap: bool,

    /// Rebuffer drivers over their max-slew limit.
    #[clap(long)]
    repair_max_slew: bool,

    /// Buffer cell for insertion (required with --repair-max-cap or
    /// --repair-max-slew).
    #[clap(long)]
    buffer_cell: Option<String>,

    /// Wire resistance, ohms per meter.
    #[clap(long, default_value = "1.7e5")]
    wire_res: f64,

    /// Wire capacitance, farads per meter.
    #[clap(long, default_value = "1.3e-10")]
    wire_cap: f64,

    /// Operating condition name; defaults to the library default.
    #[clap(long)]
    corner: Option<String>,

    /// Output path for the resized Verilog netlist.
    #[clap(long)]
    out: Option<PathBuf>,
}

fn main() {
    clilog::init_stderr_color_debug();
    let args = <Args as clap::Parser>::parse();
    clilog::info!("redrive args:\n{:#?}", args);

    let library = Library::from_file(&args.liberty).expect("Failed to load Liberty library");
    clilog::info!(
        "Loaded Liberty library {} with {} cells",
        library.name,
        library.cells.len()
    );

    let design = DesignInfo::from_file(&args.design).expect("Failed to load design sidecar");

    clilog::info!("Loading netlist: {:?}", args.netlist_verilog);
    let netlistdb = NetlistDB::from_sverilog_file(
        &args.netlist_verilog,
        args.top_module.as_deref(),
        &LibertyLeafPins(&library),
    )
    .expect("Failed to build netlist");
    clilog::info!(
        "Netlist loaded: {} pins, {} cells, {} nets",
        netlistdb.num_pins,
        netlistdb.num_cells,
        netlistdb.num_nets
    );

    let netlist = Netlist::from_netlistdb(&netlistdb, &design);
    let mut resizer = Resizer::new(
        netlist,
        &library,
        design,
        ResizerOptions {
            resize: args.resize,
            repair_max_cap: args.repair_max_cap,
            repair_max_slew: args.repair_max_slew,
            buffer_cell: args.buffer_cell.clone(),
            wire_res_per_length: args.wire_res,
            wire_cap_per_length: args.wire_cap,
            corner: args.corner.clone(),
        },
    )
    .expect("Invalid resizer configuration");

    let report = resizer.run();
    if args.resize {
        println!("Resized {} instances.", report.resize_count);
    }
    if args.repair_max_cap || args.repair_max_slew {
        println!(
            "Inserted {} buffers in {} nets.",
            report.inserted_buffer_count, report.rebuffer_net_count
        );
    }

    if let Some(out) = &args.out {
        std::fs::write(out, resizer.netlist.to_structural_verilog())
            .expect("Failed to write output netlist");
        clilog::info!("Wrote resized netlist to {:?}", out);
    }
}
