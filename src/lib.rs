// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
pub mod liberty;

pub mod netlist;

pub mod design;

pub mod timing;

pub mod steiner;

pub mod parasitics;

pub mod fuzzy;

pub mod resizer;
