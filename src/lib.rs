/*
 * StoneGate - control-and-monitoring server for a laboratory apparatus
 * Copyright (c) 2026  StoneGate contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! StoneGate: a control-and-monitoring server for a laboratory apparatus.
//! `src/main.rs` is a thin binary over this library; integration tests
//! under `tests/` exercise the session/RPC layer directly through it.

pub mod cc_fs;
pub mod device;
pub mod errors;
pub mod hash;
pub mod logger;
pub mod physics;
pub mod qec;
pub mod recorder;
pub mod registry;
pub mod schematic;
pub mod session;
pub mod simulator;
