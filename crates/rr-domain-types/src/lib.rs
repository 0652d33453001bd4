// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Domain types for Run Relay
//!
//! A run is one execution of a browser-automation objective on behalf of a
//! principal. Its status only moves forward, and the steps it records are
//! numbered from 1 with no gaps. These types are shared by the wire contract,
//! the run stores and the relay server.

pub mod automation;
pub mod run;
pub mod step;

pub use automation::Automation;
pub use run::{Principal, RunRecord, RunStatus};
pub use step::{Step, StepAction, StepEvent};
