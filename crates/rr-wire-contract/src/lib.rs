// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Run Relay wire contract
//!
//! Every frame is a JSON text message carrying a mandatory `type` field.
//! These types are shared by the relay server and by clients (including the
//! integration tests), so both sides agree on field names and casing.

pub mod codec;
pub mod error;
pub mod messages;

pub use codec::{decode_client_message, encode_server_message, Inbound};
pub use error::ContractError;
pub use messages::*;
