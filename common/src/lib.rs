// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # Foundry common facilities
//!
//! This crate implements facilities shared by the pieces of the cluster
//! provisioning control plane: the error taxonomy that every component uses
//! (and its mapping onto HTTP), typed identifiers, IPv4 address helpers, and
//! small utilities for command-line programs.
//!
//! Since this crate doesn't provide externally-consumable interfaces, the
//! rustdoc (generated with `--document-private-items`) is intended primarily
//! for engineers working on the control plane.

// We only use rustdoc for internal documentation, including private items, so
// it's expected that we'll have links to private items in the docs.
#![allow(rustdoc::private_intra_doc_links)]

pub mod address;
pub mod api;
pub mod cmd;
pub mod typed_uuid;

