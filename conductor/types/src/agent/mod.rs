// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types exchanged with the agent running on each host
//!
//! The agent polls for [`steps::Steps`], runs each instruction, and posts a
//! [`steps::StepReply`] per instruction.  The reply's `output` is a JSON
//! document whose schema depends on the step type; those schemas live in
//! [`replies`], and the request each instruction carries lives in
//! [`requests`].

pub mod replies;
pub mod requests;
pub mod steps;
