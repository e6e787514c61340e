// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Structures stored in the conductor's record store

mod cluster;
mod event;
mod host;

pub use cluster::Cluster;
pub use event::Event;
pub use host::Host;
