// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types shared between the conductor and its clients: operators using the
//! external API and agents speaking the step protocol

pub mod agent;
pub mod external_api;
pub mod internal_api;
