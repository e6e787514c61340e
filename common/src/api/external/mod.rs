// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Data structures and related facilities for representing resources in the
//! API
//!
//! The contents here are all HTTP-agnostic, except for the conversion of
//! [`Error`] into a Dropshot `HttpError`.

mod error;
pub use error::*;

use parse_display::Display;
use serde::Deserialize;
use serde::Serialize;

// The type aliases below exist primarily to ensure consistency among return
// types for functions in the conductor's `app` layer and its `DataStore`.

/// Result of a create operation for the specified type
pub type CreateResult<T> = Result<T, Error>;
/// Result of a delete operation for the specified type
pub type DeleteResult = Result<(), Error>;
/// Result of a list operation that returns a vector
pub type ListResultVec<T> = Result<Vec<T>, Error>;
/// Result of a lookup operation for the specified type
pub type LookupResult<T> = Result<T, Error>;
/// Result of an update operation for the specified type
pub type UpdateResult<T> = Result<T, Error>;

/// Identifies a type of API resource
#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize,
)]
#[display(style = "lowercase")]
pub enum ResourceType {
    Cluster,
    Host,
    #[display("background task")]
    BackgroundTask,
    #[display("blob")]
    Blob,
}
