//! Types shared between the vhdbranch library and its command-line front end.

pub mod errors;

pub use errors::{VhdbranchError, VhdbranchResult};
