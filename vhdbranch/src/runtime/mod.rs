pub mod constants;
pub mod layout;
pub(crate) mod lock;
pub mod options;
pub mod types;

mod core;
pub use core::Workspace;
