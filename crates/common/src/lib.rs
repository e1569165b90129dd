// warden-common: shared types, constants, and error taxonomy for the warden workspace.

pub mod constants;
pub mod error;
pub mod request_id;
pub mod types;
