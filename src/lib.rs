pub mod config;
pub mod dap;
pub mod error;
pub mod remote;
pub mod session;

pub use error::Error;
