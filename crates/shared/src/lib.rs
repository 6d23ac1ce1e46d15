// navkit - Shared Library
// Configuration, logging and byte buffer helpers used by every navkit crate

pub mod config;
pub mod log;
pub mod util;
