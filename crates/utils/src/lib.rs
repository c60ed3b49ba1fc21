//! Helpers shared by the device plugin binaries: logging setup and build
//! version metadata.

mod build_info;
pub mod logging;
pub mod version;
