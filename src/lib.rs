//! Tachyon Updater Library
//!
//! Downloads the Tachyon distribution archive from an FTP server and
//! unpacks it, drawing a progress bar for both steps.

pub mod commands;
pub mod core;
pub mod error;
pub mod utils;
