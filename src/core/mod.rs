pub mod config;
pub mod download;
pub mod extract;
pub mod ftp;
pub mod progress;
pub mod target;
pub mod terminal;

#[cfg(test)]
pub(crate) mod fake_ftp;
