use crate::core::ftp::{FtpConnection, RemoteSource, CHUNK_SIZE};
use crate::core::progress::ProgressReporter;
use crate::core::target::TransferTarget;
use crate::error::{Result, UpdaterError};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Downloads one remote file to a local path.
///
/// The remote connection is acquired in [`TransferSession::open`]; the
/// local file is only created once the first chunk arrives. Both are
/// released by [`TransferSession::close`], which also runs on drop.
pub struct TransferSession<R: RemoteSource = FtpConnection> {
    remote: Option<R>,
    target: TransferTarget,
    output_path: PathBuf,
    output: Option<File>,
    bytes_transferred: u64,
    total_bytes: u64,
    chunk_size: usize,
}

impl TransferSession<FtpConnection> {
    /// Connects to the server, logs in and changes into the remote directory.
    pub fn open<P: Into<PathBuf>>(target: TransferTarget, output_path: P) -> Result<Self> {
        info!(
            "connecting to {} ({})",
            target.address(),
            target.remote_directory
        );
        let remote = FtpConnection::open(&target)?;
        Ok(Self::with_remote(remote, target, output_path))
    }
}

impl<R: RemoteSource> TransferSession<R> {
    pub fn with_remote<P: Into<PathBuf>>(remote: R, target: TransferTarget, output_path: P) -> Self {
        Self {
            remote: Some(remote),
            target,
            output_path: output_path.into(),
            output: None,
            bytes_transferred: 0,
            total_bytes: 0,
            chunk_size: CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn target(&self) -> &TransferTarget {
        &self.target
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Probes the remote size, then streams the file to disk.
    ///
    /// Returns the number of bytes written. On failure whatever arrived so
    /// far stays on disk. Receiving fewer or more bytes than the announced
    /// size is a transfer failure.
    pub fn run<W: Write>(&mut self, progress: &mut ProgressReporter<W>) -> Result<u64> {
        let remote = self
            .remote
            .as_mut()
            .ok_or_else(|| UpdaterError::protocol_error("transfer session already closed"))?;

        let name = self.target.remote_file_name.as_str();
        let total = remote.size(name)?;
        self.total_bytes = total;
        self.bytes_transferred = 0;
        debug!("{name} is {total} bytes");

        let label = format!("{name} :");
        let output_path = self.output_path.as_path();
        let output = &mut self.output;
        let transferred = &mut self.bytes_transferred;

        remote.retrieve(name, self.chunk_size, &mut |chunk| {
            if output.is_none() {
                debug!("creating {}", output_path.display());
                *output = Some(File::create(output_path).map_err(|source| {
                    UpdaterError::LocalFile {
                        path: output_path.to_path_buf(),
                        source,
                    }
                })?);
            }
            if let Some(file) = output.as_mut() {
                file.write_all(chunk)
                    .map_err(|source| UpdaterError::LocalFile {
                        path: output_path.to_path_buf(),
                        source,
                    })?;
            }

            *transferred += chunk.len() as u64;
            if *transferred < total {
                progress.update(&label, *transferred, total, false);
            }
            Ok(())
        })?;

        if let Some(file) = self.output.as_mut() {
            file.flush().map_err(|source| UpdaterError::LocalFile {
                path: self.output_path.clone(),
                source,
            })?;
        }

        // The archive on disk must be exactly what SIZE announced.
        if self.bytes_transferred != total {
            return Err(UpdaterError::transfer_error(format!(
                "{name}: server announced {total} bytes but sent {}",
                self.bytes_transferred
            )));
        }
        if total > 0 {
            progress.update(&label, total, total, true);
        }

        info!(
            "downloaded {} bytes to {}",
            self.bytes_transferred,
            self.output_path.display()
        );
        Ok(self.bytes_transferred)
    }

    /// Releases the connection and the local file. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(mut remote) = self.remote.take() {
            remote.close();
            debug!("connection to {} closed", self.target.address());
        }
        if let Some(mut file) = self.output.take() {
            if let Err(e) = file.flush() {
                warn!("flushing {} failed: {e}", self.output_path.display());
            }
        }
    }
}

impl<R: RemoteSource> Drop for TransferSession<R> {
    fn drop(&mut self) {
        self.close();
    }
}
