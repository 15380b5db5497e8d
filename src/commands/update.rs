use crate::core::config::Config;
use crate::core::download::TransferSession;
use crate::core::extract::ExtractionSession;
use crate::core::ftp::FtpConnection;
use crate::core::progress::ProgressReporter;
use crate::core::target::{Credentials, TransferTarget};
use crate::error::{Result, UpdaterError};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Downloads the distribution archive into the working directory and
/// unpacks it. `overrides` (the command line) win over `conf_file`.
pub fn run_update(overrides: Config, conf_file: &Path) -> Result<()> {
    let config = overrides.or(Config::load(conf_file)?);
    update(&config, Path::new("."))
}

/// Lists the files published next to the distribution archive.
pub fn list_remote(overrides: Config, conf_file: &Path) -> Result<()> {
    let config = overrides.or(Config::load(conf_file)?);
    let target = resolve_target(&config)?;

    println!("📂 Files in {}{}:", target.address(), target.remote_directory);
    let mut connection = FtpConnection::open(&target)?;
    let files = connection.list_files()?;
    connection.quit()?;

    if files.is_empty() {
        println!("   (no files)");
    }
    for file in &files {
        match file.size {
            Some(size) => println!("  • {} ({size} bytes)", file.name),
            None => println!("  • {}", file.name),
        }
    }
    Ok(())
}

pub fn update(config: &Config, download_dir: &Path) -> Result<()> {
    let target = resolve_target(config)?;
    let archive_path = local_archive_path(download_dir, &target.remote_file_name);
    let target_dir = config.target_dir();

    download(target, &archive_path)?;
    unpack(&archive_path, target_dir)?;

    println!("✅ Unpacked into {}", target_dir.display());
    Ok(())
}

/// Runs one transfer session; the connection and output file are released
/// before this returns, whatever the outcome.
pub fn download(target: TransferTarget, archive_path: &Path) -> Result<u64> {
    println!(
        "⬇️  Downloading {} from {}{}",
        target.remote_file_name,
        target.address(),
        target.remote_directory
    );

    let mut session = TransferSession::open(target, archive_path)?;
    remove_stale_archive(archive_path)?;
    let bytes = session.run(&mut ProgressReporter::stdout())?;
    session.close();
    Ok(bytes)
}

/// Runs one extraction session; the archive handle is released before
/// this returns.
pub fn unpack(archive_path: &Path, target_dir: &Path) -> Result<u64> {
    println!(
        "📦 Unpacking {} into {}",
        archive_path.display(),
        target_dir.display()
    );

    let mut session = ExtractionSession::open(archive_path, target_dir)?;
    debug!(
        "{} entries, {} bytes of file data",
        session.entries().len(),
        session.total_file_bytes()
    );
    let bytes = session.run(&mut ProgressReporter::stdout())?;
    session.close();
    Ok(bytes)
}

fn resolve_target(config: &Config) -> Result<TransferTarget> {
    let credentials = resolve_credentials(config.ftp_user.clone(), config.ftp_password.clone())?;
    TransferTarget::from_url(config.ftp_base_url(), config.file_name(), credentials)
}

fn resolve_credentials(
    user: Option<String>,
    password: Option<String>,
) -> Result<Option<Credentials>> {
    match (user, password) {
        (None, None) => Ok(None),
        (None, Some(_)) => {
            warn!("FTP password given without a user name; logging in anonymously");
            Ok(None)
        }
        (Some(user), Some(password)) => Ok(Some(Credentials::new(user, password))),
        (Some(user), None) => {
            let password = if user != "anonymous" && console::user_attended() {
                prompt_password(&user)?
            } else {
                String::new()
            };
            Ok(Some(Credentials::new(user, password)))
        }
    }
}

fn prompt_password(user: &str) -> Result<String> {
    dialoguer::Password::new()
        .with_prompt(format!("FTP password for {user}"))
        .allow_empty_password(true)
        .interact()
        .map_err(|e| UpdaterError::config_error(format!("cannot read password: {e}")))
}

/// A previous download must not be unpacked in place of this one, e.g. when
/// the remote file turns out to be empty and nothing new gets written.
fn remove_stale_archive(archive_path: &Path) -> Result<()> {
    match std::fs::remove_file(archive_path) {
        Ok(()) => {
            debug!("removed stale {}", archive_path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(UpdaterError::LocalFile {
            path: archive_path.to_path_buf(),
            source,
        }),
    }
}

/// The archive is saved under its bare file name, even when the remote
/// name carries a directory part.
fn local_archive_path(download_dir: &Path, remote_file_name: &str) -> PathBuf {
    let file_name = Path::new(remote_file_name)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(remote_file_name));
    download_dir.join(file_name)
}
