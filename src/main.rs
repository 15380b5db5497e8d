use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

// Use the library modules
use tachyon_updater::core::config::{self, Config};
use tachyon_updater::{commands, utils};

#[derive(Parser)]
#[clap(name = "tachyon-updater")]
#[clap(about = "Tachyon updater: fetches the distribution archive over FTP and unpacks it")]
#[clap(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// FTP base URL (default: ftp://builderust.dev.ath/tachyon/)
    #[clap(short = 'u', long = "ftp-base-url", alias = "ftp-base_url")]
    ftp_base_url: Option<String>,
    /// Distribution file name (default: the archive for this platform)
    #[clap(short = 'f', long)]
    file_name: Option<String>,
    /// Path to config file
    #[clap(short = 'c', long, default_value = config::DEFAULT_CONFIG_FILE)]
    conf_file: PathBuf,
    /// User name for FTP (default: anonymous)
    #[clap(long)]
    ftp_user: Option<String>,
    /// Password for the FTP user (prompted for when omitted)
    #[clap(long)]
    ftp_password: Option<String>,
    /// Directory the archive is unpacked into (default: o)
    #[clap(short = 'o', long)]
    target_dir: Option<PathBuf>,
    /// List the files available on the server and exit
    #[clap(long)]
    list: bool,
    /// Enable debug output
    #[clap(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    utils::logging::init(cli.verbose)?;

    let overrides = Config {
        ftp_base_url: cli.ftp_base_url,
        file_name: cli.file_name,
        ftp_user: cli.ftp_user,
        ftp_password: cli.ftp_password,
        target_dir: cli.target_dir,
    };

    let result = if cli.list {
        commands::update::list_remote(overrides, &cli.conf_file)
    } else {
        commands::update::run_update(overrides, &cli.conf_file)
    };

    if let Err(e) = result {
        eprintln!("{}", e.diagnostic());
        std::process::exit(1);
    }

    Ok(())
}
