use clap::ValueHint;

use std::path::PathBuf;

#[derive(clap::Parser, Debug, Clone)]
#[command(version, about)]
pub struct Args {
    /// Path to the config file.
    ///
    /// By default, tubemirror looks for a file named `tubemirror.toml` in the following
    /// directories (in order):
    ///
    /// - `./` (the current directory)
    /// - `/etc`
    #[arg(
        short,
        env = "TUBEMIRROR_CONFIG",
        value_hint(ValueHint::FilePath)
    )]
    pub config_path: Option<PathBuf>,

    /// Address the task API server binds to.
    #[arg(long, env = "TUBEMIRROR_BIND_ADDR")]
    pub bind_addr: Option<String>,

    /// Path to the database file.
    #[arg(long, env = "TUBEMIRROR_DB", value_hint(ValueHint::FilePath))]
    pub db_path: Option<PathBuf>,

    /// Path to the HTTP cache directory for catalog API responses.
    #[arg(long, env = "TUBEMIRROR_CACHE_DIR", value_hint(ValueHint::DirPath))]
    pub cache_dir: Option<PathBuf>,
}

impl Args {
    pub fn parse() -> Self {
        clap::Parser::parse()
    }
}
