use clap::Parser;

/// Serve the contents of a ZIP upload as if it were the live site
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE", default_value = "./config.toml")]
    pub config: String,

    /// Validate the config file and exit
    #[arg(long)]
    pub check: bool,
}
