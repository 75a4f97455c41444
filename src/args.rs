use clap::Parser;
use std::path::PathBuf;

use gamecast::config;

#[derive(Parser, Debug)]
#[command(name = "gamecast")]
#[command(version = "0.1.0")]
#[command(about = "Multi-user WebRTC bridge for a Moonlight streaming host", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Sunshine server host (overrides config)
    #[arg(long)]
    pub sunshine_host: Option<String>,

    /// Server bind address (overrides config)
    #[arg(long)]
    pub bind: Option<String>,

    /// Pair with the host using this PIN, persist the client
    /// certificate, and exit
    #[arg(long, value_name = "PIN")]
    pub pair: Option<String>,

    /// Device name announced to the host during pairing
    #[arg(long, default_value = "gamecast")]
    pub device_name: String,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,
}

impl Args {
    pub fn load_config(&self) -> Result<config::Config, config::ConfigError> {
        config::Config::load(&self.config)
    }
}
