use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Effects};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "Lively")]
#[command(about = "Live-development relay for browser sessions")]
#[command(
    long_about = "Lively: watches sources, compiles what changed and pushes it to connected browsers"
)]
#[command(version)]
#[command(author)]
#[command(styles = get_styles())]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Watch sources and relay changes to connected browsers
    Dev {
        /// Config file; `lively.toml` in the working directory is used when present
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Host address to bind the server to
        #[arg(long)]
        host: Option<String>,

        /// Port to run the server on
        #[arg(short, long)]
        port: Option<u16>,

        /// Root of the original sources
        #[arg(long)]
        src: Option<PathBuf>,
    },
}

fn get_styles() -> Styles {
    Styles::styled()
        .usage(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .header(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Cyan.on_default())
        .invalid(AnsiColor::Red.on_default() | Effects::BOLD)
        .error(AnsiColor::Red.on_default() | Effects::BOLD)
        .valid(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::White.on_default())
}
