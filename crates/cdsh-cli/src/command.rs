use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

pub const USERNAME_ENV: &str = "CDSH_USERNAME";
pub const PASSWORD_ENV: &str = "CDSH_PASSWORD";

#[derive(Parser, Clone)]
#[command(name = "cdsh", version, about = "Contact discovery client", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "JSON configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Base URL of the discovery service")]
    pub url: Option<String>,

    #[arg(long, global = true, help = "Hex encoded enclave public key")]
    pub public_key: Option<String>,

    #[arg(
        long = "code-hash",
        global = true,
        help = "Hex encoded trusted code hash, may be repeated"
    )]
    pub code_hashes: Vec<String>,

    #[arg(long, global = true, help = "Maximum numbers a v2 request may leave on the server")]
    pub max_request_items: Option<usize>,

    #[arg(
        long,
        global = true,
        value_name = "SECONDS",
        help = "Give up on an exchange after this many seconds"
    )]
    pub exchange_timeout: Option<u64>,

    #[arg(long, global = true, env = USERNAME_ENV)]
    pub username: String,

    #[arg(long, global = true, env = PASSWORD_ENV, hide_env_values = true)]
    pub password: String,

    #[arg(short = 'q', long, global = true, help = "Don't print anything to stdout.")]
    pub quiet: bool,
}

#[derive(Subcommand, Clone)]
pub enum Commands {
    #[command(long_about = "Resolve phone numbers to account identifiers.")]
    V1(V1Args),

    #[command(long_about = "Resolve a delta of phone numbers and print the next token.")]
    V2(V2Args),
}

#[derive(Args, Clone)]
pub struct V1Args {
    #[arg(help = "Phone numbers in E.164 format. Read from stdin when omitted")]
    pub numbers: Vec<String>,
}

#[derive(Args, Clone)]
pub struct V2Args {
    #[arg(help = "New phone numbers in E.164 format. Read from stdin when omitted")]
    pub numbers: Vec<String>,

    #[arg(long, help = "Numbers sent in the exchange that produced the token")]
    pub previous: Vec<String>,

    #[arg(long, help = "Numbers from the previous exchange to discard")]
    pub removed: Vec<String>,

    #[arg(long, help = "Base64 token returned by the previous exchange")]
    pub token: Option<String>,

    #[arg(
        long = "service-id",
        value_name = "ACI:PROFILE_KEY",
        help = "Known account and its hex encoded profile key, may be repeated"
    )]
    pub service_ids: Vec<String>,
}
