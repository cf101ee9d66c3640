#![doc = include_str!("../README.md")]

use std::io::IsTerminal;

use base64::{engine::general_purpose::STANDARD, Engine};
use cdsh_client::{parse_e164s, CdshConfig, DiscoveryServiceV1, DiscoveryServiceV2};
use cdsh_protocol::{AccessKey, Aci, DiscoveryRequestV2, PROFILE_KEY_SIZE};
use clap::Parser;
use color_eyre::eyre::{bail, eyre, Result, WrapErr};
use tracing::debug;
use tracing_subscriber::{
    filter::LevelFilter, prelude::__tracing_subscriber_SubscriberExt as _,
    util::SubscriberInitExt as _, EnvFilter,
};

use crate::command::{Cli, Commands, V1Args, V2Args};

mod command;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .init();

    color_eyre::install()?;

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    debug!("Using discovery service at {}", config.url);

    let output = match &cli.command {
        Commands::V1(args) => run_v1(&cli, &config, args).await?,
        Commands::V2(args) => run_v2(&cli, &config, args).await?,
    };

    if !cli.quiet {
        println!("{output}");
    }
    Ok(())
}

/// Logs go to stderr so stdout stays valid JSON. `rust_log` overrides the info default.
fn log_filter(rust_log: Option<&str>) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse_lossy(rust_log.unwrap_or_default())
}

/// Read the configuration file, if any, and apply command line overrides
fn load_config(cli: &Cli) -> Result<CdshConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
            CdshConfig::from_json(&json)?
        }
        None => CdshConfig::default(),
    };

    if let Some(url) = &cli.url {
        config.url = url.clone();
    }
    if let Some(public_key) = &cli.public_key {
        config.public_key = public_key.clone();
    }
    if !cli.code_hashes.is_empty() {
        config.code_hashes = cli.code_hashes.clone();
    }
    if let Some(max_request_items) = cli.max_request_items {
        config.max_request_items = max_request_items;
    }
    if let Some(exchange_timeout) = cli.exchange_timeout {
        config.exchange_timeout_secs = Some(exchange_timeout);
    }

    Ok(config)
}

async fn run_v1(cli: &Cli, config: &CdshConfig, args: &V1Args) -> Result<String> {
    let numbers = numbers_or_stdin(&args.numbers)?;

    let service = DiscoveryServiceV1::from_config(config)?;
    let registered = service
        .get_registered_users(&cli.username, &cli.password, &numbers)
        .await?;

    Ok(serde_json::to_string_pretty(&registered)?)
}

async fn run_v2(cli: &Cli, config: &CdshConfig, args: &V2Args) -> Result<String> {
    let request = DiscoveryRequestV2 {
        previous_e164s: parse_e164s(&args.previous)?.into_iter().collect(),
        new_e164s: parse_e164s(numbers_or_stdin(&args.numbers)?)?
            .into_iter()
            .collect(),
        removed_e164s: parse_e164s(&args.removed)?.into_iter().collect(),
        service_ids: args
            .service_ids
            .iter()
            .map(|arg| parse_service_id(arg))
            .collect::<Result<_>>()?,
        token: args
            .token
            .as_deref()
            .map(|token| STANDARD.decode(token))
            .transpose()
            .wrap_err("Token is not valid base64")?,
    };

    let service = DiscoveryServiceV2::from_config(config)?;
    let response = service
        .get_registered_users(&cli.username, &cli.password, &request)
        .await?;

    Ok(serde_json::to_string_pretty(&response)?)
}

/// Parse `ACI:PROFILE_KEY` into the pair sent with a v2 request
fn parse_service_id(arg: &str) -> Result<(Aci, AccessKey)> {
    let Some((aci, profile_key)) = arg.split_once(':') else {
        bail!("Expected ACI:PROFILE_KEY, got {arg:?}");
    };

    let aci = uuid::Uuid::parse_str(aci).wrap_err("Invalid ACI")?;
    let profile_key: [u8; PROFILE_KEY_SIZE] = hex::decode(profile_key)
        .wrap_err("Profile key is not valid hex")?
        .try_into()
        .map_err(|_| eyre!("Profile key must be {PROFILE_KEY_SIZE} bytes"))?;

    Ok((Aci::from(aci), AccessKey::derive(&profile_key)))
}

/// The numbers given on the command line, or whitespace separated numbers from stdin
fn numbers_or_stdin(numbers: &[String]) -> Result<Vec<String>> {
    if !numbers.is_empty() || std::io::stdin().is_terminal() {
        return Ok(numbers.to_vec());
    }

    let input = std::io::read_to_string(std::io::stdin())?;
    Ok(input.split_whitespace().map(str::to_owned).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter() {
        assert!(log_filter(None).to_string().contains("info"));
        assert!(log_filter(Some("cdsh_client=debug"))
            .to_string()
            .contains("cdsh_client=debug"));
    }

    #[test]
    fn test_parse_service_id() {
        let arg = format!("{}:{}", "11111111-1111-1111-1111-111111111111", "00".repeat(32));

        let (aci, key) = parse_service_id(&arg).expect("valid service id");

        assert_eq!(aci, Aci::from_bytes([0x11; 16]));
        assert_eq!(key, AccessKey::derive(&[0; 32]));
    }

    #[test]
    fn test_parse_service_id_rejects_malformed() {
        assert!(parse_service_id("11111111-1111-1111-1111-111111111111").is_err());
        assert!(parse_service_id("not-a-uuid:00").is_err());
        assert!(parse_service_id("11111111-1111-1111-1111-111111111111:abcd").is_err());
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "cdsh",
            "--url",
            "https://cdsh.example.org",
            "--code-hash",
            "aa",
            "--code-hash",
            "bb",
            "--max-request-items",
            "10",
            "--exchange-timeout",
            "20",
            "--username",
            "u",
            "--password",
            "p",
            "v1",
            "+15550001",
        ]);

        let config = load_config(&cli).expect("valid config");

        assert_eq!(config.url, "https://cdsh.example.org");
        assert_eq!(config.code_hashes, vec!["aa", "bb"]);
        assert_eq!(config.max_request_items, 10);
        assert_eq!(config.connect_timeout_secs, 30);
        assert_eq!(config.exchange_timeout_secs, Some(20));
    }

    #[test]
    fn test_config_without_overrides_keeps_defaults() {
        let cli = Cli::parse_from(["cdsh", "--username", "u", "--password", "p", "v1"]);

        let config = load_config(&cli).expect("valid config");

        assert_eq!(config, CdshConfig::default());
        assert_eq!(config.exchange_timeout_secs, None);
    }
}
