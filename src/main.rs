use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use browsercaps::{
    AppIdentity, BrowserCapsDetector, ConfigManager, GlobalConfig, KeySeed, MachineKey, MachineKeyConfig,
};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "browsercaps")]
#[command(about = "Resolve browser capabilities from .browser rule files and generate machine keys")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve the capabilities of a request and print them as JSON
    Resolve {
        /// User-Agent header value
        user_agent: String,

        /// Extra request header, as "Name: value"
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Machine rule directory
        #[arg(short, long)]
        rules: Option<PathBuf>,

        /// Application rule directory
        #[arg(long)]
        app_rules: Option<PathBuf>,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Derive keys from a fresh seed and print them as hex
    GenKey {
        #[arg(long, default_value = "HMACSHA256")]
        validation: String,

        #[arg(long, default_value = "Auto")]
        decryption: String,

        /// Application virtual path used for IsolateApps
        #[arg(long, default_value = "/")]
        app_path: String,

        /// Application id used for IsolateByAppId
        #[arg(long, default_value = "")]
        app_id: String,

        /// Key descriptor applied to both keys
        #[arg(long, default_value = "AutoGenerate")]
        descriptor: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if args.verbose {
        EnvFilter::new("browsercaps=debug")
    } else {
        EnvFilter::new("browsercaps=warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Resolve {
            user_agent,
            headers,
            rules,
            app_rules,
            config,
        } => resolve(user_agent, headers, rules, app_rules, config),
        Command::GenKey {
            validation,
            decryption,
            app_path,
            app_id,
            descriptor,
        } => gen_key(validation, decryption, app_path, app_id, descriptor),
    }
}

fn resolve(
    user_agent: String,
    raw_headers: Vec<String>,
    rules: Option<PathBuf>,
    app_rules: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => GlobalConfig::from_json_file(&path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ConfigManager::get_default(),
    };
    if let Some(dir) = rules {
        config.machine_rules_dir = dir;
    }
    if app_rules.is_some() {
        config.app_rules_dir = app_rules;
    }

    let mut headers = HashMap::new();
    for raw in raw_headers {
        let Some((name, value)) = raw.split_once(':') else {
            bail!("header '{}' is not in 'Name: value' form", raw);
        };
        headers.insert(name.trim().to_string(), value.trim().to_string());
    }
    headers.insert("User-Agent".to_string(), user_agent);

    let detector = BrowserCapsDetector::new(config).context("failed to load browser rules")?;
    let caps = detector.resolve(&headers);
    info!("resolved browser id {:?}", caps.id());
    println!("{}", serde_json::to_string_pretty(&caps.to_json())?);
    Ok(())
}

fn gen_key(validation: String, decryption: String, app_path: String, app_id: String, descriptor: String) -> Result<()> {
    let config = MachineKeyConfig {
        validation_key: descriptor.clone(),
        decryption_key: descriptor,
        validation,
        decryption,
    };
    let key = MachineKey::derive(&config, &KeySeed::generate(), &AppIdentity::new(app_path, app_id))
        .context("failed to derive machine key")?;

    println!("validation = {}", key.validation_algorithm().name);
    println!("validationKey = {}", hex::encode_upper(key.validation_key()));
    println!("decryption = {:?}", key.cipher());
    println!("decryptionKey = {}", hex::encode_upper(key.decryption_key()));
    Ok(())
}
