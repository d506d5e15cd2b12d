use std::{
    fs,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use regex::Regex;
use tracing_subscriber::{fmt, EnvFilter};
use wallet_plugins_core::{
    config::HostConfig, Environment, FileEnvironment, LoaderOptions, PluginLoader,
};
use wallet_plugins_sdk::{PluginManifest, Version, MANIFEST_FILE};

const DEFAULT_CONFIG: &str = "wallet-plugins.toml";
const EXAMPLE_CONFIG: &str = include_str!("../wallet-plugins.example.toml");

#[derive(Parser, Debug)]
#[command(name = "wallet-plugins", author, version, about = "Wallet plugin host tooling")]
struct Cli {
    /// Sets the log level (error, warn, info, debug, trace).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Host configuration file. Built-in defaults apply when the default file is absent.
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG, global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Discover, inspect and remove installed plugins.
    Plugins {
        #[command(subcommand)]
        command: PluginCommands,
    },
    /// Inspect persisted profiles.
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Interact with configuration files.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum PluginCommands {
    /// Lists plugins discovered for a profile.
    List {
        #[arg(long, value_name = "ID")]
        profile: String,
        /// Skip plugins whose minimumVersion is newer than this wallet version.
        #[arg(long, value_name = "SEMVER")]
        host_version: Option<Version>,
    },
    /// Prints one package's validated manifest as JSON.
    Inspect {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
    /// Deletes a plugin directory below the configured plugins root.
    Remove {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum ProfileCommands {
    /// Prints a profile's persisted settings, plugin stores included.
    Show {
        #[arg(value_name = "ID")]
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Validates the provided configuration file.
    Validate {
        #[arg(value_name = "FILE")]
        config: PathBuf,
    },
    /// Prints the bundled example configuration.
    Example,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;
    match cli.command {
        Commands::Plugins { command } => handle_plugins(&cli.config, command).await,
        Commands::Profile { command } => handle_profile(&cli.config, command).await,
        Commands::Config { command } => handle_config(command),
    }
}

/// `--log-level` takes a level or a full filter directive such as
/// `wallet_plugins_core::loader=debug`. An unparsable value is an error.
fn log_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level).with_context(|| format!("invalid --log-level `{level}`"))
}

fn init_tracing(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(log_filter(level)?)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("failed to install the log subscriber: {err}"))
}

async fn handle_plugins(config_path: &Path, command: PluginCommands) -> Result<()> {
    let config = load_host_config(config_path)?;
    let options = LoaderOptions::from_config(&config.plugins);
    match command {
        PluginCommands::List {
            profile,
            host_version,
        } => {
            let options = match host_version {
                Some(version) => options.with_host_version(version),
                None => options,
            };
            let loader = PluginLoader::new(options);
            let sources = loader.search(&profile).await;
            if sources.is_empty() {
                println!(
                    "no plugins found for profile `{profile}` under {}",
                    loader.root().display()
                );
            }
            for source in sources {
                let manifest = &source.manifest;
                let permissions: Vec<_> = manifest
                    .permissions()
                    .iter()
                    .map(|p| p.as_str())
                    .collect();
                println!(
                    "- {} v{} [{}] {}",
                    manifest.name(),
                    manifest.version(),
                    permissions.join(", "),
                    source.dir.display()
                );
            }
        }
        PluginCommands::Inspect { dir } => {
            let manifest_path = dir.join(MANIFEST_FILE);
            let raw = fs::read_to_string(&manifest_path)
                .with_context(|| format!("failed to read {}", manifest_path.display()))?;
            let manifest = PluginManifest::from_json(&raw)
                .with_context(|| format!("invalid manifest {}", manifest_path.display()))?;
            println!("{}", serde_json::to_string_pretty(&manifest)?);
        }
        PluginCommands::Remove { dir } => {
            let loader = PluginLoader::new(options);
            loader
                .remove(&dir)
                .await
                .with_context(|| format!("failed to remove {}", dir.display()))?;
            println!("removed {}", dir.display());
        }
    }
    Ok(())
}

async fn handle_profile(config_path: &Path, command: ProfileCommands) -> Result<()> {
    let config = load_host_config(config_path)?;
    let env = FileEnvironment::new(&config.profiles.data_dir);
    match command {
        ProfileCommands::Show { id } => {
            let Some(profile) = env.load(&id).await? else {
                bail!(
                    "profile `{id}` not found in {}",
                    config.profiles.data_dir.display()
                );
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&profile.snapshot().await)?
            );
        }
    }
    Ok(())
}

fn handle_config(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Validate { config } => {
            let cfg = load_config(&config)?;
            cfg.validate()?;
            println!("configuration OK: {}", config.display());
        }
        ConfigCommands::Example => {
            println!("{EXAMPLE_CONFIG}");
        }
    }
    Ok(())
}

/// Loads, applies `PLUGINS_DIR`, and validates the host configuration.
fn load_host_config(path: &Path) -> Result<HostConfig> {
    let config = if path == Path::new(DEFAULT_CONFIG) && !path.exists() {
        tracing::debug!("no {DEFAULT_CONFIG} found; using defaults");
        HostConfig::default()
    } else {
        load_config(path)?
    };
    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}

fn load_config(path: &Path) -> Result<HostConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    parse_config(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn parse_config(raw: &str) -> Result<HostConfig> {
    Ok(toml::from_str::<HostConfig>(&expand_env(raw))?)
}

/// Expands `${VAR}` and `${VAR:fallback}`. Unset or empty variables take the
/// fallback, or the empty string without one.
fn expand_env(input: &str) -> String {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let placeholder = PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\$\{(?P<var>[A-Z][A-Z0-9_]*)(?::(?P<fallback>[^}]*))?\}")
            .expect("placeholder pattern is valid")
    });
    placeholder
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps["var"])
                .ok()
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| caps.name("fallback").map_or("", |m| m.as_str()).to_string())
        })
        .into_owned()
}
