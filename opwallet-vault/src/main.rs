//! OP Wallet vault CLI
//!
//! Manages an encrypted keyring vault from the command line.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opwallet_vault::config::{default_config_path, VaultConfig};
use opwallet_vault::AddressType;

mod commands;

#[derive(Parser)]
#[command(name = "opwallet-vault")]
#[command(about = "OP Wallet credential vault - manage keyrings securely")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Custom config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Custom data directory (overrides the config file)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault
    Init,

    /// Import a wallet from a mnemonic or private key
    Import {
        /// Import a BIP-39 mnemonic (prompted)
        #[arg(long, conflicts_with = "private_key")]
        mnemonic: bool,

        /// Import a hex or WIF private key (prompted)
        #[arg(long)]
        private_key: bool,

        /// Address type, e.g. P2WPKH, P2TR, P2QRH
        #[arg(long)]
        address_type: Option<AddressType>,

        /// Also import an ML-DSA seed (prompted; private keys only)
        #[arg(long, requires = "private_key")]
        quantum_key: bool,

        /// Number of HD accounts to derive
        #[arg(long, default_value = "1")]
        accounts: u32,
    },

    /// List keyrings and their accounts
    Accounts,

    /// Derive the next account of an HD keyring
    AddAccount {
        /// Keyring index
        keyring: usize,
    },

    /// Remove a keyring
    Remove {
        /// Keyring index
        keyring: usize,

        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Show or switch the network
    Network {
        /// mainnet, testnet, signet or regtest
        network: Option<String>,
    },

    /// Change the vault password
    ChangePassword,

    /// Export the private key of an account or the mnemonic of a keyring
    ExportKey {
        /// Account public key (hex)
        #[arg(long, conflicts_with = "mnemonic")]
        pubkey: Option<String>,

        /// Keyring index whose mnemonic to show
        #[arg(long)]
        mnemonic: Option<usize>,
    },

    /// Manage ML-DSA quantum keys
    Quantum {
        #[command(subcommand)]
        action: commands::quantum::QuantumAction,
    },

    /// Detect wallets or quantum keys imported more than once
    Detect {
        /// Cross-check quantum keys with the chain
        #[arg(long)]
        on_chain: bool,
    },

    /// Manage the duplication backup
    Backup {
        #[command(subcommand)]
        action: commands::backup::BackupAction,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Resolve configuration
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let mut config = VaultConfig::load_or_default(&config_path)?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    match cli.command {
        Commands::Init => commands::init::run(&config).await,
        Commands::Import {
            mnemonic,
            private_key,
            address_type,
            quantum_key,
            accounts,
        } => {
            let options = commands::import::ImportOptions {
                mnemonic,
                private_key,
                address_type,
                quantum_key,
                accounts,
            };
            commands::import::run(&config, options).await
        }
        Commands::Accounts => commands::accounts::run(&config).await,
        Commands::AddAccount { keyring } => commands::accounts::add(&config, keyring).await,
        Commands::Remove { keyring, yes } => commands::remove::run(&config, keyring, yes).await,
        Commands::Network { network } => commands::network::run(&config, network).await,
        Commands::ChangePassword => commands::init::change_password(&config).await,
        Commands::ExportKey { pubkey, mnemonic } => {
            commands::export::run(&config, pubkey, mnemonic).await
        }
        Commands::Quantum { action } => commands::quantum::run(&config, action).await,
        Commands::Detect { on_chain } => commands::detect::run(&config, on_chain).await,
        Commands::Backup { action } => commands::backup::run(&config, action).await,
    }
}
