use anyhow::{anyhow, Result};
use clap::{Arg, Command};
use contract_bind::config::Config;
use contract_bind::counter::Counter;
use contract_bind::ethereum::provider::RpcBackend;
use contract_bind::ethereum::signer::LocalSigner;
use contract_bind::ethereum::{
    BoundContract, CallOptions, ContractArtifact, TransactOptions, TransactionSigner,
};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout only carries results
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let matches = Command::new("contract-bind")
        .version("0.1.0")
        .about("Increment the deployed Counter contract and read back its value")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to configuration file"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .help("Generate a sample configuration file and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config-path")
                .long("config-path")
                .help("Print the default configuration file path and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    if matches.get_flag("generate-config") {
        println!("{}", Config::generate_sample());
        return Ok(());
    }

    if matches.get_flag("config-path") {
        match Config::default_config_path() {
            Ok(path) => {
                println!("{}", path.display());
                return Ok(());
            }
            Err(e) => {
                error!("Could not determine default config path: {}", e);
                return Err(e);
            }
        }
    }

    let config_path = matches.get_one::<String>("config").map(|s| s.as_str());
    let config = Config::load_or_default(config_path).await;

    if let Err(e) = run(config).await {
        error!("{}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let address = config.contract_address()?;
    let backend = Arc::new(
        RpcBackend::new(&config.network.rpc_url)?
            .with_poll_interval(config.feed.poll_interval())
            .with_buffer(config.feed.buffer),
    );
    let signer = Arc::new(LocalSigner::from_env(&config.signer.private_key_env)?);
    info!("Using account {}", signer.address());

    let counter = match &config.contract.abi_path {
        Some(path) => {
            let artifact = ContractArtifact::load(path).await?;
            let contract =
                BoundContract::bind(address, Arc::new(artifact.descriptor), backend.clone())?;
            Counter::from_contract(contract)
        }
        None => Counter::new(address, backend.clone())?,
    };

    let mut opts = TransactOptions::new(signer.clone()).chain_id(config.network.chain_id);
    if let Some(gas_limit) = config.network.gas.gas_limit {
        opts = opts.gas_limit(gas_limit);
    }
    if let Some(gas_price) = config.network.gas.gas_price {
        opts = opts.gas_price(gas_price.into());
    }

    let tx = counter
        .inc(&opts)
        .await
        .map_err(|e| anyhow!("Failed to send increment transaction: {}", e))?;
    println!("Increment transaction sent: {}", tx.hash());

    let value = counter
        .x(&CallOptions::pending().from(signer.address()))
        .await
        .map_err(|e| anyhow!("Failed to read counter value: {}", e))?;
    println!("Current counter value: {}", value);

    Ok(())
}
