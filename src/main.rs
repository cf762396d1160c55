use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use clap::Parser;
use clap::builder::RangedU64ValueParser;
use log::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

mod api;
mod blockchain;
mod config;
mod network;
mod node;

use config::{
    NodeConfig, BLOCKCHAIN_PORT_RANGE_START, MAX_MINING_DIFFICULTY, MINING_DIFFICULTY,
    MINING_TIMER_SEC, NEIGHBOR_SYNC_TIME_SEC,
};
use network::{local_ipv4, HttpPeerClient};
use node::Node;

/// Command-line options of a ledger node
#[derive(Parser, Debug)]
#[command(version, about = "Proof-of-work ledger node")]
struct Args {
    /// LAN IPv4 address to listen on; neighbors are scanned on the same /24.
    /// Defaults to this machine's LAN address, or 127.0.0.1 without one
    #[arg(long)]
    host: Option<Ipv4Addr>,

    /// Port to listen on
    #[arg(short, long, default_value_t = BLOCKCHAIN_PORT_RANGE_START)]
    port: u16,

    /// Address credited with mining rewards; a fresh wallet is generated if omitted
    #[arg(long)]
    address: Option<String>,

    /// Leading hex zeros a block hash must carry (0 to 64)
    #[arg(
        long,
        default_value_t = MINING_DIFFICULTY,
        value_parser = RangedU64ValueParser::<usize>::new().range(0..=MAX_MINING_DIFFICULTY as u64)
    )]
    difficulty: usize,

    /// Seconds between mining rounds
    #[arg(long, default_value_t = MINING_TIMER_SEC)]
    mining_interval: u64,

    /// Seconds between neighbor scans
    #[arg(long, default_value_t = NEIGHBOR_SYNC_TIME_SEC)]
    sync_interval: u64,

    /// Serve and sync without mining
    #[arg(long)]
    no_mining: bool,
}

impl Args {
    fn node_config(&self, blockchain_address: String) -> NodeConfig {
        NodeConfig {
            host: self.host.unwrap_or_else(lan_host),
            port: self.port,
            difficulty: self.difficulty,
            mining_interval: Duration::from_secs(self.mining_interval),
            neighbor_sync_interval: Duration::from_secs(self.sync_interval),
            ..NodeConfig::new(blockchain_address)
        }
    }
}

fn lan_host() -> Ipv4Addr {
    local_ipv4().unwrap_or_else(|| {
        warn!("No LAN address found, listening on {}", Ipv4Addr::LOCALHOST);
        Ipv4Addr::LOCALHOST
    })
}

// Use the given miner address or create a wallet for this node
fn miner_address(args: &Args) -> String {
    match &args.address {
        Some(address) => address.clone(),
        None => {
            let wallet = blockchain::Wallet::new();
            info!("Created miner wallet with address: {}", wallet.address());
            info!("Miner wallet public key: {}", wallet.public_key_hex());
            info!("Miner wallet private key: {}", wallet.secret_key_hex());
            wallet.address().0.clone()
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_chain,
        api::handlers::get_transactions,
        api::handlers::create_transaction,
        api::handlers::add_transaction,
        api::handlers::clear_transactions,
        api::handlers::consensus,
        api::handlers::mine_block,
        api::handlers::get_amount,
        api::handlers::create_wallet,
        api::handlers::create_wallet_transaction
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::TransactionRequest,
            blockchain::ChainDump,
            blockchain::Address,
            api::handlers::TransactionsResponse,
            api::handlers::MessageResponse,
            api::handlers::ConsensusResponse,
            api::handlers::MineResponse,
            api::handlers::AmountResponse,
            api::handlers::WalletResponse,
            api::handlers::WalletTransactionRequest
        )
    ),
    tags(
        (name = "ledger", description = "Ledger node endpoints")
    ),
    info(
        title = "Ledger Node API",
        version = "0.1.0",
        description = "Peer-facing and wallet endpoints of a proof-of-work ledger node",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let args = Args::parse();
    let config = args.node_config(miner_address(&args));
    let bind = (config.host, config.port);

    let peers = HttpPeerClient::new(config.peer_timeout)?;
    let node = Node::new(config, Arc::new(peers));

    if args.no_mining {
        node.start_sync_neighbors().await;
        node.resolve_conflicts().await;
    } else {
        node.run().await;
    }

    let data = web::Data::new(node.clone());

    info!("Starting HTTP server at http://{}:{}", bind.0, bind.1);

    // Start HTTP server
    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        // Configure OpenAPI documentation
        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(data.clone())
            .configure(api::configure_routes)
            // Swagger UI
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone())
            )
    })
    .bind(bind)?
    .run()
    .await?;

    node.stop_mining();
    node.finish();

    Ok(())
}
