use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use clap_derive::{Parser, Subcommand};
use tracing::{info, warn, Level};

use pingmesh::driver::run_mesh;
use pingmesh::host::identity::NodeKey;
use pingmesh::host::node_id::{ListenAddr, ProtocolTag};
use pingmesh::host::tcp_host::{TcpHost, TcpHostConfig};
use pingmesh::host::transport_host::TransportHost;
use pingmesh::mesh::mesh_config::{MeshConfig, DEFAULT_PROTOCOL};
use pingmesh::mesh::orchestrator::MeshMode;
use pingmesh::mesh::peer_descriptor::PeerDescriptor;
use pingmesh::ping::ping_config::SendCadence;
use pingmesh::util::shutdown::shutdown_signal;

#[derive(Parser)]
struct Args {
    #[clap(subcommand)]
    command: Command,

    /// send pings at a fixed interval instead of a random one
    #[clap(long, global = true)]
    fixed_interval_ms: Option<u64>,

    /// upper bound of the random interval between pings
    #[clap(long, global = true, default_value_t = 2000)]
    max_interval_ms: u64,

    #[clap(long, global = true, default_value = DEFAULT_PROTOCOL)]
    protocol: String,

    #[clap(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[clap(long, global = true, default_value_t = false)]
    very_verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// create a new node identity, and print the descriptor to pass to 'connect'
    Create {
        #[clap(long, default_value = "127.0.0.1:0")]
        listen: Vec<SocketAddr>,

        /// where the node's key is stored
        #[clap(long, default_value = ".")]
        key_dir: PathBuf,
    },
    /// run a node created with 'create', connecting to the given peers
    Connect {
        /// this node's descriptor as printed by 'create'
        myself: String,

        peers: Vec<String>,

        #[clap(long, default_value = ".")]
        key_dir: PathBuf,
    },
    /// run a full mesh of nodes in this process
    Local {
        #[clap(long, default_value_t = 3)]
        nodes: usize,
    },
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let config = mesh_config(&args)?;

    match args.command {
        Command::Create { listen, key_dir } => create(&listen, &key_dir).await,
        Command::Connect { myself, peers, key_dir } => {
            let myself = myself.parse::<PeerDescriptor>()?;
            let peers = peers.iter()
                .map(|p| p.parse::<PeerDescriptor>())
                .collect::<Result<Vec<_>, _>>()?;
            if peers.is_empty() {
                return Err(anyhow!("missing peers to connect to"));
            }

            let key = NodeKey::load(&key_dir, &myself.id)?;
            let listen_addrs = tcp_addrs(&myself)?;
            let host = TcpHost::new(&key, &listen_addrs, TcpHostConfig::new()).await?;

            run_until_ctrl_c(MeshMode::Connect { local: Arc::new(host), peers }, config).await
        }
        Command::Local { nodes } => {
            if nodes < 2 {
                return Err(anyhow!("a mesh needs at least two nodes"));
            }
            let localhost: SocketAddr = "127.0.0.1:0".parse()?;

            let mut hosts: Vec<Arc<dyn TransportHost>> = Vec::new();
            for _ in 0..nodes {
                hosts.push(Arc::new(TcpHost::new(&NodeKey::generate(), &[localhost], TcpHostConfig::new()).await?));
            }
            run_until_ctrl_c(MeshMode::FullMesh { hosts }, config).await
        }
    }
}

fn mesh_config(args: &Args) -> anyhow::Result<MeshConfig> {
    let mut config = MeshConfig::new();
    config.protocol = ProtocolTag::new(args.protocol.clone())?;
    config.ping.cadence = match args.fixed_interval_ms {
        Some(millis) => SendCadence::Fixed(Duration::from_millis(millis)),
        None => SendCadence::Random { max_interval: Duration::from_millis(args.max_interval_ms) },
    };
    Ok(config)
}

async fn create(listen: &[SocketAddr], key_dir: &Path) -> anyhow::Result<()> {
    let key = NodeKey::generate();
    let host = TcpHost::new(&key, listen, TcpHostConfig::new()).await?;

    let key_file = key.save(key_dir)
        .with_context(|| format!("could not store identity in {:?}", key_dir))?;

    let descriptor = PeerDescriptor::for_host(&host);
    let addrs = descriptor.addrs.iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>();
    println!("Your key is stored in {:?}", key_file);
    println!("Your addresses are: {}", addrs.join(" "));
    println!("Run: pingmesh connect \"{}\" <peer descriptor>...", descriptor);

    host.close();
    Ok(())
}

fn tcp_addrs(descriptor: &PeerDescriptor) -> anyhow::Result<Vec<SocketAddr>> {
    let addrs = descriptor.addrs.iter()
        .filter_map(|a| match a {
            ListenAddr::Tcp(addr) => Some(*addr),
            ListenAddr::Memory(_) => None,
        })
        .collect::<Vec<_>>();
    if addrs.is_empty() {
        return Err(anyhow!("descriptor {} has no TCP address to listen on", descriptor));
    }
    Ok(addrs)
}

async fn run_until_ctrl_c(mode: MeshMode, config: MeshConfig) -> anyhow::Result<()> {
    let (trigger, shutdown) = shutdown_signal();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received Ctrl+C"),
            Err(e) => warn!("could not listen for Ctrl+C, shutting down: {}", e),
        }
        trigger.trigger();
    });

    run_mesh(mode, config, shutdown).await
}
