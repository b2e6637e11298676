use std::sync::Arc;

use tracing::{debug, info};

use crate::mesh::mesh_config::MeshConfig;
use crate::mesh::orchestrator::{orchestrate, MeshMode};
use crate::ping::ping_engine::{LoggingObserver, PingEngine, PingLoops, PingObserver, PingStreamHandler};
use crate::util::shutdown::Shutdown;


/// Forms a mesh and runs the ping protocol on all of its streams until `shutdown` is triggered,
///  reporting ping traffic through the log.
pub async fn run_mesh(mode: MeshMode, config: MeshConfig, shutdown: Shutdown) -> anyhow::Result<()> {
    run_mesh_with_observer(mode, config, Arc::new(LoggingObserver {}), shutdown).await
}

/// Same as [run_mesh], but with a custom [PingObserver]
pub async fn run_mesh_with_observer(mode: MeshMode, config: MeshConfig, observer: Arc<dyn PingObserver>, mut shutdown: Shutdown) -> anyhow::Result<()> {
    let engine = PingEngine::new(Arc::new(config.ping.clone()), observer, shutdown.clone());
    let handler = Arc::new(PingStreamHandler::new(engine.clone()));

    // NB: on failure, the streams that were opened are handed to the caller inside the error
    let mesh = orchestrate(mode, &config.protocol, handler.clone(), config.peer_ttl).await?;

    for (i, j, stream) in mesh.matrix.pairs() {
        debug!("{} <-> {}: {:?}", mesh.nodes[i], mesh.nodes[j], stream);
    }
    info!("mesh of {} nodes with {} streams established, {} peers unreachable", mesh.nodes.len(), mesh.stream_count(), mesh.dial_failures.len());

    let outbound = mesh.streams.into_iter()
        .map(|s| engine.start(s))
        .collect::<Vec<_>>();

    shutdown.triggered().await;
    info!("shutting down");

    join_all(outbound).await;
    join_all(handler.take_inbound_loops().await).await;

    Ok(())
}

async fn join_all(loops: Vec<PingLoops>) {
    for loops in loops {
        let info = loops.info().clone();
        let (sender, receiver) = loops.join().await;
        for outcome in [sender, receiver] {
            if !outcome.is_cancelled() {
                // failures were reported when they happened
                debug!("ping loop on {:?} had terminated before shutdown: {:?}", info, outcome);
            }
        }
    }
}
