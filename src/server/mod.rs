//! Connection-processing engine.
//!
//! ```text
//!  ConnectionAccepter ──► intake ──► dispatcher ──► IO-0 .. IO-(N-1)
//!                                                      │      ▲
//!                                                      ▼      │
//!                                                    WorkerPool
//! ```

pub mod connection;
pub mod listener;
pub mod processor;
pub mod stats;
pub mod worker;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::config::Config;
use crate::protocol::ProtocolFactory;

use self::listener::ConnectionAccepter;
use self::processor::ConnectionProcessor;
use self::stats::EngineStats;

/// Starts and stops the accepter and the connection processor together.
pub struct Server<P: ProtocolFactory> {
    config: Arc<Config>,
    protocol: Arc<P>,
    stats: Arc<EngineStats>,
    running: Option<Running>,
}

struct Running {
    accepter: ConnectionAccepter,
    processor: ConnectionProcessor,
}

impl<P: ProtocolFactory> Server<P> {
    pub fn new(config: Config, protocol: P) -> Self {
        Self {
            config: Arc::new(config),
            protocol: Arc::new(protocol),
            stats: Arc::new(EngineStats::new()),
            running: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Validates the configuration, binds the listening socket and starts
    /// the engine threads. Does nothing if already started.
    pub fn start(&mut self) -> anyhow::Result<()> {
        if self.running.is_some() {
            return Ok(());
        }
        self.config.validate()?;

        let listener = listener::bind(&self.config.server.listen_addr)?;
        let (intake_tx, intake_rx) = crossbeam::channel::unbounded();

        let processor = ConnectionProcessor::start(
            Arc::clone(&self.config),
            Arc::clone(&self.protocol),
            intake_rx,
            Arc::clone(&self.stats),
        )?;
        let accepter = ConnectionAccepter::start(
            self.config.server.name_without_version(),
            listener,
            intake_tx,
            Arc::clone(&self.stats),
        )
        .context("cannot start connection accepter")?;

        info!(
            name = %self.config.server.name,
            addr = %accepter.local_addr(),
            root = %self.config.server.root_directory.display(),
            "Server started"
        );
        self.running = Some(Running { accepter, processor });
        Ok(())
    }

    /// Address actually bound, once started. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.accepter.local_addr())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Stops accepting, then stops the processor. Safe to call repeatedly.
    pub fn stop(&mut self) {
        let Some(Running { mut accepter, mut processor }) = self.running.take() else {
            return;
        };
        accepter.stop();
        processor.stop();
        info!("Server stopped");
    }
}

impl<P: ProtocolFactory> Drop for Server<P> {
    fn drop(&mut self) {
        self.stop();
    }
}
