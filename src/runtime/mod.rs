//! Two-reactor runtime.
//!
//! The network reactor owns every socket. The worker reactor owns nothing
//! but its poll. They exchange buffers over two lanes:
//!
//! - `pending`: network → worker, raw chunks
//! - `completed`: worker → network, reversed chunks
//!
//! All shared handles (both queues and both wakers) are created once in
//! [`Server::bind`] before either reactor runs and live for the rest of the
//! process.

mod buffer;
mod connection;
mod handoff;
mod network;
mod queue;
mod token;
mod worker;

use crate::config::Config;
use handoff::lane;
use mio::{Poll, Waker};
use network::{create_listener, NetworkReactor};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::thread;
use token::WAKE_TOKEN;
use tracing::{error, info};
use worker::WorkerReactor;

/// Both reactors, wired together and bound, but not yet running.
pub struct Server {
    network: NetworkReactor,
    worker: WorkerReactor,
}

impl Server {
    /// Bind the listener and build both reactors and the lanes between them.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let addr = listen_addr(&config.host, config.port)?;
        let listener = create_listener(addr, config.backlog)?;

        let network_poll = Poll::new()?;
        let worker_poll = Poll::new()?;
        let network_waker = Arc::new(Waker::new(network_poll.registry(), WAKE_TOKEN)?);
        let worker_waker = Arc::new(Waker::new(worker_poll.registry(), WAKE_TOKEN)?);

        let (pending_tx, pending_rx) = lane(worker_waker);
        let (completed_tx, completed_rx) = lane(network_waker);

        let network = NetworkReactor::new(
            network_poll,
            listener,
            pending_tx,
            completed_rx,
            config.chunk_size,
            config.event_capacity,
        )?;
        let worker = WorkerReactor::new(
            worker_poll,
            pending_rx,
            completed_tx,
            config.event_capacity,
        );

        Ok(Self { network, worker })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.network.local_addr()
    }

    /// Start the worker on its own thread and run the network reactor on
    /// the calling thread. Returns only on a fatal network error.
    ///
    /// A fatal worker error ends the process with status 1, since nothing
    /// would ever be written back again.
    pub fn run(self) -> io::Result<()> {
        let Self { network, worker } = self;

        thread::Builder::new()
            .name("worker".to_string())
            .spawn(move || {
                if let Err(e) = worker.run() {
                    error!(error = %e, "Worker reactor failed");
                    std::process::exit(1);
                }
            })?;

        network.run()
    }
}

/// Address to bind: `host` is a bare IPv4 or IPv6 address.
fn listen_addr(host: &str, port: u16) -> io::Result<SocketAddr> {
    let ip: IpAddr = host
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    Ok(SocketAddr::new(ip, port))
}

/// Bind according to `config` and serve forever.
pub fn run(config: Config) -> io::Result<()> {
    let server = Server::bind(&config)?;
    info!(
        addr = %server.local_addr()?,
        chunk_size = config.chunk_size,
        "Listening"
    );
    server.run()
}
