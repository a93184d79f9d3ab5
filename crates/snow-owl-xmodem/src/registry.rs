//! Connection registry and the select(2) loop.
//!
//! NIST 800-53 Controls:
//! - SC-5: Denial of Service Protection (client limit, bounded buffers)
//! - SC-10: Network Disconnect (violating clients are disconnected)
//! - AU-12: Audit Generation (accept, reject, eviction events)

use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::select::{FD_SETSIZE, FdSet, select};
use nix::sys::time::{TimeVal, TimeValLike};
use tracing::{debug, info, warn};

use crate::audit::AuditLogger;
use crate::client::{Client, ClientId, Transition};
use crate::error::{ClientError, Result, XmodemError};
use crate::storage::FileStore;

/// What one readiness wait reported.
struct Readiness {
    count: usize,
    listener: bool,
    clients: Vec<ClientId>,
}

/// Owns the listener and every connected client.
///
/// `max_fd` always equals the largest descriptor among the listener and
/// the tracked clients. `active_files` holds exactly the filenames of the
/// tracked clients that have negotiated one.
pub struct Registry {
    listener: TcpListener,
    clients: HashMap<ClientId, Client<TcpStream>>,
    active_files: HashSet<String>,
    max_fd: RawFd,
    max_clients: usize,
    store: FileStore,
    audit: AuditLogger,
}

impl Registry {
    pub fn new(
        listener: TcpListener,
        store: FileStore,
        max_clients: usize,
        audit: AuditLogger,
    ) -> Result<Self> {
        let listener_fd = listener.as_raw_fd();
        if !fits_fd_set(listener_fd) {
            return Err(XmodemError::Config(format!(
                "listener descriptor {} exceeds FD_SETSIZE",
                listener_fd
            )));
        }
        // Accept must never block the loop
        listener.set_nonblocking(true)?;

        Ok(Self {
            listener,
            clients: HashMap::new(),
            active_files: HashSet::new(),
            max_fd: listener_fd,
            max_clients,
            store,
            audit,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Whether a live client is currently writing `filename`.
    pub fn is_file_active(&self, filename: &str) -> bool {
        self.active_files.contains(filename)
    }

    pub fn client(&self, id: ClientId) -> Option<&Client<TcpStream>> {
        self.clients.get(&id)
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.clients.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn listener_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    /// Highest descriptor handed to select(2).
    pub fn max_fd(&self) -> RawFd {
        self.max_fd
    }

    /// Accept one pending connection.
    ///
    /// Failures are logged and the connection (if any) is dropped; they never
    /// stop the server.
    pub fn accept_new(&mut self) -> Option<ClientId> {
        let (stream, peer) = match self.listener.accept() {
            Ok(pair) => pair,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                debug!("Listener readable but no connection pending");
                return None;
            }
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                return None;
            }
        };

        let fd = stream.as_raw_fd();
        if self.clients.len() >= self.max_clients {
            warn!(
                "Rejecting connection from {}: {} clients connected",
                peer,
                self.clients.len()
            );
            self.audit
                .connection_rejected(Some(peer), "client limit reached");
            return None;
        }
        if !fits_fd_set(fd) {
            warn!(
                "Rejecting connection from {}: descriptor {} exceeds FD_SETSIZE",
                peer, fd
            );
            self.audit
                .connection_rejected(Some(peer), "descriptor exceeds FD_SETSIZE");
            return None;
        }
        // Reads are gated by readiness; replies must complete or fail
        if let Err(e) = stream.set_nonblocking(false) {
            warn!("Failed to configure connection from {}: {}", peer, e);
            return None;
        }

        let id = ClientId::new(fd);
        let client = Client::new(id, Some(peer), stream, self.audit);
        info!("Accepted connection from {} ({})", peer, id);
        self.audit
            .connection_accepted(Some(peer), &id.to_string(), client.correlation_id());

        self.clients.insert(id, client);
        self.max_fd = self.max_fd.max(fd);
        Some(id)
    }

    /// Remove a client, flush its output file and close its socket.
    ///
    /// A failed flush is fatal: the file on disk can no longer be trusted.
    pub fn evict(&mut self, id: ClientId) -> Result<()> {
        let Some(mut client) = self.clients.remove(&id) else {
            return Ok(());
        };
        if let Some(filename) = client.filename() {
            self.active_files.remove(filename);
        }

        if id.as_raw_fd() == self.max_fd {
            self.max_fd = self
                .clients
                .keys()
                .map(|key| key.as_raw_fd())
                .fold(self.listener.as_raw_fd(), RawFd::max);
        }
        debug!(
            "Evicted client {}; {} remain, max fd {}",
            id,
            self.clients.len(),
            self.max_fd
        );

        client
            .release()
            .map_err(|source| XmodemError::Release { client: id, source })
    }

    /// Run one readiness cycle and return the number of ready descriptors.
    ///
    /// `None` waits indefinitely. An interrupted wait counts as an empty
    /// cycle.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> Result<usize> {
        let Some(readiness) = self.wait(timeout)? else {
            return Ok(0);
        };

        if readiness.listener {
            self.accept_new();
        }

        for id in readiness.clients {
            if self.clients.contains_key(&id) {
                self.service(id)?;
            }
        }

        Ok(readiness.count)
    }

    /// Serve clients until readiness waiting or a release fails.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.poll_once(None)?;
        }
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<Option<Readiness>> {
        let mut read_set = FdSet::new();
        read_set.insert(self.listener.as_fd());
        for client in self.clients.values() {
            read_set.insert(client.stream().as_fd());
        }

        let mut timeval = timeout.map(|t| {
            TimeVal::microseconds(i64::try_from(t.as_micros()).unwrap_or(i64::MAX))
        });

        let count = match select(self.max_fd + 1, &mut read_set, None, None, timeval.as_mut()) {
            Ok(count) => count,
            Err(Errno::EINTR) => {
                debug!("Readiness wait interrupted; retrying");
                return Ok(None);
            }
            Err(e) => return Err(XmodemError::Readiness(e)),
        };

        let listener = read_set.contains(self.listener.as_fd());
        let clients = self
            .clients
            .values()
            .filter(|client| read_set.contains(client.stream().as_fd()))
            .map(|client| client.id())
            .collect();

        Ok(Some(Readiness {
            count: usize::try_from(count).unwrap_or(0),
            listener,
            clients,
        }))
    }

    fn service(&mut self, id: ClientId) -> Result<()> {
        let Some(client) = self.clients.get_mut(&id) else {
            return Ok(());
        };

        let step = client.step(&self.store, &self.active_files);
        if step.is_ok()
            && let Some(filename) = client.filename()
            && !self.active_files.contains(filename)
        {
            self.active_files.insert(filename.to_string());
        }

        match step {
            Ok(Transition::Continue) => Ok(()),
            Ok(Transition::Complete) => {
                let stats = client.stats();
                let duration_ms = u64::try_from(stats.elapsed().as_millis()).unwrap_or(u64::MAX);
                info!(
                    "Transfer of {} from {} complete: {} bytes in {} blocks",
                    client.filename().unwrap_or_default(),
                    id,
                    stats.bytes,
                    stats.blocks
                );
                self.audit.transfer_completed(
                    client.peer(),
                    client.filename().unwrap_or_default(),
                    stats.bytes,
                    stats.blocks,
                    stats.duplicates,
                    stats.naks,
                    duration_ms,
                    client.correlation_id(),
                );
                self.evict(id)
            }
            Err(e) => {
                let peer = client.peer();
                let correlation_id = client.correlation_id().to_string();

                if let ClientError::PathTraversal(ref requested) = e {
                    self.audit
                        .path_traversal_attempt(peer, requested, &correlation_id);
                }
                if e.is_violation() {
                    warn!("Evicting client {}: {}", id, e);
                    self.audit
                        .protocol_violation(peer, &e.to_string(), &correlation_id);
                } else {
                    info!("Dropping client {}: {}", id, e);
                    self.audit
                        .client_dropped(peer, &e.to_string(), &correlation_id);
                }
                self.evict(id)
            }
        }
    }
}

fn fits_fd_set(fd: RawFd) -> bool {
    usize::try_from(fd).is_ok_and(|fd| fd < FD_SETSIZE)
}
