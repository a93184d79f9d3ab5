use std::net::{SocketAddr, TcpListener};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{error, info};

use crate::audit::AuditLogger;
use crate::config::XmodemConfig;
use crate::error::Result;
use crate::registry::Registry;
use crate::storage::FileStore;

/// Open a listening TCP socket with SO_REUSEADDR set before bind.
pub fn bind_listener(addr: SocketAddr, backlog: i32) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    Ok(socket.into())
}

/// XMODEM receiving server
pub struct XmodemServer {
    config: XmodemConfig,
    audit: AuditLogger,
}

impl XmodemServer {
    pub fn new(config: XmodemConfig) -> Self {
        let audit = AuditLogger::new(config.logging.audit_enabled);
        Self { config, audit }
    }

    /// Bind the listener and build the registry without serving yet.
    pub fn bind(&self) -> Result<Registry> {
        let store = FileStore::from_config(&self.config.root_dir, &self.config.storage)?;
        let listener = bind_listener(self.config.bind_addr, self.config.listen_backlog)?;
        Registry::new(listener, store, self.config.max_clients, self.audit)
    }

    /// Serve until a fatal error; only returns with that error.
    pub fn run(self) -> Result<()> {
        let mut registry = self.bind()?;
        let local_addr = registry.local_addr()?;

        info!("XMODEM server listening on {}", local_addr);
        info!("Storing uploads in {}", self.config.root_dir.display());
        self.audit.server_started(
            &local_addr.to_string(),
            &self.config.root_dir,
            self.config.max_clients,
        );

        let result = registry.run();
        if let Err(ref e) = result {
            error!("XMODEM server stopped: {}", e);
            self.audit.server_shutdown(&e.to_string());
        }
        result
    }
}
