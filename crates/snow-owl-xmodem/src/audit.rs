use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::{Level, event};

const SERVICE_NAME: &str = "snow-owl-xmodem";

/// Security audit event types for SIEM integration
///
/// NIST 800-53 Controls:
/// - AU-2: Audit Events (comprehensive event catalog)
/// - AU-3: Content of Audit Records (structured event data)
/// - AU-12: Audit Generation (automatic event generation)
///
/// STIG V-222563: Applications must produce audit records
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Server startup event
    ServerStarted {
        #[serde(flatten)]
        common: CommonFields,
        bind_addr: String,
        root_dir: String,
        max_clients: usize,
    },

    /// Server stopped after a fatal error
    ServerShutdown {
        #[serde(flatten)]
        common: CommonFields,
        reason: String,
    },

    /// Client connection accepted into the registry
    ConnectionAccepted {
        #[serde(flatten)]
        common: CommonFields,
        client_addr: String,
        client_id: String,
    },

    /// Client connection refused at accept time
    ConnectionRejected {
        #[serde(flatten)]
        common: CommonFields,
        client_addr: String,
        reason: String,
    },

    /// Filename negotiated and output file opened
    TransferStarted {
        #[serde(flatten)]
        common: CommonFields,
        client_addr: String,
        filename: String,
    },

    /// Block failed its CRC check and was NAKed
    BlockRejected {
        #[serde(flatten)]
        common: CommonFields,
        client_addr: String,
        filename: String,
        block_number: u8,
        reason: String,
    },

    /// EOT received and acknowledged
    TransferCompleted {
        #[serde(flatten)]
        common: CommonFields,
        client_addr: String,
        filename: String,
        bytes_received: u64,
        blocks_received: u64,
        duplicate_blocks: u64,
        naks_sent: u64,
        duration_ms: u64,
        /// Transfer throughput in bytes per second
        throughput_bps: u64,
    },

    /// Client evicted for breaking protocol rules
    ProtocolViolation {
        #[serde(flatten)]
        common: CommonFields,
        client_addr: String,
        violation: String,
    },

    /// Client evicted after disconnecting or an I/O failure
    ClientDropped {
        #[serde(flatten)]
        common: CommonFields,
        client_addr: String,
        reason: String,
    },

    /// Path traversal attempt detected
    PathTraversalAttempt {
        #[serde(flatten)]
        common: CommonFields,
        client_addr: String,
        requested_path: String,
    },

    /// Configuration loaded
    ConfigurationLoaded {
        #[serde(flatten)]
        common: CommonFields,
        config_file: String,
    },
}

/// Common fields present in all audit events
///
/// NIST 800-53 AU-3: Content of Audit Records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonFields {
    /// ISO 8601 timestamp
    pub timestamp: String,
    /// Hostname or system identifier
    pub hostname: String,
    /// Service name
    pub service: String,
    /// Severity level (info, warn, error)
    pub severity: String,
    /// Optional correlation ID for tracking related events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl CommonFields {
    /// Create common fields with current timestamp
    pub fn new(severity: &str) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            hostname: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string()),
            service: SERVICE_NAME.to_string(),
            severity: severity.to_string(),
            correlation_id: None,
        }
    }

    /// Create common fields with correlation ID
    pub fn with_correlation(severity: &str, correlation_id: &str) -> Self {
        let mut fields = Self::new(severity);
        fields.correlation_id = Some(correlation_id.to_string());
        fields
    }
}

impl AuditEvent {
    /// Log this audit event using structured tracing
    pub fn log(&self) {
        let json = serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"error\": \"Failed to serialize audit event: {:?}\"}}",
                self
            )
        });

        match self.common().severity.as_str() {
            "error" => event!(Level::ERROR, audit_event = %json),
            "warn" => event!(Level::WARN, audit_event = %json),
            _ => event!(Level::INFO, audit_event = %json),
        }
    }

    pub fn common(&self) -> &CommonFields {
        match self {
            AuditEvent::ServerStarted { common, .. }
            | AuditEvent::ServerShutdown { common, .. }
            | AuditEvent::ConnectionAccepted { common, .. }
            | AuditEvent::ConnectionRejected { common, .. }
            | AuditEvent::TransferStarted { common, .. }
            | AuditEvent::BlockRejected { common, .. }
            | AuditEvent::TransferCompleted { common, .. }
            | AuditEvent::ProtocolViolation { common, .. }
            | AuditEvent::ClientDropped { common, .. }
            | AuditEvent::PathTraversalAttempt { common, .. }
            | AuditEvent::ConfigurationLoaded { common, .. } => common,
        }
    }
}

fn peer_string(client_addr: Option<SocketAddr>) -> String {
    client_addr
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Audit logger for XMODEM transfers
///
/// A disabled logger drops every event (`logging.audit_enabled = false`).
#[derive(Debug, Clone, Copy)]
pub struct AuditLogger {
    enabled: bool,
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl AuditLogger {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    fn emit(&self, event: AuditEvent) {
        if self.enabled {
            event.log();
        }
    }

    pub fn server_started(&self, bind_addr: &str, root_dir: &Path, max_clients: usize) {
        self.emit(AuditEvent::ServerStarted {
            common: CommonFields::new("info"),
            bind_addr: bind_addr.to_string(),
            root_dir: root_dir.display().to_string(),
            max_clients,
        });
    }

    pub fn server_shutdown(&self, reason: &str) {
        self.emit(AuditEvent::ServerShutdown {
            common: CommonFields::new("error"),
            reason: reason.to_string(),
        });
    }

    pub fn connection_accepted(
        &self,
        client_addr: Option<SocketAddr>,
        client_id: &str,
        correlation_id: &str,
    ) {
        self.emit(AuditEvent::ConnectionAccepted {
            common: CommonFields::with_correlation("info", correlation_id),
            client_addr: peer_string(client_addr),
            client_id: client_id.to_string(),
        });
    }

    pub fn connection_rejected(&self, client_addr: Option<SocketAddr>, reason: &str) {
        self.emit(AuditEvent::ConnectionRejected {
            common: CommonFields::new("warn"),
            client_addr: peer_string(client_addr),
            reason: reason.to_string(),
        });
    }

    pub fn transfer_started(
        &self,
        client_addr: Option<SocketAddr>,
        filename: &str,
        correlation_id: &str,
    ) {
        self.emit(AuditEvent::TransferStarted {
            common: CommonFields::with_correlation("info", correlation_id),
            client_addr: peer_string(client_addr),
            filename: filename.to_string(),
        });
    }

    pub fn block_rejected(
        &self,
        client_addr: Option<SocketAddr>,
        filename: &str,
        block_number: u8,
        reason: &str,
        correlation_id: &str,
    ) {
        self.emit(AuditEvent::BlockRejected {
            common: CommonFields::with_correlation("warn", correlation_id),
            client_addr: peer_string(client_addr),
            filename: filename.to_string(),
            block_number,
            reason: reason.to_string(),
        });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn transfer_completed(
        &self,
        client_addr: Option<SocketAddr>,
        filename: &str,
        bytes_received: u64,
        blocks_received: u64,
        duplicate_blocks: u64,
        naks_sent: u64,
        duration_ms: u64,
        correlation_id: &str,
    ) {
        let throughput_bps = if duration_ms > 0 {
            bytes_received.saturating_mul(1000) / duration_ms
        } else {
            bytes_received
        };

        self.emit(AuditEvent::TransferCompleted {
            common: CommonFields::with_correlation("info", correlation_id),
            client_addr: peer_string(client_addr),
            filename: filename.to_string(),
            bytes_received,
            blocks_received,
            duplicate_blocks,
            naks_sent,
            duration_ms,
            throughput_bps,
        });
    }

    pub fn protocol_violation(
        &self,
        client_addr: Option<SocketAddr>,
        violation: &str,
        correlation_id: &str,
    ) {
        self.emit(AuditEvent::ProtocolViolation {
            common: CommonFields::with_correlation("warn", correlation_id),
            client_addr: peer_string(client_addr),
            violation: violation.to_string(),
        });
    }

    pub fn client_dropped(&self, client_addr: Option<SocketAddr>, reason: &str, correlation_id: &str) {
        self.emit(AuditEvent::ClientDropped {
            common: CommonFields::with_correlation("info", correlation_id),
            client_addr: peer_string(client_addr),
            reason: reason.to_string(),
        });
    }

    pub fn path_traversal_attempt(
        &self,
        client_addr: Option<SocketAddr>,
        requested_path: &str,
        correlation_id: &str,
    ) {
        self.emit(AuditEvent::PathTraversalAttempt {
            common: CommonFields::with_correlation("error", correlation_id),
            client_addr: peer_string(client_addr),
            requested_path: requested_path.to_string(),
        });
    }

    pub fn configuration_loaded(&self, config_file: &Path) {
        self.emit(AuditEvent::ConfigurationLoaded {
            common: CommonFields::new("info"),
            config_file: config_file.display().to_string(),
        });
    }
}
