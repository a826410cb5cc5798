use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::network::Transport;
use crate::peers::NodeId;
use crate::twopc::participant::Participant;
use crate::twopc::rpc::DEFAULT_SERVICE_NAME;
use crate::util::errors::{Error, Result};

/// Scalar runtime options. Everything here can be read from a TOML file;
/// the tracing span is attached in code only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TwoPcOptions {
    /// Identity of this node. Defaults to the transport's identity.
    pub node_id: Option<NodeId>,

    /// Deadline for every individual Prepare/Commit/Rollback call in milliseconds
    pub process_timeout_ms: u64,

    /// Service name the handlers are registered under on the shared transport
    pub service_name: String,

    /// Parent span for everything the runtime logs
    #[serde(skip)]
    pub span: Option<tracing::Span>,
}

impl TwoPcOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub fn with_process_timeout(mut self, timeout: Duration) -> Self {
        self.process_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_millis(self.process_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.process_timeout_ms == 0 {
            return Err(Error::Configuration(
                "process_timeout must be greater than zero".to_string(),
            ));
        }

        if self.service_name.trim().is_empty() {
            return Err(Error::Configuration(
                "service_name cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Load options from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let options: TwoPcOptions = toml::from_str(&contents)?;
        options.validate()?;
        Ok(options)
    }
}

impl Default for TwoPcOptions {
    fn default() -> Self {
        Self {
            node_id: None,
            process_timeout_ms: 5_000,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            span: None,
        }
    }
}

/// Everything a runtime needs besides its peer set.
#[derive(Clone)]
pub struct TwoPcConfig {
    /// Directory for persistent storage
    pub storage_dir: PathBuf,
    pub transport: Arc<dyn Transport>,
    pub participant: Arc<dyn Participant>,
    pub options: TwoPcOptions,
}

impl TwoPcConfig {
    pub fn new(
        storage_dir: impl Into<PathBuf>,
        transport: Arc<dyn Transport>,
        participant: Arc<dyn Participant>,
    ) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            transport,
            participant,
            options: TwoPcOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TwoPcOptions) -> Self {
        self.options = options;
        self
    }

    /// Node identity the runtime runs as.
    pub fn node_id(&self) -> NodeId {
        self.options
            .node_id
            .unwrap_or_else(|| self.transport.local_id())
    }

    pub fn validate(&self) -> Result<()> {
        self.options.validate()?;

        let local = self.transport.local_id();
        if self.node_id() != local {
            return Err(Error::Configuration(format!(
                "node_id {} does not match transport identity {}",
                self.node_id(),
                local
            )));
        }

        Ok(())
    }
}

/// Settings of the libp2p transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct P2pConfig {
    pub listen_addr: String,

    /// Upper bound on a single request at the libp2p layer in milliseconds.
    /// Per-call deadlines passed to `send` are enforced on top of this.
    pub request_timeout_ms: u64,

    /// How long an unused connection stays open in milliseconds
    pub idle_timeout_ms: u64,
}

impl P2pConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(Error::Configuration(
                "request_timeout must be greater than zero".to_string(),
            ));
        }

        self.listen_addr
            .parse::<libp2p::Multiaddr>()
            .map_err(|e| Error::Configuration(format!("invalid listen_addr: {}", e)))?;

        Ok(())
    }
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listen_addr: "/ip4/0.0.0.0/tcp/0".to_string(),
            request_timeout_ms: 30_000,
            idle_timeout_ms: 60_000,
        }
    }
}
