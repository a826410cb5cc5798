use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use libp2p::request_response::{
    self, Event, Message, OutboundFailure, OutboundRequestId, ProtocolSupport, ResponseChannel,
};
use libp2p::swarm::SwarmEvent;
use libp2p::{noise, tcp, yamux, Multiaddr, PeerId, Swarm};
use libp2p_identity::Keypair;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::codec::{MessageCodec, PROTOCOL};
use super::messages::{RpcRequest, RpcResponse};
use super::mux::MuxService;
use super::peer_registry::ClientBuilder;
use super::transport::{Handler, Transport};
use crate::config::P2pConfig;
use crate::peers::NodeId;
use crate::util::errors::{Error, Result};

type Behaviour = request_response::Behaviour<MessageCodec>;

const LISTEN_TIMEOUT: Duration = Duration::from_secs(5);

enum Command {
    Send {
        peer: PeerId,
        addr: Option<Multiaddr>,
        request: RpcRequest,
        reply: oneshot::Sender<Result<RpcResponse>>,
    },
    Respond {
        channel: ResponseChannel<RpcResponse>,
        response: RpcResponse,
    },
}

/// Transport over libp2p: TCP, noise encryption and yamux multiplexing,
/// with one request-response protocol carrying every service.
///
/// The remote `NodeId` seen by handlers is the peer id authenticated by the
/// noise handshake. Addresses of other nodes come from the `ClientBuilder`.
pub struct P2pTransport {
    local_id: NodeId,
    listen_addr: Multiaddr,
    mux: MuxService,
    commands: mpsc::UnboundedSender<Command>,
    client_builder: Arc<dyn ClientBuilder>,
    shutdown: CancellationToken,
}

impl P2pTransport {
    /// Starts listening and spawns the swarm's event loop on the current
    /// tokio runtime.
    pub async fn spawn(
        keypair: Keypair,
        config: P2pConfig,
        client_builder: Arc<dyn ClientBuilder>,
    ) -> Result<Self> {
        config.validate()?;
        let local_id = NodeId::from_public_key(&keypair.public());

        let behaviour = Behaviour::with_codec(
            MessageCodec,
            [(PROTOCOL, ProtocolSupport::Full)],
            request_response::Config::default().with_request_timeout(config.request_timeout()),
        );

        let idle_timeout = config.idle_timeout();
        let mut swarm = libp2p::SwarmBuilder::with_existing_identity(keypair)
            .with_tokio()
            .with_tcp(
                tcp::Config::default(),
                noise::Config::new,
                yamux::Config::default,
            )
            .map_err(|e| Error::Transport(format!("failed to build transport: {}", e)))?
            .with_behaviour(|_| behaviour)
            .map_err(|e| Error::Transport(format!("failed to build behaviour: {}", e)))?
            .with_swarm_config(|c| c.with_idle_connection_timeout(idle_timeout))
            .build();

        let addr: Multiaddr = config
            .listen_addr
            .parse()
            .map_err(|e| Error::Configuration(format!("invalid listen_addr: {}", e)))?;
        swarm
            .listen_on(addr)
            .map_err(|e| Error::Transport(format!("failed to listen: {}", e)))?;

        let listen_addr = tokio::time::timeout(LISTEN_TIMEOUT, async {
            loop {
                if let SwarmEvent::NewListenAddr { address, .. } = swarm.select_next_some().await {
                    break address;
                }
            }
        })
        .await
        .map_err(|_| Error::Timeout(LISTEN_TIMEOUT))?;

        tracing::info!("Node {} listening on {}", local_id, listen_addr);

        let mux = MuxService::new();
        let shutdown = CancellationToken::new();
        let (commands, receiver) = mpsc::unbounded_channel();

        let event_loop = EventLoop {
            swarm,
            commands: receiver,
            responder: commands.clone(),
            mux: mux.clone(),
            pending: HashMap::new(),
            request_timeout: config.request_timeout(),
        };
        tokio::spawn(event_loop.run(shutdown.clone()));

        Ok(Self {
            local_id,
            listen_addr,
            mux,
            commands,
            client_builder,
            shutdown,
        })
    }

    /// Address the transport actually listens on.
    pub fn listen_addr(&self) -> &Multiaddr {
        &self.listen_addr
    }

    pub fn mux(&self) -> &MuxService {
        &self.mux
    }

    /// Stops the event loop. Pending and later calls fail with a transport
    /// error.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for P2pTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl Transport for P2pTransport {
    fn local_id(&self) -> NodeId {
        self.local_id
    }

    async fn send(
        &self,
        target: &NodeId,
        service: &str,
        method: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let request = RpcRequest {
            service: service.to_string(),
            method: method.to_string(),
            payload,
        };

        if *target == self.local_id {
            let RpcResponse(result) =
                tokio::time::timeout(timeout, self.mux.dispatch(self.local_id, request))
                    .await
                    .map_err(|_| Error::Timeout(timeout))?;
            return result.map_err(Error::from);
        }

        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Send {
                peer: target.peer_id(),
                addr: self.client_builder.resolve(target),
                request,
                reply,
            })
            .map_err(|_| Error::Transport("transport is shut down".to_string()))?;

        let RpcResponse(result) = match tokio::time::timeout(timeout, response).await {
            Err(_) => return Err(Error::Timeout(timeout)),
            Ok(Err(_)) => return Err(Error::Transport("transport is shut down".to_string())),
            Ok(Ok(response)) => response?,
        };
        result.map_err(Error::from)
    }

    fn register_handler(&self, service: &str, method: &str, handler: Handler) -> Result<()> {
        self.mux.register(service, method, handler)
    }

    fn deregister_service(&self, service: &str) {
        self.mux.deregister_service(service);
    }
}

struct EventLoop {
    swarm: Swarm<Behaviour>,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Handed to inbound handler tasks so they can post their response
    responder: mpsc::UnboundedSender<Command>,
    mux: MuxService,
    pending: HashMap<OutboundRequestId, oneshot::Sender<Result<RpcResponse>>>,
    request_timeout: Duration,
}

impl EventLoop {
    async fn run(mut self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                event = self.swarm.select_next_some() => self.handle_event(event),
            }
        }

        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(Error::Transport("transport is shut down".to_string())));
        }
        tracing::debug!("Event loop of {} stopped", self.swarm.local_peer_id());
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send {
                peer,
                addr,
                request,
                reply,
            } => {
                if let Some(addr) = addr {
                    self.swarm.add_peer_address(peer, addr);
                }
                let request_id = self.swarm.behaviour_mut().send_request(&peer, request);
                self.pending.insert(request_id, reply);
            }
            Command::Respond { channel, response } => {
                if self
                    .swarm
                    .behaviour_mut()
                    .send_response(channel, response)
                    .is_err()
                {
                    tracing::debug!("Caller went away before the response was sent");
                }
            }
        }
    }

    fn handle_event(&mut self, event: SwarmEvent<Event<RpcRequest, RpcResponse>>) {
        match event {
            SwarmEvent::Behaviour(Event::Message { peer, message, .. }) => match message {
                Message::Request {
                    request, channel, ..
                } => {
                    let mux = self.mux.clone();
                    let responder = self.responder.clone();
                    tokio::spawn(async move {
                        let response = mux.dispatch(NodeId::from(peer), request).await;
                        let _ = responder.send(Command::Respond { channel, response });
                    });
                }
                Message::Response {
                    request_id,
                    response,
                } => {
                    if let Some(reply) = self.pending.remove(&request_id) {
                        let _ = reply.send(Ok(response));
                    }
                }
            },
            SwarmEvent::Behaviour(Event::OutboundFailure {
                peer,
                request_id,
                error,
                ..
            }) => {
                tracing::debug!("Request to {} failed: {}", peer, error);
                if let Some(reply) = self.pending.remove(&request_id) {
                    let err = match error {
                        OutboundFailure::Timeout => Error::Timeout(self.request_timeout),
                        other => Error::Transport(format!("request to {} failed: {}", peer, other)),
                    };
                    let _ = reply.send(Err(err));
                }
            }
            SwarmEvent::Behaviour(Event::InboundFailure { peer, error, .. }) => {
                tracing::debug!("Inbound request from {} failed: {}", peer, error);
            }
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                tracing::debug!("Connected to {}", peer_id);
            }
            SwarmEvent::ConnectionClosed { peer_id, cause, .. } => {
                tracing::debug!("Connection to {} closed: {:?}", peer_id, cause);
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                tracing::debug!("Dial to {:?} failed: {}", peer_id, error);
            }
            _ => {}
        }
    }
}
