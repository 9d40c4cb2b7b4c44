use log::{debug, error, info, trace, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use super::client::RpcClient;
use super::codec::{read_frame, write_frame};
use super::message::{RpcCall, RpcEnvelope, RpcReply};
use crate::cluster::Cluster;
use crate::node::Node;
use crate::CrawlResult;

/// Inbound side of the peer protocol. One task per connection; frames on a
/// connection are answered in order.
pub struct RpcServer {
    listener: TcpListener,
    handler: Arc<Handler>,
}

struct Handler {
    node: Arc<Node>,
    cluster: Arc<Cluster>,
    client: Arc<RpcClient>,
}

impl RpcServer {
    pub async fn bind(addr: &str) -> CrawlResult<TcpListener> {
        Ok(TcpListener::bind(addr).await?)
    }

    pub fn new(
        listener: TcpListener,
        node: Arc<Node>,
        cluster: Arc<Cluster>,
        client: Arc<RpcClient>,
    ) -> Self {
        Self {
            listener,
            handler: Arc::new(Handler {
                node,
                cluster,
                client,
            }),
        }
    }

    pub fn local_addr(&self) -> CrawlResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `shutdown` turns true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "RPC server of {} listening on {}",
            self.handler.node.name(),
            self.listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_default()
        );
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("New RPC connection from {}", peer);
                        let handler = Arc::clone(&self.handler);
                        tokio::spawn(serve_connection(handler, stream, shutdown.clone()));
                    }
                    Err(e) => {
                        error!("RPC accept failed: {}", e);
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("RPC server of {} stopped", self.handler.node.name());
    }

    /// Handles one call in-process, without a socket.
    pub async fn handle(&self, envelope: RpcEnvelope) -> RpcReply {
        self.handler.handle(envelope).await
    }
}

async fn serve_connection(
    handler: Arc<Handler>,
    mut stream: TcpStream,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        trace!("set_nodelay failed: {}", e);
    }
    loop {
        let frame = tokio::select! {
            frame = read_frame::<_, RpcEnvelope>(&mut stream) => frame,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };
        let envelope = match frame {
            Ok(Some(envelope)) => envelope,
            Ok(None) => break,
            Err(e) => {
                warn!("Dropping RPC connection: {}", e);
                break;
            }
        };
        let reply = handler.handle(envelope).await;
        if let Err(e) = write_frame(&mut stream, &reply).await {
            warn!("Writing RPC reply failed: {}", e);
            break;
        }
    }
}

impl Handler {
    async fn handle(&self, envelope: RpcEnvelope) -> RpcReply {
        let me = self.node.info().clone();
        let RpcEnvelope { from, call } = envelope;
        trace!("{} <- {} from {}", me.name, call.name(), from);
        let crawler = self.node.crawler();

        let result = match call {
            RpcCall::IsAlive => Ok(()),
            RpcCall::GetAllNode => {
                return RpcReply::ok(me).with_nodes(self.cluster.get_all_node());
            }
            RpcCall::AcceptRequest(request) => crawler.accept_request(request).map(|_| ()),
            RpcCall::StartSpider(name) => crawler.start_spider(&name),
            RpcCall::StopSpider(name) => crawler.stop_spider(&name).await,
            RpcCall::PauseSpider(name) => crawler.pause_spider(&name),
            RpcCall::RecoverSpider(name) => crawler.recover_spider(&name),
            RpcCall::AddSpider(definition) => crawler.add_spider(definition).await,
            RpcCall::FirstAddSpider(definition) => self.client.add_spider(definition).await,
            RpcCall::LetMeIn(node) => {
                if self.client.is_connected(&node.name) {
                    Ok(())
                } else {
                    let connected = self.client.connect(&node.ip, node.port).await;
                    if let Err(e) = &connected {
                        warn!("Letting {} in failed: {}", node, e);
                    }
                    connected.map(|_| ())
                }
            }
        };
        RpcReply::from_result(me, result)
    }
}
