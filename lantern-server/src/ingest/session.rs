//! Producer TCP sessions.
//!
//! One read loop per connection: optional token auth on the first record,
//! then decode-and-dispatch until EOF or the first malformed frame.
//! Protocol errors close the connection without touching room state;
//! already-dispatched records stay applied.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::core::error::{LanternError, Result};
use crate::fanout::dispatcher::Dispatcher;
use crate::ingest::wire::{self, IngestRecord};

/// Ingest-side authentication settings
#[derive(Debug, Clone, Default)]
pub struct IngestAuth {
    pub token: Option<String>,
    pub required: bool,
}

impl IngestAuth {
    fn accepts(&self, presented: &str) -> bool {
        self.token.as_deref() == Some(presented)
    }
}

pub struct IngestServer {
    dispatcher: Arc<Dispatcher>,
    auth: IngestAuth,
}

impl IngestServer {
    pub fn new(dispatcher: Arc<Dispatcher>, auth: IngestAuth) -> Self {
        Self { dispatcher, auth }
    }

    /// Accept producer connections until the listener dies
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(
            "Ingest listener on {} (auth {})",
            listener.local_addr()?,
            if self.auth.required {
                "required"
            } else {
                "optional"
            }
        );
        loop {
            let (socket, addr) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                server.handle_producer(socket, addr).await;
            });
        }
    }

    async fn handle_producer(&self, socket: TcpStream, addr: SocketAddr) {
        if let Err(e) = socket.set_nodelay(true) {
            debug!("set_nodelay failed for {}: {}", addr, e);
        }
        let mut reader = BufReader::new(socket);

        if self.auth.required {
            if let Err(e) = self.authenticate(&mut reader).await {
                warn!("Producer {} rejected: {}", addr, e);
                return;
            }
            debug!("Producer {} authenticated", addr);
        }

        let producer_id = self.dispatcher.producer_connected(addr.to_string());
        self.read_loop(&mut reader, producer_id, addr).await;
        self.dispatcher.producer_disconnected(producer_id);
    }

    /// The first record of an authenticated session must be a matching token
    async fn authenticate<R: AsyncRead + Unpin>(&self, reader: &mut R) -> Result<()> {
        match read_record(reader).await? {
            Some(IngestRecord::Auth { token }) if self.auth.accepts(&token) => Ok(()),
            _ => Err(LanternError::AuthFailed),
        }
    }

    async fn read_loop<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
        producer_id: u64,
        addr: SocketAddr,
    ) {
        loop {
            match read_record(reader).await {
                Ok(Some(IngestRecord::Auth { token })) => {
                    // A late auth record is allowed but must still match
                    if self.auth.token.is_some() && !self.auth.accepts(&token) {
                        warn!("Producer {} rejected: {}", addr, LanternError::AuthFailed);
                        return;
                    }
                }
                Ok(Some(record)) => self.dispatcher.dispatch(producer_id, record),
                Ok(None) => {
                    debug!("Producer {} closed the connection", addr);
                    return;
                }
                Err(e) => {
                    warn!("Producer {} protocol error: {}, closing", addr, e);
                    return;
                }
            }
        }
    }

}

/// Read and decode one record
async fn read_record<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<IngestRecord>> {
    match wire::read_frame(reader).await? {
        Some((record_type, payload)) => Ok(Some(wire::decode(record_type, &payload)?)),
        None => Ok(None),
    }
}

/// Bind the ingest listener on the configured address
pub async fn bind(addr: &str) -> Result<TcpListener> {
    Ok(TcpListener::bind(addr).await?)
}
