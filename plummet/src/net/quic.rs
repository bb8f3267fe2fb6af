//! DNS over QUIC ([\[RFC 9250\]](https://www.rfc-editor.org/rfc/rfc9250)).
//!
//! quinn is async; every lookup runs on its own single-threaded tokio runtime so the rest of the
//! client stays blocking.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use byteorder::{NetworkEndian, WriteBytesExt};
use plummet_proto::Message;
use quinn::crypto::rustls::QuicClientConfig;
use quinn::{ClientConfig, Endpoint, IdleTimeout, TransportConfig, VarInt};
use tracing::debug;

use super::{resolve, split_host_port, tls, Family, Resolver, Response};
use crate::error::TransportError;
use crate::options::Options;

/// DOQ_NO_ERROR
const NO_ERROR: u32 = 0;

pub struct QuicResolver {
    server: String,
    server_name: String,
    family: Family,
    timeout: Duration,
    client_config: ClientConfig,
}

fn quic_error(e: impl std::fmt::Display) -> TransportError {
    TransportError::Quic(e.to_string())
}

impl QuicResolver {
    pub fn new(opts: &Options) -> Result<Self, TransportError> {
        let server = opts.request.server.clone();
        let (host, _) = split_host_port(&server)
            .ok_or_else(|| TransportError::InvalidServer(server.clone()))?;
        let server_name = opts
            .transport
            .tls_host
            .clone()
            .unwrap_or_else(|| host.to_string());

        let tls_config = tls::client_config(opts.transport.tls_no_verify, true, &[b"doq"])?;
        let crypto = QuicClientConfig::try_from(tls_config).map_err(quic_error)?;
        let mut client_config = ClientConfig::new(Arc::new(crypto));
        let mut transport = TransportConfig::default();
        transport.max_idle_timeout(Some(
            IdleTimeout::try_from(opts.request.timeout).map_err(quic_error)?,
        ));
        client_config.transport_config(Arc::new(transport));

        Ok(Self {
            server,
            server_name,
            family: Family::from_options(opts),
            timeout: opts.request.timeout,
            client_config,
        })
    }

    async fn exchange(&self, addr: SocketAddr, data: &[u8]) -> Result<Vec<u8>, TransportError> {
        let bind_addr: SocketAddr = if addr.is_ipv6() {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        };
        let mut endpoint = Endpoint::client(bind_addr)?;
        endpoint.set_default_client_config(self.client_config.clone());

        let connection = endpoint
            .connect(addr, &self.server_name)
            .map_err(quic_error)?
            .await
            .map_err(quic_error)?;
        let (mut send, mut recv) = connection.open_bi().await.map_err(quic_error)?;

        let mut msg = Vec::with_capacity(data.len() + 2);
        msg.write_u16::<NetworkEndian>(data.len() as u16)?;
        msg.extend_from_slice(data);
        send.write_all(&msg).await.map_err(quic_error)?;
        send.finish().map_err(quic_error)?;

        let reply = recv
            .read_to_end(u16::MAX as usize + 2)
            .await
            .map_err(quic_error)?;
        connection.close(VarInt::from_u32(NO_ERROR), b"");

        strip_length_prefix(reply)
    }
}

/// Removes the two-byte length prefix, checking that it matches.
fn strip_length_prefix(mut reply: Vec<u8>) -> Result<Vec<u8>, TransportError> {
    if reply.len() < 2 {
        return Err(TransportError::Quic("reply is missing its length prefix".into()));
    }
    let len = u16::from_be_bytes([reply[0], reply[1]]) as usize;
    if len != reply.len() - 2 {
        return Err(TransportError::Quic(format!(
            "reply announces {} bytes, but {} were received",
            len,
            reply.len() - 2
        )));
    }
    reply.drain(..2);
    Ok(reply)
}

impl Resolver for QuicResolver {
    fn look_up(&mut self, query: &Message) -> Result<Response, TransportError> {
        let addr = resolve(&self.server, self.family)?;
        // DoQ requires the message ID to be zero, the stream identifies the exchange
        let mut query = query.clone();
        query.header.id = 0;
        let data = query.to_vec()?;
        debug!("Sending {} bytes to {} via QUIC.", data.len(), addr);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let before = Instant::now();
        let reply = runtime
            .block_on(async { tokio::time::timeout(self.timeout, self.exchange(addr, &data)).await })
            .map_err(|_| TransportError::Timeout)??;
        let rtt = before.elapsed();

        let message = Message::from_vec(&reply)?;
        Ok(Response { message, rtt })
    }
}

#[cfg(test)]
mod tests {
    use super::{strip_length_prefix, QuicResolver};
    use crate::options::Options;

    #[test]
    fn length_prefix_is_checked_and_removed() {
        assert_eq!(strip_length_prefix(vec![0, 2, 9, 9]).unwrap(), vec![9, 9]);
        assert!(strip_length_prefix(vec![0, 5, 9]).is_err());
        assert!(strip_length_prefix(vec![1]).is_err());
    }

    #[test]
    fn server_name_defaults_to_host() {
        let mut opts = Options::default();
        opts.request.server = "dns.example:853".into();
        let resolver = QuicResolver::new(&opts).unwrap();
        assert_eq!(resolver.server_name, "dns.example");

        opts.transport.tls_host = Some("other.example".into());
        let resolver = QuicResolver::new(&opts).unwrap();
        assert_eq!(resolver.server_name, "other.example");
    }
}
