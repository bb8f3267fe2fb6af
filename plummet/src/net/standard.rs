//! Plain DNS over UDP and TCP, and DNS over TLS
//! ([\[RFC 7858\]](https://www.rfc-editor.org/rfc/rfc7858)).

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use byteorder::{NetworkEndian, WriteBytesExt};
use plummet_proto::{Message, RCODE_BADCOOKIE};
use rustls::{ClientConfig, ClientConnection, StreamOwned};
use tracing::{debug, info, warn};

use super::{resolve, split_host_port, tls, Network, Protocol, Resolver, Response};
use crate::error::TransportError;
use crate::options::Options;

/// Largest possible DNS message.
const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;

/// Performs a single exchange with a server.
pub trait Exchanger {
    fn exchange(
        &mut self,
        query: &Message,
        server: &str,
        network: Network,
    ) -> Result<Response, TransportError>;
}

/// Talks to real servers over sockets.
pub struct NetExchanger {
    timeout: Duration,
    tls_config: Option<Arc<ClientConfig>>,
    tls_host: Option<String>,
}

impl NetExchanger {
    pub fn new(opts: &Options) -> Result<Self, TransportError> {
        let tls_config = if opts.transport.tls {
            Some(tls::client_config(opts.transport.tls_no_verify, false, &[b"dot"])?)
        } else {
            None
        };
        Ok(Self {
            timeout: opts.request.timeout,
            tls_config,
            tls_host: opts.transport.tls_host.clone(),
        })
    }

    fn exchange_udp(&self, addr: SocketAddr, data: &[u8]) -> Result<Vec<u8>, TransportError> {
        let bind_addr = if addr.is_ipv6() { "::" } else { "0.0.0.0" };
        let socket = UdpSocket::bind((bind_addr, 0))?;
        socket.set_write_timeout(Some(self.timeout))?;
        socket.set_read_timeout(Some(self.timeout))?;
        socket
            .connect(addr)
            .map_err(|source| TransportError::Connect {
                server: addr.to_string(),
                network: "udp".into(),
                source,
            })?;

        socket.send(data)?;
        let mut res = vec![0; MAX_MESSAGE_SIZE];
        let bytes_recvd = socket.recv(&mut res).map_err(timeout_or_io)?;
        res.truncate(bytes_recvd);
        Ok(res)
    }

    fn connect_tcp(&self, addr: SocketAddr, network: Network) -> Result<TcpStream, TransportError> {
        let stream = TcpStream::connect_timeout(&addr, self.timeout).map_err(|source| {
            TransportError::Connect {
                server: addr.to_string(),
                network: network.to_string(),
                source,
            }
        })?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.set_read_timeout(Some(self.timeout))?;
        Ok(stream)
    }

    fn exchange_tls(
        &self,
        addr: SocketAddr,
        host: &str,
        network: Network,
        data: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        let config = match &self.tls_config {
            Some(config) => config.clone(),
            None => tls::client_config(false, false, &[b"dot"])?,
        };
        let server_name = tls::server_name(host, self.tls_host.as_deref())?;
        let session = ClientConnection::new(config, server_name)?;
        let socket = self.connect_tcp(addr, network)?;
        let mut stream = StreamOwned::new(session, socket);

        let res = send_length_prefixed(&mut stream, data);
        stream.conn.send_close_notify();
        // the server may already have closed the connection
        let _ = stream.flush();
        res
    }
}

impl NetExchanger {
    /// Sends raw bytes and returns the raw reply, framed as `network` requires.
    pub(crate) fn exchange_bytes(
        &self,
        data: &[u8],
        server: &str,
        network: Network,
    ) -> Result<Vec<u8>, TransportError> {
        let addr = resolve(server, network.family)?;
        debug!("Sending {} bytes to {} via {}.", data.len(), addr, network);

        match network.protocol {
            Protocol::Udp => self.exchange_udp(addr, data),
            Protocol::Tcp => {
                let mut stream = self.connect_tcp(addr, network)?;
                let reply = send_length_prefixed(&mut stream, data)?;
                let _ = stream.shutdown(Shutdown::Both);
                Ok(reply)
            }
            Protocol::Tls => {
                let host = split_host_port(server).map_or(server, |(host, _)| host);
                self.exchange_tls(addr, host, network, data)
            }
        }
    }
}

impl Exchanger for NetExchanger {
    fn exchange(
        &mut self,
        query: &Message,
        server: &str,
        network: Network,
    ) -> Result<Response, TransportError> {
        let data = query.to_vec()?;
        let before = Instant::now();
        let reply = self.exchange_bytes(&data, server, network)?;
        let rtt = before.elapsed();

        let message = Message::from_vec(&reply)?;
        if message.header.id != query.header.id {
            return Err(TransportError::IdMismatch {
                expected: query.header.id,
                got: message.header.id,
            });
        }
        Ok(Response { message, rtt })
    }
}

/// Sends a message with the two-byte length prefix used on stream transports (see RFC 1035,
/// Section 4.2.2) and reads the reply the same way.
pub(crate) fn send_length_prefixed<S: Read + Write>(
    stream: &mut S,
    data: &[u8],
) -> Result<Vec<u8>, TransportError> {
    let mut msg = Vec::with_capacity(data.len() + 2);
    msg.write_u16::<NetworkEndian>(data.len() as u16)?;
    msg.extend_from_slice(data);
    stream.write_all(&msg).map_err(timeout_or_io)?;
    stream.flush().map_err(timeout_or_io)?;

    // read_to_end() would wait for the server to close the connection, so read exactly as much as
    // the length prefix announces
    let mut len = [0; 2];
    stream.read_exact(&mut len).map_err(timeout_or_io)?;
    let mut res = vec![0; u16::from_be_bytes(len) as usize];
    stream.read_exact(&mut res).map_err(timeout_or_io)?;
    Ok(res)
}

fn timeout_or_io(e: io::Error) -> TransportError {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => TransportError::Timeout,
        _ => TransportError::Io(e),
    }
}

/// UDP, TCP or TLS with dig's recovery rules: a BADCOOKIE reply is retried once with the server's
/// cookie, and a truncated reply is retried once over TCP.
pub struct StandardResolver<E = NetExchanger> {
    server: String,
    network: Network,
    ignore_truncation: bool,
    ignore_bad_cookie: bool,
    exchanger: E,
}

impl StandardResolver<NetExchanger> {
    pub fn new(opts: &Options) -> Result<Self, TransportError> {
        Ok(Self::with_exchanger(opts, NetExchanger::new(opts)?))
    }
}

impl<E: Exchanger> StandardResolver<E> {
    pub fn with_exchanger(opts: &Options, exchanger: E) -> Self {
        Self {
            server: opts.request.server.clone(),
            network: Network::from_options(opts),
            ignore_truncation: opts.transport.ignore_truncation,
            ignore_bad_cookie: opts.transport.ignore_bad_cookie,
            exchanger,
        }
    }

    pub fn exchanger(&self) -> &E {
        &self.exchanger
    }
}

impl<E: Exchanger> Resolver for StandardResolver<E> {
    fn look_up(&mut self, query: &Message) -> Result<Response, TransportError> {
        let mut res = self.exchanger.exchange(query, &self.server, self.network)?;

        if res.message.rcode() == RCODE_BADCOOKIE && !self.ignore_bad_cookie {
            info!("Server answered BADCOOKIE, retrying with its cookie.");
            let mut retry = query.clone();
            retry.additional = res.message.additional.clone();
            retry.edns = res.message.edns.clone().map(|mut edns| {
                edns.ext_rcode = 0;
                edns
            });
            res = self.exchanger.exchange(&retry, &self.server, self.network)?;
        }

        if res.message.header.tc && !self.ignore_truncation {
            warn!("Reply from {} was truncated, retrying over TCP.", self.server);
            res = self
                .exchanger
                .exchange(query, &self.server, self.network.with_tcp())?;
        }

        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::{self, Cursor, Read, Write};
    use std::str::FromStr;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use hickory_proto::rr::{DNSClass, Name, RecordType};
    use plummet_proto::edns::{code, Edns, EdnsOption};
    use plummet_proto::Message;

    use super::{send_length_prefixed, Exchanger, StandardResolver};
    use crate::error::TransportError;
    use crate::net::{Network, Protocol, Resolver, Response};
    use crate::options::Options;

    /// Replays canned replies and records what was sent.
    struct Scripted {
        replies: VecDeque<Message>,
        sent: Vec<(Message, Network)>,
    }

    impl Exchanger for Scripted {
        fn exchange(
            &mut self,
            query: &Message,
            _server: &str,
            network: Network,
        ) -> Result<Response, TransportError> {
            self.sent.push((query.clone(), network));
            let mut message = self.replies.pop_front().ok_or(TransportError::Timeout)?;
            message.header.id = query.header.id;
            Ok(Response {
                message,
                rtt: Duration::from_millis(1),
            })
        }
    }

    fn query() -> Message {
        let mut msg = Message::query(
            Name::from_str("example.com.").unwrap(),
            RecordType::A,
            DNSClass::IN,
        );
        msg.edns = Some(Edns::new(1232));
        msg
    }

    fn reply(tc: bool, rcode: u16) -> Message {
        let mut msg = query();
        msg.header.qr = true;
        msg.header.tc = tc;
        msg.set_rcode(rcode);
        msg
    }

    fn resolver(replies: Vec<Message>, opts: &Options) -> StandardResolver<Scripted> {
        StandardResolver::with_exchanger(
            opts,
            Scripted {
                replies: replies.into(),
                sent: Vec::new(),
            },
        )
    }

    #[test]
    fn truncated_reply_is_retried_once_over_tcp() {
        let mut opts = Options::default();
        opts.transport.ipv6 = true;
        let mut resolver = resolver(vec![reply(true, 0), reply(true, 0)], &opts);
        let res = resolver.look_up(&query()).unwrap();

        let sent = &resolver.exchanger().sent;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1.protocol, Protocol::Udp);
        assert_eq!(sent[1].1.protocol, Protocol::Tcp);
        assert_eq!(sent[1].1.to_string(), "tcp6");
        // not looped, even though the TCP reply is truncated too
        assert!(res.message.header.tc);
    }

    #[test]
    fn truncation_can_be_ignored() {
        let mut opts = Options::default();
        opts.transport.ignore_truncation = true;
        let mut resolver = resolver(vec![reply(true, 0)], &opts);
        assert!(resolver.look_up(&query()).unwrap().message.header.tc);
        assert_eq!(resolver.exchanger().sent.len(), 1);
    }

    #[test]
    fn badcookie_resends_with_server_cookie() {
        let mut bad = reply(false, 23);
        if let Some(edns) = &mut bad.edns {
            edns.options
                .push(EdnsOption::new(code::COOKIE, vec![7; 24]));
        }
        let mut resolver = resolver(vec![bad, reply(false, 0)], &Options::default());
        let res = resolver.look_up(&query()).unwrap();
        assert_eq!(res.message.rcode(), 0);

        let sent = &resolver.exchanger().sent;
        assert_eq!(sent.len(), 2);
        let retry_edns = sent[1].0.edns.as_ref().unwrap();
        assert_eq!(retry_edns.option(code::COOKIE).unwrap().data, vec![7; 24]);
        assert_eq!(retry_edns.ext_rcode, 0);
    }

    #[test]
    fn badcookie_is_retried_only_once() {
        let mut resolver = resolver(
            vec![reply(false, 23), reply(false, 23)],
            &Options::default(),
        );
        let res = resolver.look_up(&query()).unwrap();
        assert_eq!(res.message.rcode(), 23);
        assert_eq!(resolver.exchanger().sent.len(), 2);
    }

    #[test]
    fn badcookie_can_be_ignored() {
        let mut opts = Options::default();
        opts.transport.ignore_bad_cookie = true;
        let mut resolver = resolver(vec![reply(false, 23)], &opts);
        assert_eq!(resolver.look_up(&query()).unwrap().message.rcode(), 23);
        assert_eq!(resolver.exchanger().sent.len(), 1);
    }

    /// Collects formatted log lines.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn retry_notices_go_to_the_log() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let mut resolver = resolver(
                vec![reply(false, 23), reply(true, 0), reply(false, 0)],
                &Options::default(),
            );
            assert_eq!(resolver.look_up(&query()).unwrap().message.rcode(), 0);
            assert_eq!(resolver.exchanger().sent.len(), 3);
        });

        let log = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(log.contains("BADCOOKIE"), "{}", log);
        assert!(log.contains("truncated, retrying over TCP"), "{}", log);
    }

    /// An in-memory stream: reads come from `input`, writes go to `output`.
    struct Pipe {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Pipe {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Pipe {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn length_prefix_framing() {
        let mut pipe = Pipe {
            input: Cursor::new(vec![0, 3, 0xAA, 0xBB, 0xCC, 0xFF]),
            output: Vec::new(),
        };
        let reply = send_length_prefixed(&mut pipe, &[1, 2]).unwrap();
        assert_eq!(pipe.output, vec![0, 2, 1, 2]);
        assert_eq!(reply, vec![0xAA, 0xBB, 0xCC]);

        let mut short = Pipe {
            input: Cursor::new(vec![0, 5, 1]),
            output: Vec::new(),
        };
        assert!(send_length_prefixed(&mut short, &[1]).is_err());
    }
}
