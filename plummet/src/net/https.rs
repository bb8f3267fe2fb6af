//! DNS over HTTPS ([\[RFC 8484\]](https://www.rfc-editor.org/rfc/rfc8484)).

use std::io::{self, Read};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Instant;

use data_encoding::BASE64URL_NOPAD;
use plummet_proto::Message;
use tracing::debug;
use url::Url;

use super::{tls, Resolver, Response};
use crate::error::TransportError;
use crate::options::Options;

const DNS_MESSAGE: &str = "application/dns-message";

pub struct HttpsResolver {
    url: String,
    get: bool,
    agent: ureq::Agent,
}

impl HttpsResolver {
    pub fn new(opts: &Options) -> Result<Self, TransportError> {
        let invalid = || TransportError::InvalidServer(opts.request.server.clone());
        let mut url = Url::parse(&opts.request.server).map_err(|_| invalid())?;
        let host = url.host_str().ok_or_else(invalid)?.to_string();

        let tls_config = tls::client_config(opts.transport.tls_no_verify, false, &[b"http/1.1"])?;
        let mut builder = ureq::AgentBuilder::new()
            .timeout(opts.request.timeout)
            .tls_config(tls_config);

        // connect to the server from the URL, but verify and send the TLS host as SNI
        if let Some(tls_host) = &opts.transport.tls_host {
            let port = url.port_or_known_default().unwrap_or(443);
            url.set_host(Some(tls_host)).map_err(|_| invalid())?;
            builder = builder.resolver(move |_netloc: &str| -> io::Result<Vec<SocketAddr>> {
                Ok((host.as_str(), port).to_socket_addrs()?.collect())
            });
        }

        Ok(Self {
            url: url.to_string(),
            get: opts.transport.https_get,
            agent: builder.build(),
        })
    }
}

impl Resolver for HttpsResolver {
    fn look_up(&mut self, query: &Message) -> Result<Response, TransportError> {
        let data = query.to_vec()?;
        debug!(
            "Sending {} bytes to {} via HTTPS {}.",
            data.len(),
            self.url,
            if self.get { "GET" } else { "POST" }
        );

        let before = Instant::now();
        let response = if self.get {
            self.agent
                .get(&self.url)
                .set("Accept", DNS_MESSAGE)
                .query("dns", &BASE64URL_NOPAD.encode(&data))
                .call()
        } else {
            self.agent
                .post(&self.url)
                .set("Content-Type", DNS_MESSAGE)
                .set("Accept", DNS_MESSAGE)
                .send_bytes(&data)
        }
        .map_err(|e| match e {
            ureq::Error::Status(code, _) => TransportError::HttpStatus(code),
            ureq::Error::Transport(transport) => TransportError::Http(transport.to_string()),
        })?;

        // ureq only reports 4xx and 5xx as errors
        if response.status() != 200 {
            return Err(TransportError::HttpStatus(response.status()));
        }

        let mut body = Vec::new();
        response
            .into_reader()
            .take(u16::MAX as u64 + 1)
            .read_to_end(&mut body)?;
        let rtt = before.elapsed();

        let message = Message::from_vec(&body)?;
        Ok(Response { message, rtt })
    }
}
