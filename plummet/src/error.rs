//! Error types, one per stage of the lookup pipeline, plus the umbrella [`Error`].

use std::io;

use plummet_proto::WireError;
use thiserror::Error;

/// Errors while turning command line tokens into [`Options`](crate::options::Options). Nothing
/// has been sent when one of these is returned.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("Invalid arguments: {0}")]
    Arguments(String),

    #[error("Invalid dig flag: +{0}.")]
    UnknownSwitch(String),

    #[error("Missing value for +{0}.")]
    MissingValue(String),

    #[error("Invalid value for +{switch}: {value}.")]
    InvalidValue { switch: String, value: String },

    #[error("Could not convert {name} to punycode: {reason}.")]
    Idna { name: String, reason: String },

    #[error("Cannot build a reverse lookup name for {address} (type {qtype}).")]
    Reverse { address: String, qtype: String },

    #[error("Invalid client subnet: {0}.")]
    Subnet(String),

    #[error("Invalid EDNS Z flag: {0}.")]
    ZFlag(String),

    #[error("Invalid record class: {0}.")]
    Class(String),

    #[error("Invalid record type: {0}.")]
    Type(String),
}

/// Errors while assembling a query.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Invalid query name {0}.")]
    Name(String),

    #[error("Could not encode query.")]
    Encode(#[from] WireError),
}

/// Errors from selecting a transport or talking to the nameserver.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid server address: {0}.")]
    InvalidServer(String),

    #[error("Could not resolve {0}.")]
    Resolve(String),

    #[error("Could not connect to {server} via {network}.")]
    Connect {
        server: String,
        network: String,
        #[source]
        source: io::Error,
    },

    #[error("The nameserver did not reply in time.")]
    Timeout,

    #[error("Could not talk to the nameserver.")]
    Io(#[from] io::Error),

    #[error("Reply ID {got} does not match query ID {expected}.")]
    IdMismatch { expected: u16, got: u16 },

    #[error("Could not set up TLS.")]
    Tls(#[from] rustls::Error),

    #[error("DoH server responded with HTTP {0}.")]
    HttpStatus(u16),

    #[error("HTTP(S) request unsuccessful: {0}")]
    Http(String),

    #[error("QUIC exchange failed: {0}")]
    Quic(String),

    #[error("DNSCrypt exchange failed: {0}")]
    DnsCrypt(String),

    #[error("Could not parse the nameserver's reply.")]
    Malformed(#[from] WireError),

    #[error("Gave up after following {0} delegations.")]
    TooManyHops(usize),
}

impl TransportError {
    /// Whether another attempt might succeed. Selection errors never do.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            TransportError::InvalidServer(_) | TransportError::TooManyHops(_)
        )
    }
}

/// Errors while formatting a response.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Could not convert {name} from punycode: {reason}.")]
    Idna { name: String, reason: String },

    #[error("Could not measure message size.")]
    Size(#[source] WireError),

    #[error("Could not serialize the response: {0}")]
    Serialize(String),

    #[error("No structured output format selected.")]
    FormatNotRecognized,
}

/// Any error the lookup pipeline can produce.
#[derive(Debug, Error)]
pub enum Error {
    /// Help or version output was requested and has already been printed.
    #[error("not an error")]
    NotAnError,

    #[error(transparent)]
    Classify(#[from] ClassifyError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

impl Error {
    /// The process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::NotAnError => 0,
            Error::Classify(_) => 1,
            Error::Query(_) => 8,
            Error::Transport(_) => 9,
            Error::Render(_) => 10,
        }
    }
}
