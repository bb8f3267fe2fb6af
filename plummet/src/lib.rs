//! `plummet` asks a nameserver one question and shows the answer the way dig does, or as JSON,
//! XML or YAML. Queries go out over UDP, TCP, DNS over TLS, DNS over HTTPS, DNS over QUIC or
//! DNSCrypt.
//!
//! The pipeline is: [`args`] and [`classify`] fill in [`options::Options`], [`query`] builds
//! the message and sends it through one of the resolvers in [`net`], and [`print`] renders the
//! reply. [`trace`] walks the delegation chain from a root server instead.

pub mod args;
pub mod classify;
pub mod conf;
pub mod dig;
pub mod error;
pub mod net;
pub mod options;
pub mod print;
pub mod query;
pub mod reverse;
pub mod trace;

pub use error::Error;
pub use options::Options;
