//! DNSCrypt version 2 (<https://dnscrypt.info/protocol>).
//!
//! The server is given as an `sdns://` stamp. Before the first lookup, the resolver certificate
//! is fetched as a TXT record of the provider name and verified against the provider key from the
//! stamp; queries are then encrypted for the resolver key from that certificate.

use std::str::FromStr;
use std::time::Instant;

use byteorder::{LittleEndian, NetworkEndian, ReadBytesExt};
use crypto_box::aead::generic_array::GenericArray;
use crypto_box::aead::AeadInPlace;
use crypto_box::{ChaChaBox, PublicKey, SalsaBox, SecretKey};
use data_encoding::BASE64URL_NOPAD;
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use plummet_proto::Message;
use ring::signature::{UnparsedPublicKey, ED25519};
use tracing::{debug, info};

use super::standard::{Exchanger, NetExchanger};
use super::{join_host_port, split_host_port, Network, Protocol, Resolver, Response};
use crate::error::TransportError;
use crate::options::Options;

const STAMP_PREFIX: &str = "sdns://";
const STAMP_PROTOCOL_DNSCRYPT: u8 = 0x01;
const DEFAULT_PORT: u16 = 443;

const CERT_MAGIC: &[u8; 4] = b"DNSC";
const RESOLVER_MAGIC: &[u8; 8] = b"r6fnvWj8";
/// Magic, es-version, minor version and signature.
const CERT_HEADER_LEN: usize = 4 + 2 + 2 + 64;
/// Resolver key, client magic, serial and validity window.
const CERT_SIGNED_LEN: usize = 32 + 8 + 4 + 4 + 4;

const NONCE_LEN: usize = 24;
const HALF_NONCE_LEN: usize = NONCE_LEN / 2;
const TAG_LEN: usize = 16;
const MIN_UDP_QUERY_LEN: usize = 256;
const PADDING_BLOCK: usize = 64;

fn dnscrypt_error(msg: impl Into<String>) -> TransportError {
    TransportError::DnsCrypt(msg.into())
}

/// The parts of a DNSCrypt server stamp needed to talk to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerStamp {
    pub props: u64,
    /// `host:port`, with the default port filled in.
    pub address: String,
    pub provider_key: [u8; 32],
    pub provider_name: String,
}

impl FromStr for ServerStamp {
    type Err = TransportError;

    fn from_str(stamp: &str) -> Result<Self, Self::Err> {
        let invalid = || TransportError::InvalidServer(stamp.to_string());
        let encoded = stamp.strip_prefix(STAMP_PREFIX).ok_or_else(invalid)?;
        let bytes = BASE64URL_NOPAD
            .decode(encoded.as_bytes())
            .map_err(|_| invalid())?;
        let mut reader = bytes.as_slice();

        if reader.read_u8().map_err(|_| invalid())? != STAMP_PROTOCOL_DNSCRYPT {
            return Err(invalid());
        }
        let props = reader.read_u64::<LittleEndian>().map_err(|_| invalid())?;

        let address = String::from_utf8(read_lp(&mut reader).ok_or_else(invalid)?.to_vec())
            .map_err(|_| invalid())?;
        if address.is_empty() {
            return Err(invalid());
        }
        let address = if split_host_port(&address).is_some() {
            address
        } else {
            join_host_port(&address, DEFAULT_PORT)
        };

        let provider_key = read_lp(&mut reader)
            .and_then(|key| <[u8; 32]>::try_from(key).ok())
            .ok_or_else(invalid)?;

        let mut provider_name =
            String::from_utf8(read_lp(&mut reader).ok_or_else(invalid)?.to_vec())
                .map_err(|_| invalid())?;
        if !provider_name.ends_with('.') {
            provider_name.push('.');
        }

        Ok(Self {
            props,
            address,
            provider_key,
            provider_name,
        })
    }
}

/// Reads a length-prefixed byte string.
fn read_lp<'a>(reader: &mut &'a [u8]) -> Option<&'a [u8]> {
    let (&len, rest) = reader.split_first()?;
    let len = len as usize;
    if rest.len() < len {
        return None;
    }
    let (value, rest) = rest.split_at(len);
    *reader = rest;
    Some(value)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Construction {
    XSalsa20Poly1305,
    XChaCha20Poly1305,
}

impl Construction {
    fn from_es_version(version: u16) -> Option<Self> {
        match version {
            1 => Some(Construction::XSalsa20Poly1305),
            2 => Some(Construction::XChaCha20Poly1305),
            _ => None,
        }
    }
}

/// A verified resolver certificate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Certificate {
    pub construction: Construction,
    pub resolver_key: [u8; 32],
    pub client_magic: [u8; 8],
    pub serial: u32,
    pub valid_from: u32,
    pub valid_until: u32,
}

impl Certificate {
    /// Parses a certificate and checks its signature. Validity dates are not checked here.
    pub fn parse(data: &[u8], provider_key: &[u8; 32]) -> Result<Self, TransportError> {
        if data.len() < CERT_HEADER_LEN + CERT_SIGNED_LEN {
            return Err(dnscrypt_error(format!(
                "certificate is only {} bytes long",
                data.len()
            )));
        }
        if &data[..4] != CERT_MAGIC {
            return Err(dnscrypt_error("certificate has the wrong magic"));
        }
        let mut reader = &data[4..8];
        let es_version = reader.read_u16::<NetworkEndian>()?;
        let construction = Construction::from_es_version(es_version).ok_or_else(|| {
            dnscrypt_error(format!("unsupported encryption system {}", es_version))
        })?;

        let signature = &data[8..CERT_HEADER_LEN];
        let signed = &data[CERT_HEADER_LEN..];
        UnparsedPublicKey::new(&ED25519, provider_key)
            .verify(signed, signature)
            .map_err(|_| dnscrypt_error("certificate signature is invalid"))?;

        let mut resolver_key = [0; 32];
        resolver_key.copy_from_slice(&signed[..32]);
        let mut client_magic = [0; 8];
        client_magic.copy_from_slice(&signed[32..40]);
        let mut reader = &signed[40..CERT_SIGNED_LEN];
        Ok(Self {
            construction,
            resolver_key,
            client_magic,
            serial: reader.read_u32::<NetworkEndian>()?,
            valid_from: reader.read_u32::<NetworkEndian>()?,
            valid_until: reader.read_u32::<NetworkEndian>()?,
        })
    }

    pub fn is_valid_at(&self, unix_time: u32) -> bool {
        self.valid_from <= unix_time && unix_time <= self.valid_until
    }
}

/// Picks the best currently valid certificate: highest serial, then the newer construction.
fn select_certificate<'a>(
    blobs: impl IntoIterator<Item = &'a [u8]>,
    provider_key: &[u8; 32],
    unix_time: u32,
) -> Result<Certificate, TransportError> {
    blobs
        .into_iter()
        .filter_map(|blob| match Certificate::parse(blob, provider_key) {
            Ok(cert) => Some(cert),
            Err(e) => {
                debug!("Skipping certificate: {}", e);
                None
            }
        })
        .filter(|cert| cert.is_valid_at(unix_time))
        .max_by_key(|cert| (cert.serial, cert.construction))
        .ok_or_else(|| dnscrypt_error("server sent no valid certificate"))
}

enum Cipher {
    Salsa(SalsaBox),
    ChaCha(ChaChaBox),
}

impl Cipher {
    fn new(construction: Construction, public: &PublicKey, secret: &SecretKey) -> Self {
        match construction {
            Construction::XSalsa20Poly1305 => Cipher::Salsa(SalsaBox::new(public, secret)),
            Construction::XChaCha20Poly1305 => Cipher::ChaCha(ChaChaBox::new(public, secret)),
        }
    }

    /// Encrypts in place and returns tag followed by ciphertext, as NaCl's `crypto_box` does.
    fn seal(&self, nonce: &[u8; NONCE_LEN], mut data: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        let nonce = GenericArray::from_slice(nonce);
        let tag = match self {
            Cipher::Salsa(b) => b.encrypt_in_place_detached(nonce, b"", &mut data),
            Cipher::ChaCha(b) => b.encrypt_in_place_detached(nonce, b"", &mut data),
        }
        .map_err(|_| dnscrypt_error("could not encrypt query"))?;

        let mut sealed = Vec::with_capacity(TAG_LEN + data.len());
        sealed.extend_from_slice(&tag);
        sealed.extend_from_slice(&data);
        Ok(sealed)
    }

    fn open(&self, nonce: &[u8], sealed: &[u8]) -> Result<Vec<u8>, TransportError> {
        if sealed.len() < TAG_LEN {
            return Err(dnscrypt_error("encrypted reply is too short"));
        }
        let nonce = GenericArray::from_slice(nonce);
        let (tag, ciphertext) = sealed.split_at(TAG_LEN);
        let tag = GenericArray::from_slice(tag);
        let mut data = ciphertext.to_vec();
        match self {
            Cipher::Salsa(b) => b.decrypt_in_place_detached(nonce, b"", &mut data, tag),
            Cipher::ChaCha(b) => b.decrypt_in_place_detached(nonce, b"", &mut data, tag),
        }
        .map_err(|_| dnscrypt_error("could not decrypt reply"))?;
        Ok(data)
    }
}

/// Appends 0x80 and zeros up to a multiple of 64 bytes, and at least `min_len` bytes.
fn pad(mut data: Vec<u8>, min_len: usize) -> Vec<u8> {
    let padded_len = ((data.len() + 1 + PADDING_BLOCK - 1) / PADDING_BLOCK * PADDING_BLOCK)
        .max(min_len);
    data.push(0x80);
    data.resize(padded_len, 0);
    data
}

fn unpad(mut data: Vec<u8>) -> Result<Vec<u8>, TransportError> {
    let end = data
        .iter()
        .rposition(|&b| b != 0)
        .filter(|&i| data[i] == 0x80)
        .ok_or_else(|| dnscrypt_error("reply has invalid padding"))?;
    data.truncate(end);
    Ok(data)
}

/// Encrypts `query` for `cert`: client magic, client public key, client nonce, then the box.
fn encrypt_query(
    cert: &Certificate,
    secret: SecretKey,
    client_nonce: [u8; HALF_NONCE_LEN],
    query: Vec<u8>,
    min_len: usize,
) -> Result<(Vec<u8>, Cipher), TransportError> {
    let public = secret.public_key();
    let cipher = Cipher::new(cert.construction, &PublicKey::from(cert.resolver_key), &secret);

    let mut nonce = [0; NONCE_LEN];
    nonce[..HALF_NONCE_LEN].copy_from_slice(&client_nonce);
    let sealed = cipher.seal(&nonce, pad(query, min_len))?;

    let mut packet = Vec::with_capacity(8 + 32 + HALF_NONCE_LEN + sealed.len());
    packet.extend_from_slice(&cert.client_magic);
    packet.extend_from_slice(public.as_bytes());
    packet.extend_from_slice(&client_nonce);
    packet.extend_from_slice(&sealed);
    Ok((packet, cipher))
}

/// Checks magic and nonce of an encrypted reply and returns the plain message bytes.
fn decrypt_reply(
    cipher: &Cipher,
    client_nonce: &[u8; HALF_NONCE_LEN],
    reply: &[u8],
) -> Result<Vec<u8>, TransportError> {
    if reply.len() < RESOLVER_MAGIC.len() + NONCE_LEN + TAG_LEN {
        return Err(dnscrypt_error(format!(
            "reply is only {} bytes long",
            reply.len()
        )));
    }
    let (magic, rest) = reply.split_at(RESOLVER_MAGIC.len());
    if magic != RESOLVER_MAGIC {
        return Err(dnscrypt_error("reply has the wrong magic"));
    }
    let (nonce, sealed) = rest.split_at(NONCE_LEN);
    if &nonce[..HALF_NONCE_LEN] != client_nonce {
        return Err(dnscrypt_error("reply nonce does not match the query"));
    }
    unpad(cipher.open(nonce, sealed)?)
}

/// Talks DNSCrypt to the server described by a stamp.
pub struct DnsCryptResolver {
    stamp: ServerStamp,
    network: Network,
    exchanger: NetExchanger,
    cert: Option<Certificate>,
}

impl DnsCryptResolver {
    pub fn new(opts: &Options) -> Result<Self, TransportError> {
        let stamp = opts.request.server.parse()?;
        let mut network = Network::from_options(opts);
        // DNSCrypt brings its own encryption, TLS only selects the stream framing
        if network.protocol == Protocol::Tls {
            network = network.with_tcp();
        }
        let mut plain = opts.clone();
        plain.transport.tls = false;

        Ok(Self {
            stamp,
            network,
            exchanger: NetExchanger::new(&plain)?,
            cert: None,
        })
    }

    fn certificate(&mut self) -> Result<Certificate, TransportError> {
        if let Some(cert) = &self.cert {
            return Ok(cert.clone());
        }

        let name = Name::from_ascii(&self.stamp.provider_name)
            .map_err(|_| TransportError::InvalidServer(self.stamp.provider_name.clone()))?;
        let query = Message::query(name, RecordType::TXT, DNSClass::IN);
        let res = self
            .exchanger
            .exchange(&query, &self.stamp.address, self.network)?;

        let blobs: Vec<Vec<u8>> = res
            .message
            .answers
            .iter()
            .filter_map(|record| match record.data() {
                Some(RData::TXT(txt)) => Some(txt.txt_data().concat()),
                _ => None,
            })
            .collect();
        let now = chrono::Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32;
        let cert = select_certificate(
            blobs.iter().map(Vec::as_slice),
            &self.stamp.provider_key,
            now,
        )?;
        info!(
            "Using DNSCrypt certificate {} of {} ({:?}).",
            cert.serial, self.stamp.provider_name, cert.construction
        );

        self.cert = Some(cert.clone());
        Ok(cert)
    }
}

impl Resolver for DnsCryptResolver {
    fn look_up(&mut self, query: &Message) -> Result<Response, TransportError> {
        let cert = self.certificate()?;

        let min_len = match self.network.protocol {
            Protocol::Udp => MIN_UDP_QUERY_LEN,
            Protocol::Tcp | Protocol::Tls => 0,
        };
        let client_nonce: [u8; HALF_NONCE_LEN] = rand::random();
        let secret = SecretKey::from(rand::random::<[u8; 32]>());
        let (packet, cipher) = encrypt_query(&cert, secret, client_nonce, query.to_vec()?, min_len)?;

        let before = Instant::now();
        let reply = self
            .exchanger
            .exchange_bytes(&packet, &self.stamp.address, self.network)?;
        let rtt = before.elapsed();

        let message = Message::from_vec(&decrypt_reply(&cipher, &client_nonce, &reply)?)?;
        if message.header.id != query.header.id {
            return Err(TransportError::IdMismatch {
                expected: query.header.id,
                got: message.header.id,
            });
        }
        Ok(Response { message, rtt })
    }
}

#[cfg(test)]
mod tests {
    use crypto_box::{PublicKey, SecretKey};
    use ring::rand::SystemRandom;
    use ring::signature::{Ed25519KeyPair, KeyPair};

    use super::{
        decrypt_reply, encrypt_query, pad, select_certificate, unpad, Certificate, Cipher,
        Construction, ServerStamp, HALF_NONCE_LEN, NONCE_LEN, RESOLVER_MAGIC,
    };
    use crate::classify::DEFAULT_DNSCRYPT_SERVER;

    #[test]
    fn default_stamp_decodes() {
        let stamp: ServerStamp = DEFAULT_DNSCRYPT_SERVER.parse().unwrap();
        assert_eq!(stamp.address, "94.140.14.14:5443");
        assert_eq!(stamp.provider_name, "2.dnscrypt.default.ns1.adguard.com.");
        assert_eq!(&stamp.provider_key[..4], &[0xd1, 0x2b, 0x47, 0xf2]);
        assert_eq!(stamp.props, 3);
    }

    #[test]
    fn bad_stamps_are_rejected() {
        assert!("sdns://!!!".parse::<ServerStamp>().is_err());
        assert!("9.9.9.9".parse::<ServerStamp>().is_err());
        // DoH stamp
        assert!("sdns://AgAAAAAAAAAAAAA".parse::<ServerStamp>().is_err());
    }

    #[test]
    fn padding() {
        let padded = pad(vec![1; 10], 256);
        assert_eq!(padded.len(), 256);
        assert_eq!(padded[10], 0x80);
        assert_eq!(unpad(padded).unwrap(), vec![1; 10]);

        assert_eq!(pad(vec![1; 63], 0).len(), 64);
        assert_eq!(pad(vec![1; 64], 0).len(), 128);
        assert!(unpad(vec![1, 0, 0]).is_err());
        assert!(unpad(vec![0; 4]).is_err());
    }

    fn signed_cert(key: &Ed25519KeyPair, es_version: u16, serial: u32, resolver_key: [u8; 32]) -> Vec<u8> {
        let mut signed = Vec::new();
        signed.extend_from_slice(&resolver_key);
        signed.extend_from_slice(b"magic!!!");
        signed.extend_from_slice(&serial.to_be_bytes());
        signed.extend_from_slice(&100u32.to_be_bytes());
        signed.extend_from_slice(&200u32.to_be_bytes());

        let mut cert = b"DNSC".to_vec();
        cert.extend_from_slice(&es_version.to_be_bytes());
        cert.extend_from_slice(&[0, 0]);
        cert.extend_from_slice(key.sign(&signed).as_ref());
        cert.extend_from_slice(&signed);
        cert
    }

    fn provider() -> (Ed25519KeyPair, [u8; 32]) {
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&SystemRandom::new()).unwrap();
        let key = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
        let public: [u8; 32] = key.public_key().as_ref().try_into().unwrap();
        (key, public)
    }

    #[test]
    fn certificate_parsing() {
        let (key, public) = provider();
        let blob = signed_cert(&key, 2, 7, [9; 32]);
        let cert = Certificate::parse(&blob, &public).unwrap();
        assert_eq!(cert.construction, Construction::XChaCha20Poly1305);
        assert_eq!(cert.resolver_key, [9; 32]);
        assert_eq!(&cert.client_magic, b"magic!!!");
        assert_eq!(cert.serial, 7);
        assert!(cert.is_valid_at(150));
        assert!(!cert.is_valid_at(201));

        let mut tampered = blob.clone();
        tampered[80] ^= 1;
        assert!(Certificate::parse(&tampered, &public).is_err());
        assert!(Certificate::parse(&blob, &[0; 32]).is_err());
        assert!(Certificate::parse(&signed_cert(&key, 3, 7, [9; 32]), &public).is_err());
    }

    #[test]
    fn highest_valid_serial_wins() {
        let (key, public) = provider();
        let old = signed_cert(&key, 1, 1, [1; 32]);
        let new = signed_cert(&key, 1, 2, [2; 32]);
        let garbage = vec![0; 20];
        let cert = select_certificate(
            [old.as_slice(), garbage.as_slice(), new.as_slice()],
            &public,
            150,
        )
        .unwrap();
        assert_eq!(cert.serial, 2);
        assert!(select_certificate([old.as_slice()], &public, 300).is_err());
    }

    #[test]
    fn encrypted_exchange() {
        for construction in [Construction::XSalsa20Poly1305, Construction::XChaCha20Poly1305] {
            let resolver_secret = SecretKey::from([5; 32]);
            let cert = Certificate {
                construction,
                resolver_key: *resolver_secret.public_key().as_bytes(),
                client_magic: *b"clientmg",
                serial: 1,
                valid_from: 0,
                valid_until: u32::MAX,
            };
            let client_nonce = [3; HALF_NONCE_LEN];
            let (packet, client_cipher) =
                encrypt_query(&cert, SecretKey::from([6; 32]), client_nonce, vec![42; 30], 256)
                    .unwrap();
            assert_eq!(&packet[..8], b"clientmg");

            // what the server does with it
            let client_public: [u8; 32] = packet[8..40].try_into().unwrap();
            let server_cipher =
                Cipher::new(construction, &PublicKey::from(client_public), &resolver_secret);
            let mut nonce = [0; NONCE_LEN];
            nonce[..HALF_NONCE_LEN].copy_from_slice(&packet[40..52]);
            let query = server_cipher.open(&nonce, &packet[52..]).unwrap();
            assert_eq!(query.len(), 256);
            assert_eq!(unpad(query).unwrap(), vec![42; 30]);

            nonce[HALF_NONCE_LEN..].copy_from_slice(&[8; HALF_NONCE_LEN]);
            let mut reply = RESOLVER_MAGIC.to_vec();
            reply.extend_from_slice(&nonce);
            reply.extend_from_slice(&server_cipher.seal(&nonce, pad(vec![7; 12], 0)).unwrap());
            assert_eq!(
                decrypt_reply(&client_cipher, &client_nonce, &reply).unwrap(),
                vec![7; 12]
            );
            assert!(decrypt_reply(&client_cipher, &[0; HALF_NONCE_LEN], &reply).is_err());
        }
    }
}
