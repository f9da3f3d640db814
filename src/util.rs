use std::{
    fs::File,
    io::BufReader,
    net::{SocketAddr, ToSocketAddrs},
};

use anyhow::{anyhow, Result};
use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};
use rustls::{Certificate, PrivateKey};
use rustls_pemfile::Item;

pub fn string_to_socket(s: &str) -> Result<SocketAddr> {
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Ok(addr);
    }

    let host = s.to_socket_addrs()?.next().ok_or(anyhow!("cannot resolve hostname {s}"))?;

    Ok(host)
}

pub fn to_hex(data: &[u8]) -> String {
    HEXLOWER.encode(data)
}

pub fn from_hex(s: &str) -> Result<Vec<u8>> {
    HEXLOWER_PERMISSIVE
        .decode(s.as_bytes())
        .map_err(|e| anyhow!("invalid hex payload: {e}"))
}

pub fn load_certificates(path: &str) -> Result<Vec<Certificate>> {
    let mut reader = BufReader::new(File::open(path)?);
    let certificates: Vec<_> = rustls_pemfile::read_all(&mut reader)?
        .into_iter()
        .filter_map(|item| match item {
            Item::X509Certificate(der) => Some(Certificate(der)),
            _ => None,
        })
        .collect();

    if certificates.is_empty() {
        return Err(anyhow!("no certificate found in {path}"));
    }

    Ok(certificates)
}

pub fn load_private_key(path: &str) -> Result<PrivateKey> {
    let mut reader = BufReader::new(File::open(path)?);

    for item in rustls_pemfile::read_all(&mut reader)? {
        match item {
            Item::PKCS8Key(der) | Item::RSAKey(der) | Item::ECKey(der) => return Ok(PrivateKey(der)),
            _ => continue,
        }
    }

    Err(anyhow!("no private key found in {path}"))
}
