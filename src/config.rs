use std::{fs, net::SocketAddr};

use anyhow::{anyhow, Result};
use log::{debug, error, info, warn};
use serde::Deserialize;
use url::Url;

const TRACKER_LISTEN_DEFAULT: &str = "0.0.0.0:8000";
const TLS_DEFAULT: bool = false;
const STARTUP_DELAY_DEFAULT: u64 = 2000; // in ms
const MAX_ANNOUNCED_CHUNKS_DEFAULT: u64 = 1 << 20;
const PEER_LISTEN_HOST_DEFAULT: &str = "0.0.0.0";
const CERTIFICATE_DEFAULT: &str = "certs/cert.pem";
const PRIVKEY_DEFAULT: &str = "certs/key.pem";
const MAX_FRAME_SIZE_DEFAULT: usize = 64 * 1024 * 1024; // 64 MiB
const TRACKER_URL_DEFAULT: &str = "http://127.0.0.1:8000/";
const TIMEOUT_DEFAULT: u64 = 60;
const SERVER_NAME_DEFAULT: &str = "localhost";
const CHUNK_SIZE_DEFAULT: usize = 1024 * 1024; // 1 MiB

#[derive(Clone, Deserialize, Debug)]
pub struct TrackerConfig {
    #[serde(default = "tracker_listen_default")]
    pub listen: Vec<SocketAddr>,

    #[serde(default = "tls_default")]
    pub tls: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub privkey: Option<String>,

    /// Program spawned for every registered peer, defaults to this executable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launcher_program: Option<String>,

    /// Arguments of the launcher program, `{port}` is replaced by the peer port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launcher_args: Option<Vec<String>>,

    #[serde(default = "startup_delay_default")]
    pub startup_delay: u64,

    #[serde(default = "max_announced_chunks_default")]
    pub max_announced_chunks: u64,
}

#[derive(Clone, Deserialize, Debug)]
pub struct PeerConfig {
    #[serde(default = "peer_listen_host_default")]
    pub listen_host: String,

    #[serde(default = "certificate_default")]
    pub certificate: String,

    #[serde(default = "privkey_default")]
    pub privkey: String,

    #[serde(default = "max_frame_size_default")]
    pub max_frame_size: usize,
}

#[derive(Clone, Deserialize, Debug)]
pub struct ClientConfig {
    #[serde(default = "tracker_url_default")]
    pub tracker: Url,

    #[serde(default = "timeout_default")]
    pub timeout: u64,

    /// Certificate trusted when connecting to peers.
    #[serde(default = "certificate_default")]
    pub certificate: String,

    #[serde(default = "server_name_default")]
    pub server_name: String,

    #[serde(default = "chunk_size_default")]
    pub chunk_size: usize,

    #[serde(default = "max_frame_size_default")]
    pub max_frame_size: usize,
}

#[derive(Clone, Default, Deserialize, Debug)]
pub struct Config {
    #[serde(default)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub peer: PeerConfig,

    #[serde(default)]
    pub client: ClientConfig,
}

impl Config {
    pub fn new(config_path: &str) -> Result<Self> {
        info!("Using configuration file {config_path}. ");

        let config = fs::read_to_string(config_path)?;
        Self::parse(&config)
    }

    pub fn parse(config: &str) -> Result<Self> {
        let config = config.trim();
        let config: Self = if config.is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(config)?
        };

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let tracker = &self.tracker;

        if !tracker.tls && tracker.certificate.is_some() {
            warn!("TLS is disabled but config.tracker.certificate is set, ignoring. ");
        }

        if !tracker.tls && tracker.privkey.is_some() {
            warn!("TLS is disabled but config.tracker.privkey is set, ignoring. ");
        }

        if tracker.tls && tracker.certificate.is_none() {
            error!("TLS is enabled but config.tracker.certificate is not set. ");
            return Err(anyhow!("invalid configuration"));
        }

        if tracker.tls && tracker.privkey.is_none() {
            error!("TLS is enabled but config.tracker.privkey is not set. ");
            return Err(anyhow!("invalid configuration"));
        }

        if tracker.launcher_args.is_some() && tracker.launcher_program.is_none() {
            error!("config.tracker.launcher_args is set without config.tracker.launcher_program. ");
            return Err(anyhow!("invalid configuration"));
        }

        if self.client.chunk_size == 0 {
            error!("config.client.chunk_size must be positive. ");
            return Err(anyhow!("invalid configuration"));
        }

        Ok(())
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            listen: tracker_listen_default(),
            tls: tls_default(),
            certificate: None,
            privkey: None,
            launcher_program: None,
            launcher_args: None,
            startup_delay: startup_delay_default(),
            max_announced_chunks: max_announced_chunks_default(),
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            listen_host: peer_listen_host_default(),
            certificate: certificate_default(),
            privkey: privkey_default(),
            max_frame_size: max_frame_size_default(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tracker: tracker_url_default(),
            timeout: timeout_default(),
            certificate: certificate_default(),
            server_name: server_name_default(),
            chunk_size: chunk_size_default(),
            max_frame_size: max_frame_size_default(),
        }
    }
}

fn tracker_listen_default() -> Vec<SocketAddr> {
    debug!("Defaulting config.tracker.listen to {TRACKER_LISTEN_DEFAULT}. ");
    TRACKER_LISTEN_DEFAULT.parse().into_iter().collect()
}

fn tls_default() -> bool {
    debug!("Defaulting config.tracker.tls to {TLS_DEFAULT}. ");
    TLS_DEFAULT
}

fn startup_delay_default() -> u64 {
    debug!("Defaulting config.tracker.startup_delay to {STARTUP_DELAY_DEFAULT}. ");
    STARTUP_DELAY_DEFAULT
}

fn max_announced_chunks_default() -> u64 {
    debug!("Defaulting config.tracker.max_announced_chunks to {MAX_ANNOUNCED_CHUNKS_DEFAULT}. ");
    MAX_ANNOUNCED_CHUNKS_DEFAULT
}

fn peer_listen_host_default() -> String {
    debug!("Defaulting config.peer.listen_host to {PEER_LISTEN_HOST_DEFAULT}. ");
    String::from(PEER_LISTEN_HOST_DEFAULT)
}

fn certificate_default() -> String {
    debug!("Defaulting certificate to {CERTIFICATE_DEFAULT}. ");
    String::from(CERTIFICATE_DEFAULT)
}

fn privkey_default() -> String {
    debug!("Defaulting config.peer.privkey to {PRIVKEY_DEFAULT}. ");
    String::from(PRIVKEY_DEFAULT)
}

fn max_frame_size_default() -> usize {
    debug!("Defaulting max_frame_size to {MAX_FRAME_SIZE_DEFAULT}. ");
    MAX_FRAME_SIZE_DEFAULT
}

fn tracker_url_default() -> Url {
    debug!("Defaulting config.client.tracker to {TRACKER_URL_DEFAULT}. ");
    Url::parse(TRACKER_URL_DEFAULT).expect("default tracker url is valid")
}

fn timeout_default() -> u64 {
    debug!("Defaulting config.client.timeout to {TIMEOUT_DEFAULT}. ");
    TIMEOUT_DEFAULT
}

fn server_name_default() -> String {
    debug!("Defaulting config.client.server_name to {SERVER_NAME_DEFAULT}. ");
    String::from(SERVER_NAME_DEFAULT)
}

fn chunk_size_default() -> usize {
    debug!("Defaulting config.client.chunk_size to {CHUNK_SIZE_DEFAULT}. ");
    CHUNK_SIZE_DEFAULT
}
