use std::{env, future::Future, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use clap::Subcommand;
use log::{info, warn};
use reqwest::Client;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{
    config::{ClientConfig, Config},
    exchange::{server_config, start_peer_server, PeerClient},
    peer::Peer,
    server::start_server,
    store::ChunkStore,
    tracker::{Launcher, Tracker, TrackerClient},
    transfer::{download, upload},
};

#[derive(Subcommand)]
pub enum Command {
    /// Run the tracker
    Tracker,

    /// Run a peer listener, normally spawned by the tracker
    Peer {
        #[arg(short, long)]
        port: u16,
    },

    /// Register a peer with the tracker, which starts its listener
    Register {
        #[arg(value_name = "HOST:PORT")]
        peer: Peer,
    },

    /// List peers known to the tracker
    Peers,

    /// List files known to the tracker
    Files,

    /// Show which peers hold each chunk of a file
    File {
        name: String,
    },

    /// Show tracker health
    Health,

    /// Stop the peer process serving a port
    Shutdown {
        port: u16,
    },

    /// Split a file into chunks, store them on a peer and announce it
    Upload {
        #[arg(long, value_name = "HOST:PORT")]
        peer: Peer,

        #[arg(long, value_name = "/path/to/file")]
        file: PathBuf,

        /// Name to announce, defaults to the file name
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Fetch all chunks of a file from the peers holding them
    Download {
        #[arg(long)]
        name: String,

        #[arg(long, value_name = "/path/to/output")]
        output: PathBuf,

        /// Also store every fetched chunk on this peer and report it
        #[arg(long, value_name = "HOST:PORT")]
        reseed: Option<Peer>,
    },
}

pub struct App {
    config: Config,
    config_path: Option<String>,
    verbose: u8,
    shutdown_rx: UnboundedReceiver<()>,
}

impl App {
    pub fn new(
        config: Config,
        config_path: Option<String>,
        verbose: u8,
        shutdown_rx: UnboundedReceiver<()>,
    ) -> Self {
        Self {
            config,
            config_path,
            verbose,
            shutdown_rx,
        }
    }

    pub async fn start(self, command: Command) -> Result<()> {
        match command {
            Command::Tracker => self.start_tracker().await,
            Command::Peer { port } => self.start_peer(port).await,
            command => self.run_client(command).await,
        }
    }

    async fn start_tracker(mut self) -> Result<()> {
        let launcher = self.launcher()?;
        let config = self.config.tracker.clone();

        let tracker = Arc::new(Tracker::new(
            launcher,
            Duration::from_millis(config.startup_delay),
            config.max_announced_chunks,
        ));

        let server_tracker = Arc::clone(&tracker);
        let server = tokio::spawn(async move {
            start_server(
                &config.listen,
                config.tls,
                config.certificate,
                config.privkey,
                server_tracker,
            ).await
        });

        let result = tokio::select! {
            result = server => match result {
                Ok(Ok(())) => Err(anyhow!("tracker server stopped")),
                Ok(Err(e)) => Err(anyhow!("tracker server exited unexpectedly: {e}")),
                Err(e) => Err(anyhow!("tracker server exited unexpectedly: {e}")),
            },
            _ = self.shutdown_rx.recv() => Ok(()),
        };

        info!("Stopping peer processes. ");
        tracker.shutdown_all().await;

        result
    }

    async fn start_peer(mut self, port: u16) -> Result<()> {
        let config = self.config.peer.clone();
        let listen = Peer::new(config.listen_host.clone(), port).socket_addr()?;
        let server_config = server_config(&config.certificate, &config.privkey)?;

        let store = Arc::new(ChunkStore::default());
        let server = tokio::spawn(start_peer_server(
            listen,
            server_config,
            Arc::clone(&store),
            config.max_frame_size,
        ));

        tokio::select! {
            result = server => match result {
                Ok(Ok(())) => Err(anyhow!("peer listener stopped")),
                Ok(Err(e)) => Err(anyhow!("peer listener exited unexpectedly: {e}")),
                Err(e) => Err(anyhow!("peer listener exited unexpectedly: {e}")),
            },
            _ = self.shutdown_rx.recv() => {
                let (files, chunks) = store.summary()?;
                info!("Peer on port {port} stopping with {chunks} chunk(s) of {files} file(s). ");
                Ok(())
            },
        }
    }

    async fn run_client(self, command: Command) -> Result<()> {
        let tracker = self.tracker_client()?;
        let config = self.config.client.clone();
        let mut shutdown_rx = self.shutdown_rx;

        let job = client_command(command, &tracker, &config);
        until_interrupted(&mut shutdown_rx, job).await
    }

    /// Spawns peers with the configured program, or with this executable
    /// running `peer --port {port}` under the same configuration.
    fn launcher(&self) -> Result<Launcher> {
        let config = &self.config.tracker;

        if let Some(program) = &config.launcher_program {
            let args = config.launcher_args.clone().unwrap_or_default();
            return Ok(Launcher::new(program.clone(), args));
        }

        let program = env::current_exe()?
            .to_str()
            .ok_or(anyhow!("executable path is not valid UTF-8"))?
            .to_string();

        let mut args = vec![];
        if let Some(config_path) = &self.config_path {
            args.push(String::from("--config"));
            args.push(config_path.clone());
        }

        if self.verbose > 0 {
            args.push(format!("-{}", "v".repeat(self.verbose as usize)));
        }

        args.extend(["peer", "--port", "{port}"].map(String::from));

        Ok(Launcher::new(program, args))
    }

    fn tracker_client(&self) -> Result<TrackerClient> {
        let client = Client::builder()
            .timeout(Duration::from_secs(self.config.client.timeout))
            .build()?;

        Ok(TrackerClient::new(client, self.config.client.tracker.clone()))
    }
}

async fn client_command(command: Command, tracker: &TrackerClient, config: &ClientConfig) -> Result<()> {
    match command {
        Command::Register { peer } => println!("{}", tracker.register(&peer).await?),
        Command::Peers => print_json(&tracker.peers().await?)?,
        Command::Files => print_json(&tracker.list_files().await?)?,
        Command::File { name } => {
            let chunks = tracker
                .get_file(&name)
                .await?
                .ok_or(anyhow!("file {name} is not known to the tracker"))?;
            print_json(&chunks)?;
        },
        Command::Health => print_json(&tracker.health().await?)?,
        Command::Shutdown { port } => {
            if !tracker.shutdown(port).await? {
                return Err(anyhow!("no peer running on port {port}"));
            }
            println!("Shutdown peer on port {port}");
        },
        Command::Upload { peer, file, name, chunk_size } => {
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .and_then(|name| name.to_str())
                    .ok_or(anyhow!("cannot derive a name from {}", file.display()))?
                    .to_string(),
            };
            let client = peer_client(config)?;
            let chunk_size = chunk_size.unwrap_or(config.chunk_size);
            let chunks = upload(tracker, &client, &peer, &file, &name, chunk_size, config.max_frame_size).await?;
            println!("Uploaded {name} as {chunks} chunk(s) to {peer}");
        },
        Command::Download { name, output, reseed } => {
            let client = peer_client(config)?;
            let written = download(tracker, &client, &name, &output, reseed.as_ref()).await?;
            println!("Downloaded {name} ({written} bytes) to {}", output.display());
        },
        Command::Tracker | Command::Peer { .. } => return Err(anyhow!("not a client command")),
    }

    Ok(())
}

fn peer_client(config: &ClientConfig) -> Result<PeerClient> {
    PeerClient::new(&config.certificate, config.server_name.clone(), config.max_frame_size)
}

async fn until_interrupted<F>(shutdown_rx: &mut UnboundedReceiver<()>, job: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    tokio::select! {
        result = job => result,
        _ = shutdown_rx.recv() => {
            warn!("Interrupted before completion. ");
            Err(anyhow!("interrupted"))
        },
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::unbounded_channel;

    use super::*;

    fn app(config: Config, config_path: Option<String>, verbose: u8) -> App {
        let (_, rx) = unbounded_channel();
        App::new(config, config_path, verbose, rx)
    }

    #[test]
    fn default_launcher_respawns_this_executable() {
        let launcher = app(Config::default(), Some("chunkmesh.yaml".into()), 2).launcher().unwrap();
        let expected = format!("{:?}", Launcher::new(
            env::current_exe().unwrap().to_str().unwrap().to_string(),
            ["--config", "chunkmesh.yaml", "-vv", "peer", "--port", "{port}"].map(String::from).to_vec(),
        ));

        assert_eq!(format!("{launcher:?}"), expected);
    }

    #[test]
    fn configured_launcher_is_used_verbatim() {
        let config = Config::parse("tracker: {launcher_program: sleep, launcher_args: ['60']}").unwrap();
        let launcher = app(config, None, 0).launcher().unwrap();

        assert_eq!(format!("{launcher:?}"), format!("{:?}", Launcher::new("sleep".into(), vec!["60".into()])));
    }

    #[tokio::test]
    async fn interruption_cancels_client_jobs() {
        let (tx, mut rx) = unbounded_channel();
        tx.send(()).unwrap();

        let result = until_interrupted(&mut rx, std::future::pending::<Result<()>>()).await;
        assert!(result.is_err());
    }
}
