use anyhow::Result;
use btchat::config::{ChatConfig, TransportMode};
use btchat::connection::{ConnectionEvent, ConnectionHandle, ConnectionManager};
use btchat::directory::{PeerDirectory, StaticDirectory};
use btchat::history::{FileHistoryStore, HistoryStore};
use btchat::transport::{BtDiscovery, RfcommTransport, TcpTransport, Transport};
use btchat_shared::{ChatHistory, ConnectionState, PeerIdentity};
use tokio::io::{AsyncBufReadExt, BufReader};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = ChatConfig::from_env()?;
    info!("BT2Chat starting: {}", config.device_name);
    info!("  History: {}", config.history_dir.display());

    match config.mode {
        TransportMode::Rfcomm => {
            let session = bluer::Session::new().await?;
            let adapter = BtDiscovery::get_adapter(&session).await?;
            let transport = RfcommTransport::new(session, adapter.clone(), config.rfcomm.clone());
            info!("  Transport: {} (channel {})", transport.name(), transport.channel());
            run(transport, BtDiscovery::new(adapter), config).await
        }
        TransportMode::TcpSimulation => {
            let transport = TcpTransport::new(config.tcp_listen.clone());
            info!("  Transport: {} ({})", transport.name(), transport.listen_addr());
            let directory = StaticDirectory::from_addresses(config.known_peers.clone());
            run(transport, directory, config).await
        }
    }
}

/// One line of terminal input
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Empty,
    Quit,
    Peers,
    Connect(&'a str),
    Listen,
    Stop,
    State,
    Help,
    Message(&'a str),
}

fn parse_line(line: &str) -> Input<'_> {
    let line = line.trim();
    let (command, arg) = match line.split_once(' ') {
        Some((command, arg)) => (command, arg.trim()),
        None => (line, ""),
    };

    match command {
        "" => Input::Empty,
        "/quit" => Input::Quit,
        "/peers" => Input::Peers,
        "/connect" => Input::Connect(arg),
        "/listen" => Input::Listen,
        "/stop" => Input::Stop,
        "/state" => Input::State,
        "/help" => Input::Help,
        _ => Input::Message(line),
    }
}

/// Chat session state owned by the front-end loop
struct Chat<D, H> {
    handle: ConnectionHandle,
    directory: D,
    history: H,
    /// Peers from the last `/peers` listing, for `/connect <n>`
    listed: Vec<PeerIdentity>,
    /// Peer of the current session
    peer: Option<PeerIdentity>,
}

async fn run<T, D>(transport: T, directory: D, config: ChatConfig) -> Result<()>
where
    T: Transport,
    D: PeerDirectory,
{
    let mut manager = ConnectionManager::new(transport, config.connection.clone());
    let mut chat = Chat {
        handle: manager.handle(),
        directory,
        history: FileHistoryStore::new(&config.history_dir),
        listed: Vec::new(),
        peer: None,
    };

    chat.handle.start().await?;
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = manager.recv() => match event {
                Some(event) => chat.handle_event(event).await,
                None => {
                    error!("Connection manager closed");
                    break;
                }
            },
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !chat.handle_line(line.trim()).await? {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    manager.stop().await?;
    info!("BT2Chat stopped");
    Ok(())
}

impl<D: PeerDirectory, H: HistoryStore> Chat<D, H> {
    async fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StateChanged(state) => {
                println!("* {}", state);
                if !state.is_connected() {
                    self.peer = None;
                }
            }
            ConnectionEvent::Connected { peer } => {
                println!("* Connected to {}", peer);
                match self.history.load(peer.name()).await {
                    Ok(doc) => {
                        for line in &doc.lines {
                            println!("  {}", line);
                        }
                    }
                    Err(e) => warn!("[HISTORY] Could not load history for {}: {:#}", peer, e),
                }
                self.peer = Some(peer);
            }
            ConnectionEvent::DataReceived(data) => {
                let text = String::from_utf8_lossy(&data).into_owned();
                let name = self
                    .peer
                    .as_ref()
                    .map_or_else(|| "?".to_string(), |p| p.name().to_string());
                println!("{}:  {}", name, text);
                self.record(|doc| doc.push_incoming(&name, &text)).await;
            }
            ConnectionEvent::DataSent(data) => {
                let text = String::from_utf8_lossy(&data).into_owned();
                println!("Me: {}", text);
                self.record(|doc| doc.push_outgoing(&text)).await;
            }
            ConnectionEvent::TransientFailure { reason } => {
                println!("! {}", reason);
            }
            ConnectionEvent::ListenFailed { reason } => {
                println!("! {} (use /listen to retry)", reason);
            }
        }
    }

    /// Append to the current peer's history and persist it
    async fn record(&mut self, update: impl FnOnce(&mut ChatHistory)) {
        let Some(name) = self.peer.as_ref().map(|p| p.name().to_string()) else {
            return;
        };

        if let Err(e) = self.append(&name, update).await {
            warn!("[HISTORY] Could not save history for {}: {:#}", name, e);
        }
    }

    async fn append(&mut self, name: &str, update: impl FnOnce(&mut ChatHistory)) -> Result<()> {
        let mut doc = self.history.load(name).await?;
        update(&mut doc);
        self.history.replace(name, doc).await?;
        self.history.save().await
    }

    /// Handle one line of user input; returns false to quit
    async fn handle_line(&mut self, line: &str) -> Result<bool> {
        match parse_line(line) {
            Input::Empty => println!("Error: No text sent"),
            Input::Quit => return Ok(false),
            Input::Peers => self.list_peers().await,
            Input::Connect(arg) => {
                if let Some(peer) = self.resolve_peer(arg).await {
                    println!("* Connecting to {}", peer);
                    self.handle.connect(peer).await?;
                } else {
                    println!("usage: /connect <number|address>");
                }
            }
            Input::Listen => self.handle.start().await?,
            Input::Stop => self.handle.stop().await?,
            Input::State => println!("* {}", self.handle.current_state()),
            Input::Help => print_help(),
            Input::Message(text) => {
                if self.handle.current_state() == ConnectionState::Connected {
                    self.handle.write(text.as_bytes().to_vec()).await?;
                } else {
                    println!("Connection lost");
                }
            }
        }
        Ok(true)
    }

    async fn list_peers(&mut self) {
        match self.directory.known_peers().await {
            Ok(peers) if peers.is_empty() => println!("No known peers"),
            Ok(peers) => {
                for (i, peer) in peers.iter().enumerate() {
                    println!("  {}. {}", i + 1, peer);
                }
                self.listed = peers;
            }
            Err(e) => println!("! Could not list peers: {:#}", e),
        }
    }

    /// Resolve `/connect` argument: a 1-based index into the last listing or an address
    async fn resolve_peer(&mut self, arg: &str) -> Option<PeerIdentity> {
        if arg.is_empty() {
            return None;
        }

        if let Ok(n) = arg.parse::<usize>() {
            return n.checked_sub(1).and_then(|i| self.listed.get(i)).cloned();
        }

        let known = match self.directory.known_peers().await {
            Ok(peers) => peers,
            Err(e) => {
                warn!("Could not list peers: {:#}", e);
                Vec::new()
            }
        };
        Some(
            known
                .into_iter()
                .find(|p| p.address().eq_ignore_ascii_case(arg))
                .unwrap_or_else(|| PeerIdentity::unnamed(arg)),
        )
    }
}

fn print_help() {
    println!("Commands: /peers  /connect <n|addr>  /listen  /stop  /state  /quit");
    println!("Anything else is sent to the connected peer.");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_lines_are_empty_input() {
        assert_eq!(parse_line(""), Input::Empty);
        assert_eq!(parse_line("   "), Input::Empty);
    }

    #[test]
    fn test_commands() {
        assert_eq!(parse_line("/quit"), Input::Quit);
        assert_eq!(parse_line("/peers"), Input::Peers);
        assert_eq!(parse_line("/connect 2"), Input::Connect("2"));
        assert_eq!(parse_line("/connect  00:11:22:33:44:55 "), Input::Connect("00:11:22:33:44:55"));
        assert_eq!(parse_line("/connect"), Input::Connect(""));
        assert_eq!(parse_line("/state"), Input::State);
    }

    #[test]
    fn test_other_text_is_a_message() {
        assert_eq!(parse_line("hello there"), Input::Message("hello there"));
        assert_eq!(parse_line("/unknown x"), Input::Message("/unknown x"));
    }
}
