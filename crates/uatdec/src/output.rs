//! Message distribution and client outputs
//!
//! The [`Dispatch`] fans each batch of messages out to registered
//! clients. Handlers run synchronously on the dispatching thread and
//! deregister themselves by returning `false`; socket clients only
//! enqueue onto their connection's writer thread there, so a slow
//! client never stalls the pipeline (its queue overflows and drops
//! instead).
//!
//! Three client flavors exist: raw-format TCP (optionally preceded by
//! a metadata header line), JSON TCP (downlink messages only), and
//! the stdout mirrors of both.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use crossbeam_channel::{bounded, Receiver, TrySendError};
use log::{debug, info, warn};

use uat978::{AdsbMessage, RawMessage};

use crate::cli::ListenAddress;

/// Messages shared between all clients of a dispatch
pub type SharedMessages = Arc<Vec<RawMessage>>;

/// What a client connection speaks
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Raw message lines
    Raw,

    /// JSON lines, downlink messages only
    Json,
}

impl OutputFormat {
    // render a batch for one client; None means nothing to send
    fn render(&self, messages: &[RawMessage]) -> Option<String> {
        let mut out = String::new();
        match self {
            OutputFormat::Raw => {
                for message in messages {
                    out.push_str(&message.to_string());
                    out.push('\n');
                }
            }
            OutputFormat::Json => {
                for message in messages.iter().filter(|m| m.is_downlink()) {
                    match AdsbMessage::decode(message) {
                        Ok(decoded) => {
                            out.push_str(&decoded.to_json().to_string());
                            out.push('\n');
                        }
                        Err(e) => debug!("undecodable downlink skipped: {e}"),
                    }
                }
            }
        }
        (!out.is_empty()).then_some(out)
    }
}

// a handler returns false to deregister itself
type MessageHandler = Box<dyn FnMut(&SharedMessages) -> bool + Send>;

/// Client registry and fan-out point
pub struct Dispatch {
    clients: Mutex<ClientMap>,
}

#[derive(Default)]
struct ClientMap {
    next_handle: u64,
    clients: HashMap<u64, MessageHandler>,
}

impl Dispatch {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(ClientMap::default()),
        }
    }

    /// Register a message handler; returns a handle for removal
    pub fn add_client(&self, handler: MessageHandler) -> u64 {
        let mut map = self.clients.lock().expect("client map poisoned");
        let handle = map.next_handle;
        map.next_handle += 1;
        map.clients.insert(handle, handler);
        handle
    }

    /// Deregister a client
    pub fn remove_client(&self, handle: u64) {
        let mut map = self.clients.lock().expect("client map poisoned");
        map.clients.remove(&handle);
    }

    /// Hand a batch of messages to every registered client
    pub fn dispatch(&self, messages: &SharedMessages) {
        let mut map = self.clients.lock().expect("client map poisoned");
        map.clients.retain(|_, handler| handler(messages));
    }

    #[cfg(test)]
    fn client_count(&self) -> usize {
        self.clients.lock().expect("client map poisoned").clients.len()
    }
}

impl Default for Dispatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Mirror messages onto stdout
pub fn add_stdout_client(dispatch: &Dispatch, format: OutputFormat) {
    dispatch.add_client(Box::new(move |messages| {
        if let Some(out) = format.render(messages) {
            let stdout = std::io::stdout();
            let mut stdout = stdout.lock();
            stdout.write_all(out.as_bytes()).is_ok() && stdout.flush().is_ok()
        } else {
            true
        }
    }));
}

/// Start a TCP listener serving `format` to every accepted client
///
/// `header` is sent once to each new connection before any live
/// messages (the raw-port metadata header). Binding failures are
/// errors; per-connection failures only drop that connection.
pub fn spawn_listener(
    address: &ListenAddress,
    format: OutputFormat,
    header: Option<SharedMessages>,
    dispatch: Arc<Dispatch>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind((address.host.as_str(), address.port))
        .with_context(|| format!("could not listen on {address}"))?;
    info!("{address}: listening for connections");

    let address = address.clone();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(socket) => {
                    let peer = socket
                        .peer_addr()
                        .map(|a| a.to_string())
                        .unwrap_or_else(|_| "<unknown>".to_owned());
                    info!("{address}: accepted a connection from {peer}");
                    if let Err(e) = start_client(socket, peer, format, header.clone(), &dispatch) {
                        warn!("{address}: client setup failed: {e}");
                    }
                }
                Err(e) => warn!("{address}: accept error: {e}"),
            }
        }
    });

    Ok(())
}

// per-client writer queue depth; overflow drops the batch
const CLIENT_QUEUE_DEPTH: usize = 512;

fn start_client(
    socket: TcpStream,
    peer: String,
    format: OutputFormat,
    header: Option<SharedMessages>,
    dispatch: &Arc<Dispatch>,
) -> anyhow::Result<()> {
    let (tx, rx) = bounded::<SharedMessages>(CLIENT_QUEUE_DEPTH);

    let writer = socket.try_clone().context("could not clone socket")?;
    let handle = dispatch.add_client(Box::new(move |messages| {
        match tx.try_send(messages.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                // slow client; drop this batch rather than stall
                debug!("client queue full; dropping a batch");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }));

    {
        let peer = peer.clone();
        let dispatch = dispatch.clone();
        std::thread::spawn(move || {
            run_client_writer(writer, format, header, rx);
            dispatch.remove_client(handle);
            info!("{peer}: connection closed");
        });
    }

    // reads are drained and discarded so disconnects are noticed
    // promptly even on an idle stream
    let mut reader = socket;
    std::thread::spawn(move || {
        let mut sink = [0u8; 512];
        loop {
            match reader.read(&mut sink) {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
        let _ = reader.shutdown(std::net::Shutdown::Both);
    });

    Ok(())
}

fn run_client_writer(
    mut socket: TcpStream,
    format: OutputFormat,
    header: Option<SharedMessages>,
    rx: Receiver<SharedMessages>,
) {
    if let Some(header) = header {
        if let Some(out) = OutputFormat::Raw.render(&header) {
            if socket.write_all(out.as_bytes()).is_err() {
                return;
            }
        }
    }

    for messages in rx {
        let Some(out) = format.render(&messages) else {
            continue;
        };
        if socket.write_all(out.as_bytes()).is_err() {
            return;
        }
    }
}

/// The metadata header served on raw ports
pub fn metadata_header() -> SharedMessages {
    let mut metadata = uat978::MetadataMap::new();
    metadata.insert("program".to_owned(), env!("CARGO_PKG_NAME").to_owned());
    metadata.insert("version".to_owned(), env!("CARGO_PKG_VERSION").to_owned());
    // the Reed-Solomon decoder validates corrected blocks
    metadata.insert("fecfix".to_owned(), "1".to_owned());
    Arc::new(vec![RawMessage::Metadata(metadata)])
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::BufRead;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn downlink() -> RawMessage {
        RawMessage::from_payload(vec![0x11; 18], 1_700_000_000_500, 1, -10.0, None)
            .expect("construct failure")
    }

    fn uplink() -> RawMessage {
        RawMessage::from_payload(vec![0x22; 432], 0, 0, 0.0, None).expect("construct failure")
    }

    #[test]
    fn test_render_raw() {
        let out = OutputFormat::Raw
            .render(&[downlink(), uplink()])
            .expect("expected output");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('-'));
        assert!(lines[1].starts_with('+'));
    }

    #[test]
    fn test_render_json_downlink_only() {
        let out = OutputFormat::Json
            .render(&[downlink(), uplink()])
            .expect("expected output");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 1);

        let value: serde_json::Value = serde_json::from_str(lines[0]).expect("parse failure");
        assert_eq!(value["metadata"]["errors"], 1);

        assert_eq!(OutputFormat::Json.render(&[uplink()]), None);
    }

    #[test]
    fn test_dispatch_add_remove() {
        let dispatch = Dispatch::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let seen2 = seen.clone();
        let handle = dispatch.add_client(Box::new(move |messages| {
            seen2.fetch_add(messages.len(), Ordering::Relaxed);
            true
        }));

        dispatch.dispatch(&Arc::new(vec![downlink(), uplink()]));
        assert_eq!(seen.load(Ordering::Relaxed), 2);

        dispatch.remove_client(handle);
        dispatch.dispatch(&Arc::new(vec![downlink()]));
        assert_eq!(seen.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_dispatch_drops_finished_clients() {
        let dispatch = Dispatch::new();
        dispatch.add_client(Box::new(|_| false));
        dispatch.add_client(Box::new(|_| true));
        assert_eq!(dispatch.client_count(), 2);

        dispatch.dispatch(&Arc::new(vec![downlink()]));
        assert_eq!(dispatch.client_count(), 1);
    }

    #[test]
    fn test_listener_serves_header_and_messages() {
        let dispatch = Arc::new(Dispatch::new());
        let address: ListenAddress = "127.0.0.1:0".parse().expect("parse failure");

        // bind on an ephemeral port by hand so we know where to connect
        let listener = TcpListener::bind((address.host.as_str(), 0)).expect("bind failure");
        let port = listener.local_addr().expect("local addr").port();
        {
            let dispatch = dispatch.clone();
            std::thread::spawn(move || {
                for stream in listener.incoming() {
                    let socket = stream.expect("accept failure");
                    let peer = socket.peer_addr().expect("peer addr").to_string();
                    start_client(
                        socket,
                        peer,
                        OutputFormat::Raw,
                        Some(metadata_header()),
                        &dispatch,
                    )
                    .expect("client setup failure");
                }
            });
        }

        let client = TcpStream::connect(("127.0.0.1", port)).expect("connect failure");
        let mut lines = std::io::BufReader::new(client);

        let mut header = String::new();
        lines.read_line(&mut header).expect("read failure");
        assert!(header.starts_with('!'), "header line: {header}");
        assert!(header.contains("fecfix=1"));

        // wait for the connection to register before dispatching
        while dispatch.client_count() == 0 {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        dispatch.dispatch(&Arc::new(vec![downlink()]));

        let mut line = String::new();
        lines.read_line(&mut line).expect("read failure");
        assert!(line.starts_with('-'), "message line: {line}");
    }
}
