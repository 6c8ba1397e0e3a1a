//! One background worker per Dante service (ARC, CMC, Settings, Volume):
//! a bound UDP socket, a send queue, a pending-message table keyed by
//! message index, and a reader/writer thread pair bounded by a quantum so
//! shutdown stays cooperative.

use std::net::{SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, warn};

use crate::codec::decode_u16;
use crate::error::TransportError;
use crate::message::{MessageIndex, MessageType, PendingEntry, PendingTable};

/// Timing knobs shared by every service socket.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Readiness-wait quantum; bounds how long shutdown can take to notice.
    pub quantum: Duration,
    /// How long a pending request may sit unanswered before it's purged.
    pub pending_deadline: Duration,
    /// recv buffer size per datagram.
    pub recv_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quantum: Duration::from_millis(200),
            pending_deadline: Duration::from_secs(1),
            recv_buffer_size: 1024,
        }
    }
}

/// Called on the reader thread whenever a `SEND`-typed (unsolicited) frame
/// arrives — e.g. volume-level pushes. Runs on the service's own thread, so
/// it must not block.
pub type PushHandler = Box<dyn Fn(SocketAddrV4, Vec<u8>) + Send>;

/// A running service socket: reader + writer threads, a send queue, and the
/// pending-message table they share with the owning service's command
/// builders.
pub struct ServiceHandle {
    send_tx: mpsc::Sender<(SocketAddrV4, Vec<u8>)>,
    pending: Arc<Mutex<PendingTable>>,
    message_index: Arc<Mutex<MessageIndex>>,
    shutdown: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    local_port: u16,
}

impl ServiceHandle {
    /// Bind `"0.0.0.0:local_port"` and spawn the reader/writer thread pair.
    /// `on_push` handles unsolicited (`SEND`-typed) frames; services that
    /// don't expect pushes can pass a no-op closure that just logs.
    pub fn spawn(
        local_port: u16,
        config: EngineConfig,
        on_push: PushHandler,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(("0.0.0.0", local_port)).map_err(|source| {
            TransportError::Bind {
                port: local_port,
                source,
            }
        })?;
        socket
            .set_read_timeout(Some(config.quantum))
            .map_err(|source| TransportError::Bind {
                port: local_port,
                source,
            })?;
        let reader_socket = socket.try_clone().map_err(|source| TransportError::Bind {
            port: local_port,
            source,
        })?;
        let bound_port = socket
            .local_addr()
            .map_err(|source| TransportError::Bind {
                port: local_port,
                source,
            })?
            .port();

        let pending = Arc::new(Mutex::new(PendingTable::new()));
        let message_index = Arc::new(Mutex::new(MessageIndex::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (send_tx, send_rx) = mpsc::channel::<(SocketAddrV4, Vec<u8>)>();

        let reader = {
            let pending = Arc::clone(&pending);
            let shutdown = Arc::clone(&shutdown);
            let recv_buffer_size = config.recv_buffer_size;
            std::thread::spawn(move || {
                read_loop(reader_socket, pending, shutdown, recv_buffer_size, on_push)
            })
        };

        let writer = {
            let shutdown = Arc::clone(&shutdown);
            let quantum = config.quantum;
            std::thread::spawn(move || write_loop(socket, send_rx, shutdown, quantum))
        };

        Ok(Self {
            send_tx,
            pending,
            message_index,
            shutdown,
            reader: Some(reader),
            writer: Some(writer),
            local_port: bound_port,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn next_message_index(&self) -> u16 {
        self.message_index
            .lock()
            .expect("message index mutex poisoned")
            .generate()
    }

    /// Register a pending entry so the reader thread can correlate the
    /// eventual response, then enqueue the bytes for the writer thread.
    pub fn send(
        &self,
        destination: SocketAddrV4,
        index: u16,
        entry: PendingEntry,
        bytes: Vec<u8>,
    ) {
        self.pending
            .lock()
            .expect("pending table mutex poisoned")
            .insert(index, entry);
        // An mpsc send only fails if the writer thread has already exited,
        // which only happens after shutdown(); the pending entry is simply
        // left to expire via purge_expired in that case.
        let _ = self.send_tx.send((destination, bytes));
    }

    /// Drop pending entries older than the configured deadline. Call this
    /// periodically from the owning façade/event loop.
    pub fn purge_expired(&self, deadline: Duration) -> usize {
        self.pending
            .lock()
            .expect("pending table mutex poisoned")
            .purge_expired(deadline)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().expect("pending table mutex poisoned").len()
    }

    /// Cooperative shutdown: flip the flag, wait out the quantum, join both
    /// threads.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.writer.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn read_loop(
    socket: UdpSocket,
    pending: Arc<Mutex<PendingTable>>,
    shutdown: Arc<AtomicBool>,
    recv_buffer_size: usize,
    on_push: PushHandler,
) {
    let mut buf = vec![0u8; recv_buffer_size];
    while !shutdown.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((n, addr)) => {
                let std::net::SocketAddr::V4(addr) = addr else {
                    continue;
                };
                let message = buf[..n].to_vec();
                handle_received(&pending, addr, message, &on_push);
            }
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(err) => {
                error!("service socket read error: {err}");
            }
        }
    }
}

fn handle_received(
    pending: &Arc<Mutex<PendingTable>>,
    addr: SocketAddrV4,
    message: Vec<u8>,
    on_push: &PushHandler,
) {
    let Ok(index) = decode_u16(&message, 4) else {
        warn!("dropping malformed frame from {addr}: too short to contain a message index");
        return;
    };
    let type_bytes = match message.get(8..10) {
        Some([a, b]) => [*a, *b],
        _ => {
            warn!("dropping malformed frame from {addr}: too short to contain a direction");
            return;
        }
    };

    match MessageType::from_bytes(type_bytes) {
        Some(MessageType::Send) => {
            debug!("unsolicited frame from {addr}, index {index}");
            on_push(addr, message);
        }
        Some(MessageType::Recv) => {
            let entry = pending.lock().expect("pending table mutex poisoned").take(index);
            match entry {
                Some(entry) => {
                    if let Some(callback) = entry.callback {
                        callback(&message);
                    }
                }
                None => {
                    warn!("received a response from {addr} to a message not sent: index {index}");
                }
            }
        }
        None => {
            warn!("frame from {addr} has unknown direction bytes {type_bytes:?}");
        }
    }
}

fn write_loop(
    socket: UdpSocket,
    send_rx: mpsc::Receiver<(SocketAddrV4, Vec<u8>)>,
    shutdown: Arc<AtomicBool>,
    quantum: Duration,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match send_rx.recv_timeout(quantum) {
            Ok((destination, bytes)) => {
                if let Err(source) = socket.send_to(&bytes, destination) {
                    error!("{}", TransportError::Send { destination, source });
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    fn free_port() -> u16 {
        UdpSocket::bind("0.0.0.0:0").unwrap().local_addr().unwrap().port()
    }

    #[test]
    fn request_response_round_trip() {
        let config = EngineConfig {
            quantum: Duration::from_millis(50),
            ..EngineConfig::default()
        };

        let peer_port = free_port();
        let peer_socket = UdpSocket::bind(("127.0.0.1", peer_port)).unwrap();

        let mut handle =
            ServiceHandle::spawn(0, config, Box::new(|_, _| {})).expect("spawn service");
        let service_port = handle.local_port();

        let (cb_tx, cb_rx) = channel();
        let index = handle.next_message_index();
        let destination = SocketAddrV4::new(std::net::Ipv4Addr::LOCALHOST, peer_port);

        let mut frame = vec![0u8; 10];
        frame[4..6].copy_from_slice(&index.to_be_bytes());
        frame[8..10].copy_from_slice(&MessageType::Send.to_bytes());

        handle.send(
            destination,
            index,
            PendingEntry {
                command_code: [0x10, 0x00],
                original_bytes: frame.clone(),
                callback: Some(Box::new(move |resp: &[u8]| {
                    cb_tx.send(resp.to_vec()).unwrap();
                })),
                enqueued_at: std::time::Instant::now(),
            },
            frame,
        );

        let received = {
            let mut buf = [0u8; 1024];
            let (n, _addr) = peer_socket.recv_from(&mut buf).expect("peer recv");
            buf[..n].to_vec()
        };
        assert_eq!(decode_u16(&received, 4).unwrap(), index);

        let mut reply = received.clone();
        reply[8..10].copy_from_slice(&MessageType::Recv.to_bytes());
        peer_socket
            .send_to(&reply, ("127.0.0.1", service_port))
            .unwrap();

        let got = cb_rx.recv_timeout(Duration::from_secs(1)).expect("callback fired");
        assert_eq!(got, reply);

        handle.shutdown();
    }

    #[test]
    fn unsolicited_send_frame_invokes_push_handler() {
        let config = EngineConfig {
            quantum: Duration::from_millis(50),
            ..EngineConfig::default()
        };
        let (push_tx, push_rx) = channel();
        let mut handle = ServiceHandle::spawn(
            0,
            config,
            Box::new(move |addr, bytes| {
                push_tx.send((addr, bytes)).unwrap();
            }),
        )
        .expect("spawn service");

        let local_port = handle.local_port();
        let sender = UdpSocket::bind("0.0.0.0:0").unwrap();
        let mut frame = vec![0u8; 10];
        frame[8..10].copy_from_slice(&MessageType::Send.to_bytes());
        sender
            .send_to(&frame, ("127.0.0.1", local_port))
            .unwrap();

        let (_, bytes) = push_rx.recv_timeout(Duration::from_secs(1)).expect("push delivered");
        assert_eq!(bytes, frame);

        handle.shutdown();
    }

    #[test]
    fn unmatched_response_is_dropped_without_panic() {
        let config = EngineConfig {
            quantum: Duration::from_millis(50),
            ..EngineConfig::default()
        };
        let mut handle = ServiceHandle::spawn(0, config, Box::new(|_, _| {})).expect("spawn service");
        let local_port = handle.local_port();
        let sender = UdpSocket::bind("0.0.0.0:0").unwrap();
        let mut frame = vec![0u8; 10];
        frame[4..6].copy_from_slice(&999u16.to_be_bytes());
        frame[8..10].copy_from_slice(&MessageType::Recv.to_bytes());
        sender.send_to(&frame, ("127.0.0.1", local_port)).unwrap();
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(handle.pending_len(), 0);
        handle.shutdown();
    }
}
