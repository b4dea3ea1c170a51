//! [`SerialLink`] – the owned half-duplex link instance.
//!
//! One `SerialLink` exists per controller. It owns the raw port handle, the
//! split-write busy lock, the FIFO pending-command queue, and the frame
//! parser buffer; nothing else touches them. Other components observe the
//! link exclusively through [`SerialLink::subscribe`], which yields decoded
//! input events and command failures.
//!
//! # Write discipline
//!
//! The controller's receive buffer cannot absorb a full multi-byte command
//! atomically, so every command is written as byte 0, a ~50 ms settle
//! delay, then the remainder, then a ~10 ms trailing delay before the busy
//! lock is released. The busy lock is a fair [`tokio::sync::Mutex`]:
//! waiters wake in FIFO order, so a stream of LED writes cannot starve a
//! pending read indefinitely — the read's own 2000 ms deadline bounds the
//! total wait.
//!
//! # Correlation
//!
//! Read commands are correlated to response frames strictly by arrival
//! order: resolution always pops the head of the pending queue, never
//! searches by content. **Both frame kinds satisfy pending reads** — an ack
//! frame arriving while a read is outstanding resolves it with the latest
//! known input value. Callers that care about response identity must not
//! issue overlapping reads.

use std::collections::VecDeque;
use std::io::Read;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use strike_types::{InputEvent, StrikeError};
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::frame::{decode_input_event, Frame, FrameParser, ACK_SUCCESS, POLL_GROUP};

/// The read command: a bare `I`, no payload.
const READ_COMMAND: &str = "I";

/// Capacity of the link-event broadcast channel.
const EVENT_CAPACITY: usize = 64;

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Tunables of the physical link. Defaults reflect the deployed controller.
#[derive(Debug, Clone)]
pub struct SerialLinkConfig {
    /// USB vendor id (lowercase hex, no prefix) used to auto-select the
    /// controller's port at startup.
    pub vendor_id: String,
    pub baud_rate: u32,
    /// Delay between the 1-byte prefix write and the remainder.
    pub prefix_settle: Duration,
    /// Delay after the remainder before the busy lock is released.
    pub trailing_delay: Duration,
    /// Per-read deadline before the pending command is rejected.
    pub read_timeout: Duration,
    /// Bootloader reset settle after opening, before the first command.
    pub startup_settle: Duration,
}

impl Default for SerialLinkConfig {
    fn default() -> Self {
        Self {
            vendor_id: "2341".to_string(),
            baud_rate: 9600,
            prefix_settle: Duration::from_millis(50),
            trailing_delay: Duration::from_millis(10),
            read_timeout: Duration::from_millis(2000),
            startup_settle: Duration::from_secs(5),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Raw port abstraction
// ────────────────────────────────────────────────────────────────────────────

/// Minimal byte-sink interface over the physical port, so the link logic can
/// be exercised against a recording double without hardware.
pub trait RawPort: Send {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl RawPort for Box<dyn serialport::SerialPort> {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        std::io::Write::write_all(self, buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::Write::flush(self)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Link events
// ────────────────────────────────────────────────────────────────────────────

/// What subscribers observe on the link: decoded device input events and
/// command failures (rejected acks, read timeouts).
#[derive(Debug, Clone)]
pub enum LinkEvent {
    Input(InputEvent),
    CommandFailed { reason: String },
}

// ────────────────────────────────────────────────────────────────────────────
// Pending commands
// ────────────────────────────────────────────────────────────────────────────

struct PendingCommand {
    id: u64,
    created_at: Instant,
    tx: oneshot::Sender<u16>,
}

// ────────────────────────────────────────────────────────────────────────────
// SerialLink
// ────────────────────────────────────────────────────────────────────────────

/// The owned serial link. See the module docs for the concurrency rules.
pub struct SerialLink {
    config: SerialLinkConfig,
    port: StdMutex<Option<Box<dyn RawPort>>>,
    /// Busy lock: at most one in-flight multi-part physical write.
    write_lock: Mutex<()>,
    /// Read commands dispatch sequentially; their waits overlap.
    read_dispatch: Mutex<()>,
    pending: StdMutex<VecDeque<PendingCommand>>,
    parser: StdMutex<FrameParser>,
    /// Most recently decoded poll-group bitmask; read futures resolve with
    /// this value.
    latest_input: AtomicU16,
    next_id: AtomicU64,
    events: broadcast::Sender<LinkEvent>,
}

impl SerialLink {
    /// Create a link with no port attached. Writes fail with
    /// [`StrikeError::PortUnavailable`] until [`attach_port`][Self::attach_port]
    /// is called.
    pub fn new(config: SerialLinkConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            config,
            port: StdMutex::new(None),
            write_lock: Mutex::new(()),
            read_dispatch: Mutex::new(()),
            pending: StdMutex::new(VecDeque::new()),
            parser: StdMutex::new(FrameParser::new()),
            latest_input: AtomicU16::new(0),
            next_id: AtomicU64::new(0),
            events,
        })
    }

    /// Discover the controller by USB vendor id, open it, wait out the
    /// bootloader reset, and start the reader thread.
    pub async fn open(config: SerialLinkConfig) -> Result<Arc<Self>, StrikeError> {
        let path = find_port(&config.vendor_id)?;
        info!(port = %path, baud = config.baud_rate, "opening controller serial port");

        let port = serialport::new(&path, config.baud_rate)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| StrikeError::PortUnavailable(format!("{path}: {e}")))?;
        let reader = port
            .try_clone()
            .map_err(|e| StrikeError::PortUnavailable(format!("{path}: {e}")))?;

        let startup_settle = config.startup_settle;
        let link = Self::new(config);
        link.attach_port(Box::new(port));

        // The board resets when the port opens; commands sent before the
        // bootloader hands over are lost.
        tokio::time::sleep(startup_settle).await;

        spawn_reader(Arc::clone(&link), reader);
        Ok(link)
    }

    /// Attach a raw port to a detached link (tests, late discovery).
    pub fn attach_port(&self, port: Box<dyn RawPort>) {
        *self.port.lock().expect("port lock poisoned") = Some(port);
    }

    /// Drop the port. Subsequent writes fail with `PortUnavailable`; the
    /// reader thread exits on its next wakeup.
    pub fn close(&self) {
        self.port.lock().expect("port lock poisoned").take();
    }

    pub fn is_open(&self) -> bool {
        self.port.lock().expect("port lock poisoned").is_some()
    }

    /// Subscribe to decoded input events and command failures.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// Most recently decoded poll-group input value.
    pub fn latest_input(&self) -> u16 {
        self.latest_input.load(Ordering::SeqCst)
    }

    // ── Commands ───────────────────────────────────────────────────────────

    /// Fire-and-forget output command. The write is dispatched on its own
    /// task under the busy lock; failures are logged, not surfaced, because
    /// LED writes are latency-sensitive and best-effort.
    pub fn send_write(self: &Arc<Self>, payload: impl Into<String>) {
        let payload = payload.into();
        let link = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = link.write_command(&payload).await {
                warn!(command = %payload, error = %e, "output command dropped");
            }
        });
    }

    /// Issue a read command and await the next response frame.
    ///
    /// Resolves with the most recently decoded input value, or fails with
    /// [`StrikeError::NoResponse`] once the deadline elapses — the command
    /// is removed from the queue on timeout so a late frame cannot
    /// mis-resolve a future request.
    pub async fn send_read(&self) -> Result<u16, StrikeError> {
        let timeout_ms = self.config.read_timeout.as_millis() as u64;

        // Sequential dispatch: the next read may not be written until this
        // one's command is on the wire. The guard is released before the
        // response wait so responses can be awaited concurrently.
        let dispatch = self.read_dispatch.lock().await;

        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .push_back(PendingCommand {
                id,
                created_at: Instant::now(),
                tx,
            });

        if let Err(e) = self.write_command(READ_COMMAND).await {
            self.remove_pending(id);
            return Err(e);
        }
        drop(dispatch);

        match tokio::time::timeout(self.config.read_timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(StrikeError::Channel(
                "serial link closed while awaiting response".to_string(),
            )),
            Err(_) => {
                self.remove_pending(id);
                self.emit(LinkEvent::CommandFailed {
                    reason: "no answer from controller".to_string(),
                });
                Err(StrikeError::NoResponse(timeout_ms))
            }
        }
    }

    /// Split-write a command under the busy lock.
    async fn write_command(&self, payload: &str) -> Result<(), StrikeError> {
        let bytes = payload.as_bytes();
        if bytes.is_empty() {
            return Ok(());
        }

        let _busy = self.write_lock.lock().await;
        debug!(command = %payload, "serial write");

        self.port_write(&bytes[..1])?;
        tokio::time::sleep(self.config.prefix_settle).await;
        if bytes.len() > 1 {
            self.port_write(&bytes[1..])?;
        }
        tokio::time::sleep(self.config.trailing_delay).await;
        Ok(())
    }

    fn port_write(&self, chunk: &[u8]) -> Result<(), StrikeError> {
        let mut guard = self.port.lock().expect("port lock poisoned");
        match guard.as_mut() {
            Some(port) => {
                port.write_all(chunk)?;
                port.flush()?;
                Ok(())
            }
            None => Err(StrikeError::PortUnavailable(
                "no serial port open".to_string(),
            )),
        }
    }

    // ── Inbound path ───────────────────────────────────────────────────────

    /// Feed raw bytes from the port into the parser and dispatch every
    /// complete frame. Called by the reader thread; public so tests can
    /// inject traffic directly.
    pub fn process_incoming(&self, bytes: &[u8]) {
        let frames = self
            .parser
            .lock()
            .expect("parser lock poisoned")
            .push(bytes);

        for frame in frames {
            match frame {
                Frame::Ack { status } => {
                    if status != ACK_SUCCESS {
                        warn!(status = %(status as char), "output command rejected");
                        self.emit(LinkEvent::CommandFailed {
                            reason: format!("ack status `{}`", status as char),
                        });
                    }
                    self.resolve_oldest();
                }
                Frame::Input { group, mask } => {
                    let decoded = decode_input_event(&group, &mask);
                    if let Some(event) = &decoded {
                        if event.code == POLL_GROUP {
                            self.latest_input.store(event.value, Ordering::SeqCst);
                        }
                    } else {
                        warn!(%group, %mask, "malformed input frame ignored");
                    }

                    // Both frame kinds satisfy pending reads.
                    self.resolve_oldest();

                    match decoded {
                        Some(event) if event.code != POLL_GROUP => {
                            debug!(code = %event.code, value = event.value, "device input");
                            self.emit(LinkEvent::Input(event));
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Resolve the head of the pending queue with the latest input value.
    fn resolve_oldest(&self) {
        let head = self
            .pending
            .lock()
            .expect("pending lock poisoned")
            .pop_front();
        if let Some(cmd) = head {
            debug!(
                waited_ms = cmd.created_at.elapsed().as_millis() as u64,
                "resolving pending read"
            );
            let _ = cmd.tx.send(self.latest_input());
        }
    }

    fn remove_pending(&self, id: u64) {
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .retain(|cmd| cmd.id != id);
    }

    fn emit(&self, event: LinkEvent) {
        // No subscribers is a normal condition for a headless link.
        let _ = self.events.send(event);
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.lock().expect("pending lock poisoned").len()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Port discovery
// ────────────────────────────────────────────────────────────────────────────

/// Enumerate serial ports and pick the first whose USB vendor id matches.
pub fn find_port(vendor_id: &str) -> Result<String, StrikeError> {
    let ports = serialport::available_ports()
        .map_err(|e| StrikeError::PortUnavailable(format!("enumeration failed: {e}")))?;

    info!(
        available = ?ports.iter().map(|p| p.port_name.clone()).collect::<Vec<_>>(),
        "available serial ports"
    );

    let wanted = vendor_id.to_ascii_lowercase();
    for port in ports {
        if let serialport::SerialPortType::UsbPort(info) = port.port_type {
            if format!("{:04x}", info.vid) == wanted {
                return Ok(port.port_name);
            }
        }
    }
    Err(StrikeError::PortUnavailable(format!(
        "no device with vendor id {vendor_id} found"
    )))
}

fn spawn_reader(link: Arc<SerialLink>, mut reader: Box<dyn serialport::SerialPort>) {
    std::thread::Builder::new()
        .name("strike-serial-reader".to_string())
        .spawn(move || {
            let mut buf = [0u8; 256];
            loop {
                if !link.is_open() {
                    break;
                }
                match reader.read(&mut buf) {
                    Ok(0) => {}
                    Ok(n) => link.process_incoming(&buf[..n]),
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                    Err(e) => {
                        error!(error = %e, "serial reader stopped");
                        break;
                    }
                }
            }
        })
        .expect("failed to spawn serial reader thread");
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
