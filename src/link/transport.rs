//! Transport abstraction over a MAVLink connection, so the supervisor can be
//! driven by scripted links in tests
//!
//! Connection strings:
//!
//! | Address                     | Transport                                   |
//! |-----------------------------|---------------------------------------------|
//! | `tcpout:host:port`          | TCP client                                  |
//! | `tcpin:addr:port`           | TCP server, first client becomes the link   |
//! | `udpin:addr:port`           | UDP, replies go to the latest sender        |
//! | `udpout:host:port`          | UDP towards a fixed peer                    |
//! | `udpbcast:addr:port`        | UDP broadcast                               |
//! | `serial:/dev/ttyACM0:57600` | Serial port, 8N1 without flow control       |

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::Notify;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info};

use super::codec::{FrameDecoder, FrameEncoder};
use crate::error::{BridgeError, Result};
use crate::protocol::dialect::MavMessage;
use crate::protocol::frame::Frame;

/// Largest UDP payload
const MAX_DATAGRAM: usize = 65_535;

/// One open session with the vehicle
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Link: Send + Sync {
    /// Wait for the next frame
    ///
    /// Cancel safe: dropping the future loses no received bytes. Bytes that
    /// did not decode come out as `Frame::bad_data()`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Link`] once the transport failed or was closed
    async fn recv(&self) -> Result<Frame>;

    /// Send one message to the vehicle
    async fn send(&self, message: &MavMessage) -> Result<()>;

    /// Close the transport, failing pending and later receives
    async fn close(&self);
}

/// Opens links from a connection string
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Arc<dyn Link>>;
}

/// Parsed connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    TcpOut(String),
    TcpIn(String),
    UdpIn(String),
    UdpOut(String),
    UdpBroadcast(String),
    Serial { path: String, baud: u32 },
}

impl Endpoint {
    /// Parse a connection string
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Link`] for an unknown scheme, a missing
    /// address or a serial address without a numeric baud rate
    pub fn parse(address: &str) -> Result<Self> {
        let invalid = |reason: &str| BridgeError::Link(format!("Invalid address {:?}: {}", address, reason));

        let (scheme, rest) = address.split_once(':').ok_or_else(|| invalid("expected <scheme>:<address>"))?;
        if rest.is_empty() {
            return Err(invalid("missing address"));
        }

        let host = rest.to_string();
        match scheme {
            "tcpout" => Ok(Self::TcpOut(host)),
            "tcpin" => Ok(Self::TcpIn(host)),
            "udpin" => Ok(Self::UdpIn(host)),
            "udpout" => Ok(Self::UdpOut(host)),
            "udpbcast" => Ok(Self::UdpBroadcast(host)),
            "serial" => {
                let (path, baud) = rest.rsplit_once(':').ok_or_else(|| invalid("expected serial:<path>:<baud>"))?;
                let baud = baud.parse().map_err(|_| invalid("baud rate must be a number"))?;
                if path.is_empty() {
                    return Err(invalid("missing serial path"));
                }
                Ok(Self::Serial { path: path.to_string(), baud })
            }
            other => Err(invalid(&format!("unknown scheme {:?}", other))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TcpOut(host) => write!(f, "tcpout:{}", host),
            Self::TcpIn(host) => write!(f, "tcpin:{}", host),
            Self::UdpIn(host) => write!(f, "udpin:{}", host),
            Self::UdpOut(host) => write!(f, "udpout:{}", host),
            Self::UdpBroadcast(host) => write!(f, "udpbcast:{}", host),
            Self::Serial { path, baud } => write!(f, "serial:{}:{}", path, baud),
        }
    }
}

type ReadStream = Box<dyn AsyncRead + Send + Unpin>;
type WriteStream = Box<dyn AsyncWrite + Send + Unpin>;

enum Reader {
    Stream(ReadStream),
    Datagram(Arc<UdpSocket>),
}

enum Writer {
    Stream(WriteStream),
    Datagram(Arc<UdpSocket>),
}

/// Receive half: the byte source and the frames reassembled from it
struct Inbound {
    reader: Reader,
    decoder: FrameDecoder,
    scratch: Vec<u8>,
}

/// Link speaking MAVLink 2 over tcp, udp or serial
pub struct MavlinkLink {
    endpoint: Endpoint,
    local: Option<SocketAddr>,
    inbound: tokio::sync::Mutex<Inbound>,
    outbound: tokio::sync::Mutex<Writer>,
    framer: FrameEncoder,
    /// Datagram destination, learned from the latest sender for `udpin`
    peer: parking_lot::Mutex<Option<SocketAddr>>,
    closed: AtomicBool,
    shutdown: Notify,
}

impl fmt::Debug for MavlinkLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MavlinkLink")
            .field("endpoint", &self.endpoint)
            .field("local", &self.local)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn link_error(context: &str, endpoint: &Endpoint) -> impl Fn(std::io::Error) -> BridgeError {
    let prefix = format!("{} {}", context, endpoint);
    move |e| BridgeError::Link(format!("{}: {}", prefix, e))
}

async fn resolve(host: &str, endpoint: &Endpoint) -> Result<SocketAddr> {
    tokio::net::lookup_host(host)
        .await
        .map_err(link_error("Failed to resolve", endpoint))?
        .next()
        .ok_or_else(|| BridgeError::Link(format!("No address for {}", endpoint)))
}

impl MavlinkLink {
    /// Open a MAVLink 2 connection
    ///
    /// # Arguments
    ///
    /// * `address` - Connection string such as `tcpout:127.0.0.1:5760`,
    ///   `udpin:0.0.0.0:14550` or `serial:/dev/ttyACM0:57600`
    /// * `system_id` - Source system id of outbound messages
    /// * `component_id` - Source component id of outbound messages
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Link`] if the address is invalid or the
    /// connection cannot be opened
    pub async fn open(address: &str, system_id: u8, component_id: u8) -> Result<Self> {
        let endpoint = Endpoint::parse(address)?;
        let failed = || link_error("Failed to open", &endpoint);

        let (reader, writer, local, peer) = match &endpoint {
            Endpoint::TcpOut(host) => {
                let stream = TcpStream::connect(host.as_str()).await.map_err(failed())?;
                stream.set_nodelay(true).map_err(failed())?;
                let local = stream.local_addr().ok();
                let (read, write) = stream.into_split();
                (Reader::Stream(Box::new(read)), Writer::Stream(Box::new(write)), local, None)
            }
            Endpoint::TcpIn(host) => {
                let listener = TcpListener::bind(host.as_str()).await.map_err(failed())?;
                info!("Waiting for a vehicle to connect on {}", endpoint);
                let (stream, from) = listener.accept().await.map_err(failed())?;
                info!("Vehicle connected from {}", from);
                stream.set_nodelay(true).map_err(failed())?;
                let local = stream.local_addr().ok();
                let (read, write) = stream.into_split();
                (Reader::Stream(Box::new(read)), Writer::Stream(Box::new(write)), local, Some(from))
            }
            Endpoint::UdpIn(host) => {
                let socket = Arc::new(UdpSocket::bind(host.as_str()).await.map_err(failed())?);
                let local = socket.local_addr().ok();
                (Reader::Datagram(Arc::clone(&socket)), Writer::Datagram(socket), local, None)
            }
            Endpoint::UdpOut(host) | Endpoint::UdpBroadcast(host) => {
                let peer = resolve(host, &endpoint).await?;
                let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(failed())?;
                if matches!(endpoint, Endpoint::UdpBroadcast(_)) {
                    socket.set_broadcast(true).map_err(failed())?;
                }
                let socket = Arc::new(socket);
                let local = socket.local_addr().ok();
                (Reader::Datagram(Arc::clone(&socket)), Writer::Datagram(socket), local, Some(peer))
            }
            Endpoint::Serial { path, baud } => {
                let port = tokio_serial::new(path.as_str(), *baud)
                    .data_bits(tokio_serial::DataBits::Eight)
                    .parity(tokio_serial::Parity::None)
                    .stop_bits(tokio_serial::StopBits::One)
                    .flow_control(tokio_serial::FlowControl::None)
                    .open_native_async()
                    .map_err(|e| BridgeError::Link(format!("Failed to open {}: {}", endpoint, e)))?;
                let (read, write) = tokio::io::split(port);
                (Reader::Stream(Box::new(read)), Writer::Stream(Box::new(write)), None, None)
            }
        };

        debug!("Opened {} (local {:?})", endpoint, local);

        Ok(Self {
            endpoint,
            local,
            inbound: tokio::sync::Mutex::new(Inbound {
                reader,
                decoder: FrameDecoder::new(),
                scratch: vec![0; MAX_DATAGRAM],
            }),
            outbound: tokio::sync::Mutex::new(writer),
            framer: FrameEncoder::new(system_id, component_id),
            peer: parking_lot::Mutex::new(peer),
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
        })
    }

    /// Local socket address, for network transports
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    fn closed_error(&self) -> BridgeError {
        BridgeError::Link(format!("Link to {} closed", self.endpoint))
    }

    async fn read_frame(&self) -> Result<Frame> {
        let mut guard = self.inbound.lock().await;
        let inbound = &mut *guard;

        loop {
            if let Some(frame) = inbound.decoder.next_frame() {
                return Ok(frame);
            }

            match &mut inbound.reader {
                Reader::Stream(stream) => {
                    let read = stream
                        .read_buf(inbound.decoder.buffer_mut())
                        .await
                        .map_err(link_error("Read failed on", &self.endpoint))?;
                    if read == 0 {
                        return Err(BridgeError::Link(format!("{} closed by the vehicle", self.endpoint)));
                    }
                }
                Reader::Datagram(socket) => {
                    let (read, from) = socket
                        .recv_from(&mut inbound.scratch)
                        .await
                        .map_err(link_error("Read failed on", &self.endpoint))?;
                    self.learn_peer(from);
                    inbound.decoder.extend(&inbound.scratch[..read]);
                }
            }
        }
    }

    fn learn_peer(&self, from: SocketAddr) {
        if !matches!(self.endpoint, Endpoint::UdpIn(_)) {
            return;
        }

        let mut peer = self.peer.lock();
        if *peer != Some(from) {
            info!("Replying to {} on {}", from, self.endpoint);
            *peer = Some(from);
        }
    }
}

#[async_trait]
impl Link for MavlinkLink {
    async fn recv(&self) -> Result<Frame> {
        let shutdown = self.shutdown.notified();
        tokio::pin!(shutdown);
        shutdown.as_mut().enable();

        if self.closed.load(Ordering::Acquire) {
            return Err(self.closed_error());
        }

        tokio::select! {
            _ = &mut shutdown => Err(self.closed_error()),
            frame = self.read_frame() => frame,
        }
    }

    async fn send(&self, message: &MavMessage) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(self.closed_error());
        }

        let bytes = self.framer.encode(message);
        let mut writer = self.outbound.lock().await;
        match &mut *writer {
            Writer::Stream(stream) => {
                stream.write_all(&bytes).await.map_err(link_error("Write failed on", &self.endpoint))?;
                stream.flush().await.map_err(link_error("Write failed on", &self.endpoint))?;
            }
            Writer::Datagram(socket) => {
                let peer = *self.peer.lock();
                let peer = peer.ok_or_else(|| BridgeError::Link(format!("No peer yet on {}", self.endpoint)))?;
                socket
                    .send_to(&bytes, peer)
                    .await
                    .map_err(link_error("Write failed on", &self.endpoint))?;
            }
        }

        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.notify_waiters();

        if let Writer::Stream(stream) = &mut *self.outbound.lock().await {
            if let Err(e) = stream.shutdown().await {
                debug!("Shutdown of {} failed: {}", self.endpoint, e);
            }
        }
        info!("Closed {}", self.endpoint);
    }
}

/// Connector opening [`MavlinkLink`]s
#[derive(Debug, Clone, Copy)]
pub struct MavlinkConnector {
    pub system_id: u8,
    pub component_id: u8,
}

#[async_trait]
impl Connector for MavlinkConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn Link>> {
        let link = MavlinkLink::open(address, self.system_id, self.component_id).await?;
        Ok(Arc::new(link))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encoder;
    use crate::protocol::frame::FrameKind;
    use crate::protocol::Target;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn tcp_pair() -> (MavlinkLink, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("tcpout:{}", listener.local_addr().unwrap());
        let (link, accepted) = tokio::join!(MavlinkLink::open(&address, 255, 0), listener.accept());
        (link.unwrap(), accepted.unwrap().0)
    }

    #[test]
    fn test_parse_endpoints() {
        assert_eq!(
            Endpoint::parse("tcpout:127.0.0.1:5760").unwrap(),
            Endpoint::TcpOut("127.0.0.1:5760".to_string())
        );
        assert_eq!(
            Endpoint::parse("udpin:0.0.0.0:14550").unwrap(),
            Endpoint::UdpIn("0.0.0.0:14550".to_string())
        );
        assert_eq!(
            Endpoint::parse("udpbcast:192.168.1.255:14550").unwrap(),
            Endpoint::UdpBroadcast("192.168.1.255:14550".to_string())
        );
        assert_eq!(
            Endpoint::parse("serial:/dev/ttyACM0:57600").unwrap(),
            Endpoint::Serial { path: "/dev/ttyACM0".to_string(), baud: 57600 }
        );
        assert_eq!(
            Endpoint::parse("serial:/dev/ttyACM0:57600").unwrap().to_string(),
            "serial:/dev/ttyACM0:57600"
        );
    }

    #[test]
    fn test_parse_invalid_endpoints() {
        for address in ["bogus", "tcpout:", "file:/tmp/log", "serial:/dev/ttyACM0", "serial:/dev/ttyACM0:fast", "serial::57600"] {
            assert!(
                matches!(Endpoint::parse(address), Err(BridgeError::Link(_))),
                "{} should be rejected",
                address
            );
        }
    }

    #[tokio::test]
    async fn test_open_invalid_address() {
        let result = MavlinkLink::open("nonsense:address", 255, 0).await;
        assert!(matches!(result, Err(BridgeError::Link(_))));
    }

    #[tokio::test]
    async fn test_connector_reports_failure() {
        let connector = MavlinkConnector { system_id: 255, component_id: 0 };
        assert!(connector.connect("bogus").await.is_err());
    }

    #[tokio::test]
    async fn test_tcp_exchange() {
        let (link, mut vehicle) = tcp_pair().await;

        let heartbeat = FrameEncoder::new(1, 1).encode(&encoder::heartbeat());
        vehicle.write_all(&heartbeat).await.unwrap();
        let frame = timeout(Duration::from_secs(2), link.recv()).await.unwrap().unwrap();
        assert_eq!(frame.kind, FrameKind::Heartbeat);
        assert_eq!(frame.system_id, 1);

        link.send(&encoder::param_request_list(Target::default())).await.unwrap();
        let mut decoder = FrameDecoder::new();
        let received = timeout(Duration::from_secs(2), async {
            loop {
                let mut chunk = [0u8; 64];
                let read = vehicle.read(&mut chunk).await.unwrap();
                decoder.extend(&chunk[..read]);
                if let Some(frame) = decoder.next_frame() {
                    return frame;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(received.name, "PARAM_REQUEST_LIST");
        assert_eq!((received.system_id, received.component_id), (255, 0));
    }

    #[tokio::test]
    async fn test_close_wakes_pending_recv() {
        let (link, mut vehicle) = tcp_pair().await;
        let link = Arc::new(link);

        let reader = Arc::clone(&link);
        let pending = tokio::spawn(async move { reader.recv().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        link.close().await;
        let result = timeout(Duration::from_secs(2), pending).await.unwrap().unwrap();
        assert!(matches!(result, Err(BridgeError::Link(_))));
        assert!(link.recv().await.is_err());
        assert!(link.send(&encoder::heartbeat()).await.is_err());

        // The vehicle sees the write side shut down
        let mut rest = Vec::new();
        let read = timeout(Duration::from_secs(2), vehicle.read_to_end(&mut rest)).await.unwrap();
        assert!(read.is_ok());
    }

    #[tokio::test]
    async fn test_peer_hangup_fails_recv() {
        let (link, vehicle) = tcp_pair().await;
        drop(vehicle);

        let result = timeout(Duration::from_secs(2), link.recv()).await.unwrap();
        assert!(matches!(result, Err(BridgeError::Link(_))));
    }

    #[tokio::test]
    async fn test_udpin_replies_to_sender() {
        let link = MavlinkLink::open("udpin:127.0.0.1:0", 255, 0).await.unwrap();
        let address = link.local_addr().unwrap();

        // Nowhere to send before the vehicle spoke
        assert!(link.send(&encoder::heartbeat()).await.is_err());

        let vehicle = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let heartbeat = FrameEncoder::new(1, 1).encode(&encoder::heartbeat());
        vehicle.send_to(&heartbeat, address).await.unwrap();
        let frame = timeout(Duration::from_secs(2), link.recv()).await.unwrap().unwrap();
        assert_eq!(frame.kind, FrameKind::Heartbeat);

        link.send(&encoder::heartbeat()).await.unwrap();
        let mut datagram = [0u8; 300];
        let (read, _) = timeout(Duration::from_secs(2), vehicle.recv_from(&mut datagram))
            .await
            .unwrap()
            .unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.extend(&datagram[..read]);
        assert_eq!(decoder.next_frame().unwrap().system_id, 255);
    }

    #[tokio::test]
    #[ignore] // Requires a vehicle or SITL listening on tcp:127.0.0.1:5760
    async fn test_live_vehicle_heartbeat() {
        let link = MavlinkLink::open("tcpout:127.0.0.1:5760", 255, 0).await.unwrap();
        let frame = timeout(Duration::from_secs(5), link.recv()).await.unwrap();
        assert!(frame.is_ok());
    }

    #[tokio::test]
    async fn test_scripted_link() {
        let (link, tx) = mocks::ScriptedLink::new();
        assert!(timeout(Duration::from_millis(20), link.recv()).await.is_err());

        tx.send(Frame::bad_data()).unwrap();
        assert!(link.recv().await.is_ok());

        drop(tx);
        assert!(link.recv().await.is_err());

        link.close().await;
        assert!(link.is_closed());
        assert!(link.send(&encoder::heartbeat()).await.is_err());
    }
}
