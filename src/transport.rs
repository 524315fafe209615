//! # MQTT Transport Abstraction
//!
//! This module defines the `MqttTransport` trait, which abstracts the byte
//! stream the MQTT client runs over (plain TCP, TLS, a modem UART, ...), and
//! a TCP implementation on top of `embassy-net`.
//!
//! Transports are long lived: the client re-opens the same transport on every
//! reconnect instead of building a new one.

use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::{ConnectError, Error as TcpError, TcpSocket};
use embassy_net::{IpAddress, Stack};
use embassy_time::{Duration, Timer};
use embedded_io_async::Write;

use crate::config::{Broker, Security};
use crate::session::SessionOptions;

/// A marker trait for transport-related errors.
pub trait TransportError: core::fmt::Debug {
    /// Diagnostic code when the error comes from certificate or fingerprint
    /// validation, `None` for every other failure.
    fn security_code(&self) -> Option<i32> {
        None
    }
}

/// A reliable, ordered byte stream to the broker.
#[allow(async_fn_in_trait)]
pub trait MqttTransport {
    /// The error type returned by the transport.
    type Error: TransportError;

    /// (Re)establishes the stream to the broker described by `options`.
    async fn open(&mut self, options: &SessionOptions<'_>) -> Result<(), Self::Error>;

    /// Sends a buffer of data over the transport.
    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error>;

    /// Receives data from the transport into a buffer.
    ///
    /// Returns the number of bytes read. Waits at most for the transport's
    /// read timeout.
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Whether `recv` would return data without waiting.
    fn has_pending(&self) -> bool;

    /// Drops the stream. Safe to call on a closed transport.
    fn close(&mut self);
}

/// Errors of [`TcpTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TcpTransportError {
    /// The broker host name could not be resolved.
    Dns,
    /// The TCP handshake failed.
    Connect(ConnectError),
    /// Reading or writing the socket failed.
    Io(TcpError),
    /// The peer closed the connection.
    Closed,
    /// No data arrived within the read timeout.
    Timeout,
    /// Plain TCP cannot honour the requested security mode.
    SecurityUnsupported,
}

impl TransportError for TcpTransportError {}

/// TCP transport implementation using `embassy-net`.
pub struct TcpTransport<'a> {
    stack: Stack<'a>,
    socket: TcpSocket<'a>,
    timeout: Duration,
}

impl<'a> TcpTransport<'a> {
    /// Creates a new `TcpTransport` with the given socket and read timeout.
    pub fn new(stack: Stack<'a>, socket: TcpSocket<'a>, timeout: Duration) -> Self {
        Self {
            stack,
            socket,
            timeout,
        }
    }

    async fn resolve(&self, broker: &Broker<'_>) -> Result<IpAddress, TcpTransportError> {
        let host = match broker {
            Broker::Ip(ip) => return Ok(*ip),
            Broker::Host(host) => *host,
        };
        if let Ok(ip) = host.parse::<embassy_net::Ipv4Address>() {
            return Ok(IpAddress::Ipv4(ip));
        }
        let addresses = self
            .stack
            .dns_query(host, DnsQueryType::A)
            .await
            .map_err(|_| TcpTransportError::Dns)?;
        addresses.first().copied().ok_or(TcpTransportError::Dns)
    }

    /// A helper function to perform a read with a timeout.
    async fn read_with_timeout(&mut self, buf: &mut [u8]) -> Result<usize, TcpTransportError> {
        // Use `select` to race the read operation against a timer.
        let read_fut = self.socket.read(buf);
        let timer = Timer::after(self.timeout);

        match futures::future::select(core::pin::pin!(read_fut), core::pin::pin!(timer)).await {
            futures::future::Either::Left((Ok(0), _)) => {
                debug!("gwt: tcp connection closed by peer");
                Err(TcpTransportError::Closed)
            }
            futures::future::Either::Left((Ok(n), _)) => Ok(n),
            futures::future::Either::Left((Err(e), _)) => {
                debug!("gwt: tcp read error: {:?}", e);
                Err(TcpTransportError::Io(e))
            }
            futures::future::Either::Right(((), _)) => Err(TcpTransportError::Timeout),
        }
    }
}

impl<'a> MqttTransport for TcpTransport<'a> {
    type Error = TcpTransportError;

    async fn open(&mut self, options: &SessionOptions<'_>) -> Result<(), Self::Error> {
        if *options.security != Security::None || options.client_identity.is_some() {
            warn!("gwt: plain tcp transport cannot apply transport security");
            return Err(TcpTransportError::SecurityUnsupported);
        }
        self.close();
        let address = self.resolve(&options.broker).await?;
        debug!("gwt: tcp connecting to {:?}:{}", address, options.port);
        self.socket
            .connect((address, options.port))
            .await
            .map_err(|e| {
                self.socket.abort();
                TcpTransportError::Connect(e)
            })
    }

    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        self.socket
            .write_all(buf)
            .await
            .map_err(TcpTransportError::Io)?;
        // Flush to ensure data is actually sent to the network
        self.socket.flush().await.map_err(TcpTransportError::Io)
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.read_with_timeout(buf).await
    }

    fn has_pending(&self) -> bool {
        self.socket.can_recv()
    }

    fn close(&mut self) {
        self.socket.abort();
    }
}
