//! # MQTT Client
//!
//! A small MQTT 3.1.1 client implementing [`Session`] on top of any
//! [`MqttTransport`]. It speaks QoS 0 outbound, acknowledges QoS 1 inbound and
//! keeps the connection alive with PINGREQ packets sent from `poll`.
//!
//! Outbound and inbound traffic use separate fixed-size buffers of `BUF_SIZE`
//! bytes. An outbound packet that does not fit is rejected; an inbound one is
//! skipped in the stream and counted, and the session stays up.

use embassy_time::{Duration, Instant};

use crate::error::{ConnectReasonCode, MqttError, ProtocolError, SessionError};
use crate::packet::{
    self, Connect, Disconnect, EncodePacket, MqttPacket, PingReq, PubAck, Publish, QoS, Subscribe,
};
use crate::session::{InboundHandler, Session, SessionOptions};
use crate::transport::MqttTransport;
use crate::util::{announced_length, frame_length};

/// MQTT session over a byte-stream transport.
pub struct MqttClient<T, const BUF_SIZE: usize> {
    transport: T,
    tx_buffer: [u8; BUF_SIZE],
    rx_buffer: [u8; BUF_SIZE],
    rx_len: usize,
    connected: bool,
    next_packet_id: u16,
    keep_alive: Duration,
    next_ping: Option<Instant>,
    ping_sent: Option<Instant>,
    subscription_pending: bool,
    skip: usize,
    dropped: u32,
}

impl<T: MqttTransport, const BUF_SIZE: usize> MqttClient<T, BUF_SIZE> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            tx_buffer: [0; BUF_SIZE],
            rx_buffer: [0; BUF_SIZE],
            rx_len: 0,
            connected: false,
            next_packet_id: 1,
            keep_alive: Duration::from_secs(0),
            next_ping: None,
            ping_sent: None,
            subscription_pending: false,
            skip: 0,
            dropped: 0,
        }
    }

    /// Access to the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn send_packet(&mut self, packet: &impl EncodePacket) -> Result<(), MqttError<T::Error>> {
        let len = packet.encode(&mut self.tx_buffer)?;
        self.transport.send(&self.tx_buffer[..len]).await?;
        Ok(())
    }

    /// Reads from the transport until one complete frame is buffered.
    async fn read_frame(&mut self) -> Result<usize, MqttError<T::Error>> {
        loop {
            if let Some(len) = frame_length(&self.rx_buffer[..self.rx_len])? {
                return Ok(len);
            }
            if self.rx_len == BUF_SIZE {
                return Err(MqttError::Protocol(ProtocolError::PayloadTooLarge));
            }
            let n = self
                .transport
                .recv(&mut self.rx_buffer[self.rx_len..])
                .await?;
            self.rx_len += n;
        }
    }

    /// Moves whatever the transport already holds into the receive buffer.
    async fn fill_pending(&mut self) -> Result<(), MqttError<T::Error>> {
        while self.rx_len < BUF_SIZE && self.transport.has_pending() {
            let n = self
                .transport
                .recv(&mut self.rx_buffer[self.rx_len..])
                .await?;
            self.rx_len += n;
        }
        Ok(())
    }

    /// Drops the first `len` bytes of the receive buffer.
    fn consume(&mut self, len: usize) {
        self.rx_buffer.copy_within(len..self.rx_len, 0);
        self.rx_len -= len;
    }

    fn take_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.checked_add(1).unwrap_or(1);
        id
    }

    fn reset(&mut self) {
        self.connected = false;
        self.rx_len = 0;
        self.next_ping = None;
        self.ping_sent = None;
        self.subscription_pending = false;
        self.skip = 0;
    }

    async fn connect(&mut self, options: &SessionOptions<'_>) -> Result<(), MqttError<T::Error>> {
        self.transport.open(options).await?;

        let keep_alive_secs = u16::try_from(options.keep_alive.as_secs()).unwrap_or(u16::MAX);
        let connect = Connect::new(options.client_id, keep_alive_secs, options.clean_session)
            .with_credentials(options.credentials);
        self.send_packet(&connect).await?;

        let len = self.read_frame().await?;
        let ack = packet::decode(&self.rx_buffer[..len]).map(|packet| match packet {
            MqttPacket::ConnAck(ack) => Some(ack),
            _ => None,
        });
        self.consume(len);
        let ack = ack?.ok_or(MqttError::Protocol(ProtocolError::InvalidResponse))?;
        match ConnectReasonCode::from(ack.reason_code) {
            ConnectReasonCode::Success => {
                self.connected = true;
                self.keep_alive = options.keep_alive;
                Ok(())
            }
            code => Err(MqttError::ConnectionRefused(code)),
        }
    }

    async fn keep_alive(&mut self, now: Instant) -> Result<(), MqttError<T::Error>> {
        if self.keep_alive.as_ticks() == 0 {
            return Ok(());
        }
        if let Some(sent) = self.ping_sent
            && now >= sent + self.keep_alive
        {
            warn!("gwt: broker did not answer ping");
            return Err(MqttError::Timeout);
        }
        let interval = self.keep_alive / 2;
        match self.next_ping {
            None => self.next_ping = Some(now + interval),
            Some(due) if now >= due => {
                self.send_packet(&PingReq).await?;
                if self.ping_sent.is_none() {
                    self.ping_sent = Some(now);
                }
                self.next_ping = Some(now + interval);
            }
            Some(_) => {}
        }
        Ok(())
    }

    async fn poll_inner(
        &mut self,
        now: Instant,
        inbound: &mut InboundHandler<'_>,
    ) -> Result<(), MqttError<T::Error>> {
        self.keep_alive(now).await?;

        loop {
            self.fill_pending().await?;

            if self.skip > 0 {
                let n = self.skip.min(self.rx_len);
                self.consume(n);
                self.skip -= n;
                if self.skip > 0 && !self.transport.has_pending() {
                    return Ok(());
                }
                continue;
            }

            let len = match announced_length(&self.rx_buffer[..self.rx_len])? {
                Some(len) if len > BUF_SIZE => {
                    warn!("gwt: skipping oversized inbound packet ({} bytes)", len);
                    self.skip = len;
                    self.dropped = self.dropped.saturating_add(1);
                    continue;
                }
                Some(len) if len <= self.rx_len => len,
                _ => return Ok(()),
            };

            let mut ack = None;
            let mut refused = false;
            match packet::decode(&self.rx_buffer[..len])? {
                MqttPacket::Publish(publish) => {
                    if publish.qos == QoS::AtLeastOnce {
                        ack = publish.packet_id;
                    }
                    inbound(publish.topic, publish.payload);
                }
                MqttPacket::PingResp => self.ping_sent = None,
                MqttPacket::SubAck(sub_ack) => {
                    self.subscription_pending = false;
                    refused = !sub_ack.is_granted();
                }
                MqttPacket::ConnAck(_) => {
                    return Err(MqttError::Protocol(ProtocolError::InvalidResponse));
                }
                MqttPacket::PubAck(_) => {}
            }
            self.consume(len);

            if refused {
                warn!("gwt: broker refused subscription");
                return Err(MqttError::SubscriptionRejected);
            }
            if let Some(packet_id) = ack {
                self.send_packet(&PubAck { packet_id }).await?;
            }
        }
    }

    fn drop_connection(&mut self) {
        self.transport.close();
        self.reset();
    }
}

impl<T: MqttTransport, const BUF_SIZE: usize> Session for MqttClient<T, BUF_SIZE> {
    async fn open(&mut self, options: &SessionOptions<'_>) -> Result<(), SessionError> {
        self.drop_connection();
        let result = self.connect(options).await;
        if result.is_err() {
            self.drop_connection();
        }
        result.map_err(SessionError::from)
    }

    async fn subscribe(&mut self, filter: &str) -> Result<(), SessionError> {
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        let packet_id = self.take_packet_id();
        let result = self
            .send_packet(&Subscribe::new(packet_id, filter, QoS::AtMostOnce))
            .await;
        match result {
            Ok(()) => self.subscription_pending = true,
            Err(MqttError::Transport(_)) => self.drop_connection(),
            Err(_) => {}
        }
        result.map_err(SessionError::from)
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), SessionError> {
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        let result = self.send_packet(&Publish::new(topic, payload, retain)).await;
        if let Err(MqttError::Transport(_)) = result {
            self.drop_connection();
        }
        result.map_err(SessionError::from)
    }

    async fn poll(
        &mut self,
        now: Instant,
        inbound: &mut InboundHandler<'_>,
    ) -> Result<(), SessionError> {
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        let result = self.poll_inner(now, inbound).await;
        if result.is_err() {
            self.drop_connection();
        }
        result.map_err(SessionError::from)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn is_subscription_pending(&self) -> bool {
        self.connected && self.subscription_pending
    }

    fn take_dropped_frames(&mut self) -> u32 {
        core::mem::take(&mut self.dropped)
    }

    async fn close(&mut self) {
        if self.connected {
            // Best effort, the stream may already be gone.
            let _ = self.send_packet(&Disconnect).await;
        }
        self.drop_connection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Broker, GatewayConfig};
    use crate::transport::TransportError;
    use embassy_futures::block_on;
    use std::collections::VecDeque;
    use std::vec::Vec;

    #[derive(Debug, PartialEq)]
    enum FakeError {
        Closed,
        Certificate,
    }

    impl TransportError for FakeError {
        fn security_code(&self) -> Option<i32> {
            match self {
                FakeError::Certificate => Some(-7),
                FakeError::Closed => None,
            }
        }
    }

    #[derive(Default)]
    struct FakeTransport {
        incoming: VecDeque<u8>,
        sent: Vec<Vec<u8>>,
        open_error: Option<FakeError>,
        opened: usize,
        closed: usize,
    }

    impl FakeTransport {
        fn push(&mut self, bytes: &[u8]) {
            self.incoming.extend(bytes.iter().copied());
        }
    }

    impl MqttTransport for FakeTransport {
        type Error = FakeError;

        async fn open(&mut self, _options: &SessionOptions<'_>) -> Result<(), FakeError> {
            self.opened += 1;
            match self.open_error.take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        async fn send(&mut self, buf: &[u8]) -> Result<(), FakeError> {
            self.sent.push(buf.to_vec());
            Ok(())
        }

        async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, FakeError> {
            if self.incoming.is_empty() {
                return Err(FakeError::Closed);
            }
            let n = buf.len().min(self.incoming.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.incoming.pop_front().unwrap();
            }
            Ok(n)
        }

        fn has_pending(&self) -> bool {
            !self.incoming.is_empty()
        }

        fn close(&mut self) {
            self.closed += 1;
        }
    }

    fn config() -> GatewayConfig<'static> {
        GatewayConfig::new(Broker::Host("broker"), "gw")
            .unwrap()
            .with_keep_alive(Duration::from_secs(10))
    }

    fn connected_client() -> MqttClient<FakeTransport, 128> {
        let mut transport = FakeTransport::default();
        transport.push(&[0x20, 2, 0, 0]);
        let mut client = MqttClient::new(transport);
        let config = config();
        block_on(client.open(&SessionOptions::from_config(&config))).unwrap();
        client
    }

    #[test]
    fn open_sends_connect_and_accepts_connack() {
        let client = connected_client();
        assert!(client.is_connected());
        assert_eq!(client.transport().opened, 1);
        assert_eq!(client.transport().sent[0][0], 0x10);
    }

    #[test]
    fn refused_connack_is_reported() {
        let mut transport = FakeTransport::default();
        transport.push(&[0x20, 2, 0, 5]);
        let mut client: MqttClient<_, 128> = MqttClient::new(transport);
        let config = config();
        let err = block_on(client.open(&SessionOptions::from_config(&config))).unwrap_err();
        assert_eq!(err, SessionError::Refused(ConnectReasonCode::NotAuthorized));
        assert!(!client.is_connected());
    }

    #[test]
    fn certificate_failure_is_a_security_error() {
        let transport = FakeTransport {
            open_error: Some(FakeError::Certificate),
            ..Default::default()
        };
        let mut client: MqttClient<_, 128> = MqttClient::new(transport);
        let config = config();
        let err = block_on(client.open(&SessionOptions::from_config(&config))).unwrap_err();
        assert_eq!(err, SessionError::Security(-7));
        assert!(err.is_security());
    }

    #[test]
    fn publish_requires_connection() {
        let mut client: MqttClient<_, 128> = MqttClient::new(FakeTransport::default());
        assert_eq!(
            block_on(client.publish("t", b"1", false)),
            Err(SessionError::NotConnected)
        );
    }

    #[test]
    fn publish_sets_retain_bit() {
        let mut client = connected_client();
        block_on(client.publish("out/5/2/1/0/1", b"75", true)).unwrap();
        let frame = client.transport().sent.last().unwrap();
        assert_eq!(frame[0], 0x31);
        assert!(frame.ends_with(b"75"));
    }

    #[test]
    fn poll_delivers_split_publish_frames() {
        let mut client = connected_client();
        let mut seen: Vec<(String, Vec<u8>)> = Vec::new();
        let now = Instant::from_secs(0);

        client.transport.push(&[0x30, 7, 0, 3, b'a', b'/']);
        block_on(client.poll(now, &mut |topic: &str, payload: &[u8]| {
            seen.push((topic.into(), payload.to_vec()))
        }))
        .unwrap();
        assert!(seen.is_empty());

        client.transport.push(&[b'b', b'o', b'n', 0x30, 6, 0, 1, b'c', b'o', b'f', b'f']);
        block_on(client.poll(now, &mut |topic: &str, payload: &[u8]| {
            seen.push((topic.into(), payload.to_vec()))
        }))
        .unwrap();
        assert_eq!(
            seen,
            [
                ("a/b".to_string(), b"on".to_vec()),
                ("c".to_string(), b"off".to_vec())
            ]
        );
    }

    #[test]
    fn qos1_publish_is_acknowledged() {
        let mut client = connected_client();
        client.transport.push(&[0x32, 6, 0, 1, b't', 0, 9, b'x']);
        block_on(client.poll(Instant::from_secs(0), &mut |_: &str, _: &[u8]| {})).unwrap();
        assert_eq!(client.transport().sent.last().unwrap(), &[0x40, 2, 0, 9]);
    }

    #[test]
    fn keep_alive_pings_and_times_out() {
        let mut client = connected_client();
        let mut ignore = |_: &str, _: &[u8]| {};
        block_on(client.poll(Instant::from_secs(0), &mut ignore)).unwrap();
        block_on(client.poll(Instant::from_secs(5), &mut ignore)).unwrap();
        assert_eq!(client.transport().sent.last().unwrap(), &[0xC0, 0]);

        client.transport.push(&[0xD0, 0]);
        block_on(client.poll(Instant::from_secs(6), &mut ignore)).unwrap();
        block_on(client.poll(Instant::from_secs(10), &mut ignore)).unwrap();
        assert!(client.is_connected());

        // Second ping is never answered.
        assert_eq!(
            block_on(client.poll(Instant::from_secs(20), &mut ignore)),
            Err(SessionError::Timeout)
        );
        assert!(!client.is_connected());
    }

    #[test]
    fn refused_subscription_drops_session() {
        let mut client = connected_client();
        block_on(client.subscribe("in/+/+/+/+/+")).unwrap();
        client.transport.push(&[0x90, 3, 0, 1, 0x80]);
        let result = block_on(client.poll(Instant::from_secs(0), &mut |_: &str, _: &[u8]| {}));
        assert_eq!(result, Err(SessionError::Rejected));
        assert!(!client.is_connected());
    }

    #[test]
    fn granted_subscription_clears_pending() {
        let mut client = connected_client();
        block_on(client.subscribe("in/+/+/+/+/+")).unwrap();
        assert!(client.is_subscription_pending());

        client.transport.push(&[0x90, 3, 0, 1, 0x00]);
        block_on(client.poll(Instant::from_secs(0), &mut |_: &str, _: &[u8]| {})).unwrap();
        assert!(!client.is_subscription_pending());
        assert!(client.is_connected());
    }

    #[test]
    fn oversized_publish_is_skipped() {
        let mut client = connected_client();
        let mut seen: Vec<String> = Vec::new();
        let now = Instant::from_secs(0);

        // 3 + 200 bytes announced, larger than the 128 byte buffer.
        let mut frame = vec![0x31, 0xC8, 0x01, 0, 3, b'b', b'i', b'g'];
        frame.resize(3 + 200, b'x');
        client.transport.push(&frame[..100]);
        block_on(client.poll(now, &mut |topic: &str, _: &[u8]| seen.push(topic.into()))).unwrap();
        assert!(client.is_connected());

        client.transport.push(&frame[100..]);
        client.transport.push(&[0x30, 6, 0, 1, b'c', b'o', b'f', b'f']);
        block_on(client.poll(now, &mut |topic: &str, _: &[u8]| seen.push(topic.into()))).unwrap();

        assert!(client.is_connected());
        assert_eq!(seen, ["c".to_string()]);
        assert_eq!(client.take_dropped_frames(), 1);
        assert_eq!(client.take_dropped_frames(), 0);
    }

    #[test]
    fn close_sends_disconnect() {
        let mut client = connected_client();
        block_on(client.close());
        assert_eq!(client.transport().sent.last().unwrap(), &[0xE0, 0]);
        assert!(!client.is_connected());
    }
}
