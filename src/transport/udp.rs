//! OSC over UDP.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::osc::{decode_packet, encode_message};
use super::ParameterSink;
use crate::error::{HostError, HostResult};
use crate::parameter::{InboundMessage, ParameterValue};

const MAX_DATAGRAM: usize = 4096;

/// Sends and receives OSC datagrams for the runtime.
///
/// Addresses inside the runtime carry no leading `/`; it is added on send
/// and stripped on receive.
#[derive(Debug, Clone)]
pub struct OscUdpTransport {
    socket: Arc<UdpSocket>,
    target: SocketAddr,
}

impl OscUdpTransport {
    /// Bind `listen` for inbound traffic and send outbound traffic to `target`.
    pub async fn bind(listen: SocketAddr, target: SocketAddr) -> HostResult<Self> {
        let socket = UdpSocket::bind(listen).await?;
        debug!("OSC transport bound to {} (sending to {})", listen, target);
        Ok(Self {
            socket: Arc::new(socket),
            target,
        })
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> HostResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Spawn the receive loop.
    ///
    /// Malformed datagrams are logged and dropped. The loop ends when the
    /// returned receiver is dropped.
    pub fn spawn_receiver(
        &self,
        capacity: usize,
    ) -> (mpsc::Receiver<InboundMessage>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let socket = Arc::clone(&self.socket);

        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                let (len, from) = match socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("OSC receive failed: {}", e);
                        continue;
                    }
                };

                let messages = match decode_packet(&buf[..len]) {
                    Ok(messages) => messages,
                    Err(e) => {
                        debug!("Dropping malformed OSC packet from {}: {}", from, e);
                        continue;
                    }
                };

                for message in messages {
                    let address = message
                        .address
                        .strip_prefix('/')
                        .unwrap_or(&message.address)
                        .to_string();
                    if tx
                        .send(InboundMessage::new(address, message.value))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
        });

        (rx, handle)
    }
}

impl ParameterSink for OscUdpTransport {
    fn send(&self, address: &str, value: ParameterValue) -> HostResult<()> {
        let address = format!("/{}", address.trim_start_matches('/'));
        let packet = encode_message(&address, &value);
        self.socket
            .try_send_to(&packet, self.target)
            .map(|_| ())
            .map_err(|e| HostError::Transport(format!("send to {} failed: {}", self.target, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_loopback_send_and_receive() {
        let any: SocketAddr = "127.0.0.1:0".parse().unwrap();

        // Receiver first so the sender knows where to point.
        let receiver = OscUdpTransport::bind(any, any).await.unwrap();
        let receiver_addr = receiver.local_addr().unwrap();
        let (mut rx, handle) = receiver.spawn_receiver(8);

        let sender = OscUdpTransport::bind(any, receiver_addr).await.unwrap();
        sender
            .send("avatar/parameters/Mute", ParameterValue::Bool(true))
            .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg, InboundMessage::new("avatar/parameters/Mute", true));

        handle.abort();
    }
}
