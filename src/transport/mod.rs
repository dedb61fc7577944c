//! Boundary between the module runtime and the external protocol.
//!
//! The runtime only needs a way to push `(address, value)` pairs out; inbound
//! traffic is handed to [`ModuleRuntime::on_parameter_received`]. Two sinks
//! ship with the crate:
//!
//! - [`ChannelSink`]: forwards into a tokio channel (in-process use, tests)
//! - [`OscUdpTransport`]: encodes OSC over UDP
//!
//! [`ModuleRuntime::on_parameter_received`]: crate::runtime::ModuleRuntime::on_parameter_received

pub mod osc;
mod udp;

pub use udp::OscUdpTransport;

use tokio::sync::mpsc;

use crate::error::{HostError, HostResult};
use crate::parameter::{ParameterValue, WireMessage};

/// Destination for outbound parameter values.
///
/// Implementations must not block: modules call this from inside their hooks
/// on the host's update thread.
pub trait ParameterSink: Send + Sync {
    /// Send `value` on `address` (no leading `/`).
    fn send(&self, address: &str, value: ParameterValue) -> HostResult<()>;
}

/// Sink that forwards every outbound value into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<WireMessage>,
}

impl ChannelSink {
    /// Create a sink and the receiver that observes its traffic.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WireMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ParameterSink for ChannelSink {
    fn send(&self, address: &str, value: ParameterValue) -> HostResult<()> {
        self.tx
            .send(WireMessage::new(address, value))
            .map_err(|_| HostError::Transport("outbound channel closed".to_string()))
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ParameterSink for NullSink {
    fn send(&self, _address: &str, _value: ParameterValue) -> HostResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        sink.send("avatar/parameters/Mute", true.into()).unwrap();

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg, WireMessage::new("avatar/parameters/Mute", true));
    }

    #[test]
    fn test_channel_sink_reports_closed_channel() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        assert!(matches!(
            sink.send("x", 1.into()),
            Err(HostError::Transport(_))
        ));
    }
}
