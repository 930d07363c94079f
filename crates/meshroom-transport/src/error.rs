/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The radio/network is not running. Call `start_network` first.
    #[error("network is not active")]
    NetworkInactive,

    /// Handing the frame to the medium failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The transport was shut down for good.
    #[error("transport shut down")]
    Shutdown,
}
