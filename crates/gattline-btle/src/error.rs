use thiserror::Error;

use gattline_core::{PeerAddress, TransportError};

/// Failures from the Bluetooth stack before a connection actor is involved.
#[derive(Debug, Error)]
pub enum BtleError {
    #[error("bluetooth stack error: {0}")]
    Btleplug(#[from] btleplug::Error),

    #[error("no bluetooth adapter found")]
    NoAdapter,

    #[error("adapter index {index} out of range ({available} available)")]
    AdapterIndex { index: usize, available: usize },

    #[error("peer {0} not found")]
    PeripheralNotFound(PeerAddress),

    #[error("no peer matching '{0}' found")]
    NoMatch(String),
}

impl From<BtleError> for TransportError {
    fn from(err: BtleError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn adapter_index_message() {
        let err = BtleError::AdapterIndex {
            index: 3,
            available: 1,
        };
        assert_eq!(err.to_string(), "adapter index 3 out of range (1 available)");
    }

    #[test]
    fn converts_to_unavailable() {
        let peer: PeerAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        let err: TransportError = BtleError::PeripheralNotFound(peer).into();
        assert_eq!(
            err,
            TransportError::Unavailable("peer AA:BB:CC:DD:EE:FF not found".into())
        );
    }
}
