// Licensed under the Apache-2.0 license

use crate::crypto::MAX_HASH_SIZE;
use crate::protocol::{DeviceCapabilities, SelectedAlgorithms, SpdmVersion};
use arrayvec::ArrayVec;
use zeroize::Zeroize;

/// Uncompressed P-384 point with its SEC1 marker byte.
pub const MAX_PEER_PUB_KEY_SIZE: usize = 97;

/// Connection lifecycle, advanced only by the protocol layer.
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd)]
pub enum ConnectionState {
    NotStarted,
    AfterVersion,
    AfterCapabilities,
    Negotiated,
    AfterDigests,
    AfterCertificate,
    Authenticated,
    SessionEstablished,
}

/// Response-state machine for the responder role.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub enum ResponseState {
    #[default]
    Normal,
    Busy,
    NotReady,
    NeedResync,
    ProcessingEncap,
}

pub(crate) struct State {
    pub(crate) connection_info: ConnectionInfo,
    pub(crate) response_state: ResponseState,
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    pub fn new() -> Self {
        Self {
            connection_info: ConnectionInfo::default(),
            response_state: ResponseState::Normal,
        }
    }

    pub fn reset(&mut self) {
        self.connection_info.reset();
        self.response_state = ResponseState::Normal;
    }
}

/// Negotiated connection values. Exactly one version and one algorithm per
/// category once the connection reaches `Negotiated`; immutable until the
/// next context reset.
pub(crate) struct ConnectionInfo {
    version_number: SpdmVersion,
    secure_msg_version: Option<SpdmVersion>,
    state: ConnectionState,
    peer_capabilities: DeviceCapabilities,
    selected_algorithms: SelectedAlgorithms,
    peer_cert_chain_hash: ArrayVec<u8, MAX_HASH_SIZE>,
    peer_public_key: ArrayVec<u8, MAX_PEER_PUB_KEY_SIZE>,
    heartbeat_period: u8,
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self {
            version_number: SpdmVersion::default(),
            secure_msg_version: None,
            state: ConnectionState::NotStarted,
            peer_capabilities: DeviceCapabilities::default(),
            selected_algorithms: SelectedAlgorithms::default(),
            peer_cert_chain_hash: ArrayVec::new(),
            peer_public_key: ArrayVec::new(),
            heartbeat_period: 0,
        }
    }
}

impl ConnectionInfo {
    pub fn version_number(&self) -> SpdmVersion {
        self.version_number
    }

    pub fn set_version_number(&mut self, version_number: SpdmVersion) {
        self.version_number = version_number;
    }

    pub fn secure_msg_version(&self) -> Option<SpdmVersion> {
        self.secure_msg_version
    }

    pub fn set_secure_msg_version(&mut self, version: SpdmVersion) {
        self.secure_msg_version = Some(version);
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    pub fn peer_capabilities(&self) -> DeviceCapabilities {
        self.peer_capabilities
    }

    pub fn peer_capabilities_mut(&mut self) -> &mut DeviceCapabilities {
        &mut self.peer_capabilities
    }

    pub fn selected_algorithms(&self) -> &SelectedAlgorithms {
        &self.selected_algorithms
    }

    pub fn selected_algorithms_mut(&mut self) -> &mut SelectedAlgorithms {
        &mut self.selected_algorithms
    }

    pub fn peer_cert_chain_hash(&self) -> Option<&[u8]> {
        if self.peer_cert_chain_hash.is_empty() {
            None
        } else {
            Some(self.peer_cert_chain_hash.as_slice())
        }
    }

    pub fn set_peer_cert_chain_hash(&mut self, hash: &[u8]) -> bool {
        self.peer_cert_chain_hash.clear();
        self.peer_cert_chain_hash
            .try_extend_from_slice(hash)
            .is_ok()
    }

    pub fn peer_public_key(&self) -> Option<&[u8]> {
        if self.peer_public_key.is_empty() {
            None
        } else {
            Some(self.peer_public_key.as_slice())
        }
    }

    pub fn set_peer_public_key(&mut self, key: &[u8]) -> bool {
        self.peer_public_key.clear();
        self.peer_public_key.try_extend_from_slice(key).is_ok()
    }

    pub fn heartbeat_period(&self) -> u8 {
        self.heartbeat_period
    }

    pub fn set_heartbeat_period(&mut self, period: u8) {
        self.heartbeat_period = period;
    }

    fn reset(&mut self) {
        self.version_number = SpdmVersion::default();
        self.secure_msg_version = None;
        self.state = ConnectionState::NotStarted;
        self.peer_capabilities = DeviceCapabilities::default();
        self.selected_algorithms = SelectedAlgorithms::default();
        self.peer_cert_chain_hash.as_mut_slice().zeroize();
        self.peer_cert_chain_hash.clear();
        self.peer_public_key.clear();
        self.heartbeat_period = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_state_ordering() {
        assert!(ConnectionState::NotStarted < ConnectionState::Negotiated);
        assert!(ConnectionState::Negotiated < ConnectionState::Authenticated);
        assert!(ConnectionState::Authenticated < ConnectionState::SessionEstablished);
    }

    #[test]
    fn reset_clears_negotiated_values() {
        let mut state = State::new();
        state.connection_info.set_version_number(SpdmVersion::V12);
        state.connection_info.set_state(ConnectionState::Authenticated);
        assert!(state.connection_info.set_peer_cert_chain_hash(&[0xAB; 48]));
        state.response_state = ResponseState::Busy;

        state.reset();
        assert_eq!(state.connection_info.version_number(), SpdmVersion::V10);
        assert_eq!(state.connection_info.state(), ConnectionState::NotStarted);
        assert!(state.connection_info.peer_cert_chain_hash().is_none());
        assert_eq!(state.response_state, ResponseState::Normal);
    }
}
