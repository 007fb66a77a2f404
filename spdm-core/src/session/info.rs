// Licensed under the Apache-2.0 license

use super::key_schedule::{KeySchedule, KeyScheduleError, SessionKeyType};
use super::{SessionError, SessionResult};
use crate::crypto::asym::{DheKeyPair, ECDH_P384_EXCHANGE_DATA_SIZE};
use crate::transcript::SessionTranscript;
use bitfield::bitfield;
use zerocopy::{FromBytes, Immutable, IntoBytes};

bitfield! {
    #[derive(FromBytes, IntoBytes, Immutable, Clone, Copy, Default)]
    #[repr(C)]
    pub struct SessionPolicy(u8);
    impl Debug;
    u8;
    pub termination_policy, set_termination_policy: 0, 0;
    pub event_all_policy, set_event_all_policy: 1, 1;
    reserved, _: 7, 2;
}

bitfield! {
    #[derive(FromBytes, IntoBytes, Immutable, Clone, Copy, Default)]
    #[repr(C)]
    pub struct EndSessionAttributes(u8);
    impl Debug;
    u8;
    pub negotiated_state_preservation, set_negotiated_state_preservation: 0, 0;
    reserved, _: 7, 1;
}

/// Session lifecycle. Advances monotonically; teardown frees the slot
/// rather than walking backwards.
#[derive(Debug, PartialEq, PartialOrd, Clone, Copy)]
pub enum SessionState {
    NotStarted,
    Handshaking,
    Established,
}

/// Protection applied to records in this session.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum SessionType {
    None,
    MacOnly,
    EncMac,
}

pub(crate) struct SessionInfo {
    pub(crate) session_id: u32,
    pub(crate) use_psk: bool,
    pub(crate) mut_auth_requested: bool,
    pub(crate) session_policy: SessionPolicy,
    pub(crate) end_session_attributes: EndSessionAttributes,
    pub(crate) session_state: SessionState,
    pub(crate) session_type: SessionType,
    pub(crate) key_schedule: KeySchedule,
    pub(crate) session_transcript: SessionTranscript,
    dhe_key_pair: Option<DheKeyPair>,
}

impl SessionInfo {
    pub fn new(session_id: u32) -> Self {
        Self {
            session_id,
            use_psk: false,
            mut_auth_requested: false,
            session_policy: SessionPolicy::default(),
            end_session_attributes: EndSessionAttributes::default(),
            session_state: SessionState::NotStarted,
            session_type: SessionType::None,
            key_schedule: KeySchedule::default(),
            session_transcript: SessionTranscript::new(),
            dhe_key_pair: None,
        }
    }

    /// Strictly monotonic state advance; a stale transition is a caller bug
    /// surfaced as `InvalidState`.
    pub fn set_session_state(&mut self, state: SessionState) -> SessionResult<()> {
        if state < self.session_state {
            return Err(SessionError::InvalidState);
        }
        self.session_state = state;
        Ok(())
    }

    pub fn session_state(&self) -> SessionState {
        self.session_state
    }

    /// Generate the local ephemeral key pair and return its exchange data.
    /// Used by the requester before the peer share is known.
    pub fn generate_dhe_exchange_data(&mut self) -> [u8; ECDH_P384_EXCHANGE_DATA_SIZE] {
        let key_pair = DheKeyPair::generate();
        let exchange_data = key_pair.exchange_data();
        self.dhe_key_pair = Some(key_pair);
        exchange_data
    }

    /// Finish the DHE exchange and install the shared secret as the
    /// key-schedule input. Returns the local exchange data; a responder that
    /// never called `generate_dhe_exchange_data` gets a fresh key pair here.
    pub fn compute_dhe_secret(
        &mut self,
        peer_exchange_data: &[u8],
    ) -> SessionResult<[u8; ECDH_P384_EXCHANGE_DATA_SIZE]> {
        let key_pair = match self.dhe_key_pair.take() {
            Some(kp) => kp,
            None => DheKeyPair::generate(),
        };
        let self_exchange_data = key_pair.exchange_data();
        let shared_secret = key_pair
            .compute_shared_secret(peer_exchange_data)
            .map_err(|e| SessionError::KeySchedule(KeyScheduleError::Primitive(e)))?;
        self.key_schedule
            .set_session_ikm(&shared_secret)
            .map_err(SessionError::KeySchedule)?;
        Ok(self_exchange_data)
    }

    /// Install a pre-shared key as the key-schedule input for PSK sessions.
    pub fn set_psk_secret(&mut self, psk: &[u8]) -> SessionResult<()> {
        self.use_psk = true;
        self.key_schedule
            .set_session_ikm(psk)
            .map_err(SessionError::KeySchedule)
    }

    pub fn generate_session_handshake_key(&mut self, th1_hash: &[u8]) -> SessionResult<()> {
        self.key_schedule
            .generate_session_handshake_key(th1_hash)
            .map_err(SessionError::KeySchedule)
    }

    pub fn generate_session_data_key(&mut self, th2_hash: &[u8]) -> SessionResult<()> {
        self.key_schedule
            .generate_session_data_key(th2_hash)
            .map_err(SessionError::KeySchedule)
    }

    /// Record key selection for a message travelling in the given direction
    /// under the current session phase.
    pub(crate) fn record_key_type(&self, is_requester: bool) -> SessionResult<SessionKeyType> {
        match (self.session_state, is_requester) {
            (SessionState::NotStarted, _) => Err(SessionError::InvalidState),
            (SessionState::Handshaking, true) => Ok(SessionKeyType::RequestHandshakeEncDecKey),
            (SessionState::Handshaking, false) => Ok(SessionKeyType::ResponseHandshakeEncDecKey),
            (SessionState::Established, true) => Ok(SessionKeyType::RequestDataEncDecKey),
            (SessionState::Established, false) => Ok(SessionKeyType::ResponseDataEncDecKey),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_state_is_monotonic() {
        let mut info = SessionInfo::new(1);
        assert_eq!(info.session_state(), SessionState::NotStarted);
        info.set_session_state(SessionState::Handshaking).unwrap();
        info.set_session_state(SessionState::Established).unwrap();
        assert_eq!(
            info.set_session_state(SessionState::Handshaking),
            Err(SessionError::InvalidState)
        );
        assert_eq!(info.session_state(), SessionState::Established);
    }

    #[test]
    fn dhe_exchange_feeds_key_schedule() {
        let mut requester = SessionInfo::new(1);
        let mut responder = SessionInfo::new(1);

        let req_data = requester.generate_dhe_exchange_data();
        let rsp_data = responder.compute_dhe_secret(&req_data).unwrap();
        requester.compute_dhe_secret(&rsp_data).unwrap();

        // Identical IKM means identical derived keys.
        for s in [&mut requester, &mut responder] {
            s.key_schedule.init(
                crate::protocol::SpdmVersion::V12,
                crate::crypto::HashAlgo::Sha384,
                crate::crypto::AeadCipherSuite::Aes256Gcm,
            );
            s.generate_session_handshake_key(&[0x21; 48]).unwrap();
        }
        assert_eq!(
            requester
                .key_schedule
                .finished_key(SessionKeyType::RequestFinishedKey)
                .unwrap(),
            responder
                .key_schedule
                .finished_key(SessionKeyType::RequestFinishedKey)
                .unwrap()
        );
    }
}
