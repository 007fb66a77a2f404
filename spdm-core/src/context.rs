// Licensed under the Apache-2.0 license

//! The per-endpoint context: negotiated connection state, the shared
//! transcript, the session table, the endpoint/transport hooks and the
//! typed get/set surface over all of it.

use crate::codec::MessageBuf;
use crate::crypto::asym::ECDH_P384_EXCHANGE_DATA_SIZE;
use crate::crypto::hash::hash_all;
use crate::crypto::{AeadCipherSuite, HashAlgo, MAX_HASH_SIZE};
use crate::error::{LastSpdmError, SpdmError, SpdmResult};
use crate::protocol::{
    validate_supported_versions, AeadCipherSuiteType, BaseHashAlgoType, CapabilityFlags,
    DeviceAlgorithms, DeviceCapabilities, ReqRespCode, SpdmVersion,
    MAX_NUM_SUPPORTED_SPDM_VERSIONS,
};
use crate::session::key_schedule::{KeyUpdateDirection, SessionKeyType};
use crate::session::{
    SessionManager, SessionState, SessionType, MAX_SPDM_MESSAGE_BUFFER_SIZE,
};
use crate::state::{ConnectionState, ResponseState, State};
use crate::transcript::{Transcript, TranscriptDigest, TranscriptMode, TranscriptRegion};
use crate::transport::{SpdmDeviceIo, SpdmTransport};
use arrayvec::ArrayVec;
use constant_time_eq::constant_time_eq;
use log::debug;
use zeroize::Zeroize;

pub const MAX_CERT_SLOTS: usize = 8;
pub const MAX_PEER_ROOT_CERTS: usize = 10;
pub const MAX_CERT_CHAIN_SIZE: usize = 0x1000;
pub const MAX_ROOT_CERT_SIZE: usize = 0x400;
pub const MAX_PSK_HINT_LENGTH: usize = 16;
// Room for one framed record: transport header, record header, payload,
// pad and tag.
const MAX_FRAME_SIZE: usize = 0x1500;

/// Capability bits this build can actually honor. Chunking and alias
/// certificates are not implemented.
const SUPPORTED_CAPABILITY_MASK: u32 = 0x0001_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpdmRole {
    Requester,
    Responder,
}

/// Typed property keys for the get/set surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    SpdmVersion,
    SecureMessageVersion,
    CapabilityFlags,
    CapabilityCtExponent,
    CapabilityDataTransferSize,
    CapabilityMaxSpdmMsgSize,
    MeasurementSpec,
    MeasurementHashAlgo,
    BaseAsymAlgo,
    BaseHashAlgo,
    DheNamedGroup,
    AeadCipherSuite,
    ReqBaseAsymAlgo,
    KeySchedule,
    OtherParamsSupport,
    ConnectionState,
    ResponseState,
    LocalPublicCertChain,
    PeerUsedCertChainHash,
    PeerPublicKey,
    PeerPublicRootCert,
    PskHint,
    HeartbeatPeriod,
    HandleErrorReturnPolicy,
    AppContextData,
    SessionUsePsk,
    SessionMutAuthRequested,
    SessionEndSessionAttributes,
    SessionPolicy,
    ExportMasterSecret,
}

impl DataType {
    /// Session-scoped keys require a session id in the parameter.
    fn needs_session_info(&self) -> bool {
        matches!(
            self,
            DataType::SessionUsePsk
                | DataType::SessionMutAuthRequested
                | DataType::SessionEndSessionAttributes
                | DataType::SessionPolicy
                | DataType::ExportMasterSecret
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataLocation {
    Local,
    Connection,
    Session,
}

/// Location selector for [`SpdmContext::set_data`]/[`SpdmContext::get_data`].
#[derive(Debug, Clone, Copy)]
pub struct DataParameter {
    pub location: DataLocation,
    pub slot_id: u8,
    pub session_id: Option<u32>,
}

impl DataParameter {
    pub fn local() -> Self {
        Self {
            location: DataLocation::Local,
            slot_id: 0,
            session_id: None,
        }
    }

    pub fn connection() -> Self {
        Self {
            location: DataLocation::Connection,
            slot_id: 0,
            session_id: None,
        }
    }

    pub fn session(session_id: u32) -> Self {
        Self {
            location: DataLocation::Session,
            slot_id: 0,
            session_id: Some(session_id),
        }
    }
}

type CertChainBuffer = ArrayVec<u8, MAX_CERT_CHAIN_SIZE>;
type RootCertBuffer = ArrayVec<u8, MAX_ROOT_CERT_SIZE>;

/// Endpoint-local provisioning, independent of any connection.
pub(crate) struct LocalContext {
    pub(crate) supported_versions: ArrayVec<SpdmVersion, MAX_NUM_SUPPORTED_SPDM_VERSIONS>,
    pub(crate) capabilities: DeviceCapabilities,
    pub(crate) algorithms: DeviceAlgorithms,
    pub(crate) cert_chains: [Option<CertChainBuffer>; MAX_CERT_SLOTS],
    pub(crate) peer_root_certs: [Option<RootCertBuffer>; MAX_PEER_ROOT_CERTS],
    pub(crate) psk_hint: ArrayVec<u8, MAX_PSK_HINT_LENGTH>,
    pub(crate) handle_error_return_policy: u8,
    pub(crate) app_context: u64,
}

impl LocalContext {
    fn new(
        supported_versions: &[SpdmVersion],
        capabilities: DeviceCapabilities,
        algorithms: DeviceAlgorithms,
    ) -> Self {
        let mut versions = ArrayVec::new();
        let _ = versions.try_extend_from_slice(supported_versions);
        Self {
            supported_versions: versions,
            capabilities,
            algorithms,
            cert_chains: core::array::from_fn(|_| None),
            peer_root_certs: core::array::from_fn(|_| None),
            psk_hint: ArrayVec::new(),
            handle_error_return_policy: 0,
            app_context: 0,
        }
    }
}

pub struct SpdmContext<'a> {
    role: SpdmRole,
    transport: &'a dyn SpdmTransport,
    device_io: &'a mut dyn SpdmDeviceIo,
    pub(crate) local_context: LocalContext,
    pub(crate) state: State,
    pub(crate) transcript: Transcript,
    pub(crate) session_mgr: SessionManager,
}

impl<'a> SpdmContext<'a> {
    pub fn new(
        role: SpdmRole,
        supported_versions: &[SpdmVersion],
        transport: &'a dyn SpdmTransport,
        device_io: &'a mut dyn SpdmDeviceIo,
        local_capabilities: DeviceCapabilities,
        local_algorithms: DeviceAlgorithms,
        transcript_mode: TranscriptMode,
    ) -> SpdmResult<Self> {
        validate_supported_versions(supported_versions)?;
        if CapabilityFlags::has_reserved_bits(local_capabilities.flags.raw()) {
            return Err(SpdmError::InvalidParameter);
        }
        debug_assert!(
            local_capabilities.flags.raw() & !SUPPORTED_CAPABILITY_MASK == 0,
            "capability flag outside the supported set"
        );

        Ok(Self {
            role,
            transport,
            device_io,
            local_context: LocalContext::new(supported_versions, local_capabilities, local_algorithms),
            state: State::new(),
            transcript: Transcript::new(transcript_mode),
            session_mgr: SessionManager::new(),
        })
    }

    pub fn role(&self) -> SpdmRole {
        self.role
    }

    /// Version set advertised in GET_VERSION responses.
    pub fn supported_versions(&self) -> &[SpdmVersion] {
        &self.local_context.supported_versions
    }

    /// Algorithm sets advertised in NEGOTIATE_ALGORITHMS.
    pub fn local_algorithms(&self) -> &DeviceAlgorithms {
        &self.local_context.algorithms
    }

    /// Capabilities advertised in GET_CAPABILITIES responses.
    pub fn local_capabilities(&self) -> &DeviceCapabilities {
        &self.local_context.capabilities
    }

    /// Tear the endpoint back to its just-constructed state. All session
    /// key material zeroizes on the way out.
    pub fn reset(&mut self) {
        self.state.reset();
        self.transcript.reset();
        self.session_mgr.reset();
        debug!("context reset to NOT_STARTED");
    }

    pub fn last_spdm_error(&self) -> LastSpdmError {
        self.session_mgr.last_error()
    }

    /// Session the most recent secured record resolved to.
    pub fn active_session_id(&self) -> Option<u32> {
        self.session_mgr.active_session_id()
    }

    /// Responder-side session-id construction for KEY_EXCHANGE_RSP.
    pub fn generate_session_id(&mut self, requester_session_id: u16) -> u32 {
        self.session_mgr.generate_session_id(requester_session_id).0
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    pub fn connection_state(&self) -> ConnectionState {
        self.state.connection_info.state()
    }

    pub fn set_connection_state(&mut self, state: ConnectionState) {
        self.state.connection_info.set_state(state);
    }

    pub fn response_state(&self) -> ResponseState {
        self.state.response_state
    }

    pub fn set_response_state(&mut self, response_state: ResponseState) {
        self.state.response_state = response_state;
    }

    /// Fix the negotiated version for this connection. Also binds the
    /// transcript's bin_str/L1L2 version gating.
    pub fn set_connection_version(&mut self, version: SpdmVersion) {
        self.state.connection_info.set_version_number(version);
        self.transcript.set_spdm_version(version);
    }

    fn negotiated_hash_algo(&self) -> HashAlgo {
        self.state
            .connection_info
            .selected_algorithms()
            .base_hash_algo
            .into()
    }

    fn negotiated_aead_suite(&self) -> AeadCipherSuite {
        self.state
            .connection_info
            .selected_algorithms()
            .aead_cipher_suite
            .into()
    }

    // ------------------------------------------------------------------
    // Transcript surface
    // ------------------------------------------------------------------

    /// Append on-wire bytes to a connection-scope transcript region.
    pub fn append_message(&mut self, region: TranscriptRegion, data: &[u8]) -> SpdmResult<()> {
        self.session_mgr.clear_last_error();
        self.transcript.append(region, data)?;
        Ok(())
    }

    pub fn reset_message(&mut self, region: TranscriptRegion) {
        self.transcript.reset_region(region);
    }

    /// Apply the transcript-reset policy for an incoming request code.
    pub fn reset_message_by_request(&mut self, request_code: ReqRespCode) {
        self.transcript
            .reset_by_request(request_code, self.state.connection_info.state());
    }

    pub fn transcript_digest(
        &mut self,
        selector: TranscriptDigest,
        hash: &mut [u8],
    ) -> SpdmResult<usize> {
        self.session_mgr.clear_last_error();
        Ok(self.transcript.digest(selector, hash)?)
    }

    /// The certificate-chain hash bound into a session's TH: the peer's
    /// chain when requesting, our own provisioned chain when responding.
    fn session_cert_chain_hash(
        &self,
        use_psk: bool,
        slot_id: u8,
    ) -> SpdmResult<Option<ArrayVec<u8, MAX_HASH_SIZE>>> {
        if use_psk {
            return Ok(None);
        }
        match self.role {
            SpdmRole::Requester => match self.state.connection_info.peer_cert_chain_hash() {
                Some(hash) => {
                    let mut out = ArrayVec::new();
                    let _ = out.try_extend_from_slice(hash);
                    Ok(Some(out))
                }
                None => Ok(None),
            },
            SpdmRole::Responder => {
                let chain = self
                    .local_context
                    .cert_chains
                    .get(slot_id as usize)
                    .and_then(|c| c.as_ref());
                match chain {
                    Some(chain) => Ok(Some(self.hash_cert_chain(chain)?)),
                    None => Ok(None),
                }
            }
        }
    }

    fn hash_cert_chain(&self, chain: &[u8]) -> SpdmResult<ArrayVec<u8, MAX_HASH_SIZE>> {
        let mut digest = [0u8; MAX_HASH_SIZE];
        let n = hash_all(self.negotiated_hash_algo(), chain, &mut digest)?;
        let mut out = ArrayVec::new();
        let _ = out.try_extend_from_slice(&digest[..n]);
        Ok(out)
    }

    /// Append KEY_EXCHANGE..FINISH bytes to a session's K region.
    pub fn append_message_k(&mut self, session_id: u32, data: &[u8]) -> SpdmResult<()> {
        let use_psk = self.session_mgr.session_info(session_id)?.use_psk;
        let cert_chain_hash = self.session_cert_chain_hash(use_psk, 0)?;
        let Self {
            transcript,
            session_mgr,
            ..
        } = self;
        let session = session_mgr.session_info_mut(session_id)?;
        transcript.append_k(session, cert_chain_hash.as_ref().map(|h| h.as_slice()), data)?;
        Ok(())
    }

    /// Append post-handshake bytes to a session's F region.
    pub fn append_message_f(&mut self, session_id: u32, data: &[u8]) -> SpdmResult<()> {
        let (use_psk, mut_auth) = {
            let info = self.session_mgr.session_info(session_id)?;
            (info.use_psk, info.mut_auth_requested)
        };
        // Mutual auth binds the other side's chain: ours when requesting,
        // the peer's when responding.
        let mut_cert_chain_hash = if !use_psk && mut_auth {
            match self.role {
                SpdmRole::Requester => match self.local_context.cert_chains[0].as_ref() {
                    Some(chain) => Some(self.hash_cert_chain(chain)?),
                    None => None,
                },
                SpdmRole::Responder => {
                    self.state.connection_info.peer_cert_chain_hash().map(|h| {
                        let mut out = ArrayVec::new();
                        let _ = out.try_extend_from_slice(h);
                        out
                    })
                }
            }
        } else {
            None
        };

        let Self {
            transcript,
            session_mgr,
            ..
        } = self;
        let session = session_mgr.session_info_mut(session_id)?;
        transcript.append_f(
            session,
            mut_cert_chain_hash.as_ref().map(|h| h.as_slice()),
            data,
        )?;
        Ok(())
    }

    /// Drop a session's K region and everything derived from it.
    pub fn reset_message_k(&mut self, session_id: u32) -> SpdmResult<()> {
        let Self {
            transcript,
            session_mgr,
            ..
        } = self;
        let session = session_mgr.session_info_mut(session_id)?;
        transcript.reset_k(session);
        Ok(())
    }

    /// Roll a session's transcript back to the pre-F snapshot.
    pub fn reset_message_f(&mut self, session_id: u32) -> SpdmResult<()> {
        let Self {
            transcript,
            session_mgr,
            ..
        } = self;
        let session = session_mgr.session_info_mut(session_id)?;
        transcript.reset_f(session);
        Ok(())
    }

    pub fn session_th_digest(&self, session_id: u32, hash: &mut [u8]) -> SpdmResult<usize> {
        let session = self.session_mgr.session_info(session_id)?;
        Ok(self.transcript.th_digest(session, hash)?)
    }

    /// FINISH verify-data: finished-key HMAC over the session transcript.
    pub fn session_th_hmac(
        &self,
        session_id: u32,
        key_type: SessionKeyType,
        mac: &mut [u8],
    ) -> SpdmResult<usize> {
        let session = self.session_mgr.session_info(session_id)?;
        Ok(self.transcript.th_hmac(session, key_type, mac)?)
    }

    /// Check the peer's FINISH verify-data in constant time.
    pub fn verify_session_th_hmac(
        &self,
        session_id: u32,
        key_type: SessionKeyType,
        peer_mac: &[u8],
    ) -> SpdmResult<()> {
        let mut expected = [0u8; MAX_HASH_SIZE];
        let n = self.session_th_hmac(session_id, key_type, &mut expected)?;
        let matches = peer_mac.len() == n && constant_time_eq(&expected[..n], peer_mac);
        expected.zeroize();
        if !matches {
            return Err(SpdmError::SecurityViolation);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Session lifecycle and key schedule
    // ------------------------------------------------------------------

    /// Allocate a session slot and bind it to the negotiated version and
    /// algorithms.
    pub fn start_session(
        &mut self,
        session_id: u32,
        session_type: SessionType,
        use_psk: bool,
    ) -> SpdmResult<()> {
        self.session_mgr.clear_last_error();
        let version = self.state.connection_info.version_number();
        let hash_algo = self.negotiated_hash_algo();
        let aead_suite = self.negotiated_aead_suite();

        self.session_mgr.create_session(session_id)?;
        let session = self.session_mgr.session_info_mut(session_id)?;
        session.use_psk = use_psk;
        session.session_type = session_type;
        session.key_schedule.init(version, hash_algo, aead_suite);
        session.set_session_state(SessionState::Handshaking)?;
        Ok(())
    }

    pub fn end_session(&mut self, session_id: u32) -> SpdmResult<()> {
        self.session_mgr.clear_last_error();
        self.session_mgr.delete_session(session_id)?;
        if self.session_mgr.sessions_in_state(SessionState::Established) == 0
            && self.connection_state() == ConnectionState::SessionEstablished
        {
            self.set_connection_state(ConnectionState::Authenticated);
        }
        Ok(())
    }

    pub fn session_state(&self, session_id: u32) -> SpdmResult<SessionState> {
        Ok(self.session_mgr.session_info(session_id)?.session_state())
    }

    pub fn set_session_state(&mut self, session_id: u32, state: SessionState) -> SpdmResult<()> {
        self.session_mgr
            .session_info_mut(session_id)?
            .set_session_state(state)?;
        if state == SessionState::Established {
            self.set_connection_state(ConnectionState::SessionEstablished);
        }
        Ok(())
    }

    /// Generate the local DHE share for KEY_EXCHANGE.
    pub fn generate_dhe_exchange_data(
        &mut self,
        session_id: u32,
    ) -> SpdmResult<[u8; ECDH_P384_EXCHANGE_DATA_SIZE]> {
        Ok(self
            .session_mgr
            .session_info_mut(session_id)?
            .generate_dhe_exchange_data())
    }

    /// Complete the DHE exchange with the peer's share; returns the local
    /// share for responders that never generated one up front.
    pub fn compute_dhe_secret(
        &mut self,
        session_id: u32,
        peer_exchange_data: &[u8],
    ) -> SpdmResult<[u8; ECDH_P384_EXCHANGE_DATA_SIZE]> {
        Ok(self
            .session_mgr
            .session_info_mut(session_id)?
            .compute_dhe_secret(peer_exchange_data)?)
    }

    /// Install the pre-shared key for a PSK session.
    pub fn set_session_psk(&mut self, session_id: u32, psk: &[u8]) -> SpdmResult<()> {
        Ok(self
            .session_mgr
            .session_info_mut(session_id)?
            .set_psk_secret(psk)?)
    }

    /// Derive the handshake secrets bound to TH at the KEY_EXCHANGE_RSP
    /// boundary.
    pub fn generate_session_handshake_key(&mut self, session_id: u32) -> SpdmResult<()> {
        let hash_size = self.negotiated_hash_algo().size();
        let mut th1 = [0u8; MAX_HASH_SIZE];
        self.session_th_digest(session_id, &mut th1)?;
        self.session_mgr
            .session_info_mut(session_id)?
            .generate_session_handshake_key(&th1[..hash_size])?;
        th1.zeroize();
        Ok(())
    }

    /// Derive the data secrets bound to TH at the FINISH boundary.
    pub fn generate_session_data_key(&mut self, session_id: u32) -> SpdmResult<()> {
        let hash_size = self.negotiated_hash_algo().size();
        let mut th2 = [0u8; MAX_HASH_SIZE];
        self.session_th_digest(session_id, &mut th2)?;
        self.session_mgr
            .session_info_mut(session_id)?
            .generate_session_data_key(&th2[..hash_size])?;
        th2.zeroize();
        Ok(())
    }

    pub fn create_update_session_data_key(
        &mut self,
        session_id: u32,
        direction: KeyUpdateDirection,
    ) -> SpdmResult<()> {
        self.session_mgr
            .session_info_mut(session_id)?
            .key_schedule
            .create_update_session_data_key(direction)
            .map_err(|_| SpdmError::DeviceError)
    }

    pub fn activate_update_session_data_key(
        &mut self,
        session_id: u32,
        direction: KeyUpdateDirection,
        use_new_key: bool,
    ) -> SpdmResult<()> {
        self.session_mgr
            .session_info_mut(session_id)?
            .key_schedule
            .activate_update_session_data_key(direction, use_new_key);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Message plumbing
    // ------------------------------------------------------------------

    /// Send one message, secured iff `session_id` is given: record layer,
    /// then transport framing, then the device hook.
    pub fn send_message(
        &mut self,
        session_id: Option<u32>,
        app_message: &[u8],
        timeout_us: u32,
    ) -> SpdmResult<()> {
        self.session_mgr.clear_last_error();
        if app_message.len() > MAX_SPDM_MESSAGE_BUFFER_SIZE {
            return Err(SpdmError::InvalidParameter);
        }

        let mut storage = [0u8; MAX_FRAME_SIZE];
        let mut msg = MessageBuf::new(&mut storage);
        msg.reserve(self.transport.header_size())
            .map_err(|_| SpdmError::BufferTooSmall)?;

        match session_id {
            Some(id) => {
                let is_requester = self.role == SpdmRole::Requester;
                self.session_mgr.encode_secure_message(
                    self.transport,
                    id,
                    is_requester,
                    app_message,
                    &mut msg,
                )?;
            }
            None => {
                crate::codec::encode_u8_slice(app_message, &mut msg)
                    .map_err(|_| SpdmError::BufferTooSmall)?;
                msg.push_data(app_message.len())
                    .map_err(|_| SpdmError::InvalidParameter)?;
            }
        }

        self.transport.encode_frame(session_id, &mut msg)?;
        self.device_io.send(msg.message_data(), timeout_us)?;
        Ok(())
    }

    /// Receive one message. Returns the session id for secured records
    /// (after opening them) and the delivered payload length. A record that
    /// fails authentication frees its session.
    pub fn receive_message(
        &mut self,
        app_message: &mut [u8],
        timeout_us: u32,
    ) -> SpdmResult<(Option<u32>, usize)> {
        self.session_mgr.clear_last_error();

        let mut storage = [0u8; MAX_FRAME_SIZE];
        let received = self.device_io.receive(&mut storage, timeout_us)?;
        let mut msg = MessageBuf::new(&mut storage);
        msg.put_data(received).map_err(|_| SpdmError::DeviceError)?;

        let secured = self.transport.decode_frame(&mut msg)?;
        match secured {
            None => {
                let len = msg.data_len();
                if app_message.len() < len {
                    return Err(SpdmError::BufferTooSmall);
                }
                app_message[..len].copy_from_slice(msg.message_data());
                Ok((None, len))
            }
            Some(_) => {
                let is_requester = self.role == SpdmRole::Responder;
                let result = self.session_mgr.decode_secure_message(
                    self.transport,
                    is_requester,
                    &mut msg,
                    app_message,
                );
                match result {
                    Ok((session_id, len)) => Ok((Some(session_id), len)),
                    Err(e) => {
                        // Counter exhaustion on the inbound path is a
                        // security violation, not a resource error.
                        let mapped = match e {
                            crate::session::SessionError::SequenceNumberOverflow => {
                                SpdmError::SecurityViolation
                            }
                            other => other.into(),
                        };
                        if mapped == SpdmError::SecurityViolation {
                            // An unauthenticated record poisons the session.
                            let failed = self.session_mgr.last_error().session_id;
                            if failed != 0 {
                                let _ = self.session_mgr.delete_session(failed);
                            }
                        }
                        Err(mapped)
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Data accessor
    // ------------------------------------------------------------------

    /// Set one typed property. Lengths are exact; a wrong length, location
    /// or reserved bit is `InvalidParameter`.
    pub fn set_data(
        &mut self,
        data_type: DataType,
        parameter: &DataParameter,
        data: &[u8],
    ) -> SpdmResult<()> {
        self.session_mgr.clear_last_error();
        if data_type.needs_session_info() {
            return self.set_session_data(data_type, parameter, data);
        }

        match data_type {
            DataType::SpdmVersion => match parameter.location {
                DataLocation::Connection => {
                    let version = SpdmVersion::try_from(read_u8(data)?)?;
                    self.set_connection_version(version);
                    Ok(())
                }
                DataLocation::Local => {
                    if data.is_empty() || data.len() > MAX_NUM_SUPPORTED_SPDM_VERSIONS {
                        return Err(SpdmError::InvalidParameter);
                    }
                    let mut versions = ArrayVec::new();
                    for &raw in data {
                        versions.push(SpdmVersion::try_from(raw)?);
                    }
                    self.local_context.supported_versions = versions;
                    Ok(())
                }
                _ => Err(SpdmError::InvalidParameter),
            },
            DataType::SecureMessageVersion => match parameter.location {
                DataLocation::Connection => {
                    let version = SpdmVersion::try_from(read_u8(data)?)?;
                    self.state.connection_info.set_secure_msg_version(version);
                    Ok(())
                }
                _ => Err(SpdmError::InvalidParameter),
            },
            DataType::CapabilityFlags => {
                let raw = read_u32(data)?;
                if CapabilityFlags::has_reserved_bits(raw) {
                    return Err(SpdmError::InvalidParameter);
                }
                match parameter.location {
                    DataLocation::Local => {
                        debug_assert!(
                            raw & !SUPPORTED_CAPABILITY_MASK == 0,
                            "capability flag outside the supported set"
                        );
                        self.local_context.capabilities.flags = CapabilityFlags::new(raw);
                        Ok(())
                    }
                    DataLocation::Connection => {
                        self.state.connection_info.peer_capabilities_mut().flags =
                            CapabilityFlags::new(raw);
                        Ok(())
                    }
                    _ => Err(SpdmError::InvalidParameter),
                }
            }
            DataType::CapabilityCtExponent => {
                let value = read_u8(data)?;
                match parameter.location {
                    DataLocation::Local => {
                        self.local_context.capabilities.ct_exponent = value;
                        Ok(())
                    }
                    DataLocation::Connection => {
                        self.state.connection_info.peer_capabilities_mut().ct_exponent = value;
                        Ok(())
                    }
                    _ => Err(SpdmError::InvalidParameter),
                }
            }
            DataType::CapabilityDataTransferSize => {
                let value = read_u32(data)?;
                match parameter.location {
                    DataLocation::Local => {
                        self.local_context.capabilities.data_transfer_size = value;
                        Ok(())
                    }
                    DataLocation::Connection => {
                        self.state
                            .connection_info
                            .peer_capabilities_mut()
                            .data_transfer_size = value;
                        Ok(())
                    }
                    _ => Err(SpdmError::InvalidParameter),
                }
            }
            DataType::CapabilityMaxSpdmMsgSize => {
                let value = read_u32(data)?;
                match parameter.location {
                    DataLocation::Local => {
                        self.local_context.capabilities.max_spdm_msg_size = value;
                        Ok(())
                    }
                    DataLocation::Connection => {
                        self.state
                            .connection_info
                            .peer_capabilities_mut()
                            .max_spdm_msg_size = value;
                        Ok(())
                    }
                    _ => Err(SpdmError::InvalidParameter),
                }
            }
            DataType::MeasurementSpec => {
                require_connection(parameter)?;
                self.state
                    .connection_info
                    .selected_algorithms_mut()
                    .measurement_spec = crate::protocol::MeasurementSpecification(read_u8(data)?);
                Ok(())
            }
            DataType::MeasurementHashAlgo => {
                require_connection(parameter)?;
                self.state
                    .connection_info
                    .selected_algorithms_mut()
                    .measurement_hash_algo = crate::protocol::MeasurementHashAlgo(read_u32(data)?);
                Ok(())
            }
            DataType::BaseAsymAlgo => {
                require_connection(parameter)?;
                // TPM_ALG_ECDSA_ECC_NIST_P384 is the one compiled-in choice.
                if read_u32(data)? != 1 << 7 {
                    return Err(SpdmError::Unsupported);
                }
                self.state
                    .connection_info
                    .selected_algorithms_mut()
                    .base_asym_algo = crate::crypto::asym::AsymAlgo::EcdsaP384;
                Ok(())
            }
            DataType::BaseHashAlgo => {
                require_connection(parameter)?;
                let selected = match read_u32(data)? {
                    0x0000_0001 => BaseHashAlgoType::TpmAlgSha256,
                    0x0000_0002 => BaseHashAlgoType::TpmAlgSha384,
                    0x0000_0004 => BaseHashAlgoType::TpmAlgSha512,
                    _ => return Err(SpdmError::Unsupported),
                };
                self.state
                    .connection_info
                    .selected_algorithms_mut()
                    .base_hash_algo = selected;
                self.transcript.set_hash_algo(selected.into());
                Ok(())
            }
            DataType::DheNamedGroup => {
                require_connection(parameter)?;
                if read_u16(data)? != 0x0010 {
                    return Err(SpdmError::Unsupported);
                }
                self.state
                    .connection_info
                    .selected_algorithms_mut()
                    .dhe_group = crate::protocol::DheGroupType::Secp384r1;
                Ok(())
            }
            DataType::AeadCipherSuite => {
                require_connection(parameter)?;
                let selected = match read_u16(data)? {
                    0x0001 => AeadCipherSuiteType::Aes128Gcm,
                    0x0002 => AeadCipherSuiteType::Aes256Gcm,
                    0x0004 => AeadCipherSuiteType::ChaCha20Poly1305,
                    _ => return Err(SpdmError::Unsupported),
                };
                self.state
                    .connection_info
                    .selected_algorithms_mut()
                    .aead_cipher_suite = selected;
                Ok(())
            }
            DataType::ReqBaseAsymAlgo => {
                require_connection(parameter)?;
                if read_u16(data)? != 1 << 7 {
                    return Err(SpdmError::Unsupported);
                }
                self.state
                    .connection_info
                    .selected_algorithms_mut()
                    .req_base_asym_algo = crate::crypto::asym::AsymAlgo::EcdsaP384;
                Ok(())
            }
            DataType::KeySchedule => {
                require_connection(parameter)?;
                if read_u16(data)? != 0x0001 {
                    return Err(SpdmError::Unsupported);
                }
                self.state
                    .connection_info
                    .selected_algorithms_mut()
                    .key_schedule = crate::protocol::KeyScheduleFlags(0x0001);
                Ok(())
            }
            DataType::OtherParamsSupport => {
                require_connection(parameter)?;
                self.state
                    .connection_info
                    .selected_algorithms_mut()
                    .other_param_selection = crate::protocol::OtherParamSupport(read_u8(data)?);
                Ok(())
            }
            DataType::ConnectionState => {
                require_connection(parameter)?;
                let state = match read_u8(data)? {
                    0 => ConnectionState::NotStarted,
                    1 => ConnectionState::AfterVersion,
                    2 => ConnectionState::AfterCapabilities,
                    3 => ConnectionState::Negotiated,
                    4 => ConnectionState::AfterDigests,
                    5 => ConnectionState::AfterCertificate,
                    6 => ConnectionState::Authenticated,
                    7 => ConnectionState::SessionEstablished,
                    _ => return Err(SpdmError::InvalidParameter),
                };
                self.set_connection_state(state);
                Ok(())
            }
            DataType::ResponseState => {
                require_local(parameter)?;
                self.state.response_state = match read_u8(data)? {
                    0 => ResponseState::Normal,
                    1 => ResponseState::Busy,
                    2 => ResponseState::NotReady,
                    3 => ResponseState::NeedResync,
                    4 => ResponseState::ProcessingEncap,
                    _ => return Err(SpdmError::InvalidParameter),
                };
                Ok(())
            }
            DataType::LocalPublicCertChain => {
                require_local(parameter)?;
                let slot = parameter.slot_id as usize;
                if slot >= MAX_CERT_SLOTS || data.is_empty() {
                    return Err(SpdmError::InvalidParameter);
                }
                let mut chain = CertChainBuffer::new();
                chain
                    .try_extend_from_slice(data)
                    .map_err(|_| SpdmError::OutOfResources)?;
                self.local_context.cert_chains[slot] = Some(chain);
                Ok(())
            }
            DataType::PeerUsedCertChainHash => {
                require_connection(parameter)?;
                if data.len() != self.negotiated_hash_algo().size() {
                    return Err(SpdmError::InvalidParameter);
                }
                if !self.state.connection_info.set_peer_cert_chain_hash(data) {
                    return Err(SpdmError::OutOfResources);
                }
                Ok(())
            }
            DataType::PeerPublicKey => {
                require_connection(parameter)?;
                if !self.state.connection_info.set_peer_public_key(data) {
                    return Err(SpdmError::InvalidParameter);
                }
                Ok(())
            }
            DataType::PeerPublicRootCert => {
                require_local(parameter)?;
                let slot = parameter.slot_id as usize;
                if slot >= MAX_PEER_ROOT_CERTS || data.is_empty() {
                    return Err(SpdmError::InvalidParameter);
                }
                let mut cert = RootCertBuffer::new();
                cert.try_extend_from_slice(data)
                    .map_err(|_| SpdmError::OutOfResources)?;
                self.local_context.peer_root_certs[slot] = Some(cert);
                Ok(())
            }
            DataType::PskHint => {
                require_local(parameter)?;
                if data.len() > MAX_PSK_HINT_LENGTH {
                    return Err(SpdmError::InvalidParameter);
                }
                self.local_context.psk_hint.clear();
                let _ = self.local_context.psk_hint.try_extend_from_slice(data);
                Ok(())
            }
            DataType::HeartbeatPeriod => {
                require_connection(parameter)?;
                self.state
                    .connection_info
                    .set_heartbeat_period(read_u8(data)?);
                Ok(())
            }
            DataType::HandleErrorReturnPolicy => {
                require_local(parameter)?;
                self.local_context.handle_error_return_policy = read_u8(data)?;
                Ok(())
            }
            DataType::AppContextData => {
                require_local(parameter)?;
                self.local_context.app_context = u64::from_le_bytes(
                    data.try_into().map_err(|_| SpdmError::InvalidParameter)?,
                );
                Ok(())
            }
            _ => Err(SpdmError::Unsupported),
        }
    }

    fn set_session_data(
        &mut self,
        data_type: DataType,
        parameter: &DataParameter,
        data: &[u8],
    ) -> SpdmResult<()> {
        if parameter.location != DataLocation::Session {
            return Err(SpdmError::InvalidParameter);
        }
        let session_id = parameter.session_id.ok_or(SpdmError::InvalidParameter)?;
        let session = self
            .session_mgr
            .session_info_mut(session_id)
            .map_err(|_| SpdmError::InvalidParameter)?;

        match data_type {
            DataType::SessionUsePsk => session.use_psk = read_u8(data)? != 0,
            DataType::SessionMutAuthRequested => session.mut_auth_requested = read_u8(data)? != 0,
            DataType::SessionEndSessionAttributes => {
                session.end_session_attributes =
                    crate::session::EndSessionAttributes(read_u8(data)?)
            }
            DataType::SessionPolicy => {
                session.session_policy = crate::session::SessionPolicy(read_u8(data)?)
            }
            _ => return Err(SpdmError::Unsupported),
        }
        Ok(())
    }

    /// Read one typed property into `data`, returning the written length.
    pub fn get_data(
        &self,
        data_type: DataType,
        parameter: &DataParameter,
        data: &mut [u8],
    ) -> SpdmResult<usize> {
        if data_type.needs_session_info() {
            return self.get_session_data(data_type, parameter, data);
        }

        match data_type {
            DataType::SpdmVersion => {
                require_connection(parameter)?;
                write_bytes(data, &[self.state.connection_info.version_number().into()])
            }
            DataType::SecureMessageVersion => {
                require_connection(parameter)?;
                let version = self
                    .state
                    .connection_info
                    .secure_msg_version()
                    .ok_or(SpdmError::NotReady)?;
                write_bytes(data, &[version.into()])
            }
            DataType::CapabilityFlags => {
                let raw = match parameter.location {
                    DataLocation::Local => self.local_context.capabilities.flags.raw(),
                    DataLocation::Connection => {
                        self.state.connection_info.peer_capabilities().flags.raw()
                    }
                    _ => return Err(SpdmError::InvalidParameter),
                };
                write_bytes(data, &raw.to_le_bytes())
            }
            DataType::CapabilityCtExponent => {
                let value = match parameter.location {
                    DataLocation::Local => self.local_context.capabilities.ct_exponent,
                    DataLocation::Connection => {
                        self.state.connection_info.peer_capabilities().ct_exponent
                    }
                    _ => return Err(SpdmError::InvalidParameter),
                };
                write_bytes(data, &[value])
            }
            DataType::CapabilityDataTransferSize => {
                let value = match parameter.location {
                    DataLocation::Local => self.local_context.capabilities.data_transfer_size,
                    DataLocation::Connection => {
                        self.state
                            .connection_info
                            .peer_capabilities()
                            .data_transfer_size
                    }
                    _ => return Err(SpdmError::InvalidParameter),
                };
                write_bytes(data, &value.to_le_bytes())
            }
            DataType::CapabilityMaxSpdmMsgSize => {
                let value = match parameter.location {
                    DataLocation::Local => self.local_context.capabilities.max_spdm_msg_size,
                    DataLocation::Connection => {
                        self.state
                            .connection_info
                            .peer_capabilities()
                            .max_spdm_msg_size
                    }
                    _ => return Err(SpdmError::InvalidParameter),
                };
                write_bytes(data, &value.to_le_bytes())
            }
            DataType::MeasurementSpec => {
                require_connection(parameter)?;
                let spec = self
                    .state
                    .connection_info
                    .selected_algorithms()
                    .measurement_spec;
                write_bytes(data, &[spec.0])
            }
            DataType::MeasurementHashAlgo => {
                require_connection(parameter)?;
                let algo = self
                    .state
                    .connection_info
                    .selected_algorithms()
                    .measurement_hash_algo;
                write_bytes(data, &algo.0.to_le_bytes())
            }
            DataType::BaseAsymAlgo => {
                require_connection(parameter)?;
                write_bytes(data, &(1u32 << 7).to_le_bytes())
            }
            DataType::BaseHashAlgo => {
                require_connection(parameter)?;
                let raw: u32 = match self
                    .state
                    .connection_info
                    .selected_algorithms()
                    .base_hash_algo
                {
                    BaseHashAlgoType::TpmAlgSha256 => 0x0000_0001,
                    BaseHashAlgoType::TpmAlgSha384 => 0x0000_0002,
                    BaseHashAlgoType::TpmAlgSha512 => 0x0000_0004,
                };
                write_bytes(data, &raw.to_le_bytes())
            }
            DataType::DheNamedGroup => {
                require_connection(parameter)?;
                write_bytes(data, &0x0010u16.to_le_bytes())
            }
            DataType::AeadCipherSuite => {
                require_connection(parameter)?;
                let raw: u16 = match self
                    .state
                    .connection_info
                    .selected_algorithms()
                    .aead_cipher_suite
                {
                    AeadCipherSuiteType::Aes128Gcm => 0x0001,
                    AeadCipherSuiteType::Aes256Gcm => 0x0002,
                    AeadCipherSuiteType::ChaCha20Poly1305 => 0x0004,
                };
                write_bytes(data, &raw.to_le_bytes())
            }
            DataType::ReqBaseAsymAlgo => {
                require_connection(parameter)?;
                write_bytes(data, &(1u16 << 7).to_le_bytes())
            }
            DataType::KeySchedule => {
                require_connection(parameter)?;
                let raw = self
                    .state
                    .connection_info
                    .selected_algorithms()
                    .key_schedule
                    .0;
                write_bytes(data, &raw.to_le_bytes())
            }
            DataType::OtherParamsSupport => {
                require_connection(parameter)?;
                let raw = self
                    .state
                    .connection_info
                    .selected_algorithms()
                    .other_param_selection
                    .0;
                write_bytes(data, &[raw])
            }
            DataType::ConnectionState => {
                require_connection(parameter)?;
                write_bytes(data, &[self.connection_state() as u8])
            }
            DataType::ResponseState => {
                require_local(parameter)?;
                write_bytes(data, &[self.state.response_state as u8])
            }
            DataType::LocalPublicCertChain => {
                require_local(parameter)?;
                let slot = parameter.slot_id as usize;
                let chain = self
                    .local_context
                    .cert_chains
                    .get(slot)
                    .and_then(|c| c.as_ref())
                    .ok_or(SpdmError::InvalidParameter)?;
                write_bytes(data, chain)
            }
            DataType::PeerUsedCertChainHash => {
                require_connection(parameter)?;
                let hash = self
                    .state
                    .connection_info
                    .peer_cert_chain_hash()
                    .ok_or(SpdmError::NotReady)?;
                write_bytes(data, hash)
            }
            DataType::PeerPublicKey => {
                require_connection(parameter)?;
                let key = self
                    .state
                    .connection_info
                    .peer_public_key()
                    .ok_or(SpdmError::NotReady)?;
                write_bytes(data, key)
            }
            DataType::PeerPublicRootCert => {
                require_local(parameter)?;
                let cert = self
                    .local_context
                    .peer_root_certs
                    .get(parameter.slot_id as usize)
                    .and_then(|c| c.as_ref())
                    .ok_or(SpdmError::InvalidParameter)?;
                write_bytes(data, cert)
            }
            DataType::PskHint => {
                require_local(parameter)?;
                write_bytes(data, &self.local_context.psk_hint)
            }
            DataType::HeartbeatPeriod => {
                require_connection(parameter)?;
                write_bytes(data, &[self.state.connection_info.heartbeat_period()])
            }
            DataType::HandleErrorReturnPolicy => {
                require_local(parameter)?;
                write_bytes(data, &[self.local_context.handle_error_return_policy])
            }
            DataType::AppContextData => {
                require_local(parameter)?;
                write_bytes(data, &self.local_context.app_context.to_le_bytes())
            }
            _ => Err(SpdmError::Unsupported),
        }
    }

    fn get_session_data(
        &self,
        data_type: DataType,
        parameter: &DataParameter,
        data: &mut [u8],
    ) -> SpdmResult<usize> {
        if parameter.location != DataLocation::Session {
            return Err(SpdmError::InvalidParameter);
        }
        let session_id = parameter.session_id.ok_or(SpdmError::InvalidParameter)?;
        let session = self
            .session_mgr
            .session_info(session_id)
            .map_err(|_| SpdmError::InvalidParameter)?;

        let value = match data_type {
            DataType::SessionUsePsk => session.use_psk as u8,
            DataType::SessionMutAuthRequested => session.mut_auth_requested as u8,
            DataType::SessionEndSessionAttributes => session.end_session_attributes.0,
            DataType::SessionPolicy => session.session_policy.0,
            DataType::ExportMasterSecret => {
                let secret = session
                    .key_schedule
                    .export_master_secret()
                    .ok_or(SpdmError::NotReady)?;
                return write_bytes(data, secret);
            }
            _ => return Err(SpdmError::Unsupported),
        };
        write_bytes(data, &[value])
    }
}

fn require_connection(parameter: &DataParameter) -> SpdmResult<()> {
    if parameter.location != DataLocation::Connection {
        return Err(SpdmError::InvalidParameter);
    }
    Ok(())
}

fn require_local(parameter: &DataParameter) -> SpdmResult<()> {
    if parameter.location != DataLocation::Local {
        return Err(SpdmError::InvalidParameter);
    }
    Ok(())
}

fn read_u8(data: &[u8]) -> SpdmResult<u8> {
    if data.len() != 1 {
        return Err(SpdmError::InvalidParameter);
    }
    Ok(data[0])
}

fn read_u16(data: &[u8]) -> SpdmResult<u16> {
    let bytes: [u8; 2] = data.try_into().map_err(|_| SpdmError::InvalidParameter)?;
    Ok(u16::from_le_bytes(bytes))
}

fn read_u32(data: &[u8]) -> SpdmResult<u32> {
    let bytes: [u8; 4] = data.try_into().map_err(|_| SpdmError::InvalidParameter)?;
    Ok(u32::from_le_bytes(bytes))
}

fn write_bytes(out: &mut [u8], value: &[u8]) -> SpdmResult<usize> {
    if out.len() < value.len() {
        return Err(SpdmError::BufferTooSmall);
    }
    out[..value.len()].copy_from_slice(value);
    Ok(value.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::hash_all;
    use crate::session::SessionState;
    use crate::transport::test_util::{LoopbackDeviceIo, LoopbackTransport};

    const SESSION_ID: u32 = 0x0001_0001;
    const TIMEOUT_US: u32 = 1_000;

    fn capabilities() -> DeviceCapabilities {
        let mut flags = CapabilityFlags::default();
        flags.set_cert_cap(1);
        flags.set_encrypt_cap(1);
        flags.set_mac_cap(1);
        flags.set_key_ex_cap(1);
        flags.set_key_upd_cap(1);
        DeviceCapabilities {
            ct_exponent: 12,
            flags,
            data_transfer_size: MAX_SPDM_MESSAGE_BUFFER_SIZE as u32,
            max_spdm_msg_size: MAX_SPDM_MESSAGE_BUFFER_SIZE as u32,
        }
    }

    fn context<'a>(
        role: SpdmRole,
        transport: &'a LoopbackTransport,
        device_io: &'a mut LoopbackDeviceIo,
        mode: TranscriptMode,
    ) -> SpdmContext<'a> {
        SpdmContext::new(
            role,
            &[SpdmVersion::V12],
            transport,
            device_io,
            capabilities(),
            DeviceAlgorithms::default(),
            mode,
        )
        .unwrap()
    }

    fn negotiate(ctx: &mut SpdmContext) {
        let conn = DataParameter::connection();
        ctx.set_data(DataType::SpdmVersion, &conn, &[0x12]).unwrap();
        ctx.set_data(DataType::BaseHashAlgo, &conn, &2u32.to_le_bytes())
            .unwrap();
        ctx.set_data(DataType::BaseAsymAlgo, &conn, &(1u32 << 7).to_le_bytes())
            .unwrap();
        ctx.set_data(DataType::DheNamedGroup, &conn, &0x0010u16.to_le_bytes())
            .unwrap();
        ctx.set_data(DataType::AeadCipherSuite, &conn, &2u16.to_le_bytes())
            .unwrap();
        ctx.set_data(DataType::KeySchedule, &conn, &1u16.to_le_bytes())
            .unwrap();
        ctx.set_connection_state(ConnectionState::Negotiated);
    }

    #[test]
    fn capability_flags_round_trip() {
        let transport = LoopbackTransport::default();
        let (mut dev, _peer) = LoopbackDeviceIo::pair();
        let mut ctx = context(
            SpdmRole::Requester,
            &transport,
            &mut dev,
            TranscriptMode::Retained,
        );

        assert_eq!(ctx.supported_versions(), &[SpdmVersion::V12]);
        assert_eq!(ctx.local_algorithms().base_hash_algo.0, 0);
        assert_eq!(ctx.local_capabilities().ct_exponent, 12);

        ctx.set_data(
            DataType::CapabilityFlags,
            &DataParameter::local(),
            &0x0000_F6B2u32.to_le_bytes(),
        )
        .unwrap();

        let mut out = [0u8; 8];
        let n = ctx
            .get_data(DataType::CapabilityFlags, &DataParameter::local(), &mut out)
            .unwrap();
        assert_eq!(n, 4);
        assert_eq!(out[..4], 0x0000_F6B2u32.to_le_bytes());

        // Connection-side flags untouched by the local write.
        let n = ctx
            .get_data(
                DataType::CapabilityFlags,
                &DataParameter::connection(),
                &mut out,
            )
            .unwrap();
        assert_eq!(out[..n], 0u32.to_le_bytes());

        // Reserved bits and length violations are rejected.
        assert_eq!(
            ctx.set_data(
                DataType::CapabilityFlags,
                &DataParameter::local(),
                &0x8000_0000u32.to_le_bytes(),
            ),
            Err(SpdmError::InvalidParameter)
        );
        assert_eq!(
            ctx.set_data(DataType::CapabilityFlags, &DataParameter::local(), &[1, 2]),
            Err(SpdmError::InvalidParameter)
        );
        assert_eq!(
            ctx.get_data(DataType::CapabilityFlags, &DataParameter::local(), &mut [0u8; 2]),
            Err(SpdmError::BufferTooSmall)
        );
    }

    #[test]
    fn session_scoped_data_needs_session_location() {
        let transport = LoopbackTransport::default();
        let (mut dev, _peer) = LoopbackDeviceIo::pair();
        let mut ctx = context(
            SpdmRole::Responder,
            &transport,
            &mut dev,
            TranscriptMode::Streaming,
        );
        negotiate(&mut ctx);
        ctx.start_session(SESSION_ID, SessionType::EncMac, false)
            .unwrap();

        assert_eq!(
            ctx.set_data(DataType::SessionPolicy, &DataParameter::local(), &[1]),
            Err(SpdmError::InvalidParameter)
        );

        let param = DataParameter::session(SESSION_ID);
        ctx.set_data(DataType::SessionPolicy, &param, &[0x01]).unwrap();
        let mut out = [0u8; 1];
        ctx.get_data(DataType::SessionPolicy, &param, &mut out).unwrap();
        assert_eq!(out[0], 0x01);

        ctx.set_data(DataType::SessionMutAuthRequested, &param, &[1])
            .unwrap();
        let mut out = [0u8; 1];
        ctx.get_data(DataType::SessionMutAuthRequested, &param, &mut out)
            .unwrap();
        assert_eq!(out[0], 1);
    }

    /// Drive a full certificate-based handshake through the public surface
    /// of two peered contexts, then exchange secured traffic both ways.
    fn run_handshake(mode: TranscriptMode) {
        let transport = LoopbackTransport::default();
        let (mut req_dev, mut rsp_dev) = LoopbackDeviceIo::pair();
        let mut requester = context(SpdmRole::Requester, &transport, &mut req_dev, mode);
        let mut responder = context(SpdmRole::Responder, &transport, &mut rsp_dev, mode);

        negotiate(&mut requester);
        negotiate(&mut responder);

        // Identical VCA on both sides.
        let vca = b"GET_VERSION/VERSION/GET_CAPABILITIES/CAPABILITIES/NEG_ALG/ALG";
        requester
            .append_message(TranscriptRegion::Vca, vca)
            .unwrap();
        responder
            .append_message(TranscriptRegion::Vca, vca)
            .unwrap();

        // The responder's provisioned chain; the requester learned its hash
        // from GET_CERTIFICATE.
        let cert_chain = [0xCE; 0x120];
        responder
            .set_data(
                DataType::LocalPublicCertChain,
                &DataParameter::local(),
                &cert_chain,
            )
            .unwrap();
        let mut chain_hash = [0u8; MAX_HASH_SIZE];
        let n = hash_all(HashAlgo::Sha384, &cert_chain, &mut chain_hash).unwrap();
        requester
            .set_data(
                DataType::PeerUsedCertChainHash,
                &DataParameter::connection(),
                &chain_hash[..n],
            )
            .unwrap();

        requester
            .start_session(SESSION_ID, SessionType::EncMac, false)
            .unwrap();
        responder
            .start_session(SESSION_ID, SessionType::EncMac, false)
            .unwrap();

        // KEY_EXCHANGE: DHE shares cross, both sides absorb the same K.
        let req_share = requester.generate_dhe_exchange_data(SESSION_ID).unwrap();
        let rsp_share = responder.compute_dhe_secret(SESSION_ID, &req_share).unwrap();
        requester.compute_dhe_secret(SESSION_ID, &rsp_share).unwrap();

        let key_exchange_bytes = b"KEY_EXCHANGE/KEY_EXCHANGE_RSP";
        requester
            .append_message_k(SESSION_ID, key_exchange_bytes)
            .unwrap();
        responder
            .append_message_k(SESSION_ID, key_exchange_bytes)
            .unwrap();

        requester.generate_session_handshake_key(SESSION_ID).unwrap();
        responder.generate_session_handshake_key(SESSION_ID).unwrap();

        // Both sides agree on TH and on the FINISH verify-data.
        let mut req_th = [0u8; MAX_HASH_SIZE];
        let mut rsp_th = [0u8; MAX_HASH_SIZE];
        requester.session_th_digest(SESSION_ID, &mut req_th).unwrap();
        responder.session_th_digest(SESSION_ID, &mut rsp_th).unwrap();
        assert_eq!(req_th, rsp_th);

        let mut req_mac = [0u8; MAX_HASH_SIZE];
        let mut rsp_mac = [0u8; MAX_HASH_SIZE];
        let req_n = requester
            .session_th_hmac(SESSION_ID, SessionKeyType::ResponseFinishedKey, &mut req_mac)
            .unwrap();
        responder
            .session_th_hmac(SESSION_ID, SessionKeyType::ResponseFinishedKey, &mut rsp_mac)
            .unwrap();
        assert_eq!(req_mac, rsp_mac);
        responder
            .verify_session_th_hmac(
                SESSION_ID,
                SessionKeyType::ResponseFinishedKey,
                &req_mac[..req_n],
            )
            .unwrap();
        assert_eq!(
            responder.verify_session_th_hmac(
                SESSION_ID,
                SessionKeyType::RequestFinishedKey,
                &req_mac[..req_n],
            ),
            Err(SpdmError::SecurityViolation)
        );

        // FINISH closes the handshake; data keys bind TH2.
        let finish_bytes = b"FINISH/FINISH_RSP";
        requester.append_message_k(SESSION_ID, finish_bytes).unwrap();
        responder.append_message_k(SESSION_ID, finish_bytes).unwrap();
        requester.generate_session_data_key(SESSION_ID).unwrap();
        responder.generate_session_data_key(SESSION_ID).unwrap();
        requester
            .set_session_state(SESSION_ID, SessionState::Established)
            .unwrap();
        responder
            .set_session_state(SESSION_ID, SessionState::Established)
            .unwrap();
        assert_eq!(
            requester.connection_state(),
            ConnectionState::SessionEstablished
        );

        let export_param = DataParameter::session(SESSION_ID);
        let mut req_export = [0u8; MAX_HASH_SIZE];
        let mut rsp_export = [0u8; MAX_HASH_SIZE];
        let n = requester
            .get_data(DataType::ExportMasterSecret, &export_param, &mut req_export)
            .unwrap();
        responder
            .get_data(DataType::ExportMasterSecret, &export_param, &mut rsp_export)
            .unwrap();
        assert_eq!(n, 48);
        assert_eq!(req_export, rsp_export);
        // Derived secrets are read-only through the accessor.
        assert_eq!(
            requester.set_data(DataType::ExportMasterSecret, &export_param, &req_export[..n]),
            Err(SpdmError::Unsupported)
        );

        // Secured application traffic, both directions.
        let mut app = [0u8; 128];
        requester
            .send_message(Some(SESSION_ID), b"vendor command", TIMEOUT_US)
            .unwrap();
        let (session, n) = responder.receive_message(&mut app, TIMEOUT_US).unwrap();
        assert_eq!(session, Some(SESSION_ID));
        assert_eq!(&app[..n], b"vendor command");

        responder
            .send_message(Some(SESSION_ID), b"vendor response", TIMEOUT_US)
            .unwrap();
        let (session, n) = requester.receive_message(&mut app, TIMEOUT_US).unwrap();
        assert_eq!(session, Some(SESSION_ID));
        assert_eq!(&app[..n], b"vendor response");
        assert_eq!(requester.active_session_id(), Some(SESSION_ID));

        // Reset wipes the endpoint back to NOT_STARTED.
        requester.reset();
        assert_eq!(requester.connection_state(), ConnectionState::NotStarted);
        assert!(requester.session_state(SESSION_ID).is_err());
    }

    #[test]
    fn handshake_and_secured_traffic_retained() {
        run_handshake(TranscriptMode::Retained);
    }

    #[test]
    fn handshake_and_secured_traffic_streaming() {
        run_handshake(TranscriptMode::Streaming);
    }

    #[test]
    fn psk_session_skips_cert_binding() {
        let transport = LoopbackTransport::default();
        let (mut req_dev, mut rsp_dev) = LoopbackDeviceIo::pair();
        let mut requester =
            context(SpdmRole::Requester, &transport, &mut req_dev, TranscriptMode::Streaming);
        let mut responder =
            context(SpdmRole::Responder, &transport, &mut rsp_dev, TranscriptMode::Streaming);

        for ctx in [&mut requester, &mut responder] {
            negotiate(ctx);
            ctx.append_message(TranscriptRegion::Vca, b"vca").unwrap();
            ctx.start_session(SESSION_ID, SessionType::EncMac, true).unwrap();
            ctx.set_session_psk(SESSION_ID, b"psk-provisioned-secret").unwrap();
            ctx.append_message_k(SESSION_ID, b"PSK_EXCHANGE/PSK_EXCHANGE_RSP")
                .unwrap();
            ctx.generate_session_handshake_key(SESSION_ID).unwrap();
            ctx.append_message_k(SESSION_ID, b"PSK_FINISH/PSK_FINISH_RSP")
                .unwrap();
            ctx.generate_session_data_key(SESSION_ID).unwrap();
            ctx.set_session_state(SESSION_ID, SessionState::Established)
                .unwrap();
        }

        let mut app = [0u8; 64];
        requester
            .send_message(Some(SESSION_ID), b"psk traffic", TIMEOUT_US)
            .unwrap();
        let (session, n) = responder.receive_message(&mut app, TIMEOUT_US).unwrap();
        assert_eq!(session, Some(SESSION_ID));
        assert_eq!(&app[..n], b"psk traffic");
    }

    #[test]
    fn plain_messages_pass_through_unsecured() {
        let transport = LoopbackTransport::default();
        let (mut req_dev, mut rsp_dev) = LoopbackDeviceIo::pair();
        let mut requester =
            context(SpdmRole::Requester, &transport, &mut req_dev, TranscriptMode::Retained);
        let mut responder =
            context(SpdmRole::Responder, &transport, &mut rsp_dev, TranscriptMode::Retained);

        requester.send_message(None, b"GET_VERSION", TIMEOUT_US).unwrap();
        let mut app = [0u8; 64];
        let (session, n) = responder.receive_message(&mut app, TIMEOUT_US).unwrap();
        assert_eq!(session, None);
        assert_eq!(&app[..n], b"GET_VERSION");

        // Nothing queued: the device deadline expires.
        assert_eq!(
            responder.receive_message(&mut app, TIMEOUT_US),
            Err(SpdmError::Timeout)
        );
    }

    #[test]
    fn mismatched_keys_free_the_session() {
        let transport = LoopbackTransport::default();
        let (mut req_dev, mut rsp_dev) = LoopbackDeviceIo::pair();
        let mut requester =
            context(SpdmRole::Requester, &transport, &mut req_dev, TranscriptMode::Streaming);
        let mut responder =
            context(SpdmRole::Responder, &transport, &mut rsp_dev, TranscriptMode::Streaming);

        // The two sides never agreed on a secret, so every record the
        // requester seals fails authentication at the responder.
        for (ctx, psk) in [(&mut requester, b"psk-a"), (&mut responder, b"psk-b")] {
            negotiate(ctx);
            ctx.start_session(SESSION_ID, SessionType::EncMac, true).unwrap();
            ctx.set_session_psk(SESSION_ID, psk).unwrap();
            ctx.append_message_k(SESSION_ID, b"K").unwrap();
            ctx.generate_session_handshake_key(SESSION_ID).unwrap();
        }

        requester
            .send_message(Some(SESSION_ID), b"forged", TIMEOUT_US)
            .unwrap();
        let mut app = [0u8; 64];
        assert_eq!(
            responder.receive_message(&mut app, TIMEOUT_US),
            Err(SpdmError::SecurityViolation)
        );
        assert_eq!(
            responder.last_spdm_error(),
            crate::error::LastSpdmError {
                error_code: crate::error::SpdmErrorCode::DecryptError,
                session_id: SESSION_ID
            }
        );
        // The poisoned session is gone.
        assert!(responder.session_state(SESSION_ID).is_err());
    }
}
