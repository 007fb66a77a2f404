// Licensed under the Apache-2.0 license

//! Transcript management.
//!
//! Maintains the negotiated message history as either retained byte regions
//! or streamed digest contexts, and produces the M1M2/L1L2/TH digests and
//! the finished-key HMACs bound to them. Both materializations sit behind
//! one interface and must produce identical digests for identical inputs.

use crate::crypto::hash::{hash_all, HashAlgo, HashContext};
use crate::crypto::hmac::HmacContext;
use crate::crypto::{PrimitiveError, MAX_HASH_SIZE};
use crate::protocol::{ReqRespCode, SpdmVersion};
use crate::session::key_schedule::SessionKeyType;
use crate::session::SessionInfo;
use crate::state::ConnectionState;
use arrayvec::ArrayVec;
use zeroize::Zeroize;

// Region maxima, sized for one full exchange each.
pub const MAX_MESSAGE_A_BUFFER_SIZE: usize = 0x100;
pub const MAX_MESSAGE_B_BUFFER_SIZE: usize = 0x1000;
pub const MAX_MESSAGE_C_BUFFER_SIZE: usize = 0x205;
pub const MAX_MESSAGE_M_BUFFER_SIZE: usize = 0x1000;
pub const MAX_MESSAGE_K_BUFFER_SIZE: usize = 0x620;
pub const MAX_MESSAGE_F_BUFFER_SIZE: usize = 0x160;
// A + cert-chain hash + K, the most temp_k can hold before the finished
// keys materialize.
const MAX_TEMP_K_BUFFER_SIZE: usize =
    MAX_MESSAGE_A_BUFFER_SIZE + MAX_HASH_SIZE + MAX_MESSAGE_K_BUFFER_SIZE;

#[derive(Debug, PartialEq)]
pub enum TranscriptError {
    BufferOverflow,
    InvalidState,
    FinishedKeyNotReady,
    Primitive(PrimitiveError),
}

pub type TranscriptResult<T> = Result<T, TranscriptError>;

/// How transcript bytes are materialized.
///
/// `Retained` keeps the raw bytes so any derived digest can be recomputed
/// later; `Streaming` absorbs them into incremental digest contexts and
/// forgets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptMode {
    Retained,
    Streaming,
}

/// Connection-scope transcript regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptRegion {
    /// VCA: GET_VERSION..ALGORITHMS
    Vca,
    /// GET_DIGESTS..CERTIFICATE
    B,
    /// CHALLENGE..CHALLENGE_AUTH
    C,
    MutB,
    MutC,
    /// GET_MEASUREMENTS..MEASUREMENTS pairs
    M,
}

/// Connection-scope derived digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptDigest {
    /// H(A ‖ B ‖ C)
    M1M2,
    /// H(A ‖ MutB ‖ MutC)
    MutM1M2,
    /// H(A ‖ M) for >= 1.2, H(M) before
    L1L2,
}

pub(crate) struct Transcript {
    mode: TranscriptMode,
    spdm_version: SpdmVersion,
    hash_algo: HashAlgo,
    // A is kept as bytes in both modes; it seeds every other stream.
    message_a: ArrayVec<u8, MAX_MESSAGE_A_BUFFER_SIZE>,
    message_b: ArrayVec<u8, MAX_MESSAGE_B_BUFFER_SIZE>,
    message_c: ArrayVec<u8, MAX_MESSAGE_C_BUFFER_SIZE>,
    message_mut_b: ArrayVec<u8, MAX_MESSAGE_B_BUFFER_SIZE>,
    message_mut_c: ArrayVec<u8, MAX_MESSAGE_C_BUFFER_SIZE>,
    message_m: ArrayVec<u8, MAX_MESSAGE_M_BUFFER_SIZE>,
    digest_ctx_m1m2: Option<HashContext>,
    digest_ctx_mut_m1m2: Option<HashContext>,
    digest_ctx_l1l2: Option<HashContext>,
}

impl Transcript {
    pub fn new(mode: TranscriptMode) -> Self {
        Self {
            mode,
            spdm_version: SpdmVersion::default(),
            hash_algo: HashAlgo::default(),
            message_a: ArrayVec::new(),
            message_b: ArrayVec::new(),
            message_c: ArrayVec::new(),
            message_mut_b: ArrayVec::new(),
            message_mut_c: ArrayVec::new(),
            message_m: ArrayVec::new(),
            digest_ctx_m1m2: None,
            digest_ctx_mut_m1m2: None,
            digest_ctx_l1l2: None,
        }
    }

    pub fn set_spdm_version(&mut self, spdm_version: SpdmVersion) {
        self.spdm_version = spdm_version;
    }

    pub fn set_hash_algo(&mut self, hash_algo: HashAlgo) {
        self.hash_algo = hash_algo;
    }

    /// Append on-wire bytes to a connection-scope region.
    pub fn append(&mut self, region: TranscriptRegion, data: &[u8]) -> TranscriptResult<()> {
        match region {
            TranscriptRegion::Vca => extend(&mut self.message_a, data),
            TranscriptRegion::B => match self.mode {
                TranscriptMode::Retained => extend(&mut self.message_b, data),
                TranscriptMode::Streaming => {
                    Self::stream_update(&mut self.digest_ctx_m1m2, self.hash_algo, &self.message_a, data);
                    Ok(())
                }
            },
            TranscriptRegion::C => match self.mode {
                TranscriptMode::Retained => extend(&mut self.message_c, data),
                TranscriptMode::Streaming => {
                    Self::stream_update(&mut self.digest_ctx_m1m2, self.hash_algo, &self.message_a, data);
                    Ok(())
                }
            },
            TranscriptRegion::MutB => match self.mode {
                TranscriptMode::Retained => extend(&mut self.message_mut_b, data),
                TranscriptMode::Streaming => {
                    Self::stream_update(&mut self.digest_ctx_mut_m1m2, self.hash_algo, &self.message_a, data);
                    Ok(())
                }
            },
            TranscriptRegion::MutC => match self.mode {
                TranscriptMode::Retained => extend(&mut self.message_mut_c, data),
                TranscriptMode::Streaming => {
                    Self::stream_update(&mut self.digest_ctx_mut_m1m2, self.hash_algo, &self.message_a, data);
                    Ok(())
                }
            },
            TranscriptRegion::M => match self.mode {
                TranscriptMode::Retained => extend(&mut self.message_m, data),
                TranscriptMode::Streaming => {
                    let seed = if self.spdm_version >= SpdmVersion::V12 {
                        self.message_a.as_slice()
                    } else {
                        &[]
                    };
                    let ctx = self
                        .digest_ctx_l1l2
                        .get_or_insert_with(|| HashContext::init(self.hash_algo, Some(seed)));
                    ctx.update(data);
                    Ok(())
                }
            },
        }
    }

    fn stream_update(
        slot: &mut Option<HashContext>,
        hash_algo: HashAlgo,
        seed: &[u8],
        data: &[u8],
    ) {
        let ctx = slot.get_or_insert_with(|| HashContext::init(hash_algo, Some(seed)));
        ctx.update(data);
    }

    /// Return a region to its empty state, zeroizing retained bytes and
    /// dropping any streaming context that covers it.
    pub fn reset_region(&mut self, region: TranscriptRegion) {
        match region {
            TranscriptRegion::Vca => self.message_a.zeroize(),
            TranscriptRegion::B => {
                self.message_b.zeroize();
                self.digest_ctx_m1m2 = None;
            }
            TranscriptRegion::C => {
                self.message_c.zeroize();
                self.digest_ctx_m1m2 = None;
            }
            TranscriptRegion::MutB => {
                self.message_mut_b.zeroize();
                self.digest_ctx_mut_m1m2 = None;
            }
            TranscriptRegion::MutC => {
                self.message_mut_c.zeroize();
                self.digest_ctx_mut_m1m2 = None;
            }
            TranscriptRegion::M => {
                self.message_m.zeroize();
                self.digest_ctx_l1l2 = None;
            }
        }
    }

    /// Whether a region has absorbed anything since its last reset. In
    /// streaming mode, B/C and MutB/MutC share a digest stream and report
    /// through it.
    #[allow(dead_code)]
    pub fn region_is_empty(&self, region: TranscriptRegion) -> bool {
        match region {
            TranscriptRegion::Vca => self.message_a.is_empty(),
            TranscriptRegion::B => match self.mode {
                TranscriptMode::Retained => self.message_b.is_empty(),
                TranscriptMode::Streaming => self.digest_ctx_m1m2.is_none(),
            },
            TranscriptRegion::C => match self.mode {
                TranscriptMode::Retained => self.message_c.is_empty(),
                TranscriptMode::Streaming => self.digest_ctx_m1m2.is_none(),
            },
            TranscriptRegion::MutB => match self.mode {
                TranscriptMode::Retained => self.message_mut_b.is_empty(),
                TranscriptMode::Streaming => self.digest_ctx_mut_m1m2.is_none(),
            },
            TranscriptRegion::MutC => match self.mode {
                TranscriptMode::Retained => self.message_mut_c.is_empty(),
                TranscriptMode::Streaming => self.digest_ctx_mut_m1m2.is_none(),
            },
            TranscriptRegion::M => match self.mode {
                TranscriptMode::Retained => self.message_m.is_empty(),
                TranscriptMode::Streaming => self.digest_ctx_l1l2.is_none(),
            },
        }
    }

    /// Transcript-reset policy applied before dispatching a request.
    ///
    /// GET_MEASUREMENTS is the only request that keeps the L1/L2 chain; the
    /// session-class requests issued before the connection authenticates
    /// abandon the CHALLENGE chain.
    pub fn reset_by_request(
        &mut self,
        request_code: ReqRespCode,
        connection_state: ConnectionState,
    ) {
        if request_code != ReqRespCode::GetMeasurements {
            self.reset_region(TranscriptRegion::M);
        }

        match request_code {
            ReqRespCode::KeyExchange
            | ReqRespCode::GetMeasurements
            | ReqRespCode::Finish
            | ReqRespCode::PskExchange
            | ReqRespCode::PskFinish
            | ReqRespCode::KeyUpdate
            | ReqRespCode::Heartbeat
            | ReqRespCode::GetEncapsulatedRequest
            | ReqRespCode::EndSession => {
                if connection_state < ConnectionState::Authenticated {
                    self.reset_region(TranscriptRegion::B);
                    self.reset_region(TranscriptRegion::C);
                    self.reset_region(TranscriptRegion::MutB);
                    self.reset_region(TranscriptRegion::MutC);
                }
            }
            ReqRespCode::DeliverEncapsulatedResponse => {
                if connection_state < ConnectionState::Authenticated {
                    self.reset_region(TranscriptRegion::B);
                    self.reset_region(TranscriptRegion::C);
                }
            }
            _ => {}
        }
    }

    /// Finalize a connection-scope digest into `hash` without consuming the
    /// underlying state.
    pub fn digest(&self, selector: TranscriptDigest, hash: &mut [u8]) -> TranscriptResult<usize> {
        match self.mode {
            TranscriptMode::Retained => {
                let mut ctx = HashContext::init(self.hash_algo, None);
                match selector {
                    TranscriptDigest::M1M2 => {
                        ctx.update(&self.message_a);
                        ctx.update(&self.message_b);
                        ctx.update(&self.message_c);
                    }
                    TranscriptDigest::MutM1M2 => {
                        ctx.update(&self.message_a);
                        ctx.update(&self.message_mut_b);
                        ctx.update(&self.message_mut_c);
                    }
                    TranscriptDigest::L1L2 => {
                        if self.spdm_version >= SpdmVersion::V12 {
                            ctx.update(&self.message_a);
                        }
                        ctx.update(&self.message_m);
                    }
                }
                ctx.finalize(hash).map_err(TranscriptError::Primitive)
            }
            TranscriptMode::Streaming => {
                let slot = match selector {
                    TranscriptDigest::M1M2 => &self.digest_ctx_m1m2,
                    TranscriptDigest::MutM1M2 => &self.digest_ctx_mut_m1m2,
                    TranscriptDigest::L1L2 => &self.digest_ctx_l1l2,
                };
                match slot {
                    Some(ctx) => ctx.peek(hash).map_err(TranscriptError::Primitive),
                    // Nothing streamed yet: the digest covers the seed alone.
                    None => {
                        let seed = match selector {
                            TranscriptDigest::L1L2 if self.spdm_version < SpdmVersion::V12 => &[],
                            _ => self.message_a.as_slice(),
                        };
                        hash_all(self.hash_algo, seed, hash).map_err(TranscriptError::Primitive)
                    }
                }
            }
        }
    }

    /// Append to a session's K region (KEY_EXCHANGE..FINISH bytes).
    ///
    /// The first append seeds the session TH stream with the current VCA
    /// and, for certificate-based sessions, the negotiated-hash digest of
    /// the certificate chain in use. Until the finished keys exist the
    /// bytes are also staged in `temp_k` so the two HMAC streams can be
    /// initialized retroactively.
    pub fn append_k(
        &mut self,
        session: &mut SessionInfo,
        cert_chain_hash: Option<&[u8]>,
        data: &[u8],
    ) -> TranscriptResult<()> {
        let st = &mut session.session_transcript;
        match self.mode {
            TranscriptMode::Retained => {
                if st.message_k.is_empty() && st.cert_chain_hash.is_none() {
                    if let Some(hash) = cert_chain_hash {
                        let mut stored = ArrayVec::new();
                        stored
                            .try_extend_from_slice(hash)
                            .map_err(|_| TranscriptError::BufferOverflow)?;
                        st.cert_chain_hash = Some(stored);
                    }
                }
                extend(&mut st.message_k, data)
            }
            TranscriptMode::Streaming => {
                let finished_key_ready = session.key_schedule.finished_key_ready();

                if st.digest_ctx_th.is_none() {
                    let mut ctx = HashContext::init(self.hash_algo, Some(self.message_a.as_slice()));
                    extend(&mut st.temp_message_k, &self.message_a)?;
                    if let Some(hash) = cert_chain_hash {
                        ctx.update(hash);
                        extend(&mut st.temp_message_k, hash)?;
                    }
                    st.digest_ctx_th = Some(ctx);
                }
                if let Some(ctx) = st.digest_ctx_th.as_mut() {
                    ctx.update(data);
                }
                if !finished_key_ready {
                    // HMAC needs the finished keys and the finished keys
                    // need K: stage the bytes until the keys exist.
                    return extend(&mut st.temp_message_k, data);
                }

                let hash_algo = self.hash_algo;
                if st.hmac_rsp_ctx_th.is_none() {
                    let key = session
                        .key_schedule
                        .finished_key(SessionKeyType::ResponseFinishedKey)
                        .map_err(|_| TranscriptError::FinishedKeyNotReady)?;
                    let mut ctx = HmacContext::init(hash_algo, key)
                        .map_err(TranscriptError::Primitive)?;
                    ctx.update(&st.temp_message_k);
                    st.hmac_rsp_ctx_th = Some(ctx);
                }
                if let Some(ctx) = st.hmac_rsp_ctx_th.as_mut() {
                    ctx.update(data);
                }

                if st.hmac_req_ctx_th.is_none() {
                    let key = session
                        .key_schedule
                        .finished_key(SessionKeyType::RequestFinishedKey)
                        .map_err(|_| TranscriptError::FinishedKeyNotReady)?;
                    let mut ctx = HmacContext::init(hash_algo, key)
                        .map_err(TranscriptError::Primitive)?;
                    ctx.update(&st.temp_message_k);
                    st.hmac_req_ctx_th = Some(ctx);
                }
                if let Some(ctx) = st.hmac_req_ctx_th.as_mut() {
                    ctx.update(data);
                }
                Ok(())
            }
        }
    }

    /// Append to a session's F region (post-handshake transcript).
    ///
    /// The first append snapshots the TH hash and both HMAC streams so an
    /// aborted post-handshake sequence can roll back, then absorbs the
    /// mutual-auth certificate-chain hash when one is supplied.
    pub fn append_f(
        &mut self,
        session: &mut SessionInfo,
        mut_cert_chain_hash: Option<&[u8]>,
        data: &[u8],
    ) -> TranscriptResult<()> {
        if !session.key_schedule.finished_key_ready() {
            return Err(TranscriptError::FinishedKeyNotReady);
        }

        match self.mode {
            TranscriptMode::Retained => {
                let st = &mut session.session_transcript;
                if !st.message_f_initialized {
                    if let Some(hash) = mut_cert_chain_hash {
                        let mut stored = ArrayVec::new();
                        stored
                            .try_extend_from_slice(hash)
                            .map_err(|_| TranscriptError::BufferOverflow)?;
                        st.mut_cert_chain_hash = Some(stored);
                    }
                    st.message_f_initialized = true;
                }
                extend(&mut st.message_f, data)
            }
            TranscriptMode::Streaming => {
                if session.session_transcript.digest_ctx_th.is_none()
                    || session.session_transcript.hmac_req_ctx_th.is_none()
                    || session.session_transcript.hmac_rsp_ctx_th.is_none()
                {
                    // Zero-length K append materializes the missing streams.
                    self.append_k(session, None, &[])?;
                }

                let st = &mut session.session_transcript;
                if !st.message_f_initialized {
                    st.digest_ctx_th_backup = st.digest_ctx_th.clone();
                    st.hmac_req_ctx_th_backup = st.hmac_req_ctx_th.clone();
                    st.hmac_rsp_ctx_th_backup = st.hmac_rsp_ctx_th.clone();

                    if let Some(hash) = mut_cert_chain_hash {
                        if let Some(ctx) = st.digest_ctx_th.as_mut() {
                            ctx.update(hash);
                        }
                        if let Some(ctx) = st.hmac_req_ctx_th.as_mut() {
                            ctx.update(hash);
                        }
                        if let Some(ctx) = st.hmac_rsp_ctx_th.as_mut() {
                            ctx.update(hash);
                        }
                    }
                    st.message_f_initialized = true;
                }

                if let Some(ctx) = st.digest_ctx_th.as_mut() {
                    ctx.update(data);
                }
                if let Some(ctx) = st.hmac_req_ctx_th.as_mut() {
                    ctx.update(data);
                }
                if let Some(ctx) = st.hmac_rsp_ctx_th.as_mut() {
                    ctx.update(data);
                }
                Ok(())
            }
        }
    }

    /// Roll the session transcript back to the pre-F snapshot. A no-op if
    /// no F bytes were ever absorbed.
    pub fn reset_f(&mut self, session: &mut SessionInfo) {
        let st = &mut session.session_transcript;
        if !st.message_f_initialized {
            return;
        }
        match self.mode {
            TranscriptMode::Retained => {
                st.message_f.zeroize();
                st.mut_cert_chain_hash = None;
            }
            TranscriptMode::Streaming => {
                st.digest_ctx_th = st.digest_ctx_th_backup.take();
                st.hmac_req_ctx_th = st.hmac_req_ctx_th_backup.take();
                st.hmac_rsp_ctx_th = st.hmac_rsp_ctx_th_backup.take();
            }
        }
        st.message_f_initialized = false;
    }

    /// Drop a session's K region and everything derived from it.
    pub fn reset_k(&mut self, session: &mut SessionInfo) {
        session.session_transcript.clear();
    }

    /// Session transcript hash (TH) at the current boundary.
    pub fn th_digest(&self, session: &SessionInfo, hash: &mut [u8]) -> TranscriptResult<usize> {
        let st = &session.session_transcript;
        match self.mode {
            TranscriptMode::Retained => {
                if st.message_k.is_empty() {
                    return Err(TranscriptError::InvalidState);
                }
                let mut ctx = HashContext::init(self.hash_algo, Some(self.message_a.as_slice()));
                if let Some(cert_hash) = st.cert_chain_hash.as_ref() {
                    ctx.update(cert_hash);
                }
                ctx.update(&st.message_k);
                if st.message_f_initialized {
                    if let Some(mut_hash) = st.mut_cert_chain_hash.as_ref() {
                        ctx.update(mut_hash);
                    }
                    ctx.update(&st.message_f);
                }
                ctx.finalize(hash).map_err(TranscriptError::Primitive)
            }
            TranscriptMode::Streaming => match st.digest_ctx_th.as_ref() {
                Some(ctx) => ctx.peek(hash).map_err(TranscriptError::Primitive),
                None => Err(TranscriptError::InvalidState),
            },
        }
    }

    /// Finished-key HMAC over the session transcript (the FINISH
    /// verify-data for the given direction).
    pub fn th_hmac(
        &self,
        session: &SessionInfo,
        key_type: SessionKeyType,
        mac: &mut [u8],
    ) -> TranscriptResult<usize> {
        let st = &session.session_transcript;
        match self.mode {
            TranscriptMode::Retained => {
                let mut bytes = ArrayVec::<u8, MAX_TH_BYTES>::new();
                extend(&mut bytes, &self.message_a)?;
                if let Some(cert_hash) = st.cert_chain_hash.as_ref() {
                    extend(&mut bytes, cert_hash)?;
                }
                extend(&mut bytes, &st.message_k)?;
                if st.message_f_initialized {
                    if let Some(mut_hash) = st.mut_cert_chain_hash.as_ref() {
                        extend(&mut bytes, mut_hash)?;
                    }
                    extend(&mut bytes, &st.message_f)?;
                }
                let n = session
                    .key_schedule
                    .hmac(key_type, &bytes, mac)
                    .map_err(|_| TranscriptError::FinishedKeyNotReady)?;
                bytes.zeroize();
                Ok(n)
            }
            TranscriptMode::Streaming => {
                let slot = match key_type {
                    SessionKeyType::RequestFinishedKey => &st.hmac_req_ctx_th,
                    SessionKeyType::ResponseFinishedKey => &st.hmac_rsp_ctx_th,
                    _ => return Err(TranscriptError::InvalidState),
                };
                match slot {
                    Some(ctx) => ctx.peek(mac).map_err(TranscriptError::Primitive),
                    None => {
                        // Finished keys exist but nothing was appended since
                        // they materialized: the staged bytes are the whole
                        // transcript.
                        let key = session
                            .key_schedule
                            .finished_key(key_type)
                            .map_err(|_| TranscriptError::FinishedKeyNotReady)?;
                        let mut ctx = HmacContext::init(self.hash_algo, key)
                            .map_err(TranscriptError::Primitive)?;
                        ctx.update(&st.temp_message_k);
                        ctx.finalize(mac).map_err(TranscriptError::Primitive)
                    }
                }
            }
        }
    }

    /// Reset every connection-scope region and derived stream.
    pub fn reset(&mut self) {
        self.spdm_version = SpdmVersion::default();
        self.hash_algo = HashAlgo::default();
        for region in [
            TranscriptRegion::Vca,
            TranscriptRegion::B,
            TranscriptRegion::C,
            TranscriptRegion::MutB,
            TranscriptRegion::MutC,
            TranscriptRegion::M,
        ] {
            self.reset_region(region);
        }
    }
}

// A + cert-chain hash + K + mutual cert-chain hash + F
const MAX_TH_BYTES: usize = MAX_MESSAGE_A_BUFFER_SIZE
    + MAX_HASH_SIZE
    + MAX_MESSAGE_K_BUFFER_SIZE
    + MAX_HASH_SIZE
    + MAX_MESSAGE_F_BUFFER_SIZE;

fn extend<const N: usize>(buf: &mut ArrayVec<u8, N>, data: &[u8]) -> TranscriptResult<()> {
    buf.try_extend_from_slice(data)
        .map_err(|_| TranscriptError::BufferOverflow)
}

/// Per-session K/F regions with their TH hash and finished-key HMAC
/// streams, plus the backups taken at the F boundary.
pub(crate) struct SessionTranscript {
    pub(crate) message_k: ArrayVec<u8, MAX_MESSAGE_K_BUFFER_SIZE>,
    pub(crate) message_f: ArrayVec<u8, MAX_MESSAGE_F_BUFFER_SIZE>,
    pub(crate) cert_chain_hash: Option<ArrayVec<u8, MAX_HASH_SIZE>>,
    pub(crate) mut_cert_chain_hash: Option<ArrayVec<u8, MAX_HASH_SIZE>>,
    pub(crate) temp_message_k: ArrayVec<u8, MAX_TEMP_K_BUFFER_SIZE>,
    pub(crate) digest_ctx_th: Option<HashContext>,
    pub(crate) hmac_req_ctx_th: Option<HmacContext>,
    pub(crate) hmac_rsp_ctx_th: Option<HmacContext>,
    pub(crate) digest_ctx_th_backup: Option<HashContext>,
    pub(crate) hmac_req_ctx_th_backup: Option<HmacContext>,
    pub(crate) hmac_rsp_ctx_th_backup: Option<HmacContext>,
    pub(crate) message_f_initialized: bool,
}

impl SessionTranscript {
    pub fn new() -> Self {
        Self {
            message_k: ArrayVec::new(),
            message_f: ArrayVec::new(),
            cert_chain_hash: None,
            mut_cert_chain_hash: None,
            temp_message_k: ArrayVec::new(),
            digest_ctx_th: None,
            hmac_req_ctx_th: None,
            hmac_rsp_ctx_th: None,
            digest_ctx_th_backup: None,
            hmac_req_ctx_th_backup: None,
            hmac_rsp_ctx_th_backup: None,
            message_f_initialized: false,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.message_k.zeroize();
        self.message_f.zeroize();
        self.cert_chain_hash = None;
        self.mut_cert_chain_hash = None;
        self.temp_message_k.zeroize();
        self.digest_ctx_th = None;
        self.hmac_req_ctx_th = None;
        self.hmac_rsp_ctx_th = None;
        self.digest_ctx_th_backup = None;
        self.hmac_req_ctx_th_backup = None;
        self.hmac_rsp_ctx_th_backup = None;
        self.message_f_initialized = false;
    }
}

impl Default for SessionTranscript {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionTranscript {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::AeadCipherSuite;
    use proptest::prelude::*;

    fn session() -> SessionInfo {
        let mut info = SessionInfo::new(0x1100_0001);
        info.key_schedule
            .init(SpdmVersion::V12, HashAlgo::Sha384, AeadCipherSuite::Aes256Gcm);
        info
    }

    fn transcript(mode: TranscriptMode) -> Transcript {
        let mut t = Transcript::new(mode);
        t.set_spdm_version(SpdmVersion::V12);
        t.set_hash_algo(HashAlgo::Sha384);
        t
    }

    #[test]
    fn m1m2_same_in_both_modes() {
        let mut retained = transcript(TranscriptMode::Retained);
        let mut streaming = transcript(TranscriptMode::Streaming);

        for t in [&mut retained, &mut streaming] {
            t.append(TranscriptRegion::Vca, b"get_version/version").unwrap();
            t.append(TranscriptRegion::B, b"get_digests/digests").unwrap();
            t.append(TranscriptRegion::C, b"challenge").unwrap();
            t.append(TranscriptRegion::C, b"/challenge_auth").unwrap();
        }

        let mut h1 = [0u8; MAX_HASH_SIZE];
        let mut h2 = [0u8; MAX_HASH_SIZE];
        let n1 = retained.digest(TranscriptDigest::M1M2, &mut h1).unwrap();
        let n2 = streaming.digest(TranscriptDigest::M1M2, &mut h2).unwrap();
        assert_eq!(h1[..n1], h2[..n2]);

        // Digest finalization is non-destructive.
        let mut again = [0u8; MAX_HASH_SIZE];
        streaming.digest(TranscriptDigest::M1M2, &mut again).unwrap();
        assert_eq!(h2, again);
    }

    #[test]
    fn l1l2_version_gates_vca_prefix() {
        let mut v12 = transcript(TranscriptMode::Retained);
        let mut v11 = transcript(TranscriptMode::Retained);
        v11.set_spdm_version(SpdmVersion::V11);

        for t in [&mut v12, &mut v11] {
            t.append(TranscriptRegion::Vca, b"vca").unwrap();
            t.append(TranscriptRegion::M, b"measurements").unwrap();
        }

        let mut h12 = [0u8; MAX_HASH_SIZE];
        let mut h11 = [0u8; MAX_HASH_SIZE];
        v12.digest(TranscriptDigest::L1L2, &mut h12).unwrap();
        v11.digest(TranscriptDigest::L1L2, &mut h11).unwrap();
        assert_ne!(h12, h11);

        // Pre-1.2 L1L2 covers M alone.
        let mut expect = [0u8; MAX_HASH_SIZE];
        hash_all(HashAlgo::Sha384, b"measurements", &mut expect).unwrap();
        assert_eq!(h11, expect);
    }

    #[test]
    fn reset_by_request_policy() {
        for mode in [TranscriptMode::Retained, TranscriptMode::Streaming] {
            let mut t = transcript(mode);
            t.append(TranscriptRegion::Vca, b"vca").unwrap();
            t.append(TranscriptRegion::B, b"digests").unwrap();
            t.append(TranscriptRegion::C, b"challenge").unwrap();
            t.append(TranscriptRegion::MutB, b"mut-digests").unwrap();
            t.append(TranscriptRegion::MutC, b"mut-challenge").unwrap();
            t.append(TranscriptRegion::M, &[0xA5; 16]).unwrap();

            // GET_MEASUREMENTS keeps every region alive.
            t.reset_by_request(ReqRespCode::GetMeasurements, ConnectionState::Negotiated);
            assert!(!t.region_is_empty(TranscriptRegion::M));
            assert!(!t.region_is_empty(TranscriptRegion::B));
            assert!(!t.region_is_empty(TranscriptRegion::C));
            assert!(!t.region_is_empty(TranscriptRegion::MutB));
            assert!(!t.region_is_empty(TranscriptRegion::MutC));

            // KEY_EXCHANGE before AUTHENTICATED abandons the CHALLENGE
            // chain and restarts the measurement chain.
            t.reset_by_request(ReqRespCode::KeyExchange, ConnectionState::Negotiated);
            assert!(t.region_is_empty(TranscriptRegion::B));
            assert!(t.region_is_empty(TranscriptRegion::C));
            assert!(t.region_is_empty(TranscriptRegion::MutB));
            assert!(t.region_is_empty(TranscriptRegion::MutC));
            assert!(t.region_is_empty(TranscriptRegion::M));
            assert!(!t.region_is_empty(TranscriptRegion::Vca));

            // Once authenticated, KEY_EXCHANGE leaves B/C alone.
            t.append(TranscriptRegion::B, b"digests").unwrap();
            t.reset_by_request(ReqRespCode::KeyExchange, ConnectionState::Authenticated);
            assert!(!t.region_is_empty(TranscriptRegion::B));
        }
    }

    #[test]
    fn deliver_encap_resets_b_c_only() {
        let mut t = transcript(TranscriptMode::Retained);
        t.append(TranscriptRegion::B, b"b").unwrap();
        t.append(TranscriptRegion::C, b"c").unwrap();
        t.append(TranscriptRegion::MutB, b"mb").unwrap();

        t.reset_by_request(
            ReqRespCode::DeliverEncapsulatedResponse,
            ConnectionState::Negotiated,
        );
        assert!(t.region_is_empty(TranscriptRegion::B));
        assert!(t.region_is_empty(TranscriptRegion::C));
        assert!(!t.region_is_empty(TranscriptRegion::MutB));
    }

    fn run_session_transcript(
        mode: TranscriptMode,
        vca: &[u8],
        cert_hash: &[u8],
        k1: &[u8],
        k2: &[u8],
        f: &[u8],
    ) -> ([u8; MAX_HASH_SIZE], [u8; MAX_HASH_SIZE], [u8; MAX_HASH_SIZE]) {
        let mut t = transcript(mode);
        let mut s = session();
        t.append(TranscriptRegion::Vca, vca).unwrap();

        // KEY_EXCHANGE bytes land before the finished keys exist.
        t.append_k(&mut s, Some(cert_hash), k1).unwrap();

        let mut th1 = [0u8; MAX_HASH_SIZE];
        t.th_digest(&s, &mut th1).unwrap();
        s.key_schedule.set_session_ikm(&[0x77; 48]).unwrap();
        s.key_schedule.generate_session_handshake_key(&th1[..48]).unwrap();

        // FINISH bytes land after; temp_k drains into both HMAC streams.
        t.append_k(&mut s, None, k2).unwrap();
        t.append_f(&mut s, None, f).unwrap();

        let mut th = [0u8; MAX_HASH_SIZE];
        t.th_digest(&s, &mut th).unwrap();
        let mut req_mac = [0u8; MAX_HASH_SIZE];
        t.th_hmac(&s, SessionKeyType::RequestFinishedKey, &mut req_mac)
            .unwrap();
        let mut rsp_mac = [0u8; MAX_HASH_SIZE];
        t.th_hmac(&s, SessionKeyType::ResponseFinishedKey, &mut rsp_mac)
            .unwrap();
        (th, req_mac, rsp_mac)
    }

    #[test]
    fn session_transcript_same_in_both_modes() {
        let vca = b"vca bytes";
        let cert_hash = [0xC4u8; 48];
        let (th_r, req_r, rsp_r) = run_session_transcript(
            TranscriptMode::Retained,
            vca,
            &cert_hash,
            b"key_exchange",
            b"finish",
            b"psk-f",
        );
        let (th_s, req_s, rsp_s) = run_session_transcript(
            TranscriptMode::Streaming,
            vca,
            &cert_hash,
            b"key_exchange",
            b"finish",
            b"psk-f",
        );
        assert_eq!(th_r, th_s);
        assert_eq!(req_r, req_s);
        assert_eq!(rsp_r, rsp_s);
        assert_ne!(req_r, rsp_r);
    }

    #[test]
    fn reset_f_restores_pre_f_state() {
        for mode in [TranscriptMode::Retained, TranscriptMode::Streaming] {
            let mut t = transcript(mode);
            let mut s = session();
            t.append(TranscriptRegion::Vca, b"vca").unwrap();
            t.append_k(&mut s, Some(&[0xC4; 48]), b"key_exchange").unwrap();

            let mut th1 = [0u8; MAX_HASH_SIZE];
            t.th_digest(&s, &mut th1).unwrap();
            s.key_schedule.set_session_ikm(&[0x77; 48]).unwrap();
            s.key_schedule.generate_session_handshake_key(&th1[..48]).unwrap();
            t.append_k(&mut s, None, b"finish").unwrap();

            let mut before = [0u8; MAX_HASH_SIZE];
            t.th_digest(&s, &mut before).unwrap();

            t.append_f(&mut s, Some(&[0xD0; 48]), b"aborted exchange").unwrap();
            let mut during = [0u8; MAX_HASH_SIZE];
            t.th_digest(&s, &mut during).unwrap();
            assert_ne!(before, during);

            t.reset_f(&mut s);
            let mut after = [0u8; MAX_HASH_SIZE];
            t.th_digest(&s, &mut after).unwrap();
            assert_eq!(before, after);
        }
    }

    #[test]
    fn retained_overflow_reports_out_of_resources() {
        let mut t = transcript(TranscriptMode::Retained);
        let chunk = [0u8; MAX_MESSAGE_A_BUFFER_SIZE];
        t.append(TranscriptRegion::Vca, &chunk).unwrap();
        assert_eq!(
            t.append(TranscriptRegion::Vca, &[0u8; 1]),
            Err(TranscriptError::BufferOverflow)
        );
    }

    proptest! {
        // The two materializations are interchangeable: any split of any
        // byte sequence yields identical digests.
        #[test]
        fn modes_agree_on_any_input(
            vca in proptest::collection::vec(any::<u8>(), 1..64),
            b in proptest::collection::vec(any::<u8>(), 0..128),
            c in proptest::collection::vec(any::<u8>(), 0..64),
            m in proptest::collection::vec(any::<u8>(), 0..128),
            split in 0usize..128,
        ) {
            let mut retained = transcript(TranscriptMode::Retained);
            let mut streaming = transcript(TranscriptMode::Streaming);

            for t in [&mut retained, &mut streaming] {
                t.append(TranscriptRegion::Vca, &vca).unwrap();
                let cut = split.min(b.len());
                t.append(TranscriptRegion::B, &b[..cut]).unwrap();
                t.append(TranscriptRegion::B, &b[cut..]).unwrap();
                t.append(TranscriptRegion::C, &c).unwrap();
                t.append(TranscriptRegion::M, &m).unwrap();
            }

            for selector in [TranscriptDigest::M1M2, TranscriptDigest::L1L2] {
                let mut h1 = [0u8; MAX_HASH_SIZE];
                let mut h2 = [0u8; MAX_HASH_SIZE];
                retained.digest(selector, &mut h1).unwrap();
                streaming.digest(selector, &mut h2).unwrap();
                prop_assert_eq!(h1, h2);
            }
        }
    }
}
