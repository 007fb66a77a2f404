// Licensed under the Apache-2.0 license

//! Secure session management: the session table and the AEAD record layer
//! that frames, seals and opens application payloads above the transport.

use crate::codec::{encode_u8_slice, Codec, CodecError, MessageBuf};
use crate::crypto::aead::AEAD_TAG_SIZE;
use crate::crypto::rand::{rand_bytes, rand_u32};
use crate::error::{LastSpdmError, SpdmErrorCode};
use crate::transport::SpdmTransport;
use arrayvec::ArrayVec;
use log::{debug, warn};
use zeroize::Zeroize;

pub mod info;
pub mod key_schedule;

pub(crate) use info::SessionInfo;
pub use info::{EndSessionAttributes, SessionPolicy, SessionState, SessionType};
pub use key_schedule::{KeyScheduleError, KeyUpdateDirection, SessionKeyType};

pub const MAX_NUM_SESSIONS: usize = 4;
pub const INVALID_SESSION_ID: u32 = 0;
pub const MAX_SPDM_MESSAGE_BUFFER_SIZE: usize = 0x1200;
// Largest record pad the encoder will generate, whatever the transport asks.
const MAX_RANDOM_DATA_SIZE: u32 = 0x100;
// session id + up to 8 sequence-number bytes + length
const MAX_AEAD_AAD_HEADER_SIZE: usize = 4 + 8 + 2;
const MAX_PLAINTEXT_SIZE: usize = 2 + MAX_SPDM_MESSAGE_BUFFER_SIZE + MAX_RANDOM_DATA_SIZE as usize;

#[derive(Debug, PartialEq)]
pub enum SessionError {
    SessionsLimitReached,
    DuplicateSessionId,
    InvalidSessionId,
    InvalidState,
    SequenceNumberOverflow,
    SequenceMismatch,
    DecryptFailed,
    BufferTooSmall,
    RecordTooLarge,
    RandomSource,
    KeySchedule(KeyScheduleError),
    Codec(CodecError),
}

pub type SessionResult<T> = Result<T, SessionError>;

pub(crate) struct SessionManager {
    active_session_id: Option<u32>,
    sessions: [Option<SessionInfo>; MAX_NUM_SESSIONS],
    cur_responder_session_id: u16,
    last_error: LastSpdmError,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            active_session_id: None,
            sessions: core::array::from_fn(|_| None),
            cur_responder_session_id: 0,
            last_error: LastSpdmError::default(),
        }
    }

    pub fn reset(&mut self) {
        self.active_session_id = None;
        self.sessions = core::array::from_fn(|_| None);
        self.cur_responder_session_id = 0;
        self.last_error.clear();
    }

    /// Build a full session id from the requester half, assigning the next
    /// responder half.
    pub fn generate_session_id(&mut self, requester_session_id: u16) -> (u32, u16) {
        let rsp_session_id = self.cur_responder_session_id;
        let session_id = (u32::from(rsp_session_id) << 16) | u32::from(requester_session_id);
        self.cur_responder_session_id = self.cur_responder_session_id.wrapping_add(1);
        (session_id, rsp_session_id)
    }

    pub fn set_active_session_id(&mut self, session_id: u32) {
        self.active_session_id = Some(session_id);
    }

    pub fn reset_active_session_id(&mut self) {
        self.active_session_id = None;
    }

    pub fn active_session_id(&self) -> Option<u32> {
        self.active_session_id
    }

    pub fn last_error(&self) -> LastSpdmError {
        self.last_error
    }

    pub fn clear_last_error(&mut self) {
        self.last_error.clear();
    }

    /// Allocate a slot for `session_id`. Ids are unique across live slots.
    pub fn create_session(&mut self, session_id: u32) -> SessionResult<()> {
        if session_id == INVALID_SESSION_ID {
            return Err(SessionError::InvalidSessionId);
        }
        if self.session_info(session_id).is_ok() {
            return Err(SessionError::DuplicateSessionId);
        }
        for slot in self.sessions.iter_mut() {
            if slot.is_none() {
                debug!("session {session_id:#010x}: slot allocated");
                *slot = Some(SessionInfo::new(session_id));
                return Ok(());
            }
        }
        warn!("session table full, rejecting {session_id:#010x}");
        Err(SessionError::SessionsLimitReached)
    }

    /// Free the slot. Key material and transcripts zeroize on drop.
    pub fn delete_session(&mut self, session_id: u32) -> SessionResult<()> {
        let session_index = self
            .sessions
            .iter()
            .position(|s| {
                s.as_ref()
                    .map(|info| info.session_id == session_id)
                    .unwrap_or(false)
            })
            .ok_or(SessionError::InvalidSessionId)?;

        debug!("session {session_id:#010x}: slot freed");
        self.sessions[session_index] = None;
        if self.active_session_id == Some(session_id) {
            self.reset_active_session_id();
        }
        Ok(())
    }

    pub fn session_info(&self, session_id: u32) -> SessionResult<&SessionInfo> {
        self.sessions
            .iter()
            .find_map(|s| s.as_ref().filter(|info| info.session_id == session_id))
            .ok_or(SessionError::InvalidSessionId)
    }

    pub fn session_info_mut(&mut self, session_id: u32) -> SessionResult<&mut SessionInfo> {
        self.sessions
            .iter_mut()
            .find_map(|s| s.as_mut().filter(|info| info.session_id == session_id))
            .ok_or(SessionError::InvalidSessionId)
    }

    pub fn sessions_in_state(&self, state: SessionState) -> usize {
        self.sessions
            .iter()
            .flatten()
            .filter(|s| s.session_state() == state)
            .count()
    }

    /// Seal `app_message` into one secured record.
    ///
    /// Record layout: session_id (u32 LE) ‖ low-order sequence bytes
    /// (transport-chosen width) ‖ length (u16 LE) ‖ payload ‖ tag. The
    /// outbound counter advances only when the seal succeeds.
    pub fn encode_secure_message(
        &mut self,
        transport: &dyn SpdmTransport,
        session_id: u32,
        is_requester: bool,
        app_message: &[u8],
        secure_message: &mut MessageBuf,
    ) -> SessionResult<()> {
        let seq_size = transport.sequence_number_size();
        let max_rand = transport.max_random_count();
        debug_assert!(seq_size <= 8);

        let session_info = self.session_info_mut(session_id)?;
        let session_type = session_info.session_type;
        let key_type = session_info.record_key_type(is_requester)?;

        let sequence_num = session_info
            .key_schedule
            .sequence_number(key_type)
            .map_err(SessionError::KeySchedule)?;
        if sequence_num == u64::MAX {
            return Err(SessionError::SequenceNumberOverflow);
        }
        let seq_bytes_full = sequence_num.to_le_bytes();
        let seq_bytes = &seq_bytes_full[..seq_size];

        match session_type {
            SessionType::None => Err(SessionError::InvalidState),
            SessionType::EncMac => {
                let rand_count = if max_rand > 0 {
                    let bound = max_rand.min(MAX_RANDOM_DATA_SIZE);
                    (rand_u32().map_err(|_| SessionError::RandomSource)? % bound + 1) as usize
                } else {
                    0
                };

                let plain_len = 2 + app_message.len() + rand_count;
                let length = plain_len + AEAD_TAG_SIZE;
                if plain_len > MAX_PLAINTEXT_SIZE || length > u16::MAX as usize {
                    return Err(SessionError::RecordTooLarge);
                }

                let mut aad = ArrayVec::<u8, MAX_AEAD_AAD_HEADER_SIZE>::new();
                let _ = aad.try_extend_from_slice(&session_id.to_le_bytes());
                let _ = aad.try_extend_from_slice(seq_bytes);
                let _ = aad.try_extend_from_slice(&(length as u16).to_le_bytes());

                let mut plaintext = [0u8; MAX_PLAINTEXT_SIZE];
                plaintext[..2].copy_from_slice(&(app_message.len() as u16).to_le_bytes());
                plaintext[2..2 + app_message.len()].copy_from_slice(app_message);
                if rand_count > 0 {
                    rand_bytes(&mut plaintext[2 + app_message.len()..plain_len])
                        .map_err(|_| SessionError::RandomSource)?;
                }

                let mut ciphertext = [0u8; MAX_PLAINTEXT_SIZE];
                let result = session_info.key_schedule.encrypt_message(
                    key_type,
                    &aad,
                    &plaintext[..plain_len],
                    &mut ciphertext,
                );
                plaintext[..plain_len].zeroize();
                let (cipher_len, tag) = result.map_err(SessionError::KeySchedule)?;

                let mut record_len = session_id.encode(secure_message).map_err(SessionError::Codec)?;
                record_len += encode_u8_slice(seq_bytes, secure_message).map_err(SessionError::Codec)?;
                record_len += (length as u16)
                    .encode(secure_message)
                    .map_err(SessionError::Codec)?;
                record_len += encode_u8_slice(&ciphertext[..cipher_len], secure_message)
                    .map_err(SessionError::Codec)?;
                record_len += encode_u8_slice(&tag, secure_message).map_err(SessionError::Codec)?;
                secure_message
                    .push_data(record_len)
                    .map_err(SessionError::Codec)?;
                Ok(())
            }
            SessionType::MacOnly => {
                let length = app_message.len() + AEAD_TAG_SIZE;
                if app_message.len() > MAX_SPDM_MESSAGE_BUFFER_SIZE || length > u16::MAX as usize {
                    return Err(SessionError::RecordTooLarge);
                }

                // The payload travels in the clear but under the MAC.
                let mut aad = ArrayVec::<u8, { MAX_AEAD_AAD_HEADER_SIZE + MAX_SPDM_MESSAGE_BUFFER_SIZE }>::new();
                let _ = aad.try_extend_from_slice(&session_id.to_le_bytes());
                let _ = aad.try_extend_from_slice(seq_bytes);
                let _ = aad.try_extend_from_slice(&(length as u16).to_le_bytes());
                let _ = aad.try_extend_from_slice(app_message);

                let (_, tag) = session_info
                    .key_schedule
                    .encrypt_message(key_type, &aad, &[], &mut [])
                    .map_err(SessionError::KeySchedule)?;

                let mut record_len = session_id.encode(secure_message).map_err(SessionError::Codec)?;
                record_len += encode_u8_slice(seq_bytes, secure_message).map_err(SessionError::Codec)?;
                record_len += (length as u16)
                    .encode(secure_message)
                    .map_err(SessionError::Codec)?;
                record_len += encode_u8_slice(app_message, secure_message).map_err(SessionError::Codec)?;
                record_len += encode_u8_slice(&tag, secure_message).map_err(SessionError::Codec)?;
                secure_message
                    .push_data(record_len)
                    .map_err(SessionError::Codec)?;
                Ok(())
            }
        }
    }

    /// Open one secured record and deliver its application payload.
    ///
    /// Failures leave the inbound counter untouched and record the decrypt
    /// error against the session; the one permitted recovery is a single
    /// retry with the KEY_UPDATE shadow epoch.
    pub fn decode_secure_message(
        &mut self,
        transport: &dyn SpdmTransport,
        is_requester: bool,
        secure_message: &mut MessageBuf,
        app_message: &mut [u8],
    ) -> SessionResult<(u32, usize)> {
        self.last_error.clear();
        let result = self.decode_record(transport, is_requester, secure_message, app_message);
        match &result {
            Err(SessionError::InvalidSessionId) => {
                // Session id did not resolve; the record was not touched.
                self.last_error
                    .set(SpdmErrorCode::InvalidSession, INVALID_SESSION_ID);
            }
            Err(
                SessionError::DecryptFailed
                | SessionError::SequenceMismatch
                | SessionError::SequenceNumberOverflow,
            ) => {
                if let Some(session_id) = self.active_session_id {
                    self.last_error.set(SpdmErrorCode::DecryptError, session_id);
                }
            }
            _ => {}
        }
        result
    }

    fn decode_record(
        &mut self,
        transport: &dyn SpdmTransport,
        is_requester: bool,
        secure_message: &mut MessageBuf,
        app_message: &mut [u8],
    ) -> SessionResult<(u32, usize)> {
        let seq_size = transport.sequence_number_size();

        let session_id = u32::decode(secure_message).map_err(SessionError::Codec)?;
        // Remember which session this record claimed, for error reporting.
        self.session_info(session_id)?;
        self.set_active_session_id(session_id);

        if secure_message.data_len() < seq_size + 2 {
            return Err(SessionError::DecryptFailed);
        }
        let mut wire_seq = [0u8; 8];
        wire_seq[..seq_size].copy_from_slice(secure_message.data(seq_size).map_err(SessionError::Codec)?);
        secure_message.pull_data(seq_size).map_err(SessionError::Codec)?;

        let length = u16::decode(secure_message).map_err(SessionError::Codec)? as usize;
        if length < AEAD_TAG_SIZE || length > secure_message.data_len() {
            return Err(SessionError::DecryptFailed);
        }
        let body_len = length - AEAD_TAG_SIZE;
        let payload = secure_message.data(length).map_err(SessionError::Codec)?;
        let mut record_body = [0u8; MAX_PLAINTEXT_SIZE];
        if body_len > record_body.len() {
            return Err(SessionError::RecordTooLarge);
        }
        record_body[..body_len].copy_from_slice(&payload[..body_len]);
        let mut tag = [0u8; AEAD_TAG_SIZE];
        tag.copy_from_slice(&payload[body_len..length]);

        let direction = if is_requester {
            KeyUpdateDirection::Requester
        } else {
            KeyUpdateDirection::Responder
        };

        let session_info = self.session_info_mut(session_id)?;
        let session_type = session_info.session_type;
        let key_type = session_info.record_key_type(is_requester)?;

        let mut plaintext = [0u8; MAX_PLAINTEXT_SIZE];
        let mut used_backup = false;
        let plain_len = loop {
            let expected_seq = session_info
                .key_schedule
                .sequence_number(key_type)
                .map_err(SessionError::KeySchedule)?;
            if expected_seq == u64::MAX {
                return Err(SessionError::SequenceNumberOverflow);
            }
            // The wire field is not secret; plain comparison is fine here.
            if wire_seq[..seq_size] != expected_seq.to_le_bytes()[..seq_size] {
                return Err(SessionError::SequenceMismatch);
            }

            let mut aad = ArrayVec::<u8, { MAX_AEAD_AAD_HEADER_SIZE + MAX_SPDM_MESSAGE_BUFFER_SIZE }>::new();
            let _ = aad.try_extend_from_slice(&session_id.to_le_bytes());
            let _ = aad.try_extend_from_slice(&wire_seq[..seq_size]);
            let _ = aad.try_extend_from_slice(&(length as u16).to_le_bytes());

            let attempt = match session_type {
                SessionType::None => return Err(SessionError::InvalidState),
                SessionType::EncMac => session_info.key_schedule.decrypt_message(
                    key_type,
                    &aad,
                    &record_body[..body_len],
                    &tag,
                    &mut plaintext,
                ),
                SessionType::MacOnly => {
                    let _ = aad.try_extend_from_slice(&record_body[..body_len]);
                    session_info
                        .key_schedule
                        .decrypt_message(key_type, &aad, &[], &tag, &mut [])
                        .map(|_| body_len)
                }
            };

            match attempt {
                Ok(n) => {
                    if used_backup {
                        // The peer is still on the previous epoch: keep it
                        // active and park the new epoch back in the shadow
                        // slot for the next rotated record.
                        session_info
                            .key_schedule
                            .create_update_session_data_key(direction)
                            .map_err(SessionError::KeySchedule)?;
                    }
                    break n;
                }
                Err(KeyScheduleError::Primitive(_)) => {
                    if !used_backup && session_info.key_schedule.backup_valid(direction) {
                        warn!(
                            "session {session_id:#010x}: decrypt failed, retrying with shadow key"
                        );
                        session_info
                            .key_schedule
                            .activate_update_session_data_key(direction, false);
                        used_backup = true;
                        continue;
                    }
                    return Err(SessionError::DecryptFailed);
                }
                Err(e) => return Err(SessionError::KeySchedule(e)),
            }
        };

        let app_len = match session_type {
            SessionType::EncMac => {
                if plain_len < 2 {
                    return Err(SessionError::DecryptFailed);
                }
                let app_len =
                    u16::from_le_bytes(plaintext[..2].try_into().unwrap()) as usize;
                if app_len > plain_len - 2 {
                    return Err(SessionError::DecryptFailed);
                }
                if app_message.len() < app_len {
                    return Err(SessionError::BufferTooSmall);
                }
                app_message[..app_len].copy_from_slice(&plaintext[2..2 + app_len]);
                plaintext[..plain_len].zeroize();
                app_len
            }
            SessionType::MacOnly => {
                if app_message.len() < body_len {
                    return Err(SessionError::BufferTooSmall);
                }
                app_message[..body_len].copy_from_slice(&record_body[..body_len]);
                body_len
            }
            SessionType::None => return Err(SessionError::InvalidState),
        };

        secure_message.pull_data(length).map_err(SessionError::Codec)?;
        Ok((session_id, app_len))
    }
}
