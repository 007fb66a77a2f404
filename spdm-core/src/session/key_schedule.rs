// Licensed under the Apache-2.0 license

//! SPDM session key schedule.
//!
//! Derives handshake and data secrets over the TLS-1.3-style bin_str labels,
//! holds the per-direction encryption keys, IV salts and record sequence
//! numbers, and keeps the KEY_UPDATE shadow epoch used for atomic rekey.

use crate::crypto::aead::{aead_decrypt, aead_encrypt, AeadCipherSuite, AEAD_IV_SIZE, AEAD_TAG_SIZE, MAX_AEAD_KEY_SIZE};
use crate::crypto::hash::{HashAlgo, MAX_HASH_SIZE};
use crate::crypto::hmac::{hkdf_expand, hkdf_extract, hmac};
use crate::crypto::PrimitiveError;
use crate::protocol::SpdmVersion;
use arrayvec::ArrayVec;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Debug, PartialEq)]
pub enum KeyScheduleError {
    BufferTooSmall,
    InvalidSessionKeyType,
    SessionSecretNotFound,
    HandshakeSecretNotFound,
    MasterSecretNotFound,
    DataSecretNotFound,
    SequenceNumberOverflow,
    Primitive(PrimitiveError),
}

pub type KeyScheduleResult<T> = Result<T, KeyScheduleError>;

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum SessionKeyType {
    RequestFinishedKey,
    ResponseFinishedKey,
    RequestHandshakeEncDecKey,
    ResponseHandshakeEncDecKey,
    RequestDataEncDecKey,
    ResponseDataEncDecKey,
}

/// Which direction a KEY_UPDATE acts on.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum KeyUpdateDirection {
    Requester,
    Responder,
}

/// One direction of one key epoch: the major secret it was expanded from,
/// the AEAD key material and the record counter.
#[derive(Default, Clone, Zeroize, ZeroizeOnDrop)]
pub(crate) struct DirectionEpoch {
    secret: Option<[u8; MAX_HASH_SIZE]>,
    enc_key: Option<[u8; MAX_AEAD_KEY_SIZE]>,
    iv_salt: [u8; AEAD_IV_SIZE],
    sequence_num: u64,
}

#[derive(Default, Zeroize, ZeroizeOnDrop)]
struct MasterSecretCtx {
    // DHE shared secret or PSK, kept only until the handshake secret exists
    session_ikm: Option<ArrayVec<u8, MAX_HASH_SIZE>>,
    handshake_secret: Option<[u8; MAX_HASH_SIZE]>,
    master_secret: Option<[u8; MAX_HASH_SIZE]>,
}

#[derive(Default, Zeroize, ZeroizeOnDrop)]
struct HandshakeSecretCtx {
    request: DirectionEpoch,
    response: DirectionEpoch,
    request_finished_key: Option<[u8; MAX_HASH_SIZE]>,
    response_finished_key: Option<[u8; MAX_HASH_SIZE]>,
}

#[derive(Default, Clone, Zeroize, ZeroizeOnDrop)]
struct DataSecretCtx {
    request: DirectionEpoch,
    response: DirectionEpoch,
}

#[derive(Default)]
pub(crate) struct KeySchedule {
    spdm_version: SpdmVersion,
    hash_algo: HashAlgo,
    aead_suite: AeadCipherSuite,
    master_secret_ctx: MasterSecretCtx,
    handshake_secret_ctx: HandshakeSecretCtx,
    data_secret_ctx: DataSecretCtx,
    // KEY_UPDATE shadow epochs; valid flags are per direction
    data_secret_backup: DataSecretCtx,
    request_backup_valid: bool,
    response_backup_valid: bool,
    export_master_secret: Option<[u8; MAX_HASH_SIZE]>,
    finished_key_ready: bool,
}

impl KeySchedule {
    const MAX_BIN_STR_LEN: usize = 128;

    pub fn init(&mut self, spdm_version: SpdmVersion, hash_algo: HashAlgo, aead_suite: AeadCipherSuite) {
        self.spdm_version = spdm_version;
        self.hash_algo = hash_algo;
        self.aead_suite = aead_suite;
    }

    pub fn finished_key_ready(&self) -> bool {
        self.finished_key_ready
    }

    /// Install the DHE shared secret (or the PSK, for PSK sessions) as the
    /// key-schedule input keying material.
    pub fn set_session_ikm(&mut self, ikm: &[u8]) -> KeyScheduleResult<()> {
        let mut stored = ArrayVec::new();
        stored
            .try_extend_from_slice(ikm)
            .map_err(|_| KeyScheduleError::BufferTooSmall)?;
        self.master_secret_ctx.session_ikm = Some(stored);
        Ok(())
    }

    /// Derive the handshake secret tree, bound to the transcript hash at the
    /// KEY_EXCHANGE_RSP boundary (TH1).
    pub fn generate_session_handshake_key(&mut self, th1_hash: &[u8]) -> KeyScheduleResult<()> {
        self.generate_handshake_secret()?;
        let hash_size = self.hash_algo.size();

        let (req_secret, rsp_secret) = {
            let handshake_secret = self
                .master_secret_ctx
                .handshake_secret
                .as_ref()
                .ok_or(KeyScheduleError::HandshakeSecretNotFound)?;

            let bin_str1 = self.bin_concat(SpdmBinStr::BinStr1, hash_size as u16, Some(th1_hash))?;
            let bin_str2 = self.bin_concat(SpdmBinStr::BinStr2, hash_size as u16, Some(th1_hash))?;

            let mut req_secret = [0u8; MAX_HASH_SIZE];
            hkdf_expand(
                self.hash_algo,
                &handshake_secret[..hash_size],
                bin_str1.as_slice(),
                &mut req_secret[..hash_size],
            )
            .map_err(KeyScheduleError::Primitive)?;

            let mut rsp_secret = [0u8; MAX_HASH_SIZE];
            hkdf_expand(
                self.hash_algo,
                &handshake_secret[..hash_size],
                bin_str2.as_slice(),
                &mut rsp_secret[..hash_size],
            )
            .map_err(KeyScheduleError::Primitive)?;
            (req_secret, rsp_secret)
        };

        self.handshake_secret_ctx.request = self.derive_epoch(&req_secret)?;
        self.handshake_secret_ctx.response = self.derive_epoch(&rsp_secret)?;

        let bin_str7 = self.bin_concat(SpdmBinStr::BinStr7, hash_size as u16, None)?;
        let mut req_finished = [0u8; MAX_HASH_SIZE];
        hkdf_expand(
            self.hash_algo,
            &req_secret[..hash_size],
            bin_str7.as_slice(),
            &mut req_finished[..hash_size],
        )
        .map_err(KeyScheduleError::Primitive)?;
        let mut rsp_finished = [0u8; MAX_HASH_SIZE];
        hkdf_expand(
            self.hash_algo,
            &rsp_secret[..hash_size],
            bin_str7.as_slice(),
            &mut rsp_finished[..hash_size],
        )
        .map_err(KeyScheduleError::Primitive)?;

        self.handshake_secret_ctx.request_finished_key = Some(req_finished);
        self.handshake_secret_ctx.response_finished_key = Some(rsp_finished);
        self.finished_key_ready = true;
        Ok(())
    }

    /// Derive the data secret tree, bound to the transcript hash at the
    /// FINISH boundary (TH2). Resets both data-epoch counters to zero.
    pub fn generate_session_data_key(&mut self, th2_hash: &[u8]) -> KeyScheduleResult<()> {
        self.generate_master_secret()?;
        let hash_size = self.hash_algo.size();

        let (req_secret, rsp_secret, export) = {
            let master_secret = self
                .master_secret_ctx
                .master_secret
                .as_ref()
                .ok_or(KeyScheduleError::MasterSecretNotFound)?;

            let bin_str3 = self.bin_concat(SpdmBinStr::BinStr3, hash_size as u16, Some(th2_hash))?;
            let bin_str4 = self.bin_concat(SpdmBinStr::BinStr4, hash_size as u16, Some(th2_hash))?;
            let bin_str8 = self.bin_concat(SpdmBinStr::BinStr8, hash_size as u16, Some(th2_hash))?;

            let mut req_secret = [0u8; MAX_HASH_SIZE];
            hkdf_expand(
                self.hash_algo,
                &master_secret[..hash_size],
                bin_str3.as_slice(),
                &mut req_secret[..hash_size],
            )
            .map_err(KeyScheduleError::Primitive)?;

            let mut rsp_secret = [0u8; MAX_HASH_SIZE];
            hkdf_expand(
                self.hash_algo,
                &master_secret[..hash_size],
                bin_str4.as_slice(),
                &mut rsp_secret[..hash_size],
            )
            .map_err(KeyScheduleError::Primitive)?;

            let mut export = [0u8; MAX_HASH_SIZE];
            hkdf_expand(
                self.hash_algo,
                &master_secret[..hash_size],
                bin_str8.as_slice(),
                &mut export[..hash_size],
            )
            .map_err(KeyScheduleError::Primitive)?;
            (req_secret, rsp_secret, export)
        };

        self.data_secret_ctx.request = self.derive_epoch(&req_secret)?;
        self.data_secret_ctx.response = self.derive_epoch(&rsp_secret)?;
        self.export_master_secret = Some(export);
        Ok(())
    }

    pub fn export_master_secret(&self) -> Option<&[u8]> {
        self.export_master_secret
            .as_ref()
            .map(|s| &s[..self.hash_algo.size()])
    }

    pub fn finished_key(&self, key_type: SessionKeyType) -> KeyScheduleResult<&[u8]> {
        let key = match key_type {
            SessionKeyType::RequestFinishedKey => self
                .handshake_secret_ctx
                .request_finished_key
                .as_ref()
                .ok_or(KeyScheduleError::HandshakeSecretNotFound)?,
            SessionKeyType::ResponseFinishedKey => self
                .handshake_secret_ctx
                .response_finished_key
                .as_ref()
                .ok_or(KeyScheduleError::HandshakeSecretNotFound)?,
            _ => Err(KeyScheduleError::InvalidSessionKeyType)?,
        };
        Ok(&key[..self.hash_algo.size()])
    }

    /// One-shot HMAC with a finished key (the FINISH verify-data path for
    /// retained-mode transcripts).
    pub fn hmac(
        &self,
        key_type: SessionKeyType,
        data: &[u8],
        mac: &mut [u8],
    ) -> KeyScheduleResult<usize> {
        let key = self.finished_key(key_type)?;
        hmac(self.hash_algo, key, data, mac).map_err(KeyScheduleError::Primitive)
    }

    pub fn sequence_number(&self, key_type: SessionKeyType) -> KeyScheduleResult<u64> {
        Ok(self.epoch(key_type)?.sequence_num)
    }

    #[cfg(test)]
    pub fn set_sequence_number(&mut self, key_type: SessionKeyType, value: u64) {
        if let Ok(epoch) = self.epoch_mut(key_type) {
            epoch.sequence_num = value;
        }
    }

    /// Seal one record payload. The per-record IV is the epoch salt with the
    /// little-endian counter XORed into its first eight bytes; the counter
    /// advances only after the seal succeeds.
    pub fn encrypt_message(
        &mut self,
        key_type: SessionKeyType,
        aad: &[u8],
        plaintext: &[u8],
        ciphertext: &mut [u8],
    ) -> KeyScheduleResult<(usize, [u8; AEAD_TAG_SIZE])> {
        let suite = self.aead_suite;
        let epoch = self.epoch(key_type)?;
        if epoch.sequence_num == u64::MAX {
            return Err(KeyScheduleError::SequenceNumberOverflow);
        }
        let key = epoch.enc_key.ok_or(KeyScheduleError::DataSecretNotFound)?;
        let iv = Self::record_iv(&epoch.iv_salt, epoch.sequence_num);

        let tag = aead_encrypt(
            suite,
            &key[..suite.key_size()],
            &iv,
            aad,
            plaintext,
            ciphertext,
        )
        .map_err(KeyScheduleError::Primitive)?;

        self.epoch_mut(key_type)?.sequence_num += 1;
        Ok((plaintext.len(), tag))
    }

    /// Open one record payload. On failure nothing advances, so the same
    /// record can be retried against the shadow epoch.
    pub fn decrypt_message(
        &mut self,
        key_type: SessionKeyType,
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
        plaintext: &mut [u8],
    ) -> KeyScheduleResult<usize> {
        let suite = self.aead_suite;
        let epoch = self.epoch(key_type)?;
        if epoch.sequence_num == u64::MAX {
            return Err(KeyScheduleError::SequenceNumberOverflow);
        }
        let key = epoch.enc_key.ok_or(KeyScheduleError::DataSecretNotFound)?;
        let iv = Self::record_iv(&epoch.iv_salt, epoch.sequence_num);

        let size = aead_decrypt(
            suite,
            &key[..suite.key_size()],
            &iv,
            aad,
            ciphertext,
            tag,
            plaintext,
        )
        .map_err(KeyScheduleError::Primitive)?;

        self.epoch_mut(key_type)?.sequence_num += 1;
        Ok(size)
    }

    pub fn backup_valid(&self, direction: KeyUpdateDirection) -> bool {
        match direction {
            KeyUpdateDirection::Requester => self.request_backup_valid,
            KeyUpdateDirection::Responder => self.response_backup_valid,
        }
    }

    /// KEY_UPDATE phase one: snapshot the active data epoch into the shadow
    /// slot and install the successor epoch ("traffic upd") with a zeroed
    /// counter.
    pub fn create_update_session_data_key(
        &mut self,
        direction: KeyUpdateDirection,
    ) -> KeyScheduleResult<()> {
        let hash_size = self.hash_algo.size();
        let old_secret = {
            let epoch = self.data_epoch(direction);
            epoch.secret.ok_or(KeyScheduleError::DataSecretNotFound)?
        };

        let bin_str9 = self.bin_concat(SpdmBinStr::BinStr9, hash_size as u16, None)?;
        let mut new_secret = [0u8; MAX_HASH_SIZE];
        hkdf_expand(
            self.hash_algo,
            &old_secret[..hash_size],
            bin_str9.as_slice(),
            &mut new_secret[..hash_size],
        )
        .map_err(KeyScheduleError::Primitive)?;
        let new_epoch = self.derive_epoch(&new_secret)?;

        match direction {
            KeyUpdateDirection::Requester => {
                self.data_secret_backup.request = self.data_secret_ctx.request.clone();
                self.data_secret_ctx.request = new_epoch;
                self.request_backup_valid = true;
            }
            KeyUpdateDirection::Responder => {
                self.data_secret_backup.response = self.data_secret_ctx.response.clone();
                self.data_secret_ctx.response = new_epoch;
                self.response_backup_valid = true;
            }
        }
        Ok(())
    }

    /// KEY_UPDATE phase two: commit the new epoch (`use_new_key`) or roll
    /// back to the shadow epoch. Either way the shadow slot is zeroized and
    /// its valid flag cleared.
    pub fn activate_update_session_data_key(
        &mut self,
        direction: KeyUpdateDirection,
        use_new_key: bool,
    ) {
        match direction {
            KeyUpdateDirection::Requester => {
                if !use_new_key {
                    self.data_secret_ctx.request = self.data_secret_backup.request.clone();
                }
                self.data_secret_backup.request.zeroize();
                self.request_backup_valid = false;
            }
            KeyUpdateDirection::Responder => {
                if !use_new_key {
                    self.data_secret_ctx.response = self.data_secret_backup.response.clone();
                }
                self.data_secret_backup.response.zeroize();
                self.response_backup_valid = false;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn data_enc_key(&self, key_type: SessionKeyType) -> Option<[u8; MAX_AEAD_KEY_SIZE]> {
        self.epoch(key_type).ok().and_then(|e| e.enc_key)
    }

    fn epoch(&self, key_type: SessionKeyType) -> KeyScheduleResult<&DirectionEpoch> {
        match key_type {
            SessionKeyType::RequestHandshakeEncDecKey => Ok(&self.handshake_secret_ctx.request),
            SessionKeyType::ResponseHandshakeEncDecKey => Ok(&self.handshake_secret_ctx.response),
            SessionKeyType::RequestDataEncDecKey => Ok(&self.data_secret_ctx.request),
            SessionKeyType::ResponseDataEncDecKey => Ok(&self.data_secret_ctx.response),
            _ => Err(KeyScheduleError::InvalidSessionKeyType),
        }
    }

    fn epoch_mut(&mut self, key_type: SessionKeyType) -> KeyScheduleResult<&mut DirectionEpoch> {
        match key_type {
            SessionKeyType::RequestHandshakeEncDecKey => Ok(&mut self.handshake_secret_ctx.request),
            SessionKeyType::ResponseHandshakeEncDecKey => {
                Ok(&mut self.handshake_secret_ctx.response)
            }
            SessionKeyType::RequestDataEncDecKey => Ok(&mut self.data_secret_ctx.request),
            SessionKeyType::ResponseDataEncDecKey => Ok(&mut self.data_secret_ctx.response),
            _ => Err(KeyScheduleError::InvalidSessionKeyType),
        }
    }

    fn data_epoch(&self, direction: KeyUpdateDirection) -> &DirectionEpoch {
        match direction {
            KeyUpdateDirection::Requester => &self.data_secret_ctx.request,
            KeyUpdateDirection::Responder => &self.data_secret_ctx.response,
        }
    }

    /// Expand a direction's AEAD key and IV salt from its major secret.
    fn derive_epoch(&self, secret: &[u8; MAX_HASH_SIZE]) -> KeyScheduleResult<DirectionEpoch> {
        let hash_size = self.hash_algo.size();
        let key_size = self.aead_suite.key_size();

        let bin_str5 = self.bin_concat(SpdmBinStr::BinStr5, key_size as u16, None)?;
        let mut enc_key = [0u8; MAX_AEAD_KEY_SIZE];
        hkdf_expand(
            self.hash_algo,
            &secret[..hash_size],
            bin_str5.as_slice(),
            &mut enc_key[..key_size],
        )
        .map_err(KeyScheduleError::Primitive)?;

        let bin_str6 = self.bin_concat(SpdmBinStr::BinStr6, AEAD_IV_SIZE as u16, None)?;
        let mut iv_salt = [0u8; AEAD_IV_SIZE];
        hkdf_expand(
            self.hash_algo,
            &secret[..hash_size],
            bin_str6.as_slice(),
            &mut iv_salt,
        )
        .map_err(KeyScheduleError::Primitive)?;

        Ok(DirectionEpoch {
            secret: Some(*secret),
            enc_key: Some(enc_key),
            iv_salt,
            sequence_num: 0,
        })
    }

    fn record_iv(salt: &[u8; AEAD_IV_SIZE], sequence_num: u64) -> [u8; AEAD_IV_SIZE] {
        let mut iv = *salt;
        for (b, s) in iv.iter_mut().zip(sequence_num.to_le_bytes()) {
            *b ^= s;
        }
        iv
    }

    // Handshake-Secret = HKDF-Extract(Salt_0, DHE-Secret or PSK)
    fn generate_handshake_secret(&mut self) -> KeyScheduleResult<()> {
        let hash_size = self.hash_algo.size();
        let salt_0 = [0u8; MAX_HASH_SIZE];

        let ikm = self
            .master_secret_ctx
            .session_ikm
            .as_ref()
            .ok_or(KeyScheduleError::SessionSecretNotFound)?;

        let mut prk = [0u8; MAX_HASH_SIZE];
        hkdf_extract(
            self.hash_algo,
            &salt_0[..hash_size],
            ikm.as_slice(),
            &mut prk[..hash_size],
        )
        .map_err(KeyScheduleError::Primitive)?;

        self.master_secret_ctx.handshake_secret = Some(prk);
        Ok(())
    }

    // Salt_1 = HKDF-Expand(Handshake-Secret, bin_str0, Hash.Length)
    // Master-Secret = HKDF-Extract(Salt_1, 0_filled)
    fn generate_master_secret(&mut self) -> KeyScheduleResult<()> {
        let hash_size = self.hash_algo.size();
        let handshake_secret = self
            .master_secret_ctx
            .handshake_secret
            .ok_or(KeyScheduleError::HandshakeSecretNotFound)?;

        let bin_str0 = self.bin_concat(SpdmBinStr::BinStr0, hash_size as u16, None)?;
        let mut salt_1 = [0u8; MAX_HASH_SIZE];
        hkdf_expand(
            self.hash_algo,
            &handshake_secret[..hash_size],
            bin_str0.as_slice(),
            &mut salt_1[..hash_size],
        )
        .map_err(KeyScheduleError::Primitive)?;

        let zero_filled = [0u8; MAX_HASH_SIZE];
        let mut prk = [0u8; MAX_HASH_SIZE];
        hkdf_extract(
            self.hash_algo,
            &salt_1[..hash_size],
            &zero_filled[..hash_size],
            &mut prk[..hash_size],
        )
        .map_err(KeyScheduleError::Primitive)?;

        self.master_secret_ctx.master_secret = Some(prk);
        Ok(())
    }

    fn bin_concat(
        &self,
        bin_str_type: SpdmBinStr,
        length: u16,
        context: Option<&[u8]>,
    ) -> KeyScheduleResult<ArrayVec<u8, { Self::MAX_BIN_STR_LEN }>> {
        let mut bin_str_buf = ArrayVec::<u8, { Self::MAX_BIN_STR_LEN }>::new();

        bin_str_buf
            .try_extend_from_slice(&length.to_le_bytes())
            .map_err(|_| KeyScheduleError::BufferTooSmall)?;
        bin_str_buf
            .try_extend_from_slice(self.spdm_version.bin_str_prefix().as_bytes())
            .map_err(|_| KeyScheduleError::BufferTooSmall)?;
        bin_str_buf
            .try_extend_from_slice(bin_str_type.label().as_bytes())
            .map_err(|_| KeyScheduleError::BufferTooSmall)?;
        if let Some(context) = context {
            bin_str_buf
                .try_extend_from_slice(context)
                .map_err(|_| KeyScheduleError::BufferTooSmall)?;
        }

        Ok(bin_str_buf)
    }
}

enum SpdmBinStr {
    BinStr0,
    BinStr1,
    BinStr2,
    BinStr3,
    BinStr4,
    BinStr5,
    BinStr6,
    BinStr7,
    BinStr8,
    BinStr9,
}

impl SpdmBinStr {
    fn label(&self) -> &'static str {
        match self {
            SpdmBinStr::BinStr0 => "derived",
            SpdmBinStr::BinStr1 => "req hs data",
            SpdmBinStr::BinStr2 => "rsp hs data",
            SpdmBinStr::BinStr3 => "req app data",
            SpdmBinStr::BinStr4 => "rsp app data",
            SpdmBinStr::BinStr5 => "key",
            SpdmBinStr::BinStr6 => "iv",
            SpdmBinStr::BinStr7 => "finished",
            SpdmBinStr::BinStr8 => "exp master",
            SpdmBinStr::BinStr9 => "traffic upd",
        }
    }
}
