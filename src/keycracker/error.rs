use thiserror::Error;

use crate::wep::{min_keystream_len, MAX_KEY_LEN};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttackError {
    #[error("capture keystream too short: need at least {required} bytes, got {actual}")]
    InsufficientKeystream { required: usize, actual: usize },

    #[error("search depth {0} exceeds the 256 ranked sigma candidates per key byte")]
    InvalidSearchDepth(usize),

    #[error("key length {0} outside the supported range 1..={max}", max = MAX_KEY_LEN)]
    InvalidKeyLength(usize),

    #[error("no captures to attack")]
    NoCaptures,
}

pub(super) fn check_key_len(key_len: usize) -> Result<(), AttackError> {
    if key_len == 0 || key_len > MAX_KEY_LEN {
        return Err(AttackError::InvalidKeyLength(key_len));
    }
    Ok(())
}

pub(super) fn check_keystream(keystream: &[u8], key_len: usize) -> Result<(), AttackError> {
    let required = min_keystream_len(key_len);
    if keystream.len() < required {
        return Err(AttackError::InsufficientKeystream {
            required,
            actual: keystream.len(),
        });
    }
    Ok(())
}
