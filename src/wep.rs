use crate::rc4::RC4Cipher;

///Length of the public per-packet IV transmitted in front of the secret key.
pub const IV_LEN: usize = 4;

pub type WepIV = [u8; IV_LEN];

///Longest supported root key; IV + key must fit within the 256 KSA steps.
pub const MAX_KEY_LEN: usize = 256 - IV_LEN;

///A WEP root key of a fixed, configured byte length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WepKey(Vec<u8>);

impl WepKey {
    pub const LEN_40: usize = 5;
    pub const LEN_104: usize = 13;

    pub fn new(bytes: Vec<u8>) -> WepKey {
        WepKey(bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn create_rc4(&self, iv: &WepIV) -> RC4Cipher {
        RC4Cipher::from_key(&session_key(iv, &self.0))
    }
}

///Concatenates the per-packet IV and the root key into the RC4 session key.
pub fn session_key(iv: &WepIV, key: &[u8]) -> Vec<u8> {
    let mut rc4_key = Vec::with_capacity(IV_LEN + key.len());
    rc4_key.extend_from_slice(iv);
    rc4_key.extend_from_slice(key);
    rc4_key
}

///Shortest keystream either attack can work with; the deepest byte read is
///`X[key_len + IV_LEN - 2]`.
pub const fn min_keystream_len(key_len: usize) -> usize {
    key_len + IV_LEN - 1
}
