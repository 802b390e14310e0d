///Incrementally replayed RC4 key schedule for a (partial) session key.
///
///Tracks the permutation, its inverse and the running mixing index so a
///guessed key can be extended one byte at a time without redoing the whole
///schedule. `s` and `si` are always mutual inverses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayState {
    pub s: [u8; 256],
    pub si: [u8; 256],
    pub j: usize,
    scheduled: usize,
}

impl Default for ReplayState {
    fn default() -> Self {
        //Init both permutations to the identity permutation
        let mut s = [0u8; 256];
        for (i, sb) in s.iter_mut().enumerate() {
            *sb = i as u8;
        }

        ReplayState {
            s,
            si: s,
            j: 0,
            scheduled: 0,
        }
    }
}

impl ReplayState {
    pub fn new() -> ReplayState {
        ReplayState::default()
    }

    ///Number of key bytes consumed by the schedule so far.
    pub const fn scheduled(&self) -> usize {
        self.scheduled
    }

    ///Consumes the key bytes not yet scheduled, i.e. those from index
    ///`self.scheduled()` up to `key_bytes.len() - 1`. Passing a key this
    ///state was already advanced over is a no-op.
    pub fn advance(&mut self, key_bytes: &[u8]) {
        let until = key_bytes.len().min(256);
        for i in self.scheduled..until {
            self.j = (self.j + self.s[i] as usize + key_bytes[i] as usize) % 256;

            //Swap the permutation elements, mirroring the swap in the inverse
            let (a, b) = (self.s[i], self.s[self.j]);
            self.si.swap(a as usize, b as usize);
            self.s.swap(i, self.j);
        }
        self.scheduled = self.scheduled.max(until);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rc4::RC4Cipher;
    use rand::RngCore;

    fn random_key(len: usize) -> Vec<u8> {
        let mut key = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut key);
        key
    }

    #[test]
    fn test_deterministic() {
        let key = random_key(17);

        let mut first = ReplayState::new();
        first.advance(&key);
        let mut second = ReplayState::new();
        second.advance(&key);

        assert_eq!(first, second);
    }

    #[test]
    fn test_split_replay_matches_full_replay() {
        let key = random_key(17);

        let mut whole = ReplayState::new();
        whole.advance(&key);

        let mut split = ReplayState::new();
        split.advance(&key[..4]);
        assert_eq!(split.scheduled(), 4);
        split.advance(&key);

        assert_eq!(split, whole);

        //Replaying an already-consumed key must not change the state
        split.advance(&key);
        assert_eq!(split, whole);
    }

    #[test]
    fn test_inverse_invariant() {
        let mut state = ReplayState::new();
        state.advance(&random_key(17));

        for i in 0..256 {
            assert_eq!(state.si[state.s[i] as usize] as usize, i);
        }
    }

    #[test]
    fn test_matches_cipher_keyschedule() {
        let key = random_key(16);

        //A schedule over 256 steps cycles the key, which the replay only
        //does through explicit repetition
        let mut repeated = Vec::new();
        while repeated.len() < 256 {
            repeated.extend_from_slice(&key);
        }
        repeated.truncate(256);

        let mut state = ReplayState::new();
        state.advance(&repeated);

        assert_eq!(state.s, RC4Cipher::from_key(&key).s);
    }
}
