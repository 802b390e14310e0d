use tracing::debug;

use crate::rc4::RC4Cipher;
use crate::wep::{session_key, WepIV, IV_LEN};

use super::{AttackError, Capture, VoteTable};

#[derive(Debug, Clone, Copy)]
pub struct RankingSettings {
    ///Deepest ranked-vote index the search may escalate a position to.
    pub max_depth: usize,
    ///Total number of candidate keys tested against the oracle.
    pub max_candidates: usize,
}

impl Default for RankingSettings {
    fn default() -> Self {
        RankingSettings {
            max_depth: 255,
            max_candidates: 5_000,
        }
    }
}

///Backtracking search over per-position ranked sigma candidates, run when
///the plain top-vote key fails oracle confirmation.
///
///Normal positions read the sigma at their current shift into the ranked
///list and difference it against the previous position's sigma. A strong
///position's sigma is instead derived from the key bytes accumulated since
///its crossover shift plus the previous position's sigma, since its own
///histogram peak is uninformative.
pub struct KeyRanker {
    ranked: Vec<Vec<(u8, usize)>>,
    strong: Vec<bool>,
    max_shift: Vec<usize>,

    iv: WepIV,
    keystream: Vec<u8>,

    settings: RankingSettings,
}

impl KeyRanker {
    pub fn new(
        votes: &[VoteTable],
        strong: &[bool],
        sample: &Capture,
        settings: RankingSettings,
    ) -> Result<KeyRanker, AttackError> {
        if settings.max_depth >= 256 {
            return Err(AttackError::InvalidSearchDepth(settings.max_depth));
        }

        //Strong positions explore crossover shifts up to their own index,
        //normal positions start pinned to their top vote
        let max_shift = strong
            .iter()
            .enumerate()
            .map(|(position, &is_strong)| if is_strong { position } else { 0 })
            .collect();

        Ok(KeyRanker {
            ranked: votes.iter().map(VoteTable::ranked).collect(),
            strong: strong.to_vec(),
            max_shift,
            iv: sample.iv,
            keystream: sample.keystream.clone(),
            settings,
        })
    }

    ///Runs the search until a candidate is confirmed or the candidate budget
    ///is exhausted. Exhaustion is a normal outcome, not an error.
    pub fn search(&mut self) -> Option<Vec<u8>> {
        let mut budget = self.settings.max_candidates;
        let mut escalated = None;

        loop {
            if let Some(key) = self.search_at(escalated, &mut budget) {
                debug!(candidates_left = budget, "ranking search confirmed a key");
                return Some(key);
            }
            if budget == 0 {
                debug!("ranking search exhausted its candidate budget");
                return None;
            }

            //Escalate the normal position with the smallest vote-count gap
            //between its current depth and the next ranked entry
            let mut pick: Option<(usize, usize)> = None;
            for position in 0..self.ranked.len() {
                if self.strong[position] {
                    continue;
                }
                let depth = self.max_shift[position];
                if depth + 1 > self.settings.max_depth {
                    continue;
                }
                let gap = self.ranked[position][depth].1 - self.ranked[position][depth + 1].1;
                if pick.map_or(true, |(best_gap, _)| gap < best_gap) {
                    pick = Some((gap, position));
                }
            }
            let (_, position) = pick?;

            self.max_shift[position] += 1;
            escalated = Some(position);
            debug!(position, depth = self.max_shift[position], "escalating ranking depth");
        }
    }

    //One depth-first pass with the current per-position shift maxima; the
    //escalated position starts at its new depth so it is explored first
    fn search_at(&self, escalated: Option<usize>, budget: &mut usize) -> Option<Vec<u8>> {
        let mut shifts = vec![0usize; self.ranked.len()];
        if let Some(position) = escalated {
            shifts[position] = self.max_shift[position];
        }

        loop {
            if *budget == 0 {
                return None;
            }
            *budget -= 1;

            let key = self.candidate(&shifts);
            if RC4Cipher::is_key(&session_key(&self.iv, &key), &self.keystream) {
                return Some(key);
            }

            if !self.advance_shifts(&mut shifts, escalated) {
                return None;
            }
        }
    }

    fn candidate(&self, shifts: &[usize]) -> Vec<u8> {
        let mut key: Vec<u8> = Vec::with_capacity(shifts.len());
        let mut prev_sigma = 0u8;

        for (position, &shift) in shifts.iter().enumerate() {
            let sigma = if self.strong[position] {
                //Fold the key bytes from the crossover shift onwards into
                //the previous sigma
                let mut inv_rk = IV_LEN + position;
                for (idx, &key_byte) in key.iter().enumerate().skip(shift) {
                    inv_rk += key_byte as usize + IV_LEN + idx;
                }
                prev_sigma.wrapping_sub((inv_rk % 256) as u8)
            } else {
                self.ranked[position][shift].0
            };

            if position == 0 {
                key.push(sigma);
            } else {
                key.push(sigma.wrapping_sub(prev_sigma));
            }
            prev_sigma = sigma;
        }

        key
    }

    //Odometer step over the shifts: a position wraps at its maximum and
    //carries into the one before it; carrying past position 0 means the
    //pass is exhausted. The escalated position is pinned to its seeded
    //depth and only revisited at shift 0.
    fn advance_shifts(&self, shifts: &mut [usize], escalated: Option<usize>) -> bool {
        for position in (0..shifts.len()).rev() {
            if Some(position) == escalated {
                shifts[position] = 0;
                continue;
            }
            if shifts[position] + 1 < self.max_shift[position] {
                shifts[position] += 1;
                return true;
            }
            shifts[position] = 0;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keycracker::testdata;

    fn sigma_prefix_sums(key: &[u8]) -> Vec<u8> {
        let mut sigma = 0u8;
        key.iter()
            .map(|&kb| {
                sigma = sigma.wrapping_add(kb);
                sigma
            })
            .collect()
    }

    #[test]
    fn test_rejects_search_depth_past_table() {
        let votes = vec![VoteTable::new()];
        let sample = testdata::capture_for_iv(&[1], [0, 0, 0, 1]);
        let settings = RankingSettings {
            max_depth: 256,
            max_candidates: 10,
        };

        assert_eq!(
            KeyRanker::new(&votes, &[false], &sample, settings).err(),
            Some(AttackError::InvalidSearchDepth(256))
        );
    }

    #[test]
    fn test_finds_true_byte_below_top_vote() {
        let key = [0x2Cu8, 0x5F, 0x25, 0x03, 0xF6];
        let sigmas = sigma_prefix_sums(&key);

        //Correct sigmas everywhere, but position 2's true sigma is outvoted
        //by a decoy, leaving it second in the ranked list
        let mut votes = vec![VoteTable::new(); key.len()];
        for (position, table) in votes.iter_mut().enumerate() {
            for _ in 0..100 {
                table.add(sigmas[position]);
            }
        }
        for _ in 0..110 {
            votes[2].add(sigmas[2].wrapping_add(77));
        }

        let sample = testdata::capture_for_iv(&key, [9, 8, 7, 6]);
        let strong = vec![false; key.len()];
        let mut ranker =
            KeyRanker::new(&votes, &strong, &sample, RankingSettings::default()).unwrap();

        assert_eq!(ranker.search(), Some(key.to_vec()));
    }

    #[test]
    fn test_strong_position_derived_from_accumulated_bytes() {
        //Key chosen so position 2 satisfies the strong-byte relation with
        //crossover shift 1: key[2] = -(11 + key[1]) mod 256
        let key = [1u8, 2, 243, 7, 9];
        let sigmas = sigma_prefix_sums(&key);

        let mut votes = vec![VoteTable::new(); key.len()];
        for (position, table) in votes.iter_mut().enumerate() {
            if position == 2 {
                continue; //A strong position's own histogram is never read
            }
            for _ in 0..100 {
                table.add(sigmas[position]);
            }
        }

        let strong = vec![false, false, true, false, false];
        let sample = testdata::capture_for_iv(&key, [4, 3, 2, 1]);
        let mut ranker =
            KeyRanker::new(&votes, &strong, &sample, RankingSettings::default()).unwrap();

        assert_eq!(ranker.search(), Some(key.to_vec()));
    }

    #[test]
    fn test_budget_exhaustion_is_not_an_error() {
        let key = [10u8, 20, 30];

        //Vote tables pointing at an entirely different key
        let mut votes = vec![VoteTable::new(); key.len()];
        for table in votes.iter_mut() {
            table.add(0xAB);
        }

        let sample = testdata::capture_for_iv(&key, [1, 1, 2, 2]);
        let strong = vec![false; key.len()];
        let settings = RankingSettings {
            max_depth: 2,
            max_candidates: 50,
        };
        let mut ranker = KeyRanker::new(&votes, &strong, &sample, settings).unwrap();

        assert_eq!(ranker.search(), None);
    }
}
