use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::rc4::RC4Cipher;
use crate::util::{run_worker_pool, WorkerTask};
use crate::wep::{session_key, IV_LEN};

use super::{
    check_key_len, check_keystream, classify_strong_bytes, dedup_captures, key_from_sigma_tops,
    AttackError, Capture, KeyByteObserver, KeyRanker, NopObserver, RankingSettings, ReplayState,
    VoteTable,
};

///Outcome of a vote-based attack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrackedKey {
    ///Key verified against a captured keystream by the RC4 oracle.
    Confirmed(Vec<u8>),
    ///Best-vote key the oracle could not confirm within budget.
    BestEffort(Vec<u8>),
}

impl CrackedKey {
    pub fn key(&self) -> &[u8] {
        match self {
            CrackedKey::Confirmed(key) | CrackedKey::BestEffort(key) => key,
        }
    }

    pub const fn is_confirmed(&self) -> bool {
        matches!(self, CrackedKey::Confirmed(_))
    }
}

impl fmt::Display for CrackedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.key()))
    }
}

//A capture replayed over its IV, ready for sigma voting
#[derive(Debug)]
pub(super) struct PreparedCapture {
    pub state: ReplayState,
    pub keystream: Vec<u8>,
}

impl PreparedCapture {
    pub fn prepare(capture: &Capture) -> PreparedCapture {
        let mut state = ReplayState::new();
        state.advance(&capture.iv);

        PreparedCapture {
            state,
            keystream: capture.keystream.clone(),
        }
    }
}

//The sigma vote of one capture for key byte `position`:
//Si[(IV_LEN + position - X[IV_LEN - 1 + position]) mod 256] - j
//  + sum_{l=0..position}(256 - S[l + IV_LEN])  (mod 256)
pub(super) fn sigma_vote(prepared: &PreparedCapture, position: usize) -> u8 {
    let state = &prepared.state;

    let x = prepared.keystream[IV_LEN - 1 + position] as isize;
    let idx = ((IV_LEN + position) as isize - x).rem_euclid(256) as usize;

    let mut sigma = state.si[idx] as isize - state.j as isize;
    for l in 0..=position {
        sigma += 256 - state.s[l + IV_LEN] as isize;
    }
    sigma.rem_euclid(256) as u8
}

///The Tews-Weinmann-Pyshkin attack over a fixed capture set: every key byte
///position is voted on independently (one worker per position), the key is
///read off the top votes by differencing, and the result is confirmed
///against one capture, with a ranked backtracking search as fallback.
pub struct TwpAttack {
    data: Vec<PreparedCapture>,
    sample: Capture,
    key_len: usize,
    settings: RankingSettings,
    observer: Arc<dyn KeyByteObserver>,

    result: Option<CrackedKey>,
}

impl TwpAttack {
    pub fn new(
        captures: Vec<Capture>,
        key_len: usize,
        settings: RankingSettings,
    ) -> Result<TwpAttack, AttackError> {
        check_key_len(key_len)?;
        if settings.max_depth >= 256 {
            return Err(AttackError::InvalidSearchDepth(settings.max_depth));
        }

        let captures = dedup_captures(captures);
        if captures.is_empty() {
            return Err(AttackError::NoCaptures);
        }
        for capture in &captures {
            check_keystream(&capture.keystream, key_len)?;
        }

        info!(captures = captures.len(), key_len, "starting TWP attack");

        Ok(TwpAttack {
            sample: captures[0].clone(),
            data: captures.iter().map(PreparedCapture::prepare).collect(),
            key_len,
            settings,
            observer: Arc::new(NopObserver),
            result: None,
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn KeyByteObserver>) -> TwpAttack {
        self.observer = observer;
        self
    }

    ///Runs the attack to completion; repeated calls return the cached result.
    pub fn find_key(&mut self) -> &CrackedKey {
        if let Some(ref result) = self.result {
            return result;
        }

        //Every position votes independently, one worker per position
        let mut votes = vec![VoteTable::new(); self.key_len];
        let data = &self.data;
        let tasks: Vec<WorkerTask<'_, Infallible>> = votes
            .iter_mut()
            .enumerate()
            .map(|(position, table)| {
                Box::new(move || {
                    for prepared in data {
                        table.add(sigma_vote(prepared, position));
                    }
                    Ok(())
                }) as WorkerTask<'_, Infallible>
            })
            .collect();
        if let Err(never) = run_worker_pool(tasks) {
            match never {}
        }

        let tops: Vec<u8> = votes.iter().map(VoteTable::top).collect();
        let key = key_from_sigma_tops(&tops);
        for (position, &byte) in key.iter().enumerate() {
            self.observer.on_byte_found(position, byte);
        }

        let result = if RC4Cipher::is_key(&session_key(&self.sample.iv, &key), &self.sample.keystream)
        {
            info!(key = %hex::encode(&key), "TWP attack confirmed top-vote key");
            CrackedKey::Confirmed(key)
        } else {
            debug!("top-vote key failed confirmation, ranking candidates");

            let processed = vec![self.data.len(); self.key_len];
            let strong = classify_strong_bytes(&votes, &processed);
            //The ranking depth was validated at construction
            let mut ranker =
                KeyRanker::new(&votes, &strong, &self.sample, self.settings).unwrap();

            match ranker.search() {
                Some(ranked_key) => {
                    for (position, &byte) in ranked_key.iter().enumerate() {
                        if key[position] != byte {
                            self.observer.on_byte_found(position, byte);
                        }
                    }
                    info!(key = %hex::encode(&ranked_key), "TWP attack confirmed ranked key");
                    CrackedKey::Confirmed(ranked_key)
                }
                None => {
                    warn!("ranking exhausted, returning unconfirmed best-vote key");
                    CrackedKey::BestEffort(key)
                }
            }
        };

        //Free the replayed captures; only the cached result is kept
        self.data = Vec::new();
        self.result.insert(result)
    }
}
