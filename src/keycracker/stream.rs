use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use concurrent_queue::ConcurrentQueue;
use tracing::{debug, info, warn};

use crate::rc4::RC4Cipher;
use crate::util::{run_worker_pool, WorkerTask};
use crate::wep::session_key;

use super::{
    check_key_len, check_keystream, classify_strong_bytes, key_from_sigma_tops, sigma_vote,
    AttackError, Capture, CaptureSource, CrackedKey, KeyByteObserver, KeyRanker, NopObserver,
    PreparedCapture, RankingSettings, VoteTable,
};

#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    ///Captures pulled from the source and handed to workers per batch.
    pub batch_size: usize,
    ///New captures position 0 must process between candidate checks.
    pub check_threshold: usize,
    ///How long idle workers and the checker sleep between polls.
    pub poll_interval: Duration,
    ///Fallback ranking search run after every failed candidate check.
    pub ranking: RankingSettings,
}

impl Default for StreamSettings {
    fn default() -> Self {
        StreamSettings {
            batch_size: 5_000,
            check_threshold: 5_000,
            poll_interval: Duration::from_millis(200),
            ranking: RankingSettings::default(),
        }
    }
}

#[derive(Default)]
struct ControlState {
    pause_requested: bool,
    paused_workers: usize,
    stopped: bool,
}

//Condvar-backed gate coordinating the vote workers, the checker and the
//feeder: cooperative pause/resume for snapshots, idle waits, and the stop
//signal, all observed at batch boundaries rather than preemptively
struct Control {
    state: Mutex<ControlState>,
    cond: Condvar,
}

impl Control {
    fn new() -> Control {
        Control {
            state: Mutex::new(ControlState::default()),
            cond: Condvar::new(),
        }
    }

    //Returns false once the attack is stopped; parks the caller while a
    //pause is requested
    fn checkpoint(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        while state.pause_requested && !state.stopped {
            state.paused_workers += 1;
            self.cond.notify_all();
            state = self.cond.wait(state).unwrap();
            state.paused_workers -= 1;
        }
        !state.stopped
    }

    //Cooperative barrier: requests a pause and waits until all `workers`
    //vote workers have checked in; returns false if stopped meanwhile
    fn pause(&self, workers: usize) -> bool {
        let mut state = self.state.lock().unwrap();
        state.pause_requested = true;
        self.cond.notify_all();
        while state.paused_workers < workers && !state.stopped {
            state = self.cond.wait(state).unwrap();
        }
        !state.stopped
    }

    fn resume(&self) {
        let mut state = self.state.lock().unwrap();
        state.pause_requested = false;
        self.cond.notify_all();
    }

    fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.stopped = true;
        self.cond.notify_all();
    }

    fn is_stopped(&self) -> bool {
        self.state.lock().unwrap().stopped
    }

    //Parks the caller until new data, a pause request, a stop, or the
    //timeout, whichever comes first
    fn idle_wait(&self, timeout: Duration) {
        let state = self.state.lock().unwrap();
        if state.stopped || state.pause_requested {
            return;
        }
        let _ = self.cond.wait_timeout(state, timeout).unwrap();
    }

    //Wakes idle workers after new data was queued
    fn notify(&self) {
        self.cond.notify_all();
    }
}

///Handle to stop a running [`StreamTwpAttack`]; consumed by the feeder, the
///vote workers and the checker at their poll points.
#[derive(Clone)]
pub struct StopSignal {
    control: Arc<Control>,
}

impl StopSignal {
    pub fn stop(&self) {
        self.control.stop();
    }
}

//State shared between the feeder, the vote workers and the checker for one
//streaming run
struct StreamShared {
    pending: Vec<ConcurrentQueue<Arc<PreparedCapture>>>,
    votes: Vec<Mutex<VoteTable>>,
    processed: Vec<AtomicUsize>,
    sample: Mutex<Option<Capture>>,
    guess: Mutex<Vec<u8>>,
    confirmed: Mutex<Option<Vec<u8>>>,
}

///Streaming variant of the TWP attack: ingests captures continuously from a
///[`CaptureSource`], periodically snapshots the vote tables under a
///cooperative pause, and terminates once a candidate key is confirmed.
pub struct StreamTwpAttack {
    source: Arc<dyn CaptureSource>,
    key_len: usize,
    settings: StreamSettings,
    observer: Arc<dyn KeyByteObserver>,
    control: Arc<Control>,

    result: Option<CrackedKey>,
}

impl StreamTwpAttack {
    pub fn new(
        source: Arc<dyn CaptureSource>,
        key_len: usize,
        settings: StreamSettings,
    ) -> Result<StreamTwpAttack, AttackError> {
        check_key_len(key_len)?;
        if settings.ranking.max_depth >= 256 {
            return Err(AttackError::InvalidSearchDepth(settings.ranking.max_depth));
        }

        Ok(StreamTwpAttack {
            source,
            key_len,
            settings,
            observer: Arc::new(NopObserver),
            control: Arc::new(Control::new()),
            result: None,
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn KeyByteObserver>) -> StreamTwpAttack {
        self.observer = observer;
        self
    }

    ///Stop handle for external cancellation; a stopped attack reports the
    ///current best-vote key as unconfirmed.
    pub fn stop_signal(&self) -> StopSignal {
        StopSignal {
            control: Arc::clone(&self.control),
        }
    }

    ///Runs until a key is confirmed or the attack is stopped; repeated calls
    ///return the cached result without touching the source again.
    pub fn find_key(&mut self) -> Result<CrackedKey, AttackError> {
        if let Some(ref result) = self.result {
            return Ok(result.clone());
        }

        let key_len = self.key_len;
        let shared = StreamShared {
            pending: (0..key_len).map(|_| ConcurrentQueue::unbounded()).collect(),
            votes: (0..key_len).map(|_| Mutex::new(VoteTable::new())).collect(),
            processed: (0..key_len).map(|_| AtomicUsize::new(0)).collect(),
            sample: Mutex::new(None),
            guess: Mutex::new(Vec::new()),
            confirmed: Mutex::new(None),
        };

        info!(key_len, "starting streaming TWP attack");

        {
            let shared = &shared;
            let control = &*self.control;
            let settings = &self.settings;
            let observer = &*self.observer;
            let source = &*self.source;

            let mut tasks: Vec<WorkerTask<'_, AttackError>> = Vec::with_capacity(key_len + 2);
            for position in 0..key_len {
                tasks.push(Box::new(move || {
                    run_vote_worker(shared, control, settings, position);
                    Ok(())
                }));
            }
            tasks.push(Box::new(move || {
                run_checker(shared, control, settings, observer);
                Ok(())
            }));
            tasks.push(Box::new(move || {
                run_feeder(shared, control, settings, source, key_len)
            }));

            run_worker_pool(tasks)?;
        }

        let StreamShared {
            votes,
            processed,
            confirmed,
            ..
        } = shared;

        let result = match confirmed.into_inner().unwrap() {
            Some(key) => CrackedKey::Confirmed(key),
            None => {
                //Stopped externally: report the current best-vote bytes
                if processed[0].load(Ordering::SeqCst) == 0 {
                    warn!("streaming attack stopped before processing any captures");
                }
                let tops: Vec<u8> = votes
                    .iter()
                    .map(|table| table.lock().unwrap().top())
                    .collect();
                CrackedKey::BestEffort(key_from_sigma_tops(&tops))
            }
        };

        self.result = Some(result.clone());
        Ok(result)
    }
}

//Drains one bounded batch at a time from this position's queue and votes
//over it; pause and stop are honored between batches only, so snapshots
//never observe a partially voted batch
fn run_vote_worker(
    shared: &StreamShared,
    control: &Control,
    settings: &StreamSettings,
    position: usize,
) {
    loop {
        if !control.checkpoint() {
            return;
        }

        let mut batch = Vec::new();
        while batch.len() < settings.batch_size {
            match shared.pending[position].pop() {
                Ok(prepared) => batch.push(prepared),
                Err(_) => break,
            }
        }
        if batch.is_empty() {
            control.idle_wait(settings.poll_interval);
            continue;
        }

        {
            let mut table = shared.votes[position].lock().unwrap();
            for prepared in &batch {
                table.add(sigma_vote(prepared, position));
            }
        }
        shared.processed[position].fetch_add(batch.len(), Ordering::SeqCst);
    }
}

//Wakes periodically; once enough new captures have been processed it
//snapshots the vote tables under the pause barrier, derives a candidate and
//tries to confirm it, falling back to a budgeted ranking search
fn run_checker(
    shared: &StreamShared,
    control: &Control,
    settings: &StreamSettings,
    observer: &dyn KeyByteObserver,
) {
    let workers = shared.votes.len();
    let mut last_checked = 0usize;

    loop {
        if control.is_stopped() {
            return;
        }
        if shared.processed[0].load(Ordering::SeqCst) - last_checked < settings.check_threshold {
            control.idle_wait(settings.poll_interval);
            continue;
        }
        last_checked = shared.processed[0].load(Ordering::SeqCst);

        //Consistent snapshot: all workers parked between batches
        if !control.pause(workers) {
            return;
        }
        let votes: Vec<VoteTable> = shared
            .votes
            .iter()
            .map(|table| table.lock().unwrap().clone())
            .collect();
        let processed: Vec<usize> = shared
            .processed
            .iter()
            .map(|count| count.load(Ordering::SeqCst))
            .collect();
        control.resume();

        let tops: Vec<u8> = votes.iter().map(VoteTable::top).collect();
        let key = key_from_sigma_tops(&tops);
        report_guess(shared, observer, &key);

        let Some(sample) = shared.sample.lock().unwrap().clone() else {
            continue;
        };

        debug!(processed = last_checked, "checking candidate key");
        if RC4Cipher::is_key(&session_key(&sample.iv, &key), &sample.keystream) {
            store_confirmed(shared, control, observer, key);
            return;
        }

        //Bounded ranking pass before waiting for more data
        let strong = classify_strong_bytes(&votes, &processed);
        //The ranking depth was validated at attack construction
        let mut ranker = KeyRanker::new(&votes, &strong, &sample, settings.ranking).unwrap();
        if let Some(ranked_key) = ranker.search() {
            store_confirmed(shared, control, observer, ranked_key);
            return;
        }
    }
}

//Pulls capture batches from the source, validates and replays them, and
//fans them out to every position's pending queue
fn run_feeder(
    shared: &StreamShared,
    control: &Control,
    settings: &StreamSettings,
    source: &dyn CaptureSource,
    key_len: usize,
) -> Result<(), AttackError> {
    loop {
        if control.is_stopped() {
            return Ok(());
        }
        if source.will_block() {
            control.idle_wait(settings.poll_interval);
            continue;
        }

        //Let the vote workers catch up before pulling more
        if shared
            .pending
            .iter()
            .any(|queue| queue.len() >= settings.batch_size * 2)
        {
            control.idle_wait(settings.poll_interval);
            continue;
        }

        let captures = source.get_next(settings.batch_size);
        if captures.is_empty() {
            control.idle_wait(settings.poll_interval);
            continue;
        }

        //A capture that cannot be processed fails the whole attack; skipping
        //it would bias the vote tables
        for capture in &captures {
            if let Err(err) = check_keystream(&capture.keystream, key_len) {
                control.stop();
                return Err(err);
            }
        }

        *shared.sample.lock().unwrap() = Some(captures[0].clone());

        let prepared: Vec<Arc<PreparedCapture>> = captures
            .iter()
            .map(|capture| Arc::new(PreparedCapture::prepare(capture)))
            .collect();
        for queue in &shared.pending {
            for item in &prepared {
                queue
                    .push(Arc::clone(item))
                    .expect("pending capture queue is never closed");
            }
        }
        control.notify();
    }
}

//Reports every position whose best guess changed since the last report
fn report_guess(shared: &StreamShared, observer: &dyn KeyByteObserver, key: &[u8]) {
    let mut guess = shared.guess.lock().unwrap();
    for (position, &byte) in key.iter().enumerate() {
        if guess.get(position) != Some(&byte) {
            observer.on_byte_found(position, byte);
        }
    }
    *guess = key.to_vec();
}

fn store_confirmed(
    shared: &StreamShared,
    control: &Control,
    observer: &dyn KeyByteObserver,
    key: Vec<u8>,
) {
    report_guess(shared, observer, &key);
    info!(key = %hex::encode(&key), "streaming attack confirmed key");
    *shared.confirmed.lock().unwrap() = Some(key);
    control.stop();
}
