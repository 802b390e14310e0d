use super::VoteTable;

///Votes a position must have accumulated before the strong/normal test is
///meaningful; below this the position is treated as normal.
pub const STRONG_BYTE_MIN_SAMPLES: usize = 80_000;

///Fit of one position's vote distribution against the two theoretical
///shapes: uniform noise ("strong" key byte) and a single peak at the
///correct sigma ("normal" key byte).
#[derive(Default, Debug, Clone, Copy)]
pub struct KeyByteInfo {
    pub candidate_sigma: u8,

    pub p_candidate: f64,
    pub p_correct: f64,
    pub p_equal: f64,

    pub err_strong: f64,
    pub err_normal: f64,
}

impl KeyByteInfo {
    //Theoretical probability that the top vote of key byte `key_idx` is the
    //correct sigma, from the closed-form recurrence over earlier positions
    fn calc_p_correct(key_idx: usize) -> f64 {
        let n = 256f64;

        let mut q_i = (1f64 - 1f64 / n).powi(key_idx as i32) * (1f64 - key_idx as f64 / n);
        for k in 1..key_idx {
            q_i *= 1f64 - k as f64 / n;
        }

        let p_ks = (1f64 - 1f64 / n).powi(254);
        q_i * p_ks * 2f64 / n + (1f64 - q_i * p_ks) * (n - 2f64) / (n * (n - 1f64))
    }

    pub fn from_votes(key_idx: usize, votes: &VoteTable, total_votes: usize) -> KeyByteInfo {
        let candidate_sigma = votes.top();

        let p_equal = 1f64 / 256f64;
        let p_correct = KeyByteInfo::calc_p_correct(key_idx);
        let p_wrong = (1f64 - p_correct) / 255f64;

        //Sum-of-squares fit of the observed distribution against both shapes
        let mut err_strong = 0f64;
        let mut err_normal = 0f64;
        for (sigma, &count) in votes.counts().iter().enumerate() {
            let frac = count as f64 / total_votes as f64;

            err_strong += (frac - p_equal) * (frac - p_equal);

            if sigma == candidate_sigma as usize {
                err_normal += (frac - p_correct) * (frac - p_correct);
            } else {
                err_normal += (frac - p_wrong) * (frac - p_wrong);
            }
        }

        KeyByteInfo {
            candidate_sigma,

            p_candidate: votes.count(candidate_sigma) as f64 / total_votes as f64,
            p_correct,
            p_equal,

            err_strong,
            err_normal,
        }
    }

    ///A strong key byte's votes fit uniform noise better than a peak, so its
    ///top vote carries no information.
    pub fn is_strong(&self) -> bool {
        self.err_strong < self.err_normal
    }
}

///Classifies every key byte position from its final vote table and
///processed-capture count. Position 0 is never strong, and positions with
///fewer than [`STRONG_BYTE_MIN_SAMPLES`] votes default to normal.
pub fn classify_strong_bytes(votes: &[VoteTable], processed: &[usize]) -> Vec<bool> {
    votes
        .iter()
        .zip(processed)
        .enumerate()
        .map(|(key_idx, (table, &count))| {
            key_idx > 0
                && count >= STRONG_BYTE_MIN_SAMPLES
                && KeyByteInfo::from_votes(key_idx, table, count).is_strong()
        })
        .collect()
}
