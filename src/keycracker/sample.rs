use std::collections::HashSet;

use crate::wep::WepIV;

///One captured WEP packet: its public IV and the keystream bytes recovered
///from the known plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Capture {
    pub iv: WepIV,
    pub keystream: Vec<u8>,
}

///Pull interface the streaming attack ingests captures through.
///
///The source is expected to be effectively unbounded; the attack never
///terminates just because a pull comes back empty.
pub trait CaptureSource: Send + Sync {
    ///Returns up to `max` new captures; may block until some are available.
    fn get_next(&self, max: usize) -> Vec<Capture>;

    ///Whether the next [`CaptureSource::get_next`] call would block.
    fn will_block(&self) -> bool;
}

///Drops duplicate (IV, keystream) captures, keeping first occurrences.
pub(super) fn dedup_captures(captures: Vec<Capture>) -> Vec<Capture> {
    let mut seen = HashSet::new();
    captures
        .into_iter()
        .filter(|capture| seen.insert(capture.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup() {
        let a = Capture {
            iv: [0, 1, 2, 3],
            keystream: vec![7; 16],
        };
        let b = Capture {
            iv: [0, 1, 2, 4],
            keystream: vec![7; 16],
        };

        let deduped = dedup_captures(vec![a.clone(), b.clone(), a.clone()]);
        assert_eq!(deduped, vec![a, b]);
    }
}
