///Per-key-byte-position histogram of predicted sigma values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteTable {
    votes: [usize; 256],
}

impl Default for VoteTable {
    fn default() -> Self {
        VoteTable { votes: [0; 256] }
    }
}

impl VoteTable {
    pub fn new() -> VoteTable {
        VoteTable::default()
    }

    pub fn add(&mut self, value: u8) {
        self.votes[value as usize] += 1;
    }

    pub fn count(&self, value: u8) -> usize {
        self.votes[value as usize]
    }

    pub const fn counts(&self) -> &[usize; 256] {
        &self.votes
    }

    ///The value with the most votes; ties resolve to the highest value.
    pub fn top(&self) -> u8 {
        self.votes
            .iter()
            .enumerate()
            .max_by(|(_, v1), (_, v2)| v1.cmp(v2))
            .unwrap()
            .0 as u8
    }

    ///All values ordered by descending vote count, ties by descending value.
    pub fn ranked(&self) -> Vec<(u8, usize)> {
        let mut ranked: Vec<(u8, usize)> = self
            .votes
            .iter()
            .enumerate()
            .map(|(value, &count)| (value as u8, count))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)));
        ranked
    }
}

///Reconstructs the key from the per-position top sigma votes: the first
///sigma is the first key byte, every later key byte is the mod-256
///difference between neighbouring sigmas.
pub(super) fn key_from_sigma_tops(tops: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(tops.len());
    for (i, &sigma) in tops.iter().enumerate() {
        if i == 0 {
            key.push(sigma);
        } else {
            key.push(sigma.wrapping_sub(tops[i - 1]));
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_prefers_highest_value_on_tie() {
        let mut table = VoteTable::new();
        table.add(10);
        table.add(200);
        assert_eq!(table.top(), 200);

        table.add(10);
        assert_eq!(table.top(), 10);
    }

    #[test]
    fn test_ranked_order() {
        let mut table = VoteTable::new();
        table.add(5);
        table.add(5);
        table.add(9);

        let ranked = table.ranked();
        assert_eq!(ranked[0], (5, 2));
        assert_eq!(ranked[1], (9, 1));
        //Zero-vote values follow, highest value first
        assert_eq!(ranked[2], (255, 0));
        assert_eq!(ranked.len(), 256);
    }

    #[test]
    fn test_key_from_sigma_tops() {
        //Differencing must wrap, never clamp
        assert_eq!(key_from_sigma_tops(&[5, 9, 3]), vec![5, 4, 250]);
        assert_eq!(key_from_sigma_tops(&[0xFF, 0x01]), vec![0xFF, 0x02]);
    }

    #[test]
    fn test_differencing_inverts_prefix_sums() {
        let key = [0x2Cu8, 0x5F, 0x25, 0x03, 0xF6];

        let mut sigma = 0u8;
        let tops: Vec<u8> = key
            .iter()
            .map(|&kb| {
                sigma = sigma.wrapping_add(kb);
                sigma
            })
            .collect();

        assert_eq!(key_from_sigma_tops(&tops), key.to_vec());
    }
}
