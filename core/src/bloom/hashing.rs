// Slot selection: k independent Blake3 hashes, domain-separated by round index

use super::BloomParams;

pub(crate) fn slot_indices(item: &[u8], params: BloomParams) -> Vec<usize> {
    (0..params.hash_count)
        .map(|round| {
            let mut hasher = blake3::Hasher::new();
            hasher.update(&[round]);
            hasher.update(item);
            let digest = hasher.finalize();
            let mut word = [0u8; 8];
            word.copy_from_slice(&digest.as_bytes()[..8]);
            (u64::from_le_bytes(word) % params.size_slots as u64) as usize
        })
        .collect()
}
