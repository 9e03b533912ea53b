//! Chronologically sortable keys for new children.
//!
//! A push id is 20 characters: 8 encode the creation time in milliseconds,
//! 12 are random. Within one millisecond the random part is incremented, so
//! ids from one generator sort strictly in creation order.

use parking_lot::Mutex;
use rand::Rng;

/// Alphabet in ascending ASCII order.
const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

const TIME_CHARS: usize = 8;
const RANDOM_CHARS: usize = 12;

/// Length of every generated id.
pub const PUSH_ID_LEN: usize = TIME_CHARS + RANDOM_CHARS;

#[derive(Debug, Default)]
struct GeneratorState {
    last_millis: i64,
    last_random: [u8; RANDOM_CHARS],
}

/// Generator of push ids, safe to share between tasks.
#[derive(Debug, Default)]
pub struct PushIdGenerator {
    state: Mutex<GeneratorState>,
}

impl PushIdGenerator {
    /// Create a new generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the id for a child created at `now_millis`.
    pub fn next_id(&self, now_millis: i64) -> String {
        let mut state = self.state.lock();

        if now_millis == state.last_millis {
            increment(&mut state.last_random);
        } else {
            let mut rng = rand::thread_rng();
            for slot in state.last_random.iter_mut() {
                *slot = rng.gen_range(0..64);
            }
            state.last_millis = now_millis;
        }

        let mut id = [0u8; PUSH_ID_LEN];
        let mut time = now_millis.max(0) as u64;
        for i in (0..TIME_CHARS).rev() {
            id[i] = PUSH_CHARS[(time % 64) as usize];
            time /= 64;
        }
        for (i, digit) in state.last_random.iter().enumerate() {
            id[TIME_CHARS + i] = PUSH_CHARS[*digit as usize];
        }

        id.iter().map(|b| *b as char).collect()
    }
}

/// Add one to a base-64 number, most significant digit first.
fn increment(digits: &mut [u8; RANDOM_CHARS]) {
    for digit in digits.iter_mut().rev() {
        if *digit == 63 {
            *digit = 0;
        } else {
            *digit += 1;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::path::validate_key;

    #[test]
    fn test_push_id_shape() {
        let generator = PushIdGenerator::new();
        let id = generator.next_id(1_700_000_000_000);
        assert_eq!(id.len(), PUSH_ID_LEN);
        assert!(validate_key(&id).is_ok());
    }

    #[test]
    fn test_push_ids_sort_in_creation_order() {
        let generator = PushIdGenerator::new();
        let mut ids = Vec::new();
        // Several ids in the same millisecond, then later ones.
        for _ in 0..5 {
            ids.push(generator.next_id(1_700_000_000_000));
        }
        ids.push(generator.next_id(1_700_000_000_001));
        ids.push(generator.next_id(1_700_000_100_000));

        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);

        let mut unique = ids.clone();
        unique.dedup();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn test_increment_carries() {
        let mut digits = [0u8; RANDOM_CHARS];
        digits[RANDOM_CHARS - 1] = 63;
        digits[RANDOM_CHARS - 2] = 63;
        increment(&mut digits);
        assert_eq!(digits[RANDOM_CHARS - 1], 0);
        assert_eq!(digits[RANDOM_CHARS - 2], 0);
        assert_eq!(digits[RANDOM_CHARS - 3], 1);
    }
}
