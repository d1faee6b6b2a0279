use std::sync::Mutex;

use chrono::Utc;
use rand::Rng;

use crate::util::sync::lock;

const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Default)]
struct PushState {
    last_push_time: u64,
    last_rand_chars: [u8; 12],
}

/// Generates 20 character, chronologically sortable child keys.
///
/// Eight characters encode the millisecond timestamp, twelve carry randomness. Keys minted
/// within the same millisecond increment the random part so they stay strictly ordered.
#[derive(Debug, Default)]
pub(crate) struct PushIdGenerator {
    state: Mutex<PushState>,
}

impl PushIdGenerator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_id(&self) -> String {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
        self.next_id_at(now)
    }

    pub(crate) fn next_id_at(&self, mut now: u64) -> String {
        let mut state = lock(&self.state);
        let duplicate_time = now == state.last_push_time;
        state.last_push_time = now;

        let mut timestamp_chars = [0u8; 8];
        for slot in timestamp_chars.iter_mut().rev() {
            *slot = PUSH_CHARS[(now % 64) as usize];
            now /= 64;
        }

        if duplicate_time {
            let mut index = state.last_rand_chars.len();
            while index > 0 && state.last_rand_chars[index - 1] == 63 {
                state.last_rand_chars[index - 1] = 0;
                index -= 1;
            }
            if index > 0 {
                state.last_rand_chars[index - 1] += 1;
            }
        } else {
            let mut rng = rand::thread_rng();
            for slot in state.last_rand_chars.iter_mut() {
                *slot = rng.gen_range(0..64);
            }
        }

        let mut id = String::with_capacity(20);
        id.extend(timestamp_chars.iter().map(|ch| *ch as char));
        id.extend(
            state
                .last_rand_chars
                .iter()
                .map(|index| PUSH_CHARS[*index as usize] as char),
        );
        id
    }
}
