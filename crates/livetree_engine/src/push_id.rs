//! Time-ordered unique child names.
//!
//! A push id is 20 characters: 8 encoding the creation time in
//! milliseconds, then 12 random characters. The alphabet is in ASCII order,
//! so ids sort lexicographically by creation time. Ids generated within the
//! same millisecond (or while the clock goes backwards) reuse the previous
//! timestamp and increment the random part, which keeps them increasing
//! within one process.

use parking_lot::Mutex;
use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

const ALPHABET: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";
const TIME_CHARS: usize = 8;
const RANDOM_CHARS: usize = 12;

#[derive(Debug, Default)]
struct State {
    last_time: u64,
    last_random: [u8; RANDOM_CHARS],
}

/// Generates push ids.
#[derive(Debug, Default)]
pub struct PushIdGenerator {
    state: Mutex<State>,
}

impl PushIdGenerator {
    /// Creates a generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates an id for the current time.
    pub fn generate(&self) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        self.generate_at(now)
    }

    /// Generates an id for the given time in milliseconds since the epoch.
    pub fn generate_at(&self, now: u64) -> String {
        let mut state = self.state.lock();
        if now > state.last_time {
            let mut rng = rand::thread_rng();
            for digit in state.last_random.iter_mut() {
                *digit = rng.gen_range(0..64);
            }
            state.last_time = now;
        } else {
            increment(&mut state.last_random);
        }

        let mut id = String::with_capacity(TIME_CHARS + RANDOM_CHARS);
        let mut time = state.last_time;
        let mut time_chars = [0u8; TIME_CHARS];
        for slot in time_chars.iter_mut().rev() {
            *slot = ALPHABET[(time % 64) as usize];
            time /= 64;
        }
        id.extend(time_chars.iter().map(|&c| c as char));
        id.extend(state.last_random.iter().map(|&d| ALPHABET[d as usize] as char));
        id
    }
}

fn increment(digits: &mut [u8; RANDOM_CHARS]) {
    for digit in digits.iter_mut().rev() {
        if *digit < 63 {
            *digit += 1;
            return;
        }
        *digit = 0;
    }
}
