//! Process-wide ephemeral values with lazy regeneration.
//!
//! An [`EphemeralKeyManager`] hands out a shared value until it has been used
//! a fixed number of times or its lifetime has passed, then generates a new
//! one on the next request. Nothing refreshes in the background. The value
//! that was replaced is kept one generation longer, so tokens minted just
//! before a rotation still verify.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct Entry<T> {
    value: Arc<T>,
    generation: u64,
    uses: u64,
    expires: Instant,
}

impl<T> Entry<T> {
    fn is_usable(&self, now: Instant, max_uses: u64) -> bool {
        self.uses < max_uses && now < self.expires
    }
}

struct Slots<T> {
    current: Option<Entry<T>>,
    previous: Option<(u64, Arc<T>)>,
    next_generation: u64,
}

pub struct EphemeralKeyManager<T> {
    slots: Mutex<Slots<T>>,
    max_uses: u64,
    lifetime: Duration,
}

impl<T> std::fmt::Debug for EphemeralKeyManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeyManager")
            .field("max_uses", &self.max_uses)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

impl<T> EphemeralKeyManager<T> {
    pub fn new(max_uses: u64, lifetime: Duration) -> Self {
        EphemeralKeyManager {
            slots: Mutex::new(Slots {
                current: None,
                previous: None,
                next_generation: 0,
            }),
            max_uses,
            lifetime,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The current value and its generation, generating a new one if the
    /// current value is used up or expired. Each call counts as one use.
    ///
    /// `generate` runs without the lock held. If another caller installed a
    /// fresh value in the meantime, that value wins and the generated one is
    /// discarded.
    pub fn get<E>(
        &self,
        now: Instant,
        generate: impl FnOnce() -> Result<T, E>,
    ) -> Result<(u64, Arc<T>), E> {
        {
            let mut slots = self.lock();
            if let Some(entry) = slots.current.as_mut() {
                if entry.is_usable(now, self.max_uses) {
                    entry.uses += 1;
                    return Ok((entry.generation, entry.value.clone()));
                }
            }
        }

        let fresh = Arc::new(generate()?);

        let mut slots = self.lock();
        // Check again, someone may have regenerated while we were.
        if let Some(entry) = slots.current.as_mut() {
            if entry.is_usable(now, self.max_uses) {
                entry.uses += 1;
                return Ok((entry.generation, entry.value.clone()));
            }
        }

        let generation = slots.next_generation;
        slots.next_generation += 1;
        let replaced = slots.current.replace(Entry {
            value: fresh.clone(),
            generation,
            uses: 1,
            expires: now + self.lifetime,
        });
        if let Some(old) = replaced {
            slots.previous = Some((old.generation, old.value));
        }
        trace!("Generated ephemeral value generation {}", generation);

        Ok((generation, fresh))
    }

    /// Look up a value by generation. Only the current and the previous
    /// generation are retained.
    pub fn by_generation(&self, generation: u64) -> Option<Arc<T>> {
        let slots = self.lock();
        if let Some(entry) = &slots.current {
            if entry.generation == generation {
                return Some(entry.value.clone());
            }
        }
        match &slots.previous {
            Some((g, value)) if *g == generation => Some(value.clone()),
            _ => None,
        }
    }

    /// Generations currently retained, newest first.
    pub fn generations(&self) -> Vec<u64> {
        let slots = self.lock();
        slots
            .current
            .iter()
            .map(|e| e.generation)
            .chain(slots.previous.iter().map(|(g, _)| *g))
            .collect()
    }
}
