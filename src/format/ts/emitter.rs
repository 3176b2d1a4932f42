/// Decides which samples of a sequence carry a periodic element, such as a
/// PCR.
///
/// The emitter starts primed, so the first sample always emits. Callers
/// [`reset`](Self::reset) it after acting on an emission; the next emission
/// then comes once `min_emit` samples have been skipped. A `min_emit` of zero
/// emits on every sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodicEmitter {
    min_emit: u32,
    count: u32,
}

impl PeriodicEmitter {
    pub fn new(min_emit: u32) -> Self {
        Self {
            min_emit,
            count: min_emit,
        }
    }

    /// Registers one sample and reports whether it emits
    pub fn should_emit(&mut self) -> bool {
        if self.count >= self.min_emit {
            true
        } else {
            self.count += 1;
            false
        }
    }

    /// Restarts the skip count after an emission
    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn min_emit(&self) -> u32 {
        self.min_emit
    }
}
