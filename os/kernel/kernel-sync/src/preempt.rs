/// Preemption control and processor identity, provided by the scheduler.
///
/// `disable`/`enable` must nest: every `disable` is paired with exactly one
/// `enable`, and preemption is only re-enabled when the outermost pair ends.
pub trait Preemption {
    fn disable(&self);
    fn enable(&self);

    /// Logical id of the processor executing the caller.
    ///
    /// Stable only while preemption is disabled.
    fn current_cpu(&self) -> usize;
}

/// Pins the caller to its current processor for the guard's lifetime.
///
/// Creating the guard disables preemption and records the processor id;
/// dropping it re-enables preemption. Per-CPU data indexed by [`cpu`](Self::cpu)
/// stays owned by this execution context until the guard goes away.
///
/// # Examples
///
/// ```
/// use core::cell::Cell;
/// use kernel_sync::{PinGuard, Preemption};
///
/// struct Uni(Cell<u32>);
///
/// impl Preemption for Uni {
///     fn disable(&self) { self.0.set(self.0.get() + 1); }
///     fn enable(&self) { self.0.set(self.0.get() - 1); }
///     fn current_cpu(&self) -> usize { 0 }
/// }
///
/// let sched = Uni(Cell::new(0));
/// {
///     let pin = PinGuard::new(&sched);
///     assert_eq!(pin.cpu(), 0);
///     assert_eq!(sched.0.get(), 1);
/// }
/// assert_eq!(sched.0.get(), 0);
/// ```
#[must_use = "preemption is re-enabled as soon as the guard is dropped"]
pub struct PinGuard<'a, P: Preemption + ?Sized> {
    preemption: &'a P,
    cpu: usize,
}

impl<'a, P: Preemption + ?Sized> PinGuard<'a, P> {
    #[inline]
    pub fn new(preemption: &'a P) -> Self {
        preemption.disable();
        let cpu = preemption.current_cpu();
        Self { preemption, cpu }
    }

    /// Processor the caller is pinned to.
    #[inline]
    #[must_use]
    pub const fn cpu(&self) -> usize {
        self.cpu
    }
}

impl<P: Preemption + ?Sized> Drop for PinGuard<'_, P> {
    fn drop(&mut self) {
        self.preemption.enable();
    }
}
