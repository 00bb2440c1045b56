use core::sync::atomic::{AtomicU64, Ordering};

use axerrno::{ax_err, AxResult};
use bitflags::bitflags;

/// Number of independently addressable work items in a [`PendingSet`].
pub const NR_PENDING_BITS: u16 = 64;

bitflags! {
    /// Named request bits re-evaluated by the world-switch path before every
    /// guest entry.
    ///
    /// These live in the VCPU's arch-level [`PendingSet`]; record-level
    /// pre-work uses caller-defined bit indices instead.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct VcpuRequest: u64 {
        /// A queued exception must be delivered.
        const EXCEPTION = 1 << 0;
        /// The pending event-injection record must be reprocessed.
        const EVENT = 1 << 1;
        /// An external interrupt is waiting.
        const EXTINT = 1 << 2;
        /// A non-maskable interrupt is waiting.
        const NMI = 1 << 3;
        /// The virtual interrupt controller's trigger-mode registers changed.
        const TMR_UPDATE = 1 << 4;
        /// Second-level translation mappings changed; flush before entry.
        const EPT_FLUSH = 1 << 5;
        /// The VPID-tagged TLB entries are stale; flush before entry.
        const VPID_FLUSH = 1 << 6;
        /// The per-world TSC offset or TSC-related MSRs must be re-synced.
        const TSC_SYNC = 1 << 7;
    }
}

/// A 64-bit set of deferred work items, raisable from any execution context.
///
/// `request` is a plain atomic OR and therefore idempotent and safe from
/// interrupt context. `test_and_clear` clears *before* the caller acts, so a
/// request re-raised concurrently with the action is observed again on the
/// next drain instead of being lost.
#[derive(Debug, Default)]
pub struct PendingSet(AtomicU64);

impl PendingSet {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Atomically set bit `id`. Fails with `InvalidInput` for ids >= 64.
    pub fn request(&self, id: u16) -> AxResult {
        if id >= NR_PENDING_BITS {
            return ax_err!(InvalidInput, "pending-work bit index out of range");
        }
        self.0.fetch_or(1 << id, Ordering::AcqRel);
        Ok(())
    }

    /// Atomically clear bit `id` and return whether it was set.
    pub fn test_and_clear(&self, id: u16) -> AxResult<bool> {
        if id >= NR_PENDING_BITS {
            return ax_err!(InvalidInput, "pending-work bit index out of range");
        }
        let prior = self.0.fetch_and(!(1 << id), Ordering::AcqRel);
        Ok(prior & (1 << id) != 0)
    }

    /// Whether bit `id` is currently set. Racy by nature; only a hint.
    pub fn is_pending(&self, id: u16) -> AxResult<bool> {
        if id >= NR_PENDING_BITS {
            return ax_err!(InvalidInput, "pending-work bit index out of range");
        }
        Ok(self.0.load(Ordering::Acquire) & (1 << id) != 0)
    }

    /// Raise all bits in `req` at once.
    pub fn raise(&self, req: VcpuRequest) {
        self.0.fetch_or(req.bits(), Ordering::AcqRel);
    }

    /// Atomically clear all bits in `mask` and return the subset that was
    /// pending.
    pub fn take(&self, mask: VcpuRequest) -> VcpuRequest {
        let prior = self.0.fetch_and(!mask.bits(), Ordering::AcqRel);
        VcpuRequest::from_bits_truncate(prior) & mask
    }

    /// Whether any work is pending.
    pub fn any(&self) -> bool {
        self.0.load(Ordering::Acquire) != 0
    }

    /// Current raw value. Only meaningful as a snapshot.
    pub fn snapshot(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Drop all pending work. Only used when re-initializing a VCPU.
    pub fn clear_all(&self) {
        self.0.store(0, Ordering::Release);
    }
}
