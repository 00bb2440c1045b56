use axerrno::{ax_err, AxResult};
use spin::Mutex;

/// One interrupt or exception waiting to be injected on the next guest entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventInjectionInfo {
    /// Encoded interruption information (vector, type, valid bit).
    pub intr_info: u32,
    /// Error code pushed for exceptions that deliver one.
    pub error_code: u32,
}

/// The single-slot pending-injection record of a VCPU.
///
/// At most one event can be queued at a time; a second `queue` is refused and
/// the caller retries after the next entry. Callers whose architectural
/// priority rules allow superseding the queued event use
/// [`PendingEvent::replace`] instead; the priority decision itself is theirs.
///
/// The slot lock is only held for the enqueue/take instant, never across a
/// world switch.
#[derive(Debug, Default)]
pub struct PendingEvent {
    slot: Mutex<Option<EventInjectionInfo>>,
}

impl PendingEvent {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Queue `info` for the next entry. Fails with `ResourceBusy` while a
    /// previous event is still undelivered.
    pub fn queue(&self, info: EventInjectionInfo) -> AxResult {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return ax_err!(ResourceBusy, "event injection already pending");
        }
        *slot = Some(info);
        Ok(())
    }

    /// Unconditionally queue `info`, returning the event it displaced.
    pub fn replace(&self, info: EventInjectionInfo) -> Option<EventInjectionInfo> {
        self.slot.lock().replace(info)
    }

    /// Claim the pending event for hardware programming, emptying the slot.
    pub fn take(&self) -> Option<EventInjectionInfo> {
        self.slot.lock().take()
    }

    /// Put a claimed event back after an entry attempt was aborted before the
    /// injection field could be programmed.
    pub fn requeue(&self, info: EventInjectionInfo) {
        let mut slot = self.slot.lock();
        debug_assert!(slot.is_none(), "requeue over a live pending event");
        *slot = Some(info);
    }

    /// Whether an event is waiting for delivery.
    pub fn is_pending(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Drop any pending event. Only used when re-initializing a VCPU.
    pub fn clear(&self) {
        *self.slot.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GP_FAULT: EventInjectionInfo = EventInjectionInfo {
        intr_info: 0x8000_0b0d,
        error_code: 0,
    };
    const PAGE_FAULT: EventInjectionInfo = EventInjectionInfo {
        intr_info: 0x8000_0b0e,
        error_code: 0x2,
    };

    #[test]
    fn second_queue_is_refused_until_delivery() {
        let ev = PendingEvent::new();
        ev.queue(GP_FAULT).unwrap();
        assert!(ev.queue(PAGE_FAULT).is_err());
        assert!(ev.is_pending());

        // Delivery empties the slot; queueing works again.
        assert_eq!(ev.take(), Some(GP_FAULT));
        assert!(!ev.is_pending());
        ev.queue(PAGE_FAULT).unwrap();
    }

    #[test]
    fn replace_displaces_the_queued_event() {
        let ev = PendingEvent::new();
        assert_eq!(ev.replace(GP_FAULT), None);
        assert_eq!(ev.replace(PAGE_FAULT), Some(GP_FAULT));
        assert_eq!(ev.take(), Some(PAGE_FAULT));
    }

    #[test]
    fn aborted_entry_keeps_the_event_pending() {
        let ev = PendingEvent::new();
        ev.queue(GP_FAULT).unwrap();
        let claimed = ev.take().unwrap();
        // Entry aborted before hardware programming: put it back.
        ev.requeue(claimed);
        assert!(ev.is_pending());
        assert_eq!(ev.take(), Some(GP_FAULT));
    }
}
