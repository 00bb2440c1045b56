use core::sync::atomic::{AtomicU32, Ordering};

/// Sentinel value in [`IoRequest::processed`] signaling that the I/O-emulation
/// collaborator has completed the MMIO round trip.
pub const VCPU_MMIO_COMPLETE: u32 = 0;

/// CPU addressing mode of the guest, derived from EFER/CS on mode switches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CpuMode {
    #[default]
    Real,
    Protected,
    /// IA-32e mode with CS.L = 0.
    Compatibility,
    /// IA-32e mode with CS.L = 1.
    Bit64,
}

/// Metadata of the most recent VM exit, written back by the world-exit path
/// and consumed by the I/O-emulation and interrupt layers.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExitInfo {
    /// Raw exit reason from the VMCS-equivalent.
    pub reason: u32,
    /// Exit qualification; meaning depends on `reason`.
    pub qualification: u64,
    /// IDT-vectoring information, valid when the exit interrupted an event
    /// delivery that must be redone.
    pub idt_vectoring_info: u32,
    /// Length of the exiting instruction. Zeroed via
    /// [`crate::Vcpu::retain_rip`] to re-execute it on the next entry.
    pub inst_len: u32,
}

/// Direction of an emulated I/O or MMIO access.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IoDirection {
    #[default]
    Read,
    Write,
}

/// The per-VCPU I/O request slot.
///
/// The body is filled by exit decoding; ownership of the slot then passes to
/// the I/O-emulation collaborator, which stores [`VCPU_MMIO_COMPLETE`] into
/// `processed` when the round trip is done.
#[derive(Debug, Default)]
pub struct IoRequest {
    pub direction: IoDirection,
    /// Guest-physical address (MMIO) or port number (PIO).
    pub addr: u64,
    /// Access width in bytes.
    pub size: u8,
    /// Value written by the guest, or value to hand back on a read.
    pub value: u64,
    /// Completion word, polled across execution contexts.
    pub processed: AtomicU32,
}

impl IoRequest {
    /// Whether the emulation collaborator has finished with this request.
    pub fn is_complete(&self) -> bool {
        self.processed.load(Ordering::Acquire) == VCPU_MMIO_COMPLETE
    }

    /// Mark the round trip finished. Called by the emulation side.
    pub fn complete(&self) {
        self.processed.store(VCPU_MMIO_COMPLETE, Ordering::Release);
    }

    /// Mark the request in flight before handing it to the emulation side.
    pub fn begin(&self) {
        self.processed
            .store(VCPU_MMIO_COMPLETE.wrapping_add(1), Ordering::Release);
    }
}
