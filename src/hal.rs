use alloc::sync::Arc;

use axerrno::AxResult;

use crate::context::RunContext;
use crate::event::EventInjectionInfo;
use crate::pending::VcpuRequest;
use crate::vcpu::Vcpu;

/// Opaque reference to the VMCS-equivalent control structure of a VCPU.
///
/// Allocated and freed by the virtualization backend; this crate only stores
/// and forwards it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VmcsHandle(usize);

impl VmcsHandle {
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> usize {
        self.0
    }
}

/// Opaque reference to the per-VCPU virtual interrupt controller.
///
/// Same ownership rules as [`VmcsHandle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VlapicHandle(usize);

impl VlapicHandle {
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> usize {
        self.0
    }
}

/// Outcome of a drained work item: either the entry may proceed, or it must
/// be abandoned until the next attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryDecision {
    Enter,
    Abort,
}

/// The world-entry/exit collaborator.
///
/// The hand-written entry/exit sequences, VMCS management and injection-field
/// programming live behind this trait; the core only decides *when* each hook
/// runs and which [`RunContext`] slot it operates on.
pub trait WorldSwitchOps {
    /// Allocate the VMCS-equivalent for a VCPU. Called once from
    /// [`crate::prepare_vcpu`].
    fn alloc_vmcs(&mut self, vm_id: u16, vcpu_id: u16) -> AxResult<VmcsHandle>;

    /// Capture the live hardware register state into the outgoing world's
    /// slot. Runs before the active-world index may change.
    fn save_world(&mut self, ctx: &mut RunContext) -> AxResult;

    /// Load the incoming world's slot into hardware. Runs after the
    /// active-world index has been committed.
    fn load_world(&mut self, ctx: &RunContext) -> AxResult;

    /// Program the hardware event-injection field with a claimed event.
    fn program_injection(&mut self, info: EventInjectionInfo) -> AxResult;

    /// Execute one record-level pre-work item. Returning
    /// [`EntryDecision::Abort`] abandons the entry attempt; undelivered
    /// injections stay queued.
    fn do_pre_work(&mut self, id: u16) -> AxResult<EntryDecision>;

    /// Act on one arch-level request drained before entry.
    fn apply_request(&mut self, req: VcpuRequest, ctx: &mut RunContext) -> AxResult<EntryDecision>;
}

/// The external run-queue owner. `schedule_vcpu` only forwards a dispatch
/// request; the policy that picks which VCPU runs is entirely on this side.
pub trait SchedulerOps {
    fn schedule(&mut self, vcpu: &Arc<Vcpu>);
}
