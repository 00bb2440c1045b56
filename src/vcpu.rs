use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use axerrno::{ax_err, AxResult};
use log::{debug, trace, warn};
use spin::{Mutex, MutexGuard};

use crate::arch::VcpuArch;
use crate::event::{EventInjectionInfo, PendingEvent};
use crate::exit::IoRequest;
use crate::hal::{EntryDecision, SchedulerOps, WorldSwitchOps};
use crate::pending::{PendingSet, VcpuRequest, NR_PENDING_BITS};
use crate::percpu;
use crate::vm::Vm;
use crate::GuestPhysAddr;

/// Coarse-grained lifecycle state of a VCPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum VcpuState {
    /// Uninitialized/error sentinel; never a resting state.
    Unknown = 0,
    /// Created, not yet started.
    Init = 1,
    /// Eligible for dispatch and guest execution.
    Running = 2,
    /// Suspended; previous state recorded for resume.
    Paused = 3,
    /// Terminal, pending destruction. Never scheduled again.
    Zombie = 4,
}

impl VcpuState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => VcpuState::Init,
            2 => VcpuState::Running,
            3 => VcpuState::Paused,
            4 => VcpuState::Zombie,
            _ => VcpuState::Unknown,
        }
    }
}

/// A lifecycle state cell observable and writable from any execution context.
///
/// Every transition is a single atomic store; there is never a
/// read-modify-write racing another writer.
#[derive(Debug)]
pub struct AtomicVcpuState(AtomicU8);

impl AtomicVcpuState {
    pub const fn new(state: VcpuState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> VcpuState {
        VcpuState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: VcpuState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn compare_exchange(&self, from: VcpuState, to: VcpuState) -> Result<(), VcpuState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(VcpuState::from_u8)
    }
}

/// One virtual CPU: identity, dual-world hardware context, lifecycle state
/// and the signaling records shared with the scheduler and interrupt layers.
///
/// The [`VcpuArch`] block is only ever mutated by the execution context
/// hosting the VCPU on its affine physical CPU; everything reachable from
/// interrupt or cross-CPU contexts is atomic or behind a short-lived lock.
pub struct Vcpu {
    /// Physical CPU this VCPU is affine to.
    pcpu_id: u16,
    /// Virtual CPU id within its VM.
    vcpu_id: u16,
    /// Non-owning back-reference; the VM owns the record.
    vm: Weak<Vm>,

    /// pCPU-exclusive architectural state. Interior mutability matches the
    /// hosting-context ownership rule above; it cannot be guarded by a lock
    /// because no lock may be held across a world switch.
    arch: UnsafeCell<VcpuArch>,

    /// Guest-physical entry point used for the first launch.
    entry_addr: AtomicUsize,

    /// State before the most recent suspension.
    prev_state: AtomicVcpuState,
    /// Current lifecycle state.
    state: AtomicVcpuState,
    /// Halt/step state requested by a debugger from another context.
    dbg_req_state: AtomicVcpuState,

    /// Cross-context signaling events.
    sync: PendingSet,
    /// Arch-level requests, drained by the world-switch path at entry.
    pending_req: PendingSet,
    /// Record-level pre-work, drained by the scheduler before dispatch.
    pending_pre_work: PendingSet,
    /// The single-slot event-injection record.
    event: PendingEvent,

    /// Whether this VCPU has ever executed a first launch.
    launched: AtomicBool,
    /// Nested-pause depth; saturates rather than wraps.
    paused_cnt: AtomicU32,
    /// Set while the VCPU is dispatched on its physical CPU.
    running: AtomicBool,

    /// I/O request slot, owned by the emulation collaborator once filled.
    io_req: Mutex<IoRequest>,

    /// Guest IA32_TSC_AUX, swapped around entry/exit.
    msr_tsc_aux_guest: AtomicU64,
    /// Guest-visible MSR values, populated by the MSR-emulation layer.
    guest_msrs: Mutex<Vec<u64>>,

    /// Opaque run-queue linkage, owned by the external scheduler.
    sched_token: AtomicUsize,
}

// SAFETY: all shared fields are atomics or spin-locked; the `arch` block is
// exclusively owned by the hosting execution context per the scheduling model
// (at most one context hosts a VCPU at any instant).
unsafe impl Send for Vcpu {}
unsafe impl Sync for Vcpu {}

/// Create a VCPU record bound to `pcpu_id`, owned by `vm`.
///
/// The record starts in [`VcpuState::Init`] with both world contexts zeroed
/// and is published as the ever-run VCPU of `pcpu_id`. Fails when `vm` is at
/// capacity.
pub fn create_vcpu(pcpu_id: u16, vm: &Arc<Vm>) -> AxResult<Arc<Vcpu>> {
    let vcpu = vm.register_vcpu(|vcpu_id| {
        Arc::new(Vcpu {
            pcpu_id,
            vcpu_id,
            vm: Arc::downgrade(vm),
            arch: UnsafeCell::new(VcpuArch::new()),
            entry_addr: AtomicUsize::new(0),
            prev_state: AtomicVcpuState::new(VcpuState::Unknown),
            state: AtomicVcpuState::new(VcpuState::Init),
            dbg_req_state: AtomicVcpuState::new(VcpuState::Unknown),
            sync: PendingSet::new(),
            pending_req: PendingSet::new(),
            pending_pre_work: PendingSet::new(),
            event: PendingEvent::new(),
            launched: AtomicBool::new(false),
            paused_cnt: AtomicU32::new(0),
            running: AtomicBool::new(false),
            io_req: Mutex::new(IoRequest::default()),
            msr_tsc_aux_guest: AtomicU64::new(0),
            guest_msrs: Mutex::new(Vec::new()),
            sched_token: AtomicUsize::new(0),
        })
    })?;
    percpu::set_ever_run_vcpu(pcpu_id, &vcpu);
    debug!(
        "vm {} vcpu {} created on pcpu {}",
        vm.id(),
        vcpu.vcpu_id(),
        pcpu_id
    );
    Ok(vcpu)
}

/// One-time setup preceding a first start: create the record and allocate its
/// VMCS-equivalent through the backend.
///
/// A backend allocation failure is a hard failure of the whole operation:
/// the half-created record is unwound from its VM and retracted from the
/// ever-run table, as if the VCPU had never existed.
pub fn prepare_vcpu(
    vm: &Arc<Vm>,
    pcpu_id: u16,
    ops: &mut dyn WorldSwitchOps,
) -> AxResult<Arc<Vcpu>> {
    let vcpu = create_vcpu(pcpu_id, vm)?;
    match ops.alloc_vmcs(vm.id(), vcpu.vcpu_id()) {
        Ok(vmcs) => {
            vcpu.arch().vmcs = Some(vmcs);
            Ok(vcpu)
        }
        Err(e) => {
            vm.retire(vcpu.vcpu_id())?;
            percpu::retract_ever_run_vcpu(pcpu_id, &vcpu);
            warn!("vcpu {} prepare failed, record unwound", vcpu.vcpu_id());
            Err(e)
        }
    }
}

/// Release a VCPU that has reached [`VcpuState::Zombie`].
///
/// The record is retired from its VM and retracted from the ever-run table;
/// the last `Arc` going away frees it.
pub fn destroy_vcpu(vcpu: &Arc<Vcpu>) -> AxResult {
    if vcpu.state() != VcpuState::Zombie {
        return ax_err!(BadState, "destroying a vcpu that is not a zombie");
    }
    if let Some(vm) = vcpu.vm.upgrade() {
        vm.retire(vcpu.vcpu_id)?;
    }
    percpu::retract_ever_run_vcpu(vcpu.pcpu_id, vcpu);
    debug!("vcpu {} destroyed", vcpu.vcpu_id);
    Ok(())
}

impl Vcpu {
    pub fn pcpu_id(&self) -> u16 {
        self.pcpu_id
    }

    pub fn vcpu_id(&self) -> u16 {
        self.vcpu_id
    }

    /// The owning VM, unless teardown has already dropped it.
    pub fn vm(&self) -> Option<Arc<Vm>> {
        self.vm.upgrade()
    }

    /// The boot processor is always virtual CPU 0.
    pub fn is_bsp(&self) -> bool {
        self.vcpu_id == 0
    }

    /// Access the architectural state block.
    ///
    /// Interior mutability mirrors the hosting-context ownership rule: the
    /// caller must be the execution context currently hosting this VCPU (or
    /// hold it un-dispatched). Not enforced here.
    #[allow(clippy::mut_from_ref)]
    pub fn arch(&self) -> &mut VcpuArch {
        unsafe { &mut *self.arch.get() }
    }

    pub fn state(&self) -> VcpuState {
        self.state.load()
    }

    pub fn prev_state(&self) -> VcpuState {
        self.prev_state.load()
    }

    /// Record a debugger's halt/step request; observed by the hosting context
    /// at its next exit boundary.
    pub fn request_debug_state(&self, state: VcpuState) {
        self.dbg_req_state.store(state);
    }

    pub fn debug_request(&self) -> VcpuState {
        self.dbg_req_state.load()
    }

    /// Guest entry point for the first launch.
    pub fn entry_addr(&self) -> GuestPhysAddr {
        GuestPhysAddr::from(self.entry_addr.load(Ordering::Acquire))
    }

    pub fn set_entry_addr(&self, entry: GuestPhysAddr) {
        self.entry_addr.store(entry.as_usize(), Ordering::Release);
    }

    /// Start a VCPU that has never run: `Init` to `Running`.
    ///
    /// Fails when the context store has not been prepared (no
    /// VMCS-equivalent) or from any state but `Init`; paused VCPUs are
    /// restarted with [`Vcpu::resume`] instead.
    pub fn start(&self, entry: GuestPhysAddr) -> AxResult {
        if self.arch().vmcs.is_none() {
            return ax_err!(BadState, "starting a vcpu without a prepared context");
        }
        match self.state.compare_exchange(VcpuState::Init, VcpuState::Running) {
            Ok(()) => {
                self.set_entry_addr(entry);
                self.prev_state.store(VcpuState::Init);
                debug!("vcpu {} started", self.vcpu_id);
                Ok(())
            }
            Err(actual) => {
                warn!("vcpu {} start rejected in state {:?}", self.vcpu_id, actual);
                ax_err!(BadState, "start is only legal from Init")
            }
        }
    }

    /// Suspend into `new_state` (normally `Paused`; `Zombie` on the teardown
    /// path), recording the current state for a later resume.
    ///
    /// Idempotent: pausing an already-paused VCPU only deepens the pause
    /// counter. When invoked from another context while the VCPU is
    /// dispatched, this only marks intent; execution actually stops at the
    /// next world-exit boundary.
    pub fn pause(&self, new_state: VcpuState) {
        debug_assert!(matches!(new_state, VcpuState::Paused | VcpuState::Zombie));
        // Saturating: an unpausable-depth counter must never wrap back to
        // "not paused".
        let _ = self
            .paused_cnt
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                Some(c.saturating_add(1))
            });

        let current = self.state.load();
        if current == new_state {
            trace!("vcpu {} pause deepened", self.vcpu_id);
            return;
        }
        self.prev_state.store(current);
        self.state.store(new_state);
        if self.running.load(Ordering::Acquire) {
            trace!("vcpu {} pause deferred to next exit", self.vcpu_id);
        }
        debug!("vcpu {} {:?} -> {:?}", self.vcpu_id, current, new_state);
    }

    /// Undo one level of pause; restores `Running` once the pause depth
    /// drains to zero.
    ///
    /// Illegal unless currently `Paused` with a recorded previous state of
    /// `Running`.
    pub fn resume(&self) -> AxResult {
        if self.state.load() != VcpuState::Paused {
            return ax_err!(BadState, "resuming a vcpu that is not paused");
        }
        if self.prev_state.load() != VcpuState::Running {
            return ax_err!(BadState, "previous state was not Running");
        }
        let prior = self
            .paused_cnt
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1));
        match prior {
            Ok(1) => {
                self.state.store(VcpuState::Running);
                self.prev_state.store(VcpuState::Paused);
                debug!("vcpu {} resumed", self.vcpu_id);
                Ok(())
            }
            Ok(_) => Ok(()), // still paused at a shallower depth
            Err(_) => ax_err!(BadState, "resume without a matching pause"),
        }
    }

    /// Force the terminal pending-destruction state. Legal from any state; a
    /// zombie is never scheduled again.
    pub fn shutdown(&self) -> AxResult {
        let current = self.state.load();
        self.prev_state.store(current);
        self.state.store(VcpuState::Zombie);
        debug!("vcpu {} shut down from {:?}", self.vcpu_id, current);
        Ok(())
    }

    /// Re-zero both world contexts and all per-VCPU bookkeeping, returning
    /// the record to `Init`. Illegal while `Running`.
    pub fn reset(&self) -> AxResult {
        if self.state.load() == VcpuState::Running {
            return ax_err!(BadState, "resetting a running vcpu");
        }
        self.arch().reset();
        self.sync.clear_all();
        self.pending_req.clear_all();
        self.pending_pre_work.clear_all();
        self.event.clear();
        self.launched.store(false, Ordering::Release);
        self.paused_cnt.store(0, Ordering::Release);
        self.running.store(false, Ordering::Release);
        self.entry_addr.store(0, Ordering::Release);
        self.msr_tsc_aux_guest.store(0, Ordering::Release);
        self.prev_state.store(VcpuState::Unknown);
        self.state.store(VcpuState::Init);
        debug!("vcpu {} reset", self.vcpu_id);
        Ok(())
    }

    /// Ask the external scheduler to consider this VCPU for dispatch. No
    /// state transition happens here.
    pub fn schedule(self: &Arc<Self>, sched: &mut dyn SchedulerOps) {
        sched.schedule(self);
    }

    // --- pending work -----------------------------------------------------

    /// Request a record-level pre-work item, to run before the next dispatch.
    /// Callable from any context; setting the same bit twice is one request.
    pub fn request_pre_work(&self, id: u16) -> AxResult {
        self.pending_pre_work.request(id)
    }

    /// Record-level pre-work bitmask, drained by the scheduler.
    pub fn pending_pre_work(&self) -> &PendingSet {
        &self.pending_pre_work
    }

    /// Raise arch-level requests re-evaluated by the world-switch path.
    pub fn raise_request(&self, req: VcpuRequest) {
        self.pending_req.raise(req);
    }

    /// Arch-level request bitmask.
    pub fn pending_requests(&self) -> &PendingSet {
        &self.pending_req
    }

    /// Cross-context signaling bitset.
    pub fn sync_events(&self) -> &PendingSet {
        &self.sync
    }

    // --- event injection --------------------------------------------------

    /// Queue an interrupt/exception for the next entry; refused while one is
    /// already pending.
    pub fn queue_event(&self, info: EventInjectionInfo) -> AxResult {
        self.event.queue(info)?;
        self.pending_req.raise(VcpuRequest::EVENT);
        Ok(())
    }

    /// Supersede any queued event. For callers whose architectural priority
    /// rules permit replacement; returns the displaced event.
    pub fn replace_event(&self, info: EventInjectionInfo) -> Option<EventInjectionInfo> {
        let displaced = self.event.replace(info);
        self.pending_req.raise(VcpuRequest::EVENT);
        displaced
    }

    /// Whether an injection is pending delivery.
    pub fn has_pending_event(&self) -> bool {
        self.event.is_pending()
    }

    // --- world-entry gate -------------------------------------------------

    /// Run the pre-entry protocol: drain record-level pre-work, drain
    /// arch-level requests, then hand any pending injection to the backend.
    ///
    /// Returns [`EntryDecision::Abort`] when a drained item demands a
    /// (re-)exit before the guest may run; an undelivered injection then
    /// stays queued for the next attempt. On the `Enter` path, this VCPU is
    /// published as the last one to run on its physical CPU.
    pub fn prepare_entry(self: &Arc<Self>, ops: &mut dyn WorldSwitchOps) -> AxResult<EntryDecision> {
        if self.state.load() != VcpuState::Running {
            // Lifecycle changed since dispatch: cancel the entry.
            return Ok(EntryDecision::Abort);
        }

        // Each bit is cleared before its action runs, so a concurrent
        // re-raise is kept for the next entry.
        for id in 0..NR_PENDING_BITS {
            if self.pending_pre_work.test_and_clear(id)? {
                if ops.do_pre_work(id)? == EntryDecision::Abort {
                    return Ok(EntryDecision::Abort);
                }
            }
        }

        let taken = self.pending_req.take(VcpuRequest::all());
        for req in taken.iter() {
            if ops.apply_request(req, self.arch().context_mut())? == EntryDecision::Abort {
                return Ok(EntryDecision::Abort);
            }
        }

        if let Some(info) = self.event.take() {
            if let Err(e) = ops.program_injection(info) {
                self.event.requeue(info);
                return Err(e);
            }
        }

        percpu::set_ever_run_vcpu(self.pcpu_id, self);
        Ok(EntryDecision::Enter)
    }

    // --- dispatch bookkeeping --------------------------------------------

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Set by the scheduler around dispatch on the affine physical CPU.
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// Whether the first VMLAUNCH-equivalent has happened.
    pub fn has_launched(&self) -> bool {
        self.launched.load(Ordering::Acquire)
    }

    /// Recorded by the entry path after a successful first launch.
    pub fn mark_launched(&self) {
        self.launched.store(true, Ordering::Release);
    }

    pub fn paused_count(&self) -> u32 {
        self.paused_cnt.load(Ordering::Acquire)
    }

    /// Do not advance the guest RIP on the next entry; the exiting
    /// instruction is re-executed.
    pub fn retain_rip(&self) {
        self.arch().exit.inst_len = 0;
    }

    /// Record a startup IPI aimed at this (secondary) VCPU and flag the
    /// event for re-evaluation at the next entry.
    pub fn kick_from_sipi(&self, vector: u32) {
        let arch = self.arch();
        arch.sipi_vector = vector;
        arch.nr_sipi = arch.nr_sipi.saturating_add(1);
        self.pending_req.raise(VcpuRequest::EVENT);
    }

    /// The I/O request slot shared with the emulation collaborator.
    pub fn io_request(&self) -> MutexGuard<'_, IoRequest> {
        self.io_req.lock()
    }

    pub fn guest_tsc_aux(&self) -> u64 {
        self.msr_tsc_aux_guest.load(Ordering::Acquire)
    }

    pub fn set_guest_tsc_aux(&self, value: u64) {
        self.msr_tsc_aux_guest.store(value, Ordering::Release);
    }

    /// Guest-visible MSR array, sized and written by the MSR-emulation layer.
    pub fn guest_msrs(&self) -> MutexGuard<'_, Vec<u64>> {
        self.guest_msrs.lock()
    }

    /// Scheduler-owned opaque linkage value.
    pub fn sched_token(&self) -> usize {
        self.sched_token.load(Ordering::Acquire)
    }

    pub fn set_sched_token(&self, token: usize) {
        self.sched_token.store(token, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_vcpu(pcpu_id: u16) -> (Arc<Vm>, Arc<Vcpu>) {
        let vm = Vm::new(7, 8);
        let vcpu = create_vcpu(pcpu_id, &vm).unwrap();
        (vm, vcpu)
    }

    #[test]
    fn creation_yields_init_state() {
        let (_vm, vcpu) = fresh_vcpu(20);
        assert_eq!(vcpu.state(), VcpuState::Init);
        assert_eq!(vcpu.prev_state(), VcpuState::Unknown);
        assert!(!vcpu.has_launched());
        assert!(!vcpu.is_running());
        assert!(vcpu.is_bsp());
    }

    #[test]
    fn start_requires_a_prepared_context() {
        let (_vm, vcpu) = fresh_vcpu(21);
        // No VMCS-equivalent yet.
        assert!(vcpu.start(GuestPhysAddr::from(0x1000)).is_err());
        assert_eq!(vcpu.state(), VcpuState::Init);

        vcpu.arch().vmcs = Some(crate::VmcsHandle::from_raw(0x55));
        vcpu.start(GuestPhysAddr::from(0x1000)).unwrap();
        assert_eq!(vcpu.state(), VcpuState::Running);
        assert_eq!(vcpu.entry_addr(), GuestPhysAddr::from(0x1000));

        // Running is not a legal start source.
        assert!(vcpu.start(GuestPhysAddr::from(0x2000)).is_err());
    }

    #[test]
    fn pause_resume_round_trip() {
        let (_vm, vcpu) = fresh_vcpu(22);
        vcpu.arch().vmcs = Some(crate::VmcsHandle::from_raw(0x55));
        vcpu.start(GuestPhysAddr::from(0)).unwrap();

        vcpu.pause(VcpuState::Paused);
        assert_eq!(vcpu.state(), VcpuState::Paused);
        assert_eq!(vcpu.prev_state(), VcpuState::Running);
        assert_eq!(vcpu.paused_count(), 1);

        vcpu.resume().unwrap();
        assert_eq!(vcpu.state(), VcpuState::Running);
        assert_eq!(vcpu.paused_count(), 0);
    }

    #[test]
    fn nested_pause_needs_matching_resumes() {
        let (_vm, vcpu) = fresh_vcpu(23);
        vcpu.arch().vmcs = Some(crate::VmcsHandle::from_raw(0x55));
        vcpu.start(GuestPhysAddr::from(0)).unwrap();

        vcpu.pause(VcpuState::Paused);
        vcpu.pause(VcpuState::Paused); // idempotent: deepens only
        assert_eq!(vcpu.paused_count(), 2);
        assert_eq!(vcpu.prev_state(), VcpuState::Running);

        vcpu.resume().unwrap();
        assert_eq!(vcpu.state(), VcpuState::Paused);
        vcpu.resume().unwrap();
        assert_eq!(vcpu.state(), VcpuState::Running);
        assert!(vcpu.resume().is_err()); // not paused anymore
    }

    #[test]
    fn resume_rejects_non_running_history() {
        let (_vm, vcpu) = fresh_vcpu(24);
        // Paused out of Init, not Running.
        vcpu.pause(VcpuState::Paused);
        assert_eq!(vcpu.prev_state(), VcpuState::Init);
        assert!(vcpu.resume().is_err());
    }

    #[test]
    fn shutdown_is_terminal_from_any_state() {
        let (_vm, vcpu) = fresh_vcpu(25);
        vcpu.shutdown().unwrap();
        assert_eq!(vcpu.state(), VcpuState::Zombie);
        // No lifecycle op brings a zombie back except destroy.
        assert!(vcpu.start(GuestPhysAddr::from(0)).is_err());
        assert!(vcpu.resume().is_err());
    }

    #[test]
    fn reset_is_illegal_while_running() {
        let (_vm, vcpu) = fresh_vcpu(26);
        vcpu.arch().vmcs = Some(crate::VmcsHandle::from_raw(0x55));
        vcpu.start(GuestPhysAddr::from(0x3000)).unwrap();
        assert!(vcpu.reset().is_err());

        vcpu.pause(VcpuState::Paused);
        vcpu.arch().context_mut().regs.rax = 0xabcd;
        vcpu.queue_event(EventInjectionInfo {
            intr_info: 1,
            error_code: 0,
        })
        .unwrap();
        vcpu.reset().unwrap();

        assert_eq!(vcpu.state(), VcpuState::Init);
        assert_eq!(vcpu.arch().context().regs.rax, 0);
        assert!(!vcpu.has_pending_event());
        assert_eq!(vcpu.paused_count(), 0);
        // The prepared context survives a reset.
        assert!(vcpu.arch().vmcs.is_some());
    }

    #[test]
    fn destroy_requires_zombie() {
        let (vm, vcpu) = fresh_vcpu(27);
        assert!(destroy_vcpu(&vcpu).is_err());
        vcpu.shutdown().unwrap();
        destroy_vcpu(&vcpu).unwrap();
        assert_eq!(vm.vcpu_count(), 0);
    }

    #[test]
    fn double_injection_is_refused() {
        let (_vm, vcpu) = fresh_vcpu(28);
        let ev = EventInjectionInfo {
            intr_info: 0x30,
            error_code: 0,
        };
        vcpu.queue_event(ev).unwrap();
        assert!(vcpu.queue_event(ev).is_err());
        assert!(vcpu.replace_event(ev).is_some());
    }

    #[test]
    fn debug_request_is_independent() {
        let (_vm, vcpu) = fresh_vcpu(29);
        vcpu.request_debug_state(VcpuState::Paused);
        assert_eq!(vcpu.debug_request(), VcpuState::Paused);
        assert_eq!(vcpu.state(), VcpuState::Init);
    }

    #[test]
    fn retain_rip_zeroes_instruction_length() {
        let (_vm, vcpu) = fresh_vcpu(30);
        vcpu.arch().exit.inst_len = 3;
        vcpu.retain_rip();
        assert_eq!(vcpu.arch().exit.inst_len, 0);
    }
}
