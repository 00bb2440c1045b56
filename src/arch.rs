use axerrno::AxResult;
use log::trace;

use crate::context::{RunContext, World, NR_WORLDS};
use crate::exit::{CpuMode, ExitInfo};
use crate::hal::{VlapicHandle, VmcsHandle, WorldSwitchOps};

/// A queued exception awaiting delivery, recorded by exit handling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExceptionInfo {
    /// Vector of the exception to raise.
    pub vector: u32,
    /// Error code, when the vector delivers one.
    pub error_code: u32,
}

/// The architectural state block of a VCPU.
///
/// This is the pCPU-exclusive part of the record: it is only ever mutated by
/// the execution context currently hosting the VCPU on its affine physical
/// CPU. Cross-context state (lifecycle, bitmasks, the injection record) lives
/// on [`crate::Vcpu`] itself as atomics.
#[derive(Debug)]
pub struct VcpuArch {
    /// Index of the active world. Never changes mid-transition; see
    /// [`VcpuArch::switch_world`].
    cur_world: World,
    /// Both worlds' register snapshots, stored inline.
    contexts: [RunContext; NR_WORLDS],

    /// VMCS-equivalent of this VCPU, owned by the virtualization backend.
    pub vmcs: Option<VmcsHandle>,
    /// Per-VCPU virtual interrupt controller, owned by the vLAPIC layer.
    pub vlapic: Option<VlapicHandle>,
    /// Hardware TLB tag for this VCPU.
    pub vpid: u16,

    /// Exception recorded by exit handling, delivered before the next entry.
    pub exception: Option<ExceptionInfo>,

    /// The virtual LAPIC is masked from delivering interrupts.
    pub lapic_masked: bool,
    /// Interrupt-window exiting is armed in the VMCS-equivalent.
    pub irq_window_enabled: bool,
    /// Total VM exits taken by this VCPU.
    pub nr_exits: u32,

    /// Shadow of the IA32_TSC_AUX MSR.
    pub msr_tsc_aux: u64,

    /// Write-back of the most recent exit.
    pub exit: ExitInfo,
    pub cpu_mode: CpuMode,

    /// Startup-IPIs still expected during secondary-CPU bring-up.
    pub nr_sipi: u8,
    /// Target vector of the latest startup IPI.
    pub sipi_vector: u32,
}

impl Default for VcpuArch {
    fn default() -> Self {
        Self::new()
    }
}

impl VcpuArch {
    pub fn new() -> Self {
        Self {
            cur_world: World::Normal,
            contexts: [RunContext::zeroed(), RunContext::zeroed()],
            vmcs: None,
            vlapic: None,
            vpid: 0,
            exception: None,
            lapic_masked: false,
            irq_window_enabled: false,
            nr_exits: 0,
            msr_tsc_aux: 0,
            exit: ExitInfo::default(),
            cpu_mode: CpuMode::Real,
            nr_sipi: 0,
            sipi_vector: 0,
        }
    }

    /// The world whose context is currently live.
    pub fn current_world(&self) -> World {
        self.cur_world
    }

    /// The active world's register snapshot.
    pub fn context(&self) -> &RunContext {
        &self.contexts[self.cur_world.index()]
    }

    /// Mutable view of the active world's register snapshot.
    pub fn context_mut(&mut self) -> &mut RunContext {
        &mut self.contexts[self.cur_world.index()]
    }

    /// A specific world's snapshot, active or not.
    pub fn context_of(&self, world: World) -> &RunContext {
        &self.contexts[world.index()]
    }

    /// Mutable view of a specific world's snapshot.
    pub fn context_of_mut(&mut self, world: World) -> &mut RunContext {
        &mut self.contexts[world.index()]
    }

    /// Switch the active world to `target`.
    ///
    /// Two-phase: the outgoing world is first saved into its own slot by the
    /// collaborator exit path; only once that save has completed is the
    /// active index updated, and only then is the incoming slot loaded. A
    /// failed save leaves the index untouched, so the two slots can never be
    /// aliased or swapped mid-transition.
    pub fn switch_world(&mut self, target: World, ops: &mut dyn WorldSwitchOps) -> AxResult {
        if target == self.cur_world {
            return Ok(());
        }
        let outgoing = self.cur_world;
        ops.save_world(&mut self.contexts[outgoing.index()])?;
        self.cur_world = target;
        ops.load_world(&self.contexts[target.index()])?;
        trace!("world switch {:?} -> {:?}", outgoing, target);
        Ok(())
    }

    /// Re-zero both worlds and all architectural sub-state, keeping the
    /// collaborator handles.
    pub fn reset(&mut self) {
        self.cur_world = World::Normal;
        self.contexts = [RunContext::zeroed(), RunContext::zeroed()];
        self.exception = None;
        self.lapic_masked = false;
        self.irq_window_enabled = false;
        self.nr_exits = 0;
        self.msr_tsc_aux = 0;
        self.exit = ExitInfo::default();
        self.cpu_mode = CpuMode::Real;
        self.nr_sipi = 0;
        self.sipi_vector = 0;
    }
}
