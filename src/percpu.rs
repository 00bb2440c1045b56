use alloc::sync::Arc;

use log::warn;
use spin::Mutex;

use crate::vcpu::Vcpu;

/// Maximum number of physical CPUs tracked by the ever-run table.
pub const MAX_PCPUS: usize = 64;

/// Last VCPU to (be about to) run on each physical CPU.
///
/// Written by the world-entry path immediately before an entry and by VCPU
/// creation; read by the scheduler for diagnostics and affinity decisions.
/// The critical section is a single slot assignment and is never held across
/// a world switch.
static EVER_RUN_VCPU: Mutex<[Option<Arc<Vcpu>>; MAX_PCPUS]> =
    Mutex::new([const { None }; MAX_PCPUS]);

/// The last VCPU that ran (or was created to run) on `pcpu_id`, if any.
pub fn get_ever_run_vcpu(pcpu_id: u16) -> Option<Arc<Vcpu>> {
    EVER_RUN_VCPU
        .lock()
        .get(pcpu_id as usize)
        .and_then(|slot| slot.clone())
}

pub(crate) fn set_ever_run_vcpu(pcpu_id: u16, vcpu: &Arc<Vcpu>) {
    match EVER_RUN_VCPU.lock().get_mut(pcpu_id as usize) {
        Some(slot) => *slot = Some(vcpu.clone()),
        None => warn!("pcpu id {} beyond ever-run table", pcpu_id),
    }
}

/// Drop the table's reference, but only while it still points at `vcpu`;
/// another record may have run on the pCPU since.
pub(crate) fn retract_ever_run_vcpu(pcpu_id: u16, vcpu: &Arc<Vcpu>) {
    if let Some(slot) = EVER_RUN_VCPU.lock().get_mut(pcpu_id as usize) {
        if slot.as_ref().is_some_and(|cur| Arc::ptr_eq(cur, vcpu)) {
            *slot = None;
        }
    }
}
