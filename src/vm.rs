use alloc::sync::Arc;
use alloc::vec::Vec;

use axerrno::{ax_err, AxResult};
use spin::Mutex;

use crate::vcpu::Vcpu;

struct VmInner {
    next_vcpu_id: u16,
    vcpus: Vec<Arc<Vcpu>>,
}

/// The owning aggregate of a guest's VCPUs.
///
/// Multi-VCPU orchestration is out of scope here; this type exists so that
/// VCPU creation has a real capacity check and the records have a real,
/// non-owning back-reference.
pub struct Vm {
    id: u16,
    max_vcpus: u16,
    inner: Mutex<VmInner>,
}

impl Vm {
    pub fn new(id: u16, max_vcpus: u16) -> Arc<Self> {
        Arc::new(Self {
            id,
            max_vcpus,
            inner: Mutex::new(VmInner {
                next_vcpu_id: 0,
                vcpus: Vec::new(),
            }),
        })
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    /// Claim a virtual CPU id and take ownership of the record built for it.
    ///
    /// Capacity check, id claim and attach happen under one lock
    /// acquisition, so concurrent creations cannot both squeeze into the
    /// last free slot.
    pub(crate) fn register_vcpu(
        &self,
        build: impl FnOnce(u16) -> Arc<Vcpu>,
    ) -> AxResult<Arc<Vcpu>> {
        let mut inner = self.inner.lock();
        if inner.vcpus.len() >= self.max_vcpus as usize {
            return ax_err!(ResourceBusy, "vm cannot accept another vcpu");
        }
        let id = inner.next_vcpu_id;
        inner.next_vcpu_id += 1;
        let vcpu = build(id);
        inner.vcpus.push(vcpu.clone());
        Ok(vcpu)
    }

    /// Release ownership of a retired record.
    pub(crate) fn retire(&self, vcpu_id: u16) -> AxResult {
        let mut inner = self.inner.lock();
        match inner.vcpus.iter().position(|v| v.vcpu_id() == vcpu_id) {
            Some(idx) => {
                inner.vcpus.swap_remove(idx);
                Ok(())
            }
            None => ax_err!(NotFound, "vcpu not owned by this vm"),
        }
    }

    pub fn vcpu_count(&self) -> usize {
        self.inner.lock().vcpus.len()
    }

    /// Look up an owned VCPU by id.
    pub fn vcpu(&self, vcpu_id: u16) -> Option<Arc<Vcpu>> {
        self.inner
            .lock()
            .vcpus
            .iter()
            .find(|v| v.vcpu_id() == vcpu_id)
            .cloned()
    }
}
