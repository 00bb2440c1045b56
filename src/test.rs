#[cfg(test)]
mod tests {
    use crate::{
        create_vcpu, destroy_vcpu, get_ever_run_vcpu, prepare_vcpu, EntryDecision,
        EventInjectionInfo, GuestPhysAddr, RunContext, SchedulerOps, Vcpu, VcpuRequest, VcpuState,
        Vm, VmcsHandle, WorldSwitchOps,
    };
    use alloc::rc::Rc;
    use alloc::string::{String, ToString};
    use alloc::sync::Arc;
    use alloc::vec::Vec;
    use axerrno::AxResult;
    use core::cell::RefCell;

    // Mock world-switch backend recording every hook invocation.
    struct MockBackend {
        call_log: Rc<RefCell<Vec<String>>>,
        // Pre-work ids that demand an aborted entry.
        abort_on: Vec<u16>,
        fail_injection: bool,
        fail_alloc: bool,
    }

    impl MockBackend {
        fn new() -> (Self, Rc<RefCell<Vec<String>>>) {
            let log = Rc::new(RefCell::new(Vec::new()));
            (
                Self {
                    call_log: log.clone(),
                    abort_on: Vec::new(),
                    fail_injection: false,
                    fail_alloc: false,
                },
                log,
            )
        }
    }

    impl WorldSwitchOps for MockBackend {
        fn alloc_vmcs(&mut self, vm_id: u16, vcpu_id: u16) -> AxResult<VmcsHandle> {
            if self.fail_alloc {
                return axerrno::ax_err!(NoMemory);
            }
            self.call_log
                .borrow_mut()
                .push(format!("alloc_vmcs({vm_id},{vcpu_id})"));
            Ok(VmcsHandle::from_raw(0xc0de))
        }

        fn save_world(&mut self, _ctx: &mut RunContext) -> AxResult {
            self.call_log.borrow_mut().push("save_world".to_string());
            Ok(())
        }

        fn load_world(&mut self, _ctx: &RunContext) -> AxResult {
            self.call_log.borrow_mut().push("load_world".to_string());
            Ok(())
        }

        fn program_injection(&mut self, info: EventInjectionInfo) -> AxResult {
            if self.fail_injection {
                return axerrno::ax_err!(BadState);
            }
            self.call_log
                .borrow_mut()
                .push(format!("inject({:#x})", info.intr_info));
            Ok(())
        }

        fn do_pre_work(&mut self, id: u16) -> AxResult<EntryDecision> {
            self.call_log.borrow_mut().push(format!("pre_work({id})"));
            if self.abort_on.contains(&id) {
                Ok(EntryDecision::Abort)
            } else {
                Ok(EntryDecision::Enter)
            }
        }

        fn apply_request(
            &mut self,
            req: VcpuRequest,
            _ctx: &mut RunContext,
        ) -> AxResult<EntryDecision> {
            self.call_log
                .borrow_mut()
                .push(format!("request({:?})", req));
            Ok(EntryDecision::Enter)
        }
    }

    #[derive(Default)]
    struct MockScheduler {
        dispatched: Vec<u16>,
    }

    impl SchedulerOps for MockScheduler {
        fn schedule(&mut self, vcpu: &Arc<Vcpu>) {
            self.dispatched.push(vcpu.vcpu_id());
        }
    }

    fn started_vcpu(vm_id: u16, pcpu_id: u16) -> (Arc<Vm>, Arc<Vcpu>, MockBackend) {
        let vm = Vm::new(vm_id, 4);
        let (mut ops, _) = MockBackend::new();
        let vcpu = prepare_vcpu(&vm, pcpu_id, &mut ops).unwrap();
        vcpu.start(GuestPhysAddr::from(0x10_0000)).unwrap();
        (vm, vcpu, ops)
    }

    #[test]
    fn full_lifecycle_scenario() {
        // create on pCPU 0 -> Init -> Running -> Paused -> Running -> Zombie
        // -> destroyed and no longer retrievable.
        let vm = Vm::new(1, 4);
        let (mut ops, log) = MockBackend::new();
        let vcpu = prepare_vcpu(&vm, 0, &mut ops).unwrap();
        assert_eq!(vcpu.state(), VcpuState::Init);
        assert!(log.borrow().iter().any(|c| c.starts_with("alloc_vmcs")));

        vcpu.start(GuestPhysAddr::from(0x7c00)).unwrap();
        assert_eq!(vcpu.state(), VcpuState::Running);

        vcpu.pause(VcpuState::Paused);
        assert_eq!(vcpu.state(), VcpuState::Paused);
        assert_eq!(vcpu.prev_state(), VcpuState::Running);

        vcpu.resume().unwrap();
        assert_eq!(vcpu.state(), VcpuState::Running);

        vcpu.pause(VcpuState::Paused);
        vcpu.shutdown().unwrap();
        assert_eq!(vcpu.state(), VcpuState::Zombie);

        destroy_vcpu(&vcpu).unwrap();
        assert!(get_ever_run_vcpu(0).is_none());
        assert_eq!(vm.vcpu_count(), 0);
    }

    #[test]
    fn failed_prepare_leaves_no_trace() {
        // A backend that cannot allocate the VMCS-equivalent must fail the
        // whole prepare: no record in the VM, nothing in the ever-run table.
        let vm = Vm::new(9, 4);
        let (mut ops, _) = MockBackend::new();
        ops.fail_alloc = true;

        assert!(prepare_vcpu(&vm, 57, &mut ops).is_err());
        assert_eq!(vm.vcpu_count(), 0);
        assert!(get_ever_run_vcpu(57).is_none());

        // The slot is free again once the backend recovers.
        ops.fail_alloc = false;
        let vcpu = prepare_vcpu(&vm, 57, &mut ops).unwrap();
        assert_eq!(vm.vcpu_count(), 1);
        assert!(Arc::ptr_eq(&get_ever_run_vcpu(57).unwrap(), &vcpu));
    }

    #[test]
    fn pre_work_bits_scenario() {
        let vm = Vm::new(2, 4);
        let vcpu = create_vcpu(50, &vm).unwrap();

        vcpu.request_pre_work(3).unwrap();
        vcpu.request_pre_work(5).unwrap();
        assert_eq!(vcpu.pending_pre_work().snapshot(), (1 << 3) | (1 << 5));

        assert!(vcpu.pending_pre_work().test_and_clear(3).unwrap());
        assert_eq!(vcpu.pending_pre_work().snapshot(), 1 << 5);
        assert!(!vcpu.pending_pre_work().test_and_clear(3).unwrap());
    }

    #[test]
    fn entry_gate_drains_and_injects() {
        let (_vm, vcpu, mut ops) = started_vcpu(3, 51);

        vcpu.request_pre_work(2).unwrap();
        vcpu.raise_request(VcpuRequest::EPT_FLUSH);
        vcpu.queue_event(EventInjectionInfo {
            intr_info: 0x8000_0030,
            error_code: 0,
        })
        .unwrap();

        assert_eq!(vcpu.prepare_entry(&mut ops).unwrap(), EntryDecision::Enter);
        let log = ops.call_log.borrow().clone();
        assert!(log.contains(&"pre_work(2)".to_string()));
        assert!(log.iter().any(|c| c.contains("EPT_FLUSH")));
        assert!(log.contains(&"inject(0x80000030)".to_string()));
        drop(log);

        // Everything was delivered exactly once.
        assert!(!vcpu.has_pending_event());
        assert!(!vcpu.pending_pre_work().any());

        // The entry published this VCPU as last-run on its pCPU.
        let last = get_ever_run_vcpu(51).unwrap();
        assert!(Arc::ptr_eq(&last, &vcpu));
    }

    #[test]
    fn aborted_entry_preserves_the_injection() {
        let (_vm, vcpu, mut ops) = started_vcpu(4, 52);
        ops.abort_on.push(1);

        vcpu.request_pre_work(1).unwrap();
        vcpu.queue_event(EventInjectionInfo {
            intr_info: 0x8000_0031,
            error_code: 0,
        })
        .unwrap();

        assert_eq!(vcpu.prepare_entry(&mut ops).unwrap(), EntryDecision::Abort);
        // The injection survives for the next attempt.
        assert!(vcpu.has_pending_event());

        // Next attempt goes through and delivers it.
        ops.abort_on.clear();
        assert_eq!(vcpu.prepare_entry(&mut ops).unwrap(), EntryDecision::Enter);
        assert!(!vcpu.has_pending_event());
    }

    #[test]
    fn failed_injection_requeues_the_event() {
        let (_vm, vcpu, mut ops) = started_vcpu(5, 53);
        ops.fail_injection = true;

        vcpu.queue_event(EventInjectionInfo {
            intr_info: 0x8000_0032,
            error_code: 0,
        })
        .unwrap();
        assert!(vcpu.prepare_entry(&mut ops).is_err());
        assert!(vcpu.has_pending_event());
    }

    #[test]
    fn lifecycle_change_cancels_the_next_entry() {
        let (_vm, vcpu, mut ops) = started_vcpu(6, 54);
        // Asynchronous pause marks intent; the entry decision point honors it.
        vcpu.pause(VcpuState::Paused);
        assert_eq!(vcpu.prepare_entry(&mut ops).unwrap(), EntryDecision::Abort);
    }

    #[test]
    fn scheduling_performs_no_transition() {
        let (_vm, vcpu, _ops) = started_vcpu(7, 55);
        let mut sched = MockScheduler::default();
        vcpu.schedule(&mut sched);
        assert_eq!(sched.dispatched, [vcpu.vcpu_id()]);
        assert_eq!(vcpu.state(), VcpuState::Running);
    }

    #[test]
    fn world_switch_through_the_backend() {
        use crate::World;
        let (_vm, vcpu, mut ops) = started_vcpu(8, 56);

        vcpu.arch().context_mut().regs.rax = 0x1234;
        vcpu.arch()
            .switch_world(World::Secure, &mut ops)
            .unwrap();
        assert_eq!(vcpu.arch().current_world(), World::Secure);
        // The secure world starts from its own zeroed snapshot.
        assert_eq!(vcpu.arch().context().regs.rax, 0);
        // The normal world's state is parked in its slot.
        assert_eq!(vcpu.arch().context_of(World::Normal).regs.rax, 0x1234);

        let log = ops.call_log.borrow();
        let save = log.iter().position(|c| c == "save_world").unwrap();
        let load = log.iter().position(|c| c == "load_world").unwrap();
        assert!(save < load);
    }
}
