// Copyright 2026 the hvcpu developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! hvcpu - the virtual-CPU execution-context and lifecycle core of a
//! bare-metal hypervisor.
//!
//! This crate owns, for every virtual CPU of every guest, the complete
//! hardware state needed to enter and exit virtualized execution, and the
//! bookkeeping to flip a VCPU between its normal-world and secure-world
//! contexts. The entry/exit sequences themselves, second-level translation,
//! I/O emulation, the virtual interrupt controller and the run-queue policy
//! all live behind the [`WorldSwitchOps`] and [`SchedulerOps`] seams.
//!
//! # Features
//!
//! - Dual-world register/MSR/FPU context store with a pinned, published
//!   offset table for the raw-offset world-switch path
//! - Atomic VCPU lifecycle state machine (Init → Running → Paused → Zombie)
//! - Single-slot event-injection record with refuse-or-replace queueing
//! - Lock-free pending-work bitmasks with exactly-once draining per entry
//! - Process-wide ever-run-VCPU-per-pCPU lookup

#![cfg_attr(not(test), no_std)]

extern crate alloc;

// Core modules
mod arch; // Architectural state block and world-switch manager
mod context; // Dual-world register snapshot and its layout contract
mod event; // Pending event-injection record
mod exit; // VM-exit write-back and the I/O request slot
mod hal; // Collaborator seams (world switch backend, scheduler)
mod pending; // Deferred-work bitmasks
mod percpu; // Ever-run VCPU tracking per physical CPU
mod test; // Cross-module scenario tests
mod vcpu; // VCPU record, lifecycle state machine and operations
mod vm; // Minimal owning VM aggregate

memory_addr::def_usize_addr! {
    /// A guest-physical address, e.g. a VCPU entry point.
    pub type GuestPhysAddr;
}

memory_addr::def_usize_addr_formatter! {
    GuestPhysAddr = "GPA:{}";
}

// Public API exports
pub use arch::{ExceptionInfo, VcpuArch};
pub use context::{
    offsets, FxStateArea, GpRegs, RunContext, SegmentSel, World, FX_STATE_AREA_SIZE, NR_WORLDS,
    NUM_GPRS,
};
pub use event::{EventInjectionInfo, PendingEvent};
pub use exit::{CpuMode, ExitInfo, IoDirection, IoRequest, VCPU_MMIO_COMPLETE};
pub use hal::{EntryDecision, SchedulerOps, VlapicHandle, VmcsHandle, WorldSwitchOps};
pub use pending::{PendingSet, VcpuRequest, NR_PENDING_BITS};
pub use percpu::{get_ever_run_vcpu, MAX_PCPUS};
pub use vcpu::{create_vcpu, destroy_vcpu, prepare_vcpu, AtomicVcpuState, Vcpu, VcpuState};
pub use vm::Vm;
