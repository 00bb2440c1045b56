use core::mem::offset_of;

use zerocopy::{transmute_mut, transmute_ref, FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

/// Number of general-purpose registers saved/restored per world.
pub const NUM_GPRS: usize = 16;

/// Size in bytes of the FXSAVE/FXRSTOR legacy state area.
pub const FX_STATE_AREA_SIZE: usize = 512;

/// Number of execution worlds a VCPU can be in.
pub const NR_WORLDS: usize = 2;

/// One of the two mutually exclusive execution contexts of a VCPU.
///
/// Each world owns a full [`RunContext`]; the active one is selected by the
/// world-switch manager in [`crate::VcpuArch`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(usize)]
pub enum World {
    /// The non-secure execution context. VCPUs start here.
    #[default]
    Normal = 0,
    /// The trusted execution context.
    Secure = 1,
}

impl World {
    /// Index of this world's [`RunContext`] slot.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The other world.
    pub const fn other(self) -> World {
        match self {
            World::Normal => World::Secure,
            World::Secure => World::Normal,
        }
    }
}

/// Guest general-purpose registers, in VM-exit register-index order.
///
/// The field order matches the register encoding used by exit qualifications
/// (e.g. CR-access exits), so index-based access via [`GpRegs::get`] and
/// [`GpRegs::set`] can take the index straight from exit decoding.
#[derive(Clone, Copy, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct GpRegs {
    pub rax: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rbx: u64,
    pub rsp: u64,
    pub rbp: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
}

impl GpRegs {
    /// View the named registers as a flat array for bulk save/restore.
    ///
    /// This is a checked reinterpretation, not type punning: the layouts are
    /// verified at compile time.
    pub fn as_array(&self) -> &[u64; NUM_GPRS] {
        transmute_ref!(self)
    }

    /// Mutable flat-array view, see [`GpRegs::as_array`].
    pub fn as_array_mut(&mut self) -> &mut [u64; NUM_GPRS] {
        transmute_mut!(self)
    }

    /// Read a register by its VM-exit index. Returns `None` when out of range.
    pub fn get(&self, idx: usize) -> Option<u64> {
        self.as_array().get(idx).copied()
    }

    /// Write a register by its VM-exit index. Out-of-range writes are ignored.
    pub fn set(&mut self, idx: usize, val: u64) {
        if let Some(slot) = self.as_array_mut().get_mut(idx) {
            *slot = val;
        }
    }
}

/// A cached segment register: selector, base, limit and access rights.
///
/// Padded to a 32-byte cell so the ten instances inside [`RunContext`] land
/// on the offsets the world-switch path expects.
#[derive(Clone, Copy, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct SegmentSel {
    pub selector: u16,
    _pad: [u16; 3],
    pub base: u64,
    pub limit: u32,
    pub attr: u32,
    _rsvd: u64,
}

impl SegmentSel {
    pub const fn new(selector: u16, base: u64, limit: u32, attr: u32) -> Self {
        Self {
            selector,
            _pad: [0; 3],
            base,
            limit,
            attr,
            _rsvd: 0,
        }
    }
}

/// The 512-byte FPU/MMX/SSE guest save area, 16-byte aligned as required by
/// FXSAVE/FXRSTOR.
#[derive(Clone, Copy, Debug, FromBytes, Immutable, KnownLayout)]
#[repr(C, align(16))]
pub struct FxStateArea(pub [u64; FX_STATE_AREA_SIZE / 8]);

impl Default for FxStateArea {
    fn default() -> Self {
        Self([0; FX_STATE_AREA_SIZE / 8])
    }
}

/// The complete hardware register snapshot of one world.
///
/// Exactly two instances exist per VCPU, stored inline in
/// [`crate::VcpuArch`]; the world-switch path saves the outgoing world into
/// its slot and restores the incoming world from the other.
///
/// # Layout contract
///
/// The world-switch trampoline reads and writes part of this structure by raw
/// byte offset, not by field name. Every such field has a published
/// `CTX_OFFSET_*` constant below, and the struct layout is pinned to those
/// constants by compile-time assertions: moving a field breaks the build, not
/// the guest. Fields without a published constant (PAT, EFER, DEBUGCTL, the
/// SYSENTER triad, the VMX shadows) are only ever accessed by name and merely
/// fill the gaps of the fixed table.
#[derive(Clone, Copy, Debug, FromBytes, Immutable, KnownLayout)]
#[repr(C, align(16))]
pub struct RunContext {
    pub regs: GpRegs,

    pub cr0: u64,
    pub cr2: u64,
    pub cr3: u64,
    pub cr4: u64,

    pub rip: u64,
    pub rflags: u64,

    pub dr7: u64,
    /// Per-world TSC offset programmed into the VMCS on entry.
    pub tsc_offset: u64,

    pub ia32_spec_ctrl: u64,
    pub ia32_star: u64,
    pub ia32_lstar: u64,
    pub ia32_fmask: u64,
    pub ia32_kernel_gs_base: u64,

    pub ia32_pat: u64,
    /// Shadow of IA32_PAT as seen through the VMCS guest field.
    pub vmx_ia32_pat: u64,
    pub ia32_efer: u64,
    pub ia32_debugctl: u64,

    /// CR0 read shadow.
    pub vmx_cr0: u64,
    /// CR4 read shadow.
    pub vmx_cr4: u64,

    pub cs: SegmentSel,
    pub ss: SegmentSel,
    pub ds: SegmentSel,
    pub es: SegmentSel,
    pub fs: SegmentSel,
    pub gs: SegmentSel,
    pub tr: SegmentSel,
    pub idtr: SegmentSel,
    pub ldtr: SegmentSel,
    pub gdtr: SegmentSel,

    pub ia32_sysenter_cs: u32,
    _reserved: u32,

    pub fx_state: FxStateArea,

    pub ia32_sysenter_esp: u64,
    pub ia32_sysenter_eip: u64,
}

impl RunContext {
    /// A fully zeroed context, the state both worlds get at VCPU creation and
    /// on [`crate::Vcpu::reset`].
    pub fn zeroed() -> Self {
        Self::new_zeroed()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Published byte offsets of the fields the world-switch path accesses by raw
/// offset. This table is external ABI: the assembly-level entry/exit code
/// references these numbers, so they must never drift from the structure.
pub mod offsets {
    pub const CTX_OFFSET_RAX: usize = 0;
    pub const CTX_OFFSET_RCX: usize = 8;
    pub const CTX_OFFSET_RDX: usize = 16;
    pub const CTX_OFFSET_RBX: usize = 24;
    pub const CTX_OFFSET_RSP: usize = 32;
    pub const CTX_OFFSET_RBP: usize = 40;
    pub const CTX_OFFSET_RSI: usize = 48;
    pub const CTX_OFFSET_RDI: usize = 56;
    pub const CTX_OFFSET_R8: usize = 64;
    pub const CTX_OFFSET_R9: usize = 72;
    pub const CTX_OFFSET_R10: usize = 80;
    pub const CTX_OFFSET_R11: usize = 88;
    pub const CTX_OFFSET_R12: usize = 96;
    pub const CTX_OFFSET_R13: usize = 104;
    pub const CTX_OFFSET_R14: usize = 112;
    pub const CTX_OFFSET_R15: usize = 120;
    pub const CTX_OFFSET_CR0: usize = 128;
    pub const CTX_OFFSET_CR2: usize = 136;
    pub const CTX_OFFSET_CR3: usize = 144;
    pub const CTX_OFFSET_CR4: usize = 152;
    pub const CTX_OFFSET_RIP: usize = 160;
    pub const CTX_OFFSET_RFLAGS: usize = 168;
    pub const CTX_OFFSET_DR7: usize = 176;
    pub const CTX_OFFSET_TSC_OFFSET: usize = 184;
    pub const CTX_OFFSET_IA32_SPEC_CTRL: usize = 192;
    pub const CTX_OFFSET_IA32_STAR: usize = 200;
    pub const CTX_OFFSET_IA32_LSTAR: usize = 208;
    pub const CTX_OFFSET_IA32_FMASK: usize = 216;
    pub const CTX_OFFSET_IA32_KERNEL_GS_BASE: usize = 224;
    pub const CTX_OFFSET_CS: usize = 280;
    pub const CTX_OFFSET_SS: usize = 312;
    pub const CTX_OFFSET_DS: usize = 344;
    pub const CTX_OFFSET_ES: usize = 376;
    pub const CTX_OFFSET_FS: usize = 408;
    pub const CTX_OFFSET_GS: usize = 440;
    pub const CTX_OFFSET_TR: usize = 472;
    pub const CTX_OFFSET_IDTR: usize = 504;
    pub const CTX_OFFSET_LDTR: usize = 536;
    pub const CTX_OFFSET_GDTR: usize = 568;
    pub const CTX_OFFSET_FX_STATE: usize = 608;
}

// Pin the structure to the published table. A layout drift is a build error,
// never silent register corruption at run time.
const _: () = {
    use offsets::*;

    const GPRS: usize = offset_of!(RunContext, regs);
    assert!(GPRS + offset_of!(GpRegs, rax) == CTX_OFFSET_RAX);
    assert!(GPRS + offset_of!(GpRegs, rcx) == CTX_OFFSET_RCX);
    assert!(GPRS + offset_of!(GpRegs, rdx) == CTX_OFFSET_RDX);
    assert!(GPRS + offset_of!(GpRegs, rbx) == CTX_OFFSET_RBX);
    assert!(GPRS + offset_of!(GpRegs, rsp) == CTX_OFFSET_RSP);
    assert!(GPRS + offset_of!(GpRegs, rbp) == CTX_OFFSET_RBP);
    assert!(GPRS + offset_of!(GpRegs, rsi) == CTX_OFFSET_RSI);
    assert!(GPRS + offset_of!(GpRegs, rdi) == CTX_OFFSET_RDI);
    assert!(GPRS + offset_of!(GpRegs, r8) == CTX_OFFSET_R8);
    assert!(GPRS + offset_of!(GpRegs, r9) == CTX_OFFSET_R9);
    assert!(GPRS + offset_of!(GpRegs, r10) == CTX_OFFSET_R10);
    assert!(GPRS + offset_of!(GpRegs, r11) == CTX_OFFSET_R11);
    assert!(GPRS + offset_of!(GpRegs, r12) == CTX_OFFSET_R12);
    assert!(GPRS + offset_of!(GpRegs, r13) == CTX_OFFSET_R13);
    assert!(GPRS + offset_of!(GpRegs, r14) == CTX_OFFSET_R14);
    assert!(GPRS + offset_of!(GpRegs, r15) == CTX_OFFSET_R15);

    assert!(offset_of!(RunContext, cr0) == CTX_OFFSET_CR0);
    assert!(offset_of!(RunContext, cr2) == CTX_OFFSET_CR2);
    assert!(offset_of!(RunContext, cr3) == CTX_OFFSET_CR3);
    assert!(offset_of!(RunContext, cr4) == CTX_OFFSET_CR4);
    assert!(offset_of!(RunContext, rip) == CTX_OFFSET_RIP);
    assert!(offset_of!(RunContext, rflags) == CTX_OFFSET_RFLAGS);
    assert!(offset_of!(RunContext, dr7) == CTX_OFFSET_DR7);
    assert!(offset_of!(RunContext, tsc_offset) == CTX_OFFSET_TSC_OFFSET);

    assert!(offset_of!(RunContext, ia32_spec_ctrl) == CTX_OFFSET_IA32_SPEC_CTRL);
    assert!(offset_of!(RunContext, ia32_star) == CTX_OFFSET_IA32_STAR);
    assert!(offset_of!(RunContext, ia32_lstar) == CTX_OFFSET_IA32_LSTAR);
    assert!(offset_of!(RunContext, ia32_fmask) == CTX_OFFSET_IA32_FMASK);
    assert!(offset_of!(RunContext, ia32_kernel_gs_base) == CTX_OFFSET_IA32_KERNEL_GS_BASE);

    assert!(offset_of!(RunContext, cs) == CTX_OFFSET_CS);
    assert!(offset_of!(RunContext, ss) == CTX_OFFSET_SS);
    assert!(offset_of!(RunContext, ds) == CTX_OFFSET_DS);
    assert!(offset_of!(RunContext, es) == CTX_OFFSET_ES);
    assert!(offset_of!(RunContext, fs) == CTX_OFFSET_FS);
    assert!(offset_of!(RunContext, gs) == CTX_OFFSET_GS);
    assert!(offset_of!(RunContext, tr) == CTX_OFFSET_TR);
    assert!(offset_of!(RunContext, idtr) == CTX_OFFSET_IDTR);
    assert!(offset_of!(RunContext, ldtr) == CTX_OFFSET_LDTR);
    assert!(offset_of!(RunContext, gdtr) == CTX_OFFSET_GDTR);

    assert!(offset_of!(RunContext, fx_state) == CTX_OFFSET_FX_STATE);

    // The segment cells and the FX area have their own sub-layout contract.
    assert!(core::mem::size_of::<SegmentSel>() == 32);
    assert!(offset_of!(SegmentSel, selector) == 0);
    assert!(offset_of!(SegmentSel, base) == 8);
    assert!(offset_of!(SegmentSel, limit) == 16);
    assert!(offset_of!(SegmentSel, attr) == 20);
    assert!(core::mem::size_of::<FxStateArea>() == FX_STATE_AREA_SIZE);
    assert!(core::mem::align_of::<FxStateArea>() == 16);
};
