use core::arch::global_asm;
use x86_64::VirtAddr;

#[cfg(not(all(target_arch = "x86_64", target_os = "linux")))]
compile_error!("coop_sched only supports x86_64 Linux");

/// MXCSR after reset: all SSE exceptions masked, round to nearest.
const DEFAULT_MXCSR: u32 = 0x1F80;
/// x87 control word after `fninit`.
const DEFAULT_FPU_CW: u16 = 0x037F;

/// A saved execution point.
///
/// Only the state the System V AMD64 ABI makes callee-saved is kept: a
/// switch is always entered through an ordinary call, so the compiler has
/// already spilled everything else.
#[derive(Debug, Default, Clone, Copy)]
#[repr(C)]
pub struct Context {
    pub rsp: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,

    // Floating point control state
    pub mxcsr: u32,
    pub fpu_cw: u16,
    _pad: u16,
}

unsafe extern "C" {
    fn coop_sched_switch(save: *mut Context, load: *const Context);
}

global_asm!(
    ".text",
    ".global coop_sched_switch",
    ".type coop_sched_switch, @function",
    "coop_sched_switch:",
    // Capture the caller; [rsp] holds its return address
    "mov [rdi + 0x00], rsp",
    "mov [rdi + 0x08], rbp",
    "mov [rdi + 0x10], rbx",
    "mov [rdi + 0x18], r12",
    "mov [rdi + 0x20], r13",
    "mov [rdi + 0x28], r14",
    "mov [rdi + 0x30], r15",
    "stmxcsr dword ptr [rdi + 0x38]",
    "fnstcw word ptr [rdi + 0x3c]",
    // Restore the target
    "mov rsp, [rsi + 0x00]",
    "mov rbp, [rsi + 0x08]",
    "mov rbx, [rsi + 0x10]",
    "mov r12, [rsi + 0x18]",
    "mov r13, [rsi + 0x20]",
    "mov r14, [rsi + 0x28]",
    "mov r15, [rsi + 0x30]",
    "ldmxcsr dword ptr [rsi + 0x38]",
    "fldcw word ptr [rsi + 0x3c]",
    // A resumed context returns from its own switch call; a fresh one
    // "returns" into its entry routine.
    "ret",
    ".size coop_sched_switch, . - coop_sched_switch",
);

impl Context {
    /// Builds a context that starts `entry` on the stack ending at
    /// `stack_top`. This is the only place a stack pointer is installed by
    /// hand.
    ///
    /// # Safety
    /// `stack_top` must be the top of a writable region that stays alive, and
    /// unused by anything else, for as long as the context may run.
    pub unsafe fn fresh(stack_top: VirtAddr, entry: extern "C" fn() -> !) -> Self {
        let top = stack_top.align_down(16u64);
        // `ret` pops the entry address and leaves rsp at 8 mod 16, the
        // alignment a function sees right after a call.
        let slot = top - 16u64;
        unsafe {
            slot.as_mut_ptr::<u64>().write(entry as usize as u64);
            (top - 8u64).as_mut_ptr::<u64>().write(0);
        }

        Context {
            rsp: slot.as_u64(),
            mxcsr: DEFAULT_MXCSR,
            fpu_cw: DEFAULT_FPU_CW,
            ..Context::default()
        }
    }

    /// Captures the caller into `save` and resumes `load`.
    ///
    /// The capture is taken first, so this call "returns" only when some
    /// later switch names `save` as its target. Code following a switch
    /// therefore runs once per resumption.
    ///
    /// # Safety
    /// `load` must hold a context produced by `fresh` or captured by an
    /// earlier switch whose stack is still live, and nothing else may resume
    /// it concurrently.
    pub unsafe fn switch(save: *mut Context, load: *const Context) {
        unsafe { coop_sched_switch(save, load) }
    }
}
