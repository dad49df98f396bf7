//! Trap entry thunks.
//!
//! Every vector funnels through `trap_common`, which materializes a
//! [`TrapFrame`] on the kernel stack, switches to kernel data segments,
//! and calls the Rust-side dispatcher. On the way out the (possibly
//! rewritten) frame is popped back into the registers and `iretd`
//! returns, so system-call results, signal-handler launches and
//! `sigreturn` all work by editing the frame in place.
//!
//! Vectors 8, 10..14 and 17 arrive with a CPU-pushed error code; every
//! other stub pushes a zero placeholder so the frame layout is uniform.

use crate::arch::TrapFrame;

core::arch::global_asm!(
    r#"
    .section .text
    .global trap_common
    trap_common:
        pusha
        push ds
        push es
        mov ax, 0x18
        mov ds, ax
        mov es, ax
        push esp
        call trap_dispatch
        add esp, 4
        pop es
        pop ds
        popa
        add esp, 8
        iretd
    "#
);

macro_rules! trap_stub {
    ($name:ident, $vector:literal) => {
        core::arch::global_asm!(concat!(
            ".global ",
            stringify!($name),
            "\n",
            stringify!($name),
            ":\n",
            "    push 0\n",
            "    push ",
            stringify!($vector),
            "\n",
            "    jmp trap_common\n",
        ));
    };
    ($name:ident, $vector:literal, error_code) => {
        core::arch::global_asm!(concat!(
            ".global ",
            stringify!($name),
            "\n",
            stringify!($name),
            ":\n",
            "    push ",
            stringify!($vector),
            "\n",
            "    jmp trap_common\n",
        ));
    };
}

trap_stub!(vec_0, 0);
trap_stub!(vec_1, 1);
trap_stub!(vec_2, 2);
trap_stub!(vec_3, 3);
trap_stub!(vec_4, 4);
trap_stub!(vec_5, 5);
trap_stub!(vec_6, 6);
trap_stub!(vec_7, 7);
trap_stub!(vec_8, 8, error_code);
trap_stub!(vec_9, 9);
trap_stub!(vec_10, 10, error_code);
trap_stub!(vec_11, 11, error_code);
trap_stub!(vec_12, 12, error_code);
trap_stub!(vec_13, 13, error_code);
trap_stub!(vec_14, 14, error_code);
trap_stub!(vec_15, 15);
trap_stub!(vec_16, 16);
trap_stub!(vec_17, 17, error_code);
trap_stub!(vec_18, 18);
trap_stub!(vec_19, 19);
trap_stub!(irq0_timer, 0x20);
trap_stub!(irq1_keyboard, 0x21);
trap_stub!(irq8_rtc, 0x28);
trap_stub!(syscall_gate, 0x80);

extern "C" {
    pub fn vec_0();
    pub fn vec_1();
    pub fn vec_2();
    pub fn vec_3();
    pub fn vec_4();
    pub fn vec_5();
    pub fn vec_6();
    pub fn vec_7();
    pub fn vec_8();
    pub fn vec_9();
    pub fn vec_10();
    pub fn vec_11();
    pub fn vec_12();
    pub fn vec_13();
    pub fn vec_14();
    pub fn vec_15();
    pub fn vec_16();
    pub fn vec_17();
    pub fn vec_18();
    pub fn vec_19();
    pub fn irq0_timer();
    pub fn irq1_keyboard();
    pub fn irq8_rtc();
    pub fn syscall_gate();
}

/// Exception thunks in vector order, consumed by [`super::idt::init`].
pub static EXCEPTION_THUNKS: [unsafe extern "C" fn(); 20] = [
    vec_0, vec_1, vec_2, vec_3, vec_4, vec_5, vec_6, vec_7, vec_8, vec_9, vec_10, vec_11, vec_12,
    vec_13, vec_14, vec_15, vec_16, vec_17, vec_18, vec_19,
];

/// Central trap dispatcher. Called from `trap_common` with a pointer to
/// the live frame; any mutation is reflected by the `iretd`.
#[no_mangle]
extern "C" fn trap_dispatch(frame: *mut TrapFrame) {
    // SAFETY: trap_common passes the address of the frame it just pushed
    // on this kernel stack; it stays alive until the matching iretd.
    let frame = unsafe { &mut *frame };

    match frame.vector {
        0..=19 => crate::exceptions::handle(frame),
        0x20 => {
            super::pic::ack(super::pit::PIT_IRQ);
            crate::sched::tick();
        }
        0x21 => crate::drivers::keyboard::handle_irq(),
        0x28 => crate::drivers::vrtc::handle_irq(),
        0x80 => crate::syscall::handle(frame),
        vector => log::warn!("stray trap, vector {:#x}", vector),
    }

    if frame.from_user() {
        crate::signal::on_return_to_user(frame);
    }
}
