//! Print macros for kernel console output.
//!
//! `print!`/`println!` go to the running terminal's video target (the real
//! framebuffer when that terminal is foreground, its backing page
//! otherwise). `serial_print!` bypasses the console entirely and is what
//! the logger uses.

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::terminal::console::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => ($crate::serial::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => ($crate::serial_print!("{}\n", format_args!($($arg)*)));
}
