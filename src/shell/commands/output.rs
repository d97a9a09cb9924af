//! Output helper for commands whose output is often piped.
//!
//! `s3resolver resolve ... | head` closes stdout early; that ends the command
//! quietly instead of reporting an error.

/// Print a line to stdout, returning `Ok(())` from the caller on BrokenPipe.
///
/// Other IO errors are propagated.
#[macro_export]
macro_rules! print_line {
    ($($arg:tt)*) => {{
        use std::io::Write;
        match writeln!(std::io::stdout(), $($arg)*) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }};
}

pub use print_line;
