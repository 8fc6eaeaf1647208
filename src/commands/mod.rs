pub mod auto;
pub mod inspect;
pub mod install;
pub mod template;

use std::time::Duration;

use crate::core::interrupt::InterruptRegistry;

const INTERRUPT_WAIT: Duration = Duration::from_secs(30);

/// Routes Ctrl-C to the unpackers of `interrupts`.
pub fn interrupt_on_ctrl_c(interrupts: InterruptRegistry) {
    let handler = move || {
        request_interrupt(&interrupts, INTERRUPT_WAIT);
    };
    if let Err(err) = ctrlc::set_handler(handler) {
        tracing::warn!("cannot handle Ctrl-C: {err}");
    }
}

/// Asks the running unpackers to stop. Returns whether all of them did in time.
fn request_interrupt(interrupts: &InterruptRegistry, wait: Duration) -> bool {
    if interrupts.is_discard_interrupt() {
        eprintln!("Installation is finishing and cannot be interrupted.");
        return false;
    }
    eprintln!("Interrupting installation...");
    let stopped = interrupts.interrupt_all(wait);
    if !stopped {
        eprintln!("Unpacking did not stop in time.");
    }
    stopped
}

/// Prints `lines` in a colored box on stderr.
pub fn print_box(title: &str, lines: &[&str], color: &str) {
    let reset = "\x1b[0m";
    let max_width = lines
        .iter()
        .map(|l| l.chars().count())
        .max()
        .unwrap_or(0)
        .max(title.chars().count() + 4);
    let width = max_width + 2;

    eprintln!(
        "{}┌─ {} {}─┐{}",
        color,
        title,
        "─".repeat(width.saturating_sub(title.chars().count() + 4)),
        reset
    );
    for line in lines {
        eprintln!(
            "{}│{} {}{:<pad$} {}│{}",
            color,
            reset,
            line,
            "",
            color,
            reset,
            pad = width.saturating_sub(line.chars().count() + 1)
        );
    }
    eprintln!("{}└{}┘{}", color, "─".repeat(width), reset);
}
