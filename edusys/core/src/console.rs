//! The console collaborator boundary.
//!
//! Rendering is outside this crate; the kernel only needs somewhere to put
//! text, advance a line, and present a terminal failure state.

use std::cell::RefCell;
use std::rc::Rc;

pub trait Console {
    fn put_text(&mut self, text: &str);
    fn advance_line(&mut self);
    /// Present the terminal failure state after a fatal kernel trap.
    fn trap_display(&mut self, message: &str);
}

/// Console that writes straight to the host's stdout/stderr.
#[derive(Debug, Default)]
pub struct StdoutConsole;

impl Console for StdoutConsole {
    fn put_text(&mut self, text: &str) {
        print!("{text}");
    }

    fn advance_line(&mut self) {
        println!();
    }

    fn trap_display(&mut self, message: &str) {
        eprintln!("KERNEL TRAP: {message}");
    }
}

#[derive(Debug, Default)]
struct Buffer {
    lines: Vec<String>,
    current: String,
    trap: Option<String>,
}

/// Console that records everything it is shown. Clones share one buffer,
/// so a test can keep a handle while the kernel owns the other.
#[derive(Debug, Clone, Default)]
pub struct BufferedConsole {
    inner: Rc<RefCell<Buffer>>,
}

impl BufferedConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, completed lines and the current one.
    pub fn output(&self) -> String {
        let buffer = self.inner.borrow();
        let mut out = buffer.lines.join("\n");
        if !buffer.current.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&buffer.current);
        }
        out
    }

    pub fn trap_message(&self) -> Option<String> {
        self.inner.borrow().trap.clone()
    }
}

impl Console for BufferedConsole {
    fn put_text(&mut self, text: &str) {
        self.inner.borrow_mut().current.push_str(text);
    }

    fn advance_line(&mut self) {
        let mut buffer = self.inner.borrow_mut();
        let line = std::mem::take(&mut buffer.current);
        buffer.lines.push(line);
    }

    fn trap_display(&mut self, message: &str) {
        let mut buffer = self.inner.borrow_mut();
        buffer.trap = Some(message.to_string());
    }
}
