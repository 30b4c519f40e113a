//! VGA text-mode console, reworked as one of the printf engine's
//! registrable TTYs (spec §4.9). Grounded on
//! `brianmayclone-anyos/kernel/src/drivers/vga_text.rs`'s buffer layout,
//! scrolling, and control-character handling, rebuilt around
//! `util::mutex::Mutex` (one lock protecting cursor + color state instead
//! of three `static mut`s) and `util::volatile::Volatile` (the teacher's
//! own MMIO idiom, used elsewhere for device registers) in place of raw
//! `write_volatile` pointer arithmetic.

use alloc::sync::Arc;
use util::mutex::Mutex;
use util::volatile::Volatile;

use crate::printf::Tty;

const VGA_WIDTH: usize = 80;
const VGA_HEIGHT: usize = 25;

#[repr(u8)]
#[derive(Copy, Clone, Debug)]
#[allow(dead_code)]
pub enum Color {
    Black = 0,
    Blue = 1,
    Green = 2,
    Cyan = 3,
    Red = 4,
    Magenta = 5,
    Brown = 6,
    LightGray = 7,
    DarkGray = 8,
    LightBlue = 9,
    LightGreen = 10,
    LightCyan = 11,
    LightRed = 12,
    Pink = 13,
    Yellow = 14,
    White = 15,
}

fn color_code(fg: Color, bg: Color) -> u8 {
    (bg as u8) << 4 | (fg as u8)
}

#[derive(Clone, Copy)]
#[repr(transparent)]
struct ScreenChar(u16);

impl ScreenChar {
    fn new(byte: u8, attr: u8) -> Self {
        Self((attr as u16) << 8 | byte as u16)
    }
}

/// Volatile view over the raw VGA text framebuffer at `0xB8000`, accessed
/// through the kernel's physical-memory-offset mapping the same way every
/// other MMIO-backed device in this kernel is.
struct Framebuffer {
    cells: *mut Volatile<u16>,
}

// The framebuffer is a fixed MMIO region; access is only ever made
// through `Console`, which is itself behind a `Mutex`.
unsafe impl Send for Framebuffer {}
unsafe impl Sync for Framebuffer {}

impl Framebuffer {
    fn write(&self, row: usize, col: usize, ch: ScreenChar) {
        let idx = row * VGA_WIDTH + col;
        unsafe { (*self.cells.add(idx)).write(ch.0) }
    }

    fn read(&self, row: usize, col: usize) -> ScreenChar {
        let idx = row * VGA_WIDTH + col;
        ScreenChar(unsafe { (*self.cells.add(idx)).read() })
    }
}

struct ConsoleState {
    col: usize,
    row: usize,
    attr: u8,
}

struct Console {
    fb: Framebuffer,
    state: Mutex<ConsoleState>,
}

impl Console {
    fn scroll(&self, state: &mut ConsoleState) {
        for row in 1..VGA_HEIGHT {
            for col in 0..VGA_WIDTH {
                let ch = self.fb.read(row, col);
                self.fb.write(row - 1, col, ch);
            }
        }
        let blank = ScreenChar::new(b' ', state.attr);
        for col in 0..VGA_WIDTH {
            self.fb.write(VGA_HEIGHT - 1, col, blank);
        }
    }

    fn put_byte(&self, state: &mut ConsoleState, byte: u8) {
        match byte {
            b'\n' => {
                state.col = 0;
                state.row += 1;
            }
            b'\r' => {
                state.col = 0;
            }
            b'\t' => {
                state.col = (state.col + 8) & !7;
            }
            _ => {
                self.fb.write(state.row, state.col, ScreenChar::new(byte, state.attr));
                state.col += 1;
            }
        }
        if state.col >= VGA_WIDTH {
            state.col = 0;
            state.row += 1;
        }
        if state.row >= VGA_HEIGHT {
            self.scroll(state);
            state.row = VGA_HEIGHT - 1;
        }
    }

    fn write_bytes(&self, bytes: &[u8]) {
        let mut state = self.state.lock();
        for &b in bytes {
            self.put_byte(&mut state, b);
        }
    }

    fn clear(&self) {
        let mut state = self.state.lock();
        let blank = ScreenChar::new(b' ', state.attr);
        for row in 0..VGA_HEIGHT {
            for col in 0..VGA_WIDTH {
                self.fb.write(row, col, blank);
            }
        }
        state.col = 0;
        state.row = 0;
    }

    fn set_color(&self, fg: Color, bg: Color) {
        self.state.lock().attr = color_code(fg, bg);
    }
}

impl Tty for Console {
    fn write_bytes(&self, bytes: &[u8]) {
        Console::write_bytes(self, bytes)
    }
}

/// Maps the VGA text buffer and returns a console handle, ready to
/// `printf::register_tty`. `physical_memory_offset` is the same
/// identity/offset mapping every other physical-address access in this
/// kernel goes through (see `GlobalData::physical_memory_offset`).
///
/// # Safety
/// Must be called exactly once, after paging is initialized such that
/// `physical_memory_offset + 0xB8000` is mapped and writable.
pub unsafe fn init(physical_memory_offset: u64) -> Arc<Console> {
    let addr = physical_memory_offset + 0xB8000;
    let console = Arc::new(Console {
        fb: Framebuffer {
            cells: addr as *mut Volatile<u16>,
        },
        state: Mutex::new(ConsoleState {
            col: 0,
            row: 0,
            attr: color_code(Color::White, Color::Black),
        }),
    });
    console.clear();
    console
}
