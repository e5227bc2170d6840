//! VGA Text Mode Driver
//!
//! An 80x25 grid of 16-bit (character, attribute) cells at physical
//! 0xB8000. The hardware cursor is driven through the CRTC index/data port
//! pair. On non-x86 builds the cell buffer is a static array instead of
//! MMIO, so console output stays observable in host tests.

use core::fmt;
use core::ptr;

use spin::Mutex;

use crate::arch::port::PortByte;

/// VGA text buffer base address.
#[cfg(target_arch = "x86")]
const VGA_BUFFER: usize = 0xB8000;

/// VGA CRTC index/data ports for cursor control.
const VGA_CTRL_REGISTER: u16 = 0x3D4;
const VGA_DATA_REGISTER: u16 = 0x3D5;

/// CRTC register indices for the cursor position.
const CRTC_CURSOR_HIGH: u8 = 0x0E;
const CRTC_CURSOR_LOW: u8 = 0x0F;

/// Screen dimensions.
pub const SCREEN_COLS: usize = 80;
pub const SCREEN_ROWS: usize = 25;

/// VGA Colors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
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

/// Represents a VGA character cell (character + attribute byte)
#[derive(Debug, Clone, Copy)]
#[repr(C)]
struct VgaChar {
    character: u8,
    attribute: u8,
}

#[cfg(not(target_arch = "x86"))]
mod host_cells {
    use core::cell::UnsafeCell;

    use super::{SCREEN_COLS, SCREEN_ROWS};

    pub struct CellBuffer(pub UnsafeCell<[u16; SCREEN_COLS * SCREEN_ROWS]>);

    // SAFETY:
    // - Host tests serialize access through the screen lock.
    unsafe impl Sync for CellBuffer {}

    pub static CELLS: CellBuffer = CellBuffer(UnsafeCell::new([0; SCREEN_COLS * SCREEN_ROWS]));
}

#[cfg(target_arch = "x86")]
#[inline]
fn buffer_base() -> *mut VgaChar {
    VGA_BUFFER as *mut VgaChar
}

#[cfg(not(target_arch = "x86"))]
#[inline]
fn buffer_base() -> *mut VgaChar {
    host_cells::CELLS.0.get() as *mut VgaChar
}

/// Screen driver state.
pub struct Screen {
    row: usize,
    col: usize,
    foreground: Color,
    background: Color,
}

impl Screen {
    pub const fn new() -> Self {
        Self {
            row: 0,
            col: 0,
            foreground: Color::White,
            background: Color::Black,
        }
    }

    /// Calculate the attribute byte from foreground and background colors
    fn attribute(&self) -> u8 {
        ((self.background as u8) << 4) | (self.foreground as u8)
    }

    /// Get pointer to the cell at a specific row/col
    fn vga_ptr(&self, row: usize, col: usize) -> *mut VgaChar {
        let offset = row * SCREEN_COLS + col;
        buffer_base().wrapping_add(offset)
    }

    /// Write a character cell (volatile write)
    fn write_vga(&self, row: usize, col: usize, ch: VgaChar) {
        // SAFETY:
        // - `row`/`col` stay inside the 80x25 grid by construction.
        // - Volatile writes are required for MMIO ordering/visibility.
        unsafe {
            ptr::write_volatile(self.vga_ptr(row, col), ch);
        }
    }

    /// Read a character cell (volatile read)
    fn read_vga(&self, row: usize, col: usize) -> VgaChar {
        // SAFETY:
        // - `row`/`col` stay inside the 80x25 grid by construction.
        unsafe { ptr::read_volatile(self.vga_ptr(row, col)) }
    }

    /// Set the current text color
    pub fn set_color(&mut self, color: Color) {
        self.foreground = color;
    }

    /// Set both foreground and background colors
    pub fn set_colors(&mut self, foreground: Color, background: Color) {
        self.foreground = foreground;
        self.background = background;
    }

    /// Clear the screen
    pub fn clear(&mut self) {
        let blank = VgaChar {
            character: b' ',
            attribute: self.attribute(),
        };

        for row in 0..SCREEN_ROWS {
            for col in 0..SCREEN_COLS {
                self.write_vga(row, col, blank);
            }
        }

        self.row = 0;
        self.col = 0;
        self.update_cursor();
    }

    /// Print a single character
    pub fn print_char(&mut self, c: u8) {
        match c {
            b'\n' => {
                self.row += 1;
                self.col = 0;
            }
            b'\r' => {
                self.col = 0;
            }
            b'\t' => {
                // Tab to next 8-character boundary
                self.col = (self.col + 8) & !(8 - 1);
                if self.col >= SCREEN_COLS {
                    self.col = 0;
                    self.row += 1;
                }
            }
            0x08 => {
                // Backspace
                if self.col > 0 {
                    self.col -= 1;
                } else if self.row > 0 {
                    self.row -= 1;
                    self.col = SCREEN_COLS - 1;
                } else {
                    return;
                }

                let blank = VgaChar {
                    character: b' ',
                    attribute: self.attribute(),
                };
                self.write_vga(self.row, self.col, blank);
            }
            _ => {
                if self.col >= SCREEN_COLS {
                    self.row += 1;
                    self.col = 0;
                }

                let vga_char = VgaChar {
                    character: c,
                    attribute: self.attribute(),
                };

                self.write_vga(self.row, self.col, vga_char);
                self.col += 1;
            }
        }

        self.scroll();
        self.update_cursor();
    }

    /// Print a string
    pub fn print_str(&mut self, s: &str) {
        for byte in s.bytes() {
            self.print_char(byte);
        }
    }

    /// Scroll the screen up by one line when the cursor runs off the end
    fn scroll(&mut self) {
        if self.row >= SCREEN_ROWS {
            let count = (SCREEN_ROWS - 1) * SCREEN_COLS;
            // SAFETY:
            // - Source and destination both lie inside the cell grid.
            unsafe {
                let dst = self.vga_ptr(0, 0);
                let src = self.vga_ptr(1, 0);
                ptr::copy(src, dst, count);
            }

            let blank = VgaChar {
                character: b' ',
                attribute: self.attribute(),
            };

            for col in 0..SCREEN_COLS {
                self.write_vga(SCREEN_ROWS - 1, col, blank);
            }

            self.row = SCREEN_ROWS - 1;
        }
    }

    /// Update the hardware cursor position through the CRTC registers
    fn update_cursor(&self) {
        let pos = (self.row * SCREEN_COLS + self.col) as u16;

        // SAFETY:
        // - CRTC index/data writes are the documented cursor protocol.
        unsafe {
            let ctrl = PortByte::new(VGA_CTRL_REGISTER);
            let data = PortByte::new(VGA_DATA_REGISTER);

            ctrl.write(CRTC_CURSOR_HIGH);
            data.write((pos >> 8) as u8);

            ctrl.write(CRTC_CURSOR_LOW);
            data.write(pos as u8);
        }
    }

    /// Set cursor position (0-based)
    pub fn set_cursor(&mut self, row: usize, col: usize) {
        self.row = row.min(SCREEN_ROWS - 1);
        self.col = col.min(SCREEN_COLS - 1);
        self.update_cursor();
    }

    /// Get cursor position (0-based)
    pub fn get_cursor(&self) -> (usize, usize) {
        (self.row, self.col)
    }

    /// Returns `(character, attribute)` of one cell.
    ///
    /// Intended for self-tests that check what actually landed on screen.
    pub fn char_at(&self, row: usize, col: usize) -> (u8, u8) {
        let cell = self.read_vga(row.min(SCREEN_ROWS - 1), col.min(SCREEN_COLS - 1));
        (cell.character, cell.attribute)
    }
}

impl Default for Screen {
    fn default() -> Self {
        Self::new()
    }
}

// Implement the core::fmt::Write trait so write!() works on Screen
impl fmt::Write for Screen {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.print_str(s);
        Ok(())
    }

    fn write_char(&mut self, c: char) -> fmt::Result {
        match c {
            '\n' => self.print_char(b'\n'),
            '\r' => self.print_char(b'\r'),
            '\t' => self.print_char(b'\t'),
            ch => {
                if ch.is_ascii() {
                    self.print_char(ch as u8);
                } else {
                    // Fallback for non-ASCII
                    self.print_char(b'?');
                }
            }
        }
        Ok(())
    }
}

/// Process-wide console instance.
static SCREEN: Mutex<Screen> = Mutex::new(Screen::new());

/// Executes a closure with exclusive access to the console.
pub fn with_screen<R>(f: impl FnOnce(&mut Screen) -> R) -> R {
    let mut screen = SCREEN.lock();
    f(&mut screen)
}
