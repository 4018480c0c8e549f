// src/vga_buffer/color.rs

//! VGA color definitions

/// Standard VGA 4-bit color palette
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VgaColor {
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

/// Foreground/background color pair encoded as a single attribute byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorCode(u8);

impl ColorCode {
    /// Build a color code from a foreground and background color
    #[must_use]
    pub const fn new(foreground: VgaColor, background: VgaColor) -> Self {
        Self((background as u8) << 4 | (foreground as u8))
    }

    /// Raw attribute byte, as stored alongside the character in the buffer
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Default console color: light gray on black
    #[must_use]
    pub const fn normal() -> Self {
        Self::new(VgaColor::LightGray, VgaColor::Black)
    }

    /// Informational messages: cyan on black
    #[must_use]
    pub const fn info() -> Self {
        Self::new(VgaColor::LightCyan, VgaColor::Black)
    }

    /// Success messages: green on black
    #[must_use]
    pub const fn success() -> Self {
        Self::new(VgaColor::LightGreen, VgaColor::Black)
    }

    /// Warning messages: yellow on black
    #[must_use]
    pub const fn warning() -> Self {
        Self::new(VgaColor::Yellow, VgaColor::Black)
    }

    /// Error messages: light red on black
    #[must_use]
    pub const fn error() -> Self {
        Self::new(VgaColor::LightRed, VgaColor::Black)
    }

    /// Panic screen: white on red
    #[must_use]
    pub const fn panic() -> Self {
        Self::new(VgaColor::White, VgaColor::Red)
    }
}
