// src/kernel/driver/keyboard.rs
//! PS/2 キーボードドライバ
//!
//! CharDevice trait に基づいた型安全な実装。

use crate::kernel::core::{Device, CharDevice, KernelResult};
use crate::arch::x86_64::port::{PortReadOnly, PortWriteOnly};
use spin::Mutex;

/// PS/2 キーボード
pub struct PS2Keyboard {
    data: PortReadOnly<u8>,
    status: PortReadOnly<u8>,
    command: PortWriteOnly<u8>,
}

impl PS2Keyboard {
    /// 新しいキーボードドライバを作成
    pub const fn new() -> Self {
        Self {
            data: PortReadOnly::new(0x60),
            status: PortReadOnly::new(0x64),
            command: PortWriteOnly::new(0x64),
        }
    }

    /// ステータスレジスタを読み取り
    fn read_status(&self) -> u8 {
        unsafe { self.status.read() }
    }

    /// 出力バッファが空でなければ 1 バイト読み取る (IRQ1 ハンドラから使用)
    pub fn read_scancode(&self) -> Option<u8> {
        if self.read_status() & 0x01 != 0 {
            Some(unsafe { self.data.read() })
        } else {
            None
        }
    }
}

/// システム全体で共有する PS/2 キーボードの状態。IRQ1 ハンドラが唯一の書き手。
pub static KEYBOARD: Mutex<PS2Keyboard> = Mutex::new(PS2Keyboard::new());

/// 割り込みハンドラからは使えない (アロケーションやブロッキングが禁止されて
/// いる、§5 参照) ので固定長のリングバッファに生スキャンコードを溜めておく。
const SCANCODE_RING_CAPACITY: usize = 128;

/// IRQ1 から投入された生スキャンコードの非ブロッキング・リングバッファ。
pub struct ScancodeQueue {
    buf: [u8; SCANCODE_RING_CAPACITY],
    head: usize,
    tail: usize,
    len: usize,
}

impl ScancodeQueue {
    const fn new() -> Self {
        Self {
            buf: [0; SCANCODE_RING_CAPACITY],
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    /// スキャンコードを追加する。満杯なら黙って最古の1件を捨てる。
    pub fn add_scancode(&mut self, scancode: u8) {
        if self.len == SCANCODE_RING_CAPACITY {
            self.tail = (self.tail + 1) % SCANCODE_RING_CAPACITY;
            self.len -= 1;
        }
        self.buf[self.head] = scancode;
        self.head = (self.head + 1) % SCANCODE_RING_CAPACITY;
        self.len += 1;
    }

    /// 先頭のスキャンコードを取り出す。
    pub fn pop_scancode(&mut self) -> Option<u8> {
        if self.len == 0 {
            return None;
        }
        let byte = self.buf[self.tail];
        self.tail = (self.tail + 1) % SCANCODE_RING_CAPACITY;
        self.len -= 1;
        Some(byte)
    }
}

/// IRQ1 ハンドラが書き込む、将来のコンシューマが読み出す。
pub static SCANCODE_QUEUE: Mutex<ScancodeQueue> = Mutex::new(ScancodeQueue::new());

impl Device for PS2Keyboard {
    fn name(&self) -> &str {
        "PS/2 Keyboard"
    }
    
    fn init(&mut self) -> KernelResult<()> {
        // 初期化ロジック（必要なら）
        // コントローラのリセットなどはここで行う
        Ok(())
    }
    
    fn reset(&mut self) -> KernelResult<()> {
        self.init()
    }
}

impl CharDevice for PS2Keyboard {
    fn read_byte(&self) -> KernelResult<Option<u8>> {
        let status = self.read_status();
        // 出力バッファフルビット (bit 0) を確認
        if status & 0x01 != 0 {
            let scancode = unsafe { self.data.read() };
            Ok(Some(scancode))
        } else {
            Ok(None)
        }
    }
    
    fn write_byte(&mut self, _byte: u8) -> KernelResult<()> {
        // キーボードへの書き込みは通常コマンド送信だが、
        // CharDevice としてはサポートしない（またはLED制御などに使う）
        Ok(())
    }
}
