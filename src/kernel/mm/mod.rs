// src/kernel/mm/mod.rs
//! メモリ管理モジュール
//!
//! 物理フレームアロケータ (PFA)、仮想メモリマネージャ (VMM)、ページフォールト
//! 処理、カーネルヒープをまとめる。コンポーネントの境界は SPEC_FULL.md §4.1/§4.2
//! に対応する。

use core::sync::atomic::AtomicU64;

pub mod allocator;
pub mod frame;
pub mod page_fault;
pub mod types;
pub mod user_paging;

pub use allocator::{LinkedListAllocator, LockedHeap};
pub use frame::BootInfoFrameAllocator;
pub use types::{LayoutSize, MemoryError, PhysAddr, VirtAddr};

/// ブート時に `BootInfo` から得た物理メモリの直接マップオフセット。
///
/// `0` は「未初期化」を意味する。`init_physical_memory_offset` がブートの
/// 最初期に一度だけ値を設定し、以後はこのモジュールが所有する唯一の
/// ミューテータとなる。PFA/VMM が物理アドレスから直接マップ済みの仮想
/// アドレスへ変換する際に読み出す。
pub static PHYS_MEM_OFFSET: AtomicU64 = AtomicU64::new(0);

/// 物理メモリオフセットを記録する。
///
/// ブートシーケンス (`main.rs`) が一度だけ呼び出す。
pub fn init_physical_memory_offset(offset: u64) {
    PHYS_MEM_OFFSET.store(offset, core::sync::atomic::Ordering::Release);
}

/// 現在記録されている物理メモリオフセットを仮想アドレスとして取得する。
#[inline]
pub fn phys_mem_offset() -> x86_64::VirtAddr {
    x86_64::VirtAddr::new(PHYS_MEM_OFFSET.load(core::sync::atomic::Ordering::Acquire))
}
