// src/kernel/mm/frame.rs
//! 物理フレーム管理
//!
//! ブートローダが報告するメモリマップを土台にした物理フレームアロケータ。
//! 解放されたフレームは侵入型の空きリストで再利用する。

use bootloader_api::info::{MemoryRegionKind, MemoryRegions};
use x86_64::structures::paging::{FrameAllocator, FrameDeallocator, PhysFrame, Size4KiB};
use x86_64::PhysAddr;

/// ブートのメモリマップから使用可能な物理フレームを割り当てるアロケータ
///
/// `Usable` 領域を順に走査するカーソルに加えて、`pfa_free` で返却された
/// フレームを LIFO で再利用する侵入型フリーリストを持つ。フリーリストの
/// ノードは解放対象のフレーム自身（物理メモリの直接マッピング経由）に
/// 書き込むため、追加のヒープ割り当てを必要としない。
pub struct BootInfoFrameAllocator {
    memory_regions: &'static MemoryRegions,
    physical_memory_offset: u64,
    next: usize,
    free_list: Option<PhysFrame<Size4KiB>>,
    frames_allocated: usize,
    frames_freed: usize,
}

#[repr(C)]
struct FreeListNode {
    next: Option<PhysFrame<Size4KiB>>,
}

impl BootInfoFrameAllocator {
    /// ブートのメモリマップからアロケータを構築する
    ///
    /// # Safety
    ///
    /// `memory_regions` が正当なブート情報から渡され、`Usable` とされた
    /// 領域が実際に未使用であることを呼び出し元が保証する必要がある。
    pub unsafe fn init(memory_regions: &'static MemoryRegions, physical_memory_offset: u64) -> Self {
        Self {
            memory_regions,
            physical_memory_offset,
            next: 0,
            free_list: None,
            frames_allocated: 0,
            frames_freed: 0,
        }
    }

    fn usable_frames(&self) -> impl Iterator<Item = PhysFrame<Size4KiB>> + '_ {
        self.memory_regions
            .iter()
            .filter(|r| r.kind == MemoryRegionKind::Usable)
            .flat_map(|r| (r.start..r.end).step_by(4096))
            .map(|addr| PhysFrame::containing_address(PhysAddr::new(addr)))
    }

    fn frame_ptr(&self, frame: PhysFrame<Size4KiB>) -> *mut FreeListNode {
        (self.physical_memory_offset + frame.start_address().as_u64()) as *mut FreeListNode
    }

    /// 累計割り当て数・解放数のスナップショット（`allocated`, `freed`）
    pub fn stats(&self) -> (usize, usize) {
        (self.frames_allocated, self.frames_freed)
    }
}

unsafe impl FrameAllocator<Size4KiB> for BootInfoFrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysFrame<Size4KiB>> {
        if let Some(frame) = self.free_list {
            let node = unsafe { &*self.frame_ptr(frame) };
            self.free_list = node.next;
            self.frames_allocated += 1;
            return Some(frame);
        }

        let frame = self.usable_frames().nth(self.next)?;
        self.next += 1;
        self.frames_allocated += 1;
        Some(frame)
    }
}

impl FrameDeallocator<Size4KiB> for BootInfoFrameAllocator {
    unsafe fn deallocate_frame(&mut self, frame: PhysFrame<Size4KiB>) {
        let node_ptr = self.frame_ptr(frame);
        unsafe {
            node_ptr.write(FreeListNode { next: self.free_list });
        }
        self.free_list = Some(frame);
        self.frames_freed += 1;
    }
}
