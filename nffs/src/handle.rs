//! # 句柄
//!
//! 文件句柄与目录句柄都是固定大小槽位表中的下标。槽位每次复用都会递增代数，
//! 已关闭的句柄即使槽位被重新占用也会被识别为无效。

use alloc::vec::Vec;

use enumflags2::{BitFlags, bitflags};

use crate::{Error, ObjectId, Result};

#[rustfmt::skip]
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// 可读
    Read     = 0b0001,
    /// 可写，文件不存在时创建
    Write    = 0b0010,
    /// 每次写入前移到文件末尾
    Append   = 0b0100,
    /// 打开时清空文件，须与 `Write` 同用
    Truncate = 0b1000,
}

/// 已打开文件的句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle {
    slot: u16,
    generation: u32,
}

/// 已打开目录的句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirHandle {
    slot: u16,
    generation: u32,
}

pub(crate) trait Handle: Copy {
    fn from_parts(slot: u16, generation: u32) -> Self;
    fn slot(&self) -> usize;
    fn generation(&self) -> u32;
}

macro_rules! impl_handle {
    ($($ty:ty),*) => {
        $(
            impl Handle for $ty {
                #[inline]
                fn from_parts(slot: u16, generation: u32) -> Self {
                    Self { slot, generation }
                }

                #[inline]
                fn slot(&self) -> usize {
                    self.slot as usize
                }

                #[inline]
                fn generation(&self) -> u32 {
                    self.generation
                }
            }
        )*
    };
}

impl_handle!(FileHandle, DirHandle);

#[derive(Debug)]
pub(crate) struct OpenFile {
    pub inode: ObjectId,
    pub pos: u32,
    pub access: BitFlags<Access>,
}

#[derive(Debug)]
pub(crate) struct OpenDir {
    pub dir: ObjectId,
    /// 打开时的目录项快照
    pub entries: Vec<ObjectId>,
    pub next: usize,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// 容量固定的句柄槽位表
#[derive(Debug)]
pub(crate) struct HandlePool<T> {
    slots: Vec<Slot<T>>,
}

impl<T> HandlePool<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(u16::MAX as usize + 1);
        Self {
            slots: (0..capacity)
                .map(|_| Slot {
                    generation: 0,
                    value: None,
                })
                .collect(),
        }
    }

    /// 占用空槽位，表满时返回 [`Error::ResourceExhausted`]
    pub fn insert<H: Handle>(&mut self, value: T) -> Result<H> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.value.is_none())
            .ok_or(Error::ResourceExhausted)?;
        slot.value = Some(value);
        Ok(H::from_parts(index as u16, slot.generation))
    }

    pub fn get_mut<H: Handle>(&mut self, handle: H) -> Result<&mut T> {
        match self.slots.get_mut(handle.slot()) {
            Some(slot) if slot.generation == handle.generation() => {
                slot.value.as_mut().ok_or(Error::InvalidHandle)
            }
            _ => Err(Error::InvalidHandle),
        }
    }

    pub fn remove<H: Handle>(&mut self, handle: H) -> Result<T> {
        match self.slots.get_mut(handle.slot()) {
            Some(slot) if slot.generation == handle.generation() && slot.value.is_some() => {
                slot.generation = slot.generation.wrapping_add(1);
                slot.value.take().ok_or(Error::InvalidHandle)
            }
            _ => Err(Error::InvalidHandle),
        }
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.slots.iter().all(|slot| slot.value.is_some())
    }

    #[cfg(test)]
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(|slot| slot.value.as_ref())
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(|slot| slot.value.as_mut())
    }

    /// 使全部句柄失效
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            if slot.value.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
    }
}
