//! # 闪存区域层
//!
//! 区域是擦除的最小单位。区域内只追加写入：写指针之前的字节已被编程，
//! 之后的字节保持擦除态，直到整个区域被擦除。

use alloc::sync::Arc;
use alloc::vec;

use flash_dev::{FlashDevice, FlashError};

use crate::Result;
use crate::layout::AreaHeader;

/// 区域描述：位于哪片闪存的哪一段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreaDesc {
    pub offset: u32,
    pub length: u32,
    pub flash_id: u8,
}

impl AreaDesc {
    pub const fn new(flash_id: u8, offset: u32, length: u32) -> Self {
        Self {
            offset,
            length,
            flash_id,
        }
    }

    fn end(&self) -> u64 {
        self.offset as u64 + self.length as u64
    }

    pub(crate) fn overlaps(&self, other: &Self) -> bool {
        self.flash_id == other.flash_id
            && (self.offset as u64) < other.end()
            && (other.offset as u64) < self.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaRole {
    /// 已写入区域头，承载对象记录
    Data,
    /// 垃圾回收的目标，保持擦除态
    Scratch,
}

/// 带重试策略的闪存驱动
#[derive(Clone)]
pub(crate) struct Flash {
    dev: Arc<dyn FlashDevice>,
    retries: u8,
}

impl Flash {
    pub fn new(dev: Arc<dyn FlashDevice>, retries: u8) -> Self {
        Self { dev, retries }
    }

    fn retry(
        &self,
        what: &str,
        mut op: impl FnMut() -> core::result::Result<(), FlashError>,
    ) -> Result<()> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.retries => {
                    attempt += 1;
                    log::warn!("flash {what} failed: {err}, retry {attempt}/{}", self.retries);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// 内存中的区域状态
#[derive(Debug, Clone)]
pub(crate) struct Area {
    pub desc: AreaDesc,
    /// 逻辑区域号
    pub id: u8,
    /// 区域序号
    pub seq: u32,
    /// 写指针，相对区域起点
    pub cur: u32,
    pub role: AreaRole,
}

impl Area {
    pub fn data(desc: AreaDesc, id: u8, seq: u32) -> Self {
        Self {
            desc,
            id,
            seq,
            cur: AreaHeader::SIZE as u32,
            role: AreaRole::Data,
        }
    }

    pub fn scratch(desc: AreaDesc, seq: u32) -> Self {
        Self {
            desc,
            id: u8::MAX,
            seq,
            cur: 0,
            role: AreaRole::Scratch,
        }
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.desc.length
    }

    #[inline]
    pub fn free(&self) -> u32 {
        self.desc.length - self.cur
    }

    /// 数据区域中尚未写入任何记录
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.role == AreaRole::Data && self.cur == AreaHeader::SIZE as u32
    }

    /// 封存区域，此后不再追加
    pub fn seal(&mut self) {
        self.cur = self.desc.length;
    }

    pub fn read(&self, flash: &Flash, offset: u32, buf: &mut [u8]) -> Result<()> {
        self.check(offset, buf.len())?;
        let address = self.desc.offset + offset;
        flash.retry("read", || flash.dev.read(self.desc.flash_id, address, &mut *buf))
    }

    /// 写指针只前进不后退，即使写入失败也越过可能已被编程的字节
    pub fn append(&mut self, flash: &Flash, bytes: &[u8]) -> Result<u32> {
        let offset = self.cur;
        self.check(offset, bytes.len())?;
        self.cur += bytes.len() as u32;
        flash
            .dev
            .write(self.desc.flash_id, self.desc.offset + offset, bytes)?;
        Ok(offset)
    }

    /// 擦除区域并赋予新的序号，擦除后的区域成为暂存区
    pub fn erase(&mut self, flash: &Flash, seq: u32) -> Result<()> {
        let desc = self.desc;
        flash.retry("erase", || {
            flash.dev.erase(desc.flash_id, desc.offset, desc.length)
        })?;
        *self = Self::scratch(desc, seq);
        Ok(())
    }

    /// 将擦除态区域写上区域头，成为数据区域
    pub fn install(&mut self, flash: &Flash, id: u8) -> Result<()> {
        debug_assert_eq!(0, self.cur);
        let header = AreaHeader {
            length: self.desc.length,
            area_id: id,
            seq: self.seq,
        };
        self.append(flash, &header.encode())?;
        self.id = id;
        self.role = AreaRole::Data;
        Ok(())
    }

    /// 逐段读取整个区域，判断是否全为擦除态
    pub fn is_blank(&self, flash: &Flash) -> Result<bool> {
        const CHUNK: u32 = 256;

        let mut buf = vec![0; CHUNK as usize];
        let mut offset = 0;
        while offset < self.len() {
            let n = CHUNK.min(self.len() - offset) as usize;
            self.read(flash, offset, &mut buf[..n])?;
            if !flash_dev::is_erased(&buf[..n]) {
                return Ok(false);
            }
            offset += n as u32;
        }
        Ok(true)
    }

    fn check(&self, offset: u32, len: usize) -> Result<()> {
        if offset as u64 + len as u64 > self.desc.length as u64 {
            return Err(FlashError::OutOfBounds.into());
        }
        Ok(())
    }
}
