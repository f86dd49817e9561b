//! # 闪存数据结构层
//!
//! 闪存上只有两种结构：位于区域起始处的[区域头](AreaHeader)，
//! 以及紧随其后、首尾相接的[对象记录](Record)。
//! 所有多字节整数均为小端序，每个结构以 CRC-32 结尾。

mod area_header;
mod record;

use crc::{CRC_32_ISO_HDLC, Crc};

pub(crate) use self::{
    area_header::AreaHeader,
    record::{
        BLOCK_DATA_OFFSET, BLOCK_OVERHEAD, BlockMeta, InodeRecord, Record, RecordHeader,
        RecordKind, Tombstone,
    },
};
pub use self::record::InodeFlag;

pub(crate) const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

#[inline]
fn le_u16(bytes: &[u8], at: usize) -> u16 {
    let mut raw = [0; 2];
    raw.copy_from_slice(&bytes[at..at + 2]);
    u16::from_le_bytes(raw)
}

#[inline]
fn le_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(raw)
}
