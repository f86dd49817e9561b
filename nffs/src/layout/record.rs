//! 对象记录
//!
//! ```text
//! +------+-------+-------------+----+-----+---------+-------+
//! | kind | flags | payload_len | id | seq | payload | crc32 |
//! |  u8  |  u8   |     u16     | u32| u32 |   ...   |  u32  |
//! +------+-------+-------------+----+-----+---------+-------+
//! ```
//!
//! - 索引节点：`parent: u32, links: u16, name`
//! - 数据块：`owner: u32, prev: u32, data`
//! - 墓碑：无负载

use alloc::string::String;
use alloc::vec::Vec;
use core::str;

use enumflags2::{BitFlags, bitflags};

use super::{CRC32, le_u16, le_u32};
use crate::{MAX_NAME_LEN, ObjectId};

const HEADER_SIZE: usize = 12;
const CRC_SIZE: usize = 4;
const INODE_FIXED: usize = 6;
const BLOCK_FIXED: usize = 8;

/// 数据块记录中数据相对记录起点的偏移
pub const BLOCK_DATA_OFFSET: usize = HEADER_SIZE + BLOCK_FIXED;
/// 数据块记录除数据外的字节数
pub const BLOCK_OVERHEAD: usize = HEADER_SIZE + BLOCK_FIXED + CRC_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    Inode = 1,
    Block = 2,
    Tombstone = 3,
}

impl RecordKind {
    fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Inode),
            2 => Some(Self::Block),
            3 => Some(Self::Tombstone),
            _ => None,
        }
    }
}

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeFlag {
    Directory = 0b0000_0001,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub kind: RecordKind,
    pub flags: u8,
    pub payload_len: u16,
    pub id: ObjectId,
    pub seq: u32,
}

impl RecordHeader {
    pub const SIZE: usize = HEADER_SIZE;

    /// 种类未知、编号区间与种类不符或长度不合理时返回 `None`
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let raw = raw.get(..HEADER_SIZE)?;
        let header = Self {
            kind: RecordKind::from_raw(raw[0])?,
            flags: raw[1],
            payload_len: le_u16(raw, 2),
            id: le_u32(raw, 4).into(),
            seq: le_u32(raw, 8),
        };
        header.is_sane().then_some(header)
    }

    #[inline]
    pub fn record_len(&self) -> usize {
        HEADER_SIZE + self.payload_len as usize + CRC_SIZE
    }

    fn is_sane(&self) -> bool {
        let len = self.payload_len as usize;
        match self.kind {
            RecordKind::Inode => {
                self.id.is_inode()
                    && len <= INODE_FIXED + MAX_NAME_LEN
                    && (len > INODE_FIXED || self.id == ObjectId::ROOT)
            }
            RecordKind::Block => self.id.is_block() && len > BLOCK_FIXED,
            RecordKind::Tombstone => !self.id.is_none() && len == 0,
        }
    }

    fn seal(self, payload: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
        let mut raw = Vec::with_capacity(self.record_len());
        raw.push(self.kind as u8);
        raw.push(self.flags);
        raw.extend_from_slice(&self.payload_len.to_le_bytes());
        raw.extend_from_slice(&u32::from(self.id).to_le_bytes());
        raw.extend_from_slice(&self.seq.to_le_bytes());
        payload(&mut raw);
        let crc = CRC32.checksum(&raw);
        raw.extend_from_slice(&crc.to_le_bytes());
        debug_assert_eq!(self.record_len(), raw.len());
        raw
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Inode(InodeRecord),
    Block(BlockMeta),
    Tombstone(Tombstone),
}

impl Record {
    /// 解码一条完整记录，`raw` 必须恰好覆盖记录头、负载与校验和。
    ///
    /// 数据块只解出元数据，数据本身按需从闪存读取。
    pub fn decode(raw: &[u8]) -> Option<Self> {
        let header = RecordHeader::parse(raw)?;
        if raw.len() != header.record_len() {
            return None;
        }
        let body = raw.len() - CRC_SIZE;
        if CRC32.checksum(&raw[..body]) != le_u32(raw, body) {
            return None;
        }

        let payload = &raw[HEADER_SIZE..body];
        let record = match header.kind {
            RecordKind::Inode => {
                let name = str::from_utf8(&payload[INODE_FIXED..]).ok()?;
                if name.contains('/') {
                    return None;
                }
                Self::Inode(InodeRecord {
                    id: header.id,
                    seq: header.seq,
                    parent: le_u32(payload, 0).into(),
                    flags: BitFlags::from_bits(header.flags).ok()?,
                    links: le_u16(payload, 4),
                    name: name.into(),
                })
            }
            RecordKind::Block => Self::Block(BlockMeta::from_parts(&header, payload)),
            RecordKind::Tombstone => Self::Tombstone(Tombstone {
                id: header.id,
                seq: header.seq,
            }),
        };

        Some(record)
    }

    pub fn id(&self) -> ObjectId {
        match self {
            Self::Inode(inode) => inode.id,
            Self::Block(block) => block.id,
            Self::Tombstone(tombstone) => tombstone.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeRecord {
    pub id: ObjectId,
    pub seq: u32,
    /// 根目录的父目录为空编号
    pub parent: ObjectId,
    pub flags: BitFlags<InodeFlag>,
    pub links: u16,
    pub name: String,
}

impl InodeRecord {
    /// 名字最长时的记录长度
    pub const MAX_LEN: usize = HEADER_SIZE + INODE_FIXED + MAX_NAME_LEN + CRC_SIZE;

    pub fn encode(&self) -> Vec<u8> {
        let header = RecordHeader {
            kind: RecordKind::Inode,
            flags: self.flags.bits(),
            payload_len: (INODE_FIXED + self.name.len()) as u16,
            id: self.id,
            seq: self.seq,
        };
        header.seal(|raw| {
            raw.extend_from_slice(&u32::from(self.parent).to_le_bytes());
            raw.extend_from_slice(&self.links.to_le_bytes());
            raw.extend_from_slice(self.name.as_bytes());
        })
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.flags.contains(InodeFlag::Directory)
    }
}

/// 数据块记录的元数据部分
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMeta {
    pub id: ObjectId,
    pub seq: u32,
    pub owner: ObjectId,
    /// 链上的前一个数据块，首块为空编号
    pub prev: ObjectId,
    pub data_len: u16,
}

impl BlockMeta {
    /// 从记录前 [`BLOCK_DATA_OFFSET`] 个字节解析元数据，不校验
    pub fn parse_prefix(raw: &[u8]) -> Option<Self> {
        let header = RecordHeader::parse(raw)?;
        if header.kind != RecordKind::Block {
            return None;
        }
        Some(Self::from_parts(&header, raw.get(HEADER_SIZE..BLOCK_DATA_OFFSET)?))
    }

    fn from_parts(header: &RecordHeader, payload: &[u8]) -> Self {
        Self {
            id: header.id,
            seq: header.seq,
            owner: le_u32(payload, 0).into(),
            prev: le_u32(payload, 4).into(),
            data_len: header.payload_len - BLOCK_FIXED as u16,
        }
    }

    /// `data` 的长度必须等于 `data_len`
    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        debug_assert_eq!(self.data_len as usize, data.len());
        let header = RecordHeader {
            kind: RecordKind::Block,
            flags: 0,
            payload_len: (BLOCK_FIXED + data.len()) as u16,
            id: self.id,
            seq: self.seq,
        };
        header.seal(|raw| {
            raw.extend_from_slice(&u32::from(self.owner).to_le_bytes());
            raw.extend_from_slice(&u32::from(self.prev).to_le_bytes());
            raw.extend_from_slice(data);
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tombstone {
    pub id: ObjectId,
    pub seq: u32,
}

impl Tombstone {
    pub const LEN: usize = HEADER_SIZE + CRC_SIZE;

    pub fn encode(&self) -> Vec<u8> {
        let header = RecordHeader {
            kind: RecordKind::Tombstone,
            flags: 0,
            payload_len: 0,
            id: self.id,
            seq: self.seq,
        };
        header.seal(|_| ())
    }
}
