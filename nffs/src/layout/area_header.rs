use super::{CRC32, le_u32};

const MAGIC: [u32; 2] = [0x5346_464e, 0x8c42_b07f];
const VERSION: u8 = 1;

/// 区域头：
/// - 标识区域属于本文件系统；
/// - 记录逻辑区域号与区域序号，用于恢复扫描排序与识别中断的垃圾回收。
///
/// 暂存区不写区域头，保持全擦除态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreaHeader {
    /// 区域长度，须与区域描述一致
    pub length: u32,
    /// 逻辑区域号，垃圾回收时由目标区域继承
    pub area_id: u8,
    /// 区域序号，每次擦除后递增
    pub seq: u32,
}

impl AreaHeader {
    pub const SIZE: usize = 24;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut raw = [0; Self::SIZE];
        raw[0..4].copy_from_slice(&MAGIC[0].to_le_bytes());
        raw[4..8].copy_from_slice(&MAGIC[1].to_le_bytes());
        raw[8..12].copy_from_slice(&self.length.to_le_bytes());
        raw[12] = VERSION;
        raw[13] = self.area_id;
        // 14..16 保留
        raw[16..20].copy_from_slice(&self.seq.to_le_bytes());
        let crc = CRC32.checksum(&raw[..20]);
        raw[20..24].copy_from_slice(&crc.to_le_bytes());
        raw
    }

    /// 魔数、版本或校验和不符时返回 `None`
    pub fn decode(raw: &[u8; Self::SIZE]) -> Option<Self> {
        if le_u32(raw, 0) != MAGIC[0] || le_u32(raw, 4) != MAGIC[1] || raw[12] != VERSION {
            return None;
        }
        if CRC32.checksum(&raw[..20]) != le_u32(raw, 20) {
            return None;
        }

        Some(Self {
            length: le_u32(raw, 8),
            area_id: raw[13],
            seq: le_u32(raw, 16),
        })
    }
}
