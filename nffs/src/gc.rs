//! # 垃圾回收
//!
//! 取序号最小的数据区域为源，把索引仍指向其中的记录原样复制到暂存区，
//! 然后擦除源区域，使其成为新的暂存区。
//!
//! 目标区域继承源区域的逻辑区域号。复制完成前掉电，闪存上会同时存在
//! 两个逻辑区域号相同的区域，恢复扫描据此撤销未完成的回收。

use crate::area::AreaRole;
use crate::index::{EntryKind, FlashLoc};
use crate::layout::{AreaHeader, Record, RecordHeader};
use crate::volume::Volume;
use crate::{Error, Result};

impl Volume {
    pub fn gc(&mut self) -> Result<()> {
        let Some(scratch) = self.scratch else {
            log::warn!("gc: no scratch area");
            return Err(Error::OutOfSpace);
        };
        let Some(source) = self.gc_source(scratch) else {
            return Err(Error::OutOfSpace);
        };

        // 没有比源区域更旧的区域时，墓碑所覆盖的旧记录只可能在源区域内
        let oldest = self
            .areas
            .iter()
            .filter(|area| area.role == AreaRole::Data)
            .map(|area| area.seq)
            .min();
        let drop_tombstones = oldest == Some(self.areas[source].seq);

        log::info!(
            "gc: area {source} (seq={}) -> area {scratch} (seq={})",
            self.areas[source].seq,
            self.areas[scratch].seq
        );
        let result = self.collect(source, scratch, drop_tombstones);
        if let Err(err) = result {
            log::error!("gc: aborted: {err}");
            self.fatal = true;
        }
        result
    }

    /// 暂存区容纳得下的最旧数据区域
    fn gc_source(&self, scratch: usize) -> Option<usize> {
        let room = self.areas[scratch].len();
        self.areas
            .iter()
            .enumerate()
            .filter(|(_, area)| area.role == AreaRole::Data && area.len() <= room)
            .min_by_key(|(_, area)| area.seq)
            .map(|(i, _)| i)
    }

    fn collect(&mut self, source: usize, target: usize, drop_tombstones: bool) -> Result<()> {
        if !self.areas[target].is_blank(&self.flash)? {
            let seq = self.max_seq() + 1;
            self.areas[target].erase(&self.flash, seq)?;
        }
        let id = self.areas[source].id;
        self.areas[target].install(&self.flash, id)?;

        let mut moved = 0;
        let mut offset = AreaHeader::SIZE as u32;
        let end = self.areas[source].cur;
        while offset + RecordHeader::SIZE as u32 <= end {
            let mut head = [0; RecordHeader::SIZE];
            self.areas[source].read(&self.flash, offset, &mut head)?;
            // 封存区域中损坏记录之后的内容不属于日志
            let Some(header) = RecordHeader::parse(&head) else {
                break;
            };
            let len = header.record_len() as u32;
            let loc = FlashLoc {
                area: source as u8,
                offset,
            };
            offset += len;

            let Some(entry) = self.table.get(header.id).filter(|entry| entry.loc == loc) else {
                continue;
            };
            if entry.kind == EntryKind::Tombstone && drop_tombstones {
                self.table.remove(header.id);
                continue;
            }

            let raw = self.read_raw(loc)?;
            if Record::decode(&raw).is_none() {
                log::error!("gc: live record {} at {loc:?} is corrupt", header.id);
                return Err(Error::CorruptRecord);
            }
            let at = self.areas[target].append(&self.flash, &raw)?;
            self.table.relocate(
                header.id,
                FlashLoc {
                    area: target as u8,
                    offset: at,
                },
            );
            moved += 1;
        }

        let seq = self.max_seq() + 1;
        self.areas[source].erase(&self.flash, seq)?;
        self.scratch = Some(source);
        self.active = target;

        log::info!(
            "gc: moved {moved} records, area {target} has {} bytes free",
            self.areas[target].free()
        );
        Ok(())
    }
}
