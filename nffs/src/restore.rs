//! # 掉电恢复
//!
//! 闪存是唯一可信的状态来源。挂载时按区域序号升序、区域内按偏移升序扫描全部记录，
//! 同一编号取序号最大的版本，序号相同时后扫描到的胜出。
//!
//! 扫描遇到校验失败的记录即认为该区域的日志到此为止，并封存该区域。

use alloc::collections::{BTreeMap, BTreeSet, btree_map};
use alloc::vec;
use alloc::vec::Vec;

use flash_dev::ERASED;

use crate::area::{Area, AreaRole, Flash};
use crate::index::{EntryKind, FlashLoc, ObjectEntry};
use crate::layout::{AreaHeader, Record, RecordHeader};
use crate::volume::{Volume, validate_areas};
use crate::{AreaDesc, Config, Error, ObjectId, Result};

#[derive(Debug, Clone, Copy)]
enum Kind {
    Inode { parent: ObjectId, dir: bool },
    Block { owner: ObjectId, prev: ObjectId },
    Tombstone,
}

/// 扫描中某编号当前胜出的记录
#[derive(Debug, Clone, Copy)]
struct Found {
    loc: FlashLoc,
    len: u32,
    seq: u32,
    kind: Kind,
}

#[derive(Debug, Default)]
struct Scan {
    found: BTreeMap<ObjectId, Found>,
    max_inode: Option<ObjectId>,
    max_block: Option<ObjectId>,
    records: usize,
    corrupt: usize,
}

impl Scan {
    fn offer(&mut self, record: &Record, loc: FlashLoc, len: u32) {
        let id = record.id();
        if id.is_block() {
            self.max_block = self.max_block.max(Some(id));
        } else if id.is_inode() {
            self.max_inode = self.max_inode.max(Some(id));
        }
        self.records += 1;

        let (seq, kind) = match record {
            Record::Inode(inode) => (
                inode.seq,
                Kind::Inode {
                    parent: inode.parent,
                    dir: inode.is_dir(),
                },
            ),
            Record::Block(block) => (
                block.seq,
                Kind::Block {
                    owner: block.owner,
                    prev: block.prev,
                },
            ),
            Record::Tombstone(tombstone) => (tombstone.seq, Kind::Tombstone),
        };
        let found = Found {
            loc,
            len,
            seq,
            kind,
        };

        match self.found.entry(id) {
            btree_map::Entry::Vacant(entry) => {
                entry.insert(found);
            }
            btree_map::Entry::Occupied(mut entry) => {
                if seq >= entry.get().seq {
                    log::debug!("{id}: seq {seq} supersedes seq {}", entry.get().seq);
                    entry.insert(found);
                }
            }
        }
    }
}

/// 扫描得到、尚未确认在链上的数据块
#[derive(Debug, Clone, Copy)]
struct LooseBlock {
    loc: FlashLoc,
    len: u32,
    seq: u32,
    owner: ObjectId,
    prev: ObjectId,
}

enum Step {
    End,
    Corrupt,
    Record(Record, u32),
}

impl Volume {
    /// 扫描闪存重建卷
    pub fn restore(flash: Flash, config: Config, descs: &[AreaDesc]) -> Result<Self> {
        validate_areas(descs)?;

        let mut areas = Vec::with_capacity(descs.len());
        for (i, desc) in descs.iter().enumerate() {
            let area = Area::scratch(*desc, 0);
            let mut raw = [0; AreaHeader::SIZE];
            area.read(&flash, 0, &mut raw)?;
            match AreaHeader::decode(&raw) {
                Some(header) if header.length == desc.length => {
                    areas.push(Area::data(*desc, header.area_id, header.seq));
                }
                Some(header) => {
                    log::warn!(
                        "area {i}: header claims {} bytes, descriptor has {}",
                        header.length,
                        desc.length
                    );
                    areas.push(area);
                }
                None => areas.push(area),
            }
        }
        if areas.iter().all(|area| area.role != AreaRole::Data) {
            log::warn!("restore: no valid area header");
            return Err(Error::InvalidFormat);
        }

        let mut volume = Self::new(flash, config, areas);
        volume.undo_interrupted_gc()?;
        volume.pick_scratch();
        let scan = volume.scan()?;
        let (records, corrupt) = (scan.records, scan.corrupt);
        volume.rebuild(scan)?;
        volume.pick_active();

        log::info!(
            "restore: {records} records ({corrupt} corrupt), {} inodes, {} blocks, active area {}",
            volume.table.inode_count(),
            volume.table.block_count(),
            volume.active
        );
        Ok(volume)
    }

    /// 两个数据区域的逻辑区域号相同，说明回收在擦除源区域前中断，
    /// 序号较大的一方是未完成的目标区域，擦除它即可回到回收前的状态
    fn undo_interrupted_gc(&mut self) -> Result<()> {
        for i in 0..self.areas.len() {
            if self.areas[i].role != AreaRole::Data {
                continue;
            }
            let twin = (0..self.areas.len()).find(|&j| {
                j != i && self.areas[j].role == AreaRole::Data && self.areas[j].id == self.areas[i].id
            });
            if let Some(j) = twin {
                let target = if self.areas[i].seq > self.areas[j].seq { i } else { j };
                log::warn!(
                    "area {target}: unfinished gc of logical area {}, rolling back",
                    self.areas[target].id
                );
                let seq = self.max_seq() + 1;
                self.areas[target].erase(&self.flash, seq)?;
            }
        }
        Ok(())
    }

    /// 没有区域头的区域中最大的一个作为暂存区
    fn pick_scratch(&mut self) {
        let mut seq = self
            .areas
            .iter()
            .filter(|area| area.role == AreaRole::Data)
            .map(|area| area.seq)
            .max()
            .unwrap_or(0);

        let candidates: Vec<usize> = (0..self.areas.len())
            .filter(|&i| self.areas[i].role == AreaRole::Scratch)
            .collect();
        for &i in &candidates {
            seq += 1;
            self.areas[i].seq = seq;
        }

        self.scratch = candidates
            .iter()
            .copied()
            .max_by_key(|&i| self.areas[i].len());
        match self.scratch {
            None => log::warn!("restore: no scratch area, gc disabled"),
            Some(scratch) if candidates.len() > 1 => log::warn!(
                "restore: {} areas without header, only area {scratch} is used",
                candidates.len()
            ),
            Some(_) => (),
        }
    }

    fn scan(&mut self) -> Result<Scan> {
        let mut order: Vec<usize> = (0..self.areas.len())
            .filter(|&i| self.areas[i].role == AreaRole::Data)
            .collect();
        order.sort_by_key(|&i| (self.areas[i].seq, i));

        let mut scan = Scan::default();
        for index in order {
            let mut offset = AreaHeader::SIZE as u32;
            loop {
                match self.next_record(index, offset)? {
                    Step::End => {
                        self.areas[index].cur = offset;
                        break;
                    }
                    Step::Corrupt => {
                        log::warn!("area {index}: corrupt record at {offset:#x}, sealing area");
                        scan.corrupt += 1;
                        self.areas[index].seal();
                        break;
                    }
                    Step::Record(record, len) => {
                        let loc = FlashLoc {
                            area: index as u8,
                            offset,
                        };
                        scan.offer(&record, loc, len);
                        offset += len;
                    }
                }
            }
        }

        Ok(scan)
    }

    fn next_record(&self, index: usize, offset: u32) -> Result<Step> {
        let area = &self.areas[index];
        // 剩余空间放不下记录头，之后也无法再写入
        if offset + RecordHeader::SIZE as u32 > area.len() {
            return Ok(Step::End);
        }

        let mut head = [0; RecordHeader::SIZE];
        area.read(&self.flash, offset, &mut head)?;
        if head[0] == ERASED {
            return Ok(Step::End);
        }
        let Some(header) = RecordHeader::parse(&head) else {
            return Ok(Step::Corrupt);
        };
        let len = header.record_len() as u32;
        if offset as u64 + len as u64 > area.len() as u64 {
            return Ok(Step::Corrupt);
        }

        let mut raw = vec![0; len as usize];
        area.read(&self.flash, offset, &mut raw)?;
        Ok(match Record::decode(&raw) {
            Some(record) => Step::Record(record, len),
            None => Step::Corrupt,
        })
    }

    fn rebuild(&mut self, scan: Scan) -> Result<()> {
        let mut blocks = BTreeMap::new();
        for (&id, found) in &scan.found {
            let kind = match found.kind {
                Kind::Inode { parent, dir } => EntryKind::Inode {
                    parent,
                    dir,
                    last_block: None,
                },
                Kind::Tombstone => EntryKind::Tombstone,
                Kind::Block { owner, prev } => {
                    let block = LooseBlock {
                        loc: found.loc,
                        len: found.len,
                        seq: found.seq,
                        owner,
                        prev,
                    };
                    blocks.insert(id, block);
                    continue;
                }
            };
            self.table.insert(
                id,
                ObjectEntry {
                    loc: found.loc,
                    len: found.len,
                    seq: found.seq,
                    kind,
                },
            );
        }

        self.check_tree()?;
        self.link_blocks(blocks);

        if self.table.inode_count() > self.config.max_inodes
            || self.table.block_count() > self.config.max_blocks
        {
            log::error!(
                "restore: {} inodes and {} blocks exceed the configured limits",
                self.table.inode_count(),
                self.table.block_count()
            );
            return Err(Error::ResourceExhausted);
        }

        self.next_inode = scan.max_inode.map_or(ObjectId::ROOT.succ(), ObjectId::succ);
        self.next_block = scan.max_block.map_or(ObjectId::BLOCK_MIN, ObjectId::succ);
        Ok(())
    }

    /// 根目录存在，且其余索引节点都能经由目录逐级回到根目录
    fn check_tree(&self) -> Result<()> {
        if !matches!(
            self.table.live(ObjectId::ROOT).map(|entry| entry.kind),
            Some(EntryKind::Inode { dir: true, .. })
        ) {
            log::error!("restore: root directory is missing");
            return Err(Error::CorruptRecord);
        }

        let limit = self.table.inode_count();
        for (&id, entry) in self.table.iter() {
            let EntryKind::Inode { parent, .. } = entry.kind else {
                continue;
            };
            if id == ObjectId::ROOT {
                continue;
            }

            let mut cur = parent;
            for _ in 0..limit {
                if cur == ObjectId::ROOT {
                    break;
                }
                match self.table.live(cur).map(|entry| entry.kind) {
                    Some(EntryKind::Inode {
                        parent, dir: true, ..
                    }) => cur = parent,
                    _ => {
                        log::error!("restore: inode {id} is detached from root");
                        return Err(Error::CorruptRecord);
                    }
                }
            }
            if cur != ObjectId::ROOT {
                log::error!("restore: inode {id} sits in a directory cycle");
                return Err(Error::CorruptRecord);
            }
        }

        Ok(())
    }

    /// 丢弃失去属主或前驱的数据块，为每个文件确定尾块
    fn link_blocks(&mut self, mut blocks: BTreeMap<ObjectId, LooseBlock>) {
        let table = &self.table;
        blocks.retain(|id, block| {
            let alive = matches!(
                table.live(block.owner).map(|entry| entry.kind),
                Some(EntryKind::Inode { dir: false, .. })
            );
            if !alive {
                log::debug!("block {id}: owner {} is gone", block.owner);
            }
            alive
        });

        // 前驱缺失会沿链传递
        loop {
            let orphans: Vec<ObjectId> = blocks
                .iter()
                .filter(|(_, block)| {
                    block.prev.some().is_some_and(|prev| {
                        blocks
                            .get(&prev)
                            .is_none_or(|pred| pred.owner != block.owner)
                    })
                })
                .map(|(&id, _)| id)
                .collect();
            if orphans.is_empty() {
                break;
            }
            for id in orphans {
                log::warn!("block {id}: predecessor is missing, discarded");
                blocks.remove(&id);
            }
        }

        let mut by_owner: BTreeMap<ObjectId, Vec<ObjectId>> = BTreeMap::new();
        for (&id, block) in &blocks {
            by_owner.entry(block.owner).or_default().push(id);
        }

        for (owner, ids) in by_owner {
            let referenced: BTreeSet<ObjectId> = ids.iter().map(|id| blocks[id].prev).collect();
            // 分叉时保留编号最大的尾块
            let Some(tail) = ids.iter().copied().filter(|id| !referenced.contains(id)).max()
            else {
                log::warn!("file {owner}: block chain has no tail, discarded");
                continue;
            };

            let mut chain = Vec::with_capacity(ids.len());
            let mut cur = Some(tail);
            while let Some(id) = cur {
                if chain.len() == ids.len() {
                    log::warn!("file {owner}: block chain loops, discarded");
                    chain.clear();
                    break;
                }
                chain.push(id);
                cur = blocks[&id].prev.some();
            }
            if chain.is_empty() {
                continue;
            }
            if chain.len() < ids.len() {
                log::warn!(
                    "file {owner}: {} blocks off the chain, discarded",
                    ids.len() - chain.len()
                );
            }

            for id in chain {
                let block = &blocks[&id];
                self.table.insert(
                    id,
                    ObjectEntry {
                        loc: block.loc,
                        len: block.len,
                        seq: block.seq,
                        kind: EntryKind::Block,
                    },
                );
            }
            self.table.set_last_block(owner, Some(tail));
        }
    }

    /// 序号最大的非空数据区域继续承接写入
    fn pick_active(&mut self) {
        let mut data: Vec<usize> = (0..self.areas.len())
            .filter(|&i| self.areas[i].role == AreaRole::Data)
            .collect();
        data.sort_by_key(|&i| self.areas[i].seq);

        self.active = data
            .iter()
            .rev()
            .find(|&&i| !self.areas[i].is_empty())
            .or(data.first())
            .copied()
            .unwrap_or(0);
    }
}
