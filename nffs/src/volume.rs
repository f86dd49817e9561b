//! # 卷管理层
//!
//! 管理全部区域、对象索引与对象缓存。
//!
//! 数据区域按序号升序依次写满：活动区域之后的数据区域总是空的，
//! 新写入的记录所在区域的序号不小于任何更早写入的记录。
//! 活动区域写满且没有空区域可用时，由[垃圾回收](crate::gc)腾出空间。

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::iter;

use crate::area::{Area, AreaRole, Flash};
use crate::index::{EntryKind, FlashLoc, ObjectEntry, ObjectTable};
use crate::layout::{
    AreaHeader, BLOCK_DATA_OFFSET, BLOCK_OVERHEAD, BlockMeta, InodeRecord, Record, RecordHeader,
    Tombstone,
};
use crate::object_cache::{CachedBlock, CachedInode, ObjectCache};
use crate::{AreaDesc, Config, Error, InodeFlag, MAX_AREAS, ObjectId, Result};

/// 区域至少要容纳区域头和一条最长的索引节点记录
const MIN_AREA_LEN: u32 = (AreaHeader::SIZE + InodeRecord::MAX_LEN) as u32;

pub(crate) struct Volume {
    pub flash: Flash,
    pub config: Config,
    pub areas: Vec<Area>,
    /// 暂存区下标
    pub scratch: Option<usize>,
    /// 活动区域下标
    pub active: usize,
    pub table: ObjectTable,
    pub cache: ObjectCache,
    pub next_inode: ObjectId,
    pub next_block: ObjectId,
    /// 垃圾回收途中出现介质错误
    pub fatal: bool,
}

pub(crate) fn validate_areas(descs: &[AreaDesc]) -> Result<()> {
    if !(2..=MAX_AREAS).contains(&descs.len()) {
        log::error!("{} areas given, expect 2..={MAX_AREAS}", descs.len());
        return Err(Error::InvalidArgument);
    }

    for (i, desc) in descs.iter().enumerate() {
        if desc.length < MIN_AREA_LEN || desc.offset.checked_add(desc.length).is_none() {
            log::error!("area {i} is malformed: {desc:?}");
            return Err(Error::InvalidArgument);
        }
        if descs[..i].iter().any(|other| other.overlaps(desc)) {
            log::error!("area {i} overlaps another area");
            return Err(Error::InvalidArgument);
        }
    }

    Ok(())
}

impl Volume {
    pub fn new(flash: Flash, config: Config, areas: Vec<Area>) -> Self {
        let cache = ObjectCache::new(&config);
        Self {
            flash,
            config,
            areas,
            scratch: None,
            active: 0,
            table: ObjectTable::default(),
            cache,
            next_inode: ObjectId::ROOT.succ(),
            next_block: ObjectId::BLOCK_MIN,
            fatal: false,
        }
    }

    /// 擦除全部区域，建立只有根目录的空文件系统
    pub fn format(flash: Flash, config: Config, descs: &[AreaDesc]) -> Result<Self> {
        validate_areas(descs)?;

        // 最大的区域留作暂存区，同样大小时取最后一个
        let scratch = descs
            .iter()
            .enumerate()
            .max_by_key(|(_, desc)| desc.length)
            .map_or(descs.len() - 1, |(i, _)| i);

        let mut areas: Vec<Area> = descs.iter().map(|desc| Area::scratch(*desc, 0)).collect();
        let order = (0..descs.len())
            .filter(|&i| i != scratch)
            .chain(iter::once(scratch));
        for (seq, i) in order.enumerate() {
            let area = &mut areas[i];
            area.erase(&flash, seq as u32)?;
            if i != scratch {
                area.install(&flash, i as u8)?;
            }
        }

        let mut volume = Self::new(flash, config, areas);
        volume.scratch = Some(scratch);
        volume.active = if scratch == 0 { 1 } else { 0 };

        let root = InodeRecord {
            id: ObjectId::ROOT,
            seq: 0,
            parent: ObjectId::NONE,
            flags: InodeFlag::Directory.into(),
            links: 1,
            name: String::new(),
        };
        volume.put_inode(&root, None)?;

        log::info!("format: {} areas, scratch area {scratch}", descs.len());
        Ok(volume)
    }

    pub fn descs(&self) -> Vec<AreaDesc> {
        self.areas.iter().map(|area| area.desc).collect()
    }

    /// 任一区域在写入区域头后可容纳的记录字节数
    pub fn area_capacity(&self) -> u32 {
        self.areas
            .iter()
            .map(|area| area.len() - AreaHeader::SIZE as u32)
            .min()
            .unwrap_or(0)
    }

    /// 单个数据块记录承载的最大数据字节数
    pub fn block_max(&self) -> usize {
        let fit = self.area_capacity() as usize - BLOCK_OVERHEAD;
        (self.config.block_max_data as usize)
            .min(fit)
            .min(u16::MAX as usize - BLOCK_OVERHEAD)
    }

    pub fn data_area_count(&self) -> usize {
        self.areas
            .iter()
            .filter(|area| area.role == AreaRole::Data)
            .count()
    }

    pub fn max_seq(&self) -> u32 {
        self.areas.iter().map(|area| area.seq).max().unwrap_or(0)
    }
}

/* 读取对象 */
impl Volume {
    pub fn read_raw(&self, loc: FlashLoc) -> Result<Vec<u8>> {
        let area = &self.areas[loc.area as usize];
        let mut head = [0; RecordHeader::SIZE];
        area.read(&self.flash, loc.offset, &mut head)?;
        let header = RecordHeader::parse(&head).ok_or(Error::CorruptRecord)?;

        let mut raw = vec![0; header.record_len()];
        area.read(&self.flash, loc.offset, &mut raw)?;
        Ok(raw)
    }

    pub fn read_inode(&self, id: ObjectId) -> Result<CachedInode> {
        if let Some(inode) = self.cache.inodes.lock().get(id) {
            return Ok(inode);
        }

        let entry = self.table.live(id).ok_or(Error::NotFound)?;
        let raw = self.read_raw(entry.loc)?;
        let Some(Record::Inode(record)) = Record::decode(&raw).filter(|record| record.id() == id)
        else {
            log::error!("inode {id} at {:?} is unreadable", entry.loc);
            return Err(Error::CorruptRecord);
        };

        let inode = CachedInode {
            name: record.name,
            flags: record.flags,
            links: record.links,
        };
        self.cache.inodes.lock().insert(id, inode.clone());
        Ok(inode)
    }

    pub fn read_block(&self, id: ObjectId) -> Result<CachedBlock> {
        if let Some(block) = self.cache.blocks.lock().get(id) {
            return Ok(block);
        }

        let loc = self.block_loc(id)?;
        let mut raw = [0; BLOCK_DATA_OFFSET];
        self.areas[loc.area as usize].read(&self.flash, loc.offset, &mut raw)?;
        let Some(meta) = BlockMeta::parse_prefix(&raw).filter(|meta| meta.id == id) else {
            log::error!("block {id} at {loc:?} is unreadable");
            return Err(Error::CorruptRecord);
        };

        let block = CachedBlock {
            owner: meta.owner,
            prev: meta.prev,
            data_len: meta.data_len,
        };
        self.cache.blocks.lock().insert(id, block);
        Ok(block)
    }

    /// 读取数据块中从 `from` 开始的数据
    pub fn read_block_data(&self, id: ObjectId, from: u32, buf: &mut [u8]) -> Result<()> {
        let loc = self.block_loc(id)?;
        let offset = loc.offset + BLOCK_DATA_OFFSET as u32 + from;
        self.areas[loc.area as usize].read(&self.flash, offset, buf)
    }

    fn block_loc(&self, id: ObjectId) -> Result<FlashLoc> {
        match self.table.get(id) {
            Some(entry) if entry.kind == EntryKind::Block => Ok(entry.loc),
            _ => {
                log::error!("block {id} is missing from the index");
                Err(Error::CorruptRecord)
            }
        }
    }
}

/* 分配与写入 */
impl Volume {
    /// 保证活动区域能连续容纳 `len` 字节，必要时切换到空区域或回收垃圾
    pub fn reserve(&mut self, len: usize) -> Result<()> {
        let len = len as u32;
        if self.areas[self.active].free() >= len {
            return Ok(());
        }
        if len > self.area_capacity() {
            return Err(Error::OutOfSpace);
        }

        if let Some(next) = self.next_empty(len) {
            log::debug!("area {} is full, switch to area {next}", self.active);
            self.active = next;
            return Ok(());
        }

        // 每个数据区域至多回收一次
        for _ in 0..self.data_area_count() {
            self.gc()?;
            if self.areas[self.active].free() >= len {
                return Ok(());
            }
        }

        log::warn!("no space for {len} bytes");
        Err(Error::OutOfSpace)
    }

    fn next_empty(&self, len: u32) -> Option<usize> {
        let seq = self.areas[self.active].seq;
        self.areas
            .iter()
            .enumerate()
            .filter(|(_, area)| area.is_empty() && area.seq > seq && area.free() >= len)
            .min_by_key(|(_, area)| area.seq)
            .map(|(i, _)| i)
    }

    /// 追加一条记录，调用者须先 [`reserve`](Self::reserve)
    pub fn append(&mut self, raw: &[u8]) -> Result<FlashLoc> {
        let area = &mut self.areas[self.active];
        if area.free() < raw.len() as u32 {
            return Err(Error::OutOfSpace);
        }
        let offset = area.append(&self.flash, raw)?;
        Ok(FlashLoc {
            area: self.active as u8,
            offset,
        })
    }

    pub fn alloc_inode(&mut self) -> Result<ObjectId> {
        if self.table.inode_count() >= self.config.max_inodes || !self.next_inode.is_inode() {
            return Err(Error::ResourceExhausted);
        }
        let id = self.next_inode;
        self.next_inode = id.succ();
        Ok(id)
    }

    /// 一次分配 `n` 个数据块编号，不足时一个也不分配
    pub fn alloc_blocks(&mut self, n: usize) -> Result<Vec<ObjectId>> {
        let room = u32::from(ObjectId::NONE) - u32::from(self.next_block);
        if self.table.block_count() + n > self.config.max_blocks || n > room as usize {
            return Err(Error::ResourceExhausted);
        }
        let ids = iter::successors(Some(self.next_block), |id| Some(id.succ()))
            .take(n)
            .collect();
        self.next_block = ObjectId::new(u32::from(self.next_block) + n as u32);
        Ok(ids)
    }

    /// 写入索引节点的新版本
    pub fn put_inode(&mut self, record: &InodeRecord, last_block: Option<ObjectId>) -> Result<()> {
        let raw = record.encode();
        self.reserve(raw.len())?;
        self.append_inode(record, &raw, last_block)
    }

    /// 追加已编码的索引节点记录，调用者须先预留空间
    pub fn append_inode(
        &mut self,
        record: &InodeRecord,
        raw: &[u8],
        last_block: Option<ObjectId>,
    ) -> Result<()> {
        let loc = self.append(raw)?;

        let kind = EntryKind::Inode {
            parent: record.parent,
            dir: record.is_dir(),
            last_block,
        };
        self.table.insert(
            record.id,
            ObjectEntry {
                loc,
                len: raw.len() as u32,
                seq: record.seq,
                kind,
            },
        );
        self.cache.inodes.lock().insert(
            record.id,
            CachedInode {
                name: record.name.clone(),
                flags: record.flags,
                links: record.links,
            },
        );
        Ok(())
    }

    /// 删除对象：写入版本号更高的墓碑
    pub fn put_tombstone(&mut self, id: ObjectId) -> Result<()> {
        self.reserve(Tombstone::LEN)?;
        self.append_tombstone(id)
    }

    /// 追加墓碑，调用者须先预留 [`Tombstone::LEN`] 字节
    pub fn append_tombstone(&mut self, id: ObjectId) -> Result<()> {
        let seq = self.table.get(id).map_or(0, |entry| entry.seq + 1);
        let raw = Tombstone { id, seq }.encode();
        let loc = self.append(&raw)?;

        self.table.insert(
            id,
            ObjectEntry {
                loc,
                len: raw.len() as u32,
                seq,
                kind: EntryKind::Tombstone,
            },
        );
        self.cache.forget(id);
        log::debug!("tombstone {id} seq={seq}");
        Ok(())
    }

    /// 写入一批数据块记录，要么全部进入索引，要么一条也不进入
    pub fn put_blocks(&mut self, blocks: &[(BlockMeta, Vec<u8>)]) -> Result<()> {
        let raws: Vec<Vec<u8>> = blocks
            .iter()
            .map(|(meta, data)| meta.encode(data))
            .collect();
        self.reserve(raws.iter().map(Vec::len).sum())?;

        let mut locs = Vec::with_capacity(raws.len());
        for raw in &raws {
            locs.push(self.append(raw)?);
        }

        for (((meta, _), raw), loc) in blocks.iter().zip(&raws).zip(locs) {
            self.table.insert(
                meta.id,
                ObjectEntry {
                    loc,
                    len: raw.len() as u32,
                    seq: meta.seq,
                    kind: EntryKind::Block,
                },
            );
            self.cache.blocks.lock().insert(
                meta.id,
                CachedBlock {
                    owner: meta.owner,
                    prev: meta.prev,
                    data_len: meta.data_len,
                },
            );
        }
        Ok(())
    }
}

/* 空间预估 */

/// 演算用的区域状态
#[derive(Debug, Clone, Copy)]
struct Room {
    len: u32,
    seq: u32,
    cur: u32,
    role: AreaRole,
    /// 索引指向本区域的记录字节数，含墓碑
    live: u32,
    /// 其中墓碑的字节数
    tombstones: u32,
}

impl Room {
    #[inline]
    fn free(&self) -> u32 {
        self.len - self.cur
    }
}

/// 按 [`Volume::reserve`] 与垃圾回收的规则推演区域的变化，不访问闪存
#[derive(Debug)]
struct SpacePlan {
    rooms: Vec<Room>,
    scratch: Option<usize>,
    active: usize,
    capacity: u32,
    rounds: usize,
}

impl SpacePlan {
    fn reserve(&mut self, len: u32) -> bool {
        if !self.make_room(len) {
            return false;
        }
        let room = &mut self.rooms[self.active];
        room.cur += len;
        room.live += len;
        true
    }

    fn make_room(&mut self, len: u32) -> bool {
        if self.rooms[self.active].free() >= len {
            return true;
        }
        if len > self.capacity {
            return false;
        }

        let seq = self.rooms[self.active].seq;
        let next = (0..self.rooms.len())
            .filter(|&i| {
                let room = &self.rooms[i];
                room.role == AreaRole::Data
                    && room.cur == AreaHeader::SIZE as u32
                    && room.seq > seq
                    && room.free() >= len
            })
            .min_by_key(|&i| self.rooms[i].seq);
        if let Some(next) = next {
            self.active = next;
            return true;
        }

        for _ in 0..self.rounds {
            if !self.gc() {
                return false;
            }
            if self.rooms[self.active].free() >= len {
                return true;
            }
        }
        false
    }

    fn data(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.rooms.len()).filter(|&i| self.rooms[i].role == AreaRole::Data)
    }

    fn gc(&mut self) -> bool {
        let Some(target) = self.scratch else {
            return false;
        };
        let to = self.rooms[target];
        let Some(source) = self
            .data()
            .filter(|&i| self.rooms[i].len <= to.len)
            .min_by_key(|&i| self.rooms[i].seq)
        else {
            return false;
        };
        let oldest = self.data().map(|i| self.rooms[i].seq).min();
        let seq = self.rooms.iter().map(|room| room.seq).max().unwrap_or(0) + 1;

        // 源区域是最旧的区域时，墓碑不随之搬移
        let from = self.rooms[source];
        let tombstones = if oldest == Some(from.seq) { 0 } else { from.tombstones };
        let kept = from.live - from.tombstones + tombstones;
        self.rooms[target] = Room {
            cur: AreaHeader::SIZE as u32 + kept,
            role: AreaRole::Data,
            live: kept,
            tombstones,
            ..to
        };
        self.rooms[source] = Room {
            seq,
            cur: 0,
            role: AreaRole::Scratch,
            live: 0,
            tombstones: 0,
            ..from
        };
        self.scratch = Some(source);
        self.active = target;
        true
    }
}

impl Volume {
    /// 不写闪存，判断依次预留 `lens` 中的每一段能否全部成功。
    ///
    /// 被这次修改取代的旧版本仍按存活计算。
    pub fn check_space(&self, lens: &[usize]) -> Result<()> {
        let mut rooms: Vec<Room> = self
            .areas
            .iter()
            .map(|area| Room {
                len: area.len(),
                seq: area.seq,
                cur: area.cur,
                role: area.role,
                live: 0,
                tombstones: 0,
            })
            .collect();
        for (_, entry) in self.table.iter() {
            let room = &mut rooms[entry.loc.area as usize];
            room.live += entry.len;
            if entry.kind == EntryKind::Tombstone {
                room.tombstones += entry.len;
            }
        }

        let mut plan = SpacePlan {
            rooms,
            scratch: self.scratch,
            active: self.active,
            capacity: self.area_capacity(),
            rounds: self.data_area_count(),
        };
        if lens.iter().all(|&len| plan.reserve(len as u32)) {
            return Ok(());
        }

        log::warn!(
            "no space for {} bytes in {} reservations",
            lens.iter().sum::<usize>(),
            lens.len()
        );
        Err(Error::OutOfSpace)
    }
}
