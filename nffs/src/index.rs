//! # 对象索引层
//!
//! 每个对象编号映射到其最新版本记录在闪存上的位置。
//! 索引常驻内存，只保存遍历目录树与数据块链所需的最少信息，
//! 名字、数据块长度等元数据交给[对象缓存](crate::object_cache)。

use alloc::collections::BTreeMap;
use alloc::collections::btree_map;

use crate::ObjectId;

/// 记录在闪存上的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FlashLoc {
    /// 区域下标
    pub area: u8,
    /// 区域内偏移
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind {
    Inode {
        parent: ObjectId,
        dir: bool,
        /// 数据块链的尾块
        last_block: Option<ObjectId>,
    },
    Block,
    /// 已删除的对象，保留到墓碑记录被回收为止
    Tombstone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ObjectEntry {
    pub loc: FlashLoc,
    /// 记录在闪存上占用的字节数
    pub len: u32,
    pub seq: u32,
    pub kind: EntryKind,
}

impl ObjectEntry {
    #[inline]
    pub fn is_live(&self) -> bool {
        self.kind != EntryKind::Tombstone
    }
}

#[derive(Debug, Default)]
pub(crate) struct ObjectTable {
    map: BTreeMap<ObjectId, ObjectEntry>,
    inodes: usize,
    blocks: usize,
}

impl ObjectTable {
    #[inline]
    pub fn get(&self, id: ObjectId) -> Option<&ObjectEntry> {
        self.map.get(&id)
    }

    /// 只返回未被删除的对象
    #[inline]
    pub fn live(&self, id: ObjectId) -> Option<&ObjectEntry> {
        self.get(id).filter(|entry| entry.is_live())
    }

    pub fn insert(&mut self, id: ObjectId, entry: ObjectEntry) {
        if let Some(old) = self.map.insert(id, entry) {
            self.uncount(old.kind);
        }
        self.count(entry.kind);
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<ObjectEntry> {
        let old = self.map.remove(&id)?;
        self.uncount(old.kind);
        Some(old)
    }

    /// 更新记录位置，用于垃圾回收搬移
    pub fn relocate(&mut self, id: ObjectId, loc: FlashLoc) {
        if let Some(entry) = self.map.get_mut(&id) {
            entry.loc = loc;
        }
    }

    pub fn set_last_block(&mut self, inode: ObjectId, block: Option<ObjectId>) {
        if let Some(EntryKind::Inode { last_block, .. }) =
            self.map.get_mut(&inode).map(|entry| &mut entry.kind)
        {
            *last_block = block;
        }
    }

    pub fn iter(&self) -> btree_map::Iter<'_, ObjectId, ObjectEntry> {
        self.map.iter()
    }

    /// 目录下的所有子节点
    pub fn children(&self, dir: ObjectId) -> impl Iterator<Item = ObjectId> + '_ {
        self.map.iter().filter_map(move |(&id, entry)| match entry.kind {
            EntryKind::Inode { parent, .. } if parent == dir && id != ObjectId::ROOT => Some(id),
            _ => None,
        })
    }

    #[inline]
    pub fn inode_count(&self) -> usize {
        self.inodes
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks
    }

    fn count(&mut self, kind: EntryKind) {
        match kind {
            EntryKind::Inode { .. } => self.inodes += 1,
            EntryKind::Block => self.blocks += 1,
            EntryKind::Tombstone => (),
        }
    }

    fn uncount(&mut self, kind: EntryKind) {
        match kind {
            EntryKind::Inode { .. } => self.inodes -= 1,
            EntryKind::Block => self.blocks -= 1,
            EntryKind::Tombstone => (),
        }
    }
}
