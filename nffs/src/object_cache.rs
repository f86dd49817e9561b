//! # 对象缓存层
//!
//! 解码索引节点需要读出整条记录，遍历数据块链需要逐块读取记录头，
//! 因此我们在内存中缓存最近用到的对象元数据。
//!
//! 缓存对使用者透明：未命中时按对象索引记录的位置直接读取闪存，
//! 容量为零时等同于不缓存。缓存项只是闪存记录的镜像，随时可以丢弃。

use alloc::collections::VecDeque;
use alloc::string::String;

use enumflags2::BitFlags;
use spin::Mutex;

use crate::{Config, InodeFlag, ObjectId};

/// 缓存的索引节点元数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CachedInode {
    pub name: String,
    pub flags: BitFlags<InodeFlag>,
    pub links: u16,
}

/// 缓存的数据块元数据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CachedBlock {
    pub owner: ObjectId,
    pub prev: ObjectId,
    pub data_len: u16,
}

#[derive(Debug)]
pub(crate) struct ObjectCache {
    pub inodes: Mutex<LruCache<CachedInode>>,
    pub blocks: Mutex<LruCache<CachedBlock>>,
}

impl ObjectCache {
    pub fn new(config: &Config) -> Self {
        Self {
            inodes: Mutex::new(LruCache::new(config.inode_cache_size)),
            blocks: Mutex::new(LruCache::new(config.block_cache_size)),
        }
    }

    /// 对象被删除或其记录被新版本取代
    pub fn forget(&self, id: ObjectId) {
        if id.is_block() {
            self.blocks.lock().remove(id);
        } else {
            self.inodes.lock().remove(id);
        }
    }
}

/// 按编号索引的最近最少使用缓存，队尾为最近使用
#[derive(Debug)]
pub(crate) struct LruCache<V> {
    capacity: usize,
    queue: VecDeque<(ObjectId, V)>,
}

impl<V: Clone> LruCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: VecDeque::with_capacity(capacity),
        }
    }

    pub fn get(&mut self, id: ObjectId) -> Option<V> {
        let index = self.queue.iter().position(|(cid, _)| *cid == id)?;
        let entry = self.queue.remove(index)?;
        let value = entry.1.clone();
        self.queue.push_back(entry);
        Some(value)
    }

    pub fn insert(&mut self, id: ObjectId, value: V) {
        if self.capacity == 0 {
            return;
        }
        self.remove(id);
        // 触及上限，踢走最久未用的一项
        if self.queue.len() == self.capacity {
            self.queue.pop_front();
        }
        self.queue.push_back((id, value));
    }

    pub fn remove(&mut self, id: ObjectId) {
        self.queue.retain(|(cid, _)| *cid != id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.queue.len()
    }
}
