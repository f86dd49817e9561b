//! # 文件数据层
//!
//! 文件内容是其数据块链按顺序的拼接。数据块从不原地修改：
//! 覆盖写入产生同编号、序号加一的新版本，追加写入产生新的数据块。
//!
//! 一次写入先按一个区域的容量切分为若干事务，每个事务的记录在写入前一次性预留空间。
//! 新数据块按从尾到头的顺序写入，掉电时已写入的部分因找不到前驱而在恢复时被丢弃。

use alloc::vec;
use alloc::vec::Vec;

use crate::index::EntryKind;
use crate::layout::{BLOCK_OVERHEAD, BlockMeta, Tombstone};
use crate::volume::Volume;
use crate::{Error, ObjectId, Result};

/// 数据块链上的一环
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Link {
    pub id: ObjectId,
    pub seq: u32,
    pub prev: ObjectId,
    /// 块内数据在文件中的起始偏移
    pub start: u32,
    pub len: u32,
}

impl Link {
    #[inline]
    pub fn end(&self) -> u32 {
        self.start + self.len
    }
}

impl Volume {
    /// 从尾块沿前驱回溯，得到按文件偏移排列的数据块链
    pub fn chain(&self, inode: ObjectId) -> Result<Vec<Link>> {
        let last = match self.table.live(inode).map(|entry| entry.kind) {
            Some(EntryKind::Inode { dir: false, last_block, .. }) => last_block,
            Some(EntryKind::Inode { dir: true, .. }) => return Err(Error::IsADirectory),
            _ => return Err(Error::NotFound),
        };

        let mut links = Vec::new();
        let mut cur = last;
        while let Some(id) = cur {
            if links.len() > self.table.block_count() {
                log::error!("file {inode}: block chain loops");
                return Err(Error::CorruptRecord);
            }
            let block = self.read_block(id)?;
            if block.owner != inode {
                log::error!("file {inode}: block {id} belongs to {}", block.owner);
                return Err(Error::CorruptRecord);
            }
            let seq = self.table.get(id).map_or(0, |entry| entry.seq);
            links.push(Link {
                id,
                seq,
                prev: block.prev,
                start: 0,
                len: block.data_len as u32,
            });
            cur = block.prev.some();
        }

        links.reverse();
        let mut start = 0;
        for link in &mut links {
            link.start = start;
            start += link.len;
        }
        Ok(links)
    }

    pub fn file_len(&self, inode: ObjectId) -> Result<u32> {
        Ok(self.chain(inode)?.last().map_or(0, Link::end))
    }

    /// 读取 `offset` 开始的数据，返回读到的字节数
    pub fn read_file(&self, inode: ObjectId, offset: u32, buf: &mut [u8]) -> Result<usize> {
        let chain = self.chain(inode)?;
        let mut done = 0;
        for link in chain.iter().filter(|link| link.end() > offset) {
            if done == buf.len() {
                break;
            }
            let pos = offset + done as u32;
            let from = pos - link.start;
            let n = ((link.len - from) as usize).min(buf.len() - done);
            self.read_block_data(link.id, from, &mut buf[done..done + n])?;
            done += n;
        }
        Ok(done)
    }

    fn block_data(&self, link: &Link) -> Result<Vec<u8>> {
        let mut data = vec![0; link.len as usize];
        self.read_block_data(link.id, 0, &mut data)?;
        Ok(data)
    }

    /// 在 `offset` 处写入，`offset` 不能超过文件长度。
    ///
    /// 写入前先确认全部事务都能预留到空间、所需的数据块编号都能分配，
    /// 任何一项不满足时不写闪存。
    pub fn write_file(&mut self, inode: ObjectId, offset: u32, data: &[u8]) -> Result<()> {
        let chain = self.chain(inode)?;
        let size = chain.last().map_or(0, Link::end);
        if offset > size || offset as u64 + data.len() as u64 > u32::MAX as u64 {
            return Err(Error::OutOfRange);
        }
        if data.is_empty() {
            return Ok(());
        }

        let txns = self.plan_write(&chain, offset, data)?;
        self.check_space(&txns.lens())?;
        let mut ids = self.alloc_blocks(txns.appended())?.into_iter();

        let mut prev = chain.last().map_or(ObjectId::NONE, |tail| tail.id);
        let count = txns.groups.len();
        for group in txns.groups {
            let mut rewrites: Vec<(BlockMeta, Vec<u8>)> = Vec::new();
            let mut appends: Vec<(BlockMeta, Vec<u8>)> = Vec::new();
            for piece in group {
                match piece {
                    Piece::Rewrite(link, content) => {
                        rewrites.push((version(inode, &link, content.len()), content));
                    }
                    Piece::Append(content) => {
                        let id = ids.next().ok_or(Error::ResourceExhausted)?;
                        let meta = BlockMeta {
                            id,
                            seq: 0,
                            owner: inode,
                            prev,
                            data_len: content.len() as u16,
                        };
                        appends.push((meta, content));
                        prev = id;
                    }
                }
            }

            let new_tail = appends.last().map(|(meta, _)| meta.id);
            // 覆盖在前，新块从尾到头
            appends.reverse();
            rewrites.append(&mut appends);
            self.put_blocks(&rewrites)?;
            if let Some(tail) = new_tail {
                self.table.set_last_block(inode, Some(tail));
            }
        }

        log::debug!(
            "file {inode}: wrote {} bytes at {offset} in {count} transactions",
            data.len()
        );
        Ok(())
    }

    /// 把写入拆成数据块记录，再按一个区域的容量分组
    fn plan_write(&self, chain: &[Link], offset: u32, data: &[u8]) -> Result<Txns> {
        let block_max = self.block_max();
        let mut txns = Txns::new(self.area_capacity() as usize);
        let mut consumed = 0;

        // 覆盖已有数据块
        for link in chain.iter().filter(|link| link.end() > offset) {
            if consumed == data.len() {
                break;
            }
            let pos = offset + consumed as u32;
            let from = (pos - link.start) as usize;
            let n = (link.len as usize - from).min(data.len() - consumed);
            let mut content = self.block_data(link)?;
            content[from..from + n].copy_from_slice(&data[consumed..consumed + n]);
            consumed += n;
            txns.push(Piece::Rewrite(*link, content));
        }

        let rest = &data[consumed..];
        if rest.is_empty() {
            return Ok(txns);
        }
        match chain.last() {
            Some(tail) if tail.len as usize + rest.len() <= block_max => {
                // 整段并入尾块，只写一条记录
                let mut content = match txns.pop() {
                    Some(Piece::Rewrite(link, content)) if link.id == tail.id => content,
                    other => {
                        if let Some(piece) = other {
                            txns.push(piece);
                        }
                        self.block_data(tail)?
                    }
                };
                content.extend_from_slice(rest);
                txns.push(Piece::Rewrite(*tail, content));
            }
            _ => {
                for piece in rest.chunks(block_max) {
                    txns.push(Piece::Append(piece.to_vec()));
                }
            }
        }
        Ok(txns)
    }

    /// 截断到 `len` 字节。从尾部开始逐块写墓碑，每一步都是合法的较短文件。
    pub fn truncate_file(&mut self, inode: ObjectId, len: u32) -> Result<()> {
        let chain = self.chain(inode)?;
        let size = chain.last().map_or(0, Link::end);
        if len > size {
            return Err(Error::OutOfRange);
        }

        let cut: Vec<&Link> = chain
            .iter()
            .rev()
            .take_while(|link| link.end() > len)
            .collect();
        let lens: Vec<usize> = cut
            .iter()
            .map(|link| {
                if link.start >= len {
                    Tombstone::LEN
                } else {
                    BLOCK_OVERHEAD + (len - link.start) as usize
                }
            })
            .collect();
        self.check_space(&lens)?;

        for link in cut {
            if link.start >= len {
                self.put_tombstone(link.id)?;
                self.table.set_last_block(inode, link.prev.some());
            } else {
                let mut content = self.block_data(link)?;
                content.truncate((len - link.start) as usize);
                self.put_blocks(&[(version(inode, link, content.len()), content)])?;
            }
        }

        log::debug!("file {inode}: truncated from {size} to {len}");
        Ok(())
    }

    /// 文件被删除后，其数据块随属主一同失效
    pub fn forget_chain(&mut self, chain: &[Link]) {
        for link in chain {
            self.table.remove(link.id);
            self.cache.forget(link.id);
        }
    }
}

/// 一次写入产生的一条数据块记录
#[derive(Debug)]
enum Piece {
    /// 已有数据块的新版本
    Rewrite(Link, Vec<u8>),
    /// 接在链尾的新数据块
    Append(Vec<u8>),
}

impl Piece {
    fn record_len(&self) -> usize {
        let (Self::Rewrite(_, data) | Self::Append(data)) = self;
        BLOCK_OVERHEAD + data.len()
    }
}

/// 按区域容量分组的记录，每组是一次预留、一个事务
#[derive(Debug)]
struct Txns {
    capacity: usize,
    /// 最后一组的剩余容量
    budget: usize,
    groups: Vec<Vec<Piece>>,
}

impl Txns {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            budget: 0,
            groups: Vec::new(),
        }
    }

    /// 单条记录总能放进一个空区域
    fn push(&mut self, piece: Piece) {
        let cost = piece.record_len();
        if cost > self.budget {
            self.groups.push(Vec::new());
            self.budget = self.capacity;
        }
        self.budget = self.budget.saturating_sub(cost);
        if let Some(group) = self.groups.last_mut() {
            group.push(piece);
        }
    }

    fn pop(&mut self) -> Option<Piece> {
        let piece = self.groups.last_mut()?.pop()?;
        self.budget += piece.record_len();
        Some(piece)
    }

    fn lens(&self) -> Vec<usize> {
        self.groups
            .iter()
            .map(|group| group.iter().map(Piece::record_len).sum())
            .collect()
    }

    fn appended(&self) -> usize {
        self.groups
            .iter()
            .flatten()
            .filter(|piece| matches!(piece, Piece::Append(_)))
            .count()
    }
}

/// 数据块的下一个版本
fn version(owner: ObjectId, link: &Link, len: usize) -> BlockMeta {
    BlockMeta {
        id: link.id,
        seq: link.seq + 1,
        owner,
        prev: link.prev,
        data_len: len as u16,
    }
}
