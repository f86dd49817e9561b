//! # 命名空间层
//!
//! 目录项不是独立的对象，而是子节点自身的 `(parent, name)` 属性：
//! 列目录即在索引中筛选父目录编号，改名即写入子节点的新版本。

use alloc::string::String;
use alloc::vec::Vec;

use enumflags2::BitFlags;

use crate::file::Link;
use crate::index::EntryKind;
use crate::layout::{InodeRecord, Tombstone};
use crate::path::Path;
use crate::volume::Volume;
use crate::{DirEntry, DirEntryType, Error, InodeFlag, ObjectId, Result, Stat};

impl Volume {
    pub fn lookup(&self, path: &str) -> Result<ObjectId> {
        self.walk(&path.components()?)
    }

    fn walk(&self, names: &[&str]) -> Result<ObjectId> {
        let mut cur = ObjectId::ROOT;
        for name in names {
            if !self.is_dir(cur) {
                return Err(Error::NotADirectory);
            }
            cur = self.find_child(cur, name)?.ok_or(Error::NotFound)?;
        }
        Ok(cur)
    }

    /// 返回路径的 `(父目录, 文件名)`，父目录必须存在
    fn locate<'a>(&self, path: &'a str) -> Result<(ObjectId, &'a str)> {
        let names = path.components()?;
        let Some((name, parents)) = names.split_last() else {
            // 根目录没有父目录
            return Err(Error::InvalidArgument);
        };
        let parent = self.walk(parents)?;
        if !self.is_dir(parent) {
            return Err(Error::NotADirectory);
        }
        Ok((parent, name))
    }

    pub fn find_child(&self, dir: ObjectId, name: &str) -> Result<Option<ObjectId>> {
        for id in self.table.children(dir) {
            if self.read_inode(id)?.name == name {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    pub fn children(&self, dir: ObjectId) -> Vec<ObjectId> {
        self.table.children(dir).collect()
    }

    #[inline]
    pub fn is_dir(&self, id: ObjectId) -> bool {
        matches!(
            self.table.live(id).map(|entry| entry.kind),
            Some(EntryKind::Inode { dir: true, .. })
        )
    }

    fn parent_of(&self, id: ObjectId) -> Option<ObjectId> {
        match self.table.live(id)?.kind {
            EntryKind::Inode { parent, .. } => parent.some(),
            _ => None,
        }
    }

    pub fn create(&mut self, path: &str, dir: bool) -> Result<ObjectId> {
        let (parent, name) = self.locate(path)?;
        if self.find_child(parent, name)?.is_some() {
            return Err(Error::AlreadyExists);
        }

        let id = self.alloc_inode()?;
        let flags = if dir {
            InodeFlag::Directory.into()
        } else {
            BitFlags::empty()
        };
        let record = InodeRecord {
            id,
            seq: 0,
            parent,
            flags,
            links: 1,
            name: String::from(name),
        };
        self.put_inode(&record, None)?;

        log::debug!("create {path:?} as {id}");
        Ok(id)
    }

    /// 删除文件或空目录
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let id = self.lookup(path)?;
        if id == ObjectId::ROOT {
            return Err(Error::InvalidArgument);
        }
        if self.is_dir(id) && self.table.children(id).next().is_some() {
            return Err(Error::DirectoryNotEmpty);
        }

        self.reserve(Tombstone::LEN)?;
        self.remove_inode(id)?;
        log::debug!("unlink {path:?} ({id})");
        Ok(())
    }

    /// 唯一的目录项消失后链接数归零，写入墓碑。调用者须先预留墓碑的空间。
    fn remove_inode(&mut self, id: ObjectId) -> Result<()> {
        let chain: Vec<Link> = if self.is_dir(id) {
            Vec::new()
        } else {
            self.chain(id)?
        };
        self.append_tombstone(id)?;
        self.forget_chain(&chain);
        Ok(())
    }

    /// 改名或移动；目标为已存在的文件时将其替换
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let id = self.lookup(from)?;
        if id == ObjectId::ROOT {
            return Err(Error::InvalidArgument);
        }
        let (parent, name) = self.locate(to)?;

        // 目录不能移动到自己的子树下
        if self.is_dir(id) {
            let mut cur = Some(parent);
            while let Some(dir) = cur {
                if dir == id {
                    return Err(Error::InvalidArgument);
                }
                cur = self.parent_of(dir);
            }
        }

        let replaced = match self.find_child(parent, name)? {
            Some(existing) if existing == id => return Ok(()),
            Some(existing) if self.is_dir(existing) || self.is_dir(id) => {
                return Err(Error::AlreadyExists);
            }
            other => other,
        };

        let Some(&entry) = self.table.live(id) else {
            return Err(Error::NotFound);
        };
        let EntryKind::Inode { last_block, .. } = entry.kind else {
            return Err(Error::CorruptRecord);
        };
        let inode = self.read_inode(id)?;
        let record = InodeRecord {
            id,
            seq: entry.seq + 1,
            parent,
            flags: inode.flags,
            links: inode.links,
            name: String::from(name),
        };
        let raw = record.encode();

        // 被替换文件的墓碑与新版本一次预留，落在同一个区域
        self.reserve(raw.len() + replaced.map_or(0, |_| Tombstone::LEN))?;
        if let Some(existing) = replaced {
            self.remove_inode(existing)?;
        }
        self.append_inode(&record, &raw, last_block)?;

        log::debug!("rename {from:?} -> {to:?} ({id})");
        Ok(())
    }

    pub fn stat(&self, id: ObjectId) -> Result<Stat> {
        let inode = self.read_inode(id)?;
        let (mode, blocks, size) = if inode.flags.contains(InodeFlag::Directory) {
            (DirEntryType::Directory, 0, 0)
        } else {
            let chain = self.chain(id)?;
            let size = chain.last().map_or(0, Link::end);
            (DirEntryType::Regular, chain.len() as u32, size)
        };

        Ok(Stat {
            inode: id.into(),
            mode,
            links: inode.links,
            blocks,
            size,
        })
    }

    pub fn dir_entry(&self, id: ObjectId) -> Result<DirEntry> {
        let inode = self.read_inode(id)?;
        let ty = if inode.flags.contains(InodeFlag::Directory) {
            DirEntryType::Directory
        } else {
            DirEntryType::Regular
        };

        Ok(DirEntry {
            inode: id.into(),
            ty,
            name: inode.name,
        })
    }
}
