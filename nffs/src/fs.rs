//! # 对外接口层
//!
//! [`Nffs`] 是文件系统实例的全部状态，没有任何全局变量。
//!
//! 一把读写锁保护整个卷：创建、写入、改名、删除、截断、格式化与挂载独占，
//! 查找、读取与列目录共享。句柄池与对象缓存另有内部互斥锁，共享锁下也能更新。

use alloc::sync::Arc;
use alloc::vec::Vec;

use enumflags2::BitFlags;
use spin::{Mutex, RwLock};

use crate::area::{AreaRole, Flash};
use crate::handle::{HandlePool, OpenDir, OpenFile};
use crate::volume::{Volume, validate_areas};
use crate::{
    Access, AreaDesc, Config, DirEntry, DirHandle, Error, FileHandle, FlashDevice, Result, Stat,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// 已配置，尚未挂载
    Initialized,
    /// 正在扫描闪存
    Detecting,
    /// 闪存上没有文件系统
    FormatRequired,
    Ready,
    /// 内存状态无法与闪存重新对齐，只能重新挂载或格式化
    Fatal,
}

/// 区域的诊断信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreaInfo {
    pub desc: AreaDesc,
    /// 逻辑区域号
    pub id: u8,
    pub seq: u32,
    /// 已写入的字节数，含区域头
    pub used: u32,
    pub role: AreaRole,
}

pub struct Nffs {
    inner: RwLock<Inner>,
}

struct Inner {
    state: State,
    flash: Flash,
    config: Config,
    volume: Option<Volume>,
    files: Mutex<HandlePool<OpenFile>>,
    dirs: Mutex<HandlePool<OpenDir>>,
}

impl Inner {
    fn volume(&self) -> Result<&Volume> {
        match (self.state, &self.volume) {
            (State::Ready, Some(volume)) => Ok(volume),
            _ => Err(Error::NotReady),
        }
    }

    fn volume_mut(&mut self) -> Result<&mut Volume> {
        match (self.state, &mut self.volume) {
            (State::Ready, Some(volume)) => Ok(volume),
            _ => Err(Error::NotReady),
        }
    }

    /// 执行一次修改。介质错误可能使内存与闪存不一致，此时重新扫描闪存。
    fn mutate<T>(&mut self, op: impl FnOnce(&mut Volume) -> Result<T>) -> Result<T> {
        let volume = self.volume_mut()?;
        let result = op(&mut *volume);
        if let Err(err) = &result {
            if volume.fatal {
                self.fail();
            } else if matches!(err, Error::Media(_)) {
                self.resync();
            }
        }
        result
    }

    fn resync(&mut self) {
        let Some(volume) = self.volume.take() else {
            return;
        };
        log::warn!("media error during update, rescanning");

        match Volume::restore(self.flash.clone(), self.config.clone(), &volume.descs()) {
            Ok(volume) => self.volume = Some(volume),
            Err(err) => {
                log::error!("rescan failed: {err}");
                self.fail();
            }
        }
    }

    fn fail(&mut self) {
        log::error!("file system is now unusable");
        self.state = State::Fatal;
        self.volume = None;
        self.reset_handles();
    }

    fn reset_handles(&mut self) {
        self.files.get_mut().clear();
        self.dirs.get_mut().clear();
    }

    /// 取出句柄的 `(inode, pos, access)`，持有写锁时使用
    fn open_file(&self, handle: FileHandle) -> Result<OpenFile> {
        let mut files = self.files.lock();
        let file = files.get_mut(handle)?;
        Ok(OpenFile {
            inode: file.inode,
            pos: file.pos,
            access: file.access,
        })
    }
}

/* 生命周期 */
impl Nffs {
    /// 检查配置并建立实例，不访问闪存
    pub fn init(dev: Arc<dyn FlashDevice>, config: Config) -> Result<Self> {
        config.validate()?;
        log::info!("init: {config:?}");

        Ok(Self {
            inner: RwLock::new(Inner {
                state: State::Initialized,
                flash: Flash::new(dev, config.media_retries),
                files: Mutex::new(HandlePool::new(config.max_open_files)),
                dirs: Mutex::new(HandlePool::new(config.max_open_dirs)),
                config,
                volume: None,
            }),
        })
    }

    /// 扫描给定区域，重建内存状态
    pub fn detect(&self, descs: &[AreaDesc]) -> Result<()> {
        validate_areas(descs)?;
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        inner.reset_handles();
        inner.volume = None;
        inner.state = State::Detecting;

        match Volume::restore(inner.flash.clone(), inner.config.clone(), descs) {
            Ok(volume) => {
                inner.volume = Some(volume);
                inner.state = State::Ready;
                Ok(())
            }
            Err(Error::InvalidFormat) => {
                log::info!("detect: no file system found");
                inner.state = State::FormatRequired;
                Err(Error::InvalidFormat)
            }
            Err(err) => {
                log::error!("detect: {err}");
                inner.state = State::Fatal;
                Err(err)
            }
        }
    }

    /// 擦除全部区域并建立空文件系统
    pub fn format(&self, descs: &[AreaDesc]) -> Result<()> {
        validate_areas(descs)?;
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        inner.reset_handles();
        inner.volume = None;

        match Volume::format(inner.flash.clone(), inner.config.clone(), descs) {
            Ok(volume) => {
                inner.volume = Some(volume);
                inner.state = State::Ready;
                Ok(())
            }
            Err(err) => {
                log::error!("format: {err}");
                inner.state = State::FormatRequired;
                Err(err)
            }
        }
    }

    #[inline]
    pub fn ready(&self) -> bool {
        self.state() == State::Ready
    }

    #[inline]
    pub fn state(&self) -> State {
        self.inner.read().state
    }

    pub fn areas(&self) -> Result<Vec<AreaInfo>> {
        let inner = self.inner.read();
        let volume = inner.volume()?;
        Ok(volume
            .areas
            .iter()
            .map(|area| AreaInfo {
                desc: area.desc,
                id: area.id,
                seq: area.seq,
                used: area.cur,
                role: area.role,
            })
            .collect())
    }
}

/* 命名空间 */
impl Nffs {
    pub fn mkdir(&self, path: &str) -> Result<()> {
        self.inner.write().mutate(|volume| volume.create(path, true))?;
        Ok(())
    }

    pub fn unlink(&self, path: &str) -> Result<()> {
        self.inner.write().mutate(|volume| volume.unlink(path))
    }

    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.inner.write().mutate(|volume| volume.rename(from, to))
    }

    pub fn stat(&self, path: &str) -> Result<Stat> {
        let inner = self.inner.read();
        let volume = inner.volume()?;
        volume.stat(volume.lookup(path)?)
    }
}

/* 文件句柄 */
impl Nffs {
    /// 打开文件。请求 `Write` 或 `Append` 时文件不存在则创建。
    pub fn open(&self, path: &str, access: impl Into<BitFlags<Access>>) -> Result<FileHandle> {
        let access = access.into();
        if access.is_empty() || (access.contains(Access::Truncate) && !access.contains(Access::Write))
        {
            return Err(Error::InvalidArgument);
        }
        let writable = access.intersects(Access::Write | Access::Append);

        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let found = inner.volume()?.lookup(path);
        if inner.files.lock().is_full() {
            return Err(Error::ResourceExhausted);
        }

        let inode = match found {
            Ok(inode) => inode,
            Err(Error::NotFound) if writable => {
                inner.mutate(|volume| volume.create(path, false))?
            }
            Err(err) => return Err(err),
        };
        if inner.volume()?.is_dir(inode) {
            return Err(Error::IsADirectory);
        }
        if access.contains(Access::Truncate) {
            inner.mutate(|volume| volume.truncate_file(inode, 0))?;
        }

        let pos = if access.contains(Access::Append) {
            inner.volume()?.file_len(inode)?
        } else {
            0
        };
        let handle: FileHandle = inner.files.lock().insert(OpenFile { inode, pos, access })?;
        log::debug!("open {path:?} ({inode}) as {handle:?}");
        Ok(handle)
    }

    pub fn close(&self, handle: FileHandle) -> Result<()> {
        self.inner.read().files.lock().remove(handle)?;
        Ok(())
    }

    /// 从当前位置读取，返回读到的字节数，到达文件末尾时为 `0`
    pub fn read(&self, handle: FileHandle, buf: &mut [u8]) -> Result<usize> {
        let inner = self.inner.read();
        let volume = inner.volume()?;
        let mut files = inner.files.lock();
        let file = files.get_mut(handle)?;
        if !file.access.contains(Access::Read) {
            return Err(Error::AccessDenied);
        }

        let n = volume.read_file(file.inode, file.pos, buf)?;
        file.pos += n as u32;
        Ok(n)
    }

    /// 在当前位置写入；以 `Append` 打开时总是写到文件末尾
    pub fn write(&self, handle: FileHandle, data: &[u8]) -> Result<()> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        inner.volume()?;
        let file = inner.open_file(handle)?;
        if !file.access.intersects(Access::Write | Access::Append) {
            return Err(Error::AccessDenied);
        }

        let offset = if file.access.contains(Access::Append) {
            inner.volume()?.file_len(file.inode)?
        } else {
            file.pos
        };
        inner.mutate(|volume| volume.write_file(file.inode, offset, data))?;

        inner.files.lock().get_mut(handle)?.pos = offset + data.len() as u32;
        Ok(())
    }

    /// 移动到 `pos`，不能越过文件末尾
    pub fn seek(&self, handle: FileHandle, pos: u32) -> Result<()> {
        let inner = self.inner.read();
        let volume = inner.volume()?;
        let mut files = inner.files.lock();
        let file = files.get_mut(handle)?;
        if pos > volume.file_len(file.inode)? {
            return Err(Error::OutOfRange);
        }
        file.pos = pos;
        Ok(())
    }

    pub fn tell(&self, handle: FileHandle) -> Result<u32> {
        let inner = self.inner.read();
        inner.volume()?;
        let pos = inner.files.lock().get_mut(handle)?.pos;
        Ok(pos)
    }

    pub fn file_len(&self, handle: FileHandle) -> Result<u32> {
        let inner = self.inner.read();
        let volume = inner.volume()?;
        let inode = inner.files.lock().get_mut(handle)?.inode;
        volume.file_len(inode)
    }

    /// 截断到 `len` 字节，打开同一文件的句柄位置随之收缩
    pub fn truncate(&self, handle: FileHandle, len: u32) -> Result<()> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        inner.volume()?;
        let file = inner.open_file(handle)?;
        if !file.access.intersects(Access::Write | Access::Append) {
            return Err(Error::AccessDenied);
        }

        inner.mutate(|volume| volume.truncate_file(file.inode, len))?;
        inner
            .files
            .get_mut()
            .values_mut()
            .filter(|open| open.inode == file.inode)
            .for_each(|open| open.pos = open.pos.min(len));
        Ok(())
    }
}

/* 目录句柄 */
impl Nffs {
    /// 打开目录，记下此刻的子项
    pub fn opendir(&self, path: &str) -> Result<DirHandle> {
        let inner = self.inner.read();
        let volume = inner.volume()?;
        let dir = volume.lookup(path)?;
        if !volume.is_dir(dir) {
            return Err(Error::NotADirectory);
        }

        let entries = volume.children(dir);
        inner.dirs.lock().insert(OpenDir {
            dir,
            entries,
            next: 0,
        })
    }

    /// 返回下一个目录项，已被删除的子项跳过
    pub fn readdir(&self, handle: DirHandle) -> Result<Option<DirEntry>> {
        let inner = self.inner.read();
        let volume = inner.volume()?;
        let mut dirs = inner.dirs.lock();
        let dir = dirs.get_mut(handle)?;

        while let Some(&id) = dir.entries.get(dir.next) {
            dir.next += 1;
            match volume.dir_entry(id) {
                Ok(entry) => return Ok(Some(entry)),
                Err(Error::NotFound) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    pub fn rewinddir(&self, handle: DirHandle) -> Result<()> {
        let inner = self.inner.read();
        let volume = inner.volume()?;
        let mut dirs = inner.dirs.lock();
        let dir = dirs.get_mut(handle)?;
        dir.entries = volume.children(dir.dir);
        dir.next = 0;
        Ok(())
    }

    pub fn closedir(&self, handle: DirHandle) -> Result<()> {
        self.inner.read().dirs.lock().remove(handle)?;
        Ok(())
    }
}
