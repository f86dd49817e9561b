#![allow(dead_code)]

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::{Arc, Mutex};

use nffs::{Access, AreaDesc, Config, DirEntryType, FlashDevice, FlashError, Nffs, Result};

type FlashResult<T> = std::result::Result<T, FlashError>;

/// 内存中的闪存片，只接受向擦除态字节写入，可在写入若干字节后模拟掉电
pub struct RamFlash {
    inner: Mutex<RamFlashInner>,
}

struct RamFlashInner {
    bytes: Vec<u8>,
    /// 掉电前还能写入的字节数
    budget: Option<usize>,
    powered: bool,
    written: usize,
}

impl RamFlash {
    pub fn new(len: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(RamFlashInner {
                bytes: vec![0xFF; len],
                budget: None,
                powered: true,
                written: 0,
            }),
        })
    }

    /// 再写入 `bytes` 字节后掉电，跨越界限的那次写入只落下前一部分
    pub fn cut_power_after(&self, bytes: usize) {
        self.inner.lock().unwrap().budget = Some(bytes);
    }

    pub fn restore_power(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.budget = None;
        inner.powered = true;
    }

    /// 累计写入的字节数
    pub fn written(&self) -> usize {
        self.inner.lock().unwrap().written
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.inner.lock().unwrap().bytes.clone()
    }

    pub fn bytes(&self, desc: AreaDesc) -> Vec<u8> {
        let inner = self.inner.lock().unwrap();
        let start = desc.offset as usize;
        inner.bytes[start..start + desc.length as usize].to_vec()
    }

    /// 绕过编程规则直接改写一个字节
    pub fn poke(&self, address: u32, value: u8) {
        self.inner.lock().unwrap().bytes[address as usize] = value;
    }
}

impl RamFlashInner {
    fn range(&self, flash_id: u8, address: u32, len: usize) -> FlashResult<Range<usize>> {
        if flash_id != 0 {
            return Err(FlashError::NoSuchFlash);
        }
        let start = address as usize;
        let end = start + len;
        if end > self.bytes.len() {
            return Err(FlashError::OutOfBounds);
        }
        if !self.powered {
            return Err(FlashError::Io);
        }
        Ok(start..end)
    }
}

impl FlashDevice for RamFlash {
    fn read(&self, flash_id: u8, address: u32, buf: &mut [u8]) -> FlashResult<()> {
        let inner = self.inner.lock().unwrap();
        let range = inner.range(flash_id, address, buf.len())?;
        buf.copy_from_slice(&inner.bytes[range]);
        Ok(())
    }

    fn write(&self, flash_id: u8, address: u32, buf: &[u8]) -> FlashResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let range = inner.range(flash_id, address, buf.len())?;
        if inner.bytes[range.clone()].iter().any(|&b| b != 0xFF) {
            return Err(FlashError::NotErased);
        }

        let n = inner.budget.map_or(buf.len(), |budget| budget.min(buf.len()));
        inner.bytes[range.start..range.start + n].copy_from_slice(&buf[..n]);
        inner.written += n;
        if let Some(budget) = inner.budget {
            let left = budget - n;
            inner.budget = Some(left);
            if left == 0 {
                inner.powered = false;
            }
        }

        if n < buf.len() {
            Err(FlashError::Io)
        } else {
            Ok(())
        }
    }

    fn erase(&self, flash_id: u8, address: u32, len: u32) -> FlashResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let range = inner.range(flash_id, address, len as usize)?;
        inner.bytes[range].fill(0xFF);
        Ok(())
    }
}

/// `n` 个首尾相接、长度为 `len` 的区域
pub fn areas(n: u32, len: u32) -> Vec<AreaDesc> {
    (0..n).map(|i| AreaDesc::new(0, i * len, len)).collect()
}

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 在 `flash` 上建立新格式化的文件系统
pub fn formatted(flash: &Arc<RamFlash>, descs: &[AreaDesc], config: Config) -> Nffs {
    init_log();
    let fs = Nffs::init(flash.clone(), config).unwrap();
    fs.format(descs).unwrap();
    fs
}

/// 模拟重启：同一片闪存上的新实例
pub fn reboot(flash: &Arc<RamFlash>, descs: &[AreaDesc], config: Config) -> Nffs {
    flash.restore_power();
    let fs = Nffs::init(flash.clone(), config).unwrap();
    fs.detect(descs).unwrap();
    fs
}

pub fn write_file(fs: &Nffs, path: &str, data: &[u8]) -> Result<()> {
    let file = fs.open(path, Access::Write)?;
    let result = fs.write(file, data);
    result.and(fs.close(file))
}

pub fn append_file(fs: &Nffs, path: &str, data: &[u8]) -> Result<()> {
    let file = fs.open(path, Access::Append)?;
    let result = fs.write(file, data);
    result.and(fs.close(file))
}

pub fn read_file(fs: &Nffs, path: &str) -> Result<Vec<u8>> {
    let file = fs.open(path, Access::Read)?;
    let mut data = vec![0; fs.file_len(file)? as usize];
    let n = fs.read(file, &mut data)?;
    fs.close(file)?;
    data.truncate(n);
    Ok(data)
}

/// 整棵目录树：路径到文件内容，目录为 `None`
pub fn tree(fs: &Nffs) -> BTreeMap<String, Option<Vec<u8>>> {
    let mut tree = BTreeMap::new();
    let mut pending = vec![String::new()];
    while let Some(dir) = pending.pop() {
        let handle = fs.opendir(if dir.is_empty() { "/" } else { dir.as_str() }).unwrap();
        while let Some(entry) = fs.readdir(handle).unwrap() {
            let path = format!("{dir}/{}", entry.name);
            match entry.ty {
                DirEntryType::Directory => {
                    tree.insert(path.clone(), None);
                    pending.push(path);
                }
                DirEntryType::Regular => {
                    let data = read_file(fs, &path).unwrap();
                    tree.insert(path, Some(data));
                }
            }
        }
        fs.closedir(handle).unwrap();
    }
    tree
}

/// 可辨认的测试数据
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
