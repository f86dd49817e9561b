//! 宿主机工具：用普通文件模拟一片 NOR 闪存


use std::cell::RefCell;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use flash_dev::{ERASED, FlashDevice, FlashError};
use send_wrapper::SendWrapper;

/// 镜像文件只模拟编号为 0 的一片闪存
const FLASH_ID: u8 = 0;

/// 擦除时每次写入的字节数
const ERASE_CHUNK: usize = 4096;

/// 以镜像文件为介质的闪存驱动，与真实闪存一样只能向擦除态字节写入
#[derive(Debug)]
pub struct FlashFile {
    inner: SendWrapper<RefCell<File>>,
    len: u32,
}

impl FlashFile {
    /// 打开已有的镜像，文件长度即闪存容量
    pub fn open(fd: File) -> io::Result<Self> {
        let len = u32::try_from(fd.metadata()?.len()).map_err(io::Error::other)?;
        Ok(Self {
            inner: SendWrapper::new(RefCell::new(fd)),
            len,
        })
    }

    /// 新建 `len` 字节、全部处于擦除态的镜像
    pub fn create(fd: File, len: u32) -> io::Result<Self> {
        fd.set_len(0)?;
        let flash = Self {
            inner: SendWrapper::new(RefCell::new(fd)),
            len,
        };
        flash.fill(0, len)?;
        Ok(flash)
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.len
    }

    fn fill(&self, address: u32, len: u32) -> io::Result<()> {
        let mut file = self.inner.borrow_mut();
        file.seek(SeekFrom::Start(address as u64))?;
        let chunk = [ERASED; ERASE_CHUNK];
        let mut left = len as usize;
        while left > 0 {
            let n = left.min(ERASE_CHUNK);
            file.write_all(&chunk[..n])?;
            left -= n;
        }
        Ok(())
    }

    fn check(&self, flash_id: u8, address: u32, len: usize) -> Result<(), FlashError> {
        if flash_id != FLASH_ID {
            return Err(FlashError::NoSuchFlash);
        }
        if address as u64 + len as u64 > self.len as u64 {
            return Err(FlashError::OutOfBounds);
        }
        Ok(())
    }
}

fn media(err: io::Error) -> FlashError {
    log::error!("flash image: {err}");
    FlashError::Io
}

impl FlashDevice for FlashFile {
    fn read(&self, flash_id: u8, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        self.check(flash_id, address, buf.len())?;
        let mut file = self.inner.borrow_mut();
        file.seek(SeekFrom::Start(address as u64)).map_err(media)?;
        file.read_exact(buf).map_err(media)
    }

    fn write(&self, flash_id: u8, address: u32, buf: &[u8]) -> Result<(), FlashError> {
        let mut old = vec![0; buf.len()];
        self.read(flash_id, address, &mut old)?;
        if !flash_dev::is_erased(&old) {
            return Err(FlashError::NotErased);
        }

        let mut file = self.inner.borrow_mut();
        file.seek(SeekFrom::Start(address as u64)).map_err(media)?;
        file.write_all(buf).map_err(media)
    }

    fn erase(&self, flash_id: u8, address: u32, len: u32) -> Result<(), FlashError> {
        self.check(flash_id, address, len as usize)?;
        self.fill(address, len).map_err(media)
    }
}
