mod cli;

use std::fs;
use std::fs::OpenOptions;
use std::io;
use std::sync::Arc;

use clap::Parser;
use cli::Cli;
use nffs::{Access, AreaDesc, Config, Nffs};
use nffs_fuse::FlashFile;
use typed_bytesize::ByteSizeIec;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    println!("source={:?}\nout={:?}", cli.source, cli.out);

    let area_len = u32::try_from(ByteSizeIec::kib(cli.area_kib).0).map_err(io::Error::other)?;
    let image_len = area_len
        .checked_mul(cli.areas)
        .ok_or_else(|| io::Error::other("image exceeds 4 GiB"))?;

    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&cli.out)?;
    let flash = Arc::new(FlashFile::create(fd, image_len)?);

    let descs: Vec<AreaDesc> = (0..cli.areas)
        .map(|i| AreaDesc::new(0, i * area_len, area_len))
        .collect();
    let fs = Nffs::init(flash, Config::default()).map_err(io::Error::other)?;
    fs.format(&descs).map_err(io::Error::other)?;

    for entry in fs::read_dir(&cli.source)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry
            .file_name()
            .into_string()
            .map_err(|name| io::Error::other(format!("file name {name:?} is not UTF-8")))?;
        let data = fs::read(entry.path())?;
        log::info!("file={name:?} size={}", data.len());

        let file = fs
            .open(&format!("/{name}"), Access::Write)
            .map_err(io::Error::other)?;
        fs.write(file, &data).map_err(io::Error::other)?;
        fs.close(file).map_err(io::Error::other)?;
    }

    for area in fs.areas().map_err(io::Error::other)? {
        log::debug!("{area:?}");
    }
    Ok(())
}
