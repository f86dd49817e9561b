mod common;

use common::*;
use nffs::{Access, AreaRole, Config, DirEntryType, Error, MAX_NAME_LEN, Nffs};

fn fresh() -> Nffs {
    let flash = RamFlash::new(4 * 4096);
    formatted(&flash, &areas(4, 4096), Config::default())
}

fn names(fs: &Nffs, path: &str) -> Vec<String> {
    let dir = fs.opendir(path).unwrap();
    let mut names = Vec::new();
    while let Some(entry) = fs.readdir(dir).unwrap() {
        names.push(entry.name);
    }
    fs.closedir(dir).unwrap();
    names
}

#[test]
fn mkdir_and_lookup() {
    let fs = fresh();
    fs.mkdir("/usr").unwrap();
    fs.mkdir("/usr/bin").unwrap();
    write_file(&fs, "/usr/bin/sh", b"#!").unwrap();

    assert_eq!(Err(Error::AlreadyExists), fs.mkdir("/usr"));
    assert_eq!(Err(Error::NotFound), fs.mkdir("/opt/lib"));
    assert_eq!(Err(Error::NotADirectory), fs.mkdir("/usr/bin/sh/x"));
    assert_eq!(Err(Error::InvalidArgument), fs.mkdir("/"));

    // 路径中多余的 `/` 被忽略
    let sh = fs.stat("//usr/bin//sh/").unwrap();
    assert_eq!(DirEntryType::Regular, sh.mode);
    assert_eq!(1, sh.links);
    assert_eq!(2, sh.size);
    assert_eq!(1, sh.blocks);

    // 名字区分大小写
    assert_eq!(Err(Error::NotFound), fs.stat("/USR").map(|_| ()));
    assert_eq!(vec!["usr"], names(&fs, "/"));
    assert_eq!(vec!["bin"], names(&fs, "/usr"));
}

#[test]
fn invalid_names() {
    let fs = fresh();
    assert_eq!(Err(Error::InvalidName), fs.mkdir("relative"));
    assert_eq!(Err(Error::InvalidName), fs.mkdir("/a/../b"));
    assert_eq!(Err(Error::InvalidName), fs.mkdir("/."));

    let long = "n".repeat(MAX_NAME_LEN + 1);
    assert_eq!(Err(Error::InvalidName), fs.mkdir(&format!("/{long}")));
    let longest = "n".repeat(MAX_NAME_LEN);
    fs.mkdir(&format!("/{longest}")).unwrap();
    assert_eq!(vec![longest], names(&fs, "/"));
}

#[test]
fn unlink_files_and_empty_dirs() {
    let fs = fresh();
    fs.mkdir("/d").unwrap();
    write_file(&fs, "/d/f", &pattern(5000, 3)).unwrap();

    assert_eq!(Err(Error::DirectoryNotEmpty), fs.unlink("/d"));
    assert_eq!(Err(Error::InvalidArgument), fs.unlink("/"));
    assert_eq!(Err(Error::NotFound), fs.unlink("/d/g"));

    fs.unlink("/d/f").unwrap();
    assert_eq!(Err(Error::NotFound), fs.stat("/d/f").map(|_| ()));
    fs.unlink("/d").unwrap();
    assert!(names(&fs, "/").is_empty());
}

#[test]
fn rename_moves_entries() {
    let fs = fresh();
    fs.mkdir("/a").unwrap();
    fs.mkdir("/b").unwrap();
    write_file(&fs, "/a/f", b"payload").unwrap();
    let before = fs.stat("/a/f").unwrap();

    fs.rename("/a/f", "/b/g").unwrap();
    assert_eq!(Err(Error::NotFound), fs.stat("/a/f").map(|_| ()));
    let after = fs.stat("/b/g").unwrap();
    assert_eq!(before.inode, after.inode);
    assert_eq!(b"payload".to_vec(), read_file(&fs, "/b/g").unwrap());

    // 同名改名不做任何事
    fs.rename("/b/g", "//b/g").unwrap();

    // 目录连同子树一起移动
    fs.rename("/b", "/a/b").unwrap();
    assert_eq!(b"payload".to_vec(), read_file(&fs, "/a/b/g").unwrap());
}

#[test]
fn rename_refuses_cycles_and_directories() {
    let fs = fresh();
    fs.mkdir("/a").unwrap();
    fs.mkdir("/a/b").unwrap();
    fs.mkdir("/c").unwrap();
    write_file(&fs, "/f", b"f").unwrap();

    assert_eq!(Err(Error::InvalidArgument), fs.rename("/a", "/a/b/a"));
    assert_eq!(Err(Error::InvalidArgument), fs.rename("/a", "/a/x"));
    assert_eq!(Err(Error::InvalidArgument), fs.rename("/", "/x"));
    assert_eq!(Err(Error::AlreadyExists), fs.rename("/a", "/c"));
    assert_eq!(Err(Error::AlreadyExists), fs.rename("/f", "/c"));
    assert_eq!(Err(Error::NotFound), fs.rename("/a", "/missing/a"));
    assert_eq!(Err(Error::NotFound), fs.rename("/missing", "/x"));
}

#[test]
fn rename_replaces_file() {
    let flash = RamFlash::new(4 * 4096);
    let descs = areas(4, 4096);
    let fs = formatted(&flash, &descs, Config::default());
    write_file(&fs, "/new", b"new").unwrap();
    write_file(&fs, "/old", &pattern(3000, 9)).unwrap();

    fs.rename("/new", "/old").unwrap();
    assert_eq!(b"new".to_vec(), read_file(&fs, "/old").unwrap());
    assert_eq!(vec!["old"], names(&fs, "/"));

    let fs = reboot(&flash, &descs, Config::default());
    assert_eq!(b"new".to_vec(), read_file(&fs, "/old").unwrap());
    assert_eq!(vec!["old"], names(&fs, "/"));
}

/// 唯一数据区域的剩余字节数
fn free_bytes(fs: &Nffs) -> usize {
    let info = fs.areas().unwrap();
    let area = info
        .iter()
        .find(|area| area.role == AreaRole::Data)
        .unwrap();
    (area.desc.length - area.used) as usize
}

#[test]
fn failed_rename_keeps_both_files() {
    // 墓碑与无名索引节点记录的长度
    const TOMBSTONE: usize = 16;
    const INODE: usize = 22;

    let flash = RamFlash::new(2 * 4096);
    let descs = areas(2, 4096);
    let fs = formatted(&flash, &descs, Config::default());
    write_file(&fs, "/src", b"src").unwrap();
    write_file(&fs, "/dst", b"dst").unwrap();

    // 用目录填满区域，只留下恰好一条墓碑的空间，且没有可回收的垃圾
    for i in 0.. {
        let free = free_bytes(&fs);
        if free == TOMBSTONE {
            break;
        }
        let room = free - TOMBSTONE - INODE;
        let len = if room >= 225 { 200 } else { room };
        fs.mkdir(&format!("/{i:03}{}", "n".repeat(len - 3))).unwrap();
    }

    assert_eq!(Err(Error::OutOfSpace), fs.rename("/src", "/dst"));
    assert!(fs.ready());
    assert_eq!(b"src".to_vec(), read_file(&fs, "/src").unwrap());
    assert_eq!(b"dst".to_vec(), read_file(&fs, "/dst").unwrap());

    let fs = reboot(&flash, &descs, Config::default());
    assert_eq!(b"src".to_vec(), read_file(&fs, "/src").unwrap());
    assert_eq!(b"dst".to_vec(), read_file(&fs, "/dst").unwrap());
}

#[test]
fn readdir_uses_a_snapshot() {
    let fs = fresh();
    for name in ["/x", "/y", "/z"] {
        write_file(&fs, name, name.as_bytes()).unwrap();
    }

    let dir = fs.opendir("/").unwrap();
    let first = fs.readdir(dir).unwrap().unwrap();
    assert_eq!("x", first.name);
    assert_eq!(DirEntryType::Regular, first.ty);

    // 打开后删除的子项被跳过，新建的子项要等到重新开始才出现
    fs.unlink("/y").unwrap();
    fs.mkdir("/w").unwrap();
    assert_eq!("z", fs.readdir(dir).unwrap().unwrap().name);
    assert!(fs.readdir(dir).unwrap().is_none());

    fs.rewinddir(dir).unwrap();
    let mut seen = Vec::new();
    while let Some(entry) = fs.readdir(dir).unwrap() {
        seen.push((entry.name, entry.ty));
    }
    assert_eq!(
        vec![
            ("x".to_owned(), DirEntryType::Regular),
            ("z".to_owned(), DirEntryType::Regular),
            ("w".to_owned(), DirEntryType::Directory),
        ],
        seen
    );

    fs.closedir(dir).unwrap();
    assert_eq!(Err(Error::InvalidHandle), fs.closedir(dir));
}

#[test]
fn opendir_checks() {
    let fs = fresh();
    write_file(&fs, "/f", b"").unwrap();
    assert_eq!(Err(Error::NotADirectory), fs.opendir("/f").map(|_| ()));
    assert_eq!(Err(Error::NotFound), fs.opendir("/g").map(|_| ()));
    assert_eq!(Err(Error::IsADirectory), fs.open("/", Access::Read).map(|_| ()));

    let handles: Vec<_> = (0..4).map(|_| fs.opendir("/").unwrap()).collect();
    assert_eq!(Err(Error::ResourceExhausted), fs.opendir("/").map(|_| ()));
    fs.closedir(handles[0]).unwrap();
    fs.opendir("/").unwrap();
}

#[test]
fn namespace_survives_remount() {
    let flash = RamFlash::new(4 * 4096);
    let descs = areas(4, 4096);
    let fs = formatted(&flash, &descs, Config::default());
    fs.mkdir("/a").unwrap();
    fs.mkdir("/a/b").unwrap();
    write_file(&fs, "/a/b/f", b"deep").unwrap();
    write_file(&fs, "/a/gone", b"x").unwrap();
    fs.unlink("/a/gone").unwrap();
    fs.rename("/a/b", "/b").unwrap();
    let before = tree(&fs);

    let fs = reboot(&flash, &descs, Config::default());
    assert_eq!(before, tree(&fs));
    assert!(before.contains_key("/b/f"));
    assert!(!before.contains_key("/a/gone"));

    // 新编号不会与重启前分配过的编号冲突
    let old = fs.stat("/b/f").unwrap().inode;
    write_file(&fs, "/n", b"n").unwrap();
    assert!(fs.stat("/n").unwrap().inode > old);
}
