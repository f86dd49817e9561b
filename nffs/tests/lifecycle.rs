mod common;

use common::*;
use nffs::{AreaDesc, AreaRole, Config, Error, Nffs, State};

#[test]
fn init_checks_config() {
    let flash = RamFlash::new(8192);
    let config = Config {
        max_inodes: 0,
        ..Config::default()
    };
    assert!(matches!(
        Nffs::init(flash, config),
        Err(Error::InvalidArgument)
    ));
}

#[test]
fn nothing_works_before_mount() {
    init_log();
    let flash = RamFlash::new(8192);
    let fs = Nffs::init(flash.clone(), Config::default()).unwrap();

    assert_eq!(State::Initialized, fs.state());
    assert!(!fs.ready());
    assert_eq!(Err(Error::NotReady), fs.mkdir("/a"));
    assert_eq!(Err(Error::NotReady), fs.stat("/").map(|_| ()));
    assert_eq!(Err(Error::NotReady), fs.areas().map(|_| ()));
    // 构造实例不访问闪存
    assert_eq!(0, flash.written());
}

#[test]
fn blank_flash_needs_format() {
    init_log();
    let flash = RamFlash::new(8192);
    let descs = areas(2, 4096);
    let fs = Nffs::init(flash.clone(), Config::default()).unwrap();

    assert_eq!(Err(Error::InvalidFormat), fs.detect(&descs));
    assert_eq!(State::FormatRequired, fs.state());

    fs.format(&descs).unwrap();
    assert_eq!(State::Ready, fs.state());
    let root = fs.stat("/").unwrap();
    assert_eq!(0, root.inode);
    assert!(root.mode.is_dir());
}

#[test]
fn bad_area_layouts() {
    init_log();
    let flash = RamFlash::new(16384);
    let fs = Nffs::init(flash, Config::default()).unwrap();

    // 区域太少
    assert_eq!(Err(Error::InvalidArgument), fs.format(&areas(1, 4096)));
    // 区域重叠
    let overlapping = [AreaDesc::new(0, 0, 4096), AreaDesc::new(0, 2048, 4096)];
    assert_eq!(Err(Error::InvalidArgument), fs.format(&overlapping));
    // 区域放不下一条最长的记录
    assert_eq!(Err(Error::InvalidArgument), fs.format(&areas(4, 64)));
    assert_eq!(State::Initialized, fs.state());

    // 另一片闪存上的同一地址不算重叠，但驱动不认识它
    let other_flash = [AreaDesc::new(0, 0, 4096), AreaDesc::new(1, 0, 4096)];
    assert!(matches!(fs.format(&other_flash), Err(Error::Media(_))));
    assert_eq!(State::FormatRequired, fs.state());
}

#[test]
fn format_layout() {
    let flash = RamFlash::new(4096 * 3 + 8192);
    let descs = [
        AreaDesc::new(0, 0, 4096),
        AreaDesc::new(0, 4096, 8192),
        AreaDesc::new(0, 12288, 4096),
        AreaDesc::new(0, 16384, 4096),
    ];
    let fs = formatted(&flash, &descs, Config::default());

    let info = fs.areas().unwrap();
    assert_eq!(4, info.len());
    // 最大的区域留作暂存区，且保持全擦除态
    assert_eq!(AreaRole::Scratch, info[1].role);
    assert!(flash.bytes(descs[1]).iter().all(|&b| b == 0xFF));
    let newest_data = info
        .iter()
        .filter(|area| area.role == AreaRole::Data)
        .map(|area| area.seq)
        .max();
    assert!(Some(info[1].seq) > newest_data);

    // 根目录写在第一个区域
    assert!(info[0].used > 24);
    assert_eq!(24, info[2].used);
    assert_eq!(24, info[3].used);
}

#[test]
fn detect_is_idempotent() {
    let flash = RamFlash::new(4 * 4096);
    let descs = areas(4, 4096);
    let fs = formatted(&flash, &descs, Config::default());
    fs.mkdir("/etc").unwrap();
    write_file(&fs, "/etc/hosts", &pattern(3000, 1)).unwrap();
    write_file(&fs, "/motd", b"hello").unwrap();
    let before = tree(&fs);
    drop(fs);

    let image = flash.snapshot();
    for _ in 0..2 {
        let fs = reboot(&flash, &descs, Config::default());
        assert_eq!(before, tree(&fs));
        assert_eq!(image, flash.snapshot());
    }
}

#[test]
fn detect_again_invalidates_handles() {
    let flash = RamFlash::new(2 * 4096);
    let descs = areas(2, 4096);
    let fs = formatted(&flash, &descs, Config::default());
    write_file(&fs, "/f", b"abc").unwrap();

    let file = fs.open("/f", nffs::Access::Read).unwrap();
    let dir = fs.opendir("/").unwrap();
    fs.detect(&descs).unwrap();

    let mut buf = [0; 3];
    assert_eq!(Err(Error::InvalidHandle), fs.read(file, &mut buf));
    assert_eq!(Err(Error::InvalidHandle), fs.readdir(dir).map(|_| ()));
}

#[test]
fn missing_root_is_fatal() {
    let flash = RamFlash::new(2 * 4096);
    let descs = areas(2, 4096);
    drop(formatted(&flash, &descs, Config::default()));

    // 根目录是区域 0 的第一条记录，破坏它的载荷
    flash.poke(24 + 12, 0x42);

    let fs = Nffs::init(flash.clone(), Config::default()).unwrap();
    assert_eq!(Err(Error::CorruptRecord), fs.detect(&descs));
    assert_eq!(State::Fatal, fs.state());
    assert_eq!(Err(Error::NotReady), fs.mkdir("/a"));

    fs.format(&descs).unwrap();
    assert!(fs.ready());
}

#[test]
fn limits_survive_remount() {
    let flash = RamFlash::new(4 * 4096);
    let descs = areas(4, 4096);
    let config = Config {
        max_inodes: 4,
        ..Config::default()
    };
    let fs = formatted(&flash, &descs, config.clone());
    for name in ["/a", "/b", "/c"] {
        fs.mkdir(name).unwrap();
    }
    assert_eq!(Err(Error::ResourceExhausted), fs.mkdir("/d"));

    let fs = reboot(&flash, &descs, config.clone());
    assert_eq!(Err(Error::ResourceExhausted), fs.mkdir("/d"));
    fs.unlink("/a").unwrap();
    fs.mkdir("/d").unwrap();

    // 配置更小的实例挂载不了
    let small = Config {
        max_inodes: 2,
        ..config
    };
    let fs = Nffs::init(flash.clone(), small).unwrap();
    assert_eq!(Err(Error::ResourceExhausted), fs.detect(&descs));
}
