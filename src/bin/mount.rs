use fuser::{MountOption, spawn_mount2};
use skra::{block::storage::file::FileStorage, fs::Filesystem, fuse::Fuse, kernel::Kernel};

fn usage() -> ! {
    eprintln!("mount.skra [--read-only] [--allow-other] device mountpoint");
    std::process::exit(1);
}

fn fail(message: String) -> ! {
    eprintln!("mount.skra: {}", message);
    std::process::exit(1);
}

/// Blocks the calling thread until SIGINT arrives.
fn wait_for_interrupt() {
    let mut sigset: libc::sigset_t = unsafe { std::mem::zeroed() };
    let mut sig = 0;
    unsafe {
        libc::sigemptyset(&mut sigset);
        libc::sigaddset(&mut sigset, libc::SIGINT);
        libc::pthread_sigmask(libc::SIG_BLOCK, &sigset, std::ptr::null_mut());
        libc::sigwait(&sigset, &mut sig);
    }
}

fn main() {
    env_logger::init();

    let mut options = vec![
        MountOption::DefaultPermissions,
        MountOption::FSName("skra".to_string()),
    ];
    let mut paths = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--read-only" => options.push(MountOption::RO),
            "--allow-other" => options.push(MountOption::AllowOther),
            flag if flag.starts_with("--") => {
                eprintln!("mount.skra: unknown option {}", flag);
                usage();
            }
            _ => paths.push(arg),
        }
    }

    let [storage_path, mount_point] = match <[String; 2]>::try_from(paths) {
        Ok(paths) => paths,
        Err(paths) if paths.len() < 2 => {
            eprintln!("mount.skra: expected a device and a mountpoint");
            usage();
        }
        Err(_) => {
            eprintln!("mount.skra: too many arguments");
            usage();
        }
    };

    let storage = FileStorage::open(&storage_path).unwrap_or_else(|e| {
        fail(format!(
            "failed to open device {}: {}",
            storage_path,
            std::io::Error::from_raw_os_error(e)
        ))
    });
    let fs = Filesystem::mount(storage).unwrap_or_else(|e| {
        fail(format!(
            "failed to read filesystem from device {}: {}",
            storage_path,
            std::io::Error::from_raw_os_error(e.into())
        ))
    });

    let superblock = fs.superblock();
    eprintln!(
        "mount.skra: {} holds {} files, {} of {} blocks free (limit {})",
        storage_path,
        fs.node_count(),
        fs.available_blocks(),
        superblock.block_count,
        superblock.block_limit
    );

    let fuse = Fuse::new(Kernel::new(fs));
    let session = spawn_mount2(fuse, &mount_point, &options).unwrap_or_else(|e| {
        fail(format!(
            "failed to mount {} on {}: {}",
            storage_path, mount_point, e
        ))
    });

    eprintln!(
        "mount.skra: mounted {} on {}, press Ctrl+C to unmount",
        storage_path, mount_point
    );
    wait_for_interrupt();
    drop(session);
}
