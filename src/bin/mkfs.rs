use skra::{
    block::storage::file::FileStorage,
    fs::{Config, Filesystem},
};

fn usage() -> ! {
    eprintln!("mkfs.skra [--nodes count] [--limit blocks] device");
    std::process::exit(1);
}

fn parse_count(flag: &str, value: Option<String>) -> u64 {
    match value.as_deref().map(str::parse) {
        Some(Ok(count)) => count,
        Some(Err(_)) | None => {
            eprintln!("mkfs.skra: {} expects a number", flag);
            usage();
        }
    }
}

fn main() {
    env_logger::init();

    let mut config = Config::default();
    let mut storage_path = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--nodes" => config.node_count = parse_count(&arg, args.next()),
            "--limit" => config.block_limit = Some(parse_count(&arg, args.next())),
            _ if storage_path.is_none() => storage_path = Some(arg),
            _ => {
                eprintln!("mkfs.skra: too many arguments");
                usage();
            }
        }
    }

    let storage_path = if let Some(path) = storage_path {
        path
    } else {
        eprintln!("mkfs.skra: no device specified");
        std::process::exit(1);
    };

    let storage = match FileStorage::open(&storage_path) {
        Ok(storage) => storage,
        Err(e) => {
            eprintln!(
                "mkfs.skra: failed to open device {}: {}",
                storage_path,
                std::io::Error::from_raw_os_error(e)
            );
            std::process::exit(1);
        }
    };

    match Filesystem::format(storage, &config) {
        Ok(fs) => {
            let superblock = fs.superblock();
            eprintln!(
                "mkfs.skra: created filesystem on {} with {} blocks (limit {}) and {} nodes",
                storage_path, superblock.block_count, superblock.block_limit, superblock.node_count
            );
        }
        Err(e) => {
            eprintln!(
                "mkfs.skra: failed to create filesystem on {}: {}",
                storage_path,
                std::io::Error::from_raw_os_error(e.into())
            );
            std::process::exit(1);
        }
    }
}
