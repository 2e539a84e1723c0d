use clap::{Arg, ArgMatches, Command};

use vfs_mapstream::{AbstractFileIo, MapStream};

fn parse_fixed_width(text: &str, size: u64) -> Vec<u8> {
    let n: u64 = text
        .parse()
        .unwrap_or_else(|_| panic!("'{}' is not an unsigned integer", text));

    let mut bytes = n.to_le_bytes().to_vec();
    if (size as usize) <= bytes.len() {
        bytes.truncate(size as usize);
    } else {
        bytes.resize(size as usize, 0);
    }
    bytes
}

fn u64_arg(matches: &ArgMatches, name: &str) -> u64 {
    matches.get_one::<String>(name).unwrap().parse().unwrap()
}

fn build_cli() -> Command {
    Command::new("vfs_mapstream")
        .version("0.1.0")
        .about("Inspect and manipulate a MapStream key-value file")
        .arg(
            Arg::new("store")
                .long("store")
                .required(true)
                .help("Path to the MapStream file"),
        )
        .arg(
            Arg::new("key-size")
                .long("key-size")
                .default_value("8")
                .help("Key width in bytes, used only when creating a fresh store"),
        )
        .arg(
            Arg::new("value-size")
                .long("value-size")
                .default_value("8")
                .help("Value width in bytes, used only when creating a fresh store"),
        )
        .arg(
            Arg::new("cache-capacity")
                .long("cache-capacity")
                .default_value("4")
                .help("Maximum number of file handles AbstractFileIO keeps open"),
        )
        .subcommand(
            Command::new("insert")
                .about("Insert a key/value pair")
                .arg(Arg::new("key").long("key").required(true))
                .arg(Arg::new("value").long("value").required(true)),
        )
        .subcommand(
            Command::new("find")
                .about("Look up a key")
                .arg(Arg::new("key").long("key").required(true)),
        )
        .subcommand(
            Command::new("erase")
                .about("Erase a key (materialized on the next flush)")
                .arg(Arg::new("key").long("key").required(true)),
        )
        .subcommand(Command::new("optimize").about("Merge the unsorted region into the sorted one"))
        .subcommand(Command::new("stats").about("Print nSorted / nUnsorted / currOptimization"))
}

fn main() {
    env_logger::init();

    let matches = build_cli().get_matches();

    let store_path = matches.get_one::<String>("store").unwrap();
    let key_size = u64_arg(&matches, "key-size");
    let value_size = u64_arg(&matches, "value-size");
    let cache_capacity: usize = matches
        .get_one::<String>("cache-capacity")
        .unwrap()
        .parse()
        .unwrap();

    let afio = AbstractFileIo::new(cache_capacity);
    let (mut store, adopted_key_size, adopted_value_size) =
        match MapStream::open(store_path, afio, key_size, value_size) {
            Ok(v) => v,
            Err(e) => {
                eprintln!("error: cannot open {}: {}", store_path, e);
                std::process::exit(1);
            }
        };

    let result = match matches.subcommand() {
        Some(("insert", sub)) => {
            let key = parse_fixed_width(sub.get_one::<String>("key").unwrap(), adopted_key_size);
            let value = parse_fixed_width(sub.get_one::<String>("value").unwrap(), adopted_value_size);
            store.insert(&key, &value).map(|_| println!("inserted"))
        }
        Some(("find", sub)) => {
            let key = parse_fixed_width(sub.get_one::<String>("key").unwrap(), adopted_key_size);
            store.find(&key).and_then(|idx| {
                if idx.is_not_found() {
                    println!("not found");
                    Ok(())
                } else {
                    let mut out = vec![0u8; adopted_value_size as usize];
                    store.get_value(idx, &mut out)?;
                    println!("found at {:?}, value bytes = {:?}", idx, out);
                    Ok(())
                }
            })
        }
        Some(("erase", sub)) => {
            let key = parse_fixed_width(sub.get_one::<String>("key").unwrap(), adopted_key_size);
            store
                .erase(&key)
                .and_then(|_| store.flush())
                .map(|_| println!("erased"))
        }
        Some(("optimize", _)) => store.optimize().map(|_| println!("optimized")),
        Some(("stats", _)) => {
            println!(
                "nSorted={} nUnsorted={} currOptimization={:.4}",
                store.n_sorted(),
                store.n_unsorted(),
                store.curr_optimization()
            );
            Ok(())
        }
        _ => {
            eprintln!("no subcommand given; try --help");
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
