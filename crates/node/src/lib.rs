use dogeledger_log as logging;

pub mod config;
pub mod events;

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::bounded;
use dogeledger_ledger::{ChainFollower, LedgerStore};
use dogeledger_log::{log_info, log_warn};
use dogeledger_storage::fjall::{FjallOptions, FjallStore};
use dogeledger_storage::memory::MemoryStore;
use dogeledger_storage::{Column, KeyValueStore, PrefixVisitor, ScanResult, StoreError, WriteBatch};
use fs2::FileExt;

use crate::config::{Backend, CliAction, Config};
use crate::events::ReaderStats;

const DATA_DIR_LOCK_FILE_NAME: &str = ".lock";
const EVENT_QUEUE_DEPTH: usize = 256;

pub enum Store {
    Memory(MemoryStore),
    Fjall(FjallStore),
}

impl Store {
    pub fn open(backend: Backend, path: &Path, options: &FjallOptions) -> Result<Self, String> {
        match backend {
            Backend::Memory => Ok(Store::Memory(MemoryStore::new())),
            Backend::Fjall => {
                warn_on_fjall_sizing(options);
                FjallStore::open_with_options(path, options.clone())
                    .map(Store::Fjall)
                    .map_err(|err| format!("failed to open store at {}: {err}", path.display()))
            }
        }
    }

    pub fn persist(&self) -> Result<(), StoreError> {
        match self {
            Store::Memory(_) => Ok(()),
            Store::Fjall(store) => store.persist(),
        }
    }
}

/// Fjall stalls writes when memtables outgrow the write buffer or the
/// journals fill before memtables can flush.
fn warn_on_fjall_sizing(options: &FjallOptions) {
    let partitions = Column::ALL.len() as u64;
    let Some(memtable) = options.memtable_bytes.map(u64::from) else {
        return;
    };
    let max_memtables = memtable.saturating_mul(partitions);
    if let Some(write_buffer) = options.write_buffer_bytes {
        if write_buffer < max_memtables {
            log_warn!(
                "dbwritebuffer ({}B) is below partitions ({partitions}) x dbmemtable ({memtable}B); expect frequent flushes",
                write_buffer
            );
        }
    }
    if let Some(journal) = options.journal_bytes {
        if journal < max_memtables.saturating_mul(2) {
            log_warn!(
                "dbjournal ({}B) is below 2 x partitions ({partitions}) x dbmemtable ({memtable}B); writes may halt when journals fill",
                journal
            );
        }
    }
}

impl KeyValueStore for Store {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        match self {
            Store::Memory(store) => store.get(column, key),
            Store::Fjall(store) => store.get(column, key),
        }
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.put(column, key, value),
            Store::Fjall(store) => store.put(column, key, value),
        }
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.delete(column, key),
            Store::Fjall(store) => store.delete(column, key),
        }
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        match self {
            Store::Memory(store) => store.scan_prefix(column, prefix),
            Store::Fjall(store) => store.scan_prefix(column, prefix),
        }
    }

    fn scan_prefix_from(
        &self,
        column: Column,
        prefix: &[u8],
        start: &[u8],
        limit: usize,
    ) -> Result<ScanResult, StoreError> {
        match self {
            Store::Memory(store) => store.scan_prefix_from(column, prefix, start, limit),
            Store::Fjall(store) => store.scan_prefix_from(column, prefix, start, limit),
        }
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.for_each_prefix(column, prefix, visitor),
            Store::Fjall(store) => store.for_each_prefix(column, prefix, visitor),
        }
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.write_batch(batch),
            Store::Fjall(store) => store.write_batch(batch),
        }
    }
}

pub struct DataDirLock {
    _file: File,
}

pub fn lock_data_dir(data_dir: &Path) -> Result<DataDirLock, String> {
    let lock_path = data_dir.join(DATA_DIR_LOCK_FILE_NAME);
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|err| format!("failed to open lock file {}: {err}", lock_path.display()))?;

    match file.try_lock_exclusive() {
        Ok(()) => {
            let pid = std::process::id();
            let _ = file.set_len(0);
            let _ = file.seek(SeekFrom::Start(0));
            let _ = writeln!(file, "pid={pid}");
            let _ = file.flush();
            Ok(DataDirLock { _file: file })
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
            let mut holder = String::new();
            let _ =
                File::open(&lock_path).and_then(|mut reader| reader.read_to_string(&mut holder));
            let holder = holder.trim();
            let holder = if holder.is_empty() {
                String::new()
            } else {
                format!(" ({holder})")
            };
            Err(format!(
                "data dir {} is already locked (another dogeledgerd may be running); lock file {}{holder}",
                data_dir.display(),
                lock_path.display()
            ))
        }
        Err(err) => Err(format!(
            "failed to lock data dir {} (lock file {}): {err}",
            data_dir.display(),
            lock_path.display()
        )),
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FeedSummary {
    pub applied: u64,
    pub reader: ReaderStats,
}

/// Feeds `input` through a reader thread into `follower` until the input
/// ends. Stops at the first event the ledger rejects.
pub fn drive<S, R>(follower: &ChainFollower<S>, input: R) -> Result<FeedSummary, String>
where
    S: KeyValueStore,
    R: io::BufRead + Send + 'static,
{
    let (sender, receiver) = bounded(EVENT_QUEUE_DEPTH);
    let reader = events::spawn_reader(input, sender);
    let applied = follower
        .run(receiver)
        .map_err(|err| format!("failed to apply chain event: {err}"))?;
    let reader = reader
        .join()
        .map_err(|_| "event reader thread panicked".to_string())?;
    Ok(FeedSummary { applied, reader })
}

pub fn run_entry() -> Result<(), String> {
    match config::parse_args()? {
        CliAction::PrintHelp => {
            println!("{}", config::usage());
            Ok(())
        }
        CliAction::PrintVersion => {
            println!("dogeledgerd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliAction::Run(config) => run_with_config(config),
    }
}

fn run_with_config(config: Config) -> Result<(), String> {
    logging::init(logging::LogConfig {
        level: config.log_level,
        format: config.log_format,
        timestamps: config.log_timestamps,
    });
    let start_time = Instant::now();
    log_info!(
        "Startup: backend={}, network={} ({}), data_dir={}",
        config.backend.as_str(),
        config.network_name,
        config.network.as_str(),
        config.data_dir.display()
    );
    for key in &config.unsupported_conf_keys {
        log_warn!(
            "ignoring unsupported key '{key}' in {}",
            config.conf_path.display()
        );
    }
    log_info!(
        "node {} (zmq port {}, rpc {}:{}); api {}:{}",
        config.core.host,
        config.core.zmq_port,
        config.core.rpc_host,
        config.core.rpc_port,
        config.api_bind,
        config.api_port
    );

    fs::create_dir_all(&config.data_dir).map_err(|err| err.to_string())?;
    let _data_dir_lock = lock_data_dir(&config.data_dir)?;

    let store = Store::open(config.backend, &config.db_path, &config.db_options)?;
    let ledger = Arc::new(LedgerStore::open(store).map_err(|err| err.to_string())?);
    let follower = ChainFollower::new(Arc::clone(&ledger), config.network, config.confirmations);
    match follower.resume_height().map_err(|err| err.to_string())? {
        Some(height) => log_info!("resuming after height {height}"),
        None => log_info!("no chain checkpoint; waiting for the first block"),
    }

    let summary = match &config.events_path {
        Some(path) => {
            let file = File::open(path)
                .map_err(|err| format!("failed to open event feed {}: {err}", path.display()))?;
            drive(&follower, BufReader::new(file))?
        }
        None => drive(&follower, BufReader::new(io::stdin()))?,
    };

    ledger.close();
    ledger
        .backend()
        .persist()
        .map_err(|err| format!("failed to persist store: {err}"))?;
    log_info!(
        "Shutdown: applied {} event(s), skipped {} malformed line(s) in {}ms",
        summary.applied,
        summary.reader.skipped,
        start_time.elapsed().as_millis()
    );
    Ok(())
}
