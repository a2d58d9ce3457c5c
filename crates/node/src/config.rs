//! Command line and conf file handling for `dogeledgerd`.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use dogeledger_log as logging;
use dogeledger_primitives::Network;
use dogeledger_storage::fjall::FjallOptions;

pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_CONF_FILE_NAME: &str = "dogeledger.conf";
pub const DEFAULT_DB_FILE: &str = "ledger";
pub const DEFAULT_CONFIRMATIONS: u32 = 6;
pub const DEFAULT_API_BIND: &str = "127.0.0.1";
pub const DEFAULT_API_PORT: u16 = 8080;

const MIB: u64 = 1024 * 1024;

const GLOBAL_KEYS: &[&str] = &[
    "network",
    "confirmations",
    "apibind",
    "apiport",
    "dbfile",
    "dbcache",
    "dbwritebuffer",
    "dbjournal",
    "dbmemtable",
    "dbfsyncms",
    "dbsynccommits",
    "backend",
    "loglevel",
    "logformat",
    "logtimestamps",
];

const NETWORK_KEYS: &[&str] = &[
    "chain",
    "host",
    "zmqport",
    "rpchost",
    "rpcport",
    "rpcuser",
    "rpcpassword",
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Backend {
    Memory,
    Fjall,
}

impl Backend {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "memory" => Some(Self::Memory),
            "fjall" => Some(Self::Fjall),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Fjall => "fjall",
        }
    }
}

/// Connection details of the Dogecoin node feeding the ledger.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeConfig {
    pub host: String,
    pub zmq_port: u16,
    pub rpc_host: String,
    pub rpc_port: u16,
    pub rpc_user: Option<String>,
    pub rpc_password: Option<String>,
}

impl NodeConfig {
    pub fn defaults(network: Network) -> Self {
        Self {
            host: "localhost".to_string(),
            zmq_port: 28332,
            rpc_host: "localhost".to_string(),
            rpc_port: network.default_rpc_port(),
            rpc_user: None,
            rpc_password: None,
        }
    }
}

/// Parsed conf file: top-level keys plus one table per `[name]` section.
/// Keys are lowercased; repeated keys keep every value in order.
#[derive(Clone, Debug, Default)]
pub struct ConfFile {
    values: HashMap<String, Vec<String>>,
    sections: BTreeMap<String, HashMap<String, Vec<String>>>,
}

impl ConfFile {
    pub fn load(path: &Path) -> Result<Option<Self>, String> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(format!("failed to read {}: {err}", path.display())),
        };
        Ok(Some(Self::parse(&contents)))
    }

    pub fn parse(contents: &str) -> Self {
        let mut conf = Self::default();
        let mut section: Option<String> = None;
        for raw_line in contents.lines() {
            let mut line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(idx) = line.find('#') {
                line = &line[..idx];
            }
            if let Some(idx) = line.find(';') {
                line = &line[..idx];
            }
            line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
                let name = name.trim().to_ascii_lowercase();
                conf.sections.entry(name.clone()).or_default();
                section = Some(name);
                continue;
            }
            let (key, value) = match line.split_once('=') {
                Some((key, value)) => (key.trim(), value.trim()),
                None => (line, "1"),
            };
            if key.is_empty() {
                continue;
            }
            let key = key.to_ascii_lowercase();
            let table = match &section {
                Some(name) => conf.sections.entry(name.clone()).or_default(),
                None => &mut conf.values,
            };
            table.entry(key).or_default().push(value.to_string());
        }
        conf
    }

    pub fn last(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(|values| values.last())
            .map(String::as_str)
    }

    pub fn section_last(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|table| table.get(key))
            .and_then(|values| values.last())
            .map(String::as_str)
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.sections.contains_key(section)
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Keys this daemon does not understand, as `key` or `section.key`.
    pub fn unsupported_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .values
            .keys()
            .filter(|key| !GLOBAL_KEYS.contains(&key.as_str()))
            .cloned()
            .collect();
        for (name, table) in &self.sections {
            keys.extend(
                table
                    .keys()
                    .filter(|key| !NETWORK_KEYS.contains(&key.as_str()))
                    .map(|key| format!("{name}.{key}")),
            );
        }
        keys.sort();
        keys
    }
}

pub struct Config {
    pub backend: Backend,
    pub data_dir: PathBuf,
    pub conf_path: PathBuf,
    pub db_path: PathBuf,
    pub db_options: FjallOptions,
    /// Name of the active network section.
    pub network_name: String,
    pub network: Network,
    pub core: NodeConfig,
    pub confirmations: u32,
    pub api_bind: String,
    pub api_port: u16,
    /// Event feed; stdin when absent.
    pub events_path: Option<PathBuf>,
    pub log_level: logging::Level,
    pub log_format: logging::Format,
    pub log_timestamps: bool,
    pub unsupported_conf_keys: Vec<String>,
}

pub enum CliAction {
    Run(Config),
    PrintHelp,
    PrintVersion,
}

pub fn parse_args() -> Result<CliAction, String> {
    parse_args_from(std::env::args().skip(1))
}

pub fn parse_args_from<I>(raw_args: I) -> Result<CliAction, String>
where
    I: IntoIterator<Item = String>,
{
    let mut backend: Option<Backend> = None;
    let mut data_dir: Option<PathBuf> = None;
    let mut conf_path: Option<PathBuf> = None;
    let mut network_name: Option<String> = None;
    let mut confirmations: Option<u32> = None;
    let mut events_path: Option<PathBuf> = None;
    let mut log_level: Option<logging::Level> = None;
    let mut log_format: Option<logging::Format> = None;

    let mut args = raw_args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--backend" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --backend\n{}", usage()))?;
                backend = Some(
                    Backend::parse(&value)
                        .ok_or_else(|| format!("invalid backend '{value}'\n{}", usage()))?,
                );
            }
            "--data-dir" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --data-dir\n{}", usage()))?;
                data_dir = Some(PathBuf::from(value));
            }
            "--conf" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --conf\n{}", usage()))?;
                conf_path = Some(PathBuf::from(value));
            }
            "--network" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --network\n{}", usage()))?;
                network_name = Some(value.trim().to_ascii_lowercase());
            }
            "--confirmations" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --confirmations\n{}", usage()))?;
                confirmations = Some(
                    value
                        .parse::<u32>()
                        .map_err(|_| format!("invalid confirmations '{value}'\n{}", usage()))?,
                );
            }
            "--events" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --events\n{}", usage()))?;
                events_path = (value != "-").then(|| PathBuf::from(value));
            }
            "--log-level" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --log-level\n{}", usage()))?;
                log_level = Some(
                    logging::Level::parse(&value)
                        .ok_or_else(|| format!("invalid log level '{value}'\n{}", usage()))?,
                );
            }
            "--log-format" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --log-format\n{}", usage()))?;
                log_format = Some(
                    logging::Format::parse(&value)
                        .ok_or_else(|| format!("invalid log format '{value}'\n{}", usage()))?,
                );
            }
            "--help" | "-h" => return Ok(CliAction::PrintHelp),
            "--version" | "-V" => return Ok(CliAction::PrintVersion),
            other => {
                return Err(format!("unknown argument '{other}'\n{}", usage()));
            }
        }
    }

    let data_dir = data_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    let conf_path = conf_path.unwrap_or_else(|| data_dir.join(DEFAULT_CONF_FILE_NAME));
    let conf = ConfFile::load(&conf_path)?.unwrap_or_default();
    let conf_name = conf_path.display().to_string();

    let backend = match backend {
        Some(backend) => backend,
        None => match conf.last("backend") {
            Some(raw) => Backend::parse(raw)
                .ok_or_else(|| format!("invalid backend '{raw}' in {conf_name}"))?,
            None => Backend::Fjall,
        },
    };
    let confirmations = match confirmations {
        Some(value) => value,
        None => match conf.last("confirmations") {
            Some(raw) => raw
                .parse::<u32>()
                .map_err(|_| format!("invalid confirmations '{raw}' in {conf_name}"))?,
            None => DEFAULT_CONFIRMATIONS,
        },
    };
    let log_level = match log_level {
        Some(level) => level,
        None => match conf.last("loglevel") {
            Some(raw) => logging::Level::parse(raw)
                .ok_or_else(|| format!("invalid loglevel '{raw}' in {conf_name}"))?,
            None => logging::Level::Info,
        },
    };
    let log_format = match log_format {
        Some(format) => format,
        None => match conf.last("logformat") {
            Some(raw) => logging::Format::parse(raw)
                .ok_or_else(|| format!("invalid logformat '{raw}' in {conf_name}"))?,
            None => logging::Format::Text,
        },
    };
    let log_timestamps = match conf.last("logtimestamps") {
        Some(raw) => parse_conf_bool(raw)
            .ok_or_else(|| format!("invalid logtimestamps value '{raw}' in {conf_name}"))?,
        None => true,
    };
    let api_bind = conf.last("apibind").unwrap_or(DEFAULT_API_BIND).to_string();
    let api_port = match conf.last("apiport") {
        Some(raw) => raw
            .parse::<u16>()
            .map_err(|_| format!("invalid apiport '{raw}' in {conf_name}"))?,
        None => DEFAULT_API_PORT,
    };
    let db_path = match conf.last("dbfile") {
        Some(raw) if Path::new(raw).is_absolute() => PathBuf::from(raw),
        Some(raw) => data_dir.join(raw),
        None => data_dir.join(DEFAULT_DB_FILE),
    };

    let db_options = parse_db_options(&conf, &conf_name)?;

    let network_name = network_name
        .or_else(|| conf.last("network").map(str::to_ascii_lowercase))
        .unwrap_or_else(|| Network::Mainnet.as_str().to_string());
    let (network, core) = resolve_network(&conf, &network_name, &conf_name)?;

    Ok(CliAction::Run(Config {
        backend,
        data_dir,
        unsupported_conf_keys: conf.unsupported_keys(),
        conf_path,
        db_path,
        db_options,
        network_name,
        network,
        core,
        confirmations,
        api_bind,
        api_port,
        events_path,
        log_level,
        log_format,
        log_timestamps,
    }))
}

/// The active network must be a conf section or a built-in network name.
fn resolve_network(
    conf: &ConfFile,
    name: &str,
    conf_name: &str,
) -> Result<(Network, NodeConfig), String> {
    if !conf.has_section(name) {
        let network = Network::parse(name).ok_or_else(|| {
            let known: Vec<&str> = conf.section_names().collect();
            format!(
                "unknown network '{name}' (sections in {conf_name}: {})",
                if known.is_empty() {
                    "none".to_string()
                } else {
                    known.join(", ")
                }
            )
        })?;
        return Ok((network, NodeConfig::defaults(network)));
    }

    let network = match conf.section_last(name, "chain") {
        Some(raw) => Network::parse(raw)
            .ok_or_else(|| format!("invalid chain '{raw}' for [{name}] in {conf_name}"))?,
        None => Network::parse(name).ok_or_else(|| {
            format!("network [{name}] in {conf_name} needs chain=mainnet|testnet|regtest")
        })?,
    };
    let mut core = NodeConfig::defaults(network);
    if let Some(host) = conf.section_last(name, "host") {
        core.host = host.to_string();
        core.rpc_host = host.to_string();
    }
    if let Some(raw) = conf.section_last(name, "zmqport") {
        core.zmq_port = raw
            .parse::<u16>()
            .map_err(|_| format!("invalid zmqport '{raw}' for [{name}] in {conf_name}"))?;
    }
    if let Some(rpc_host) = conf.section_last(name, "rpchost") {
        core.rpc_host = rpc_host.to_string();
    }
    if let Some(raw) = conf.section_last(name, "rpcport") {
        core.rpc_port = raw
            .parse::<u16>()
            .map_err(|_| format!("invalid rpcport '{raw}' for [{name}] in {conf_name}"))?;
    }
    core.rpc_user = conf.section_last(name, "rpcuser").map(str::to_string);
    core.rpc_password = conf.section_last(name, "rpcpassword").map(str::to_string);
    Ok((network, core))
}

/// Fjall tuning from `db*` keys; sizes are in MiB and a `dbfsyncms` of 0
/// leaves background fsync off.
fn parse_db_options(conf: &ConfFile, conf_name: &str) -> Result<FjallOptions, String> {
    let mib = |key: &str| -> Result<Option<u64>, String> {
        match conf.last(key) {
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .and_then(|value| value.checked_mul(MIB))
                .map(Some)
                .ok_or_else(|| format!("invalid {key} '{raw}' in {conf_name}")),
            None => Ok(None),
        }
    };
    let memtable_bytes = match mib("dbmemtable")? {
        Some(bytes) => Some(u32::try_from(bytes).map_err(|_| {
            format!("dbmemtable too large in {conf_name} (max {} MiB)", u64::from(u32::MAX) / MIB)
        })?),
        None => None,
    };
    let fsync_ms = match conf.last("dbfsyncms") {
        Some(raw) => {
            let ms = raw
                .parse::<u16>()
                .map_err(|_| format!("invalid dbfsyncms '{raw}' in {conf_name}"))?;
            (ms != 0).then_some(ms)
        }
        None => None,
    };
    let sync_commits = match conf.last("dbsynccommits") {
        Some(raw) => parse_conf_bool(raw)
            .ok_or_else(|| format!("invalid dbsynccommits value '{raw}' in {conf_name}"))?,
        None => true,
    };
    Ok(FjallOptions {
        cache_bytes: mib("dbcache")?,
        write_buffer_bytes: mib("dbwritebuffer")?,
        journal_bytes: mib("dbjournal")?,
        memtable_bytes,
        fsync_ms,
        sync_commits,
    })
}

fn parse_conf_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.is_empty() {
        return Some(true);
    }
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

pub fn usage() -> String {
    [
        "Usage:",
        "  dogeledgerd [options]",
        "",
        "Reads chain events (one JSON object per line) and applies them to the ledger.",
        "",
        "Options:",
        "  --help, -h           Print this help and exit",
        "  --version, -V        Print version and exit",
        "  --backend            Storage backend: fjall|memory (default: fjall)",
        "  --data-dir           Base data directory (default: ./data)",
        "  --conf               Config file path (default: <data-dir>/dogeledger.conf)",
        "  --network            Active network section (default: mainnet)",
        "  --confirmations      Default confirmations for outputs and invoices (default: 6)",
        "  --events             Event feed file, '-' for stdin (default: stdin)",
        "  --log-level          error|warn|info|debug|trace (default: info)",
        "  --log-format         text|json (default: text)",
    ]
    .join("\n")
}
