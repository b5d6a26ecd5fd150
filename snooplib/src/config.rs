//! Memory system configuration: parsing, validation, and the structured
//! error type the CLI turns into exit codes.
//!
//! A configuration is the space-separated form
//! `cache_size[unit] line_size associativity coherence replacer [directory]`,
//! whether it arrives as command-line arguments or as one line of a configs
//! file. All three size fields must be powers of two; names resolve
//! case-insensitively through the registries.

use std::error::Error;
use std::fmt;
use std::fs;
use std::io;

use crate::bus::DirectoryKind;
use crate::coherence::CoherenceKind;
use crate::replacement::ReplacerKind;

/// The trace format's CPU id field is 7 bits wide.
pub const MAX_N_CACHES: usize = 128;

/// Canonical argument indices. They name the offending argument in error
/// messages and form the low bits of the exit code, regardless of where the
/// token actually sat on the command line.
pub mod arg {
    pub const CACHE_SIZE: u32 = 1;
    pub const LINE_SIZE: u32 = 2;
    pub const ASSOCIATIVITY: u32 = 3;
    pub const COHERENCE: u32 = 4;
    pub const REPLACER: u32 = 5;
    pub const DIRECTORY: u32 = 6;
    pub const TRACE_FILE: u32 = 7;
    pub const TRACE_LIMIT: u32 = 8;

    /// Number of tokens in a full configuration, also the index reported
    /// for malformed configs-file lines
    pub const CONFIG_COUNT: u32 = 7;

    /// Batch mode positions
    pub const CONFIGS_FILE: u32 = 1;
    pub const BATCH_TRACE_FILE: u32 = 2;
    pub const BATCH_TRACE_LIMIT: u32 = 3;

    /// Textbook mode position
    pub const TEXTBOOK: u32 = 1;
}

/// Configuration of one memory system (one simulation).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemConfig {
    /// 0 for a single run; the 1-based configs-file line otherwise
    pub id: u32,
    pub cache_size: u32,
    pub line_size: u32,
    pub assoc: u32,
    pub coherence: CoherenceKind,
    pub replacer: ReplacerKind,
    pub directory: DirectoryKind,
}

/// A rejected configuration or input file, tied to the argument that
/// caused it.
#[derive(Debug)]
pub struct ConfigError {
    pub config_id: u32,
    pub arg_index: u32,
    pub kind: ConfigErrorKind,
}

#[derive(Debug)]
pub enum ConfigErrorKind {
    /// The field named by the payload failed numeric parsing
    BadNumber(&'static str),
    /// The field named by the payload is zero or not a power of two
    NotPowerOfTwo(&'static str),
    BadUnit,
    LineLargerThanCache,
    TooManyWays,
    /// The registry named by the payload has no entry for the given name
    UnknownName(&'static str),
    /// Wrong token count; payload is the complete message
    ArgCount(&'static str),
    TraceRead(io::Error),
    ConfigsRead(io::Error),
    MalformedTrace,
}

impl ConfigError {
    pub fn new(config_id: u32, arg_index: u32, kind: ConfigErrorKind) -> Self {
        Self {
            config_id,
            arg_index,
            kind,
        }
    }

    /// The process exit code the CLI reports for this error.
    pub fn exit_code(&self) -> i32 {
        ((self.config_id << 3) | self.arg_index) as i32
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}: {}", self.arg_index, self.config_id, self.kind)
    }
}

impl fmt::Display for ConfigErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErrorKind::BadNumber(what) => write!(f, "Invalid format for {what}"),
            ConfigErrorKind::NotPowerOfTwo(what) => write!(f, "{what} must be a power of 2"),
            ConfigErrorKind::BadUnit => {
                f.write_str("Invalid cache size unit (expect either 'k' or 'M')")
            }
            ConfigErrorKind::LineLargerThanCache => {
                f.write_str("Line size cannot exceed the cache size")
            }
            ConfigErrorKind::TooManyWays => {
                f.write_str("Associativity cannot exceed the number of lines")
            }
            ConfigErrorKind::UnknownName(registry) => write!(f, "{registry} not found"),
            ConfigErrorKind::ArgCount(msg) => f.write_str(msg),
            ConfigErrorKind::TraceRead(e) => write!(f, "Trace file read error: {e}"),
            ConfigErrorKind::ConfigsRead(e) => write!(f, "Configs file read error: {e}"),
            ConfigErrorKind::MalformedTrace => f.write_str("Malformed trace file"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.kind {
            ConfigErrorKind::TraceRead(e) | ConfigErrorKind::ConfigsRead(e) => Some(e),
            _ => None,
        }
    }
}

/// Parse one configuration from its tokens. `config_id` is carried into
/// any error (and the resulting config) for exit-code construction.
pub fn parse_config(config_id: u32, tokens: &[&str]) -> Result<SystemConfig, ConfigError> {
    let err = |arg_index, kind| ConfigError::new(config_id, arg_index, kind);

    if tokens.len() < 5 {
        return Err(err(
            arg::CONFIG_COUNT,
            ConfigErrorKind::ArgCount("Too few arguments in cache config"),
        ));
    }
    if tokens.len() > 6 {
        return Err(err(
            arg::CONFIG_COUNT,
            ConfigErrorKind::ArgCount("Too many arguments in cache config"),
        ));
    }

    let cache_size = parse_cache_size(tokens[0]).map_err(|kind| err(arg::CACHE_SIZE, kind))?;

    let line_size = parse_pow2(tokens[1], "line size (expect positive integer)", "Line size")
        .map_err(|kind| err(arg::LINE_SIZE, kind))?;
    if line_size > cache_size {
        return Err(err(arg::LINE_SIZE, ConfigErrorKind::LineLargerThanCache));
    }

    let assoc = parse_pow2(
        tokens[2],
        "associativity (expect positive integer)",
        "Associativity",
    )
    .map_err(|kind| err(arg::ASSOCIATIVITY, kind))?;
    if assoc as u64 * line_size as u64 > cache_size as u64 {
        return Err(err(arg::ASSOCIATIVITY, ConfigErrorKind::TooManyWays));
    }

    let coherence = CoherenceKind::from_name(tokens[3])
        .ok_or_else(|| err(arg::COHERENCE, ConfigErrorKind::UnknownName("Coherence protocol")))?;
    let replacer = ReplacerKind::from_name(tokens[4])
        .ok_or_else(|| err(arg::REPLACER, ConfigErrorKind::UnknownName("Replacement policy")))?;
    let directory = match tokens.get(5) {
        Some(name) => DirectoryKind::from_name(name)
            .ok_or_else(|| err(arg::DIRECTORY, ConfigErrorKind::UnknownName("Directory protocol")))?,
        None => DirectoryKind::Broadcast,
    };

    Ok(SystemConfig {
        id: config_id,
        cache_size,
        line_size,
        assoc,
        coherence,
        replacer,
        directory,
    })
}

/// Parse the cache size with its optional `k`/`M` unit suffix. The power
/// of two check applies to the number before the unit; both units preserve
/// it.
fn parse_cache_size(token: &str) -> Result<u32, ConfigErrorKind> {
    const WHAT: &str = "cache size (expect positive number of bytes)";
    let digits_end = token
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(token.len());
    let (number, unit) = token.split_at(digits_end);
    let value: u32 = number
        .parse()
        .map_err(|_| ConfigErrorKind::BadNumber(WHAT))?;
    if value == 0 || !value.is_power_of_two() {
        return Err(ConfigErrorKind::NotPowerOfTwo("Cache size"));
    }
    let multiplier = match unit {
        "" => 1,
        "k" => 1024,
        "M" => 1024 * 1024,
        _ => return Err(ConfigErrorKind::BadUnit),
    };
    value
        .checked_mul(multiplier)
        .ok_or(ConfigErrorKind::BadNumber(WHAT))
}

fn parse_pow2(
    token: &str,
    bad_number: &'static str,
    subject: &'static str,
) -> Result<u32, ConfigErrorKind> {
    let value: u32 = token
        .parse()
        .map_err(|_| ConfigErrorKind::BadNumber(bad_number))?;
    if value == 0 || !value.is_power_of_two() {
        return Err(ConfigErrorKind::NotPowerOfTwo(subject));
    }
    Ok(value)
}

/// Parse the optional trace limit argument. A limit of zero means
/// unlimited, as does omitting the argument.
pub fn parse_trace_limit(token: &str) -> Result<Option<usize>, ConfigErrorKind> {
    let value: usize = token
        .parse()
        .map_err(|_| ConfigErrorKind::BadNumber("trace limit (expect positive integer)"))?;
    Ok(if value == 0 { None } else { Some(value) })
}

/// Read a configs file: one configuration per line, ids numbered from 1.
/// Blank lines and `#` comment lines are skipped.
pub fn read_configurations(path: &str) -> Result<Vec<SystemConfig>, ConfigError> {
    let text = fs::read_to_string(path).map_err(|e| {
        ConfigError::new(0, arg::CONFIGS_FILE, ConfigErrorKind::ConfigsRead(e))
    })?;

    let mut configs = Vec::new();
    let mut config_id = 1;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        configs.push(parse_config(config_id, &tokens)?);
        config_id += 1;
    }
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(line: &str) -> Vec<&str> {
        line.split_whitespace().collect()
    }

    #[test]
    fn parses_a_full_configuration() {
        let config = parse_config(0, &tokens("4k 64 2 MESI LRU Broadcast")).unwrap();
        assert_eq!(config.cache_size, 4096);
        assert_eq!(config.line_size, 64);
        assert_eq!(config.assoc, 2);
        assert_eq!(config.coherence, CoherenceKind::Mesi);
        assert_eq!(config.replacer, ReplacerKind::Lru);
        assert_eq!(config.directory, DirectoryKind::Broadcast);
    }

    #[test]
    fn directory_defaults_to_broadcast() {
        let config = parse_config(0, &tokens("1M 32 4 dragon fifo")).unwrap();
        assert_eq!(config.cache_size, 1024 * 1024);
        assert_eq!(config.directory, DirectoryKind::Broadcast);
    }

    #[test]
    fn rejects_bad_units_and_sizes() {
        let err = parse_config(0, &tokens("4q 64 2 MESI LRU")).unwrap_err();
        assert_eq!(err.arg_index, arg::CACHE_SIZE);
        assert!(matches!(err.kind, ConfigErrorKind::BadUnit));

        let err = parse_config(0, &tokens("48 16 2 MESI LRU")).unwrap_err();
        assert!(matches!(err.kind, ConfigErrorKind::NotPowerOfTwo(_)));

        let err = parse_config(0, &tokens("16 64 2 MESI LRU")).unwrap_err();
        assert_eq!(err.arg_index, arg::LINE_SIZE);
        assert!(matches!(err.kind, ConfigErrorKind::LineLargerThanCache));

        let err = parse_config(0, &tokens("64 16 8 MESI LRU")).unwrap_err();
        assert_eq!(err.arg_index, arg::ASSOCIATIVITY);
        assert!(matches!(err.kind, ConfigErrorKind::TooManyWays));
    }

    #[test]
    fn rejects_unknown_registry_names() {
        let err = parse_config(2, &tokens("4k 64 2 MOSI LRU")).unwrap_err();
        assert_eq!(err.arg_index, arg::COHERENCE);
        assert_eq!(err.exit_code(), (2 << 3) | 4);

        let err = parse_config(0, &tokens("4k 64 2 MESI CLOCK")).unwrap_err();
        assert_eq!(err.arg_index, arg::REPLACER);

        let err = parse_config(0, &tokens("4k 64 2 MESI LRU Mesh")).unwrap_err();
        assert_eq!(err.arg_index, arg::DIRECTORY);
    }

    #[test]
    fn rejects_wrong_token_counts() {
        let err = parse_config(1, &tokens("4k 64 2 MESI")).unwrap_err();
        assert!(matches!(err.kind, ConfigErrorKind::ArgCount(_)));
        let err = parse_config(1, &tokens("4k 64 2 MESI LRU Broadcast extra")).unwrap_err();
        assert!(matches!(err.kind, ConfigErrorKind::ArgCount(_)));
    }

    #[test]
    fn error_display_names_the_argument_and_config() {
        let err = parse_config(3, &tokens("4k 64 0 MESI LRU")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "3@3: Associativity must be a power of 2"
        );
    }

    #[test]
    fn trace_limit_zero_means_unlimited() {
        assert_eq!(parse_trace_limit("0").unwrap(), None);
        assert_eq!(parse_trace_limit("250").unwrap(), Some(250));
        assert!(parse_trace_limit("ten").is_err());
    }

    #[test]
    fn exit_code_packs_config_id_and_arg_index() {
        let err = ConfigError::new(5, arg::LINE_SIZE, ConfigErrorKind::LineLargerThanCache);
        assert_eq!(err.exit_code(), (5 << 3) | 2);
    }
}
