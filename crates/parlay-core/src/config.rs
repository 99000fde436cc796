//! Dispatcher configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::ipc::WorkerSpec;

/// Default promotion threshold: arrays of 1 MiB or more are memory-mapped.
pub const DEFAULT_MAX_NBYTES: usize = 1024 * 1024;

/// How many units may be submitted ahead of their completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreDispatch {
    /// No bound: the whole input is dispatched as fast as it is produced.
    #[default]
    All,
    /// At most this many outstanding units.
    Limit(usize),
    /// At most this many outstanding units per worker.
    PerWorker(usize),
}

impl PreDispatch {
    /// Window size for `workers` workers; `None` means unbounded.
    pub fn limit(self, workers: usize) -> Result<Option<usize>> {
        let limit = match self {
            PreDispatch::All => return Ok(None),
            PreDispatch::Limit(n) => n,
            PreDispatch::PerWorker(k) => k.saturating_mul(workers.max(1)),
        };
        if limit == 0 {
            return Err(Error::Config(format!(
                "pre_dispatch must allow at least one unit, got {}",
                self
            )));
        }
        Ok(Some(limit))
    }
}

impl fmt::Display for PreDispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreDispatch::All => write!(f, "all"),
            PreDispatch::Limit(n) => write!(f, "{}", n),
            PreDispatch::PerWorker(k) => write!(f, "{}*n_jobs", k),
        }
    }
}

impl FromStr for PreDispatch {
    type Err = Error;

    /// Accepts `all`, `<n>`, `n_jobs` and `<k>*n_jobs`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(PreDispatch::All);
        }
        let invalid = || Error::Config(format!("invalid pre_dispatch value: {:?}", s));
        if s == "n_jobs" {
            return Ok(PreDispatch::PerWorker(1));
        }
        if let Some(factor) = s.strip_suffix("n_jobs") {
            let factor = factor.trim().strip_suffix('*').ok_or_else(invalid)?;
            return factor.trim().parse().map(PreDispatch::PerWorker).map_err(|_| invalid());
        }
        s.parse().map(PreDispatch::Limit).map_err(|_| invalid())
    }
}

impl From<usize> for PreDispatch {
    fn from(n: usize) -> Self {
        PreDispatch::Limit(n)
    }
}

/// Parse a byte size such as `1M`, `512K`, `4096` or `none`.
pub fn parse_byte_size(s: &str) -> Result<Option<usize>> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    let invalid = || Error::Config(format!("invalid byte size: {:?}", s));
    let (digits, multiplier) = match s.chars().last().map(|c| c.to_ascii_uppercase()) {
        Some('K') => (&s[..s.len() - 1], 1024),
        Some('M') => (&s[..s.len() - 1], 1024 * 1024),
        Some('G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    let n: usize = digits.trim().parse().map_err(|_| invalid())?;
    n.checked_mul(multiplier).map(Some).ok_or_else(invalid)
}

/// Configuration for one dispatcher.
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    /// Requested workers: `n > 1` workers, `0`/`1` sequential, `-k` for
    /// all but `k - 1` available CPUs.
    pub n_jobs: i64,
    /// Backpressure window.
    pub pre_dispatch: PreDispatch,
    /// Progress verbosity, 0 is silent.
    pub verbose: u32,
    /// Promotion threshold for in-memory arrays; `None` disables promotion.
    pub max_nbytes: Option<usize>,
    /// Parent directory for the scratch arena (system temp dir when unset).
    pub temp_folder: Option<PathBuf>,
    /// Worker executable.
    pub worker: WorkerSpec,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            n_jobs: 1,
            pre_dispatch: PreDispatch::All,
            verbose: 0,
            max_nbytes: Some(DEFAULT_MAX_NBYTES),
            temp_folder: None,
            worker: WorkerSpec::default(),
        }
    }
}

impl ParallelConfig {
    /// Defaults overridden by `PARLAY_WORKER_PATH`, `PARLAY_TEMP_FOLDER` and
    /// `PARLAY_MAX_NBYTES`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("PARLAY_WORKER_PATH") {
            config.worker.program = Some(PathBuf::from(path));
        }
        if let Ok(folder) = std::env::var("PARLAY_TEMP_FOLDER") {
            config.temp_folder = Some(PathBuf::from(folder));
        }
        if let Ok(size) = std::env::var("PARLAY_MAX_NBYTES") {
            config.max_nbytes = parse_byte_size(&size)?;
        }
        Ok(config)
    }

    pub fn n_jobs(mut self, n_jobs: i64) -> Self {
        self.n_jobs = n_jobs;
        self
    }

    pub fn pre_dispatch(mut self, pre_dispatch: impl Into<PreDispatch>) -> Self {
        self.pre_dispatch = pre_dispatch.into();
        self
    }

    pub fn verbose(mut self, verbose: u32) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn max_nbytes(mut self, max_nbytes: Option<usize>) -> Self {
        self.max_nbytes = max_nbytes;
        self
    }

    pub fn temp_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.temp_folder = Some(folder.into());
        self
    }

    pub fn worker_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.worker.program = Some(program.into());
        self
    }

    /// Extra command-line argument passed to every worker.
    pub fn worker_arg(mut self, arg: impl Into<String>) -> Self {
        self.worker = self.worker.with_arg(arg);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pre_dispatch() {
        assert_eq!("all".parse::<PreDispatch>().unwrap(), PreDispatch::All);
        assert_eq!("3".parse::<PreDispatch>().unwrap(), PreDispatch::Limit(3));
        assert_eq!("2*n_jobs".parse::<PreDispatch>().unwrap(), PreDispatch::PerWorker(2));
        assert_eq!("2 * n_jobs".parse::<PreDispatch>().unwrap(), PreDispatch::PerWorker(2));
        assert_eq!("n_jobs".parse::<PreDispatch>().unwrap(), PreDispatch::PerWorker(1));
        assert!("lots".parse::<PreDispatch>().is_err());
        assert!("2n_jobs".parse::<PreDispatch>().is_err());
    }

    #[test]
    fn test_limit_resolution() {
        assert_eq!(PreDispatch::All.limit(4).unwrap(), None);
        assert_eq!(PreDispatch::Limit(3).limit(4).unwrap(), Some(3));
        assert_eq!(PreDispatch::PerWorker(2).limit(4).unwrap(), Some(8));
        assert!(matches!(PreDispatch::Limit(0).limit(4), Err(Error::Config(_))));
    }

    #[test]
    fn test_parse_byte_size() {
        assert_eq!(parse_byte_size("4096").unwrap(), Some(4096));
        assert_eq!(parse_byte_size("1M").unwrap(), Some(1024 * 1024));
        assert_eq!(parse_byte_size("512k").unwrap(), Some(512 * 1024));
        assert_eq!(parse_byte_size("none").unwrap(), None);
        assert!(parse_byte_size("big").is_err());
    }

    #[test]
    fn test_builder() {
        let config = ParallelConfig::default()
            .n_jobs(-1)
            .pre_dispatch(2usize)
            .max_nbytes(None)
            .worker_program("/opt/parlay-worker")
            .worker_arg("-v");
        assert_eq!(config.n_jobs, -1);
        assert_eq!(config.pre_dispatch, PreDispatch::Limit(2));
        assert_eq!(config.max_nbytes, None);
        assert_eq!(config.worker.program, Some(PathBuf::from("/opt/parlay-worker")));
        assert_eq!(config.worker.args, vec!["-v".to_string()]);
    }
}
