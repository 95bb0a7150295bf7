use core::time::Duration;

use anyhow::{anyhow, bail};
use clap::{Parser, ValueEnum};
use idforge::{
    CoordinationConfig, CounterConfig, LocalConfig, MAX_BATCH_COUNT, PackedId, RetryConfig,
    RetryType,
};

/// Which generator to draw IDs from.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Snowflake IDs generated in-process.
    Local,
    /// Timestamp plus a shared counter.
    Counter,
    /// Node versions in the coordination service.
    Sequence,
}

/// Command line options for the `idforge` binary.
///
/// Every option can also be set through the environment (or a `.env` file in
/// the working directory); command line flags win.
#[derive(Parser, Debug, Clone)]
#[command(name = "idforge", version, about = "Generate unique IDs")]
pub struct CliArgs {
    /// Generator to use.
    ///
    /// Environment variable: `IDFORGE_STRATEGY`
    #[arg(long, env = "IDFORGE_STRATEGY", value_enum, default_value_t = Strategy::Local)]
    pub strategy: Strategy,

    /// Number of IDs to print, in `[1, 1000]`.
    ///
    /// Environment variable: `IDFORGE_COUNT`
    #[arg(short = 'n', long, env = "IDFORGE_COUNT", default_value_t = 1)]
    pub count: usize,

    /// Datacenter ID for local IDs, in `[0, 31]`.
    ///
    /// Environment variable: `IDFORGE_DATACENTER_ID`
    #[arg(long, env = "IDFORGE_DATACENTER_ID", default_value_t = 0)]
    pub datacenter_id: u64,

    /// Machine ID for local IDs, in `[0, 31]`.
    ///
    /// Environment variable: `IDFORGE_MACHINE_ID`
    #[arg(long, env = "IDFORGE_MACHINE_ID", default_value_t = 0)]
    pub machine_id: u64,

    /// Print the fields packed into each local ID next to it.
    #[arg(long, default_value_t = false)]
    pub decode: bool,

    /// Namespace for counter keys and the root sequence node.
    ///
    /// Environment variable: `IDFORGE_PREFIX`
    #[arg(long, env = "IDFORGE_PREFIX", default_value_t = String::from("idforge"))]
    pub prefix: String,

    /// Business name part of the counter or sequence key.
    ///
    /// Environment variable: `IDFORGE_NAME`
    #[arg(long, env = "IDFORGE_NAME", default_value_t = String::from("default"))]
    pub name: String,

    /// Key part of the counter or sequence key.
    ///
    /// Environment variable: `IDFORGE_KEY`
    #[arg(long, env = "IDFORGE_KEY", default_value_t = String::from("default"))]
    pub key: String,

    /// Counter increment per ID.
    ///
    /// Environment variable: `IDFORGE_STEP`
    #[arg(long, env = "IDFORGE_STEP", default_value_t = 1)]
    pub step: u64,

    /// Width of the counter suffix.
    ///
    /// Environment variable: `IDFORGE_LENGTH`
    #[arg(long, env = "IDFORGE_LENGTH", default_value_t = 8)]
    pub length: usize,

    /// Coordination ensemble, as a comma-separated `host:port` list.
    ///
    /// Environment variable: `IDFORGE_CONNECT_STRING`
    #[arg(long, env = "IDFORGE_CONNECT_STRING", default_value_t = String::from("localhost:2181"))]
    pub connect_string: String,

    /// Retry strategy for coordination operations.
    ///
    /// Environment variable: `IDFORGE_RETRY_TYPE`
    #[arg(long, env = "IDFORGE_RETRY_TYPE", default_value_t = String::from("exponentialBackoffRetry"))]
    pub retry_type: String,

    /// Base sleep of both exponential backoff strategies.
    ///
    /// Environment variable: `IDFORGE_RETRY_BASE_SLEEP_MS`
    #[arg(long, env = "IDFORGE_RETRY_BASE_SLEEP_MS")]
    pub retry_base_sleep_ms: Option<u64>,

    /// Retry limit of both exponential backoff strategies, capped at 29.
    ///
    /// Environment variable: `IDFORGE_RETRY_MAX_RETRIES`
    #[arg(long, env = "IDFORGE_RETRY_MAX_RETRIES")]
    pub retry_max_retries: Option<u32>,

    /// Longest single sleep of `boundedExponentialBackoffRetry`.
    ///
    /// Environment variable: `IDFORGE_RETRY_MAX_SLEEP_MS`
    #[arg(long, env = "IDFORGE_RETRY_MAX_SLEEP_MS")]
    pub retry_max_sleep_ms: Option<u64>,

    /// Retry limit of `retryNTimes`.
    ///
    /// Environment variable: `IDFORGE_RETRY_COUNT`
    #[arg(long, env = "IDFORGE_RETRY_COUNT")]
    pub retry_count: Option<u32>,

    /// Sleep between attempts for `retryNTimes` and `retryUntilElapsed`.
    ///
    /// Environment variable: `IDFORGE_RETRY_SLEEP_BETWEEN_MS`
    #[arg(long, env = "IDFORGE_RETRY_SLEEP_BETWEEN_MS")]
    pub retry_sleep_between_ms: Option<u64>,

    /// Sleep between attempts for `retryForever`.
    ///
    /// Environment variable: `IDFORGE_RETRY_INTERVAL_MS`
    #[arg(long, env = "IDFORGE_RETRY_INTERVAL_MS")]
    pub retry_interval_ms: Option<u64>,

    /// Total retry window of `retryUntilElapsed`.
    ///
    /// Environment variable: `IDFORGE_RETRY_MAX_ELAPSED_MS`
    #[arg(long, env = "IDFORGE_RETRY_MAX_ELAPSED_MS")]
    pub retry_max_elapsed_ms: Option<u64>,

    /// Environment variable: `IDFORGE_SESSION_TIMEOUT_MS`
    #[arg(long, env = "IDFORGE_SESSION_TIMEOUT_MS", default_value_t = 15_000)]
    pub session_timeout_ms: u64,

    /// Environment variable: `IDFORGE_CONNECTION_TIMEOUT_MS`
    #[arg(long, env = "IDFORGE_CONNECTION_TIMEOUT_MS", default_value_t = 15_000)]
    pub connection_timeout_ms: u64,

    /// Give up on starting the coordination session after this long. Zero
    /// waits indefinitely.
    ///
    /// Environment variable: `IDFORGE_START_TIMEOUT_MS`
    #[arg(long, env = "IDFORGE_START_TIMEOUT_MS", default_value_t = 30_000)]
    pub start_timeout_ms: u64,

    /// Run the counter and sequence strategies against the in-process
    /// backends. Their state lives only as long as the process, so IDs
    /// repeat across runs.
    ///
    /// Environment variable: `IDFORGE_IN_PROCESS`
    #[arg(long, env = "IDFORGE_IN_PROCESS", default_value_t = false)]
    pub in_process: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub strategy: Strategy,
    pub count: usize,
    pub decode: bool,
    pub name: String,
    pub key: String,
    pub local: LocalConfig,
    pub counter: CounterConfig,
    pub coordination: CoordinationConfig,
    pub start_timeout: Option<Duration>,
    pub in_process: bool,
}

impl TryFrom<CliArgs> for AppConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.count == 0 || args.count > MAX_BATCH_COUNT {
            bail!(
                "IDFORGE_COUNT ({}) must be between 1 and {}",
                args.count,
                MAX_BATCH_COUNT
            );
        }

        if args.datacenter_id > PackedId::DATACENTER_ID_MASK {
            bail!(
                "IDFORGE_DATACENTER_ID ({}) exceeds the datacenter ID space (max = {})",
                args.datacenter_id,
                PackedId::DATACENTER_ID_MASK
            );
        }
        if args.machine_id > PackedId::MACHINE_ID_MASK {
            bail!(
                "IDFORGE_MACHINE_ID ({}) exceeds the machine ID space (max = {})",
                args.machine_id,
                PackedId::MACHINE_ID_MASK
            );
        }

        if args.strategy != Strategy::Local {
            if !args.in_process {
                bail!(
                    "the {:?} strategy needs a shared backend and this binary only ships \
                     in-process ones; set IDFORGE_IN_PROCESS to use them anyway (IDs repeat \
                     across runs)",
                    args.strategy
                );
            }
            for (var, value) in [
                ("IDFORGE_PREFIX", &args.prefix),
                ("IDFORGE_NAME", &args.name),
                ("IDFORGE_KEY", &args.key),
            ] {
                if value.is_empty() {
                    bail!("{var} must not be empty");
                }
            }
        }

        if args.strategy == Strategy::Counter {
            if args.step == 0 {
                bail!("IDFORGE_STEP must be greater than 0");
            }
            if args.length == 0 {
                bail!("IDFORGE_LENGTH must be greater than 0");
            }
        }

        let retry_type: RetryType = args
            .retry_type
            .parse()
            .map_err(|e| anyhow!("IDFORGE_RETRY_TYPE: {e}"))?;
        if args.strategy == Strategy::Sequence && args.connect_string.trim().is_empty() {
            bail!("IDFORGE_CONNECT_STRING must not be empty");
        }

        let retry = retry_config(&args, retry_type);

        Ok(Self {
            strategy: args.strategy,
            count: args.count,
            decode: args.decode,
            local: LocalConfig {
                datacenter_id: args.datacenter_id,
                machine_id: args.machine_id,
            },
            counter: CounterConfig {
                prefix: args.prefix.clone(),
                length: args.length,
                step: args.step,
            },
            coordination: CoordinationConfig {
                prefix: args.prefix,
                connect_string: args.connect_string,
                session_timeout_ms: args.session_timeout_ms,
                connection_timeout_ms: args.connection_timeout_ms,
                retry,
            },
            in_process: args.in_process,
            start_timeout: (args.start_timeout_ms > 0)
                .then(|| Duration::from_millis(args.start_timeout_ms)),
            name: args.name,
            key: args.key,
        })
    }
}

/// The tagged strategy plus every parameter set, with the defaults replaced
/// wherever a flag was given.
fn retry_config(args: &CliArgs, retry_type: RetryType) -> RetryConfig {
    let mut retry = RetryConfig {
        retry_type: retry_type.as_str().to_string(),
        ..RetryConfig::default()
    };
    if let Some(ms) = args.retry_base_sleep_ms {
        retry.exponential_backoff_retry.base_sleep_time_ms = ms;
        retry.bounded_exponential_backoff_retry.base_sleep_time_ms = ms;
    }
    if let Some(n) = args.retry_max_retries {
        retry.exponential_backoff_retry.max_retries = n;
        retry.bounded_exponential_backoff_retry.max_retries = n;
    }
    if let Some(ms) = args.retry_max_sleep_ms {
        retry.bounded_exponential_backoff_retry.max_sleep_time_ms = ms;
    }
    if let Some(n) = args.retry_count {
        retry.retry_n_times.count = n;
    }
    if let Some(ms) = args.retry_sleep_between_ms {
        retry.retry_n_times.sleep_ms_between_retries = ms;
        retry.retry_until_elapsed.sleep_ms_between_retries = ms;
    }
    if let Some(ms) = args.retry_interval_ms {
        retry.retry_forever.retry_interval_ms = ms;
    }
    if let Some(ms) = args.retry_max_elapsed_ms {
        retry.retry_until_elapsed.max_elapsed_time_ms = ms;
    }
    retry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<AppConfig> {
        let args = CliArgs::try_parse_from(["idforge"].iter().chain(args))?;
        AppConfig::try_from(args)
    }

    #[test]
    fn defaults_select_local_strategy() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.strategy, Strategy::Local);
        assert_eq!(config.count, 1);
        assert_eq!(config.local, LocalConfig::default());
        assert_eq!(config.counter.length, 8);
        assert_eq!(config.start_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn counter_options_flow_into_config() {
        let config = parse(&[
            "--strategy", "counter", "--in-process", "--name", "order", "--key", "k1", "--length", "4",
            "--step", "2", "-n", "5",
        ])
        .unwrap();
        assert_eq!(config.strategy, Strategy::Counter);
        assert_eq!(config.count, 5);
        assert_eq!((config.name.as_str(), config.key.as_str()), ("order", "k1"));
        assert_eq!(config.counter.length, 4);
        assert_eq!(config.counter.step, 2);
    }

    #[test]
    fn retry_type_is_normalized() {
        let config = parse(&[
            "--strategy", "sequence", "--in-process", "--retry-type", " RETRYFOREVER ",
        ])
        .unwrap();
        assert_eq!(config.coordination.retry.retry_type, "retryForever");
    }

    #[test]
    fn retry_parameters_flow_into_every_set() {
        let config = parse(&[
            "--retry-base-sleep-ms", "100", "--retry-max-retries", "3",
            "--retry-max-sleep-ms", "400", "--retry-count", "5",
            "--retry-sleep-between-ms", "50", "--retry-interval-ms", "250",
            "--retry-max-elapsed-ms", "9000",
        ])
        .unwrap();
        let retry = config.coordination.retry;
        assert_eq!(retry.exponential_backoff_retry.base_sleep_time_ms, 100);
        assert_eq!(retry.exponential_backoff_retry.max_retries, 3);
        assert_eq!(retry.bounded_exponential_backoff_retry.base_sleep_time_ms, 100);
        assert_eq!(retry.bounded_exponential_backoff_retry.max_sleep_time_ms, 400);
        assert_eq!(retry.bounded_exponential_backoff_retry.max_retries, 3);
        assert_eq!(retry.retry_n_times.count, 5);
        assert_eq!(retry.retry_n_times.sleep_ms_between_retries, 50);
        assert_eq!(retry.retry_forever.retry_interval_ms, 250);
        assert_eq!(retry.retry_until_elapsed.max_elapsed_time_ms, 9000);
        assert_eq!(retry.retry_until_elapsed.sleep_ms_between_retries, 50);
    }

    #[test]
    fn unset_retry_parameters_keep_defaults() {
        let config = parse(&["--retry-count", "2"]).unwrap();
        let retry = config.coordination.retry;
        assert_eq!(retry.retry_n_times.count, 2);
        assert_eq!(
            retry.retry_forever,
            RetryConfig::default().retry_forever
        );
        assert_eq!(
            retry.exponential_backoff_retry,
            RetryConfig::default().exponential_backoff_retry
        );
    }

    #[test]
    fn shared_backend_strategies_require_in_process_opt_in() {
        for strategy in ["counter", "sequence"] {
            let err = parse(&["--strategy", strategy]).unwrap_err();
            assert!(err.to_string().contains("IDFORGE_IN_PROCESS"));
            let config = parse(&["--strategy", strategy, "--in-process"]).unwrap();
            assert!(config.in_process);
        }
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(parse(&["-n", "0"]).is_err());
        assert!(parse(&["-n", "1001"]).is_err());
        assert!(parse(&["--machine-id", "32"]).is_err());
        assert!(parse(&["--retry-type", "unknownType"]).is_err());
        assert!(parse(&["--strategy", "counter", "--in-process", "--length", "0"]).is_err());
        assert!(parse(&["--strategy", "sequence", "--in-process", "--key", ""]).is_err());
        assert!(
            parse(&["--strategy", "sequence", "--in-process", "--connect-string", " "]).is_err()
        );
    }

    #[test]
    fn zero_start_timeout_waits_forever() {
        let config = parse(&["--start-timeout-ms", "0"]).unwrap();
        assert_eq!(config.start_timeout, None);
    }
}
