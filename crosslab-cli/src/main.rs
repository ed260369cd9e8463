//! CrossLab CLI: download, backtest, optimize, validate, screen, and watch commands.
//!
//! Commands:
//! - `download`: fetch candles and cache them as Parquet
//! - `backtest`: run one backtest and optionally save its artifacts
//! - `optimize`: grid search over the `[optimizer]` lists
//! - `validate`: trailing-month robustness report
//! - `screen`: rank symbols by liquidity, volatility, spread, and trend
//! - `watch`: re-run the backtest on fresh data at a fixed interval
//! - `cache status`: report cached ranges per symbol

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crosslab_core::data::{
    download_symbols, BinanceProvider, CachedProvider, CandleProvider, CircuitBreaker,
    CsvProvider, ParquetCache, StdoutProgress, SyntheticProvider,
};
use crosslab_core::domain::Timeframe;
use crosslab_runner::{
    analyze_pairs, optimize_strategy, run_backtest, save_artifacts, save_json,
    validate_robustness, BacktestConfig, BacktestParams, BacktestResult, DataSourceKind,
    RobustnessParams, Scheduler, ScreeningParams, SweepOptions,
};

#[derive(Parser)]
#[command(
    name = "crosslab",
    about = "CrossLab CLI: EMA-cross / RSI crypto backtesting engine"
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Parquet cache directory. Overrides `[data] cache_dir`.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Candle source. Overrides `[data] source`.
    #[arg(long, value_enum, global = true)]
    source: Option<SourceArg>,

    /// Directory of `{SYMBOL}_{timeframe}.csv` files for `--source csv`.
    #[arg(long, global = true)]
    csv_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    Binance,
    Csv,
    Synthetic,
}

impl From<SourceArg> for DataSourceKind {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Binance => DataSourceKind::Binance,
            SourceArg::Csv => DataSourceKind::Csv,
            SourceArg::Synthetic => DataSourceKind::Synthetic,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch candles and cache them as Parquet.
    Download {
        /// Symbols to download (e.g., BTCUSDT ETHUSDT).
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Candle interval (1m, 5m, 15m, 30m, 1h, 4h, 1d).
        #[arg(long)]
        timeframe: Option<Timeframe>,

        /// Start (YYYY-MM-DD or RFC 3339). Defaults to 365 days before the end.
        #[arg(long)]
        start: Option<String>,

        /// End (YYYY-MM-DD or RFC 3339). Defaults to now.
        #[arg(long)]
        end: Option<String>,

        /// Re-download even if cached.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Run a single backtest.
    Backtest {
        #[command(flatten)]
        run: RunArgs,

        /// Save result.json, trades.csv, and equity.csv here.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Grid search over the `[optimizer]` parameter lists.
    Optimize {
        #[command(flatten)]
        run: RunArgs,

        /// Worker threads. Defaults to `[optimizer] max_threads`, then one per core.
        #[arg(long)]
        threads: Option<usize>,

        /// Write the full optimization report as JSON.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Replay the strategy over trailing one-month windows.
    Validate {
        #[arg(long)]
        symbol: Option<String>,

        #[arg(long)]
        timeframe: Option<Timeframe>,

        /// Number of trailing months. Defaults to `[robustness] months`.
        #[arg(long)]
        months: Option<u32>,

        /// Write the robustness report as JSON.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Rank symbols for trading suitability.
    Screen {
        #[arg(required = true)]
        symbols: Vec<String>,

        #[arg(long)]
        timeframe: Option<Timeframe>,

        #[arg(long, default_value_t = 30)]
        lookback_days: i64,

        /// Only print the best N symbols.
        #[arg(long)]
        top: Option<usize>,

        /// Write the ranking as JSON.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Periodically re-run the backtest over the trailing window.
    Watch {
        #[arg(long)]
        symbol: Option<String>,

        #[arg(long)]
        timeframe: Option<Timeframe>,

        /// Trailing window length in days.
        #[arg(long, default_value_t = 30)]
        days: i64,

        #[arg(long, default_value_t = 60)]
        interval_mins: u64,

        /// Stop after this many runs. Runs until interrupted otherwise.
        #[arg(long)]
        max_runs: Option<usize>,

        /// Save each run's artifacts under `<dir>/<run index>/`.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report cached ranges and candle counts.
    Status {
        #[arg(required = true)]
        symbols: Vec<String>,

        #[arg(long)]
        timeframe: Option<Timeframe>,
    },
}

/// Flags shared by commands that run over a date range.
#[derive(clap::Args)]
struct RunArgs {
    #[arg(long)]
    symbol: Option<String>,

    #[arg(long)]
    timeframe: Option<Timeframe>,

    /// Start (YYYY-MM-DD or RFC 3339).
    #[arg(long)]
    start: Option<String>,

    /// End (YYYY-MM-DD or RFC 3339).
    #[arg(long)]
    end: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "crosslab=info,crosslab_core=info,crosslab_runner=info".into()
        }))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    info!(source = ?config.data.source, cache_dir = %config.data.cache_dir.display(), "configuration loaded");

    match cli.command {
        Commands::Download {
            symbols,
            timeframe,
            start,
            end,
            force,
        } => run_download(&config, symbols, timeframe, start, end, force),
        Commands::Backtest { run, output_dir } => run_backtest_cmd(&config, run, output_dir),
        Commands::Optimize {
            run,
            threads,
            output,
        } => run_optimize(&config, run, threads, output),
        Commands::Validate {
            symbol,
            timeframe,
            months,
            output,
        } => run_validate(&config, symbol, timeframe, months, output),
        Commands::Screen {
            symbols,
            timeframe,
            lookback_days,
            top,
            output,
        } => run_screen(&config, symbols, timeframe, lookback_days, top, output),
        Commands::Watch {
            symbol,
            timeframe,
            days,
            interval_mins,
            max_runs,
            output_dir,
        } => run_watch(
            &config,
            symbol,
            timeframe,
            days,
            interval_mins,
            max_runs,
            output_dir,
        ),
        Commands::Cache { action } => match action {
            CacheAction::Status { symbols, timeframe } => {
                run_cache_status(&config, symbols, timeframe)
            }
        },
    }
}

/// File values first, then global flags on top.
fn load_config(cli: &Cli) -> Result<BacktestConfig> {
    let mut config = match &cli.config {
        Some(path) => BacktestConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => BacktestConfig::default(),
    };
    if let Some(dir) = &cli.cache_dir {
        config.data.cache_dir = dir.clone();
    }
    if let Some(source) = cli.source {
        config.data.source = source.into();
    }
    if let Some(dir) = &cli.csv_dir {
        config.data.csv_dir = dir.clone();
    }
    Ok(config)
}

// ─── Providers ──────────────────────────────────────────────────────

/// The raw candle source selected by `[data] source`.
fn build_source(config: &BacktestConfig) -> Result<Box<dyn CandleProvider>> {
    Ok(match config.data.source {
        DataSourceKind::Binance => {
            let breaker = Arc::new(CircuitBreaker::default_provider());
            let mut provider = BinanceProvider::new(breaker)?;
            if let Some(url) = &config.data.base_url {
                provider = provider.with_base_url(url.clone());
            }
            Box::new(provider)
        }
        DataSourceKind::Csv => Box::new(CsvProvider::new(config.data.csv_dir.clone())),
        DataSourceKind::Synthetic => Box::new(SyntheticProvider::new()),
    })
}

/// Exchange data goes through the Parquet cache; local sources are read directly.
fn with_cache<'a>(
    source: &'a dyn CandleProvider,
    config: &BacktestConfig,
) -> Box<dyn CandleProvider + 'a> {
    match config.data.source {
        DataSourceKind::Binance => Box::new(CachedProvider::new(
            source,
            ParquetCache::new(config.data.cache_dir.clone()),
        )),
        DataSourceKind::Csv | DataSourceKind::Synthetic => Box::new(source),
    }
}

// ─── Commands ───────────────────────────────────────────────────────

fn run_download(
    config: &BacktestConfig,
    symbols: Vec<String>,
    timeframe: Option<Timeframe>,
    start: Option<String>,
    end: Option<String>,
    force: bool,
) -> Result<()> {
    let timeframe = timeframe.unwrap_or(config.backtest.timeframe);
    let end = parse_instant(end.as_deref())?.unwrap_or_else(Utc::now);
    let start = parse_instant(start.as_deref())?.unwrap_or(end - Duration::days(365));

    let source = build_source(config)?;
    let cache = ParquetCache::new(config.data.cache_dir.clone());
    let sym_refs: Vec<&str> = symbols.iter().map(String::as_str).collect();

    let summary = download_symbols(
        source.as_ref(),
        &cache,
        &sym_refs,
        timeframe,
        start,
        end,
        force,
        &StdoutProgress,
    );

    if !summary.all_succeeded() {
        for (sym, err) in &summary.errors {
            eprintln!("Error for {sym}: {err}");
        }
        std::process::exit(1);
    }
    Ok(())
}

fn run_backtest_cmd(config: &BacktestConfig, run: RunArgs, output_dir: Option<PathBuf>) -> Result<()> {
    let params = resolve_params(config, &run)?;
    let source = build_source(config)?;
    let provider = with_cache(source.as_ref(), config);

    let result = run_backtest(provider.as_ref(), &params)?;
    print_summary(&result);

    if let Some(dir) = output_dir {
        let paths = save_artifacts(&result, &dir)?;
        println!("Artifacts saved to: {}", dir.display());
        println!("  {}", paths.result_json.display());
    }
    Ok(())
}

fn run_optimize(
    config: &BacktestConfig,
    run: RunArgs,
    threads: Option<usize>,
    output: Option<PathBuf>,
) -> Result<()> {
    let params = resolve_params(config, &run)?;
    let source = build_source(config)?;
    let provider = with_cache(source.as_ref(), config);
    let options = SweepOptions::default().with_max_threads(threads.or(config.optimizer.max_threads));

    let result = optimize_strategy(
        provider.as_ref(),
        &params,
        &config.optimizer.grid,
        &options,
        None,
    )?;

    println!(
        "Evaluated {} grid points ({} failed)",
        result.evaluated, result.failed
    );
    let mut ranked: Vec<_> = result.all.iter().filter(|o| o.score.is_some()).collect();
    ranked.sort_by(|a, b| {
        b.score
            .unwrap_or(f64::MIN)
            .total_cmp(&a.score.unwrap_or(f64::MIN))
            .then(a.index.cmp(&b.index))
    });
    println!();
    println!(
        "{:>4} {:>8} {:>7} {:>7} {:>9} {:>8} {:>9}",
        "#", "size%", "sl%", "tp%", "profit%", "dd%", "score"
    );
    println!("{}", "-".repeat(58));
    for o in ranked.iter().take(10) {
        let (profit, dd) = o
            .metrics
            .as_ref()
            .map_or((0.0, 0.0), |m| (m.profit_percent, m.max_drawdown_percent));
        println!(
            "{:>4} {:>8.2} {:>7.2} {:>7.2} {:>9.2} {:>8.2} {:>9.2}",
            o.index,
            o.params.position_size_pct,
            o.params.stop_loss_pct,
            o.params.take_profit_pct,
            profit,
            dd,
            o.score.unwrap_or_default()
        );
    }
    println!();
    println!("Best (grid point {}):", result.best.index);
    print_summary(&result.best.result);

    if let Some(path) = output {
        save_json(&result, &path)?;
        println!("Report saved to: {}", path.display());
    }
    Ok(())
}

fn run_validate(
    config: &BacktestConfig,
    symbol: Option<String>,
    timeframe: Option<Timeframe>,
    months: Option<u32>,
    output: Option<PathBuf>,
) -> Result<()> {
    let params = RobustnessParams {
        symbol: symbol.unwrap_or_else(|| config.backtest.symbol.clone()),
        timeframe: timeframe.unwrap_or(config.backtest.timeframe),
        months: months.unwrap_or(config.robustness.months),
        now: Utc::now(),
        initial_balance: config.robustness.initial_balance,
        strategy: config.strategy,
    };
    let source = build_source(config)?;
    let provider = with_cache(source.as_ref(), config);
    let options = SweepOptions::default().with_max_threads(config.optimizer.max_threads);

    let report = validate_robustness(provider.as_ref(), &params, &options, None)?;

    println!(
        "{:<8} {:>7} {:>9} {:>8} {:>8} {:>8}",
        "Month", "Trades", "Profit%", "Win%", "DD%", "Sharpe"
    );
    println!("{}", "-".repeat(53));
    for w in &report.windows {
        match (&w.stats, &w.error) {
            (Some(s), _) => println!(
                "{:<8} {:>7} {:>9.2} {:>8.1} {:>8.2} {:>8.2}",
                w.month, s.total_trades, s.profit_percent, s.win_rate, s.max_drawdown_percent,
                s.sharpe_ratio
            ),
            (None, Some(e)) => println!("{:<8} failed: {e}", w.month),
            (None, None) => println!("{:<8} (no result)", w.month),
        }
    }
    println!();
    println!(
        "Mean profit: {:.2}% (σ {:.2}%)",
        report.mean_profit_percent, report.std_dev_profit_percent
    );
    println!(
        "Profitable months: {}/{} ({:.2}%)",
        report.profitable_months, report.evaluated_months, report.profitable_months_percent
    );
    println!("Mean win rate: {:.1}%", report.mean_win_rate);
    println!("Mean drawdown: {:.2}%", report.mean_drawdown_percent);
    println!("Mean Sharpe: {:.2}", report.mean_sharpe);
    println!("Robustness factor: {:.3}", report.robustness_factor);

    if let Some(path) = output {
        save_json(&report, &path)?;
        println!("Report saved to: {}", path.display());
    }
    Ok(())
}

fn run_screen(
    config: &BacktestConfig,
    symbols: Vec<String>,
    timeframe: Option<Timeframe>,
    lookback_days: i64,
    top: Option<usize>,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut params = ScreeningParams::new(
        symbols,
        timeframe.unwrap_or(config.backtest.timeframe),
        lookback_days,
        Utc::now(),
    );
    params.ema_short_period = config.strategy.ema_short_period;
    params.ema_long_period = config.strategy.ema_long_period;

    let source = build_source(config)?;
    let provider = with_cache(source.as_ref(), config);
    let pairs = analyze_pairs(provider.as_ref(), &params)?;
    if pairs.is_empty() {
        bail!("no symbol could be screened");
    }

    println!(
        "{:<12} {:>8} {:>14} {:>8} {:>8} {:>8} {:>8}",
        "Symbol", "Score", "Volume", "Vol%", "Liq", "Spread%", "Trend%"
    );
    println!("{}", "-".repeat(72));
    for p in pairs.iter().take(top.unwrap_or(pairs.len())) {
        println!(
            "{:<12} {:>8.2} {:>14.0} {:>8.3} {:>8.3} {:>8.3} {:>8.3}",
            p.symbol, p.score, p.volume, p.volatility, p.liquidity, p.spread_estimate,
            p.trend_strength
        );
    }

    if let Some(path) = output {
        save_json(&pairs, &path)?;
        println!("Ranking saved to: {}", path.display());
    }
    Ok(())
}

fn run_watch(
    config: &BacktestConfig,
    symbol: Option<String>,
    timeframe: Option<Timeframe>,
    days: i64,
    interval_mins: u64,
    max_runs: Option<usize>,
    output_dir: Option<PathBuf>,
) -> Result<()> {
    if days <= 0 {
        bail!("--days must be greater than zero");
    }
    let symbol = symbol.unwrap_or_else(|| config.backtest.symbol.clone());
    let timeframe = timeframe.unwrap_or(config.backtest.timeframe);
    let source = build_source(config)?;
    let provider = with_cache(source.as_ref(), config);

    let scheduler = Scheduler::new(StdDuration::from_secs(interval_mins * 60)).with_max_runs(max_runs);
    let summary = scheduler.run(None, |run| -> Result<()> {
        let end = Utc::now();
        let params = BacktestParams {
            symbol: symbol.clone(),
            timeframe,
            start: end - Duration::days(days),
            end,
            initial_balance: config.backtest.initial_balance,
            strategy: config.strategy,
        };
        let result = run_backtest(provider.as_ref(), &params)?;
        let m = &result.metrics;
        println!(
            "[{}] run {run}: {} trades, profit {:.2}%, win {:.1}%, dd {:.2}%, sharpe {:.2}",
            end.format("%Y-%m-%d %H:%M"),
            m.total_trades,
            m.profit_percent,
            m.win_rate,
            m.max_drawdown_percent,
            m.sharpe_ratio
        );
        if let Some(dir) = &output_dir {
            save_artifacts(&result, &dir.join(run.to_string()))?;
        }
        Ok(())
    });

    println!(
        "Watch finished: {} runs, {} failed",
        summary.runs, summary.failures
    );
    Ok(())
}

fn run_cache_status(
    config: &BacktestConfig,
    symbols: Vec<String>,
    timeframe: Option<Timeframe>,
) -> Result<()> {
    let cache_dir = &config.data.cache_dir;
    if !cache_dir.exists() {
        println!("Cache directory does not exist: {}", cache_dir.display());
        return Ok(());
    }

    let timeframe = timeframe.unwrap_or(config.backtest.timeframe);
    let cache = ParquetCache::new(cache_dir.clone());
    let sym_refs: Vec<&str> = symbols.iter().map(String::as_str).collect();

    println!("Cache: {}", cache_dir.display());
    println!();
    println!(
        "{:<12} {:<4} {:<45} {:>10}",
        "Symbol", "TF", "Range", "Candles"
    );
    println!("{}", "-".repeat(74));
    for status in cache.status(&sym_refs, timeframe) {
        let range = match (status.first, status.last) {
            (Some(first), Some(last)) => format!("{} to {}", first.to_rfc3339(), last.to_rfc3339()),
            _ => "(not cached)".to_string(),
        };
        println!(
            "{:<12} {:<4} {:<45} {:>10}",
            status.symbol,
            status.timeframe,
            range,
            status.candle_count.unwrap_or(0)
        );
    }
    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Run parameters from the config file with command-line overrides.
fn resolve_params(config: &BacktestConfig, run: &RunArgs) -> Result<BacktestParams> {
    let mut params = config.backtest_params(Utc::now());
    if let Some(symbol) = &run.symbol {
        params.symbol = symbol.clone();
    }
    if let Some(tf) = run.timeframe {
        params.timeframe = tf;
    }
    let end = parse_instant(run.end.as_deref())?;
    let start = parse_instant(run.start.as_deref())?;
    if let Some(end) = end {
        params.end = end;
        if start.is_none() && config.backtest.start.is_none() {
            params.start = end - Duration::days(config.backtest.lookback_days);
        }
    }
    if let Some(start) = start {
        params.start = start;
    }
    Ok(params)
}

/// Accepts `YYYY-MM-DD` (midnight UTC) or RFC 3339.
fn parse_instant(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc()));
    }
    let ts = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid date '{raw}': expected YYYY-MM-DD or RFC 3339"))?;
    Ok(Some(ts.with_timezone(&Utc)))
}

fn print_summary(result: &BacktestResult) {
    let m = &result.metrics;
    println!();
    println!(
        "=== {} {} | {} to {} ===",
        result.symbol,
        result.timeframe,
        result.start.format("%Y-%m-%d %H:%M"),
        result.end.format("%Y-%m-%d %H:%M")
    );
    println!(
        "Bars:            {} ({} warmup)",
        result.bar_count, result.warmup_bars
    );
    println!(
        "Balance:         {:.2} -> {:.2}",
        result.initial_balance, m.final_balance
    );
    println!(
        "Profit:          {:.2} ({:.2}%)",
        m.total_profit, m.profit_percent
    );
    println!(
        "Trades:          {} ({} won, {} lost, {:.1}% win rate)",
        m.total_trades, m.winning_trades, m.losing_trades, m.win_rate
    );
    println!(
        "Max drawdown:    {:.2} ({:.2}%)",
        m.max_drawdown, m.max_drawdown_percent
    );
    println!("Sharpe:          {:.3}", m.sharpe_ratio);
    println!("Profit factor:   {:.2}", m.profit_factor);
    println!("Dataset:         {}", short_hash(&result.dataset_hash));
    if !result.monthly_returns.is_empty() {
        println!("Monthly returns:");
        for (month, ret) in &result.monthly_returns {
            println!("  {month}  {ret:>7.2}%");
        }
    }
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

