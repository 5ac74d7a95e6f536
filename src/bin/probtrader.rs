//! probtrader CLI: backtests, parameter search and config bootstrapping.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use probtrader::backtest::optimizer::export_results_csv;
use probtrader::backtest::{
    Backtester, CSVHistoricalDataProvider, GridSearch, HistoricalDataProvider, ModelOutputsProvider,
};
use probtrader::config::{generate_commented_config_template, Config};
use probtrader::utils::init_logging;

#[derive(Debug, Parser)]
#[command(name = "probtrader", author, version, about = "Probabilistic position-decision engine", long_about = None)]
struct Args {
    /// Path to the configuration file (TOML). Defaults to ./config.toml, then the user config dir.
    #[arg(short, long, env = "PROBTRADER_CONFIG")]
    config: Option<PathBuf>,

    /// Print the default configuration to stdout and exit
    #[arg(long)]
    print_default_config: bool,

    /// Log level when PROBTRADER_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replay historical bars through the engine and a simulated account
    Backtest {
        /// Bar CSV (timestamp,close,long_prob,short_prob,money_flow_ratio,volatility)
        #[arg(long, value_name = "CSV")]
        data: PathBuf,
        /// Treat the data file as per-model rows and fuse them with the configured weights
        #[arg(long)]
        models: bool,
        /// Write the fill log to this CSV file
        #[arg(long, value_name = "CSV")]
        output: Option<PathBuf>,
        /// Show a progress bar
        #[arg(long)]
        progress: bool,
        /// Print the summary as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Grid-search entry/exit thresholds
    Optimize {
        #[arg(long, value_name = "CSV")]
        data: PathBuf,
        #[arg(long)]
        models: bool,
        /// Write every result to this CSV file
        #[arg(long, value_name = "CSV")]
        output: Option<PathBuf>,
        /// Number of best combinations to print
        #[arg(long, default_value_t = 5)]
        top: usize,
    },
    /// Write a commented default configuration file
    Init {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    if args.print_default_config {
        println!("{}", Config::default_toml());
        return Ok(());
    }

    match args.command {
        None => {
            let config = load_config(args.config.as_deref())?;
            println!("{}", toml::to_string_pretty(&config).context("Failed to render configuration")?);
            Ok(())
        }
        Some(Command::Init { config, force }) => {
            if config.exists() && !force {
                bail!("{} already exists. Use --force to overwrite.", config.display());
            }
            generate_commented_config_template(&config)
                .with_context(|| format!("Failed to write {}", config.display()))?;
            println!("Wrote default configuration to {}", config.display());
            Ok(())
        }
        Some(Command::Backtest { data, models, output, progress, json }) => {
            let config = load_config(args.config.as_deref())?;
            let bars = load_bars(&config, &data, models)?;
            let report = Backtester::new(config)
                .context("Invalid configuration")?
                .with_progress(progress)
                .run(&bars)
                .context("Backtest failed")?;

            if json {
                println!("{}", report.to_json()?);
            } else {
                report.print();
            }
            if let Some(out) = output {
                report
                    .export_trades_csv(&out)
                    .with_context(|| format!("Failed to write {}", out.display()))?;
                log::info!("Fill log written to {}", out.display());
            }
            Ok(())
        }
        Some(Command::Optimize { data, models, output, top }) => {
            let config = load_config(args.config.as_deref())?;
            let bars = load_bars(&config, &data, models)?;
            let results = GridSearch::default().run(&config, &bars).context("Grid search failed")?;

            println!("{:>6} {:>6} {:>6} {:>6} {:>9} {:>9} {:>8} {:>7}", "long", "short", "tp", "sl", "sharpe", "return", "maxdd", "trades");
            for r in results.iter().take(top) {
                println!(
                    "{:>6.3} {:>6.3} {:>6.3} {:>6.3} {:>9.4} {:>8.2}% {:>7.2}% {:>7}",
                    r.threshold_long,
                    r.threshold_short,
                    r.take_profit,
                    r.stop_loss,
                    r.sharpe_ratio,
                    r.total_return * 100.0,
                    r.max_drawdown * 100.0,
                    r.total_trades
                );
            }
            if let Some(out) = output {
                export_results_csv(&results, &out).with_context(|| format!("Failed to write {}", out.display()))?;
                log::info!("Grid results written to {}", out.display());
            }
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(p) => Config::from_file(p).with_context(|| format!("Failed to load configuration from {}", p.display()))?,
        None => Config::load().context("Failed to load configuration")?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn load_bars(config: &Config, data: &Path, models: bool) -> Result<Vec<probtrader::backtest::Bar>> {
    let provider: Box<dyn HistoricalDataProvider> = if models {
        Box::new(ModelOutputsProvider::new(config.signal.model_weights.clone()))
    } else {
        Box::new(CSVHistoricalDataProvider::new())
    };
    let bars = provider.load(data).with_context(|| format!("Failed to load bars from {}", data.display()))?;
    log::info!("Loaded {} bars from {}", bars.len(), data.display());
    Ok(bars)
}
