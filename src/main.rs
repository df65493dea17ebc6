use chrono::{TimeZone, Utc};
use clap::{Args, Parser, Subcommand};
use raster_harvest::config::HarvestConfig;
use raster_harvest::core::{Crs, Envelope, PatternTimestamp, SidecarReader};
use raster_harvest::index::TemporalIndex;
use raster_harvest::query::TimedResource;
use raster_harvest::stats::HarvestStats;
use raster_harvest::storage::LockRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "raster-harvest")]
#[command(about = "Harvest a directory of time-stamped rasters into a spatio-temporal index", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Command,
}

/// 配置文件 + 命令行覆盖
#[derive(Args)]
struct ConfigArgs {
    /// TOML configuration file
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Directory to watch
    #[arg(long, global = true)]
    path: Option<PathBuf>,

    /// Regex extracting the timestamp from a file name
    #[arg(long, global = true)]
    pattern: Option<String>,

    /// Capture group of the timestamp within --pattern
    #[arg(long, global = true)]
    time_index: Option<usize>,

    /// chrono strftime format of the captured timestamp
    #[arg(long, global = true)]
    time_format: Option<String>,

    /// Debounce delay in milliseconds
    #[arg(long, global = true)]
    delay: Option<u64>,

    /// Milliseconds into the day added to date-only timestamps
    #[arg(long, global = true)]
    milli_of_day: Option<u32>,

    /// UTC offset in seconds for timestamps without a zone
    #[arg(long, global = true, allow_hyphen_values = true)]
    offset_seconds: Option<i32>,

    /// Deleting this path triggers a full rescan
    #[arg(long, global = true)]
    reset_trigger: Option<PathBuf>,

    /// Directory holding the tree and id store files
    #[arg(long, global = true)]
    index_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Harvest and index until Ctrl-C
    Watch,
    /// Print the most recent file intersecting a bounding box
    Query {
        /// minx,miny,maxx,maxy in the index's spatial reference
        #[arg(long, required = true, value_delimiter = ',', num_args = 4)]
        bbox: Vec<f64>,

        /// Instant in milliseconds since the Unix epoch
        #[arg(long)]
        time: Option<i64>,
    },
    /// Print index size, extent, indexed times and grid size
    Info,
}

impl ConfigArgs {
    fn resolve(&self) -> anyhow::Result<HarvestConfig> {
        let mut cfg = match &self.config {
            Some(file) => HarvestConfig::from_file(file)?,
            None => {
                let (Some(path), Some(pattern), Some(time_index), Some(time_format)) = (
                    self.path.clone(),
                    self.pattern.clone(),
                    self.time_index,
                    self.time_format.clone(),
                ) else {
                    anyhow::bail!(
                        "either --config or all of --path, --pattern, --time-index, --time-format are required"
                    );
                };
                HarvestConfig::new(path, pattern, time_index, time_format)
            }
        };

        if let Some(p) = &self.path {
            cfg.path = p.clone();
        }
        if let Some(p) = &self.pattern {
            cfg.pattern = p.clone();
        }
        if let Some(i) = self.time_index {
            cfg.time_index = i;
        }
        if let Some(f) = &self.time_format {
            cfg.time_format = f.clone();
        }
        if let Some(d) = self.delay {
            cfg.delay = d;
        }
        if let Some(m) = self.milli_of_day {
            cfg.milli_of_day = m;
        }
        if let Some(o) = self.offset_seconds {
            cfg.offset_seconds = o;
        }
        if let Some(t) = &self.reset_trigger {
            cfg.reset_trigger = Some(t.clone());
        }
        if let Some(d) = &self.index_dir {
            cfg.index_dir = Some(d.clone());
        }
        Ok(cfg)
    }
}

fn open_index(cfg: &HarvestConfig, locks: &LockRegistry) -> anyhow::Result<Arc<TemporalIndex>> {
    cfg.validate()?;
    let extractor = Arc::new(PatternTimestamp::from_config(cfg)?);
    Ok(Arc::new(TemporalIndex::open(
        cfg,
        Arc::new(SidecarReader),
        extractor,
        locks,
        Arc::new(HarvestStats::new()),
    )?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let cfg = cli.config.resolve()?;
    let locks = LockRegistry::new();

    match cli.command {
        Command::Watch => {
            let resource = TimedResource::open(&cfg, SidecarReader, &locks)?;
            info!("raster-harvest ready, watching {:?}", cfg.path);

            // 优雅退出处理
            tokio::signal::ctrl_c().await?;
            info!("Shutting down...");
            resource.close()?;
            info!("\n{}", resource.stats().snapshot());
        }
        Command::Query { bbox, time } => {
            let index = open_index(&cfg, &locks)?;
            let Some(crs) = index.crs() else {
                println!("index is empty");
                return Ok(());
            };
            let sref = crs
                .spatial_ref()
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("index has no spatial reference"))?;

            let mut lower = vec![bbox[0], bbox[1]];
            let mut upper = vec![bbox[2], bbox[3]];
            let query_crs = match time {
                Some(t) => {
                    lower.push(t as f64);
                    upper.push(t as f64);
                    Crs::compound(sref)
                }
                None => Crs::spatial(sref),
            };
            let area = Envelope::new(query_crs, lower, upper)?;
            match index.find_most_recent(&area)? {
                Some(path) => println!("{}", path.display()),
                None => println!("no match for {}", area),
            }
            index.close()?;
        }
        Command::Info => {
            let index = open_index(&cfg, &locks)?;
            let resource = TimedResource::from_parts(index.clone(), Arc::new(SidecarReader));

            println!("entries: {}", index.size()?);
            match index.get_envelope()? {
                Some(env) => println!("extent:  {}", env),
                None => println!("extent:  (empty)"),
            }
            let times = index.times()?;
            println!("times:   {}", times.len());
            for t in &times {
                match Utc.timestamp_millis_opt(*t).single() {
                    Some(dt) => println!("  {} ({})", t, dt.to_rfc3339()),
                    None => println!("  {}", t),
                }
            }
            let grid = resource.grid_geometry()?;
            println!("grid:    {:?}", grid.extent());
            resource.close()?;
        }
    }

    Ok(())
}
