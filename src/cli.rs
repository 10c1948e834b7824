use crate::config::{Config, ScrapeMethod, ScriptPolicy, DEFAULT_CONFIG_FILE};
use crate::deploy::{self, DeploySummary};
use crate::error::Result;
use crate::logging;
use crate::optimizer::{self, OptimizeOptions};
use crate::scraper::{self, ScrapeOptions};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "ecstatic", version, author = "Ayush Singh <ayushsingh1325@gmail.com>")]
#[command(about = "Mirror a website, tame its third-party scripts and ship it to a CDN")]
struct Cli {
    /// Configuration file [default: ecstatic.config.json when present]
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download a website as static files
    Scrape(ScrapeArgs),
    /// Defer and off-load scripts, then run Jampack
    Optimize(OptimizeArgs),
    /// Upload the optimized site to BunnyCDN
    Deploy {
        dist_dir: Option<PathBuf>,
    },
    /// Scrape, optimize and deploy in one go
    All(AllArgs),
}

#[derive(Args, Debug, Default)]
struct ScrapeArgs {
    url: String,
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long)]
    depth: Option<u32>,
    #[arg(long, value_enum)]
    method: Option<ScrapeMethod>,
    /// httrack include filter, repeatable
    #[arg(long)]
    include: Vec<String>,
    /// httrack exclude filter, repeatable
    #[arg(long)]
    exclude: Vec<String>,
    #[arg(long)]
    mirror: bool,
    #[arg(long)]
    no_clobber: bool,
    /// wget `--execute` directive, repeatable
    #[arg(long)]
    execute: Vec<String>,
    #[arg(long)]
    user_agent: Option<String>,
    #[arg(long)]
    no_host_directories: bool,
    #[arg(long)]
    adjust_extension: bool,
    #[arg(long)]
    wait: Option<String>,
    #[arg(long)]
    exclude_directories: Option<String>,
    #[arg(long)]
    reject: Vec<String>,
    #[arg(long)]
    proxy: Option<String>,
    #[arg(long)]
    no_proxy: bool,
}

impl From<ScrapeArgs> for ScrapeOptions {
    fn from(args: ScrapeArgs) -> Self {
        ScrapeOptions {
            output: args.output,
            depth: args.depth,
            method: args.method,
            include: args.include,
            exclude: args.exclude,
            mirror: args.mirror,
            no_clobber: args.no_clobber,
            execute: args.execute,
            user_agent: args.user_agent,
            no_host_directories: args.no_host_directories,
            adjust_extension: args.adjust_extension,
            wait: args.wait,
            exclude_directories: args.exclude_directories,
            reject: args.reject,
            proxy: args.proxy,
            no_proxy: args.no_proxy,
        }
    }
}

#[derive(Args, Debug, Default)]
struct OptimizeArgs {
    /// Site to optimize [default: the scraped site]
    input_dir: Option<PathBuf>,
    #[arg(long)]
    output: Option<PathBuf>,
    /// Jampack configuration file
    #[arg(long)]
    jampack_config: Option<PathBuf>,
    /// Comma-separated images to preload
    #[arg(long)]
    preload_images: Option<String>,
    /// Comma-separated selectors that get fetchpriority=high
    #[arg(long)]
    fetchpriority_high: Option<String>,
    #[arg(long)]
    skip_jampack: bool,
}

impl From<OptimizeArgs> for OptimizeOptions {
    fn from(args: OptimizeArgs) -> Self {
        OptimizeOptions {
            input: args.input_dir,
            output: args.output,
            jampack_config: args.jampack_config,
            preload_images: args.preload_images,
            fetchpriority_high: args.fetchpriority_high,
            skip_jampack: args.skip_jampack,
        }
    }
}

#[derive(Args, Debug, Default)]
struct AllArgs {
    url: String,
    /// Final output directory
    #[arg(short, long)]
    output: Option<PathBuf>,
    #[arg(short, long)]
    depth: Option<u32>,
    #[arg(short, long, value_enum)]
    method: Option<ScrapeMethod>,
    #[arg(long)]
    skip_jampack: bool,
    #[arg(long)]
    skip_deploy: bool,
}

pub async fn entry() {
    let start_time = Instant::now();
    let cli = Cli::parse();

    let source = Config::locate(cli.config.as_deref());
    let config = match Config::load(source.as_deref()) {
        Ok(x) => x,
        Err(e) => {
            logging::init(cli.verbose, "info");
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };
    logging::init(cli.verbose, &config.logging.level);
    match &source {
        Some(path) => tracing::debug!("loaded configuration from {}", path.display()),
        None => tracing::debug!("no {} found, using defaults", DEFAULT_CONFIG_FILE),
    }

    let result = run(cli.command, &config).await;
    tracing::info!("Time Taken: {} seconds", start_time.elapsed().as_secs());
    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Scrape(args) => {
            let url = args.url.clone();
            scraper::scrape(&url, &args.into(), config).await?;
        }
        Commands::Optimize(args) => {
            let policy = Arc::new(ScriptPolicy::from_config(&config.optimize.js)?);
            optimizer::optimize(&args.into(), config, policy).await?;
        }
        Commands::Deploy { dist_dir } => {
            let dist = dist_dir.unwrap_or_else(|| config.paths.dist.clone());
            launch_deploy(&dist, config).await?;
        }
        Commands::All(args) => run_pipeline(args, config).await?,
    }
    Ok(())
}

async fn launch_deploy(dist: &Path, config: &Config) -> Result<DeploySummary> {
    let summary = deploy::deploy(dist, &config.deploy.bunny).await?;
    let failures = summary.delete_failures + summary.upload_failures;
    if failures > 0 || !summary.purged {
        tracing::warn!(
            "Deployment finished with {} failed deletes, {} failed uploads{}",
            summary.delete_failures,
            summary.upload_failures,
            if summary.purged { "" } else { " and no cache purge" }
        );
    } else {
        tracing::info!("Deployment completed");
    }
    Ok(summary)
}

async fn run_pipeline(args: AllArgs, config: &Config) -> Result<()> {
    //! Checks everything it can before scraping: the script patterns and,
    //! unless deployment is skipped, the CDN credentials.
    let policy = Arc::new(ScriptPolicy::from_config(&config.optimize.js)?);
    if !args.skip_deploy {
        config.deploy.bunny.validate()?;
    }

    tracing::info!("Starting pipeline for {}", args.url);
    tracing::info!("PHASE 1: SCRAPING");
    let scrape = ScrapeOptions {
        depth: args.depth,
        method: args.method,
        ..ScrapeOptions::default()
    };
    scraper::scrape(&args.url, &scrape, config).await?;

    tracing::info!("PHASE 2: OPTIMIZATION");
    let optimize = OptimizeOptions {
        output: args.output,
        skip_jampack: args.skip_jampack,
        ..OptimizeOptions::default()
    };
    let dist = optimizer::optimize(&optimize, config, policy).await?;

    if args.skip_deploy {
        tracing::info!("Skipping deployment");
    } else {
        tracing::info!("PHASE 3: DEPLOYMENT");
        launch_deploy(&dist, config).await?;
    }
    tracing::info!("Optimized website ready at {}", dist.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrape_with_repeated_flags() {
        let cli = Cli::try_parse_from([
            "ecstatic",
            "--config",
            "site.json",
            "scrape",
            "https://example.com",
            "--method",
            "wget",
            "--reject",
            "*.mp4",
            "--reject",
            "*.zip",
            "--exclude",
            "*/cart/*",
            "--no-proxy",
            "-v",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("site.json")));
        assert!(cli.verbose);
        match cli.command {
            Commands::Scrape(args) => {
                let options = ScrapeOptions::from(args);
                assert_eq!(options.method, Some(ScrapeMethod::Wget));
                assert_eq!(options.reject, vec!["*.mp4", "*.zip"]);
                assert_eq!(options.exclude, vec!["*/cart/*"]);
                assert!(options.no_proxy);
                assert!(!options.mirror);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn optimize_defaults_to_scraped_site() {
        let cli = Cli::try_parse_from(["ecstatic", "optimize", "--skip-jampack"]).unwrap();
        match cli.command {
            Commands::Optimize(args) => {
                let options = OptimizeOptions::from(args);
                assert!(options.input.is_none());
                assert!(options.skip_jampack);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn all_short_flags() {
        let cli = Cli::try_parse_from([
            "ecstatic",
            "all",
            "https://example.com",
            "-o",
            "public",
            "-d",
            "2",
            "-m",
            "httrack",
            "--skip-deploy",
        ])
        .unwrap();
        match cli.command {
            Commands::All(args) => {
                assert_eq!(args.output, Some(PathBuf::from("public")));
                assert_eq!(args.depth, Some(2));
                assert_eq!(args.method, Some(ScrapeMethod::Httrack));
                assert!(args.skip_deploy);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn scrape_needs_a_url() {
        assert!(Cli::try_parse_from(["ecstatic", "scrape"]).is_err());
        assert!(Cli::try_parse_from(["ecstatic", "scrape", "x", "--method", "curl"]).is_err());
    }

    #[tokio::test]
    async fn pipeline_fails_before_scraping_without_credentials() {
        let args = AllArgs {
            url: "https://example.com".to_string(),
            ..AllArgs::default()
        };
        let result = run_pipeline(args, &Config::default()).await;
        assert!(matches!(result, Err(crate::error::Error::Config(_))));
    }
}
