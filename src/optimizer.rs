use crate::config::{Config, JampackConfig, ScriptPolicy};
use crate::error::{Error, Result};
use crate::file_handler::{self, LocalFile};
use crate::rewriter::{self, DocumentStats};
use crate::runner::{self, CommandSpec};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

const JAMPACK_CACHE_DIR: &str = "_jampack";

#[derive(Clone, Debug, Default)]
pub struct OptimizeOptions {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub jampack_config: Option<PathBuf>,
    pub preload_images: Option<String>,
    pub fetchpriority_high: Option<String>,
    pub skip_jampack: bool,
}

/// Totals over every document of a site.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub documents: usize,
    pub rewritten: usize,
    pub skipped: usize,
    pub offloaded: usize,
    pub deferred: usize,
    pub externalized: usize,
}

impl Summary {
    fn add(&mut self, stats: &DocumentStats) {
        self.documents += 1;
        if stats.changed() {
            self.rewritten += 1;
        }
        self.offloaded += stats.offloaded;
        self.deferred += stats.deferred;
        self.externalized += stats.externalized;
    }
}

fn is_document(path: &str) -> bool {
    Path::new(path).extension().map_or(false, |x| {
        x.eq_ignore_ascii_case("html") || x.eq_ignore_ascii_case("htm")
    })
}

async fn optimize_document(
    file: LocalFile,
    policy: Arc<ScriptPolicy>,
    site_root: Arc<PathBuf>,
) -> Result<DocumentStats> {
    //! Reads one document, rewrites it on the blocking pool and writes it
    //! back only when something changed.
    let bytes = fs::read(&file.local_path).await?;
    let html = String::from_utf8(bytes).map_err(|e| Error::NotUtf8 {
        valid_up_to: e.utf8_error().valid_up_to(),
    })?;
    let outcome = tokio::task::spawn_blocking(move || {
        rewriter::process_document(&html, &policy, &site_root)
    })
    .await
    .map_err(|e| Error::Pipeline(format!("rewrite task failed: {}", e)))??;

    if outcome.stats.changed() {
        fs::write(&file.local_path, outcome.html).await?;
    }
    Ok(outcome.stats)
}

pub async fn process_site(
    site_root: &Path,
    policy: Arc<ScriptPolicy>,
    concurrency: usize,
) -> Result<Summary> {
    //! Runs the script engine over every HTML document below `site_root`.
    //! A document that cannot be read, parsed or written is logged and
    //! skipped.
    let documents: Vec<LocalFile> = file_handler::list_files(site_root)
        .await?
        .into_iter()
        .filter(|x| is_document(&x.remote_path))
        .collect();
    tracing::info!("Processing {} HTML documents", documents.len());

    let root = Arc::new(site_root.to_path_buf());
    let results: Vec<(String, Result<DocumentStats>)> = stream::iter(documents)
        .map(|file| {
            let policy = policy.clone();
            let root = root.clone();
            async move {
                let name = file.remote_path.clone();
                (name, optimize_document(file, policy, root).await)
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut summary = Summary::default();
    for (name, result) in results {
        match result {
            Ok(stats) => {
                if stats.changed() {
                    tracing::debug!(
                        "{}: {} offloaded, {} deferred",
                        name,
                        stats.offloaded,
                        stats.deferred
                    );
                }
                summary.add(&stats);
            }
            Err(e) => {
                tracing::warn!("Skipping {}: {}", name, e);
                summary.skipped += 1;
            }
        }
    }
    Ok(summary)
}

pub fn jampack_command(jampack: &JampackConfig, dir: &Path, options: &OptimizeOptions) -> CommandSpec {
    let mut spec = CommandSpec::new(jampack.bin.clone());
    spec.arg(dir.display().to_string());
    if let Some(config) = &options.jampack_config {
        spec.arg("--config").arg(config.display().to_string());
    }
    if let Some(images) = &options.preload_images {
        spec.arg("--preload-images").arg(images.as_str());
    }
    if let Some(selectors) = &options.fetchpriority_high {
        spec.arg("--fetchpriority-high").arg(selectors.as_str());
    }
    spec
}

async fn run_jampack(dir: &Path, jampack: &JampackConfig, options: &OptimizeOptions) -> Result<()> {
    let stale = dir.join(JAMPACK_CACHE_DIR);
    if fs::metadata(&stale).await.map(|x| x.is_dir()).unwrap_or(false) {
        fs::remove_dir_all(&stale).await?;
    }
    tracing::info!("Running Jampack optimization");
    runner::run(&jampack_command(jampack, dir, options)).await
}

async fn resolve_input(options: &OptimizeOptions, config: &Config) -> Result<PathBuf> {
    if let Some(input) = &options.input {
        return Ok(input.clone());
    }
    let scraped = &config.paths.scraped;
    let found = if fs::metadata(scraped).await.map(|x| x.is_dir()).unwrap_or(false) {
        file_handler::find_site_root(scraped).await?
    } else {
        None
    };
    found.ok_or_else(|| {
        Error::Pipeline(format!(
            "No scraped content found in {}. Run `scrape` first.",
            scraped.display()
        ))
    })
}

async fn resolve(path: &Path) -> Option<PathBuf> {
    //! Canonical form of `path`, which may not exist yet.
    if let Ok(x) = fs::canonicalize(path).await {
        return Some(x);
    }
    let name = path.file_name()?;
    let parent = path
        .parent()
        .filter(|x| !x.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::canonicalize(parent).await.ok().map(|x| x.join(name))
}

pub async fn optimize(
    options: &OptimizeOptions,
    config: &Config,
    policy: Arc<ScriptPolicy>,
) -> Result<PathBuf> {
    //! Copies the site to the output directory, rewrites its scripts and
    //! hands it to Jampack. Returns the output directory.
    let input = resolve_input(options, config).await?;
    let output = options
        .output
        .clone()
        .unwrap_or_else(|| config.paths.dist.clone());

    if !fs::metadata(&input).await.map(|x| x.is_dir()).unwrap_or(false) {
        return Err(Error::Pipeline(format!(
            "Input directory does not exist: {}",
            input.display()
        )));
    }
    if !file_handler::is_file(&input.join("index.html")).await {
        return Err(Error::Pipeline(format!(
            "index.html not found in input directory: {}",
            input.display()
        )));
    }
    if let Some(path) = &options.jampack_config {
        if !file_handler::is_file(path).await {
            return Err(Error::Config(format!(
                "Jampack config file not found: {}",
                path.display()
            )));
        }
    }

    tracing::info!("Optimizing website from {}", input.display());
    tracing::info!("Output directory: {}", output.display());

    let in_place = match (resolve(&input).await, resolve(&output).await) {
        (Some(a), Some(b)) if a == b => true,
        (Some(a), Some(b)) if a.starts_with(&b) || b.starts_with(&a) => {
            return Err(Error::Pipeline(format!(
                "{} and {} must not contain each other",
                input.display(),
                output.display()
            )));
        }
        _ => false,
    };

    if in_place {
        tracing::info!("Optimizing in place");
    } else {
        file_handler::clean_dir(&output).await?;
        let copied = file_handler::copy_dir(&input, &output).await?;
        tracing::info!("Copied {} files to {}", copied, output.display());
    }

    let summary = process_site(&output, policy, config.optimize.concurrency).await?;
    tracing::info!(
        "Processed {} documents ({} rewritten, {} skipped): {} scripts offloaded, {} deferred, {} externalized",
        summary.documents,
        summary.rewritten,
        summary.skipped,
        summary.offloaded,
        summary.deferred,
        summary.externalized
    );

    if options.skip_jampack || !config.optimize.jampack.enabled {
        tracing::info!("Skipping Jampack");
    } else {
        run_jampack(&output, &config.optimize.jampack, options).await?;
    }

    tracing::info!("Website optimized: {}", output.display());
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PatternSet, When};
    use crate::patterns::Pattern;

    fn gtm_policy() -> Arc<ScriptPolicy> {
        Arc::new(ScriptPolicy {
            offload: PatternSet {
                when: When::Always,
                patterns: vec![Pattern::Literal("googletagmanager.com".to_string())],
            },
            ..ScriptPolicy::default()
        })
    }

    const PAGE: &str = r#"<html><head></head><body><script src="https://www.googletagmanager.com/gtm.js"></script></body></html>"#;
    const PLAIN: &str = "<html><body><p>static</p></body></html>";

    #[test]
    fn picks_html_documents() {
        assert!(is_document("index.html"));
        assert!(is_document("blog/post.HTM"));
        assert!(!is_document("app.js"));
        assert!(!is_document("html"));
    }

    #[test]
    fn jampack_passthrough() {
        let options = OptimizeOptions {
            jampack_config: Some(PathBuf::from("jampack.config.js")),
            preload_images: Some("hero.webp,logo.svg".to_string()),
            ..OptimizeOptions::default()
        };
        let spec = jampack_command(&JampackConfig::default(), Path::new("dist"), &options);
        assert_eq!(spec.program, PathBuf::from("jampack"));
        assert_eq!(
            spec.args,
            vec![
                "dist",
                "--config",
                "jampack.config.js",
                "--preload-images",
                "hero.webp,logo.svg"
            ]
        );
    }

    #[tokio::test]
    async fn site_pass_counts_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("blog")).await.unwrap();
        fs::write(root.join("index.html"), PAGE).await.unwrap();
        fs::write(root.join("blog/post.html"), PAGE).await.unwrap();
        fs::write(root.join("about.html"), PLAIN).await.unwrap();
        fs::write(root.join("broken.html"), [0xffu8, 0xfe, 0x00]).await.unwrap();
        fs::write(root.join("app.js"), "console.log(1)").await.unwrap();

        let summary = process_site(root, gtm_policy(), 2).await.unwrap();
        assert_eq!(summary.documents, 3);
        assert_eq!(summary.rewritten, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.offloaded, 2);

        let index = fs::read_to_string(root.join("index.html")).await.unwrap();
        assert!(index.contains("data-ecstatic-offload"));
        assert_eq!(fs::read_to_string(root.join("about.html")).await.unwrap(), PLAIN);

        let again = process_site(root, gtm_policy(), 2).await.unwrap();
        assert_eq!(again.rewritten, 0);
        assert_eq!(fs::read_to_string(root.join("index.html")).await.unwrap(), index);
    }

    #[tokio::test]
    async fn other_charsets_are_reported_and_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latin1.html");
        let mut bytes = b"<body><p>Caf".to_vec();
        bytes.extend_from_slice(&[0xe9]);
        bytes.extend_from_slice(br#"</p><script src="https://googletagmanager.com/gtm.js"></script></body>"#);
        fs::write(&path, &bytes).await.unwrap();

        let file = LocalFile {
            local_path: path.clone(),
            remote_path: "latin1.html".to_string(),
        };
        let root = Arc::new(dir.path().to_path_buf());
        match optimize_document(file, gtm_policy(), root).await {
            Err(Error::NotUtf8 { valid_up_to }) => assert_eq!(valid_up_to, 12),
            other => panic!("expected NotUtf8, got {:?}", other),
        }
        assert_eq!(fs::read(&path).await.unwrap(), bytes);
    }

    #[tokio::test]
    async fn optimize_copies_then_rewrites_output_only() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("scraped/example.com");
        let output = dir.path().join("dist");
        fs::create_dir_all(&input).await.unwrap();
        fs::write(input.join("index.html"), PAGE).await.unwrap();

        let mut config = Config::default();
        config.paths.scraped = dir.path().join("scraped");
        let options = OptimizeOptions {
            output: Some(output.clone()),
            skip_jampack: true,
            ..OptimizeOptions::default()
        };
        let result = optimize(&options, &config, gtm_policy()).await.unwrap();
        assert_eq!(result, output);

        let original = fs::read_to_string(input.join("index.html")).await.unwrap();
        assert_eq!(original, PAGE);
        let rewritten = fs::read_to_string(output.join("index.html")).await.unwrap();
        assert!(rewritten.contains("data-ecstatic-bootstrap"));
    }

    #[tokio::test]
    async fn optimize_requires_index() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("about.html"), PLAIN).await.unwrap();
        let options = OptimizeOptions {
            input: Some(dir.path().to_path_buf()),
            skip_jampack: true,
            ..OptimizeOptions::default()
        };
        let result = optimize(&options, &Config::default(), gtm_policy()).await;
        assert!(matches!(result, Err(Error::Pipeline(_))));

        let mut config = Config::default();
        config.paths.scraped = dir.path().join("missing");
        let result = optimize(&OptimizeOptions::default(), &config, gtm_policy()).await;
        assert!(matches!(result, Err(Error::Pipeline(_))));
    }

    #[tokio::test]
    async fn output_inside_input_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), PLAIN).await.unwrap();
        let options = OptimizeOptions {
            input: Some(dir.path().to_path_buf()),
            output: Some(dir.path().join("dist")),
            skip_jampack: true,
            ..OptimizeOptions::default()
        };
        let result = optimize(&options, &Config::default(), gtm_policy()).await;
        assert!(matches!(result, Err(Error::Pipeline(_))));
        assert!(dir.path().join("index.html").is_file());
    }
}
