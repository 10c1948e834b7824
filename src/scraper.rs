use crate::config::{Config, DirUpDown, ScrapeConfig, ScrapeMethod};
use crate::error::{Error, Result};
use crate::file_handler;
use crate::runner::{self, CommandSpec};
use regex::{Captures, Regex};
use std::path::{Path, PathBuf};
use tokio::fs;
use url::Url;

/// Scrape settings given on the command line. Anything set here wins over
/// the configuration file.
#[derive(Clone, Debug, Default)]
pub struct ScrapeOptions {
    pub output: Option<PathBuf>,
    pub depth: Option<u32>,
    pub method: Option<ScrapeMethod>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub mirror: bool,
    pub no_clobber: bool,
    pub execute: Vec<String>,
    pub user_agent: Option<String>,
    pub no_host_directories: bool,
    pub adjust_extension: bool,
    pub wait: Option<String>,
    pub exclude_directories: Option<String>,
    pub reject: Vec<String>,
    pub proxy: Option<String>,
    pub no_proxy: bool,
}

impl ScrapeOptions {
    pub fn apply(&self, config: &ScrapeConfig) -> ScrapeConfig {
        //! Folds the command line into a copy of the scrape configuration.
        //! httrack filters from both sources are kept, command line last.
        let mut merged = config.clone();
        if let Some(depth) = self.depth {
            merged.depth = depth;
        }
        if let Some(method) = self.method {
            merged.method = method;
        }
        if self.user_agent.is_some() {
            merged.user_agent = self.user_agent.clone();
        }
        if self.proxy.is_some() {
            merged.proxy = self.proxy.clone();
        }
        merged.no_proxy |= self.no_proxy;

        merged.httrack.include.extend(self.include.iter().cloned());
        merged.httrack.exclude.extend(self.exclude.iter().cloned());

        let wget = &mut merged.wget;
        wget.mirror |= self.mirror;
        wget.no_clobber |= self.no_clobber;
        wget.no_host_directories |= self.no_host_directories;
        wget.adjust_extension |= self.adjust_extension;
        if !self.execute.is_empty() {
            wget.execute = self.execute.clone();
        }
        if self.wait.is_some() {
            wget.wait = self.wait.clone();
        }
        if self.exclude_directories.is_some() {
            wget.exclude_directories = self.exclude_directories.clone();
        }
        if !self.reject.is_empty() {
            wget.reject = self.reject.clone();
        }
        merged
    }
}

pub fn parse_target(url: &str) -> Result<Url> {
    let parsed = Url::parse(url)?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(Error::Pipeline(format!(
            "cannot scrape `{}`: an http(s) URL with a host is required",
            url
        )));
    }
    Ok(parsed)
}

fn host(url: &Url) -> &str {
    url.host_str().unwrap_or_default()
}

fn prefixed(filter: &str, prefix: char) -> String {
    if filter.starts_with(prefix) {
        filter.to_string()
    } else {
        format!("{}{}", prefix, filter)
    }
}

pub fn httrack_command(url: &Url, output: &Path, config: &ScrapeConfig) -> CommandSpec {
    let httrack = &config.httrack;
    let mut spec = CommandSpec::new("httrack");
    spec.arg(url.as_str())
        .arg("-O")
        .arg(output.display().to_string())
        .arg(format!("--depth={}", config.depth))
        .arg(format!("--ext-depth={}", httrack.ext_depth))
        .arg(format!("--sockets={}", httrack.sockets))
        .arg(format!("--timeout={}", config.timeout));

    if httrack.debug_log {
        spec.arg("--debug-log");
    }
    if httrack.near {
        spec.arg("--near");
    }
    // Stay on the same address.
    spec.arg("-a");
    if let Some(direction) = httrack.dir_up_down {
        spec.arg(match direction {
            DirUpDown::Up => "-U",
            DirUpDown::Down => "-D",
            DirUpDown::Both => "-B",
        });
    }

    if let Some(agent) = &config.user_agent {
        spec.arg(format!("--user-agent={}", agent));
    }
    if let (Some(proxy), false) = (&config.proxy, config.no_proxy) {
        let proxy = proxy
            .trim_start_matches("http://")
            .trim_start_matches("https://");
        spec.arg("-P").arg(proxy);
    }

    if let Some(x) = httrack.keep_links {
        spec.arg(format!("--keep-links={}", x));
    }
    if let Some(x) = httrack.robots {
        spec.arg(format!("--robots={}", x));
    }
    if let Some(x) = httrack.connections_per_second.filter(|x| *x > 0) {
        spec.arg(format!("-%c{}", x));
    }
    if httrack.updatehack {
        spec.arg("--updatehack");
    }
    if httrack.mirror {
        spec.arg("--mirror");
    }

    // httrack applies the last matching filter, so command line filters go last.
    let domain = host(url);
    spec.args(httrack.filters.iter().map(|x| x.replace("{domain}", domain)))
        .args(httrack.exclude.iter().map(|x| prefixed(x, '-')))
        .args(httrack.include.iter().map(|x| prefixed(x, '+')));
    spec
}

pub fn wget_command(url: &Url, output: &Path, config: &ScrapeConfig) -> CommandSpec {
    let wget = &config.wget;
    let mut spec = CommandSpec::new("wget");
    spec.arg("--domains")
        .arg(host(url))
        .arg(format!("--timeout={}", config.timeout))
        .arg(format!("--directory-prefix={}", output.display()));

    for directive in &wget.execute {
        spec.arg("--execute").arg(directive.as_str());
    }
    if let Some(agent) = &config.user_agent {
        spec.arg(format!("--user-agent={}", agent));
    }
    if wget.no_clobber {
        spec.arg("--no-clobber");
    }
    if wget.no_host_directories {
        spec.arg("--no-host-directories");
    }
    if wget.adjust_extension {
        spec.arg("--adjust-extension");
    }
    if let Some(dirs) = &wget.exclude_directories {
        spec.arg(format!("--exclude-directories={}", dirs));
    }
    if !wget.reject.is_empty() {
        spec.arg(format!("--reject={}", wget.reject.join(",")));
    }

    if config.no_proxy {
        spec.arg("--no-proxy");
    } else if let Some(proxy) = &config.proxy {
        if proxy.starts_with("http://") {
            spec.arg("--execute").arg(format!("http_proxy={}", proxy));
        } else if proxy.starts_with("https://") {
            spec.arg("--execute").arg(format!("https_proxy={}", proxy));
        } else {
            spec.arg("--execute").arg(format!("http_proxy=http://{}", proxy));
            spec.arg("--execute").arg(format!("https_proxy=https://{}", proxy));
        }
    }

    if wget.convert_links {
        spec.arg("--convert-links");
    }
    if wget.page_requisites {
        spec.arg("--page-requisites");
    }
    if let Some(names) = &wget.restrict_file_names {
        spec.arg(format!("--restrict-file-names={}", names));
    }
    if wget.no_parent {
        spec.arg("--no-parent");
    }
    if let Some(wait) = &wget.wait {
        spec.arg(format!("--wait={}", wait));
    }

    if wget.mirror {
        spec.arg("--mirror");
    } else if wget.recursive {
        spec.arg("--recursive").arg(format!("--level={}", config.depth.max(1)));
    }
    spec.arg(url.as_str());
    spec
}

pub fn extra_file_command(url: &str, dest: &Path, config: &ScrapeConfig) -> CommandSpec {
    let mut spec = CommandSpec::new("wget");
    if let Some(names) = &config.wget.restrict_file_names {
        spec.arg(format!("--restrict-file-names={}", names));
    }
    spec.arg(format!("--directory-prefix={}", dest.display()))
        .arg(url);
    spec
}

fn domain_pattern(source: &str) -> Result<Regex> {
    //! Matches `source` unless it is part of a longer host or a mail address.
    let pattern = format!(r"(^|[^.@-]){}\b", regex::escape(source));
    Regex::new(&pattern).map_err(|e| Error::Config(format!("bad replacement domain: {}", e)))
}

pub fn replace_domain_in(text: &str, pattern: &Regex, target: &str) -> (String, usize) {
    let count = pattern.find_iter(text).count();
    if count == 0 {
        return (text.to_string(), 0);
    }
    let replaced = pattern.replace_all(text, |caps: &Captures| format!("{}{}", &caps[1], target));
    (replaced.into_owned(), count)
}

fn is_html(path: &str) -> bool {
    Path::new(path)
        .extension()
        .map_or(false, |x| x.eq_ignore_ascii_case("html"))
}

pub async fn replace_domains(dir: &Path, source: &str, target: &str) -> Result<(usize, usize)> {
    //! Rewrites `source` to `target` in every `.html` file under `dir`.
    //! Returns the number of files changed and of replacements made.
    if source.is_empty() || target.is_empty() {
        return Err(Error::Config(
            "domain replacement needs both a source and a target".to_string(),
        ));
    }
    let pattern = domain_pattern(source)?;
    tracing::info!("Replacing '{}' with '{}' in HTML files", source, target);

    let mut files_changed = 0;
    let mut replacements = 0;
    for file in file_handler::list_files(dir).await? {
        if !is_html(&file.remote_path) {
            continue;
        }
        let text = match fs::read_to_string(&file.local_path).await {
            Ok(x) => x,
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", file.remote_path, e);
                continue;
            }
        };
        let (updated, count) = replace_domain_in(&text, &pattern, target);
        if count == 0 {
            continue;
        }
        if let Err(e) = fs::write(&file.local_path, updated).await {
            tracing::warn!("Failed to write {}: {}", file.remote_path, e);
            continue;
        }
        tracing::debug!("{}: {} replacements", file.remote_path, count);
        files_changed += 1;
        replacements += count;
    }
    tracing::info!(
        "Domain replacement done: {} files, {} replacements",
        files_changed,
        replacements
    );
    Ok((files_changed, replacements))
}

pub async fn rename_php_html(dir: &Path) -> Result<usize> {
    //! `page.php.html` becomes `page.html` unless that file already exists.
    let mut renamed = 0;
    for file in file_handler::list_files(dir).await? {
        let target = match file
            .local_path
            .file_name()
            .and_then(|x| x.to_str())
            .and_then(|x| x.strip_suffix(".php.html"))
        {
            Some(stem) => file.local_path.with_file_name(format!("{}.html", stem)),
            None => continue,
        };
        if file_handler::is_file(&target).await {
            tracing::warn!("Not renaming {}: {} exists", file.remote_path, target.display());
            continue;
        }
        fs::rename(&file.local_path, &target).await?;
        renamed += 1;
    }
    if renamed > 0 {
        tracing::info!("Renamed {} .php.html files", renamed);
    }
    Ok(renamed)
}

pub async fn scrape(url: &str, options: &ScrapeOptions, config: &Config) -> Result<PathBuf> {
    //! Mirrors `url` into the output directory and post-processes the
    //! result. Returns the output directory.
    let target = parse_target(url)?;
    let scrape = options.apply(&config.scrape);
    let output = options
        .output
        .clone()
        .unwrap_or_else(|| config.paths.scraped.clone());

    tracing::info!("Scraping {}", target);
    tracing::info!("Output directory: {}", output.display());
    tracing::info!("Method: {}, depth: {}", scrape.method, scrape.depth);

    file_handler::clean_dir(&output).await?;
    let spec = match scrape.method {
        ScrapeMethod::Httrack => httrack_command(&target, &output, &scrape),
        ScrapeMethod::Wget => wget_command(&target, &output, &scrape),
    };
    runner::run(&spec).await?;

    for extra in &scrape.extra_files {
        let dest = match &extra.prefix {
            Some(prefix) => output.join(prefix.trim_matches('/')),
            None => output.clone(),
        };
        fs::create_dir_all(&dest).await?;
        runner::run(&extra_file_command(&extra.url, &dest, &scrape)).await?;
    }

    if let Some(replacement) = &scrape.domain_replacement {
        replace_domains(&output, &replacement.source, &replacement.target).await?;
    }
    rename_php_html(&output).await?;

    tracing::info!("Website scraped to {}", output.display());
    Ok(output)
}
