use crate::error::{Error, Result};
use crate::patterns::{self, Pattern, PatternSpec};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "ecstatic.config.json";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.7103.48 Safari/537.36";

/// Whole configuration file. Every section falls back to its defaults, so a
/// config file only needs the keys it overrides.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub paths: Paths,
    pub scrape: ScrapeConfig,
    pub optimize: OptimizeConfig,
    pub deploy: DeployConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Paths {
    pub scraped: PathBuf,
    pub dist: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Paths {
            scraped: PathBuf::from("./scraped"),
            dist: PathBuf::from("./dist"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeMethod {
    Httrack,
    Wget,
}

impl std::fmt::Display for ScrapeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScrapeMethod::Httrack => write!(f, "httrack"),
            ScrapeMethod::Wget => write!(f, "wget"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScrapeConfig {
    pub depth: u32,
    pub method: ScrapeMethod,
    pub timeout: u64,
    pub user_agent: Option<String>,
    pub proxy: Option<String>,
    pub no_proxy: bool,
    pub extra_files: Vec<ExtraFile>,
    pub domain_replacement: Option<DomainReplacement>,
    pub httrack: HttrackConfig,
    pub wget: WgetConfig,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        ScrapeConfig {
            depth: 3,
            method: ScrapeMethod::Httrack,
            timeout: 10,
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
            proxy: None,
            no_proxy: false,
            extra_files: Vec::new(),
            domain_replacement: None,
            httrack: HttrackConfig::default(),
            wget: WgetConfig::default(),
        }
    }
}

/// A file fetched next to the mirror, e.g. a sitemap the crawler never links to.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtraFile {
    pub url: String,
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DomainReplacement {
    pub source: String,
    pub target: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirUpDown {
    Up,
    Down,
    Both,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttrackConfig {
    pub debug_log: bool,
    pub near: bool,
    pub dir_up_down: Option<DirUpDown>,
    pub ext_depth: u32,
    pub sockets: u32,
    pub keep_links: Option<u32>,
    pub robots: Option<u32>,
    pub connections_per_second: Option<u32>,
    pub updatehack: bool,
    pub mirror: bool,
    /// Raw httrack filters, `{domain}` is replaced with the scraped host.
    pub filters: Vec<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for HttrackConfig {
    fn default() -> Self {
        HttrackConfig {
            debug_log: false,
            near: true,
            dir_up_down: Some(DirUpDown::Down),
            ext_depth: 0,
            sockets: 2,
            keep_links: Some(0),
            robots: Some(0),
            connections_per_second: Some(2),
            updatehack: true,
            mirror: false,
            filters: Vec::new(),
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WgetConfig {
    pub recursive: bool,
    pub page_requisites: bool,
    pub convert_links: bool,
    pub restrict_file_names: Option<String>,
    pub no_parent: bool,
    pub mirror: bool,
    pub no_clobber: bool,
    pub execute: Vec<String>,
    pub no_host_directories: bool,
    pub adjust_extension: bool,
    #[serde(deserialize_with = "string_or_number")]
    pub wait: Option<String>,
    pub exclude_directories: Option<String>,
    pub reject: Vec<String>,
}

impl Default for WgetConfig {
    fn default() -> Self {
        WgetConfig {
            recursive: false,
            page_requisites: false,
            convert_links: false,
            restrict_file_names: Some("windows".to_string()),
            no_parent: true,
            mirror: false,
            no_clobber: false,
            execute: vec!["robots=off".to_string()],
            no_host_directories: true,
            adjust_extension: true,
            wait: Some("1".to_string()),
            exclude_directories: None,
            reject: Vec::new(),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Interval {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Option::<Interval>::deserialize(deserializer)? {
        Some(Interval::Text(x)) if x.is_empty() => None,
        Some(Interval::Text(x)) => Some(x),
        Some(Interval::Number(x)) => Some(x.to_string()),
        None => None,
    })
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizeConfig {
    /// Upper bound on documents rewritten at the same time.
    pub concurrency: usize,
    pub js: JsConfig,
    pub jampack: JampackConfig,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        OptimizeConfig {
            concurrency: 8,
            js: JsConfig::default(),
            jampack: JampackConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JsConfig {
    pub offload: OffloadConfig,
    pub defer: PatternSetConfig,
    pub externalize_inline: bool,
    /// Directory, relative to the site root, receiving externalized scripts.
    pub externalize_dir: String,
}

impl Default for JsConfig {
    fn default() -> Self {
        JsConfig {
            offload: OffloadConfig::default(),
            defer: PatternSetConfig::default(),
            externalize_inline: false,
            externalize_dir: "_ecstatic".to_string(),
        }
    }
}

/// When a pattern set is allowed to neutralize a script.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum When {
    Always,
    Never,
    BelowTheFold,
}

impl Default for When {
    fn default() -> Self {
        When::Always
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PatternSetConfig {
    pub when: When,
    pub patterns: Vec<PatternSpec>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OffloadConfig {
    pub when: When,
    pub patterns: Vec<PatternSpec>,
    /// Web-worker relay snippet (e.g. a Partytown build) injected into `<head>`.
    pub worker_relay: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JampackConfig {
    pub enabled: bool,
    pub bin: PathBuf,
}

impl Default for JampackConfig {
    fn default() -> Self {
        JampackConfig {
            enabled: true,
            bin: PathBuf::from("jampack"),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeployConfig {
    pub bunny: BunnyConfig,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BunnyConfig {
    pub access_key: String,
    pub global_api_key: String,
    pub storage_zone: String,
    pub region: String,
    pub purge_url: String,
}

impl BunnyConfig {
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("access_key", &self.access_key),
            ("global_api_key", &self.global_api_key),
            ("storage_zone", &self.storage_zone),
            ("purge_url", &self.purge_url),
        ]
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(key, _)| *key)
        .collect();

        if missing.is_empty() {
            return Ok(());
        }
        Err(Error::Config(format!(
            "missing deploy.bunny.{}",
            missing.join(", deploy.bunny.")
        )))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// The file `load` reads: an explicit path, else `ecstatic.config.json`
    /// in the working directory when present.
    pub fn locate(path: Option<&Path>) -> Option<PathBuf> {
        match path {
            Some(x) => Some(x.to_path_buf()),
            None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|x| x.is_file()),
        }
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        //! Loads the located config file, or the defaults without one.
        let path = match Self::locate(path) {
            Some(x) => x,
            None => return Ok(Config::default()),
        };
        let text = std::fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// A compiled pattern set.
#[derive(Clone, Debug, Default)]
pub struct PatternSet {
    pub when: When,
    pub patterns: Vec<Pattern>,
}

impl PatternSet {
    fn compile(set: &'static str, when: When, specs: &[PatternSpec]) -> Result<Self> {
        Ok(PatternSet {
            when,
            patterns: patterns::compile(set, specs)?,
        })
    }

    /// Whether this set may act on a script at the given position.
    pub fn applies(&self, above_the_fold: bool) -> bool {
        match self.when {
            When::Always => true,
            When::Never => false,
            When::BelowTheFold => !above_the_fold,
        }
    }
}

/// Everything the script engine needs, validated once before any document
/// is touched.
#[derive(Clone, Debug, Default)]
pub struct ScriptPolicy {
    pub offload: PatternSet,
    pub defer: PatternSet,
    /// Site-root relative directory for externalized inline scripts.
    pub externalize_dir: Option<String>,
    pub relay_snippet: Option<String>,
}

impl ScriptPolicy {
    pub fn from_config(config: &JsConfig) -> Result<Self> {
        let relay_snippet = match &config.offload.worker_relay {
            Some(path) => Some(std::fs::read_to_string(path).map_err(|e| {
                Error::Config(format!(
                    "cannot read worker relay snippet {}: {}",
                    path.display(),
                    e
                ))
            })?),
            None => None,
        };
        let externalize_dir = if config.externalize_inline {
            let dir = config.externalize_dir.trim_matches('/');
            if dir.is_empty() || dir.split('/').any(|x| x == "..") {
                return Err(Error::Config(format!(
                    "invalid optimize.js.externalize_dir `{}`",
                    config.externalize_dir
                )));
            }
            Some(dir.to_string())
        } else {
            None
        };
        Ok(ScriptPolicy {
            offload: PatternSet::compile("offload", config.offload.when, &config.offload.patterns)?,
            defer: PatternSet::compile("defer", config.defer.when, &config.defer.patterns)?,
            externalize_dir,
            relay_snippet,
        })
    }
}
