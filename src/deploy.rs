use crate::config::BunnyConfig;
use crate::error::{Error, Result};
use crate::file_handler::{self, LocalFile};
use futures::stream::{self, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use url::Url;

const STORAGE_HOST: &str = "storage.bunnycdn.com";
const PURGE_ENDPOINT: &str = "https://api.bunny.net/purge";
const ACCESS_KEY: &str = "AccessKey";
const UPLOAD_TASKS: usize = 4;

/// An entry of a storage zone listing.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct StorageObject {
    pub object_name: String,
    pub is_directory: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeploySummary {
    pub remote_items: usize,
    pub deleted: usize,
    pub delete_failures: usize,
    pub local_files: usize,
    pub uploaded: usize,
    pub upload_failures: usize,
    pub purged: bool,
}

pub fn storage_base(region: &str) -> Result<Url> {
    let region = region.trim();
    let host = if region.is_empty() {
        STORAGE_HOST.to_string()
    } else {
        format!("{}.{}", region, STORAGE_HOST)
    };
    Ok(Url::parse(&format!("https://{}/", host))?)
}

pub fn object_url(base: &Url, zone: &str, path: &str, directory: bool) -> Result<Url> {
    //! `{base}/{zone}/{path}`, each segment percent-encoded. Directories
    //! keep a trailing slash.
    let mut url = base.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| Error::Pipeline(format!("{} cannot hold a path", base)))?;
        segments.clear().push(zone);
        segments.extend(path.split('/').filter(|x| !x.is_empty()));
        if directory {
            segments.push("");
        }
    }
    Ok(url)
}

pub fn purge_url(site: &str) -> Result<Url> {
    Ok(Url::parse_with_params(
        PURGE_ENDPOINT,
        &[("url", site), ("async", "false")],
    )?)
}

pub struct BunnyClient {
    client: reqwest::Client,
    config: BunnyConfig,
    storage: Url,
    upload: Url,
}

impl BunnyClient {
    pub fn new(config: &BunnyConfig) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(BunnyClient {
            client,
            config: config.clone(),
            storage: storage_base("")?,
            upload: storage_base(&config.region)?,
        })
    }

    async fn try_list(&self) -> Result<Vec<StorageObject>> {
        let url = object_url(&self.storage, &self.config.storage_zone, "", true)?;
        let text = self
            .client
            .get(url)
            .header(ACCEPT, mime::APPLICATION_JSON.as_ref())
            .header(ACCESS_KEY, &self.config.access_key)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn list(&self) -> Vec<StorageObject> {
        //! Top-level entries of the storage zone, empty when the listing fails.
        match self.try_list().await {
            Ok(x) => x,
            Err(e) => {
                tracing::error!("Error listing files: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn delete(&self, object: &StorageObject) -> Result<()> {
        let url = object_url(
            &self.storage,
            &self.config.storage_zone,
            &object.object_name,
            object.is_directory,
        )?;
        self.client
            .delete(url)
            .header(ACCESS_KEY, &self.config.access_key)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn upload(&self, file: &LocalFile) -> Result<()> {
        let url = object_url(&self.upload, &self.config.storage_zone, &file.remote_path, false)?;
        let body = fs::read(&file.local_path).await?;
        let response = self
            .client
            .put(url)
            .header(ACCESS_KEY, &self.config.access_key)
            .header(CONTENT_TYPE, mime::APPLICATION_OCTET_STREAM.as_ref())
            .body(body)
            .send()
            .await?;
        if response.status() == StatusCode::CREATED {
            Ok(())
        } else {
            Err(Error::Pipeline(format!("HTTP {}", response.status())))
        }
    }

    pub async fn purge(&self) -> Result<()> {
        self.client
            .post(purge_url(&self.config.purge_url)?)
            .header(ACCESS_KEY, &self.config.global_api_key)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

pub async fn deploy(dist: &Path, config: &BunnyConfig) -> Result<DeploySummary> {
    //! Replaces the storage zone content with `dist` and purges the pull
    //! zone cache. Failed deletes, uploads and purges are logged and
    //! counted, they never stop the deployment.
    if !fs::metadata(dist).await.map(|x| x.is_dir()).unwrap_or(false) {
        return Err(Error::Pipeline(format!(
            "Distribution directory does not exist: {}",
            dist.display()
        )));
    }
    let client = BunnyClient::new(config)?;
    tracing::info!("Deploying from {}", dist.display());
    let mut summary = DeploySummary::default();

    tracing::info!("[1/4] Listing remote files");
    let remote = client.list().await;
    summary.remote_items = remote.len();
    tracing::info!("Found {} remote items", remote.len());

    if !remote.is_empty() {
        tracing::info!("[2/4] Deleting remote files");
        for object in &remote {
            match client.delete(object).await {
                Ok(()) => {
                    tracing::info!("Deleted: {}", object.object_name);
                    summary.deleted += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to delete {}: {}", object.object_name, e);
                    summary.delete_failures += 1;
                }
            }
        }
    }

    tracing::info!("[3/4] Uploading local files");
    let files = file_handler::list_files(dist).await?;
    summary.local_files = files.len();
    tracing::info!("Found {} local files to upload", files.len());
    let results: Vec<(String, Result<()>)> = stream::iter(files)
        .map(|file| {
            let client = &client;
            async move {
                let result = client.upload(&file).await;
                (file.remote_path, result)
            }
        })
        .buffer_unordered(UPLOAD_TASKS)
        .collect()
        .await;
    for (path, result) in results {
        match result {
            Ok(()) => {
                tracing::info!("Uploaded: {}", path);
                summary.uploaded += 1;
            }
            Err(e) => {
                tracing::warn!("Failed to upload {}: {}", path, e);
                summary.upload_failures += 1;
            }
        }
    }
    tracing::info!("Uploaded {}/{} files", summary.uploaded, summary.local_files);

    tracing::info!("[4/4] Purging CDN cache");
    match client.purge().await {
        Ok(()) => {
            tracing::info!("Cache purged");
            summary.purged = true;
        }
        Err(e) => tracing::warn!("Failed to purge cache: {}", e),
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_hosts() {
        assert_eq!(storage_base("").unwrap().as_str(), "https://storage.bunnycdn.com/");
        assert_eq!(
            storage_base(" ny ").unwrap().as_str(),
            "https://ny.storage.bunnycdn.com/"
        );
    }

    #[test]
    fn object_urls() {
        let base = storage_base("").unwrap();
        assert_eq!(
            object_url(&base, "my-zone", "", true).unwrap().as_str(),
            "https://storage.bunnycdn.com/my-zone/"
        );
        assert_eq!(
            object_url(&base, "my-zone", "blog/my post.html", false)
                .unwrap()
                .as_str(),
            "https://storage.bunnycdn.com/my-zone/blog/my%20post.html"
        );
        assert_eq!(
            object_url(&base, "my-zone", "assets", true).unwrap().as_str(),
            "https://storage.bunnycdn.com/my-zone/assets/"
        );
    }

    #[test]
    fn purge_query_is_encoded() {
        let url = purge_url("https://www.example.com/*").unwrap();
        assert_eq!(url.host_str(), Some("api.bunny.net"));
        assert_eq!(url.path(), "/purge");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("url".to_string(), "https://www.example.com/*".to_string()),
                ("async".to_string(), "false".to_string()),
            ]
        );
    }

    #[test]
    fn listing_ignores_extra_fields() {
        let text = r#"[
            { "Guid": "1", "ObjectName": "index.html", "IsDirectory": false, "Length": 10 },
            { "Guid": "2", "ObjectName": "assets", "IsDirectory": true, "Length": 0 }
        ]"#;
        let objects: Vec<StorageObject> = serde_json::from_str(text).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[1].object_name, "assets");
        assert!(objects[1].is_directory);
    }

    #[tokio::test]
    async fn deploy_checks_before_any_request() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("dist");
        let result = deploy(&missing, &BunnyConfig::default()).await;
        assert!(matches!(result, Err(Error::Pipeline(_))));

        let result = deploy(dir.path(), &BunnyConfig::default()).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
