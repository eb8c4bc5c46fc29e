use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, HeaderName, LAST_MODIFIED};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Serialize;
use url::Url;

use crate::credentials::Credentials;
use crate::error::{ClientError, check_status};

const FILES_ROOT: [&str; 3] = ["remote.php", "dav", "files"];
const VERSIONS_ROOT: [&str; 3] = ["remote.php", "dav", "versions"];
const PROPFIND_BODY: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8"?>"#,
    r#"<d:propfind xmlns:d="DAV:"><d:prop><d:resourcetype/></d:prop></d:propfind>"#
);

/// Generation-1 client: plain WebDAV under `remote.php/dav`.
#[derive(Clone)]
pub struct DavClient {
    http: Client,
    base_url: Url,
    credentials: Option<Credentials>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DavEntry {
    pub path: String,
    pub is_folder: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceHead {
    pub etag: Option<String>,
    pub size: Option<u64>,
    pub last_modified: Option<String>,
    pub content_type: Option<String>,
}

impl DavClient {
    pub fn new(base_url: &str, credentials: Option<Credentials>) -> Result<Self, ClientError> {
        Ok(Self::with_http(
            Client::new(),
            Url::parse(base_url)?,
            credentials,
        ))
    }

    pub fn with_http(http: Client, base_url: Url, credentials: Option<Credentials>) -> Self {
        Self {
            http,
            base_url,
            credentials,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn user(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.user.as_str())
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// The underlying HTTP client, shared with an `OcsClient` built for the
    /// same session so both send the same cookies.
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// `PROPFIND Depth: 0`; a 404 is reported as `false` rather than an error.
    pub async fn exists(&self, path: &str) -> Result<bool, ClientError> {
        let url = self.files_url(path)?;
        let response = self.propfind(url, "0")?.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_status(response).await?;
        Ok(true)
    }

    pub async fn head(&self, path: &str) -> Result<ResourceHead, ClientError> {
        let url = self.files_url(path)?;
        let response = check_status(self.request(Method::HEAD, url).send().await?).await?;
        let headers = response.headers();
        let text = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim_matches('"').to_string())
        };
        Ok(ResourceHead {
            etag: text(ETAG),
            size: text(CONTENT_LENGTH).and_then(|v| v.parse().ok()),
            last_modified: text(LAST_MODIFIED),
            content_type: text(CONTENT_TYPE),
        })
    }

    /// Direct children of `path` (`PROPFIND Depth: 1`), excluding the folder itself.
    pub async fn list_folder(&self, path: &str) -> Result<Vec<DavEntry>, ClientError> {
        let url = self.files_url(path)?;
        let root = self.files_url("/")?;
        let response = check_status(self.propfind(url, "1")?.send().await?).await?;
        let body = response.text().await?;
        let own = normalize_remote(path);

        let mut entries = Vec::new();
        for href in multistatus_hrefs(&body) {
            let Some(entry) = entry_from_href(&href, root.path()) else {
                continue;
            };
            if entry.path != own {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    pub async fn create_folder(&self, path: &str) -> Result<(), ClientError> {
        let url = self.files_url(path)?;
        check_status(self.request(dav_method("MKCOL")?, url).send().await?).await?;
        Ok(())
    }

    pub async fn move_resource(
        &self,
        from: &str,
        to: &str,
        overwrite: bool,
    ) -> Result<(), ClientError> {
        self.transfer("MOVE", from, to, overwrite).await
    }

    pub async fn copy_resource(
        &self,
        from: &str,
        to: &str,
        overwrite: bool,
    ) -> Result<(), ClientError> {
        self.transfer("COPY", from, to, overwrite).await
    }

    pub async fn delete_resource(&self, path: &str) -> Result<(), ClientError> {
        let url = self.files_url(path)?;
        check_status(self.request(Method::DELETE, url).send().await?).await?;
        Ok(())
    }

    /// Restores `version` of the file with server-side id `file_id`.
    pub async fn restore_version(&self, file_id: &str, version: &str) -> Result<(), ClientError> {
        let user = self.user().ok_or(ClientError::Anonymous)?;
        let source = self.dav_url(&VERSIONS_ROOT, &[user, "versions", file_id, version])?;
        let target = self.dav_url(&VERSIONS_ROOT, &[user, "restore", "target"])?;
        let response = self
            .request(dav_method("MOVE")?, source)
            .header("Destination", target.as_str())
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn transfer(
        &self,
        method: &'static str,
        from: &str,
        to: &str,
        overwrite: bool,
    ) -> Result<(), ClientError> {
        let source = self.files_url(from)?;
        let target = self.files_url(to)?;
        let response = self
            .request(dav_method(method)?, source)
            .header("Destination", target.as_str())
            .header("Overwrite", if overwrite { "T" } else { "F" })
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    fn propfind(&self, url: Url, depth: &'static str) -> Result<RequestBuilder, ClientError> {
        Ok(self
            .request(dav_method("PROPFIND")?, url)
            .header("Depth", depth)
            .header(CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(PROPFIND_BODY))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.credentials {
            Some(creds) => builder.basic_auth(&creds.user, Some(&creds.secret)),
            None => builder,
        }
    }

    fn files_url(&self, path: &str) -> Result<Url, ClientError> {
        let user = self.user().ok_or(ClientError::Anonymous)?;
        let segments = remote_segments(path)?;
        let mut tail = vec![user];
        tail.extend(segments);
        self.dav_url(&FILES_ROOT, &tail)
    }

    fn dav_url(&self, root: &[&str], tail: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ClientError::BaseUrl(self.base_url.to_string()))?;
            segments.pop_if_empty();
            segments.extend(root);
            segments.extend(tail);
        }
        Ok(url)
    }
}

fn dav_method(name: &'static str) -> Result<Method, ClientError> {
    Method::from_bytes(name.as_bytes()).map_err(|_| ClientError::Method(name))
}

fn remote_segments(path: &str) -> Result<Vec<&str>, ClientError> {
    let mut segments = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(ClientError::InvalidPath(path.to_string())),
            other => segments.push(other),
        }
    }
    Ok(segments)
}

fn normalize_remote(path: &str) -> String {
    let joined = path
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect::<Vec<_>>()
        .join("/");
    format!("/{joined}")
}

fn entry_from_href(href: &str, files_root: &str) -> Option<DavEntry> {
    // Servers may answer with absolute URLs or bare paths.
    let href_path = match Url::parse(href) {
        Ok(url) => url.path().to_string(),
        Err(_) => href.to_string(),
    };
    let decoded = urlencoding::decode(&href_path).ok()?;
    let root = urlencoding::decode(files_root).ok()?;
    let relative = decoded.strip_prefix(root.trim_end_matches('/'))?;
    Some(DavEntry {
        path: normalize_remote(relative),
        is_folder: relative.ends_with('/'),
    })
}

/// Text content of every `href` element in a multistatus body.
fn multistatus_hrefs(body: &str) -> Vec<String> {
    let mut hrefs = Vec::new();
    for segment in body.split('<').skip(1) {
        let Some((tag, text)) = segment.split_once('>') else {
            continue;
        };
        let name = tag.split_whitespace().next().unwrap_or_default();
        if name.starts_with('/') {
            continue;
        }
        let local = name.rsplit(':').next().unwrap_or(name);
        if local == "href" {
            hrefs.push(text.trim().replace("&amp;", "&"));
        }
    }
    hrefs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_hrefs_with_any_namespace_prefix() {
        let body = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
  <d:response><d:href>/remote.php/dav/files/alice/Docs/</d:href></d:response>
  <D:response><D:href>/remote.php/dav/files/alice/Docs/a%20b.txt</D:href></D:response>
  <response><href>/remote.php/dav/files/alice/Docs/Tom&amp;Jerry/</href></response>
</d:multistatus>"#;
        assert_eq!(
            multistatus_hrefs(body),
            vec![
                "/remote.php/dav/files/alice/Docs/",
                "/remote.php/dav/files/alice/Docs/a%20b.txt",
                "/remote.php/dav/files/alice/Docs/Tom&Jerry/",
            ]
        );
    }

    #[test]
    fn maps_hrefs_relative_to_files_root() {
        let entry = entry_from_href(
            "https://cloud.example.com/remote.php/dav/files/alice/Docs/a%20b.txt",
            "/remote.php/dav/files/alice/",
        )
        .unwrap();
        assert_eq!(entry.path, "/Docs/a b.txt");
        assert!(!entry.is_folder);

        let folder =
            entry_from_href("/remote.php/dav/files/alice/Docs/", "/remote.php/dav/files/alice")
                .unwrap();
        assert_eq!(folder.path, "/Docs");
        assert!(folder.is_folder);
    }

    #[test]
    fn rejects_parent_dir_segments() {
        assert!(matches!(
            remote_segments("/Docs/../secret"),
            Err(ClientError::InvalidPath(_))
        ));
    }

    #[test]
    fn files_url_encodes_segments_under_user_root() {
        let client = DavClient::new(
            "https://cloud.example.com/nextcloud/",
            Some(Credentials::new("alice", "pw")),
        )
        .unwrap();
        let url = client.files_url("/Docs/Hello World.txt").unwrap();
        assert_eq!(
            url.as_str(),
            "https://cloud.example.com/nextcloud/remote.php/dav/files/alice/Docs/Hello%20World.txt"
        );
    }

    #[test]
    fn anonymous_client_cannot_address_files() {
        let client = DavClient::new("https://cloud.example.com", None).unwrap();
        assert!(matches!(
            client.files_url("/Docs"),
            Err(ClientError::Anonymous)
        ));
    }
}
