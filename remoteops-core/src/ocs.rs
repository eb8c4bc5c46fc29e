use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;
use time::macros::format_description;
use url::Url;

use crate::credentials::Credentials;
use crate::error::{ClientError, check_status};

const SHARES_API: [&str; 6] = ["ocs", "v2.php", "apps", "files_sharing", "api", "v1"];
const DOWNLOAD_LIMIT_API: [&str; 6] = ["ocs", "v2.php", "apps", "files_downloadlimit", "api", "v1"];
const USER_API: [&str; 3] = ["ocs", "v2.php", "cloud"];

/// Generation-2 client: the JSON flavour of the OCS REST API.
#[derive(Clone)]
pub struct OcsClient {
    http: Client,
    base_url: Url,
    credentials: Option<Credentials>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServerStatus {
    pub installed: bool,
    pub maintenance: bool,
    pub version: String,
    #[serde(rename = "versionstring", default)]
    pub version_string: Option<String>,
    #[serde(rename = "productname", default)]
    pub product_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct UserInfo {
    pub id: String,
    #[serde(rename = "display-name", alias = "displayname", default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShareType {
    User,
    Group,
    PublicLink,
    Email,
    FederatedCloud,
    Circle,
    Room,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Share {
    #[serde(deserialize_with = "number_or_string")]
    pub id: u64,
    pub share_type: i64,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub permissions: Option<u32>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub share_with: Option<String>,
    #[serde(default)]
    pub expiration: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewShare {
    pub path: String,
    pub share_type: ShareType,
    pub share_with: Option<String>,
    pub permissions: Option<u32>,
    pub password: Option<String>,
    pub expire_date: Option<String>,
    pub note: Option<String>,
    pub label: Option<String>,
    pub attributes: Option<String>,
    pub hide_download: Option<bool>,
}

/// Fields to change on an existing share; `None` leaves a field untouched.
/// An empty `expire_date` clears the expiration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShareUpdate {
    pub password: Option<String>,
    pub expire_date: Option<String>,
    pub permissions: Option<u32>,
    pub note: Option<String>,
    pub label: Option<String>,
    pub attributes: Option<String>,
    pub hide_download: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ocs: OcsBody<T>,
}

#[derive(Debug, Deserialize)]
struct OcsBody<T> {
    meta: OcsMeta,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct OcsMeta {
    statuscode: u16,
    #[serde(default)]
    message: Option<String>,
}

impl ShareType {
    pub fn code(self) -> i64 {
        match self {
            ShareType::User => 0,
            ShareType::Group => 1,
            ShareType::PublicLink => 3,
            ShareType::Email => 4,
            ShareType::FederatedCloud => 6,
            ShareType::Circle => 7,
            ShareType::Room => 10,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => ShareType::User,
            1 => ShareType::Group,
            3 => ShareType::PublicLink,
            4 => ShareType::Email,
            6 => ShareType::FederatedCloud,
            7 => ShareType::Circle,
            10 => ShareType::Room,
            _ => return None,
        })
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_uppercase().as_str() {
            "USER" => ShareType::User,
            "GROUP" => ShareType::Group,
            "PUBLIC_LINK" => ShareType::PublicLink,
            "EMAIL" => ShareType::Email,
            "FEDERATED" | "FEDERATED_CLOUD" => ShareType::FederatedCloud,
            "CIRCLE" => ShareType::Circle,
            "ROOM" => ShareType::Room,
            _ => return None,
        })
    }
}

impl OcsClient {
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

    /// `status.php` is public and not wrapped in an OCS envelope.
    pub async fn server_status(&self) -> Result<ServerStatus, ClientError> {
        let url = self.url(&[], &["status.php"])?;
        let response = check_status(self.http.get(url).send().await?).await?;
        Ok(response.json().await?)
    }

    pub async fn user_info(&self) -> Result<UserInfo, ClientError> {
        let url = self.url(&USER_API, &["user"])?;
        self.send_ocs::<UserInfo>(self.request(Method::GET, url))
            .await?
            .ok_or(ClientError::MissingData)
    }

    pub async fn get_share(&self, id: u64) -> Result<Share, ClientError> {
        let id = id.to_string();
        let url = self.url(&SHARES_API, &["shares", &id])?;
        // A single share is still returned as a one-element list.
        self.send_ocs::<Vec<Share>>(self.request(Method::GET, url))
            .await?
            .and_then(|shares| shares.into_iter().next())
            .ok_or(ClientError::MissingData)
    }

    pub async fn create_share(&self, share: &NewShare) -> Result<Share, ClientError> {
        let url = self.url(&SHARES_API, &["shares"])?;
        let mut form = vec![
            ("path", share.path.clone()),
            ("shareType", share.share_type.code().to_string()),
        ];
        push_opt(&mut form, "shareWith", share.share_with.clone());
        push_opt(&mut form, "permissions", share.permissions.map(|p| p.to_string()));
        push_opt(&mut form, "password", share.password.clone());
        push_opt(&mut form, "expireDate", share.expire_date.clone());
        push_opt(&mut form, "note", share.note.clone());
        push_opt(&mut form, "label", share.label.clone());
        push_opt(&mut form, "attributes", share.attributes.clone());
        push_opt(&mut form, "hideDownload", share.hide_download.map(bool_param));
        self.send_ocs::<Share>(self.request(Method::POST, url).form(&form))
            .await?
            .ok_or(ClientError::MissingData)
    }

    pub async fn update_share(&self, id: u64, update: &ShareUpdate) -> Result<Share, ClientError> {
        let id = id.to_string();
        let url = self.url(&SHARES_API, &["shares", &id])?;
        let mut form = Vec::new();
        push_opt(&mut form, "password", update.password.clone());
        push_opt(&mut form, "expireDate", update.expire_date.clone());
        push_opt(&mut form, "permissions", update.permissions.map(|p| p.to_string()));
        push_opt(&mut form, "note", update.note.clone());
        push_opt(&mut form, "label", update.label.clone());
        push_opt(&mut form, "attributes", update.attributes.clone());
        push_opt(&mut form, "hideDownload", update.hide_download.map(bool_param));
        self.send_ocs::<Share>(self.request(Method::PUT, url).form(&form))
            .await?
            .ok_or(ClientError::MissingData)
    }

    pub async fn delete_share(&self, id: u64) -> Result<(), ClientError> {
        let id = id.to_string();
        let url = self.url(&SHARES_API, &["shares", &id])?;
        self.send_ocs::<serde_json::Value>(self.request(Method::DELETE, url))
            .await?;
        Ok(())
    }

    pub async fn set_download_limit(&self, token: &str, limit: u32) -> Result<(), ClientError> {
        let url = self.url(&DOWNLOAD_LIMIT_API, &[token, "limit"])?;
        let form = [("limit", limit.to_string())];
        self.send_ocs::<serde_json::Value>(self.request(Method::PUT, url).form(&form))
            .await?;
        Ok(())
    }

    pub async fn remove_download_limit(&self, token: &str) -> Result<(), ClientError> {
        let url = self.url(&DOWNLOAD_LIMIT_API, &[token, "limit"])?;
        self.send_ocs::<serde_json::Value>(self.request(Method::DELETE, url))
            .await?;
        Ok(())
    }

    async fn send_ocs<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Option<T>, ClientError> {
        let response = check_status(request.send().await?).await?;
        let envelope: Envelope<T> = response.json().await?;
        let meta = envelope.ocs.meta;
        if !matches!(meta.statuscode, 100 | 200) {
            return Err(ClientError::Ocs {
                status_code: meta.statuscode,
                message: meta.message.unwrap_or_default(),
            });
        }
        Ok(envelope.ocs.data)
    }

    fn request(&self, method: Method, mut url: Url) -> RequestBuilder {
        url.query_pairs_mut().append_pair("format", "json");
        let builder = self
            .http
            .request(method, url)
            .header("OCS-APIRequest", "true")
            .header("Accept", "application/json");
        match &self.credentials {
            Some(creds) => builder.basic_auth(&creds.user, Some(&creds.secret)),
            None => builder,
        }
    }

    fn url(&self, root: &[&str], tail: &[&str]) -> Result<Url, ClientError> {
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

/// Maps an expiration given in epoch milliseconds to the `expireDate` form value:
/// zero leaves the expiration unchanged, negative clears it.
pub fn expire_date_param(millis: i64) -> Option<String> {
    if millis == 0 {
        return None;
    }
    if millis < 0 {
        return Some(String::new());
    }
    let date = OffsetDateTime::from_unix_timestamp(millis / 1000).ok()?;
    date.format(format_description!("[year]-[month]-[day]")).ok()
}

fn push_opt(form: &mut Vec<(&'static str, String)>, key: &'static str, value: Option<String>) {
    if let Some(value) = value {
        form.push((key, value));
    }
}

fn bool_param(value: bool) -> String {
    if value { "true" } else { "false" }.to_string()
}

fn number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}
