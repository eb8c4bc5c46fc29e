//! Translates caller requests (an action name plus a flat parameter bag)
//! into queued operations or folder-sync jobs.

use std::collections::BTreeMap;
use std::sync::Arc;

use remoteops_core::{ShareType, ShareUpdate, expire_date_param};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::{Account, RemoteOperation, Target, TargetError};
use crate::operations::{
    CheckCredentials, CreateFolder, CreateShare, GetServerInfo, GetUserName, RemoveFile,
    RenameFile, RestoreVersion, ShareOptions, SyncFile, SynchronizeFolder, Transfer,
    TransferFile, Unshare, UpdateDownloadLimit, UpdateKind, UpdateShare,
};
use crate::sync::FolderSyncJob;
use crate::sync::paths::PathError;

pub mod params {
    pub const ACCOUNT: &str = "ACCOUNT";
    pub const SERVER_URL: &str = "SERVER_URL";
    pub const REMOTE_PATH: &str = "REMOTE_PATH";
    pub const NEWNAME: &str = "NEWNAME";
    pub const REMOVE_LOCAL_COPY: &str = "REMOVE_LOCAL_COPY";
    pub const SYNC_FILE_CONTENTS: &str = "SYNC_FILE_CONTENTS";
    pub const NEW_PARENT_PATH: &str = "NEW_PARENT_PATH";
    pub const FILE_ID: &str = "FILE_ID";
    pub const FILE_VERSION: &str = "FILE_VERSION";
    pub const SHARE_PASSWORD: &str = "SHARE_PASSWORD";
    pub const SHARE_TYPE: &str = "SHARE_TYPE";
    pub const SHARE_WITH: &str = "SHARE_WITH";
    /// Epoch milliseconds. Zero or absent keeps the current expiration,
    /// a negative value removes it.
    pub const SHARE_EXPIRATION: &str = "SHARE_EXPIRATION_YEAR";
    pub const SHARE_PERMISSIONS: &str = "SHARE_PERMISSIONS";
    pub const SHARE_PUBLIC_LABEL: &str = "SHARE_PUBLIC_LABEL";
    pub const HIDE_FILE_DOWNLOAD: &str = "HIDE_FILE_DOWNLOAD";
    pub const SHARE_ID: &str = "SHARE_ID";
    pub const SHARE_NOTE: &str = "SHARE_NOTE";
    pub const SHARE_ATTRIBUTES: &str = "SHARE_ATTRIBUTES";
    pub const IN_BACKGROUND: &str = "IN_BACKGROUND";
    pub const FILES_DOWNLOAD_LIMIT: &str = "FILES_DOWNLOAD_LIMIT";
}

/// One parameter value as sent by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Str(String),
    Blob(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub action: String,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}

impl OperationRequest {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: ParamValue) -> Self {
        self.params.insert(name.to_string(), value);
        self
    }

    pub fn with_str(self, name: &str, value: impl Into<String>) -> Self {
        self.with(name, ParamValue::Str(value.into()))
    }

    pub fn with_int(self, name: &str, value: i64) -> Self {
        self.with(name, ParamValue::Int(value))
    }

    pub fn with_bool(self, name: &str, value: bool) -> Self {
        self.with(name, ParamValue::Bool(value))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("request names neither an account nor a server url")]
    NoTarget,
    #[error("action {0} needs an account")]
    AccountRequired(String),
    #[error("missing parameter {0}")]
    MissingParam(&'static str),
    #[error("invalid parameter {name}: {reason}")]
    InvalidParam { name: &'static str, reason: String },
    #[error(transparent)]
    Target(#[from] TargetError),
    #[error("invalid remote path: {0}")]
    Path(#[from] PathError),
}

/// Where a translated request goes.
pub enum Submission {
    Queue {
        target: Target,
        operation: Arc<dyn RemoteOperation>,
    },
    FolderSync {
        owner: Account,
        path: String,
        job: Arc<dyn FolderSyncJob>,
    },
}

impl std::fmt::Debug for Submission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Submission::Queue { target, operation } => f
                .debug_struct("Queue")
                .field("target", target)
                .field("operation", &operation.name())
                .finish(),
            Submission::FolderSync { owner, path, .. } => f
                .debug_struct("FolderSync")
                .field("owner", &owner.name())
                .field("path", path)
                .finish(),
        }
    }
}

pub fn build_submission(request: &OperationRequest) -> Result<Submission, SubmitError> {
    let args = Params(&request.params);
    let target = args.target()?;
    let queue = |operation: Arc<dyn RemoteOperation>| Submission::Queue {
        target: target.clone(),
        operation,
    };

    let submission = match request.action.as_str() {
        "CREATE_SHARE_VIA_LINK" => queue(Arc::new(CreateShare::public_link(
            args.require_str(params::REMOTE_PATH)?,
            args.share_options()?,
        )?)),
        "CREATE_SECURE_FILE_DROP" => queue(Arc::new(CreateShare::secure_file_drop(
            args.require_str(params::REMOTE_PATH)?,
            args.share_options()?,
        )?)),
        "CREATE_SHARE_WITH_SHAREE" => queue(Arc::new(CreateShare::with_sharee(
            args.require_str(params::REMOTE_PATH)?,
            args.require_str(params::SHARE_WITH)?,
            args.share_type()?,
            args.share_options()?,
        )?)),
        "UPDATE_PUBLIC_SHARE" => queue(Arc::new(UpdateShare::new(
            UpdateKind::PublicShare,
            args.share_id()?,
            args.share_update()?,
        ))),
        "UPDATE_USER_SHARE" => queue(Arc::new(UpdateShare::new(
            UpdateKind::UserShare,
            args.share_id()?,
            args.share_update()?,
        ))),
        "UPDATE_SHARE_INFO" => queue(Arc::new(UpdateShare::new(
            UpdateKind::ShareInfo,
            args.share_id()?,
            args.share_update()?,
        ))),
        "UPDATE_SHARE_NOTE" => queue(Arc::new(UpdateShare::note(
            args.share_id()?,
            args.str(params::SHARE_NOTE)?.unwrap_or_default(),
        ))),
        "UNSHARE" => queue(Arc::new(Unshare::new(args.share_id()?))),
        "UPDATE_FILES_DOWNLOAD_LIMIT" => {
            let limit = args
                .int(params::FILES_DOWNLOAD_LIMIT)?
                .filter(|limit| *limit > 0)
                .map(|limit| {
                    u32::try_from(limit).map_err(|_| SubmitError::InvalidParam {
                        name: params::FILES_DOWNLOAD_LIMIT,
                        reason: format!("{limit} is too large"),
                    })
                })
                .transpose()?;
            queue(Arc::new(UpdateDownloadLimit::new(args.share_id()?, limit)))
        }
        "GET_SERVER_INFO" => queue(Arc::new(GetServerInfo)),
        "GET_USER_NAME" => queue(Arc::new(GetUserName)),
        "CHECK_CURRENT_CREDENTIALS" => {
            if target.account().is_none() {
                return Err(SubmitError::AccountRequired(request.action.clone()));
            }
            queue(Arc::new(CheckCredentials))
        }
        "RENAME" => queue(Arc::new(RenameFile::new(
            args.require_str(params::REMOTE_PATH)?,
            args.require_str(params::NEWNAME)?,
        )?)),
        "MOVE_FILE" | "COPY_FILE" => {
            let kind = if request.action == "MOVE_FILE" {
                Transfer::Move
            } else {
                Transfer::Copy
            };
            queue(Arc::new(TransferFile::new(
                kind,
                args.require_str(params::REMOTE_PATH)?,
                args.require_str(params::NEW_PARENT_PATH)?,
            )?))
        }
        "REMOVE" => queue(Arc::new(
            RemoveFile::new(
                args.require_str(params::REMOTE_PATH)?,
                args.bool(params::REMOVE_LOCAL_COPY, false)?,
            )?
            .in_background(args.bool(params::IN_BACKGROUND, false)?),
        )),
        "CREATE_FOLDER" => queue(Arc::new(CreateFolder::new(
            args.require_str(params::REMOTE_PATH)?,
            true,
        )?)),
        "SYNC_FILE" => queue(Arc::new(SyncFile::new(
            args.require_str(params::REMOTE_PATH)?,
            args.bool(params::SYNC_FILE_CONTENTS, true)?,
        )?)),
        "RESTORE_VERSION" => queue(Arc::new(RestoreVersion::new(
            args.require_text(params::FILE_ID)?,
            args.require_text(params::FILE_VERSION)?,
        ))),
        "SYNC_FOLDER" => {
            let Target::Account(owner) = &target else {
                return Err(SubmitError::AccountRequired(request.action.clone()));
            };
            let job = SynchronizeFolder::new(args.require_str(params::REMOTE_PATH)?)?;
            Submission::FolderSync {
                owner: owner.clone(),
                path: job.remote_path().to_string(),
                job: Arc::new(job),
            }
        }
        other => return Err(SubmitError::UnknownAction(other.to_string())),
    };
    Ok(submission)
}

struct Params<'a>(&'a BTreeMap<String, ParamValue>);

impl Params<'_> {
    fn target(&self) -> Result<Target, SubmitError> {
        let server_url = self.str(params::SERVER_URL)?;
        match (self.str(params::ACCOUNT)?, server_url) {
            (Some(account), server_url) => Ok(Target::Account(Account::parse_with_server(
                account, server_url,
            )?)),
            (None, Some(url)) => Ok(Target::server(url)?),
            (None, None) => Err(SubmitError::NoTarget),
        }
    }

    /// A string parameter; empty strings count as absent.
    fn str(&self, name: &'static str) -> Result<Option<&str>, SubmitError> {
        match self.0.get(name) {
            None => Ok(None),
            Some(ParamValue::Str(value)) if value.is_empty() => Ok(None),
            Some(ParamValue::Str(value)) => Ok(Some(value)),
            Some(other) => Err(mistyped(name, "a string", other)),
        }
    }

    fn require_str(&self, name: &'static str) -> Result<&str, SubmitError> {
        self.str(name)?.ok_or(SubmitError::MissingParam(name))
    }

    /// Identifiers may arrive as strings or integers.
    fn require_text(&self, name: &'static str) -> Result<String, SubmitError> {
        match self.0.get(name) {
            Some(ParamValue::Int(value)) => Ok(value.to_string()),
            _ => self.require_str(name).map(str::to_string),
        }
    }

    fn int(&self, name: &'static str) -> Result<Option<i64>, SubmitError> {
        match self.0.get(name) {
            None => Ok(None),
            Some(ParamValue::Int(value)) => Ok(Some(*value)),
            Some(other) => Err(mistyped(name, "an integer", other)),
        }
    }

    fn bool(&self, name: &'static str, default: bool) -> Result<bool, SubmitError> {
        match self.0.get(name) {
            None => Ok(default),
            Some(ParamValue::Bool(value)) => Ok(*value),
            Some(other) => Err(mistyped(name, "a boolean", other)),
        }
    }

    fn share_id(&self) -> Result<u64, SubmitError> {
        match self.int(params::SHARE_ID)? {
            Some(id) if id > 0 => Ok(id.unsigned_abs()),
            Some(id) => Err(SubmitError::InvalidParam {
                name: params::SHARE_ID,
                reason: format!("{id} is not a share id"),
            }),
            None => Err(SubmitError::MissingParam(params::SHARE_ID)),
        }
    }

    fn share_type(&self) -> Result<ShareType, SubmitError> {
        let share_type = match self.0.get(params::SHARE_TYPE) {
            None => return Err(SubmitError::MissingParam(params::SHARE_TYPE)),
            Some(ParamValue::Int(code)) => ShareType::from_code(*code),
            Some(ParamValue::Str(name)) => ShareType::from_name(name),
            Some(other) => return Err(mistyped(params::SHARE_TYPE, "a share type", other)),
        };
        share_type.ok_or_else(|| SubmitError::InvalidParam {
            name: params::SHARE_TYPE,
            reason: "unknown share type".to_string(),
        })
    }

    /// Permissions of zero or below leave the server default in place.
    fn permissions(&self) -> Result<Option<u32>, SubmitError> {
        Ok(self
            .int(params::SHARE_PERMISSIONS)?
            .and_then(|value| u32::try_from(value).ok())
            .filter(|value| *value > 0))
    }

    fn expire_date(&self) -> Result<Option<String>, SubmitError> {
        Ok(self
            .int(params::SHARE_EXPIRATION)?
            .and_then(expire_date_param))
    }

    fn hide_download(&self) -> Result<Option<bool>, SubmitError> {
        if self.0.contains_key(params::HIDE_FILE_DOWNLOAD) {
            Ok(Some(self.bool(params::HIDE_FILE_DOWNLOAD, false)?))
        } else {
            Ok(None)
        }
    }

    fn owned(&self, name: &'static str) -> Result<Option<String>, SubmitError> {
        Ok(self.str(name)?.map(str::to_string))
    }

    fn share_options(&self) -> Result<ShareOptions, SubmitError> {
        Ok(ShareOptions {
            password: self.owned(params::SHARE_PASSWORD)?,
            permissions: self.permissions()?,
            expire_date: self.expire_date()?,
            note: self.owned(params::SHARE_NOTE)?,
            label: self.owned(params::SHARE_PUBLIC_LABEL)?,
            attributes: self.owned(params::SHARE_ATTRIBUTES)?,
            hide_download: self.hide_download()?,
        })
    }

    fn share_update(&self) -> Result<ShareUpdate, SubmitError> {
        let options = self.share_options()?;
        Ok(ShareUpdate {
            password: options.password,
            expire_date: options.expire_date,
            permissions: options.permissions,
            note: options.note,
            label: options.label,
            attributes: options.attributes,
            hide_download: options.hide_download,
        })
    }
}

fn mistyped(name: &'static str, expected: &str, got: &ParamValue) -> SubmitError {
    let got = match got {
        ParamValue::Bool(_) => "a boolean",
        ParamValue::Int(_) => "an integer",
        ParamValue::Str(_) => "a string",
        ParamValue::Blob(_) => "a blob",
    };
    SubmitError::InvalidParam {
        name,
        reason: format!("expected {expected}, got {got}"),
    }
}
