mod credentials;
mod dav;
mod error;
mod ocs;

pub use credentials::Credentials;
pub use dav::{DavClient, DavEntry, ResourceHead};
pub use error::{ApiErrorClass, ClientError};
pub use ocs::{
    NewShare, OcsClient, ServerStatus, Share, ShareType, ShareUpdate, UserInfo, expire_date_param,
};
