use crate::utils::error::{PipstackError, Result};
use url::Url;

pub fn validate_index_url(field_name: &str, url_str: &str) -> Result<()> {
    if url_str.is_empty() {
        return Err(PipstackError::UnsupportedConfiguration {
            message: format!("{field_name}: URL cannot be empty"),
        });
    }

    match Url::parse(url_str) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(PipstackError::UnsupportedConfiguration {
                message: format!("{field_name}: unsupported URL scheme {scheme:?} in {url_str}"),
            }),
        },
        Err(e) => Err(PipstackError::UnsupportedConfiguration {
            message: format!("{field_name}: invalid URL {url_str:?}: {e}"),
        }),
    }
}
