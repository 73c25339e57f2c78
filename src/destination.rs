use reqwest::Url;
use serde_json::Value;

use crate::config::UploadOptions;

/// Token in a destination template that is replaced with the file name.
pub const FILENAME_PLACEHOLDER: &str = "##FILENAME_REPLACE##";

/// Characters the destination API refuses in file names.
pub const ILLEGAL_FILENAME_CHARS: &[char] = &['%', '#', '[', ']', '{', '}'];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DestinationError {
    #[error("file name is empty")]
    EmptyFileName,
    #[error("file name '{name}' contains illegal characters ({chars}); rename the file and upload it again")]
    IllegalFileName { name: String, chars: String },
    #[error("invalid destination url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

pub fn validate_file_name(name: &str) -> Result<(), DestinationError> {
    if name.trim().is_empty() {
        return Err(DestinationError::EmptyFileName);
    }

    let mut found: Vec<char> = name
        .chars()
        .filter(|c| ILLEGAL_FILENAME_CHARS.contains(c))
        .collect();
    if found.is_empty() {
        return Ok(());
    }

    found.sort_unstable();
    found.dedup();
    Err(DestinationError::IllegalFileName {
        name: name.to_string(),
        chars: found.iter().map(|c| format!("'{c}'")).collect::<Vec<_>>().join(" "),
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Destination {
    template: String,
}

impl Destination {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Resources are named file collections; they are not safe under
    /// concurrent writers.
    pub fn is_resource(&self) -> bool {
        self.template.contains("/resources/")
    }

    fn path_and_query(&self) -> (&str, Option<&str>) {
        match self.template.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (self.template.as_str(), None),
        }
    }

    fn join(base: &Url, path: &str) -> Result<Url, DestinationError> {
        base.join(path).map_err(|e| DestinationError::InvalidUrl {
            url: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Upload URL for one file, with the batch options as query parameters.
    pub fn upload_url(
        &self,
        base: &Url,
        file_name: &str,
        options: &UploadOptions,
        overwrite: bool,
    ) -> Result<Url, DestinationError> {
        let (path, query) = self.path_and_query();
        let path = path.replace(FILENAME_PLACEHOLDER, &urlencoding::encode(file_name));
        let mut url = Self::join(base, &path)?;
        url.set_query(query);

        {
            let mut pairs = url.query_pairs_mut();
            if options.extract {
                pairs.append_pair("extract", "true");
            }
            if options.send_email {
                pairs.append_pair("sendemail", "true");
            }
            if options.verbose {
                pairs.append_pair("verbose", "true");
            }
            if options.update {
                pairs.append_pair("update", "true");
            }
            if let Some(content) = &options.content {
                pairs.append_pair("content", content);
            }
            if let Some(format) = &options.format {
                pairs.append_pair("format", format);
            }
            if overwrite || options.overwrite {
                pairs.append_pair("overwrite", "true");
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }

        Ok(url)
    }

    /// Listing of the collection the file lands in, as JSON.
    pub fn listing_url(&self, base: &Url) -> Result<Url, DestinationError> {
        let (path, _) = self.path_and_query();
        let parent = match path.find(FILENAME_PLACEHOLDER) {
            Some(pos) => path[..pos]
                .rsplit_once('/')
                .map(|(parent, _)| parent)
                .unwrap_or(""),
            None => path.trim_end_matches('/'),
        };

        let mut url = Self::join(base, parent)?;
        url.set_query(Some("format=json"));
        Ok(url)
    }
}

/// Whether a JSON listing names `file_name`, either by `Name` or by the
/// last segment of its `URI`.
pub fn listing_contains(listing: &Value, file_name: &str) -> bool {
    let entries = listing
        .pointer("/ResultSet/Result")
        .and_then(Value::as_array)
        .or_else(|| listing.as_array());

    let Some(entries) = entries else {
        return false;
    };

    let suffix = format!("/{}", file_name);
    let encoded_suffix = format!("/{}", urlencoding::encode(file_name));
    entries.iter().any(|entry| {
        let by_name = entry.get("Name").and_then(Value::as_str) == Some(file_name);
        let by_uri = entry
            .get("URI")
            .and_then(Value::as_str)
            .map(|uri| uri.ends_with(&suffix) || uri.ends_with(&encoded_suffix))
            .unwrap_or(false);
        by_name || by_uri
    })
}
