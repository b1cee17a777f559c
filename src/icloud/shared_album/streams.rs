//! Wire types for the public shared-streams endpoints.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Response from `/webstream`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebStreamResponse {
    /// Present when the album lives on another partition.
    #[serde(rename = "X-Apple-MMe-Host", default)]
    pub redirect_host: Option<String>,
    #[serde(default)]
    pub stream_name: Option<String>,
    #[serde(default)]
    pub photos: Vec<StreamPhoto>,
}

/// One photo or video as listed by the stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamPhoto {
    #[serde(default)]
    pub photo_guid: Option<String>,
    #[serde(default)]
    pub date_created: Option<String>,
    #[serde(default)]
    pub batch_date_created: Option<String>,
    #[serde(default)]
    pub media_asset_type: Option<String>,
    #[serde(default)]
    pub derivatives: HashMap<String, Derivative>,
}

/// One rendition of a photo. Apple sends numbers as strings here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Derivative {
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub file_size: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub width: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub height: Option<u64>,
    #[serde(default, alias = "filename")]
    pub file_name: Option<String>,
    #[serde(default, alias = "type")]
    pub derivative_type: Option<String>,
}

/// Response from `/webasseturls`, keyed by derivative checksum.
#[derive(Debug, Default, Deserialize)]
pub struct WebAssetUrlsResponse {
    #[serde(default)]
    pub items: HashMap<String, AssetLocation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetLocation {
    #[serde(default)]
    pub url_location: Option<String>,
    #[serde(default)]
    pub url_path: Option<String>,
}

impl AssetLocation {
    /// Absolute URL, or `None` when the path is missing.
    pub fn full_url(&self) -> Option<String> {
        let path = self.url_path.as_deref()?;
        if path.starts_with("http://") || path.starts_with("https://") {
            return Some(path.to_string());
        }
        let location = self.url_location.as_deref()?;
        if path.starts_with('/') {
            Some(format!("https://{location}{path}"))
        } else {
            Some(format!("https://{location}/{path}"))
        }
    }
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}
