//! Data model shared between the crawler and the platform.
//!
//! Field names follow the platform's camelCase wire format exactly; the
//! structs here are the protocol.

use crate::error::{ClientError, ClientResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;

/// The crawler type served by this binary.
pub const CRAWLER_TYPE_FILE: &str = "file";

// ── Source ──────────────────────────────────────────────────────

/// Inherited security entry on a Source.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceAcl {
    pub acl: String,
    pub is_user: bool,
}

/// Remote-configured description of one crawl target.
///
/// Owned by the platform; fetched at startup and refreshed on a fixed
/// interval. Everything the control loop decides — schedule, capacity,
/// inventory policy, delta cursor — comes from here.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Source {
    pub source_id: i32,
    pub organisation_id: String,
    pub kb_id: String,
    pub name: String,
    pub crawler_type: String,
    /// Comma-separated `ddd-HH` hour slots in which this source may run.
    pub schedule: String,
    pub schedule_enable: bool,
    /// Milliseconds of delay between uploads (historical name).
    pub files_per_second: f32,
    /// Opaque per-source settings blob; parse with [`SourceProperties`].
    pub specific_json: String,
    pub session_id: String,
    /// Maximum number of items to upload per run when > 0.
    pub max_items: i64,
    pub weight: f32,
    pub start_time: i64,
    pub end_time: i64,
    pub num_errors: i32,
    pub error_threshold: i32,
    pub is_external: bool,
    /// Opaque continuation token for incremental re-crawl.
    pub delta_indicator: String,
    pub delta_reset_crawl: bool,
    pub delta_reset_roots: Vec<String>,
    /// Relay crawler log entries back to the platform.
    pub transmit_external_logs: bool,
    /// If true `inventory_only_mime_types` is an include list, otherwise
    /// an exclude list.
    pub inventory_only_include: bool,
    pub inventory_only_mime_types: Vec<String>,
    pub acls: Vec<SourceAcl>,
}

impl Default for Source {
    fn default() -> Self {
        Self {
            source_id: 0,
            organisation_id: String::new(),
            kb_id: String::new(),
            name: String::new(),
            crawler_type: String::new(),
            schedule: String::new(),
            schedule_enable: true,
            files_per_second: 0.0,
            specific_json: String::new(),
            session_id: String::new(),
            max_items: 0,
            weight: 1.0,
            start_time: 0,
            end_time: 0,
            num_errors: 0,
            error_threshold: 0,
            is_external: false,
            delta_indicator: String::new(),
            delta_reset_crawl: false,
            delta_reset_roots: Vec::new(),
            transmit_external_logs: false,
            inventory_only_include: false,
            inventory_only_mime_types: Vec::new(),
            acls: Vec::new(),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kb_id, self.source_id)
    }
}

impl Source {
    /// Is the given mimetype inventory-only for this source?
    ///
    /// Empty mimetypes cannot be processed and always land in the
    /// inventory. A `;charset=...` suffix is ignored for the lookup.
    pub fn is_inventory_only(&self, mime_type: &str) -> bool {
        let trimmed = mime_type.trim();
        if trimmed.is_empty() {
            return true;
        }
        let bare = match trimmed.find(';') {
            Some(idx) if idx > 0 => trimmed[..idx].trim(),
            _ => trimmed,
        };
        let in_list = self.inventory_only_mime_types.contains(&bare.to_lowercase());
        if self.inventory_only_include {
            !in_list
        } else {
            in_list
        }
    }

    /// Parses the opaque settings blob into typed properties.
    pub fn properties(&self) -> ClientResult<SourceProperties> {
        SourceProperties::parse(&self.specific_json)
    }
}

// ── Source properties ───────────────────────────────────────────

/// Accepts a JSON bool or the string forms "true"/"false".
fn de_flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de;

    struct BoolVisitor;
    impl de::Visitor<'_> for BoolVisitor {
        type Value = bool;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a boolean or string-encoded boolean")
        }
        fn visit_bool<E: de::Error>(self, v: bool) -> Result<bool, E> {
            Ok(v)
        }
        fn visit_str<E: de::Error>(self, v: &str) -> Result<bool, E> {
            Ok(v.trim().eq_ignore_ascii_case("true"))
        }
    }
    deserializer.deserialize_any(BoolVisitor)
}

/// Typed view of the per-source settings blob for file-share sources.
///
/// Fields the crawler understands are named and typed; anything else the
/// platform sends rides along in `extra` untouched.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceProperties {
    pub server: String,
    #[serde(rename = "shareName")]
    pub share_name: String,
    #[serde(rename = "sharePath")]
    pub share_path: String,
    pub username: String,
    /// May arrive envelope-encrypted; decrypt at point of use.
    pub password: String,
    #[serde(rename = "useAD", deserialize_with = "de_flexible_bool")]
    pub use_ad: bool,
    #[serde(rename = "useSSL", deserialize_with = "de_flexible_bool")]
    pub use_ssl: bool,
    #[serde(rename = "adPath")]
    pub ad_path: String,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl SourceProperties {
    /// Parses the settings blob, tolerating doubled backslashes from
    /// platforms that over-escape UNC paths.
    pub fn parse(specific_json: &str) -> ClientResult<Self> {
        let trimmed = specific_json.trim();
        if trimmed.is_empty() || trimmed == "{}" {
            return Ok(Self::default());
        }
        match serde_json::from_str(trimmed) {
            Ok(props) => Ok(props),
            Err(_) => {
                let repaired = trimmed.replace("\\\\", "\\");
                serde_json::from_str(&repaired).map_err(ClientError::Json)
            }
        }
    }

    /// The share password in the clear: values the platform delivered
    /// envelope-encrypted are decrypted with the system key, everything
    /// else passes through unchanged.
    pub fn resolve_password(&self, system_key: &str) -> ClientResult<String> {
        if crawlbridge_crypto::is_encrypted(&self.password) {
            Ok(crawlbridge_crypto::decrypt(&self.password, system_key)?)
        } else {
            Ok(self.password.clone())
        }
    }

    /// Checks that every named property is present and non-empty.
    pub fn require(&self, source_name: &str, names: &[&str]) -> ClientResult<()> {
        for name in names {
            let present = match *name {
                "server" => !self.server.trim().is_empty(),
                "shareName" => !self.share_name.trim().is_empty(),
                "sharePath" => !self.share_path.trim().is_empty(),
                "username" => !self.username.trim().is_empty(),
                "password" => !self.password.trim().is_empty(),
                "adPath" => !self.ad_path.trim().is_empty(),
                other => self.extra.contains_key(other),
            };
            if !present {
                return Err(ClientError::Config(format!(
                    "{source_name}: missing property {name}"
                )));
            }
        }
        Ok(())
    }
}

// ── Asset ───────────────────────────────────────────────────────

/// A normalized access entry attached to an asset.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssetAcl {
    pub name: String,
    pub display_name: String,
    pub access: String,
    pub is_user: bool,
    pub membership_list: Vec<String>,
}

impl Default for AssetAcl {
    fn default() -> Self {
        Self {
            name: String::new(),
            display_name: String::new(),
            access: String::new(),
            is_user: true,
            membership_list: Vec::new(),
        }
    }
}

impl fmt::Display for AssetAcl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_user { "user" } else { "group" };
        if self.display_name.is_empty() {
            write!(f, "{}:{}:{}", self.name, self.access, kind)
        } else {
            write!(f, "{} ({}):{}:{}", self.name, self.display_name, self.access, kind)
        }
    }
}

impl AssetAcl {
    /// Access entry for a single user.
    pub fn user(name: impl Into<String>, display_name: impl Into<String>, access: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            access: access.into(),
            is_user: true,
            membership_list: Vec::new(),
        }
    }

    /// Access entry for a group carrying its flattened member list.
    pub fn group(name: impl Into<String>, access: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            name: name.into(),
            display_name: String::new(),
            access: access.into(),
            is_user: false,
            membership_list: members,
        }
    }

    /// Builds the access string. Only read access is expressed today.
    pub fn access_string(read: bool, _write: bool, _delete: bool) -> String {
        if read { "R".to_string() } else { String::new() }
    }

    /// Deduplicates by case-insensitive string form and sorts by string
    /// form — the canonical shape every transmitted ACL list must have.
    pub fn unique_acls(acls: Vec<AssetAcl>) -> Vec<AssetAcl> {
        let mut seen = HashSet::new();
        let mut unique: Vec<AssetAcl> = acls
            .into_iter()
            .filter(|acl| seen.insert(acl.to_string().to_lowercase()))
            .collect();
        unique.sort_by_key(|acl| acl.to_string());
        unique
    }
}

/// One crawled item: metadata, ACLs, and an optional staged binary.
///
/// `filename` points at an exclusively-owned temp file holding the staged
/// content; it is empty when nothing is staged and must be deleted once
/// consumed or on any exit path.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Asset {
    pub url: String,
    pub parent_url: String,
    pub mime_type: String,
    pub acls: Vec<AssetAcl>,
    pub delta_root_id: String,
    pub title: String,
    pub author: String,
    pub binary_size: i64,
    pub template: String,
    pub created: i64,
    pub last_modified: i64,
    pub metadata: BTreeMap<String, String>,
    pub filename: String,
    pub preview_image: String,
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Asset(url={},filename=\"{}\",metadata={},mimeType={})",
            self.url,
            self.filename,
            self.metadata.len(),
            self.mime_type
        )
    }
}

impl Asset {
    /// Reads the staged content, empty when nothing is staged.
    pub async fn read_bytes(&self) -> Vec<u8> {
        if self.filename.is_empty() {
            return Vec::new();
        }
        tokio::fs::read(&self.filename).await.unwrap_or_default()
    }

    /// Deletes the staged temp file if present and clears the reference.
    pub async fn remove_temp_file(&mut self) {
        if !self.filename.is_empty() {
            if Path::new(&self.filename).is_file() {
                let _ = tokio::fs::remove_file(&self.filename).await;
            }
            self.filename.clear();
        }
    }

    /// Hash over everything change detection cares about: identity,
    /// access, metadata, timestamps, and the staged bytes.
    pub async fn change_hash(&self) -> String {
        let acl_str = self
            .acls
            .iter()
            .map(|acl| acl.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let metadata_str = self
            .metadata
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");

        let mut hasher = Sha256::new();
        hasher.update(self.url.as_bytes());
        hasher.update(acl_str.as_bytes());
        hasher.update(metadata_str.as_bytes());
        hasher.update(self.binary_size.to_string().as_bytes());
        hasher.update(self.last_modified.to_string().as_bytes());
        hasher.update(self.author.as_bytes());
        hasher.update(self.mime_type.as_bytes());
        hasher.update(&self.read_bytes().await);
        hex::encode(hasher.finalize())
    }
}

// ── Upload command ──────────────────────────────────────────────

/// Metadata mapping for categorical values.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetadataMapping {
    pub ext_metadata: String,
    pub metadata: String,
    pub display: String,
}

/// A metadata mapping with its string or numeric values.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetadataValues {
    pub metadata_map: MetadataMapping,
    pub string_value_list: Vec<String>,
    pub number_value_list: Vec<f64>,
}

/// The upload command mirror of an [`Asset`], extended with the change
/// and content hashes and categorical metadata.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadDocument {
    pub url: String,
    pub parent_url: String,
    pub delta_root_id: String,
    pub mime_type: String,
    pub puid: String,
    pub acls: Vec<AssetAcl>,
    pub title: String,
    pub author: String,
    /// Document change detection.
    pub change_hash: String,
    /// Exact-duplicate detection.
    pub content_hash: String,
    pub binary_size: i64,
    pub template: String,
    pub created: i64,
    pub last_modified: i64,
    pub size: i64,
    pub inventory_only: bool,
    pub metadata: BTreeMap<String, String>,
    pub categories: Vec<MetadataValues>,
}

impl From<&Asset> for UploadDocument {
    fn from(asset: &Asset) -> Self {
        Self {
            url: asset.url.clone(),
            parent_url: asset.parent_url.clone(),
            delta_root_id: asset.delta_root_id.clone(),
            mime_type: asset.mime_type.clone(),
            title: asset.title.clone(),
            author: asset.author.clone(),
            binary_size: asset.binary_size,
            template: asset.template.clone(),
            created: asset.created,
            last_modified: asset.last_modified,
            metadata: asset.metadata.clone(),
            acls: AssetAcl::unique_acls(asset.acls.clone()),
            ..Default::default()
        }
    }
}

/// One folder rename reported to the platform.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenameFolder {
    pub original_folder_name: String,
    pub new_folder_name: String,
    pub asset_acl_list: Vec<AssetAcl>,
}
