//! Package file records and the HTML/JSON forms of the Simple Repository API.
//!
//! Upstream responses (either form) parse into [`File`]; downstream responses
//! (either form) are rendered from it. The downstream renderings substitute
//! the filename for the file URL so installers resolve downloads relative to
//! the listing page and come back through the proxy.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

/// Repository API version advertised in `meta` keys and page headers.
pub const API_VERSION: &str = "1.0";

/// Normalize a project name: collapse runs of `-`, `_`, `.` into a single
/// `-` and lowercase.
pub fn normalize_project_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.chars() {
        if c == '-' || c == '_' || c == '.' {
            if !in_run {
                out.push('-');
                in_run = true;
            }
        } else {
            out.extend(c.to_lowercase());
            in_run = false;
        }
    }
    out
}

/// Core-metadata marker: the upstream advertises a `<url>.metadata` sibling,
/// with or without digests of that sibling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreMetadata {
    Present,
    Hashes(IndexMap<String, String>),
}

/// Yanked marker: a bare flag or a reason string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Yanked {
    Flag(bool),
    Reason(String),
}

impl Yanked {
    pub fn is_yanked(&self) -> bool {
        match self {
            Yanked::Flag(flag) => *flag,
            Yanked::Reason(_) => true,
        }
    }
}

/// One file of a project, as listed by an upstream index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    /// Filename; unique within a project.
    pub name: String,
    /// Absolute upstream URL, without fragment.
    pub url: String,
    /// Hash algorithm name to hex digest.
    pub hashes: IndexMap<String, String>,
    pub requires_python: Option<String>,
    pub core_metadata: Option<CoreMetadata>,
    pub gpg_sig: Option<bool>,
    pub yanked: Option<Yanked>,
}

impl File {
    /// Construct from a parsed HTML anchor: element text, the `href` already
    /// joined against the response URL, and the remaining attributes.
    pub fn from_html_anchor(
        name: String,
        href: &Url,
        attributes: &IndexMap<String, String>,
    ) -> Self {
        let hashes = parse_hash_string(href.fragment().unwrap_or(""));
        let mut url = href.clone();
        url.set_fragment(None);

        let requires_python = attributes
            .get("data-requires-python")
            .filter(|value| !value.is_empty())
            .cloned();

        let metadata_value = attributes
            .get("data-core-metadata")
            .or_else(|| attributes.get("data-dist-info-metadata"));
        let core_metadata = metadata_value.map(|value| {
            let hashes = parse_hash_string(value);
            if hashes.is_empty() {
                if !value.is_empty() && value != "true" {
                    warn!("invalid metadata attribute value from index: {value}");
                }
                CoreMetadata::Present
            } else {
                CoreMetadata::Hashes(hashes)
            }
        });

        let gpg_sig = attributes
            .get("data-gpg-sig")
            .map(|value| value == "true");

        let yanked = attributes.get("data-yanked").map(|value| {
            if value.is_empty() {
                Yanked::Flag(true)
            } else {
                Yanked::Reason(value.clone())
            }
        });

        Self {
            name,
            url: url.to_string(),
            hashes,
            requires_python,
            core_metadata,
            gpg_sig,
            yanked,
        }
    }

    /// Canonical URL fragment: `sha256=<digest>` when available, else the
    /// first recorded hash, else empty.
    pub fn fragment(&self) -> String {
        stringify_hashes(&self.hashes)
    }

    /// HTML attribute mapping reproducing this record (everything but `href`).
    ///
    /// Both metadata attribute aliases are emitted whenever either is set.
    pub fn attributes(&self) -> IndexMap<String, String> {
        let mut attributes = IndexMap::new();
        if let Some(requires_python) = &self.requires_python {
            attributes.insert("data-requires-python".to_string(), requires_python.clone());
        }
        if let Some(metadata) = &self.core_metadata {
            let value = match metadata {
                CoreMetadata::Present => String::new(),
                CoreMetadata::Hashes(hashes) => stringify_hashes(hashes),
            };
            attributes.insert("data-dist-info-metadata".to_string(), value.clone());
            attributes.insert("data-core-metadata".to_string(), value);
        }
        if let Some(gpg_sig) = self.gpg_sig {
            attributes.insert(
                "data-gpg-sig".to_string(),
                if gpg_sig { "true" } else { "false" }.to_string(),
            );
        }
        if let Some(yanked) = &self.yanked
            && yanked.is_yanked()
        {
            let value = match yanked {
                Yanked::Reason(reason) => reason.clone(),
                Yanked::Flag(_) => String::new(),
            };
            attributes.insert("data-yanked".to_string(), value);
        }
        attributes
    }

    /// Render one anchor element with an explicit `href` target.
    pub fn to_html_anchor_with_href(&self, href: &str) -> String {
        let fragment = self.fragment();
        let mut anchor = String::from("<a href=\"");
        anchor.push_str(&html_escape::encode_double_quoted_attribute(href));
        if !fragment.is_empty() {
            anchor.push('#');
            anchor.push_str(&html_escape::encode_double_quoted_attribute(&fragment));
        }
        anchor.push('"');
        for (key, value) in self.attributes() {
            anchor.push(' ');
            anchor.push_str(&key);
            anchor.push_str("=\"");
            anchor.push_str(&html_escape::encode_double_quoted_attribute(&value));
            anchor.push('"');
        }
        anchor.push('>');
        anchor.push_str(&html_escape::encode_text(&self.name));
        anchor.push_str("</a>");
        anchor
    }

    /// Render one anchor element targeting the upstream URL.
    pub fn to_html_anchor(&self) -> String {
        self.to_html_anchor_with_href(&self.url)
    }
}

fn parse_hash_string(hash_string: &str) -> IndexMap<String, String> {
    let mut hashes = IndexMap::new();
    if let Some((name, value)) = hash_string.split_once('=') {
        hashes.insert(name.to_string(), value.to_string());
    }
    hashes
}

fn stringify_hashes(hashes: &IndexMap<String, String>) -> String {
    if let Some(digest) = hashes.get("sha256") {
        return format!("sha256={digest}");
    }
    match hashes.first() {
        Some((name, digest)) => format!("{name}={digest}"),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum MetadataValue {
    Flag(bool),
    Hashes(IndexMap<String, String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum YankedValue {
    Flag(bool),
    Reason(String),
}

/// One file object of a JSON project-detail response, canonical key names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileJson {
    pub filename: String,
    pub url: String,
    #[serde(default)]
    pub hashes: IndexMap<String, String>,
    #[serde(rename = "requires-python", skip_serializing_if = "Option::is_none")]
    requires_python: Option<String>,
    #[serde(rename = "core-metadata", skip_serializing_if = "Option::is_none")]
    core_metadata: Option<MetadataValue>,
    #[serde(
        rename = "dist-info-metadata",
        skip_serializing_if = "Option::is_none"
    )]
    dist_info_metadata: Option<MetadataValue>,
    #[serde(rename = "gpg-sig", skip_serializing_if = "Option::is_none")]
    gpg_sig: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    yanked: Option<YankedValue>,
}

impl File {
    /// Construct from a JSON file object, resolving `url` against the
    /// response URL.
    pub fn from_json(data: FileJson, base: &Url) -> Result<Self, url::ParseError> {
        let url = base.join(&data.url)?;
        // Both metadata key aliases are accepted; the newer one wins.
        let metadata_value = match data.core_metadata {
            Some(MetadataValue::Flag(false)) | None => data.dist_info_metadata,
            value => value,
        };
        let core_metadata = match metadata_value {
            None | Some(MetadataValue::Flag(false)) => None,
            Some(MetadataValue::Flag(true)) => Some(CoreMetadata::Present),
            Some(MetadataValue::Hashes(hashes)) => Some(CoreMetadata::Hashes(hashes)),
        };
        Ok(Self {
            name: data.filename,
            url: url.to_string(),
            hashes: data.hashes,
            requires_python: data.requires_python,
            core_metadata,
            gpg_sig: data.gpg_sig,
            yanked: data.yanked.map(|yanked| match yanked {
                YankedValue::Flag(flag) => Yanked::Flag(flag),
                YankedValue::Reason(reason) => Yanked::Reason(reason),
            }),
        })
    }

    /// Serialize to a JSON file object with an explicit `url` value.
    ///
    /// Only the new metadata key is emitted in JSON.
    pub fn to_json(&self, url: &str) -> FileJson {
        FileJson {
            filename: self.name.clone(),
            url: url.to_string(),
            hashes: self.hashes.clone(),
            requires_python: self.requires_python.clone(),
            core_metadata: self.core_metadata.as_ref().map(|metadata| match metadata {
                CoreMetadata::Present => MetadataValue::Flag(true),
                CoreMetadata::Hashes(hashes) => MetadataValue::Hashes(hashes.clone()),
            }),
            dist_info_metadata: None,
            gpg_sig: self.gpg_sig,
            yanked: self.yanked.as_ref().map(|yanked| match yanked {
                Yanked::Flag(flag) => YankedValue::Flag(*flag),
                Yanked::Reason(reason) => YankedValue::Reason(reason.clone()),
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Meta {
    #[serde(rename = "api-version")]
    pub api_version: String,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectListEntry {
    pub name: String,
}

/// JSON project-list response (`GET /simple/` upstream, `GET /index/` here).
#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectList {
    pub meta: Meta,
    pub projects: Vec<ProjectListEntry>,
}

/// JSON project-detail response (`GET /simple/<project>/`).
#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectDetail {
    pub meta: Meta,
    pub name: String,
    pub files: Vec<FileJson>,
}

const PAGE_META: &str = concat!(
    "<meta charset=\"utf-8\">\n",
    "    <meta name=\"pypi:repository-version\" content=\"1.0\">",
);

/// Render the project-list page.
pub fn render_project_list_html(names: &[String]) -> String {
    let mut body = String::new();
    for name in names {
        body.push_str(&format!(
            "    <a href=\"{name}/\">{name}</a>\n",
            name = html_escape::encode_double_quoted_attribute(name),
        ));
    }
    format!(
        "<!DOCTYPE html>\n<html>\n  <head>\n    {PAGE_META}\n    \
         <title>Simple index</title>\n  </head>\n  <body>\n{body}  </body>\n</html>\n"
    )
}

/// Render a project-detail page. Hrefs are the bare filenames so resolved
/// download URLs point back at this server.
pub fn render_project_detail_html(project: &str, files: &[File]) -> String {
    let title = format!("Links for {}", html_escape::encode_text(project));
    let mut body = String::new();
    for file in files {
        body.push_str("    ");
        body.push_str(&file.to_html_anchor_with_href(&file.name));
        body.push_str("<br>\n");
    }
    format!(
        "<!DOCTYPE html>\n<html>\n  <head>\n    {PAGE_META}\n    \
         <title>{title}</title>\n  </head>\n  <body>\n    <h1>{title}</h1>\n{body}  \
         </body>\n</html>\n"
    )
}

/// Render the project-list JSON response.
pub fn render_project_list_json(names: &[String]) -> ProjectList {
    ProjectList {
        meta: Meta::default(),
        projects: names
            .iter()
            .map(|name| ProjectListEntry { name: name.clone() })
            .collect(),
    }
}

/// Render a project-detail JSON response. The `url` of every file is its
/// filename so installers resolve it relative to the listing page.
pub fn render_project_detail_json(project: &str, files: &[File]) -> ProjectDetail {
    ProjectDetail {
        meta: Meta::default(),
        name: project.to_string(),
        files: files.iter().map(|file| file.to_json(&file.name)).collect(),
    }
}
