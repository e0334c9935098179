//! Document metadata through `pdfinfo`.

use crate::cancel::Cancellation;
use crate::config::ToolConfig;
use crate::error::{PipelineError, Result};
use crate::tool::RenderJob;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Key holding the page count.
pub const PAGES_KEY: &str = "Pages";

/// Keys whose values are parsed as integers.
const INTEGER_KEYS: &[&str] = &[PAGES_KEY];

/// A metadata value: integer for the known numeric keys, text otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoValue {
    Int(i64),
    Text(String),
}

impl fmt::Display for InfoValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InfoValue::Int(n) => write!(f, "{}", n),
            InfoValue::Text(s) => f.write_str(s),
        }
    }
}

/// Parsed `pdfinfo` output. Always carries a page count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    fields: BTreeMap<String, InfoValue>,
    page_count: u32,
}

impl DocumentInfo {
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn get(&self, key: &str) -> Option<&InfoValue> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &BTreeMap<String, InfoValue> {
        &self.fields
    }
}

/// Run `pdfinfo` on `path` and parse its output.
///
/// The tool gets [`ToolConfig::info_timeout`]; a timed-out process is killed
/// and reaped before [`PipelineError::ToolTimeout`] is returned. A run that
/// succeeds but reports no page count is a hard failure.
pub async fn get_document_info(path: &Path, config: &ToolConfig) -> Result<DocumentInfo> {
    let job = RenderJob::info(path, config);
    let mut process = job.spawn()?;
    let output = process
        .communicate(&Cancellation::never(), config.poll_interval)
        .await?
        .into_success(job.tool_name())?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let info = parse_info(&stdout).map_err(|_| PipelineError::MissingPageCount {
        stderr: output.stderr_text(),
    })?;
    debug!("{:?} has {} pages", path, info.page_count);
    Ok(info)
}

/// Parse `key: value` lines. Fails only when the page count is missing or not a number.
pub fn parse_info(text: &str) -> std::result::Result<DocumentInfo, String> {
    let mut fields = BTreeMap::new();
    for line in text.lines() {
        let (key, value) = line.split_once(':').unwrap_or((line, ""));
        if key.is_empty() {
            continue;
        }
        let value = value.trim();
        let parsed = if INTEGER_KEYS.contains(&key) {
            match value.parse::<i64>() {
                Ok(n) => InfoValue::Int(n),
                Err(_) => return Err(format!("{} is not an integer: {:?}", key, value)),
            }
        } else {
            InfoValue::Text(value.to_string())
        };
        fields.insert(key.to_string(), parsed);
    }

    let page_count = match fields.get(PAGES_KEY) {
        Some(InfoValue::Int(n)) => u32::try_from(*n).map_err(|_| format!("bad page count {}", n))?,
        _ => return Err("no page count".to_string()),
    };
    Ok(DocumentInfo { fields, page_count })
}
