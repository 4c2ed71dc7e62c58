//! Result records emitted by a CWL runner and their normalization.
//!
//! A runner prints a JSON mapping from declared output name to a file
//! record on stdout. Some fields of that record are runner bookkeeping
//! (the generation marker and the derived name parts) and are stripped
//! before any comparison.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{HarnessError, HarnessResult};

/// Generation marker added by cwltool-derived runners.
pub const GENERATION_KEY: &str = "http://commonwl.org/cwltool#generation";

/// Derived basename without extension.
pub const NAMEROOT_KEY: &str = "nameroot";

/// Derived basename extension.
pub const NAMEEXT_KEY: &str = "nameext";

/// Fields that never take part in an equivalence check.
pub const VOLATILE_FIELDS: [&str; 3] = [GENERATION_KEY, NAMEROOT_KEY, NAMEEXT_KEY];

/// Output name used by single-output workflows.
pub const DEFAULT_OUTPUT_KEY: &str = "output";

/// Tagged digest of the form `<algorithm>$<hex-digest>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum {
    algorithm: String,
    digest: String,
}

impl Checksum {
    /// Build a `sha1$<hex>` checksum.
    pub fn sha1(hex_digest: &str) -> HarnessResult<Self> {
        Self::parse(&format!("sha1${hex_digest}"))
    }

    /// Parse a tagged digest string.
    pub fn parse(s: &str) -> HarnessResult<Self> {
        let (algorithm, digest) = s
            .split_once('$')
            .ok_or_else(|| HarnessError::InvalidPayload(format!("checksum '{s}' has no '$' tag")))?;

        if algorithm.is_empty() {
            return Err(HarnessError::InvalidPayload(format!(
                "checksum '{s}' has an empty algorithm"
            )));
        }
        if digest.is_empty() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HarnessError::InvalidPayload(format!(
                "checksum '{s}' digest is not hex"
            )));
        }

        Ok(Self {
            algorithm: algorithm.to_string(),
            digest: digest.to_ascii_lowercase(),
        })
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}${}", self.algorithm, self.digest)
    }
}

impl FromStr for Checksum {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Checksum {
    type Error = HarnessError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Checksum> for String {
    fn from(c: Checksum) -> Self {
        c.to_string()
    }
}

/// Description of one artifact produced by a runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// `file://` URI of the artifact.
    pub location: String,

    /// File name component.
    pub basename: String,

    /// Byte length.
    pub size: u64,

    /// Tagged digest of the contents.
    pub checksum: Checksum,

    /// Artifact kind, e.g. `File`.
    pub class: String,

    /// Any other fields the runner emitted (volatile ones included).
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ResultRecord {
    /// A `File` record located at `<out_dir>/<basename>`.
    pub fn file(out_dir: &Path, basename: &str, size: u64, checksum: Checksum) -> Self {
        Self {
            location: file_uri(&out_dir.join(basename)),
            basename: basename.to_string(),
            size,
            checksum,
            class: "File".to_string(),
            extra: BTreeMap::new(),
        }
    }

    /// Copy of this record with the volatile fields removed.
    pub fn normalized(&self) -> Self {
        let mut record = self.clone();
        for key in VOLATILE_FIELDS {
            record.extra.remove(key);
        }
        record
    }

    pub fn to_value(&self) -> Value {
        // Serializing a struct of strings, integers and JSON values cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// `file://` URI for an absolute path.
pub fn file_uri(path: &Path) -> String {
    format!("file://{}", path.display())
}

/// Remove volatile fields from one record mapping in place.
pub fn strip_volatile(record: &mut Map<String, Value>) {
    for key in VOLATILE_FIELDS {
        record.remove(key);
    }
}

/// Copy of a full result mapping with the volatile fields of `output_key` removed.
///
/// Other outputs are left untouched. A missing or non-object entry is
/// returned unchanged, so the comparison reports it.
pub fn normalize(result: &Value, output_key: &str) -> Value {
    let mut result = result.clone();
    if let Some(Value::Object(record)) = result.get_mut(output_key) {
        strip_volatile(record);
    }
    result
}

/// Decode the stdout payload of a successful run into a result mapping.
pub fn decode_result_set(stdout: &str) -> HarnessResult<Value> {
    let value: Value = serde_json::from_str(stdout.trim())
        .map_err(|e| HarnessError::InvalidPayload(format!("stdout is not JSON: {e}")))?;
    if !value.is_object() {
        return Err(HarnessError::InvalidPayload(
            "stdout payload is not a mapping of output names".to_string(),
        ));
    }
    Ok(value)
}
