//! Expected result mappings for the reference workflows.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::{HarnessError, HarnessResult};
use crate::record::{Checksum, ResultRecord, DEFAULT_OUTPUT_KEY};

/// Reference workflows with known outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fixture {
    /// `revsort.cwl` with `revsort-job.json`.
    Revsort,
    /// `download.cwl` against a remote input that resolves to an empty file.
    Download,
    /// `seqtk_seq.cwl` with `seqtk_seq_job.json` (conda-provided tool).
    Seqtk,
}

impl Fixture {
    pub fn all() -> [Fixture; 3] {
        [Fixture::Revsort, Fixture::Download, Fixture::Seqtk]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Fixture::Revsort => "revsort",
            Fixture::Download => "download",
            Fixture::Seqtk => "seqtk",
        }
    }

    /// Output name the fixture's result is published under.
    pub fn output_key(&self) -> &'static str {
        match self {
            Fixture::Revsort | Fixture::Download => DEFAULT_OUTPUT_KEY,
            Fixture::Seqtk => "output1",
        }
    }

    /// Expected result mapping for a run writing into `out_dir`.
    pub fn expected(&self, out_dir: &Path) -> HarnessResult<Value> {
        match self {
            Fixture::Revsort => revsort_output(out_dir),
            Fixture::Download => download_output(out_dir),
            Fixture::Seqtk => seqtk_output(out_dir),
        }
    }
}

impl fmt::Display for Fixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Fixture {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "revsort" => Ok(Fixture::Revsort),
            "download" => Ok(Fixture::Download),
            "seqtk" => Ok(Fixture::Seqtk),
            other => Err(HarnessError::InvalidConfig(format!(
                "unknown fixture '{other}' (expected revsort, download or seqtk)"
            ))),
        }
    }
}

fn single_output(key: &str, record: ResultRecord) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), record.to_value());
    Value::Object(map)
}

pub fn revsort_output(out_dir: &Path) -> HarnessResult<Value> {
    let record = ResultRecord::file(
        out_dir,
        "output.txt",
        1111,
        Checksum::sha1("b9214658cc453331b62c2282b772a5c063dbd284")?,
    );
    Ok(single_output(DEFAULT_OUTPUT_KEY, record))
}

/// Empty file: the digest is the SHA-1 of zero bytes.
pub fn download_output(out_dir: &Path) -> HarnessResult<Value> {
    let record = ResultRecord::file(
        out_dir,
        "output.txt",
        0,
        Checksum::sha1("da39a3ee5e6b4b0d3255bfef95601890afd80709")?,
    );
    Ok(single_output(DEFAULT_OUTPUT_KEY, record))
}

pub fn seqtk_output(out_dir: &Path) -> HarnessResult<Value> {
    let record = ResultRecord::file(
        out_dir,
        "out",
        150,
        Checksum::sha1("322e001e5a99f19abdce9f02ad0f02a17b5066c2")?,
    );
    Ok(single_output("output1", record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_revsort_expected_shape() {
        let v = revsort_output(&PathBuf::from("/tmp/o")).unwrap();
        let rec = &v["output"];
        assert_eq!(rec["location"], "file:///tmp/o/output.txt");
        assert_eq!(rec["basename"], "output.txt");
        assert_eq!(rec["size"], 1111);
        assert_eq!(rec["class"], "File");
        assert_eq!(rec["checksum"], "sha1$b9214658cc453331b62c2282b772a5c063dbd284");
        assert_eq!(rec.as_object().unwrap().len(), 5);
    }

    #[test]
    fn test_fixture_keys() {
        let out = PathBuf::from("/tmp/o");
        for fixture in Fixture::all() {
            let v = fixture.expected(&out).unwrap();
            assert!(v.get(fixture.output_key()).is_some(), "{fixture}");
            assert_eq!(fixture.name().parse::<Fixture>().unwrap(), fixture);
        }
        assert_eq!(Fixture::Seqtk.output_key(), "output1");
    }

    #[test]
    fn test_unknown_fixture() {
        assert!(matches!(
            "hello".parse::<Fixture>(),
            Err(HarnessError::InvalidConfig(_))
        ));
    }
}
