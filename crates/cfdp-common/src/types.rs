//! Shared domain types
//!
//! Data types, reporting cycles, and source provenance shared by the server
//! and the CLI.

use serde::{Deserialize, Serialize};

/// Bulk data types handled by the import pipeline.
///
/// Each variant corresponds to one bulk file per reporting cycle and one
/// table in the row store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Candidate master file
    Candidates,
    /// Committee master file
    Committees,
    /// Individual contributions file
    Contributions,
}

impl DataType {
    /// All data types in import order. Candidates and committees first so the
    /// contribution linkage columns can resolve against them.
    pub const ALL: [DataType; 3] = [
        DataType::Candidates,
        DataType::Committees,
        DataType::Contributions,
    ];

    /// Row-store table for this data type.
    pub fn table_name(&self) -> &'static str {
        match self {
            DataType::Candidates => "candidates",
            DataType::Committees => "committees",
            DataType::Contributions => "contributions",
        }
    }

    /// Natural-key column, stable across both data sources.
    pub fn natural_key_column(&self) -> &'static str {
        match self {
            DataType::Candidates => "cand_id",
            DataType::Committees => "cmte_id",
            DataType::Contributions => "sub_id",
        }
    }

    /// Bulk file stem; the archive for cycle 2024 is e.g. `cn24.zip`.
    pub fn file_stem(&self) -> &'static str {
        match self {
            DataType::Candidates => "cn",
            DataType::Committees => "cm",
            DataType::Contributions => "indiv",
        }
    }

    /// Name of the single member inside the bulk zip archive.
    pub fn archive_member(&self) -> &'static str {
        match self {
            DataType::Candidates => "cn.txt",
            DataType::Committees => "cm.txt",
            DataType::Contributions => "itcont.txt",
        }
    }

    /// Expected column count of a bulk-file row.
    pub fn bulk_column_count(&self) -> usize {
        match self {
            DataType::Candidates => 15,
            DataType::Committees => 15,
            DataType::Contributions => 21,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Candidates => "candidates",
            DataType::Committees => "committees",
            DataType::Contributions => "contributions",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DataType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "candidates" | "candidate" | "cn" => Ok(DataType::Candidates),
            "committees" | "committee" | "cm" => Ok(DataType::Committees),
            "contributions" | "contribution" | "indiv" => Ok(DataType::Contributions),
            _ => Err(anyhow::anyhow!("Invalid data type: {}", s)),
        }
    }
}

/// A two-year reporting cycle, identified by its even end year (e.g. 2024).
pub type Cycle = i32;

/// Validate a cycle year: even, within the plausible bulk-data range.
pub fn validate_cycle(cycle: Cycle) -> anyhow::Result<()> {
    if cycle % 2 != 0 {
        anyhow::bail!("Cycle must be an even year, got {}", cycle);
    }
    if !(1980..=2100).contains(&cycle) {
        anyhow::bail!("Cycle {} out of supported range", cycle);
    }
    Ok(())
}

/// Two-digit year suffix used in bulk file names (`indiv24.zip`).
pub fn cycle_suffix(cycle: Cycle) -> String {
    format!("{:02}", cycle % 100)
}

/// The origin of one incoming record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Periodic government bulk file
    Bulk,
    /// Remote paginated API
    Api,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Bulk => "bulk",
            SourceKind::Api => "api",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance of a stored record: which sources have contributed to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Bulk,
    Api,
    Both,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Bulk => "bulk",
            DataSource::Api => "api",
            DataSource::Both => "both",
        }
    }

    /// Promote provenance after a merge from `incoming`.
    pub fn combined_with(self, incoming: SourceKind) -> DataSource {
        match (self, incoming) {
            (DataSource::Bulk, SourceKind::Bulk) => DataSource::Bulk,
            (DataSource::Api, SourceKind::Api) => DataSource::Api,
            _ => DataSource::Both,
        }
    }
}

impl From<SourceKind> for DataSource {
    fn from(source: SourceKind) -> Self {
        match source {
            SourceKind::Bulk => DataSource::Bulk,
            SourceKind::Api => DataSource::Api,
        }
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DataSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bulk" => Ok(DataSource::Bulk),
            "api" => Ok(DataSource::Api),
            "both" => Ok(DataSource::Both),
            _ => Err(anyhow::anyhow!("Invalid data source: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_round_trip() {
        for dt in DataType::ALL {
            assert_eq!(dt.as_str().parse::<DataType>().unwrap(), dt);
        }
        assert!("donors".parse::<DataType>().is_err());
    }

    #[test]
    fn test_data_type_short_names() {
        assert_eq!("cn".parse::<DataType>().unwrap(), DataType::Candidates);
        assert_eq!("indiv".parse::<DataType>().unwrap(), DataType::Contributions);
    }

    #[test]
    fn test_validate_cycle() {
        assert!(validate_cycle(2024).is_ok());
        assert!(validate_cycle(2023).is_err());
        assert!(validate_cycle(1978).is_err());
    }

    #[test]
    fn test_cycle_suffix() {
        assert_eq!(cycle_suffix(2024), "24");
        assert_eq!(cycle_suffix(2008), "08");
    }

    #[test]
    fn test_data_source_promotion() {
        assert_eq!(DataSource::Bulk.combined_with(SourceKind::Api), DataSource::Both);
        assert_eq!(DataSource::Bulk.combined_with(SourceKind::Bulk), DataSource::Bulk);
        assert_eq!(DataSource::Both.combined_with(SourceKind::Bulk), DataSource::Both);
    }
}
