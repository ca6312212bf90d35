//! Field normalization
//!
//! Both sources describe the same entities under different field names: the
//! bulk files are positional pipe-delimited columns, the remote API returns
//! JSON objects with its own naming, and the amount field in particular has
//! accumulated several legacy aliases over the years. Normalization is pure
//! and total: unknown or empty fields become `None`, never an error. The only
//! hard requirement is the natural key.

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde_json::Value;

use cfdp_common::types::{DataType, SourceKind};
use cfdp_common::{CfdpError, Result};

/// Canonical view of one record, independent of source.
///
/// One struct covers all three record types; the store binds the subset of
/// fields each table carries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalFields {
    pub name: Option<String>,
    pub party: Option<String>,
    pub office: Option<String>,
    pub state: Option<String>,
    pub district: Option<String>,
    pub treasurer: Option<String>,
    pub designation: Option<String>,
    pub committee_type: Option<String>,
    pub cand_id: Option<String>,
    pub cmte_id: Option<String>,
    pub city: Option<String>,
    pub zip_code: Option<String>,
    pub employer: Option<String>,
    pub occupation: Option<String>,
    pub amount: Option<f64>,
    pub date: Option<NaiveDate>,
    pub transaction_type: Option<String>,
}

/// A normalized record: natural key, canonical fields, and the source-native
/// field map destined for the provenance payload.
#[derive(Debug, Clone)]
pub struct NormalizedRecord {
    pub key: String,
    pub fields: CanonicalFields,
    pub raw: IndexMap<String, Value>,
}

/// Positional column names for the bulk files, in published order.
pub fn bulk_columns(data_type: DataType) -> &'static [&'static str] {
    match data_type {
        DataType::Candidates => &[
            "CAND_ID",
            "CAND_NAME",
            "CAND_PTY_AFFILIATION",
            "CAND_ELECTION_YR",
            "CAND_OFFICE_ST",
            "CAND_OFFICE",
            "CAND_OFFICE_DISTRICT",
            "CAND_ICI",
            "CAND_STATUS",
            "CAND_PCC",
            "CAND_ST1",
            "CAND_ST2",
            "CAND_CITY",
            "CAND_ST",
            "CAND_ZIP",
        ],
        DataType::Committees => &[
            "CMTE_ID",
            "CMTE_NM",
            "TRES_NM",
            "CMTE_ST1",
            "CMTE_ST2",
            "CMTE_CITY",
            "CMTE_ST",
            "CMTE_ZIP",
            "CMTE_DSGN",
            "CMTE_TP",
            "CMTE_PTY_AFFILIATION",
            "CMTE_FILING_FREQ",
            "ORG_TP",
            "CONNECTED_ORG_NM",
            "CAND_ID",
        ],
        DataType::Contributions => &[
            "CMTE_ID",
            "AMNDT_IND",
            "RPT_TP",
            "TRANSACTION_PGI",
            "IMAGE_NUM",
            "TRANSACTION_TP",
            "ENTITY_TP",
            "NAME",
            "CITY",
            "STATE",
            "ZIP_CODE",
            "EMPLOYER",
            "OCCUPATION",
            "TRANSACTION_DT",
            "TRANSACTION_AMT",
            "OTHER_ID",
            "TRAN_ID",
            "FILE_NUM",
            "MEMO_CD",
            "MEMO_TEXT",
            "SUB_ID",
        ],
    }
}

/// Amount field aliases in the remote API, oldest last. The first one that
/// parses as a number wins.
const API_AMOUNT_ALIASES: &[&str] = &[
    "contribution_receipt_amount",
    "contb_receipt_amt",
    "transaction_amt",
];

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Decode a date that is either bulk MMDDYYYY or ISO `YYYY-MM-DD`.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.len() == 8 && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return NaiveDate::parse_from_str(trimmed, "%m%d%Y").ok();
    }
    // ISO dates sometimes arrive with a time component.
    let date_part = trimmed.split('T').next().unwrap_or(trimmed);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

fn parse_amount(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok()
}

/// Normalize one bulk file row.
///
/// The row is already known to have the expected column count. Fails only
/// when the natural key column is empty.
pub fn normalize_bulk(data_type: DataType, row: &[String]) -> Result<NormalizedRecord> {
    let columns = bulk_columns(data_type);
    let mut raw = IndexMap::new();
    for (name, value) in columns.iter().zip(row.iter()) {
        if let Some(v) = non_empty(value) {
            raw.insert(name.to_string(), Value::String(v));
        }
    }

    let get = |name: &str| -> Option<String> {
        columns
            .iter()
            .position(|c| *c == name)
            .and_then(|idx| row.get(idx))
            .and_then(|v| non_empty(v))
    };

    let (key, fields) = match data_type {
        DataType::Candidates => {
            let key = get("CAND_ID");
            let fields = CanonicalFields {
                name: get("CAND_NAME"),
                party: get("CAND_PTY_AFFILIATION"),
                office: get("CAND_OFFICE"),
                state: get("CAND_OFFICE_ST"),
                district: get("CAND_OFFICE_DISTRICT"),
                ..Default::default()
            };
            (key, fields)
        }
        DataType::Committees => {
            let key = get("CMTE_ID");
            let fields = CanonicalFields {
                name: get("CMTE_NM"),
                treasurer: get("TRES_NM"),
                state: get("CMTE_ST"),
                designation: get("CMTE_DSGN"),
                committee_type: get("CMTE_TP"),
                cand_id: get("CAND_ID"),
                ..Default::default()
            };
            (key, fields)
        }
        DataType::Contributions => {
            let key = get("SUB_ID");
            let fields = CanonicalFields {
                cmte_id: get("CMTE_ID"),
                name: get("NAME"),
                city: get("CITY"),
                state: get("STATE"),
                zip_code: get("ZIP_CODE"),
                employer: get("EMPLOYER"),
                occupation: get("OCCUPATION"),
                amount: get("TRANSACTION_AMT").as_deref().and_then(parse_amount),
                date: get("TRANSACTION_DT").as_deref().and_then(parse_date),
                transaction_type: get("TRANSACTION_TP"),
                ..Default::default()
            };
            (key, fields)
        }
    };

    let key = key.ok_or_else(|| {
        CfdpError::Parse(format!("{} row missing natural key", data_type))
    })?;

    Ok(NormalizedRecord { key, fields, raw })
}

/// Normalize one remote API object.
pub fn normalize_api(data_type: DataType, object: &Value) -> Result<NormalizedRecord> {
    let map = object
        .as_object()
        .ok_or_else(|| CfdpError::Parse("API record is not a JSON object".to_string()))?;

    let mut raw = IndexMap::new();
    for (name, value) in map {
        if !value.is_null() {
            raw.insert(name.clone(), value.clone());
        }
    }

    let get_str = |names: &[&str]| -> Option<String> {
        names.iter().find_map(|name| {
            map.get(*name).and_then(|v| match v {
                Value::String(s) => non_empty(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
        })
    };
    let get_amount = || -> Option<f64> {
        API_AMOUNT_ALIASES.iter().find_map(|name| {
            map.get(*name).and_then(|v| match v {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => parse_amount(s),
                _ => None,
            })
        })
    };

    let (key, fields) = match data_type {
        DataType::Candidates => {
            let key = get_str(&["candidate_id", "cand_id"]);
            let fields = CanonicalFields {
                name: get_str(&["name", "candidate_name"]),
                party: get_str(&["party", "party_full"]),
                office: get_str(&["office"]),
                state: get_str(&["state"]),
                district: get_str(&["district"]),
                ..Default::default()
            };
            (key, fields)
        }
        DataType::Committees => {
            let key = get_str(&["committee_id", "cmte_id"]);
            let fields = CanonicalFields {
                name: get_str(&["name", "committee_name"]),
                treasurer: get_str(&["treasurer_name"]),
                state: get_str(&["state"]),
                designation: get_str(&["designation"]),
                committee_type: get_str(&["committee_type"]),
                cand_id: get_str(&["candidate_id", "cand_id"]),
                ..Default::default()
            };
            (key, fields)
        }
        DataType::Contributions => {
            let key = get_str(&["sub_id"]);
            let fields = CanonicalFields {
                cmte_id: get_str(&["committee_id", "cmte_id"]),
                cand_id: get_str(&["candidate_id", "cand_id"]),
                name: get_str(&["contributor_name", "name"]),
                city: get_str(&["contributor_city", "city"]),
                state: get_str(&["contributor_state", "state"]),
                zip_code: get_str(&["contributor_zip", "zip_code"]),
                employer: get_str(&["contributor_employer", "employer"]),
                occupation: get_str(&["contributor_occupation", "occupation"]),
                amount: get_amount(),
                date: get_str(&["contribution_receipt_date", "transaction_dt"])
                    .as_deref()
                    .and_then(parse_date),
                transaction_type: get_str(&["transaction_type", "transaction_tp"]),
                ..Default::default()
            };
            (key, fields)
        }
    };

    let key = key.ok_or_else(|| {
        CfdpError::Parse(format!("{} API record missing natural key", data_type))
    })?;

    Ok(NormalizedRecord { key, fields, raw })
}

/// Normalize a record from either source.
pub fn normalize(
    data_type: DataType,
    source: SourceKind,
    bulk_row: Option<&[String]>,
    api_object: Option<&Value>,
) -> Result<NormalizedRecord> {
    match source {
        SourceKind::Bulk => {
            let row = bulk_row
                .ok_or_else(|| CfdpError::Parse("bulk normalization needs a row".to_string()))?;
            normalize_bulk(data_type, row)
        }
        SourceKind::Api => {
            let object = api_object
                .ok_or_else(|| CfdpError::Parse("API normalization needs an object".to_string()))?;
            normalize_api(data_type, object)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidate_row() -> Vec<String> {
        let mut row = vec![String::new(); 15];
        row[0] = "H8MI13250".into();
        row[1] = "SMITH, JANE".into();
        row[2] = "DEM".into();
        row[4] = "MI".into();
        row[5] = "H".into();
        row[6] = "13".into();
        row
    }

    #[test]
    fn test_normalize_bulk_candidate() {
        let record = normalize_bulk(DataType::Candidates, &candidate_row()).unwrap();
        assert_eq!(record.key, "H8MI13250");
        assert_eq!(record.fields.name.as_deref(), Some("SMITH, JANE"));
        assert_eq!(record.fields.party.as_deref(), Some("DEM"));
        assert_eq!(record.fields.state.as_deref(), Some("MI"));
        assert_eq!(record.fields.district.as_deref(), Some("13"));
        // Empty columns stay out of the raw map.
        assert!(record.raw.contains_key("CAND_NAME"));
        assert!(!record.raw.contains_key("CAND_ICI"));
    }

    #[test]
    fn test_normalize_bulk_missing_key_fails() {
        let mut row = candidate_row();
        row[0] = String::new();
        let err = normalize_bulk(DataType::Candidates, &row).unwrap_err();
        assert!(matches!(err, CfdpError::Parse(_)));
    }

    #[test]
    fn test_normalize_bulk_contribution_dates_and_amounts() {
        let mut row = vec![String::new(); 21];
        row[0] = "C00123456".into();
        row[7] = "DOE, JOHN".into();
        row[13] = "01152024".into();
        row[14] = "250.00".into();
        row[20] = "4020920241234567890".into();

        let record = normalize_bulk(DataType::Contributions, &row).unwrap();
        assert_eq!(record.key, "4020920241234567890");
        assert_eq!(record.fields.amount, Some(250.0));
        assert_eq!(
            record.fields.date,
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
    }

    #[test]
    fn test_normalize_bulk_unparseable_date_is_none() {
        let mut row = vec![String::new(); 21];
        row[13] = "13452024".into(); // month 13
        row[20] = "S1".into();
        let record = normalize_bulk(DataType::Contributions, &row).unwrap();
        assert_eq!(record.fields.date, None);
    }

    #[test]
    fn test_normalize_api_committee() {
        let object = json!({
            "committee_id": "C00123456",
            "name": "FRIENDS OF JANE",
            "treasurer_name": "DOE, JOHN",
            "state": "MI",
            "designation": "P",
            "committee_type": "H",
            "candidate_id": "H8MI13250",
            "irrelevant": null,
        });
        let record = normalize_api(DataType::Committees, &object).unwrap();
        assert_eq!(record.key, "C00123456");
        assert_eq!(record.fields.treasurer.as_deref(), Some("DOE, JOHN"));
        assert_eq!(record.fields.cand_id.as_deref(), Some("H8MI13250"));
        assert!(!record.raw.contains_key("irrelevant"));
    }

    #[test]
    fn test_api_amount_alias_first_parseable_wins() {
        let object = json!({
            "sub_id": "99",
            "contb_receipt_amt": "not-a-number",
            "transaction_amt": 125.5,
        });
        let record = normalize_api(DataType::Contributions, &object).unwrap();
        assert_eq!(record.fields.amount, Some(125.5));
    }

    #[test]
    fn test_api_iso_date_with_time_component() {
        let object = json!({
            "sub_id": "99",
            "contribution_receipt_date": "2024-01-15T00:00:00",
        });
        let record = normalize_api(DataType::Contributions, &object).unwrap();
        assert_eq!(record.fields.date, NaiveDate::from_ymd_opt(2024, 1, 15));
    }

    #[test]
    fn test_parse_date_forms() {
        assert_eq!(parse_date("06302023"), NaiveDate::from_ymd_opt(2023, 6, 30));
        assert_eq!(parse_date("2023-06-30"), NaiveDate::from_ymd_opt(2023, 6, 30));
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("garbage"), None);
    }
}
