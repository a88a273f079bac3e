use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `prostheses.status`. Only `Active` rows (with a chip_id set) are eligible
/// for reporting — see `CustomerProsthesis` below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProsthesisStatus {
    Manufactured,
    Sold,
    Active,
    Maintenance,
    Retired,
}

impl std::str::FromStr for ProsthesisStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manufactured" => Ok(Self::Manufactured),
            "sold" => Ok(Self::Sold),
            "active" => Ok(Self::Active),
            "maintenance" => Ok(Self::Maintenance),
            "retired" => Ok(Self::Retired),
            other => Err(format!("unknown prosthesis status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProsthesisCategory {
    Arm,
    Leg,
    Hand,
    Finger,
}

impl std::str::FromStr for ProsthesisCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "arm" => Ok(Self::Arm),
            "leg" => Ok(Self::Leg),
            "hand" => Ok(Self::Hand),
            "finger" => Ok(Self::Finger),
            other => Err(format!("unknown prosthesis category '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    Russia,
    Europe,
}

impl std::str::FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "russia" => Ok(Self::Russia),
            "europe" => Ok(Self::Europe),
            other => Err(format!("unknown region '{other}'")),
        }
    }
}

/// The row shape `extract_reference` reads directly off the wire — every
/// column typed the way Postgres hands it back (status/category/region are
/// still raw text; narrowing into the enums above happens in
/// `CustomerProsthesis::try_from`, matching the DB-row → domain-type split
/// `rush-api` uses for `AnomalyRule` → `AnomalyRuleResponse`).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CustomerProsthesisRow {
    pub customer_id: i64,
    pub external_id: String,
    pub last_name: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub email: String,
    pub region: String,
    pub branch: String,
    pub customer_updated_at: DateTime<Utc>,

    pub prosthesis_id: i64,
    pub serial_number: String,
    pub chip_id: String,
    pub status: String,
    pub firmware_version: String,
    pub prosthesis_updated_at: DateTime<Utc>,

    pub model_id: i64,
    pub model_code: String,
    pub model_name: String,
    pub category: String,
    pub warranty_months: i32,
    pub model_is_active: bool,
}

/// The denormalized active-prosthesis view of spec §4.1: one row per
/// `chip_id`, already filtered to `status = active AND chip_id IS NOT NULL`.
#[derive(Debug, Clone)]
pub struct CustomerProsthesis {
    pub customer_id: i64,
    pub external_id: String,
    pub last_name: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub email: String,
    pub region: Region,
    pub branch: String,
    pub customer_updated_at: DateTime<Utc>,

    pub prosthesis_id: i64,
    pub serial_number: String,
    pub chip_id: String,
    pub status: ProsthesisStatus,
    pub firmware_version: String,
    pub prosthesis_updated_at: DateTime<Utc>,

    pub model_id: i64,
    pub model_code: String,
    pub model_name: String,
    pub category: ProsthesisCategory,
    pub warranty_months: i32,
    pub model_is_active: bool,
}

impl CustomerProsthesis {
    /// "last first [middle]" with single-space separation, no trailing space.
    pub fn customer_name(&self) -> String {
        let mut parts = vec![self.last_name.as_str(), self.first_name.as_str()];
        if let Some(middle) = self.middle_name.as_deref().filter(|m| !m.is_empty()) {
            parts.push(middle);
        }
        parts.join(" ")
    }

    /// The instant reference-row freshness is judged by:
    /// `greatest(customer.updated_at, prosthesis.updated_at)`.
    pub fn reference_updated_at(&self) -> DateTime<Utc> {
        self.customer_updated_at.max(self.prosthesis_updated_at)
    }
}

impl TryFrom<CustomerProsthesisRow> for CustomerProsthesis {
    type Error = String;

    fn try_from(row: CustomerProsthesisRow) -> Result<Self, Self::Error> {
        use std::str::FromStr;
        Ok(Self {
            customer_id: row.customer_id,
            external_id: row.external_id,
            last_name: row.last_name,
            first_name: row.first_name,
            middle_name: row.middle_name,
            email: row.email,
            region: Region::from_str(&row.region)?,
            branch: row.branch,
            customer_updated_at: row.customer_updated_at,
            prosthesis_id: row.prosthesis_id,
            serial_number: row.serial_number,
            chip_id: row.chip_id,
            status: ProsthesisStatus::from_str(&row.status)?,
            firmware_version: row.firmware_version,
            prosthesis_updated_at: row.prosthesis_updated_at,
            model_id: row.model_id,
            model_code: row.model_code,
            model_name: row.model_name,
            category: ProsthesisCategory::from_str(&row.category)?,
            warranty_months: row.warranty_months,
            model_is_active: row.model_is_active,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> CustomerProsthesisRow {
        CustomerProsthesisRow {
            customer_id: 1,
            external_id: "ivan.petrov".into(),
            last_name: "Petrov".into(),
            first_name: "Ivan".into(),
            middle_name: None,
            email: "ivan@example.com".into(),
            region: "russia".into(),
            branch: "moscow".into(),
            customer_updated_at: Utc::now(),
            prosthesis_id: 10,
            serial_number: "SN-1".into(),
            chip_id: "CHIP-1".into(),
            status: "active".into(),
            firmware_version: "1.0.0".into(),
            prosthesis_updated_at: Utc::now(),
            model_id: 100,
            model_code: "ARM-X".into(),
            model_name: "Arm X".into(),
            category: "arm".into(),
            warranty_months: 24,
            model_is_active: true,
        }
    }

    #[test]
    fn customer_name_joins_last_first() {
        let row = sample_row();
        let cp = CustomerProsthesis::try_from(row).unwrap();
        assert_eq!(cp.customer_name(), "Petrov Ivan");
    }

    #[test]
    fn customer_name_includes_middle_when_present() {
        let mut row = sample_row();
        row.middle_name = Some("Sergeevich".into());
        let cp = CustomerProsthesis::try_from(row).unwrap();
        assert_eq!(cp.customer_name(), "Petrov Ivan Sergeevich");
    }

    #[test]
    fn customer_name_skips_empty_middle() {
        let mut row = sample_row();
        row.middle_name = Some(String::new());
        let cp = CustomerProsthesis::try_from(row).unwrap();
        assert_eq!(cp.customer_name(), "Petrov Ivan");
    }

    #[test]
    fn unknown_status_is_rejected() {
        let mut row = sample_row();
        row.status = "deleted".into();
        assert!(CustomerProsthesis::try_from(row).is_err());
    }
}
