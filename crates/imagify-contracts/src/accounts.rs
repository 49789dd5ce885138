use std::fmt;
use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Balance granted to an account the first time it is seen.
pub const DEFAULT_STARTING_BALANCE: i64 = 5;

/// Balance restored by a credit reset.
pub const RESET_BALANCE: i64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub owner_id: String,
    pub credit_balance: i64,
    pub created_at: String,
}

impl Account {
    pub fn new(owner_id: impl Into<String>, credit_balance: i64) -> Self {
        Self {
            owner_id: owner_id.into(),
            credit_balance,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditPlan {
    Basic,
    Advanced,
    Business,
}

impl CreditPlan {
    pub fn credits(self) -> i64 {
        match self {
            CreditPlan::Basic => 100,
            CreditPlan::Advanced => 500,
            CreditPlan::Business => 5000,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CreditPlan::Basic => "Basic",
            CreditPlan::Advanced => "Advanced",
            CreditPlan::Business => "Business",
        }
    }
}

impl fmt::Display for CreditPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CreditPlan {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(CreditPlan::Basic),
            "advanced" => Ok(CreditPlan::Advanced),
            "business" => Ok(CreditPlan::Business),
            other => Err(format!("Invalid plan '{other}'.")),
        }
    }
}
