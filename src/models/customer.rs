use serde::{Deserialize, Serialize};
use std::fmt;

use super::entity::{require, Entity, KeyPart, NaturalKey, RecordError};
use super::kind::EntityKind;

const MIN_MOBILE_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Customer {
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub mobile: String,
    pub alternate_mobile: String,
    /// dd/MM/yyyy
    pub birth_date: String,
}

impl Customer {
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        mobile: impl Into<String>,
    ) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            mobile: mobile.into(),
            ..Self::default()
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

impl Entity for Customer {
    const KIND: EntityKind = EntityKind::Customer;

    fn natural_key(&self) -> NaturalKey {
        vec![
            KeyPart::Text(self.first_name.clone()),
            KeyPart::Text(self.last_name.clone()),
            KeyPart::Text(self.mobile.clone()),
        ]
    }

    fn validate(&self) -> Result<(), RecordError> {
        require(Self::KIND, "firstName", &self.first_name)?;
        require(Self::KIND, "lastName", &self.last_name)?;
        require(Self::KIND, "mobile", &self.mobile)?;
        if self.mobile.trim().len() < MIN_MOBILE_LEN {
            return Err(RecordError::InvalidMobile(self.mobile.clone()));
        }
        Ok(())
    }
}

impl fmt::Display for Customer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.full_name(), self.mobile)
    }
}
