use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The three synchronized entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Customer,
    Order,
    Measurement,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [
        EntityKind::Customer,
        EntityKind::Order,
        EntityKind::Measurement,
    ];

    /// Collection name, used for table names and URL segments.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Customer => "customers",
            EntityKind::Order => "orders",
            EntityKind::Measurement => "measurements",
        }
    }

    /// Server-side columns that make up the natural key, in key order.
    pub fn key_columns(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Customer => &["first_name", "last_name", "mobile"],
            EntityKind::Order => &["customer_id", "order_date", "order_type"],
            EntityKind::Measurement => &["customer_id"],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Customer => write!(f, "customer"),
            EntityKind::Order => write!(f, "order"),
            EntityKind::Measurement => write!(f, "measurement"),
        }
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "customer" | "customers" => Ok(EntityKind::Customer),
            "order" | "orders" => Ok(EntityKind::Order),
            "measurement" | "measurements" => Ok(EntityKind::Measurement),
            _ => Err(format!(
                "Invalid entity kind '{}'. Valid options: customers, orders, measurements",
                s
            )),
        }
    }
}
