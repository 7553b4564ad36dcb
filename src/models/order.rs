use serde::{Deserialize, Serialize};
use std::fmt;

use super::entity::{require, Entity, KeyPart, NaturalKey, RecordError};
use super::kind::EntityKind;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Order {
    /// Local id of the customer on the device that created the order.
    pub customer_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_server_id: Option<String>,
    pub customer_name: String,
    pub order_date: String,
    pub order_type: String,
    pub estimated_delivery_date: String,
    pub instructions: String,
    pub amount: f64,
    pub status: String,
}

impl Order {
    pub fn new(
        customer_id: i64,
        customer_name: impl Into<String>,
        order_date: impl Into<String>,
        order_type: impl Into<String>,
    ) -> Self {
        Self {
            customer_id,
            customer_name: customer_name.into(),
            order_date: order_date.into(),
            order_type: order_type.into(),
            status: "Pending".to_string(),
            ..Self::default()
        }
    }
}

impl Entity for Order {
    const KIND: EntityKind = EntityKind::Order;

    fn natural_key(&self) -> NaturalKey {
        vec![
            KeyPart::Int(self.customer_id),
            KeyPart::Text(self.order_date.clone()),
            KeyPart::Text(self.order_type.clone()),
        ]
    }

    fn validate(&self) -> Result<(), RecordError> {
        if self.customer_id <= 0 {
            return Err(RecordError::InvalidCustomerId(self.customer_id));
        }
        require(Self::KIND, "orderDate", &self.order_date)?;
        require(Self::KIND, "orderType", &self.order_type)
    }

    fn customer_id(&self) -> Option<i64> {
        Some(self.customer_id)
    }

    fn customer_server_id(&self) -> Option<&str> {
        self.customer_server_id.as_deref()
    }

    fn link_customer(&mut self, local_id: i64, server_id: Option<String>) {
        self.customer_id = local_id;
        self.customer_server_id = server_id;
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} for {} on {} [{}] {:.2}",
            self.order_type, self.customer_name, self.order_date, self.status, self.amount
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_natural_key() {
        let order = Order::new(7, "Asha Rao", "2024-05-01", "Blouse");
        assert_eq!(
            order.natural_key(),
            vec![
                KeyPart::Int(7),
                KeyPart::Text("2024-05-01".into()),
                KeyPart::Text("Blouse".into()),
            ]
        );
    }

    #[test]
    fn test_order_validate() {
        assert!(Order::new(7, "Asha", "2024-05-01", "Blouse").validate().is_ok());
        assert_eq!(
            Order::new(0, "Asha", "2024-05-01", "Blouse").validate(),
            Err(RecordError::InvalidCustomerId(0))
        );
        assert!(Order::new(7, "Asha", "2024-05-01", " ").validate().is_err());
    }

    #[test]
    fn test_link_customer() {
        let mut order = Order::new(7, "Asha", "2024-05-01", "Blouse");
        order.link_customer(3, Some("srv-1".into()));
        assert_eq!(order.customer_id, 3);
        assert_eq!(Entity::customer_server_id(&order), Some("srv-1"));
    }

    #[test]
    fn test_customer_server_id_omitted_when_unknown() {
        let order = Order::new(7, "Asha", "2024-05-01", "Blouse");
        let json = serde_json::to_value(&order).unwrap();
        assert!(json.get("customerServerId").is_none());
        assert_eq!(json["orderType"], "Blouse");
    }
}
