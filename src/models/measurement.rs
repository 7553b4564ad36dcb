use serde::{Deserialize, Serialize};

use super::entity::{Entity, KeyPart, NaturalKey, RecordError};
use super::kind::EntityKind;

/// Body measurements for one customer. Every value is free text
/// ("36", "36.5", "36-37"); an empty string means not taken yet.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Measurement {
    pub customer_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_server_id: Option<String>,
    #[serde(flatten)]
    pub kurti: KurtiMeasurements,
    #[serde(flatten)]
    pub pant: PantMeasurements,
    #[serde(flatten)]
    pub blouse: BlouseMeasurements,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KurtiMeasurements {
    pub kurti_length: String,
    pub full_shoulder: String,
    pub upper_chest_round: String,
    pub chest_round: String,
    pub waist_round: String,
    pub shoulder_to_apex: String,
    pub apex_to_apex: String,
    pub shoulder_to_low_chest_length: String,
    pub skap_length: String,
    pub skap_length_round: String,
    pub hip_round: String,
    pub front_neck_deep: String,
    pub front_neck_width: String,
    pub back_neck_deep: String,
    pub ready_shoulder: String,
    pub sleeves_height_short: String,
    pub sleeves_height_elbow: String,
    pub sleeves_height_three_quarter: String,
    pub sleeves_round: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PantMeasurements {
    pub pant_waist: String,
    pub pant_length: String,
    pub pant_hip: String,
    pub pant_bottom: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlouseMeasurements {
    pub blouse_length: String,
    pub blouse_full_shoulder: String,
    pub blouse_chest: String,
    pub blouse_waist: String,
    pub blouse_shoulder_to_apex: String,
    pub blouse_apex_to_apex: String,
    pub blouse_back_length: String,
    pub blouse_front_neck_deep: String,
    pub blouse_front_neck_width: String,
    pub blouse_back_neck_deep: String,
    pub blouse_ready_shoulder: String,
    pub blouse_sleeves_height_short: String,
    pub blouse_sleeves_height_elbow: String,
    pub blouse_sleeves_height_three_quarter: String,
    pub blouse_sleeves_round: String,
    /// "left" or "right"
    pub blouse_hook_on: String,
}

impl Measurement {
    pub fn for_customer(customer_id: i64) -> Self {
        Self {
            customer_id,
            ..Self::default()
        }
    }
}

impl Entity for Measurement {
    const KIND: EntityKind = EntityKind::Measurement;

    fn natural_key(&self) -> NaturalKey {
        vec![KeyPart::Int(self.customer_id)]
    }

    fn validate(&self) -> Result<(), RecordError> {
        if self.customer_id <= 0 {
            return Err(RecordError::InvalidCustomerId(self.customer_id));
        }
        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measurement_fields_are_flat_on_the_wire() {
        let mut measurement = Measurement::for_customer(4);
        measurement.kurti.chest_round = "36".into();
        measurement.pant.pant_waist = "30".into();
        measurement.blouse.blouse_hook_on = "left".into();

        let json = serde_json::to_value(&measurement).unwrap();
        assert_eq!(json["customerId"], 4);
        assert_eq!(json["chestRound"], "36");
        assert_eq!(json["pantWaist"], "30");
        assert_eq!(json["blouseHookOn"], "left");
        assert!(json.get("kurti").is_none());
    }

    #[test]
    fn test_measurement_partial_payload_parses() {
        let parsed: Measurement =
            serde_json::from_str(r#"{"customerId":4,"hipRound":"40"}"#).unwrap();
        assert_eq!(parsed.customer_id, 4);
        assert_eq!(parsed.kurti.hip_round, "40");
        assert_eq!(parsed.blouse.blouse_length, "");
    }

    #[test]
    fn test_measurement_key_and_validation() {
        assert_eq!(
            Measurement::for_customer(4).natural_key(),
            vec![KeyPart::Int(4)]
        );
        assert_eq!(
            Measurement::for_customer(-1).validate(),
            Err(RecordError::InvalidCustomerId(-1))
        );
    }
}
