use clap::{Args, Subcommand};
use serde_json::Value;

use super::OutputFormat;
use perfectfit::db::LocalStore;
use perfectfit::models::{Customer, Measurement, Record};

#[derive(Args)]
pub struct MeasurementCommand {
    #[command(subcommand)]
    pub command: MeasurementSubcommand,
}

#[derive(Subcommand)]
pub enum MeasurementSubcommand {
    /// Record measurements for a customer
    Set {
        /// Local customer id
        customer_id: i64,

        /// Measurement as name=value (e.g. chestRound=36); repeatable
        #[arg(long = "field", short = 'f', value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },

    /// Show a customer's measurements
    Show {
        /// Local customer id
        customer_id: i64,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl MeasurementCommand {
    pub async fn run(&self, store: &LocalStore) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            MeasurementSubcommand::Set {
                customer_id,
                fields,
            } => {
                let customer = store
                    .repo::<Customer>()
                    .get_by_id(*customer_id)
                    .await?
                    .ok_or_else(|| format!("Customer not found: {}", customer_id))?;

                let repo = store.repo::<Measurement>();
                let existing = find_for_customer(store, *customer_id).await?;
                let current = existing
                    .as_ref()
                    .map(|r| r.data.clone())
                    .unwrap_or_else(|| Measurement::for_customer(*customer_id));

                let mut measurement = apply_fields(&current, fields)?;
                measurement.customer_server_id = customer.server_id.clone();

                let saved = match existing {
                    Some(record) => repo.update(record.local_id, &measurement).await?,
                    None => repo.create(&measurement).await?,
                };
                println!(
                    "Saved measurements #{} for {}",
                    saved.local_id,
                    customer.data.full_name()
                );
            }

            MeasurementSubcommand::Show {
                customer_id,
                format,
            } => {
                let Some(record) = find_for_customer(store, *customer_id).await? else {
                    println!("No measurements found");
                    return Ok(());
                };

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&record)?);
                    }
                    OutputFormat::Text => {
                        println!("Measurements #{} ({})", record.local_id, record.sync_status);
                        for (name, value) in taken(&record.data)? {
                            println!("  {:<32} {}", name, value);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

async fn find_for_customer(
    store: &LocalStore,
    customer_id: i64,
) -> Result<Option<Record<Measurement>>, Box<dyn std::error::Error>> {
    Ok(store
        .repo::<Measurement>()
        .list()
        .await?
        .into_iter()
        .find(|m| m.data.customer_id == customer_id))
}

fn parse_field(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", s))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

/// Overlays `fields` on `base`; unknown measurement names are an error.
fn apply_fields(
    base: &Measurement,
    fields: &[(String, String)],
) -> Result<Measurement, Box<dyn std::error::Error>> {
    let mut value = serde_json::to_value(base)?;
    let Value::Object(map) = &mut value else {
        return Err("measurement did not serialize to an object".into());
    };
    for (name, field_value) in fields {
        match map.get_mut(name) {
            Some(slot @ Value::String(_)) => *slot = Value::String(field_value.clone()),
            _ => return Err(format!("Unknown measurement: {}", name).into()),
        }
    }
    Ok(serde_json::from_value(value)?)
}

/// Non-empty measurements as (name, value) pairs.
fn taken(measurement: &Measurement) -> Result<Vec<(String, String)>, serde_json::Error> {
    let value = serde_json::to_value(measurement)?;
    let mut pairs: Vec<_> = match value {
        Value::Object(map) => map
            .into_iter()
            .filter_map(|(k, v)| match v {
                Value::String(s) if !s.is_empty() => Some((k, s)),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    pairs.sort();
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_field() {
        assert_eq!(
            parse_field("chestRound = 36").unwrap(),
            ("chestRound".to_string(), "36".to_string())
        );
        assert!(parse_field("chestRound").is_err());
    }

    #[test]
    fn test_apply_fields() {
        let base = Measurement::for_customer(4);
        let fields = vec![
            ("chestRound".to_string(), "36".to_string()),
            ("waistRound".to_string(), "30".to_string()),
        ];
        let updated = apply_fields(&base, &fields).unwrap();
        assert_eq!(updated.customer_id, 4);
        assert_eq!(updated.kurti.chest_round, "36");
        assert_eq!(updated.kurti.waist_round, "30");
        assert_eq!(
            taken(&updated).unwrap(),
            vec![
                ("chestRound".to_string(), "36".to_string()),
                ("waistRound".to_string(), "30".to_string()),
            ]
        );
    }

    #[test]
    fn test_apply_fields_rejects_unknown() {
        let base = Measurement::for_customer(4);
        let fields = vec![("customerId".to_string(), "9".to_string())];
        assert!(apply_fields(&base, &fields).is_err());
        let fields = vec![("sleeveColour".to_string(), "red".to_string())];
        assert!(apply_fields(&base, &fields).is_err());
    }
}
