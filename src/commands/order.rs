use clap::{Args, Subcommand};

use super::OutputFormat;
use perfectfit::db::LocalStore;
use perfectfit::models::{Customer, Entity, Order};

#[derive(Args)]
pub struct OrderCommand {
    #[command(subcommand)]
    pub command: OrderSubcommand,
}

#[derive(Subcommand)]
pub enum OrderSubcommand {
    /// Book a new order for a customer
    Add {
        /// Local customer id
        customer_id: i64,

        /// Garment type (e.g. Blouse, Kurti)
        order_type: String,

        /// Order date (dd/MM/yyyy)
        #[arg(long)]
        date: String,

        /// Estimated delivery date (dd/MM/yyyy)
        #[arg(long)]
        delivery: Option<String>,

        #[arg(long, default_value = "0")]
        amount: f64,

        /// Stitching instructions
        #[arg(long)]
        instructions: Option<String>,
    },

    /// List orders
    List {
        /// Only orders for this local customer id
        #[arg(long)]
        customer: Option<i64>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Change an order's status
    Status {
        /// Local order id
        id: i64,

        /// New status (e.g. Stitching, Ready, Delivered)
        status: String,
    },
}

impl OrderCommand {
    pub async fn run(&self, store: &LocalStore) -> Result<(), Box<dyn std::error::Error>> {
        let orders = store.repo::<Order>();

        match &self.command {
            OrderSubcommand::Add {
                customer_id,
                order_type,
                date,
                delivery,
                amount,
                instructions,
            } => {
                let customer = store
                    .repo::<Customer>()
                    .get_by_id(*customer_id)
                    .await?
                    .ok_or_else(|| format!("Customer not found: {}", customer_id))?;

                let mut order =
                    Order::new(*customer_id, customer.data.full_name(), date, order_type);
                order.customer_server_id = customer.server_id.clone();
                order.amount = *amount;
                if let Some(delivery) = delivery {
                    order.estimated_delivery_date = delivery.clone();
                }
                if let Some(instructions) = instructions {
                    order.instructions = instructions.clone();
                }
                order.validate()?;

                let created = orders.create(&order).await?;
                println!("Booked order #{}:", created.local_id);
                println!("{}", created.data);
            }

            OrderSubcommand::List { customer, format } => {
                let list: Vec<_> = orders
                    .list()
                    .await?
                    .into_iter()
                    .filter(|o| customer.is_none_or(|id| o.data.customer_id == id))
                    .collect();

                if list.is_empty() {
                    println!("No orders found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&list)?);
                    }
                    OutputFormat::Text => {
                        println!(
                            "{:<6}  {:<24}  {:<12}  {:<12}  {:>10}  STATUS",
                            "ID", "CUSTOMER", "TYPE", "DATE", "AMOUNT"
                        );
                        println!("{}", "-".repeat(84));
                        for order in &list {
                            println!(
                                "{:<6}  {:<24}  {:<12}  {:<12}  {:>10.2}  {}",
                                order.local_id,
                                order.data.customer_name,
                                order.data.order_type,
                                order.data.order_date,
                                order.data.amount,
                                order.data.status
                            );
                        }
                        println!("\nTotal: {} order(s)", list.len());
                    }
                }
            }

            OrderSubcommand::Status { id, status } => {
                let mut order = orders
                    .get_by_id(*id)
                    .await?
                    .ok_or_else(|| format!("Order not found: {}", id))?
                    .data;
                order.status = status.clone();

                let updated = orders.update(*id, &order).await?;
                println!("Updated order #{}:", updated.local_id);
                println!("{}", updated.data);
            }
        }

        Ok(())
    }
}
