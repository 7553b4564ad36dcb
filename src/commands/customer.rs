use clap::{Args, Subcommand};

use super::OutputFormat;
use perfectfit::db::EntityRepository;
use perfectfit::models::{Customer, Entity, Record};

#[derive(Args)]
pub struct CustomerCommand {
    #[command(subcommand)]
    pub command: CustomerSubcommand,
}

#[derive(Subcommand)]
pub enum CustomerSubcommand {
    /// Register a new customer
    Add {
        first_name: String,
        last_name: String,
        /// Mobile number (at least 10 digits)
        mobile: String,

        #[arg(long)]
        address: Option<String>,

        #[arg(long)]
        alternate_mobile: Option<String>,

        /// Birth date (dd/MM/yyyy)
        #[arg(long)]
        birth_date: Option<String>,
    },

    /// List all customers
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show a customer's details
    Show {
        /// Local customer id
        id: i64,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Edit an existing customer
    Edit {
        /// Local customer id
        id: i64,

        #[arg(long)]
        first_name: Option<String>,

        #[arg(long)]
        last_name: Option<String>,

        #[arg(long)]
        mobile: Option<String>,

        #[arg(long)]
        address: Option<String>,

        #[arg(long)]
        alternate_mobile: Option<String>,

        #[arg(long)]
        birth_date: Option<String>,
    },
}

impl CustomerCommand {
    pub async fn run(
        &self,
        repo: &EntityRepository<Customer>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            CustomerSubcommand::Add {
                first_name,
                last_name,
                mobile,
                address,
                alternate_mobile,
                birth_date,
            } => {
                let mut customer = Customer::new(first_name, last_name, mobile);
                if let Some(address) = address {
                    customer.address = address.clone();
                }
                if let Some(alternate) = alternate_mobile {
                    customer.alternate_mobile = alternate.clone();
                }
                if let Some(birth_date) = birth_date {
                    customer.birth_date = birth_date.clone();
                }
                customer.validate()?;

                let created = repo.create(&customer).await?;
                println!("Registered customer #{}:", created.local_id);
                println!("{}", created.data);
            }

            CustomerSubcommand::List { format } => {
                let customers = repo.list().await?;

                if customers.is_empty() {
                    println!("No customers found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&customers)?);
                    }
                    OutputFormat::Text => {
                        println!("{:<6}  {:<30}  {:<14}  STATUS", "ID", "NAME", "MOBILE");
                        println!("{}", "-".repeat(64));
                        for customer in &customers {
                            println!(
                                "{:<6}  {:<30}  {:<14}  {}",
                                customer.local_id,
                                truncate(&customer.data.full_name(), 30),
                                customer.data.mobile,
                                customer.sync_status
                            );
                        }
                        println!("\nTotal: {} customer(s)", customers.len());
                    }
                }
            }

            CustomerSubcommand::Show { id, format } => {
                let customer = find(repo, *id).await?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&customer)?);
                    }
                    OutputFormat::Text => print_customer(&customer),
                }
            }

            CustomerSubcommand::Edit {
                id,
                first_name,
                last_name,
                mobile,
                address,
                alternate_mobile,
                birth_date,
            } => {
                let mut customer = find(repo, *id).await?.data;
                let edits = [
                    (&mut customer.first_name, first_name),
                    (&mut customer.last_name, last_name),
                    (&mut customer.mobile, mobile),
                    (&mut customer.address, address),
                    (&mut customer.alternate_mobile, alternate_mobile),
                    (&mut customer.birth_date, birth_date),
                ];
                for (field, value) in edits {
                    if let Some(value) = value {
                        *field = value.clone();
                    }
                }
                customer.validate()?;

                let updated = repo.update(*id, &customer).await?;
                println!("Updated customer #{}:", updated.local_id);
                println!("{}", updated.data);
            }
        }

        Ok(())
    }
}

async fn find(
    repo: &EntityRepository<Customer>,
    id: i64,
) -> Result<Record<Customer>, Box<dyn std::error::Error>> {
    repo.get_by_id(id)
        .await?
        .ok_or_else(|| format!("Customer not found: {}", id).into())
}

fn print_customer(customer: &Record<Customer>) {
    let data = &customer.data;
    println!("Customer #{}", customer.local_id);
    println!("  Name:       {}", data.full_name());
    println!("  Mobile:     {}", data.mobile);
    if !data.alternate_mobile.is_empty() {
        println!("  Alternate:  {}", data.alternate_mobile);
    }
    if !data.address.is_empty() {
        println!("  Address:    {}", data.address);
    }
    if !data.birth_date.is_empty() {
        println!("  Birth date: {}", data.birth_date);
    }
    println!(
        "  Sync:       {} ({})",
        customer.sync_status,
        customer.server_id.as_deref().unwrap_or("not uploaded")
    );
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        s.to_string()
    }
}
