use clap::{Parser, Subcommand};
use clinic_core::models::{
    InvoiceStatus, Patient, PatientFilter, PatientStatus, WebhookEventFilter, WebhookProvider,
};
use clinic_core::{connect_and_migrate, CoreConfig, InvoiceFilter, Services};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "clinic")]
#[command(about = "Clinic patient and billing operator CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// List patients
    ListPatients {
        /// Only patients in this status (pending, qualified, disqualified, client, inactive)
        #[arg(long)]
        status: Option<PatientStatus>,
        /// Only patients carrying this membership hashtag
        #[arg(long)]
        hashtag: Option<String>,
        /// Match on name, email or patient id
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Show one patient as JSON
    ShowPatient {
        /// Patient id, e.g. P0001
        patient_id: String,
    },
    /// Override a patient's status
    SetStatus {
        patient_id: String,
        status: PatientStatus,
    },
    /// Add a membership hashtag
    Tag { patient_id: String, hashtag: String },
    /// Remove a membership hashtag
    Untag { patient_id: String, hashtag: String },
    /// List invoices
    ListInvoices {
        #[arg(long)]
        patient_id: Option<String>,
        #[arg(long)]
        status: Option<InvoiceStatus>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Inspect the webhook ingestion log
    WebhookEvents {
        /// Only events that have not been processed
        #[arg(long)]
        unprocessed: bool,
        #[arg(long)]
        provider: Option<WebhookProvider>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Re-run unprocessed webhook events, oldest first
    ReprocessWebhooks {
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
}

fn print_patient_row(patient: &Patient) {
    println!(
        "{}  {:<12}  {:<30}  {}  [{}]",
        patient.patient_id,
        patient.status,
        patient.display_name(),
        patient.email,
        patient.membership_hashtags.join(" ")
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("clinic=warn".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("No command given. Use --help for usage.");
        return Ok(());
    };

    let cfg = Arc::new(CoreConfig::from_env()?);
    let store = connect_and_migrate(&cfg).await?;
    let services = Services::new(cfg, Arc::new(store));

    match command {
        Commands::Migrate => {
            println!("Database is up to date.");
        }
        Commands::ListPatients {
            status,
            hashtag,
            search,
            limit,
        } => {
            let patients = services
                .patients
                .list(PatientFilter {
                    status,
                    hashtag,
                    search,
                    limit: Some(limit),
                    offset: None,
                })
                .await?;
            if patients.is_empty() {
                println!("No patients found.");
            } else {
                for patient in &patients {
                    print_patient_row(patient);
                }
            }
        }
        Commands::ShowPatient { patient_id } => {
            let patient = services.patients.get(&patient_id).await?;
            println!("{}", serde_json::to_string_pretty(&patient)?);
        }
        Commands::SetStatus { patient_id, status } => {
            let patient = services
                .patients
                .set_status(&patient_id, status, "cli")
                .await?;
            println!("{} is now {}", patient.patient_id, patient.status);
        }
        Commands::Tag {
            patient_id,
            hashtag,
        } => {
            let patient = services.patients.add_hashtag(&patient_id, &hashtag).await?;
            print_patient_row(&patient);
        }
        Commands::Untag {
            patient_id,
            hashtag,
        } => {
            let patient = services
                .patients
                .remove_hashtag(&patient_id, &hashtag)
                .await?;
            print_patient_row(&patient);
        }
        Commands::ListInvoices {
            patient_id,
            status,
            limit,
        } => {
            let invoices = services
                .invoices
                .list(InvoiceFilter {
                    patient_id,
                    status,
                    limit: Some(limit),
                    offset: None,
                })
                .await?;
            if invoices.is_empty() {
                println!("No invoices found.");
            }
            for invoice in invoices {
                println!(
                    "{}  {}  {:<14}  {:>10} {}  paid {:>10}",
                    invoice.invoice_number,
                    invoice.patient_id,
                    invoice.status,
                    cents(invoice.total_cents),
                    invoice.currency,
                    cents(invoice.amount_paid_cents)
                );
            }
        }
        Commands::WebhookEvents {
            unprocessed,
            provider,
            limit,
        } => {
            let events = services
                .webhooks
                .list_events(&WebhookEventFilter {
                    unprocessed,
                    provider,
                    limit: Some(limit),
                    offset: None,
                })
                .await?;
            if events.is_empty() {
                println!("No webhook events found.");
            }
            for event in events {
                println!(
                    "{}  {:<7}  {:<32}  {:<24}  attempts={}  {}",
                    event.id,
                    event.provider,
                    event.event_type,
                    event.provider_event_id,
                    event.attempts,
                    match (event.processed, event.error_message.as_deref()) {
                        (true, _) => "processed".to_string(),
                        (false, Some(err)) => format!("failed: {err}"),
                        (false, None) => "pending".to_string(),
                    }
                );
            }
        }
        Commands::ReprocessWebhooks { limit } => {
            let summary = services.webhooks.reprocess_pending(limit).await?;
            println!(
                "Reprocessed webhooks: {} processed, {} ignored, {} failed",
                summary.processed, summary.ignored, summary.failed
            );
        }
    }

    Ok(())
}

fn cents(amount: i64) -> String {
    format!("{}.{:02}", amount / 100, (amount % 100).abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_status_arguments() {
        let cli = Cli::try_parse_from(["clinic", "set-status", "P0001", "client"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::SetStatus {
                status: PatientStatus::Client,
                ..
            })
        ));
        assert!(Cli::try_parse_from(["clinic", "set-status", "P0001", "royalty"]).is_err());
    }

    #[test]
    fn formats_cents() {
        assert_eq!(cents(19_900), "199.00");
        assert_eq!(cents(5), "0.05");
    }
}
