mod commands;
mod config;
mod session_store;

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use client_core::{HttpRemoteService, PersistenceGateway, SessionBootstrapController};
use rust_decimal::Decimal;
use shared::domain::{ClientInput, CompanyProfileInput, DEFAULT_CURRENCY};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::{
    commands::{parse_item, App, CreateRequest, ItemArg},
    config::Settings,
};

#[derive(Parser, Debug)]
#[command(name = "invoicer", about = "Create and track invoices from the terminal")]
struct Args {
    /// Base URL of the account and record service.
    #[arg(long, global = true)]
    service_url: Option<String>,
    #[arg(long, global = true)]
    api_key: Option<String>,
    /// Where the signed-in session is kept between runs.
    #[arg(long, global = true)]
    session_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show who is signed in and which page the app would open.
    Status,
    SignIn {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    SignUp {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    SignOut,
    /// Create the company profile, or update it if it exists.
    Setup {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "")]
        phone: String,
        #[arg(long, default_value = "")]
        address: String,
        #[arg(long, default_value = "")]
        tax_id: String,
        #[arg(long, default_value = DEFAULT_CURRENCY)]
        currency: String,
        /// Percentage applied to invoice subtotals.
        #[arg(long, default_value = "1")]
        tax_rate: Decimal,
        #[arg(long, default_value = "")]
        website: String,
        #[arg(long, default_value = "")]
        industry: String,
    },
    Clients {
        #[command(subcommand)]
        action: ClientsCommand,
    },
    /// List the invoice templates accepted by `create --template`.
    Templates,
    /// Fill in and submit an invoice.
    Create {
        /// simple, tax, creative, receipt or premium.
        #[arg(long, default_value = "simple")]
        template: String,
        /// Client name or id.
        #[arg(long)]
        client: String,
        /// DESCRIPTION:QUANTITY:RATE, repeatable.
        #[arg(long = "item", value_parser = parse_item)]
        items: Vec<ItemArg>,
        #[arg(long)]
        invoice_date: Option<NaiveDate>,
        #[arg(long)]
        due_date: Option<NaiveDate>,
        #[arg(long)]
        notes: Option<String>,
        /// Save as draft instead of sending.
        #[arg(long)]
        draft: bool,
    },
    History,
    Dashboard,
}

#[derive(Subcommand, Debug)]
enum ClientsCommand {
    List,
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        address: Option<String>,
    },
}

impl Args {
    fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(v) = &self.service_url {
            settings.service_url = v.clone();
        }
        if let Some(v) = &self.api_key {
            settings.api_key = v.clone();
        }
        if let Some(v) = &self.session_file {
            settings.session_path = Some(v.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = config::load_settings();
    args.apply_overrides(&mut settings);

    let remote = Arc::new(HttpRemoteService::new(settings.remote_config()?)?);
    let gateway = Arc::new(PersistenceGateway::new(remote.clone()));
    let session_file = settings.session_file();
    if let Some(path) = &session_file {
        restore_saved_session(&remote, &gateway, path).await?;
    }

    let bootstrap = SessionBootstrapController::mount(Arc::clone(&gateway));
    let _disposer = bootstrap.disposer();
    let mut app = App::new(gateway.clone(), bootstrap, settings.completion_delay());

    let outcome = run(&mut app, args.command).await;

    if let Some(path) = &session_file {
        match gateway.get_session().await? {
            Some(session) => session_store::save_session(path, &session)?,
            None => session_store::clear_session(path)?,
        }
    }
    outcome
}

/// Restores the saved session before the bootstrap check runs. An expired one
/// is refreshed once, or dropped.
async fn restore_saved_session(
    remote: &HttpRemoteService,
    gateway: &PersistenceGateway,
    path: &std::path::Path,
) -> Result<()> {
    let Some(session) = session_store::load_session(path)? else {
        return Ok(());
    };
    let expired = session
        .expires_at
        .is_some_and(|expires_at| expires_at <= Utc::now());
    remote.restore_session(session).await;
    if expired {
        if let Err(err) = gateway.refresh_session().await {
            warn!("auth: saved session expired and could not be refreshed: {err:#}");
            gateway.sign_out().await?;
        }
    }
    Ok(())
}

async fn run(app: &mut App, command: Command) -> Result<()> {
    match command {
        Command::Status => app.status().await,
        Command::SignIn { email, password } => app.sign_in(&email, &password).await,
        Command::SignUp { email, password } => app.sign_up(&email, &password).await,
        Command::SignOut => app.sign_out().await,
        Command::Setup {
            name,
            email,
            phone,
            address,
            tax_id,
            currency,
            tax_rate,
            website,
            industry,
        } => {
            app.setup(CompanyProfileInput {
                name,
                email,
                phone,
                address,
                tax_id,
                currency,
                tax_rate,
                website,
                industry,
            })
            .await
        }
        Command::Clients {
            action: ClientsCommand::List,
        } => app.list_clients().await,
        Command::Clients {
            action:
                ClientsCommand::Add {
                    name,
                    email,
                    phone,
                    address,
                },
        } => {
            app.add_client(ClientInput {
                name,
                email,
                phone,
                address,
            })
            .await
        }
        Command::Templates => app.templates().await,
        Command::Create {
            template,
            client,
            items,
            invoice_date,
            due_date,
            notes,
            draft,
        } => {
            app.create(CreateRequest {
                template,
                client,
                items,
                invoice_date,
                due_date,
                notes,
                draft,
            })
            .await
        }
        Command::History => app.history().await,
        Command::Dashboard => app.dashboard().await,
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
