use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use client_core::{
    BannerView, FeedOptions, FormField, MessageFeedController, RegistrationForm,
    SkillSyncClient, SubmitOutcome,
};
use shared::domain::DismissalPolicy;
use storage::{KeyValueStore, MemoryStore, SqliteStore};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    server_url: Option<String>,
    /// SQLite url for remembered dismissals.
    #[arg(long)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the admin message banner and follow it until Ctrl-C.
    Banner {
        #[arg(long)]
        policy: Option<DismissalPolicy>,
        #[arg(long)]
        refresh_secs: Option<u64>,
        /// Keep dismissals in memory only.
        #[arg(long)]
        ephemeral: bool,
    },
    /// Create an account.
    Register {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// Defaults to `--password`.
        #[arg(long)]
        confirm_password: Option<String>,
        #[arg(long)]
        accept_terms: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = config::load_settings()?;
    if let Some(v) = args.server_url {
        settings.server_url = v;
    }
    if let Some(v) = args.database_url {
        settings.database_url = v;
    }

    let client = Arc::new(SkillSyncClient::new(settings.server_url.clone()));

    match args.command {
        Command::Banner {
            policy,
            refresh_secs,
            ephemeral,
        } => {
            if let Some(v) = policy {
                settings.dismissal_policy = v;
            }
            if let Some(v) = refresh_secs {
                settings.refresh_secs = v;
            }
            let store: Arc<dyn KeyValueStore> = if ephemeral {
                Arc::new(MemoryStore::new())
            } else {
                Arc::new(SqliteStore::new(&settings.database_url).await?)
            };
            run_banner(client, store, &settings).await
        }
        Command::Register {
            first_name,
            last_name,
            username,
            email,
            password,
            confirm_password,
            accept_terms,
        } => {
            let mut form = RegistrationForm::new();
            form.set_field(FormField::FirstName, first_name);
            form.set_field(FormField::LastName, last_name);
            form.set_field(FormField::Username, username);
            form.set_field(FormField::Email, email);
            form.set_field(
                FormField::ConfirmPassword,
                confirm_password.unwrap_or_else(|| password.clone()),
            );
            form.set_field(FormField::Password, password);
            form.set_accept_terms(accept_terms);

            match form.submit(client.as_ref()).await {
                SubmitOutcome::Registered(user) => {
                    println!(
                        "Registered {} (user_id={}); you can now log in.",
                        user.username, user.user_id
                    );
                    Ok(())
                }
                SubmitOutcome::Invalid(errors) => {
                    for (field, message) in &errors {
                        eprintln!("{field}: {message}");
                    }
                    bail!("registration form has {} error(s)", errors.len())
                }
                SubmitOutcome::Rejected(message) => bail!("registration rejected: {message}"),
            }
        }
    }
}

async fn run_banner(
    client: Arc<SkillSyncClient>,
    store: Arc<dyn KeyValueStore>,
    settings: &config::Settings,
) -> Result<()> {
    let controller = MessageFeedController::new(
        client,
        store,
        FeedOptions {
            policy: settings.dismissal_policy,
            refresh_interval: settings.refresh_interval(),
        },
    )
    .await;
    let mut views = controller.subscribe_view();
    controller.start();
    info!(
        "following admin messages from {} ({:?} dismissal)",
        settings.server_url, settings.dismissal_policy
    );
    println!("Commands: d = dismiss, n = next, p = previous, r = refresh, q = quit");

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut last_rendered: Option<BannerView> = None;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            view = views.recv() => match view {
                Ok(view) => render(&view, &mut last_rendered),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("banner view lagged by {skipped} update(s)");
                    render(&controller.view(), &mut last_rendered);
                }
                Err(RecvError::Closed) => break,
            },
            line = input.next_line(), if stdin_open => {
                let Ok(Some(line)) = line else {
                    stdin_open = false;
                    continue;
                };
                match line.trim() {
                    "d" => match controller.current_message() {
                        Some(message) => controller.dismiss(message.message_id).await,
                        None => println!("Nothing to dismiss."),
                    },
                    "n" => controller.go_to(controller.cursor() + 1),
                    "p" => controller.go_to(controller.cursor().saturating_sub(1)),
                    "r" => controller.refresh().await,
                    "q" => break,
                    "" => {}
                    other => println!("Unknown command '{other}'."),
                }
            }
        }
    }

    controller.teardown();
    Ok(())
}

/// Prints the banner when what is on screen changes; loading flips alone are
/// not worth a redraw.
fn render(view: &BannerView, last_rendered: &mut Option<BannerView>) {
    let settled = BannerView {
        loading: false,
        ..view.clone()
    };
    if last_rendered.as_ref() == Some(&settled) {
        return;
    }

    match &settled.current_message {
        Some(message) => {
            println!();
            println!("[{}] {}", message.created_at.format("%Y-%m-%d %H:%M"), message.title);
            println!("    {}", message.content);
            if settled.has_multiple {
                println!("    ({} of {})", settled.cursor + 1, settled.total);
            }
        }
        None => println!("(no admin message)"),
    }
    *last_rendered = Some(settled);
}
