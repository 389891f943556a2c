use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rhymerivals::config::ClientConfig;
use rhymerivals::error::ClientError;
use rhymerivals::net::api::ApiClient;
use rhymerivals::net::transport::GuardedAction;
use rhymerivals::net::types::{ProfileUpdate, RegisterRequest, SubmissionCreate, TournamentCategory, VoteRequest};
use rhymerivals::routes::{self, Navigation};
use rhymerivals::state::session::{Identity, RefreshOutcome, SessionStore, SessionView};
use rhymerivals::state::storage::FileStorage;

type Store = SessionStore<FileStorage, ApiClient>;

#[derive(Parser, Debug)]
#[command(name = "rivals", about = "Rhyme Rivals session and battle CLI")]
struct Cli {
    /// Backend origin; overrides `RIVALS_API_URL`.
    #[arg(long, env = "RIVALS_API_URL")]
    api_url: Option<String>,

    /// Session file; overrides `RIVALS_SESSION_FILE`.
    #[arg(long, env = "RIVALS_SESSION_FILE")]
    session_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with email and password.
    Login { email: String, password: String },
    /// Create an account and sign in.
    Register {
        email: String,
        password: String,
        #[arg(long)]
        mc_name: String,
        #[arg(long)]
        hometown: Option<String>,
    },
    /// Browse without an account.
    Guest,
    Logout,
    /// Show the current identity.
    Whoami,
    /// Re-fetch the signed-in user from the backend.
    Refresh,
    /// Confirm admin status with the backend.
    Admin,
    /// Resolve a route for the current identity.
    Visit { path: String },
    /// List navigation entries available to the current identity.
    Nav,
    Vote { battle_id: i64, submission_id: i64 },
    /// Change display name and/or hometown.
    Profile {
        #[arg(long)]
        mc_name: Option<String>,
        #[arg(long)]
        hometown: Option<String>,
    },
    /// Upload an entry for a beat.
    Submit {
        beat_id: i64,
        file_url: String,
        #[arg(long)]
        tournament_id: Option<i64>,
    },
    /// Create a tournament (category: rap, beat or track).
    CreateTournament { title: String, category: TournamentCategory },
    JoinTournament { tournament_id: i64, submission_id: i64 },
    ResetPassword { email: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(code = e.error_code(), error = %e, "command failed");
            eprintln!("error: {}", e.user_message());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), ClientError> {
    let mut config = ClientConfig::from_env()?;
    if let Some(api_url) = cli.api_url.as_deref() {
        config.api_url = ClientConfig::new(api_url)?.api_url;
    }
    if let Some(path) = cli.session_file {
        config.session_file = path;
    }

    let api = ApiClient::new(&config)?;
    let store = SessionStore::new(FileStorage::new(&config.session_file), api);
    store.initialize();

    match cli.command {
        Command::Login { email, password } => print_view(&store.login(&email, &password).await?),
        Command::Register { email, password, mc_name, hometown } => {
            let request = RegisterRequest { email, password, mc_name, hometown };
            print_view(&store.register(&request).await?);
        }
        Command::Guest => print_view(&store.enter_guest_mode()?),
        Command::Logout => print_view(&store.logout()),
        Command::Whoami => print_view(&store.view()),
        Command::Refresh => {
            print_outcome(store.refresh().await?);
            print_view(&store.view());
        }
        Command::Admin => {
            print_outcome(store.confirm_admin().await?);
            println!("admin: {}", store.view().is_admin());
        }
        Command::Visit { path } => print_navigation(&routes::navigate(&store.view(), &path)),
        Command::Nav => {
            for route in routes::nav_items(&store.view()) {
                println!("{}\t{}", route.nav_label.unwrap_or_default(), route.path);
            }
        }
        Command::Vote { battle_id, submission_id } => {
            let token = store.bearer_for(GuardedAction::Vote)?;
            let vote = VoteRequest { battle_id, voted_submission_id: submission_id };
            println!("{}", store.backend().vote(&token, vote).await?);
        }
        Command::Profile { mc_name, hometown } => run_profile(&store, ProfileUpdate { mc_name, hometown }).await?,
        Command::Submit { beat_id, file_url, tournament_id } => {
            let (token, user) = store.account_for(GuardedAction::Submit)?;
            let entry = SubmissionCreate { beat_id, file_url, tournament_id };
            let created = store.backend().upload_submission(&token, user.id, &entry).await?;
            println!("submission {} created", created.id);
        }
        Command::CreateTournament { title, category } => {
            let token = store.bearer_for(GuardedAction::CreateTournament)?;
            println!("{}", store.backend().create_tournament(&token, &title, category).await?);
        }
        Command::JoinTournament { tournament_id, submission_id } => {
            let token = store.bearer_for(GuardedAction::JoinTournament)?;
            println!("{}", store.backend().join_tournament(&token, tournament_id, submission_id).await?);
        }
        Command::ResetPassword { email } => println!("{}", store.backend().request_password_reset(&email).await?),
    }
    Ok(())
}

async fn run_profile(store: &Store, update: ProfileUpdate) -> Result<(), ClientError> {
    let (token, user) = store.account_for(GuardedAction::UpdateProfile)?;
    let updated = store.backend().update_profile(&token, user.id, &update).await?;
    println!("updated {} ({})", updated.mc_name, updated.email);
    // The update already landed; a failed re-fetch only leaves the cached copy stale.
    match store.refresh().await {
        Ok(RefreshOutcome::Discarded) => tracing::debug!("session changed while updating profile"),
        Ok(_) => {}
        Err(e) => tracing::warn!(code = e.error_code(), "profile updated but session refresh failed"),
    }
    Ok(())
}

fn print_view(view: &SessionView) {
    match &view.identity {
        Identity::Anonymous => println!("anonymous"),
        Identity::Guest(user) => println!("guest ({})", user.mc_name),
        Identity::Authenticated { user, .. } => {
            let role = if view.is_admin() { "admin" } else { "member" };
            println!("{} <{}> [{role}]", user.mc_name, user.email);
        }
    }
}

fn print_outcome(outcome: RefreshOutcome) {
    match outcome {
        RefreshOutcome::Updated => {}
        RefreshOutcome::Skipped => println!("not signed in with an account; nothing to do"),
        RefreshOutcome::Discarded => println!("session changed during the request; result dropped"),
    }
}

fn print_navigation(navigation: &Navigation) {
    match navigation {
        Navigation::Pending => println!("loading"),
        Navigation::Render(route) => println!("render {}", route.path),
        Navigation::Redirect { from, to } => println!("redirect {from} -> {to}"),
        Navigation::NotFound => println!("not found"),
    }
}
