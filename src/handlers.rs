use std::sync::Arc;

use crate::api::{AccountApi, ApiClient, Unconfigured};
use crate::app::{App, Command, Reply};
use crate::backend_client::SocketBackend;
use crate::catalog::ServerView;
use crate::cli::TopCommand;
use crate::config::AppConfig;
use crate::controller::ConnectionState;
use crate::error::AppError;
use crate::models::session::User;
use crate::shared::kv_store::KvStore;
use crate::shared::latency::LatencyProbe;

type DeskApp = App<dyn AccountApi, SocketBackend>;

pub async fn dispatch(command: TopCommand, config: &AppConfig) -> anyhow::Result<()> {
    let mut app = build_app(config);
    match command {
        TopCommand::Login { email } => cmd_login(&mut app, &email).await,
        TopCommand::Logout => cmd_logout(&mut app).await,
        TopCommand::Info => cmd_info(&mut app).await,
        TopCommand::Servers {
            search,
            location,
            country,
            page,
        } => cmd_servers(&app, search, location, country, page).await,
        TopCommand::Connect { server } => cmd_connect(&mut app, &server).await,
        TopCommand::Disconnect => cmd_disconnect(&mut app).await,
        TopCommand::Status => cmd_status(&app).await,
        TopCommand::Backend { .. } => anyhow::bail!("backend runs outside the client dispatcher"),
    }
}

fn build_app(config: &AppConfig) -> DeskApp {
    let api: Arc<dyn AccountApi> = match ApiClient::new(&config.api) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::debug!( error = ?e.to_string(), "account_api_unconfigured");
            Arc::new(Unconfigured)
        }
    };
    App::new(
        api,
        Arc::new(SocketBackend::from_config(&config.backend)),
        KvStore::open_default(),
        LatencyProbe::from_config(&config.probe),
    )
}

async fn cmd_login(app: &mut DeskApp, email: &str) -> anyhow::Result<()> {
    let password = rpassword::prompt_password("Password: ")?;
    let reply = app
        .execute(Command::Login {
            email: email.to_string(),
            password,
        })
        .await?;
    if let Reply::LoggedIn { user, warning } = reply {
        if let Some(warning) = warning {
            eprintln!("{}", warning);
        }
        println!("Logged in as {} ({})", user.username, user.plan);
    }
    Ok(())
}

async fn cmd_logout(app: &mut DeskApp) -> anyhow::Result<()> {
    app.execute(Command::Logout).await?;
    println!("Logged out");
    Ok(())
}

async fn cmd_info(app: &mut DeskApp) -> anyhow::Result<()> {
    match require_user(app).await {
        Ok(user) => {
            println!("Username:     {}", user.username);
            println!("Email:        {}", user.email);
            println!("Plan:         {}", user.plan);
            println!("Member since: {}", user.member_since_date());
            Ok(())
        }
        Err(AppError::NotLoggedIn) => {
            println!("Not logged in");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn cmd_servers(
    app: &DeskApp,
    search: Option<String>,
    location: Option<String>,
    country: Option<String>,
    page: usize,
) -> anyhow::Result<()> {
    println!("Measuring latency...");
    let mut view = ServerView::new(app.catalog().fetch().await?);
    if let Some(search) = search {
        view.set_query(&search);
    }
    if let Some(location) = location {
        view.set_location(&location);
    }
    if let Some(country) = country {
        view.set_country(&country);
    }
    for _ in 1..page.max(1) {
        if !view.next() {
            break;
        }
    }

    let current = view.current_page();
    if current.items.is_empty() {
        println!("No servers match the current filters");
        if !view.countries().is_empty() {
            println!("Countries: {}", view.countries().join(", "));
        }
        return Ok(());
    }

    println!(
        "{:>4}  {:<20} {:<16} {:<22} {}",
        "ID", "Name", "IP", "Location", "Latency"
    );
    for server in &current.items {
        println!("{}", server);
    }
    let pages = current.total.div_ceil(crate::catalog::PAGE_SIZE);
    println!(
        "\nPage {}/{} ({} servers){}{}",
        current.page + 1,
        pages,
        current.total,
        if current.has_previous { "  [--page N-1: previous]" } else { "" },
        if current.has_next { "  [--page N+1: next]" } else { "" },
    );
    Ok(())
}

async fn cmd_connect(app: &mut DeskApp, selector: &str) -> anyhow::Result<()> {
    require_user(app).await?;
    let view = ServerView::new(app.catalog().fetch().await?);
    let server = view.find(selector)?.clone();
    app.controller().resync(view.servers()).await?;

    if let Reply::Connection(report) = app.execute(Command::Connect(server)).await? {
        println!("{}", report.message);
        print_state(&report.state);
    }
    Ok(())
}

async fn cmd_disconnect(app: &mut DeskApp) -> anyhow::Result<()> {
    app.controller().resync(&[]).await?;
    if let Reply::Connection(report) = app.execute(Command::Disconnect).await? {
        println!("{}", report.message);
    }
    Ok(())
}

async fn cmd_status(app: &DeskApp) -> anyhow::Result<()> {
    let state = app.controller().resync(&[]).await?;
    print_state(&state);
    Ok(())
}

/// Restore the stored session; `NotLoggedIn` when there is none.
async fn require_user(app: &mut DeskApp) -> Result<User, AppError> {
    match app.execute(Command::Restore).await? {
        Reply::Restored(Some(user)) => Ok(user),
        _ => Err(AppError::NotLoggedIn),
    }
}

fn print_state(state: &ConnectionState) {
    match state {
        ConnectionState::Connected { server } if !server.location.is_empty() => {
            println!("Status: {} ({})", state, server.location)
        }
        other => println!("Status: {}", other),
    }
}
