use std::io::Write;
use std::sync::Arc;

use carteira_auth::session::FileStorage;
use carteira_auth::{
    AppConfig, AuthFlow, FlowStep, GoTrueClient, LookupMethod, PgUserStore, SessionCoordinator,
    SessionStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "carteira_auth=debug,sqlx=warn".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
        tracing::warn!(error = %e, "migrations folder not found or migration failed; continuing");
    }

    let users = Arc::new(PgUserStore::new(pool));
    let storage = Arc::new(FileStorage::new(&config.session_file));
    let sessions = Arc::new(SessionStore::new(storage, config.session_ttl_days));
    sessions.subscribe(|event| tracing::info!(at = %event.at, "session changed"));

    let backend = Arc::new(GoTrueClient::new(
        &config.supabase.url,
        &config.supabase.anon_key,
    ));
    let coordinator = SessionCoordinator::new(sessions.clone(), backend, &config.synthetic_email_domain);

    if let Some(session) = sessions.get() {
        println!("already logged in as {} ({})", session.user_name, session.user_id);
        print!("log out? [y/N] ");
        if read_line()?.eq_ignore_ascii_case("y") {
            coordinator.clear_session().await;
        } else {
            return Ok(());
        }
    }

    let mut flow = AuthFlow::new(users, coordinator, config.master_account());
    loop {
        if let Some(error) = flow.error() {
            println!("! {error}");
        }
        match flow.step() {
            FlowStep::CheckIdentifier => {
                print!("ID or email: ");
                let input = read_line()?;
                let method = if input.contains('@') {
                    LookupMethod::Email
                } else {
                    LookupMethod::PhoneId
                };
                flow.submit_identifier(&input, method).await;
            }
            FlowStep::CreatePassword => {
                println!("first login: choose a password");
                print!("password: ");
                let password = read_line()?;
                print!("confirm: ");
                let confirm = read_line()?;
                flow.create_password(&password, &confirm).await;
            }
            FlowStep::EnterPassword => {
                print!("password: ");
                let password = read_line()?;
                flow.enter_password(&password).await;
            }
            FlowStep::Authenticated => {
                let session = flow
                    .coordinator()
                    .store()
                    .get()
                    .ok_or_else(|| anyhow::anyhow!("authenticated but no local session"))?;
                println!(
                    "welcome, {} (session valid until {})",
                    session.user_name, session.expires_at
                );
                return Ok(());
            }
        }
    }
}

fn read_line() -> anyhow::Result<String> {
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
