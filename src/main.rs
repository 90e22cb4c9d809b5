use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgMatches, Command};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{
    io,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

mod app;
mod chat;
mod config;
mod logging;
mod store;
mod ui;

use app::App;
use chat::{Clock, OwnerRef, SystemClock};
use config::Config;
use store::{AppwriteClient, AppwriteStore, Identity, MemoryStore, Session};

const DRACONIC_LOGO: &str = r#"
 ____                            _
|  _ \ _ __ __ _  ___ ___  _ __ (_) ___
| | | | '__/ _` |/ __/ _ \| '_ \| |/ __|
| |_| | | | (_| | (_| (_) | | | | | (__
|____/|_|  \__,_|\___\___/|_| |_|_|\___|
"#;

fn show_startup_logo() {
    print!("\x1B[2J\x1B[1;1H");

    // Ember gradient, one color per line
    let lines: Vec<&str> = DRACONIC_LOGO.lines().collect();
    let colors = [
        "\x1B[38;5;52m",
        "\x1B[38;5;88m",
        "\x1B[38;5;124m",
        "\x1B[38;5;160m",
        "\x1B[38;5;196m",
        "\x1B[38;5;202m",
    ];

    for (i, line) in lines.iter().enumerate() {
        if i < colors.len() && !line.trim().is_empty() {
            println!("{}{}\x1B[0m", colors[i], line);
        } else {
            println!("{}", line);
        }
    }

    println!("\n\x1B[38;5;160m=== Draconic Chatroom - terminal client ===\x1B[0m");
    println!("\x1B[38;5;202mPress Enter to continue...\x1B[0m\n");

    let _ = std::io::Read::read(&mut std::io::stdin(), &mut [0u8; 1]);
}

fn cli() -> Command {
    Command::new("draconic")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Terminal client for the Draconic Chatroom")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Config file (default: <config dir>/draconic-chat/config.toml)"),
        )
        .arg(
            Arg::new("endpoint")
                .long("endpoint")
                .value_name("URL")
                .help("Appwrite API endpoint"),
        )
        .arg(
            Arg::new("project")
                .long("project")
                .value_name("PROJECT_ID")
                .help("Appwrite project id"),
        )
        .arg(
            Arg::new("email")
                .short('e')
                .long("email")
                .value_name("EMAIL")
                .env("DRACONIC_EMAIL")
                .help("Account email"),
        )
        .arg(
            Arg::new("password")
                .short('p')
                .long("password")
                .value_name("PASSWORD")
                .env("DRACONIC_PASSWORD")
                .hide_env_values(true)
                .help("Account password"),
        )
        .arg(
            Arg::new("register")
                .long("register")
                .action(clap::ArgAction::SetTrue)
                .requires("name")
                .help("Create the account before logging in"),
        )
        .arg(
            Arg::new("name")
                .long("name")
                .value_name("NAME")
                .help("Display name for --register"),
        )
        .arg(
            Arg::new("offline")
                .long("offline")
                .action(clap::ArgAction::SetTrue)
                .conflicts_with("register")
                .help("Chat against a local in-memory room as a guest"),
        )
        .arg(
            Arg::new("no-logo")
                .long("no-logo")
                .action(clap::ArgAction::SetTrue)
                .help("Skip startup logo"),
        )
}

fn load_config(matches: &ArgMatches) -> Result<Config> {
    let path = matches.get_one::<PathBuf>("config");
    let mut config = Config::load(path.map(|p| p.as_path()))?;

    if let Some(endpoint) = matches.get_one::<String>("endpoint") {
        config.endpoint = endpoint.clone();
    }
    if let Some(project) = matches.get_one::<String>("project") {
        config.project = project.clone();
    }
    config.validate()?;

    Ok(config)
}

/// Guest session against an in-memory room with a greeting already in it.
fn offline_session(clock: Arc<dyn Clock>) -> Session {
    let store = MemoryStore::new(clock);
    let keeper = OwnerRef::new("keeper");
    store.insert_profile(keeper.clone(), "The Keeper");
    store.seed(
        "Welcome to the offline roost. Messages here vanish when you leave.",
        Some(keeper),
    );

    Session::new(Identity::guest(), Arc::new(store))
}

async fn hosted_session(
    matches: &ArgMatches,
    config: &Config,
) -> Result<(Session, AppwriteClient)> {
    let email = matches
        .get_one::<String>("email")
        .ok_or_else(|| anyhow!("--email is required unless --offline is given"))?;
    let password = matches
        .get_one::<String>("password")
        .ok_or_else(|| anyhow!("--password (or DRACONIC_PASSWORD) is required"))?;

    let client = AppwriteClient::new(&config.endpoint, &config.project)
        .context("Failed to build HTTP client")?;

    let identity = if matches.get_flag("register") {
        let name = matches
            .get_one::<String>("name")
            .ok_or_else(|| anyhow!("--name is required with --register"))?;
        Identity::register(&client, email, password, name).await?
    } else {
        Identity::login(&client, email, password).await?
    };
    tracing::info!(user = %identity.user_id, "logged in");

    let store = AppwriteStore::new(
        client.clone(),
        &config.database,
        &config.messages_collection,
        &config.accounts_collection,
    );

    // Without a profile document other members only see a truncated id.
    match store.ensure_profile(&identity).await {
        Ok(true) => tracing::info!(user = %identity.user_id, "created profile document"),
        Ok(false) => {}
        Err(e) => tracing::warn!(error = %e, "could not provision profile document"),
    }

    Ok((Session::new(identity, Arc::new(store)), client))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let config = load_config(&matches)?;
    logging::init(&config.log_path())?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (session, account_client) = if matches.get_flag("offline") {
        (offline_session(Arc::clone(&clock)), None)
    } else {
        let (session, client) = hosted_session(&matches, &config).await?;
        (session, Some(client))
    };

    if !matches.get_flag("no-logo") {
        show_startup_logo();
    }

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(session, clock, config.sync_config(), account_client);
    let res = run_app(&mut terminal, &mut app).await;
    app.sync.teardown();

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        tracing::error!(error = ?err, "client exited with an error");
        println!("Error: {:?}", err);
    }

    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> Result<()> {
    let mut last_tick = Instant::now();
    let tick_rate = Duration::from_millis(250);

    loop {
        terminal.draw(|f| ui::draw(f, app))?;

        let timeout_duration = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));

        if event::poll(timeout_duration)? {
            let event = event::read()?;
            app.handle_input(event).await?;
        }

        if last_tick.elapsed() >= tick_rate {
            app.on_tick();
            last_tick = Instant::now();
        }

        if app.should_quit {
            return Ok(());
        }
    }
}
