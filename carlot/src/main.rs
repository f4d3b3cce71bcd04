use std::{io, sync::Arc};

use carlot::{
    app::{describe_session, App, LineInput, TerminalPrompt},
    config::Config,
    views::{parse_price, AdminView, CarField, CarsView},
};
use carlot_api::{Car, CarId, CarsApi};
use carlot_auth::{
    file::FileSessionStore,
    keycloak::KeycloakClient,
    ClientId, Session, SessionProvider,
};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, WrapErr};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Log in and keep the session in the session file
    Login,
    /// End the session and remove the session file
    Logout,
    /// Show who is logged in
    Whoami,
    /// Work with the cars
    Cars {
        #[command(subcommand)]
        command: CarsCommand,
    },
    /// Show the administrator greeting
    Admin,
    /// Start the interactive shell (the default)
    Shell,
}

#[derive(Debug, Subcommand)]
enum CarsCommand {
    /// List all cars
    List,
    /// Add a car
    Create {
        name: String,
        color: String,
        #[arg(value_parser = parse_price)]
        price: f64,
    },
    /// Change fields of a car
    Update {
        id: CarId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        color: Option<String>,
        #[arg(long, value_parser = parse_price)]
        price: Option<f64>,
    },
    /// Remove a car
    Delete { id: CarId },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    tracing::debug!(config = ?cli.config, "starting");

    let config = cli.config;
    let http = reqwest::Client::new();
    let session = Session::new(KeycloakClient::new(config.keycloak(), http.clone()));
    let store = config.session_file.as_ref().map(FileSessionStore::new);

    if let Some(store) = &store {
        if let Some(tokens) = store
            .load()
            .await
            .wrap_err("unable to read the session file")?
        {
            tracing::debug!("restoring saved session");
            session.restore(tokens);
        }
    }

    let api = Arc::new(CarsApi::with_client(
        http,
        config.api_url.clone(),
        session.clone(),
    ));
    let client_id = ClientId::from(config.client_id.clone());
    let input = LineInput::stdin();
    let prompt = TerminalPrompt::new(config.username(), config.password(), input.clone());
    let mut provider = SessionProvider::new(session.clone(), prompt);

    match cli.command.unwrap_or(Command::Shell) {
        Command::Logout => {
            if let Some(store) = &store {
                store
                    .clear()
                    .await
                    .wrap_err("unable to remove the session file")?;
            }
            if let Err(error) = session.logout().await {
                tracing::warn!(%error, "identity provider did not confirm the logout");
            }
            println!("logged out");
            return Ok(());
        }
        Command::Login | Command::Whoami => {
            provider.secure().await.wrap_err("unable to log in")?;
            println!("{}", describe_session(&session, &client_id));
        }
        Command::Cars { command } => {
            let secured = provider.secure().await.wrap_err("unable to log in")?;
            let view = CarsView::mount(&secured, api).await;
            run_cars(&view, command).await?;
        }
        Command::Admin => {
            let secured = provider.secure().await.wrap_err("unable to log in")?;
            let view = AdminView::mount(&secured, api).await;
            match view.message() {
                Some(message) => println!("{message}"),
                None => return Err(eyre!("the administrator greeting is not available")),
            }
        }
        Command::Shell => {
            App::new(provider, api, client_id, input, io::stdout())
                .run()
                .await?;
        }
    }

    if let Some(store) = &store {
        match session.tokens() {
            Some(tokens) => store
                .save(&tokens)
                .await
                .wrap_err("unable to write the session file")?,
            None => store
                .clear()
                .await
                .wrap_err("unable to remove the session file")?,
        }
    }

    Ok(())
}

async fn run_cars(view: &CarsView, command: CarsCommand) -> color_eyre::Result<()> {
    match command {
        // mounting fetched the list already; the failure itself was logged
        CarsCommand::List if view.snapshot().loaded_for.is_none() => {
            return Err(eyre!("unable to fetch the cars"));
        }
        CarsCommand::List => {}
        CarsCommand::Create { name, color, price } => {
            view.set_new_car(Car::new(name, color, price));
            view.create().await?;
        }
        CarsCommand::Update {
            id,
            name,
            color,
            price,
        } => {
            if !view.start_edit(id) {
                return Err(eyre!("no car with id {id}"));
            }
            let edits = [
                (CarField::Name, name),
                (CarField::Color, color),
                (CarField::Price, price.map(|p| p.to_string())),
            ];
            for (field, value) in edits {
                if let Some(value) = value {
                    view.edit_target(field, &value)?;
                }
            }
            view.save_edit().await?;
        }
        CarsCommand::Delete { id } => view.delete(id).await?,
    }

    for car in view.snapshot().cars {
        println!("{car}");
    }
    Ok(())
}
