//! The interactive shell
//!
//! The shell is only reachable by a logged-in user. It secures the session
//! before showing anything, and whenever the session is found to be
//! unauthenticated between commands, such as after `logout` or when the
//! identity provider refused to refresh it, it starts a new login right away.
//! A rejected login is only asked for again when the user is typing the
//! credentials; configured credentials end the shell instead.

use std::{
    error, fmt,
    io::{self, Write},
    str::FromStr,
    sync::Arc,
};

use async_trait::async_trait;
use carlot_api::{ApiError, Car, CarId, CarsApi};
use carlot_auth::{
    AuthError, ClientIdRef, Credentials, LoginPrompt, Password, Session, SessionProvider,
    Username,
};
use thiserror::Error;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin},
    sync::Mutex,
};

use crate::views::{parse_price, AdminView, CarField, CarsView, FieldError};

const HELP: &str = "\
commands:
  list                         show all cars
  add <name> <color> <price>   add a car
  edit <id>                    start editing a car
  set <name|color|price> <v>   change a field of the car being edited
  save                         save the car being edited
  cancel                       stop editing without saving
  delete <id>                  remove a car
  admin                        show the administrator greeting
  whoami                       show who is logged in
  logout                       end the session
  quit                         leave the shell";

/// Lines of input shared between the shell and the login prompt
pub struct LineInput<R> {
    inner: Arc<Mutex<R>>,
}

impl<R> Clone for LineInput<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R> fmt::Debug for LineInput<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineInput").finish_non_exhaustive()
    }
}

impl LineInput<BufReader<Stdin>> {
    /// Reads lines from standard input
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin> LineInput<R> {
    /// Reads lines from `reader`
    pub fn new(reader: R) -> Self {
        Self {
            inner: Arc::new(Mutex::new(reader)),
        }
    }

    /// The next line without its line ending, or `None` at end of input
    pub async fn next_line(&self) -> io::Result<Option<String>> {
        let mut line = String::new();
        let read = self.inner.lock().await.read_line(&mut line).await?;
        if read == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }
}

/// Answers login prompts from configuration, asking on the terminal for
/// anything that was not configured
#[derive(Debug)]
pub struct TerminalPrompt<R> {
    username: Option<Username>,
    password: Option<Password>,
    input: LineInput<R>,
}

impl<R> TerminalPrompt<R> {
    /// Constructs a prompt with the configured credentials, if any
    pub fn new(username: Option<Username>, password: Option<Password>, input: LineInput<R>) -> Self {
        Self {
            username,
            password,
            input,
        }
    }
}

impl<R: AsyncBufRead + Unpin + Send> TerminalPrompt<R> {
    async fn ask(&self, label: &str) -> Result<String, Box<dyn error::Error + Send + Sync>> {
        eprint!("{label}: ");
        io::stderr().flush()?;
        match self.input.next_line().await? {
            Some(line) if !line.is_empty() => Ok(line),
            Some(_) => Err(format!("no {label} given").into()),
            None => Err(format!("input ended before a {label} was given").into()),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> LoginPrompt for TerminalPrompt<R> {
    async fn credentials(
        &mut self,
    ) -> Result<Credentials, Box<dyn error::Error + Send + Sync + 'static>> {
        let username = match &self.username {
            Some(username) => username.clone(),
            None => Username::from(self.ask("username").await?),
        };
        let password = match &self.password {
            Some(password) => password.clone(),
            None => Password::from(self.ask("password").await?),
        };
        Ok(Credentials { username, password })
    }

    fn is_interactive(&self) -> bool {
        self.username.is_none() || self.password.is_none()
    }
}

/// A line entered in the shell
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Show all cars
    List,
    /// Add a car
    Add(Car),
    /// Start editing a car
    Edit(CarId),
    /// Change a field of the car being edited
    Set(CarField, String),
    /// Save the car being edited
    Save,
    /// Stop editing
    Cancel,
    /// Remove a car
    Delete(CarId),
    /// Show the administrator greeting
    Admin,
    /// Show who is logged in
    Whoami,
    /// End the session
    Logout,
    /// Show the available commands
    Help,
    /// Leave the shell
    Quit,
}

/// A line that is not a valid command
#[derive(Debug, Error)]
pub enum CommandError {
    /// No such command
    #[error("unknown command `{0}`; type `help` for a list of commands")]
    Unknown(String),
    /// The command was given the wrong arguments
    #[error("usage: {0}")]
    Usage(&'static str),
    /// A field edit was invalid
    #[error(transparent)]
    Field(#[from] FieldError),
}

fn parse_id(id: &str, usage: &'static str) -> Result<CarId, CommandError> {
    id.parse().map_err(|_| CommandError::Usage(usage))
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let command = words.next().unwrap_or_default();
        let rest: Vec<&str> = words.collect();

        let parsed = match (command, rest.as_slice()) {
            ("list" | "ls", []) => Self::List,
            ("add", [name, color, price]) => Self::Add(Car::new(*name, *color, parse_price(price)?)),
            ("add", _) => return Err(CommandError::Usage("add <name> <color> <price>")),
            ("edit", [id]) => Self::Edit(parse_id(id, "edit <id>")?),
            ("edit", _) => return Err(CommandError::Usage("edit <id>")),
            ("set", [field, value @ ..]) if !value.is_empty() => {
                let field: CarField = field.parse()?;
                let value = value.join(" ");
                if field == CarField::Price {
                    parse_price(&value)?;
                }
                Self::Set(field, value)
            }
            ("set", _) => return Err(CommandError::Usage("set <name|color|price> <value>")),
            ("save", []) => Self::Save,
            ("cancel", []) => Self::Cancel,
            ("delete" | "rm", [id]) => Self::Delete(parse_id(id, "delete <id>")?),
            ("delete" | "rm", _) => return Err(CommandError::Usage("delete <id>")),
            ("admin", []) => Self::Admin,
            ("whoami", []) => Self::Whoami,
            ("logout", []) => Self::Logout,
            ("help" | "?", _) => Self::Help,
            ("quit" | "exit", []) => Self::Quit,
            (other, _) => return Err(CommandError::Unknown(other.to_owned())),
        };

        Ok(parsed)
    }
}

/// An error that ends the shell
#[derive(Debug, Error)]
pub enum AppError {
    /// The user could not be logged in
    #[error("unable to log in")]
    Login(#[from] AuthError),
    /// Reading input or writing output failed
    #[error("terminal input/output failed")]
    Io(#[from] io::Error),
}

/// Describes who the session belongs to
pub fn describe_session(session: &Session, client_id: &ClientIdRef) -> String {
    if !session.authenticated() {
        return "not logged in".to_owned();
    }

    match session.token_claims() {
        Some(claims) => {
            let name = claims.display_name().unwrap_or("unknown user");
            let roles: Vec<&str> = claims.roles(client_id).into_iter().collect();
            if roles.is_empty() {
                format!("logged in as {name}")
            } else {
                format!("logged in as {name} (roles: {})", roles.join(", "))
            }
        }
        None => "logged in (token carries no user details)".to_owned(),
    }
}

struct Chain<'a>(&'a (dyn error::Error + 'static));

impl fmt::Display for Chain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(error) = source {
            write!(f, ": {error}")?;
            source = error.source();
        }
        Ok(())
    }
}

/// The interactive shell over the cars API
#[derive(Debug)]
pub struct App<P, R, W> {
    provider: SessionProvider<P>,
    api: Arc<CarsApi>,
    client_id: carlot_auth::ClientId,
    input: LineInput<R>,
    out: W,
}

impl<P, R, W> App<P, R, W>
where
    P: LoginPrompt,
    R: AsyncBufRead + Unpin,
    W: Write,
{
    /// Constructs the shell
    ///
    /// `provider` must provide the session `api` authenticates with.
    pub fn new(
        provider: SessionProvider<P>,
        api: Arc<CarsApi>,
        client_id: impl Into<carlot_auth::ClientId>,
        input: LineInput<R>,
        out: W,
    ) -> Self {
        Self {
            provider,
            api,
            client_id: client_id.into(),
            input,
            out,
        }
    }

    /// Runs the shell until the user quits or input ends
    pub async fn run(mut self) -> Result<(), AppError> {
        let secured = self.provider.secure().await?;
        self.greet()?;

        let cars = CarsView::mount(&secured, self.api.clone()).await;
        let admin = AdminView::mount(&secured, self.api.clone()).await;
        self.print_cars(&cars)?;

        loop {
            if !self.provider.session().authenticated() {
                writeln!(self.out, "not logged in, starting login")?;
                match self.provider.secure().await {
                    Ok(_) => self.greet()?,
                    Err(error @ AuthError::Rejected { .. }) => {
                        writeln!(self.out, "login failed: {}", Chain(&error))?;
                        if !self.provider.prompt().is_interactive() {
                            return Err(error.into());
                        }
                        continue;
                    }
                    Err(error) => return Err(error.into()),
                }
            }

            write!(self.out, "> ")?;
            self.out.flush()?;
            let line = match self.input.next_line().await? {
                Some(line) => line,
                None => break,
            };
            if line.trim().is_empty() {
                continue;
            }

            match line.parse::<Command>() {
                Ok(Command::Quit) => break,
                Ok(command) => self.execute(command, &cars, &admin).await?,
                Err(error) => writeln!(self.out, "{error}")?,
            }
        }

        Ok(())
    }

    fn greet(&mut self) -> io::Result<()> {
        let description = describe_session(self.provider.session(), &self.client_id);
        writeln!(self.out, "{description}")
    }

    fn print_cars(&mut self, cars: &CarsView) -> io::Result<()> {
        let state = cars.snapshot();
        if state.cars.is_empty() {
            writeln!(self.out, "no cars")?;
        }
        for car in &state.cars {
            writeln!(self.out, "{car}")?;
        }
        if let Some(editing) = &state.editing {
            writeln!(self.out, "editing: {editing}")?;
        }
        Ok(())
    }

    fn report(&mut self, error: &ApiError) -> io::Result<()> {
        writeln!(self.out, "error: {}", Chain(error))?;
        if error.requires_login() {
            writeln!(self.out, "the session has ended")?;
        }
        Ok(())
    }

    async fn execute(
        &mut self,
        command: Command,
        cars: &CarsView,
        admin: &AdminView,
    ) -> Result<(), AppError> {
        tracing::debug!(?command, "executing command");
        match command {
            Command::List => match cars.reload().await {
                Ok(()) => self.print_cars(cars)?,
                Err(error) => self.report(&error)?,
            },
            Command::Add(car) => {
                cars.set_new_car(car);
                match cars.create().await {
                    Ok(()) => self.print_cars(cars)?,
                    Err(error) => self.report(&error)?,
                }
            }
            Command::Edit(id) => {
                if cars.start_edit(id) {
                    self.print_editing(cars)?;
                } else {
                    writeln!(self.out, "no car with id {id}")?;
                }
            }
            Command::Set(field, value) => match cars.edit_target(field, &value) {
                Ok(()) => self.print_editing(cars)?,
                Err(error) => writeln!(self.out, "{error}")?,
            },
            Command::Save => match cars.save_edit().await {
                Ok(true) => self.print_cars(cars)?,
                Ok(false) => writeln!(self.out, "no car is being edited")?,
                Err(error) => self.report(&error)?,
            },
            Command::Cancel => {
                cars.cancel_edit();
                writeln!(self.out, "edit cancelled")?;
            }
            Command::Delete(id) => match cars.delete(id).await {
                Ok(()) => self.print_cars(cars)?,
                Err(error) => self.report(&error)?,
            },
            Command::Admin => match admin.refresh().await {
                Ok(()) => {
                    let message = admin.message().unwrap_or_default();
                    writeln!(self.out, "{message}")?;
                }
                Err(error) => self.report(&error)?,
            },
            Command::Whoami => self.greet()?,
            Command::Logout => match cars.logout().await {
                Ok(()) => writeln!(self.out, "logged out")?,
                Err(error) => writeln!(self.out, "logout failed: {}", Chain(&error))?,
            },
            Command::Help => writeln!(self.out, "{HELP}")?,
            Command::Quit => {}
        }
        Ok(())
    }

    fn print_editing(&mut self, cars: &CarsView) -> io::Result<()> {
        if let Some(editing) = cars.snapshot().editing {
            writeln!(self.out, "editing: {editing}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use carlot_api::fake::{FakeCarsServer, ADMIN_MESSAGE};
    use carlot_auth::{
        AccessToken, AuthClient, FixedCredentials, InMemoryAuthClient, SessionIdentity,
        SessionStatus, TokenClaims, TokenSet,
    };
    use carlot_clock::DurationSecs;
    use reqwest_middleware::Middleware;
    use tokio::sync::watch;
    use url::Url;

    use super::*;

    mod parsing {
        use super::*;

        #[test]
        fn add_takes_name_color_and_price() {
            assert_eq!(
                "add Civic blue 20000".parse::<Command>().unwrap(),
                Command::Add(Car::new("Civic", "blue", 20000.0))
            );
            assert!(matches!(
                "add Civic blue cheap".parse::<Command>(),
                Err(CommandError::Field(FieldError::Price(_)))
            ));
            assert!(matches!(
                "add Civic blue NaN".parse::<Command>(),
                Err(CommandError::Field(FieldError::PriceNotFinite(_)))
            ));
            assert!(matches!(
                "add Civic".parse::<Command>(),
                Err(CommandError::Usage(_))
            ));
        }

        #[test]
        fn set_joins_the_value() {
            assert_eq!(
                "set name Model T".parse::<Command>().unwrap(),
                Command::Set(CarField::Name, "Model T".to_owned())
            );
            assert!(matches!(
                "set price lots".parse::<Command>(),
                Err(CommandError::Field(FieldError::Price(_)))
            ));
            assert!(matches!(
                "set price inf".parse::<Command>(),
                Err(CommandError::Field(FieldError::PriceNotFinite(_)))
            ));
            assert!(matches!(
                "set wheels 4".parse::<Command>(),
                Err(CommandError::Field(FieldError::Unknown(_)))
            ));
        }

        #[test]
        fn ids_must_be_numbers() {
            assert_eq!("delete 3".parse::<Command>().unwrap(), Command::Delete(3));
            assert!(matches!(
                "edit three".parse::<Command>(),
                Err(CommandError::Usage("edit <id>"))
            ));
            assert!(matches!(
                "edit 1 2".parse::<Command>(),
                Err(CommandError::Usage("edit <id>"))
            ));
        }

        #[test]
        fn unknown_commands_are_named() {
            let error = "fly away".parse::<Command>().unwrap_err();
            assert!(error.to_string().contains("`fly`"));
        }
    }

    fn api_for(session: &Session, server: &Arc<FakeCarsServer>) -> Arc<CarsApi> {
        let layer: Arc<dyn Middleware> = server.clone();
        Arc::new(CarsApi::with_middleware(
            reqwest::Client::new(),
            Url::parse("http://localhost:1291").unwrap(),
            session.clone(),
            [layer],
        ))
    }

    async fn shell<P: LoginPrompt>(
        session: Session,
        prompt: P,
        input: LineInput<&'static [u8]>,
        server: &Arc<FakeCarsServer>,
    ) -> (Result<(), AppError>, String) {
        let api = api_for(&session, server);
        let provider = SessionProvider::new(session, prompt);
        let mut out = Vec::new();

        let result = App::new(provider, api, "react-app", input, &mut out)
            .run()
            .await;

        (result, String::from_utf8(out).unwrap())
    }

    async fn run_shell(script: &'static str, server: &Arc<FakeCarsServer>, token: &str) -> String {
        let session = Session::new(InMemoryAuthClient::new(token));
        let prompt = FixedCredentials(Credentials::new("alice", "secret"));

        let (result, output) = shell(session, prompt, LineInput::new(script.as_bytes()), server).await;
        result.unwrap();
        output
    }

    /// Accepts the first login and rejects every later one
    #[derive(Debug)]
    struct FirstLoginOnly {
        inner: InMemoryAuthClient,
        logins: AtomicUsize,
    }

    impl FirstLoginOnly {
        fn new(token: &str) -> Arc<Self> {
            Arc::new(Self {
                inner: InMemoryAuthClient::new(token),
                logins: AtomicUsize::new(0),
            })
        }

        fn logins(&self) -> usize {
            self.logins.load(Ordering::Acquire)
        }
    }

    #[async_trait]
    impl AuthClient for FirstLoginOnly {
        async fn login(&self, credentials: &Credentials) -> Result<(), AuthError> {
            if self.logins.fetch_add(1, Ordering::AcqRel) > 0 {
                return Err(AuthError::Rejected {
                    status: 401,
                    error: "invalid_grant".to_owned(),
                    description: Some("Invalid user credentials".to_owned()),
                });
            }
            self.inner.login(credentials).await
        }

        async fn logout(&self) -> Result<(), AuthError> {
            self.inner.logout().await
        }

        async fn update_token(&self, min_validity: DurationSecs) -> Result<AccessToken, AuthError> {
            self.inner.update_token(min_validity).await
        }

        fn restore(&self, tokens: TokenSet) {
            self.inner.restore(tokens)
        }

        fn status(&self) -> SessionStatus {
            self.inner.status()
        }

        fn token(&self) -> Option<AccessToken> {
            self.inner.token()
        }

        fn tokens(&self) -> Option<Arc<TokenSet>> {
            self.inner.tokens()
        }

        fn token_claims(&self) -> Option<Arc<TokenClaims>> {
            self.inner.token_claims()
        }

        fn subscribe(&self) -> watch::Receiver<SessionIdentity> {
            self.inner.subscribe()
        }
    }

    mod when_login_is_rejected {
        use super::*;

        #[tokio::test]
        async fn configured_credentials_end_the_shell() {
            let server = Arc::new(FakeCarsServer::new("user-token"));
            let client = FirstLoginOnly::new("user-token");
            let session = Session::from_arc(client.clone());
            let prompt = FixedCredentials(Credentials::new("alice", "secret"));
            let input = LineInput::new("logout\nlist\nquit\n".as_bytes());

            let (result, output) = tokio::time::timeout(
                Duration::from_secs(5),
                shell(session, prompt, input, &server),
            )
            .await
            .unwrap();

            assert!(matches!(
                result,
                Err(AppError::Login(AuthError::Rejected { .. }))
            ));
            assert!(output.contains("login failed"));
            assert_eq!(client.logins(), 2);
        }

        #[tokio::test]
        async fn typed_credentials_are_asked_for_again() {
            let server = Arc::new(FakeCarsServer::new("user-token"));
            let client = FirstLoginOnly::new("user-token");
            let session = Session::from_arc(client.clone());
            let script = "alice\nsecret\nlogout\nbob\nwrong\nbob\nagain\n";
            let input = LineInput::new(script.as_bytes());
            let prompt = TerminalPrompt::new(None, None, input.clone());

            let (result, output) = tokio::time::timeout(
                Duration::from_secs(5),
                shell(session, prompt, input, &server),
            )
            .await
            .unwrap();

            assert!(matches!(result, Err(AppError::Login(AuthError::Prompt(_)))));
            assert_eq!(output.matches("login failed").count(), 2);
            assert_eq!(client.logins(), 3);
        }
    }

    #[tokio::test]
    async fn civic_lifecycle_through_the_shell() {
        let server = Arc::new(FakeCarsServer::new("user-token"));
        let script = "add Civic blue 20000\nedit 1\nset price 21000\nsave\ndelete 1\nquit\n";

        let output = run_shell(script, &server, "user-token").await;

        assert!(output.contains("[1] Civic - blue | Price: 20000"));
        assert!(output.contains("[1] Civic - blue | Price: 21000"));
        assert!(output.contains("no cars"));
        assert!(server.cars().is_empty());
    }

    #[tokio::test]
    async fn logout_logs_in_again_before_the_next_command() {
        let server = Arc::new(FakeCarsServer::new("user-token"));

        let output = run_shell("logout\nlist\n", &server, "user-token").await;

        assert!(output.contains("logged out"));
        assert!(output.contains("not logged in, starting login"));
        assert_eq!(output.matches("logged in (token carries no user details)").count(), 2);
    }

    #[tokio::test]
    async fn admin_greeting_is_shown_to_admins() {
        let server = Arc::new(FakeCarsServer::new("user-token").with_admin("admin-token"));

        let output = run_shell("admin\n", &server, "admin-token").await;

        assert!(output.contains(ADMIN_MESSAGE));
    }

    #[tokio::test]
    async fn forbidden_admin_greeting_is_reported() {
        let server = Arc::new(FakeCarsServer::new("user-token").with_admin("admin-token"));

        let output = run_shell("admin\n", &server, "user-token").await;

        assert!(output.contains("error: access to the resource is forbidden"));
    }

    #[tokio::test]
    async fn bad_lines_do_not_end_the_shell() {
        let server = Arc::new(FakeCarsServer::new("user-token"));

        let output = run_shell("frobnicate\nsave\nhelp\n", &server, "user-token").await;

        assert!(output.contains("unknown command `frobnicate`"));
        assert!(output.contains("no car is being edited"));
        assert!(output.contains("commands:"));
    }

    #[tokio::test]
    async fn terminal_prompt_reads_missing_credentials() {
        let input = LineInput::new("alice\nsecret\n".as_bytes());
        let mut prompt = TerminalPrompt::new(None, None, input);

        let credentials = prompt.credentials().await.unwrap();

        assert_eq!(credentials.username.as_str(), "alice");
        assert_eq!(credentials.password.as_str(), "secret");
    }

    #[test]
    fn terminal_prompt_is_interactive_unless_fully_configured() {
        let input = LineInput::new("".as_bytes());
        let configured = TerminalPrompt::new(
            Some(Username::from_static("alice")),
            Some(Password::from_static("secret")),
            input.clone(),
        );
        let asks_password = TerminalPrompt::new(Some(Username::from_static("alice")), None, input);

        assert!(!configured.is_interactive());
        assert!(asks_password.is_interactive());
    }

    #[tokio::test]
    async fn terminal_prompt_fails_at_end_of_input() {
        let input = LineInput::new("alice\n".as_bytes());
        let mut prompt = TerminalPrompt::new(None, None, input);

        assert!(prompt.credentials().await.is_err());
    }
}
