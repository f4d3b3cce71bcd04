//! A local file holding a saved session

use std::{io, path::PathBuf};

use tokio::fs::{self, OpenOptions};

use crate::TokenSet;

/// Saves a session's tokens to a local file so that later runs can reuse them
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    /// Constructs a new store backed by the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loads a saved session, if one exists
    pub async fn load(&self) -> Result<Option<TokenSet>, io::Error> {
        use tokio::io::AsyncReadExt;

        let mut file = match OpenOptions::new().read(true).open(&self.path).await {
            Ok(file) => file,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error),
        };
        let mut data = String::new();
        file.read_to_string(&mut data).await?;
        let tokens = serde_json::from_str(&data)?;
        Ok(Some(tokens))
    }

    /// Saves the session, replacing any previously saved one
    pub async fn save(&self, tokens: &TokenSet) -> Result<(), io::Error> {
        use tokio::io::AsyncWriteExt;

        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts.open(&self.path).await?;
        let data = serde_json::to_string_pretty(tokens)?;
        file.write_all(data.as_bytes()).await?;
        file.flush().await?;
        tracing::debug!(path = %self.path.display(), "saved session");
        Ok(())
    }

    /// Removes any saved session
    pub async fn clear(&self) -> Result<(), io::Error> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "removed saved session");
                Ok(())
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use carlot_clock::DurationSecs;

    use super::*;
    use crate::{AccessToken, IdToken, RefreshToken, TokenLifetimeConfig};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("carlot-{}-{}.json", name, std::process::id()))
    }

    fn sample_tokens() -> TokenSet {
        let access = TokenLifetimeConfig::default().create_token(
            AccessToken::from_static("access"),
            None::<IdToken>,
            DurationSecs(300),
        );
        TokenSet::new(
            access,
            Some(RefreshToken::from_static("refresh")),
            None,
        )
    }

    #[tokio::test]
    async fn missing_file_loads_nothing() {
        let store = FileSessionStore::new(temp_path("missing"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn saved_session_can_be_loaded_and_cleared() {
        let store = FileSessionStore::new(temp_path("saved"));

        store.save(&sample_tokens()).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.access().access_token().as_str(), "access");
        assert_eq!(loaded.refresh_token().map(|t| t.as_str()), Some("refresh"));

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        store.clear().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn saved_session_is_private_to_the_user() {
        use std::os::unix::fs::PermissionsExt;

        let path = temp_path("private");
        let store = FileSessionStore::new(&path);
        store.save(&sample_tokens()).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        store.clear().await.unwrap();
    }
}
