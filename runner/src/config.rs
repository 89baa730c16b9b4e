use std::{
    env, io,
    path::{Path, PathBuf},
};

const SOCKET_ENV: &str = "RUNNER_SOCKET";

/// Immutable bootstrap settings for the runner binary.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    socket: PathBuf,
}

impl RunnerConfig {
    /// Creates a configuration pointing at the given host socket.
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    /// Reads the configuration from the environment.
    ///
    /// # Returns
    /// The configuration built from `RUNNER_SOCKET`.
    pub fn from_env() -> io::Result<Self> {
        let socket = env::var_os(SOCKET_ENV)
            .ok_or_else(|| io::Error::other(format!("{SOCKET_ENV} is not set")))?;
        Ok(Self::new(PathBuf::from(socket)))
    }

    /// The unix socket path of the host endpoint.
    pub fn socket(&self) -> &Path {
        &self.socket
    }
}
