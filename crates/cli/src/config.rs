// CLI configuration: which services to talk to. Every field has a
// localhost default so the CLI works out of the box against a workspace
// started with the default ports; override per-field for anything else.

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub lease_manager_url: String,
    pub task_service_url: String,
    pub database_url: Option<String>,
}

impl CliConfig {
    /// | Variable | Default |
    /// |---|---|
    /// | `SERVICE_LEASES_URL` | `http://localhost:8080` |
    /// | `TASK_SERVICE_URL` | `http://localhost:8081` |
    /// | `DATABASE_URL` | *(unset; required only by `seed`)* |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        Self {
            lease_manager_url: env("SERVICE_LEASES_URL")
                .unwrap_or_else(|_| "http://localhost:8080".into()),
            task_service_url: env("TASK_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8081".into()),
            database_url: env("DATABASE_URL").ok(),
        }
    }
}
