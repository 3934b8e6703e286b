//! API token and superuser provisioning inside the NetBox container.
//!
//! Administrative actions run as fixed Django shell scripts through
//! `docker exec`. Parameters are passed as environment variables and read
//! by the script with `os.environ`, so no value is ever spliced into code.

use tracing::{debug, info, warn};

use super::retry::{poll, PollOutcome, RetryPolicy};
use crate::docker::{CommandOutput, DockerCli};
use crate::error::{DockerError, ProvisionError, Result};

/// Label identifying the token owned by the manager.
pub const TOKEN_LABEL: &str = "slurpit";

/// Marks the one stdout line that carries a token. The Django shell may
/// print its own lines around script output.
pub const TOKEN_LINE_PREFIX: &str = "NBM_TOKEN=";

/// Interpreter inside the NetBox image.
const PYTHON: &str = "/opt/netbox/venv/bin/python";

/// Django management entry point inside the NetBox image.
const MANAGE_PY: &str = "/opt/netbox/netbox/manage.py";

const ENV_TOKEN_LABEL: &str = "NBM_TOKEN_LABEL";
const ENV_SUPERUSER_NAME: &str = "NBM_SUPERUSER_NAME";
const ENV_SUPERUSER_EMAIL: &str = "NBM_SUPERUSER_EMAIL";
const ENV_SUPERUSER_PASSWORD: &str = "NBM_SUPERUSER_PASSWORD";

const FIND_TOKEN: &str = r#"# netbox-manager: find-token
import os
from django.contrib.auth import get_user_model
from users.models import Token

user = get_user_model().objects.filter(is_superuser=True).order_by("pk").first()
if user is None:
    raise SystemExit("no superuser yet")
token = Token.objects.filter(user=user, description=os.environ["NBM_TOKEN_LABEL"]).order_by("pk").first()
if token is not None:
    print("NBM_TOKEN=" + token.key)
"#;

const CREATE_TOKEN: &str = r#"# netbox-manager: create-token
import os
from django.contrib.auth import get_user_model
from users.models import Token

label = os.environ["NBM_TOKEN_LABEL"]
user = get_user_model().objects.filter(is_superuser=True).order_by("pk").first()
if user is None:
    raise SystemExit("no superuser yet")
token = Token.objects.filter(user=user, description=label).order_by("pk").first()
if token is None:
    token = Token.objects.create(user=user, description=label, write_enabled=True)
print("NBM_TOKEN=" + token.key)
"#;

const ENSURE_SUPERUSER: &str = r#"# netbox-manager: ensure-superuser
import os
from django.contrib.auth import get_user_model

User = get_user_model()
name = os.environ["NBM_SUPERUSER_NAME"]
if User.objects.filter(username=name).exists():
    print("exists")
else:
    User.objects.create_superuser(name, os.environ["NBM_SUPERUSER_EMAIL"], os.environ["NBM_SUPERUSER_PASSWORD"])
    print("created")
"#;

/// Fixed administrative scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminScript {
    /// Prints the labelled token of the first superuser as a
    /// [`TOKEN_LINE_PREFIX`] line, or no such line.
    FindToken,
    /// Creates the labelled token unless it exists, then prints it.
    CreateToken,
    /// Creates the configured superuser unless it exists.
    EnsureSuperuser,
}

impl AdminScript {
    /// Short name for logs and errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::FindToken => "find-token",
            Self::CreateToken => "create-token",
            Self::EnsureSuperuser => "ensure-superuser",
        }
    }

    /// Python source.
    #[must_use]
    pub const fn source(self) -> &'static str {
        match self {
            Self::FindToken => FIND_TOKEN,
            Self::CreateToken => CREATE_TOKEN,
            Self::EnsureSuperuser => ENSURE_SUPERUSER,
        }
    }
}

/// Extracts the token from script output: the last line starting with
/// [`TOKEN_LINE_PREFIX`], control characters removed, restricted to a
/// non-empty `[A-Za-z0-9_-]+`. Any other line is shell noise.
#[must_use]
pub fn sanitize_token_output(stdout: &str) -> Option<String> {
    let line = stdout
        .lines()
        .rev()
        .map(|l| l.chars().filter(|c| !c.is_control()).collect::<String>())
        .find(|l| l.trim().starts_with(TOKEN_LINE_PREFIX))?;

    let value = line.trim().strip_prefix(TOKEN_LINE_PREFIX)?;
    (!value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        .then(|| value.to_string())
}

/// Obtains the manager's API token from a running NetBox.
#[derive(Debug, Clone)]
pub struct TokenProvisioner {
    docker: DockerCli,
    policy: RetryPolicy,
}

impl TokenProvisioner {
    /// Creates a provisioner with the default budget.
    #[must_use]
    pub fn new(docker: DockerCli) -> Self {
        Self {
            docker,
            policy: RetryPolicy::token_default(),
        }
    }

    /// Overrides the polling budget.
    #[must_use]
    pub const fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the labelled token, creating it if the lookup finds none.
    ///
    /// An empty string means NetBox did not become queryable within the
    /// budget; the caller treats that as deferred.
    pub async fn ensure_token(&self, container: &str, label: &str) -> String {
        let what = format!("token lookup in {container}");
        match poll(&self.policy, &what, |_| self.attempt(container, label)).await {
            PollOutcome::Ready(token) => token,
            PollOutcome::TimedOut { attempts } => {
                warn!(
                    "NetBox did not answer the token lookup after {attempts} attempts (~{}s); will retry on next reconcile",
                    self.policy.budget().as_secs()
                );
                String::new()
            }
        }
    }

    /// Creates the superuser if missing. Returns whether it was created.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::AdminScriptFailed`] if the script fails.
    pub async fn ensure_superuser(&self, container: &str, name: &str, email: &str, password: &str) -> Result<bool> {
        let script = AdminScript::EnsureSuperuser;
        let env = [
            (ENV_SUPERUSER_NAME, name),
            (ENV_SUPERUSER_EMAIL, email),
            (ENV_SUPERUSER_PASSWORD, password),
        ];

        let output = self.run_script(container, script, &env).await?;
        if !output.success() {
            return Err(script_failed(script, &output).into());
        }

        let created = output.stdout.lines().any(|l| l.trim() == "created");
        if created {
            info!("Created NetBox superuser {name}");
        } else {
            debug!("NetBox superuser {name} already exists");
        }
        Ok(created)
    }

    async fn attempt(&self, container: &str, label: &str) -> Option<String> {
        let env = [(ENV_TOKEN_LABEL, label)];

        let found = self.ready_output(container, AdminScript::FindToken, &env).await?;
        if let Some(token) = sanitize_token_output(&found.stdout) {
            debug!("Reusing existing '{label}' token");
            return Some(token);
        }

        info!("No '{label}' token yet, creating one");
        let created = self.ready_output(container, AdminScript::CreateToken, &env).await?;
        sanitize_token_output(&created.stdout)
    }

    /// Runs a script; any failure is "not ready yet".
    async fn ready_output(&self, container: &str, script: AdminScript, env: &[(&str, &str)]) -> Option<CommandOutput> {
        match self.run_script(container, script, env).await {
            Ok(output) if output.success() => Some(output),
            Ok(output) => {
                debug!("{}", script_failed(script, &output));
                None
            }
            Err(e) => {
                debug!("{} could not run: {e}", script.name());
                None
            }
        }
    }

    async fn run_script(
        &self,
        container: &str,
        script: AdminScript,
        env: &[(&str, &str)],
    ) -> std::result::Result<CommandOutput, DockerError> {
        debug!("Running admin script {} in {container}", script.name());
        self.docker
            .exec(container, env, &[PYTHON, MANAGE_PY, "shell", "-c", script.source()])
            .await
    }
}

fn script_failed(script: AdminScript, output: &CommandOutput) -> ProvisionError {
    let message = output
        .stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("no output")
        .trim()
        .to_string();

    ProvisionError::AdminScriptFailed {
        script: script.name(),
        message,
    }
}
