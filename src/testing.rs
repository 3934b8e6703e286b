//! Test doubles for the Docker CLI and the upstream fetcher.
//!
//! [`FakeDocker`] answers the handful of `docker` and `docker compose`
//! invocations the manager makes from an in-memory model of containers,
//! networks and NetBox's token table, and records every command.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::compose::UpstreamFetcher;
use crate::docker::{CommandOutput, CommandRunner, CommandSpec};
use crate::error::{ComposeError, DockerError, Result};
use crate::provision::TOKEN_LINE_PREFIX;

/// A minimal upstream Slurp'it document.
pub const UPSTREAM_DOCUMENT: &str = "\
services:
  slurpit-warehouse:
    image: slurpit/warehouse:latest
  slurpit-scanner:
    image: slurpit/scanner:latest
  slurpit-scraper:
    image: slurpit/scraper:latest
  slurpit-portal:
    image: slurpit/portal:latest
    ports:
      - \"80:80\"
";

#[derive(Debug, Default)]
struct Container {
    service: String,
    networks: BTreeSet<String>,
}

#[derive(Debug)]
struct State {
    commands: Vec<CommandSpec>,
    containers: BTreeMap<String, Container>,
    networks: BTreeMap<String, String>,
    compose_v2: bool,
    compose_v1: bool,
    resolve_error: Option<String>,
    compose_failures: BTreeMap<String, String>,
    admin_ready: bool,
    superusers: BTreeSet<String>,
    tokens: BTreeMap<String, String>,
    shell_banner: String,
}

impl Default for State {
    fn default() -> Self {
        Self {
            commands: Vec::new(),
            containers: BTreeMap::new(),
            networks: BTreeMap::new(),
            compose_v2: true,
            compose_v1: false,
            resolve_error: None,
            compose_failures: BTreeMap::new(),
            admin_ready: false,
            superusers: BTreeSet::new(),
            tokens: BTreeMap::new(),
            shell_banner: String::new(),
        }
    }
}

/// In-memory Docker host.
#[derive(Debug, Clone, Default)]
pub struct FakeDocker {
    state: Arc<Mutex<State>>,
}

impl FakeDocker {
    /// An empty host with Compose v2 installed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A runner backed by this host.
    #[must_use]
    pub fn runner(&self) -> Arc<dyn CommandRunner> {
        Arc::new(self.clone())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Adds a running container for a Compose service.
    pub fn add_container(&self, service: &str, id: &str, networks: &[&str]) {
        self.lock().containers.insert(
            id.to_string(),
            Container {
                service: service.to_string(),
                networks: networks.iter().map(|n| (*n).to_string()).collect(),
            },
        );
    }

    /// Adds an existing network.
    pub fn add_network(&self, name: &str) {
        self.lock().networks.insert(name.to_string(), format!("net-{name}"));
    }

    /// Which Compose flavours answer `version`.
    pub fn set_compose_flavors(&self, v2: bool, v1: bool) {
        let mut state = self.lock();
        state.compose_v2 = v2;
        state.compose_v1 = v1;
    }

    /// Makes `compose config` fail with the given diagnostic.
    pub fn fail_resolve(&self, message: &str) {
        self.lock().resolve_error = Some(message.to_string());
    }

    /// Makes a Compose subcommand fail with the given stderr.
    pub fn fail_compose(&self, subcommand: &str, stderr: &str) {
        self.lock()
            .compose_failures
            .insert(subcommand.to_string(), stderr.to_string());
    }

    /// Whether NetBox answers administrative scripts.
    pub fn set_admin_ready(&self, ready: bool) {
        self.lock().admin_ready = ready;
    }

    /// Seeds an existing token.
    pub fn set_token(&self, label: &str, key: &str) {
        self.lock().tokens.insert(label.to_string(), key.to_string());
    }

    /// Text the Django shell prints before any script output.
    pub fn set_shell_banner(&self, banner: &str) {
        self.lock().shell_banner = banner.to_string();
    }

    /// Every command run so far.
    #[must_use]
    pub fn commands(&self) -> Vec<CommandSpec> {
        self.lock().commands.clone()
    }

    /// Compose invocations of a subcommand.
    #[must_use]
    pub fn compose_calls(&self, subcommand: &str) -> Vec<CommandSpec> {
        self.commands()
            .into_iter()
            .filter(|c| compose_args(c).is_some_and(|(sub, _)| sub == subcommand))
            .collect()
    }

    /// Number of `docker network create` calls.
    #[must_use]
    pub fn network_creates(&self) -> usize {
        self.count_docker(&["network", "create"])
    }

    /// Number of `docker network connect` calls.
    #[must_use]
    pub fn network_connects(&self) -> usize {
        self.count_docker(&["network", "connect"])
    }

    /// Number of runs of an administrative script, by name.
    #[must_use]
    pub fn script_runs(&self, name: &str) -> usize {
        let marker = format!("netbox-manager: {name}");
        self.commands()
            .iter()
            .filter(|c| c.args.first().map(String::as_str) == Some("exec"))
            .filter(|c| c.args.last().is_some_and(|script| script.contains(&marker)))
            .count()
    }

    /// Networks a container is attached to.
    #[must_use]
    pub fn container_networks(&self, id: &str) -> Vec<String> {
        self.lock()
            .containers
            .get(id)
            .map(|c| c.networks.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn count_docker(&self, prefix: &[&str]) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.program == "docker" && c.args.iter().map(String::as_str).take(prefix.len()).eq(prefix.iter().copied()))
            .count()
    }

    fn handle(&self, spec: &CommandSpec) -> std::result::Result<CommandOutput, DockerError> {
        let mut state = self.lock();
        state.commands.push(spec.clone());

        if spec.program == "docker-compose" {
            if !state.compose_v1 {
                return Err(DockerError::ExecFailed {
                    command: spec.display(),
                    message: String::from("No such file or directory"),
                });
            }
            return Ok(Self::compose(&state, spec));
        }

        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
        Ok(match args.as_slice() {
            ["compose", "version"] => {
                if state.compose_v2 {
                    CommandOutput::ok("Docker Compose version v2.29.1\n")
                } else {
                    CommandOutput::failed(1, "docker: 'compose' is not a docker command.")
                }
            }
            ["compose", ..] => Self::compose(&state, spec),
            ["inspect", .., container] => match state.containers.get(*container) {
                Some(c) => {
                    let networks: BTreeMap<&str, serde_json::Value> =
                        c.networks.iter().map(|n| (n.as_str(), serde_json::json!({}))).collect();
                    CommandOutput::ok(format!("{}\n", serde_json::json!(networks)))
                }
                None => CommandOutput::failed(1, format!("Error: No such object: {container}")),
            },
            ["network", "inspect", .., name] => match state.networks.get(*name) {
                Some(id) => CommandOutput::ok(format!("{id}\n")),
                None => CommandOutput::failed(1, format!("Error response from daemon: network {name} not found")),
            },
            ["network", "create", name] => {
                if state.networks.contains_key(*name) {
                    CommandOutput::failed(1, format!("network with name {name} already exists"))
                } else {
                    let id = format!("net-{name}");
                    state.networks.insert((*name).to_string(), id.clone());
                    CommandOutput::ok(format!("{id}\n"))
                }
            }
            ["network", "connect", network, container] => {
                let network = (*network).to_string();
                match state.containers.get_mut(*container) {
                    Some(c) if c.networks.contains(&network) => {
                        CommandOutput::failed(1, "endpoint already exists in network")
                    }
                    Some(c) => {
                        c.networks.insert(network);
                        CommandOutput::ok("")
                    }
                    None => CommandOutput::failed(1, format!("No such container: {container}")),
                }
            }
            ["exec", ..] => Self::exec(&mut state, spec),
            _ => CommandOutput::failed(127, format!("unsupported: {}", spec.display())),
        })
    }

    fn compose(state: &State, spec: &CommandSpec) -> CommandOutput {
        let Some((sub, rest)) = compose_args(spec) else {
            return CommandOutput::failed(1, "no subcommand");
        };

        if let Some(stderr) = state.compose_failures.get(&sub) {
            return CommandOutput::failed(1, stderr.clone());
        }

        match sub.as_str() {
            "config" => state
                .resolve_error
                .as_ref()
                .map_or_else(|| CommandOutput::ok(""), |e| CommandOutput::failed(15, e.clone())),
            "ps" if rest.iter().any(|a| a == "-q") => {
                let service = rest.last().cloned().unwrap_or_default();
                let ids: Vec<&str> = state
                    .containers
                    .iter()
                    .filter(|(_, c)| c.service == service)
                    .map(|(id, _)| id.as_str())
                    .collect();
                CommandOutput::ok(ids.iter().map(|id| format!("{id}\n")).collect::<String>())
            }
            "ps" if rest.iter().any(|a| a == "--services") => CommandOutput::ok(
                state
                    .containers
                    .values()
                    .map(|c| format!("{}\n", c.service))
                    .collect::<String>(),
            ),
            "ps" => CommandOutput::ok(
                state
                    .containers
                    .iter()
                    .map(|(id, c)| {
                        format!(
                            "{}\n",
                            serde_json::json!({
                                "Name": id,
                                "Service": c.service,
                                "State": "running",
                                "Health": "",
                                "Status": "Up 5 minutes",
                            })
                        )
                    })
                    .collect::<String>(),
            ),
            _ => CommandOutput::ok(""),
        }
    }

    fn exec(state: &mut State, spec: &CommandSpec) -> CommandOutput {
        let mut args = spec.args.iter().skip(1).peekable();
        while args.peek().is_some_and(|a| a.starts_with('-')) {
            let flag = args.next().map(String::as_str);
            if flag == Some("-e") {
                args.next();
            }
        }

        let Some(container) = args.next() else {
            return CommandOutput::failed(1, "no container");
        };
        if !state.containers.contains_key(container) {
            return CommandOutput::failed(1, format!("Error: No such container: {container}"));
        }

        let script = spec.args.last().cloned().unwrap_or_default();
        let env = |key: &str| {
            spec.envs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        };

        let is = |name: &str| script.contains(&format!("netbox-manager: {name}"));
        if !(is("find-token") || is("create-token") || is("ensure-superuser")) {
            return CommandOutput::ok("");
        }

        if !state.admin_ready {
            return CommandOutput::failed(1, "django.db.utils.OperationalError: connection refused");
        }

        let banner = state.shell_banner.clone();
        if is("ensure-superuser") {
            let created = state.superusers.insert(env("NBM_SUPERUSER_NAME"));
            return CommandOutput::ok(format!("{banner}{}\n", if created { "created" } else { "exists" }));
        }

        let label = env("NBM_TOKEN_LABEL");
        if is("find-token") {
            let found = state
                .tokens
                .get(&label)
                .map(|t| format!("{TOKEN_LINE_PREFIX}{t}\n"))
                .unwrap_or_default();
            return CommandOutput::ok(format!("{banner}{found}"));
        }

        let next = state.tokens.len() + 1;
        let token = state
            .tokens
            .entry(label)
            .or_insert_with(|| format!("0123456789abcdef{next:04}"))
            .clone();
        CommandOutput::ok(format!("{banner}{TOKEN_LINE_PREFIX}{token}\n"))
    }
}

/// Splits a Compose invocation into its subcommand and the arguments after it.
fn compose_args(spec: &CommandSpec) -> Option<(String, Vec<String>)> {
    let mut args = spec.args.iter();
    if spec.program == "docker" && args.next().map(String::as_str) != Some("compose") {
        return None;
    }
    if spec.program != "docker" && spec.program != "docker-compose" {
        return None;
    }

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--project-directory" | "-f" => {
                args.next();
            }
            sub => return Some((sub.to_string(), args.cloned().collect())),
        }
    }
    None
}

#[async_trait]
impl CommandRunner for FakeDocker {
    async fn run(&self, spec: &CommandSpec) -> std::result::Result<CommandOutput, DockerError> {
        self.handle(spec)
    }
}

/// Fetcher that returns a fixed body or a fixed failure.
#[derive(Debug)]
pub struct StaticFetcher {
    body: std::result::Result<String, String>,
    calls: AtomicUsize,
}

impl StaticFetcher {
    /// Always returns `body`.
    #[must_use]
    pub fn ok(body: &str) -> Self {
        Self {
            body: Ok(body.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always fails with `message`.
    #[must_use]
    pub fn failing(message: &str) -> Self {
        Self {
            body: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of fetches so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.body.clone().map_err(|message| {
            ComposeError::FetchFailed {
                url: url.to_string(),
                message,
            }
            .into()
        })
    }
}
