//! Document renderers.
//!
//! Pure functions from [`DeploymentSettings`] to [`ComposeDocument`]s and
//! build-context files. Nothing here touches the filesystem.

use std::collections::BTreeMap;

use super::model::{escape_interpolation, Build, ComposeDocument, DependsOn, HealthCheck, Network, Service, Volume};
use super::layout::{PLUGIN_DOCKERFILE, SLURPIT_DATA_DIR};
use crate::config::{keys, DeploymentSettings};

/// Header placed at the top of every generated file.
pub const MANAGED_HEADER: &str =
    "Managed by netbox-manager. Manual changes are overwritten on the next reconcile.";

/// Name of the network shared by NetBox and Slurp'it.
pub const SHARED_NETWORK: &str = "netbox-slurpit";

/// The NetBox web service.
pub const PRIMARY_SERVICE: &str = "netbox";

/// NetBox services that run the plugin-enabled image.
pub const PRIMARY_SERVICES: &[&str] = &[PRIMARY_SERVICE, "netbox-worker", "netbox-housekeeping"];

/// Image tag built from `Dockerfile-Plugins`.
pub const PLUGIN_IMAGE: &str = "netbox:latest-plugins";

/// Port NetBox listens on inside its container.
pub const PRIMARY_INTERNAL_PORT: u16 = 8080;

/// The Slurp'it web portal.
pub const PORTAL_SERVICE: &str = "slurpit-portal";

/// Slurp'it services inlined by `clean` and `upstream-exact`, in start order.
pub const SLURPIT_SERVICES: &[&str] = &[
    MARIADB_SERVICE,
    MONGODB_SERVICE,
    WAREHOUSE_SERVICE,
    SCANNER_SERVICE,
    SCRAPER_SERVICE,
    PORTAL_SERVICE,
];

/// Host directories bind-mounted by `upstream-exact`, relative to the project.
pub const EXACT_HOST_DIRS: &[&str] = &[
    "slurpit/db/mariadb",
    "slurpit/db/mongodb",
    "slurpit/certs",
    "slurpit/logs/warehouse",
    "slurpit/logs/scanner",
    "slurpit/logs/scraper",
    "slurpit/logs/portal",
];

/// NetBox plugin module enabled when Slurp'it is on.
pub const PLUGIN_MODULE: &str = "slurpit_netbox";

const MARIADB_SERVICE: &str = "slurpit-mariadb";
const MONGODB_SERVICE: &str = "slurpit-mongodb";
const WAREHOUSE_SERVICE: &str = "slurpit-warehouse";
const SCANNER_SERVICE: &str = "slurpit-scanner";
const SCRAPER_SERVICE: &str = "slurpit-scraper";

const MARIADB_DATABASE: &str = "slurpit";
const MARIADB_USER: &str = "slurpit";
const MONGODB_USER: &str = "root";
const RESTART_POLICY: &str = "unless-stopped";

/// Renders the primary override without any Slurp'it services.
#[must_use]
pub fn primary_override(settings: &DeploymentSettings) -> ComposeDocument {
    let mut doc = ComposeDocument::default();

    for name in PRIMARY_SERVICES {
        let mut service = Service {
            image: Some(PLUGIN_IMAGE.to_string()),
            networks: vec![String::from("default"), SHARED_NETWORK.to_string()],
            ..Service::default()
        };

        if *name == PRIMARY_SERVICE {
            service.build = Some(Build {
                context: String::from("."),
                dockerfile: PLUGIN_DOCKERFILE.to_string(),
            });
            service.ports = vec![format!("{}:{PRIMARY_INTERNAL_PORT}", settings.ui_port)];
        }

        doc.services.insert((*name).to_string(), service);
    }

    doc.networks.insert(
        SHARED_NETWORK.to_string(),
        Network {
            name: Some(SHARED_NETWORK.to_string()),
            external: None,
        },
    );

    doc
}

/// Renders the `clean` Slurp'it services.
#[must_use]
pub fn clean_services(settings: &DeploymentSettings) -> ComposeDocument {
    let mut doc = ComposeDocument::default();
    let volume = |name: &str, target: &str| format!("{name}:{target}");

    let mut mariadb = base_service("mariadb:11", settings);
    mariadb.environment.extend(mariadb_env(settings));
    mariadb.volumes = vec![volume("slurpit-mariadb-data", "/var/lib/mysql")];

    let mut mongodb = base_service("mongo:7", settings);
    mongodb.environment.extend(mongodb_env(settings));
    mongodb.volumes = vec![volume("slurpit-mongodb-data", "/data/db")];

    let mut warehouse = base_service("slurpit/warehouse:latest", settings);
    warehouse.environment.extend(warehouse_env(settings));
    warehouse.depends_on = Some(DependsOn::started(&[MONGODB_SERVICE]));

    let mut scanner = base_service("slurpit/scanner:latest", settings);
    scanner.environment.extend(worker_env("SCANNER", 4));
    scanner.depends_on = Some(DependsOn::started(&[WAREHOUSE_SERVICE]));

    let mut scraper = base_service("slurpit/scraper:latest", settings);
    scraper.environment.extend(worker_env("SCRAPER", 8));
    scraper.depends_on = Some(DependsOn::started(&[WAREHOUSE_SERVICE]));

    let mut portal = base_service("slurpit/portal:latest", settings);
    portal.environment.extend(portal_db_env(settings));
    portal.environment.extend(portal_environment(settings));
    portal.ports = vec![portal_port(settings)];
    portal.depends_on = Some(DependsOn::started(&[MARIADB_SERVICE, WAREHOUSE_SERVICE]));

    for (name, service) in [
        (MARIADB_SERVICE, mariadb),
        (MONGODB_SERVICE, mongodb),
        (WAREHOUSE_SERVICE, warehouse),
        (SCANNER_SERVICE, scanner),
        (SCRAPER_SERVICE, scraper),
        (PORTAL_SERVICE, portal),
    ] {
        doc.services.insert(name.to_string(), service);
    }

    for name in ["slurpit-mariadb-data", "slurpit-mongodb-data"] {
        doc.volumes.insert(name.to_string(), Volume::default());
    }

    doc
}

/// Renders the `upstream-exact` Slurp'it services.
///
/// Same topology as upstream: fixed container names, health-gated start
/// order and bind mounts under `./slurpit/`.
#[must_use]
pub fn exact_services(settings: &DeploymentSettings) -> ComposeDocument {
    let mut doc = clean_services(settings);
    doc.volumes.clear();

    let bind = |host: &str, target: &str| format!("./{SLURPIT_DATA_DIR}/{host}:{target}");

    for (name, service) in &mut doc.services {
        service.container_name = Some(name.clone());

        match name.as_str() {
            MARIADB_SERVICE => {
                service.volumes = vec![bind("db/mariadb", "/var/lib/mysql")];
                service.healthcheck = Some(HealthCheck::shell(
                    "healthcheck.sh --connect --innodb_initialized",
                    Some("30s"),
                ));
            }
            MONGODB_SERVICE => {
                service.volumes = vec![bind("db/mongodb", "/data/db")];
                service.healthcheck = Some(HealthCheck::shell(
                    "mongosh --quiet --eval 'db.adminCommand(\"ping\").ok' || exit 1",
                    Some("30s"),
                ));
            }
            WAREHOUSE_SERVICE => {
                service.volumes = vec![bind("logs/warehouse", "/logs")];
                service.healthcheck = Some(HealthCheck::shell("curl -fs http://localhost/services || exit 1", None));
                service.depends_on = Some(DependsOn::healthy(&[MONGODB_SERVICE]));
            }
            SCANNER_SERVICE => {
                service.volumes = vec![bind("logs/scanner", "/logs")];
                service.depends_on = Some(DependsOn::healthy(&[WAREHOUSE_SERVICE]));
            }
            SCRAPER_SERVICE => {
                service.volumes = vec![bind("logs/scraper", "/logs")];
                service.depends_on = Some(DependsOn::healthy(&[WAREHOUSE_SERVICE]));
            }
            PORTAL_SERVICE => {
                service.volumes = vec![
                    bind("certs", "/etc/nginx/certs"),
                    bind("logs/portal", "/var/log/nginx"),
                ];
                service.healthcheck = Some(HealthCheck::shell("curl -fs http://localhost/ || exit 1", Some("60s")));
                service.depends_on = Some(DependsOn::healthy(&[MARIADB_SERVICE, WAREHOUSE_SERVICE]));
            }
            _ => {}
        }
    }

    doc
}

/// Renders the thin patch layered over the fetched upstream document.
///
/// Only touches services that exist upstream: the portal gets its port and
/// NetBox wiring, every service gets the timezone.
#[must_use]
pub fn raw_patch(settings: &DeploymentSettings, upstream_services: &[String]) -> ComposeDocument {
    let mut doc = ComposeDocument::default();

    for name in upstream_services {
        let mut service = Service::default();
        service
            .environment
            .insert(String::from(keys::TZ), escape_interpolation(&settings.timezone));

        if name == PORTAL_SERVICE {
            service.environment.extend(portal_environment(settings));
            service.ports = vec![portal_port(settings)];
        }

        doc.services.insert(name.clone(), service);
    }

    doc
}

/// NetBox wiring injected into the portal in every mode.
#[must_use]
pub fn portal_environment(settings: &DeploymentSettings) -> BTreeMap<String, String> {
    env([
        ("PORTAL_BASE_URL", format!("http://localhost:{}", settings.portal_port)),
        ("NETBOX_URL", settings.primary_service_url.clone()),
        ("NETBOX_API_TOKEN", settings.api_token.clone()),
        ("NETBOX_SYNC_ENABLED", settings.sync_effective().to_string()),
        ("NETBOX_SYNC_INTERVAL", settings.sync_interval_seconds.to_string()),
    ])
}

/// `Dockerfile-Plugins` contents.
#[must_use]
pub fn plugin_dockerfile() -> String {
    format!(
        "# {MANAGED_HEADER}\n\
         ARG NETBOX_BASE_IMAGE=docker.io/netboxcommunity/netbox:latest\n\
         FROM ${{NETBOX_BASE_IMAGE}}\n\
         \n\
         COPY ./plugin_requirements.txt /opt/netbox/\n\
         RUN /usr/local/bin/uv pip install -r /opt/netbox/plugin_requirements.txt\n"
    )
}

/// `plugin_requirements.txt` contents.
///
/// The plugin package is always installed so toggling Slurp'it does not
/// rebuild the image; [`plugin_config`] decides whether it is loaded.
#[must_use]
pub fn plugin_requirements() -> String {
    format!("# {MANAGED_HEADER}\n{PLUGIN_MODULE}\n")
}

/// `configuration/plugins.py` contents.
#[must_use]
pub fn plugin_config(enabled: bool) -> String {
    let plugins = if enabled {
        format!("\"{PLUGIN_MODULE}\"")
    } else {
        String::new()
    };
    format!("# {MANAGED_HEADER}\nPLUGINS = [{plugins}]\n")
}

fn base_service(image: &str, settings: &DeploymentSettings) -> Service {
    Service {
        image: Some(image.to_string()),
        restart: Some(RESTART_POLICY.to_string()),
        environment: env([(keys::TZ, settings.timezone.clone())]),
        networks: vec![SHARED_NETWORK.to_string()],
        ..Service::default()
    }
}

fn portal_port(settings: &DeploymentSettings) -> String {
    format!("{}:80", settings.portal_port)
}

fn mariadb_env(settings: &DeploymentSettings) -> BTreeMap<String, String> {
    env([
        ("MARIADB_DATABASE", MARIADB_DATABASE.to_string()),
        ("MARIADB_USER", MARIADB_USER.to_string()),
        ("MARIADB_PASSWORD", settings.credential(keys::SLURPIT_MARIADB_PASSWORD).to_string()),
        (
            "MARIADB_ROOT_PASSWORD",
            settings.credential(keys::SLURPIT_MARIADB_ROOT_PASSWORD).to_string(),
        ),
    ])
}

fn mongodb_env(settings: &DeploymentSettings) -> BTreeMap<String, String> {
    env([
        ("MONGO_INITDB_ROOT_USERNAME", MONGODB_USER.to_string()),
        (
            "MONGO_INITDB_ROOT_PASSWORD",
            settings.credential(keys::SLURPIT_MONGODB_PASSWORD).to_string(),
        ),
    ])
}

fn warehouse_env(settings: &DeploymentSettings) -> BTreeMap<String, String> {
    env([
        (
            "WAREHOUSE_MONGODB_URI",
            format!(
                "mongodb://{MONGODB_USER}:{}@{MONGODB_SERVICE}:27017",
                settings.credential(keys::SLURPIT_MONGODB_PASSWORD)
            ),
        ),
        (
            "WAREHOUSE_CALLBACK_SCANNER_URL",
            format!("http://{PORTAL_SERVICE}/callback/scanner"),
        ),
        (
            "WAREHOUSE_CALLBACK_SCRAPER_URL",
            format!("http://{PORTAL_SERVICE}/callback/scraper"),
        ),
    ])
}

fn worker_env(prefix: &str, pool_size: u32) -> BTreeMap<String, String> {
    env([
        (format!("{prefix}_WAREHOUSE_HOST"), WAREHOUSE_SERVICE.to_string()),
        (format!("{prefix}_POOLSIZE"), pool_size.to_string()),
    ])
}

fn portal_db_env(settings: &DeploymentSettings) -> BTreeMap<String, String> {
    env([
        ("PORTAL_WAREHOUSE_URL", format!("http://{WAREHOUSE_SERVICE}")),
        ("PORTAL_DB_HOST", MARIADB_SERVICE.to_string()),
        ("PORTAL_DB_NAME", MARIADB_DATABASE.to_string()),
        ("PORTAL_DB_USER", MARIADB_USER.to_string()),
        (
            "PORTAL_DB_PASSWORD",
            settings.credential(keys::SLURPIT_MARIADB_PASSWORD).to_string(),
        ),
    ])
}

fn env<K, I>(pairs: I) -> BTreeMap<String, String>
where
    K: Into<String>,
    I: IntoIterator<Item = (K, String)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), escape_interpolation(&v)))
        .collect()
}
