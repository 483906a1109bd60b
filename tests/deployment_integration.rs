//! ---
//! tsd_section: "15-testing-qa-runbook"
//! tsd_subsection: "integration-tests"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Consistency checks between deploy assets and deployer settings."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
use std::fs;
use std::path::Path;

use tsd_common::config::{ServiceRole, Settings};

fn read(path: &str) -> String {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let full = Path::new(manifest_dir).join("..").join(path);
    fs::read_to_string(&full)
        .unwrap_or_else(|err| panic!("failed to read {}: {}", full.display(), err))
}

fn settings() -> Settings {
    read("configs/tsd.toml")
        .parse::<Settings>()
        .expect("configs/tsd.toml must parse")
}

#[test]
fn shipped_settings_parse_and_validate() {
    let settings = settings();
    settings.validate().unwrap();
    assert_eq!(settings.start_order().unwrap(), vec!["db", "web"]);
    assert_eq!(settings.service_with_role(ServiceRole::Database), Some("db"));
    assert_eq!(settings.readiness.max_attempts, 10);
}

#[test]
fn compose_declares_every_configured_service() {
    let compose = read("deploy/docker-compose.yml");
    assert!(compose.starts_with("# ---"), "compose file needs the frontmatter header");
    let settings = settings();
    for name in settings.services.keys() {
        assert!(
            compose.contains(&format!("\n  {}:\n", name)),
            "compose file is missing service {name}"
        );
    }
    for volume in [&settings.volumes.database, &settings.volumes.backups] {
        assert!(compose.contains(volume.as_str()), "compose file is missing volume {volume}");
    }
    assert!(compose.contains(&settings.network));
}

#[test]
fn backups_land_on_their_own_volume() {
    let compose = read("deploy/docker-compose.yml");
    let settings = settings();
    let mount = format!("{}:{}", settings.volumes.backups, settings.database.backup_dir);
    assert!(compose.contains(&mount), "expected mount {mount}");
}

#[test]
fn web_port_matches_health_endpoint() {
    let compose = read("deploy/docker-compose.yml");
    let settings = settings();
    let published = format!("{}:{}:", settings.web.host, settings.web.port);
    assert!(compose.contains(&published), "expected published port {published}");
}

#[test]
fn env_template_carries_the_secret_placeholder() {
    let template = read("deploy/env.template");
    assert!(template.contains(tsd_config::SECRET_PLACEHOLDER));
    for key in [
        "DATABASE_NAME",
        "DATABASE_USER",
        "DATABASE_PASSWORD",
        "DATABASE_HOST",
        "DATABASE_PORT",
    ] {
        assert!(template.contains(&format!("{key}=")), "template is missing {key}");
    }
}

#[test]
fn rendered_template_has_a_strong_secret() {
    let template = read("deploy/env.template");
    let secret = tsd_config::generate_secret();
    let rendered = tsd_config::render_template(&template, &secret);
    assert!(!rendered.contains(tsd_config::SECRET_PLACEHOLDER));
    assert!(rendered.contains(&format!("SECRET_KEY={}", secret)));
    assert!(secret.len() >= 50);
}
