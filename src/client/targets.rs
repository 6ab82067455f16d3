//! Targets-file parsing
//!
//! One target per line: optional `-n NAMESPACE` and `-l ADDR` flags, a
//! `KIND/NAME` resource and one or more port specs. Blank lines and lines
//! starting with `#` or `//` are skipped.

use anyhow::{bail, Context, Result};
use clap::Parser as ClapParser;

/// Default bind address for forwarders.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1";

const KNOWN_KINDS: &[&str] = &[
    "ip",
    "host",
    "pod",
    "svc",
    "service",
    "deploy",
    "deployment",
    "sts",
    "statefulset",
    "ds",
    "daemonset",
    "rs",
    "replicaset",
    "job",
];

/// One forwarding target: a resource and the port specs requested for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    /// `KIND/NAME` resource reference
    pub resource: String,
    /// Port specs, parsed later against the resolved object
    pub ports: Vec<String>,
    /// Namespace the resource lives in
    pub namespace: String,
    /// Local address to bind
    pub listen_addr: String,
}

#[derive(ClapParser, Debug)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct TargetLine {
    #[arg(short = 'n', long = "namespace")]
    namespace: Option<String>,

    #[arg(short = 'l', long = "address", default_value = DEFAULT_LISTEN_ADDR)]
    address: String,

    rest: Vec<String>,
}

/// Validate the positional part of a target: a resource followed by at
/// least one port spec.
pub fn validate_fields(fields: &[String]) -> Result<()> {
    if fields.len() < 2 {
        bail!("invalid syntax");
    }

    let parts: Vec<&str> = fields[0].split('/').collect();
    let (kind, name) = match parts[..] {
        [kind, name] => (kind, name),
        _ => bail!("unknown resource: {:?}", fields[0]),
    };
    if !KNOWN_KINDS.contains(&kind) || name.is_empty() {
        bail!("unknown resource: {:?}", fields[0]);
    }

    if kind == "ip" && name.parse::<std::net::IpAddr>().is_err() {
        bail!("invalid IP address: {name:?}");
    }
    Ok(())
}

/// Build a single target from command-line style arguments.
pub fn target_from_args(
    resource: &str,
    ports: &[String],
    namespace: &str,
    listen_addr: &str,
) -> Result<Target> {
    let mut fields = vec![resource.to_owned()];
    fields.extend(ports.iter().cloned());
    validate_fields(&fields)?;
    Ok(Target {
        resource: resource.to_owned(),
        ports: ports.to_vec(),
        namespace: namespace.to_owned(),
        listen_addr: listen_addr.to_owned(),
    })
}

/// Parse a targets file, one target per line.
pub fn parse_targets_file(content: &str, default_namespace: &str) -> Result<Vec<Target>> {
    let mut targets = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
            continue;
        }

        let fields = line.split_whitespace();
        let parsed = TargetLine::try_parse_from(fields)
            .with_context(|| format!("line {line_no}"))?;
        validate_fields(&parsed.rest).with_context(|| format!("line {line_no}"))?;

        targets.push(Target {
            resource: parsed.rest[0].clone(),
            ports: parsed.rest[1..].to_vec(),
            namespace: parsed
                .namespace
                .unwrap_or_else(|| default_namespace.to_owned()),
            listen_addr: parsed.address,
        });
    }

    Ok(targets)
}
