//! Apache record rendering and parsing.
//!
//! # Responsibilities
//! - Render pool records (`# member addr:port` lines)
//! - Render alias virtual hosts with balancer members and certificates
//! - Parse both record kinds back into the model
//!
//! # Design Decisions
//! - Comment lines carry the model; Apache ignores them
//! - Members and endpoints render in sorted order
//! - The inactive certificate pair stays in the file, commented out

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use std::path::Path;
use crate::load_balancer::{Endpoint, Member};

/// Which certificate pair an alias's virtual host uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CertificateSelection {
    /// The configured default pair.
    #[default]
    Default,
    /// The alias's own pair under the `certs` directory.
    AliasSpecific,
}

/// In-memory form of one alias record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasRecord {
    pub name: String,
    pub endpoints: BTreeMap<String, Endpoint>,
    pub certificate: CertificateSelection,
}

impl AliasRecord {
    pub fn new(name: impl Into<String>, certificate: CertificateSelection) -> Self {
        Self {
            name: name.into(),
            endpoints: BTreeMap::new(),
            certificate,
        }
    }
}

/// Values shared by every rendered virtual host.
#[derive(Debug, Clone, Copy)]
pub struct VirtualHostContext<'a> {
    pub ssl_port: u16,
    /// Certificates are referenced under the permanent root so that
    /// staged records stay valid after promotion.
    pub certs_dir: &'a Path,
    pub default_cert: &'a Path,
    pub default_key: &'a Path,
    pub cipher_suite: &'a str,
}

/// Render a pool record.
pub fn render_pool(members: &BTreeSet<Member>) -> String {
    let mut out = String::new();
    for member in members {
        let _ = write!(out, "\n# member {}\n", member);
    }
    out
}

/// Parse the members of a pool record.
pub fn parse_pool(text: &str) -> BTreeSet<Member> {
    text.lines()
        .filter_map(|line| {
            let rest = line.trim_start().strip_prefix('#')?;
            let mut chars = rest.chars();
            if !chars.next()?.is_whitespace() {
                return None;
            }
            let value = chars.as_str().strip_prefix("member")?;
            if !value.starts_with(char::is_whitespace) {
                return None;
            }
            let value = value.trim();
            if value.contains(char::is_whitespace) {
                return None;
            }
            match value.parse::<Member>() {
                Ok(member) => Some(member),
                Err(e) => {
                    tracing::warn!(line = %line, error = %e, "Skipping unparsable pool member");
                    None
                }
            }
        })
        .collect()
}

/// Render an alias virtual host.
pub fn render_alias(record: &AliasRecord, ctx: &VirtualHostContext<'_>) -> String {
    let alias = &record.name;
    let (alias_prefix, default_prefix) = match record.certificate {
        CertificateSelection::AliasSpecific => ("", "# "),
        CertificateSelection::Default => ("# ", ""),
    };

    let mut out = String::new();
    let _ = writeln!(out);
    let _ = writeln!(out, "<VirtualHost *:{}>", ctx.ssl_port);
    let _ = writeln!(out, "    ErrorLog logs/{}-error_log", alias);
    let _ = writeln!(out);
    let _ = writeln!(out, "    ProxyRequests off");
    let _ = writeln!(out, "    ProxyStatus on");
    let _ = writeln!(out, "    ProxyPreserveHost On");
    let _ = writeln!(out, "    ServerName {}", alias);
    let _ = writeln!(out, "    ProxyPass / balancer://{}/", alias);
    let _ = writeln!(out);
    let _ = writeln!(out, "    SSLEngine on");
    let _ = writeln!(
        out,
        "    {}SSLCertificateFile {}/{}.crt",
        alias_prefix,
        ctx.certs_dir.display(),
        alias
    );
    let _ = writeln!(
        out,
        "    {}SSLCertificateKeyFile {}/{}.key",
        alias_prefix,
        ctx.certs_dir.display(),
        alias
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "    # SSL Defaults for this vhost");
    let _ = writeln!(out, "    SSLProtocol ALL -SSLv2 -SSLv3");
    let _ = writeln!(out, "    SSLHonorCipherOrder On");
    let _ = writeln!(out, "    SSLCipherSuite {}", ctx.cipher_suite);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "    {}SSLCertificateFile {}",
        default_prefix,
        ctx.default_cert.display()
    );
    let _ = writeln!(
        out,
        "    {}SSLCertificateKeyFile {}",
        default_prefix,
        ctx.default_key.display()
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "    <Proxy balancer://{}>", alias);
    for (pool, endpoint) in &record.endpoints {
        let _ = writeln!(out, "        # BalancerMember {};{}", endpoint, pool);
        let _ = writeln!(out, "        BalancerMember http://{}", endpoint);
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "        Order Deny,Allow");
    let _ = writeln!(out, "        Deny from none");
    let _ = writeln!(out, "        Allow from all");
    let _ = writeln!(out);
    let _ = writeln!(out, "        # Round robin across balancer members");
    let _ = writeln!(out, "        ProxySet lbmethod=byrequests");
    let _ = writeln!(out);
    let _ = writeln!(out, "    </Proxy>");
    let _ = writeln!(out, "</VirtualHost>");
    out
}

/// Parse the pool endpoints of an alias record.
pub fn parse_alias_endpoints(text: &str) -> BTreeMap<String, Endpoint> {
    text.lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("# BalancerMember ")?;
            let (endpoint, pool) = rest.split_once(';')?;
            let pool = pool.trim();
            if endpoint.is_empty() || pool.is_empty() || pool.contains(char::is_whitespace) {
                return None;
            }
            Some((pool.to_string(), Endpoint::parse(endpoint)))
        })
        .collect()
}
