//! Apache `mod_proxy_balancer` backend.
//!
//! # Responsibilities
//! - Keep one `<pool>.pool` record per pool and one `alias_<alias>.conf`
//!   virtual host per alias under the managed directory
//! - Keep alias certificates under `certs/`
//! - Wire the managed directory into Apache with an include anchor
//! - Stage, diff and promote the whole tree during reinitialization
//!
//! # Layout
//! ```text
//! <conf_dir>/ose_routing.conf          NameVirtualHost + Include anchor
//! <conf_dir>/ose_routing/              permanent root
//!     pool_ose_blog_alice.pool          # member 10.0.0.5:8080
//!     alias_ha-blog-alice.example.com.conf
//!     certs/<alias>.crt, certs/<alias>.key
//! ```
//!
//! # Design Decisions
//! - Pool records are not included by Apache; only alias changes reload
//! - Certificate selection follows the presence of the alias's certificate
//! - Reloads are skipped inside a reinit window and before the first one

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use async_trait::async_trait;
use tempfile::TempDir;
use tokio::fs;

use crate::config::ApacheConfig;
use crate::load_balancer::render::{self, AliasRecord, CertificateSelection, VirtualHostContext};
use crate::load_balancer::service::ServiceControl;
use crate::load_balancer::staging::{self, FILE_MODE, KEY_MODE};
use crate::load_balancer::{BackendError, BackendResult, Endpoint, LoadBalancerBackend, Member};
use crate::observability::metrics;
use crate::routing::matcher::PoolNameFormat;

/// Subdirectory of a root holding alias certificates.
pub const CERTS_DIR: &str = "certs";

const ALIAS_PREFIX: &str = "alias_";
const ALIAS_SUFFIX: &str = ".conf";

/// Apache implementation of [`LoadBalancerBackend`].
pub struct ApacheBackend {
    config: ApacheConfig,
    pool_names: PoolNameFormat,
    permanent_root: PathBuf,
    /// Present between `reinit_start` and `reinit_end`.
    staging: Option<TempDir>,
    initialized: bool,
    service: Arc<dyn ServiceControl>,
}

impl ApacheBackend {
    /// Create a backend for the managed directory under `config.conf_dir`.
    pub fn new(config: ApacheConfig, pool_names: PoolNameFormat, service: Arc<dyn ServiceControl>) -> Self {
        let permanent_root = config.conf_dir.join(&config.managed_subdir);
        Self {
            config,
            pool_names,
            permanent_root,
            staging: None,
            initialized: false,
            service,
        }
    }

    /// Prepare the host before the first reinitialization.
    ///
    /// Stops the service so it cannot serve stale data, resets the managed
    /// directory and writes the include anchor.
    pub async fn prepare(&mut self) -> BackendResult<()> {
        tracing::info!(root = %self.permanent_root.display(), "Initializing apache backend");

        if self.config.stop_on_startup {
            if let Err(e) = self.service.disable().await {
                tracing::warn!(error = %e, "Could not disable load balancer service");
            }
            if let Err(e) = self.service.stop().await {
                tracing::warn!(error = %e, "Could not stop load balancer service");
            }
        }

        if self.config.clean_on_startup {
            match fs::remove_dir_all(&self.permanent_root).await {
                Ok(()) => tracing::debug!("Removed previous managed configuration"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(BackendError::io(&self.permanent_root)(e)),
            }
        }

        staging::create_dir(&self.permanent_root)
            .await
            .map_err(BackendError::io(&self.permanent_root))?;
        self.service.restore_labels(&self.permanent_root).await?;

        let anchor = self.include_anchor_path();
        let contents = format!(
            "NameVirtualHost *:{}\nInclude {}/*{}\n",
            self.config.ssl_port,
            self.permanent_root.display(),
            ALIAS_SUFFIX
        );
        staging::write_record(&anchor, contents.as_bytes())
            .await
            .map_err(BackendError::io(&anchor))?;
        Ok(())
    }

    /// The root the load balancer reads.
    pub fn permanent_root(&self) -> &Path {
        &self.permanent_root
    }

    /// The root mutations currently target.
    pub fn active_root(&self) -> &Path {
        self.staging
            .as_ref()
            .map(TempDir::path)
            .unwrap_or(self.permanent_root.as_path())
    }

    /// Whether a reinitialization has completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Whether a staging root is active.
    pub fn in_reinit(&self) -> bool {
        self.staging.is_some()
    }

    /// `<conf_dir>/<managed_subdir>.conf`.
    pub fn include_anchor_path(&self) -> PathBuf {
        self.config
            .conf_dir
            .join(format!("{}{}", self.config.managed_subdir, ALIAS_SUFFIX))
    }

    fn pool_path(&self, name: &str) -> PathBuf {
        self.active_root().join(format!("{}.pool", name))
    }

    fn alias_path(&self, alias: &str) -> PathBuf {
        self.active_root()
            .join(format!("{}{}{}", ALIAS_PREFIX, alias, ALIAS_SUFFIX))
    }

    fn certificate_paths(&self, alias: &str) -> (PathBuf, PathBuf) {
        let dir = self.active_root().join(CERTS_DIR);
        (dir.join(format!("{}.crt", alias)), dir.join(format!("{}.key", alias)))
    }

    async fn read_members(&self, name: &str) -> BackendResult<BTreeSet<Member>> {
        check_name(name)?;
        let path = self.pool_path(name);
        match staging::read_optional(&path).await.map_err(BackendError::io(&path))? {
            Some(text) => Ok(render::parse_pool(&text)),
            None => Err(BackendError::ConfigNotFound(name.to_string())),
        }
    }

    async fn write_members(&self, name: &str, members: &BTreeSet<Member>) -> BackendResult<()> {
        let path = self.pool_path(name);
        staging::write_record(&path, render::render_pool(members).as_bytes())
            .await
            .map_err(BackendError::io(&path))
    }

    async fn load_alias(&self, alias: &str) -> BackendResult<AliasRecord> {
        check_name(alias)?;
        let (cert_path, _) = self.certificate_paths(alias);
        let has_certificate = fs::try_exists(&cert_path)
            .await
            .map_err(BackendError::io(&cert_path))?;
        let selection = if has_certificate {
            CertificateSelection::AliasSpecific
        } else {
            CertificateSelection::Default
        };

        let mut record = AliasRecord::new(alias, selection);
        let path = self.alias_path(alias);
        if let Some(text) = staging::read_optional(&path).await.map_err(BackendError::io(&path))? {
            record.endpoints = render::parse_alias_endpoints(&text);
        }
        Ok(record)
    }

    /// Persist an alias record; an empty one is removed. Returns whether
    /// anything on disk changed.
    async fn store_alias(&self, record: &AliasRecord) -> BackendResult<bool> {
        let path = self.alias_path(&record.name);
        if record.endpoints.is_empty() {
            return staging::remove_optional(&path)
                .await
                .map_err(BackendError::io(&path));
        }

        let certs_dir = self.permanent_root.join(CERTS_DIR);
        let ctx = VirtualHostContext {
            ssl_port: self.config.ssl_port,
            certs_dir: &certs_dir,
            default_cert: &self.config.default_cert_path,
            default_key: &self.config.default_key_path,
            cipher_suite: &self.config.cipher_suite,
        };
        let text = render::render_alias(record, &ctx);
        write_if_changed(&path, text.as_bytes(), FILE_MODE).await
    }

    async fn reload_service(&self) -> BackendResult<()> {
        if !self.initialized {
            tracing::info!("Backend not initialized yet, skipping reload");
            return Ok(());
        }

        if self.service.is_running().await {
            tracing::debug!("Load balancer operational, reloading");
            self.service.reload().await?;
        } else {
            tracing::info!("Load balancer not running, restarting");
            self.service.restart().await?;
        }
        metrics::record_reload();
        Ok(())
    }

    async fn reload_unless_reinit(&self) -> BackendResult<()> {
        if self.in_reinit() {
            tracing::debug!("Inside reinit window, deferring reload");
            return Ok(());
        }
        self.reload_service().await
    }
}

#[async_trait]
impl LoadBalancerBackend for ApacheBackend {
    async fn create_pool(&mut self, name: &str) -> BackendResult<()> {
        check_name(name)?;
        tracing::debug!(pool = %name, "create_pool");
        self.write_members(name, &BTreeSet::new()).await
    }

    async fn delete_pool(&mut self, name: &str) -> BackendResult<()> {
        check_name(name)?;
        tracing::debug!(pool = %name, "delete_pool");
        let path = self.pool_path(name);
        staging::remove_optional(&path)
            .await
            .map_err(BackendError::io(&path))?;
        Ok(())
    }

    async fn list_pool_names(&self) -> BackendResult<BTreeSet<String>> {
        let root = self.active_root();
        let names = file_names(root).await.map_err(BackendError::io(root))?;
        Ok(names
            .iter()
            .filter_map(|n| self.pool_names.pool_from_file_name(n))
            .map(str::to_string)
            .collect())
    }

    async fn list_pool_members(&self, name: &str) -> BackendResult<BTreeSet<Member>> {
        self.read_members(name).await
    }

    async fn add_members(&mut self, name: &str, members: &[Member]) -> BackendResult<()> {
        tracing::debug!(pool = %name, count = members.len(), "add_members");
        let mut current = self.read_members(name).await?;
        current.extend(members.iter().cloned());
        self.write_members(name, &current).await
    }

    async fn remove_members(&mut self, name: &str, members: &[Member]) -> BackendResult<()> {
        tracing::debug!(pool = %name, count = members.len(), "remove_members");
        let mut current = self.read_members(name).await?;
        for member in members {
            current.remove(member);
        }
        self.write_members(name, &current).await
    }

    async fn list_pool_aliases(&self) -> BackendResult<BTreeSet<String>> {
        let root = self.active_root();
        let names = file_names(root).await.map_err(BackendError::io(root))?;
        let aliases: BTreeSet<String> = names
            .iter()
            .filter_map(|n| n.strip_prefix(ALIAS_PREFIX)?.strip_suffix(ALIAS_SUFFIX))
            .filter(|alias| !alias.is_empty() && !alias.contains(char::is_whitespace))
            .map(str::to_string)
            .collect();
        tracing::debug!(count = aliases.len(), "Found aliases");
        Ok(aliases)
    }

    async fn list_alias_endpoints(&self, alias: &str) -> BackendResult<BTreeMap<String, Endpoint>> {
        Ok(self.load_alias(alias).await?.endpoints)
    }

    async fn add_alias_endpoint(
        &mut self,
        pool: &str,
        alias: &str,
        public_address: &str,
        public_port: Option<u16>,
    ) -> BackendResult<()> {
        if public_address.is_empty() {
            tracing::debug!(pool = %pool, alias = %alias, "Alias has no public endpoint, not written");
            return Ok(());
        }
        check_name(pool)?;

        let mut record = self.load_alias(alias).await?;
        record
            .endpoints
            .insert(pool.to_string(), Endpoint::new(public_address, public_port));
        if self.store_alias(&record).await? {
            self.reload_unless_reinit().await?;
        }
        Ok(())
    }

    async fn remove_alias_endpoint(&mut self, pool: &str, alias: &str) -> BackendResult<()> {
        check_name(pool)?;
        let mut record = self.load_alias(alias).await?;
        if record.endpoints.remove(pool).is_none() {
            tracing::debug!(pool = %pool, alias = %alias, "Pool has no endpoint in alias");
            return Ok(());
        }
        if self.store_alias(&record).await? {
            self.reload_unless_reinit().await?;
        }
        Ok(())
    }

    async fn add_certificate(
        &mut self,
        alias: &str,
        certificate: &str,
        private_key: &str,
    ) -> BackendResult<()> {
        check_name(alias)?;
        let certs_dir = self.active_root().join(CERTS_DIR);
        staging::create_dir(&certs_dir)
            .await
            .map_err(BackendError::io(&certs_dir))?;

        let (cert_path, key_path) = self.certificate_paths(alias);
        let mut changed = write_if_changed(&cert_path, certificate.as_bytes(), FILE_MODE).await?;
        changed |= write_if_changed(&key_path, private_key.as_bytes(), KEY_MODE).await?;
        self.service.restore_labels(&certs_dir).await?;

        let mut record = self.load_alias(alias).await?;
        record.certificate = CertificateSelection::AliasSpecific;
        if record.endpoints.is_empty() {
            tracing::debug!(alias = %alias, "No alias record yet; certificate applies once one is written");
        }
        changed |= self.store_alias(&record).await?;

        if changed {
            self.reload_unless_reinit().await?;
        }
        Ok(())
    }

    async fn remove_certificate(&mut self, alias: &str) -> BackendResult<()> {
        check_name(alias)?;
        let (cert_path, key_path) = self.certificate_paths(alias);
        let mut changed = staging::remove_optional(&cert_path)
            .await
            .map_err(BackendError::io(&cert_path))?;
        changed |= staging::remove_optional(&key_path)
            .await
            .map_err(BackendError::io(&key_path))?;

        let mut record = self.load_alias(alias).await?;
        record.certificate = CertificateSelection::Default;
        changed |= self.store_alias(&record).await?;

        if changed {
            self.reload_unless_reinit().await?;
        }
        Ok(())
    }

    async fn reinit_start(&mut self) -> BackendResult<()> {
        if self.staging.take().is_some() {
            tracing::warn!("reinit_start while already staging; discarding previous staging root");
        }
        let dir = staging::create_staging_root(&self.config.tmp_dir, &self.config.tmp_prefix)
            .map_err(BackendError::io(&self.config.tmp_dir))?;
        tracing::debug!(staging = %dir.path().display(), "reinit_start");
        self.staging = Some(dir);
        Ok(())
    }

    async fn reinit_end(&mut self) -> BackendResult<()> {
        self.initialized = true;
        // Taking the staging root restores the permanent root as the target
        // and clears the reinit window, whatever happens below.
        let Some(dir) = self.staging.take() else {
            tracing::warn!("reinit_end without reinit_start");
            return Ok(());
        };
        tracing::debug!(staging = %dir.path().display(), "reinit_end");

        let differs = staging::trees_differ(dir.path(), &self.permanent_root)
            .await
            .map_err(BackendError::io(dir.path()))?;
        if !differs {
            tracing::info!("reinit: configuration unchanged, discarding staging root");
            return Ok(());
        }

        tracing::info!("reinit: received updated config, reloading");
        staging::promote(dir, &self.permanent_root)
            .await
            .map_err(BackendError::io(&self.permanent_root))?;
        metrics::record_promotion();
        self.service.restore_labels(&self.permanent_root).await?;
        self.reload_service().await
    }
}

/// Reject names that cannot be a single record file name.
fn check_name(name: &str) -> BackendResult<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\0')
        || name.contains(char::is_whitespace);
    if bad {
        Err(BackendError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

async fn write_if_changed(path: &Path, contents: &[u8], mode: u32) -> BackendResult<bool> {
    let current = match fs::read(path).await {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(BackendError::io(path)(e)),
    };
    if current.as_deref() == Some(contents) {
        return Ok(false);
    }
    staging::write_record_with_mode(path, contents, mode)
        .await
        .map_err(BackendError::io(path))?;
    Ok(true)
}

async fn file_names(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}
