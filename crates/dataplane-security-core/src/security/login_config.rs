//! Named login contexts and their authentication entries.
//!
//! A login context maps a name (e.g. `"Client"` for ZooKeeper or
//! `"KafkaClient"` for a Kafka connector) to an ordered list of
//! [`AuthEntry`] values. Consumers try the entries in order, so insertion
//! order is precedence order.
//!
//! [`DynamicConfiguration`] layers entries added at runtime over an optional
//! delegate configuration. Delegate entries always come first:
//!
//! ```
//! use std::sync::Arc;
//! use dataplane_security_core::security::{
//!     AuthEntry, ControlFlag, DynamicConfiguration, LoginConfiguration,
//!     StaticLoginConfiguration,
//! };
//!
//! let base = StaticLoginConfiguration::new()
//!     .with_entries("Client", vec![AuthEntry::new("digest", ControlFlag::Required)]);
//! let dynamic = DynamicConfiguration::new(Some(Arc::new(base)));
//! dynamic.add_entries("Client", vec![AuthEntry::new("krb5", ControlFlag::Required)]);
//!
//! let entries = dynamic.entries("Client").unwrap();
//! assert_eq!(entries[0].login_module(), "digest");
//! assert_eq!(entries[1].login_module(), "krb5");
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Login module name used for Kerberos entries.
pub const KERBEROS_LOGIN_MODULE: &str = "krb5";

/// Environment variable naming a non-default ticket cache.
pub const TICKET_CACHE_ENV: &str = "KRB5CCNAME";

/// How a failing entry affects the overall login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlFlag {
    /// Must succeed; remaining entries still run.
    Required,
    /// Must succeed; failure stops the login.
    Requisite,
    /// Success is enough; remaining entries are skipped.
    Sufficient,
    /// Outcome only matters if no other entry is required.
    Optional,
}

impl fmt::Display for ControlFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Required => "required",
            Self::Requisite => "requisite",
            Self::Sufficient => "sufficient",
            Self::Optional => "optional",
        };
        f.write_str(name)
    }
}

/// A single authentication entry of a login context.
///
/// Entries are immutable once shared; collections of entries are replaced
/// wholesale when they change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEntry {
    login_module: String,
    control_flag: ControlFlag,
    options: BTreeMap<String, String>,
}

impl AuthEntry {
    /// Create an entry without options.
    pub fn new(login_module: impl Into<String>, control_flag: ControlFlag) -> Self {
        Self {
            login_module: login_module.into(),
            control_flag,
            options: BTreeMap::new(),
        }
    }

    /// Add an option to the entry.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Name of the login module this entry configures.
    #[must_use]
    pub fn login_module(&self) -> &str {
        &self.login_module
    }

    #[must_use]
    pub fn control_flag(&self) -> ControlFlag {
        self.control_flag
    }

    #[must_use]
    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    /// Look up a single option.
    #[must_use]
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

/// Kerberos entry that logs in from a keytab.
#[must_use]
pub fn keytab_entry(keytab: &Path, principal: &str) -> AuthEntry {
    AuthEntry::new(KERBEROS_LOGIN_MODULE, ControlFlag::Required)
        .with_option("keyTab", keytab.display().to_string())
        .with_option("principal", principal)
        .with_option("useKeyTab", "true")
        .with_option("storeKey", "true")
        .with_option("doNotPrompt", "true")
        .with_option("refreshKrb5Config", "true")
        .with_option("isInitiator", "true")
}

/// Kerberos entry that reuses the user's ticket cache.
///
/// `ticket_cache` overrides the default cache location (see [`TICKET_CACHE_ENV`]).
#[must_use]
pub fn ticket_cache_entry(ticket_cache: Option<&str>) -> AuthEntry {
    let entry = AuthEntry::new(KERBEROS_LOGIN_MODULE, ControlFlag::Optional)
        .with_option("useTicketCache", "true")
        .with_option("renewTGT", "true")
        .with_option("doNotPrompt", "true")
        .with_option("refreshKrb5Config", "true");
    match ticket_cache {
        Some(cache) => entry.with_option("ticketCache", cache),
        None => entry,
    }
}

/// Source of login context entries.
pub trait LoginConfiguration: Send + Sync + fmt::Debug {
    /// Entries for the named login context, in precedence order.
    ///
    /// Returns `None` if the context is unknown.
    fn entries(&self, name: &str) -> Option<Vec<AuthEntry>>;

    /// Reload entries from the backing source, if any.
    fn refresh(&self) {}
}

/// Fixed set of login contexts.
#[derive(Debug, Default, Clone)]
pub struct StaticLoginConfiguration {
    contexts: HashMap<String, Vec<AuthEntry>>,
}

impl StaticLoginConfiguration {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the entries of a login context, replacing any previous ones.
    #[must_use]
    pub fn with_entries(mut self, name: impl Into<String>, entries: Vec<AuthEntry>) -> Self {
        self.contexts.insert(name.into(), entries);
        self
    }
}

impl LoginConfiguration for StaticLoginConfiguration {
    fn entries(&self, name: &str) -> Option<Vec<AuthEntry>> {
        self.contexts.get(name).cloned()
    }
}

/// Login configuration whose entries can be extended at runtime.
///
/// Entries added through [`add_entries`](Self::add_entries) are appended to
/// any previously added entries for the same name, and are returned after the
/// delegate's entries. Nothing is ever removed individually.
#[derive(Debug)]
pub struct DynamicConfiguration {
    delegate: Option<Arc<dyn LoginConfiguration>>,
    dynamic_entries: DashMap<String, Vec<AuthEntry>>,
}

impl DynamicConfiguration {
    /// Create a dynamic configuration over an optional delegate.
    #[must_use]
    pub fn new(delegate: Option<Arc<dyn LoginConfiguration>>) -> Self {
        Self {
            delegate,
            dynamic_entries: DashMap::new(),
        }
    }

    /// Append entries to the named login context.
    ///
    /// Adding an empty list is a no-op.
    pub fn add_entries<I>(&self, name: &str, entries: I)
    where
        I: IntoIterator<Item = AuthEntry>,
    {
        let added: Vec<AuthEntry> = entries.into_iter().collect();
        if added.is_empty() {
            return;
        }

        match self.dynamic_entries.entry(name.to_string()) {
            Entry::Occupied(mut occupied) => {
                let merged: Vec<AuthEntry> =
                    occupied.get().iter().cloned().chain(added).collect();
                occupied.insert(merged);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(added);
            }
        }
    }

    /// The delegate configuration, if any.
    #[must_use]
    pub fn delegate(&self) -> Option<&Arc<dyn LoginConfiguration>> {
        self.delegate.as_ref()
    }
}

impl LoginConfiguration for DynamicConfiguration {
    fn entries(&self, name: &str) -> Option<Vec<AuthEntry>> {
        let delegated = self.delegate.as_ref().and_then(|d| d.entries(name));
        let dynamic = self
            .dynamic_entries
            .get(name)
            .map(|entries| entries.value().clone());

        match (delegated, dynamic) {
            (Some(mut merged), Some(dynamic)) => {
                merged.extend(dynamic);
                Some(merged)
            }
            (delegated, None) => delegated,
            (None, dynamic) => dynamic,
        }
    }

    fn refresh(&self) {
        if let Some(delegate) = &self.delegate {
            delegate.refresh();
        }
    }
}

/// Holder of the login configuration in effect for the process.
#[derive(Debug, Default)]
pub struct LoginConfigSlot {
    current: RwLock<Option<Arc<dyn LoginConfiguration>>>,
}

impl LoginConfigSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The slot shared by the whole process.
    #[must_use]
    pub fn global() -> Arc<LoginConfigSlot> {
        static GLOBAL: OnceLock<Arc<LoginConfigSlot>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(LoginConfigSlot::new())))
    }

    /// The currently installed configuration.
    #[must_use]
    pub fn get(&self) -> Option<Arc<dyn LoginConfiguration>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install a configuration, returning the one it replaces.
    pub fn replace(
        &self,
        config: Option<Arc<dyn LoginConfiguration>>,
    ) -> Option<Arc<dyn LoginConfiguration>> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, config)
    }
}
