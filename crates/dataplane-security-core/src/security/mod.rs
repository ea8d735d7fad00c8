//! Process security bootstrap.
//!
//! A node establishes its security identity once, early in its lifetime:
//!
//! 1. [`SecurityConfiguration`] is built and validated from the node config.
//! 2. A [`ModuleChain`] installs the login user, the login configuration and
//!    the ZooKeeper SASL properties, in that order.
//! 3. The resulting [`Identity`] is placed in a [`SecurityContextCell`], from
//!    which any task can run work as that identity.
//!
//! Kerberos itself is never implemented here; the [`IdentityProvider`] trait
//! is the boundary to whatever performs the actual login.

pub mod configuration;
pub mod context;
pub mod identity;
pub mod login_config;
pub mod modules;
pub mod properties;

pub use configuration::{SecurityConfiguration, SecurityConfigurationBuilder};
pub use context::{SecurityContext, SecurityContextCell};
pub use identity::{
    AmbientIdentityProvider, Identity, IdentityProvider, Token, DELEGATION_TOKEN_KIND,
    TOKEN_FILE_LOCATION_ENV,
};
pub use login_config::{
    keytab_entry, ticket_cache_entry, AuthEntry, ControlFlag, DynamicConfiguration,
    LoginConfigSlot, LoginConfiguration, StaticLoginConfiguration, KERBEROS_LOGIN_MODULE,
    TICKET_CACHE_ENV,
};
pub use modules::{
    IdentityLoginModule, LoginContextModule, ModuleChain, SecurityModule, ZooKeeperModule,
    LOGIN_CONFIG_PROPERTY, ZK_ENABLE_CLIENT_SASL, ZK_LOGIN_CONTEXT_NAME,
    ZK_SASL_CLIENT_USERNAME,
};
pub use properties::PropertyStore;
