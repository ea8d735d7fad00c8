//! End-to-end security bootstrap tests.
//!
//! Each test runs the standard module chain against private property and
//! login configuration stores, so tests never share process-wide state.

use std::io;
use std::sync::Arc;

use tempfile::NamedTempFile;

use dataplane_security_core::config::SecurityConfig;
use dataplane_security_core::error::{ConfigError, SecuredError, SecurityError};
use dataplane_security_core::security::{
    AmbientIdentityProvider, IdentityProvider, LoginConfigSlot, ModuleChain, PropertyStore,
    SecurityConfiguration, SecurityContext, SecurityContextCell, KERBEROS_LOGIN_MODULE, LOGIN_CONFIG_PROPERTY,
    ZK_ENABLE_CLIENT_SASL, ZK_LOGIN_CONTEXT_NAME, ZK_SASL_CLIENT_USERNAME,
};
use dataplane_security_core::testing::{MockIdentityProvider, ProviderCall};

struct Bootstrap {
    cell: SecurityContextCell,
    slot: Arc<LoginConfigSlot>,
    properties: Arc<PropertyStore>,
}

impl Bootstrap {
    fn new() -> Self {
        Self {
            cell: SecurityContextCell::new(),
            slot: Arc::new(LoginConfigSlot::new()),
            properties: Arc::new(PropertyStore::new()),
        }
    }

    fn chain(&self, provider: &Arc<dyn IdentityProvider>) -> ModuleChain {
        ModuleChain::standard(
            Arc::clone(provider),
            Arc::clone(&self.slot),
            Arc::clone(&self.properties),
        )
    }

    fn install(
        &self,
        config: &SecurityConfiguration,
        provider: Arc<dyn IdentityProvider>,
    ) -> Result<Arc<SecurityContext>, SecurityError> {
        let chain = self.chain(&provider);
        self.cell.install(config, provider, chain)
    }
}

#[test]
fn test_ambient_bootstrap_without_strong_auth() {
    let bootstrap = Bootstrap::new();
    let provider: Arc<dyn IdentityProvider> = Arc::new(AmbientIdentityProvider::new());

    let context = bootstrap
        .install(&SecurityConfiguration::default(), provider)
        .unwrap();

    assert!(!context.identity().has_strong_credentials());
    assert!(bootstrap.cell.installed().is_some());

    let answer: Result<&str, io::Error> = Ok("done");
    assert_eq!(context.run_secured(|| answer).unwrap(), "done");

    bootstrap.cell.reset().unwrap();
    assert!(bootstrap.cell.installed().is_none());
}

#[test]
fn test_run_secured_returns_operation_error_unchanged() {
    let bootstrap = Bootstrap::new();
    let provider: Arc<dyn IdentityProvider> =
        Arc::new(MockIdentityProvider::new(false).with_user_name("worker"));

    let context = bootstrap
        .install(&SecurityConfiguration::default(), provider)
        .unwrap();

    let result: Result<(), SecuredError<io::Error>> = context.run_secured(|| {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "no access"))
    });
    match result {
        Err(SecuredError::Operation(e)) => {
            assert_eq!(e.kind(), io::ErrorKind::PermissionDenied);
            assert_eq!(e.to_string(), "no access");
        }
        other => panic!("expected operation error, got {other:?}"),
    }
}

#[test]
fn test_keytab_login_installs_login_contexts() {
    let keytab = NamedTempFile::new().unwrap();
    let config = SecurityConfiguration::builder()
        .credentials(
            Some(keytab.path().to_path_buf()),
            Some("node/host@EXAMPLE.COM".to_string()),
        )
        .login_contexts(["Client", "KafkaClient"])
        .build()
        .unwrap();

    let bootstrap = Bootstrap::new();
    let mock = Arc::new(MockIdentityProvider::new(true));
    let context = bootstrap
        .install(&config, Arc::clone(&mock) as Arc<dyn IdentityProvider>)
        .unwrap();

    assert!(context.identity().has_strong_credentials());
    assert_eq!(context.identity().user_name(), "node/host@EXAMPLE.COM");
    assert!(mock.calls().contains(&ProviderCall::LoginFromKeytab {
        principal: "node/host@EXAMPLE.COM".to_string(),
        keytab: keytab.path().to_path_buf(),
    }));

    let login_config = bootstrap.slot.get().unwrap();
    for name in ["Client", "KafkaClient"] {
        let entries = login_config.entries(name).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries
            .iter()
            .all(|e| e.login_module() == KERBEROS_LOGIN_MODULE));
        assert_eq!(
            entries[1].option("principal"),
            Some("node/host@EXAMPLE.COM")
        );
    }
    assert_eq!(
        bootstrap.properties.get(LOGIN_CONFIG_PROPERTY),
        Some(String::new())
    );

    bootstrap.cell.reset().unwrap();
    assert!(bootstrap.slot.get().is_none());
    assert_eq!(bootstrap.properties.get(LOGIN_CONFIG_PROPERTY), None);
}

#[test]
fn test_strong_auth_without_credentials_fails_and_rolls_back() {
    let config = SecurityConfiguration::builder()
        .zookeeper_sasl_disabled(true)
        .build()
        .unwrap();

    let bootstrap = Bootstrap::new();
    let provider: Arc<dyn IdentityProvider> = Arc::new(MockIdentityProvider::new(true));

    let err = bootstrap.install(&config, provider).unwrap_err();
    match err {
        SecurityError::ModuleInstall { module, source } => {
            assert_eq!(module, "identity-login");
            assert!(matches!(
                *source,
                SecurityError::MissingStrongCredentials { .. }
            ));
        }
        other => panic!("expected module install error, got {other:?}"),
    }

    assert!(bootstrap.cell.installed().is_none());
    assert_eq!(bootstrap.properties.get(ZK_ENABLE_CLIENT_SASL), None);
    assert!(bootstrap.slot.get().is_none());
}

#[test]
fn test_zookeeper_properties_restored_after_reset() {
    let config = SecurityConfiguration::builder()
        .zookeeper_service_name("zk-service")
        .zookeeper_login_context("ZkClient")
        .zookeeper_sasl_disabled(true)
        .build()
        .unwrap();

    let bootstrap = Bootstrap::new();
    bootstrap.properties.set(ZK_SASL_CLIENT_USERNAME, "previous");

    let provider: Arc<dyn IdentityProvider> = Arc::new(MockIdentityProvider::new(false));
    bootstrap.install(&config, provider).unwrap();

    assert_eq!(
        bootstrap.properties.get(ZK_ENABLE_CLIENT_SASL).as_deref(),
        Some("false")
    );
    assert_eq!(
        bootstrap.properties.get(ZK_SASL_CLIENT_USERNAME).as_deref(),
        Some("zk-service")
    );
    assert_eq!(
        bootstrap.properties.get(ZK_LOGIN_CONTEXT_NAME).as_deref(),
        Some("ZkClient")
    );

    bootstrap.cell.reset().unwrap();

    assert_eq!(bootstrap.properties.get(ZK_ENABLE_CLIENT_SASL), None);
    assert_eq!(
        bootstrap.properties.get(ZK_SASL_CLIENT_USERNAME).as_deref(),
        Some("previous")
    );
    assert_eq!(bootstrap.properties.get(ZK_LOGIN_CONTEXT_NAME), None);
}

#[test]
fn test_incomplete_credentials_rejected() {
    let keytab = NamedTempFile::new().unwrap();

    let err = SecurityConfiguration::builder()
        .credentials(Some(keytab.path().to_path_buf()), None)
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigError::IncompleteCredentials {
            keytab: true,
            principal: false
        }
    ));

    let err = SecurityConfiguration::builder()
        .credentials(
            Some(keytab.path().with_extension("missing")),
            Some("node@EXAMPLE.COM".to_string()),
        )
        .build()
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidKeytab { .. }));
}

#[test]
fn test_security_configuration_from_node_config() {
    let mut config = SecurityConfig::default();
    config.kerberos.use_ticket_cache = false;
    config.kerberos.login_contexts = vec!["Client".to_string()];

    let security = SecurityConfiguration::from_config(&config).unwrap();
    assert!(!security.use_ticket_cache());
    assert_eq!(security.login_contexts(), ["Client".to_string()]);
    assert!(!security.has_credentials());
}
