//! Mailbox adapters.

pub mod graph;
pub mod imap;
pub mod normalize;

use std::sync::Arc;

use crate::config::{GraphAuthMethod, MailboxAccess, MailboxConfig, secret_from_env};
use crate::error::ConfigError;
use crate::pipeline::types::MailboxAdapter;

pub use graph::{GraphAuth, GraphMailbox};
pub use imap::{ImapMailbox, ImapSettings};

/// Build one adapter per configured mailbox, reading credentials from the
/// environment. Any missing credential or unsupported auth method is fatal.
pub fn build_mailboxes(
    configs: &[MailboxConfig],
    lookback_days: u32,
) -> Result<Vec<Arc<dyn MailboxAdapter>>, ConfigError> {
    configs
        .iter()
        .map(|cfg| build_mailbox(cfg, lookback_days))
        .collect()
}

fn build_mailbox(
    cfg: &MailboxConfig,
    lookback_days: u32,
) -> Result<Arc<dyn MailboxAdapter>, ConfigError> {
    match &cfg.access {
        MailboxAccess::Imap {
            host,
            port,
            ssl,
            user_env,
            pass_env,
        } => {
            let username = std::env::var(user_env)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(user_env.clone()))?;
            Ok(Arc::new(ImapMailbox::new(ImapSettings {
                name: cfg.name.clone(),
                host: host.clone(),
                port: *port,
                ssl: *ssl,
                folders: cfg.folders.clone(),
                username,
                password: secret_from_env(pass_env)?,
                lookback_days,
            })))
        }
        MailboxAccess::MsGraph {
            user,
            method,
            tenant,
            client_id,
            client_secret_env,
            token_env,
        } => {
            let auth = match method {
                GraphAuthMethod::AccessToken => {
                    let var = need(token_env, &cfg.name, "token_env")?;
                    GraphAuth::AccessToken(secret_from_env(var)?)
                }
                GraphAuthMethod::ClientSecret => GraphAuth::ClientCredentials {
                    tenant: need(tenant, &cfg.name, "tenant")?.clone(),
                    client_id: need(client_id, &cfg.name, "client_id")?.clone(),
                    client_secret: secret_from_env(need(
                        client_secret_env,
                        &cfg.name,
                        "client_secret_env",
                    )?)?,
                },
                GraphAuthMethod::DeviceCode | GraphAuthMethod::Certificate => {
                    return Err(ConfigError::InvalidValue {
                        key: format!("mailboxes.{}.access.method", cfg.name),
                        message: format!(
                            "'{method}' is not supported; use access_token or client_secret"
                        ),
                    });
                }
            };
            Ok(Arc::new(GraphMailbox::new(
                cfg.name.clone(),
                user.clone(),
                cfg.folders.clone(),
                auth,
                lookback_days,
            )))
        }
    }
}

fn need<'a>(
    value: &'a Option<String>,
    mailbox: &str,
    key: &str,
) -> Result<&'a String, ConfigError> {
    value.as_ref().ok_or_else(|| ConfigError::MissingRequired {
        key: format!("mailboxes.{mailbox}.access.{key}"),
        hint: "Required for this Graph access method.".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn mailboxes(yaml: &str) -> Vec<MailboxConfig> {
        AppConfig::from_yaml(yaml).unwrap().mailboxes
    }

    #[test]
    fn device_code_is_rejected() {
        let cfgs = mailboxes(
            r#"
mailboxes:
  - name: work
    access:
      type: ms_graph
      user: me@example.com
      method: device_code
"#,
        );
        let err = build_mailboxes(&cfgs, 7).err().unwrap();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "mailboxes.work.access.method"));
    }

    #[test]
    fn client_secret_needs_tenant() {
        let cfgs = mailboxes(
            r#"
mailboxes:
  - name: work
    access:
      type: ms_graph
      user: me@example.com
      method: client_secret
      client_id: abc
      client_secret_env: PARCEL_REROUTER_TEST_SECRET
"#,
        );
        let err = build_mailboxes(&cfgs, 7).err().unwrap();
        assert!(err.to_string().contains("tenant"));
    }

    #[test]
    fn missing_imap_credentials_are_fatal() {
        let cfgs = mailboxes(
            r#"
mailboxes:
  - name: home
    access:
      type: imap
      host: imap.example.com
      user_env: PARCEL_REROUTER_TEST_NO_USER
      pass_env: PARCEL_REROUTER_TEST_NO_PASS
"#,
        );
        let err = build_mailboxes(&cfgs, 7).err().unwrap();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref v) if v == "PARCEL_REROUTER_TEST_NO_USER"));
    }

    #[test]
    fn no_mailboxes_is_empty() {
        assert!(build_mailboxes(&[], 7).unwrap().is_empty());
    }
}
