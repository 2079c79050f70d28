//! Administrator login for the deployed VMs.
//!
//! A login is a username plus exactly one of an SSH public key or a password.
//! Keys can be given as literal text, as a path to a `.pub` file, or as a
//! reference to an `sshPublicKeys` resource whose key text is fetched when
//! template parameters are resolved.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Key prefixes accepted for literal OpenSSH public keys
const KEY_PREFIXES: &[&str] = &["ssh-rsa ", "ssh-ed25519 ", "ecdsa-sha2-", "sk-ssh-", "sk-ecdsa-"];

/// Authentication type, which also drives template selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    Key,
    Password,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::Key => "key",
            AuthType::Password => "password",
        }
    }
}

/// How an SSH public key is specified in a deployment file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SshKeySource {
    /// Resource id of a key-pair resource
    Resource { resource: String },
    /// Literal key text, or a path to a file holding it
    Text(String),
}

/// SSH key after file paths have been read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SshKey {
    Literal(String),
    Resource(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Login {
    SshKey(SshKey),
    Password(String),
}

/// Validated admin login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawUserConfig", into = "RawUserConfig")]
pub struct UserConfig {
    username: String,
    login: Login,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawUserConfig {
    username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sshkey: Option<SshKeySource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
}

impl UserConfig {
    /// Build a login. Exactly one of `sshkey` and `password` must be given;
    /// empty strings count as absent.
    pub fn new(
        username: impl Into<String>,
        sshkey: Option<SshKeySource>,
        password: Option<String>,
    ) -> Result<Self, ConfigError> {
        let username = username.into();
        if username.trim().is_empty() || username.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidUsername(username));
        }

        let sshkey = sshkey.filter(|k| match k {
            SshKeySource::Text(s) => !s.trim().is_empty(),
            SshKeySource::Resource { resource } => !resource.trim().is_empty(),
        });
        let password = password.filter(|p| !p.is_empty());

        let login = match (sshkey, password) {
            (None, None) => return Err(ConfigError::MissingCredential),
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingCredential),
            (Some(source), None) => Login::SshKey(resolve_key_source(source)?),
            (None, Some(password)) => Login::Password(password),
        };

        Ok(Self { username, login })
    }

    /// Login with a literal key or key file
    pub fn with_key(username: impl Into<String>, key: impl Into<String>) -> Result<Self, ConfigError> {
        Self::new(username, Some(SshKeySource::Text(key.into())), None)
    }

    /// Login with a password
    pub fn with_password(
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        Self::new(username, None, Some(password.into()))
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn login(&self) -> &Login {
        &self.login
    }

    pub fn auth_type(&self) -> AuthType {
        match self.login {
            Login::SshKey(_) => AuthType::Key,
            Login::Password(_) => AuthType::Password,
        }
    }
}

fn resolve_key_source(source: SshKeySource) -> Result<SshKey, ConfigError> {
    match source {
        SshKeySource::Resource { resource } => {
            if !resource
                .to_ascii_lowercase()
                .contains("/providers/microsoft.compute/sshpublickeys/")
            {
                return Err(ConfigError::InvalidSshKey(format!(
                    "'{}' is not an sshPublicKeys resource id",
                    resource
                )));
            }
            Ok(SshKey::Resource(resource))
        }
        SshKeySource::Text(text) => {
            let expanded = shellexpand::tilde(text.trim());
            let path = Path::new(expanded.as_ref());
            let key = if path.is_file() {
                std::fs::read_to_string(path)
                    .map_err(|e| ConfigError::KeyFile(path.display().to_string(), e.to_string()))?
                    .trim()
                    .to_string()
            } else {
                text.trim().to_string()
            };

            if !KEY_PREFIXES.iter().any(|p| key.starts_with(p)) {
                return Err(ConfigError::InvalidSshKey(
                    "not an OpenSSH public key or readable key file".to_string(),
                ));
            }
            Ok(SshKey::Literal(key))
        }
    }
}

impl TryFrom<RawUserConfig> for UserConfig {
    type Error = ConfigError;

    fn try_from(raw: RawUserConfig) -> Result<Self, Self::Error> {
        UserConfig::new(raw.username, raw.sshkey, raw.password)
    }
}

impl From<UserConfig> for RawUserConfig {
    fn from(user: UserConfig) -> Self {
        let (sshkey, password) = match user.login {
            Login::SshKey(SshKey::Literal(key)) => (Some(SshKeySource::Text(key)), None),
            Login::SshKey(SshKey::Resource(resource)) => {
                (Some(SshKeySource::Resource { resource }), None)
            }
            Login::Password(password) => (None, Some(password)),
        };
        RawUserConfig {
            username: user.username,
            sshkey,
            password,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIHk user@host";

    #[test]
    fn test_password_login() {
        let user = UserConfig::with_password("azureuser", "Sup3r-secret!").unwrap();
        assert_eq!(user.username(), "azureuser");
        assert_eq!(user.auth_type(), AuthType::Password);
    }

    #[test]
    fn test_literal_key_login() {
        let user = UserConfig::with_key("azureuser", KEY).unwrap();
        assert_eq!(user.login(), &Login::SshKey(SshKey::Literal(KEY.to_string())));
        assert_eq!(user.auth_type(), AuthType::Key);
    }

    #[test]
    fn test_neither_key_nor_password() {
        let result = UserConfig::new("azureuser", None, None);
        assert_eq!(result, Err(ConfigError::MissingCredential));
    }

    #[test]
    fn test_empty_strings_count_as_absent() {
        let result = UserConfig::new(
            "azureuser",
            Some(SshKeySource::Text("  ".to_string())),
            Some(String::new()),
        );
        assert_eq!(result, Err(ConfigError::MissingCredential));
    }

    #[test]
    fn test_both_key_and_password() {
        let result = UserConfig::new(
            "azureuser",
            Some(SshKeySource::Text(KEY.to_string())),
            Some("password".to_string()),
        );
        assert_eq!(result, Err(ConfigError::ConflictingCredential));
    }

    #[test]
    fn test_invalid_username() {
        assert!(matches!(
            UserConfig::with_password("", "pw"),
            Err(ConfigError::InvalidUsername(_))
        ));
        assert!(matches!(
            UserConfig::with_password("azure user", "pw"),
            Err(ConfigError::InvalidUsername(_))
        ));
    }

    #[test]
    fn test_key_read_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", KEY).unwrap();

        let user = UserConfig::with_key("azureuser", file.path().display().to_string()).unwrap();
        assert_eq!(user.login(), &Login::SshKey(SshKey::Literal(KEY.to_string())));
    }

    #[test]
    fn test_garbage_key_rejected() {
        let result = UserConfig::with_key("azureuser", "/no/such/key.pub");
        assert!(matches!(result, Err(ConfigError::InvalidSshKey(_))));
    }

    #[test]
    fn test_key_resource() {
        let id = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/sshPublicKeys/mykey";
        let user = UserConfig::new(
            "azureuser",
            Some(SshKeySource::Resource {
                resource: id.to_string(),
            }),
            None,
        )
        .unwrap();
        assert_eq!(user.login(), &Login::SshKey(SshKey::Resource(id.to_string())));

        let wrong = UserConfig::new(
            "azureuser",
            Some(SshKeySource::Resource {
                resource: "/subscriptions/sub/resourceGroups/rg".to_string(),
            }),
            None,
        );
        assert!(matches!(wrong, Err(ConfigError::InvalidSshKey(_))));
    }

    #[test]
    fn test_deserialize_checks_login() {
        let json = r#"{"username": "azureuser", "sshkey": "ssh-rsa AAAAB3Nza", "password": "pw"}"#;
        let result: Result<UserConfig, _> = serde_json::from_str(json);
        assert!(result.is_err());

        let json = r#"{"username": "azureuser", "sshkey": {"resource": "/subscriptions/s/resourceGroups/r/providers/Microsoft.Compute/sshPublicKeys/k"}}"#;
        let user: UserConfig = serde_json::from_str(json).unwrap();
        assert_eq!(user.auth_type(), AuthType::Key);
    }

    #[test]
    fn test_serialize_password_login() {
        let user = UserConfig::with_password("azureuser", "pw").unwrap();
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["username"], "azureuser");
        assert_eq!(json["password"], "pw");
        assert!(json.get("sshkey").is_none());
    }
}
