use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use x509_cert::der::Decode;
use x509_cert::Certificate;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("{0} is required when SAML2 authentication is enabled")]
    MissingField(&'static str),
}

/// SAML2 package configuration.
///
/// Booleans use the appliance encoding (`"yes"` / `""`). The certificate and
/// custom configuration are stored base64-encoded, exactly as the settings
/// form submits them. Unknown keys are rejected at parse time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Saml2Config {
    #[serde(with = "pfsense_bool")]
    pub enable: bool,
    #[serde(with = "pfsense_bool")]
    pub strip_username: bool,
    #[serde(with = "pfsense_bool")]
    pub debug_mode: bool,
    pub idp_metadata_url: String,
    pub idp_entity_id: String,
    pub idp_sign_on_url: String,
    pub idp_groups_attribute: String,
    pub idp_x509_cert: String,
    pub sp_base_url: String,
    pub custom_conf: String,
}

impl Saml2Config {
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn from_json_slice(input: &[u8]) -> Result<Self, ConfigError> {
        Ok(serde_json::from_slice(input)?)
    }

    /// Stable pretty-printed JSON. Field order follows the struct, so equal
    /// records always serialize to identical bytes.
    pub fn canonical_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every field-level constraint. Side-effect free.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("idp_metadata_url", &self.idp_metadata_url),
            ("idp_sign_on_url", &self.idp_sign_on_url),
            ("sp_base_url", &self.sp_base_url),
        ] {
            if !value.is_empty() {
                validate_url(field, value)?;
            }
        }

        for (field, value) in [
            ("idp_entity_id", &self.idp_entity_id),
            ("idp_groups_attribute", &self.idp_groups_attribute),
        ] {
            if value.chars().any(char::is_control) {
                return Err(ConfigError::InvalidField {
                    field,
                    reason: "must not contain control characters".to_owned(),
                });
            }
        }

        if !self.idp_x509_cert.is_empty() {
            self.decoded_cert()?;
        }
        if !self.custom_conf.is_empty() {
            self.decoded_custom_conf()?;
        }

        if self.enable {
            if self.idp_entity_id.trim().is_empty() {
                return Err(ConfigError::MissingField("idp_entity_id"));
            }
            if self.sp_base_url.is_empty() {
                return Err(ConfigError::MissingField("sp_base_url"));
            }
            if self.idp_metadata_url.is_empty() {
                if self.idp_sign_on_url.is_empty() {
                    return Err(ConfigError::MissingField("idp_sign_on_url"));
                }
                if self.idp_x509_cert.is_empty() {
                    return Err(ConfigError::MissingField("idp_x509_cert"));
                }
            }
        }

        Ok(())
    }

    /// DER bytes of the first certificate in `idp_x509_cert`.
    ///
    /// The decoded text may be a PEM document or a bare base64 DER body, which
    /// is how most identity providers display their signing certificate.
    pub fn decoded_cert(&self) -> Result<Vec<u8>, ConfigError> {
        const FIELD: &str = "idp_x509_cert";
        let text = decode_blob(FIELD, &self.idp_x509_cert)?;
        let invalid = |reason: String| ConfigError::InvalidField {
            field: FIELD,
            reason,
        };

        let der = if text.contains("-----BEGIN") {
            let mut reader = text.as_bytes();
            let der = match rustls_pemfile::certs(&mut reader).next() {
                Some(Ok(der)) => der.to_vec(),
                Some(Err(e)) => return Err(invalid(format!("unreadable PEM certificate: {e}"))),
                None => return Err(invalid("no CERTIFICATE block found".to_owned())),
            };
            der
        } else {
            let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
            STANDARD
                .decode(compact)
                .map_err(|e| invalid(format!("certificate body is not base64: {e}")))?
        };
        Certificate::from_der(&der)
            .map_err(|e| invalid(format!("not an X.509 certificate: {e}")))?;
        Ok(der)
    }

    /// The custom library overrides as a JSON object.
    pub fn decoded_custom_conf(
        &self,
    ) -> Result<serde_json::Map<String, serde_json::Value>, ConfigError> {
        const FIELD: &str = "custom_conf";
        let text = decode_blob(FIELD, &self.custom_conf)?;
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(_) => Err(ConfigError::InvalidField {
                field: FIELD,
                reason: "top level must be a JSON object".to_owned(),
            }),
            Err(e) => Err(ConfigError::InvalidField {
                field: FIELD,
                reason: format!("not valid JSON: {e}"),
            }),
        }
    }

    /// Entity ID the service provider advertises to the IdP.
    pub fn sp_entity_id(&self) -> String {
        format!(
            "{}/saml2_auth/sso/metadata/",
            self.sp_base_url.trim_end_matches('/')
        )
    }

    /// Assertion consumer service URL.
    pub fn sp_acs_url(&self) -> String {
        format!(
            "{}/saml2_auth/sso/acs/",
            self.sp_base_url.trim_end_matches('/')
        )
    }
}

/// Encode a raw form value the way it is persisted.
pub fn encode_blob(raw: &str) -> String {
    STANDARD.encode(raw.as_bytes())
}

fn decode_blob(field: &'static str, value: &str) -> Result<String, ConfigError> {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| ConfigError::InvalidField {
            field,
            reason: format!("not valid base64: {e}"),
        })?;
    String::from_utf8(bytes).map_err(|_| ConfigError::InvalidField {
        field,
        reason: "decoded value is not UTF-8 text".to_owned(),
    })
}

fn validate_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value).map_err(|e| ConfigError::InvalidField {
        field,
        reason: format!("'{value}' is not a valid URL: {e}"),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::InvalidField {
            field,
            reason: format!("unsupported URL scheme '{other}'"),
        }),
    }
}

mod pfsense_bool {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "yes" } else { "" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Bool(b) => Ok(b),
            Raw::Text(s) => match s.as_str() {
                "yes" | "on" | "true" => Ok(true),
                "" | "no" | "off" | "false" => Ok(false),
                other => Err(D::Error::custom(format!("invalid boolean '{other}'"))),
            },
        }
    }
}
