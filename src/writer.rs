//! Building `noauth-config.xml` documents and the links that open them.
//!
//! The counterpart of [`document`](crate::document): a service that hands
//! out one-off sessions assembles profiles here, writes the file for an
//! identity, and sends the user a link carrying the same identity.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::info;
use url::{Url, form_urlencoded};

use crate::document::ConnectionProfile;
use crate::error::AuthError;
use crate::identity::Identity;
use crate::provider::PROVIDER_IDENTIFIER;
use crate::resolver::ConfigFileResolver;

#[derive(Debug, Clone, Default)]
pub struct DocumentBuilder {
    profiles: Vec<(String, ConnectionProfile)>,
    delete: bool,
    valid_to: Option<DateTime<Utc>>,
}

impl DocumentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a profile; a profile with the same name is replaced in place.
    pub fn profile(mut self, name: impl Into<String>, profile: ConnectionProfile) -> Self {
        let name = name.into();
        match self.profiles.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = profile,
            None => self.profiles.push((name, profile)),
        }
        self
    }

    /// Delete the file after its first successful read.
    pub fn delete_after_read(mut self, delete: bool) -> Self {
        self.delete = delete;
        self
    }

    pub fn valid_to(mut self, valid_to: DateTime<Utc>) -> Self {
        self.valid_to = Some(valid_to);
        self
    }

    pub fn to_xml(&self) -> String {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        let _ = write!(xml, "<configs delete=\"{}\"", self.delete);
        if let Some(valid_to) = self.valid_to {
            let _ = write!(
                xml,
                " valid_to=\"{}\"",
                valid_to.to_rfc3339_opts(SecondsFormat::Secs, false)
            );
        }
        xml.push_str(">\n");

        for (name, profile) in &self.profiles {
            let _ = writeln!(
                xml,
                "  <config name=\"{}\" protocol=\"{}\">",
                escape_attr(name),
                escape_attr(&profile.protocol)
            );
            let mut params: Vec<_> = profile.parameters.iter().collect();
            params.sort();
            for (key, value) in params {
                let _ = writeln!(
                    xml,
                    "    <param name=\"{}\" value=\"{}\"/>",
                    escape_attr(key),
                    escape_attr(value)
                );
            }
            xml.push_str("  </config>\n");
        }
        xml.push_str("</configs>\n");
        xml
    }

    /// Write the document to the file selected by `identity` under `home_dir`.
    pub fn write_for(&self, home_dir: &Path, identity: &Identity) -> Result<PathBuf, AuthError> {
        let prefix = identity.prefix();
        let path = ConfigFileResolver::new(home_dir).resolve(prefix.as_deref())?;
        fs::write(&path, self.to_xml())?;
        info!(path = %path.display(), profiles = self.profiles.len(), "configuration written");
        Ok(path)
    }
}

/// Gateway home link for `identity`: `{base}#/?username=..&ident=..`.
pub fn home_link(base: &str, identity: &Identity) -> Result<String, AuthError> {
    link(base, "/", identity)
}

/// Link that opens profile `name` directly: `{base}#/client/{id}?username=..&ident=..`.
pub fn client_link(base: &str, name: &str, identity: &Identity) -> Result<String, AuthError> {
    link(base, &format!("/client/{}", client_identifier(name)), identity)
}

/// Client identifier the gateway web app uses for a connection of this provider.
pub fn client_identifier(name: &str) -> String {
    STANDARD.encode(format!("{name}\0c\0{PROVIDER_IDENTIFIER}"))
}

fn link(base: &str, route: &str, identity: &Identity) -> Result<String, AuthError> {
    let mut url = Url::parse(base).map_err(|e| AuthError::Config(format!("invalid base url {base:?}: {e}")))?;
    let mut query = form_urlencoded::Serializer::new(String::new());
    if !identity.username.is_empty() {
        query.append_pair("username", &identity.username);
    }
    query.append_pair("ident", &identity.ident);
    url.set_fragment(Some(&format!("{route}?{}", query.finish())));
    Ok(url.into())
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            '\t' => out.push_str("&#9;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn rdp() -> ConnectionProfile {
        let mut p = ConnectionProfile::new("rdp");
        p.parameters.insert("hostname".into(), "192.168.0.130".into());
        p.parameters.insert("password".into(), "a\"b<c>&d".into());
        p
    }

    #[test]
    fn rendered_document_parses_back() {
        let valid_to = Utc.with_ymd_and_hms(2015, 9, 17, 12, 39, 1).unwrap();
        let xml = DocumentBuilder::new()
            .profile("TestVm RDP", rdp())
            .profile("TestVm VNC", ConnectionProfile::new("vnc"))
            .delete_after_read(true)
            .valid_to(valid_to)
            .to_xml();

        assert!(xml.contains(r#"<configs delete="true" valid_to="2015-09-17T12:39:01+00:00">"#));
        let doc = document::parse_str(&xml).unwrap();
        assert!(doc.delete_after_read);
        assert_eq!(doc.valid_to, Some(valid_to));
        assert_eq!(doc.profiles["TestVm RDP"], rdp());
        assert_eq!(doc.profiles["TestVm VNC"].protocol, "vnc");
    }

    #[test]
    fn same_name_replaces_profile() {
        let xml = DocumentBuilder::new()
            .profile("a", ConnectionProfile::new("rdp"))
            .profile("a", ConnectionProfile::new("ssh"))
            .to_xml();
        assert_eq!(xml.matches("<config ").count(), 1);
        assert!(xml.contains(r#"protocol="ssh""#));
    }

    #[test]
    fn write_for_identity_uses_prefixed_file() {
        let tmp = TempDir::new().unwrap();
        let path = DocumentBuilder::new()
            .profile("a", rdp())
            .write_for(tmp.path(), &Identity::new("mst_henh", "1337"))
            .unwrap();
        assert_eq!(path, tmp.path().join("mst_henh_1337_noauth-config.xml"));
        assert!(path.exists());
    }

    #[test]
    fn write_for_rejects_bad_identity() {
        let tmp = TempDir::new().unwrap();
        let err = DocumentBuilder::new()
            .write_for(tmp.path(), &Identity::new("x/y", "1"))
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidIdentifier(_)));
    }

    #[test]
    fn client_identifier_encodes_name_and_provider() {
        assert_eq!(client_identifier("TestVm RDP"), "VGVzdFZtIFJEUABjAHVzZXJmaWxlc2F1dGg=");
    }

    #[test]
    fn home_link_carries_identity() {
        let link = home_link("http://localhost:8080/guacamole/", &Identity::new("mst_henh", "1337")).unwrap();
        assert_eq!(link, "http://localhost:8080/guacamole/#/?username=mst_henh&ident=1337");
    }

    #[test]
    fn client_link_without_username() {
        let link = client_link("http://localhost:8080/guacamole/", "TestVm RDP", &Identity::new("", "1337")).unwrap();
        assert_eq!(
            link,
            "http://localhost:8080/guacamole/#/client/VGVzdFZtIFJEUABjAHVzZXJmaWxlc2F1dGg=?ident=1337"
        );
    }

    #[test]
    fn invalid_base_url_is_config_error() {
        assert!(matches!(
            home_link("not a url", &Identity::default()),
            Err(AuthError::Config(_))
        ));
    }
}
