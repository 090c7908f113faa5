//! `noauth-config.xml` parsing.
//!
//! ```xml
//! <configs delete="true" valid_to="2015-09-17T14:39:01+02:00">
//!   <config name="TestVm RDP" protocol="rdp">
//!     <param name="hostname" value="192.168.0.130"/>
//!   </config>
//! </configs>
//! ```
//!
//! The element tree is walked once, in document order, opening each element
//! before its children and closing it after them. A small state machine
//! (`Idle` / `InProfile`) enforces the structure: no nested `config`, no `param` outside a `config`, and every
//! `config` carries `name` and `protocol`. Elements with other names are
//! ignored.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone, Utc};
use roxmltree::{Document, Node};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::AuthError;

const ROOT_ELEMENT: &str = "configs";
const CONFIG_ELEMENT: &str = "config";
const PARAM_ELEMENT: &str = "param";

/// Values of `delete` that request removal of the file after reading.
const DELETE_TRUTHY: [&str; 3] = ["yes", "true", "1"];

/// A named backend connection: protocol plus literal parameter values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionProfile {
    pub protocol: String,
    pub parameters: HashMap<String, String>,
}

impl ConnectionProfile {
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            parameters: HashMap::new(),
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }
}

/// Profile name -> profile.
pub type ProfileSet = HashMap<String, ConnectionProfile>;

/// Everything read from one document.
#[derive(Debug, Clone, Default)]
pub struct ConfigDocument {
    /// Shared read-only once parsing is done.
    pub profiles: Arc<ProfileSet>,
    pub valid_to: Option<DateTime<Utc>>,
    pub delete_after_read: bool,
}

impl ConfigDocument {
    /// `true` when `valid_to` is set and lies strictly before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_to.is_some_and(|valid_to| valid_to < now)
    }
}

/// Parser switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Fail on a repeated profile name instead of letting the last one win.
    pub strict_duplicates: bool,
}

/// Parse a document from a byte stream with default options.
pub fn parse<R: Read>(reader: R) -> Result<ConfigDocument, AuthError> {
    parse_with(reader, ParseOptions::default())
}

pub fn parse_with<R: Read>(mut reader: R, options: ParseOptions) -> Result<ConfigDocument, AuthError> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    parse_str_with(&text, options)
}

pub fn parse_str(text: &str) -> Result<ConfigDocument, AuthError> {
    parse_str_with(text, ParseOptions::default())
}

pub fn parse_str_with(text: &str, options: ParseOptions) -> Result<ConfigDocument, AuthError> {
    let doc = Document::parse(text).map_err(|e| AuthError::XmlSyntax(e.to_string()))?;

    let mut parser = DocumentParser::new(options);
    walk(&mut parser, doc.root_element())?;
    Ok(parser.finish())
}

/// Feed `node` and its element descendants to the parser in document order.
fn walk(parser: &mut DocumentParser, node: Node<'_, '_>) -> Result<(), AuthError> {
    parser.open(node)?;
    for child in node.children().filter(Node::is_element) {
        walk(parser, child)?;
    }
    parser.close(node)
}

// ── state machine ────────────────────────────────────────────────────────────

enum State {
    Idle,
    InProfile { name: String, profile: ConnectionProfile },
}

struct DocumentParser {
    options: ParseOptions,
    state: State,
    profiles: ProfileSet,
    root_seen: bool,
    valid_to: Option<DateTime<Utc>>,
    delete_after_read: bool,
}

impl DocumentParser {
    fn new(options: ParseOptions) -> Self {
        Self {
            options,
            state: State::Idle,
            profiles: ProfileSet::new(),
            root_seen: false,
            valid_to: None,
            delete_after_read: false,
        }
    }

    fn open(&mut self, node: Node<'_, '_>) -> Result<(), AuthError> {
        match node.tag_name().name() {
            CONFIG_ELEMENT => {
                if matches!(self.state, State::InProfile { .. }) {
                    return Err(AuthError::NestedConfig);
                }
                let name = node
                    .attribute("name")
                    .ok_or(AuthError::MissingAttribute { attribute: "name" })?;
                let protocol = node
                    .attribute("protocol")
                    .ok_or(AuthError::MissingAttribute { attribute: "protocol" })?;
                self.state = State::InProfile {
                    name: name.to_string(),
                    profile: ConnectionProfile::new(protocol),
                };
            }
            PARAM_ELEMENT => {
                let State::InProfile { name, profile } = &mut self.state else {
                    return Err(AuthError::OrphanParameter);
                };
                match node.attribute("name") {
                    Some(key) => {
                        let value = node.attribute("value").unwrap_or_default();
                        profile.parameters.insert(key.to_string(), value.to_string());
                    }
                    None => warn!(config = %name, "ignoring param without a name"),
                }
            }
            ROOT_ELEMENT => self.read_root_attributes(node),
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, node: Node<'_, '_>) -> Result<(), AuthError> {
        if node.tag_name().name() != CONFIG_ELEMENT {
            return Ok(());
        }
        if let State::InProfile { name, profile } = std::mem::replace(&mut self.state, State::Idle) {
            if self.profiles.contains_key(&name) {
                if self.options.strict_duplicates {
                    return Err(AuthError::DuplicateProfile(name));
                }
                debug!(config = %name, "duplicate configuration name, keeping the later one");
            }
            self.profiles.insert(name, profile);
        }
        Ok(())
    }

    fn read_root_attributes(&mut self, node: Node<'_, '_>) {
        if self.root_seen {
            return;
        }
        self.root_seen = true;

        self.delete_after_read = node.attribute("delete").is_some_and(is_truthy);
        self.valid_to = node.attribute("valid_to").and_then(|raw| {
            let parsed = parse_valid_to(raw);
            if let Err(last_error) = &parsed {
                warn!(valid_to = %raw, error = %last_error, "invalid valid_to date, ignoring");
            }
            parsed.ok()
        });
    }

    fn finish(self) -> ConfigDocument {
        ConfigDocument {
            profiles: Arc::new(self.profiles),
            valid_to: self.valid_to,
            delete_after_read: self.delete_after_read,
        }
    }
}

fn is_truthy(value: &str) -> bool {
    DELETE_TRUTHY.iter().any(|t| value.eq_ignore_ascii_case(t))
}

// ── valid_to ─────────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Zone {
    /// Offset is part of the string.
    Offset,
    /// No zone; interpreted in the local time zone.
    Local,
}

/// Accepted `valid_to` layouts, tried in order.
const VALID_TO_LAYOUTS: [(&str, Zone); 6] = [
    ("%Y-%m-%dT%H:%M:%S%.f%:z", Zone::Offset),
    ("%Y-%m-%dT%H:%M:%S%.f%#z", Zone::Offset),
    ("%Y-%m-%dT%H:%M:%S%.f", Zone::Local),
    ("%Y-%m-%dT%H:%M:%S%:z", Zone::Offset),
    ("%Y-%m-%dT%H:%M:%S%#z", Zone::Offset),
    ("%Y-%m-%dT%H:%M:%S", Zone::Local),
];

/// Parse a `valid_to` value. On failure returns the error of the last layout tried.
pub fn parse_valid_to(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    let mut last_error = String::from("no layout matched");
    for (layout, zone) in VALID_TO_LAYOUTS {
        let parsed = match zone {
            Zone::Offset => DateTime::<FixedOffset>::parse_from_str(raw, layout)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| e.to_string()),
            Zone::Local => NaiveDateTime::parse_from_str(raw, layout)
                .map_err(|e| e.to_string())
                .and_then(|naive| {
                    Local
                        .from_local_datetime(&naive)
                        .earliest()
                        .map(|dt| dt.with_timezone(&Utc))
                        .ok_or_else(|| format!("{naive} does not exist in the local time zone"))
                }),
        };
        match parsed {
            Ok(dt) => return Ok(dt),
            Err(e) => last_error = e,
        }
    }
    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, NaiveDate};

    const TWO_PROFILES: &str = r#"
<configs>
  <config name="TestVm RDP" protocol="rdp">
    <param name="hostname" value="192.168.0.130"/>
    <param name="password" value="ThisIsAPassword"/>
    <param name="security" value="nla"/>
  </config>
  <config name="TestVm VNC" protocol="vnc">
    <param name="hostname" value="192.168.0.140"/>
  </config>
</configs>"#;

    fn expect_err(xml: &str) -> AuthError {
        parse_str(xml).expect_err("document should be rejected")
    }

    #[test]
    fn distinct_profiles_are_all_kept() {
        let doc = parse_str(TWO_PROFILES).unwrap();
        assert_eq!(doc.profiles.len(), 2);

        let rdp = &doc.profiles["TestVm RDP"];
        assert_eq!(rdp.protocol, "rdp");
        assert_eq!(rdp.parameters.len(), 3);
        assert_eq!(rdp.parameter("security"), Some("nla"));

        let vnc = &doc.profiles["TestVm VNC"];
        assert_eq!(vnc.protocol, "vnc");
        assert_eq!(vnc.parameter("hostname"), Some("192.168.0.140"));

        assert!(!doc.delete_after_read);
        assert!(doc.valid_to.is_none());
    }

    #[test]
    fn parse_reads_from_stream() {
        let doc = parse(TWO_PROFILES.as_bytes()).unwrap();
        assert_eq!(doc.profiles.len(), 2);
    }

    #[test]
    fn empty_root_yields_no_profiles() {
        let doc = parse_str("<configs>\n</configs>").unwrap();
        assert!(doc.profiles.is_empty());
    }

    #[test]
    fn duplicate_names_last_wins() {
        let doc = parse_str(
            r#"<configs>
                 <config name="srv" protocol="rdp"><param name="hostname" value="a"/></config>
                 <config name="srv" protocol="ssh"><param name="port" value="22"/></config>
               </configs>"#,
        )
        .unwrap();
        assert_eq!(doc.profiles.len(), 1);
        let srv = &doc.profiles["srv"];
        assert_eq!(srv.protocol, "ssh");
        assert_eq!(srv.parameter("hostname"), None);
        assert_eq!(srv.parameter("port"), Some("22"));
    }

    #[test]
    fn strict_mode_rejects_duplicates() {
        let xml = r#"<configs>
                       <config name="srv" protocol="rdp"/>
                       <config name="srv" protocol="ssh"/>
                     </configs>"#;
        let err = parse_str_with(xml, ParseOptions { strict_duplicates: true }).unwrap_err();
        assert!(matches!(err, AuthError::DuplicateProfile(name) if name == "srv"));
    }

    #[test]
    fn missing_name_fails() {
        let err = expect_err(r#"<configs><config protocol="rdp"/></configs>"#);
        assert!(matches!(err, AuthError::MissingAttribute { attribute: "name" }));
    }

    #[test]
    fn missing_protocol_fails_even_after_valid_profiles() {
        let err = expect_err(
            r#"<configs>
                 <config name="ok" protocol="rdp"/>
                 <config name="broken"/>
               </configs>"#,
        );
        assert!(matches!(err, AuthError::MissingAttribute { attribute: "protocol" }));
    }

    #[test]
    fn orphan_param_fails() {
        let err = expect_err(r#"<configs><param name="hostname" value="x"/></configs>"#);
        assert!(matches!(err, AuthError::OrphanParameter));
    }

    #[test]
    fn param_after_config_closed_is_orphan() {
        let err = expect_err(
            r#"<configs>
                 <config name="a" protocol="rdp"/>
                 <param name="hostname" value="x"/>
               </configs>"#,
        );
        assert!(matches!(err, AuthError::OrphanParameter));
    }

    #[test]
    fn nested_config_fails() {
        let err = expect_err(
            r#"<configs>
                 <config name="outer" protocol="rdp">
                   <config name="inner" protocol="vnc"/>
                 </config>
               </configs>"#,
        );
        assert!(matches!(err, AuthError::NestedConfig));
        assert_eq!(err.to_string(), "configurations cannot be nested");
    }

    #[test]
    fn malformed_xml_is_syntax_error() {
        let err = expect_err(r#"<configs><config name="a" protocol="rdp"></configs>"#);
        assert!(matches!(err, AuthError::XmlSyntax(_)));
    }

    #[test]
    fn doctype_is_rejected() {
        let err = expect_err(
            r#"<!DOCTYPE configs [<!ENTITY host "10.0.0.1">]>
               <configs><config name="a" protocol="rdp"><param name="hostname" value="&host;"/></config></configs>"#,
        );
        assert!(matches!(err, AuthError::XmlSyntax(_)));
    }

    #[test]
    fn config_nested_through_wrapper_still_fails() {
        let err = expect_err(
            r#"<configs>
                 <config name="outer" protocol="rdp">
                   <group><config name="inner" protocol="vnc"/></group>
                 </config>
               </configs>"#,
        );
        assert!(matches!(err, AuthError::NestedConfig));
    }

    #[test]
    fn params_close_with_their_config() {
        let doc = parse_str(
            r#"<configs>
                 <group>
                   <config name="a" protocol="rdp"><param name="port" value="3389"/></config>
                 </group>
                 <config name="b" protocol="ssh"/>
               </configs>"#,
        )
        .unwrap();
        assert_eq!(doc.profiles["a"].parameter("port"), Some("3389"));
        assert!(doc.profiles["b"].parameters.is_empty());
    }

    #[test]
    fn empty_value_and_missing_value_are_empty_strings() {
        let doc = parse_str(
            r#"<configs><config name="a" protocol="rdp">
                 <param name="password" value=""/>
                 <param name="domain"/>
               </config></configs>"#,
        )
        .unwrap();
        let a = &doc.profiles["a"];
        assert_eq!(a.parameter("password"), Some(""));
        assert_eq!(a.parameter("domain"), Some(""));
    }

    #[test]
    fn param_without_name_is_skipped() {
        let doc = parse_str(
            r#"<configs><config name="a" protocol="rdp"><param value="x"/></config></configs>"#,
        )
        .unwrap();
        assert!(doc.profiles["a"].parameters.is_empty());
    }

    #[test]
    fn values_are_read_verbatim_after_entity_decoding() {
        let doc = parse_str(
            r#"<configs><config name="a &amp; b" protocol="ssh">
                 <param name="command" value="echo &quot;${GUAC_USERNAME}&quot;"/>
               </config></configs>"#,
        )
        .unwrap();
        assert_eq!(
            doc.profiles["a & b"].parameter("command"),
            Some("echo \"${GUAC_USERNAME}\"")
        );
    }

    #[test]
    fn unknown_elements_are_ignored() {
        let doc = parse_str(
            r#"<configs><comment>hi</comment><config name="a" protocol="rdp"><extra/></config></configs>"#,
        )
        .unwrap();
        assert_eq!(doc.profiles.len(), 1);
    }

    #[test]
    fn delete_flag_truthy_values() {
        for value in ["yes", "YES", "Yes", "true", "TRUE", "tRuE", "1"] {
            let doc = parse_str(&format!(r#"<configs delete="{value}"/>"#)).unwrap();
            assert!(doc.delete_after_read, "expected delete=\"{value}\" to be true");
        }
    }

    #[test]
    fn delete_flag_falsy_values() {
        for xml in [r#"<configs delete="no"/>"#, r#"<configs delete="0"/>"#, r#"<configs delete=""/>"#, "<configs/>"] {
            assert!(!parse_str(xml).unwrap().delete_after_read, "{xml}");
        }
    }

    #[test]
    fn root_attributes_read_once() {
        let doc = parse_str(
            r#"<configs delete="no"><configs delete="yes" valid_to="2000-01-01T00:00:00Z"/></configs>"#,
        )
        .unwrap();
        assert!(!doc.delete_after_read);
        assert!(doc.valid_to.is_none());
    }

    #[test]
    fn valid_to_offset_layouts_agree() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 1, 4, 5).unwrap();
        let with_fraction = expected + chrono::Duration::milliseconds(678);

        assert_eq!(parse_valid_to("2024-01-02T03:04:05.678+02:00").unwrap(), with_fraction);
        assert_eq!(parse_valid_to("2024-01-02T03:04:05.678+0200").unwrap(), with_fraction);
        assert_eq!(parse_valid_to("2024-01-02T01:04:05.678Z").unwrap(), with_fraction);
        assert_eq!(parse_valid_to("2024-01-02T03:04:05+02:00").unwrap(), expected);
        assert_eq!(parse_valid_to("2024-01-02T03:04:05+0200").unwrap(), expected);
        assert_eq!(parse_valid_to("2024-01-02T01:04:05Z").unwrap(), expected);
    }

    #[test]
    fn valid_to_local_layouts_use_local_zone() {
        let naive = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_milli_opt(3, 4, 5, 678)
            .unwrap();
        let expected = Local.from_local_datetime(&naive).earliest().unwrap().with_timezone(&Utc);
        assert_eq!(parse_valid_to("2024-01-02T03:04:05.678").unwrap(), expected);

        let whole = expected - chrono::Duration::milliseconds(678);
        assert_eq!(parse_valid_to("2024-01-02T03:04:05").unwrap(), whole);
    }

    #[test]
    fn unparsable_valid_to_is_ignored() {
        assert!(parse_valid_to("next tuesday").is_err());
        let doc = parse_str(
            r#"<configs valid_to="next tuesday"><config name="a" protocol="rdp"/></configs>"#,
        )
        .unwrap();
        assert!(doc.valid_to.is_none());
        assert_eq!(doc.profiles.len(), 1);
    }

    #[test]
    fn end_to_end_document() {
        let doc = parse_str(
            r#"<configs valid_to="2099-01-01T00:00:00Z">
                 <config name="srv1" protocol="rdp">
                   <param name="hostname" value="10.0.0.1"/>
                   <param name="port" value="3389"/>
                 </config>
               </configs>"#,
        )
        .unwrap();
        assert_eq!(doc.profiles.len(), 1);
        let srv1 = &doc.profiles["srv1"];
        assert_eq!(srv1.protocol, "rdp");
        assert_eq!(
            srv1.parameters,
            HashMap::from([
                ("hostname".to_string(), "10.0.0.1".to_string()),
                ("port".to_string(), "3389".to_string()),
            ])
        );
        assert!(!doc.delete_after_read);
        assert_eq!(doc.valid_to.unwrap().year(), 2099);
        assert!(!doc.is_expired_at(Utc::now()));
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let valid_to = Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap();
        let doc = ConfigDocument {
            valid_to: Some(valid_to),
            ..ConfigDocument::default()
        };
        assert!(!doc.is_expired_at(valid_to));
        assert!(doc.is_expired_at(valid_to + chrono::Duration::seconds(1)));
    }
}
