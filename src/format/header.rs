//! The database header: a typed view of the header record's fields.

use tracing::{debug, warn};
use uuid::Uuid;

use super::field::RawField;
use super::{FormatVersion, header_type as ht};
use crate::context::WriterContext;
use crate::error::{Error, Result};
use crate::time::PwsTime;

const YUBI_SK_LEN: usize = 20;
/// Most-recently-used entries kept in the header.
pub const MAX_RECENTLY_USED: usize = 255;

/// One header field, decoded at the field boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderField {
    Version { major: u8, minor: u8 },
    Uuid(Uuid),
    NonDefaultPrefs(String),
    DisplayStatus(Vec<bool>),
    LastUpdateTime(PwsTime),
    LastUpdateUserHost { user: String, host: String },
    LastUpdateApplication(String),
    LastUpdateUser(String),
    LastUpdateHost(String),
    DbName(String),
    DbDescription(String),
    Filters(String),
    RecentlyUsed(Vec<Uuid>),
    PasswordPolicies(String),
    EmptyGroup(String),
    YubiSecretKey(Vec<u8>),
    LastPasswordUpdateTime(PwsTime),
    Unknown(RawField),
    End,
}

pub(crate) fn text(field: &RawField) -> String {
    match std::str::from_utf8(&field.data) {
        Ok(s) => s.to_owned(),
        Err(_) => {
            warn!(
                field_type = field.field_type,
                "field is not valid UTF-8, replacing invalid sequences"
            );
            String::from_utf8_lossy(&field.data).into_owned()
        }
    }
}

pub(crate) fn uuid(field: &RawField) -> Result<Uuid> {
    Uuid::from_slice(&field.data)
        .map_err(|_| Error::invalid_field(field.field_type, "UUID must be 16 bytes"))
}

fn parse_hex(s: &str) -> Option<u64> {
    u64::from_str_radix(s, 16).ok()
}

/// Timestamps were once stored as 8 hex digits; binary 4 or 5 byte forms
/// are read as little-endian seconds.
fn timestamp(field: &RawField) -> PwsTime {
    match field.data.len() {
        8 => std::str::from_utf8(&field.data)
            .ok()
            .and_then(parse_hex)
            .map(|t| PwsTime::from_unix(t as i64))
            .unwrap_or_default(),
        4 | 5 => PwsTime::decode(&field.data),
        n => {
            warn!(field_type = field.field_type, len = n, "ignoring odd-sized timestamp");
            PwsTime::default()
        }
    }
}

/// `NNNN` (hex user length) followed by user then host.
fn user_host(field: &RawField) -> Option<(String, String)> {
    let s = text(field);
    let user_len = s.get(..4).and_then(parse_hex)? as usize;
    let rest = s.get(4..)?;
    let user = rest.get(..user_len)?;
    let host = rest.get(user_len..)?;
    Some((user.to_owned(), host.to_owned()))
}

/// `NN` (hex count) followed by 32 hex digits per UUID.
fn recently_used(field: &RawField) -> Vec<Uuid> {
    let s = text(field);
    let Some(count) = s.get(..2).and_then(parse_hex) else {
        warn!("malformed recently-used list");
        return Vec::new();
    };
    let body = &s[2..];
    if body.len() != count as usize * 32 {
        warn!(count, len = body.len(), "recently-used list length mismatch");
        return Vec::new();
    }

    (0..count as usize)
        .filter_map(|i| body.get(i * 32..(i + 1) * 32))
        .filter_map(|hex| Uuid::try_parse(hex).ok())
        .filter(|u| !u.is_nil())
        .collect()
}

fn looks_like_policies(data: &[u8]) -> bool {
    data.len() >= 2 && data[..2].iter().all(u8::is_ascii_hexdigit)
}

impl HeaderField {
    pub fn decode(field: RawField) -> Result<Self> {
        let decoded = match field.field_type {
            ht::VERSION => match field.data.len() {
                2 | 4 => HeaderField::Version {
                    major: field.data[1],
                    minor: field.data[0],
                },
                _ => return Err(Error::invalid_field(ht::VERSION, "bad version length")),
            },
            ht::UUID => HeaderField::Uuid(uuid(&field)?),
            ht::NDPREFS => HeaderField::NonDefaultPrefs(text(&field)),
            ht::DISPSTAT => HeaderField::DisplayStatus(
                field.data.iter().map(|c| *c == b'1').collect(),
            ),
            ht::LAST_UPDATE_TIME => HeaderField::LastUpdateTime(timestamp(&field)),
            ht::LAST_UPDATE_USER_HOST => match user_host(&field) {
                Some((user, host)) => HeaderField::LastUpdateUserHost { user, host },
                None => {
                    warn!("malformed user/host field kept as is");
                    HeaderField::Unknown(field)
                }
            },
            ht::LAST_UPDATE_APPLICATION => HeaderField::LastUpdateApplication(text(&field)),
            ht::LAST_UPDATE_USER => HeaderField::LastUpdateUser(text(&field)),
            ht::LAST_UPDATE_HOST => HeaderField::LastUpdateHost(text(&field)),
            ht::DB_NAME => HeaderField::DbName(text(&field)),
            ht::DB_DESC => HeaderField::DbDescription(text(&field)),
            ht::FILTERS => HeaderField::Filters(text(&field)),
            ht::RUE => HeaderField::RecentlyUsed(recently_used(&field)),
            // Some writers put the YubiKey secret under this type.
            ht::PASSWORD_POLICIES
                if field.data.len() == YUBI_SK_LEN && !looks_like_policies(&field.data) =>
            {
                HeaderField::YubiSecretKey(field.data.to_vec())
            }
            ht::PASSWORD_POLICIES => HeaderField::PasswordPolicies(text(&field)),
            ht::EMPTY_GROUP => HeaderField::EmptyGroup(text(&field)),
            ht::YUBI_SK => {
                if field.data.len() != YUBI_SK_LEN {
                    return Err(Error::invalid_field(ht::YUBI_SK, "YubiKey secret must be 20 bytes"));
                }
                HeaderField::YubiSecretKey(field.data.to_vec())
            }
            ht::LAST_PASSWORD_UPDATE_TIME => {
                HeaderField::LastPasswordUpdateTime(timestamp(&field))
            }
            ht::END => HeaderField::End,
            _ => HeaderField::Unknown(field),
        };
        Ok(decoded)
    }

    pub fn encode(&self) -> RawField {
        match self {
            HeaderField::Version { major, minor } => RawField::new(ht::VERSION, vec![*minor, *major]),
            HeaderField::Uuid(u) => RawField::new(ht::UUID, u.as_bytes().to_vec()),
            HeaderField::NonDefaultPrefs(s) => RawField::new(ht::NDPREFS, s.as_bytes()),
            HeaderField::DisplayStatus(v) => RawField::new(
                ht::DISPSTAT,
                v.iter().map(|b| if *b { b'1' } else { b'0' }).collect::<Vec<_>>(),
            ),
            HeaderField::LastUpdateTime(t) => RawField::new(ht::LAST_UPDATE_TIME, t.encode()),
            HeaderField::LastUpdateUserHost { user, host } => RawField::new(
                ht::LAST_UPDATE_USER_HOST,
                format!("{:04x}{user}{host}", user.len()),
            ),
            HeaderField::LastUpdateApplication(s) => {
                RawField::new(ht::LAST_UPDATE_APPLICATION, s.as_bytes())
            }
            HeaderField::LastUpdateUser(s) => RawField::new(ht::LAST_UPDATE_USER, s.as_bytes()),
            HeaderField::LastUpdateHost(s) => RawField::new(ht::LAST_UPDATE_HOST, s.as_bytes()),
            HeaderField::DbName(s) => RawField::new(ht::DB_NAME, s.as_bytes()),
            HeaderField::DbDescription(s) => RawField::new(ht::DB_DESC, s.as_bytes()),
            HeaderField::Filters(s) => RawField::new(ht::FILTERS, s.as_bytes()),
            HeaderField::RecentlyUsed(list) => {
                let list = &list[..list.len().min(MAX_RECENTLY_USED)];
                let mut s = format!("{:02x}", list.len());
                for u in list {
                    s.push_str(&u.simple().to_string());
                }
                RawField::new(ht::RUE, s)
            }
            HeaderField::PasswordPolicies(s) => RawField::new(ht::PASSWORD_POLICIES, s.as_bytes()),
            HeaderField::EmptyGroup(s) => RawField::new(ht::EMPTY_GROUP, s.as_bytes()),
            HeaderField::YubiSecretKey(k) => RawField::new(ht::YUBI_SK, k.clone()),
            HeaderField::LastPasswordUpdateTime(t) => {
                RawField::new(ht::LAST_PASSWORD_UPDATE_TIME, t.encode())
            }
            HeaderField::Unknown(raw) => raw.clone(),
            HeaderField::End => RawField::empty(ht::END),
        }
    }
}

/// Database-wide metadata stored ahead of the records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    /// `(major, minor)` as last read or written.
    pub version: Option<(u8, u8)>,
    pub uuid: Uuid,
    pub prefs: String,
    pub display_status: Vec<bool>,
    pub last_saved: Option<PwsTime>,
    pub last_saved_by: Option<String>,
    pub last_saved_on: Option<String>,
    pub last_saved_with: Option<String>,
    pub db_name: Option<String>,
    pub db_description: Option<String>,
    pub filters: Option<String>,
    pub recently_used: Vec<Uuid>,
    pub password_policies: Option<String>,
    pub empty_groups: Vec<String>,
    pub yubi_secret: Option<Vec<u8>>,
    pub last_password_update: Option<PwsTime>,
    /// Fields this crate does not interpret, written back unchanged.
    pub unknown: Vec<RawField>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            db_name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Folds one decoded field in. Returns `false` once END is reached.
    pub fn apply(&mut self, field: HeaderField) -> Result<bool> {
        match field {
            HeaderField::Version { major, minor } => {
                FormatVersion::from_parts(major, minor)?;
                self.version = Some((major, minor));
            }
            HeaderField::Uuid(u) => self.uuid = u,
            HeaderField::NonDefaultPrefs(s) => self.prefs = s,
            HeaderField::DisplayStatus(v) => self.display_status = v,
            HeaderField::LastUpdateTime(t) => self.last_saved = Some(t),
            // The split user and host fields win over the deprecated pair.
            HeaderField::LastUpdateUserHost { user, host } => {
                if self.last_saved_by.is_none() && self.last_saved_on.is_none() {
                    self.last_saved_by = Some(user);
                    self.last_saved_on = Some(host);
                }
            }
            HeaderField::LastUpdateApplication(s) => self.last_saved_with = Some(s),
            HeaderField::LastUpdateUser(s) => self.last_saved_by = Some(s),
            HeaderField::LastUpdateHost(s) => self.last_saved_on = Some(s),
            HeaderField::DbName(s) => self.db_name = Some(s),
            HeaderField::DbDescription(s) => self.db_description = Some(s),
            HeaderField::Filters(s) => self.filters = Some(s),
            HeaderField::RecentlyUsed(v) => self.recently_used = v,
            HeaderField::PasswordPolicies(s) => self.password_policies = Some(s),
            HeaderField::EmptyGroup(s) => self.empty_groups.push(s),
            HeaderField::YubiSecretKey(k) => self.yubi_secret = Some(k),
            HeaderField::LastPasswordUpdateTime(t) => self.last_password_update = Some(t),
            HeaderField::Unknown(raw) => {
                debug!(field_type = raw.field_type, "preserving unknown header field");
                self.unknown.push(raw);
            }
            HeaderField::End => return Ok(false),
        }
        Ok(true)
    }

    /// Stamps the fields every save refreshes.
    pub fn stamp(&mut self, version: FormatVersion, context: &WriterContext) {
        self.version = Some((version.major(), version.minor()));
        if self.uuid.is_nil() {
            self.uuid = Uuid::new_v4();
        }
        self.last_saved = Some(PwsTime::now());
        self.last_saved_by = Some(context.user.clone());
        self.last_saved_on = Some(context.host.clone());
        self.last_saved_with = Some(context.application.clone());
    }

    /// Fields in write order, ending with END.
    pub fn to_fields(&self) -> Vec<HeaderField> {
        let (major, minor) = self.version.unwrap_or((
            FormatVersion::CURRENT.major(),
            FormatVersion::CURRENT.minor(),
        ));
        let mut fields = vec![
            HeaderField::Version { major, minor },
            HeaderField::Uuid(self.uuid),
            HeaderField::NonDefaultPrefs(self.prefs.clone()),
        ];

        if !self.display_status.is_empty() {
            fields.push(HeaderField::DisplayStatus(self.display_status.clone()));
        }
        if let Some(t) = self.last_saved {
            fields.push(HeaderField::LastUpdateTime(t));
        }
        if let Some(s) = &self.last_saved_by {
            fields.push(HeaderField::LastUpdateUser(s.clone()));
        }
        if let Some(s) = &self.last_saved_on {
            fields.push(HeaderField::LastUpdateHost(s.clone()));
        }
        if let Some(s) = &self.last_saved_with {
            fields.push(HeaderField::LastUpdateApplication(s.clone()));
        }
        if let Some(s) = &self.db_name {
            fields.push(HeaderField::DbName(s.clone()));
        }
        if let Some(s) = &self.db_description {
            fields.push(HeaderField::DbDescription(s.clone()));
        }
        if let Some(s) = &self.filters {
            fields.push(HeaderField::Filters(s.clone()));
        }
        if !self.recently_used.is_empty() {
            fields.push(HeaderField::RecentlyUsed(self.recently_used.clone()));
        }
        if let Some(s) = &self.password_policies {
            fields.push(HeaderField::PasswordPolicies(s.clone()));
        }
        fields.extend(self.empty_groups.iter().cloned().map(HeaderField::EmptyGroup));
        fields.extend(self.unknown.iter().cloned().map(HeaderField::Unknown));
        if let Some(k) = &self.yubi_secret {
            fields.push(HeaderField::YubiSecretKey(k.clone()));
        }
        if let Some(t) = self.last_password_update {
            fields.push(HeaderField::LastPasswordUpdateTime(t));
        }
        fields.push(HeaderField::End);
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(field: HeaderField) -> HeaderField {
        HeaderField::decode(field.encode()).unwrap()
    }

    #[test]
    fn version_is_minor_then_major() {
        let raw = HeaderField::Version { major: 4, minor: 0 }.encode();
        assert_eq!(&raw.data[..], &[0x00, 0x04]);

        let four_bytes = RawField::new(ht::VERSION, vec![0x01, 0x04, 0, 0]);
        assert_eq!(
            HeaderField::decode(four_bytes).unwrap(),
            HeaderField::Version { major: 4, minor: 1 }
        );
    }

    #[test]
    fn other_major_version_is_rejected() {
        let mut header = Header::new();
        let err = header
            .apply(HeaderField::Version { major: 3, minor: 13 })
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion { major: 3, minor: 13 }));
    }

    #[test]
    fn recently_used_list_is_hex_encoded() {
        let ids = vec![Uuid::new_v4(), Uuid::new_v4()];
        let raw = HeaderField::RecentlyUsed(ids.clone()).encode();
        assert_eq!(raw.data.len(), 2 + 2 * 32);
        assert_eq!(&raw.data[..2], b"02");
        assert_eq!(roundtrip(HeaderField::RecentlyUsed(ids.clone())), HeaderField::RecentlyUsed(ids));
    }

    #[test]
    fn malformed_recently_used_list_is_dropped() {
        let raw = RawField::new(ht::RUE, "03abcdef");
        assert_eq!(HeaderField::decode(raw).unwrap(), HeaderField::RecentlyUsed(Vec::new()));
    }

    #[test]
    fn deprecated_user_host_splits_on_length_prefix() {
        let raw = RawField::new(ht::LAST_UPDATE_USER_HOST, "0005alicelaptop");
        assert_eq!(
            HeaderField::decode(raw).unwrap(),
            HeaderField::LastUpdateUserHost {
                user: "alice".into(),
                host: "laptop".into()
            }
        );
    }

    #[test]
    fn split_user_field_wins_over_deprecated_pair() {
        let mut header = Header::new();
        header.apply(HeaderField::LastUpdateUser("bob".into())).unwrap();
        header
            .apply(HeaderField::LastUpdateUserHost {
                user: "alice".into(),
                host: "laptop".into(),
            })
            .unwrap();
        assert_eq!(header.last_saved_by.as_deref(), Some("bob"));
        assert_eq!(header.last_saved_on, None);
    }

    #[test]
    fn legacy_hex_timestamp_is_understood() {
        let raw = RawField::new(ht::LAST_UPDATE_TIME, "6553f100");
        assert_eq!(
            HeaderField::decode(raw).unwrap(),
            HeaderField::LastUpdateTime(PwsTime::from_unix(0x6553_f100))
        );
    }

    #[test]
    fn yubi_secret_under_policy_type_is_recognised() {
        let raw = RawField::new(ht::PASSWORD_POLICIES, vec![0xEEu8; YUBI_SK_LEN]);
        assert!(matches!(HeaderField::decode(raw).unwrap(), HeaderField::YubiSecretKey(_)));

        let policies = RawField::new(ht::PASSWORD_POLICIES, "01Policy");
        assert!(matches!(
            HeaderField::decode(policies).unwrap(),
            HeaderField::PasswordPolicies(_)
        ));
    }

    #[test]
    fn bad_uuid_length_is_invalid() {
        let raw = RawField::new(ht::UUID, vec![1u8; 3]);
        assert!(matches!(
            HeaderField::decode(raw),
            Err(Error::InvalidField { field_type: ht::UUID, .. })
        ));
    }

    #[test]
    fn unknown_fields_survive_a_pass_through_the_header() {
        let mut header = Header::with_name("vault1");
        let odd = RawField::new(0x7e, vec![9u8, 8, 7]);
        header.apply(HeaderField::decode(odd.clone()).unwrap()).unwrap();
        header.empty_groups.push("Archive".into());

        let mut reread = Header::new();
        for f in header.to_fields() {
            if !reread.apply(HeaderField::decode(f.encode()).unwrap()).unwrap() {
                break;
            }
        }
        assert_eq!(reread.unknown, vec![odd]);
        assert_eq!(reread.db_name.as_deref(), Some("vault1"));
        assert_eq!(reread.empty_groups, vec!["Archive".to_string()]);
        assert_eq!(reread.version, Some((4, 0)));
    }

    #[test]
    fn stamp_fills_identity_and_context() {
        let ctx = WriterContext::new("strongbox test", "carol", "box");
        let mut header = Header::new();
        header.stamp(FormatVersion::V4, &ctx);
        assert!(!header.uuid.is_nil());
        assert_eq!(header.last_saved_by.as_deref(), Some("carol"));
        assert_eq!(header.last_saved_on.as_deref(), Some("box"));
        assert_eq!(header.last_saved_with.as_deref(), Some("strongbox test"));
        assert!(header.last_saved.is_some());

        let uuid = header.uuid;
        header.stamp(FormatVersion::V4, &ctx);
        assert_eq!(header.uuid, uuid);
    }
}
