//! Records stored after the header: password entries and attachments.

use tracing::debug;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::attachment::Attachment;
use crate::error::{Error, Result};
use crate::format::field::RawField;
use crate::format::header::{text, uuid};
use crate::format::{attachment_type, entry_type as et};
use crate::time::PwsTime;

/// How an entry is identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Normal,
    Alias,
    Shortcut,
}

/// One entry field, decoded at the field boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryField {
    Uuid(Uuid),
    AliasUuid(Uuid),
    ShortcutUuid(Uuid),
    BaseUuid(Uuid),
    Group(String),
    Title(String),
    User(String),
    Notes(String),
    Password(Zeroizing<String>),
    CreationTime(PwsTime),
    PasswordModTime(PwsTime),
    AccessTime(PwsTime),
    ExpiryTime(PwsTime),
    ModTime(PwsTime),
    Url(String),
    Autotype(String),
    PasswordHistory(String),
    Policy(String),
    ExpiryInterval(i32),
    RunCommand(String),
    DoubleClickAction(i16),
    Email(String),
    Protected(bool),
    Symbols(String),
    ShiftDoubleClickAction(i16),
    PolicyName(String),
    KeyboardShortcut(i32),
    AttachmentRef(Uuid),
    Unknown(RawField),
}

fn time(field: &RawField) -> Result<PwsTime> {
    match field.data.len() {
        4..=8 => Ok(PwsTime::decode(&field.data)),
        _ => Err(Error::invalid_field(field.field_type, "bad timestamp length")),
    }
}

fn int<const N: usize>(field: &RawField) -> Result<[u8; N]> {
    field
        .data
        .as_slice()
        .try_into()
        .map_err(|_| Error::invalid_field(field.field_type, "bad integer length"))
}

impl EntryField {
    pub fn decode(field: RawField) -> Result<Self> {
        let f = &field;
        let decoded = match field.field_type {
            et::UUID => EntryField::Uuid(uuid(f)?),
            et::ALIASUUID => EntryField::AliasUuid(uuid(f)?),
            et::SHORTCUTUUID => EntryField::ShortcutUuid(uuid(f)?),
            et::BASEUUID => EntryField::BaseUuid(uuid(f)?),
            et::GROUP => EntryField::Group(text(f)),
            et::TITLE => EntryField::Title(text(f)),
            et::USER => EntryField::User(text(f)),
            et::NOTES => EntryField::Notes(text(f)),
            et::PASSWORD => EntryField::Password(Zeroizing::new(text(f))),
            et::CTIME => EntryField::CreationTime(time(f)?),
            et::PMTIME => EntryField::PasswordModTime(time(f)?),
            et::ATIME => EntryField::AccessTime(time(f)?),
            et::XTIME => EntryField::ExpiryTime(time(f)?),
            et::RMTIME => EntryField::ModTime(time(f)?),
            et::URL => EntryField::Url(text(f)),
            et::AUTOTYPE => EntryField::Autotype(text(f)),
            et::PWHIST => EntryField::PasswordHistory(text(f)),
            et::POLICY => EntryField::Policy(text(f)),
            et::XTIME_INT => EntryField::ExpiryInterval(i32::from_le_bytes(int(f)?)),
            et::RUNCMD => EntryField::RunCommand(text(f)),
            et::DCA => EntryField::DoubleClickAction(i16::from_le_bytes(int(f)?)),
            et::EMAIL => EntryField::Email(text(f)),
            et::PROTECTED => EntryField::Protected(field.data.first().is_some_and(|b| *b != 0)),
            et::SYMBOLS => EntryField::Symbols(text(f)),
            et::SHIFTDCA => EntryField::ShiftDoubleClickAction(i16::from_le_bytes(int(f)?)),
            et::POLICYNAME => EntryField::PolicyName(text(f)),
            et::KBSHORTCUT => EntryField::KeyboardShortcut(i32::from_le_bytes(int(f)?)),
            et::ATTREF => EntryField::AttachmentRef(uuid(f)?),
            _ => EntryField::Unknown(field),
        };
        Ok(decoded)
    }

    pub fn code(&self) -> u8 {
        match self {
            EntryField::Uuid(_) => et::UUID,
            EntryField::AliasUuid(_) => et::ALIASUUID,
            EntryField::ShortcutUuid(_) => et::SHORTCUTUUID,
            EntryField::BaseUuid(_) => et::BASEUUID,
            EntryField::Group(_) => et::GROUP,
            EntryField::Title(_) => et::TITLE,
            EntryField::User(_) => et::USER,
            EntryField::Notes(_) => et::NOTES,
            EntryField::Password(_) => et::PASSWORD,
            EntryField::CreationTime(_) => et::CTIME,
            EntryField::PasswordModTime(_) => et::PMTIME,
            EntryField::AccessTime(_) => et::ATIME,
            EntryField::ExpiryTime(_) => et::XTIME,
            EntryField::ModTime(_) => et::RMTIME,
            EntryField::Url(_) => et::URL,
            EntryField::Autotype(_) => et::AUTOTYPE,
            EntryField::PasswordHistory(_) => et::PWHIST,
            EntryField::Policy(_) => et::POLICY,
            EntryField::ExpiryInterval(_) => et::XTIME_INT,
            EntryField::RunCommand(_) => et::RUNCMD,
            EntryField::DoubleClickAction(_) => et::DCA,
            EntryField::Email(_) => et::EMAIL,
            EntryField::Protected(_) => et::PROTECTED,
            EntryField::Symbols(_) => et::SYMBOLS,
            EntryField::ShiftDoubleClickAction(_) => et::SHIFTDCA,
            EntryField::PolicyName(_) => et::POLICYNAME,
            EntryField::KeyboardShortcut(_) => et::KBSHORTCUT,
            EntryField::AttachmentRef(_) => et::ATTREF,
            EntryField::Unknown(raw) => raw.field_type,
        }
    }

    pub fn encode(&self) -> RawField {
        let code = self.code();
        match self {
            EntryField::Uuid(u)
            | EntryField::AliasUuid(u)
            | EntryField::ShortcutUuid(u)
            | EntryField::BaseUuid(u)
            | EntryField::AttachmentRef(u) => RawField::new(code, u.as_bytes().to_vec()),
            EntryField::Group(s)
            | EntryField::Title(s)
            | EntryField::User(s)
            | EntryField::Notes(s)
            | EntryField::Url(s)
            | EntryField::Autotype(s)
            | EntryField::PasswordHistory(s)
            | EntryField::Policy(s)
            | EntryField::RunCommand(s)
            | EntryField::Email(s)
            | EntryField::Symbols(s)
            | EntryField::PolicyName(s) => RawField::new(code, s.as_bytes()),
            EntryField::Password(s) => RawField::new(code, s.as_bytes()),
            EntryField::CreationTime(t)
            | EntryField::PasswordModTime(t)
            | EntryField::AccessTime(t)
            | EntryField::ExpiryTime(t)
            | EntryField::ModTime(t) => RawField::new(code, t.encode()),
            EntryField::ExpiryInterval(n) | EntryField::KeyboardShortcut(n) => {
                RawField::new(code, n.to_le_bytes())
            }
            EntryField::DoubleClickAction(n) | EntryField::ShiftDoubleClickAction(n) => {
                RawField::new(code, n.to_le_bytes())
            }
            EntryField::Protected(b) => RawField::new(code, vec![u8::from(*b)]),
            EntryField::Unknown(raw) => raw.clone(),
        }
    }

    fn as_text(&self) -> Option<&str> {
        match self {
            EntryField::Group(s)
            | EntryField::Title(s)
            | EntryField::User(s)
            | EntryField::Notes(s)
            | EntryField::Url(s)
            | EntryField::Autotype(s)
            | EntryField::PasswordHistory(s)
            | EntryField::Policy(s)
            | EntryField::RunCommand(s)
            | EntryField::Email(s)
            | EntryField::Symbols(s)
            | EntryField::PolicyName(s) => Some(s),
            EntryField::Password(s) => Some(s.as_str()),
            _ => None,
        }
    }

    fn as_time(&self) -> Option<PwsTime> {
        match self {
            EntryField::CreationTime(t)
            | EntryField::PasswordModTime(t)
            | EntryField::AccessTime(t)
            | EntryField::ExpiryTime(t)
            | EntryField::ModTime(t) => Some(*t),
            _ => None,
        }
    }
}

/// A password entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    fields: Vec<EntryField>,
}

impl Entry {
    pub fn new(title: &str, password: &str) -> Self {
        let now = PwsTime::now();
        Self {
            fields: vec![
                EntryField::Uuid(Uuid::new_v4()),
                EntryField::Title(title.to_owned()),
                EntryField::Password(Zeroizing::new(password.to_owned())),
                EntryField::CreationTime(now),
                EntryField::PasswordModTime(now),
            ],
        }
    }

    /// Entry from decoded fields. The first field decides how it is identified.
    pub fn from_fields(fields: Vec<EntryField>) -> Result<Self> {
        match fields.first() {
            Some(EntryField::Uuid(_) | EntryField::AliasUuid(_) | EntryField::ShortcutUuid(_)) => {
                Ok(Self { fields })
            }
            Some(other) => Err(Error::invalid_field(other.code(), "entry must start with a UUID")),
            None => Err(Error::invalid_field(et::END, "empty entry")),
        }
    }

    pub fn fields(&self) -> &[EntryField] {
        &self.fields
    }

    fn find(&self, code: u8) -> Option<&EntryField> {
        self.fields.iter().find(|f| f.code() == code)
    }

    fn text(&self, code: u8) -> Option<&str> {
        self.find(code).and_then(EntryField::as_text)
    }

    fn time(&self, code: u8) -> Option<PwsTime> {
        self.find(code).and_then(EntryField::as_time)
    }

    /// Replaces the field of the same type, or appends it.
    pub fn set(&mut self, field: EntryField) {
        let code = field.code();
        match self.fields.iter_mut().find(|f| f.code() == code) {
            Some(slot) => *slot = field,
            None => self.fields.push(field),
        }
    }

    pub fn clear(&mut self, code: u8) {
        self.fields.retain(|f| f.code() != code);
    }

    pub fn kind(&self) -> EntryKind {
        match self.fields.first() {
            Some(EntryField::AliasUuid(_)) => EntryKind::Alias,
            Some(EntryField::ShortcutUuid(_)) => EntryKind::Shortcut,
            _ => EntryKind::Normal,
        }
    }

    pub fn uuid(&self) -> Uuid {
        match self.fields.first() {
            Some(
                EntryField::Uuid(u) | EntryField::AliasUuid(u) | EntryField::ShortcutUuid(u),
            ) => *u,
            _ => Uuid::nil(),
        }
    }

    /// The entry an alias or shortcut points at.
    pub fn base(&self) -> Option<Uuid> {
        self.fields.iter().find_map(|f| match f {
            EntryField::BaseUuid(u) => Some(*u),
            _ => None,
        })
    }

    pub fn title(&self) -> &str {
        self.text(et::TITLE).unwrap_or_default()
    }

    pub fn password(&self) -> &str {
        self.text(et::PASSWORD).unwrap_or_default()
    }

    pub fn user(&self) -> Option<&str> {
        self.text(et::USER)
    }

    pub fn group(&self) -> Option<&str> {
        self.text(et::GROUP)
    }

    pub fn notes(&self) -> Option<&str> {
        self.text(et::NOTES)
    }

    pub fn url(&self) -> Option<&str> {
        self.text(et::URL)
    }

    pub fn email(&self) -> Option<&str> {
        self.text(et::EMAIL)
    }

    pub fn created(&self) -> Option<PwsTime> {
        self.time(et::CTIME)
    }

    pub fn password_modified(&self) -> Option<PwsTime> {
        self.time(et::PMTIME)
    }

    pub fn modified(&self) -> Option<PwsTime> {
        self.time(et::RMTIME)
    }

    pub fn attachment(&self) -> Option<Uuid> {
        self.fields.iter().find_map(|f| match f {
            EntryField::AttachmentRef(u) => Some(*u),
            _ => None,
        })
    }

    pub fn set_password(&mut self, password: &str) {
        let now = PwsTime::now();
        self.set(EntryField::Password(Zeroizing::new(password.to_owned())));
        self.set(EntryField::PasswordModTime(now));
        self.set(EntryField::ModTime(now));
    }

    /// Sets a text field; an empty value removes it.
    pub fn set_text(&mut self, code: u8, value: &str) {
        let field = EntryField::decode(RawField::new(code, value.as_bytes()));
        match field {
            Ok(field) if field.as_text().is_some() => {
                if value.is_empty() {
                    self.clear(code);
                } else {
                    self.set(field);
                }
                self.set(EntryField::ModTime(PwsTime::now()));
            }
            _ => debug!(field_type = code, "not a text field"),
        }
    }

    pub fn set_attachment(&mut self, attachment: Uuid) {
        self.set(EntryField::AttachmentRef(attachment));
        self.set(EntryField::ModTime(PwsTime::now()));
    }

    /// Raw fields in write order, identifying field first, END last.
    pub fn to_fields(&self) -> Vec<RawField> {
        let mut out: Vec<RawField> = self.fields.iter().map(EntryField::encode).collect();
        out.push(RawField::empty(et::END));
        out
    }
}

/// One record of the database body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Entry(Entry),
    Attachment(Attachment),
}

impl Record {
    /// Builds a record from the fields before its END marker.
    pub fn from_fields(fields: Vec<RawField>) -> Result<Self> {
        match fields.first().map(|f| f.field_type) {
            Some(attachment_type::ATTUUID) => Ok(Record::Attachment(Attachment::from_fields(fields)?)),
            _ => {
                let decoded = fields
                    .into_iter()
                    .map(EntryField::decode)
                    .collect::<Result<Vec<_>>>()?;
                Ok(Record::Entry(Entry::from_fields(decoded)?))
            }
        }
    }

    pub fn to_fields(&self) -> Vec<RawField> {
        match self {
            Record::Entry(e) => e.to_fields(),
            Record::Attachment(a) => a.to_fields(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reparse(entry: &Entry) -> Entry {
        let mut fields = entry.to_fields();
        assert_eq!(fields.pop().map(|f| f.field_type), Some(et::END));
        match Record::from_fields(fields).unwrap() {
            Record::Entry(e) => e,
            other => panic!("expected entry, got {other:?}"),
        }
    }

    #[test]
    fn new_entry_starts_with_its_uuid() {
        let entry = Entry::new("github", "hunter2");
        assert_eq!(entry.fields()[0].code(), et::UUID);
        assert!(!entry.uuid().is_nil());
        assert_eq!(entry.kind(), EntryKind::Normal);
        assert_eq!(entry.title(), "github");
        assert_eq!(entry.password(), "hunter2");
        assert!(entry.created().is_some());
    }

    #[test]
    fn entry_fields_survive_encoding() {
        let mut entry = Entry::new("mail", "pw");
        entry.set_text(et::USER, "alice");
        entry.set_text(et::URL, "https://example.com");
        entry.set(EntryField::ExpiryInterval(30));
        entry.set(EntryField::DoubleClickAction(-1));
        entry.set(EntryField::Protected(true));
        entry.set(EntryField::Unknown(RawField::new(0x5a, vec![1u8, 2, 3])));

        assert_eq!(reparse(&entry), entry);
    }

    #[test]
    fn empty_text_clears_the_field() {
        let mut entry = Entry::new("mail", "pw");
        entry.set_text(et::NOTES, "remember me");
        assert_eq!(entry.notes(), Some("remember me"));
        entry.set_text(et::NOTES, "");
        assert_eq!(entry.notes(), None);
    }

    #[test]
    fn setting_the_password_updates_timestamps() {
        let mut entry = Entry::new("mail", "old");
        entry.set_password("new");
        assert_eq!(entry.password(), "new");
        assert!(entry.password_modified().is_some());
        assert!(entry.modified().is_some());
    }

    #[test]
    fn alias_is_identified_by_its_first_field() {
        let base = Uuid::new_v4();
        let alias = Uuid::new_v4();
        let fields = vec![
            RawField::new(et::ALIASUUID, alias.as_bytes().to_vec()),
            RawField::new(et::BASEUUID, base.as_bytes().to_vec()),
            RawField::new(et::TITLE, "alias"),
        ];
        let Record::Entry(entry) = Record::from_fields(fields).unwrap() else {
            panic!("expected entry");
        };
        assert_eq!(entry.kind(), EntryKind::Alias);
        assert_eq!(entry.uuid(), alias);
        assert_eq!(entry.base(), Some(base));
    }

    #[test]
    fn entry_without_leading_uuid_is_invalid() {
        let fields = vec![RawField::new(et::TITLE, "orphan")];
        assert!(matches!(
            Record::from_fields(fields),
            Err(Error::InvalidField { field_type: et::TITLE, .. })
        ));
    }

    #[test]
    fn wrong_width_integer_is_invalid() {
        let raw = RawField::new(et::XTIME_INT, vec![1u8, 2]);
        assert!(EntryField::decode(raw).is_err());
    }
}
