use crate::attachment::Attachment;
use crate::error::StoreError;
use crate::record::{Entry, Record};
use serde::Serialize;
use uuid::Uuid;

/// Decrypted records of one database, in file order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Store {
    entries: Vec<Entry>,
    attachments: Vec<Attachment>,
}

/// Entry summary for listings. The password is left out.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
    pub uuid: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    pub has_attachment: bool,
}

impl From<&Entry> for EntrySummary {
    fn from(e: &Entry) -> Self {
        Self {
            uuid: e.uuid().to_string(),
            title: e.title().to_owned(),
            group: e.group().map(str::to_owned),
            user: e.user().map(str::to_owned),
            url: e.url().map(str::to_owned),
            modified: e
                .modified()
                .or_else(|| e.created())
                .map(|t| t.to_string()),
            has_attachment: e.attachment().is_some(),
        }
    }
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<Record>) -> Self {
        let mut store = Self::new();
        for record in records {
            match record {
                Record::Entry(e) => store.entries.push(e),
                Record::Attachment(a) => store.attachments.push(a),
            }
        }
        store
    }

    /// Entries first, then attachments.
    pub fn records(&self) -> impl Iterator<Item = Record> + '_ {
        self.entries
            .iter()
            .cloned()
            .map(Record::Entry)
            .chain(self.attachments.iter().cloned().map(Record::Attachment))
    }

    pub fn add(&mut self, entry: Entry) -> Result<(), StoreError> {
        if self.get(entry.title()).is_some() {
            return Err(StoreError::EntryAlreadyExists(entry.title().to_owned()));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// First entry with this title.
    pub fn get(&self, title: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.title() == title)
    }

    pub fn get_mut(&mut self, title: &str) -> Result<&mut Entry, StoreError> {
        self.entries
            .iter_mut()
            .find(|e| e.title() == title)
            .ok_or_else(|| StoreError::EntryNotFound(title.to_owned()))
    }

    /// Removes the entry and the attachment it refers to.
    pub fn remove(&mut self, title: &str) -> Result<Entry, StoreError> {
        let index = self
            .entries
            .iter()
            .position(|e| e.title() == title)
            .ok_or_else(|| StoreError::EntryNotFound(title.to_owned()))?;
        let entry = self.entries.remove(index);
        if let Some(id) = entry.attachment() {
            self.attachments.retain(|a| a.uuid() != id);
        }
        Ok(entry)
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    pub fn summaries(&self) -> Vec<EntrySummary> {
        self.entries.iter().map(EntrySummary::from).collect()
    }

    pub fn attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.attachments.iter()
    }

    pub fn attachment(&self, id: Uuid) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.uuid() == id)
    }

    /// Attaches to the entry `title`, replacing any previous attachment.
    pub fn attach(&mut self, title: &str, attachment: Attachment) -> Result<(), StoreError> {
        let id = attachment.uuid();
        let entry = self.get_mut(title)?;
        let previous = entry.attachment();
        entry.set_attachment(id);
        if let Some(old) = previous {
            self.attachments.retain(|a| a.uuid() != old);
        }
        self.attachments.push(attachment);
        Ok(())
    }

    /// The attachment the entry `title` refers to.
    pub fn attachment_of(&self, title: &str) -> Result<&Attachment, StoreError> {
        let entry = self
            .get(title)
            .ok_or_else(|| StoreError::EntryNotFound(title.to_owned()))?;
        entry
            .attachment()
            .and_then(|id| self.attachment(id))
            .ok_or_else(|| StoreError::AttachmentNotFound(title.to_owned()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
