//! Encrypted password database in the V4 container format.
//!
//! [`Strongbox`] is the high-level handle: it opens a database file with a
//! passphrase, keeps the decrypted records in memory and writes them back
//! atomically. The layers below it are usable on their own:
//! [`crypto`] for key stretching, key wrapping and key blocks, and
//! [`format`] for the streaming container reader and writer.

pub mod attachment;
pub mod context;
pub mod crypto;
pub mod error;
pub mod format;
pub mod record;
mod storage;
mod store;
pub mod time;

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use tracing::{debug, info};
use zeroize::Zeroizing;

pub use crate::attachment::Attachment;
pub use crate::context::WriterContext;
pub use crate::crypto::{KdfParams, KeyBlockSet, SessionKeys};
pub use crate::error::{Error, ErrorKind, StoreError};
pub use crate::format::{FormatVersion, Header};
pub use crate::record::{Entry, EntryField, EntryKind, Record};
pub use crate::storage::Storage;
pub use crate::store::EntrySummary;
use crate::store::Store;
use crate::time::PwsTime;

/// An unlocked database.
pub struct Strongbox {
    store: Store,
    storage: Storage,
    header: Header,
    key_blocks: KeyBlockSet,
    keys: SessionKeys,
    context: WriterContext,
}

impl Strongbox {
    pub fn init(
        passphrase: Zeroizing<String>,
        name: Option<&str>,
        context: WriterContext,
    ) -> Result<Self> {
        let storage = default_storage()?;
        Self::init_with_storage(passphrase, storage, name, context)
    }

    /// Creates a new database with one passphrase and writes it out.
    pub fn init_with_storage(
        passphrase: Zeroizing<String>,
        storage: Storage,
        name: Option<&str>,
        context: WriterContext,
    ) -> Result<Self> {
        if storage.exists() {
            bail!("database already exists at {}", storage.path().display());
        }
        if passphrase.is_empty() {
            bail!("passphrase cannot be empty");
        }

        let (key_blocks, keys) = KeyBlockSet::create(&passphrase, context.kdf)
            .context("failed to create key block")?;
        drop(passphrase);

        let header = match name {
            Some(name) => Header::with_name(name),
            None => Header::new(),
        };

        let mut sb = Self {
            store: Store::new(),
            storage,
            header,
            key_blocks,
            keys,
            context,
        };
        sb.save()?;
        info!(path = %sb.storage.path().display(), "database created");
        Ok(sb)
    }

    pub fn open(passphrase: Zeroizing<String>, context: WriterContext) -> Result<Self> {
        let storage = default_storage()?;
        Self::open_with_storage(passphrase, storage, context)
    }

    /// Reads and verifies the whole file. Nothing is returned unless the
    /// file HMAC matches.
    pub fn open_with_storage(
        passphrase: Zeroizing<String>,
        storage: Storage,
        context: WriterContext,
    ) -> Result<Self> {
        if !storage.exists() {
            bail!("database does not exist at {}", storage.path().display());
        }

        let file = storage.open()?;
        let reader = format::open_reader(FormatVersion::CURRENT, BufReader::new(file), &passphrase)?;
        drop(passphrase);
        let (header, key_blocks, keys, records) = reader.read_all()?;
        debug!(records = records.len(), "records loaded");

        Ok(Self {
            store: Store::from_records(records),
            storage,
            header,
            key_blocks,
            keys,
            context,
        })
    }

    /// Whether `passphrase` opens the database, reading only its key blocks.
    pub fn check_passkey(storage: &Storage, passphrase: &str) -> Result<bool> {
        let file = storage.open()?;
        Ok(format::v4::check_passkey(BufReader::new(file), passphrase)?)
    }

    pub fn add(&mut self, entry: Entry) -> Result<()> {
        self.store.add(entry).map_err(Error::from)?;
        Ok(())
    }

    pub fn get(&self, title: &str) -> Option<&Entry> {
        self.store.get(title)
    }

    pub fn entry_mut(&mut self, title: &str) -> Result<&mut Entry> {
        Ok(self.store.get_mut(title).map_err(Error::from)?)
    }

    pub fn update(&mut self, title: &str, password: &str) -> Result<()> {
        self.entry_mut(title)?.set_password(password);
        Ok(())
    }

    pub fn remove(&mut self, title: &str) -> Result<()> {
        self.store.remove(title).map_err(Error::from)?;
        Ok(())
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.store.entries()
    }

    pub fn summaries(&self) -> Vec<EntrySummary> {
        self.store.summaries()
    }

    /// Seals the file at `path` and attaches it to the entry `title`.
    pub fn attach(&mut self, title: &str, path: &Path) -> Result<()> {
        if self.store.get(title).is_none() {
            return Err(Error::from(StoreError::EntryNotFound(title.to_owned())).into());
        }
        let attachment = Attachment::from_file(title, path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        self.store.attach(title, attachment).map_err(Error::from)?;
        Ok(())
    }

    /// Writes the verified content of `title`'s attachment to `out`.
    ///
    /// If the content fails verification the partly written file is removed.
    pub fn extract(&self, title: &str, out: &Path) -> Result<u64> {
        let attachment = self.store.attachment_of(title).map_err(Error::from)?;
        let file = File::create(out)
            .with_context(|| format!("failed to create {}", out.display()))?;

        match attachment.extract_to(BufWriter::new(file)) {
            Ok(written) => Ok(written),
            Err(err) => {
                let _ = std::fs::remove_file(out);
                Err(err.into())
            }
        }
    }

    pub fn attachment(&self, title: &str) -> Result<&Attachment> {
        Ok(self.store.attachment_of(title).map_err(Error::from)?)
    }

    /// Lets `new` open the database too, authorised by `existing`.
    pub fn add_passphrase(&mut self, existing: &str, new: &str) -> Result<()> {
        if new.is_empty() {
            bail!("passphrase cannot be empty");
        }
        self.key_blocks
            .add_block(Some(existing), new, self.context.kdf)?;
        Ok(())
    }

    pub fn remove_passphrase(&mut self, passphrase: &str) -> Result<()> {
        self.key_blocks.remove_block(passphrase)?;
        Ok(())
    }

    pub fn change_passphrase(&mut self, old: &str, new: &str) -> Result<()> {
        if new.is_empty() {
            bail!("passphrase cannot be empty");
        }
        self.key_blocks
            .change_passphrase(old, new, self.context.kdf)?;
        Ok(())
    }

    /// Re-seals the passphrase's key block with a new iteration count.
    pub fn rekey(&mut self, passphrase: &str, kdf: KdfParams) -> Result<()> {
        self.key_blocks.rekey(passphrase, kdf)?;
        Ok(())
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn key_blocks(&self) -> &KeyBlockSet {
        &self.key_blocks
    }

    /// Writes every record under a fresh nonce and IV.
    pub fn save(&mut self) -> Result<()> {
        let Self {
            store,
            storage,
            header,
            key_blocks,
            keys,
            context,
        } = self;

        storage
            .save_with(|out| {
                let mut writer = format::create_writer(
                    FormatVersion::CURRENT,
                    out,
                    key_blocks,
                    keys,
                    header,
                    context,
                )?;
                for record in store.records() {
                    writer.write_record(&record)?;
                }
                writer.close()?;
                Ok(())
            })
            .context("failed to save database")
    }

    pub fn info(&self) -> Result<VaultInfo> {
        let file_size = std::fs::metadata(self.storage.path())
            .map(|m| m.len())
            .context("failed to read database metadata")?;
        let (major, minor) = self.header.version.unwrap_or((
            FormatVersion::CURRENT.major(),
            FormatVersion::CURRENT.minor(),
        ));

        Ok(VaultInfo {
            path: self.storage.path().display().to_string(),
            version: format!("{major}.{minor:02}"),
            name: self.header.db_name.clone(),
            description: self.header.db_description.clone(),
            uuid: self.header.uuid.to_string(),
            iterations: self.key_blocks.iter().map(|b| b.iterations()).collect(),
            entries: self.store.len(),
            attachments: self.store.attachments().count(),
            last_saved: self.header.last_saved,
            last_saved_by: self.header.last_saved_by.clone(),
            last_saved_with: self.header.last_saved_with.clone(),
            file_size,
        })
    }
}

/// Summary printed by `strongbox info`.
#[derive(Debug, Clone)]
pub struct VaultInfo {
    pub path: String,
    pub version: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub uuid: String,
    /// Iteration count of each key block.
    pub iterations: Vec<u32>,
    pub entries: usize,
    pub attachments: usize,
    pub last_saved: Option<PwsTime>,
    pub last_saved_by: Option<String>,
    pub last_saved_with: Option<String>,
    pub file_size: u64,
}

impl fmt::Display for VaultInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Path:         {}", self.path)?;
        writeln!(f, "Format:       V{}", self.version)?;
        if let Some(name) = &self.name {
            writeln!(f, "Name:         {name}")?;
        }
        if let Some(desc) = &self.description {
            writeln!(f, "Description:  {desc}")?;
        }
        writeln!(f, "UUID:         {}", self.uuid)?;
        writeln!(f, "Passphrases:  {}", self.iterations.len())?;
        for (i, n) in self.iterations.iter().enumerate() {
            writeln!(f, "  key block {}: {n} iterations", i + 1)?;
        }
        writeln!(f, "Entries:      {}", self.entries)?;
        writeln!(f, "Attachments:  {}", self.attachments)?;
        if let Some(t) = self.last_saved {
            write!(f, "Last saved:   {t}")?;
            if let Some(user) = &self.last_saved_by {
                write!(f, " by {user}")?;
            }
            if let Some(app) = &self.last_saved_with {
                write!(f, " with {app}")?;
            }
            writeln!(f)?;
        }
        write!(f, "File size:    {} bytes", self.file_size)
    }
}

pub fn default_storage() -> Result<Storage> {
    let project_dirs = ProjectDirs::from("", "", "strongbox")
        .context("could not determine platform directories")?;

    let path = project_dirs.data_dir().join("strongbox.psafe4");

    Ok(Storage::new(path))
}
