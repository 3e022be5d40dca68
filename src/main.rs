use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
mod auth;
use std::path::PathBuf;
use strongbox::{Entry, KdfParams, Storage, Strongbox, WriterContext, default_storage};
use strongbox::{crypto::DEFAULT_HASH_ITERATIONS, format::entry_type};
use tracing_subscriber::EnvFilter;

fn resolve_storage(path: Option<PathBuf>) -> Result<Storage> {
    match path {
        Some(p) => Ok(Storage::new(p)),
        None => default_storage(),
    }
}

#[derive(Debug, Parser)]
#[command(name = "strongbox")]
#[command(
    version,
    about = "Offline password database with multiple passphrases per file."
)]
struct Cli {
    ///Path to the database file
    #[arg(long, global = true, value_name = "PATH", env = "STRONGBOX_PATH")]
    store: Option<PathBuf>,

    /// PBKDF2 iterations for new key blocks (2048 to 4194304)
    #[arg(long, global = true, value_name = "N", default_value_t = DEFAULT_HASH_ITERATIONS)]
    iterations: u32,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, value_name = "FILTER", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Creates a new database
    Init {
        /// Database name stored in the header
        #[arg(long)]
        name: Option<String>,
    },

    /// Adds an entry
    #[command(arg_required_else_help = true)]
    Add {
        title: String,
        password: String,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },

    /// Prints the password of an entry
    #[command(arg_required_else_help = true)]
    Get { title: String },

    /// Replaces the password of an entry
    #[command(arg_required_else_help = true)]
    Update { title: String, password: String },

    /// Lists entries
    List {
        /// Print entry details as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Removes an entry and its attachment
    #[command(arg_required_else_help = true)]
    Remove { title: String },

    /// Attaches a file to an entry
    #[command(arg_required_else_help = true)]
    Attach { title: String, file: PathBuf },

    /// Writes an entry's attachment to a file
    #[command(arg_required_else_help = true)]
    Extract { title: String, out: PathBuf },

    /// Adds another passphrase that opens the database
    AddUser,

    /// Removes the passphrase used to open the database
    RemoveUser,

    /// Shows information about the database
    Info,
}

fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_logging(&args.log_level);

    let kdf = KdfParams::new(args.iterations).context("invalid --iterations")?;
    let context = WriterContext::from_env().with_kdf(kdf);
    let storage = resolve_storage(args.store.clone())?;
    let password = auth::read_password()?;

    match args.command {
        Commands::Init { name } => {
            Strongbox::init_with_storage(password, storage, name.as_deref(), context)?;
            println!("database initialized");
        }
        Commands::Add {
            title,
            password: secret,
            user,
            url,
            group,
            notes,
        } => {
            let mut sb = Strongbox::open_with_storage(password, storage, context)?;
            let mut entry = Entry::new(&title, &secret);
            let optional = [
                (entry_type::USER, user),
                (entry_type::URL, url),
                (entry_type::GROUP, group),
                (entry_type::NOTES, notes),
            ];
            for (code, value) in optional {
                if let Some(value) = value {
                    entry.set_text(code, &value);
                }
            }
            sb.add(entry)?;
            sb.save()?;
            println!("stored entry '{title}'");
        }
        Commands::Update {
            title,
            password: secret,
        } => {
            let mut sb = Strongbox::open_with_storage(password, storage, context)?;
            sb.update(&title, &secret)?;
            sb.save()?;
            println!("entry '{title}' updated.");
        }
        Commands::Get { title } => {
            let sb = Strongbox::open_with_storage(password, storage, context)?;
            match sb.get(&title) {
                Some(entry) => println!("{}", entry.password()),
                None => bail!("entry '{title}' not found"),
            }
        }
        Commands::List { json } => {
            let sb = Strongbox::open_with_storage(password, storage, context)?;
            let summaries = sb.summaries();
            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else if summaries.is_empty() {
                println!("No entries stored.");
            } else {
                let title_width = summaries
                    .iter()
                    .map(|e| e.title.len())
                    .chain(std::iter::once("Title".len()))
                    .max()
                    .unwrap_or_default();

                println!("{:<title_width$}  {}", "Title", "User");
                println!("{:-<title_width$}  {:-<4}", "", "");
                for e in &summaries {
                    println!(
                        "{:<title_width$}  {}",
                        e.title,
                        e.user.as_deref().unwrap_or("")
                    );
                }
            }
        }
        Commands::Remove { title } => {
            let mut sb = Strongbox::open_with_storage(password, storage, context)?;
            sb.remove(&title)?;
            sb.save()
                .with_context(|| format!("failed to remove entry '{title}'"))?;
            println!("entry '{title}' removed");
        }
        Commands::Attach { title, file } => {
            let mut sb = Strongbox::open_with_storage(password, storage, context)?;
            sb.attach(&title, &file)?;
            sb.save()?;
            println!("attached {} to '{title}'", file.display());
        }
        Commands::Extract { title, out } => {
            let sb = Strongbox::open_with_storage(password, storage, context)?;
            let written = sb.extract(&title, &out)?;
            println!("wrote {written} bytes to {}", out.display());
        }
        Commands::AddUser => {
            let new_password = auth::read_new_password_with_confirmation()?;
            let mut sb = Strongbox::open_with_storage(password.clone(), storage, context)?;
            sb.add_passphrase(&password, &new_password)?;
            sb.save()?;
            println!("passphrase added ({} total)", sb.key_blocks().len());
        }
        Commands::RemoveUser => {
            let mut sb = Strongbox::open_with_storage(password.clone(), storage, context)?;
            sb.remove_passphrase(&password)?;
            sb.save()?;
            println!("passphrase removed ({} left)", sb.key_blocks().len());
        }
        Commands::Info => {
            let sb = Strongbox::open_with_storage(password, storage, context)?;
            println!("{}", sb.info()?);
        }
    }

    Ok(())
}
