//! The single-file persistent store.
//!
//! A [`Store`] is the process-wide handle to everything persisted: platform
//! user data, the message log, the interpreter state, and the markov model.
//! It is handed around as an `Arc` rather than living in a static so tests
//! can spin up isolated instances.
//!
//! On disk: a 24-byte superblock (magic, version, flags, timestamp) followed
//! by the tagged payloads in a fixed order. Snapshots serialize under read
//! locks into a `.new` shadow file and commit with a rename, so the primary
//! file is either the previous valid database or the new one, never a torn
//! write.

use crate::codec::{tags, Persist, Reader, RelStr, Writer};
use crate::error::{CodecError, CodecResult, DbError, DbResult};
use crate::interp::Interpreter;
use crate::markov::MarkovModel;
use crate::util::timestamp_ms;
use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{error, info, warn};

pub const DB_MAGIC: &[u8; 8] = b"ikura_db";
pub const DB_VERSION: u32 = 1;
const SUPERBLOCK_SIZE: usize = 24;
const SYNC_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// Persisted records
// ============================================================================

/// A known user on a twitch-like backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TwitchUser {
    pub id: String,
    pub username: String,
    pub displayname: String,
}

impl Persist for TwitchUser {
    fn write_to(&self, w: &mut Writer) {
        w.tag(tags::TWITCH_USER);
        w.write_str(&self.id);
        w.write_str(&self.username);
        w.write_str(&self.displayname);
    }

    fn read_from(r: &mut Reader<'_>) -> CodecResult<Self> {
        r.expect_tag(tags::TWITCH_USER)?;
        Ok(Self {
            id: r.read_str()?,
            username: r.read_str()?,
            displayname: r.read_str()?,
        })
    }
}

/// A user's standing in one channel. Credentials are per-channel because
/// subscriptions and mod status are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserCredentials {
    pub permissions: u64,
    pub subscribed_months: u64,
}

impl Persist for UserCredentials {
    fn write_to(&self, w: &mut Writer) {
        w.tag(tags::USER_CREDS);
        w.write(&self.permissions);
        w.write(&self.subscribed_months);
    }

    fn read_from(r: &mut Reader<'_>) -> CodecResult<Self> {
        r.expect_tag(tags::USER_CREDS)?;
        Ok(Self {
            permissions: r.read()?,
            subscribed_months: r.read()?,
        })
    }
}

/// Per-channel user and credential maps, keyed by platform user id.
#[derive(Debug, Clone, Default)]
pub struct ChannelData {
    pub users: HashMap<String, TwitchUser>,
    pub credentials: HashMap<String, UserCredentials>,
}

impl ChannelData {
    pub fn user_permissions(&self, user_id: &str) -> u64 {
        self.credentials
            .get(user_id)
            .map(|c| c.permissions)
            .unwrap_or(crate::perms::EVERYONE)
    }
}

impl Persist for ChannelData {
    fn write_to(&self, w: &mut Writer) {
        w.tag(tags::TWITCH_CHANNEL);
        w.write(&self.users);
        w.write(&self.credentials);
    }

    fn read_from(r: &mut Reader<'_>) -> CodecResult<Self> {
        r.expect_tag(tags::TWITCH_CHANNEL)?;
        Ok(Self {
            users: r.read()?,
            credentials: r.read()?,
        })
    }
}

/// One logged chat message. The text and emote spans are offsets into the
/// log's shared blob rather than owned strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggedMessage {
    pub timestamp: u64,
    pub user_id: String,
    pub username: String,
    pub channel: String,
    pub text: RelStr,
    /// byte spans relative to `text`
    pub emotes: Vec<RelStr>,
    pub is_command: bool,
}

impl Persist for LoggedMessage {
    fn write_to(&self, w: &mut Writer) {
        w.tag(tags::LOG_MESSAGE);
        w.write(&self.timestamp);
        w.write_str(&self.user_id);
        w.write_str(&self.username);
        w.write_str(&self.channel);
        w.write(&self.text);
        w.write(&self.emotes);
        w.write(&self.is_command);
    }

    fn read_from(r: &mut Reader<'_>) -> CodecResult<Self> {
        r.expect_tag(tags::LOG_MESSAGE)?;
        Ok(Self {
            timestamp: r.read()?,
            user_id: r.read_str()?,
            username: r.read_str()?,
            channel: r.read_str()?,
            text: r.read()?,
            emotes: r.read()?,
            is_command: r.read()?,
        })
    }
}

/// The message log: entries plus the blob their spans point into.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    raw: String,
    pub messages: Vec<LoggedMessage>,
}

impl MessageLog {
    /// Append message text to the blob, returning its span.
    pub fn store_text(&mut self, text: &str) -> RelStr {
        let start = self.raw.len() as u64;
        self.raw.push_str(text);
        RelStr::new(start, text.len() as u64)
    }

    pub fn text_of(&self, msg: &LoggedMessage) -> Option<&str> {
        msg.text.slice(&self.raw)
    }
}

impl Persist for MessageLog {
    fn write_to(&self, w: &mut Writer) {
        w.tag(tags::MESSAGE_LOG);
        w.write_str(&self.raw);
        w.write(&self.messages);
    }

    fn read_from(r: &mut Reader<'_>) -> CodecResult<Self> {
        r.expect_tag(tags::MESSAGE_LOG)?;
        Ok(Self {
            raw: r.read_str()?,
            messages: r.read()?,
        })
    }
}

/// Twitch-side data: channels and the message log.
#[derive(Debug, Clone, Default)]
pub struct TwitchData {
    pub channels: HashMap<String, ChannelData>,
    pub message_log: MessageLog,
}

impl Persist for TwitchData {
    fn write_to(&self, w: &mut Writer) {
        w.tag(tags::TWITCH_DB);
        w.write(&self.channels);
        w.write(&self.message_log);
    }

    fn read_from(r: &mut Reader<'_>) -> CodecResult<Self> {
        r.expect_tag(tags::TWITCH_DB)?;
        Ok(Self {
            channels: r.read()?,
            message_log: r.read()?,
        })
    }
}

/// Discord-side data: per-guild channel equivalents.
#[derive(Debug, Clone, Default)]
pub struct DiscordData {
    pub guilds: HashMap<String, ChannelData>,
}

impl Persist for DiscordData {
    fn write_to(&self, w: &mut Writer) {
        w.tag(tags::DISCORD_DB);
        w.write(&self.guilds);
    }

    fn read_from(r: &mut Reader<'_>) -> CodecResult<Self> {
        r.expect_tag(tags::DISCORD_DB)?;
        Ok(Self { guilds: r.read()? })
    }
}

/// Everything in the database file except the interpreter and markov
/// payloads, which live in their own cells.
#[derive(Debug, Clone, Default)]
pub struct Database {
    pub twitch: TwitchData,
    pub discord: DiscordData,
}

// ============================================================================
// Superblock
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Superblock {
    version: u32,
    flags: u32,
    timestamp: u64,
}

impl Superblock {
    fn encode(&self) -> [u8; SUPERBLOCK_SIZE] {
        let mut out = [0u8; SUPERBLOCK_SIZE];
        out[..8].copy_from_slice(DB_MAGIC);
        out[8..12].copy_from_slice(&self.version.to_le_bytes());
        out[12..16].copy_from_slice(&self.flags.to_le_bytes());
        out[16..24].copy_from_slice(&self.timestamp.to_le_bytes());
        out
    }

    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        if bytes.len() < SUPERBLOCK_SIZE {
            return Err(CodecError::Truncated);
        }
        if &bytes[..8] != DB_MAGIC {
            return Err(CodecError::BadMagic);
        }

        let version = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        if version != DB_VERSION {
            return Err(CodecError::VersionMismatch {
                found: version,
                expected: DB_VERSION,
            });
        }

        Ok(Self {
            version,
            flags: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
            timestamp: u64::from_le_bytes(bytes[16..24].try_into().unwrap()),
        })
    }
}

// ============================================================================
// Store
// ============================================================================

/// Process-wide handle over the persisted state: the database cell, the
/// interpreter cell, and the markov cell, all behind reader-writer locks.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    db: RwLock<Database>,
    interp: RwLock<Interpreter>,
    markov: RwLock<MarkovModel>,
}

impl Store {
    /// Load the database file, or create a fresh one when `create` is set
    /// and the file is missing. Nothing is mutated on failure.
    pub fn load(path: impl Into<PathBuf>, create: bool) -> DbResult<Arc<Store>> {
        let path = path.into();

        if !path.exists() {
            if !create {
                return Err(DbError::Missing(path.display().to_string()));
            }

            info!(path = %path.display(), "creating new database");
            let store = Arc::new(Store {
                path,
                db: RwLock::new(Database::default()),
                interp: RwLock::new(Interpreter::new()),
                markov: RwLock::new(MarkovModel::new()),
            });
            store.sync();
            return Ok(store);
        }

        if create {
            warn!(path = %path.display(), "database exists, ignoring --create");
        }

        let bytes = std::fs::read(&path)?;
        let _sb = Superblock::decode(&bytes)?;

        let mut r = Reader::new(&bytes[SUPERBLOCK_SIZE..]);
        let twitch: TwitchData = r.read()?;
        let discord: DiscordData = r.read()?;
        let interp: Interpreter = r.read()?;
        let markov: MarkovModel = r.read()?;

        info!(path = %path.display(), "database loaded");
        Ok(Arc::new(Store {
            path,
            db: RwLock::new(Database { twitch, discord }),
            interp: RwLock::new(interp),
            markov: RwLock::new(markov),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read<R>(&self, f: impl FnOnce(&Database) -> R) -> R {
        let guard = self.db.read().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut Database) -> R) -> R {
        let mut guard = self.db.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn interp_read<R>(&self, f: impl FnOnce(&Interpreter) -> R) -> R {
        let guard = self.interp.read().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    pub fn interp_write<R>(&self, f: impl FnOnce(&mut Interpreter) -> R) -> R {
        let mut guard = self.interp.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn markov_read<R>(&self, f: impl FnOnce(&MarkovModel) -> R) -> R {
        let guard = self.markov.read().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    pub fn markov_write<R>(&self, f: impl FnOnce(&mut MarkovModel) -> R) -> R {
        let mut guard = self.markov.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// Serialize everything and commit it to disk. Failures are logged and
    /// the previous file is left intact; a later cycle retries.
    pub fn sync(&self) {
        match self.sync_inner() {
            Ok(bytes) => info!(bytes, "database synced"),
            Err(e) => error!(error = %e, "database sync failed"),
        }
    }

    fn sync_inner(&self) -> DbResult<usize> {
        let mut w = Writer::with_capacity(4096);
        w.raw(&Superblock {
            version: DB_VERSION,
            flags: 0,
            timestamp: timestamp_ms(),
        }
        .encode());

        // payloads serialize under read locks, one cell at a time
        {
            let db = self.db.read().unwrap_or_else(|e| e.into_inner());
            w.write(&db.twitch);
            w.write(&db.discord);
        }
        {
            let interp = self.interp.read().unwrap_or_else(|e| e.into_inner());
            w.write(&*interp);
        }
        {
            let markov = self.markov.read().unwrap_or_else(|e| e.into_inner());
            w.write(&*markov);
        }

        let bytes = w.into_bytes();
        let shadow = shadow_path(&self.path);

        {
            let mut opts = std::fs::OpenOptions::new();
            opts.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                opts.mode(0o664);
            }

            let mut file = opts.open(&shadow)?;
            file.write_all(&bytes)?;
        }

        // the rename is the commit point
        std::fs::rename(&shadow, &self.path)?;
        Ok(bytes.len())
    }

    /// Start the background thread that snapshots every 60 seconds. The
    /// thread is detached; it dies with the process.
    pub fn spawn_syncer(self: &Arc<Self>) {
        let store = Arc::clone(self);
        std::thread::Builder::new()
            .name("db-sync".to_string())
            .spawn(move || loop {
                std::thread::sleep(SYNC_INTERVAL);
                store.sync();
            })
            .expect("failed to spawn db sync thread");
    }
}

fn shadow_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".new");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::{Command, Macro, Value};

    fn temp_db_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("ikura-test-{name}-{}", std::process::id()));
        let _ = std::fs::remove_file(&p);
        p
    }

    #[test]
    fn test_missing_without_create() {
        let path = temp_db_path("missing");
        assert!(matches!(
            Store::load(&path, false),
            Err(DbError::Missing(_))
        ));
    }

    #[test]
    fn test_create_load_roundtrip() {
        let path = temp_db_path("roundtrip");
        let store = Store::load(&path, true).unwrap();

        store.write(|db| {
            let chan = db.twitch.channels.entry("ponko".to_string()).or_default();
            chan.users.insert(
                "42".to_string(),
                TwitchUser {
                    id: "42".to_string(),
                    username: "someone".to_string(),
                    displayname: "Someone".to_string(),
                },
            );
            chan.credentials.insert(
                "42".to_string(),
                UserCredentials {
                    permissions: crate::perms::MODERATOR,
                    subscribed_months: 3,
                },
            );

            let span = db.twitch.message_log.store_text("hello world");
            db.twitch.message_log.messages.push(LoggedMessage {
                timestamp: 1,
                user_id: "42".to_string(),
                username: "someone".to_string(),
                channel: "ponko".to_string(),
                text: span,
                emotes: vec![],
                is_command: false,
            });
        });

        store.interp_write(|i| {
            i.commands.insert(
                "greet".to_string(),
                Command::Macro(Macro::new("greet", "Hello, $1!")),
            );
            i.add_global("n", Value::Int(3)).unwrap();
        });

        store.sync();

        let back = Store::load(&path, false).unwrap();
        back.read(|db| {
            let chan = &db.twitch.channels["ponko"];
            assert_eq!(chan.users["42"].username, "someone");
            assert_eq!(
                chan.credentials["42"].permissions,
                crate::perms::MODERATOR
            );

            let msg = &db.twitch.message_log.messages[0];
            assert_eq!(db.twitch.message_log.text_of(msg), Some("hello world"));
        });
        back.interp_read(|i| {
            assert!(i.find_command("greet").is_some());
            assert_eq!(i.globals.get("n"), Some(&Value::Int(3)));
        });

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let path = temp_db_path("version");
        let store = Store::load(&path, true).unwrap();
        store.sync();
        drop(store);

        // corrupt the version field
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[8..12].copy_from_slice(&999u32.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        match Store::load(&path, false) {
            Err(DbError::Codec(CodecError::VersionMismatch { found, expected })) => {
                assert_eq!(found, 999);
                assert_eq!(expected, DB_VERSION);
            }
            other => panic!("expected version mismatch, got {other:?}"),
        }

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let path = temp_db_path("magic");
        std::fs::write(&path, b"definitely not a database").unwrap();

        assert!(matches!(
            Store::load(&path, false),
            Err(DbError::Codec(CodecError::BadMagic))
        ));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_sync_commits_via_shadow_file() {
        let path = temp_db_path("shadow");
        let store = Store::load(&path, true).unwrap();
        store.sync();

        assert!(path.exists());
        assert!(!shadow_path(&path).exists(), "shadow file must be renamed away");

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_default_permissions_for_unknown_user() {
        let chan = ChannelData::default();
        assert_eq!(chan.user_permissions("nobody"), crate::perms::EVERYONE);
    }
}
