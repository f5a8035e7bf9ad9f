use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, warn};
use uuid::Uuid;

use crate::session::{ChatSession, Message, Theme};

const SESSIONS_FILE: &str = "sessions.json";
const PREFS_FILE: &str = "prefs.json";

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct Preferences {
    theme: Theme,
}

/// File-backed collection of chat sessions, most-recent-first.
///
/// Persistence is whole-snapshot: every mutation rewrites the full session
/// file. Writes are best-effort; a failed write is logged and the in-memory
/// state stays authoritative for the rest of the process lifetime.
pub struct SessionStore {
    data_dir: PathBuf,
    sessions: Vec<ChatSession>,
    active: Option<Uuid>,
    prefs: Preferences,
}

impl SessionStore {
    /// Load the store from `data_dir`, creating the directory if needed.
    /// Absent or malformed snapshots yield an empty collection rather than
    /// failing startup.
    pub fn open(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        if let Err(e) = fs::create_dir_all(&data_dir) {
            warn!("Could not create data dir {}: {}", data_dir.display(), e);
        }

        let sessions: Vec<ChatSession> =
            read_json(&data_dir.join(SESSIONS_FILE)).unwrap_or_default();
        let prefs: Preferences = read_json(&data_dir.join(PREFS_FILE)).unwrap_or_default();
        let active = sessions.first().map(|s| s.id);

        Self {
            data_dir,
            sessions,
            active,
            prefs,
        }
    }

    pub fn sessions(&self) -> &[ChatSession] {
        &self.sessions
    }

    pub fn session(&self, id: Uuid) -> Option<&ChatSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn active(&self) -> Option<Uuid> {
        self.active
    }

    pub fn active_session(&self) -> Option<&ChatSession> {
        self.active.and_then(|id| self.session(id))
    }

    pub fn set_active(&mut self, id: Uuid) -> bool {
        if self.session(id).is_some() {
            self.active = Some(id);
            true
        } else {
            warn!("Attempted to activate unknown session {}", id);
            false
        }
    }

    /// Create a new session, prepend it and make it active.
    pub fn create_session(&mut self) -> Uuid {
        let session = ChatSession::new();
        let id = session.id;
        self.sessions.insert(0, session);
        self.active = Some(id);
        self.persist_sessions();
        id
    }

    /// Append a message to the identified session. Unknown ids are a logged
    /// no-op; history is append-only.
    pub fn append_message(&mut self, session_id: Uuid, message: Message) {
        match self.sessions.iter_mut().find(|s| s.id == session_id) {
            Some(session) => {
                session.push(message);
                self.persist_sessions();
            }
            None => warn!("Dropping message for unknown session {}", session_id),
        }
    }

    /// Empty the whole collection and clear the active pointer.
    pub fn clear_all(&mut self) {
        self.sessions.clear();
        self.active = None;
        self.persist_sessions();
    }

    pub fn theme(&self) -> Theme {
        self.prefs.theme
    }

    pub fn set_theme(&mut self, theme: Theme) {
        self.prefs.theme = theme;
        write_json(&self.data_dir.join(PREFS_FILE), &self.prefs);
    }

    fn persist_sessions(&self) {
        write_json(&self.data_dir.join(SESSIONS_FILE), &self.sessions);
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Could not read {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring malformed {}: {}", path.display(), e);
            None
        }
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) {
    let payload = match serde_json::to_string_pretty(value) {
        Ok(payload) => payload,
        Err(e) => {
            error!("Could not serialize {}: {}", path.display(), e);
            return;
        }
    };
    if let Err(e) = fs::write(path, payload) {
        error!("Could not write {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn starts_empty_without_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::open(dir.path());
        assert!(store.sessions().is_empty());
        assert!(store.active().is_none());
        assert_eq!(store.theme(), Theme::Dark);
    }

    #[test]
    fn malformed_snapshot_loads_as_empty() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(SESSIONS_FILE), "{not json at all").unwrap();
        fs::write(dir.path().join(PREFS_FILE), "[]").unwrap();

        let store = SessionStore::open(dir.path());
        assert!(store.sessions().is_empty());
        assert_eq!(store.theme(), Theme::Dark);
    }

    #[test]
    fn create_prepends_and_activates() {
        let dir = TempDir::new().unwrap();
        let mut store = SessionStore::open(dir.path());

        let first = store.create_session();
        let second = store.create_session();

        assert_eq!(store.sessions()[0].id, second);
        assert_eq!(store.sessions()[1].id, first);
        assert_eq!(store.active(), Some(second));
        assert_eq!(store.sessions()[0].title, "New Chat");
    }

    #[test]
    fn append_preserves_call_order_and_sets_title() {
        let dir = TempDir::new().unwrap();
        let mut store = SessionStore::open(dir.path());
        let id = store.create_session();

        store.append_message(id, Message::user("first question about electrolysis"));
        store.append_message(id, Message::assistant("answer", Vec::new(), None));
        store.append_message(id, Message::user("follow-up"));

        let session = store.session(id).unwrap();
        assert_eq!(session.messages.len(), 3);
        assert_eq!(session.messages[0].content, "first question about electrolysis");
        assert_eq!(session.messages[2].content, "follow-up");
        assert_eq!(session.title, "first question about electroly");
    }

    #[test]
    fn append_to_unknown_session_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let mut store = SessionStore::open(dir.path());
        store.append_message(Uuid::new_v4(), Message::user("lost"));
        assert!(store.sessions().is_empty());
    }

    #[test]
    fn clear_all_empties_collection_and_pointer() {
        let dir = TempDir::new().unwrap();
        let mut store = SessionStore::open(dir.path());
        let id = store.create_session();
        store.append_message(id, Message::user("hello"));

        store.clear_all();
        assert!(store.sessions().is_empty());
        assert!(store.active().is_none());

        // The cleared state survives a reload.
        let reloaded = SessionStore::open(dir.path());
        assert!(reloaded.sessions().is_empty());
        assert!(reloaded.active().is_none());
    }

    #[test]
    fn snapshot_survives_reload() {
        let dir = TempDir::new().unwrap();
        let id = {
            let mut store = SessionStore::open(dir.path());
            let id = store.create_session();
            store.append_message(id, Message::user("persist me"));
            store.set_theme(Theme::Light);
            id
        };

        let store = SessionStore::open(dir.path());
        assert_eq!(store.sessions().len(), 1);
        assert_eq!(store.sessions()[0].id, id);
        assert_eq!(store.sessions()[0].messages[0].content, "persist me");
        // The most recent session becomes active again on load.
        assert_eq!(store.active(), Some(id));
        assert_eq!(store.theme(), Theme::Light);
    }
}
