use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use tracing::warn;

use denidin_core::clock::Clock;
use denidin_core::ids::{MessageId, SessionId};

use crate::error::{Result, SessionError};
use crate::tokenizer;
use crate::types::{Message, MessageRole, Session};

/// The durable, indexed conversation repository.
///
/// `index` is the advisory `chat_id → session_id` map for *active* sessions
/// only; on-disk `session.json`/`messages/*.json` under `root` is the
/// authoritative store. `locks` serialises concurrent appends to the same
/// session so `message_counter` increments and file writes stay atomic
/// together.
pub struct SessionStore {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    timeout_hours: u32,
    index: RwLock<HashMap<String, SessionId>>,
    locks: Mutex<HashMap<SessionId, Arc<Mutex<()>>>>,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>, clock: Arc<dyn Clock>, timeout_hours: u32) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            clock,
            timeout_hours,
            index: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the active session for `chat_id`, creating one if none is
    /// indexed. Concurrent callers race-safely resolve to a single winner:
    /// the write-lock path re-checks the index before minting.
    pub fn get_or_create(&self, chat_id: &str) -> Result<Session> {
        if let Some(session_id) = self.index.read().unwrap().get(chat_id).cloned() {
            return self.load_session_from_dir(&self.locate_session_dir(&session_id)?);
        }

        let mut index = self.index.write().unwrap();
        if let Some(session_id) = index.get(chat_id).cloned() {
            return self.load_session_from_dir(&self.locate_session_dir(&session_id)?);
        }

        let now = self.clock.now();
        let session = Session::new(chat_id, now);
        let dir = self.active_dir(&session.id);
        fs::create_dir_all(self.messages_dir(&dir))?;
        self.save_session_atomic(&dir, &session)?;
        index.insert(chat_id.to_string(), session.id.clone());
        Ok(session)
    }

    pub fn timeout_hours(&self) -> u32 {
        self.timeout_hours
    }

    /// Register an already-on-disk session as the active one for its chat.
    /// Used by the lifecycle worker's startup sweep to load fresh orphans
    /// back into the index.
    pub fn index_session(&self, session: &Session) {
        self.index
            .write()
            .unwrap()
            .insert(session.chat_id.clone(), session.id.clone());
    }

    pub fn append_message(
        &self,
        chat_id: &str,
        role: MessageRole,
        content: &str,
        sender: &str,
        recipient: &str,
        attachment: Option<String>,
    ) -> Result<MessageId> {
        let session = self.get_or_create(chat_id)?;
        let guard = self.session_lock(&session.id);
        let _held = guard.lock().unwrap();

        let dir = self.locate_session_dir(&session.id)?;
        let mut session = self.load_session_from_dir(&dir)?;
        let (id, _) = self.write_message(&dir, &mut session, role, content, sender, recipient, attachment)?;
        self.save_session_atomic(&dir, &session)?;
        Ok(id)
    }

    /// Same as `append_message`, but first evicts the oldest messages while
    /// `total_tokens + new > role_limit`. `role_limit == 0` fails without
    /// mutating anything.
    pub fn append_with_token_limit(
        &self,
        chat_id: &str,
        role: MessageRole,
        content: &str,
        sender: &str,
        recipient: &str,
        role_limit: u64,
        attachment: Option<String>,
    ) -> Result<MessageId> {
        if role_limit == 0 {
            return Err(SessionError::Forbidden);
        }

        let session = self.get_or_create(chat_id)?;
        let guard = self.session_lock(&session.id);
        let _held = guard.lock().unwrap();

        let dir = self.locate_session_dir(&session.id)?;
        let mut session = self.load_session_from_dir(&dir)?;
        let new_tokens = tokenizer::count_tokens(content);

        while session.total_tokens + new_tokens > role_limit && !session.message_ids.is_empty() {
            let oldest_id = session.message_ids.remove(0);
            let oldest_path = self.message_path(&dir, &oldest_id);
            if let Ok(bytes) = fs::read(&oldest_path) {
                if let Ok(oldest) = serde_json::from_slice::<Message>(&bytes) {
                    session.total_tokens = session.total_tokens.saturating_sub(oldest.tokens);
                }
            }
            let _ = fs::remove_file(&oldest_path);
        }

        let (id, _) = self.write_message(&dir, &mut session, role, content, sender, recipient, attachment)?;
        self.save_session_atomic(&dir, &session)?;
        Ok(id)
    }

    fn write_message(
        &self,
        dir: &Path,
        session: &mut Session,
        role: MessageRole,
        content: &str,
        sender: &str,
        recipient: &str,
        attachment: Option<String>,
    ) -> Result<(MessageId, u64)> {
        let now = self.clock.now();
        let tokens = tokenizer::count_tokens(content);
        let sequence = session.message_counter + 1;
        let message = Message {
            id: MessageId::new(),
            session_id: session.id.clone(),
            role,
            content: content.to_string(),
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            created_at: now,
            sequence,
            tokens,
            attachment,
        };

        // Message is durable before the session file is touched, so a crash
        // mid-append never leaves a dangling reference.
        fs::write(
            self.message_path(dir, &message.id),
            serde_json::to_vec_pretty(&message)?,
        )?;

        session.message_ids.push(message.id.clone());
        session.message_counter = sequence;
        session.total_tokens += tokens;
        session.last_active = now;

        Ok((message.id, tokens))
    }

    /// The ordered turn sequence, re-read from disk on every call so it is
    /// correct after a restart.
    pub fn history(&self, chat_id: &str) -> Result<Vec<(MessageRole, String)>> {
        let session_id = self
            .index
            .read()
            .unwrap()
            .get(chat_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound {
                chat_id: chat_id.to_string(),
            })?;

        let dir = self.locate_session_dir(&session_id)?;
        self.read_history_from_dir(&dir, &session_id)
    }

    /// Same as `history`, but resolves the session's directory from its own
    /// id rather than re-resolving through the `chat_id → session_id` index.
    /// The lifecycle worker must use this for a `Session` value it already
    /// holds: after a crash-restart the in-memory index has not yet observed
    /// archived-but-untransferred sessions, so re-resolving by `chat_id`
    /// would spuriously fail (or, worse, resolve to a different session that
    /// has since reused the same chat).
    pub fn history_for_session(&self, session: &Session) -> Result<Vec<(MessageRole, String)>> {
        let dir = self.locate_session_dir(&session.id)?;
        self.read_history_from_dir(&dir, &session.id)
    }

    fn read_history_from_dir(&self, dir: &Path, session_id: &SessionId) -> Result<Vec<(MessageRole, String)>> {
        let session = self.load_session_from_dir(dir)?;
        let mut turns = Vec::with_capacity(session.message_ids.len());
        for id in &session.message_ids {
            match fs::read(self.message_path(dir, id)) {
                Ok(bytes) => {
                    let message: Message = serde_json::from_slice(&bytes)?;
                    turns.push((message.role, message.content));
                }
                Err(e) => {
                    warn!("skipping missing message {id} in session {session_id}: {e}");
                }
            }
        }
        Ok(turns)
    }

    /// Wipes all messages of the active session and resets its counters;
    /// the session itself remains indexed.
    pub fn clear(&self, chat_id: &str) -> Result<()> {
        let session = self.get_or_create(chat_id)?;
        let guard = self.session_lock(&session.id);
        let _held = guard.lock().unwrap();

        let dir = self.locate_session_dir(&session.id)?;
        let mut session = self.load_session_from_dir(&dir)?;
        for id in session.message_ids.drain(..).collect::<Vec<_>>() {
            let _ = fs::remove_file(self.message_path(&dir, &id));
        }
        session.message_counter = 0;
        session.total_tokens = 0;
        self.save_session_atomic(&dir, &session)
    }

    /// Recompute `total_tokens` from the messages actually present on disk.
    /// Used by tests to verify the incrementally-maintained count.
    pub fn recompute_total_tokens(&self, chat_id: &str) -> Result<u64> {
        let session_id = self
            .index
            .read()
            .unwrap()
            .get(chat_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound {
                chat_id: chat_id.to_string(),
            })?;
        let dir = self.locate_session_dir(&session_id)?;
        let session = self.load_session_from_dir(&dir)?;
        let mut total = 0u64;
        for id in &session.message_ids {
            if let Ok(bytes) = fs::read(self.message_path(&dir, id)) {
                if let Ok(message) = serde_json::from_slice::<Message>(&bytes) {
                    total += message.tokens;
                }
            }
        }
        Ok(total)
    }

    pub fn expired_active_sessions(&self) -> Result<Vec<Session>> {
        let now = self.clock.now();
        let mut out = Vec::new();
        for dir in self.active_session_dirs()? {
            match self.load_session_from_dir(&dir) {
                Ok(session) if session.is_expired(now, self.timeout_hours) => out.push(session),
                Ok(_) => {}
                Err(e) => warn!("skipping unreadable session directory {:?}: {e}", dir),
            }
        }
        Ok(out)
    }

    pub fn untransferred_archived_sessions(&self) -> Result<Vec<Session>> {
        let expired_root = self.root.join("expired");
        if !expired_root.is_dir() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for date_entry in fs::read_dir(&expired_root)? {
            let date_entry = date_entry?;
            if !date_entry.file_type()?.is_dir() {
                continue;
            }
            for session_entry in fs::read_dir(date_entry.path())? {
                let session_entry = session_entry?;
                if !session_entry.file_type()?.is_dir() {
                    continue;
                }
                match self.load_session_from_dir(&session_entry.path()) {
                    Ok(session) if !session.transferred_to_longterm => out.push(session),
                    Ok(_) => {}
                    Err(e) => warn!(
                        "skipping unreadable archived session directory {:?}: {e}",
                        session_entry.path()
                    ),
                }
            }
        }
        Ok(out)
    }

    pub fn sessions_needing_cleanup(&self) -> Result<Vec<Session>> {
        let mut sessions = self.expired_active_sessions()?;
        sessions.extend(self.untransferred_archived_sessions()?);
        Ok(sessions)
    }

    /// Moves the session directory from the active location to
    /// `<root>/expired/<date>/<session_id>/`, keyed off `last_active`.
    /// Keeps the chat → session index entry so transfer can still find it.
    pub fn archive(&self, session: &mut Session) -> Result<bool> {
        let date = session.last_active.format("%Y-%m-%d").to_string();
        let src = self.active_dir(&session.id);
        let dest_root = self.root.join("expired").join(&date);
        fs::create_dir_all(&dest_root)?;
        let dest = dest_root.join(session.id.as_str());

        match fs::rename(&src, &dest) {
            Ok(()) => {
                session.storage_path = Some(format!("expired/{date}/{}", session.id));
                self.save_session_atomic(&dest, session)?;
                Ok(true)
            }
            Err(e) => {
                warn!("archive rename failed for session {}: {e}", session.id);
                Ok(false)
            }
        }
    }

    /// Drops the chat → session mapping; the next `get_or_create` for that
    /// chat mints a fresh session.
    pub fn remove_from_index(&self, session: &Session) -> bool {
        let mut index = self.index.write().unwrap();
        if index.get(&session.chat_id) == Some(&session.id) {
            index.remove(&session.chat_id);
            true
        } else {
            false
        }
    }

    pub fn mark_transferred(&self, session: &mut Session) -> Result<()> {
        session.transferred_to_longterm = true;
        let dir = self.session_dir(session);
        self.save_session_atomic(&dir, session)
    }

    /// Every session directory on disk under the active root, regardless of
    /// whether it is currently indexed. Used only at startup.
    pub fn orphan_sessions(&self) -> Result<Vec<Session>> {
        let indexed: HashSet<SessionId> = self.index.read().unwrap().values().cloned().collect();
        let mut out = Vec::new();
        for dir in self.active_session_dirs()? {
            if let Ok(session) = self.load_session_from_dir(&dir) {
                if !indexed.contains(&session.id) {
                    out.push(session);
                }
            }
        }
        Ok(out)
    }

    fn active_session_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if entry.file_name() == "expired" {
                continue;
            }
            dirs.push(entry.path());
        }
        Ok(dirs)
    }

    fn active_dir(&self, id: &SessionId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Resolve a session's directory from its id alone, active or archived.
    ///
    /// The index only ever stores `chat_id → session_id`, so a session that has been
    /// archived but not yet removed from the index must still be locatable:
    /// this tries the active root first, then scans `expired/*/<id>`.
    fn locate_session_dir(&self, id: &SessionId) -> Result<PathBuf> {
        let active = self.active_dir(id);
        if active.join("session.json").is_file() {
            return Ok(active);
        }

        let expired_root = self.root.join("expired");
        if expired_root.is_dir() {
            for date_entry in fs::read_dir(&expired_root)? {
                let date_entry = date_entry?;
                if !date_entry.file_type()?.is_dir() {
                    continue;
                }
                let candidate = date_entry.path().join(id.as_str());
                if candidate.join("session.json").is_file() {
                    return Ok(candidate);
                }
            }
        }

        Err(SessionError::DirMissing(id.to_string()))
    }

    fn session_dir(&self, session: &Session) -> PathBuf {
        match &session.storage_path {
            Some(relative) => self.root.join(relative),
            None => self.active_dir(&session.id),
        }
    }

    fn messages_dir(&self, dir: &Path) -> PathBuf {
        dir.join("messages")
    }

    fn message_path(&self, dir: &Path, id: &MessageId) -> PathBuf {
        self.messages_dir(dir).join(format!("{id}.json"))
    }

    fn load_session_from_dir(&self, dir: &Path) -> Result<Session> {
        let bytes = fs::read(dir.join("session.json"))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Writes to a temp file in the same directory, then renames — a crash
    /// yields either the old or the new session file, never a torn one.
    fn save_session_atomic(&self, dir: &Path, session: &Session) -> Result<()> {
        fs::create_dir_all(self.messages_dir(dir))?;
        let tmp = dir.join(format!("session.json.tmp-{}", Utc::now().timestamp_nanos_opt().unwrap_or(0)));
        fs::write(&tmp, serde_json::to_vec_pretty(session)?)?;
        fs::rename(&tmp, dir.join("session.json"))?;
        Ok(())
    }

    fn session_lock(&self, id: &SessionId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        Arc::clone(locks.entry(id.clone()).or_insert_with(|| Arc::new(Mutex::new(()))))
    }
}
